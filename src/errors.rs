use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures of a single metering step.
///
/// Only `RateLimitExceeded` is global: it aborts the whole aggregation run.
/// Every other variant is recorded against the one service that produced it.
#[derive(Debug, Clone, Error)]
pub enum MeteringError {
    #[error("metering API rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimitExceeded { retry_after: Duration },

    #[error("metering request timed out")]
    Timeout,

    #[error("no usage mapping exists for service '{0}'")]
    UnmappedService(String),

    #[error("usage for '{service}' is not available through the metering API: {reason}")]
    UnavailableViaApi { service: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("metering API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not decode metering response: {0}")]
    Decode(String),
}

impl MeteringError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, MeteringError::RateLimitExceeded { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MeteringError::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MeteringError::RateLimitExceeded { .. } => "rate_limited",
            MeteringError::Timeout => "timeout",
            MeteringError::UnmappedService(_) => "unmapped",
            MeteringError::UnavailableViaApi { .. } => "unavailable",
            MeteringError::Transport(_) => "transport",
            MeteringError::Api { .. } => "api",
            MeteringError::Decode(_) => "decode",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("cost summary timed out")]
    Timeout,

    #[error("contract store error: {0}")]
    ContractStore(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<MeteringError> for AppError {
    fn from(e: MeteringError) -> Self {
        match e {
            MeteringError::RateLimitExceeded { retry_after } => AppError::RateLimited {
                // never advertise a zero wait, clients would spin
                retry_after_secs: retry_after.as_secs().max(1),
            },
            MeteringError::Timeout => AppError::Timeout,
            other => AppError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Global rate limit has its own body shape so the dashboard can run a countdown.
        if let AppError::RateLimited { retry_after_secs } = self {
            let body = Json(json!({
                "rateLimit": true,
                "retryAfterSeconds": retry_after_secs,
            }));
            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", val);
            }
            return response;
        }

        let (status, error_type, code, msg) = match &self {
            AppError::BadRequest(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                m.clone(),
            ),
            AppError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout_error",
                "summary_timeout",
                "cost summary did not complete in time, please retry".to_string(),
            ),
            AppError::ContractStore(e) => {
                tracing::error!("Contract store error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "contract_store_failed",
                    "could not load contracted services".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::RateLimited { .. } => unreachable!("handled above"),
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_the_only_global_error() {
        let rl = MeteringError::RateLimitExceeded {
            retry_after: Duration::from_secs(42),
        };
        assert!(rl.is_rate_limit());
        assert_eq!(rl.retry_after(), Some(Duration::from_secs(42)));

        for e in [
            MeteringError::Timeout,
            MeteringError::UnmappedService("x".into()),
            MeteringError::Transport("reset".into()),
            MeteringError::Api { status: 400, message: "bad".into() },
            MeteringError::Decode("eof".into()),
        ] {
            assert!(!e.is_rate_limit(), "{} should be local", e.kind());
            assert!(e.retry_after().is_none());
        }
    }

    #[test]
    fn test_rate_limited_response_shape() {
        let err: AppError = MeteringError::RateLimitExceeded {
            retry_after: Duration::from_secs(17),
        }
        .into();
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("retry-after").unwrap(), "17");
    }

    #[test]
    fn test_zero_retry_after_is_bumped() {
        let err: AppError = MeteringError::RateLimitExceeded {
            retry_after: Duration::ZERO,
        }
        .into();
        assert!(matches!(err, AppError::RateLimited { retry_after_secs: 1 }));
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err: AppError = MeteringError::Timeout.into();
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
