use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, DurationRound, NaiveDate, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use url::Url;

use super::response::{ErrorEnvelope, RawUsageResponse};
use super::retry::{send_with_retry, RetryConfig};
use crate::errors::MeteringError;
use crate::metrics;

/// Days of history fetched for a cost summary (feeds the 30-day trend).
pub const HISTORY_DAYS: i64 = 30;
/// Wait assumed when a 429 carries no usable hint.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

const HOUR_FORMAT: &str = "%Y-%m-%dT%H";

#[derive(Debug, Clone)]
pub struct MeteringConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub app_key: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

/// Hour-aligned UTC query window, `[start_hour, end_hour)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageWindow {
    pub start_hour: DateTime<Utc>,
    pub end_hour: DateTime<Utc>,
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(chrono::Duration::hours(1)).unwrap_or(t)
}

impl UsageWindow {
    /// Truncate both bounds to the hour and never let the end pass `now`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let end_hour = truncate_to_hour(end.min(now));
        Self {
            start_hour: truncate_to_hour(start).min(end_hour),
            end_hour,
        }
    }

    /// Window for a cost summary: the last [`HISTORY_DAYS`] complete UTC days.
    ///
    /// The end is pinned to midnight today, so the still-changing current day
    /// is never fetched and repeated summaries on one day ask for the same data.
    pub fn cost_summary(now: DateTime<Utc>) -> Self {
        let end = now
            .duration_trunc(chrono::Duration::days(1))
            .unwrap_or_else(|_| truncate_to_hour(now));
        Self::new(end - chrono::Duration::days(HISTORY_DAYS), end, now)
    }

    pub fn is_empty(&self) -> bool {
        self.end_hour <= self.start_hour
    }

    pub fn first_day(&self) -> NaiveDate {
        self.start_hour.date_naive()
    }

    /// Last day with at least one hour inside the window.
    pub fn last_day(&self) -> NaiveDate {
        (self.end_hour - chrono::Duration::hours(1)).date_naive()
    }
}

/// Client for the external usage-metering API.
pub struct MeteringClient {
    client: reqwest::Client,
    usage_url: Url,
    api_key: Option<String>,
    app_key: Option<String>,
    retry: RetryConfig,
}

impl MeteringClient {
    pub fn new(config: MeteringConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("costguard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut base = config.base_url;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let usage_url = base.join("usage")?;

        Ok(Self {
            client,
            usage_url,
            api_key: config.api_key,
            app_key: config.app_key,
            retry: config.retry,
        })
    }

    /// Fetch hourly usage of one product family for one tenant.
    ///
    /// `clear` gates each HTTP attempt, so retries draw from the caller's
    /// rate-limit budget like the first call does.
    #[tracing::instrument(skip(self, window, clear), fields(start = %window.start_hour, end = %window.end_hour))]
    pub async fn fetch_usage<C, Fut>(
        &self,
        family: &str,
        window: &UsageWindow,
        tenant: &str,
        clear: C,
    ) -> Result<RawUsageResponse, MeteringError>
    where
        C: Fn() -> Fut,
        Fut: Future<Output = Result<(), MeteringError>>,
    {
        let started = Instant::now();
        let result = self.fetch_usage_inner(family, window, tenant, clear).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_metering_call(family, outcome, started.elapsed());
        result
    }

    async fn fetch_usage_inner<C, Fut>(
        &self,
        family: &str,
        window: &UsageWindow,
        tenant: &str,
        clear: C,
    ) -> Result<RawUsageResponse, MeteringError>
    where
        C: Fn() -> Fut,
        Fut: Future<Output = Result<(), MeteringError>>,
    {
        let start = window.start_hour.format(HOUR_FORMAT).to_string();
        let end = window.end_hour.format(HOUR_FORMAT).to_string();

        let build = || {
            let mut req = self.client.get(self.usage_url.clone()).query(&[
                ("family", family),
                ("start_hour", start.as_str()),
                ("end_hour", end.as_str()),
                ("org", tenant),
            ]);
            if let Some(key) = &self.api_key {
                req = req.header("x-api-key", key);
            }
            if let Some(key) = &self.app_key {
                req = req.header("x-application-key", key);
            }
            req
        };

        let response = send_with_retry(build, clear, &self.retry).await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            tracing::warn!(
                family,
                retry_after_secs = retry_after.as_secs(),
                "metering API rejected the call with 429"
            );
            return Err(MeteringError::RateLimitExceeded { retry_after });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                MeteringError::Timeout
            } else {
                MeteringError::Transport(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(MeteringError::Api {
                status: status.as_u16(),
                message: ErrorEnvelope::message_from(&body),
            });
        }

        let parsed: RawUsageResponse =
            serde_json::from_str(&body).map_err(|e| MeteringError::Decode(e.to_string()))?;

        if parsed.data.is_empty() && !parsed.errors.is_empty() {
            return Err(MeteringError::Api {
                status: status.as_u16(),
                message: parsed.errors.join("; "),
            });
        }

        tracing::debug!(family, hours = parsed.data.len(), "usage fetched");
        Ok(parsed)
    }
}

/// Remote retry hint: `Retry-After` seconds, else `X-RateLimit-Reset`
/// seconds, else [`DEFAULT_RETRY_AFTER`].
pub fn parse_retry_after(headers: &HeaderMap) -> Duration {
    ["retry-after", "x-ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.trim().parse::<u64>().ok())
        .next()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}
