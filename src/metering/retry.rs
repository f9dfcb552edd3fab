use rand::Rng;
use reqwest::{RequestBuilder, Response};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::MeteringError;

/// Backoff policy for transport failures and transient 5xx responses.
///
/// 429 is deliberately absent from `status_codes`: a rate-limit rejection is
/// surfaced to the caller instead of being retried here.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
    pub status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            jitter_ms: 250,
            status_codes: vec![500, 502, 503, 504],
        }
    }
}

/// Send a request, retrying connection errors and retryable statuses.
///
/// `clear` must resolve before every attempt, retries included, and its error
/// ends the loop. `build` is called once per attempt. A client-side timeout is
/// returned immediately as [`MeteringError::Timeout`]; retrying a slow endpoint
/// is the caller's decision. When retries are exhausted on a retryable status
/// the last response is returned so the caller can read its error envelope.
pub async fn send_with_retry<F, C, Fut>(
    build: F,
    clear: C,
    config: &RetryConfig,
) -> Result<Response, MeteringError>
where
    F: Fn() -> RequestBuilder,
    C: Fn() -> Fut,
    Fut: Future<Output = Result<(), MeteringError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        clear().await?;

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if !config.status_codes.contains(&status.as_u16()) {
                    return Ok(response);
                }

                if attempt > config.max_retries {
                    debug!(
                        "Exhausted {} retries; last status: {}",
                        config.max_retries, status
                    );
                    return Ok(response);
                }

                let wait = calculate_backoff(config, attempt);
                warn!(
                    "Attempt {}/{} failed with status {}. Retrying in {:?}...",
                    attempt,
                    config.max_retries + 1,
                    status,
                    wait
                );
                sleep(wait).await;
            }
            Err(e) if e.is_timeout() => {
                warn!("Metering request timed out on attempt {}", attempt);
                return Err(MeteringError::Timeout);
            }
            Err(e) => {
                if attempt > config.max_retries {
                    return Err(MeteringError::Transport(format!(
                        "request failed after {} attempts: {}",
                        attempt, e
                    )));
                }

                let wait = calculate_backoff(config, attempt);
                warn!(
                    "Attempt {}/{} failed with error: {}. Retrying in {:?}...",
                    attempt,
                    config.max_retries + 1,
                    e,
                    wait
                );
                sleep(wait).await;
            }
        }
    }
}

/// Capped exponential backoff plus random jitter.
pub fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_backoff_ms as f64;
    let max = config.max_backoff_ms as f64;

    // Exponential: base * 2^(attempt - 1)
    let raw_backoff = base * 2_f64.powi((attempt as i32) - 1);
    let capped_backoff = raw_backoff.min(max);

    let jitter = if config.jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=config.jitter_ms)
    } else {
        0
    };

    Duration::from_millis((capped_backoff as u64) + jitter)
}
