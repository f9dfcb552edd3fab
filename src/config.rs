use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use url::Url;

use crate::metering::retry::RetryConfig;
use crate::metering::{MeteringConfig, RateLimitConfig};

const DEFAULT_METERING_URL: &str = "http://127.0.0.1:9090/api/v1/";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Coordination store. Unset = process-local rate limiting and progress.
    pub redis_url: Option<String>,
    /// When set, contracts are read from Postgres instead of the YAML file.
    pub database_url: Option<String>,
    pub contracts_file: String,

    pub metering_api_url: Url,
    pub metering_api_key: Option<String>,
    pub metering_app_key: Option<String>,
    pub metering_timeout_secs: u64,
    pub metering_max_retries: u32,
    pub metering_backoff_base_ms: u64,
    pub metering_backoff_max_ms: u64,
    pub metering_backoff_jitter_ms: u64,

    /// Name of the shared call budget for the usage API.
    pub rate_limit_bucket: String,
    pub rate_limit_max_calls: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_wait_secs: u64,

    /// Upper bound for one summary request, end to end.
    pub summary_timeout_secs: u64,
    pub summary_cache_ttl_secs: u64,
    pub progress_ttl_secs: u64,

    pub dashboard_origin: String,
}

impl Config {
    pub fn metering_config(&self) -> MeteringConfig {
        MeteringConfig {
            base_url: self.metering_api_url.clone(),
            api_key: self.metering_api_key.clone(),
            app_key: self.metering_app_key.clone(),
            timeout: Duration::from_secs(self.metering_timeout_secs),
            retry: RetryConfig {
                max_retries: self.metering_max_retries,
                base_backoff_ms: self.metering_backoff_base_ms,
                max_backoff_ms: self.metering_backoff_max_ms,
                jitter_ms: self.metering_backoff_jitter_ms,
                ..RetryConfig::default()
            },
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_calls: self.rate_limit_max_calls,
            window_secs: self.rate_limit_window_secs,
            max_wait: Duration::from_secs(self.rate_limit_max_wait_secs),
            ..RateLimitConfig::default()
        }
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_secs)
    }
}

/// Parse an env var, falling back to `default` when unset or unparseable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let metering_api_url = match env_opt("METERING_API_URL") {
        Some(raw) => Url::parse(&raw).with_context(|| format!("METERING_API_URL '{}' is not a URL", raw))?,
        None => {
            tracing::warn!("METERING_API_URL is not set, using {}", DEFAULT_METERING_URL);
            Url::parse(DEFAULT_METERING_URL)?
        }
    };

    let rate_limit_max_calls = env_or("RATE_LIMIT_MAX_CALLS", 10u64);
    if rate_limit_max_calls == 0 {
        anyhow::bail!("RATE_LIMIT_MAX_CALLS must be at least 1");
    }

    Ok(Config {
        port: env_or("COSTGUARD_PORT", 8080),
        redis_url: env_opt("REDIS_URL"),
        database_url: env_opt("DATABASE_URL"),
        contracts_file: env_opt("COSTGUARD_CONTRACTS_FILE")
            .unwrap_or_else(|| "contracts.yaml".into()),

        metering_api_url,
        metering_api_key: env_opt("METERING_API_KEY"),
        metering_app_key: env_opt("METERING_APP_KEY"),
        metering_timeout_secs: env_or("METERING_TIMEOUT_SECS", 30),
        metering_max_retries: env_or("METERING_MAX_RETRIES", 2),
        metering_backoff_base_ms: env_or("METERING_BACKOFF_BASE_MS", 500),
        metering_backoff_max_ms: env_or("METERING_BACKOFF_MAX_MS", 8_000),
        metering_backoff_jitter_ms: env_or("METERING_BACKOFF_JITTER_MS", 250),

        rate_limit_bucket: env_opt("RATE_LIMIT_BUCKET").unwrap_or_else(|| "usage_metering".into()),
        rate_limit_max_calls,
        rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 60u64).max(1),
        rate_limit_max_wait_secs: env_or("RATE_LIMIT_MAX_WAIT_SECS", 90),

        summary_timeout_secs: env_or("SUMMARY_TIMEOUT_SECS", 600),
        summary_cache_ttl_secs: env_or("SUMMARY_CACHE_TTL_SECS", 900),
        progress_ttl_secs: env_or("PROGRESS_TTL_SECS", 300u64).max(1),

        dashboard_origin: env_opt("DASHBOARD_ORIGIN")
            .unwrap_or_else(|| "http://localhost:3000".into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("COSTGUARD_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("COSTGUARD_TEST_GARBAGE", 7u64), 7);
        std::env::set_var("COSTGUARD_TEST_GARBAGE", " 12 ");
        assert_eq!(env_or("COSTGUARD_TEST_GARBAGE", 7u64), 12);
        assert_eq!(env_or("COSTGUARD_TEST_UNSET_VAR", 3u32), 3);
    }

    #[test]
    fn test_blank_optional_is_none() {
        std::env::set_var("COSTGUARD_TEST_BLANK", "   ");
        assert_eq!(env_opt("COSTGUARD_TEST_BLANK"), None);
    }
}
