//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};
use url::Url;

use costguard::cache::CoordinationStore;
use costguard::config::Config;
use costguard::contracts::YamlContractStore;
use costguard::models::contract::{AggregationType, ContractedService};
use costguard::AppState;

pub fn test_config(metering_url: &str) -> Config {
    Config {
        port: 0,
        redis_url: None,
        database_url: None,
        contracts_file: "contracts.yaml".into(),
        metering_api_url: Url::parse(metering_url).unwrap(),
        metering_api_key: Some("test-key".into()),
        metering_app_key: None,
        metering_timeout_secs: 5,
        metering_max_retries: 1,
        metering_backoff_base_ms: 10,
        metering_backoff_max_ms: 20,
        metering_backoff_jitter_ms: 0,
        rate_limit_bucket: "usage_metering".into(),
        rate_limit_max_calls: 100,
        rate_limit_window_secs: 60,
        rate_limit_max_wait_secs: 0,
        summary_timeout_secs: 30,
        summary_cache_ttl_secs: 900,
        progress_ttl_secs: 300,
        dashboard_origin: "http://localhost:3000".into(),
    }
}

pub fn state_with_contracts(config: Config, yaml: &str) -> Arc<AppState> {
    let contracts = Arc::new(YamlContractStore::from_yaml(yaml).unwrap());
    Arc::new(AppState::new(config, CoordinationStore::local_only(), contracts).unwrap())
}

pub fn service(key: &str, committed: f64, price: f64, aggregation: AggregationType) -> ContractedService {
    ContractedService {
        service_key: key.into(),
        product_family: key.into(),
        committed_quantity: committed,
        list_price: price,
        unit: "units".into(),
        threshold: None,
        aggregation_type: aggregation,
    }
}

/// One reading of `usage_type` at 00:00 UTC on each of `days` days from `start`.
pub fn daily_readings(start: NaiveDate, days: i64, usage_type: &str, value: f64) -> Value {
    let data: Vec<Value> = (0..days)
        .map(|i| {
            let day = start + Duration::days(i);
            json!({"attributes": {
                "timestamp": format!("{}T00:00:00Z", day),
                "measurements": [{"usage_type": usage_type, "value": value}]
            }})
        })
        .collect();
    json!({ "data": data })
}

pub fn empty_usage() -> Value {
    json!({ "data": [] })
}
