//! Cost Guard: aggregates metered usage against contracted commitments,
//! forecasts month-end consumption and flags overage risk.
//!
//! The binary in `main.rs` wires these modules to the CLI; integration tests
//! in `tests/` drive them directly.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod contracts;
pub mod errors;
pub mod forecast;
pub mod jobs;
pub mod metering;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod summary;

use std::sync::Arc;

use cache::CoordinationStore;
use contracts::ContractStore;
use metering::{MeteringClient, RateLimiter};
use progress::ProgressTracker;
use summary::SummaryAggregator;

/// Shared application state passed to handlers and jobs.
pub struct AppState {
    pub config: config::Config,
    pub store: CoordinationStore,
    pub contracts: Arc<dyn ContractStore>,
    pub limiter: RateLimiter,
    pub progress: ProgressTracker,
    pub aggregator: SummaryAggregator,
}

impl AppState {
    pub fn new(
        config: config::Config,
        store: CoordinationStore,
        contracts: Arc<dyn ContractStore>,
    ) -> anyhow::Result<Self> {
        let client = Arc::new(MeteringClient::new(config.metering_config())?);
        let limiter = RateLimiter::new(store.clone(), config.rate_limit_config());
        let progress = ProgressTracker::new(store.clone(), config.progress_ttl_secs);
        let aggregator =
            SummaryAggregator::new(client, limiter.clone(), config.rate_limit_bucket.clone());

        Ok(Self {
            config,
            store,
            contracts,
            limiter,
            progress,
            aggregator,
        })
    }
}

/// Postgres when `DATABASE_URL` is set, the YAML file otherwise.
pub async fn connect_contract_store(
    config: &config::Config,
) -> anyhow::Result<Arc<dyn ContractStore>> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("Reading contracts from Postgres");
            Ok(Arc::new(contracts::PgContractStore::connect(url).await?))
        }
        None => Ok(Arc::new(
            contracts::YamlContractStore::load(&config.contracts_file).await?,
        )),
    }
}
