//! Tenant cost summaries: one pass over the contracted services, then totals.

pub mod aggregator;

pub use aggregator::{build_summary, SummaryAggregator};

use chrono::NaiveDate;

/// Cache key of a finished summary. Summaries only change once per UTC day
/// because the query window ends at midnight.
pub fn cache_key(tenant: &str, day: NaiveDate) -> String {
    format!("summary:{}:{}", tenant, day)
}
