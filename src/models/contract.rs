use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default alert threshold as a fraction of the committed quantity.
pub const DEFAULT_THRESHOLD_RATIO: f64 = 0.9;

/// Whether a service's billed quantity is cumulative over the period or a peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationType {
    /// Volume accumulated across the month (e.g. ingested GB).
    Sum,
    /// Instantaneous peak (e.g. host count).
    Max,
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationType::Sum => f.pad("SUM"),
            AggregationType::Max => f.pad("MAX"),
        }
    }
}

impl FromStr for AggregationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUM" => Ok(AggregationType::Sum),
            "MAX" => Ok(AggregationType::Max),
            other => anyhow::bail!("unknown aggregation type '{}'", other),
        }
    }
}

/// One line of a tenant's contract, as configured outside this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractedService {
    pub service_key: String,
    pub product_family: String,
    pub committed_quantity: f64,
    /// Price per unit.
    pub list_price: f64,
    pub unit: String,
    #[serde(default)]
    pub threshold: Option<f64>,
    pub aggregation_type: AggregationType,
}

impl ContractedService {
    /// Committed quantity, never negative.
    pub fn committed(&self) -> f64 {
        self.committed_quantity.max(0.0)
    }

    /// Configured threshold, or 90% of the commitment.
    pub fn effective_threshold(&self) -> f64 {
        self.threshold
            .unwrap_or_else(|| self.committed() * DEFAULT_THRESHOLD_RATIO)
    }

    /// Clamp values that would break the invariants, logging what was fixed.
    pub fn sanitized(mut self) -> Self {
        if self.committed_quantity < 0.0 || !self.committed_quantity.is_finite() {
            tracing::warn!(
                service = %self.service_key,
                committed = self.committed_quantity,
                "negative or invalid committed quantity, treating as 0"
            );
            self.committed_quantity = 0.0;
        }
        if !self.list_price.is_finite() || self.list_price < 0.0 {
            tracing::warn!(service = %self.service_key, "invalid list price, treating as 0");
            self.list_price = 0.0;
        }
        self
    }
}
