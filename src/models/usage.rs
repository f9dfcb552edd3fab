use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::contract::ContractedService;

/// Normalized usage for one UTC calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyValue {
    pub date: NaiveDate,
    pub value: f64,
}

impl DailyValue {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self {
            date,
            value: if value.is_finite() { value.max(0.0) } else { 0.0 },
        }
    }
}

/// A day of the current month, either observed or synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyDay {
    pub date: NaiveDate,
    pub value: f64,
    pub is_forecast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Ok,
    Watch,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverageRisk {
    Low,
    Medium,
    High,
}

/// Aggregation result for one contracted service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUsage {
    pub service_key: String,
    pub product_family: String,
    pub unit: String,
    /// Month-to-date usage (sum or peak depending on aggregation).
    pub usage: f64,
    pub committed: f64,
    pub threshold: f64,
    pub projected: f64,
    /// `usage / committed * 100`, 0 when nothing is committed.
    pub utilization: f64,
    pub list_price: f64,
    pub cost: f64,
    pub projected_cost: f64,
    pub daily_values: Vec<DailyValue>,
    pub monthly_days: Vec<MonthlyDay>,
    /// Recent day-over-day percentage deltas, for the sparkline.
    pub trend: Vec<f64>,
    pub runway_days: Option<f64>,
    pub status: UsageStatus,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceUsage {
    /// Placeholder for a service whose usage could not be determined. The
    /// service stays in the result so committed spend is never understated.
    pub fn degraded(service: &ContractedService, reason: impl Into<String>) -> Self {
        Self {
            service_key: service.service_key.clone(),
            product_family: service.product_family.clone(),
            unit: service.unit.clone(),
            usage: 0.0,
            committed: service.committed(),
            threshold: service.effective_threshold(),
            projected: 0.0,
            utilization: 0.0,
            list_price: service.list_price,
            cost: 0.0,
            projected_cost: 0.0,
            daily_values: Vec::new(),
            monthly_days: Vec::new(),
            trend: Vec::new(),
            runway_days: None,
            status: UsageStatus::Ok,
            has_error: true,
            error: Some(reason.into()),
        }
    }

    pub fn contracted_cost(&self) -> f64 {
        self.committed * self.list_price
    }
}

/// Calendar range the figures cover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Tenant-level cost guard report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub tenant_id: String,
    pub services: Vec<ServiceUsage>,
    pub period: Period,
    pub as_of: DateTime<Utc>,
    pub contracted_spend: f64,
    pub current_spend: f64,
    pub projected_spend: f64,
    pub utilization: f64,
    pub projected_utilization: f64,
    pub runway_days: Option<f64>,
    pub overage_risk: OverageRisk,
    pub status: UsageStatus,
    pub errored_services: usize,
}
