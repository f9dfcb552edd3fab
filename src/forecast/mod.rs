//! Month-end forecasting: trends, projections and the health figures derived
//! from them. Everything here is pure so it can be tested without I/O.

pub mod assessment;
pub mod calendar;
pub mod projection;
pub mod trend;

pub use assessment::{derive_status, overage_risk, overall_status, runway_days, utilization};
pub use projection::{project, Projection};
pub use trend::extract_trend;
