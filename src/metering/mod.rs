//! Everything that talks to, or paces calls to, the external metering API.

pub mod client;
pub mod dimensions;
pub mod rate_limit;
pub mod response;
pub mod retry;

pub use client::{MeteringClient, MeteringConfig, UsageWindow};
pub use dimensions::{Dimension, DimensionSpec, Resolution};
pub use rate_limit::{Clearance, RateLimitConfig, RateLimitState, RateLimiter};
pub use response::RawUsageResponse;
