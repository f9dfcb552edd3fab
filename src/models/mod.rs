pub mod contract;
pub mod usage;
