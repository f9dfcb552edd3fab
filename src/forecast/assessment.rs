use crate::models::usage::{OverageRisk, UsageStatus};

/// Share of the commitment at which a service is put on watch.
pub const WATCH_RATIO: f64 = 0.7;
/// Aggregate utilization (percent) at which a tenant is critical.
pub const CRITICAL_UTILIZATION_PCT: f64 = 95.0;
/// Aggregate utilization (percent) at which a tenant is on watch.
pub const WATCH_UTILIZATION_PCT: f64 = 70.0;
/// Aggregate projected utilization (percent) at which overage risk is medium.
pub const MEDIUM_RISK_UTILIZATION_PCT: f64 = 90.0;

/// Critical once the projection reaches the threshold (inclusive), watch from
/// 70% of the commitment.
pub fn derive_status(projected: f64, threshold: f64, committed: f64) -> UsageStatus {
    if projected >= threshold {
        UsageStatus::Critical
    } else if projected >= committed * WATCH_RATIO {
        UsageStatus::Watch
    } else {
        UsageStatus::Ok
    }
}

/// `usage / committed * 100`; 0 when nothing is committed.
pub fn utilization(usage: f64, committed: f64) -> f64 {
    if committed <= 0.0 {
        return 0.0;
    }
    usage / committed * 100.0
}

/// Days until `committed` is used up at `daily_rate`.
///
/// `None` when the rate is not positive or there is no commitment.
pub fn runway_days(usage: f64, committed: f64, daily_rate: f64) -> Option<f64> {
    if daily_rate <= 0.0 || committed <= 0.0 || !daily_rate.is_finite() {
        return None;
    }
    Some(((committed - usage).max(0.0) / daily_rate * 10.0).round() / 10.0)
}

/// Tenant status from aggregate utilization in percent.
pub fn overall_status(utilization_pct: f64) -> UsageStatus {
    if utilization_pct >= CRITICAL_UTILIZATION_PCT {
        UsageStatus::Critical
    } else if utilization_pct >= WATCH_UTILIZATION_PCT {
        UsageStatus::Watch
    } else {
        UsageStatus::Ok
    }
}

pub fn overage_risk(
    projected_spend: f64,
    contracted_spend: f64,
    projected_utilization_pct: f64,
    any_critical: bool,
) -> OverageRisk {
    if contracted_spend > 0.0 && projected_spend >= contracted_spend {
        OverageRisk::High
    } else if any_critical || projected_utilization_pct >= MEDIUM_RISK_UTILIZATION_PCT {
        OverageRisk::Medium
    } else {
        OverageRisk::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_boundaries() {
        assert_eq!(derive_status(900.0, 900.0, 1000.0), UsageStatus::Critical);
        assert_eq!(derive_status(899.99, 900.0, 1000.0), UsageStatus::Watch);
        assert_eq!(derive_status(700.0, 900.0, 1000.0), UsageStatus::Watch);
        assert_eq!(derive_status(699.0, 900.0, 1000.0), UsageStatus::Ok);
    }

    #[test]
    fn test_status_with_custom_threshold_below_watch() {
        // threshold lower than 70% of commitment still wins
        assert_eq!(derive_status(500.0, 400.0, 1000.0), UsageStatus::Critical);
    }

    #[test]
    fn test_utilization_zero_commitment() {
        assert_eq!(utilization(123.0, 0.0), 0.0);
        assert_eq!(utilization(250.0, 1000.0), 25.0);
    }

    #[test]
    fn test_runway() {
        assert_eq!(runway_days(300.0, 1000.0, 30.0), Some(23.3));
        assert_eq!(runway_days(1200.0, 1000.0, 30.0), Some(0.0));
        assert_eq!(runway_days(300.0, 1000.0, 0.0), None);
        assert_eq!(runway_days(300.0, 1000.0, -2.0), None);
        assert_eq!(runway_days(300.0, 0.0, 30.0), None);
    }

    #[test]
    fn test_overall_status() {
        assert_eq!(overall_status(95.0), UsageStatus::Critical);
        assert_eq!(overall_status(94.9), UsageStatus::Watch);
        assert_eq!(overall_status(70.0), UsageStatus::Watch);
        assert_eq!(overall_status(10.0), UsageStatus::Ok);
    }

    #[test]
    fn test_overage_risk() {
        assert_eq!(overage_risk(110.0, 100.0, 110.0, false), OverageRisk::High);
        assert_eq!(overage_risk(91.0, 100.0, 91.0, false), OverageRisk::Medium);
        assert_eq!(overage_risk(50.0, 100.0, 50.0, true), OverageRisk::Medium);
        assert_eq!(overage_risk(50.0, 100.0, 50.0, false), OverageRisk::Low);
        assert_eq!(overage_risk(0.0, 0.0, 0.0, false), OverageRisk::Low);
    }
}
