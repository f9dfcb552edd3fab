//! Static registry from contracted service keys to metering dimensions.
//!
//! A usage response for one product family bundles many usage types, and
//! several contracted services can share a family (hosts and containers both
//! come back under `infra_hosts`). Each service therefore names the exact
//! usage types that belong to it; summing everything in a response would
//! double-count across services.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::response::RawUsageResponse;
use crate::models::contract::AggregationType;
use crate::models::usage::DailyValue;

const BYTES_PER_GB: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    InfraHosts,
    Containers,
    ApmHosts,
    ProfiledHosts,
    ServerlessFunctions,
    CustomMetrics,
    LogsIngested,
    LogsIndexed,
    IndexedSpans,
    SyntheticsApi,
    SyntheticsBrowser,
    RumSessions,
    IncidentManagement,
    SupportPlan,
}

/// Which usage types of a response belong to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageTypeFilter {
    Exact(&'static [&'static str]),
    Prefix(&'static str),
}

impl UsageTypeFilter {
    pub fn matches(&self, usage_type: &str) -> bool {
        match self {
            UsageTypeFilter::Exact(types) => types.contains(&usage_type),
            UsageTypeFilter::Prefix(prefix) => usage_type.starts_with(prefix),
        }
    }
}

/// Conversion from the raw reading to the contracted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitConversion {
    Identity,
    BytesToGigabytes,
    PerThousand,
    PerMillion,
}

impl UnitConversion {
    pub fn apply(&self, raw: f64) -> f64 {
        match self {
            UnitConversion::Identity => raw,
            UnitConversion::BytesToGigabytes => raw / BYTES_PER_GB,
            UnitConversion::PerThousand => raw / 1_000.0,
            UnitConversion::PerMillion => raw / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionSpec {
    pub dimension: Dimension,
    pub product_family: &'static str,
    pub usage_types: UsageTypeFilter,
    pub aggregation: AggregationType,
    pub unit: UnitConversion,
}

/// Outcome of looking up a service key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Mapped(DimensionSpec),
    UnavailableViaApi { reason: &'static str },
    Unmapped,
}

impl Dimension {
    pub const ALL: [Dimension; 14] = [
        Dimension::InfraHosts,
        Dimension::Containers,
        Dimension::ApmHosts,
        Dimension::ProfiledHosts,
        Dimension::ServerlessFunctions,
        Dimension::CustomMetrics,
        Dimension::LogsIngested,
        Dimension::LogsIndexed,
        Dimension::IndexedSpans,
        Dimension::SyntheticsApi,
        Dimension::SyntheticsBrowser,
        Dimension::RumSessions,
        Dimension::IncidentManagement,
        Dimension::SupportPlan,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Dimension::InfraHosts => "infra_hosts",
            Dimension::Containers => "containers",
            Dimension::ApmHosts => "apm_hosts",
            Dimension::ProfiledHosts => "profiled_hosts",
            Dimension::ServerlessFunctions => "serverless_functions",
            Dimension::CustomMetrics => "custom_metrics",
            Dimension::LogsIngested => "logs_ingested",
            Dimension::LogsIndexed => "logs_indexed",
            Dimension::IndexedSpans => "indexed_spans",
            Dimension::SyntheticsApi => "synthetics_api",
            Dimension::SyntheticsBrowser => "synthetics_browser",
            Dimension::RumSessions => "rum_sessions",
            Dimension::IncidentManagement => "incident_management",
            Dimension::SupportPlan => "support_plan",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL.into_iter().find(|d| d.key().eq_ignore_ascii_case(key))
    }

    pub fn resolution(&self) -> Resolution {
        use AggregationType::{Max, Sum};
        use UnitConversion::*;
        use UsageTypeFilter::{Exact, Prefix};

        let mapped = |product_family, usage_types, aggregation, unit| {
            Resolution::Mapped(DimensionSpec {
                dimension: *self,
                product_family,
                usage_types,
                aggregation,
                unit,
            })
        };

        match self {
            Dimension::InfraHosts => mapped("infra_hosts", Exact(&["infra_host_count"]), Max, Identity),
            Dimension::Containers => mapped("infra_hosts", Exact(&["container_count"]), Max, Identity),
            Dimension::ApmHosts => mapped("infra_hosts", Exact(&["apm_host_count"]), Max, Identity),
            Dimension::ProfiledHosts => {
                mapped("profiling", Exact(&["profiling_host_count"]), Max, Identity)
            }
            Dimension::ServerlessFunctions => {
                mapped("serverless", Exact(&["func_count"]), Max, Identity)
            }
            Dimension::CustomMetrics => {
                mapped("timeseries", Exact(&["num_custom_timeseries"]), Max, Identity)
            }
            Dimension::LogsIngested => {
                mapped("logs", Exact(&["ingested_events_bytes"]), Sum, BytesToGigabytes)
            }
            Dimension::LogsIndexed => mapped("logs", Prefix("logs_indexed_"), Sum, PerMillion),
            Dimension::IndexedSpans => {
                mapped("indexed_spans", Exact(&["indexed_events_count"]), Sum, PerMillion)
            }
            Dimension::SyntheticsApi => {
                mapped("synthetics_api", Exact(&["check_calls_count"]), Sum, PerThousand)
            }
            Dimension::SyntheticsBrowser => mapped(
                "synthetics_browser",
                Exact(&["browser_check_calls_count"]),
                Sum,
                PerThousand,
            ),
            Dimension::RumSessions => mapped(
                "rum",
                Exact(&["rum_browser_session_count", "rum_mobile_session_count"]),
                Sum,
                PerThousand,
            ),
            Dimension::IncidentManagement => Resolution::UnavailableViaApi {
                reason: "seat-based product, usage is not reported by the metering API",
            },
            Dimension::SupportPlan => Resolution::UnavailableViaApi {
                reason: "flat-fee line item, not metered",
            },
        }
    }
}

/// Resolve a contracted service key.
pub fn resolve(service_key: &str) -> Resolution {
    Dimension::from_key(service_key)
        .map(|d| d.resolution())
        .unwrap_or(Resolution::Unmapped)
}

/// Roll an hourly response up into one value per day of `[start, end]`.
///
/// Only usage types matched by the dimension's filter count. Within an hour the
/// matching readings are summed (several orgs or sub-types); across the hours
/// of a day they are summed for SUM services and the peak hour is kept for
/// MAX services. Days without readings are zero.
pub fn extract_daily(
    spec: &DimensionSpec,
    response: &RawUsageResponse,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<DailyValue> {
    let mut hourly: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for (hour, usage_type, value) in response.readings() {
        if spec.usage_types.matches(usage_type) {
            *hourly.entry(hour).or_insert(0.0) += spec.unit.apply(value);
        }
    }

    let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (hour, value) in hourly {
        let day = daily.entry(hour.date_naive()).or_insert(0.0);
        match spec.aggregation {
            AggregationType::Sum => *day += value,
            AggregationType::Max => *day = day.max(value),
        }
    }

    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|d| DailyValue::new(d, daily.get(&d).copied().unwrap_or(0.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::response::{HourlyAttributes, HourlyUsage, Measurement};
    use chrono::TimeZone;

    fn hour(day: u32, h: u32, readings: &[(&str, f64)]) -> HourlyUsage {
        HourlyUsage {
            attributes: HourlyAttributes {
                timestamp: Utc.with_ymd_and_hms(2026, 10, day, h, 0, 0).unwrap(),
                product_family: None,
                org_name: None,
                measurements: readings
                    .iter()
                    .map(|(t, v)| Measurement {
                        usage_type: t.to_string(),
                        value: Some(*v),
                    })
                    .collect(),
            },
        }
    }

    fn spec_of(key: &str) -> DimensionSpec {
        match resolve(key) {
            Resolution::Mapped(spec) => spec,
            other => panic!("{} not mapped: {:?}", key, other),
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
    }

    #[test]
    fn test_every_key_roundtrips() {
        for dim in Dimension::ALL {
            assert_eq!(Dimension::from_key(dim.key()), Some(dim));
        }
        assert_eq!(Dimension::from_key(" Infra_Hosts "), Some(Dimension::InfraHosts));
    }

    #[test]
    fn test_unknown_and_unavailable_keys() {
        assert_eq!(resolve("quantum_widgets"), Resolution::Unmapped);
        assert!(matches!(
            resolve("incident_management"),
            Resolution::UnavailableViaApi { .. }
        ));
    }

    #[test]
    fn test_shared_family_does_not_double_count() {
        let response = RawUsageResponse {
            data: vec![hour(1, 0, &[("infra_host_count", 10.0), ("container_count", 40.0)])],
            errors: vec![],
        };
        let hosts = extract_daily(&spec_of("infra_hosts"), &response, d(1), d(1));
        let containers = extract_daily(&spec_of("containers"), &response, d(1), d(1));
        assert_eq!(hosts[0].value, 10.0);
        assert_eq!(containers[0].value, 40.0);
    }

    #[test]
    fn test_sum_rolls_up_hours_with_unit_conversion() {
        let response = RawUsageResponse {
            data: vec![
                hour(1, 0, &[("ingested_events_bytes", 2e9)]),
                hour(1, 1, &[("ingested_events_bytes", 3e9)]),
                hour(2, 5, &[("ingested_events_bytes", 1e9)]),
            ],
            errors: vec![],
        };
        let days = extract_daily(&spec_of("logs_ingested"), &response, d(1), d(3));
        assert_eq!(days.len(), 3);
        assert!((days[0].value - 5.0).abs() < 1e-9);
        assert!((days[1].value - 1.0).abs() < 1e-9);
        assert_eq!(days[2].value, 0.0, "missing day is zero, not skipped");
    }

    #[test]
    fn test_max_keeps_peak_hour() {
        let response = RawUsageResponse {
            data: vec![
                hour(1, 0, &[("infra_host_count", 10.0)]),
                hour(1, 1, &[("infra_host_count", 14.0)]),
                hour(1, 2, &[("infra_host_count", 12.0)]),
            ],
            errors: vec![],
        };
        let days = extract_daily(&spec_of("infra_hosts"), &response, d(1), d(1));
        assert_eq!(days[0].value, 14.0);
    }

    #[test]
    fn test_prefix_filter() {
        let response = RawUsageResponse {
            data: vec![hour(
                1,
                0,
                &[
                    ("logs_indexed_15day_count", 1_000_000.0),
                    ("logs_indexed_30day_count", 2_000_000.0),
                    ("ingested_events_bytes", 5e9),
                ],
            )],
            errors: vec![],
        };
        let days = extract_daily(&spec_of("logs_indexed"), &response, d(1), d(1));
        assert!((days[0].value - 3.0).abs() < 1e-9);
    }
}
