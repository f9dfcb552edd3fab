use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hourly usage as returned by `GET usage`.
///
/// One entry per hour (and org), each carrying every usage type of the
/// requested product family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsageResponse {
    #[serde(default)]
    pub data: Vec<HourlyUsage>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyUsage {
    pub attributes: HourlyAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAttributes {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub product_family: Option<String>,
    #[serde(default)]
    pub org_name: Option<String>,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub usage_type: String,
    /// Absent when the API has no reading for that hour.
    #[serde(default)]
    pub value: Option<f64>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ErrorEnvelope {
    /// Best-effort message from a raw error body.
    pub fn message_from(body: &str) -> String {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(env) if !env.errors.is_empty() => env.errors.join("; "),
            _ => {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    "empty error body".to_string()
                } else {
                    trimmed.chars().take(200).collect()
                }
            }
        }
    }
}

impl RawUsageResponse {
    /// Iterate `(hour, usage_type, value)` triples; missing readings are skipped.
    pub fn readings(&self) -> impl Iterator<Item = (DateTime<Utc>, &str, f64)> + '_ {
        self.data.iter().flat_map(|hour| {
            hour.attributes.measurements.iter().filter_map(move |m| {
                m.value
                    .map(|v| (hour.attributes.timestamp, m.usage_type.as_str(), v))
            })
        })
    }
}
