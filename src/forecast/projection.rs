use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::calendar::{days_in_month, month_days, month_end, month_start};
use super::trend::{extract_trend, recent_growth};
use crate::models::contract::AggregationType;
use crate::models::usage::{DailyValue, MonthlyDay};

/// Trend points kept for display.
pub const TREND_POINTS: usize = 30;
/// Trend points averaged into the growth rate.
pub const GROWTH_WINDOW: usize = 7;
/// Growth rate is clamped to ±25% per day.
pub const MAX_DAILY_GROWTH: f64 = 0.25;

/// Month-end outlook for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub projected: f64,
    pub monthly_days: Vec<MonthlyDay>,
    pub trend: Vec<f64>,
    /// Expected increase per day of the billed quantity.
    pub daily_rate: f64,
    pub observed_days: usize,
}

/// Project month-end usage from the days observed so far.
///
/// `daily_values` may reach back before the current month; those days only
/// feed the trend. Observed days of `as_of`'s month run from the 1st through
/// the latest value dated in the month, a missing day in between counting as
/// zero. `current_total` is the month-to-date sum (SUM) or peak (MAX).
pub fn project(
    daily_values: &[DailyValue],
    current_total: f64,
    aggregation: AggregationType,
    as_of: NaiveDate,
) -> Projection {
    let first = month_start(as_of);
    let last = month_end(as_of);
    let n = days_in_month(as_of) as usize;

    let by_date: BTreeMap<NaiveDate, f64> = daily_values
        .iter()
        .map(|dv| (dv.date, dv.value))
        .collect();
    let series: Vec<f64> = by_date.values().copied().collect();
    let trend = extract_trend(&series, TREND_POINTS);

    let last_observed = by_date.range(first..=last).next_back().map(|(d, _)| *d);
    let Some(last_observed) = last_observed else {
        return Projection {
            projected: 0.0,
            monthly_days: month_days(as_of)
                .map(|date| MonthlyDay {
                    date,
                    value: 0.0,
                    is_forecast: false,
                })
                .collect(),
            trend,
            daily_rate: 0.0,
            observed_days: 0,
        };
    };

    let observed: Vec<MonthlyDay> = month_days(as_of)
        .take_while(|date| *date <= last_observed)
        .map(|date| MonthlyDay {
            date,
            value: by_date.get(&date).copied().unwrap_or(0.0),
            is_forecast: false,
        })
        .collect();
    let k = observed.len();
    let remaining = n - k;
    let growth = recent_growth(&trend, GROWTH_WINDOW).clamp(-MAX_DAILY_GROWTH, MAX_DAILY_GROWTH);

    let current_total = if current_total.is_finite() {
        current_total.max(0.0)
    } else {
        0.0
    };

    let (projected, daily_rate, forecast): (f64, f64, Vec<f64>) = match aggregation {
        AggregationType::Sum => {
            let avg = current_total / k as f64;
            let per_day = (avg * (1.0 + growth)).max(0.0);
            let projected = current_total + per_day * remaining as f64;
            (projected, per_day, vec![per_day; remaining])
        }
        AggregationType::Max => {
            let observed_peak = observed.iter().map(|d| d.value).fold(0.0, f64::max);
            let peak = current_total.max(observed_peak);
            // A falling trend never lowers the projection below the peak already billed.
            let growth = growth.max(0.0);
            let forecast: Vec<f64> = (1..=remaining)
                .map(|j| peak * (1.0 + growth * j as f64 / remaining as f64))
                .collect();
            let projected = forecast.last().copied().unwrap_or(peak).max(peak);
            let daily_rate = if remaining > 0 {
                (projected - peak) / remaining as f64
            } else {
                0.0
            };
            (projected, daily_rate, forecast)
        }
    };

    let mut monthly_days = observed;
    monthly_days.extend(
        month_days(as_of)
            .skip(k)
            .zip(forecast)
            .map(|(date, value)| MonthlyDay {
                date,
                value,
                is_forecast: true,
            }),
    );

    Projection {
        projected,
        monthly_days,
        trend,
        daily_rate,
        observed_days: k,
    }
}
