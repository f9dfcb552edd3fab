use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::MeteringError;
use crate::forecast::{self, calendar};
use crate::metering::dimensions::{extract_daily, resolve};
use crate::metering::{MeteringClient, RateLimiter, Resolution, UsageWindow};
use crate::metrics;
use crate::models::contract::{AggregationType, ContractedService};
use crate::models::usage::{CostSummary, DailyValue, Period, ServiceUsage, UsageStatus};
use crate::progress::ProgressSender;

/// Where a single service is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    RateLimitCheck,
    Fetching,
    Extracting,
    Projecting,
    Done,
    Errored,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::RateLimitCheck => "rate_limit_check",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Projecting => "projecting",
            Stage::Done => "done",
            Stage::Errored => "errored",
        }
    }
}

fn enter(stage: Stage) {
    tracing::debug!(stage = stage.as_str(), "service stage");
}

/// A finished service plus the per-day growth of its billed quantity.
struct Assessed {
    usage: ServiceUsage,
    daily_rate: f64,
}

/// Runs every contracted service of a tenant through rate limiting, fetch,
/// extraction and projection, then rolls the results up.
#[derive(Clone)]
pub struct SummaryAggregator {
    client: Arc<MeteringClient>,
    limiter: RateLimiter,
    bucket: String,
}

impl SummaryAggregator {
    pub fn new(client: Arc<MeteringClient>, limiter: RateLimiter, bucket: impl Into<String>) -> Self {
        Self {
            client,
            limiter,
            bucket: bucket.into(),
        }
    }

    /// Build the cost summary for `tenant` as of `now`.
    ///
    /// Services are processed in order, one at a time. A failing service is
    /// kept as a degraded entry; a rate-limit rejection aborts the run and
    /// discards everything computed so far.
    #[tracing::instrument(skip(self, services, progress), fields(services = services.len()))]
    pub async fn summarize(
        &self,
        tenant: &str,
        services: &[ContractedService],
        now: DateTime<Utc>,
        progress: &ProgressSender,
    ) -> Result<CostSummary, MeteringError> {
        let services = dedupe(services);
        let window = UsageWindow::cost_summary(now);
        let as_of = now.date_naive();

        progress.started(services.len());

        let mut results = Vec::with_capacity(services.len());
        let mut daily_spend_rate = 0.0;

        for service in &services {
            progress.working(&service.service_key);

            match self.assess(tenant, service, &window, as_of, progress).await {
                Ok(assessed) => {
                    metrics::record_service_outcome("ok");
                    daily_spend_rate += assessed.daily_rate * service.list_price;
                    results.push(assessed.usage);
                }
                Err(e) if e.is_rate_limit() => {
                    metrics::record_service_outcome(e.kind());
                    tracing::warn!(
                        service = %service.service_key,
                        error = %e,
                        "rate limited, aborting cost summary"
                    );
                    return Err(e);
                }
                Err(e) => {
                    metrics::record_service_outcome(e.kind());
                    tracing::warn!(service = %service.service_key, error = %e, "service degraded");
                    results.push(ServiceUsage::degraded(service, e.to_string()));
                }
            }

            progress.finished(&service.service_key);
        }

        let summary = build_summary(tenant, results, daily_spend_rate, now);
        tracing::info!(
            projected_spend = summary.projected_spend,
            contracted_spend = summary.contracted_spend,
            errored = summary.errored_services,
            status = ?summary.status,
            "cost summary computed"
        );
        Ok(summary)
    }

    #[tracing::instrument(skip_all, fields(service = %service.service_key))]
    async fn assess(
        &self,
        tenant: &str,
        service: &ContractedService,
        window: &UsageWindow,
        as_of: NaiveDate,
        progress: &ProgressSender,
    ) -> Result<Assessed, MeteringError> {
        let result = self.run_stages(tenant, service, window, as_of, progress).await;
        if matches!(&result, Err(e) if !e.is_rate_limit()) {
            enter(Stage::Errored);
        }
        result
    }

    async fn run_stages(
        &self,
        tenant: &str,
        service: &ContractedService,
        window: &UsageWindow,
        as_of: NaiveDate,
        progress: &ProgressSender,
    ) -> Result<Assessed, MeteringError> {
        enter(Stage::Pending);
        let spec = match resolve(&service.service_key) {
            Resolution::Mapped(spec) => spec,
            Resolution::UnavailableViaApi { reason } => {
                return Err(MeteringError::UnavailableViaApi {
                    service: service.service_key.clone(),
                    reason: reason.to_string(),
                })
            }
            Resolution::Unmapped => {
                return Err(MeteringError::UnmappedService(service.service_key.clone()))
            }
        };

        if spec.aggregation != service.aggregation_type {
            tracing::warn!(
                contract = %service.aggregation_type,
                metered = %spec.aggregation,
                "contract aggregation type disagrees with the metered dimension, using metered"
            );
        }

        let daily: Vec<DailyValue> = if window.is_empty() {
            Vec::new()
        } else {
            let limiter = &self.limiter;
            let bucket = self.bucket.as_str();
            // one clearance per HTTP attempt, retries included
            let clear = move || async move {
                enter(Stage::RateLimitCheck);
                limiter
                    .acquire_or_wait(bucket, |waiting, secs| progress.waiting(waiting, secs))
                    .await?;
                enter(Stage::Fetching);
                Ok::<(), MeteringError>(())
            };

            let response = match self
                .client
                .fetch_usage(spec.product_family, window, tenant, clear)
                .await
            {
                Ok(response) => response,
                Err(MeteringError::RateLimitExceeded { retry_after }) => {
                    self.limiter.record_remote_limit(&self.bucket, retry_after).await;
                    return Err(MeteringError::RateLimitExceeded { retry_after });
                }
                Err(e) => return Err(e),
            };

            enter(Stage::Extracting);
            extract_daily(&spec, &response, window.first_day(), window.last_day())
        };

        enter(Stage::Projecting);
        let month_start = calendar::month_start(as_of);
        let month_values = daily
            .iter()
            .filter(|dv| dv.date >= month_start && dv.date <= as_of)
            .map(|dv| dv.value);
        let current = match spec.aggregation {
            AggregationType::Sum => month_values.sum::<f64>(),
            AggregationType::Max => month_values.fold(0.0, f64::max),
        };

        let projection = forecast::project(&daily, current, spec.aggregation, as_of);
        let committed = service.committed();
        let threshold = service.effective_threshold();

        let usage = ServiceUsage {
            service_key: service.service_key.clone(),
            product_family: service.product_family.clone(),
            unit: service.unit.clone(),
            usage: current,
            committed,
            threshold,
            projected: projection.projected,
            utilization: forecast::utilization(current, committed),
            list_price: service.list_price,
            cost: current * service.list_price,
            projected_cost: projection.projected * service.list_price,
            daily_values: daily,
            monthly_days: projection.monthly_days,
            trend: projection.trend,
            runway_days: forecast::runway_days(current, committed, projection.daily_rate),
            status: forecast::derive_status(projection.projected, threshold, committed),
            has_error: false,
            error: None,
        };
        enter(Stage::Done);

        Ok(Assessed {
            usage,
            daily_rate: projection.daily_rate,
        })
    }
}

/// Keep the first occurrence of each service key.
fn dedupe(services: &[ContractedService]) -> Vec<ContractedService> {
    let mut seen = HashSet::new();
    services
        .iter()
        .filter(|s| {
            let fresh = seen.insert(s.service_key.clone());
            if !fresh {
                tracing::warn!(service = %s.service_key, "duplicate contracted service ignored");
            }
            fresh
        })
        .cloned()
        .map(ContractedService::sanitized)
        .collect()
}

/// Roll per-service results up into tenant totals.
///
/// Committed spend of errored services still counts toward the contract, so
/// an outage of the metering API never makes a tenant look under-committed.
pub fn build_summary(
    tenant: &str,
    services: Vec<ServiceUsage>,
    daily_spend_rate: f64,
    now: DateTime<Utc>,
) -> CostSummary {
    let as_of = now.date_naive();

    let contracted_spend: f64 = services.iter().map(ServiceUsage::contracted_cost).sum();
    let current_spend: f64 = services.iter().map(|s| s.cost).sum();
    let projected_spend: f64 = services.iter().map(|s| s.projected_cost).sum();
    let projected_utilization = forecast::utilization(projected_spend, contracted_spend);
    let any_critical = services.iter().any(|s| s.status == UsageStatus::Critical);

    CostSummary {
        tenant_id: tenant.to_string(),
        period: Period {
            start_date: calendar::month_start(as_of),
            end_date: calendar::month_end(as_of),
        },
        as_of: now,
        contracted_spend,
        current_spend,
        projected_spend,
        utilization: forecast::utilization(current_spend, contracted_spend),
        projected_utilization,
        runway_days: forecast::runway_days(current_spend, contracted_spend, daily_spend_rate),
        overage_risk: forecast::overage_risk(
            projected_spend,
            contracted_spend,
            projected_utilization,
            any_critical,
        ),
        status: forecast::overall_status(projected_utilization),
        errored_services: services.iter().filter(|s| s.has_error).count(),
        services,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CoordinationStore;
    use crate::metering::{MeteringConfig, RateLimitConfig};
    use crate::models::usage::OverageRisk;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::registry::LookupSpan;
    use tracing_subscriber::Layer;

    /// Records the spans enclosing every `stage` event.
    #[derive(Clone, Default)]
    struct StageLog(Arc<Mutex<Vec<(String, Vec<String>)>>>);

    struct StageField(Option<String>);

    impl Visit for StageField {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "stage" {
                self.0 = Some(value.to_string());
            }
        }

        fn record_debug(&mut self, _: &Field, _: &dyn std::fmt::Debug) {}
    }

    impl<S> Layer<S> for StageLog
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
            let mut stage = StageField(None);
            event.record(&mut stage);
            if let Some(stage) = stage.0 {
                let spans = ctx
                    .event_scope(event)
                    .map(|scope| scope.map(|span| span.name().to_string()).collect())
                    .unwrap_or_default();
                self.0.lock().unwrap().push((stage, spans));
            }
        }
    }

    fn offline_aggregator() -> SummaryAggregator {
        let client = MeteringClient::new(MeteringConfig {
            base_url: url::Url::parse("http://127.0.0.1:9").unwrap(),
            api_key: None,
            app_key: None,
            timeout: std::time::Duration::from_millis(100),
            retry: Default::default(),
        })
        .unwrap();
        let limiter = RateLimiter::new(CoordinationStore::local_only(), RateLimitConfig::default());
        SummaryAggregator::new(Arc::new(client), limiter, "usage_metering")
    }

    fn contract(key: &str, committed: f64, price: f64) -> ContractedService {
        ContractedService {
            service_key: key.into(),
            product_family: "logs".into(),
            committed_quantity: committed,
            list_price: price,
            unit: "GB".into(),
            threshold: None,
            aggregation_type: AggregationType::Sum,
        }
    }

    fn ok_usage(key: &str, usage: f64, projected: f64, committed: f64, price: f64) -> ServiceUsage {
        let mut s = ServiceUsage::degraded(&contract(key, committed, price), "");
        s.has_error = false;
        s.error = None;
        s.usage = usage;
        s.projected = projected;
        s.cost = usage * price;
        s.projected_cost = projected * price;
        s.status = forecast::derive_status(projected, s.threshold, committed);
        s
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let services = vec![
            contract("logs_ingested", 100.0, 1.0),
            contract("infra_hosts", 10.0, 15.0),
            contract("logs_ingested", 999.0, 1.0),
        ];
        let kept = dedupe(&services);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].committed_quantity, 100.0);
    }

    #[test]
    fn test_totals_include_errored_commitments() {
        let now = Utc.with_ymd_and_hms(2026, 9, 11, 12, 0, 0).unwrap();
        let services = vec![
            ok_usage("logs_ingested", 300.0, 600.0, 1000.0, 0.1),
            ServiceUsage::degraded(&contract("support_plan", 1.0, 500.0), "flat fee"),
        ];
        let summary = build_summary("acme", services, 3.0, now);

        assert_eq!(summary.contracted_spend, 600.0);
        assert!((summary.current_spend - 30.0).abs() < 1e-9);
        assert!((summary.projected_spend - 60.0).abs() < 1e-9);
        assert!((summary.projected_utilization - 10.0).abs() < 1e-9);
        assert_eq!(summary.errored_services, 1);
        assert_eq!(summary.status, UsageStatus::Ok);
        assert_eq!(summary.overage_risk, OverageRisk::Low);
        assert_eq!(summary.runway_days, Some(190.0));
        assert_eq!(summary.period.start_date, NaiveDate::from_ymd_opt(2026, 9, 1).unwrap());
        assert_eq!(summary.period.end_date, NaiveDate::from_ymd_opt(2026, 9, 30).unwrap());
    }

    #[test]
    fn test_critical_service_raises_risk_and_overrun_is_high() {
        let now = Utc.with_ymd_and_hms(2026, 9, 11, 12, 0, 0).unwrap();

        let summary = build_summary(
            "acme",
            vec![
                ok_usage("logs_ingested", 300.0, 900.0, 1000.0, 0.1),
                ok_usage("infra_hosts", 1.0, 1.0, 100.0, 10.0),
            ],
            0.0,
            now,
        );
        assert_eq!(summary.overage_risk, OverageRisk::Medium);
        assert_eq!(summary.runway_days, None);

        let summary = build_summary(
            "acme",
            vec![ok_usage("logs_ingested", 800.0, 1200.0, 1000.0, 0.1)],
            10.0,
            now,
        );
        assert_eq!(summary.overage_risk, OverageRisk::High);
        assert_eq!(summary.status, UsageStatus::Critical);
    }

    #[test]
    fn test_empty_contract_list() {
        let now = Utc.with_ymd_and_hms(2026, 9, 11, 12, 0, 0).unwrap();
        let summary = build_summary("acme", Vec::new(), 0.0, now);
        assert_eq!(summary.contracted_spend, 0.0);
        assert_eq!(summary.utilization, 0.0);
        assert_eq!(summary.status, UsageStatus::Ok);
        assert_eq!(summary.overage_risk, OverageRisk::Low);
    }

    #[test]
    fn test_errored_stage_is_traced_within_service_span() {
        let log = StageLog::default();
        let subscriber = tracing_subscriber::registry().with(log.clone());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let summary = tracing::subscriber::with_default(subscriber, || {
            runtime.block_on(offline_aggregator().summarize(
                "acme",
                &[contract("quantum_widgets", 5.0, 10.0)],
                Utc::now(),
                &ProgressSender::detached(),
            ))
        })
        .unwrap();
        assert!(summary.services[0].has_error);

        let events = log.0.lock().unwrap();
        let (_, spans) = events
            .iter()
            .find(|(stage, _)| stage == "errored")
            .expect("errored stage traced");
        assert_eq!(spans.first().map(String::as_str), Some("assess"));
    }
}
