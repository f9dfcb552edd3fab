use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use costguard::cache::CoordinationStore;
use costguard::cli::{Cli, Commands};
use costguard::metering::dimensions::resolve;
use costguard::metering::Resolution;
use costguard::models::usage::CostSummary;
use costguard::progress::ProgressSender;
use costguard::{api, config, connect_contract_store, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "costguard"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (text_layer, json_layer) = if json_logs(std::env::var("LOG_FORMAT").ok().as_deref()) {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "costguard=debug,tower_http=debug".into()),
        ))
        .with(text_layer)
        .with(json_layer)
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Summary { tenant, json }) => run_summary(cfg, &tenant, json).await,
        Some(Commands::Contracts { tenant }) => list_contracts(cfg, &tenant).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// `LOG_FORMAT=json` switches to one JSON object per line.
fn json_logs(format: Option<&str>) -> bool {
    format.is_some_and(|v| v.trim().eq_ignore_ascii_case("json"))
}

async fn build_state(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    tracing::info!("Connecting to coordination store...");
    let store = CoordinationStore::connect(cfg.redis_url.as_deref()).await;

    tracing::info!("Loading contracts...");
    let contracts = connect_contract_store(&cfg).await?;

    Ok(Arc::new(AppState::new(cfg, store, contracts)?))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let state = build_state(cfg).await?;

    jobs::sweeper::spawn(state.progress.clone(), jobs::sweeper::SWEEP_INTERVAL);
    tracing::info!("Background sweeper started (every 60s)");

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("costguard listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_summary(cfg: config::Config, tenant: &str, json: bool) -> anyhow::Result<()> {
    let timeout = cfg.summary_timeout();
    let state = build_state(cfg).await?;
    let services = state.contracts.contracted_services(tenant).await?;

    let summary = tokio::time::timeout(
        timeout,
        state.aggregator.summarize(
            tenant,
            &services,
            chrono::Utc::now(),
            &ProgressSender::detached(),
        ),
    )
    .await
    .map_err(|_| anyhow::anyhow!("cost summary did not finish within {:?}", timeout))??;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &CostSummary) {
    println!(
        "Tenant {}  period {} .. {}",
        summary.tenant_id, summary.period.start_date, summary.period.end_date
    );
    println!(
        "{:<24} {:>12} {:>12} {:>12} {:>8}  {}",
        "SERVICE", "USAGE", "PROJECTED", "COMMITTED", "UTIL%", "STATUS"
    );
    for s in &summary.services {
        let status = match &s.error {
            Some(e) => format!("error: {}", e),
            None => format!("{:?}", s.status).to_lowercase(),
        };
        println!(
            "{:<24} {:>12.2} {:>12.2} {:>12.2} {:>8.1}  {}",
            s.service_key, s.usage, s.projected, s.committed, s.utilization, status
        );
    }
    println!();
    println!(
        "Spend: current {:.2} / projected {:.2} / contracted {:.2} ({:.1}% projected)",
        summary.current_spend,
        summary.projected_spend,
        summary.contracted_spend,
        summary.projected_utilization
    );
    println!(
        "Status {:?}, overage risk {:?}, runway {}",
        summary.status,
        summary.overage_risk,
        summary
            .runway_days
            .map(|d| format!("{:.1} days", d))
            .unwrap_or_else(|| "n/a".into())
    );
}

async fn list_contracts(cfg: config::Config, tenant: &str) -> anyhow::Result<()> {
    let contracts = connect_contract_store(&cfg).await?;
    let services = contracts.contracted_services(tenant).await?;

    if services.is_empty() {
        println!("No contracted services for tenant {}.", tenant);
        return Ok(());
    }

    println!(
        "{:<24} {:<20} {:>12} {:<8} {:<5}  {}",
        "SERVICE", "FAMILY", "COMMITTED", "UNIT", "AGG", "METERING"
    );
    for s in services {
        let metering = match resolve(&s.service_key) {
            Resolution::Mapped(spec) => format!("{} ({})", spec.product_family, spec.aggregation),
            Resolution::UnavailableViaApi { reason } => format!("unavailable: {}", reason),
            Resolution::Unmapped => "unmapped".to_string(),
        };
        println!(
            "{:<24} {:<20} {:>12.2} {:<8} {:<5}  {}",
            s.service_key, s.product_family, s.committed_quantity, s.unit, s.aggregation_type, metering
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_selection() {
        assert!(json_logs(Some("json")));
        assert!(json_logs(Some(" JSON ")));
        assert!(!json_logs(Some("text")));
        assert!(!json_logs(None));
    }
}
