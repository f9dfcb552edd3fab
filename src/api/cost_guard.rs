use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::metering::dimensions::resolve;
use crate::metering::{RateLimitState, Resolution};
use crate::metrics;
use crate::models::contract::ContractedService;
use crate::models::usage::CostSummary;
use crate::progress::{ProgressView, COST_SUMMARY_KIND};
use crate::summary;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProgressParams {
    pub tenant_id: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TenantParams {
    pub tenant_id: Option<String>,
}

/// A contracted service with what the mapper makes of it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractView {
    #[serde(flatten)]
    pub service: ContractedService,
    pub resolution: Resolution,
}

fn require_tenant(tenant_id: Option<String>) -> Result<String, AppError> {
    tenant_id
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("tenant_id is required".into()))
}

/// GET /api/v1/cost-guard/summary: month-to-date usage and month-end outlook
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<CostSummary>, AppError> {
    let tenant = require_tenant(params.tenant_id)?;
    let now = Utc::now();
    let cache_key = summary::cache_key(&tenant, now.date_naive());

    if !params.refresh {
        if let Some(cached) = state.store.get::<CostSummary>(&cache_key).await {
            tracing::debug!(tenant = %tenant, "serving cached cost summary");
            metrics::record_summary_run("cached");
            return Ok(Json(cached));
        }
    }

    let services = state
        .contracts
        .contracted_services(&tenant)
        .await
        .map_err(|e| AppError::ContractStore(format!("{:#}", e)))?;

    let (progress, applier) = state.progress.attach(&tenant, COST_SUMMARY_KIND);
    let result = tokio::time::timeout(
        state.config.summary_timeout(),
        state.aggregator.summarize(&tenant, &services, now, &progress),
    )
    .await;
    // Flush queued events so a poll after the response sees the final state.
    drop(progress);
    if let Err(e) = applier.await {
        tracing::warn!(tenant = %tenant, error = %e, "progress applier failed");
    }

    match result {
        Err(_) => {
            tracing::warn!(
                tenant = %tenant,
                timeout_secs = state.config.summary_timeout_secs,
                "cost summary timed out"
            );
            metrics::record_summary_run("timeout");
            Err(AppError::Timeout)
        }
        Ok(Err(e)) => {
            metrics::record_summary_run(if e.is_rate_limit() { "rate_limited" } else { "error" });
            Err(e.into())
        }
        Ok(Ok(summary)) => {
            metrics::record_summary_run("computed");
            if let Err(e) = state
                .store
                .set(&cache_key, &summary, state.config.summary_cache_ttl_secs)
                .await
            {
                tracing::warn!(tenant = %tenant, error = %e, "failed to cache cost summary");
            }
            Ok(Json(summary))
        }
    }
}

/// GET /api/v1/cost-guard/progress: polling endpoint for a running summary
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProgressParams>,
) -> Result<Json<ProgressView>, AppError> {
    let tenant = require_tenant(params.tenant_id)?;
    let kind = params.kind.as_deref().unwrap_or(COST_SUMMARY_KIND);

    let view = state
        .progress
        .read(&tenant, kind)
        .await
        .map(|s| ProgressView::from(&s))
        .unwrap_or_default();
    Ok(Json(view))
}

/// GET /api/v1/cost-guard/contracts: contracted services and their mapping
pub async fn get_contracts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TenantParams>,
) -> Result<Json<Vec<ContractView>>, AppError> {
    let tenant = require_tenant(params.tenant_id)?;
    let services = state
        .contracts
        .contracted_services(&tenant)
        .await
        .map_err(|e| AppError::ContractStore(format!("{:#}", e)))?;

    Ok(Json(
        services
            .into_iter()
            .map(|service| ContractView {
                resolution: resolve(&service.service_key),
                service,
            })
            .collect(),
    ))
}

/// GET /api/v1/cost-guard/rate-limit: remaining budget of the usage API bucket
pub async fn get_rate_limit(State(state): State<Arc<AppState>>) -> Json<RateLimitState> {
    Json(state.limiter.state(&state.config.rate_limit_bucket).await)
}
