//! Where tenants' contracted services come from. Read-only.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::contract::ContractedService;

#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Contracted services of `tenant`, in contract order. Unknown tenants
    /// have no services.
    async fn contracted_services(&self, tenant: &str) -> anyhow::Result<Vec<ContractedService>>;
}

/// Contracts from a YAML file mapping tenant ids to service lists:
///
/// ```yaml
/// acme:
///   - serviceKey: logs_ingested
///     productFamily: logs
///     committedQuantity: 1000
///     listPrice: 0.10
///     unit: GB
///     aggregationType: SUM
/// ```
pub struct YamlContractStore {
    tenants: HashMap<String, Vec<ContractedService>>,
}

impl YamlContractStore {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let raw: HashMap<String, Vec<ContractedService>> =
            serde_yaml::from_str(yaml).context("invalid contracts YAML")?;
        let tenants = raw
            .into_iter()
            .map(|(tenant, services)| {
                let services = services.into_iter().map(ContractedService::sanitized).collect();
                (tenant, services)
            })
            .collect();
        Ok(Self { tenants })
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read contracts file {}", path.display()))?;
        let store = Self::from_yaml(&yaml)?;
        tracing::info!(
            path = %path.display(),
            tenants = store.tenants.len(),
            "loaded contracts"
        );
        Ok(store)
    }
}

#[async_trait]
impl ContractStore for YamlContractStore {
    async fn contracted_services(&self, tenant: &str) -> anyhow::Result<Vec<ContractedService>> {
        Ok(self.tenants.get(tenant).cloned().unwrap_or_default())
    }
}

/// Contracts from the `contracted_services` table.
#[derive(Clone)]
pub struct PgContractStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ContractRow {
    service_key: String,
    product_family: String,
    committed_quantity: f64,
    list_price: f64,
    unit: String,
    threshold: Option<f64>,
    aggregation_type: String,
}

impl TryFrom<ContractRow> for ContractedService {
    type Error = anyhow::Error;

    fn try_from(row: ContractRow) -> Result<Self, Self::Error> {
        let aggregation_type = row
            .aggregation_type
            .parse()
            .with_context(|| format!("service '{}'", row.service_key))?;
        Ok(ContractedService {
            service_key: row.service_key,
            product_family: row.product_family,
            committed_quantity: row.committed_quantity,
            list_price: row.list_price,
            unit: row.unit,
            threshold: row.threshold,
            aggregation_type,
        }
        .sanitized())
    }
}

impl PgContractStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ContractStore for PgContractStore {
    async fn contracted_services(&self, tenant: &str) -> anyhow::Result<Vec<ContractedService>> {
        let rows = sqlx::query_as::<_, ContractRow>(
            r#"SELECT service_key, product_family,
                      committed_quantity::DOUBLE PRECISION AS committed_quantity,
                      list_price::DOUBLE PRECISION AS list_price,
                      unit,
                      threshold::DOUBLE PRECISION AS threshold,
                      aggregation_type
               FROM contracted_services
               WHERE tenant_id = $1
               ORDER BY position ASC, service_key ASC"#,
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ContractedService::try_from).collect()
    }
}
