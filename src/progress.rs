//! "N of M services" progress for long-running summary requests.
//!
//! The summary run never touches the store directly: it pushes
//! [`ProgressEvent`]s into a channel and a task spawned by
//! [`ProgressTracker::attach`] applies them in order. The polling endpoint
//! reads whatever was last written until the entry idles out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{CoordinationStore, Expiry};

/// Request kind used by the cost summary endpoint.
pub const COST_SUMMARY_KIND: &str = "cost_summary";

pub const DEFAULT_PROGRESS_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub tenant_id: String,
    pub request_kind: String,
    pub total: u64,
    pub completed: u64,
    pub current_service_name: Option<String>,
    pub rate_limit_waiting: bool,
    pub rate_limit_wait_seconds: u64,
    pub last_updated_at: DateTime<Utc>,
}

/// Polling payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub progress_percent: u8,
    pub total: u64,
    pub completed: u64,
    pub current: Option<String>,
    pub rate_limit_waiting: bool,
    pub rate_limit_wait_seconds: u64,
}

impl From<&ProgressState> for ProgressView {
    fn from(state: &ProgressState) -> Self {
        let percent = if state.total == 0 {
            0.0
        } else {
            state.completed as f64 / state.total as f64 * 100.0
        };
        Self {
            progress_percent: percent.round().clamp(0.0, 100.0) as u8,
            total: state.total,
            completed: state.completed,
            current: state.current_service_name.clone(),
            rate_limit_waiting: state.rate_limit_waiting,
            rate_limit_wait_seconds: state.rate_limit_wait_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started { total: u64 },
    Working { service: String },
    Finished { service: String },
    Waiting { waiting: bool, seconds: u64 },
}

/// Sending half of a progress channel. Sends never fail the caller; once the
/// applying task is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    /// A sender nobody listens to (CLI runs, tests).
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn started(&self, total: usize) {
        self.send(ProgressEvent::Started {
            total: total as u64,
        });
    }

    pub fn working(&self, service: &str) {
        self.send(ProgressEvent::Working {
            service: service.to_string(),
        });
    }

    pub fn finished(&self, service: &str) {
        self.send(ProgressEvent::Finished {
            service: service.to_string(),
        });
    }

    pub fn waiting(&self, waiting: bool, seconds: u64) {
        self.send(ProgressEvent::Waiting { waiting, seconds });
    }
}

#[derive(Clone)]
pub struct ProgressTracker {
    store: CoordinationStore,
    ttl_secs: u64,
}

impl ProgressTracker {
    pub fn new(store: CoordinationStore, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    fn state_key(tenant: &str, kind: &str) -> String {
        format!("progress:{}:{}", tenant, kind)
    }

    fn completed_key(tenant: &str, kind: &str) -> String {
        format!("progress:{}:{}:completed", tenant, kind)
    }

    async fn write(&self, state: &ProgressState) {
        let key = Self::state_key(&state.tenant_id, &state.request_kind);
        if let Err(e) = self.store.set(&key, state, self.ttl_secs).await {
            tracing::warn!(key, error = %e, "failed to write progress state");
        }
    }

    /// Start (or restart) tracking a request with `total` steps.
    pub async fn init(&self, tenant: &str, kind: &str, total: u64) {
        self.store
            .set_counter(&Self::completed_key(tenant, kind), 0, self.ttl_secs)
            .await;
        self.write(&ProgressState {
            tenant_id: tenant.to_string(),
            request_kind: kind.to_string(),
            total,
            completed: 0,
            current_service_name: None,
            rate_limit_waiting: false,
            rate_limit_wait_seconds: 0,
            last_updated_at: Utc::now(),
        })
        .await;
    }

    /// Count one finished step and record its label.
    pub async fn advance(&self, tenant: &str, kind: &str, label: &str) {
        let completed = self
            .store
            .increment(&Self::completed_key(tenant, kind), self.ttl_secs, Expiry::Idle)
            .await;
        self.update(tenant, kind, |state| {
            state.completed = completed.value;
            state.current_service_name = Some(label.to_string());
            state.rate_limit_waiting = false;
            state.rate_limit_wait_seconds = 0;
        })
        .await;
    }

    /// Record the step currently in flight without counting it.
    pub async fn set_current(&self, tenant: &str, kind: &str, label: &str) {
        self.update(tenant, kind, |state| {
            state.current_service_name = Some(label.to_string());
        })
        .await;
    }

    pub async fn set_waiting(&self, tenant: &str, kind: &str, waiting: bool, seconds: u64) {
        self.update(tenant, kind, |state| {
            state.rate_limit_waiting = waiting;
            state.rate_limit_wait_seconds = if waiting { seconds } else { 0 };
        })
        .await;
    }

    async fn update<F>(&self, tenant: &str, kind: &str, apply: F)
    where
        F: FnOnce(&mut ProgressState),
    {
        let key = Self::state_key(tenant, kind);
        let Some(mut state) = self.store.get::<ProgressState>(&key).await else {
            tracing::debug!(tenant, kind, "progress update for unknown or expired request");
            return;
        };
        apply(&mut state);
        state.last_updated_at = Utc::now();
        self.write(&state).await;
        self.store
            .touch(&Self::completed_key(tenant, kind), self.ttl_secs)
            .await;
    }

    pub async fn read(&self, tenant: &str, kind: &str) -> Option<ProgressState> {
        let mut state = self
            .store
            .get::<ProgressState>(&Self::state_key(tenant, kind))
            .await?;
        // The counter is authoritative; the snapshot may lag a concurrent advance.
        if let Some(counter) = self.store.counter(&Self::completed_key(tenant, kind)).await {
            state.completed = counter.value.max(state.completed);
        }
        Some(state)
    }

    /// Drop idle entries from the local store.
    pub fn sweep(&self) -> usize {
        self.store.evict_expired()
    }

    async fn apply(&self, tenant: &str, kind: &str, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total } => self.init(tenant, kind, total).await,
            ProgressEvent::Working { service } => self.set_current(tenant, kind, &service).await,
            ProgressEvent::Finished { service } => self.advance(tenant, kind, &service).await,
            ProgressEvent::Waiting { waiting, seconds } => {
                self.set_waiting(tenant, kind, waiting, seconds).await
            }
        }
    }

    /// Open a progress channel for one request.
    ///
    /// The returned task applies events in send order and exits once every
    /// sender is dropped.
    pub fn attach(&self, tenant: &str, kind: &str) -> (ProgressSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = self.clone();
        let tenant = tenant.to_string();
        let kind = kind.to_string();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracker.apply(&tenant, &kind, event).await;
            }
        });
        (ProgressSender { tx }, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(CoordinationStore::local_only(), DEFAULT_PROGRESS_TTL_SECS)
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_init_advance_expire() {
        let t = tracker();
        t.init("acme", COST_SUMMARY_KIND, 5).await;
        for svc in ["a", "b", "c", "d", "e"] {
            t.advance("acme", COST_SUMMARY_KIND, svc).await;
        }

        let state = t.read("acme", COST_SUMMARY_KIND).await.unwrap();
        assert_eq!(state.completed, 5);
        assert_eq!(state.current_service_name.as_deref(), Some("e"));
        assert_eq!(ProgressView::from(&state).progress_percent, 100);

        tokio::time::advance(Duration::from_secs(DEFAULT_PROGRESS_TTL_SECS + 1)).await;
        assert!(t.sweep() >= 1);
        assert!(t.read("acme", COST_SUMMARY_KIND).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_refresh_idle_timeout() {
        let t = tracker();
        t.init("acme", COST_SUMMARY_KIND, 3).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        t.advance("acme", COST_SUMMARY_KIND, "logs").await;
        tokio::time::advance(Duration::from_secs(200)).await;

        let state = t.read("acme", COST_SUMMARY_KIND).await.expect("still live");
        assert_eq!(state.completed, 1);
    }

    #[tokio::test]
    async fn test_waiting_flag_and_unknown_request() {
        let t = tracker();
        t.set_waiting("nobody", COST_SUMMARY_KIND, true, 30).await;
        assert!(t.read("nobody", COST_SUMMARY_KIND).await.is_none());

        t.init("acme", COST_SUMMARY_KIND, 2).await;
        t.set_waiting("acme", COST_SUMMARY_KIND, true, 42).await;
        let state = t.read("acme", COST_SUMMARY_KIND).await.unwrap();
        assert!(state.rate_limit_waiting);
        assert_eq!(state.rate_limit_wait_seconds, 42);

        t.set_waiting("acme", COST_SUMMARY_KIND, false, 0).await;
        let state = t.read("acme", COST_SUMMARY_KIND).await.unwrap();
        assert!(!state.rate_limit_waiting);
        assert_eq!(state.rate_limit_wait_seconds, 0);
    }

    #[tokio::test]
    async fn test_attached_channel_applies_events_in_order() {
        let t = tracker();
        let (tx, handle) = t.attach("acme", COST_SUMMARY_KIND);
        tx.started(4);
        tx.working("logs_ingested");
        tx.finished("logs_ingested");
        tx.working("infra_hosts");
        drop(tx);
        handle.await.unwrap();

        let view = ProgressView::from(&t.read("acme", COST_SUMMARY_KIND).await.unwrap());
        assert_eq!(view.total, 4);
        assert_eq!(view.completed, 1);
        assert_eq!(view.progress_percent, 25);
        assert_eq!(view.current.as_deref(), Some("infra_hosts"));
    }

    #[test]
    fn test_view_percent_is_clamped() {
        let state = ProgressState {
            tenant_id: "t".into(),
            request_kind: COST_SUMMARY_KIND.into(),
            total: 2,
            completed: 7,
            current_service_name: None,
            rate_limit_waiting: false,
            rate_limit_wait_seconds: 0,
            last_updated_at: Utc::now(),
        };
        assert_eq!(ProgressView::from(&state).progress_percent, 100);

        let empty = ProgressState { total: 0, completed: 0, ..state };
        assert_eq!(ProgressView::from(&empty).progress_percent, 0);
    }
}
