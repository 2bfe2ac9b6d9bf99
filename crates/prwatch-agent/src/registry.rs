//! Process-wide session registry
//!
//! Maps monitor identifiers to live sessions for the lifetime of the
//! process. The container is never exposed; every access goes through the
//! tool surface.

use prwatch_core::session::MonitorSession;
use prwatch_core::MonitorPhase;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Monitor identifier derived from the PR number
pub fn monitor_id(pr_number: u64) -> String {
    format!("pr-{pr_number}")
}

#[derive(Default)]
pub struct MonitorRegistry {
    inner: RwLock<HashMap<String, Arc<MonitorSession>>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: String, session: Arc<MonitorSession>) {
        self.inner.write().await.insert(id, session);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<MonitorSession>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<MonitorSession>> {
        self.inner.write().await.remove(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Process shutdown: mark every session stopped, trip every
    /// cancellation signal, drop everything.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<(String, Arc<MonitorSession>)> =
            self.inner.write().await.drain().collect();
        for (id, session) in sessions {
            info!("shutting down monitor {id}");
            session.log().stopped("Process shutting down");
            session.state().await.enter_phase(MonitorPhase::Stopped);
            session.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prwatch_core::platform::test_support::MockPlatform;
    use prwatch_core::{MonitorConfig, MonitorState, PrLocator};

    fn session(dir: &std::path::Path, number: u64) -> Arc<MonitorSession> {
        MonitorSession::new(
            MonitorState::new(PrLocator::new("octo", "spoon", number), dir),
            MonitorConfig::default(),
            Arc::new(MockPlatform::new(Vec::new())),
        )
    }

    #[test]
    fn test_monitor_id() {
        assert_eq!(monitor_id(41), "pr-41");
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MonitorRegistry::new();
        registry.insert(monitor_id(1), session(dir.path(), 1)).await;

        assert!(registry.get("pr-1").await.is_some());
        assert!(registry.get("pr-2").await.is_none());

        registry.remove("pr-1").await.unwrap();
        assert!(registry.get("pr-1").await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_all_writes_stopped_records() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MonitorRegistry::new();
        let one = session(dir.path(), 1);
        let two = session(dir.path(), 2);
        registry.insert(monitor_id(1), one.clone()).await;
        registry.insert(monitor_id(2), two.clone()).await;

        registry.shutdown_all().await;

        assert!(registry.ids().await.is_empty());
        assert!(one.is_cancelled());
        assert!(two.is_cancelled());
        for session in [one, two] {
            let log_path = session.state().await.status_log_path();
            let content = std::fs::read_to_string(log_path).unwrap();
            assert!(content.contains("STOPPED|"));
        }
    }
}
