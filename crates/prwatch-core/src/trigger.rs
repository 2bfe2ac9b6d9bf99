//! Trigger file protocol
//!
//! The dashboard writes a one-line trigger file next to the status log; the
//! watcher reads it, deletes it, and hands the content to the session. The
//! file is written exclusively by the dashboard and consumed exclusively
//! here.

use notify::{EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Parsed trigger-file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerRecord {
    /// Open the waiting-comment action menu for this thread
    Action(String),
    /// Extend the after-hours window; the payload is the dashboard's clock
    Extend(String),
    /// Any other non-empty content: wake the poll loop, discard
    Wake,
}

impl TriggerRecord {
    pub fn parse(content: &str) -> Option<Self> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        if let Some(id) = content.strip_prefix("ACTION|") {
            let id = id.trim();
            if !id.is_empty() {
                return Some(Self::Action(id.to_string()));
            }
        }
        if let Some(stamp) = content.strip_prefix("EXTEND|") {
            return Some(Self::Extend(stamp.trim().to_string()));
        }
        Some(Self::Wake)
    }
}

/// Single-record mailbox between the watcher and the session.
///
/// The watcher publishes under one lock; the poll worker's sleep waits on
/// the paired notifier. A record published while nobody sleeps stays in the
/// slot until the next `next_step` drains it.
#[derive(Debug, Default)]
pub struct TriggerSlot {
    inner: Mutex<Option<TriggerRecord>>,
    notify: Notify,
}

impl TriggerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, record: TriggerRecord) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(record);
        }
        self.notify.notify_one();
    }

    pub fn take(&self) -> Option<TriggerRecord> {
        self.inner.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Completes when a record is published (or was published while nobody
    /// was waiting).
    pub async fn published(&self) {
        self.notify.notified().await;
    }
}

/// Filesystem observer for one session's trigger file.
///
/// Watches the file's directory for creation and modification, waits a
/// small settle interval so a partially written file is never read, then
/// reads, deletes, and publishes.
pub struct TriggerWatcher {
    // Held for its side effect; dropping it stops the observer.
    _watcher: notify::RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl TriggerWatcher {
    pub fn spawn(
        trigger_path: PathBuf,
        settle: Duration,
        slot: Arc<TriggerSlot>,
    ) -> Result<Self> {
        let dir = trigger_path
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| Error::Other("trigger path has no parent".to_string()))?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let watched = trigger_path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event)
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                        && event.paths.iter().any(|p| p == &watched) =>
                {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!("trigger watcher error: {e}"),
            }
        })
        .map_err(|e| Error::Other(format!("failed to create watcher: {e}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Other(format!("failed to watch {}: {e}", dir.display())))?;

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Let the writer finish before we read
                tokio::time::sleep(settle).await;
                let content = match tokio::fs::read_to_string(&trigger_path).await {
                    Ok(content) => content,
                    // Already consumed by an earlier event for the same write
                    Err(_) => continue,
                };
                if let Err(e) = tokio::fs::remove_file(&trigger_path).await {
                    debug!("failed to remove trigger file: {e}");
                }
                if let Some(record) = TriggerRecord::parse(&content) {
                    debug!("trigger received: {record:?}");
                    slot.publish(record);
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for TriggerWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
