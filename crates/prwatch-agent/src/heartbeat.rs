//! Heartbeat for in-flight tool calls
//!
//! `next_step` can block for a long time inside the poll loop; the
//! heartbeat posts a short progress message on an interval so the client's
//! transport does not give up on the call.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Where progress messages go; the transport layer supplies its own sink
pub trait ProgressSink: Send + Sync {
    fn post(&self, message: &str);
}

/// Default sink: progress goes to the log stream
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn post(&self, message: &str) {
        info!("{message}");
    }
}

/// Posts `message` every `interval` until dropped
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start(sink: Arc<dyn ProgressSink>, interval: Duration, message: String) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it so the first
            // message lands one interval in.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sink.post(&message);
            }
        });
        Self { handle }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
