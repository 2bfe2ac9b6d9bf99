//! Session supervisor
//!
//! One `MonitorSession` per watched PR. It owns the state record, the poll
//! worker, the trigger watcher, and the cancellation signals. The state is
//! mutated only through the session: by `next_step` dispatch, by the poll
//! worker it spawns, and by the auto-execute path.

use chrono::{Local, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::directive::Directive;
use crate::engine::{build_terminal, build_waiting_menu, detect_terminal};
use crate::platform::{PlatformFetcher, PrInfo};
use crate::schedule::{extend_after_hours, next_poll_wait};
use crate::state::{MonitorPhase, MonitorState};
use crate::status_log::{LogWriter, StatusSnapshot};
use crate::trigger::{TriggerRecord, TriggerSlot, TriggerWatcher};
use crate::Result;

/// Cancellation signal; cloning shares the signal
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-PR supervisor object
pub struct MonitorSession {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    log: LogWriter,
    fetcher: Arc<dyn PlatformFetcher>,
    cancel: CancelToken,
    trigger_slot: Arc<TriggerSlot>,
    // Kept alive for the life of the session; dropping it stops the observer
    _trigger_watcher: Option<TriggerWatcher>,
    poll_token: std::sync::Mutex<Option<CancelToken>>,
}

impl MonitorSession {
    /// Build the session and attach the trigger watcher. A watcher that
    /// cannot start is logged and skipped; triggers then only drain on
    /// `next_step` entry.
    pub fn new(
        state: MonitorState,
        config: MonitorConfig,
        fetcher: Arc<dyn PlatformFetcher>,
    ) -> Arc<Self> {
        if let Err(e) = std::fs::create_dir_all(&state.session_dir) {
            warn!("failed to create session dir {}: {e}", state.session_dir.display());
        }
        let log = LogWriter::for_state(&state);
        let trigger_slot = Arc::new(TriggerSlot::new());
        let trigger_watcher = match TriggerWatcher::spawn(
            state.trigger_path(),
            config.trigger_settle(),
            trigger_slot.clone(),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("trigger watcher unavailable for {}: {e}", state.pr.slug());
                log.debug(&format!("trigger watcher unavailable: {e}"));
                None
            }
        };

        Arc::new(Self {
            config,
            state: Mutex::new(state),
            log,
            fetcher,
            cancel: CancelToken::new(),
            trigger_slot,
            _trigger_watcher: trigger_watcher,
            poll_token: std::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn log(&self) -> &LogWriter {
        &self.log
    }

    pub fn fetcher(&self) -> &Arc<dyn PlatformFetcher> {
        &self.fetcher
    }

    pub async fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().await
    }

    /// Pending trigger left by the watcher while no worker was sleeping
    pub fn take_trigger(&self) -> Option<TriggerRecord> {
        self.trigger_slot.take()
    }

    pub fn trigger_slot(&self) -> &Arc<TriggerSlot> {
        &self.trigger_slot
    }

    /// Trip the session signal and whatever worker is running
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Ok(guard) = self.poll_token.lock() {
            if let Some(token) = guard.as_ref() {
                token.cancel();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Refresh the aggregate status from the platform. Returns the head
    /// snapshot so callers can react to the merged flag.
    pub async fn refresh(&self) -> Result<PrInfo> {
        let pr = { self.state.lock().await.pr.clone() };
        let info = self.fetcher.fetch_pr_info(&pr).await?;
        if info.merged {
            return Ok(info);
        }
        let checks = self.fetcher.fetch_check_runs(&pr, &info.head_sha).await?;
        let reviews = self.fetcher.fetch_reviews(&pr, &info.head_sha).await?;
        let threads = self
            .fetcher
            .fetch_unresolved_comments(&pr, &info.author)
            .await?;

        let mut state = self.state.lock().await;
        state.title = info.title.clone();
        state.url = info.url.clone();
        state.author = info.author.clone();
        state.head_sha = info.head_sha.clone();
        state.head_branch = info.head_branch.clone();
        state.merge_conflict = info.has_conflict();
        state.checks = checks.counts;
        state.failures = checks.failures;
        state.approvals = reviews.approvals;
        state.stale_approvals = reviews.stale_approvals;
        state.update_comments(threads);
        state.poll_count += 1;
        state.last_poll = Some(Utc::now());
        Ok(info)
    }

    /// Start a fresh poll worker, cancelling any worker already running
    /// (the resume flow replaces the sleeper).
    pub fn spawn_poll_worker(self: &Arc<Self>) -> JoinHandle<Directive> {
        let token = CancelToken::new();
        if let Ok(mut guard) = self.poll_token.lock() {
            if let Some(previous) = guard.replace(token.clone()) {
                previous.cancel();
            }
        }
        let session = self.clone();
        tokio::spawn(async move { session.poll_loop(token).await })
    }

    /// The blocking poll loop: fetch, classify, log, sleep; ends on a
    /// terminal condition, a viewer trigger, merge, or cancellation.
    async fn poll_loop(&self, token: CancelToken) -> Directive {
        let mut paused_logged = false;
        loop {
            if self.cancel.is_cancelled() {
                return Directive::stop("Monitoring cancelled");
            }
            if token.is_cancelled() {
                return Directive::stop("Poll worker superseded");
            }

            match self.poll_round().await {
                Ok(Some(directive)) => return directive,
                Ok(None) => {}
                Err(e) => {
                    // Transient: log it and try again next interval
                    self.log.error(&format!("fetch failed: {e}"));
                    self.log.debug(&format!("poll fetch failure: {e}"));
                }
            }

            let wait = {
                let state = self.state.lock().await;
                next_poll_wait(&state, &self.config, Local::now().naive_local())
            };
            if wait.after_hours {
                if !paused_logged {
                    self.log.paused(&format!(
                        "Outside working hours; sleeping {}s",
                        wait.duration.as_secs()
                    ));
                    paused_logged = true;
                }
            } else {
                paused_logged = false;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Directive::stop("Monitoring cancelled");
                }
                _ = token.cancelled() => {
                    return Directive::stop("Poll worker superseded");
                }
                _ = self.trigger_slot.published() => {
                    if let Some(directive) = self.handle_trigger().await {
                        return directive;
                    }
                    // Extend or bare wake-up: re-poll immediately
                }
                _ = tokio::time::sleep(wait.duration) => {}
            }
        }
    }

    /// One fetch-and-classify round. `Some` means the loop is done.
    async fn poll_round(&self) -> Result<Option<Directive>> {
        let info = self.refresh().await?;
        if info.merged {
            let mut state = self.state.lock().await;
            state.enter_phase(MonitorPhase::Stopped);
            self.log.stopped("PR merged");
            info!("{} merged; monitoring complete", state.pr.slug());
            return Ok(Some(Directive::merged(format!(
                "PR {} was merged",
                state.pr.slug()
            ))));
        }

        let mut state = self.state.lock().await;
        let wait = next_poll_wait(&state, &self.config, Local::now().naive_local());
        self.log.status(&StatusSnapshot::capture(
            &state,
            wait.duration.as_secs(),
            wait.after_hours,
        ));

        let fresh_needs_action = !state.unresolved.is_empty();
        let merge_conflict = state.merge_conflict;
        if let Some(kind) = detect_terminal(&state, fresh_needs_action, merge_conflict) {
            state.enter_phase(MonitorPhase::TerminalDetected);
            let directive = build_terminal(&mut state, kind);
            self.log
                .terminal(kind, directive.question.as_deref().unwrap_or(""));
            return Ok(Some(directive));
        }
        Ok(None)
    }

    /// Apply a trigger taken during the sleep. `Some` ends the poll loop.
    async fn handle_trigger(&self) -> Option<Directive> {
        let record = self.trigger_slot.take()?;
        match record {
            TriggerRecord::Extend(stamp) => {
                let mut state = self.state.lock().await;
                extend_after_hours(&mut state, &self.config, Local::now().naive_local());
                self.log
                    .resuming(&format!("After-hours extension applied ({stamp})"));
                None
            }
            TriggerRecord::Action(thread_id) => {
                let mut state = self.state.lock().await;
                match state.take_waiting_thread(&thread_id) {
                    Some(thread) => Some(build_waiting_menu(&mut state, thread)),
                    None => {
                        self.log
                            .debug(&format!("trigger for unknown thread {thread_id}"));
                        None
                    }
                }
            }
            TriggerRecord::Wake => {
                debug!("bare trigger; re-polling");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::Action;
    use crate::platform::test_support::{pr_info, thread, MockPlatform, MockSnapshot};
    use crate::platform::{CheckCounts, PrLocator};
    use crate::state::TerminalKind;
    use crate::status_log::{parse_line, LogRecord};
    use std::time::Duration;

    fn new_state(dir: &std::path::Path) -> MonitorState {
        MonitorState::new(PrLocator::new("octo", "spoon", 12), dir)
    }

    fn green_snapshot() -> MockSnapshot {
        MockSnapshot {
            info: Some(pr_info("abc123")),
            checks: crate::platform::CheckRuns {
                counts: CheckCounts {
                    passed: 5,
                    total: 5,
                    ..Default::default()
                },
                failures: Vec::new(),
            },
            reviews: crate::platform::ReviewSummary {
                approvals: vec!["alice".to_string()],
                stale_approvals: Vec::new(),
            },
            threads: Vec::new(),
        }
    }

    // ==================== CancelToken Tests ====================

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        // Completed future after cancellation
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    // ==================== Poll Worker Tests ====================

    #[tokio::test]
    async fn test_poll_worker_detects_green_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(MockPlatform::new(vec![green_snapshot()]));
        let session = MonitorSession::new(
            new_state(dir.path()),
            MonitorConfig::default(),
            platform,
        );

        let directive = session.spawn_poll_worker().await.unwrap();
        assert_eq!(directive.action, Action::AskUser);
        assert!(directive
            .choices
            .unwrap()
            .contains(&"Merge the PR".to_string()));

        let state = session.state().await;
        assert_eq!(state.last_terminal, Some(TerminalKind::ApprovedCiGreen));
        assert_eq!(state.phase, MonitorPhase::AwaitingUser);
    }

    #[tokio::test]
    async fn test_poll_worker_reports_merged() {
        let dir = tempfile::tempdir().unwrap();
        let mut snapshot = green_snapshot();
        snapshot.info.as_mut().unwrap().merged = true;
        let platform = Arc::new(MockPlatform::new(vec![snapshot]));
        let session = MonitorSession::new(
            new_state(dir.path()),
            MonitorConfig::default(),
            platform,
        );

        let directive = session.spawn_poll_worker().await.unwrap();
        assert_eq!(directive.action, Action::Merged);

        let log = std::fs::read_to_string(session.state().await.status_log_path()).unwrap();
        let records: Vec<_> = log.lines().filter_map(parse_line).collect();
        assert!(records
            .iter()
            .any(|r| matches!(r, LogRecord::Stopped { .. })));
    }

    #[tokio::test]
    async fn test_poll_worker_writes_status_records() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(MockPlatform::new(vec![green_snapshot()]));
        let session = MonitorSession::new(
            new_state(dir.path()),
            MonitorConfig::default(),
            platform,
        );

        session.spawn_poll_worker().await.unwrap();
        let log = std::fs::read_to_string(session.state().await.status_log_path()).unwrap();
        let records: Vec<_> = log.lines().filter_map(parse_line).collect();
        assert!(matches!(records[0], LogRecord::Status(_)));
        assert!(matches!(records[1], LogRecord::Terminal { .. }));
    }

    #[tokio::test]
    async fn test_trigger_action_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        // No checks at all: the worker sleeps between rounds
        let mut waiting = thread("PRRT_9", "alice");
        waiting.comment_count = 2;
        waiting.last_author = "octocat".to_string();
        waiting.waiting_for_reply = true;
        let snapshot = MockSnapshot {
            info: Some(pr_info("abc123")),
            threads: vec![waiting],
            ..Default::default()
        };
        let platform = Arc::new(MockPlatform::new(vec![snapshot]));
        let session = MonitorSession::new(
            new_state(dir.path()),
            MonitorConfig::default(),
            platform,
        );

        let worker = session.spawn_poll_worker();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session
            .trigger_slot()
            .publish(TriggerRecord::Action("PRRT_9".to_string()));

        let directive = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(directive.action, Action::AskUser);
        assert!(directive
            .choices
            .unwrap()
            .contains(&"Resolve the thread".to_string()));
        assert!(session.state().await.active_waiting.is_some());
    }

    #[tokio::test]
    async fn test_cancel_stops_sleeping_worker() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = MockSnapshot {
            info: Some(pr_info("abc123")),
            ..Default::default()
        };
        let platform = Arc::new(MockPlatform::new(vec![snapshot]));
        let session = MonitorSession::new(
            new_state(dir.path()),
            MonitorConfig::default(),
            platform,
        );

        let worker = session.spawn_poll_worker();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.cancel();

        let directive = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(directive.action, Action::Stop);
    }

    #[tokio::test]
    async fn test_new_worker_supersedes_old() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = MockSnapshot {
            info: Some(pr_info("abc123")),
            ..Default::default()
        };
        let platform = Arc::new(MockPlatform::new(vec![snapshot]));
        let session = MonitorSession::new(
            new_state(dir.path()),
            MonitorConfig::default(),
            platform,
        );

        let first = session.spawn_poll_worker();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _second = session.spawn_poll_worker();

        let directive = tokio::time::timeout(Duration::from_secs(5), first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(directive.action, Action::Stop);
        // The session itself stays alive
        assert!(!session.is_cancelled());
        session.cancel();
    }

    #[tokio::test]
    async fn test_fetch_failure_is_logged_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        // First round has no scripted info (a transient failure), the
        // second round succeeds with a green terminal.
        let failing = MockSnapshot::default();
        let platform = Arc::new(MockPlatform::new(vec![failing, green_snapshot()]));
        let mut config = MonitorConfig::default();
        config.poll_no_checks_secs = 0;
        let session = MonitorSession::new(new_state(dir.path()), config, platform);

        let directive = tokio::time::timeout(Duration::from_secs(5), session.spawn_poll_worker())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(directive.action, Action::AskUser);

        let log = std::fs::read_to_string(session.state().await.status_log_path()).unwrap();
        let records: Vec<_> = log.lines().filter_map(parse_line).collect();
        assert!(records.iter().any(|r| matches!(r, LogRecord::Error { .. })));
    }
}
