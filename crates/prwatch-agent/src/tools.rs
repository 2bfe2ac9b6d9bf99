//! Tool surface
//!
//! The three operations the LLM client drives: `start`, `next_step`, and
//! `stop`. `next_step` is the one blocking call; it composes the fetcher,
//! the transition engine, the executor, and the session's poll worker, and
//! always answers with a directive. Control flow never passes to the LLM.

use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use prwatch_core::session::MonitorSession;
use prwatch_core::{
    engine, Action, Choice, Directive, Event, MonitorConfig, MonitorPhase, MonitorState,
    PlatformExecutor, PlatformFetcher, PrLocator, StatusSnapshot, Task, TriggerRecord,
    ASK_USER_INSTRUCTIONS,
};

use crate::heartbeat::{Heartbeat, ProgressSink, TracingSink};
use crate::registry::{monitor_id, MonitorRegistry};

/// Instructions attached to delegated tasks
const EXECUTE_INSTRUCTIONS: &str = "Perform this task now. When finished, call next_step with \
     the matching completion event (comment_addressed, investigation_complete, push_completed, \
     or task_complete).";

#[derive(Debug, Clone, Deserialize)]
pub struct StartParams {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub session_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextStepParams {
    pub monitor_id: String,
    pub event: String,
    #[serde(default)]
    pub choice: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// The agent's public face
pub struct ToolSurface {
    registry: MonitorRegistry,
    fetcher: Arc<dyn PlatformFetcher>,
    executor: Arc<dyn PlatformExecutor>,
    config: MonitorConfig,
    progress: Arc<dyn ProgressSink>,
}

impl ToolSurface {
    pub fn new(
        fetcher: Arc<dyn PlatformFetcher>,
        executor: Arc<dyn PlatformExecutor>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry: MonitorRegistry::new(),
            fetcher,
            executor,
            config,
            progress: Arc::new(TracingSink),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Begin monitoring a PR. Starting an already-monitored PR returns its
    /// summary instead of resetting anything.
    pub async fn start(&self, params: StartParams) -> Directive {
        let id = monitor_id(params.pr_number);
        if let Some(session) = self.registry.get(&id).await {
            let state = session.state().await;
            return Directive::polling(format!("Already monitoring {}", state.summary()))
                .with_instructions("Call next_step with event \"ready\" to resume polling.");
        }

        let pr = PrLocator::new(params.owner, params.repo, params.pr_number);
        let mut state = MonitorState::new(pr.clone(), params.session_dir);
        state.load_ignore_file();

        let session = MonitorSession::new(state, self.config.clone(), self.fetcher.clone());
        if let Err(e) = session.refresh().await {
            warn!("baseline fetch failed for {}: {e}", pr.slug());
            return Directive::stop(format!("Could not start monitoring {}: {e}", pr.slug()));
        }

        let summary = {
            let state = session.state().await;
            session.log().write_header(&state);
            session
                .log()
                .status(&StatusSnapshot::capture(&state, 0, false));
            self.launch_viewer(&state);
            state.summary()
        };
        info!("monitoring started: {summary}");
        self.registry.insert(id.clone(), session).await;

        Directive::polling(format!("Monitoring started: {summary}"))
            .with_context(serde_json::json!({ "monitor_id": id }))
            .with_instructions("Call next_step with event \"ready\" to begin polling.")
    }

    /// The single long-lived call. Feeds the event into the engine, runs
    /// deterministic tasks itself, and blocks in the poll loop when the
    /// engine says to keep watching.
    pub async fn next_step(&self, params: NextStepParams) -> Directive {
        let Some(session) = self.registry.get(&params.monitor_id).await else {
            return Directive::stop(format!("Unknown monitor: {}", params.monitor_id));
        };

        let heartbeat_message = {
            let state = session.state().await;
            format!(
                "next_step in flight for {} ({})",
                state.pr.slug(),
                state.phase.as_str()
            )
        };
        let _heartbeat = Heartbeat::start(
            self.progress.clone(),
            self.config.heartbeat_interval(),
            heartbeat_message,
        );

        // A viewer action that arrived while no worker was sleeping wins
        // over the incoming event, as long as no waiting-comment exchange
        // is already underway.
        if let Some(record) = session.take_trigger() {
            match record {
                TriggerRecord::Action(thread_id) => {
                    let mut state = session.state().await;
                    if state.active_waiting.is_none() {
                        if let Some(thread) = state.take_waiting_thread(&thread_id) {
                            let directive = engine::build_waiting_menu(&mut state, thread);
                            drop(state);
                            return self.finish(&session, directive).await;
                        }
                        session
                            .log()
                            .debug(&format!("trigger for unknown thread {thread_id}"));
                    } else {
                        // Busy with another exchange; keep it pending
                        session
                            .trigger_slot()
                            .publish(TriggerRecord::Action(thread_id));
                    }
                }
                TriggerRecord::Extend(stamp) => {
                    let mut state = session.state().await;
                    prwatch_core::extend_after_hours(
                        &mut state,
                        &self.config,
                        chrono::Local::now().naive_local(),
                    );
                    session
                        .log()
                        .resuming(&format!("After-hours extension applied ({stamp})"));
                }
                TriggerRecord::Wake => {}
            }
        }

        if let Some(data) = &params.data {
            merge_data(&mut *session.state().await, data);
        }

        let mut directive = {
            let mut state = session.state().await;
            match Event::from_str(&params.event) {
                Some(event) => {
                    let choice = params.choice.as_deref().map(Choice::parse);
                    engine::process_event(&mut state, event, choice.as_ref())
                }
                None => {
                    // Same recovery shape as an unexpected (state, event) pair
                    let phase = state.phase;
                    state.enter_phase(MonitorPhase::AwaitingUser);
                    Directive::ask_user(
                        format!(
                            "The monitor received the unknown event \"{}\" while {}. \
                             How should it proceed?",
                            params.event,
                            phase.as_str()
                        ),
                        vec!["Resume monitoring", "Stop monitoring"],
                    )
                }
            }
        };

        // Deterministic tasks run here, not in the LLM
        while directive.action == Action::AutoExecute {
            directive = self.run_auto_task(&session, directive).await;
        }

        if directive.action == Action::Polling {
            session
                .log()
                .resuming(directive.message.as_deref().unwrap_or("Polling"));
            directive = match session.spawn_poll_worker().await {
                Ok(directive) => directive,
                Err(e) => {
                    warn!("poll worker panicked: {e}");
                    session.log().debug(&format!("poll worker failure: {e}"));
                    Directive::stop("Poll worker failed; call start to recover")
                }
            };
            // The worker can itself finish on a merged PR
            if directive.action == Action::Merged {
                self.dispose(&session).await;
            }
        }

        self.finish(&session, directive).await
    }

    /// End a monitoring session
    pub async fn stop(&self, monitor_id: &str) -> Directive {
        match self.registry.remove(monitor_id).await {
            Some(session) => {
                let slug = {
                    let mut state = session.state().await;
                    state.enter_phase(MonitorPhase::Stopped);
                    state.pr.slug()
                };
                session.log().stopped("Monitoring stopped by request");
                session.cancel();
                info!("monitoring stopped: {slug}");
                Directive::stop(format!("Stopped monitoring {slug}"))
            }
            None => Directive::stop(format!("Unknown monitor: {monitor_id}")),
        }
    }

    /// Process shutdown: stop every session
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }

    pub async fn active_monitors(&self) -> Vec<String> {
        self.registry.ids().await
    }

    /// Bookkeeping every `next_step` exit passes through: persist the
    /// ignore list and attach the relay instructions.
    async fn finish(&self, session: &Arc<MonitorSession>, directive: Directive) -> Directive {
        {
            let state = session.state().await;
            state.persist_ignore_file();
        }
        session
            .log()
            .debug(&format!("next_step -> {}", directive.action.as_str()));
        match directive.action {
            Action::AskUser => directive.with_instructions(ASK_USER_INSTRUCTIONS),
            Action::Execute => directive.with_instructions(EXECUTE_INSTRUCTIONS),
            _ => directive,
        }
    }

    /// One deterministic task. Returns the next directive: the engine's
    /// task-complete transition on success, a question on failure.
    async fn run_auto_task(&self, session: &Arc<MonitorSession>, directive: Directive) -> Directive {
        let Some(task) = directive.task else {
            let mut state = session.state().await;
            return engine::executor_failure_plain(&mut state, Task::ResolveThread, "missing task");
        };
        debug!("auto-executing {}", task.as_str());

        match task {
            Task::ResolveThread => {
                let mut thread_id = directive
                    .context
                    .as_ref()
                    .and_then(|c| c.get("thread_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if thread_id.is_none() {
                    let state = session.state().await;
                    thread_id = state.active_waiting.as_ref().map(|t| t.id.clone());
                }
                let Some(thread_id) = thread_id else {
                    let mut state = session.state().await;
                    return engine::executor_failure_plain(&mut state, task, "no thread to resolve");
                };
                match self.executor.resolve_thread(&thread_id).await {
                    Ok(()) => {
                        let mut state = session.state().await;
                        engine::process_event(&mut state, Event::TaskComplete, None)
                    }
                    Err(e) => {
                        session.log().debug(&format!("resolve failed: {e}"));
                        let mut state = session.state().await;
                        engine::executor_failure_plain(&mut state, task, &e.to_string())
                    }
                }
            }
            Task::MergePr | Task::MergePrAdmin => {
                let pr = { session.state().await.pr.clone() };
                let admin = task == Task::MergePrAdmin;
                match self.executor.merge_pr(&pr, admin).await {
                    Ok(()) => {
                        {
                            let mut state = session.state().await;
                            state.enter_phase(MonitorPhase::Stopped);
                        }
                        session.log().stopped("PR merged");
                        self.dispose(session).await;
                        Directive::merged(format!("PR {} was merged", pr.slug()))
                    }
                    Err(prwatch_core::Error::MergePolicy(message)) => {
                        let mut state = session.state().await;
                        engine::executor_failure(&mut state, task, &message)
                    }
                    Err(e) => {
                        session.log().debug(&format!("merge failed: {e}"));
                        let mut state = session.state().await;
                        engine::executor_failure_plain(&mut state, task, &e.to_string())
                    }
                }
            }
            Task::RunNewBuild => {
                let (pr, branch, sha) = {
                    let state = session.state().await;
                    (
                        state.pr.clone(),
                        state.head_branch.clone(),
                        state.head_sha.clone(),
                    )
                };
                match self.executor.run_new_build(&pr, &branch, &sha).await {
                    Ok(new_sha) => {
                        let mut state = session.state().await;
                        state.head_sha = new_sha;
                        state.enter_phase(MonitorPhase::Polling);
                        Directive::polling("New build triggered")
                    }
                    Err(e) => {
                        session.log().debug(&format!("run_new_build failed: {e}"));
                        let mut state = session.state().await;
                        engine::executor_failure_plain(&mut state, task, &e.to_string())
                    }
                }
            }
            _ => {
                let mut state = session.state().await;
                engine::executor_failure_plain(&mut state, task, "task is not auto-executable")
            }
        }
    }

    /// Remove a finished session from the registry and cancel it
    async fn dispose(&self, session: &Arc<MonitorSession>) {
        let id = {
            let state = session.state().await;
            monitor_id(state.pr.number)
        };
        session.cancel();
        self.registry.remove(&id).await;
    }

    /// Launch the external dashboard pointing at this session's files
    /// (best effort; failure only gets a debug note).
    fn launch_viewer(&self, state: &MonitorState) {
        let Some(command) = &self.config.viewer_command else {
            return;
        };
        let spawned = std::process::Command::new(command)
            .arg("--log")
            .arg(state.status_log_path())
            .arg("--trigger")
            .arg(state.trigger_path())
            .spawn();
        match spawned {
            Ok(child) => {
                if let Err(e) = std::fs::write(state.viewer_pid_path(), child.id().to_string()) {
                    debug!("failed to record viewer pid: {e}");
                }
            }
            Err(e) => debug!("viewer launch failed: {e}"),
        }
    }
}

/// Fold the optional `data` argument into the investigation fields. A
/// malformed payload is ignored; the state is simply not updated.
fn merge_data(state: &mut MonitorState, data: &Value) {
    let object = match data {
        Value::Object(map) => Some(map.clone()),
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.as_object().cloned()),
        _ => None,
    };
    let Some(map) = object else {
        return;
    };
    if let Some(findings) = map.get("findings").and_then(Value::as_str) {
        state.investigation.findings = Some(findings.to_string());
    }
    if let Some(fix) = map.get("suggested_fix").and_then(Value::as_str) {
        state.investigation.suggested_fix = Some(fix.to_string());
    }
    if let Some(issue_type) = map.get("issue_type").and_then(Value::as_str) {
        state.investigation.issue_type = Some(issue_type.to_string());
    }
}
