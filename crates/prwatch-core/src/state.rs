//! Monitor state
//!
//! One `MonitorState` exists per watched PR. It is owned by its session and
//! mutated only through `next_step`, the poll worker, and the auto-execute
//! path; nothing else writes to it.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::platform::{CheckCounts, CommentThread, FailedCheck, PrLocator};

/// Top-level monitor phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    /// Created, not yet polling
    Idle,
    /// Watching the PR for a terminal condition
    Polling,
    /// Terminal condition found, prompt not yet built
    TerminalDetected,
    /// Question presented, waiting for the human's choice
    AwaitingUser,
    /// A delegated task is in flight with the LLM
    ExecutingTask,
    /// CI-failure investigation delegated to the LLM
    Investigating,
    /// Investigation findings presented
    InvestigationResults,
    /// Suggested fix being applied
    ApplyingFix,
    /// Monitoring ended
    Stopped,
}

impl MonitorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::TerminalDetected => "terminal_detected",
            Self::AwaitingUser => "awaiting_user",
            Self::ExecutingTask => "executing_task",
            Self::Investigating => "investigating",
            Self::InvestigationResults => "investigation_results",
            Self::ApplyingFix => "applying_fix",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Comment handling sub-flow, meaningful only under AwaitingUser/ExecutingTask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentFlow {
    None,
    /// One unresolved comment, fixed single-comment menu
    SingleCommentPrompt,
    /// Several unresolved comments, fixed multi-comment menu
    MultiCommentPrompt,
    /// Walking the comment list one at a time, prompting before each
    AddressAllIterating,
    /// Numbered pick list shown
    PickComment,
    /// One comment handled, offering the remainder
    PickRemaining,
}

impl CommentFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SingleCommentPrompt => "single_comment_prompt",
            Self::MultiCommentPrompt => "multi_comment_prompt",
            Self::AddressAllIterating => "address_all_iterating",
            Self::PickComment => "pick_comment",
            Self::PickRemaining => "pick_remaining",
        }
    }
}

/// CI-failure sub-flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiFlow {
    None,
    /// Failure menu shown
    CiFailurePrompt,
    /// Investigation task in flight
    Investigating,
    /// Findings menu shown
    InvestigationResults,
}

impl CiFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CiFailurePrompt => "ci_failure_prompt",
            Self::Investigating => "investigating",
            Self::InvestigationResults => "investigation_results",
        }
    }
}

/// Aggregate signal that interrupts polling, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    NewComment,
    MergeConflict,
    CiFailure,
    CiCancelled,
    ApprovedCiGreen,
    CiPassedCommentsIgnored,
}

impl TerminalKind {
    /// Tag written into TERMINAL log records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewComment => "new_comment",
            Self::MergeConflict => "merge_conflict",
            Self::CiFailure => "ci_failure",
            Self::CiCancelled => "ci_cancelled",
            Self::ApprovedCiGreen => "approved_and_ci_green",
            Self::CiPassedCommentsIgnored => "ci_passed_comments_pending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new_comment" => Some(Self::NewComment),
            "merge_conflict" => Some(Self::MergeConflict),
            "ci_failure" => Some(Self::CiFailure),
            "ci_cancelled" => Some(Self::CiCancelled),
            "approved_and_ci_green" => Some(Self::ApprovedCiGreen),
            "ci_passed_comments_pending" => Some(Self::CiPassedCommentsIgnored),
            _ => None,
        }
    }
}

/// Latest CI-failure investigation delivered by the LLM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Investigation {
    pub findings: Option<String>,
    pub suggested_fix: Option<String>,
    pub issue_type: Option<String>,
}

impl Investigation {
    pub fn is_duplicate_artifact(&self) -> bool {
        self.issue_type.as_deref() == Some("duplicate_artifact")
    }
}

/// The mutable record for one monitored PR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorState {
    // Identity
    pub pr: PrLocator,
    pub title: String,
    pub url: String,
    pub author: String,
    pub head_sha: String,
    pub head_branch: String,
    pub session_dir: PathBuf,

    // Primary state
    pub phase: MonitorPhase,
    pub comment_flow: CommentFlow,
    pub ci_flow: CiFlow,
    pub last_terminal: Option<TerminalKind>,

    // Aggregated platform status
    pub checks: CheckCounts,
    pub failures: Vec<FailedCheck>,
    pub approvals: Vec<String>,
    pub stale_approvals: Vec<String>,
    pub merge_conflict: bool,
    /// Needs-action threads, already filtered by the ignore set
    pub unresolved: Vec<CommentThread>,
    pub waiting_for_reply: Vec<CommentThread>,
    pub ignored_comments: BTreeSet<String>,
    /// Index into `unresolved` for the iterating flows
    pub comment_index: usize,
    pub active_waiting: Option<CommentThread>,
    pub investigation: Investigation,

    // Timing and policy
    pub poll_count: u64,
    pub last_poll: Option<DateTime<Utc>>,
    /// After-hours override: keep polling until this local wall-clock time
    pub after_hours_until: Option<NaiveDateTime>,
    /// Approval count captured when a merge was refused for missing reviews
    pub needs_additional_approval: Option<usize>,
    /// A thread auto-resolve is queued behind the current address task
    pub pending_resolve_after_address: bool,
}

impl MonitorState {
    pub fn new(pr: PrLocator, session_dir: impl Into<PathBuf>) -> Self {
        Self {
            pr,
            title: String::new(),
            url: String::new(),
            author: String::new(),
            head_sha: String::new(),
            head_branch: String::new(),
            session_dir: session_dir.into(),
            phase: MonitorPhase::Idle,
            comment_flow: CommentFlow::None,
            ci_flow: CiFlow::None,
            last_terminal: None,
            checks: CheckCounts::default(),
            failures: Vec::new(),
            approvals: Vec::new(),
            stale_approvals: Vec::new(),
            merge_conflict: false,
            unresolved: Vec::new(),
            waiting_for_reply: Vec::new(),
            ignored_comments: BTreeSet::new(),
            comment_index: 0,
            active_waiting: None,
            investigation: Investigation::default(),
            poll_count: 0,
            last_poll: None,
            after_hours_until: None,
            needs_additional_approval: None,
            pending_resolve_after_address: false,
        }
    }

    fn session_file(&self, suffix: &str) -> PathBuf {
        self.session_dir
            .join(format!("pr-monitor-{}{}", self.pr.number, suffix))
    }

    pub fn status_log_path(&self) -> PathBuf {
        self.session_file(".log")
    }

    pub fn trigger_path(&self) -> PathBuf {
        self.session_file(".trigger")
    }

    pub fn debug_log_path(&self) -> PathBuf {
        self.session_file(".debug.log")
    }

    pub fn ignore_file_path(&self) -> PathBuf {
        self.session_file(".ignore-comments")
    }

    pub fn viewer_pid_path(&self) -> PathBuf {
        self.session_file(".log.viewer.pid")
    }

    /// Switch top-level phase; Polling and Stopped clear the sub-flows and
    /// any per-terminal residue.
    pub fn enter_phase(&mut self, phase: MonitorPhase) {
        self.phase = phase;
        if matches!(phase, MonitorPhase::Polling | MonitorPhase::Stopped) {
            self.comment_flow = CommentFlow::None;
            self.ci_flow = CiFlow::None;
            self.comment_index = 0;
            self.active_waiting = None;
            self.pending_resolve_after_address = false;
        }
    }

    /// Fresh approvals at the current head; stale approvals never count
    pub fn approval_count(&self) -> usize {
        self.approvals.len()
    }

    /// The approval gate: while set, green terminals wait for a count
    /// strictly above the captured one.
    pub fn approval_gate_blocks(&self) -> bool {
        match self.needs_additional_approval {
            Some(captured) => self.approval_count() <= captured,
            None => false,
        }
    }

    /// Comment at the current iteration index
    pub fn current_comment(&self) -> Option<&CommentThread> {
        self.unresolved.get(self.comment_index)
    }

    /// Comments after the current index
    pub fn remaining_comments(&self) -> usize {
        self.unresolved.len().saturating_sub(self.comment_index)
    }

    /// Record fresh comment lists, dropping ignored threads before the split
    pub fn update_comments(&mut self, threads: Vec<CommentThread>) {
        let (waiting, needs_action): (Vec<_>, Vec<_>) = threads
            .into_iter()
            .filter(|t| !self.ignored_comments.contains(&t.id))
            .partition(|t| t.waiting_for_reply);
        self.unresolved = needs_action;
        self.waiting_for_reply = waiting;
    }

    /// Add every currently unresolved thread to the ignore set
    pub fn ignore_all_unresolved(&mut self) {
        for thread in self.unresolved.drain(..) {
            self.ignored_comments.insert(thread.id);
        }
    }

    /// Take the waiting-for-reply thread with the given id, if present
    pub fn take_waiting_thread(&mut self, thread_id: &str) -> Option<CommentThread> {
        let idx = self.waiting_for_reply.iter().position(|t| t.id == thread_id)?;
        Some(self.waiting_for_reply.remove(idx))
    }

    /// One-line summary used by resume-friendly `start`
    pub fn summary(&self) -> String {
        format!(
            "{} \"{}\": {} ({}); {} approval(s), {} unresolved comment(s)",
            self.pr.slug(),
            self.title,
            self.phase.as_str(),
            self.checks.summary(),
            self.approval_count(),
            self.unresolved.len(),
        )
    }

    /// Load the ignore list written by a previous process, if any
    pub fn load_ignore_file(&mut self) {
        if let Ok(content) = std::fs::read_to_string(self.ignore_file_path()) {
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    self.ignored_comments.insert(line.to_string());
                }
            }
        }
    }

    /// Persist the ignore list as a whole-file replacement. Write failures
    /// are swallowed; the monitor never fails on a bookkeeping write.
    pub fn persist_ignore_file(&self) {
        let body = self
            .ignored_comments
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        let path = self.ignore_file_path();
        if let Err(e) = write_whole_file(&path, &body) {
            tracing::warn!("failed to persist ignore list {}: {}", path.display(), e);
        }
    }
}

fn write_whole_file(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = body.to_string();
    if !content.is_empty() {
        content.push('\n');
    }
    std::fs::write(path, content)
}
