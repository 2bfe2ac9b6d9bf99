//! Transition engine
//!
//! The engine is total and pure: `(state, event, choice) -> (state', directive)`.
//! It owns the terminal priority rule, the comment and CI-failure sub-flow
//! routers, and the recovery transitions. It performs no I/O; the session
//! and tool surface act on the directives it returns.
//!
//! Every path writes the next top-level phase before returning. Unknown
//! `(state, event)` pairs come back as a resume-or-stop question, never as
//! an error.

use serde_json::json;

use crate::directive::{Directive, Task};
use crate::platform::CommentThread;
use crate::state::{CiFlow, CommentFlow, MonitorPhase, MonitorState, TerminalKind};

/// Instruction string attached to every question so the LLM relays it as-is
pub const ASK_USER_INSTRUCTIONS: &str = "Present this question to the user exactly as written, \
     with the choices as a numbered list. Do not answer it yourself. \
     Call next_step with event \"user_chose\" and the selected choice.";

/// Events the LLM client can feed into `next_step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Ready,
    UserChose,
    CommentAddressed,
    InvestigationComplete,
    PushCompleted,
    TaskComplete,
}

impl Event {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "user_chose" => Some(Self::UserChose),
            "comment_addressed" => Some(Self::CommentAddressed),
            "investigation_complete" => Some(Self::InvestigationComplete),
            "push_completed" => Some(Self::PushCompleted),
            "task_complete" => Some(Self::TaskComplete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::UserChose => "user_chose",
            Self::CommentAddressed => "comment_addressed",
            Self::InvestigationComplete => "investigation_complete",
            Self::PushCompleted => "push_completed",
            Self::TaskComplete => "task_complete",
        }
    }
}

/// A user selection, parsed from either the internal token or the menu text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    AddressAll,
    AddressSpecific,
    Address,
    Explain,
    HandleMyself,
    Skip,
    Done,
    Continue,
    Resume,
    Investigate,
    ShowLogs,
    Rerun,
    RerunFailed,
    ApplyFix,
    Ignore,
    RunNew,
    Merge,
    MergeAdmin,
    WaitForApprover,
    Resolve,
    FollowUp,
    ReSuggest,
    GoBack,
    /// 1-based numbered pick from a list
    Pick(usize),
    /// Anything the vocabulary does not cover
    Other(String),
}

impl Choice {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        // Numbered picks arrive either bare ("2") or as the menu line
        // ("2. Reviewer comment on src/lib.rs").
        let digits: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            if let Ok(n) = digits.parse::<usize>() {
                return Self::Pick(n);
            }
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "address_all" | "address all comments" | "address all remaining" => Self::AddressAll,
            "address_specific" | "address a specific comment" => Self::AddressSpecific,
            "address" | "address the comment" | "address the next comment" => Self::Address,
            "explain" | "explain the comment" => Self::Explain,
            "handle_myself" | "i'll handle it myself" => Self::HandleMyself,
            "skip" | "skip this comment" | "skip this one" => Self::Skip,
            "done" | "stop monitoring" | "stop addressing" => Self::Done,
            "continue" | "go ahead" | "keep monitoring" => Self::Continue,
            "resume" | "resume monitoring" => Self::Resume,
            "investigate" | "investigate the failure" => Self::Investigate,
            "show_logs" | "show the logs" => Self::ShowLogs,
            "rerun" | "re-run via browser" => Self::Rerun,
            "rerun_failed" | "re-run failed checks" => Self::RerunFailed,
            "apply_fix" | "apply the suggested fix" => Self::ApplyFix,
            "ignore" | "ignore the comments" | "ignore the failure" => Self::Ignore,
            "run_new" | "run a new build" => Self::RunNew,
            "merge" | "merge the pr" => Self::Merge,
            "merge_admin" | "merge with admin override" => Self::MergeAdmin,
            "wait_for_approver" | "wait for another approver" => Self::WaitForApprover,
            "resolve" | "resolve the thread" => Self::Resolve,
            "follow_up" | "post a follow-up" => Self::FollowUp,
            "re_suggest" | "suggest a different change" => Self::ReSuggest,
            "go_back" | "go back" => Self::GoBack,
            _ => Self::Other(trimmed.to_string()),
        }
    }
}

// Menu text. One table so the strings shown and the strings parsed stay in
// lockstep.
const CHOICE_ADDRESS: &str = "Address the comment";
const CHOICE_EXPLAIN: &str = "Explain the comment";
const CHOICE_HANDLE_MYSELF: &str = "I'll handle it myself";
const CHOICE_SKIP: &str = "Skip this comment";
const CHOICE_STOP: &str = "Stop monitoring";
const CHOICE_ADDRESS_ALL: &str = "Address all comments";
const CHOICE_ADDRESS_SPECIFIC: &str = "Address a specific comment";
const CHOICE_IGNORE_COMMENTS: &str = "Ignore the comments";
const CHOICE_REBASE: &str = "Resolve the conflict (rebase)";
const CHOICE_KEEP_MONITORING: &str = "Keep monitoring";
const CHOICE_INVESTIGATE: &str = "Investigate the failure";
const CHOICE_SHOW_LOGS: &str = "Show the logs";
const CHOICE_RERUN_FAILED: &str = "Re-run failed checks";
const CHOICE_RUN_NEW: &str = "Run a new build";
const CHOICE_RERUN_BROWSER: &str = "Re-run via browser";
const CHOICE_MERGE: &str = "Merge the PR";
const CHOICE_MERGE_ADMIN: &str = "Merge with admin override";
const CHOICE_WAIT_APPROVER: &str = "Wait for another approver";
const CHOICE_RESOLVE_THREAD: &str = "Resolve the thread";
const CHOICE_FOLLOW_UP: &str = "Post a follow-up";
const CHOICE_RE_SUGGEST: &str = "Suggest a different change";
const CHOICE_GO_BACK: &str = "Go back";
const CHOICE_APPLY_FIX: &str = "Apply the suggested fix";
const CHOICE_IGNORE_FAILURE: &str = "Ignore the failure";
const CHOICE_RESUME: &str = "Resume monitoring";
const CHOICE_GO_AHEAD: &str = "Go ahead";
const CHOICE_SKIP_ONE: &str = "Skip this one";
const CHOICE_STOP_ADDRESSING: &str = "Stop addressing";
const CHOICE_ADDRESS_NEXT: &str = "Address the next comment";
const CHOICE_ADDRESS_REMAINING: &str = "Address all remaining";

/// Apply the terminal priority rule to the current aggregate status.
///
/// Priority: NewComment > MergeConflict > CiFailure > CiCancelled >
/// ApprovedCiGreen > CiPassedCommentsIgnored. A CI failure is never masked
/// by an approval, and a stale approval never counts.
pub fn detect_terminal(
    state: &MonitorState,
    fresh_needs_action: bool,
    merge_conflict: bool,
) -> Option<TerminalKind> {
    if fresh_needs_action {
        return Some(TerminalKind::NewComment);
    }
    if merge_conflict {
        return Some(TerminalKind::MergeConflict);
    }
    if state.checks.failed > 0 {
        return Some(TerminalKind::CiFailure);
    }
    if state.checks.cancelled > 0 && state.checks.is_complete() {
        return Some(TerminalKind::CiCancelled);
    }
    if state.checks.is_all_passed() && !state.approval_gate_blocks() {
        if state.approval_count() > 0 {
            return Some(TerminalKind::ApprovedCiGreen);
        }
        if !state.ignored_comments.is_empty() {
            return Some(TerminalKind::CiPassedCommentsIgnored);
        }
    }
    None
}

/// Record the terminal, move to AwaitingUser, and build the fixed menu
pub fn build_terminal(state: &mut MonitorState, kind: TerminalKind) -> Directive {
    state.last_terminal = Some(kind);
    state.enter_phase(MonitorPhase::AwaitingUser);

    match kind {
        TerminalKind::NewComment => {
            if state.unresolved.len() == 1 {
                state.comment_flow = CommentFlow::SingleCommentPrompt;
                state.comment_index = 0;
                let comment = state.unresolved[0].clone();
                let place = comment.path.clone().unwrap_or_else(|| "the PR".to_string());
                Directive::ask_user(
                    format!(
                        "New comment from {} on {}:\n{}",
                        comment.author, place, comment.body
                    ),
                    vec![
                        CHOICE_ADDRESS,
                        CHOICE_EXPLAIN,
                        CHOICE_HANDLE_MYSELF,
                        CHOICE_SKIP,
                        CHOICE_STOP,
                    ],
                )
                .with_context(json!({ "comment": comment }))
            } else {
                state.comment_flow = CommentFlow::MultiCommentPrompt;
                Directive::ask_user(
                    format!("{} unresolved comments on the PR", state.unresolved.len()),
                    vec![
                        CHOICE_ADDRESS_ALL,
                        CHOICE_ADDRESS_SPECIFIC,
                        CHOICE_IGNORE_COMMENTS,
                        CHOICE_HANDLE_MYSELF,
                        CHOICE_STOP,
                    ],
                )
                .with_context(json!({ "comments": state.unresolved }))
            }
        }
        TerminalKind::MergeConflict => Directive::ask_user(
            "The PR has a merge conflict with the base branch",
            vec![
                CHOICE_REBASE,
                CHOICE_HANDLE_MYSELF,
                CHOICE_KEEP_MONITORING,
                CHOICE_STOP,
            ],
        ),
        TerminalKind::CiFailure => {
            state.ci_flow = CiFlow::CiFailurePrompt;
            let names: Vec<&str> = state.failures.iter().map(|f| f.name.as_str()).collect();
            Directive::ask_user(
                format!(
                    "{} of {} checks failed: {}",
                    state.checks.failed,
                    state.checks.total,
                    names.join(", ")
                ),
                vec![
                    CHOICE_INVESTIGATE,
                    CHOICE_SHOW_LOGS,
                    CHOICE_RERUN_FAILED,
                    CHOICE_RUN_NEW,
                    CHOICE_HANDLE_MYSELF,
                ],
            )
            .with_context(json!({ "failures": state.failures }))
        }
        TerminalKind::CiCancelled => Directive::ask_user(
            format!("{} check(s) were cancelled", state.checks.cancelled),
            vec![CHOICE_RUN_NEW, CHOICE_RERUN_BROWSER, CHOICE_HANDLE_MYSELF],
        ),
        TerminalKind::ApprovedCiGreen => Directive::ask_user(
            format!(
                "All {} checks passed and the PR has {} approval(s)",
                state.checks.total,
                state.approval_count()
            ),
            vec![
                CHOICE_MERGE,
                CHOICE_MERGE_ADMIN,
                CHOICE_WAIT_APPROVER,
                CHOICE_KEEP_MONITORING,
                CHOICE_STOP,
            ],
        ),
        TerminalKind::CiPassedCommentsIgnored => Directive::ask_user(
            format!(
                "All {} checks passed; {} comment(s) remain ignored",
                state.checks.total,
                state.ignored_comments.len()
            ),
            vec![CHOICE_MERGE, CHOICE_KEEP_MONITORING, CHOICE_STOP],
        ),
    }
}

/// Present the action menu for a waiting-for-reply thread (viewer trigger)
pub fn build_waiting_menu(state: &mut MonitorState, thread: CommentThread) -> Directive {
    state.enter_phase(MonitorPhase::AwaitingUser);
    let directive = Directive::ask_user(
        format!(
            "You replied last on the thread from {}:\n{}",
            thread.author, thread.body
        ),
        vec![
            CHOICE_RESOLVE_THREAD,
            CHOICE_FOLLOW_UP,
            CHOICE_RE_SUGGEST,
            CHOICE_GO_BACK,
        ],
    )
    .with_context(json!({ "comment": thread }));
    state.active_waiting = Some(thread);
    directive
}

/// Convert an executor failure into the matching question
pub fn executor_failure(state: &mut MonitorState, task: Task, message: &str) -> Directive {
    state.enter_phase(MonitorPhase::AwaitingUser);
    let policy_refusal = matches!(task, Task::MergePr | Task::MergePrAdmin);
    if policy_refusal {
        // Capture the approval count now so a green terminal cannot re-fire
        // until another approval lands.
        state.needs_additional_approval = Some(state.approval_count());
        Directive::ask_user(
            format!("The merge was refused: {message}"),
            vec![
                CHOICE_MERGE_ADMIN,
                CHOICE_WAIT_APPROVER,
                CHOICE_RESUME,
                CHOICE_HANDLE_MYSELF,
            ],
        )
    } else {
        Directive::ask_user(
            format!("Task {} failed: {message}", task.as_str()),
            vec![CHOICE_RESUME, CHOICE_HANDLE_MYSELF],
        )
    }
}

/// Generic executor failure without the admin-override escalation
pub fn executor_failure_plain(state: &mut MonitorState, task: Task, message: &str) -> Directive {
    state.enter_phase(MonitorPhase::AwaitingUser);
    Directive::ask_user(
        format!("Task {} failed: {message}", task.as_str()),
        vec![CHOICE_RESUME, CHOICE_HANDLE_MYSELF],
    )
}

/// The dispatch table
pub fn process_event(state: &mut MonitorState, event: Event, choice: Option<&Choice>) -> Directive {
    match event {
        Event::Ready => match state.phase {
            MonitorPhase::Idle | MonitorPhase::Polling => {
                state.enter_phase(MonitorPhase::Polling);
                Directive::polling("Monitoring the PR")
            }
            _ => recovery(state, event),
        },
        Event::UserChose => {
            if state.phase != MonitorPhase::AwaitingUser {
                return recovery(state, event);
            }
            let Some(choice) = choice else {
                return recovery(state, event);
            };
            if state.active_waiting.is_some() {
                return route_waiting_choice(state, choice);
            }
            if state.comment_flow != CommentFlow::None {
                return route_comment_choice(state, choice);
            }
            if state.ci_flow != CiFlow::None {
                return route_ci_choice(state, choice);
            }
            route_terminal_choice(state, choice)
        }
        Event::CommentAddressed => {
            if let Some(comment) = state.current_comment().cloned() {
                state.pending_resolve_after_address = true;
                state.active_waiting = Some(comment.clone());
                state.enter_phase(MonitorPhase::ExecutingTask);
                Directive::auto_execute(Task::ResolveThread)
                    .with_context(json!({ "thread_id": comment.id }))
            } else {
                state.enter_phase(MonitorPhase::Polling);
                Directive::polling("Comment addressed; resuming monitoring")
            }
        }
        Event::InvestigationComplete => match state.phase {
            MonitorPhase::Investigating | MonitorPhase::ExecutingTask => {
                build_investigation_results(state)
            }
            _ => recovery(state, event),
        },
        Event::PushCompleted => match state.phase {
            MonitorPhase::ApplyingFix | MonitorPhase::ExecutingTask => {
                state.enter_phase(MonitorPhase::Polling);
                Directive::polling("Fix pushed; watching the new build")
            }
            _ => recovery(state, event),
        },
        Event::TaskComplete => match state.phase {
            MonitorPhase::ExecutingTask
            | MonitorPhase::Investigating
            | MonitorPhase::InvestigationResults
            | MonitorPhase::ApplyingFix => resume_after_task(state),
            // The LLM skipped a tool call; recover instead of erroring.
            MonitorPhase::AwaitingUser => {
                state.active_waiting = None;
                resume_after_task(state)
            }
            _ => recovery(state, event),
        },
    }
}

/// Present the investigation findings menu
fn build_investigation_results(state: &mut MonitorState) -> Directive {
    state.enter_phase(MonitorPhase::InvestigationResults);
    state.ci_flow = CiFlow::InvestigationResults;

    let findings = state
        .investigation
        .findings
        .clone()
        .unwrap_or_else(|| "Investigation finished without findings".to_string());

    if state.investigation.is_duplicate_artifact() {
        // A stale artifact only clears with a fresh build; nothing to fix.
        return Directive::ask_user(
            format!("Investigation result: {findings}"),
            vec![CHOICE_RUN_NEW, CHOICE_HANDLE_MYSELF],
        )
        .with_context(json!({
            "issue_type": state.investigation.issue_type,
            "findings": state.investigation.findings,
        }));
    }

    let mut choices = Vec::new();
    if state.investigation.suggested_fix.is_some() {
        choices.push(CHOICE_APPLY_FIX);
    }
    choices.push(CHOICE_IGNORE_FAILURE);
    choices.push(CHOICE_RUN_NEW);
    choices.push(CHOICE_HANDLE_MYSELF);

    Directive::ask_user(format!("Investigation result: {findings}"), choices).with_context(json!({
        "issue_type": state.investigation.issue_type,
        "findings": state.investigation.findings,
        "suggested_fix": state.investigation.suggested_fix,
    }))
}

/// Choices on the waiting-for-reply action menu
fn route_waiting_choice(state: &mut MonitorState, choice: &Choice) -> Directive {
    let Some(thread) = state.active_waiting.clone() else {
        return back_to_polling(state);
    };
    match choice {
        Choice::Resolve => {
            state.enter_phase(MonitorPhase::ExecutingTask);
            Directive::auto_execute(Task::ResolveThread)
                .with_context(json!({ "thread_id": thread.id }))
        }
        Choice::FollowUp => {
            state.enter_phase(MonitorPhase::ExecutingTask);
            Directive::execute(Task::FollowUpComment).with_context(json!({ "comment": thread }))
        }
        Choice::ReSuggest => {
            state.enter_phase(MonitorPhase::ExecutingTask);
            Directive::execute(Task::ReSuggestChange).with_context(json!({ "comment": thread }))
        }
        _ => {
            // GoBack and anything unmapped return to the watch loop
            state.enter_phase(MonitorPhase::Polling);
            Directive::polling("Resuming monitoring")
        }
    }
}

/// Choices inside the comment sub-flows
fn route_comment_choice(state: &mut MonitorState, choice: &Choice) -> Directive {
    match state.comment_flow {
        CommentFlow::SingleCommentPrompt => match choice {
            Choice::Address => execute_current_comment(state, Task::AddressComment),
            Choice::Explain => execute_current_comment(state, Task::ExplainComment),
            Choice::Skip => {
                if let Some(comment) = state.current_comment().cloned() {
                    state.ignored_comments.insert(comment.id.clone());
                    state.unresolved.retain(|c| c.id != comment.id);
                }
                state.enter_phase(MonitorPhase::Polling);
                Directive::polling("Comment skipped")
            }
            Choice::Done => stop_monitor(state),
            _ => back_to_polling(state),
        },
        CommentFlow::MultiCommentPrompt => match choice {
            Choice::AddressAll => {
                state.comment_flow = CommentFlow::AddressAllIterating;
                state.comment_index = 0;
                iterate_prompt(state)
            }
            Choice::AddressSpecific => {
                state.comment_flow = CommentFlow::PickComment;
                pick_prompt(state)
            }
            Choice::Ignore => {
                state.ignore_all_unresolved();
                state.enter_phase(MonitorPhase::Polling);
                Directive::polling("Comments ignored")
            }
            Choice::Done => stop_monitor(state),
            _ => back_to_polling(state),
        },
        CommentFlow::AddressAllIterating => match choice {
            Choice::Continue => execute_current_comment(state, Task::AddressComment),
            Choice::Skip => {
                state.comment_index += 1;
                if state.current_comment().is_some() {
                    iterate_prompt(state)
                } else {
                    state.enter_phase(MonitorPhase::Polling);
                    Directive::polling("All comments handled")
                }
            }
            Choice::Done => back_to_polling(state),
            _ => back_to_polling(state),
        },
        CommentFlow::PickComment => match choice {
            Choice::Pick(n) => {
                let idx = n.saturating_sub(1);
                if idx < state.unresolved.len() {
                    state.comment_index = idx;
                    execute_current_comment(state, Task::AddressComment)
                } else {
                    // Out-of-range pick: show the list again
                    pick_prompt(state)
                }
            }
            Choice::GoBack => {
                state.comment_flow = CommentFlow::None;
                build_terminal(state, TerminalKind::NewComment)
            }
            Choice::Done => back_to_polling(state),
            _ => back_to_polling(state),
        },
        CommentFlow::PickRemaining => match choice {
            Choice::Address => {
                state.comment_index = 0;
                execute_current_comment(state, Task::AddressComment)
            }
            Choice::AddressAll => {
                state.comment_flow = CommentFlow::AddressAllIterating;
                state.comment_index = 0;
                iterate_prompt(state)
            }
            _ => back_to_polling(state),
        },
        CommentFlow::None => back_to_polling(state),
    }
}

/// Choices inside the CI-failure sub-flows
fn route_ci_choice(state: &mut MonitorState, choice: &Choice) -> Directive {
    match state.ci_flow {
        CiFlow::CiFailurePrompt => match choice {
            Choice::Investigate => {
                state.enter_phase(MonitorPhase::Investigating);
                state.ci_flow = CiFlow::Investigating;
                Directive::execute(Task::InvestigateCiFailure)
                    .with_context(json!({ "failures": state.failures }))
            }
            Choice::ShowLogs => {
                state.enter_phase(MonitorPhase::ExecutingTask);
                Directive::execute(Task::ShowLogs).with_context(json!({ "failures": state.failures }))
            }
            Choice::Rerun | Choice::RerunFailed => {
                state.enter_phase(MonitorPhase::ExecutingTask);
                Directive::execute(Task::RerunViaBrowser)
                    .with_context(json!({ "failures": state.failures }))
            }
            Choice::RunNew => {
                state.enter_phase(MonitorPhase::ExecutingTask);
                Directive::auto_execute(Task::RunNewBuild)
            }
            Choice::Done => stop_monitor(state),
            _ => back_to_polling(state),
        },
        CiFlow::InvestigationResults => match choice {
            Choice::ApplyFix if state.investigation.suggested_fix.is_some() => {
                state.enter_phase(MonitorPhase::ApplyingFix);
                Directive::execute(Task::ApplyFix).with_context(json!({
                    "suggested_fix": state.investigation.suggested_fix,
                    "findings": state.investigation.findings,
                }))
            }
            Choice::RunNew => {
                state.enter_phase(MonitorPhase::ExecutingTask);
                Directive::auto_execute(Task::RunNewBuild)
            }
            _ => back_to_polling(state),
        },
        CiFlow::Investigating | CiFlow::None => back_to_polling(state),
    }
}

/// Terminal-level choices with no sub-flow active
fn route_terminal_choice(state: &mut MonitorState, choice: &Choice) -> Directive {
    match choice {
        Choice::Merge => {
            state.enter_phase(MonitorPhase::ExecutingTask);
            Directive::auto_execute(Task::MergePr)
        }
        Choice::MergeAdmin => {
            state.enter_phase(MonitorPhase::ExecutingTask);
            Directive::auto_execute(Task::MergePrAdmin)
        }
        Choice::WaitForApprover => {
            if state.needs_additional_approval.is_none() {
                state.needs_additional_approval = Some(state.approval_count());
            }
            state.enter_phase(MonitorPhase::Polling);
            Directive::polling("Waiting for another approver")
        }
        Choice::Done => stop_monitor(state),
        // Continue, Resume, the unmapped rebase choice, and anything
        // unrecognized return to the watch loop.
        _ => back_to_polling(state),
    }
}

/// Where to go after a delegated task or an auto-executed task finishes
fn resume_after_task(state: &mut MonitorState) -> Directive {
    if state.pending_resolve_after_address {
        state.pending_resolve_after_address = false;
        if let Some(addressed) = state.active_waiting.take() {
            state.unresolved.retain(|c| c.id != addressed.id);
            state.waiting_for_reply.retain(|c| c.id != addressed.id);
        }
        return match state.comment_flow {
            CommentFlow::AddressAllIterating => {
                if state.current_comment().is_some() {
                    iterate_prompt(state)
                } else {
                    state.enter_phase(MonitorPhase::Polling);
                    Directive::polling("All comments addressed")
                }
            }
            _ => {
                if state.unresolved.is_empty() {
                    state.enter_phase(MonitorPhase::Polling);
                    Directive::polling("Comment addressed and thread resolved")
                } else {
                    state.comment_flow = CommentFlow::PickRemaining;
                    state.enter_phase(MonitorPhase::AwaitingUser);
                    Directive::ask_user(
                        format!(
                            "Comment addressed and thread resolved. {} comment(s) remain.",
                            state.unresolved.len()
                        ),
                        vec![
                            CHOICE_ADDRESS_NEXT,
                            CHOICE_ADDRESS_REMAINING,
                            CHOICE_KEEP_MONITORING,
                        ],
                    )
                }
            }
        };
    }

    if state.active_waiting.take().is_some() {
        state.enter_phase(MonitorPhase::Polling);
        return Directive::polling("Thread handled; resuming monitoring");
    }

    match state.comment_flow {
        CommentFlow::AddressAllIterating => {
            state.comment_index += 1;
            if state.current_comment().is_some() {
                iterate_prompt(state)
            } else {
                state.enter_phase(MonitorPhase::Polling);
                Directive::polling("All comments addressed")
            }
        }
        _ => {
            state.enter_phase(MonitorPhase::Polling);
            Directive::polling("Task complete; resuming monitoring")
        }
    }
}

/// Go/skip/stop question shown before each comment in the address-all walk
fn iterate_prompt(state: &mut MonitorState) -> Directive {
    let remaining = state.remaining_comments();
    let Some(comment) = state.current_comment().cloned() else {
        return back_to_polling(state);
    };
    state.enter_phase(MonitorPhase::AwaitingUser);
    let place = comment.path.clone().unwrap_or_else(|| "the PR".to_string());
    Directive::ask_user(
        format!(
            "Comment from {} on {} ({} remaining):\n{}",
            comment.author, place, remaining, comment.body
        ),
        vec![CHOICE_GO_AHEAD, CHOICE_SKIP_ONE, CHOICE_STOP_ADDRESSING],
    )
    .with_context(json!({ "comment": comment }))
}

/// Numbered pick list for address-specific
fn pick_prompt(state: &mut MonitorState) -> Directive {
    state.enter_phase(MonitorPhase::AwaitingUser);
    let mut lines = Vec::with_capacity(state.unresolved.len() + 1);
    for (i, comment) in state.unresolved.iter().enumerate() {
        let place = comment.path.clone().unwrap_or_else(|| "the PR".to_string());
        let mut preview = comment.body.replace('\n', " ");
        if preview.len() > 80 {
            preview.truncate(80);
        }
        lines.push(format!("{}. {} on {}: {}", i + 1, comment.author, place, preview));
    }
    lines.push(CHOICE_GO_BACK.to_string());
    Directive::ask_user_strings("Which comment should be addressed?", lines)
        .with_context(json!({ "comments": state.unresolved }))
}

fn execute_current_comment(state: &mut MonitorState, task: Task) -> Directive {
    match state.current_comment().cloned() {
        Some(comment) => {
            state.enter_phase(MonitorPhase::ExecutingTask);
            Directive::execute(task).with_context(json!({ "comment": comment }))
        }
        None => back_to_polling(state),
    }
}

fn back_to_polling(state: &mut MonitorState) -> Directive {
    state.enter_phase(MonitorPhase::Polling);
    Directive::polling("Resuming monitoring")
}

fn stop_monitor(state: &mut MonitorState) -> Directive {
    state.enter_phase(MonitorPhase::Stopped);
    Directive::stop("Monitoring stopped")
}

/// Unknown (state, event) pairs are recoverable, never an error
fn recovery(state: &mut MonitorState, event: Event) -> Directive {
    let phase = state.phase;
    state.enter_phase(MonitorPhase::AwaitingUser);
    Directive::ask_user(
        format!(
            "The monitor received \"{}\" while {}. How should it proceed?",
            event.as_str(),
            phase.as_str()
        ),
        vec![CHOICE_RESUME, CHOICE_STOP],
    )
}
