//! prwatch Core - monitor state machine and session supervision
//!
//! This crate provides the deterministic heart of the PR monitor:
//! - Monitor state record and phase/sub-flow machinery
//! - Pure transition engine (events and choices in, directives out)
//! - Session supervisor with the cancellable poll loop
//! - Trigger-file protocol and filesystem watcher
//! - Append-only status log and its line parser
//! - Platform traits the GitHub crate and the test doubles implement

pub mod config;
pub mod directive;
pub mod engine;
pub mod error;
pub mod platform;
pub mod schedule;
pub mod session;
pub mod state;
pub mod status_log;
pub mod trigger;

pub use config::MonitorConfig;
pub use directive::{Action, Directive, Task};
pub use engine::{
    build_terminal, build_waiting_menu, detect_terminal, executor_failure,
    executor_failure_plain, process_event, Choice, Event, ASK_USER_INSTRUCTIONS,
};
pub use error::{Error, Result};
pub use platform::{
    CheckCounts, CheckRuns, CommentThread, FailedCheck, PlatformExecutor, PlatformFetcher,
    PrInfo, PrLocator, ReviewSummary,
};
pub use schedule::{extend_after_hours, is_after_hours, next_poll_wait, next_work_start, PollWait};
pub use session::{CancelToken, MonitorSession};
pub use state::{
    CiFlow, CommentFlow, Investigation, MonitorPhase, MonitorState, TerminalKind,
};
pub use status_log::{parse_line, LogRecord, LogTail, LogWriter, StatusSnapshot};
pub use trigger::{TriggerRecord, TriggerSlot, TriggerWatcher};
