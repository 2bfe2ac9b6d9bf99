//! Per-PR status log
//!
//! Append-only UTF-8 text, one record per line, `TYPE|...` framing. The
//! external dashboard tails this file; when it sees the line count drop it
//! restarts its parse from byte zero. Writes never fail the monitor: a
//! failed append is noted in the debug log and otherwise swallowed.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::platform::{CheckCounts, FailedCheck};
use crate::state::{MonitorState, TerminalKind};

/// Payload of a STATUS record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub checks: CheckCounts,
    pub failures: Vec<FailedCheck>,
    pub approvals: usize,
    pub stale_approvals: usize,
    pub unresolved: usize,
    pub waiting_for_reply: usize,
    pub next_check_seconds: u64,
    pub after_hours: bool,
    pub timestamp: String,
}

impl StatusSnapshot {
    pub fn capture(state: &MonitorState, next_check_seconds: u64, after_hours: bool) -> Self {
        Self {
            checks: state.checks,
            failures: state.failures.clone(),
            approvals: state.approval_count(),
            stale_approvals: state.stale_approvals.len(),
            unresolved: state.unresolved.len(),
            waiting_for_reply: state.waiting_for_reply.len(),
            next_check_seconds,
            after_hours,
            timestamp: local_timestamp(),
        }
    }
}

/// One parsed log line
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Status(StatusSnapshot),
    Terminal {
        state: TerminalKind,
        description: String,
    },
    Resuming {
        timestamp: String,
        message: String,
    },
    Paused {
        timestamp: String,
        message: String,
    },
    Stopped {
        timestamp: String,
        message: String,
    },
    Error {
        timestamp: String,
        message: String,
    },
}

/// Local wall-clock in 12-hour form, the format the dashboard displays
pub fn local_timestamp() -> String {
    Local::now().format("%I:%M:%S %p").to_string()
}

#[derive(Serialize, Deserialize)]
struct TerminalPayload {
    state: String,
    description: String,
}

/// Parse one log line; `None` for headers, blanks, and anything malformed
pub fn parse_line(line: &str) -> Option<LogRecord> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (tag, rest) = line.split_once('|')?;
    match tag {
        "STATUS" => serde_json::from_str(rest).ok().map(LogRecord::Status),
        "TERMINAL" => {
            let payload: TerminalPayload = serde_json::from_str(rest).ok()?;
            Some(LogRecord::Terminal {
                state: TerminalKind::from_str(&payload.state)?,
                description: payload.description,
            })
        }
        "RESUMING" | "PAUSED" | "STOPPED" | "ERROR" => {
            let (timestamp, message) = rest.split_once('|')?;
            let timestamp = timestamp.to_string();
            let message = message.to_string();
            Some(match tag {
                "RESUMING" => LogRecord::Resuming { timestamp, message },
                "PAUSED" => LogRecord::Paused { timestamp, message },
                "STOPPED" => LogRecord::Stopped { timestamp, message },
                _ => LogRecord::Error { timestamp, message },
            })
        }
        _ => None,
    }
}

/// Tail state for the line-based consumer. Restarts from byte zero when the
/// file shrinks (line count decreasing), per the dashboard contract.
#[derive(Debug, Default)]
pub struct LogTail {
    lines_seen: usize,
}

impl LogTail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read everything new since the last call
    pub fn read_new(&mut self, path: &Path) -> Vec<LogRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() < self.lines_seen {
            // Truncated behind our back: reparse from the top
            self.lines_seen = 0;
        }
        let fresh = &lines[self.lines_seen..];
        self.lines_seen = lines.len();
        fresh.iter().filter_map(|l| parse_line(l)).collect()
    }
}

/// Appends records for one monitored PR
#[derive(Debug, Clone)]
pub struct LogWriter {
    status_path: PathBuf,
    debug_path: PathBuf,
}

impl LogWriter {
    pub fn new(status_path: impl Into<PathBuf>, debug_path: impl Into<PathBuf>) -> Self {
        Self {
            status_path: status_path.into(),
            debug_path: debug_path.into(),
        }
    }

    pub fn for_state(state: &MonitorState) -> Self {
        Self::new(state.status_log_path(), state.debug_log_path())
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    /// Human-readable header written once at session creation
    pub fn write_header(&self, state: &MonitorState) {
        self.append(&format!(
            "# pr-monitor {} — {}",
            state.pr.slug(),
            state.title
        ));
    }

    pub fn status(&self, snapshot: &StatusSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(json) => self.append(&format!("STATUS|{json}")),
            Err(e) => self.debug(&format!("status serialization failed: {e}")),
        }
    }

    pub fn terminal(&self, kind: TerminalKind, description: &str) {
        let payload = TerminalPayload {
            state: kind.as_str().to_string(),
            description: description.to_string(),
        };
        match serde_json::to_string(&payload) {
            Ok(json) => self.append(&format!("TERMINAL|{json}")),
            Err(e) => self.debug(&format!("terminal serialization failed: {e}")),
        }
    }

    pub fn resuming(&self, message: &str) {
        self.append(&format!("RESUMING|{}|{}", local_timestamp(), message));
    }

    pub fn paused(&self, message: &str) {
        self.append(&format!("PAUSED|{}|{}", local_timestamp(), message));
    }

    pub fn stopped(&self, message: &str) {
        self.append(&format!("STOPPED|{}|{}", local_timestamp(), message));
    }

    pub fn error(&self, message: &str) {
        self.append(&format!("ERROR|{}|{}", local_timestamp(), message));
    }

    /// One timestamped line in the per-PR debug log; failures are ignored
    pub fn debug(&self, message: &str) {
        let _ = append_line(
            &self.debug_path,
            &format!("{} {}", local_timestamp(), message),
        );
    }

    fn append(&self, line: &str) {
        if let Err(e) = append_line(&self.status_path, line) {
            self.debug(&format!("status log write failed: {e}"));
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PrLocator;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            checks: CheckCounts {
                passed: 3,
                failed: 1,
                pending: 1,
                total: 5,
                ..Default::default()
            },
            failures: vec![FailedCheck {
                name: "build".to_string(),
                conclusion: "failure".to_string(),
                title: Some("compile error".to_string()),
                details_url: None,
                external_id: None,
            }],
            approvals: 1,
            stale_approvals: 0,
            unresolved: 2,
            waiting_for_reply: 1,
            next_check_seconds: 60,
            after_hours: false,
            timestamp: "10:15:00 AM".to_string(),
        }
    }

    // ==================== Writer/Parser Round Trip ====================

    #[test]
    fn test_parser_accepts_every_record_the_writer_emits() {
        let dir = tempfile::tempdir().unwrap();
        let mut state =
            MonitorState::new(PrLocator::new("octo", "spoon", 12), dir.path());
        state.title = "Add retry logic".to_string();
        let writer = LogWriter::for_state(&state);

        writer.write_header(&state);
        writer.status(&snapshot());
        writer.terminal(TerminalKind::CiFailure, "2 of 5 checks failed");
        writer.resuming("back to polling");
        writer.paused("after hours until 09:00");
        writer.error("fetch failed: exit 1");
        writer.stopped("PR merged");

        let content = std::fs::read_to_string(state.status_log_path()).unwrap();
        let records: Vec<LogRecord> = content.lines().filter_map(parse_line).collect();

        // The header line parses to nothing; every record line parses
        assert_eq!(content.lines().count(), 7);
        assert_eq!(records.len(), 6);
        assert!(matches!(records[0], LogRecord::Status(_)));
        assert!(matches!(
            records[1],
            LogRecord::Terminal {
                state: TerminalKind::CiFailure,
                ..
            }
        ));
        assert!(matches!(records[2], LogRecord::Resuming { .. }));
        assert!(matches!(records[3], LogRecord::Paused { .. }));
        assert!(matches!(records[4], LogRecord::Error { .. }));
        assert!(matches!(records[5], LogRecord::Stopped { .. }));
    }

    #[test]
    fn test_status_round_trip_preserves_payload() {
        let snap = snapshot();
        let line = format!("STATUS|{}", serde_json::to_string(&snap).unwrap());
        match parse_line(&line) {
            Some(LogRecord::Status(parsed)) => assert_eq!(parsed, snap),
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("# header"), None);
        assert_eq!(parse_line("no separator"), None);
        assert_eq!(parse_line("BOGUS|x"), None);
        assert_eq!(parse_line("STATUS|not json"), None);
        assert_eq!(parse_line("TERMINAL|{\"state\":\"bogus\",\"description\":\"\"}"), None);
    }

    // ==================== Tail Truncation Tests ====================

    #[test]
    fn test_tail_reads_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pr-monitor-1.log");
        let writer = LogWriter::new(&path, dir.path().join("pr-monitor-1.debug.log"));
        let mut tail = LogTail::new();

        writer.resuming("first");
        assert_eq!(tail.read_new(&path).len(), 1);

        writer.resuming("second");
        writer.resuming("third");
        assert_eq!(tail.read_new(&path).len(), 2);

        assert_eq!(tail.read_new(&path).len(), 0);
    }

    #[test]
    fn test_tail_resets_on_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pr-monitor-1.log");
        let writer = LogWriter::new(&path, dir.path().join("pr-monitor-1.debug.log"));
        let mut tail = LogTail::new();

        writer.resuming("one");
        writer.resuming("two");
        writer.resuming("three");
        assert_eq!(tail.read_new(&path).len(), 3);

        // The file is replaced with a shorter one
        std::fs::write(&path, "").unwrap();
        writer.resuming("fresh");
        let records = tail.read_new(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0],
            parse_line(&std::fs::read_to_string(&path).unwrap().lines().next().unwrap().to_string())
                .unwrap()
        );
    }

    #[test]
    fn test_tail_missing_file_is_empty() {
        let mut tail = LogTail::new();
        assert!(tail.read_new(Path::new("/nonexistent/prwatch.log")).is_empty());
    }

    #[test]
    fn test_failed_append_is_swallowed() {
        // Unwritable path: the call must not panic or error
        let writer = LogWriter::new("/proc/prwatch-nope/x.log", "/proc/prwatch-nope/x.debug.log");
        writer.resuming("ignored");
    }
}
