//! Integration tests for prwatch
//!
//! These tests drive the tool surface end-to-end against a scripted mock
//! platform and check the directives, state transitions, and log records
//! that come out the other side.

use prwatch_agent::{NextStepParams, StartParams, ToolSurface};
use prwatch_core::platform::test_support::{pr_info, thread, MockPlatform, MockSnapshot};
use prwatch_core::platform::{CheckRuns, ReviewSummary};
use prwatch_core::{
    detect_terminal, parse_line, Action, CheckCounts, FailedCheck, LogRecord, LogTail,
    MonitorConfig, MonitorState, PrLocator, TerminalKind,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ==================== Test Helpers ====================

fn green_checks() -> CheckRuns {
    CheckRuns {
        counts: CheckCounts {
            passed: 5,
            total: 5,
            ..Default::default()
        },
        failures: Vec::new(),
    }
}

fn failing_checks() -> CheckRuns {
    CheckRuns {
        counts: CheckCounts {
            passed: 3,
            failed: 2,
            total: 5,
            ..Default::default()
        },
        failures: vec![FailedCheck {
            name: "unit-tests".to_string(),
            conclusion: "failure".to_string(),
            title: Some("3 assertions failed".to_string()),
            details_url: None,
            external_id: None,
        }],
    }
}

fn approved() -> ReviewSummary {
    ReviewSummary {
        approvals: vec!["alice".to_string()],
        stale_approvals: Vec::new(),
    }
}

fn snapshot(checks: CheckRuns, reviews: ReviewSummary) -> MockSnapshot {
    MockSnapshot {
        info: Some(pr_info("abc123")),
        checks,
        reviews,
        threads: Vec::new(),
    }
}

fn tools(platform: Arc<MockPlatform>) -> ToolSurface {
    ToolSurface::new(platform.clone(), platform, MonitorConfig::default())
}

fn start_params(dir: &Path) -> StartParams {
    StartParams {
        owner: "octo".to_string(),
        repo: "spoon".to_string(),
        pr_number: 12,
        session_dir: dir.to_path_buf(),
    }
}

fn step(event: &str, choice: Option<&str>) -> NextStepParams {
    NextStepParams {
        monitor_id: "pr-12".to_string(),
        event: event.to_string(),
        choice: choice.map(str::to_string),
        data: None,
    }
}

fn terminal_tags(log_path: &Path) -> Vec<TerminalKind> {
    std::fs::read_to_string(log_path)
        .unwrap_or_default()
        .lines()
        .filter_map(parse_line)
        .filter_map(|record| match record {
            LogRecord::Terminal { state, .. } => Some(state),
            _ => None,
        })
        .collect()
}

// ==================== Terminal Priority Scenarios ====================

mod terminal_priority {
    use super::*;

    #[tokio::test]
    async fn approval_wins_green() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(MockPlatform::new(vec![snapshot(green_checks(), approved())]));
        let surface = tools(platform);
        surface.start(start_params(dir.path())).await;

        let directive = surface.next_step(step("ready", None)).await;
        assert_eq!(directive.action, Action::AskUser);
        assert!(directive
            .choices
            .unwrap()
            .contains(&"Merge the PR".to_string()));

        let tags = terminal_tags(&dir.path().join("pr-monitor-12.log"));
        assert_eq!(tags, vec![TerminalKind::ApprovedCiGreen]);
    }

    #[tokio::test]
    async fn failure_beats_approval() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(MockPlatform::new(vec![snapshot(
            failing_checks(),
            approved(),
        )]));
        let surface = tools(platform);
        surface.start(start_params(dir.path())).await;

        let directive = surface.next_step(step("ready", None)).await;
        assert_eq!(directive.action, Action::AskUser);
        assert!(directive
            .choices
            .unwrap()
            .contains(&"Investigate the failure".to_string()));

        let tags = terminal_tags(&dir.path().join("pr-monitor-12.log"));
        assert_eq!(tags, vec![TerminalKind::CiFailure]);
    }

    #[tokio::test]
    async fn comment_beats_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut with_comment = snapshot(failing_checks(), ReviewSummary::default());
        with_comment.threads = vec![thread("t1", "alice")];
        let platform = Arc::new(MockPlatform::new(vec![with_comment]));
        let surface = tools(platform);
        surface.start(start_params(dir.path())).await;

        let directive = surface.next_step(step("ready", None)).await;
        assert_eq!(directive.action, Action::AskUser);
        assert!(directive.question.unwrap().contains("alice"));

        let tags = terminal_tags(&dir.path().join("pr-monitor-12.log"));
        assert_eq!(tags, vec![TerminalKind::NewComment]);
    }

    #[tokio::test]
    async fn additional_approval_gate() {
        let mut state =
            MonitorState::new(PrLocator::new("octo", "spoon", 12), "/tmp/prwatch-test");
        state.checks = green_checks().counts;
        state.approvals = vec!["alice".to_string()];
        state.needs_additional_approval = Some(1);

        assert_eq!(detect_terminal(&state, false, false), None);

        state.approvals.push("bob".to_string());
        assert_eq!(
            detect_terminal(&state, false, false),
            Some(TerminalKind::ApprovedCiGreen)
        );
    }
}

// ==================== Waiting-Comment Trigger Flow ====================

#[tokio::test]
async fn waiting_comment_action_via_trigger_file() {
    let dir = tempfile::tempdir().unwrap();

    let mut waiting = thread("PRRT_9", "alice");
    waiting.comment_count = 2;
    waiting.last_author = "octocat".to_string();
    waiting.waiting_for_reply = true;
    let quiet_round = MockSnapshot {
        info: Some(pr_info("abc123")),
        threads: vec![waiting],
        ..Default::default()
    };
    let mut merged_round = MockSnapshot {
        info: Some(pr_info("abc123")),
        ..Default::default()
    };
    merged_round.info.as_mut().unwrap().merged = true;

    let platform = Arc::new(MockPlatform::new(vec![
        quiet_round.clone(),
        quiet_round,
        merged_round,
    ]));
    let surface = Arc::new(tools(platform.clone()));
    surface.start(start_params(dir.path())).await;

    // The poll worker finds nothing actionable and sleeps; the dashboard
    // writes an ACTION trigger next to the log.
    let stepper = surface.clone();
    let worker = tokio::spawn(async move { stepper.next_step(step("ready", None)).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::write(dir.path().join("pr-monitor-12.trigger"), "ACTION|PRRT_9").unwrap();

    let directive = tokio::time::timeout(Duration::from_secs(10), worker)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(directive.action, Action::AskUser);
    assert_eq!(
        directive.choices.unwrap(),
        vec![
            "Resolve the thread".to_string(),
            "Post a follow-up".to_string(),
            "Suggest a different change".to_string(),
            "Go back".to_string()
        ]
    );

    // The trigger file was consumed
    assert!(!dir.path().join("pr-monitor-12.trigger").exists());

    // Resolving auto-executes, the engine transitions back to polling, and
    // the next round observes the merge.
    let directive = tokio::time::timeout(
        Duration::from_secs(10),
        surface.next_step(step("user_chose", Some("resolve"))),
    )
    .await
    .unwrap();
    assert_eq!(directive.action, Action::Merged);
    assert_eq!(
        platform.resolved.lock().unwrap().as_slice(),
        &["PRRT_9".to_string()]
    );
}

// ==================== Investigation Path ====================

#[tokio::test]
async fn investigation_duplicate_artifact_path() {
    let dir = tempfile::tempdir().unwrap();
    let platform = Arc::new(MockPlatform::new(vec![snapshot(
        failing_checks(),
        ReviewSummary::default(),
    )]));
    let surface = tools(platform);
    surface.start(start_params(dir.path())).await;

    let directive = surface.next_step(step("ready", None)).await;
    assert_eq!(directive.action, Action::AskUser);

    let directive = surface
        .next_step(step("user_chose", Some("investigate")))
        .await;
    assert_eq!(directive.action, Action::Execute);
    assert_eq!(
        directive.task.map(|t| t.as_str()),
        Some("investigate_ci_failure")
    );

    let mut params = step("investigation_complete", None);
    params.data = Some(serde_json::json!({
        "findings": "The artifact was already published by a previous run",
        "suggested_fix": "bump the package version",
        "issue_type": "duplicate_artifact",
    }));
    let directive = surface.next_step(params).await;
    assert_eq!(directive.action, Action::AskUser);
    assert_eq!(
        directive.choices.unwrap(),
        vec![
            "Run a new build".to_string(),
            "I'll handle it myself".to_string()
        ]
    );
}

// ==================== Ignore Flow ====================

#[tokio::test]
async fn ignored_comments_are_not_re_presented() {
    let dir = tempfile::tempdir().unwrap();

    let commented = MockSnapshot {
        info: Some(pr_info("abc123")),
        threads: vec![thread("t1", "alice"), thread("t2", "bob")],
        ..Default::default()
    };
    // After the ignore, checks finish green while the threads stay open
    let mut green_later = snapshot(green_checks(), ReviewSummary::default());
    green_later.threads = vec![thread("t1", "alice"), thread("t2", "bob")];

    let platform = Arc::new(MockPlatform::new(vec![
        commented.clone(),
        commented,
        green_later,
    ]));
    let surface = tools(platform);
    surface.start(start_params(dir.path())).await;

    let directive = surface.next_step(step("ready", None)).await;
    assert!(directive
        .choices
        .unwrap()
        .contains(&"Ignore the comments".to_string()));

    // Ignoring resumes polling; the ignored threads never come back, and
    // the green run surfaces as the comments-pending terminal instead.
    let directive = surface.next_step(step("user_chose", Some("ignore"))).await;
    assert_eq!(directive.action, Action::AskUser);
    assert!(directive
        .choices
        .unwrap()
        .contains(&"Merge the PR".to_string()));

    let tags = terminal_tags(&dir.path().join("pr-monitor-12.log"));
    assert_eq!(
        tags,
        vec![
            TerminalKind::NewComment,
            TerminalKind::CiPassedCommentsIgnored
        ]
    );

    // The ignore list survives on disk for the next process
    let ignore_file =
        std::fs::read_to_string(dir.path().join("pr-monitor-12.ignore-comments")).unwrap();
    assert!(ignore_file.contains("t1"));
    assert!(ignore_file.contains("t2"));
}

// ==================== Dashboard Contract ====================

#[tokio::test]
async fn log_parses_cleanly_and_tail_survives_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let platform = Arc::new(MockPlatform::new(vec![snapshot(green_checks(), approved())]));
    let surface = tools(platform);
    surface.start(start_params(dir.path())).await;
    surface.next_step(step("ready", None)).await;
    surface.stop("pr-12").await;

    let log_path = dir.path().join("pr-monitor-12.log");
    let content = std::fs::read_to_string(&log_path).unwrap();

    // Every non-header line the writer emitted parses
    for line in content.lines() {
        if line.starts_with('#') {
            continue;
        }
        assert!(
            parse_line(line).is_some(),
            "writer emitted an unparseable line: {line}"
        );
    }

    // A tail that saw everything resets when the file shrinks
    let mut tail = LogTail::new();
    let seen = tail.read_new(&log_path);
    assert!(seen.iter().any(|r| matches!(r, LogRecord::Stopped { .. })));

    std::fs::write(&log_path, "STOPPED|09:00:00 AM|fresh start\n").unwrap();
    let after_truncation = tail.read_new(&log_path);
    assert_eq!(after_truncation.len(), 1);
    assert!(matches!(after_truncation[0], LogRecord::Stopped { .. }));
}
