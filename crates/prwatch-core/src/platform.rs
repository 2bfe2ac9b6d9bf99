//! Platform records and the fetcher/executor seams
//!
//! The monitor never talks to the review platform directly; it goes through
//! the `PlatformFetcher` and `PlatformExecutor` traits so the GitHub
//! implementation and the test doubles are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Coordinates of the monitored pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrLocator {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrLocator {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Snapshot of the PR head returned by `fetch_pr_info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrInfo {
    pub title: String,
    pub head_sha: String,
    pub head_branch: String,
    pub url: String,
    pub author: String,
    pub mergeable: Option<bool>,
    pub mergeable_state: String,
    pub merged: bool,
}

impl PrInfo {
    /// The platform reports conflicts through the mergeable pair
    pub fn has_conflict(&self) -> bool {
        self.mergeable == Some(false) || self.mergeable_state == "dirty"
    }
}

/// Aggregated check counts across modern check runs and legacy statuses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCounts {
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub queued: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl CheckCounts {
    /// No check still running or waiting to run
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.queued == 0
    }

    /// Every observed check finished green
    pub fn is_all_passed(&self) -> bool {
        self.total > 0 && self.is_complete() && self.failed == 0 && self.cancelled == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} passed, {} failed, {} pending, {} queued, {} cancelled",
            self.passed, self.total, self.failed, self.pending, self.queued, self.cancelled
        )
    }
}

/// One failed check with enough detail to investigate it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCheck {
    pub name: String,
    pub conclusion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Result of `fetch_check_runs`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckRuns {
    pub counts: CheckCounts,
    pub failures: Vec<FailedCheck>,
}

/// Result of `fetch_reviews`: approval logins split by freshness
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewSummary {
    /// Logins whose latest review is APPROVED at the current head
    pub approvals: Vec<String>,
    /// Logins whose latest review is APPROVED at an older commit
    pub stale_approvals: Vec<String>,
}

/// One unresolved review thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentThread {
    /// Platform thread identifier (used for resolution)
    pub id: String,
    /// Author of the first comment
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Body of the first comment
    pub body: String,
    pub comment_count: usize,
    /// Author of the most recent comment
    pub last_author: String,
    /// The PR author replied last, so the ball is with the reviewer
    pub waiting_for_reply: bool,
}

/// Read side of the platform
#[async_trait]
pub trait PlatformFetcher: Send + Sync {
    async fn fetch_pr_info(&self, pr: &PrLocator) -> Result<PrInfo>;

    async fn fetch_check_runs(&self, pr: &PrLocator, head_sha: &str) -> Result<CheckRuns>;

    async fn fetch_reviews(&self, pr: &PrLocator, head_sha: &str) -> Result<ReviewSummary>;

    /// Unresolved review threads with the waiting-for-reply flag computed
    /// against the PR author. Resolved threads and bot-opened threads are
    /// already dropped.
    async fn fetch_unresolved_comments(
        &self,
        pr: &PrLocator,
        pr_author: &str,
    ) -> Result<Vec<CommentThread>>;

    async fn resolve_thread(&self, thread_id: &str) -> Result<()>;

    async fn fetch_current_user(&self) -> Result<String>;
}

/// Write side of the platform; every operation is deterministic
#[async_trait]
pub trait PlatformExecutor: Send + Sync {
    async fn resolve_thread(&self, thread_id: &str) -> Result<()>;

    /// Squash-merge. Branch-policy refusals surface as `Error::MergePolicy`.
    async fn merge_pr(&self, pr: &PrLocator, admin: bool) -> Result<()>;

    /// Push an empty commit onto the head branch to trigger a fresh build.
    /// Returns the new head commit id.
    async fn run_new_build(&self, pr: &PrLocator, head_branch: &str, head_sha: &str)
        -> Result<String>;
}

/// In-memory platform used by tests: scripted fetch results, recorded
/// executor calls.
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Scripted fetch data for one poll round
    #[derive(Debug, Clone, Default)]
    pub struct MockSnapshot {
        pub info: Option<PrInfo>,
        pub checks: CheckRuns,
        pub reviews: ReviewSummary,
        pub threads: Vec<CommentThread>,
    }

    /// Mock platform: one snapshot per poll round. `fetch_pr_info` opens a
    /// round and advances the cursor (the last snapshot repeats forever);
    /// the other reads serve data from the open round.
    pub struct MockPlatform {
        snapshots: Vec<MockSnapshot>,
        cursor: Mutex<usize>,
        active: Mutex<MockSnapshot>,
        pub resolved: Mutex<Vec<String>>,
        pub merged: Mutex<Vec<bool>>,
        pub builds: Mutex<u32>,
        pub fail_merge_with_policy: bool,
        pub fail_resolve: bool,
    }

    impl MockPlatform {
        pub fn new(snapshots: Vec<MockSnapshot>) -> Self {
            Self {
                snapshots,
                cursor: Mutex::new(0),
                active: Mutex::new(MockSnapshot::default()),
                resolved: Mutex::new(Vec::new()),
                merged: Mutex::new(Vec::new()),
                builds: Mutex::new(0),
                fail_merge_with_policy: false,
                fail_resolve: false,
            }
        }

        fn open_round(&self) -> MockSnapshot {
            let mut cursor = self.cursor.lock().unwrap();
            let index = (*cursor).min(self.snapshots.len().saturating_sub(1));
            let snapshot = self.snapshots.get(index).cloned().unwrap_or_default();
            *cursor += 1;
            *self.active.lock().unwrap() = snapshot.clone();
            snapshot
        }

        fn active(&self) -> MockSnapshot {
            self.active.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlatformFetcher for MockPlatform {
        async fn fetch_pr_info(&self, pr: &PrLocator) -> Result<PrInfo> {
            self.open_round()
                .info
                .ok_or_else(|| Error::Platform(format!("no scripted info for {}", pr.slug())))
        }

        async fn fetch_check_runs(&self, _pr: &PrLocator, _head_sha: &str) -> Result<CheckRuns> {
            Ok(self.active().checks)
        }

        async fn fetch_reviews(&self, _pr: &PrLocator, _head_sha: &str) -> Result<ReviewSummary> {
            Ok(self.active().reviews)
        }

        async fn fetch_unresolved_comments(
            &self,
            _pr: &PrLocator,
            _pr_author: &str,
        ) -> Result<Vec<CommentThread>> {
            Ok(self.active().threads)
        }

        async fn resolve_thread(&self, thread_id: &str) -> Result<()> {
            if self.fail_resolve {
                return Err(Error::Platform("resolve failed".to_string()));
            }
            self.resolved.lock().unwrap().push(thread_id.to_string());
            Ok(())
        }

        async fn fetch_current_user(&self) -> Result<String> {
            Ok("prwatch-user".to_string())
        }
    }

    #[async_trait]
    impl PlatformExecutor for MockPlatform {
        async fn resolve_thread(&self, thread_id: &str) -> Result<()> {
            PlatformFetcher::resolve_thread(self, thread_id).await
        }

        async fn merge_pr(&self, _pr: &PrLocator, admin: bool) -> Result<()> {
            if self.fail_merge_with_policy && !admin {
                return Err(Error::MergePolicy("review required".to_string()));
            }
            self.merged.lock().unwrap().push(admin);
            Ok(())
        }

        async fn run_new_build(
            &self,
            _pr: &PrLocator,
            _head_branch: &str,
            head_sha: &str,
        ) -> Result<String> {
            *self.builds.lock().unwrap() += 1;
            Ok(format!("{head_sha}-rebuilt"))
        }
    }

    /// A head snapshot with sensible defaults for tests
    pub fn pr_info(head_sha: &str) -> PrInfo {
        PrInfo {
            title: "Add retry logic".to_string(),
            head_sha: head_sha.to_string(),
            head_branch: "feature/retry".to_string(),
            url: "https://example.invalid/pr/7".to_string(),
            author: "octocat".to_string(),
            mergeable: Some(true),
            mergeable_state: "clean".to_string(),
            merged: false,
        }
    }

    pub fn thread(id: &str, author: &str) -> CommentThread {
        CommentThread {
            id: id.to_string(),
            author: author.to_string(),
            path: Some("src/lib.rs".to_string()),
            body: "Consider renaming this".to_string(),
            comment_count: 1,
            last_author: author.to_string(),
            waiting_for_reply: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_counts_complete() {
        let counts = CheckCounts {
            passed: 5,
            total: 5,
            ..Default::default()
        };
        assert!(counts.is_complete());
        assert!(counts.is_all_passed());
    }

    #[test]
    fn test_check_counts_pending_not_complete() {
        let counts = CheckCounts {
            passed: 3,
            pending: 2,
            total: 5,
            ..Default::default()
        };
        assert!(!counts.is_complete());
        assert!(!counts.is_all_passed());
    }

    #[test]
    fn test_empty_counts_never_all_passed() {
        assert!(CheckCounts::default().is_complete());
        assert!(!CheckCounts::default().is_all_passed());
    }

    #[test]
    fn test_pr_info_conflict_detection() {
        let mut info = test_support::pr_info("abc");
        assert!(!info.has_conflict());
        info.mergeable_state = "dirty".to_string();
        assert!(info.has_conflict());
        info.mergeable_state = "clean".to_string();
        info.mergeable = Some(false);
        assert!(info.has_conflict());
    }

    #[test]
    fn test_locator_slug() {
        let pr = PrLocator::new("octo", "spoon", 41);
        assert_eq!(pr.slug(), "octo/spoon#41");
    }
}
