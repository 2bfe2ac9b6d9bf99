//! Platform fetcher over the gh CLI
//!
//! Reduces the platform's noisy payloads to the canonical records the
//! monitor consumes. Classification and filtering are plain functions over
//! the raw payloads; the async methods only fetch and delegate.

use async_trait::async_trait;
use prwatch_core::{
    CheckCounts, CheckRuns, CommentThread, Error, FailedCheck, MonitorConfig, PlatformFetcher,
    PrInfo, PrLocator, Result, ReviewSummary,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::gh::{gh, gh_json, resolve_review_thread};

/// Failed-check output titles are truncated to this declared size
pub const OUTPUT_TITLE_MAX: usize = 140;

/// Fetcher bound to one configuration (bot and noise filters)
pub struct GhFetcher {
    config: MonitorConfig,
}

impl GhFetcher {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }
}

// ---------------------------------------------------------------------------
// Raw payloads

#[derive(Debug, Deserialize)]
struct RawPull {
    title: String,
    html_url: String,
    user: RawUser,
    head: RawHead,
    mergeable: Option<bool>,
    mergeable_state: Option<String>,
    merged: bool,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawHead {
    sha: String,
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCheckRun {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub details_url: Option<String>,
    pub external_id: Option<String>,
    pub output: Option<RawCheckOutput>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCheckOutput {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunsPayload {
    check_runs: Vec<RawCheckRun>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCommitStatus {
    pub state: String,
    pub context: String,
    pub target_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CombinedStatusPayload {
    statuses: Vec<RawCommitStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawReview {
    pub user: RawReviewUser,
    pub state: String,
    pub commit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawReviewUser {
    pub login: String,
}

// ---------------------------------------------------------------------------
// Classification

/// Merge modern check runs with legacy commit statuses into one summary.
///
/// Noise names are dropped, names are deduplicated case-insensitively with
/// the first occurrence winning (matching what the platform UI shows), and
/// check runs take precedence over a legacy status of the same name.
pub(crate) fn merge_check_payloads(
    runs: Vec<RawCheckRun>,
    statuses: Vec<RawCommitStatus>,
    config: &MonitorConfig,
) -> CheckRuns {
    let mut counts = CheckCounts::default();
    let mut failures = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for run in runs {
        if config.is_noise_check(&run.name) {
            continue;
        }
        if !seen.insert(run.name.to_ascii_lowercase()) {
            continue;
        }
        counts.total += 1;
        match run.status.as_str() {
            "queued" => counts.queued += 1,
            "in_progress" => counts.pending += 1,
            _ => match run.conclusion.as_deref() {
                Some("success") | Some("skipped") | Some("neutral") => counts.passed += 1,
                Some("failure") | Some("timed_out") => {
                    counts.failed += 1;
                    failures.push(FailedCheck {
                        name: run.name.clone(),
                        conclusion: run.conclusion.clone().unwrap_or_default(),
                        title: run.output.and_then(|o| o.title).map(|t| truncate(&t)),
                        details_url: run.details_url,
                        external_id: run.external_id,
                    });
                }
                Some("cancelled") => counts.cancelled += 1,
                _ => counts.pending += 1,
            },
        }
    }

    for status in statuses {
        if config.is_noise_check(&status.context) {
            continue;
        }
        if !seen.insert(status.context.to_ascii_lowercase()) {
            continue;
        }
        counts.total += 1;
        match status.state.as_str() {
            "pending" => counts.pending += 1,
            "success" => counts.passed += 1,
            "failure" | "error" => {
                counts.failed += 1;
                failures.push(FailedCheck {
                    name: status.context.clone(),
                    conclusion: status.state.clone(),
                    title: None,
                    details_url: status.target_url,
                    external_id: None,
                });
            }
            _ => counts.pending += 1,
        }
    }

    CheckRuns { counts, failures }
}

fn truncate(title: &str) -> String {
    if title.len() <= OUTPUT_TITLE_MAX {
        return title.to_string();
    }
    let mut cut = OUTPUT_TITLE_MAX;
    while !title.is_char_boundary(cut) {
        cut -= 1;
    }
    title[..cut].to_string()
}

/// Keep the chronologically last review per user, drop CI bots (except the
/// explicitly kept reviewer logins), and split approvals by freshness.
pub(crate) fn summarize_reviews(
    reviews: Vec<RawReview>,
    head_sha: &str,
    config: &MonitorConfig,
) -> ReviewSummary {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, RawReview> = HashMap::new();
    for review in reviews {
        let login = review.user.login.clone();
        if config.is_filtered_bot(&login) {
            continue;
        }
        if !latest.contains_key(&login) {
            order.push(login.clone());
        }
        latest.insert(login, review);
    }

    let mut summary = ReviewSummary::default();
    for login in order {
        let Some(review) = latest.get(&login) else {
            continue;
        };
        if review.state != "APPROVED" {
            continue;
        }
        if review.commit_id.as_deref() == Some(head_sha) {
            summary.approvals.push(login);
        } else {
            summary.stale_approvals.push(login);
        }
    }
    summary
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawThread {
    pub id: String,
    #[serde(rename = "isResolved")]
    pub is_resolved: bool,
    pub path: Option<String>,
    pub comments: RawThreadComments,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawThreadComments {
    pub nodes: Vec<RawThreadComment>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawThreadComment {
    pub body: String,
    pub author: Option<RawUser>,
}

/// Drop resolved and bot-opened threads; flag the waiting-for-reply ones
/// (at least two comments, PR author replied last).
pub(crate) fn classify_threads(
    threads: Vec<RawThread>,
    pr_author: &str,
    config: &MonitorConfig,
) -> Vec<CommentThread> {
    threads
        .into_iter()
        .filter(|t| !t.is_resolved)
        .filter_map(|t| {
            let first = t.comments.nodes.first()?;
            let author = first
                .author
                .as_ref()
                .map(|a| a.login.clone())
                .unwrap_or_default();
            if config.is_filtered_bot(&author) {
                return None;
            }
            let last_author = t
                .comments
                .nodes
                .last()
                .and_then(|c| c.author.as_ref())
                .map(|a| a.login.clone())
                .unwrap_or_default();
            let comment_count = t.comments.nodes.len();
            let waiting_for_reply = comment_count >= 2 && last_author == pr_author;
            Some(CommentThread {
                id: t.id,
                author,
                path: t.path,
                body: first.body.clone(),
                comment_count,
                last_author,
                waiting_for_reply,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Fetching

#[async_trait]
impl PlatformFetcher for GhFetcher {
    async fn fetch_pr_info(&self, pr: &PrLocator) -> Result<PrInfo> {
        let path = format!("repos/{}/{}/pulls/{}", pr.owner, pr.repo, pr.number);
        let raw: RawPull = gh_json(&["api", &path]).await?;
        Ok(PrInfo {
            title: raw.title,
            head_sha: raw.head.sha,
            head_branch: raw.head.branch,
            url: raw.html_url,
            author: raw.user.login,
            mergeable: raw.mergeable,
            mergeable_state: raw.mergeable_state.unwrap_or_default(),
            merged: raw.merged,
        })
    }

    async fn fetch_check_runs(&self, pr: &PrLocator, head_sha: &str) -> Result<CheckRuns> {
        let runs_path = format!(
            "repos/{}/{}/commits/{}/check-runs?per_page=100",
            pr.owner, pr.repo, head_sha
        );
        let runs: CheckRunsPayload = gh_json(&["api", &runs_path]).await?;

        let status_path = format!("repos/{}/{}/commits/{}/status", pr.owner, pr.repo, head_sha);
        let statuses: CombinedStatusPayload = gh_json(&["api", &status_path]).await?;

        Ok(merge_check_payloads(
            runs.check_runs,
            statuses.statuses,
            &self.config,
        ))
    }

    async fn fetch_reviews(&self, pr: &PrLocator, head_sha: &str) -> Result<ReviewSummary> {
        let path = format!(
            "repos/{}/{}/pulls/{}/reviews?per_page=100",
            pr.owner, pr.repo, pr.number
        );
        let reviews: Vec<RawReview> = gh_json(&["api", &path]).await?;
        Ok(summarize_reviews(reviews, head_sha, &self.config))
    }

    async fn fetch_unresolved_comments(
        &self,
        pr: &PrLocator,
        pr_author: &str,
    ) -> Result<Vec<CommentThread>> {
        let query = format!(
            r#"query {{
                repository(owner: "{}", name: "{}") {{
                    pullRequest(number: {}) {{
                        reviewThreads(first: 100) {{
                            nodes {{
                                id
                                isResolved
                                path
                                comments(first: 50) {{
                                    nodes {{
                                        body
                                        author {{ login }}
                                    }}
                                }}
                            }}
                        }}
                    }}
                }}
            }}"#,
            pr.owner, pr.repo, pr.number
        );

        #[derive(Deserialize)]
        struct Response {
            data: Data,
        }
        #[derive(Deserialize)]
        struct Data {
            repository: Repository,
        }
        #[derive(Deserialize)]
        struct Repository {
            #[serde(rename = "pullRequest")]
            pull_request: PullRequest,
        }
        #[derive(Deserialize)]
        struct PullRequest {
            #[serde(rename = "reviewThreads")]
            review_threads: Threads,
        }
        #[derive(Deserialize)]
        struct Threads {
            nodes: Vec<RawThread>,
        }

        let response: Response =
            gh_json(&["api", "graphql", "-f", &format!("query={query}")]).await?;
        Ok(classify_threads(
            response.data.repository.pull_request.review_threads.nodes,
            pr_author,
            &self.config,
        ))
    }

    async fn resolve_thread(&self, thread_id: &str) -> Result<()> {
        resolve_review_thread(thread_id).await
    }

    async fn fetch_current_user(&self) -> Result<String> {
        let login = gh(&["api", "user", "-q", ".login"]).await?;
        let login = login.trim().to_string();
        if login.is_empty() {
            return Err(Error::Platform("empty login from gh api user".to_string()));
        }
        Ok(login)
    }
}
