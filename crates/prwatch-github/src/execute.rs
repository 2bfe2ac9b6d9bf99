//! Platform executor over the gh CLI
//!
//! The deterministic side-effecting calls: resolve a thread, merge, and
//! push an empty commit to trigger a fresh build. No LLM involvement.

use async_trait::async_trait;
use prwatch_core::{Error, PlatformExecutor, PrLocator, Result};
use serde::Deserialize;
use tracing::info;

use crate::gh::{gh, gh_json, resolve_review_thread};

/// Stderr substrings that mean the branch policy refused the merge
const POLICY_REFUSAL_MARKERS: &[&str] = &[
    "protected branch",
    "required status check",
    "review required",
    "approving review",
    "not authorized",
    "merge queue",
];

pub(crate) fn is_policy_refusal(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    POLICY_REFUSAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Executor for deterministic platform mutations
#[derive(Debug, Default)]
pub struct GhExecutor;

impl GhExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlatformExecutor for GhExecutor {
    async fn resolve_thread(&self, thread_id: &str) -> Result<()> {
        resolve_review_thread(thread_id).await
    }

    async fn merge_pr(&self, pr: &PrLocator, admin: bool) -> Result<()> {
        let number = pr.number.to_string();
        let repo = format!("{}/{}", pr.owner, pr.repo);
        let mut args: Vec<&str> = vec!["pr", "merge", &number, "--repo", &repo, "--squash"];
        if admin {
            args.push("--admin");
        }
        match gh(&args).await {
            Ok(_) => {
                info!("merged {}", pr.slug());
                Ok(())
            }
            Err(Error::Platform(message)) if is_policy_refusal(&message) => {
                Err(Error::MergePolicy(message))
            }
            Err(e) => Err(e),
        }
    }

    async fn run_new_build(
        &self,
        pr: &PrLocator,
        head_branch: &str,
        head_sha: &str,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct RawCommit {
            sha: String,
        }

        // An empty commit reuses the head commit's tree with the head as
        // its sole parent.
        let commit_path = format!("repos/{}/{}/git/commits/{}", pr.owner, pr.repo, head_sha);
        let tree = gh(&["api", &commit_path, "-q", ".tree.sha"]).await?;
        let tree = tree.trim();
        if tree.is_empty() {
            return Err(Error::Platform(format!(
                "no tree for commit {head_sha} on {}",
                pr.slug()
            )));
        }

        let create_path = format!("repos/{}/{}/git/commits", pr.owner, pr.repo);
        let new_commit: RawCommit = gh_json(&[
            "api",
            &create_path,
            "-X",
            "POST",
            "-f",
            "message=Empty commit to trigger a fresh build",
            "-f",
            &format!("tree={tree}"),
            "-f",
            &format!("parents[]={head_sha}"),
        ])
        .await?;

        let ref_path = format!(
            "repos/{}/{}/git/refs/heads/{}",
            pr.owner, pr.repo, head_branch
        );
        gh(&[
            "api",
            &ref_path,
            "-X",
            "PATCH",
            "-f",
            &format!("sha={}", new_commit.sha),
        ])
        .await?;

        info!("pushed empty commit {} to {head_branch}", new_commit.sha);
        Ok(new_commit.sha)
    }
}
