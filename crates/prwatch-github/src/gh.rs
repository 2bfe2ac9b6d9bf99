//! gh CLI subprocess wrapper
//!
//! Every platform call funnels through here: arguments are passed directly
//! (never through a shell), both streams are captured, and a non-zero exit
//! becomes a platform error the poll loop treats as transient.

use prwatch_core::{Error, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub(crate) async fn gh(args: &[&str]) -> Result<String> {
    debug!("gh {}", args.join(" "));
    let output = Command::new("gh")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Platform(format!("failed to run gh: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Platform(format!(
            "gh {} exited with {}: {}",
            args.first().unwrap_or(&"?"),
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub(crate) async fn gh_json<T: DeserializeOwned>(args: &[&str]) -> Result<T> {
    let stdout = gh(args).await?;
    serde_json::from_str(&stdout)
        .map_err(|e| Error::Platform(format!("unexpected gh output: {e}")))
}

/// Resolve a review thread via the GraphQL mutation, with at most one
/// silent retry after a short back-off.
pub(crate) async fn resolve_review_thread(thread_id: &str) -> Result<()> {
    let mutation = format!(
        r#"mutation {{ resolveReviewThread(input: {{threadId: "{thread_id}"}}) {{ thread {{ isResolved }} }} }}"#
    );
    let query_arg = format!("query={mutation}");
    let args: [&str; 4] = ["api", "graphql", "-f", &query_arg];
    match gh(&args).await {
        Ok(_) => Ok(()),
        Err(first) => {
            debug!("resolve retry for {thread_id}: {first}");
            tokio::time::sleep(Duration::from_secs(1)).await;
            gh(&args).await.map(|_| ())
        }
    }
}
