//! Monitor configuration
//!
//! Every tuning value the monitor consumes lives here so deployments can
//! override cadence, bot filters, and working hours without a rebuild.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a PR monitor session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between heartbeat progress messages while a tool call is in flight
    pub heartbeat_interval_secs: u64,
    /// Milliseconds to wait after a trigger-file event before reading it
    pub trigger_settle_ms: u64,
    /// Review logins treated as CI noise and dropped
    pub ci_bot_logins: Vec<String>,
    /// Bot logins whose reviews are kept despite looking like CI bots
    pub kept_reviewer_logins: Vec<String>,
    /// Check names dropped as pipeline-internal noise (case-insensitive)
    pub noise_check_names: Vec<String>,
    /// First working hour (local time, inclusive)
    pub work_start_hour: u32,
    /// Last working hour (local time, exclusive)
    pub work_end_hour: u32,
    /// Poll interval while checks are pending or queued (seconds)
    pub poll_pending_secs: u64,
    /// Poll interval when no checks have been observed (seconds)
    pub poll_no_checks_secs: u64,
    /// Poll interval when all checks are complete (seconds)
    pub poll_complete_secs: u64,
    /// Minimum after-hours sleep (seconds)
    pub after_hours_min_secs: u64,
    /// Hours added per after-hours extension
    pub extension_hours: i64,
    /// External dashboard binary launched best-effort on start
    pub viewer_command: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            trigger_settle_ms: 50,
            ci_bot_logins: vec![
                "github-actions".to_string(),
                "github-actions[bot]".to_string(),
                "azure-pipelines".to_string(),
                "azure-pipelines[bot]".to_string(),
                "dependabot[bot]".to_string(),
            ],
            kept_reviewer_logins: vec!["copilot-pull-request-reviewer[bot]".to_string()],
            noise_check_names: vec![
                "analyze".to_string(),
                "summary".to_string(),
                "finalize".to_string(),
                "credscan".to_string(),
                "policheck".to_string(),
            ],
            work_start_hour: 9,
            work_end_hour: 18,
            poll_pending_secs: 60,
            poll_no_checks_secs: 30,
            poll_complete_secs: 120,
            after_hours_min_secs: 60,
            extension_hours: 2,
            viewer_command: None,
        }
    }
}

impl MonitorConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn trigger_settle(&self) -> Duration {
        Duration::from_millis(self.trigger_settle_ms)
    }

    /// True when the login belongs to a CI bot that is not explicitly kept
    pub fn is_filtered_bot(&self, login: &str) -> bool {
        if self.kept_reviewer_logins.iter().any(|k| k == login) {
            return false;
        }
        self.ci_bot_logins.iter().any(|b| b == login)
    }

    /// True when the check name matches the noise filter set
    pub fn is_noise_check(&self, name: &str) -> bool {
        self.noise_check_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_pending_secs, 60);
        assert_eq!(config.poll_no_checks_secs, 30);
        assert_eq!(config.poll_complete_secs, 120);
        assert_eq!(config.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_kept_reviewer_is_not_filtered() {
        let config = MonitorConfig::default();
        assert!(config.is_filtered_bot("github-actions[bot]"));
        assert!(!config.is_filtered_bot("copilot-pull-request-reviewer[bot]"));
        assert!(!config.is_filtered_bot("octocat"));
    }

    #[test]
    fn test_noise_check_is_case_insensitive() {
        let config = MonitorConfig::default();
        assert!(config.is_noise_check("CredScan"));
        assert!(config.is_noise_check("summary"));
        assert!(!config.is_noise_check("build"));
    }
}
