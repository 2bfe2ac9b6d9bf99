//! Directive envelope
//!
//! Everything the agent tells the LLM comes back as one of these. The LLM
//! relays questions to the human and runs delegated tasks, but the envelope
//! is the only channel and the engine is its only author.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the LLM client should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Present the question and choices to the human, verbatim
    AskUser,
    /// Perform the named task (LLM work: edit code, investigate, reply)
    Execute,
    /// The agent performs the named task itself (deterministic platform call)
    AutoExecute,
    /// Re-enter the poll loop
    Polling,
    /// Monitoring ended at the caller's request
    Stop,
    /// The PR was merged; monitoring ended
    Merged,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AskUser => "ask_user",
            Self::Execute => "execute",
            Self::AutoExecute => "auto_execute",
            Self::Polling => "polling",
            Self::Stop => "stop",
            Self::Merged => "merged",
        }
    }
}

/// Tasks the engine can dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    // Delegated to the LLM
    AddressComment,
    ExplainComment,
    FollowUpComment,
    ReSuggestChange,
    InvestigateCiFailure,
    ApplyFix,
    ShowLogs,
    RerunViaBrowser,
    // Performed by the executor
    ResolveThread,
    MergePr,
    MergePrAdmin,
    RunNewBuild,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddressComment => "address_comment",
            Self::ExplainComment => "explain_comment",
            Self::FollowUpComment => "follow_up_comment",
            Self::ReSuggestChange => "re_suggest_change",
            Self::InvestigateCiFailure => "investigate_ci_failure",
            Self::ApplyFix => "apply_fix",
            Self::ShowLogs => "show_logs",
            Self::RerunViaBrowser => "rerun_via_browser",
            Self::ResolveThread => "resolve_thread",
            Self::MergePr => "merge_pr",
            Self::MergePrAdmin => "merge_pr_admin",
            Self::RunNewBuild => "run_new_build",
        }
    }

    /// True for tasks the agent performs itself
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            Self::ResolveThread | Self::MergePr | Self::MergePrAdmin | Self::RunNewBuild
        )
    }
}

/// The structured instruction returned to the LLM client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Directive {
    pub fn ask_user(question: impl Into<String>, choices: Vec<&str>) -> Self {
        Self {
            action: Action::AskUser,
            question: Some(question.into()),
            choices: Some(choices.into_iter().map(str::to_string).collect()),
            task: None,
            instructions: None,
            message: None,
            context: None,
        }
    }

    /// `ask_user` for choice lists built at runtime
    pub fn ask_user_strings(question: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            action: Action::AskUser,
            question: Some(question.into()),
            choices: Some(choices),
            task: None,
            instructions: None,
            message: None,
            context: None,
        }
    }

    pub fn execute(task: Task) -> Self {
        Self {
            action: Action::Execute,
            question: None,
            choices: None,
            task: Some(task),
            instructions: None,
            message: None,
            context: None,
        }
    }

    pub fn auto_execute(task: Task) -> Self {
        Self {
            action: Action::AutoExecute,
            question: None,
            choices: None,
            task: Some(task),
            instructions: None,
            message: None,
            context: None,
        }
    }

    pub fn polling(message: impl Into<String>) -> Self {
        Self {
            action: Action::Polling,
            question: None,
            choices: None,
            task: None,
            instructions: None,
            message: Some(message.into()),
            context: None,
        }
    }

    pub fn stop(message: impl Into<String>) -> Self {
        Self {
            action: Action::Stop,
            question: None,
            choices: None,
            task: None,
            instructions: None,
            message: Some(message.into()),
            context: None,
        }
    }

    pub fn merged(message: impl Into<String>) -> Self {
        Self {
            action: Action::Merged,
            question: None,
            choices: None,
            task: None,
            instructions: None,
            message: Some(message.into()),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Serialize for the wire; infallible for any directive we construct
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"action":"stop","message":"directive serialization failed"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_tags() {
        assert_eq!(Action::AskUser.as_str(), "ask_user");
        assert_eq!(Action::AutoExecute.as_str(), "auto_execute");
        assert_eq!(Action::Merged.as_str(), "merged");
    }

    #[test]
    fn test_task_tags() {
        assert_eq!(Task::AddressComment.as_str(), "address_comment");
        assert_eq!(Task::RunNewBuild.as_str(), "run_new_build");
        assert!(Task::ResolveThread.is_deterministic());
        assert!(!Task::InvestigateCiFailure.is_deterministic());
    }

    #[test]
    fn test_round_trip() {
        let directive = Directive::ask_user("Merge now?", vec!["Merge the PR", "Keep monitoring"])
            .with_context(json!({"pr": 12}))
            .with_instructions("Present the question verbatim.");

        let wire = directive.to_json();
        let parsed: Directive = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, directive);
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let wire = Directive::polling("resuming").to_json();
        assert!(!wire.contains("question"));
        assert!(!wire.contains("choices"));
        assert!(!wire.contains("task"));
        assert!(wire.contains(r#""action":"polling""#));
    }

    #[test]
    fn test_execute_serializes_task_token() {
        let wire = Directive::auto_execute(Task::MergePrAdmin).to_json();
        assert!(wire.contains(r#""task":"merge_pr_admin""#));
    }
}
