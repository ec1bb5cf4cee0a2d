use serde::{Deserialize, Serialize};

use super::task::TaskPriority;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSeverity {
    Blocking,
    Warning,
    #[default]
    Info,
}

impl FeedbackSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blocking" => Some(Self::Blocking),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct CriterionResult {
    pub criterion: String,
    pub met: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Reviewer verdict for a single task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TaskReviewFeedback {
    pub task_id: String,
    pub passed: bool,
    #[serde(default)]
    pub criteria_results: Vec<CriterionResult>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub severity: FeedbackSeverity,
}

/// Partial task definition a reviewer asks to append to the plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct RevisionTaskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub approved: bool,
    #[serde(default)]
    pub overall_feedback: String,
    #[serde(default)]
    pub task_feedback: Vec<TaskReviewFeedback>,
    #[serde(default)]
    pub critical_issues: Vec<String>,
    #[serde(default)]
    pub revision_tasks: Vec<RevisionTaskSpec>,
    /// 0 to 100 when the reviewer supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl ReviewResult {
    pub fn approved(overall_feedback: impl Into<String>) -> Self {
        Self {
            approved: true,
            overall_feedback: overall_feedback.into(),
            ..Default::default()
        }
    }

    pub fn rejected(overall_feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            overall_feedback: overall_feedback.into(),
            ..Default::default()
        }
    }

    pub fn with_feedback(mut self, feedback: TaskReviewFeedback) -> Self {
        self.task_feedback.push(feedback);
        self
    }

    pub fn with_revision_task(mut self, spec: RevisionTaskSpec) -> Self {
        self.revision_tasks.push(spec);
        self
    }

    /// Feedback entries for tasks the reviewer did not pass.
    pub fn failing_feedback(&self) -> impl Iterator<Item = &TaskReviewFeedback> {
        self.task_feedback.iter().filter(|f| !f.passed)
    }
}
