use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::WorkflowPhase;
use super::task::{TaskDefinition, TaskStatus};

/// Schema version written into every new plan.
pub const PLAN_VERSION: u32 = 1;

/// Free-form notes gathered while planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PlanContext {
    #[serde(default)]
    pub relevant_files: Vec<String>,
    #[serde(default)]
    pub codebase_notes: String,
    #[serde(default)]
    pub existing_patterns: Vec<String>,
    #[serde(default)]
    pub potential_risks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    pub planning_model: String,
    pub coding_model: String,
    pub review_model: String,
    #[serde(default)]
    pub total_revisions: u32,
    pub max_revisions: u32,
}

impl Default for PlanMetadata {
    fn default() -> Self {
        Self {
            planning_model: String::new(),
            coding_model: String::new(),
            review_model: String::new(),
            total_revisions: 0,
            max_revisions: 3,
        }
    }
}

/// A recorded review rejection and the tasks it sent back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct RevisionEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: WorkflowPhase,
    pub review_feedback: String,
    pub affected_tasks: Vec<String>,
    /// Left to the caller to clear.
    #[serde(default)]
    pub resolved: bool,
}

impl RevisionEntry {
    pub fn new(phase: WorkflowPhase, review_feedback: impl Into<String>, affected_tasks: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            phase,
            review_feedback: review_feedback.into(),
            affected_tasks,
            resolved: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TaskProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub percentage: u32,
}

/// The aggregate root describing one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub version: u32,
    pub original_request: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase: WorkflowPhase,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub context: PlanContext,
    #[serde(default)]
    pub revisions: Vec<RevisionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_index: Option<usize>,
    pub metadata: PlanMetadata,
}

impl ExecutionPlan {
    pub fn new(original_request: impl Into<String>, metadata: PlanMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            version: PLAN_VERSION,
            original_request: original_request.into(),
            created_at: now,
            updated_at: now,
            phase: WorkflowPhase::Planning,
            tasks: Vec::new(),
            context: PlanContext::default(),
            revisions: Vec::new(),
            current_task_index: None,
            metadata,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskDefinition>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut TaskDefinition> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn unresolved_revisions(&self) -> impl Iterator<Item = &RevisionEntry> {
        self.revisions.iter().filter(|r| !r.resolved)
    }
}
