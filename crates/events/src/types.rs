//! Event types for the workflow event system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use triad_core::{ExecutionPlan, ReviewResult, RevisionEntry, TaskDefinition, TaskResult, WorkflowPhase};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Position in the bus's emission order
    pub sequence: u64,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: WorkflowEvent,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(sequence: u64, event: WorkflowEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All notifications emitted by the workflow manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    PhaseChanged {
        from: WorkflowPhase,
        to: WorkflowPhase,
    },
    TaskStarted {
        task: TaskDefinition,
    },
    TaskCompleted {
        task: TaskDefinition,
        result: TaskResult,
    },
    TaskFailed {
        task: TaskDefinition,
        error: String,
    },
    ReviewCompleted {
        result: ReviewResult,
    },
    RevisionRequested {
        revision: RevisionEntry,
    },
    WorkflowCompleted {
        plan: Box<ExecutionPlan>,
    },
    WorkflowAborted {
        reason: String,
    },
}

impl WorkflowEvent {
    /// Wire name of the variant, matching the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::PhaseChanged { .. } => "phase_changed",
            WorkflowEvent::TaskStarted { .. } => "task_started",
            WorkflowEvent::TaskCompleted { .. } => "task_completed",
            WorkflowEvent::TaskFailed { .. } => "task_failed",
            WorkflowEvent::ReviewCompleted { .. } => "review_completed",
            WorkflowEvent::RevisionRequested { .. } => "revision_requested",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
            WorkflowEvent::WorkflowAborted { .. } => "workflow_aborted",
        }
    }

    /// Get the task ID associated with this event, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::TaskStarted { task }
            | WorkflowEvent::TaskCompleted { task, .. }
            | WorkflowEvent::TaskFailed { task, .. } => Some(task.id.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let envelope = EventEnvelope::new(
            7,
            WorkflowEvent::WorkflowAborted {
                reason: "user".to_string(),
            },
        );

        assert!(!envelope.id.is_nil());
        assert_eq!(envelope.sequence, 7);
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = WorkflowEvent::PhaseChanged {
            from: WorkflowPhase::Idle,
            to: WorkflowPhase::Planning,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"phase_changed","from":"idle","to":"planning"}"#);
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"workflow_aborted","reason":"cancelled"}"#;
        let event: WorkflowEvent = serde_json::from_str(json).unwrap();

        match event {
            WorkflowEvent::WorkflowAborted { reason } => assert_eq!(reason, "cancelled"),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_kind_matches_tag() {
        let event = WorkflowEvent::TaskFailed {
            task: TaskDefinition::new("task-1", "Add auth"),
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(event.task_id(), Some("task-1"));
    }
}
