use triad_core::WorkflowPhase;

use crate::error::{OrchestratorError, Result};

/// Legal workflow phase transitions.
pub struct PhaseStateMachine;

impl PhaseStateMachine {
    pub fn validate_transition(from: WorkflowPhase, to: WorkflowPhase) -> Result<()> {
        if Self::allowed_transitions(from).contains(&to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition { from, to })
        }
    }

    pub fn allowed_transitions(from: WorkflowPhase) -> Vec<WorkflowPhase> {
        use WorkflowPhase::*;

        match from {
            // A detached plan can be resumed into whichever phase it was left in.
            Idle => vec![Planning, PlanReview, Implementing, Reviewing, Revision],
            Planning => vec![PlanReview, Implementing],
            PlanReview => vec![Planning, Implementing],
            Implementing => vec![Reviewing],
            Reviewing => vec![Complete, Revision, Implementing],
            Revision => vec![Implementing, Reviewing],
            Complete => vec![],
        }
    }

    pub fn can_transition(from: WorkflowPhase, to: WorkflowPhase) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    /// The phase the happy path moves to next.
    pub fn next_phase(current: WorkflowPhase) -> Option<WorkflowPhase> {
        match current {
            WorkflowPhase::Idle => Some(WorkflowPhase::Planning),
            WorkflowPhase::Planning => Some(WorkflowPhase::PlanReview),
            WorkflowPhase::PlanReview => Some(WorkflowPhase::Implementing),
            WorkflowPhase::Implementing => Some(WorkflowPhase::Reviewing),
            WorkflowPhase::Reviewing => Some(WorkflowPhase::Complete),
            WorkflowPhase::Revision => Some(WorkflowPhase::Implementing),
            WorkflowPhase::Complete => None,
        }
    }
}
