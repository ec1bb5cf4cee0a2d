use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Macro-state of a workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    #[default]
    Idle,
    Planning,
    PlanReview,
    Implementing,
    Reviewing,
    Revision,
    Complete,
}

impl WorkflowPhase {
    pub const ALL: [WorkflowPhase; 7] = [
        Self::Idle,
        Self::Planning,
        Self::PlanReview,
        Self::Implementing,
        Self::Reviewing,
        Self::Revision,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::PlanReview => "plan_review",
            Self::Implementing => "implementing",
            Self::Reviewing => "reviewing",
            Self::Revision => "revision",
            Self::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "planning" => Some(Self::Planning),
            "plan_review" => Some(Self::PlanReview),
            "implementing" => Some(Self::Implementing),
            "reviewing" => Some(Self::Reviewing),
            "revision" => Some(Self::Revision),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    /// The model persona that acts during this phase, if any.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Planning | Self::PlanReview => Some(Role::Planner),
            Self::Implementing | Self::Revision => Some(Role::Coder),
            Self::Reviewing => Some(Role::Reviewer),
            Self::Idle | Self::Complete => None,
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowPhase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownPhase(s.to_string()))
    }
}

/// One of the three fixed model personas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Planner,
    Coder,
    Reviewer,
}

impl Role {
    pub const ALL: [Role; 3] = [Self::Planner, Self::Coder, Self::Reviewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planner" => Some(Self::Planner),
            "coder" => Some(Self::Coder),
            "reviewer" => Some(Self::Reviewer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_roles() {
        assert_eq!(WorkflowPhase::Planning.role(), Some(Role::Planner));
        assert_eq!(WorkflowPhase::PlanReview.role(), Some(Role::Planner));
        assert_eq!(WorkflowPhase::Implementing.role(), Some(Role::Coder));
        assert_eq!(WorkflowPhase::Revision.role(), Some(Role::Coder));
        assert_eq!(WorkflowPhase::Reviewing.role(), Some(Role::Reviewer));
        assert_eq!(WorkflowPhase::Idle.role(), None);
        assert_eq!(WorkflowPhase::Complete.role(), None);
    }

    #[test]
    fn test_phase_parsing() {
        for phase in WorkflowPhase::ALL {
            assert_eq!(WorkflowPhase::parse(phase.as_str()), Some(phase));
        }
        assert!("drafting".parse::<WorkflowPhase>().is_err());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&WorkflowPhase::PlanReview).unwrap();
        assert_eq!(json, "\"plan_review\"");
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("coder".parse::<Role>().unwrap(), Role::Coder);
        assert!("tester".parse::<Role>().is_err());
    }
}
