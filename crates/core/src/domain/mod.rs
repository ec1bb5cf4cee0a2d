mod message;
mod phase;
mod plan;
mod review;
mod task;

pub use message::{Message, MessageRole};
pub use phase::{Role, WorkflowPhase};
pub use plan::{ExecutionPlan, PLAN_VERSION, PlanContext, PlanMetadata, RevisionEntry, TaskProgress};
pub use review::{CriterionResult, FeedbackSeverity, ReviewResult, RevisionTaskSpec, TaskReviewFeedback};
pub use task::{TaskDefinition, TaskPriority, TaskResult, TaskStatus};
