use thiserror::Error;
use triad_core::{CoreError, Role, WorkflowPhase};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No active workflow")]
    NoActiveWorkflow,

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowPhase,
        to: WorkflowPhase,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {task_id} has unmet dependencies: {}", missing.join(", "))]
    DependenciesUnmet { task_id: String, missing: Vec<String> },

    #[error("Model response rejected: {0}")]
    ResponseRejected(String),

    #[error("Provider '{provider}' for {role} role not found. Available providers: {available}")]
    UnknownProvider {
        provider: String,
        role: Role,
        available: String,
    },

    #[error("Prompt needs {tokens} tokens but the model window is {max_tokens}")]
    ContextExceeded { tokens: usize, max_tokens: usize },

    #[error("No client bound for {0} role")]
    RoleNotBound(Role),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl OrchestratorError {
    /// Create a client error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_lists_available() {
        let error = OrchestratorError::UnknownProvider {
            provider: "Foo".to_string(),
            role: Role::Planner,
            available: "Bar, Baz".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("Foo"));
        assert!(message.contains("planner"));
        assert!(message.contains("Bar, Baz"));
    }

    #[test]
    fn test_dependencies_unmet_display() {
        let error = OrchestratorError::DependenciesUnmet {
            task_id: "task-2".to_string(),
            missing: vec!["task-1".to_string(), "ghost".to_string()],
        };
        assert_eq!(error.to_string(), "Task task-2 has unmet dependencies: task-1, ghost");
    }
}
