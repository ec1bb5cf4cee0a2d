pub mod client;
pub mod config;
pub mod context_budget;
pub mod error;
pub mod parser;
pub mod prompts;
pub mod router;
pub mod runner;
pub mod state_machine;
pub mod store;
pub mod task_graph;
pub mod tokenizer;
pub mod workflow;

pub use client::{ChatChoice, ChatOptions, ChatResponse, ClientFactory, LlmClient};
pub use config::{ModelSelection, ProjectConfig, ProviderConfig, WorkflowConfig};
pub use context_budget::{
    ContextBudgetConfig, ContextBudgetManager, ContextStatus, ContextUsage, EstimatingTokenCounter,
    PruneResult, TokenCounter, WarningLatch,
};
pub use error::{OrchestratorError, Result};
pub use parser::{ParseError, ParseResult, PlanningResponse, ResponseParser};
pub use prompts::PhasePrompts;
pub use router::ClientRouter;
pub use runner::{PhaseRunner, PhaseStep};
pub use state_machine::PhaseStateMachine;
pub use store::{FileWorkflowStore, MemoryWorkflowStore, WorkflowStore, WorkflowSummary};
pub use tokenizer::{Encoding, ModelTokenCounter, TiktokenCounter};
pub use workflow::{SharedWorkflowManager, WorkflowManager};
