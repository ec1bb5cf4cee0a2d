//! One step of the plan, implement and review loop, driven through routed clients.

use std::sync::Arc;

use tracing::{debug, info, warn};
use triad_core::{Message, Role, TaskResult, WorkflowPhase};

use crate::client::{ChatOptions, LlmClient};
use crate::config::WorkflowConfig;
use crate::context_budget::{ContextBudgetConfig, ContextBudgetManager, ContextStatus};
use crate::error::{OrchestratorError, Result};
use crate::parser::ResponseParser;
use crate::prompts::PhasePrompts;
use crate::workflow::WorkflowManager;

/// Outcome of a single runner step.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseStep {
    Planned {
        task_count: usize,
        next_phase: WorkflowPhase,
    },
    /// The plan waits in `plan_review` for the caller to approve it.
    AwaitingApproval,
    TaskCompleted {
        task_id: String,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    /// Every task is done and the workflow moved to `reviewing`.
    ReadyForReview,
    /// Tasks remain but none can run.
    Stalled,
    Approved,
    RevisionRequested {
        revision: u32,
    },
    /// The model reply could not be parsed; the phase is unchanged.
    RetryNeeded {
        error: String,
    },
    Finished,
}

#[derive(Debug, Clone)]
pub struct PhaseRunner {
    config: WorkflowConfig,
    budget: ContextBudgetConfig,
    options: ChatOptions,
}

impl PhaseRunner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            budget: ContextBudgetConfig::default(),
            options: ChatOptions::default(),
        }
    }

    pub fn with_budget(mut self, budget: ContextBudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Run whatever the active plan's phase calls for.
    pub async fn step(&self, manager: &mut WorkflowManager) -> Result<PhaseStep> {
        let phase = manager
            .current_plan()
            .map(|p| p.phase)
            .ok_or(OrchestratorError::NoActiveWorkflow)?;

        match phase {
            WorkflowPhase::Planning => self.run_planning(manager).await,
            WorkflowPhase::PlanReview => Ok(PhaseStep::AwaitingApproval),
            WorkflowPhase::Implementing | WorkflowPhase::Revision => self.run_next_task(manager).await,
            WorkflowPhase::Reviewing => self.run_review(manager).await,
            WorkflowPhase::Idle | WorkflowPhase::Complete => Ok(PhaseStep::Finished),
        }
    }

    pub async fn run_planning(&self, manager: &mut WorkflowManager) -> Result<PhaseStep> {
        let request = active_request(manager)?;
        if manager.current_plan().map(|p| p.phase) == Some(WorkflowPhase::PlanReview) {
            manager.transition_to_phase(WorkflowPhase::Planning).await?;
        }

        let client = routed_client(manager, WorkflowPhase::Planning, Role::Planner)?;
        let messages = vec![
            Message::system(PhasePrompts::system(Role::Planner)),
            Message::user(PhasePrompts::planning(&request)),
        ];
        let reply = self.chat(client.as_ref(), messages).await?;

        let parsed = match ResponseParser::parse_planning_response(&reply) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Planning response rejected");
                return Ok(PhaseStep::RetryNeeded { error: e.to_string() });
            }
        };

        let task_count = parsed.tasks.len();
        manager.set_tasks_from_planning_response(Ok(parsed)).await?;

        let next_phase = if self.config.auto_advance {
            WorkflowPhase::Implementing
        } else {
            WorkflowPhase::PlanReview
        };
        manager.transition_to_phase(next_phase).await?;

        Ok(PhaseStep::Planned {
            task_count,
            next_phase,
        })
    }

    /// Execute the next runnable task with the coder, or hand over to review once
    /// every task is done.
    pub async fn run_next_task(&self, manager: &mut WorkflowManager) -> Result<PhaseStep> {
        if manager.current_plan().map(|p| p.phase) == Some(WorkflowPhase::Revision) {
            manager.transition_to_phase(WorkflowPhase::Implementing).await?;
        }

        if manager.are_all_tasks_complete() {
            manager.transition_to_phase(WorkflowPhase::Reviewing).await?;
            return Ok(PhaseStep::ReadyForReview);
        }

        let Some(next) = manager.get_next_task().map(|t| t.id.clone()) else {
            warn!("No runnable task; remaining tasks have unmet dependencies");
            return Ok(PhaseStep::Stalled);
        };

        let client = routed_client(manager, WorkflowPhase::Implementing, Role::Coder)?;
        let Some(task) = manager.start_task(&next).await? else {
            return Err(OrchestratorError::TaskNotFound(next));
        };
        let context = manager
            .current_plan()
            .map(|p| p.context.clone())
            .unwrap_or_default();

        let messages = vec![
            Message::system(PhasePrompts::system(Role::Coder)),
            Message::user(PhasePrompts::implementation(&task, &context)),
        ];

        match self.chat(client.as_ref(), messages).await {
            Ok(reply) => {
                let mut result = TaskResult::new(reply.trim());
                result.files_modified = task.target_files.clone();
                manager.complete_task(&task.id, result).await?;
                Ok(PhaseStep::TaskCompleted { task_id: task.id })
            }
            Err(e) => {
                let error = e.to_string();
                manager.fail_task(&task.id, &error).await?;
                Ok(PhaseStep::TaskFailed {
                    task_id: task.id,
                    error,
                })
            }
        }
    }

    pub async fn run_review(&self, manager: &mut WorkflowManager) -> Result<PhaseStep> {
        if manager.current_plan().map(|p| p.phase) == Some(WorkflowPhase::Implementing)
            && manager.are_all_tasks_complete()
        {
            manager.transition_to_phase(WorkflowPhase::Reviewing).await?;
        }

        let plan = manager.current_plan().ok_or(OrchestratorError::NoActiveWorkflow)?;
        if plan.phase != WorkflowPhase::Reviewing {
            return Err(OrchestratorError::InvalidTransition {
                from: plan.phase,
                to: WorkflowPhase::Reviewing,
            });
        }
        let prompt = PhasePrompts::review(plan);
        let client = routed_client(manager, WorkflowPhase::Reviewing, Role::Reviewer)?;
        let messages = vec![
            Message::system(PhasePrompts::system(Role::Reviewer)),
            Message::user(prompt),
        ];
        let reply = self.chat(client.as_ref(), messages).await?;

        let review = match ResponseParser::parse_review_response(&reply) {
            Ok(review) => review,
            Err(e) => {
                warn!(error = %e, "Review response rejected");
                return Ok(PhaseStep::RetryNeeded { error: e.to_string() });
            }
        };

        let approved = review.approved;
        manager.process_review_result(Ok(review)).await?;

        if approved {
            return Ok(PhaseStep::Approved);
        }
        let revision = manager
            .current_plan()
            .map(|p| p.metadata.total_revisions)
            .unwrap_or_default();
        Ok(PhaseStep::RevisionRequested { revision })
    }

    /// Send `messages`, pruned to the client's window. A prompt that still does not
    /// fit is refused before it reaches the model.
    async fn chat(&self, client: &dyn LlmClient, messages: Vec<Message>) -> Result<String> {
        let model = client.current_model();
        let budget =
            ContextBudgetManager::for_model(&model, client.context_size()).with_config(self.budget);
        let pruned = budget.prune(&messages);
        let messages = if pruned.pruned {
            info!(removed = pruned.removed_count, "Pruned outgoing messages");
            pruned.messages
        } else {
            messages
        };

        let usage = budget.usage(&messages);
        if usage.has_limit && usage.total_tokens > usage.max_tokens {
            warn!(
                model = %model,
                tokens = usage.total_tokens,
                max_tokens = usage.max_tokens,
                "Prompt does not fit the context window"
            );
            return Err(OrchestratorError::ContextExceeded {
                tokens: usage.total_tokens,
                max_tokens: usage.max_tokens,
            });
        }
        if usage.status == ContextStatus::Critical {
            warn!(model = %model, percent_used = usage.percent_used, "Prompt is close to the context limit");
        }

        debug!(model = %model, messages = messages.len(), tokens = usage.total_tokens, "Sending chat request");
        let response = client.chat(&messages, &self.options).await?;
        Ok(response.content().to_string())
    }
}

fn active_request(manager: &WorkflowManager) -> Result<String> {
    manager
        .current_plan()
        .map(|p| p.original_request.clone())
        .ok_or(OrchestratorError::NoActiveWorkflow)
}

fn routed_client(
    manager: &mut WorkflowManager,
    phase: WorkflowPhase,
    role: Role,
) -> Result<Arc<dyn LlmClient>> {
    manager
        .get_client_for_phase(Some(phase))?
        .ok_or(OrchestratorError::RoleNotBound(role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatResponse;
    use crate::config::ProviderConfig;
    use crate::router::ClientRouter;
    use crate::store::MemoryWorkflowStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use triad_core::TaskStatus;

    /// Local model with a small window that answers every request with one plan.
    struct SmallWindowClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for SmallWindowClient {
        fn set_model(&self, _model: &str) {}

        fn current_model(&self) -> String {
            "local-model".to_string()
        }

        fn context_size(&self) -> usize {
            4000
        }

        async fn clear_context(&self) -> Result<()> {
            Ok(())
        }

        async fn chat(&self, _messages: &[Message], _options: &ChatOptions) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse::from_text(r#"{"tasks":[{"id":"a","title":"A"}]}"#))
        }
    }

    fn small_window_manager() -> (WorkflowManager, Arc<SmallWindowClient>, WorkflowConfig) {
        let client = Arc::new(SmallWindowClient {
            calls: AtomicUsize::new(0),
        });
        let shared = client.clone();
        let mut router = ClientRouter::new(Arc::new(
            move |_: &ProviderConfig, _: &str| -> Result<Arc<dyn LlmClient>> {
                Ok(shared.clone() as Arc<dyn LlmClient>)
            },
        ));
        let config = WorkflowConfig::uniform("local", "local-model");
        router
            .initialize_from_config(&config, vec![ProviderConfig::new("local", ["local-model"])])
            .unwrap();

        let manager = WorkflowManager::new(Arc::new(MemoryWorkflowStore::new())).with_router(router);
        (manager, client, config)
    }

    #[tokio::test]
    async fn test_prompt_within_window_is_sent() {
        let (mut manager, client, config) = small_window_manager();
        manager.start_workflow("Add login", &config, None).await.unwrap();

        let step = PhaseRunner::new(config).run_planning(&mut manager).await.unwrap();
        assert!(matches!(step, PhaseStep::Planned { task_count: 1, .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_planning_prompt_is_refused() {
        let (mut manager, client, config) = small_window_manager();
        manager
            .start_workflow(&"x".repeat(40_000), &config, None)
            .await
            .unwrap();

        let err = PhaseRunner::new(config).run_planning(&mut manager).await.unwrap_err();
        match err {
            OrchestratorError::ContextExceeded { tokens, max_tokens } => {
                assert_eq!(max_tokens, 4000);
                assert!(tokens > 10_000);
            }
            other => panic!("expected context error, got {:?}", other),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.current_plan().unwrap().phase, WorkflowPhase::Planning);
    }

    #[tokio::test]
    async fn test_oversized_task_prompt_fails_the_task() {
        let (mut manager, client, config) = small_window_manager();
        manager.start_workflow("Add login", &config, None).await.unwrap();
        let huge = format!(r#"{{"tasks":[{{"id":"a","title":"A","description":"{}"}}]}}"#, "y".repeat(40_000));
        manager
            .set_tasks_from_planning_response(ResponseParser::parse_planning_response(&huge))
            .await
            .unwrap();
        manager.transition_to_phase(WorkflowPhase::Implementing).await.unwrap();

        let step = PhaseRunner::new(config).run_next_task(&mut manager).await.unwrap();
        match step {
            PhaseStep::TaskFailed { task_id, error } => {
                assert_eq!(task_id, "a");
                assert!(error.contains("model window is 4000"));
            }
            other => panic!("expected failed task, got {:?}", other),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.current_plan().unwrap().task("a").unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_step_without_workflow() {
        let mut manager = WorkflowManager::new(Arc::new(MemoryWorkflowStore::new()));
        let runner = PhaseRunner::new(WorkflowConfig::uniform("p", "m"));

        assert!(matches!(
            runner.step(&mut manager).await,
            Err(OrchestratorError::NoActiveWorkflow)
        ));
    }

    #[tokio::test]
    async fn test_planning_without_router_reports_unbound_role() {
        let config = WorkflowConfig::uniform("p", "m");
        let mut manager = WorkflowManager::new(Arc::new(MemoryWorkflowStore::new()));
        manager.start_workflow("x", &config, None).await.unwrap();

        let err = PhaseRunner::new(config).run_planning(&mut manager).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RoleNotBound(Role::Planner)));
    }

    #[tokio::test]
    async fn test_plan_review_awaits_approval() {
        let config = WorkflowConfig::uniform("p", "m");
        let mut manager = WorkflowManager::new(Arc::new(MemoryWorkflowStore::new()));
        manager.start_workflow("x", &config, None).await.unwrap();
        manager.transition_to_phase(WorkflowPhase::PlanReview).await.unwrap();

        let runner = PhaseRunner::new(config);
        assert_eq!(runner.step(&mut manager).await.unwrap(), PhaseStep::AwaitingApproval);
    }
}
