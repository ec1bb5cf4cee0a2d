//! The workflow manager: owns the active plan and drives it through its phases.
//!
//! Every mutating method finishes a full read, modify and persist cycle before it
//! returns, then announces the change on the event bus. Methods take `&mut self`,
//! so a manager has a single writer; hosts with concurrent callers share it through
//! [`WorkflowManager::into_shared`].

use std::sync::Arc;

use events::{EventBus, WorkflowEvent};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use triad_core::{
    ExecutionPlan, ReviewResult, RevisionEntry, TaskDefinition, TaskPriority, TaskProgress,
    TaskResult, TaskStatus, WorkflowPhase,
};
use uuid::Uuid;

use crate::client::LlmClient;
use crate::config::WorkflowConfig;
use crate::error::{OrchestratorError, Result};
use crate::parser::{ParseResult, PlanningResponse};
use crate::router::ClientRouter;
use crate::state_machine::PhaseStateMachine;
use crate::store::{WorkflowStore, WorkflowSummary};
use crate::task_graph;

pub type SharedWorkflowManager = Arc<Mutex<WorkflowManager>>;

pub struct WorkflowManager {
    store: Arc<dyn WorkflowStore>,
    router: Option<ClientRouter>,
    events: EventBus,
    current: Option<ExecutionPlan>,
}

impl WorkflowManager {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            store,
            router: None,
            events: EventBus::new(),
            current: None,
        }
    }

    pub fn with_router(mut self, router: ClientRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Use an existing bus, e.g. one shared with a UI.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn into_shared(self) -> SharedWorkflowManager {
        Arc::new(Mutex::new(self))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn router(&self) -> Option<&ClientRouter> {
        self.router.as_ref()
    }

    pub fn router_mut(&mut self) -> Option<&mut ClientRouter> {
        self.router.as_mut()
    }

    pub fn current_plan(&self) -> Option<&ExecutionPlan> {
        self.current.as_ref()
    }

    /// Create a plan in `planning`, or adopt `existing` and restart it from planning.
    pub async fn start_workflow(
        &mut self,
        request: &str,
        config: &WorkflowConfig,
        existing: Option<ExecutionPlan>,
    ) -> Result<ExecutionPlan> {
        let plan = match existing {
            Some(mut plan) => {
                debug!(plan_id = %plan.id, "Adopting existing plan");
                let metadata = config.plan_metadata();
                plan.metadata.planning_model = metadata.planning_model;
                plan.metadata.coding_model = metadata.coding_model;
                plan.metadata.review_model = metadata.review_model;
                plan.metadata.max_revisions = metadata.max_revisions;
                plan.phase = WorkflowPhase::Planning;
                plan.touch();
                plan
            }
            None => ExecutionPlan::new(request, config.plan_metadata()),
        };

        if let Some(previous) = &self.current {
            warn!(plan_id = %previous.id, "Replacing active workflow");
        }

        self.store.save_workflow(&plan).await?;
        self.current = Some(plan.clone());

        info!(
            plan_id = %plan.id,
            from = %WorkflowPhase::Idle,
            to = %WorkflowPhase::Planning,
            "Workflow started"
        );
        self.events.emit(WorkflowEvent::PhaseChanged {
            from: WorkflowPhase::Idle,
            to: WorkflowPhase::Planning,
        });

        Ok(plan)
    }

    /// Load a persisted plan and make it active. `None` when no plan has that id.
    pub async fn resume_workflow(&mut self, id: Uuid) -> Result<Option<ExecutionPlan>> {
        let Some(plan) = self.store.load_workflow(id).await? else {
            debug!(plan_id = %id, "No workflow to resume");
            return Ok(None);
        };

        info!(plan_id = %plan.id, phase = %plan.phase, "Workflow resumed");
        self.current = Some(plan.clone());
        Ok(Some(plan))
    }

    /// Activate and return the client for `phase` (the active plan's phase when
    /// `None`). Phases without a role, or a manager without a router, yield `None`.
    pub fn get_client_for_phase(
        &mut self,
        phase: Option<WorkflowPhase>,
    ) -> Result<Option<Arc<dyn LlmClient>>> {
        let Some(phase) = phase.or_else(|| self.current.as_ref().map(|p| p.phase)) else {
            return Ok(None);
        };
        let (Some(role), Some(router)) = (phase.role(), self.router.as_mut()) else {
            return Ok(None);
        };

        let client = router.switch_to(role)?;
        debug!(phase = %phase, role = %role, model = %client.current_model(), "Switched client");
        Ok(Some(client))
    }

    pub async fn transition_to_phase(&mut self, to: WorkflowPhase) -> Result<()> {
        let plan = self.plan_mut()?;
        let from = plan.phase;
        PhaseStateMachine::validate_transition(from, to)?;

        if from == WorkflowPhase::Revision && to == WorkflowPhase::Implementing {
            let mut reopened = 0;
            for task in plan.tasks.iter_mut().filter(|t| t.status == TaskStatus::NeedsRevision) {
                task.status = TaskStatus::Pending;
                reopened += 1;
            }
            debug!(reopened, "Reopened tasks for revision");
        }

        plan.phase = to;
        plan.touch();
        let plan_id = plan.id;

        self.persist().await?;

        info!(plan_id = %plan_id, from = %from, to = %to, "Workflow phase transition");
        self.events.emit(WorkflowEvent::PhaseChanged { from, to });
        Ok(())
    }

    /// Replace the plan's tasks with the planner's output.
    pub async fn set_tasks_from_planning_response(
        &mut self,
        parsed: ParseResult<PlanningResponse>,
    ) -> Result<()> {
        let plan = self.plan_mut()?;
        let response = parsed.map_err(|e| OrchestratorError::ResponseRejected(e.to_string()))?;

        plan.tasks = response.tasks;
        if let Some(context) = response.context {
            plan.context = context;
        }
        plan.current_task_index = None;
        plan.touch();
        info!(plan_id = %plan.id, tasks = plan.tasks.len(), "Plan tasks set");

        self.persist().await
    }

    pub fn get_next_task(&self) -> Option<&TaskDefinition> {
        self.current.as_ref().and_then(task_graph::next_task)
    }

    /// Mark a task in progress. `None` for an unknown id; an error when any
    /// dependency is not completed.
    pub async fn start_task(&mut self, task_id: &str) -> Result<Option<TaskDefinition>> {
        let plan = self.plan_mut()?;
        let Some(index) = plan.task_index(task_id) else {
            warn!(task_id, "Cannot start unknown task");
            return Ok(None);
        };

        let missing = task_graph::unmet_dependencies(&plan.tasks[index], &plan.tasks);
        if !missing.is_empty() {
            return Err(OrchestratorError::DependenciesUnmet {
                task_id: task_id.to_string(),
                missing,
            });
        }

        let task = &mut plan.tasks[index];
        task.status = TaskStatus::InProgress;
        task.attempts += 1;
        let task = task.clone();
        plan.current_task_index = Some(index);
        plan.touch();

        self.persist().await?;

        info!(task_id, attempt = task.attempts, "Task started");
        self.events.emit(WorkflowEvent::TaskStarted { task: task.clone() });
        Ok(Some(task))
    }

    pub async fn complete_task(&mut self, task_id: &str, result: TaskResult) -> Result<()> {
        let plan = self.plan_mut()?;
        let task = plan
            .task_mut(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        task.status = TaskStatus::Completed;
        task.result = Some(result.clone());
        let task = task.clone();
        plan.touch();

        self.persist().await?;

        info!(task_id, files = result.files_modified.len() + result.files_created.len(), "Task completed");
        self.events.emit(WorkflowEvent::TaskCompleted { task, result });
        Ok(())
    }

    pub async fn fail_task(&mut self, task_id: &str, error: &str) -> Result<()> {
        let plan = self.plan_mut()?;
        let task = plan
            .task_mut(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        task.status = TaskStatus::Failed;
        task.result = Some(TaskResult::failure(error));
        let task = task.clone();
        plan.touch();

        self.persist().await?;

        warn!(task_id, error, "Task failed");
        self.events.emit(WorkflowEvent::TaskFailed {
            task,
            error: error.to_string(),
        });
        Ok(())
    }

    /// True when every task is completed or skipped; false without an active plan.
    pub fn are_all_tasks_complete(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|plan| task_graph::all_complete(&plan.tasks))
    }

    pub fn progress(&self) -> Option<TaskProgress> {
        self.current.as_ref().map(task_graph::progress)
    }

    /// Apply the reviewer's verdict.
    ///
    /// Approval completes the workflow. Rejection records a revision, sends the
    /// failing tasks back, appends any new tasks and moves to `revision`. Reaching
    /// `max_revisions` only logs a warning; the loop is never halted here.
    pub async fn process_review_result(&mut self, parsed: ParseResult<ReviewResult>) -> Result<()> {
        let plan = self.plan_mut()?;
        let review = parsed.map_err(|e| OrchestratorError::ResponseRejected(e.to_string()))?;

        if review.approved {
            self.transition_to_phase(WorkflowPhase::Complete).await?;

            let plan = self.plan_mut()?.clone();
            info!(plan_id = %plan.id, quality_score = ?review.quality_score, "Workflow approved");
            self.events.emit(WorkflowEvent::ReviewCompleted { result: review });
            self.events.emit(WorkflowEvent::WorkflowCompleted {
                plan: Box::new(plan),
            });
            return Ok(());
        }

        PhaseStateMachine::validate_transition(plan.phase, WorkflowPhase::Revision)?;

        plan.metadata.total_revisions += 1;
        if plan.metadata.total_revisions >= plan.metadata.max_revisions {
            warn!(
                plan_id = %plan.id,
                total_revisions = plan.metadata.total_revisions,
                max_revisions = plan.metadata.max_revisions,
                "Maximum revisions reached, continuing"
            );
        }

        let affected: Vec<String> = review.failing_feedback().map(|f| f.task_id.clone()).collect();
        let revision = RevisionEntry::new(plan.phase, revision_feedback(&review), affected);
        plan.revisions.push(revision.clone());

        for feedback in review.failing_feedback() {
            match plan.task_mut(&feedback.task_id) {
                Some(task) => {
                    task.status = TaskStatus::NeedsRevision;
                    task.revision_notes = Some(feedback.issues.join("\n"));
                }
                None => debug!(task_id = %feedback.task_id, "Feedback for unknown task"),
            }
        }

        for spec in &review.revision_tasks {
            let (Some(id), Some(title)) = (&spec.id, &spec.title) else {
                debug!("Skipping revision task without id or title");
                continue;
            };
            if plan.task(id).is_some() {
                warn!(task_id = %id, "Revision task id already in plan, skipping");
                continue;
            }

            let mut task = TaskDefinition::new(id.clone(), title.clone())
                .with_description(spec.description.clone().unwrap_or_default())
                .with_acceptance_criteria(spec.acceptance_criteria.clone())
                .with_dependencies(spec.dependencies.iter().cloned())
                .with_priority(spec.priority.unwrap_or(TaskPriority::High));
            task.target_files = spec.target_files.clone();
            task.approach = spec.approach.clone().unwrap_or_default();
            plan.tasks.push(task);
        }

        plan.touch();
        info!(
            plan_id = %plan.id,
            revision = plan.metadata.total_revisions,
            affected_tasks = revision.affected_tasks.len(),
            new_tasks = review.revision_tasks.len(),
            "Revision requested"
        );

        self.persist().await?;
        self.events.emit(WorkflowEvent::RevisionRequested { revision });
        self.transition_to_phase(WorkflowPhase::Revision).await
    }

    /// Stop the active workflow, leaving it persisted and resumable.
    ///
    /// Tasks caught `in_progress` go back to `pending` with their attempt count kept.
    pub async fn abort_workflow(&mut self, reason: &str) -> Result<()> {
        let plan = self
            .current
            .as_mut()
            .ok_or(OrchestratorError::NoActiveWorkflow)?;

        self.events.emit(WorkflowEvent::WorkflowAborted {
            reason: reason.to_string(),
        });

        let from = plan.phase;
        for task in plan.tasks.iter_mut().filter(|t| t.status == TaskStatus::InProgress) {
            debug!(task_id = %task.id, "Resetting interrupted task");
            task.status = TaskStatus::Pending;
        }
        plan.phase = WorkflowPhase::Idle;
        plan.touch();

        self.store.save_workflow(plan).await?;
        info!(plan_id = %plan.id, from = %from, reason, "Workflow aborted");
        self.current = None;
        Ok(())
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>> {
        self.store.list_workflows().await
    }

    /// Remove a persisted plan; detaches it first when it is the active one.
    pub async fn delete_workflow(&mut self, id: Uuid) -> Result<bool> {
        if self.current.as_ref().is_some_and(|p| p.id == id) {
            self.current = None;
        }
        self.store.delete_workflow(id).await
    }

    fn plan_mut(&mut self) -> Result<&mut ExecutionPlan> {
        self.current.as_mut().ok_or(OrchestratorError::NoActiveWorkflow)
    }

    async fn persist(&self) -> Result<()> {
        let plan = self.current.as_ref().ok_or(OrchestratorError::NoActiveWorkflow)?;
        self.store.save_workflow(plan).await
    }
}

fn revision_feedback(review: &ReviewResult) -> String {
    if review.critical_issues.is_empty() {
        return review.overall_feedback.clone();
    }
    let issues = review
        .critical_issues
        .iter()
        .map(|issue| format!("- {}", issue))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\nCritical issues:\n{}", review.overall_feedback, issues)
}
