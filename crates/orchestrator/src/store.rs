//! Workflow persistence gateway
//!
//! The manager saves the whole plan after every mutation and never deletes one on
//! its own. Storage layout belongs to the store implementations.
//!
//! File structure for [`FileWorkflowStore`]:
//! ```text
//! .triad/
//! └── workflows/
//!     └── <plan-id>.json
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use triad_core::{ExecutionPlan, TaskStatus, WorkflowPhase};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

const TRIAD_DIR: &str = ".triad";
const WORKFLOWS_DIR: &str = "workflows";

/// Listing entry for a persisted plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub original_request: String,
    pub phase: WorkflowPhase,
    pub task_count: usize,
    pub completed_tasks: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&ExecutionPlan> for WorkflowSummary {
    fn from(plan: &ExecutionPlan) -> Self {
        Self {
            id: plan.id,
            original_request: plan.original_request.clone(),
            phase: plan.phase,
            task_count: plan.tasks.len(),
            completed_tasks: plan.count_with_status(TaskStatus::Completed),
            updated_at: plan.updated_at,
        }
    }
}

/// Storage for execution plans, one opaque document per workflow
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace the plan with the same id
    async fn save_workflow(&self, plan: &ExecutionPlan) -> Result<()>;

    /// Load a plan, `None` when no plan has that id
    async fn load_workflow(&self, id: Uuid) -> Result<Option<ExecutionPlan>>;

    /// Summaries of every stored plan, most recently updated first
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>>;

    /// Remove a plan, returning whether it existed
    async fn delete_workflow(&self, id: Uuid) -> Result<bool>;
}

fn sort_recent_first(summaries: &mut [WorkflowSummary]) {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Store that keeps one pretty-printed JSON file per plan
#[derive(Debug, Clone)]
pub struct FileWorkflowStore {
    dir: PathBuf,
}

impl FileWorkflowStore {
    /// Store under `<project>/.triad/workflows`
    pub fn new(project_path: impl AsRef<Path>) -> Self {
        Self::in_dir(project_path.as_ref().join(TRIAD_DIR).join(WORKFLOWS_DIR))
    }

    /// Store directly in `dir`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn plan_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await.map_err(|e| {
                OrchestratorError::persistence(format!(
                    "Failed to create workflow directory {:?}: {}",
                    self.dir, e
                ))
            })?;
            debug!("Created workflow directory: {}", self.dir.display());
        }
        Ok(())
    }

    async fn read_plan(path: &Path) -> Result<ExecutionPlan> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            OrchestratorError::persistence(format!("Failed to read workflow {:?}: {}", path, e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::Serialization(format!("Failed to parse workflow {:?}: {}", path, e))
        })
    }
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    /// Atomic write via temp file + rename
    async fn save_workflow(&self, plan: &ExecutionPlan) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.plan_path(plan.id);
        let temp_path = self.dir.join(format!(".{}.tmp", plan.id));

        let content = serde_json::to_string_pretty(plan)?;

        fs::write(&temp_path, content).await.map_err(|e| {
            OrchestratorError::persistence(format!(
                "Failed to write temp workflow file {:?}: {}",
                temp_path, e
            ))
        })?;

        fs::rename(&temp_path, &path).await.map_err(|e| {
            OrchestratorError::persistence(format!(
                "Failed to rename workflow file {:?} -> {:?}: {}",
                temp_path, path, e
            ))
        })?;

        debug!(plan_id = %plan.id, phase = %plan.phase, "Saved workflow to {:?}", path);
        Ok(())
    }

    async fn load_workflow(&self, id: Uuid) -> Result<Option<ExecutionPlan>> {
        let path = self.plan_path(id);
        if !path.exists() {
            debug!(plan_id = %id, "No workflow file found");
            return Ok(None);
        }

        let plan = Self::read_plan(&path).await?;
        debug!(plan_id = %id, tasks = plan.tasks.len(), "Loaded workflow");
        Ok(Some(plan))
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        let mut summaries = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_plan = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_plan {
                continue;
            }

            match Self::read_plan(&path).await {
                Ok(plan) => summaries.push(WorkflowSummary::from(&plan)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable workflow file"),
            }
        }

        sort_recent_first(&mut summaries);
        Ok(summaries)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<bool> {
        let path = self.plan_path(id);
        if !path.exists() {
            return Ok(false);
        }

        fs::remove_file(&path).await.map_err(|e| {
            OrchestratorError::persistence(format!("Failed to delete workflow {:?}: {}", path, e))
        })?;
        info!(plan_id = %id, "Deleted workflow");
        Ok(true)
    }
}

/// In-process store, used by tests and embedders that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    plans: RwLock<HashMap<Uuid, ExecutionPlan>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.plans.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plans.read().await.is_empty()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn save_workflow(&self, plan: &ExecutionPlan) -> Result<()> {
        self.plans.write().await.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn load_workflow(&self, id: Uuid) -> Result<Option<ExecutionPlan>> {
        Ok(self.plans.read().await.get(&id).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>> {
        let mut summaries: Vec<WorkflowSummary> =
            self.plans.read().await.values().map(WorkflowSummary::from).collect();
        sort_recent_first(&mut summaries);
        Ok(summaries)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<bool> {
        Ok(self.plans.write().await.remove(&id).is_some())
    }
}
