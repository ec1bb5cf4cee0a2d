use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use orchestrator::{
    task_graph, ContextBudgetManager, ContextStatus, FileWorkflowStore, ModelSelection,
    ProjectConfig, ProviderConfig, ResponseParser, WorkflowConfig, WorkflowManager, WorkflowStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use triad_core::{ExecutionPlan, Message, TaskStatus};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "triad")]
#[command(about = "Plan, implement and review with three models", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding .triad/
    #[arg(short, long, default_value = ".")]
    project: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter .triad/config.json
    Init,
    /// List persisted workflows, most recent first
    List,
    /// Show one workflow's tasks and revisions
    Show { id: Uuid },
    /// Abort a workflow, leaving it resumable
    Abort {
        id: Uuid,
        #[arg(long, default_value = "Aborted from CLI")]
        reason: String,
    },
    /// Parse a saved planner reply
    ParsePlan { file: PathBuf },
    /// Parse a saved reviewer reply
    ParseReview { file: PathBuf },
    /// Report context usage of a JSON message list
    Budget {
        #[arg(long)]
        max: usize,
        /// Count with this model's tokenizer instead of the estimate
        #[arg(long)]
        model: Option<String>,
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Init => init_project(&cli.project).await,
        Commands::List => list(&cli.project).await,
        Commands::Show { id } => show(&cli.project, id).await,
        Commands::Abort { id, reason } => abort(&cli.project, id, &reason).await,
        Commands::ParsePlan { file } => parse_plan(&file).await,
        Commands::ParseReview { file } => parse_review(&file).await,
        Commands::Budget { max, model, file } => {
            budget(&cli.project, max, model.as_deref(), &file).await
        }
    }
}

fn starter_config() -> ProjectConfig {
    ProjectConfig {
        workflow: Some(WorkflowConfig::new(
            ModelSelection::new("local", "qwen2.5-coder:32b"),
            ModelSelection::new("local", "qwen2.5-coder:7b"),
            ModelSelection::new("local", "qwen2.5-coder:32b"),
        )),
        providers: vec![ProviderConfig::new("local", ["qwen2.5-coder:32b", "qwen2.5-coder:7b"])
            .with_base_url("${TRIAD_BASE_URL:-http://localhost:11434/v1}")],
        context: Default::default(),
    }
}

async fn init_project(project: &Path) -> Result<()> {
    let config_path = ProjectConfig::path(project);
    if config_path.exists() {
        println!("Project already initialized at {}", config_path.display());
        return Ok(());
    }

    starter_config()
        .write(project)
        .await
        .context("Failed to write config")?;
    let store = FileWorkflowStore::new(project);
    tokio::fs::create_dir_all(store.dir()).await?;

    println!("Initialized triad in {}", project.display());
    println!();
    println!("Created:");
    println!("  .triad/");
    println!("  ├── config.json");
    println!("  └── workflows/");
    println!();
    println!("Edit config.json to point the planner, coder and reviewer at your providers.");
    Ok(())
}

async fn list(project: &Path) -> Result<()> {
    let summaries = FileWorkflowStore::new(project).list_workflows().await?;
    if summaries.is_empty() {
        println!("No workflows yet.");
        return Ok(());
    }

    for summary in summaries {
        println!(
            "{}  {:<12} {}/{}  {}",
            summary.id.to_string().dimmed(),
            summary.phase.to_string().cyan(),
            summary.completed_tasks,
            summary.task_count,
            summary.original_request
        );
    }
    Ok(())
}

async fn load(project: &Path, id: Uuid) -> Result<ExecutionPlan> {
    match FileWorkflowStore::new(project).load_workflow(id).await? {
        Some(plan) => Ok(plan),
        None => bail!("Workflow {} not found", id),
    }
}

async fn show(project: &Path, id: Uuid) -> Result<()> {
    let plan = load(project, id).await?;
    let progress = task_graph::progress(&plan);

    println!();
    println!("{}", plan.original_request.bold());
    println!("Phase:     {}", plan.phase.to_string().cyan());
    println!(
        "Progress:  {}/{} ({}%), {} failed",
        progress.completed, progress.total, progress.percentage, progress.failed
    );
    println!(
        "Revisions: {}/{}",
        plan.metadata.total_revisions, plan.metadata.max_revisions
    );
    println!();

    for task in &plan.tasks {
        println!(
            "  {} [{}] {} {}",
            status_icon(task.status),
            task.id,
            task.title,
            format!("({})", task.priority.as_str()).dimmed()
        );
        if !task.dependencies.is_empty() {
            println!("      depends on: {}", task.dependencies.join(", "));
        }
        if let Some(notes) = &task.revision_notes {
            for line in notes.lines() {
                println!("      {} {}", "!".yellow(), line);
            }
        }
    }

    for revision in plan.unresolved_revisions() {
        println!();
        println!("{} {}", "Open revision:".yellow(), revision.review_feedback);
    }
    println!();
    Ok(())
}

fn status_icon(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Pending => "○".normal(),
        TaskStatus::InProgress => "◐".blue(),
        TaskStatus::Completed => "●".green(),
        TaskStatus::Failed => "✗".red(),
        TaskStatus::NeedsRevision => "◑".yellow(),
        TaskStatus::Skipped => "–".dimmed(),
    }
}

async fn abort(project: &Path, id: Uuid, reason: &str) -> Result<()> {
    let mut manager = WorkflowManager::new(Arc::new(FileWorkflowStore::new(project)));
    if manager.resume_workflow(id).await?.is_none() {
        bail!("Workflow {} not found", id);
    }
    manager.abort_workflow(reason).await?;
    debug!(plan_id = %id, "Abort persisted");
    println!("Aborted {}: {}", id, reason);
    Ok(())
}

async fn parse_plan(file: &Path) -> Result<()> {
    let text = read(file).await?;
    match ResponseParser::parse_planning_response(&text) {
        Ok(parsed) => {
            println!("{} {} tasks", "ok".green(), parsed.tasks.len());
            println!("{}", serde_json::to_string_pretty(&parsed.tasks)?);
            Ok(())
        }
        Err(e) => bail!("Planning response rejected: {}", e),
    }
}

async fn parse_review(file: &Path) -> Result<()> {
    let text = read(file).await?;
    match ResponseParser::parse_review_response(&text) {
        Ok(review) => {
            let verdict = if review.approved {
                "approved".green()
            } else {
                "rejected".red()
            };
            println!("{} ({} failing tasks)", verdict, review.failing_feedback().count());
            println!("{}", serde_json::to_string_pretty(&review)?);
            Ok(())
        }
        Err(e) => bail!("Review response rejected: {}", e),
    }
}

async fn budget(project: &Path, max: usize, model: Option<&str>, file: &Path) -> Result<()> {
    let messages: Vec<Message> = serde_json::from_str(&read(file).await?)
        .with_context(|| format!("Expected a JSON array of messages in {}", file.display()))?;
    let config = ProjectConfig::read(project).await;
    let manager =
        ContextBudgetManager::for_model(model.unwrap_or_default(), max).with_config(config.context);

    let usage = manager.usage(&messages);
    let status = match usage.status {
        ContextStatus::Normal => "normal".green(),
        ContextStatus::Warning => "warning".yellow(),
        ContextStatus::Critical => "critical".red(),
    };
    println!(
        "{} tokens of {} ({}%), {}",
        usage.total_tokens, usage.max_tokens, usage.percent_used, status
    );

    let pruned = manager.prune(&messages);
    if pruned.pruned {
        println!(
            "Pruning would drop {} of {} messages",
            pruned.removed_count,
            messages.len()
        );
    }
    Ok(())
}

async fn read(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "triad=info,orchestrator=info".into()),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["triad", "budget", "--max", "8192", "messages.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Budget { max: 8192, model: None, .. }));

        let cli = Cli::try_parse_from(["triad", "budget", "--max", "1", "--model", "gpt-4o", "m.json"]).unwrap();
        match cli.command {
            Commands::Budget { model, .. } => assert_eq!(model.as_deref(), Some("gpt-4o")),
            _ => panic!("expected budget"),
        }
        assert_eq!(cli.project, PathBuf::from("."));

        let id = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["triad", "-p", "/tmp/x", "abort", id.as_str()]).unwrap();
        match cli.command {
            Commands::Abort { reason, .. } => assert_eq!(reason, "Aborted from CLI"),
            _ => panic!("expected abort"),
        }
    }

    #[tokio::test]
    async fn test_init_then_abort_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        init_project(temp_dir.path()).await.unwrap();

        let config = ProjectConfig::read(temp_dir.path()).await;
        let workflow = config.workflow.clone().unwrap();
        assert_eq!(config.providers.len(), 1);

        let store = Arc::new(FileWorkflowStore::new(temp_dir.path()));
        let mut manager = WorkflowManager::new(store.clone());
        let plan = manager.start_workflow("Add login", &workflow, None).await.unwrap();

        abort(temp_dir.path(), plan.id, "stop").await.unwrap();
        let saved = store.load_workflow(plan.id).await.unwrap().unwrap();
        assert_eq!(saved.phase, triad_core::WorkflowPhase::Idle);

        assert!(abort(temp_dir.path(), Uuid::new_v4(), "x").await.is_err());
    }
}
