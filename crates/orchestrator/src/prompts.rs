use triad_core::{ExecutionPlan, PlanContext, Role, TaskDefinition};

pub struct PhasePrompts;

impl PhasePrompts {
    pub fn system(role: Role) -> &'static str {
        match role {
            Role::Planner => {
                "You are a senior software architect. You break requests into small, \
                 dependency-ordered tasks and never write implementation code."
            }
            Role::Coder => {
                "You are a careful software engineer. You implement exactly one task at a \
                 time and report which files you touched."
            }
            Role::Reviewer => {
                "You are a strict code reviewer. You check each task against its acceptance \
                 criteria and answer only with the requested JSON."
            }
        }
    }

    pub fn planning(request: &str) -> String {
        format!(
            r#"Break the following request into implementation tasks.

## Request
{request}

## Required Output
Respond with a single JSON object inside a ```json block:

```json
{{
  "tasks": [
    {{
      "id": "task-1",
      "title": "Short imperative title",
      "description": "What needs to change",
      "acceptanceCriteria": ["Observable condition that proves it is done"],
      "targetFiles": ["path/to/file"],
      "approach": "How to implement it",
      "dependencies": ["ids of tasks that must finish first"],
      "priority": "critical | high | medium | low"
    }}
  ],
  "context": {{
    "relevantFiles": [],
    "codebaseNotes": "",
    "existingPatterns": [],
    "potentialRisks": []
  }}
}}
```

Dependencies must only reference ids from this list and must not form a cycle.
Do NOT implement anything yet."#,
            request = request
        )
    }

    pub fn implementation(task: &TaskDefinition, context: &PlanContext) -> String {
        let mut prompt = format!(
            r#"Implement the following task.

## Task
**Id:** {id}
**Title:** {title}
**Description:** {description}

## Acceptance Criteria
{criteria}

## Target Files
{files}
"#,
            id = task.id,
            title = task.title,
            description = task.description,
            criteria = bullets(&task.acceptance_criteria),
            files = bullets(&task.target_files),
        );

        if !task.approach.is_empty() {
            prompt.push_str(&format!("\n## Approach\n{}\n", task.approach));
        }

        if let Some(notes) = &task.revision_notes {
            prompt.push_str(&format!(
                "\n## Reviewer Feedback\nA previous attempt was rejected. Address every point:\n{}\n",
                notes
            ));
        }

        if !context.codebase_notes.is_empty() {
            prompt.push_str(&format!("\n## Codebase Notes\n{}\n", context.codebase_notes));
        }

        prompt.push_str(
            "\n## Instructions\n\
             1. Implement only this task\n\
             2. Keep changes consistent with existing patterns\n\
             3. Finish with a short summary of the files you changed\n",
        );
        prompt
    }

    pub fn review(plan: &ExecutionPlan) -> String {
        let tasks = plan
            .tasks
            .iter()
            .map(|task| {
                let summary = task
                    .result
                    .as_ref()
                    .map(|r| r.summary.as_str())
                    .unwrap_or("(no result recorded)");
                format!(
                    "### {id}: {title} [{status}]\nAcceptance criteria:\n{criteria}\nResult: {summary}",
                    id = task.id,
                    title = task.title,
                    status = task.status,
                    criteria = bullets(&task.acceptance_criteria),
                    summary = summary,
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            r#"Review the implementation of the following request.

## Request
{request}

## Tasks
{tasks}

## Required Output
Respond with a single JSON object inside a ```json block:

```json
{{
  "approved": true,
  "overallFeedback": "Summary of the review",
  "taskFeedback": [
    {{
      "taskId": "task-1",
      "passed": true,
      "criteriaResults": [{{"criterion": "...", "met": true, "notes": "..."}}],
      "issues": [],
      "suggestions": [],
      "severity": "blocking | warning | info"
    }}
  ],
  "criticalIssues": [],
  "revisionTasks": [],
  "qualityScore": 85
}}
```

Only approve when every acceptance criterion is met."#,
            request = plan.original_request,
            tasks = tasks
        )
    }
}

fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
