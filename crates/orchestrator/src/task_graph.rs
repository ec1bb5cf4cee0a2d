//! Dependency resolution over a plan's tasks.

use std::collections::{HashMap, VecDeque};

use triad_core::{ExecutionPlan, TaskDefinition, TaskProgress, TaskStatus};

/// A task is runnable when it is pending and every dependency names an existing,
/// completed task. Unknown dependency ids are never satisfied.
pub fn can_execute(task: &TaskDefinition, all_tasks: &[TaskDefinition]) -> bool {
    task.status == TaskStatus::Pending && unmet_dependencies(task, all_tasks).is_empty()
}

pub fn unmet_dependencies(task: &TaskDefinition, all_tasks: &[TaskDefinition]) -> Vec<String> {
    task.dependencies
        .iter()
        .filter(|dep| {
            !all_tasks
                .iter()
                .any(|t| &t.id == *dep && t.status == TaskStatus::Completed)
        })
        .cloned()
        .collect()
}

/// First runnable task in plan order.
pub fn next_task(plan: &ExecutionPlan) -> Option<&TaskDefinition> {
    plan.tasks.iter().find(|t| can_execute(t, &plan.tasks))
}

pub fn progress(plan: &ExecutionPlan) -> TaskProgress {
    let total = plan.tasks.len();
    let completed = plan.count_with_status(TaskStatus::Completed);
    let failed = plan.count_with_status(TaskStatus::Failed);
    let percentage = if total == 0 {
        0
    } else {
        (100.0 * completed as f64 / total as f64).round() as u32
    };

    TaskProgress {
        completed,
        failed,
        total,
        percentage,
    }
}

pub fn all_complete(tasks: &[TaskDefinition]) -> bool {
    tasks.iter().all(|t| t.status.is_done())
}

/// Ids of tasks caught in a dependency cycle, in plan order, or `None` for a DAG.
///
/// Runs Kahn's algorithm over edges between known tasks; whatever cannot be peeled
/// off is on (or downstream of) a cycle. Dependencies on unknown ids are ignored here.
pub fn find_cycle(tasks: &[TaskDefinition]) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            if let Some(&d) = index.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    while let Some(i) = queue.pop_front() {
        visited += 1;
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if visited == tasks.len() {
        return None;
    }

    Some(
        tasks
            .iter()
            .zip(in_degree)
            .filter(|(_, degree)| *degree > 0)
            .map(|(t, _)| t.id.clone())
            .collect(),
    )
}
