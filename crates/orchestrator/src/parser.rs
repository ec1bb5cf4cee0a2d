//! Structured extraction from free-text model output.
//!
//! Planner and reviewer replies are prose with a JSON object somewhere inside. The
//! parser locates that object, then normalizes it field by field so that a sloppy
//! but recognizable reply still yields a usable plan or review. Failures are
//! returned as [`ParseError`] values so callers can re-prompt instead of aborting.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use triad_core::{
    CriterionResult, FeedbackSeverity, PlanContext, ReviewResult, RevisionTaskSpec,
    TaskDefinition, TaskPriority, TaskReviewFeedback, TaskStatus,
};

use crate::task_graph;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("No JSON object found in response")]
    NoJson,

    #[error("Invalid JSON in response: {0}")]
    InvalidJson(String),

    #[error("Response is missing {0}")]
    MissingField(&'static str),

    #[error("Task dependencies form a cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Tasks and optional context extracted from a planner reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningResponse {
    pub tasks: Vec<TaskDefinition>,
    pub context: Option<PlanContext>,
}

pub struct ResponseParser;

impl ResponseParser {
    pub fn parse_planning_response(text: &str) -> ParseResult<PlanningResponse> {
        let root = extract_object_with_key(text, Some("tasks"))?;

        let raw_tasks = root
            .get("tasks")
            .and_then(Value::as_array)
            .ok_or(ParseError::MissingField("a 'tasks' array"))?;

        let tasks: Vec<TaskDefinition> = raw_tasks
            .iter()
            .enumerate()
            .map(|(i, raw)| normalize_task(raw, i + 1))
            .collect();

        if let Some(cycle) = task_graph::find_cycle(&tasks) {
            warn!(cycle = ?cycle, "Planner produced cyclic task dependencies");
            return Err(ParseError::DependencyCycle(cycle));
        }

        let context = root.get("context").and_then(Value::as_object).map(normalize_context);

        debug!(task_count = tasks.len(), has_context = context.is_some(), "Parsed planning response");
        Ok(PlanningResponse { tasks, context })
    }

    pub fn parse_review_response(text: &str) -> ParseResult<ReviewResult> {
        let root = extract_object_with_key(text, Some("approved"))?;

        let approved = root
            .get("approved")
            .and_then(Value::as_bool)
            .ok_or(ParseError::MissingField("a boolean 'approved' field"))?;

        let task_feedback = array(&root, "taskFeedback")
            .iter()
            .filter_map(|raw| {
                let feedback = normalize_feedback(raw);
                if feedback.is_none() {
                    debug!("Skipping task feedback entry without taskId");
                }
                feedback
            })
            .collect();

        let revision_tasks = array(&root, "revisionTasks")
            .iter()
            .filter_map(Value::as_object)
            .map(normalize_revision_task)
            .collect();

        let quality_score = root
            .get("qualityScore")
            .and_then(Value::as_f64)
            .map(|score| score.clamp(0.0, 100.0));

        Ok(ReviewResult {
            approved,
            overall_feedback: string(&root, "overallFeedback").unwrap_or_default(),
            task_feedback,
            critical_issues: strings(&root, "criticalIssues"),
            revision_tasks,
            quality_score,
        })
    }

    /// Find the JSON object embedded in `text`.
    ///
    /// A fenced ```json block wins when present. Otherwise the balanced `{...}` spans
    /// are tried in order of their opening brace and the first one that parses as an
    /// object is returned, so trailing prose braces or a second object do not corrupt
    /// the first one.
    pub fn extract_json_object(text: &str) -> ParseResult<Map<String, Value>> {
        extract_object_with_key(text, None)
    }
}

/// Like [`ResponseParser::extract_json_object`], but an object carrying `key` at its
/// top level is preferred over an earlier one that lacks it.
fn extract_object_with_key(text: &str, key: Option<&str>) -> ParseResult<Map<String, Value>> {
    let wanted = |map: &Map<String, Value>| key.map_or(true, |k| map.contains_key(k));
    let mut fallback = None;

    if let Some(block) = fenced_json_block(text) {
        if let Ok(Value::Object(map)) = serde_json::from_str(block) {
            if wanted(&map) {
                return Ok(map);
            }
            fallback = Some(map);
        }
    }

    let mut last_error = None;
    for (start, end) in balanced_object_spans(text) {
        match serde_json::from_str::<Value>(&text[start..=end]) {
            Ok(Value::Object(map)) => {
                if wanted(&map) {
                    return Ok(map);
                }
                fallback.get_or_insert(map);
            }
            Ok(_) => {}
            Err(e) => {
                last_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    if let Some(map) = fallback {
        return Ok(map);
    }
    match last_error {
        Some(e) => Err(ParseError::InvalidJson(e)),
        None if text.contains('{') => Err(ParseError::InvalidJson(
            "unbalanced braces".to_string(),
        )),
        None => Err(ParseError::NoJson),
    }
}

/// Body of the first ```json fence whose content looks like an object.
fn fenced_json_block(text: &str) -> Option<&str> {
    const FENCE: &str = "```json";
    text.match_indices(FENCE).find_map(|(idx, _)| {
        let start = idx + FENCE.len();
        let end = text[start..].find("```")?;
        let body = text[start..start + end].trim();
        body.starts_with('{').then_some(body)
    })
}

/// Byte ranges of every balanced `{...}` span, ordered by opening brace.
///
/// One pass with a stack of open positions. String and escape state is tracked only
/// inside a span, so quotes in surrounding prose do not hide an object. Unclosed
/// braces are left on the stack and never produce a span.
fn balanced_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut open = Vec::new();
    let mut spans = Vec::new();
    let mut in_str = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices() {
        if in_str {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '"' => in_str = false,
                '\\' => escape = true,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if !open.is_empty() => in_str = true,
            '{' => open.push(idx),
            '}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, idx));
                }
            }
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    spans
}

fn normalize_task(raw: &Value, index: usize) -> TaskDefinition {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    TaskDefinition {
        id: string(obj, "id").unwrap_or_else(|| format!("task-{}", index)),
        title: string(obj, "title").unwrap_or_else(|| format!("Task {}", index)),
        description: string(obj, "description").unwrap_or_default(),
        acceptance_criteria: strings(obj, "acceptanceCriteria"),
        target_files: strings(obj, "targetFiles"),
        approach: string(obj, "approach").unwrap_or_default(),
        dependencies: strings(obj, "dependencies"),
        priority: priority(obj).unwrap_or(TaskPriority::Medium),
        status: TaskStatus::Pending,
        attempts: 0,
        result: None,
        revision_notes: None,
    }
}

fn normalize_context(obj: &Map<String, Value>) -> PlanContext {
    PlanContext {
        relevant_files: strings(obj, "relevantFiles"),
        codebase_notes: string(obj, "codebaseNotes").unwrap_or_default(),
        existing_patterns: strings(obj, "existingPatterns"),
        potential_risks: strings(obj, "potentialRisks"),
    }
}

fn normalize_feedback(raw: &Value) -> Option<TaskReviewFeedback> {
    let obj = raw.as_object()?;
    let task_id = string(obj, "taskId")?;

    let criteria_results = array(obj, "criteriaResults")
        .iter()
        .filter_map(Value::as_object)
        .map(|c| CriterionResult {
            criterion: string(c, "criterion").unwrap_or_default(),
            met: c.get("met").and_then(Value::as_bool).unwrap_or(false),
            notes: string(c, "notes"),
        })
        .collect();

    Some(TaskReviewFeedback {
        task_id,
        passed: obj.get("passed").and_then(Value::as_bool).unwrap_or(false),
        criteria_results,
        issues: strings(obj, "issues"),
        suggestions: strings(obj, "suggestions"),
        severity: obj
            .get("severity")
            .and_then(Value::as_str)
            .and_then(FeedbackSeverity::parse)
            .unwrap_or(FeedbackSeverity::Info),
    })
}

fn normalize_revision_task(obj: &Map<String, Value>) -> RevisionTaskSpec {
    RevisionTaskSpec {
        id: string(obj, "id"),
        title: string(obj, "title"),
        description: string(obj, "description"),
        acceptance_criteria: strings(obj, "acceptanceCriteria"),
        target_files: strings(obj, "targetFiles"),
        approach: string(obj, "approach"),
        dependencies: strings(obj, "dependencies"),
        priority: priority(obj),
    }
}

fn priority(obj: &Map<String, Value>) -> Option<TaskPriority> {
    obj.get("priority")
        .and_then(Value::as_str)
        .and_then(|p| TaskPriority::parse(&p.to_lowercase()))
}

fn array<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    obj.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Non-empty string value; numbers are accepted since models often emit numeric ids.
fn string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    scalar_to_string(obj.get(key)?)
}

fn strings(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    array(obj, key).iter().filter_map(scalar_to_string).collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_planning_with_prose_prefix() {
        let parsed = ResponseParser::parse_planning_response(
            "Here is the plan:\n{\"tasks\":[{\"title\":\"Add auth\"}]}",
        )
        .unwrap();

        assert_eq!(parsed.tasks.len(), 1);
        let task = &parsed.tasks[0];
        assert_eq!(task.id, "task-1");
        assert_eq!(task.title, "Add auth");
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.acceptance_criteria.is_empty());
        assert!(task.target_files.is_empty());
        assert!(task.dependencies.is_empty());
        assert!(parsed.context.is_none());
    }

    #[test]
    fn test_parse_planning_defaults_and_priority() {
        let text = r#"{"tasks":[
            {"id":"setup","title":"Setup","priority":"CRITICAL","status":"completed","attempts":4},
            {"priority":"urgent","dependencies":["setup", 7, null]}
        ]}"#;
        let parsed = ResponseParser::parse_planning_response(text).unwrap();

        assert_eq!(parsed.tasks[0].priority, TaskPriority::Critical);
        assert_eq!(parsed.tasks[0].status, TaskStatus::Pending);
        assert_eq!(parsed.tasks[0].attempts, 0);
        assert_eq!(parsed.tasks[1].id, "task-2");
        assert_eq!(parsed.tasks[1].title, "Task 2");
        assert_eq!(parsed.tasks[1].priority, TaskPriority::Medium);
        assert_eq!(parsed.tasks[1].dependencies, vec!["setup", "7"]);
    }

    #[test]
    fn test_parse_planning_context() {
        let text = r#"```json
{"tasks":[],"context":{"relevantFiles":["src/lib.rs"],"codebaseNotes":"axum app","potentialRisks":"not a list"}}
```"#;
        let parsed = ResponseParser::parse_planning_response(text).unwrap();
        let context = parsed.context.unwrap();

        assert_eq!(context.relevant_files, vec!["src/lib.rs"]);
        assert_eq!(context.codebase_notes, "axum app");
        assert!(context.existing_patterns.is_empty());
        assert!(context.potential_risks.is_empty());
    }

    #[test]
    fn test_parse_planning_requires_tasks_array() {
        let err = ResponseParser::parse_planning_response(r#"{"steps":[]}"#).unwrap_err();
        assert_eq!(err, ParseError::MissingField("a 'tasks' array"));
    }

    #[test]
    fn test_parse_planning_rejects_cycles() {
        let text = r#"{"tasks":[
            {"id":"a","dependencies":["b"]},
            {"id":"b","dependencies":["a"]}
        ]}"#;
        match ResponseParser::parse_planning_response(text) {
            Err(ParseError::DependencyCycle(ids)) => {
                assert!(ids.contains(&"a".to_string()));
                assert!(ids.contains(&"b".to_string()));
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_planning_ignores_trailing_prose_braces() {
        let text = "Plan: {\"tasks\":[{\"title\":\"One\"}]} and then {we} are done }";
        let parsed = ResponseParser::parse_planning_response(text).unwrap();
        assert_eq!(parsed.tasks[0].title, "One");
    }

    #[test]
    fn test_extract_skips_unparseable_candidate() {
        let text = "Use {placeholder} syntax. Result: {\"approved\": true}";
        let map = ResponseParser::extract_json_object(text).unwrap();
        assert_eq!(map.get("approved"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_extract_handles_braces_inside_strings() {
        let text = r#"{"tasks":[{"title":"Handle } in names","description":"a \" quote {"}]}"#;
        let parsed = ResponseParser::parse_planning_response(text).unwrap();
        assert_eq!(parsed.tasks[0].title, "Handle } in names");
    }

    #[test]
    fn test_unclosed_braces_fail_fast() {
        let text = format!("{}no json here", "{".repeat(40_000));
        let started = std::time::Instant::now();

        let err = ResponseParser::parse_review_response(&text).unwrap_err();

        assert_eq!(err, ParseError::InvalidJson("unbalanced braces".to_string()));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_object_after_unclosed_prefix_is_found() {
        let text = format!("{} {{\"approved\": true}}", "{ if (x) ".repeat(5_000));
        let review = ResponseParser::parse_review_response(&text).unwrap();
        assert!(review.approved);
    }

    #[test]
    fn test_prefers_object_with_required_key() {
        let text = r#"Config stays {} and {"note": 1}. Plan: {"tasks":[{"title":"Real"}]}"#;
        let parsed = ResponseParser::parse_planning_response(text).unwrap();
        assert_eq!(parsed.tasks[0].title, "Real");

        let text = r#"Saw {"note": 1} first. Verdict: {"approved": false, "overallFeedback": "redo"}"#;
        let review = ResponseParser::parse_review_response(text).unwrap();
        assert!(!review.approved);
        assert_eq!(review.overall_feedback, "redo");
    }

    #[test]
    fn test_nested_object_with_required_key_is_used() {
        let text = r#"{"response": {"approved": true}}"#;
        assert!(ResponseParser::parse_review_response(text).unwrap().approved);
    }

    #[test]
    fn test_malformed_review() {
        let err = ResponseParser::parse_review_response("not json at all").unwrap_err();
        assert_eq!(err, ParseError::NoJson);
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_review_requires_boolean_approved() {
        let err = ResponseParser::parse_review_response(r#"{"approved":"yes"}"#).unwrap_err();
        assert_eq!(err, ParseError::MissingField("a boolean 'approved' field"));
    }

    #[test]
    fn test_review_invalid_json() {
        let err = ResponseParser::parse_review_response(r#"{"approved": true,}"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn test_parse_review_normalizes_feedback() {
        let text = r#"Review done.
{
  "approved": false,
  "overallFeedback": "Auth is incomplete",
  "taskFeedback": [
    {"taskId": "task-1", "passed": false, "issues": ["no tests"], "severity": "blocking",
     "criteriaResults": [{"criterion": "has tests", "met": false}]},
    {"taskId": "task-2", "passed": true, "severity": "catastrophic"},
    {"passed": false}
  ],
  "criticalIssues": ["token leak"],
  "revisionTasks": [{"id": "fix-1", "title": "Add tests", "priority": "low"}],
  "qualityScore": 140
}"#;
        let review = ResponseParser::parse_review_response(text).unwrap();

        assert!(!review.approved);
        assert_eq!(review.overall_feedback, "Auth is incomplete");
        assert_eq!(review.task_feedback.len(), 2);
        assert_eq!(review.task_feedback[0].severity, FeedbackSeverity::Blocking);
        assert_eq!(review.task_feedback[0].criteria_results[0].criterion, "has tests");
        assert!(review.task_feedback[0].suggestions.is_empty());
        assert_eq!(review.task_feedback[1].severity, FeedbackSeverity::Info);
        assert_eq!(review.critical_issues, vec!["token leak"]);
        assert_eq!(review.revision_tasks[0].priority, Some(TaskPriority::Low));
        assert_eq!(review.quality_score, Some(100.0));
    }
}
