//! Flow Validation
//!
//! Checks a flow definition before anything is resolved:
//! - The flow has an id and at least one task
//! - Task ids are well formed and unique across the whole tree
//! - Leaf tasks have something to do
//! - Composite tasks have children and a usable iteration value
//! - `taskrun.value` is only used where an iteration value is bound

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::{Flow, IterationSpec, Task, TaskKind};
use crate::error::FlowError;
use crate::template::ITERATION_VALUE_PATH;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyFlow,
    EmptyFlowId,
    EmptyTaskId,
    InvalidTaskId(String),
    DuplicateTaskId(String),
    EmptyInputName,
    DuplicateInput(String),
    EmptyCommand(String),
    EmptyFlowable(String),
    BlankIterationValue(String),
    UnboundIterationValue(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFlow => write!(f, "Flow has no tasks"),
            Self::EmptyFlowId => write!(f, "Flow has empty or whitespace-only ID"),
            Self::EmptyTaskId => write!(f, "Task has empty or whitespace-only ID"),
            Self::InvalidTaskId(id) => write!(
                f,
                "Task ID '{}' must start with a letter or digit and only contain letters, digits, '-' or '_'",
                id
            ),
            Self::DuplicateTaskId(id) => write!(f, "Duplicate task ID: '{}'", id),
            Self::EmptyInputName => write!(f, "Input has empty or whitespace-only name"),
            Self::DuplicateInput(name) => write!(f, "Duplicate input: '{}'", name),
            Self::EmptyCommand(id) => write!(f, "Task '{}' has no command specified", id),
            Self::EmptyFlowable(id) => write!(f, "Task '{}' has no child tasks", id),
            Self::BlankIterationValue(id) => write!(f, "Task '{}' has a blank iteration value", id),
            Self::UnboundIterationValue(id) => write!(
                f,
                "Task '{}' uses {} outside the children of an each_* task",
                id, ITERATION_VALUE_PATH
            ),
        }
    }
}

/// Validates the whole flow, reporting every problem at once.
pub fn validate_flow(flow: &Flow) -> Result<(), FlowError> {
    info!("Validating flow '{}' with {} root tasks", flow.id, flow.len());

    let errors = collect_errors(flow);
    if !errors.is_empty() {
        return Err(FlowError::Validation(errors));
    }

    info!("Flow '{}' validated: {} tasks", flow.id, flow.all_tasks().len());
    Ok(())
}

/// Returns every validation problem of the flow, in declaration order.
pub fn collect_errors(flow: &Flow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if flow.id.trim().is_empty() {
        errors.push(ValidationError::EmptyFlowId);
    }
    if flow.is_empty() {
        errors.push(ValidationError::EmptyFlow);
    }

    let mut input_names = HashSet::new();
    for input in &flow.inputs {
        if input.name.trim().is_empty() {
            errors.push(ValidationError::EmptyInputName);
        } else if !input_names.insert(input.name.as_str()) {
            errors.push(ValidationError::DuplicateInput(input.name.clone()));
        }
    }

    let mut seen_ids = HashSet::new();
    for task in flow.tasks.iter().chain(flow.errors.iter()) {
        validate_task(task, false, &mut seen_ids, &mut errors);
    }

    errors
}

/// Validates a task and its children.
fn validate_task<'a>(
    task: &'a Task,
    in_iteration: bool,
    seen_ids: &mut HashSet<&'a str>,
    errors: &mut Vec<ValidationError>,
) {
    if task.id.trim().is_empty() {
        errors.push(ValidationError::EmptyTaskId);
    } else if !is_valid_id(&task.id) {
        errors.push(ValidationError::InvalidTaskId(task.id.clone()));
    } else if !seen_ids.insert(task.id.as_str()) {
        errors.push(ValidationError::DuplicateTaskId(task.id.clone()));
    }

    if task.disabled {
        debug!("Task '{}' is disabled", task.id);
    }

    match &task.kind {
        TaskKind::Bash { command } => {
            if command.trim().is_empty() {
                errors.push(ValidationError::EmptyCommand(task.id.clone()));
            }
            check_iteration_value(task, command, in_iteration, errors);
        }
        TaskKind::Log { message } => check_iteration_value(task, message, in_iteration, errors),
        _ => {}
    }

    let Some(flowable) = task.as_flowable() else {
        return;
    };

    if flowable.tasks.is_empty() {
        errors.push(ValidationError::EmptyFlowable(task.id.clone()));
    }
    if let Some(IterationSpec::Expression(expression)) = flowable.value {
        if expression.trim().is_empty() {
            errors.push(ValidationError::BlankIterationValue(task.id.clone()));
        }
    }

    let iterating = in_iteration || flowable.is_dynamic();
    for child in flowable.tasks {
        validate_task(child, iterating, seen_ids, errors);
    }
    for child in flowable.errors {
        validate_task(child, in_iteration, seen_ids, errors);
    }
}

/// Error runs are created without a value, so only children of an
/// `each_*` task (or their descendants) can render `taskrun.value`.
fn check_iteration_value(
    task: &Task,
    text: &str,
    in_iteration: bool,
    errors: &mut Vec<ValidationError>,
) {
    if !in_iteration && text.contains(ITERATION_VALUE_PATH) {
        warn!(
            "Task '{}' uses {} outside of an each_* task",
            task.id, ITERATION_VALUE_PATH
        );
        errors.push(ValidationError::UnboundIterationValue(task.id.clone()));
    }
}

/// Ids start with a letter or digit, then letters, digits, '-' or '_'.
fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_flow() {
        let flow = Flow::new(
            "valid",
            vec![
                Task::bash("step1", "echo hello"),
                Task::each_parallel(
                    "fanout",
                    IterationSpec::Expression("{{ inputs.samples }}".to_string()),
                    vec![Task::log("say", "{{ taskrun.value }}")],
                    2,
                ),
            ],
        )
        .with_input("samples", None)
        .with_errors(vec![Task::log("on-failure", "failed")]);

        assert!(validate_flow(&flow).is_ok());
    }

    #[test]
    fn test_empty_flow() {
        let flow = Flow::new("empty", vec![]);
        let errors = collect_errors(&flow);
        assert_eq!(errors, vec![ValidationError::EmptyFlow]);
    }

    #[test]
    fn test_duplicate_ids_across_tree() {
        let flow = Flow::new(
            "dup",
            vec![
                Task::log("same", "1"),
                Task::sequential("group", vec![Task::log("same", "2")]),
            ],
        )
        .with_errors(vec![Task::log("group", "3")]);

        let errors = collect_errors(&flow);
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateTaskId("same".to_string()),
                ValidationError::DuplicateTaskId("group".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_task_id() {
        let flow = Flow::new("ids", vec![Task::log("has space", "x"), Task::log("-lead", "x")]);
        let errors = collect_errors(&flow);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, ValidationError::InvalidTaskId(_))));
    }

    #[test]
    fn test_empty_task_id() {
        let flow = Flow::new("ids", vec![Task::log("  ", "x")]);
        assert_eq!(collect_errors(&flow), vec![ValidationError::EmptyTaskId]);
    }

    #[test]
    fn test_empty_command() {
        let flow = Flow::new("cmd", vec![Task::bash("run", "  ")]);
        assert_eq!(
            collect_errors(&flow),
            vec![ValidationError::EmptyCommand("run".to_string())]
        );
    }

    #[test]
    fn test_empty_flowable_and_blank_value() {
        let flow = Flow::new(
            "composite",
            vec![
                Task::parallel("par", vec![], 0),
                Task::each_sequential(
                    "each",
                    IterationSpec::Expression(" ".to_string()),
                    vec![Task::log("a", "a")],
                ),
            ],
        );
        assert_eq!(
            collect_errors(&flow),
            vec![
                ValidationError::EmptyFlowable("par".to_string()),
                ValidationError::BlankIterationValue("each".to_string()),
            ]
        );
    }

    #[test]
    fn test_duplicate_input() {
        let flow = Flow::new("inputs", vec![Task::log("a", "a")])
            .with_input("x", None)
            .with_input("x", None)
            .with_input(" ", None);
        assert_eq!(
            collect_errors(&flow),
            vec![
                ValidationError::DuplicateInput("x".to_string()),
                ValidationError::EmptyInputName,
            ]
        );
    }

    #[test]
    fn test_validate_flow_reports_all() {
        let flow = Flow::new(" ", vec![Task::bash("a", ""), Task::log("a", "x")]);
        match validate_flow(&flow) {
            Err(FlowError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_iteration_value_in_error_branch_of_each() {
        let flow = Flow::new(
            "report",
            vec![Task::each_sequential(
                "each",
                IterationSpec::Values(vec![serde_json::json!("a")]),
                vec![Task::fail("boom")],
            )
            .with_errors(vec![Task::bash(
                "report",
                "echo failed for {{ taskrun.value }} > report.txt",
            )])],
        );

        assert_eq!(
            collect_errors(&flow),
            vec![ValidationError::UnboundIterationValue("report".to_string())]
        );
    }

    #[test]
    fn test_iteration_value_inside_nested_each() {
        let flow = Flow::new(
            "nested",
            vec![Task::each_parallel(
                "outer",
                IterationSpec::Expression("[1, 2]".to_string()),
                vec![Task::sequential("group", vec![Task::fail("boom")])
                    .with_errors(vec![Task::log("cleanup", "{{ taskrun.value }}")])],
                0,
            )],
        );

        assert!(collect_errors(&flow).is_empty());
    }

    #[test]
    fn test_iteration_value_at_root() {
        let flow = Flow::new("root", vec![Task::log("say", "{{ taskrun.value }}")]);
        assert_eq!(
            collect_errors(&flow),
            vec![ValidationError::UnboundIterationValue("say".to_string())]
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::EmptyFlow;
        assert_eq!(err.to_string(), "Flow has no tasks");

        let err = ValidationError::DuplicateTaskId("test".to_string());
        assert!(err.to_string().contains("test"));

        let err = ValidationError::EmptyFlowable("group".to_string());
        assert!(err.to_string().contains("group"));
    }
}
