//! Error Types
//!
//! Errors raised while loading flows, evaluating expressions, resolving
//! composite tasks and driving executions.

use thiserror::Error;

use crate::workflow::validator::ValidationError;

/// An expression could not be evaluated against a variable scope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// The expression references a variable that does not exist.
    #[error("Unresolved reference '{0}'")]
    UnresolvedReference(String),

    /// The expression is not a well-formed template.
    #[error("Invalid expression '{expression}': {reason}")]
    Syntax { expression: String, reason: String },
}

/// The iteration value of an `each_*` task could not be turned into a list.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IterationError {
    /// Evaluating the declared value failed.
    #[error("Unable to evaluate iteration value: {0}")]
    Evaluation(#[from] EvaluationError),

    /// The evaluated value is not an array of scalars or objects.
    #[error("Invalid iteration value: {reason}")]
    Format { reason: String },
}

impl IterationError {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }
}

/// The resolver was called with a snapshot or definition it cannot trust.
///
/// These are contract violations by the caller; an executor should treat
/// them as fatal rather than retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    /// The parent task run is not part of the execution snapshot.
    #[error("Task run '{0}' is not part of the execution")]
    UnknownParent(String),

    /// Two task runs share the same identity under one parent.
    #[error("Duplicate task run for task '{task_id}' (parent: {parent:?}, value: {value:?})")]
    DuplicateTaskRun {
        parent: Option<String>,
        task_id: String,
        value: Option<String>,
    },

    /// A task run references a task the flow does not define.
    #[error("Task '{0}' is not defined in the flow")]
    UnknownTask(String),

    /// A leaf task was resolved as if it were a composite.
    #[error("Task '{0}' is not a flowable task")]
    NotFlowable(String),
}

/// A flow definition could not be loaded.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Failed to read flow file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse flow YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{}", join_lines(.0))]
    Validation(Vec<ValidationError>),

    #[error("Missing required input '{0}'")]
    MissingInput(String),
}

fn join_lines(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Persisting or loading an execution failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Execution store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Driving an execution failed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    /// Nothing is running, nothing can be scheduled and the flow is unresolved.
    #[error("Execution '{0}' stalled: no runnable task and no task in flight")]
    Stalled(String),

    #[error("Worker channel closed unexpectedly")]
    WorkerChannelClosed,
}
