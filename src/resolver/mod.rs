//! Flowable Resolution
//!
//! The deterministic core of the engine. Given a composite task and the
//! current execution snapshot it answers two questions:
//!
//! - Which child bindings may start now ([`nexts`])
//! - Whether the composite itself is finished, and how ([`outcome`])
//!
//! Every function is pure: the same snapshot always gives the same
//! [`Decision`], so replaying a decision after a crash is harmless.

pub mod binding;
pub mod expander;
pub mod nexts;
pub mod outcome;

use std::num::NonZeroUsize;

use log::warn;

pub use binding::{static_bindings, ChildRuns, RunnableBinding};
pub use expander::{evaluate_iteration, expand, IterationSource};
pub use nexts::next_runnables;

use crate::error::{IterationError, ResolutionError};
use crate::runtime::{Execution, StateType, TaskRun};
use crate::template::{Evaluator, VariableScope};
use crate::workflow::{Flow, Flowable};

/// How the children of a composite are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// One child at a time, in declaration order
    Sequential,
    /// Children started together, up to a limit
    Parallel(Concurrency),
    /// Error tasks: one at a time, whatever the previous outcome
    ErrorHandler,
}

/// Maximum number of children of a parallel composite running at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Unbounded,
    Limit(NonZeroUsize),
}

impl From<usize> for Concurrency {
    /// `0` means no limit.
    fn from(limit: usize) -> Self {
        NonZeroUsize::new(limit).map_or(Self::Unbounded, Self::Limit)
    }
}

/// What to do next for one composite.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<'a> {
    /// Bindings to create task runs for
    pub nexts: Vec<RunnableBinding<'a>>,
    /// Terminal state of the composite, once resolved
    pub state: Option<StateType>,
    /// Set when the iteration value could not be evaluated
    pub error: Option<IterationError>,
}

impl Decision<'_> {
    fn failed(error: IterationError) -> Self {
        Self {
            nexts: Vec::new(),
            state: Some(StateType::Failed),
            error: Some(error),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_some()
    }
}

/// Resolves one composite: expands its children, picks the next bindings to
/// start and aggregates its state.
///
/// `parent` is the composite's own task run, `None` for the flow root.
/// Evaluation failures of the iteration value give a FAILED decision;
/// inconsistent snapshots are returned as errors.
pub fn resolve_composite<'a>(
    flowable: &Flowable<'a>,
    evaluator: &dyn Evaluator,
    scope: &VariableScope,
    execution: &Execution,
    parent: Option<&TaskRun>,
) -> Result<Decision<'a>, ResolutionError> {
    let bindings = match flowable.value {
        Some(spec) => match expand(evaluator, scope, spec, flowable.tasks) {
            Ok(bindings) => bindings,
            Err(error) => {
                warn!("Task '{}' failed to expand: {}", flowable.id, error);
                return Ok(Decision::failed(error));
            }
        },
        None => static_bindings(flowable.tasks),
    };
    let errors = static_bindings(flowable.errors);

    let nexts = next_runnables(flowable.policy, &bindings, &errors, execution, parent)?;
    let state = outcome::resolve(&bindings, &errors, execution, parent)?;

    Ok(Decision {
        nexts,
        state,
        error: None,
    })
}

/// Resolves the composite task behind `run`, looking its definition up in
/// the flow.
pub fn resolve_task_run<'a>(
    flow: &'a Flow,
    run: &TaskRun,
    evaluator: &dyn Evaluator,
    scope: &VariableScope,
    execution: &Execution,
) -> Result<Decision<'a>, ResolutionError> {
    let task = flow
        .find_task(&run.task_id)
        .ok_or_else(|| ResolutionError::UnknownTask(run.task_id.clone()))?;
    let flowable = task
        .as_flowable()
        .ok_or_else(|| ResolutionError::NotFlowable(run.task_id.clone()))?;

    resolve_composite(&flowable, evaluator, scope, execution, Some(run))
}
