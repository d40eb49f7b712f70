//! Outcome Aggregation
//!
//! Folds the child runs of a composite into the composite's own terminal
//! state, or reports that it is not resolved yet.

use log::debug;

use super::binding::{ChildRuns, RunnableBinding};
use crate::error::ResolutionError;
use crate::runtime::{worst_state, Execution, StateType, TaskRun};

/// Computes the terminal state of the composite run `parent` (`None` for
/// the flow root), or `None` while it is still in progress.
///
/// Only normal children count toward the state. Error tasks delay the
/// resolution until they are done but never change its result, so a
/// handled failure still resolves as FAILED.
pub fn resolve(
    bindings: &[RunnableBinding<'_>],
    errors: &[RunnableBinding<'_>],
    execution: &Execution,
    parent: Option<&TaskRun>,
) -> Result<Option<StateType>, ResolutionError> {
    let runs = ChildRuns::collect(execution, parent)?;

    if bindings.is_empty() {
        return Ok(Some(StateType::Success));
    }

    let started: Vec<&TaskRun> = bindings.iter().filter_map(|b| runs.get(b)).collect();
    if started.iter().any(|run| !run.is_terminal()) {
        return Ok(None);
    }

    let final_state = worst_state(started.iter().map(|run| run.state.current));

    if started.iter().any(|run| run.state.current.is_failed()) {
        // Unstarted error tasks are skipped once a kill was requested
        let handled = errors.iter().all(|b| match runs.get(b) {
            Some(run) => run.is_terminal(),
            None => execution.is_killing(),
        });
        debug!(
            "Composite {:?} failed, error branch done: {}",
            parent.map(|p| p.task_id.as_str()),
            handled
        );
        return Ok(handled.then_some(final_state));
    }

    if started.len() == bindings.len() {
        Ok(Some(final_state))
    } else {
        Ok(None)
    }
}
