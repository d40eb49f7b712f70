//! Next-Runnable Resolution
//!
//! Decides which bindings of a composite may be started now, given the task
//! runs already recorded in the execution.
//!
//! - Sequential: the first binding without a run, once its predecessor is done
//! - Parallel: every binding without a run, up to the concurrency limit
//! - Error branch: once a child failed, error tasks one at a time
//!
//! Nothing here mutates the execution; the caller creates the runs.

use std::collections::HashSet;

use log::debug;

use super::binding::{ChildRuns, RunnableBinding};
use super::{Concurrency, Policy};
use crate::error::ResolutionError;
use crate::runtime::{Execution, TaskRun};

/// Returns the bindings to start next for the composite run `parent`
/// (`None` for the flow root).
///
/// `bindings` are the composite's normal children, `errors` its error
/// branch, both already expanded.
pub fn next_runnables<'a>(
    policy: Policy,
    bindings: &[RunnableBinding<'a>],
    errors: &[RunnableBinding<'a>],
    execution: &Execution,
    parent: Option<&TaskRun>,
) -> Result<Vec<RunnableBinding<'a>>, ResolutionError> {
    let runs = ChildRuns::collect(execution, parent)?;

    if execution.is_killing() {
        debug!("Execution {} is being killed, nothing to schedule", execution.id);
        return Ok(Vec::new());
    }

    let nexts = if error_branch_active(bindings, errors, &runs) {
        debug!(
            "Error branch active under {:?} ({} error tasks)",
            parent.map(|p| p.task_id.as_str()),
            errors.len()
        );
        select(Policy::ErrorHandler, errors, &runs)
    } else {
        select(policy, bindings, &runs)
    };

    debug!(
        "Next runnables under {:?}: {:?}",
        parent.map(|p| p.task_id.as_str()),
        nexts.iter().map(|b| (b.task_id(), b.value())).collect::<Vec<_>>()
    );
    Ok(nexts)
}

/// A normal child failed, or the error branch was already entered.
fn error_branch_active(
    bindings: &[RunnableBinding<'_>],
    errors: &[RunnableBinding<'_>],
    runs: &ChildRuns<'_>,
) -> bool {
    bindings
        .iter()
        .filter_map(|b| runs.get(b))
        .any(|run| run.state.current.is_failed())
        || errors.iter().any(|b| runs.get(b).is_some())
}

fn select<'a>(
    policy: Policy,
    bindings: &[RunnableBinding<'a>],
    runs: &ChildRuns<'_>,
) -> Vec<RunnableBinding<'a>> {
    match policy {
        Policy::Sequential | Policy::ErrorHandler => {
            let Some(index) = bindings.iter().position(|b| runs.get(b).is_none()) else {
                return Vec::new();
            };
            if index > 0 && !runs.is_terminal(&bindings[index - 1]) {
                return Vec::new();
            }
            vec![bindings[index].clone()]
        }
        Policy::Parallel(concurrency) => {
            let mut scheduled = HashSet::new();
            let pending = bindings
                .iter()
                .filter(|b| runs.get(b).is_none())
                .filter(move |b| scheduled.insert((b.task_id(), b.value())))
                .cloned();
            match concurrency {
                Concurrency::Unbounded => pending.collect(),
                Concurrency::Limit(limit) => {
                    // Repeated bindings share a run; count it once
                    let active = bindings
                        .iter()
                        .filter_map(|b| runs.get(b))
                        .filter(|run| !run.is_terminal())
                        .map(|run| run.id.as_str())
                        .collect::<HashSet<_>>()
                        .len();
                    pending.take(limit.get().saturating_sub(active)).collect()
                }
            }
        }
    }
}
