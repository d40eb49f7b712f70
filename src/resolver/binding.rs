//! Runnable Bindings
//!
//! A binding pairs a task with the iteration value it runs for. It is the
//! unit the resolver schedules, and its identity (task id, value) is what a
//! task run is matched against.

use std::collections::HashMap;

use crate::error::ResolutionError;
use crate::runtime::{Execution, TaskRun};
use crate::workflow::Task;

/// A task paired with an optional iteration value.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnableBinding<'a> {
    pub task: &'a Task,
    pub value: Option<String>,
}

impl<'a> RunnableBinding<'a> {
    pub fn new(task: &'a Task, value: Option<String>) -> Self {
        Self { task, value }
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// One binding per enabled task, in declaration order, without value.
pub fn static_bindings(tasks: &[Task]) -> Vec<RunnableBinding<'_>> {
    tasks
        .iter()
        .filter(|task| !task.disabled)
        .map(|task| RunnableBinding::new(task, None))
        .collect()
}

/// The task runs scheduled by one parent, checked for consistency.
///
/// Indexed by `(task_id, value)`, the identity of a run under its parent.
#[derive(Debug)]
pub struct ChildRuns<'e> {
    runs: HashMap<(&'e str, Option<&'e str>), &'e TaskRun>,
}

impl<'e> ChildRuns<'e> {
    /// Collects the runs scheduled by `parent` (`None` for the flow root).
    ///
    /// Fails if the parent is not part of the execution or if two runs share
    /// the same identity.
    pub fn collect(
        execution: &'e Execution,
        parent: Option<&'e TaskRun>,
    ) -> Result<Self, ResolutionError> {
        if let Some(parent) = parent {
            let known = execution
                .find_task_run(&parent.id)
                .is_some_and(|run| run.execution_id == execution.id);
            if !known {
                return Err(ResolutionError::UnknownParent(parent.id.clone()));
            }
        }

        let parent_id = parent.map(|p| p.id.as_str());
        let mut runs = HashMap::new();
        for run in execution.children_of(parent_id) {
            let key = (run.task_id.as_str(), run.value.as_deref());
            if runs.insert(key, run).is_some() {
                return Err(ResolutionError::DuplicateTaskRun {
                    parent: parent_id.map(str::to_string),
                    task_id: run.task_id.clone(),
                    value: run.value.clone(),
                });
            }
        }

        Ok(Self { runs })
    }

    /// The run matching a binding, if it was already created.
    pub fn get(&self, binding: &RunnableBinding<'_>) -> Option<&'e TaskRun> {
        self.runs.get(&(binding.task_id(), binding.value())).copied()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Returns true if the binding has a run in a terminal state.
    pub fn is_terminal(&self, binding: &RunnableBinding<'_>) -> bool {
        self.get(binding).is_some_and(TaskRun::is_terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_static_bindings_skip_disabled() {
        let tasks = vec![
            Task::log("a", "a"),
            Task::log("b", "b").disabled(),
            Task::log("c", "c"),
        ];
        let bindings = static_bindings(&tasks);
        let ids: Vec<&str> = bindings.iter().map(|b| b.task_id()).collect();

        assert_eq!(ids, vec!["a", "c"]);
        assert!(bindings.iter().all(|b| b.value.is_none()));
    }

    #[test]
    fn test_child_runs_match_by_value() {
        let task = Task::log("t", "t");
        let mut execution = Execution::new("flow", Map::new());
        let parent_id = execution.create_task_run(None, "each", None).unwrap().id.clone();
        execution.create_task_run(Some(parent_id.as_str()), "t", Some("a"));

        let parent = execution.find_task_run(&parent_id).unwrap();
        let runs = ChildRuns::collect(&execution, Some(parent)).unwrap();

        assert!(runs.get(&RunnableBinding::new(&task, Some("a".into()))).is_some());
        assert!(runs.get(&RunnableBinding::new(&task, Some("b".into()))).is_none());
        assert!(runs.get(&RunnableBinding::new(&task, None)).is_none());
    }

    #[test]
    fn test_child_runs_index_large_fanout() {
        let task = Task::log("t", "t");
        let mut execution = Execution::new("flow", Map::new());
        let parent_id = execution.create_task_run(None, "each", None).unwrap().id.clone();
        for i in 0..500 {
            let value = i.to_string();
            execution.create_task_run(Some(parent_id.as_str()), "t", Some(value.as_str()));
        }

        let parent = execution.find_task_run(&parent_id).unwrap();
        let runs = ChildRuns::collect(&execution, Some(parent)).unwrap();

        assert_eq!(runs.len(), 500);
        let run = runs.get(&RunnableBinding::new(&task, Some("499".into()))).unwrap();
        assert_eq!(run.value.as_deref(), Some("499"));
        assert!(runs.get(&RunnableBinding::new(&task, Some("500".into()))).is_none());
    }

    #[test]
    fn test_child_runs_empty_at_root() {
        let execution = Execution::new("flow", Map::new());
        assert!(ChildRuns::collect(&execution, None).unwrap().is_empty());
    }

    #[test]
    fn test_child_runs_reject_duplicates() {
        let mut execution = Execution::new("flow", Map::new());
        execution.create_task_run(None, "a", None);
        let mut duplicate = execution.task_runs[0].clone();
        duplicate.id = "other".to_string();
        execution.task_runs.push(duplicate);

        let err = ChildRuns::collect(&execution, None).unwrap_err();
        assert!(matches!(err, ResolutionError::DuplicateTaskRun { .. }));
    }

    #[test]
    fn test_child_runs_reject_unknown_parent() {
        let execution = Execution::new("flow", Map::new());
        let stranger = TaskRun::new("other-execution", "seq", None, None);

        let err = ChildRuns::collect(&execution, Some(&stranger)).unwrap_err();
        assert_eq!(err, ResolutionError::UnknownParent(stranger.id.clone()));
    }
}
