//! Executions and Task Runs
//!
//! An [`Execution`] is the append-only log of [`TaskRun`]s for one run of a
//! flow. The resolver only ever reads it; the executor appends to it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use log::debug;

use super::state::{State, StateType};

/// One runtime instance of a task within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    pub execution_id: String,
    pub task_id: String,

    /// The flowable task run that scheduled this run; `None` for root tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_run_id: Option<String>,

    /// Iteration value bound by an `each_*` parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Number of attempts already started
    #[serde(default)]
    pub attempts: u32,

    pub state: State,
}

impl TaskRun {
    pub fn new(
        execution_id: impl Into<String>,
        task_id: impl Into<String>,
        parent_task_run_id: Option<String>,
        value: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            task_id: task_id.into(),
            parent_task_run_id,
            value,
            attempts: 0,
            state: State::new(),
        }
    }

    /// Returns true if this run was scheduled by `parent_id` for the given
    /// task and iteration value.
    pub fn is_for(&self, parent_id: Option<&str>, task_id: &str, value: Option<&str>) -> bool {
        self.parent_task_run_id.as_deref() == parent_id
            && self.task_id == task_id
            && self.value.as_deref() == value
    }

    pub fn is_terminal(&self) -> bool {
        self.state.current.is_terminal()
    }
}

/// One run of a flow: its inputs, task runs and overall state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub flow_id: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,

    /// Task runs in creation order
    #[serde(default)]
    pub task_runs: Vec<TaskRun>,

    pub state: State,
}

impl Execution {
    pub fn new(flow_id: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            inputs,
            task_runs: Vec::new(),
            state: State::new(),
        }
    }

    pub fn find_task_run(&self, id: &str) -> Option<&TaskRun> {
        self.task_runs.iter().find(|r| r.id == id)
    }

    pub fn find_task_run_mut(&mut self, id: &str) -> Option<&mut TaskRun> {
        self.task_runs.iter_mut().find(|r| r.id == id)
    }

    /// Runs scheduled directly by `parent_id` (`None` for the flow root).
    pub fn children_of<'e>(&'e self, parent_id: Option<&'e str>) -> impl Iterator<Item = &'e TaskRun> {
        self.task_runs
            .iter()
            .filter(move |r| r.parent_task_run_id.as_deref() == parent_id)
    }

    /// Appends a new CREATED task run unless one with the same identity
    /// (parent, task, value) already exists.
    ///
    /// Returns the new run, or `None` for a duplicate. Applying the same
    /// scheduling decision twice is therefore harmless.
    pub fn create_task_run(
        &mut self,
        parent_id: Option<&str>,
        task_id: &str,
        value: Option<&str>,
    ) -> Option<&TaskRun> {
        if self
            .task_runs
            .iter()
            .any(|r| r.is_for(parent_id, task_id, value))
        {
            debug!(
                "Skipping duplicate task run for '{}' (parent: {:?}, value: {:?})",
                task_id, parent_id, value
            );
            return None;
        }

        self.task_runs.push(TaskRun::new(
            self.id.clone(),
            task_id,
            parent_id.map(str::to_string),
            value.map(str::to_string),
        ));
        self.task_runs.last()
    }

    /// Moves a task run to a new state. Returns false if the run is unknown
    /// or already terminal.
    pub fn transition(&mut self, task_run_id: &str, next: StateType) -> bool {
        self.find_task_run_mut(task_run_id)
            .map(|run| run.state.transition(next))
            .unwrap_or(false)
    }

    /// Requests a kill: the execution moves to KILLING and every unfinished
    /// run without children is KILLED. Flowable runs then resolve as KILLED
    /// through the normal aggregation.
    pub fn kill(&mut self, is_flowable: impl Fn(&TaskRun) -> bool) {
        self.state.transition(StateType::Killing);
        for run in self.task_runs.iter_mut() {
            if !run.is_terminal() && !is_flowable(run) {
                run.state.transition(StateType::Killed);
            }
        }
    }

    pub fn is_killing(&self) -> bool {
        self.state.current == StateType::Killing
    }

    pub fn is_terminal(&self) -> bool {
        self.state.current.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_task_run() {
        let mut execution = Execution::new("flow", Map::new());
        let execution_id = execution.id.clone();
        let run = execution.create_task_run(None, "a", None).unwrap();

        assert_eq!(run.task_id, "a");
        assert_eq!(run.execution_id, execution_id);
        assert_eq!(run.state.current, StateType::Created);
    }

    #[test]
    fn test_create_task_run_deduplicates() {
        let mut execution = Execution::new("flow", Map::new());
        let parent = execution.create_task_run(None, "each", None).unwrap().id.clone();

        assert!(execution.create_task_run(Some(parent.as_str()), "t", Some("a")).is_some());
        assert!(execution.create_task_run(Some(parent.as_str()), "t", Some("a")).is_none());
        assert!(execution.create_task_run(Some(parent.as_str()), "t", Some("b")).is_some());
        assert!(execution.create_task_run(None, "t", Some("a")).is_some());
        assert_eq!(execution.task_runs.len(), 4);
    }

    #[test]
    fn test_children_of() {
        let mut execution = Execution::new("flow", Map::new());
        let parent = execution.create_task_run(None, "seq", None).unwrap().id.clone();
        execution.create_task_run(Some(parent.as_str()), "a", None);
        execution.create_task_run(Some(parent.as_str()), "b", None);

        assert_eq!(execution.children_of(Some(parent.as_str())).count(), 2);
        assert_eq!(execution.children_of(None).count(), 1);
    }

    #[test]
    fn test_transition() {
        let mut execution = Execution::new("flow", Map::new());
        let id = execution.create_task_run(None, "a", None).unwrap().id.clone();

        assert!(execution.transition(&id, StateType::Running));
        assert!(execution.transition(&id, StateType::Success));
        assert!(!execution.transition(&id, StateType::Failed));
        assert!(!execution.transition("unknown", StateType::Running));
    }

    #[test]
    fn test_kill_marks_leaf_runs() {
        let mut execution = Execution::new("flow", Map::new());
        let parent = execution.create_task_run(None, "seq", None).unwrap().id.clone();
        let leaf = execution.create_task_run(Some(parent.as_str()), "a", None).unwrap().id.clone();

        execution.kill(|run| run.task_id == "seq");

        assert!(execution.is_killing());
        assert_eq!(execution.find_task_run(&leaf).unwrap().state.current, StateType::Killed);
        assert_eq!(execution.find_task_run(&parent).unwrap().state.current, StateType::Created);
    }

    #[test]
    fn test_execution_serialization_roundtrip() {
        let mut execution = Execution::new("flow", Map::new());
        execution.create_task_run(None, "a", Some("x"));

        let json = serde_json::to_string(&execution).unwrap();
        let loaded: Execution = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, execution);
    }
}
