//! Flow Execution Engine
//!
//! Drives one execution of a flow in-process:
//! - Resolution of the flow root and every open composite after each change
//! - Parallel dispatch of leaf task runs to worker threads
//! - Retries of failed leaf runs
//! - Kill requests via file-based signaling
//! - State persistence for crash recovery

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::Instant;

use log::{debug, error, info, warn};
use serde_json::{json, Map, Value};

use crate::error::{EngineError, ResolutionError, StoreError};
use crate::resolver::{resolve_composite, resolve_task_run, Decision};
use crate::runtime::{Execution, StateType, TaskRun};
use crate::template::{Evaluator, TemplateEvaluator, VariableScope};
use crate::workflow::{resolve_inputs, Flow, Task};

use super::store::ExecutionStore;
use super::worker::{execute, Action, WorkItem};

type Completion = (String, Result<(), String>);

/// Flow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::execution::Engine;
/// use flowrunner::load_flow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let flow = load_flow("pipeline.yaml")?;
///     let mut engine = Engine::new(flow);
///     engine.set_max_parallel(4);
///     engine.set_working_dir("/data/analysis");
///
///     let execution = engine.run()?;
///     println!("Finished as {:?}", execution.state.current);
///     Ok(())
/// }
/// ```
pub struct Engine {
    flow: Flow,
    evaluator: Box<dyn Evaluator>,
    inputs: Map<String, Value>,
    max_parallel: usize,
    dry_run: bool,
    fresh: bool,
    working_dir: Option<PathBuf>,
    store: Option<ExecutionStore>,
    kill_flag_path: Option<PathBuf>,
}

impl Engine {
    /// Creates a new engine for a flow, persisting to the default state
    /// directory and using one worker per CPU.
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            evaluator: Box::new(TemplateEvaluator),
            inputs: Map::new(),
            max_parallel: num_cpus::get(),
            dry_run: false,
            fresh: false,
            working_dir: None,
            store: Some(ExecutionStore::default()),
            kill_flag_path: None,
        }
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Sets the maximum number of leaf runs executing at once.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Ignores (and deletes) any stored unfinished execution.
    pub fn set_fresh(&mut self, fresh: bool) {
        self.fresh = fresh;
    }

    /// Sets the working directory for bash tasks.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Sets the directory executions are persisted to.
    pub fn set_state_dir(&mut self, dir: impl Into<PathBuf>) {
        self.store = Some(ExecutionStore::new(dir));
    }

    /// Disables persistence entirely.
    pub fn disable_persistence(&mut self) {
        self.store = None;
    }

    /// Sets a file whose presence requests a kill of the execution.
    pub fn set_kill_flag_path(&mut self, path: impl Into<PathBuf>) {
        self.kill_flag_path = Some(path.into());
    }

    pub fn set_evaluator(&mut self, evaluator: Box<dyn Evaluator>) {
        self.evaluator = evaluator;
    }

    /// Provides a value for a flow input, overriding its default.
    pub fn set_input(&mut self, name: impl Into<String>, value: Value) {
        self.inputs.insert(name.into(), value);
    }

    /// Runs the flow until its execution reaches a terminal state.
    ///
    /// A failed flow is not an error: the returned execution carries the
    /// FAILED state. Errors are reserved for problems that prevent the
    /// execution from being driven at all.
    pub fn run(&mut self) -> Result<Execution, EngineError> {
        let start_time = Instant::now();

        let mut execution = self.load_or_create()?;
        if execution.state.current == StateType::Created {
            execution.state.transition(StateType::Running);
        }

        info!(
            "Starting execution {} of flow '{}' (max parallel: {}, dry run: {})",
            execution.id, self.flow.id, self.max_parallel, self.dry_run
        );

        let (tx, rx): (Sender<Completion>, Receiver<Completion>) = channel();
        let mut in_flight: HashSet<String> = HashSet::new();

        loop {
            if self.resolve_until_stable(&mut execution)? {
                self.persist(&execution)?;
            }
            if execution.is_terminal() {
                break;
            }

            if self.kill_requested() && !execution.is_killing() {
                warn!("Kill requested for execution {}", execution.id);
                let flow = &self.flow;
                execution.kill(|run| is_flowable_run(flow, run));
                self.persist(&execution)?;
                continue;
            }

            let dispatched = self.dispatch(&mut execution, &mut in_flight, &tx)?;
            if dispatched {
                self.persist(&execution)?;
            }

            if in_flight.is_empty() {
                if dispatched {
                    continue;
                }
                error!("Execution {} cannot make progress", execution.id);
                self.persist(&execution)?;
                return Err(EngineError::Stalled(execution.id.clone()));
            }

            let (task_run_id, result) = rx.recv().map_err(|_| EngineError::WorkerChannelClosed)?;
            in_flight.remove(&task_run_id);
            self.complete(&mut execution, &task_run_id, result);
            self.persist(&execution)?;
        }

        info!(
            "Execution {} finished as {:?} in {:.2?}",
            execution.id,
            execution.state.current,
            start_time.elapsed()
        );

        if let Some(store) = &self.store {
            match execution.state.current {
                StateType::Success | StateType::Warning => store.delete(&self.flow.id)?,
                _ => store.save(&execution)?,
            }
        }

        Ok(execution)
    }

    /// Resumes the stored execution of the flow or starts a new one.
    fn load_or_create(&self) -> Result<Execution, EngineError> {
        if let Some(store) = &self.store {
            if self.fresh {
                store.delete(&self.flow.id)?;
            } else if let Some(execution) = self.load_stored(store)? {
                if !execution.is_terminal() {
                    info!(
                        "Resuming execution {} ({} task runs recorded)",
                        execution.id,
                        execution.task_runs.len()
                    );
                    return Ok(execution);
                }
                info!("Stored execution {} already finished, starting over", execution.id);
            }
        }

        let inputs = resolve_inputs(&self.flow, &self.inputs)?;
        info!("Starting fresh execution of flow '{}'", self.flow.id);
        Ok(Execution::new(self.flow.id.clone(), inputs))
    }

    /// Loads the stored execution. An unreadable snapshot is set aside and
    /// treated as absent.
    fn load_stored(&self, store: &ExecutionStore) -> Result<Option<Execution>, EngineError> {
        match store.load(&self.flow.id) {
            Err(StoreError::Serialization(e)) => {
                warn!("Stored execution of flow '{}' is unreadable: {}", self.flow.id, e);
                store.set_aside(&self.flow.id)?;
                Ok(None)
            }
            other => Ok(other?),
        }
    }

    /// Resolves the root and every open composite until nothing changes.
    ///
    /// Returns true if the execution was modified.
    fn resolve_until_stable(&self, execution: &mut Execution) -> Result<bool, EngineError> {
        let mut modified = false;

        loop {
            let mut changed = false;

            let open: Vec<TaskRun> = execution
                .task_runs
                .iter()
                .filter(|run| !run.is_terminal() && is_flowable_run(&self.flow, run))
                .cloned()
                .collect();

            for run in open {
                let scope = self.scope(execution, Some(&run));
                let decision = resolve_task_run(
                    &self.flow,
                    &run,
                    self.evaluator.as_ref(),
                    &scope,
                    execution,
                )?;

                if run.state.current == StateType::Created {
                    changed |= execution.transition(&run.id, StateType::Running);
                }
                changed |= apply(execution, Some(&run), &decision);
            }

            if !execution.is_terminal() {
                let scope = self.scope(execution, None);
                let decision = resolve_composite(
                    &self.flow.root(),
                    self.evaluator.as_ref(),
                    &scope,
                    execution,
                    None,
                )?;
                changed |= apply(execution, None, &decision);
            }

            if !changed {
                return Ok(modified);
            }
            modified = true;
        }
    }

    /// Sends every runnable leaf task run to a worker, up to the limit.
    ///
    /// Returns true if the execution was modified.
    fn dispatch(
        &self,
        execution: &mut Execution,
        in_flight: &mut HashSet<String>,
        tx: &Sender<Completion>,
    ) -> Result<bool, EngineError> {
        let pending: Vec<TaskRun> = execution
            .task_runs
            .iter()
            .filter(|run| {
                !run.is_terminal()
                    && !in_flight.contains(&run.id)
                    && !is_flowable_run(&self.flow, run)
            })
            .cloned()
            .collect();

        let mut modified = false;
        for run in pending {
            if in_flight.len() >= self.max_parallel {
                break;
            }

            let task = self
                .flow
                .find_task(&run.task_id)
                .ok_or_else(|| ResolutionError::UnknownTask(run.task_id.clone()))?;

            let scope = self.scope(execution, Some(&run));
            let action = match Action::render(task, self.evaluator.as_ref(), &scope) {
                Ok(Some(action)) => action,
                Ok(None) => continue,
                Err(e) => {
                    error!("Task '{}' could not be rendered: {}", run.task_id, e);
                    execution.transition(&run.id, StateType::Failed);
                    modified = true;
                    continue;
                }
            };

            if run.state.current != StateType::Running {
                execution.transition(&run.id, StateType::Running);
            }
            let attempt = match execution.find_task_run_mut(&run.id) {
                Some(stored) => {
                    stored.attempts += 1;
                    stored.attempts
                }
                None => continue,
            };
            modified = true;

            let item = WorkItem {
                task_run_id: run.id.clone(),
                task_id: run.task_id.clone(),
                value: run.value.clone(),
                attempt,
                action,
            };
            info!("Starting task: {} (attempt {})", item.label(), attempt);

            let tx = tx.clone();
            let working_dir = self.working_dir.clone();
            let dry_run = self.dry_run;
            thread::spawn(move || {
                let result = execute(&item, &working_dir, dry_run).map_err(|e| e.to_string());
                if let Err(e) = tx.send((item.task_run_id.clone(), result)) {
                    error!("Failed to send completion signal: {}", e);
                }
            });

            in_flight.insert(run.id);
        }

        Ok(modified)
    }

    /// Records the result of a worker, retrying the run if allowed.
    fn complete(&self, execution: &mut Execution, task_run_id: &str, result: Result<(), String>) {
        let Some(run) = execution.find_task_run(task_run_id) else {
            warn!("Completion for unknown task run {}", task_run_id);
            return;
        };
        let task_id = run.task_id.clone();
        let attempts = run.attempts;

        match result {
            Ok(()) => {
                info!("Task '{}' completed successfully", task_id);
                execution.transition(task_run_id, StateType::Success);
            }
            Err(e) => {
                let retries = self.flow.find_task(&task_id).map_or(0, |t| t.retries);
                if attempts <= retries && !execution.is_killing() {
                    warn!(
                        "Task '{}' failed (attempt {} of {}), retrying: {}",
                        task_id,
                        attempts,
                        retries + 1,
                        e
                    );
                    execution.transition(task_run_id, StateType::Retrying);
                } else {
                    error!("Task '{}' failed: {}", task_id, e);
                    execution.transition(task_run_id, StateType::Failed);
                }
            }
        }
    }

    /// Variables visible while resolving or rendering `run`.
    fn scope(&self, execution: &Execution, run: Option<&TaskRun>) -> VariableScope {
        let mut scope = VariableScope::new();
        scope.insert_path("flow.id", json!(self.flow.id));
        if let Some(namespace) = &self.flow.namespace {
            scope.insert_path("flow.namespace", json!(namespace));
        }
        scope.insert_path("execution.id", json!(execution.id));
        scope.insert_path("inputs", Value::Object(execution.inputs.clone()));

        let Some(run) = run else {
            return scope;
        };
        scope.insert_path("task.id", json!(run.task_id));
        scope.insert_path("taskrun.id", json!(run.id));
        scope.insert_path("taskrun.attempts", json!(run.attempts));

        match iteration_value(execution, run) {
            Some(value) => scope.with_iteration_value(value),
            None => scope,
        }
    }

    fn persist(&self, execution: &Execution) -> Result<(), EngineError> {
        if let Some(store) = &self.store {
            store.save(execution)?;
        }
        Ok(())
    }

    fn kill_requested(&self) -> bool {
        self.kill_flag_path.as_deref().is_some_and(Path::exists)
    }
}

/// Applies a decision: creates the next runs and records the terminal state
/// of the composite (`parent`, or the execution itself for the root).
///
/// Returns true if the execution was modified.
fn apply(execution: &mut Execution, parent: Option<&TaskRun>, decision: &Decision<'_>) -> bool {
    let mut changed = false;
    let parent_id = parent.map(|p| p.id.as_str());

    for binding in &decision.nexts {
        if let Some(run) = execution.create_task_run(parent_id, binding.task_id(), binding.value()) {
            debug!("Created task run {} for '{}'", run.id, run.task_id);
            changed = true;
        }
    }

    if let Some(error) = &decision.error {
        error!(
            "Task '{}' failed: {}",
            parent.map_or("<root>", |p| p.task_id.as_str()),
            error
        );
    }

    if let Some(state) = decision.state {
        changed |= match parent {
            Some(run) => {
                let recorded = execution.transition(&run.id, state);
                if recorded {
                    info!("Task '{}' resolved as {:?}", run.task_id, state);
                }
                recorded
            }
            None => execution.state.transition(state),
        };
    }

    changed
}

fn is_flowable_run(flow: &Flow, run: &TaskRun) -> bool {
    flow.find_task(&run.task_id).is_some_and(Task::is_flowable)
}

/// The iteration value bound to `run` or to its nearest ancestor.
fn iteration_value<'e>(execution: &'e Execution, run: &'e TaskRun) -> Option<&'e str> {
    let mut current = Some(run);
    while let Some(run) = current {
        if let Some(value) = &run.value {
            return Some(value);
        }
        current = run
            .parent_task_run_id
            .as_deref()
            .and_then(|id| execution.find_task_run(id));
    }
    None
}
