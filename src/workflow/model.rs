//! Flow Data Model
//!
//! Core data structures representing flows and their (possibly nested) tasks.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: samples
//! inputs:
//!   - name: samples
//!     default: ["s1", "s2"]
//! tasks:
//!   - id: each-sample
//!     type: each_sequential
//!     value: "{{ inputs.samples }}"
//!     tasks:
//!       - id: align
//!         type: bash
//!         command: echo aligning {{ taskrun.value }}
//!     errors:
//!       - id: cleanup
//!         type: log
//!         message: alignment failed
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resolver::{Concurrency, Policy};

/// A complete flow definition: the root task list plus its error branch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Flow {
    /// Unique identifier of the flow
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared inputs, exposed to expressions as `inputs.<name>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,

    /// Root tasks, run sequentially
    pub tasks: Vec<Task>,

    /// Tasks run when a root task fails
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Task>,
}

/// A flow input with an optional default value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Input {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A single authored task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    /// Identifier, unique across the whole flow
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Disabled tasks are never scheduled
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,

    /// Extra attempts allowed after a failed leaf run
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retries: u32,

    #[serde(flatten)]
    pub kind: TaskKind,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// What a task does. Leaf kinds are run by a worker; the other kinds are
/// flowable and only schedule their children.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run a shell command
    Bash { command: String },
    /// Log a message
    Log { message: String },
    /// Always fail, optionally with a message
    Fail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Sequential(Sequential),
    Parallel(Parallel),
    EachSequential(EachSequential),
    EachParallel(EachParallel),
}

/// Children run one after another.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Sequential {
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Task>,
}

/// Children run concurrently, `concurrent` at a time (0 means no limit).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Parallel {
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Task>,
    #[serde(default)]
    pub concurrent: usize,
}

/// Children run once per iteration value, one at a time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EachSequential {
    pub value: IterationSpec,
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Task>,
}

/// Children run once per iteration value, concurrently.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EachParallel {
    pub value: IterationSpec,
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Task>,
    #[serde(default)]
    pub concurrent: usize,
}

/// The declared iteration value of an `each_*` task.
///
/// Either an expression that evaluates to a JSON array (or its text), or
/// a literal list whose string items are rendered individually.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum IterationSpec {
    Expression(String),
    Values(Vec<Value>),
}

/// Borrowed view of a flowable task, the unit the resolver works on.
#[derive(Debug, Clone, Copy)]
pub struct Flowable<'a> {
    pub id: &'a str,
    pub tasks: &'a [Task],
    pub errors: &'a [Task],
    /// Present only for iterating tasks
    pub value: Option<&'a IterationSpec>,
    pub policy: Policy,
}

impl Flowable<'_> {
    /// Returns true if children are only known once the value is evaluated.
    pub fn is_dynamic(&self) -> bool {
        self.value.is_some()
    }
}

impl Task {
    /// Creates a leaf task running a shell command.
    ///
    /// # Example
    ///
    /// ```
    /// use flowrunner::workflow::Task;
    ///
    /// let task = Task::bash("align", "echo aligning").with_retries(2);
    /// assert!(!task.is_flowable());
    /// ```
    pub fn bash(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            id,
            TaskKind::Bash {
                command: command.into(),
            },
        )
    }

    /// Creates a leaf task logging a message.
    pub fn log(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            id,
            TaskKind::Log {
                message: message.into(),
            },
        )
    }

    /// Creates a leaf task that always fails.
    pub fn fail(id: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Fail { message: None })
    }

    pub fn sequential(id: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self::new(
            id,
            TaskKind::Sequential(Sequential {
                tasks,
                errors: Vec::new(),
            }),
        )
    }

    pub fn parallel(id: impl Into<String>, tasks: Vec<Task>, concurrent: usize) -> Self {
        Self::new(
            id,
            TaskKind::Parallel(Parallel {
                tasks,
                errors: Vec::new(),
                concurrent,
            }),
        )
    }

    pub fn each_sequential(id: impl Into<String>, value: IterationSpec, tasks: Vec<Task>) -> Self {
        Self::new(
            id,
            TaskKind::EachSequential(EachSequential {
                value,
                tasks,
                errors: Vec::new(),
            }),
        )
    }

    pub fn each_parallel(
        id: impl Into<String>,
        value: IterationSpec,
        tasks: Vec<Task>,
        concurrent: usize,
    ) -> Self {
        Self::new(
            id,
            TaskKind::EachParallel(EachParallel {
                value,
                tasks,
                errors: Vec::new(),
                concurrent,
            }),
        )
    }

    fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into().trim().to_string(),
            description: None,
            disabled: false,
            retries: 0,
            kind,
        }
    }

    /// Sets the error branch of a flowable task. Ignored for leaf tasks.
    pub fn with_errors(mut self, errors: Vec<Task>) -> Self {
        match &mut self.kind {
            TaskKind::Sequential(t) => t.errors = errors,
            TaskKind::Parallel(t) => t.errors = errors,
            TaskKind::EachSequential(t) => t.errors = errors,
            TaskKind::EachParallel(t) => t.errors = errors,
            TaskKind::Bash { .. } | TaskKind::Log { .. } | TaskKind::Fail { .. } => {}
        }
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Returns true if this task schedules children instead of doing work.
    pub fn is_flowable(&self) -> bool {
        self.as_flowable().is_some()
    }

    /// Returns the flowable view of this task, if it has children.
    pub fn as_flowable(&self) -> Option<Flowable<'_>> {
        let (tasks, errors, value, policy) = match &self.kind {
            TaskKind::Sequential(t) => (&t.tasks, &t.errors, None, Policy::Sequential),
            TaskKind::Parallel(t) => (
                &t.tasks,
                &t.errors,
                None,
                Policy::Parallel(Concurrency::from(t.concurrent)),
            ),
            TaskKind::EachSequential(t) => {
                (&t.tasks, &t.errors, Some(&t.value), Policy::Sequential)
            }
            TaskKind::EachParallel(t) => (
                &t.tasks,
                &t.errors,
                Some(&t.value),
                Policy::Parallel(Concurrency::from(t.concurrent)),
            ),
            TaskKind::Bash { .. } | TaskKind::Log { .. } | TaskKind::Fail { .. } => return None,
        };

        Some(Flowable {
            id: &self.id,
            tasks,
            errors,
            value,
            policy,
        })
    }

    /// Short name of the task type, as written in YAML.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            TaskKind::Bash { .. } => "bash",
            TaskKind::Log { .. } => "log",
            TaskKind::Fail { .. } => "fail",
            TaskKind::Sequential(_) => "sequential",
            TaskKind::Parallel(_) => "parallel",
            TaskKind::EachSequential(_) => "each_sequential",
            TaskKind::EachParallel(_) => "each_parallel",
        }
    }

    /// Direct children, error branch included.
    fn children(&self) -> impl Iterator<Item = &Task> {
        self.as_flowable()
            .map(|f| f.tasks.iter().chain(f.errors.iter()))
            .into_iter()
            .flatten()
    }
}

impl Flow {
    /// Creates a flow from root tasks.
    pub fn new(id: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            namespace: None,
            description: None,
            inputs: Vec::new(),
            tasks,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<Task>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        self.inputs.push(Input {
            name: name.into(),
            default,
        });
        self
    }

    /// The root of the flow seen as a sequential flowable task.
    pub fn root(&self) -> Flowable<'_> {
        Flowable {
            id: &self.id,
            tasks: &self.tasks,
            errors: &self.errors,
            value: None,
            policy: Policy::Sequential,
        }
    }

    /// Finds a task anywhere in the flow, nested and error tasks included.
    pub fn find_task(&self, id: &str) -> Option<&Task> {
        let mut stack: Vec<&Task> = self.tasks.iter().chain(self.errors.iter()).collect();
        while let Some(task) = stack.pop() {
            if task.id == id {
                return Some(task);
            }
            stack.extend(task.children());
        }
        None
    }

    /// Returns every task of the flow in depth-first declaration order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        let mut out = Vec::new();
        for task in self.tasks.iter().chain(self.errors.iter()) {
            collect_tasks(task, &mut out);
        }
        out
    }

    /// Returns the number of root tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the flow has no root tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn collect_tasks<'a>(task: &'a Task, out: &mut Vec<&'a Task>) {
    out.push(task);
    for child in task.children() {
        collect_tasks(child, out);
    }
}
