//! FlowRunner - Flowable Task Resolution Engine
//!
//! Executes declarative flows whose tasks may nest: sequential and parallel
//! groups, and `each_*` tasks that fan out over values only known at run
//! time. The heart of the crate is a pure resolver that, given an
//! execution snapshot, decides what to run next and when a composite task
//! is done.
//!
//! # Architecture
//!
//! - [`workflow`]: Flow definitions, YAML parsing, validation and structure
//! - [`template`]: Expression evaluation against a variable scope
//! - [`runtime`]: Executions, task runs and their states
//! - [`resolver`]: Expansion, next-runnable resolution and outcome aggregation
//! - [`execution`]: Local engine with worker threads and persistence
//! - [`monitoring`]: Execution timeline reports
//!
//! # Example
//!
//! ```rust,no_run
//! use flowrunner::execution::Engine;
//! use flowrunner::load_flow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a flow from YAML
//!     let flow = load_flow("pipeline.yaml")?;
//!
//!     // Create execution engine
//!     let mut engine = Engine::new(flow);
//!     engine.set_max_parallel(4);
//!     engine.set_working_dir("/data/analysis");
//!
//!     // Execute the flow
//!     let execution = engine.run()?;
//!     println!("{:?}", execution.state.current);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod resolver;
pub mod runtime;
pub mod template;
pub mod workflow;

// Re-export commonly used types
pub use error::{EngineError, EvaluationError, FlowError, IterationError, ResolutionError};
pub use execution::engine::Engine;
pub use resolver::{resolve_composite, Decision};
pub use runtime::{Execution, StateType, TaskRun};
pub use template::{Evaluator, TemplateEvaluator, VariableScope};
pub use workflow::model::{Flow, Task};
pub use workflow::parser::load_flow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
