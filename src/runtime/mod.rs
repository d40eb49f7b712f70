//! Runtime Records
//!
//! Executions, task runs and their states: the read model the resolver
//! reasons about.
//!
//! - [`state`]: State types, classification and transition history
//! - [`execution`]: Execution snapshots and task runs

pub mod execution;
pub mod state;

pub use execution::{Execution, TaskRun};
pub use state::{worst_state, History, Outcome, State, StateType};
