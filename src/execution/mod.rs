//! Flow Execution Module
//!
//! A local executor driving the resolver end to end: it applies
//! resolution decisions, runs leaf tasks on worker threads and persists
//! the execution after every change.
//!
//! # Architecture
//!
//! - [`engine`]: Main execution engine orchestrating flow runs
//! - [`worker`]: Leaf task execution logic
//! - [`store`]: Execution persistence for resume

pub mod engine;
pub mod store;
pub mod worker;

pub use engine::Engine;
pub use store::{ExecutionStore, DEFAULT_STATE_DIR};
