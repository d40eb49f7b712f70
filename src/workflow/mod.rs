//! Flow Definition Module
//!
//! Provides data structures and utilities for defining, parsing, and
//! validating flows of nested tasks.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Flow, Task, TaskKind)
//! - [`parser`]: YAML parsing, loading and input resolution
//! - [`validator`]: Validation rules
//! - [`graph`]: Structural view of a flow

pub mod graph;
pub mod model;
pub mod parser;
pub mod validator;

pub use graph::{build_structure, flow_structure, RelationType, StructuralNode};
pub use model::{Flow, Flowable, Input, IterationSpec, Task, TaskKind};
pub use parser::{load_flow, parse_flow, parse_input, resolve_inputs, save_flow};
pub use validator::{validate_flow, ValidationError};
