//! Execution Monitoring Module
//!
//! Reports on finished or running executions.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Task run start/end timing for Gantt charts

pub mod timeline;

pub use timeline::{ExecutionTimeline, TimelineEntry};
