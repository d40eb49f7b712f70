//! Flow Parser
//!
//! Handles loading flow definitions from YAML files and resolving the
//! input values an execution starts with.

use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::model::Flow;
use super::validator::validate_flow;
use crate::error::FlowError;

/// Loads and validates a flow from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::workflow::load_flow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let flow = load_flow("pipeline.yaml")?;
///     println!("Loaded {} root tasks", flow.len());
///     Ok(())
/// }
/// ```
pub fn load_flow(path: impl AsRef<Path>) -> Result<Flow, FlowError> {
    let path = path.as_ref();
    info!("Loading flow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| FlowError::Io {
        path: path.display().to_string(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_flow(&yaml_content)
}

/// Parses and validates a flow from YAML text.
pub fn parse_flow(yaml_content: &str) -> Result<Flow, FlowError> {
    let flow: Flow = serde_yaml::from_str(yaml_content)?;

    info!(
        "Parsed flow '{}': {} root tasks, {} error tasks, {} inputs",
        flow.id,
        flow.tasks.len(),
        flow.errors.len(),
        flow.inputs.len()
    );

    validate_flow(&flow)?;
    Ok(flow)
}

/// Saves a flow to a YAML file.
pub fn save_flow(flow: &Flow, path: impl AsRef<Path>) -> Result<(), FlowError> {
    let path = path.as_ref();
    let yaml_content = serde_yaml::to_string(flow)?;
    fs::write(path, yaml_content).map_err(|source| FlowError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!("Flow saved to: {}", path.display());
    Ok(())
}

/// Parses a `name=value` command line input.
///
/// The value is read as JSON when possible (`3`, `true`, `["a","b"]`),
/// otherwise kept as a plain string.
pub fn parse_input(arg: &str) -> Option<(String, Value)> {
    let (name, raw) = arg.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Some((name.to_string(), value))
}

/// Combines declared defaults with provided values.
///
/// Every declared input must end up with a value. Provided values for
/// undeclared inputs are kept, with a warning.
pub fn resolve_inputs(flow: &Flow, provided: &Map<String, Value>) -> Result<Map<String, Value>, FlowError> {
    let mut inputs = Map::new();

    for input in &flow.inputs {
        let value = provided
            .get(&input.name)
            .or(input.default.as_ref())
            .cloned()
            .ok_or_else(|| FlowError::MissingInput(input.name.clone()))?;
        inputs.insert(input.name.clone(), value);
    }

    for (name, value) in provided {
        if !inputs.contains_key(name) {
            warn!("Input '{}' is not declared by flow '{}'", name, flow.id);
            inputs.insert(name.clone(), value.clone());
        }
    }

    debug!("Resolved inputs: {:?}", inputs.keys().collect::<Vec<_>>());
    Ok(inputs)
}
