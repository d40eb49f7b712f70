//! Expression Evaluation
//!
//! The resolver never interprets expressions itself: it receives an
//! [`Evaluator`] on every call and asks it to evaluate iteration values
//! against a [`VariableScope`].
//!
//! [`TemplateEvaluator`] is the small evaluator used by the CLI. It only
//! understands `{{ dotted.path }}` placeholders:
//!
//! ```
//! use flowrunner::template::{Evaluator, TemplateEvaluator, VariableScope};
//! use serde_json::json;
//!
//! let mut scope = VariableScope::new();
//! scope.insert_path("inputs.samples", json!(["a", "b"]));
//!
//! let evaluator = TemplateEvaluator;
//! let value = evaluator.evaluate("{{ inputs.samples }}", &scope).unwrap();
//! assert_eq!(value, json!(["a", "b"]));
//!
//! let text = evaluator.render("first is {{ inputs.samples.0 }}", &scope).unwrap();
//! assert_eq!(text, "first is a");
//! ```

use serde_json::{Map, Value};

use crate::error::EvaluationError;

/// Path under which the current iteration value is exposed.
pub const ITERATION_VALUE_PATH: &str = "taskrun.value";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Evaluates expressions against a variable scope.
pub trait Evaluator {
    /// Evaluates an expression into a value.
    fn evaluate(&self, expression: &str, scope: &VariableScope) -> Result<Value, EvaluationError>;

    /// Evaluates an expression and returns its text form.
    fn render(&self, expression: &str, scope: &VariableScope) -> Result<String, EvaluationError> {
        Ok(value_to_text(&self.evaluate(expression, scope)?))
    }
}

/// Variables visible to an expression, as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableScope {
    variables: Map<String, Value>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(variables: Map<String, Value>) -> Self {
        Self { variables }
    }

    /// Inserts a value at a dotted path, creating intermediate objects.
    ///
    /// A non-object value found along the path is replaced.
    pub fn insert_path(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut current = &mut self.variables;
        for segment in segments {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_string(), value);
    }

    /// Returns a copy of this scope with the iteration value bound.
    pub fn with_iteration_value(&self, value: &str) -> Self {
        let mut scope = self.clone();
        scope.insert_path(ITERATION_VALUE_PATH, Value::String(value.to_string()));
        scope
    }

    /// Looks up a dotted path. Numeric segments index into arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.variables.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.variables
    }
}

/// Evaluator resolving `{{ path }}` placeholders against the scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEvaluator;

impl Evaluator for TemplateEvaluator {
    fn evaluate(&self, expression: &str, scope: &VariableScope) -> Result<Value, EvaluationError> {
        let segments = parse_template(expression)?;

        // A lone placeholder keeps the type of the referenced value
        let meaningful: Vec<&Segment> = segments
            .iter()
            .filter(|s| !matches!(s, Segment::Text(text) if text.trim().is_empty()))
            .collect();
        if let [Segment::Reference(path)] = meaningful.as_slice() {
            return resolve(scope, path).cloned();
        }

        let mut output = String::with_capacity(expression.len());
        for segment in &segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Reference(path) => output.push_str(&value_to_text(resolve(scope, path)?)),
            }
        }
        Ok(Value::String(output))
    }
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Reference(&'a str),
}

/// Splits a template into literal text and placeholder references.
fn parse_template(expression: &str) -> Result<Vec<Segment<'_>>, EvaluationError> {
    let mut segments = Vec::new();
    let mut rest = expression;

    if !rest.contains(OPEN) {
        return Ok(vec![Segment::Text(expression)]);
    }

    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open.find(CLOSE).ok_or_else(|| EvaluationError::Syntax {
            expression: expression.to_string(),
            reason: "unterminated placeholder".to_string(),
        })?;

        let path = after_open[..end].trim();
        if path.is_empty() {
            return Err(EvaluationError::Syntax {
                expression: expression.to_string(),
                reason: "empty placeholder".to_string(),
            });
        }
        segments.push(Segment::Reference(path));
        rest = &after_open[end + CLOSE.len()..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

fn resolve<'s>(scope: &'s VariableScope, path: &str) -> Result<&'s Value, EvaluationError> {
    scope
        .lookup(path)
        .ok_or_else(|| EvaluationError::UnresolvedReference(path.to_string()))
}

/// Strings render verbatim, everything else as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
