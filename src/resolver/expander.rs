//! Iteration Expansion
//!
//! Turns the children of an `each_*` task into one binding per
//! (iteration value, child) pair:
//! - Evaluates the declared value once
//! - Normalizes text and structured lists into the same iteration values
//! - Emits bindings iteration-major, child-minor

use std::collections::HashSet;

use log::{debug, info, warn};
use serde_json::Value;

use super::binding::{static_bindings, RunnableBinding};
use crate::error::IterationError;
use crate::template::{value_to_text, Evaluator, VariableScope};
use crate::workflow::{IterationSpec, Task};

/// An evaluated iteration value before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationSource {
    /// Text holding a JSON array, e.g. `["a", "b"]`
    TextEncoded(String),
    /// A list already materialized by the evaluator
    Structured(Vec<Value>),
}

impl IterationSource {
    /// Normalizes the source into iteration values.
    ///
    /// Strings are kept verbatim; numbers, booleans and objects become their
    /// JSON text. Object keys are sorted, so equal objects always produce
    /// the same value whatever shape they arrived in.
    ///
    /// # Example
    /// ```
    /// use flowrunner::resolver::IterationSource;
    ///
    /// let values = IterationSource::TextEncoded(r#"["a", 1, {"k": "v"}]"#.to_string())
    ///     .normalize()
    ///     .unwrap();
    /// assert_eq!(values, vec!["a", "1", r#"{"k":"v"}"#]);
    /// ```
    pub fn normalize(self) -> Result<Vec<String>, IterationError> {
        let items = match self {
            Self::Structured(items) => items,
            Self::TextEncoded(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Array(items)) => items,
                Ok(other) => {
                    return Err(IterationError::format(format!(
                        "expected a JSON array, got {}",
                        json_kind(&other)
                    )))
                }
                Err(e) => {
                    return Err(IterationError::format(format!(
                        "'{}' is not a JSON array: {}",
                        text, e
                    )))
                }
            },
        };

        items
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Null | Value::Array(_) => Err(IterationError::format(format!(
                    "item {} is {}, expected a scalar or an object",
                    index,
                    json_kind(item)
                ))),
                other => Ok(value_to_text(other)),
            })
            .collect()
    }
}

/// Evaluates the declared iteration value of an `each_*` task.
pub fn evaluate_iteration(
    evaluator: &dyn Evaluator,
    scope: &VariableScope,
    spec: &IterationSpec,
) -> Result<IterationSource, IterationError> {
    match spec {
        IterationSpec::Expression(expression) => match evaluator.evaluate(expression, scope)? {
            Value::String(text) => Ok(IterationSource::TextEncoded(text)),
            Value::Array(items) => Ok(IterationSource::Structured(items)),
            other => Err(IterationError::format(format!(
                "expected a list, got {}",
                json_kind(&other)
            ))),
        },
        IterationSpec::Values(items) => {
            // String items may be templates themselves
            let rendered = items
                .iter()
                .map(|item| match item {
                    Value::String(text) => evaluator.render(text, scope).map(Value::String),
                    other => Ok(other.clone()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(IterationSource::Structured(rendered))
        }
    }
}

/// Expands the children of an iterating task into bindings.
///
/// For `value = ["a", "b"]` and children `[t1, t2]` the result is
/// `[(t1, a), (t2, a), (t1, b), (t2, b)]`. An empty list yields no binding.
/// Disabled children are skipped.
///
/// Repeated values still produce one binding per element, but they share a
/// run identity, so each (child, value) pair only ever runs once.
pub fn expand<'a>(
    evaluator: &dyn Evaluator,
    scope: &VariableScope,
    spec: &IterationSpec,
    tasks: &'a [Task],
) -> Result<Vec<RunnableBinding<'a>>, IterationError> {
    let values = evaluate_iteration(evaluator, scope, spec)?.normalize()?;
    let children = static_bindings(tasks);

    let bindings: Vec<RunnableBinding<'a>> = values
        .iter()
        .flat_map(|value| {
            children
                .iter()
                .map(move |child| RunnableBinding::new(child.task, Some(value.clone())))
        })
        .collect();

    debug!(
        "Expanded {} values x {} tasks into {} bindings",
        values.len(),
        children.len(),
        bindings.len()
    );
    if values.is_empty() {
        info!("Iteration value is empty, nothing to run");
    }

    let mut seen = HashSet::new();
    for value in &values {
        if !seen.insert(value.as_str()) {
            warn!("Iteration value '{}' is repeated and will only run once", value);
        }
    }

    Ok(bindings)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvaluationError;
    use crate::template::TemplateEvaluator;
    use serde_json::json;

    fn scope() -> VariableScope {
        let mut scope = VariableScope::new();
        scope.insert_path("inputs.samples", json!(["s1", "s2"]));
        scope.insert_path("inputs.text", json!(r#"["x", "y"]"#));
        scope.insert_path("inputs.number", json!(4));
        scope
    }

    fn expr(text: &str) -> IterationSpec {
        IterationSpec::Expression(text.to_string())
    }

    fn pairs(bindings: &[RunnableBinding<'_>]) -> Vec<(String, String)> {
        bindings
            .iter()
            .map(|b| (b.task_id().to_string(), b.value.clone().unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_cross_product_single_child() {
        let tasks = vec![Task::log("t1", "t1")];
        let bindings = expand(&TemplateEvaluator, &scope(), &expr(r#"["a","b","c"]"#), &tasks).unwrap();

        assert_eq!(
            pairs(&bindings),
            vec![
                ("t1".to_string(), "a".to_string()),
                ("t1".to_string(), "b".to_string()),
                ("t1".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_cross_product_iteration_major() {
        let tasks = vec![Task::log("t1", "t1"), Task::log("t2", "t2")];
        let bindings = expand(&TemplateEvaluator, &scope(), &expr(r#"["a","b"]"#), &tasks).unwrap();

        let ids: Vec<(String, String)> = pairs(&bindings);
        assert_eq!(
            ids,
            vec![
                ("t1".to_string(), "a".to_string()),
                ("t2".to_string(), "a".to_string()),
                ("t1".to_string(), "b".to_string()),
                ("t2".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_repeated_values_keep_one_binding_per_element() {
        let tasks = vec![Task::log("t1", "t1")];
        let bindings = expand(&TemplateEvaluator, &scope(), &expr(r#"["a","a","b"]"#), &tasks).unwrap();

        assert_eq!(
            pairs(&bindings),
            vec![
                ("t1".to_string(), "a".to_string()),
                ("t1".to_string(), "a".to_string()),
                ("t1".to_string(), "b".to_string()),
            ]
        );
        assert_eq!(bindings[0], bindings[1]);
    }

    #[test]
    fn test_deterministic() {
        let tasks = vec![Task::log("t1", "t1"), Task::log("t2", "t2")];
        let spec = expr(r#"[{"b": 1, "a": 2}, "x", 3]"#);

        let first = expand(&TemplateEvaluator, &scope(), &spec, &tasks).unwrap();
        let second = expand(&TemplateEvaluator, &scope(), &spec, &tasks).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_iteration() {
        let tasks = vec![Task::log("t1", "t1")];
        let bindings = expand(&TemplateEvaluator, &scope(), &expr("[]"), &tasks).unwrap();
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_expression_resolving_to_structured_list() {
        let tasks = vec![Task::log("t1", "t1")];
        let bindings =
            expand(&TemplateEvaluator, &scope(), &expr("{{ inputs.samples }}"), &tasks).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].value(), Some("s2"));
    }

    #[test]
    fn test_expression_resolving_to_text_list() {
        let tasks = vec![Task::log("t1", "t1")];
        let bindings =
            expand(&TemplateEvaluator, &scope(), &expr("{{ inputs.text }}"), &tasks).unwrap();
        assert_eq!(bindings[0].value(), Some("x"));
        assert_eq!(bindings[1].value(), Some("y"));
    }

    #[test]
    fn test_format_equivalence() {
        let tasks = vec![Task::log("t1", "t1")];
        let text = expr(r#"[{"name": "a", "size": 1}, {"size": 2, "name": "b"}]"#);
        let structured = IterationSpec::Values(vec![
            json!({"name": "a", "size": 1}),
            json!({"name": "b", "size": 2}),
        ]);

        let from_text = expand(&TemplateEvaluator, &scope(), &text, &tasks).unwrap();
        let from_list = expand(&TemplateEvaluator, &scope(), &structured, &tasks).unwrap();
        assert_eq!(from_text, from_list);
        assert_eq!(from_text[0].value(), Some(r#"{"name":"a","size":1}"#));
    }

    #[test]
    fn test_literal_items_are_rendered() {
        let tasks = vec![Task::log("t1", "t1")];
        let spec = IterationSpec::Values(vec![json!("{{ inputs.number }}"), json!("plain"), json!(7)]);
        let bindings = expand(&TemplateEvaluator, &scope(), &spec, &tasks).unwrap();

        let values: Vec<&str> = bindings.iter().filter_map(|b| b.value()).collect();
        assert_eq!(values, vec!["4", "plain", "7"]);
    }

    #[test]
    fn test_disabled_children_skipped() {
        let tasks = vec![Task::log("t1", "t1"), Task::log("t2", "t2").disabled()];
        let bindings = expand(&TemplateEvaluator, &scope(), &expr(r#"["a","b"]"#), &tasks).unwrap();
        assert_eq!(bindings.len(), 2);
        assert!(bindings.iter().all(|b| b.task_id() == "t1"));
    }

    #[test]
    fn test_evaluation_error_propagated() {
        let tasks = vec![Task::log("t1", "t1")];
        let err = expand(&TemplateEvaluator, &scope(), &expr("{{ inputs.nope }}"), &tasks).unwrap_err();
        assert_eq!(
            err,
            IterationError::Evaluation(EvaluationError::UnresolvedReference("inputs.nope".to_string()))
        );
    }

    #[test]
    fn test_format_error_not_an_array() {
        let tasks = vec![Task::log("t1", "t1")];

        let err = expand(&TemplateEvaluator, &scope(), &expr("not json"), &tasks).unwrap_err();
        assert!(matches!(err, IterationError::Format { .. }));

        let err = expand(&TemplateEvaluator, &scope(), &expr(r#"{"a": 1}"#), &tasks).unwrap_err();
        assert!(matches!(err, IterationError::Format { .. }));

        let err = expand(&TemplateEvaluator, &scope(), &expr("{{ inputs.number }}"), &tasks).unwrap_err();
        assert!(matches!(err, IterationError::Format { .. }));
    }

    #[test]
    fn test_format_error_nested_items() {
        let err = IterationSource::TextEncoded("[[1, 2]]".to_string())
            .normalize()
            .unwrap_err();
        assert!(err.to_string().contains("item 0"));

        let err = IterationSource::Structured(vec![json!("a"), Value::Null])
            .normalize()
            .unwrap_err();
        assert!(err.to_string().contains("item 1"));
    }
}
