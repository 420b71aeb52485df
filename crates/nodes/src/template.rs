//! Default [`Evaluator`] backed by MiniJinja, plus mapping resolution.

use minijinja::Environment;
use serde_json::Value;

use crate::{Evaluator, NodeError};

/// Template evaluator wrapping a MiniJinja environment.
pub struct JinjaEvaluator {
    env: Environment<'static>,
}

impl JinjaEvaluator {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    fn eval_expression(&self, expression: &str, data: &Value) -> Result<minijinja::Value, NodeError> {
        let expr = self.env.compile_expression(expression)?;
        Ok(expr.eval(data)?)
    }
}

impl Default for JinjaEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for JinjaEvaluator {
    fn render(&self, template: &str, data: &Value) -> Result<Value, NodeError> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(Value::String(template.to_string()));
        }

        if let Some(expression) = sole_expression(template) {
            let value = self.eval_expression(expression, data)?;
            return serde_json::to_value(&value).map_err(|e| NodeError::Template(e.to_string()));
        }

        Ok(Value::String(self.env.render_str(template, data)?))
    }

    fn test(&self, expression: &str, data: &Value) -> Result<bool, NodeError> {
        let expression = sole_expression(expression).unwrap_or(expression.trim());
        Ok(self.eval_expression(expression, data)?.is_true())
    }
}

/// Returns the inner expression when `template` is exactly one `{{ ... }}`.
fn sole_expression(template: &str) -> Option<&str> {
    let inner = template
        .trim()
        .strip_prefix("{{")?
        .strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Resolve a mapping spec against `data`.
///
/// Strings are rendered as templates; arrays and objects are resolved
/// element by element; every other value is returned as-is.
pub fn resolve_mapping(evaluator: &dyn Evaluator, spec: &Value, data: &Value) -> Result<Value, NodeError> {
    match spec {
        Value::String(template) => evaluator.render(template, data),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_mapping(evaluator, item, data))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut out = serde_json::Map::with_capacity(fields.len());
            for (key, value) in fields {
                out.insert(key.clone(), resolve_mapping(evaluator, value, data)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
