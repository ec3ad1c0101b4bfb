//! Shared operand resolution and value coercion used by several nodes.
//!
//! Supported references:
//! - `{{input}}` / `{{input.path}}` - the previous node's output
//! - `{{nodes.<id>}}` / `{{nodes.<id>.path}}` - any earlier node's output
//! - `{{variables.path}}` - run variables
//!
//! Anything else is taken literally.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::Value;

use super::types::NodeContext;

fn template_regex() -> &'static Regex {
    static TEMPLATE_REGEX: OnceLock<Regex> = OnceLock::new();
    TEMPLATE_REGEX.get_or_init(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("valid regex"))
}

/// Resolve a config operand.
///
/// A string that is exactly one `{{ ref }}` resolves to the referenced value
/// with its JSON type intact. Other values are returned as-is.
pub fn resolve_value(value: &Value, ctx: &NodeContext) -> Value {
    match value {
        Value::String(s) => match single_reference(s) {
            Some(reference) => lookup(reference, ctx).unwrap_or(Value::Null),
            None if s.contains("{{") => Value::String(render_template(s, ctx)),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Substitute every `{{ ref }}` inside a string.
///
/// Unresolvable references render as an empty string.
pub fn render_template(template: &str, ctx: &NodeContext) -> String {
    template_regex()
        .replace_all(template, |caps: &regex_lite::Captures| {
            lookup(&caps[1], ctx)
                .map(|v| value_to_string(&v))
                .unwrap_or_default()
        })
        .to_string()
}

fn single_reference(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn lookup(reference: &str, ctx: &NodeContext) -> Option<Value> {
    let reference = reference.trim();
    if reference == "input" {
        return Some(ctx.input.clone());
    }
    if let Some(path) = reference.strip_prefix("input.") {
        return get_path_value(&ctx.input, path);
    }
    if let Some(path) = reference.strip_prefix("variables.") {
        return get_path_value(&ctx.variables, path);
    }
    if let Some(rest) = reference.strip_prefix("nodes.") {
        let (node_id, path) = match rest.split_once('.') {
            Some((id, path)) => (id, path),
            None => (rest, ""),
        };
        let base = ctx.node_outputs.get(node_id)?;
        let path = if path == "output" {
            ""
        } else {
            path.strip_prefix("output.").unwrap_or(path)
        };
        return get_path_value(base, path);
    }
    None
}

/// Walk a dotted path through objects and arrays.
pub fn get_path_value(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let index = segment.parse::<usize>().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Convert a JSON value to a string for comparison or substitution.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// Loose numeric coercion: numbers, numeric strings, and booleans.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Loose truthiness: null, false, 0, "", and empty collections are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
