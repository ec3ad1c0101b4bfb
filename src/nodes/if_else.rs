//! IF/ELSE node - evaluates one condition and selects the "true" or "false" child.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::template::{as_f64, is_truthy, resolve_value, value_to_string};
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// IF/ELSE node implementation.
pub struct IfElseNode;

impl IfElseNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IfElseNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct IfElseConfig {
    #[serde(default)]
    value1: Value,
    operator: String,
    #[serde(default)]
    value2: Value,
}

#[async_trait]
impl Node for IfElseNode {
    fn node_type(&self) -> &str {
        "if_else"
    }

    fn description(&self) -> &str {
        "Compare two operands and continue down the true or false branch"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: IfElseConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid if_else config: {}", e)))?;

        let left = resolve_value(&config.value1, ctx);
        let right = resolve_value(&config.value2, ctx);
        let condition_met = evaluate(&left, &config.operator, &right);

        Ok(NodeResult::with_metadata(
            json!({
                "success": true,
                "conditionMet": condition_met,
                "branch": if condition_met { "true" } else { "false" },
                "data": ctx.input,
            }),
            json!({
                "operator": config.operator,
                "value1": left,
                "value2": right,
            }),
        ))
    }
}

/// Evaluate one comparison with loose coercion.
///
/// Unknown operators and non-numeric operands of numeric operators evaluate
/// to `false` rather than failing the node.
pub fn evaluate(left: &Value, operator: &str, right: &Value) -> bool {
    match operator {
        "equals" => loose_eq(left, right),
        "not_equals" => !loose_eq(left, right),
        "contains" => contains(left, right),
        "not_contains" => !contains(left, right),
        "starts_with" => value_to_string(left).starts_with(&value_to_string(right)),
        "ends_with" => value_to_string(left).ends_with(&value_to_string(right)),
        "greater_than" => compare(left, right, |l, r| l > r),
        "less_than" => compare(left, right, |l, r| l < r),
        "greater_than_or_equal" => compare(left, right, |l, r| l >= r),
        "less_than_or_equal" => compare(left, right, |l, r| l <= r),
        "is_empty" => !is_truthy(left),
        "is_not_empty" => is_truthy(left),
        "is_true" => is_truthy(left),
        "is_false" => !is_truthy(left),
        "regex" => {
            let pattern = value_to_string(right);
            match regex_lite::Regex::new(&pattern) {
                Ok(re) => re.is_match(&value_to_string(left)),
                Err(e) => {
                    warn!("Invalid regex '{}' in if_else condition: {}", pattern, e);
                    false
                }
            }
        }
        other => {
            warn!("Unsupported if_else operator '{}', treating as false", other);
            false
        }
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => value_to_string(left) == value_to_string(right),
    }
}

/// Numeric view used by equality: booleans stay booleans.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(_) => None,
        _ => as_f64(value),
    }
}

fn contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, right)),
        Value::Object(map) => map.contains_key(&value_to_string(right)),
        _ => value_to_string(left).contains(&value_to_string(right)),
    }
}

fn compare(left: &Value, right: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_f64(left), as_f64(right)) {
        (Some(l), Some(r)) => op(l, r),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_greater_than_true_branch() {
        let node = IfElseNode::new();
        let config = json!({"value1": 5, "operator": "greater_than", "value2": 3});
        let ctx = NodeContext::new("exec-1", "wf").with_input(json!({"order": 1}));

        let result = node.execute(&config, &ctx).await.unwrap();
        assert_eq!(result.data["conditionMet"], true);
        assert_eq!(result.data["branch"], "true");
        assert_eq!(result.data["data"]["order"], 1);
    }

    #[tokio::test]
    async fn test_resolves_input_operand() {
        let node = IfElseNode::new();
        let config = json!({
            "value1": "{{ input.priority }}",
            "operator": "equals",
            "value2": "high"
        });
        let ctx = NodeContext::new("exec-1", "wf").with_input(json!({"priority": "low"}));

        let result = node.execute(&config, &ctx).await.unwrap();
        assert_eq!(result.data["conditionMet"], false);
        assert_eq!(result.data["branch"], "false");
    }

    #[tokio::test]
    async fn test_invalid_config_fails() {
        let node = IfElseNode::new();
        let ctx = NodeContext::new("exec-1", "wf");
        assert!(node.execute(&json!({"operator": 7}), &ctx).await.is_err());
    }

    #[test]
    fn test_operator_table() {
        assert!(evaluate(&json!("5"), "equals", &json!(5)));
        assert!(evaluate(&json!("abc"), "not_equals", &json!("abd")));
        assert!(evaluate(&json!("hello world"), "contains", &json!("world")));
        assert!(evaluate(&json!(["a", "b"]), "contains", &json!("b")));
        assert!(evaluate(&json!("hello"), "not_contains", &json!("z")));
        assert!(evaluate(&json!("hello"), "starts_with", &json!("he")));
        assert!(evaluate(&json!("hello"), "ends_with", &json!("lo")));
        assert!(evaluate(&json!("10"), "greater_than", &json!(9)));
        assert!(evaluate(&json!(2), "less_than", &json!("3")));
        assert!(evaluate(&json!(3), "greater_than_or_equal", &json!(3)));
        assert!(evaluate(&json!(3), "less_than_or_equal", &json!(3)));
        assert!(evaluate(&json!(""), "is_empty", &Value::Null));
        assert!(evaluate(&json!(0), "is_empty", &Value::Null));
        assert!(evaluate(&json!("x"), "is_not_empty", &Value::Null));
        assert!(evaluate(&json!(true), "is_true", &Value::Null));
        assert!(evaluate(&json!(null), "is_false", &Value::Null));
        assert!(evaluate(&json!("order-123"), "regex", &json!(r"^order-\d+$")));
    }

    #[test]
    fn test_non_numeric_comparison_is_false() {
        assert!(!evaluate(&json!("abc"), "greater_than", &json!(1)));
        assert!(!evaluate(&json!(null), "less_than", &json!(1)));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        assert!(!evaluate(&json!(1), "roughly", &json!(1)));
        assert!(!evaluate(&json!("x"), "regex", &json!("(")));
    }

    #[test]
    fn test_emptiness_follows_falsy_values_only() {
        for falsy in [json!(null), json!(""), json!(false), json!(0), json!([]), json!({})] {
            assert!(evaluate(&falsy, "is_empty", &Value::Null), "{} should be empty", falsy);
        }
        assert!(!evaluate(&json!("false"), "is_empty", &Value::Null));
        assert!(evaluate(&json!("false"), "is_true", &Value::Null));
        assert!(!evaluate(&json!("false"), "is_false", &Value::Null));
    }
}
