//! Switch node - multi-way branch selection by case tag.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::if_else::evaluate;
use super::template::{resolve_value, value_to_string};
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Switch node implementation.
pub struct SwitchNode;

impl SwitchNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SwitchNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SwitchConfig {
    value: Value,
    #[serde(default)]
    cases: Vec<SwitchCase>,
    /// Case tag used when nothing matches
    #[serde(default)]
    default_case: Option<String>,
}

/// A case is either a bare value (which doubles as its tag) or an explicit
/// `{ value, case }` pair.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SwitchCase {
    Tagged {
        value: Value,
        case: String,
        #[serde(default = "default_operator")]
        operator: String,
    },
    Bare(Value),
}

fn default_operator() -> String {
    "equals".to_string()
}

impl SwitchCase {
    fn matches(&self, field_value: &Value) -> Option<String> {
        match self {
            SwitchCase::Tagged {
                value,
                case,
                operator,
            } => evaluate(field_value, operator, value).then(|| case.clone()),
            SwitchCase::Bare(value) => {
                evaluate(field_value, "equals", value).then(|| value_to_string(value))
            }
        }
    }
}

#[async_trait]
impl Node for SwitchNode {
    fn node_type(&self) -> &str {
        "switch"
    }

    fn description(&self) -> &str {
        "Select the child whose case tag matches the value"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: SwitchConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid switch config: {}", e)))?;

        let field_value = resolve_value(&config.value, ctx);

        let matched_case = if config.cases.is_empty() {
            // No explicit cases: the value itself is the case tag
            match &field_value {
                Value::Null => None,
                other => Some(value_to_string(other)),
            }
        } else {
            config.cases.iter().find_map(|case| case.matches(&field_value))
        };

        let (matched, case) = match matched_case.or(config.default_case) {
            Some(case) => (true, Value::String(case)),
            None => (false, Value::Null),
        };

        Ok(NodeResult::with_metadata(
            json!({
                "success": true,
                "matched": matched,
                "case": case,
                "value": field_value,
                "data": ctx.input,
            }),
            json!({
                "cases_checked": config.cases.len(),
            }),
        ))
    }
}
