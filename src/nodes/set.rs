//! Set node - merge configured values into the incoming data.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::template::resolve_value;
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Set node implementation.
pub struct SetNode;

impl SetNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SetNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SetConfig {
    /// Flat map of field -> value; keys may be dotted paths
    #[serde(default)]
    values: Map<String, Value>,
    /// Ordered assignments, applied after `values`
    #[serde(default)]
    fields: Vec<SetField>,
}

#[derive(Debug, Deserialize)]
struct SetField {
    name: String,
    value: Value,
}

#[async_trait]
impl Node for SetNode {
    fn node_type(&self) -> &str {
        "set"
    }

    fn description(&self) -> &str {
        "Set or update fields in object data"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: SetConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid set config: {}", e)))?;

        let assignments: Vec<(&str, &Value)> = config
            .values
            .iter()
            .map(|(name, value)| (name.as_str(), value))
            .chain(config.fields.iter().map(|f| (f.name.as_str(), &f.value)))
            .collect();

        if assignments.is_empty() {
            return Err(Error::Node(
                "Set node requires at least one field assignment".to_string(),
            ));
        }

        let mut output = match &ctx.input {
            Value::Object(obj) => obj.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };

        for (name, value) in &assignments {
            if name.trim().is_empty() {
                return Err(Error::Node("Set node field name cannot be empty".to_string()));
            }
            set_path_value(&mut output, name, render_value(value, ctx));
        }

        Ok(NodeResult::with_metadata(
            Value::Object(output),
            json!({ "fields_set": assignments.len() }),
        ))
    }
}

fn render_value(value: &Value, ctx: &NodeContext) -> Value {
    match value {
        Value::Array(arr) => Value::Array(arr.iter().map(|v| render_value(v, ctx)).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), render_value(v, ctx)))
                .collect(),
        ),
        _ => resolve_value(value, ctx),
    }
}

fn set_path_value(root: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry.as_object_mut() {
            Some(map) => current = map,
            None => return,
        }
    }

    current.insert((*last).to_string(), value);
}
