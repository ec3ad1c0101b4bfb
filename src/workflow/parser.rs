//! Workflow definition parser (YAML or JSON).

use std::path::Path;

use super::types::WorkflowDefinition;
use crate::error::{Error, Result};

/// Parse a workflow from a YAML (or JSON) string.
pub fn parse_workflow(content: &str) -> Result<WorkflowDefinition> {
    if content.trim().is_empty() {
        return Err(Error::Parse("Empty workflow definition".to_string()));
    }

    let workflow: WorkflowDefinition = serde_yaml::from_str(content).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            Error::Parse(format!("Missing required field: {}", field))
        } else {
            Error::Parse(format!("Invalid workflow definition: {}", msg))
        }
    })?;
    Ok(workflow)
}

/// Parse a workflow from a file path.
///
/// Files ending in `.json` go through serde_json, everything else is YAML.
pub fn parse_workflow_file(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        parse_workflow(&content)
    }
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_simple_workflow() {
        let yaml = r#"
name: test-workflow
description: A test workflow
variables:
  threshold: 10
nodes:
  - id: start
    type: manual_trigger
  - id: check
    type: if_else
    config:
      value1: "{{input.count}}"
      operator: greater_than
      value2: 5
  - id: yes
    type: set
    branchTag: "true"
edges:
  - source: start
    target: check
  - source: check
    target: yes
"#;

        let workflow = parse_workflow(yaml).unwrap();
        assert_eq!(workflow.name, "test-workflow");
        assert_eq!(workflow.nodes.len(), 3);
        assert_eq!(workflow.edges.len(), 2);
        assert_eq!(workflow.nodes[2].branch_tag.as_deref(), Some("true"));
        assert_eq!(workflow.variables["threshold"], 10);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_workflow("   ").is_err());
    }

    #[test]
    fn test_parse_missing_nodes() {
        let err = parse_workflow("name: no-nodes\n").unwrap_err();
        assert!(err.to_string().contains("nodes"));
    }

    #[test]
    fn test_parse_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"nodes":[{{"id":"t","type":"manual_trigger"}}],"edges":[]}}"#
        )
        .unwrap();

        let workflow = parse_workflow_file(file.path()).unwrap();
        assert_eq!(workflow.nodes.len(), 1);
        assert_eq!(workflow.nodes[0].type_tag, "manual_trigger");
    }
}
