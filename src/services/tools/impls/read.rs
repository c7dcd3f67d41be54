//! Read File Tool

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::services::tools::trait_def::{Tool, ToolContext, ToolError};
use crate::services::tools::workspace::Workspace;

/// File reading tool bound to a workspace root.
pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads the content of a file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path relative to the workspace root."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or(ToolError::MissingArgument("path"))?;

        let target = self.workspace.resolve(path)?;

        let content = std::fs::read_to_string(&target)
            .map_err(|e| ToolError::execution(format!("failed to read file: {}", e)))?;

        Ok(Value::String(content))
    }
}
