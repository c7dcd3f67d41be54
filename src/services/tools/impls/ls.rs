//! List Directory Tool
//!
//! Lists files and subdirectories inside the workspace. Directory entries
//! carry a trailing `/` so the model can tell them apart from files.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::services::tools::trait_def::{Tool, ToolContext, ToolError};
use crate::services::tools::workspace::Workspace;

/// Directory listing tool bound to a workspace root.
pub struct ListDirTool {
    workspace: Workspace,
}

impl ListDirTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "Lists files and subdirectories in a specific directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory path relative to the workspace root."
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
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");

        let target = self.workspace.resolve(path)?;

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&target)
            .map_err(|e| ToolError::execution(format!("failed to read dir: {}", e)))?
        {
            let entry = entry.map_err(|e| ToolError::execution(format!("failed to read dir: {}", e)))?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        Ok(json!(entries))
    }
}
