//! Tool Trait and Registry
//!
//! Defines the unified `Tool` trait interface and `ToolRegistry` for
//! dynamic tool registration, lookup, and dispatch by the agent loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::services::llm::types::ToolDefinition;

/// Errors surfaced by tool execution.
///
/// Tool errors are never fatal to the agent: the orchestrator records them
/// as tool-response content so the model can observe and retry.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A required argument is absent or has the wrong type
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    /// The resolved path escapes the workspace root
    #[error("access denied: path {path} is outside workspace {root}")]
    OutsideWorkspace { path: String, root: String },

    /// The tool ran but failed; the message is intended for the model
    #[error("{0}")]
    Execution(String),

    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

/// Context provided to each tool during execution.
pub struct ToolContext {
    /// Cancellation token for cooperative cancellation
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }
}

/// Unified tool interface.
///
/// Each tool exposes identity (name, description, argument schema) and an
/// execute operation. The return value is JSON-encoded into the tool
/// response the model sees.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of this tool (e.g., "read_file")
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's arguments
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given context and argument mapping.
    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError>;
}

/// Registry of available tools, iterated in name order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Unregister a tool by name. Returns the removed tool, or None.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Get all tool definitions, sorted by name, suitable for providers.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
