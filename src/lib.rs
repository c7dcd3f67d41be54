//! Bellows - Local-First Agent Engine
//!
//! This library drives a conversational, tool-using language model through a
//! bounded reason-act loop. It includes:
//! - An OpenAI-compatible streaming chat provider
//! - A workspace-sandboxed filesystem toolset and a self-correcting editor
//! - An MCP (Model Context Protocol) client over subprocess stdio
//! - The orchestrator loop, an investigator sub-loop, and session persistence

pub mod services;
pub mod utils;

pub use services::agent::{Agent, InvestigationReport, Investigator, Session};
pub use services::llm::openai::OpenAiProvider;
pub use services::llm::provider::Provider;
pub use services::llm::types::{
    GenerateOptions, LlmError, LlmResult, Message, Part, Role, StreamEvent, ToolCallPart,
    ToolDefinition, ToolResponsePart,
};
pub use services::tools::mcp_client::{McpClient, StdioTransport};
pub use services::tools::{Tool, ToolContext, ToolError, ToolRegistry, Workspace};
pub use utils::error::{AppError, AppResult};
