//! Chat Model Types
//!
//! Core entities for chat history, streaming events, and provider errors.
//! The serde representation of messages is load-bearing: session files are
//! written with exactly this shape, so the part encoding must stay stable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a message sender in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// The assistant. Serialized as `assistant` on the chat-completion wire.
    Model,
    System,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A text fragment inside a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// Stable call identifier, echoed by the matching tool response
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// Argument name to JSON value mapping
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// The result of a tool execution, referencing the originating call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponsePart {
    pub id: String,
    pub name: String,
    /// JSON-encoded return value or raw error text
    pub content: String,
}

/// Content part carried inside a message.
///
/// The wire discriminant and payload field names match the session file
/// format: `{"type":"text","text_part":{...}}` and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text_part: TextPart },
    ToolCall { tool_call_part: ToolCallPart },
    ToolResp { tool_resp_part: ToolResponsePart },
}

impl Part {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text_part: TextPart { text: text.into() },
        }
    }

    /// Create a tool-call part
    pub fn tool_call(call: ToolCallPart) -> Self {
        Part::ToolCall {
            tool_call_part: call,
        }
    }

    /// Create a tool-response part
    pub fn tool_response(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Part::ToolResp {
            tool_resp_part: ToolResponsePart {
                id: id.into(),
                name: name.into(),
                content: content.into(),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text_part } => Some(&text_part.text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Part::ToolCall { tool_call_part } => Some(tool_call_part),
            _ => None,
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponsePart> {
        match self {
            Part::ToolResp { tool_resp_part } => Some(tool_resp_part),
            _ => None,
        }
    }
}

/// A message in the conversation: a role plus ordered content parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Part>,
}

impl Message {
    /// Create a single-text message with the given role
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![Part::text(text)],
        }
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    /// Create a tool message holding exactly one response part
    pub fn tool_response(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: vec![Part::tool_response(id, name, content)],
        }
    }
}

/// Definition of a tool advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name within a registry
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema object describing the arguments
    pub input_schema: Value,
}

/// Per-request generation options
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub tools: Vec<ToolDefinition>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: None,
            stop: Vec::new(),
            tools: Vec::new(),
        }
    }
}

/// Event emitted on a chat stream.
///
/// A stream is a sequence of text deltas interleaved (in provider order)
/// with at most one tool-calls batch per turn; an error event is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text content delta from the model
    TextDelta { content: String },
    /// Accumulated tool calls, emitted once the turn finishes
    ToolCalls { calls: Vec<ToolCallPart> },
    /// Terminal error; the channel closes after this
    Error { message: String },
}

/// Error types for provider operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmError {
    /// Authentication failed (invalid or missing API key)
    AuthenticationFailed { message: String },
    /// Rate limit exceeded
    RateLimited { message: String },
    /// Invalid request (bad parameters)
    InvalidRequest { message: String },
    /// Server error from the provider
    ServerError {
        message: String,
        status: Option<u16>,
    },
    /// Network/connection error
    NetworkError { message: String },
    /// Response parsing error
    ParseError { message: String },
    /// The request was cancelled by the caller
    Cancelled,
    /// Other error
    Other { message: String },
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::AuthenticationFailed { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            LlmError::RateLimited { message } => write!(f, "Rate limited: {}", message),
            LlmError::InvalidRequest { message } => write!(f, "Invalid request: {}", message),
            LlmError::ServerError { message, status } => {
                if let Some(s) = status {
                    write!(f, "Server error ({}): {}", s, message)
                } else {
                    write!(f, "Server error: {}", message)
                }
            }
            LlmError::NetworkError { message } => write!(f, "Network error: {}", message),
            LlmError::ParseError { message } => write!(f, "Parse error: {}", message),
            LlmError::Cancelled => write!(f, "Request cancelled"),
            LlmError::Other { message } => write!(f, "Error: {}", message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Result type for provider operations
pub type LlmResult<T> = Result<T, LlmError>;
