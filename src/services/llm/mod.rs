pub mod openai;
pub mod provider;
pub mod types;

pub use provider::Provider;
pub use types::{
    GenerateOptions, LlmError, LlmResult, Message, Part, Role, StreamEvent, ToolCallPart,
    ToolDefinition, ToolResponsePart,
};
