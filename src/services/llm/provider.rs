//! Provider Trait
//!
//! Defines the common interface for streaming chat backends.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{GenerateOptions, LlmError, LlmResult, Message, StreamEvent};

/// Interface for a streaming chat-completion backend.
///
/// One call to [`Provider::generate`] produces one stream of events: text
/// deltas in provider order, followed by at most one tool-calls batch, then
/// channel close. A terminal [`StreamEvent::Error`] may replace the normal
/// ending. HTTP-level failures are returned before any channel is created.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Send the conversation history to the model and stream the response.
    ///
    /// Cancelling `cancel` aborts the in-flight request and closes the
    /// channel promptly.
    async fn generate(
        &self,
        history: &[Message],
        options: GenerateOptions,
        cancel: CancellationToken,
    ) -> LlmResult<mpsc::Receiver<StreamEvent>>;
}

/// Helper function to create an error for a missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Helper function to classify HTTP error status codes
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_error() {
        let err = missing_api_key_error("openai");
        match err {
            LlmError::AuthenticationFailed { message } => assert!(message.contains("openai")),
            _ => panic!("Expected AuthenticationFailed"),
        }
    }

    #[test]
    fn test_parse_http_error() {
        assert!(matches!(
            parse_http_error(401, "unauthorized", "openai"),
            LlmError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            parse_http_error(429, "slow down", "openai"),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            parse_http_error(400, "bad body", "openai"),
            LlmError::InvalidRequest { .. }
        ));
        assert!(matches!(
            parse_http_error(503, "overloaded", "openai"),
            LlmError::ServerError {
                status: Some(503),
                ..
            }
        ));
    }
}
