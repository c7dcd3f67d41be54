//! OpenAI-Compatible Provider
//!
//! Streaming chat-completion client for any backend speaking the OpenAI
//! wire protocol (OpenAI, Ollama, vLLM, LM Studio, etc.).
//!
//! Tool calls arrive sharded across SSE deltas: the id, function name, and
//! argument substrings of one call may be split over many frames. The
//! `index` field is the stable reassembly key; the id may show up in any
//! delta, including after arguments have begun.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::provider::{missing_api_key_error, parse_http_error, Provider};
use super::types::{
    GenerateOptions, LlmError, LlmResult, Message, Part, Role, StreamEvent, ToolCallPart,
    ToolDefinition,
};
use async_trait::async_trait;

/// Default OpenAI API base URL
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible streaming provider
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider. An empty `base_url` selects the OpenAI default;
    /// trailing slashes are stripped.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        let base_url = if base_url.is_empty() {
            OPENAI_BASE_URL.to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Self {
            base_url,
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build the request body for the API
    fn build_request_body(&self, history: &[Message], options: &GenerateOptions) -> Value {
        let messages: Vec<Value> = history.iter().map(message_to_wire).collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "temperature": options.temperature,
        });

        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if !options.stop.is_empty() {
            body["stop"] = json!(options.stop);
        }
        if !options.tools.is_empty() {
            let tools: Vec<Value> = options.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }
}

/// Convert a history message to the chat-completion wire format.
///
/// Text parts of one message are joined with newlines. The `model` role is
/// sent as `assistant`. An assistant message carrying only tool calls sends
/// `content: null`, matching the OpenAI contract.
fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Model => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    };

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut tool_call_id: Option<&str> = None;

    for part in &message.content {
        match part {
            Part::Text { text_part } => text_parts.push(&text_part.text),
            Part::ToolCall { tool_call_part } => {
                let arguments = serde_json::to_string(&tool_call_part.args)
                    .unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(json!({
                    "id": tool_call_part.id,
                    "type": "function",
                    "function": {
                        "name": tool_call_part.name,
                        "arguments": arguments,
                    }
                }));
            }
            Part::ToolResp { tool_resp_part } => {
                tool_call_id = Some(&tool_resp_part.id);
                text_parts.push(&tool_resp_part.content);
            }
        }
    }

    let joined = text_parts.join("\n");
    let mut msg = json!({ "role": role });
    if tool_calls.is_empty() {
        msg["content"] = Value::String(joined);
    } else {
        msg["tool_calls"] = Value::Array(tool_calls);
        msg["content"] = if joined.is_empty() {
            Value::Null
        } else {
            Value::String(joined)
        };
    }
    if let Some(id) = tool_call_id {
        msg["tool_call_id"] = json!(id);
    }

    msg
}

/// Convert a tool definition to the chat-completion wire format
fn tool_to_wire(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        history: &[Message],
        options: GenerateOptions,
        cancel: CancellationToken,
    ) -> LlmResult<mpsc::Receiver<StreamEvent>> {
        if self.api_key.is_empty() {
            return Err(missing_api_key_error("openai"));
        }

        let body = self.build_request_body(history, &options);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = self.model.as_str(),
            messages = history.len(),
            tools = options.tools.len(),
            "sending chat completion request"
        );

        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .bearer_auth(&self.api_key);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = request.send() => result.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?,
        };

        let status = response.status().as_u16();
        if status != 200 {
            let body_text = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body_text, "openai"));
        }

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut accumulator = StreamAccumulator::new();
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("chat stream cancelled");
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: LlmError::NetworkError {
                                    message: e.to_string(),
                                }
                                .to_string(),
                            })
                            .await;
                        return;
                    }
                    None => break,
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line: String = buffer.drain(..=line_end).collect();

                    match accumulator.apply_line(line.trim_end()) {
                        Ok(events) => {
                            for event in events {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse stream delta");
                            let _ = tx
                                .send(StreamEvent::Error {
                                    message: e.to_string(),
                                })
                                .await;
                            return;
                        }
                    }

                    if accumulator.is_done() {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// A tool call under reconstruction from sharded deltas
#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buffer: String,
}

/// Reassembles a chat-completion SSE feed into [`StreamEvent`]s.
///
/// Pending tool calls are keyed by the delta `index` field. A call is
/// finalized when a delta reports `finish_reason` of `tool_calls` or
/// `stop`: the buffered argument string is parsed as a JSON object, with
/// parse failure recovered as an empty map (the tool layer validates
/// arguments itself).
pub(crate) struct StreamAccumulator {
    pending: BTreeMap<u64, PendingToolCall>,
    done: bool,
}

impl StreamAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            done: false,
        }
    }

    /// Whether the `[DONE]` terminator has been seen.
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Process one line of the response body.
    pub(crate) fn apply_line(&mut self, line: &str) -> LlmResult<Vec<StreamEvent>> {
        let trimmed = line.trim();
        let data = match trimmed.strip_prefix("data: ") {
            Some(data) => data,
            None => return Ok(Vec::new()),
        };

        if data == "[DONE]" {
            self.done = true;
            return Ok(Vec::new());
        }

        let response: StreamResponse =
            serde_json::from_str(data).map_err(|e| LlmError::ParseError {
                message: format!("invalid stream delta: {}", e),
            })?;

        let mut events = Vec::new();

        for choice in response.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(StreamEvent::TextDelta { content });
                }
            }

            if let Some(chunks) = choice.delta.tool_calls {
                for chunk in chunks {
                    let pending = self.pending.entry(chunk.index).or_default();
                    if let Some(id) = chunk.id {
                        if !id.is_empty() {
                            pending.id = id;
                        }
                    }
                    if let Some(function) = chunk.function {
                        if let Some(name) = function.name {
                            if !name.is_empty() {
                                pending.name = name;
                            }
                        }
                        if let Some(arguments) = function.arguments {
                            pending.args_buffer.push_str(&arguments);
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                if reason == "tool_calls" || reason == "stop" {
                    if let Some(event) = self.finalize() {
                        events.push(event);
                    }
                }
            }
        }

        Ok(events)
    }

    /// Finalize all pending calls into a single tool-calls batch.
    fn finalize(&mut self) -> Option<StreamEvent> {
        if self.pending.is_empty() {
            return None;
        }

        let calls: Vec<ToolCallPart> = std::mem::take(&mut self.pending)
            .into_values()
            .map(|pending| {
                let args: Map<String, Value> = if pending.args_buffer.is_empty() {
                    Map::new()
                } else {
                    serde_json::from_str(&pending.args_buffer).unwrap_or_default()
                };
                ToolCallPart {
                    id: pending.id,
                    name: pending.name,
                    args,
                }
            })
            .collect();

        Some(StreamEvent::ToolCalls { calls })
    }
}

/// Chat-completion SSE delta payload
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallChunk {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionChunk {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_delta() {
        let mut acc = StreamAccumulator::new();
        let events = acc
            .apply_line(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta {
                content: "Hello".to_string()
            }]
        );
    }

    #[test]
    fn test_empty_content_skipped() {
        let mut acc = StreamAccumulator::new();
        let events = acc
            .apply_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_done_terminator() {
        let mut acc = StreamAccumulator::new();
        assert!(!acc.is_done());
        let events = acc.apply_line("data: [DONE]").unwrap();
        assert!(events.is_empty());
        assert!(acc.is_done());
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.apply_line("").unwrap().is_empty());
        assert!(acc.apply_line(": keep-alive").unwrap().is_empty());
        assert!(acc.apply_line("event: message").unwrap().is_empty());
    }

    #[test]
    fn test_sharded_tool_call_reassembly() {
        // The id arrives after arguments have begun; the name in yet another
        // delta. Only the index ties the fragments together.
        let mut acc = StreamAccumulator::new();

        let events = acc
            .apply_line(
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"pa"}}]}}]}"#,
            )
            .unwrap();
        assert!(events.is_empty());

        let events = acc
            .apply_line(
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"list_directory"}}]}}]}"#,
            )
            .unwrap();
        assert!(events.is_empty());

        let events = acc
            .apply_line(
                r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\": \".\"}"}}]}}]}"#,
            )
            .unwrap();
        assert!(events.is_empty());

        let events = acc
            .apply_line(r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::ToolCalls { calls } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_abc");
                assert_eq!(calls[0].name, "list_directory");
                assert_eq!(calls[0].args.get("path"), Some(&Value::String(".".into())));
            }
            other => panic!("Expected ToolCalls, got {:?}", other),
        }

        // Pending state cleared: a second finish emits nothing.
        let events = acc
            .apply_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_multiple_tool_calls_ordered_by_index() {
        let mut acc = StreamAccumulator::new();
        acc.apply_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"read_file","arguments":"{}"}}]}}]}"#,
        )
        .unwrap();
        acc.apply_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"list_directory","arguments":"{}"}}]}}]}"#,
        )
        .unwrap();
        let events = acc
            .apply_line(r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap();
        match &events[0] {
            StreamEvent::ToolCalls { calls } => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "call_a");
                assert_eq!(calls[1].id, "call_b");
            }
            other => panic!("Expected ToolCalls, got {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_arguments_recovered_as_empty_map() {
        let mut acc = StreamAccumulator::new();
        acc.apply_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_x","function":{"name":"replace","arguments":"not json"}}]}}]}"#,
        )
        .unwrap();
        let events = acc
            .apply_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
            .unwrap();
        match &events[0] {
            StreamEvent::ToolCalls { calls } => {
                assert_eq!(calls[0].name, "replace");
                assert!(calls[0].args.is_empty());
            }
            other => panic!("Expected ToolCalls, got {:?}", other),
        }
    }

    #[test]
    fn test_text_then_tool_calls_in_one_turn() {
        let mut acc = StreamAccumulator::new();
        let events = acc
            .apply_line(r#"data: {"choices":[{"delta":{"content":"Okay."}}]}"#)
            .unwrap();
        assert_eq!(events.len(), 1);
        acc.apply_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"list_directory","arguments":"{\"path\":\".\"}"}}]}}]}"#,
        )
        .unwrap();
        let events = acc
            .apply_line(r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap();
        assert!(matches!(&events[0], StreamEvent::ToolCalls { calls } if calls.len() == 1));
    }

    #[test]
    fn test_malformed_delta_is_parse_error() {
        let mut acc = StreamAccumulator::new();
        let err = acc.apply_line("data: {not json").unwrap_err();
        assert!(matches!(err, LlmError::ParseError { .. }));
    }

    #[test]
    fn test_message_to_wire_simple_text() {
        let wire = message_to_wire(&Message::user("Hello!"));
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"], "Hello!");
    }

    #[test]
    fn test_message_to_wire_model_role_becomes_assistant() {
        let wire = message_to_wire(&Message::text(Role::Model, "hi"));
        assert_eq!(wire["role"], "assistant");
    }

    #[test]
    fn test_message_to_wire_text_parts_joined_with_newline() {
        let message = Message {
            role: Role::Model,
            content: vec![Part::text("first"), Part::text("second")],
        };
        let wire = message_to_wire(&message);
        assert_eq!(wire["content"], "first\nsecond");
    }

    #[test]
    fn test_message_to_wire_tool_calls_only_has_null_content() {
        let mut args = Map::new();
        args.insert("path".to_string(), json!("src"));
        let message = Message {
            role: Role::Model,
            content: vec![Part::tool_call(ToolCallPart {
                id: "call_1".to_string(),
                name: "list_directory".to_string(),
                args,
            })],
        };
        let wire = message_to_wire(&message);
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "list_directory");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"src"}"#
        );
    }

    #[test]
    fn test_message_to_wire_text_and_tool_calls() {
        let message = Message {
            role: Role::Model,
            content: vec![
                Part::text("Let me look."),
                Part::tool_call(ToolCallPart {
                    id: "c1".to_string(),
                    name: "read_file".to_string(),
                    args: Map::new(),
                }),
            ],
        };
        let wire = message_to_wire(&message);
        assert_eq!(wire["content"], "Let me look.");
        assert_eq!(wire["tool_calls"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_message_to_wire_tool_response() {
        let wire = message_to_wire(&Message::tool_response("call_7", "read_file", "\"data\""));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_7");
        assert_eq!(wire["content"], "\"data\"");
    }

    #[test]
    fn test_tool_to_wire() {
        let tool = ToolDefinition {
            name: "read_file".to_string(),
            description: "Reads a file".to_string(),
            input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        };
        let wire = tool_to_wire(&tool);
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "read_file");
        assert_eq!(wire["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_build_request_body() {
        let provider = OpenAiProvider::new("http://localhost:11434/v1/", "key", "qwen3:8b");
        assert_eq!(provider.base_url, "http://localhost:11434/v1");

        let history = vec![Message::system("be brief"), Message::user("hi")];
        let options = GenerateOptions {
            temperature: 0.2,
            top_p: Some(0.9),
            stop: vec!["<end>".to_string()],
            tools: vec![ToolDefinition {
                name: "replace".to_string(),
                description: "edit".to_string(),
                input_schema: json!({"type": "object"}),
            }],
        };
        let body = provider.build_request_body(&history, &options);
        assert_eq!(body["model"], "qwen3:8b");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["stop"][0], "<end>");
        assert_eq!(body["tools"][0]["function"]["name"], "replace");
    }

    #[test]
    fn test_build_request_body_omits_empty_tools() {
        let provider = OpenAiProvider::new("", "key", "gpt-4o-mini");
        let body = provider.build_request_body(&[Message::user("hi")], &GenerateOptions::default());
        assert!(body.get("tools").is_none());
        assert!(body.get("top_p").is_none());
        assert!(body.get("stop").is_none());
    }

    #[tokio::test]
    async fn test_generate_rejects_missing_api_key() {
        let provider = OpenAiProvider::new("", "", "gpt-4o-mini");
        let err = provider
            .generate(
                &[Message::user("hi")],
                GenerateOptions::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed { .. }));
    }
}
