//! Orchestrator
//!
//! The bounded reason-act loop. Each turn streams one model response,
//! forwards its events to the caller, executes any requested tools
//! sequentially, and feeds the results back as history for the next turn.
//! A turn without tool calls ends the loop; a configurable turn cap bounds
//! runaway tool chains.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::llm::provider::Provider;
use crate::services::llm::types::{
    GenerateOptions, LlmError, Message, Part, Role, StreamEvent, ToolCallPart,
};
use crate::services::tools::trait_def::{Tool, ToolContext, ToolRegistry};
use crate::utils::error::{AppError, AppResult};

/// Default safety limit on provider turns per chat call
const DEFAULT_MAX_TURNS: usize = 10;

/// The agent: provider, tool registry, and mutable conversation history.
///
/// History mutation is confined to the task driving [`Agent::chat`]; exactly
/// one provider stream is active per in-flight chat, and callers must fully
/// drain the outbound channel.
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    history: Vec<Message>,
    system_prompt: String,
    max_turns: usize,
}

impl Agent {
    /// Create an agent with an empty registry. A non-empty system prompt
    /// seeds the history with a system message.
    pub fn new(provider: Arc<dyn Provider>, system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        let mut history = Vec::new();
        if !system_prompt.is_empty() {
            history.push(Message::system(system_prompt.clone()));
        }
        Self {
            provider,
            tools: ToolRegistry::new(),
            history,
            system_prompt,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Override the per-chat turn bound.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Register a tool.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.register(tool);
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Replace the conversation history wholesale (session resume, or the
    /// investigator swapping in its own transcript).
    pub fn replace_history(&mut self, history: Vec<Message>) {
        self.history = history;
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, system_prompt: impl Into<String>) {
        self.system_prompt = system_prompt.into();
    }

    /// Run the reason-act loop for one user input.
    ///
    /// Events are forwarded to `tx` as they arrive: text deltas in provider
    /// order, at most one tool-calls batch per turn, and a terminal error if
    /// the provider fails. Tool errors are not fatal: they are recorded as
    /// tool-response content so the model can observe and retry. Reaching
    /// the turn cap terminates silently.
    pub async fn chat(
        &mut self,
        input: impl Into<String>,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> AppResult<()> {
        self.history.push(Message::user(input));

        for turn in 0..self.max_turns {
            let options = GenerateOptions {
                tools: self.tools.definitions(),
                ..Default::default()
            };
            debug!(turn, history = self.history.len(), "starting agent turn");

            let mut rx = match self
                .provider
                .generate(&self.history, options, cancel.clone())
                .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return Err(AppError::Llm(e));
                }
            };

            let mut full_text = String::new();
            let mut calls: Vec<ToolCallPart> = Vec::new();
            let mut stream_error: Option<String> = None;

            while let Some(event) = rx.recv().await {
                match &event {
                    StreamEvent::TextDelta { content } => full_text.push_str(content),
                    StreamEvent::ToolCalls { calls: batch } => calls.extend(batch.iter().cloned()),
                    StreamEvent::Error { message } => stream_error = Some(message.clone()),
                }
                let _ = tx.send(event).await;
                if stream_error.is_some() {
                    break;
                }
            }

            if let Some(message) = stream_error {
                // The failed model turn is only kept if it already produced
                // text. Accumulated tool calls are dropped: they will never
                // receive responses, and a call without a response may not
                // land in history.
                if !full_text.is_empty() {
                    self.history.push(model_message(full_text, &[]));
                }
                return Err(AppError::Llm(LlmError::Other { message }));
            }

            if cancel.is_cancelled() {
                debug!(turn, "chat cancelled");
                return Ok(());
            }

            self.history.push(model_message(full_text, &calls));

            if calls.is_empty() {
                debug!(turn, "natural stop, no tool calls");
                return Ok(());
            }

            let ctx = ToolContext::new(cancel.clone());
            for call in &calls {
                let content = match self.tools.get(&call.name) {
                    None => {
                        warn!(tool = call.name.as_str(), "model requested unknown tool");
                        format!("Error: Tool '{}' not found.", call.name)
                    }
                    Some(tool) => {
                        info!(tool = call.name.as_str(), id = call.id.as_str(), "executing tool");
                        match tool.execute(&ctx, &call.args).await {
                            Ok(value) => serde_json::to_string(&value)?,
                            Err(e) => format!("Error executing tool: {}", e),
                        }
                    }
                };
                self.history
                    .push(Message::tool_response(&call.id, &call.name, content));
            }
        }

        // Turn cap reached while the model was still issuing tool calls.
        // The loop is bounded for safety, not strict termination; the next
        // caller interaction may continue the conversation.
        debug!(max_turns = self.max_turns, "turn cap reached");
        Ok(())
    }
}

/// Assemble a model message: accumulated text (if any) first, then the
/// tool-call parts in call order.
fn model_message(full_text: String, calls: &[ToolCallPart]) -> Message {
    let mut parts = Vec::with_capacity(calls.len() + 1);
    if !full_text.is_empty() {
        parts.push(Part::text(full_text));
    }
    for call in calls {
        parts.push(Part::tool_call(call.clone()));
    }
    Message {
        role: Role::Model,
        content: parts,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::services::llm::types::LlmResult;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Provider double that plays back a scripted list of event sequences,
    /// one per generate call, and records how often it was invoked.
    pub(crate) struct ScriptedProvider {
        turns: Mutex<std::vec::IntoIter<Vec<StreamEvent>>>,
        pub(crate) calls: Mutex<usize>,
        pub(crate) fail_upfront: bool,
    }

    impl ScriptedProvider {
        pub(crate) fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                turns: Mutex::new(turns.into_iter()),
                calls: Mutex::new(0),
                fail_upfront: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                turns: Mutex::new(Vec::new().into_iter()),
                calls: Mutex::new(0),
                fail_upfront: true,
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _history: &[Message],
            _options: GenerateOptions,
            _cancel: CancellationToken,
        ) -> LlmResult<mpsc::Receiver<StreamEvent>> {
            *self.calls.lock().unwrap() += 1;
            if self.fail_upfront {
                return Err(LlmError::ServerError {
                    message: "backend down".to_string(),
                    status: Some(500),
                });
            }
            let events = self.turns.lock().unwrap().next().unwrap_or_default();
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }
}
