//! Edit Tool
//!
//! Replaces text within a workspace file. Matching runs through three
//! strategies in strict order: exact literal match, whitespace-insensitive
//! flexible match, then an optional model-assisted fixer that recovers a
//! corrected `old_string`. An optional SHA-256 guard protects against
//! overwriting out-of-band changes between the model's read and its edit.
//!
//! The tool never writes on an ambiguous match, and a failed call leaves
//! the file byte-identical to before.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::services::llm::provider::Provider;
use crate::services::llm::types::{GenerateOptions, Message, StreamEvent};
use crate::services::tools::trait_def::{Tool, ToolContext, ToolError};
use crate::services::tools::workspace::Workspace;

const FIXER_SYSTEM_PROMPT: &str = "You are a specialized text correction agent. Your job is to find the closest match for a string in a file.";

/// Text replacement tool with exact, flexible, and self-correcting matching.
pub struct EditTool {
    workspace: Workspace,
    /// Optional provider for the self-correction strategy. When absent,
    /// the fixer step is skipped.
    fixer: Option<Arc<dyn Provider>>,
}

impl EditTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            fixer: None,
        }
    }

    /// Wire a provider into the self-correction fallback.
    pub fn with_fixer(mut self, provider: Arc<dyn Provider>) -> Self {
        self.fixer = Some(provider);
        self
    }

    /// Replace the single literal occurrence of `old_string`, if unique.
    /// `Ok(None)` means zero occurrences (try the next strategy); an
    /// ambiguous count is an error and nothing is written.
    fn try_exact(
        &self,
        target: &std::path::Path,
        content: &str,
        old_string: &str,
        new_string: &str,
    ) -> Result<Option<()>, ToolError> {
        if old_string.is_empty() {
            return Ok(None);
        }
        match content.matches(old_string).count() {
            1 => {
                let updated = content.replacen(old_string, new_string, 1);
                std::fs::write(target, updated)?;
                Ok(Some(()))
            }
            0 => Ok(None),
            n => Err(ToolError::execution(format!(
                "old_string matches {} locations in the file; add surrounding context to make it unique",
                n
            ))),
        }
    }

    /// Whitespace-insensitive match: tokenize `old_string` into
    /// non-whitespace runs and join their escaped forms with `\s+`.
    fn try_flexible(
        &self,
        target: &std::path::Path,
        content: &str,
        old_string: &str,
        new_string: &str,
    ) -> Result<Option<()>, ToolError> {
        let tokens: Vec<&str> = old_string.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(None);
        }

        let pattern = tokens
            .iter()
            .map(|token| regex::escape(token))
            .collect::<Vec<_>>()
            .join(r"\s+");
        let re = match regex::Regex::new(&pattern) {
            Ok(re) => re,
            Err(_) => return Ok(None),
        };

        let ranges: Vec<(usize, usize)> = re
            .find_iter(content)
            .map(|m| (m.start(), m.end()))
            .collect();
        match ranges.len() {
            1 => {
                let (start, end) = ranges[0];
                // new_string is spliced verbatim, never as a regex template.
                let updated = format!("{}{}{}", &content[..start], new_string, &content[end..]);
                std::fs::write(target, updated)?;
                Ok(Some(()))
            }
            0 => Ok(None),
            n => Err(ToolError::execution(format!(
                "old_string loosely matches {} locations in the file; add surrounding context to make it unique",
                n
            ))),
        }
    }

    /// Ask the wired provider for the unique substring of the file that
    /// best matches the broken `old_string`. Any failure just skips the
    /// strategy.
    async fn run_fixer(&self, ctx: &ToolContext, content: &str, old_string: &str) -> Option<String> {
        let provider = self.fixer.as_ref()?;

        let user_prompt = format!(
            "I want to replace a string in a file, but I can't find an exact match.\n\
             Here is the string I'm looking for (it might have wrong indentation or whitespace):\n\
             <<<<<<<<\n{}\n>>>>>>>>\n\n\
             Here is the actual file content:\n\
             <<<<<<<<\n{}\n>>>>>>>>\n\n\
             Find the unique string in the file content that most likely matches my intent.\n\
             Return ONLY the exact string from the file content, with no other text.\n\
             If there is no clear match or multiple matches, return nothing.",
            old_string, content
        );
        let history = vec![
            Message::system(FIXER_SYSTEM_PROMPT),
            Message::user(user_prompt),
        ];
        let options = GenerateOptions {
            temperature: 0.0,
            ..Default::default()
        };

        let mut rx = match provider.generate(&history, options, ctx.cancel.clone()).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "fixer request failed");
                return None;
            }
        };

        let mut result = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { content } => result.push_str(&content),
                StreamEvent::Error { message } => {
                    warn!(error = message.as_str(), "fixer stream failed");
                    return None;
                }
                StreamEvent::ToolCalls { .. } => {}
            }
        }

        Some(result.trim().to_string())
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "replace"
    }

    fn description(&self) -> &str {
        "Replaces text within a file. Provide unique old_string to target the change. Supports exact, flexible, and self-correcting matching."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_string": {"type": "string"},
                "new_string": {"type": "string"},
                "expected_hash": {
                    "type": "string",
                    "description": "SHA-256 hash of the file content before editing. Optional but recommended for safety."
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or(ToolError::MissingArgument("path"))?;
        let old_string = args
            .get("old_string")
            .and_then(|v| v.as_str())
            .ok_or(ToolError::MissingArgument("old_string"))?;
        let new_string = args
            .get("new_string")
            .and_then(|v| v.as_str())
            .ok_or(ToolError::MissingArgument("new_string"))?;
        let expected_hash = args.get("expected_hash").and_then(|v| v.as_str());

        let target = self.workspace.resolve(path)?;
        let bytes = std::fs::read(&target)
            .map_err(|e| ToolError::execution(format!("failed to read file: {}", e)))?;

        // The hash guard gates every strategy, including the fixer.
        if let Some(expected) = expected_hash {
            let current = format!("{:x}", Sha256::digest(&bytes));
            if current != expected {
                return Err(ToolError::execution(format!(
                    "file content has changed (hash mismatch): expected {}, got {}; re-read the file before editing",
                    expected, current
                )));
            }
        }

        let content = String::from_utf8(bytes)
            .map_err(|_| ToolError::execution(format!("file is not valid UTF-8: {}", path)))?;

        if self
            .try_exact(&target, &content, old_string, new_string)?
            .is_some()
        {
            return Ok(Value::String(
                "Successfully replaced text (exact match).".to_string(),
            ));
        }

        if self
            .try_flexible(&target, &content, old_string, new_string)?
            .is_some()
        {
            return Ok(Value::String(
                "Successfully replaced text (flexible match).".to_string(),
            ));
        }

        if self.fixer.is_some() {
            if let Some(fixed) = self.run_fixer(ctx, &content, old_string).await {
                debug!(corrected = fixed.as_str(), "fixer proposed a replacement target");
                // A fixer suggestion is only trusted through the exact
                // strategy, never re-run through the flexible one; an
                // ambiguous suggestion falls through to not-found.
                if !fixed.is_empty() && fixed != old_string {
                    if let Ok(Some(())) = self.try_exact(&target, &content, &fixed, new_string) {
                        return Ok(Value::String(
                            "Successfully replaced text (auto-corrected old_string).".to_string(),
                        ));
                    }
                }
            }
            return Err(ToolError::execution(
                "old_string not found (tried exact, flexible, and fixer strategies)",
            ));
        }

        Err(ToolError::execution(
            "old_string not found (tried exact and flexible strategies)",
        ))
    }
}
