//! MCP Client
//!
//! JSON-RPC 2.0 client for communicating with MCP (Model Context Protocol)
//! servers over subprocess stdio, with newline-delimited JSON framing.
//!
//! I/O is strictly lock-step: one request, one response. Concurrent RPCs on
//! a single client are not supported; a dispatch loop keyed by request id
//! would be needed for that, and this client deliberately avoids it.
//! Callers are single-threaded by contract.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::services::tools::trait_def::{Tool, ToolContext, ToolError};
use crate::utils::error::{AppError, AppResult};

/// Protocol version advertised during the handshake
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 message: request, response, or notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Communication channel to an MCP server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Serialize and deliver one message.
    async fn send(&self, message: &JsonRpcMessage) -> AppResult<()>;

    /// Block until the next message arrives.
    async fn receive(&self) -> AppResult<JsonRpcMessage>;

    /// Tear the channel down.
    async fn close(&self) -> AppResult<()>;
}

/// Stdio transport: a spawned child process speaking newline-delimited
/// JSON-RPC on stdin/stdout. The child's stderr is forwarded to the host
/// stderr for diagnostics.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    reader: Mutex<Lines<BufReader<ChildStdout>>>,
}

impl StdioTransport {
    /// Spawn `command args...` and connect to its stdio.
    pub fn spawn(command: &str, args: &[String]) -> AppResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            AppError::command(format!("failed to spawn MCP server '{}': {}", command, e))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AppError::command(format!("failed to capture stdin of MCP server '{}'", command))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AppError::command(format!("failed to capture stdout of MCP server '{}'", command))
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            AppError::command(format!("failed to capture stderr of MCP server '{}'", command))
        })?;

        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stderr, &mut tokio::io::stderr()).await;
        });

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            reader: Mutex::new(BufReader::new(stdout).lines()),
        })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, message: &JsonRpcMessage) -> AppResult<()> {
        let encoded = serde_json::to_string(message)?;

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| AppError::command("MCP transport is closed"))?;
        stdin.write_all(encoded.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn receive(&self) -> AppResult<JsonRpcMessage> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next_line().await? {
                Some(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return serde_json::from_str(trimmed).map_err(|e| {
                        AppError::protocol(format!("invalid JSON-RPC frame from server: {}", e))
                    });
                }
                None => return Err(AppError::command("MCP server closed its stdout")),
            }
        }
    }

    async fn close(&self) -> AppResult<()> {
        // Dropping stdin closes the pipe so a well-behaved server can exit.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "MCP server already exited");
            }
        }
        Ok(())
    }
}

/// MCP client: handshake, tool discovery, and call proxying.
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    request_id: AtomicU64,
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            request_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// One lock-step request/response exchange.
    async fn request(&self, method: &str, params: Option<Value>) -> AppResult<Value> {
        let message = JsonRpcMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(self.next_id()),
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        };
        self.transport.send(&message).await?;

        let response = self.transport.receive().await?;
        if let Some(error) = response.error {
            return Err(AppError::protocol(format!(
                "{} failed: {} (code {})",
                method, error.message, error.code
            )));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Fire-and-forget notification (no id, no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> AppResult<()> {
        let message = JsonRpcMessage {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        };
        self.transport.send(&message).await
    }

    /// Perform the MCP initialization handshake:
    /// 1. Send `initialize` with protocol version, capabilities, client info
    /// 2. Receive the server's response (errors propagate)
    /// 3. Send the `notifications/initialized` notification
    pub async fn initialize(&self) -> AppResult<()> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": false },
                "sampling": {}
            },
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.request("initialize", Some(params)).await?;
        debug!(
            protocol = ?result.get("protocolVersion"),
            "MCP server initialized"
        );

        self.notify("notifications/initialized", None).await
    }

    /// Discover the server's tools. Each is adapted to a [`Tool`] that
    /// proxies execution back through this client.
    pub async fn list_tools(self: &Arc<Self>) -> AppResult<Vec<Arc<dyn Tool>>> {
        let result = self.request("tools/list", None).await?;
        let entries = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::protocol("tools/list result is missing a tools array"))?;

        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::protocol("tool entry is missing a name"))?;
            let description = entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let schema = entry
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({ "type": "object" }));

            tools.push(Arc::new(McpTool {
                client: Arc::clone(self),
                name: name.to_string(),
                description,
                schema,
            }));
        }

        debug!(count = tools.len(), "discovered MCP tools");
        Ok(tools)
    }

    /// Call a remote tool. The MCP result's text segments are concatenated;
    /// `isError: true` surfaces as an error carrying that text.
    pub async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> AppResult<String> {
        let params = json!({
            "name": name,
            "arguments": args,
        });
        let result = self.request("tools/call", Some(params)).await?;

        let parsed: CallToolResult = serde_json::from_value(result)
            .map_err(|e| AppError::protocol(format!("malformed tools/call result: {}", e)))?;

        let mut output = String::new();
        for item in parsed.content {
            if item.kind == "text" {
                output.push_str(&item.text);
            }
        }

        if parsed.is_error {
            return Err(AppError::protocol(format!("tool reported error: {}", output)));
        }
        Ok(output)
    }

    /// Terminate the connection and the server subprocess.
    pub async fn close(&self) -> AppResult<()> {
        self.transport.close().await
    }
}

/// MCP tool-call result shape: `{content: [{type, text}...], isError}`
#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Adapts a remote MCP tool to the local [`Tool`] interface.
struct McpTool {
    client: Arc<McpClient>,
    name: String,
    description: String,
    schema: Value,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                warn!(tool = self.name.as_str(), "MCP tool call cancelled");
                Err(ToolError::execution("tool call cancelled"))
            }
            result = self.client.call_tool(&self.name, args) => result
                .map(Value::String)
                .map_err(|e| ToolError::execution(e.to_string())),
        }
    }
}
