//! Bellows - Command-Line Entry Point
//!
//! Wires the engine end to end: an OpenAI-compatible provider, the
//! workspace-sandboxed toolset, optional MCP tool discovery, and session
//! persistence, behind one-shot, interactive, and investigator modes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bellows::services::tools::impls::{EditTool, ListDirTool, ReadFileTool};
use bellows::{
    Agent, AppResult, Investigator, McpClient, OpenAiProvider, StdioTransport, StreamEvent,
    Workspace,
};

#[derive(Parser)]
#[command(name = "bellows", version, about = "A local-first, tool-using agent for OpenAI-compatible backends")]
struct Cli {
    /// LLM model to use
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Base URL for an OpenAI-compatible API (e.g. http://localhost:11434/v1)
    #[arg(long, default_value = "")]
    url: String,

    /// System prompt
    #[arg(long, default_value = "You are a helpful assistant with access to files.")]
    system: String,

    /// Interactive mode (REPL)
    #[arg(short, long)]
    interactive: bool,

    /// Workspace root directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Path to session file for persistence
    #[arg(long)]
    session: Option<PathBuf>,

    /// Command to run an MCP server (e.g. "npx -y @modelcontextprotocol/server-everything")
    #[arg(long)]
    mcp: Option<String>,

    /// Run in investigator mode (the prompt is the goal)
    #[arg(long)]
    investigate: bool,

    /// The prompt
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        eprintln!("Error: OPENAI_API_KEY environment variable is required.");
        std::process::exit(1);
    }

    let provider = Arc::new(OpenAiProvider::new(cli.url.clone(), api_key, cli.model.clone()));
    let mut agent = Agent::new(provider.clone(), cli.system.clone());

    let workspace = Workspace::new(&cli.workspace)?;
    agent.register_tool(Arc::new(ListDirTool::new(workspace.clone())));
    agent.register_tool(Arc::new(ReadFileTool::new(workspace.clone())));
    agent.register_tool(Arc::new(
        EditTool::new(workspace).with_fixer(provider.clone()),
    ));

    let mut mcp_client = None;
    if let Some(command_line) = &cli.mcp {
        let mut words = command_line.split_whitespace();
        if let Some(command) = words.next() {
            let args: Vec<String> = words.map(str::to_string).collect();
            let transport = Arc::new(StdioTransport::spawn(command, &args)?);
            let client = Arc::new(McpClient::new(transport));
            client.initialize().await?;

            let tools = client.list_tools().await?;
            println!("Connected to MCP server. Discovered {} tools:", tools.len());
            for tool in tools {
                println!("  - {}", tool.name());
                agent.register_tool(tool);
            }
            mcp_client = Some(client);
        }
    }

    if let Some(path) = &cli.session {
        if path.exists() {
            if let Err(e) = agent.load_session(path) {
                eprintln!("Warning: failed to load session: {}", e);
            }
        }
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let outcome = if cli.investigate {
        let goal = cli.prompt.join(" ");
        if goal.is_empty() {
            eprintln!("Usage: bellows --investigate <goal>");
            std::process::exit(1);
        }
        println!("Investigating: {}", goal);
        let report = Investigator::new(&mut agent)
            .investigate(&goal, cancel.clone())
            .await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    } else if cli.interactive {
        run_interactive(&mut agent, cli.session.as_deref(), cancel.clone()).await
    } else {
        let prompt = cli.prompt.join(" ");
        if prompt.is_empty() {
            eprintln!("Usage: bellows [flags] <prompt>");
            std::process::exit(1);
        }
        run_exchange(&mut agent, &prompt, cli.session.as_deref(), cancel.clone()).await
    };

    if let Some(client) = mcp_client {
        let _ = client.close().await;
    }

    outcome
}

/// Run one chat exchange, streaming output to stdout, then save the session
/// if a path is configured. Provider failures are reported on the stream
/// and do not abort the process.
async fn run_exchange(
    agent: &mut Agent,
    prompt: &str,
    session: Option<&Path>,
    cancel: CancellationToken,
) -> AppResult<()> {
    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { content } => {
                    print!("{}", content);
                    let _ = std::io::stdout().flush();
                }
                StreamEvent::ToolCalls { calls } => {
                    for call in calls {
                        println!(
                            "\n[Tool Call: {}({})]",
                            call.name,
                            serde_json::Value::Object(call.args)
                        );
                    }
                }
                StreamEvent::Error { message } => {
                    eprintln!("\nError during generation: {}", message);
                }
            }
        }
    });

    let result = agent.chat(prompt, tx, cancel).await;
    let _ = printer.await;
    println!();

    if let Err(e) = result {
        // Already surfaced on the stream; keep the REPL alive.
        tracing::debug!(error = %e, "chat ended with provider error");
    }

    if let Some(path) = session {
        agent.save_session(path)?;
    }
    Ok(())
}

async fn run_interactive(
    agent: &mut Agent,
    session: Option<&Path>,
    cancel: CancellationToken,
) -> AppResult<()> {
    println!("Bellows Interactive Mode (Ctrl+D to exit)");
    println!("-----------------------------------------");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        run_exchange(agent, input, session, cancel.clone()).await?;

        if cancel.is_cancelled() {
            break;
        }
    }
    Ok(())
}
