//! CLI commands implementation

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::warn;

use agent_toolkit::agent::AgentLoop;
use agent_toolkit::config::UserConfig;
use agent_toolkit::conversation::Transcript;
use agent_toolkit::mcp::McpConfig;
use agent_toolkit::toolset::Toolset;
use agent_toolkit::LoopStatus;
use llm_core::{BackendKind, Config};

// ANSI color codes
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Options of the `ask` command
#[derive(Debug)]
pub struct AskOptions {
    pub question: String,
    pub verbose: bool,
    pub no_stream: bool,
    pub no_save: bool,
    pub resume: bool,
    pub messages_file: Option<PathBuf>,
    pub mcp_config: Option<PathBuf>,
    pub max_iterations: Option<usize>,
    pub model: Option<String>,
    pub backend: Option<BackendKind>,
}

/// Answer one question with the agent loop
pub async fn ask(opts: AskOptions) -> Result<()> {
    if opts.question.trim().is_empty() {
        anyhow::bail!("No question given");
    }

    let mut llm = Config::load()?;
    if let Some(kind) = opts.backend {
        llm.backend = kind;
    }
    if let Some(model) = &opts.model {
        llm.set_model(model.clone());
    }

    let settings = UserConfig::load()?;
    let working_dir = std::env::current_dir().context("Failed to determine working directory")?;

    let mut agent_config = settings
        .agent_config(working_dir.clone())
        .with_verbose(opts.verbose);
    if opts.no_stream {
        agent_config = agent_config.with_stream(false);
    }
    if let Some(max) = opts.max_iterations {
        agent_config = agent_config.with_max_iterations(max);
    }

    let messages_file = opts
        .messages_file
        .clone()
        .unwrap_or_else(|| settings.agent.messages_file.clone());
    let mut transcript = if opts.resume && messages_file.exists() {
        let transcript = Transcript::load(&messages_file)?;
        transcript
            .validate()
            .with_context(|| format!("Refusing to resume from {}", messages_file.display()))?;
        transcript
    } else {
        Transcript::new(llm.model())
    };

    let backend = llm.build_backend()?;

    let mcp_path = opts.mcp_config.clone().unwrap_or_else(|| settings.mcp.config_path.clone());
    let servers = McpConfig::load_or_default(&mcp_path)?;
    let toolset = Toolset::start(&servers.servers).await?;
    for name in &toolset.failed_servers {
        eprintln!("{}Warning:{} MCP server '{}' failed to start", YELLOW, RESET, name);
    }

    let Toolset { router, mcp, .. } = toolset;
    let agent = AgentLoop::new(backend, router, agent_config)
        .with_tool_context(settings.tool_context(working_dir));

    if opts.verbose {
        println!("{}Agent{}", BOLD, RESET);
        println!("  Backend: {} ({})", llm.backend, llm.model());
        println!("  Tools: {}", agent.router().registry().names().join(", "));
        println!();
    }

    let outcome = agent
        .continue_conversation(transcript.messages.clone(), &opts.question)
        .await;

    if let Err(e) = mcp.stop_all().await {
        warn!(error = %e, "Failed to stop MCP servers cleanly");
    }

    transcript.replace_messages(outcome.messages);
    if !opts.no_save {
        transcript.save(&messages_file)?;
        if opts.verbose {
            println!("{}Transcript saved:{} {}", DIM, RESET, messages_file.display());
        }
    }

    match &outcome.status {
        LoopStatus::Done => {
            println!("{}", outcome.answer);
            Ok(())
        }
        status => {
            println!("{}", outcome.answer);
            eprintln!(
                "{}Stopped:{} {} after {} model call(s)",
                RED, RESET, status, outcome.iterations
            );
            anyhow::bail!("Agent run did not complete ({})", status)
        }
    }
}

/// Print the merged tool definitions as the model would see them
pub async fn tools(mcp_config: Option<PathBuf>) -> Result<()> {
    let settings = UserConfig::load()?;
    let mcp_path = mcp_config.unwrap_or_else(|| settings.mcp.config_path.clone());
    let servers = McpConfig::load_or_default(&mcp_path)?;

    let toolset = Toolset::start(&servers.servers).await?;
    let rendered = serde_json::to_string_pretty(&toolset.router.registry().schemas());
    let stopped = toolset.mcp.stop_all().await;

    println!("{}", rendered?);
    for name in &toolset.failed_servers {
        eprintln!("{}Warning:{} MCP server '{}' failed to start", YELLOW, RESET, name);
    }
    stopped
}
