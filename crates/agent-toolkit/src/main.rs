//! agent: ask an LLM a question and let it use local and MCP tools to answer

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use llm_core::BackendKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "agent")]
#[command(about = "Tool-calling agent for local and cloud LLMs", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Answer a question, calling tools as needed
    Ask {
        /// The question to answer
        #[arg(required = true)]
        question: Vec<String>,

        /// Wait for whole responses instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Do not write the transcript
        #[arg(long)]
        no_save: bool,

        /// Continue the conversation stored in the messages file
        #[arg(long)]
        resume: bool,

        /// Transcript file (overrides config)
        #[arg(long)]
        messages_file: Option<PathBuf>,

        /// MCP server configuration file (overrides config)
        #[arg(long, env = "MCP_CONFIG")]
        mcp_config: Option<PathBuf>,

        /// Maximum model calls (overrides config)
        #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
        max_iterations: Option<usize>,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Backend: ollama or openai (overrides config)
        #[arg(short, long)]
        backend: Option<BackendKind>,
    },

    /// Print every tool definition the model would be offered
    Tools {
        /// MCP server configuration file (overrides config)
        #[arg(long, env = "MCP_CONFIG")]
        mcp_config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins when set
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            question,
            no_stream,
            no_save,
            resume,
            messages_file,
            mcp_config,
            max_iterations,
            model,
            backend,
        } => {
            commands::ask(commands::AskOptions {
                question: question.join(" "),
                verbose: cli.verbose,
                no_stream,
                no_save,
                resume,
                messages_file,
                mcp_config,
                max_iterations,
                model,
                backend,
            })
            .await
        }
        Commands::Tools { mcp_config } => commands::tools(mcp_config).await,
    }
}
