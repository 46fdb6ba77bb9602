use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "council")]
#[command(version, about = "Human-gated development council of local LLMs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every gate and continue through every milestone without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    /// Directory that receives artifacts and generated code
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Project request. Prompted for when omitted.
    #[arg(long, global = true)]
    pub request: Option<String>,

    /// Automated code review rounds per milestone
    #[arg(long, global = true)]
    pub max_code_attempts: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the development council workflow (default)
    Code,
    /// Discover Ollama models and record which ones sit on the council
    Onboard,
    /// View, validate or create council.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a starter council.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = std::env::current_dir().context("Failed to get current directory")?;

    match &cli.command {
        None | Some(Commands::Code) => cmd::run_council(&cli, &project_dir).await?,
        Some(Commands::Onboard) => cmd::cmd_onboard(&cli).await?,
        Some(Commands::Config { command }) => {
            cmd::cmd_config(&cli, &project_dir, command.clone())?
        }
    }

    Ok(())
}
