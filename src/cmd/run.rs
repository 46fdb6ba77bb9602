//! Council workflow (`council` and `council code`).

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;

use super::super::Cli;

pub fn cli_overrides(cli: &Cli) -> council::config::CliOverrides {
    council::config::CliOverrides {
        output_dir: cli.output_dir.clone(),
        max_code_attempts: cli.max_code_attempts,
        verbose: cli.verbose,
        yes: cli.yes,
    }
}

fn prompt_request(yes: bool) -> Result<String> {
    use dialoguer::{Input, theme::ColorfulTheme};

    if yes {
        bail!("--request is required when running with --yes");
    }
    let request: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("What should the council build?")
        .interact_text()
        .context("Failed to read project request")?;
    let request = request.trim().to_string();
    if request.is_empty() {
        bail!("The project request cannot be empty");
    }
    Ok(request)
}

pub async fn run_council(cli: &Cli, project_dir: &Path) -> Result<()> {
    use console::style;
    use council::artifacts::ArtifactStore;
    use council::backend::{OllamaClient, TextGenerationClient};
    use council::config::Config;
    use council::gates::{ConsoleGate, ScriptedGate};
    use council::logging;
    use council::memory::ConversationMemory;
    use council::orchestrator::WorkflowEngine;
    use council::ui::CouncilUI;

    let config = Config::load(project_dir, cli_overrides(cli))?;
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.output_dir.display()
        )
    })?;
    let _log_guard = logging::init(config.verbose, Some(&config.output_dir.join("logs")))?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let registry = config.registry()?;
    let request = match &cli.request {
        Some(request) => request.trim().to_string(),
        None => prompt_request(config.auto_approve)?,
    };
    if request.is_empty() {
        bail!("The project request cannot be empty");
    }

    println!();
    println!("{}", style("Development Council").bold().cyan());
    println!(
        "  {} {} ({})",
        style("Decision:").dim(),
        registry.decision().identity,
        registry.decision().model_ref
    );
    for backend in registry.proposers() {
        let tag = if backend.code_specialized { " [coder]" } else { "" };
        println!(
            "  {} {} ({}){}",
            style("Proposer:").dim(),
            backend.identity,
            backend.model_ref,
            tag
        );
    }
    println!(
        "  {} {}",
        style("Output:").dim(),
        config.output_dir.display()
    );
    println!();

    let memory = ConversationMemory::new();
    let client = OllamaClient::new(
        &config.ollama_url,
        config.temperature,
        config.request_timeout_secs,
        memory.clone(),
    )?
    .with_num_predict(config.num_predict);
    let client: Arc<dyn TextGenerationClient> = Arc::new(client);
    let store = ArtifactStore::new(&config.output_dir);
    let ui = CouncilUI::new(config.verbose);

    let result = if config.auto_approve {
        WorkflowEngine::new(client, ScriptedGate::auto_approve(), registry, store)
            .with_ui(ui)
            .with_code_attempt_limit(config.code_attempt_limit)
            .run(&request)
            .await
    } else {
        WorkflowEngine::new(client, ConsoleGate::new(), registry, store)
            .with_ui(ui)
            .with_code_attempt_limit(config.code_attempt_limit)
            .run(&request)
            .await
    };

    tracing::debug!(threads = memory.thread_count(), "Discarding conversation memory");
    memory.discard();
    let state = result?;

    println!();
    println!(
        "{} {}/{} milestones complete",
        style("Run finished:").bold().green(),
        state.milestones.completed_count(),
        state.milestones.len()
    );
    println!(
        "  {} {}",
        style("Artifacts:").dim(),
        config.output_dir.display()
    );
    println!(
        "  {} {}",
        style("Code:").dim(),
        config.output_dir.join(council::artifacts::CODE_DIR).display()
    );

    Ok(())
}
