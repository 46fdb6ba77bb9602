//! Ollama model onboarding (`council onboard`).

use anyhow::{Context, Result, bail};

use super::super::Cli;

pub async fn cmd_onboard(cli: &Cli) -> Result<()> {
    use console::style;
    use council::config::{DEFAULT_OLLAMA_URL, OnboardConfig};
    use council::onboard::{apply_selection, fetch_models, load_existing};
    use dialoguer::{Input, MultiSelect, theme::ColorfulTheme};
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    let _log_guard = council::logging::init(cli.verbose, None)?;
    let config_path = OnboardConfig::default_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    let existing = load_existing(&config_path);

    println!();
    println!("{}", style("Ollama Model Onboarding").bold().cyan());
    println!();

    let theme = ColorfulTheme::default();
    let default_url = existing
        .ollama_base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
    let base_url: String = Input::with_theme(&theme)
        .with_prompt("Ollama base URL")
        .default(default_url)
        .interact_text()
        .context("Failed to read base URL")?;
    let base_url = base_url.trim().trim_end_matches('/').to_string();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .expect("progress bar template is a valid static string"),
    );
    spinner.set_message(format!("Fetching models from {}/api/tags", base_url));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let http = reqwest::Client::new();
    let fetched = fetch_models(&http, &base_url).await;
    spinner.finish_and_clear();
    let models = fetched?;

    if models.is_empty() {
        println!(
            "{}",
            style("No models found at the specified Ollama instance.").yellow()
        );
        return Ok(());
    }

    let defaults: Vec<bool> = models
        .iter()
        .map(|m| existing.ollama_models.contains(m))
        .collect();
    let picked = MultiSelect::with_theme(&theme)
        .with_prompt("Select the models to seat on the council (space to toggle)")
        .items(&models)
        .defaults(&defaults)
        .interact()
        .context("Failed to read model selection")?;

    if picked.is_empty() {
        bail!("No models selected");
    }
    let selected: Vec<String> = picked.into_iter().map(|i| models[i].clone()).collect();

    let (config, added) = apply_selection(existing, &base_url, &selected);
    config.save(&config_path)?;

    println!();
    println!(
        "{} Configuration saved to {}",
        style("✓").green().bold(),
        config_path.display()
    );
    println!("  {} new model(s) recorded", added);
    for model in &config.ollama_models {
        println!("  - {}", model);
    }

    Ok(())
}
