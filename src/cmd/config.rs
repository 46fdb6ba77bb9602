//! Configuration view and validation commands (`council config`).

use anyhow::{Context, Result};

use super::super::{Cli, ConfigCommands};

/// Starter file written by `council config init`.
const STARTER_TOML: &str = r#"[ollama]
base_url = "http://localhost:11434"
temperature = 0.0
# request_timeout_secs = 600

[backends]
decision = "qwen2.5:1.5b"
coders = []

# [[backends.proposers]]
# identity = "coder"
# model = "qwen2.5-coder:7b"

[run]
output_dir = "council_output"
max_code_attempts = 3
"#;

pub fn cmd_config(
    cli: &Cli,
    project_dir: &std::path::Path,
    command: Option<ConfigCommands>,
) -> Result<()> {
    use council::config::{CONFIG_FILE, Config, CouncilToml};

    let config_path = project_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Council Configuration");
            println!("=====================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found, using defaults", CONFIG_FILE);
            }
            println!();

            let config = Config::load(project_dir, super::run::cli_overrides(cli))?;
            println!("Effective values (with env/onboarding/CLI overrides):");
            println!("  ollama_url = \"{}\"", config.ollama_url);
            println!("  temperature = {}", config.temperature);
            match config.request_timeout_secs {
                Some(secs) => println!("  request_timeout_secs = {}", secs),
                None => println!("  request_timeout_secs = none"),
            }
            println!("  num_predict = {}", config.num_predict);
            println!(
                "  decision = \"{}\" ({})",
                config.decision.identity, config.decision.model_ref
            );
            for backend in &config.proposers {
                println!(
                    "  proposer = \"{}\" ({}){}",
                    backend.identity,
                    backend.model_ref,
                    if backend.code_specialized { " coder" } else { "" }
                );
            }
            println!("  output_dir = \"{}\"", config.output_dir.display());
            println!("  max_code_attempts = {}", config.code_attempt_limit);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if config_path.exists() {
                CouncilToml::load(&config_path)?;
            }
            let config = Config::load(project_dir, super::run::cli_overrides(cli))?;
            let mut warnings = config.validate();
            if let Err(e) = config.registry() {
                warnings.push(e.to_string());
            }

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::write(&config_path, STARTER_TOML)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [ollama] base_url, temperature, request_timeout_secs");
            println!("  - [backends] decision model, proposers, coders");
            println!("  - [run] output_dir, max_code_attempts");
            println!();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_toml_parses() {
        let toml = council::config::CouncilToml::parse(STARTER_TOML).unwrap();
        assert_eq!(toml.run.max_code_attempts, Some(3));
        assert!(toml.backends.proposers.is_empty());
    }
}
