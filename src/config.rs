//! Layered configuration for a council run.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `council.toml` in the working directory
//! 3. Process environment, including a `.env` file
//! 4. The onboarding file `~/.dev-council/llm_config.json`
//! 5. CLI flags
//!
//! # Configuration File Format
//!
//! ```toml
//! [ollama]
//! base_url = "http://localhost:11434"
//! temperature = 0.0
//! request_timeout_secs = 600
//! num_predict = 4096
//!
//! [backends]
//! decision = "qwen2.5:7b"
//! coders = ["coder"]
//!
//! [[backends.proposers]]
//! identity = "coder"
//! model = "qwen2.5-coder:7b"
//!
//! [[backends.proposers]]
//! model = "llama3.2:3b"
//!
//! [run]
//! output_dir = "council_output"
//! max_code_attempts = 3
//! ```
//!
//! # Environment
//!
//! | Variable             | Meaning                                              |
//! |----------------------|------------------------------------------------------|
//! | `GPT_LLM`            | Decision backend model                               |
//! | `<NAME>_LLM`         | Proposal backend `<name>` (lowercased)               |
//! | `CODER_LLMS`         | Comma-separated identities that are code-specialized |
//! | `OLLAMA_URL`         | Ollama base URL                                      |
//! | `OLLAMA_TEMPERATURE` | Sampling temperature                                 |
//! | `COUNCIL_OUTPUT_DIR` | Output root                                          |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::ollama::DEFAULT_NUM_PREDICT;
use crate::backend::{Backend, BackendRegistry, sanitize_identity};
use crate::orchestrator::state::DEFAULT_CODE_ATTEMPT_LIMIT;

pub const CONFIG_FILE: &str = "council.toml";
pub const DEFAULT_DECISION_MODEL: &str = "qwen2.5:1.5b";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OUTPUT_DIR: &str = "council_output";
pub const DECISION_IDENTITY: &str = "lead";

const DECISION_VAR: &str = "GPT_LLM";
const MODEL_VAR_SUFFIX: &str = "_LLM";
const CODERS_VAR: &str = "CODER_LLMS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Per-request timeout. Unset means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendEntry {
    /// Defaults to a name derived from the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub model: String,
    #[serde(default)]
    pub code_specialized: bool,
}

impl BackendEntry {
    fn to_backend(&self) -> Backend {
        let backend = match &self.identity {
            Some(identity) => Backend::new(identity, &self.model),
            None => Backend::from_model(&self.model),
        };
        if self.code_specialized {
            backend.code_specialized(true)
        } else {
            backend
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default)]
    pub proposers: Vec<BackendEntry>,
    /// Identities to treat as code-specialized.
    #[serde(default)]
    pub coders: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_code_attempts: Option<u32>,
}

/// The complete council.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouncilToml {
    #[serde(default)]
    pub ollama: OllamaSection,
    #[serde(default)]
    pub backends: BackendsSection,
    #[serde(default)]
    pub run: RunSection,
}

impl CouncilToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse council.toml")
    }

    /// Load `council.toml` from `dir`, or defaults when it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Settings read from environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvLayer {
    pub decision: Option<String>,
    /// `(identity, model)` pairs, ordered by variable name.
    pub proposers: Vec<(String, String)>,
    pub coders: Vec<String>,
    pub ollama_url: Option<String>,
    pub temperature: Option<f32>,
    pub output_dir: Option<PathBuf>,
}

impl EnvLayer {
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut layer = Self::default();
        let mut proposers = Vec::new();

        for (key, value) in vars {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                DECISION_VAR => layer.decision = Some(value),
                CODERS_VAR => {
                    layer.coders = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(sanitize_identity)
                        .collect();
                }
                "OLLAMA_URL" => layer.ollama_url = Some(value),
                "OLLAMA_TEMPERATURE" => match value.parse::<f32>() {
                    Ok(t) => layer.temperature = Some(t),
                    Err(_) => tracing::warn!(value = %value, "Ignoring invalid OLLAMA_TEMPERATURE"),
                },
                "COUNCIL_OUTPUT_DIR" => layer.output_dir = Some(PathBuf::from(value)),
                _ => {
                    if let Some(name) = key.strip_suffix(MODEL_VAR_SUFFIX)
                        && !name.is_empty()
                    {
                        proposers.push((key.clone(), sanitize_identity(name), value));
                    }
                }
            }
        }

        proposers.sort_by(|a, b| a.0.cmp(&b.0));
        layer.proposers = proposers
            .into_iter()
            .map(|(_, identity, model)| (identity, model))
            .collect();
        layer
    }
}

/// Models recorded by `council onboard`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnboardConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_base_url: Option<String>,
    #[serde(default)]
    pub ollama_models: Vec<String>,
}

impl OnboardConfig {
    /// `~/.dev-council/llm_config.json`, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".dev-council").join("llm_config.json"))
    }

    /// Load the file, or `None` when it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(config))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize onboarding config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Add models not already recorded, keeping order. Returns how many were added.
    pub fn merge_models<I, S>(&mut self, models: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for model in models {
            let model = model.into();
            if !self.ollama_models.contains(&model) {
                self.ollama_models.push(model);
                added += 1;
            }
        }
        added
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub output_dir: Option<PathBuf>,
    pub max_code_attempts: Option<u32>,
    pub verbose: bool,
    pub yes: bool,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_url: String,
    pub temperature: f32,
    pub request_timeout_secs: Option<u64>,
    pub num_predict: u32,
    pub decision: Backend,
    pub proposers: Vec<Backend>,
    pub output_dir: PathBuf,
    pub code_attempt_limit: u32,
    pub verbose: bool,
    pub auto_approve: bool,
}

impl Config {
    /// Read every layer from disk and the environment.
    pub fn load(project_dir: &Path, cli: CliOverrides) -> Result<Self> {
        if let Err(e) = dotenvy::from_path(project_dir.join(".env"))
            && !e.not_found()
        {
            tracing::warn!(error = %e, "Failed to load .env");
        }

        let toml = CouncilToml::load_or_default(project_dir)?;
        let env = EnvLayer::from_process();
        let onboard = match OnboardConfig::default_path() {
            Some(path) => OnboardConfig::load(&path)?,
            None => None,
        };

        Ok(Self::resolve(toml, env, onboard, cli))
    }

    /// Merge already-read layers.
    pub fn resolve(
        toml: CouncilToml,
        env: EnvLayer,
        onboard: Option<OnboardConfig>,
        cli: CliOverrides,
    ) -> Self {
        let onboard = onboard.unwrap_or_default();

        let ollama_url = onboard
            .ollama_base_url
            .clone()
            .or(env.ollama_url)
            .or(toml.ollama.base_url)
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let ollama_url = ollama_url.trim_end_matches('/').to_string();

        let decision_model = env
            .decision
            .or(toml.backends.decision)
            .unwrap_or_else(|| DEFAULT_DECISION_MODEL.to_string());
        let decision = Backend::new(DECISION_IDENTITY, decision_model);

        let coders: Vec<String> = toml
            .backends
            .coders
            .iter()
            .map(|c| sanitize_identity(c))
            .chain(env.coders)
            .collect();

        let proposers = toml
            .backends
            .proposers
            .iter()
            .map(BackendEntry::to_backend)
            .chain(
                env.proposers
                    .into_iter()
                    .map(|(identity, model)| Backend::new(identity, model)),
            )
            .chain(onboard.ollama_models.iter().map(|m| Backend::from_model(m)))
            .map(|b| {
                let flagged = b.code_specialized || coders.contains(&b.identity);
                b.code_specialized(flagged)
            })
            .collect();

        let output_dir = cli
            .output_dir
            .or(env.output_dir)
            .or(toml.run.output_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let code_attempt_limit = cli
            .max_code_attempts
            .or(toml.run.max_code_attempts)
            .unwrap_or(DEFAULT_CODE_ATTEMPT_LIMIT);

        Self {
            ollama_url,
            temperature: env.temperature.or(toml.ollama.temperature).unwrap_or(0.0),
            request_timeout_secs: toml.ollama.request_timeout_secs,
            num_predict: toml.ollama.num_predict.unwrap_or(DEFAULT_NUM_PREDICT),
            decision,
            proposers,
            output_dir,
            code_attempt_limit,
            verbose: cli.verbose,
            auto_approve: cli.yes,
        }
    }

    pub fn registry(&self) -> Result<BackendRegistry> {
        BackendRegistry::new(self.decision.clone(), self.proposers.clone())
    }

    /// Problems worth warning about before a run starts.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=2.0).contains(&self.temperature) {
            warnings.push(format!(
                "Temperature {} is outside the usual 0.0-2.0 range",
                self.temperature
            ));
        }
        if self.code_attempt_limit == 0 {
            warnings.push(
                "max_code_attempts is 0: generated code is never revised automatically"
                    .to_string(),
            );
        }
        if self.proposers.is_empty() {
            warnings.push(format!(
                "No proposal backends configured, the decision backend '{}' proposes alone",
                self.decision.model_ref
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================
    // council.toml
    // =========================================

    #[test]
    fn test_parse_full_toml() {
        let toml = CouncilToml::parse(
            r#"
[ollama]
base_url = "http://gpu-box:11434"
request_timeout_secs = 600

[backends]
decision = "qwen2.5:7b"
coders = ["coder"]

[[backends.proposers]]
identity = "coder"
model = "qwen2.5-coder:7b"

[[backends.proposers]]
model = "llama3.2:3b"

[run]
max_code_attempts = 5
"#,
        )
        .unwrap();
        assert_eq!(toml.ollama.request_timeout_secs, Some(600));
        assert_eq!(toml.backends.proposers.len(), 2);
        assert_eq!(toml.run.max_code_attempts, Some(5));
    }

    #[test]
    fn test_parse_invalid_toml_fails() {
        assert!(CouncilToml::parse("[ollama\nbase_url = 1").is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let toml = CouncilToml::load_or_default(dir.path()).unwrap();
        assert!(toml.backends.proposers.is_empty());
    }

    // =========================================
    // Environment
    // =========================================

    #[test]
    fn test_env_layer_collects_model_vars() {
        let env = EnvLayer::from_vars(vars(&[
            ("GPT_LLM", "qwen2.5:1.5b"),
            ("MISTRAL_LLM", "mistral:7b"),
            ("CODER_LLM", "qwen2.5-coder:1.5b"),
            ("CODER_LLMS", "coder"),
            ("OLLAMA_TEMPERATURE", "0.2"),
            ("HOME", "/root"),
            ("EMPTY_LLM", "  "),
        ]));
        assert_eq!(env.decision.as_deref(), Some("qwen2.5:1.5b"));
        assert_eq!(
            env.proposers,
            vec![
                ("coder".to_string(), "qwen2.5-coder:1.5b".to_string()),
                ("mistral".to_string(), "mistral:7b".to_string()),
            ]
        );
        assert_eq!(env.coders, vec!["coder"]);
        assert_eq!(env.temperature, Some(0.2));
    }

    #[test]
    fn test_env_invalid_temperature_is_ignored() {
        let env = EnvLayer::from_vars(vars(&[("OLLAMA_TEMPERATURE", "warm")]));
        assert_eq!(env.temperature, None);
    }

    // =========================================
    // Layering
    // =========================================

    #[test]
    fn test_defaults() {
        let config = Config::resolve(
            CouncilToml::default(),
            EnvLayer::default(),
            None,
            CliOverrides::default(),
        );
        assert_eq!(config.ollama_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.decision.model_ref, DEFAULT_DECISION_MODEL);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.code_attempt_limit, DEFAULT_CODE_ATTEMPT_LIMIT);
        assert_eq!(config.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert!(config.proposers.is_empty());
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn test_precedence_env_over_toml_cli_over_env() {
        let mut toml = CouncilToml::default();
        toml.backends.decision = Some("from-toml".into());
        toml.run.output_dir = Some(PathBuf::from("toml_out"));
        toml.run.max_code_attempts = Some(5);

        let env = EnvLayer {
            decision: Some("from-env".into()),
            output_dir: Some(PathBuf::from("env_out")),
            ..Default::default()
        };
        let cli = CliOverrides {
            output_dir: Some(PathBuf::from("cli_out")),
            ..Default::default()
        };

        let config = Config::resolve(toml, env, None, cli);
        assert_eq!(config.decision.model_ref, "from-env");
        assert_eq!(config.output_dir, PathBuf::from("cli_out"));
        assert_eq!(config.code_attempt_limit, 5);
    }

    #[test]
    fn test_onboarding_models_join_proposers() {
        let onboard = OnboardConfig {
            ollama_base_url: Some("http://gpu-box:11434/".into()),
            ollama_models: vec!["llama3.2:3b".into(), "qwen2.5-coder:7b".into()],
        };
        let env = EnvLayer {
            ollama_url: Some("http://env:11434".into()),
            ..Default::default()
        };

        let config = Config::resolve(
            CouncilToml::default(),
            env,
            Some(onboard),
            CliOverrides::default(),
        );
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.proposers.len(), 2);
        assert!(config.proposers[1].code_specialized);

        let registry = config.registry().unwrap();
        assert_eq!(registry.coder().model_ref, "qwen2.5-coder:7b");
    }

    #[test]
    fn test_coder_list_flags_identities() {
        let toml = CouncilToml::parse(
            r#"
[backends]
coders = ["Mistral"]
"#,
        )
        .unwrap();
        let env = EnvLayer {
            proposers: vec![("mistral".into(), "mistral:7b".into())],
            ..Default::default()
        };
        let config = Config::resolve(toml, env, None, CliOverrides::default());
        assert!(config.proposers[0].code_specialized);
    }

    // =========================================
    // Onboarding file
    // =========================================

    #[test]
    fn test_onboard_merge_skips_duplicates() {
        let mut onboard = OnboardConfig {
            ollama_base_url: None,
            ollama_models: vec!["llama3.2:3b".into()],
        };
        let added = onboard.merge_models(["llama3.2:3b", "mistral:7b"]);
        assert_eq!(added, 1);
        assert_eq!(onboard.ollama_models, vec!["llama3.2:3b", "mistral:7b"]);
    }

    #[test]
    fn test_onboard_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".dev-council/llm_config.json");
        assert!(OnboardConfig::load(&path).unwrap().is_none());

        let onboard = OnboardConfig {
            ollama_base_url: Some(DEFAULT_OLLAMA_URL.into()),
            ollama_models: vec!["mistral:7b".into()],
        };
        onboard.save(&path).unwrap();
        assert_eq!(OnboardConfig::load(&path).unwrap(), Some(onboard));
    }
}
