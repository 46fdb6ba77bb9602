//! Text-generation backends.
//!
//! The pipeline only ever talks to [`TextGenerationClient`]: one instruction in,
//! one plain-text response out. Which model answers is chosen per call by the
//! [`Backend`] passed alongside the request, so a single client serves the
//! decision backend and every proposal backend.

pub mod ollama;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use ollama::OllamaClient;

/// A configured text-generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    /// Logical name the backend is addressed by (also used in artifact file names).
    pub identity: String,
    /// Underlying model reference, e.g. `qwen2.5-coder:7b`.
    pub model_ref: String,
    /// Whether this backend is preferred for writing code.
    #[serde(default)]
    pub code_specialized: bool,
}

impl Backend {
    pub fn new(identity: impl Into<String>, model_ref: impl Into<String>) -> Self {
        Self {
            identity: sanitize_identity(&identity.into()),
            model_ref: model_ref.into(),
            code_specialized: false,
        }
    }

    pub fn code_specialized(mut self, flag: bool) -> Self {
        self.code_specialized = flag;
        self
    }

    /// Derive a backend from a bare model reference, using the model name as identity.
    pub fn from_model(model_ref: &str) -> Self {
        let code = model_ref.to_lowercase().contains("coder");
        Self::new(model_ref, model_ref).code_specialized(code)
    }
}

/// Reduce an identity to characters that are safe in file names.
pub fn sanitize_identity(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-').to_string();
    if cleaned.is_empty() {
        "backend".to_string()
    } else {
        cleaned
    }
}

/// The resolved set of backends for a run.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    decision: Backend,
    proposers: Vec<Backend>,
}

impl BackendRegistry {
    /// Build a registry. Proposers with a repeated identity are dropped (first
    /// one wins) since each identity owns exactly one proposal slot.
    pub fn new(decision: Backend, proposers: Vec<Backend>) -> Result<Self> {
        if decision.model_ref.trim().is_empty() {
            bail!("Decision backend '{}' has no model reference", decision.identity);
        }

        let mut unique: Vec<Backend> = Vec::with_capacity(proposers.len());
        for backend in proposers {
            if unique.iter().any(|b| b.identity == backend.identity) {
                tracing::warn!(identity = %backend.identity, "Dropping duplicate backend identity");
                continue;
            }
            unique.push(backend);
        }

        Ok(Self {
            decision,
            proposers: unique,
        })
    }

    /// Backend that writes plans, makes the consensus decision and reviews code.
    pub fn decision(&self) -> &Backend {
        &self.decision
    }

    /// Backends that each contribute one proposal per milestone. Falls back
    /// to the decision backend alone when none are configured.
    pub fn proposers(&self) -> Vec<Backend> {
        if self.proposers.is_empty() {
            vec![self.decision.clone()]
        } else {
            self.proposers.clone()
        }
    }

    /// Backend used to write code: the first code-specialized proposer, else the decision backend.
    pub fn coder(&self) -> &Backend {
        self.proposers
            .iter()
            .find(|b| b.code_specialized)
            .unwrap_or(&self.decision)
    }
}

/// One instruction for a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Stage-specific system instructions.
    pub system: String,
    /// Conversation thread to continue, if any.
    pub thread: Option<String>,
    /// The stage input.
    pub user: String,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            thread: None,
            user: user.into(),
        }
    }

    pub fn on_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }
}

/// Abstraction over text generation for testability.
/// Real implementation: `OllamaClient`. Tests use scripted doubles.
#[async_trait]
pub trait TextGenerationClient: Send + Sync {
    async fn invoke(&self, backend: &Backend, request: &GenerationRequest) -> Result<String>;
}
