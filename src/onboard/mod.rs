//! Ollama model discovery for `council onboard`.
//!
//! Lists the models an Ollama server has pulled and records the operator's
//! selection in the onboarding file. Selections accumulate across runs; a model
//! is never recorded twice.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;

use crate::config::OnboardConfig;

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

/// Model names from an `/api/tags` response body.
pub fn parse_tags(body: &str) -> Result<Vec<String>> {
    let tags: TagsResponse =
        serde_json::from_str(body).context("Unexpected /api/tags response")?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// Fetch the models available on an Ollama server.
pub async fn fetch_models(http: &reqwest::Client, base_url: &str) -> Result<Vec<String>> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to connect to Ollama at {}", base_url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("Ollama at {} returned HTTP {}", base_url, status.as_u16());
    }
    let body = response
        .text()
        .await
        .context("Failed to read /api/tags response")?;
    parse_tags(&body)
}

/// Read the onboarding file, starting over when it is unreadable.
pub fn load_existing(path: &Path) -> OnboardConfig {
    match OnboardConfig::load(path) {
        Ok(existing) => existing.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable onboarding file");
            OnboardConfig::default()
        }
    }
}

/// Record a selection: the base URL is replaced, models are merged.
/// Returns the updated config and the number of newly added models.
pub fn apply_selection(
    mut config: OnboardConfig,
    base_url: &str,
    selected: &[String],
) -> (OnboardConfig, usize) {
    config.ollama_base_url = Some(base_url.trim_end_matches('/').to_string());
    let added = config.merge_models(selected.iter().cloned());
    (config, added)
}
