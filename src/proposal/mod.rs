//! Proposal fan-out for the active milestone.
//!
//! Every proposal backend receives the same instruction concurrently. Each
//! response is written to its own artifact file the moment it arrives, so a
//! failure part-way through still leaves the finished proposals on disk. The
//! coordinator waits for all backends (a full barrier) before returning.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};

use crate::artifacts::{Artifact, ArtifactStore};
use crate::backend::{Backend, GenerationRequest, TextGenerationClient};
use crate::errors::WorkflowError;

pub const PROPOSAL_PROMPT: &str = r#"You are a senior software engineer on a development council.

You will receive a milestone, the project plan, and the agreed tech stack.
Propose how to implement the milestone:

## Output Format
- **Approach** - one paragraph summary
- **Files** - the files you would create or change, with one line each
- **Key decisions** - libraries, patterns, data shapes
- **Risks** - what could go wrong and how to avoid it

Use ONLY the given tech stack. Keep it under 400 words. No code."#;

/// Context shared by every backend for one milestone.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    /// Zero-based milestone index.
    pub milestone_index: usize,
    pub milestone: &'a str,
    pub plan: &'a str,
    pub tech_stack: &'a str,
}

/// Instruction sent to every proposal backend.
pub fn build_proposal_instruction(ctx: &ProposalContext<'_>) -> String {
    format!(
        "## Milestone {}\n{}\n\n## Tech Stack\n{}\n\n## Project Plan\n{}",
        ctx.milestone_index + 1,
        ctx.milestone,
        ctx.tech_stack,
        ctx.plan
    )
}

/// Fold one proposal into the mapping. On an identity collision the later
/// write wins.
pub fn merge_proposal(proposals: &mut BTreeMap<String, String>, identity: String, text: String) {
    if proposals.insert(identity.clone(), text).is_some() {
        tracing::warn!(identity = %identity, "Duplicate proposal identity, keeping the later one");
    }
}

pub struct ProposalCoordinator<'a> {
    client: &'a dyn TextGenerationClient,
    store: &'a ArtifactStore,
}

impl<'a> ProposalCoordinator<'a> {
    pub fn new(client: &'a dyn TextGenerationClient, store: &'a ArtifactStore) -> Self {
        Self { client, store }
    }

    /// Collect one proposal per backend identity.
    ///
    /// Fails if any backend fails, after every other call has finished and
    /// its proposal has been written to disk.
    pub async fn collect_proposals(
        &self,
        ctx: &ProposalContext<'_>,
        backends: &[Backend],
    ) -> Result<BTreeMap<String, String>> {
        let mut seen = HashSet::new();
        let unique: Vec<&Backend> = backends
            .iter()
            .filter(|b| {
                let fresh = seen.insert(b.identity.as_str());
                if !fresh {
                    tracing::warn!(identity = %b.identity, "Skipping repeated backend in fan-out");
                }
                fresh
            })
            .collect();

        if unique.is_empty() {
            return Err(WorkflowError::NoBackends.into());
        }

        let instruction = build_proposal_instruction(ctx);
        tracing::info!(
            milestone = ctx.milestone_index + 1,
            backends = unique.len(),
            "Collecting proposals"
        );

        let calls = unique
            .iter()
            .map(|backend| self.propose(backend, ctx.milestone_index, &instruction));
        let results = join_all(calls).await;

        let mut proposals = BTreeMap::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok((identity, text)) => merge_proposal(&mut proposals, identity, text),
                Err(e) => failures.push(e),
            }
        }

        let failed = failures.len();
        if let Some(first) = failures.into_iter().next() {
            return Err(first.context(format!(
                "{} of {} proposal backends failed",
                failed,
                unique.len()
            )));
        }

        Ok(proposals)
    }

    async fn propose(
        &self,
        backend: &Backend,
        milestone_index: usize,
        instruction: &str,
    ) -> Result<(String, String)> {
        let request = GenerationRequest::new(PROPOSAL_PROMPT, instruction);
        let text = self
            .client
            .invoke(backend, &request)
            .await
            .with_context(|| format!("Proposal from '{}' failed", backend.identity))?;

        self.store.write(
            Artifact::Proposal {
                milestone: milestone_index,
                backend: &backend.identity,
            },
            &text,
        )?;
        tracing::debug!(backend = %backend.identity, chars = text.len(), "Proposal received");

        Ok((backend.identity.clone(), text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Answers with the backend identity after a per-backend delay, so the
    /// arrival order differs from the call order.
    struct DelayedEcho;

    #[async_trait]
    impl TextGenerationClient for DelayedEcho {
        async fn invoke(&self, backend: &Backend, request: &GenerationRequest) -> Result<String> {
            let delay = match backend.identity.as_str() {
                "alpha" => 30,
                "beta" => 5,
                _ => 15,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if backend.identity == "broken" {
                anyhow::bail!("connection refused");
            }
            assert!(request.user.contains("Build API"));
            Ok(format!("proposal from {}", backend.identity))
        }
    }

    fn ctx() -> ProposalContext<'static> {
        ProposalContext {
            milestone_index: 1,
            milestone: "Build API",
            plan: "plan",
            tech_stack: "Python, FastAPI",
        }
    }

    #[tokio::test]
    async fn test_collects_one_proposal_per_backend() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let coordinator = ProposalCoordinator::new(&DelayedEcho, &store);
        let backends = vec![
            Backend::new("alpha", "m1"),
            Backend::new("beta", "m2"),
            Backend::new("gamma", "m3"),
        ];

        let proposals = coordinator.collect_proposals(&ctx(), &backends).await.unwrap();
        assert_eq!(proposals.len(), 3);
        assert_eq!(proposals["alpha"], "proposal from alpha");
        assert_eq!(proposals["beta"], "proposal from beta");
        assert!(dir.path().join("milestone_2/proposal_gamma.md").exists());
    }

    #[tokio::test]
    async fn test_failure_keeps_finished_proposals_on_disk() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let coordinator = ProposalCoordinator::new(&DelayedEcho, &store);
        let backends = vec![Backend::new("beta", "m1"), Backend::new("broken", "m2")];

        let err = coordinator
            .collect_proposals(&ctx(), &backends)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        assert!(dir.path().join("milestone_2/proposal_beta.md").exists());
        assert!(!dir.path().join("milestone_2/proposal_broken.md").exists());
    }

    #[tokio::test]
    async fn test_repeated_identity_is_called_once() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let coordinator = ProposalCoordinator::new(&DelayedEcho, &store);
        let backends = vec![Backend::new("alpha", "m1"), Backend::new("alpha", "m2")];

        let proposals = coordinator.collect_proposals(&ctx(), &backends).await.unwrap();
        assert_eq!(proposals.len(), 1);
    }

    #[tokio::test]
    async fn test_no_backends_is_an_error() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let coordinator = ProposalCoordinator::new(&DelayedEcho, &store);
        let err = coordinator.collect_proposals(&ctx(), &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::NoBackends)
        ));
    }

    #[test]
    fn test_merge_later_write_wins() {
        let mut proposals = BTreeMap::new();
        merge_proposal(&mut proposals, "a".into(), "first".into());
        merge_proposal(&mut proposals, "a".into(), "second".into());
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals["a"], "second");
    }

    #[test]
    fn test_instruction_numbers_milestones_from_one() {
        let text = build_proposal_instruction(&ctx());
        assert!(text.starts_with("## Milestone 2\nBuild API"));
        assert!(text.contains("FastAPI"));
    }
}
