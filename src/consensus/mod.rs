//! Consensus selection.
//!
//! All proposals for a milestone are concatenated into one instruction for the
//! decision backend, which picks (or blends) a single approach. There is no
//! voting: the decision backend's judgement is the consensus. When the
//! operator rejected the previous decision, the prior approach and the
//! feedback are included verbatim so the backend revises instead of starting
//! over.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::backend::{Backend, GenerationRequest, TextGenerationClient};

pub const CONSENSUS_PROMPT: &str = r#"You are the lead architect of a development council.

Several engineers proposed how to implement the same milestone. Choose the
single best approach. You may combine ideas, but the result must be one
coherent plan.

## Output Format
# Chosen Approach
- **Summary** - one paragraph
- **Based on** - which proposals you drew from and why
- **Files** - files to create or change
- **Steps** - ordered implementation steps

No code."#;

/// Everything the decision backend sees for one consensus call.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusInput<'a> {
    pub milestone: &'a str,
    pub proposals: &'a BTreeMap<String, String>,
    pub prior_approach: Option<&'a str>,
    pub feedback: Option<&'a str>,
}

/// Build the consensus instruction body.
pub fn build_consensus_instruction(input: &ConsensusInput<'_>) -> String {
    let mut body = format!("## Milestone\n{}\n\n## Proposals\n", input.milestone);
    for (identity, proposal) in input.proposals {
        body.push_str(&format!("\n### Proposal from {}\n{}\n", identity, proposal.trim()));
    }

    if let Some(feedback) = input.feedback.filter(|f| !f.trim().is_empty()) {
        if let Some(prior) = input.prior_approach.filter(|p| !p.trim().is_empty()) {
            body.push_str(&format!("\n## Previously Chosen Approach\n{}\n", prior));
        }
        body.push_str(&format!(
            "\n## Operator Feedback\n{}\n\nRevise the previously chosen approach to address this feedback.\n",
            feedback
        ));
    }

    body
}

pub struct ConsensusSelector<'a> {
    client: &'a dyn TextGenerationClient,
    backend: &'a Backend,
}

impl<'a> ConsensusSelector<'a> {
    pub fn new(client: &'a dyn TextGenerationClient, backend: &'a Backend) -> Self {
        Self { client, backend }
    }

    /// Ask the decision backend for the chosen approach.
    pub async fn select_approach(
        &self,
        input: &ConsensusInput<'_>,
        thread: Option<String>,
    ) -> Result<String> {
        let mut request = GenerationRequest::new(CONSENSUS_PROMPT, build_consensus_instruction(input));
        if let Some(thread) = thread {
            request = request.on_thread(thread);
        }
        tracing::info!(
            backend = %self.backend.identity,
            proposals = input.proposals.len(),
            revision = input.feedback.is_some(),
            "Selecting approach"
        );
        self.client
            .invoke(self.backend, &request)
            .await
            .context("Consensus decision failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposals() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("alpha".to_string(), "Use GraphQL with Apollo".to_string());
        map.insert("beta".to_string(), "Use REST with FastAPI".to_string());
        map
    }

    #[test]
    fn test_instruction_concatenates_all_proposals() {
        let proposals = proposals();
        let text = build_consensus_instruction(&ConsensusInput {
            milestone: "Build API",
            proposals: &proposals,
            prior_approach: None,
            feedback: None,
        });
        assert!(text.contains("### Proposal from alpha\nUse GraphQL with Apollo"));
        assert!(text.contains("### Proposal from beta\nUse REST with FastAPI"));
        assert!(!text.contains("Operator Feedback"));
    }

    #[test]
    fn test_revision_includes_prior_and_feedback_verbatim() {
        let proposals = proposals();
        let text = build_consensus_instruction(&ConsensusInput {
            milestone: "Build API",
            proposals: &proposals,
            prior_approach: Some("Chosen: GraphQL gateway"),
            feedback: Some("use REST not GraphQL"),
        });
        assert!(text.contains("## Previously Chosen Approach\nChosen: GraphQL gateway"));
        assert!(text.contains("## Operator Feedback\nuse REST not GraphQL"));
    }

    #[test]
    fn test_prior_without_feedback_is_ignored() {
        let proposals = proposals();
        let text = build_consensus_instruction(&ConsensusInput {
            milestone: "Build API",
            proposals: &proposals,
            prior_approach: Some("old"),
            feedback: None,
        });
        assert!(!text.contains("Previously Chosen Approach"));
    }
}
