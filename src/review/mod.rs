//! Automated review of generated code.
//!
//! After each code generation the decision backend reads the milestone, the
//! chosen approach and the code, and answers with a verdict line followed by
//! brief feedback:
//!
//! ```text
//! NEEDS_REVISION
//! - Missing error handling in the API route
//! ```
//!
//! Output that carries no recognizable verdict is treated as approved, so a
//! chatty reviewer never blocks the pipeline.

use anyhow::{Context, Result};

use crate::backend::{Backend, GenerationRequest, TextGenerationClient};

pub const REVIEWER_PROMPT: &str = r#"You are a senior code reviewer.

You will receive the milestone, the chosen implementation approach, and the
generated code. Check correctness, completeness, alignment with the approach,
and obvious bugs.

## Output Format (STRICT)
Start with EXACTLY one of:
- APPROVED
- NEEDS_REVISION

Then, on new lines, at most 5 bullet points of feedback. Do not rewrite the code."#;

const APPROVED: &str = "APPROVED";
const NEEDS_REVISION: &str = "NEEDS_REVISION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved,
    /// Changes requested, with the reviewer's feedback.
    NeedsRevision(String),
}

impl ReviewVerdict {
    pub fn feedback(&self) -> Option<&str> {
        match self {
            ReviewVerdict::Approved => None,
            ReviewVerdict::NeedsRevision(text) => Some(text),
        }
    }
}

/// Parse a reviewer response into a verdict.
pub fn parse_review_verdict(output: &str) -> ReviewVerdict {
    let lines: Vec<&str> = output.lines().collect();
    let first = lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(lines.len());

    if lines
        .get(first)
        .is_some_and(|l| l.trim().trim_matches('*').to_uppercase().starts_with(APPROVED))
    {
        return ReviewVerdict::Approved;
    }

    if let Some(marker) = lines.iter().position(|l| l.to_uppercase().contains(NEEDS_REVISION)) {
        let feedback = lines[marker + 1..].join("\n").trim().to_string();
        let feedback = if feedback.is_empty() {
            "Reviewer requested changes without details".to_string()
        } else {
            feedback
        };
        return ReviewVerdict::NeedsRevision(feedback);
    }

    tracing::warn!("Reviewer output had no verdict, treating as approved");
    ReviewVerdict::Approved
}

pub fn build_review_instruction(milestone: &str, approach: &str, code: &str) -> String {
    format!(
        "## Milestone\n{}\n\n## Chosen Approach\n{}\n\n## Generated Code\n{}",
        milestone, approach, code
    )
}

pub struct CodeReviewer<'a> {
    client: &'a dyn TextGenerationClient,
    backend: &'a Backend,
}

impl<'a> CodeReviewer<'a> {
    pub fn new(client: &'a dyn TextGenerationClient, backend: &'a Backend) -> Self {
        Self { client, backend }
    }

    /// Review generated code. Returns the verdict and the raw reviewer text.
    pub async fn review(
        &self,
        milestone: &str,
        approach: &str,
        code: &str,
    ) -> Result<(ReviewVerdict, String)> {
        let request = GenerationRequest::new(
            REVIEWER_PROMPT,
            build_review_instruction(milestone, approach, code),
        );
        let output = self
            .client
            .invoke(self.backend, &request)
            .await
            .context("Code review failed")?;
        Ok((parse_review_verdict(&output), output))
    }
}
