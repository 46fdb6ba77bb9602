//! Artifact files under the run's output root.
//!
//! Every stage result lands at a deterministic relative path so the operator
//! can open it from the gate prompt:
//!
//! | Artifact          | Path                                        |
//! |-------------------|---------------------------------------------|
//! | Project plan      | `project_plan.md`                           |
//! | Milestone plan    | `milestone.md`                              |
//! | Architecture      | `architecture.mmd`                          |
//! | Tech stack        | `tech_stack.md`                             |
//! | Proposal          | `milestone_<n>/proposal_<backend>.md`       |
//! | Consensus         | `milestone_<n>/consensus_decision.md`       |
//! | Generated code    | `milestone_<n>/generated_code_<k>.md`       |
//! | Code review       | `milestone_<n>/code_review_<k>.md`          |
//! | Run instructions  | `milestone_<n>/run_instructions.md`         |
//! | Run summary       | `run_summary.json`                          |
//!
//! Milestone directories are numbered from 1, and `<k>` counts code
//! generations within the milestone. Source files go to `code/`.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::errors::WorkflowError;

pub const CODE_DIR: &str = "code";

static MERMAID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```mermaid[^\n]*\n(.*?)```").expect("mermaid pattern is a valid static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact<'a> {
    ProjectPlan,
    MilestonePlan,
    Diagram,
    TechStack,
    Proposal { milestone: usize, backend: &'a str },
    Consensus { milestone: usize },
    GeneratedCode { milestone: usize, generation: u32 },
    CodeReview { milestone: usize, generation: u32 },
    RunInstructions { milestone: usize },
    Summary,
}

fn milestone_dir(index: usize) -> PathBuf {
    PathBuf::from(format!("milestone_{}", index + 1))
}

impl Artifact<'_> {
    /// Path relative to the output root. `milestone` is the zero-based index.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            Artifact::ProjectPlan => PathBuf::from("project_plan.md"),
            Artifact::MilestonePlan => PathBuf::from("milestone.md"),
            Artifact::Diagram => PathBuf::from("architecture.mmd"),
            Artifact::TechStack => PathBuf::from("tech_stack.md"),
            Artifact::Proposal { milestone, backend } => {
                milestone_dir(*milestone).join(format!("proposal_{}.md", backend))
            }
            Artifact::Consensus { milestone } => {
                milestone_dir(*milestone).join("consensus_decision.md")
            }
            Artifact::GeneratedCode {
                milestone,
                generation,
            } => milestone_dir(*milestone).join(format!("generated_code_{}.md", generation)),
            Artifact::CodeReview {
                milestone,
                generation,
            } => milestone_dir(*milestone).join(format!("code_review_{}.md", generation)),
            Artifact::RunInstructions { milestone } => {
                milestone_dir(*milestone).join("run_instructions.md")
            }
            Artifact::Summary => PathBuf::from("run_summary.json"),
        }
    }
}

/// Writes artifacts beneath a fixed output root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn code_dir(&self) -> PathBuf {
        self.root.join(CODE_DIR)
    }

    pub fn path_of(&self, artifact: Artifact<'_>) -> PathBuf {
        self.root.join(artifact.relative_path())
    }

    /// Write an artifact, creating parent directories. Returns its absolute path.
    pub fn write(&self, artifact: Artifact<'_>, content: &str) -> Result<PathBuf, WorkflowError> {
        let path = self.path_of(artifact);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WorkflowError::ArtifactWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, content).map_err(|source| WorkflowError::ArtifactWrite {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote artifact");
        Ok(path)
    }

    /// Serialize a value as pretty JSON. Failures are reported as warnings
    /// and never abort the run.
    pub fn export_json<T: Serialize>(&self, artifact: Artifact<'_>, value: &T) -> Option<PathBuf> {
        let json = match serde_json::to_string_pretty(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize export");
                return None;
            }
        };
        match self.write(artifact, &json) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write export");
                None
            }
        }
    }
}

/// Diagram source from a response: the body of the first ```` ```mermaid ````
/// fence, or the whole trimmed response when there is none.
pub fn extract_diagram_source(response: &str) -> String {
    MERMAID_RE
        .captures(response)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| response.trim().to_string())
}
