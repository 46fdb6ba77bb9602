//! End-to-end workflow tests
//!
//! A scripted client answers by stage prompt and a scripted gate plays the
//! operator, so whole runs execute against a temp directory.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use council::artifacts::ArtifactStore;
use council::backend::{Backend, BackendRegistry, GenerationRequest, TextGenerationClient};
use council::consensus::CONSENSUS_PROMPT;
use council::errors::WorkflowError;
use council::gates::{GateDecision, ScriptedGate};
use council::orchestrator::WorkflowEngine;
use council::orchestrator::prompts::{
    CODER_PROMPT, CODER_REVISION_PROMPT, DIAGRAM_PROMPT, INSTRUCTIONS_PROMPT, MILESTONE_PROMPT,
    PLAN_PROMPT, TECH_STACK_PROMPT,
};
use council::proposal::PROPOSAL_PROMPT;
use council::review::REVIEWER_PROMPT;

const MILESTONE_TABLE: &str = "\
| # | Milestone | Deliverable |
|---|-----------|-------------|
| 1 | Setup repo | Skeleton |
| 2 | Build API | CRUD endpoints |
";

#[derive(Debug, Clone)]
struct Call {
    backend: String,
    system: String,
    thread: Option<String>,
    user: String,
}

/// Answers each stage with a canned response and records every call.
struct ScriptedClient {
    calls: Mutex<Vec<Call>>,
    review_verdict: String,
    failing_backend: Option<String>,
}

impl ScriptedClient {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            review_verdict: "APPROVED".to_string(),
            failing_backend: None,
        }
    }

    fn with_review_verdict(mut self, verdict: &str) -> Self {
        self.review_verdict = verdict.to_string();
        self
    }

    fn failing(mut self, identity: &str) -> Self {
        self.failing_backend = Some(identity.to_string());
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_with(&self, system: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.system == system)
            .collect()
    }
}

#[async_trait]
impl TextGenerationClient for ScriptedClient {
    async fn invoke(&self, backend: &Backend, request: &GenerationRequest) -> Result<String> {
        self.calls.lock().unwrap().push(Call {
            backend: backend.identity.clone(),
            system: request.system.clone(),
            thread: request.thread.clone(),
            user: request.user.clone(),
        });

        if self.failing_backend.as_deref() == Some(backend.identity.as_str()) {
            anyhow::bail!("connection refused");
        }

        let system = request.system.as_str();
        let reply = if system == PLAN_PROMPT {
            "# SRS\nA todo app".to_string()
        } else if system == MILESTONE_PROMPT {
            MILESTONE_TABLE.to_string()
        } else if system == DIAGRAM_PROMPT {
            "```mermaid\ngraph TD\n  UI-->API\n```".to_string()
        } else if system == TECH_STACK_PROMPT {
            "- Python\n- FastAPI".to_string()
        } else if system == PROPOSAL_PROMPT {
            format!("proposal from {}", backend.identity)
        } else if system == CONSENSUS_PROMPT {
            "Chosen: GraphQL gateway".to_string()
        } else if system == CODER_PROMPT || system == CODER_REVISION_PROMPT {
            "```app.py\nprint('hello')\n```".to_string()
        } else if system == REVIEWER_PROMPT {
            self.review_verdict.clone()
        } else if system == INSTRUCTIONS_PROMPT {
            "# How to Run\npython app.py".to_string()
        } else {
            anyhow::bail!("unexpected stage prompt")
        };
        Ok(reply)
    }
}

fn registry() -> BackendRegistry {
    BackendRegistry::new(
        Backend::new("lead", "qwen2.5:1.5b"),
        vec![
            Backend::new("alpha", "llama3.2:3b"),
            Backend::new("beta", "qwen2.5-coder:7b").code_specialized(true),
        ],
    )
    .unwrap()
}

fn engine(
    dir: &TempDir,
    client: &Arc<ScriptedClient>,
    gate: ScriptedGate,
) -> WorkflowEngine<ScriptedGate> {
    WorkflowEngine::new(
        client.clone(),
        gate,
        registry(),
        ArtifactStore::new(dir.path()),
    )
}

/// Approve the four planning gates.
fn approve_planning() -> Vec<GateDecision> {
    vec![GateDecision::Approve; 4]
}

// =============================================================================
// Full runs
// =============================================================================

mod full_runs {
    use super::*;

    #[tokio::test]
    async fn test_auto_approved_run_completes_every_milestone() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let mut engine = engine(&dir, &client, ScriptedGate::auto_approve());

        let state = engine.run("todo app").await.unwrap();

        assert_eq!(state.milestones.len(), 2);
        assert_eq!(state.milestones.completed_count(), 2);
        assert!(!state.milestones.has_remaining());
        assert_eq!(state.diagram_source, "graph TD\n  UI-->API");

        let root = dir.path();
        for path in [
            "project_plan.md",
            "milestone.md",
            "architecture.mmd",
            "tech_stack.md",
            "milestone_1/proposal_alpha.md",
            "milestone_1/proposal_beta.md",
            "milestone_1/consensus_decision.md",
            "milestone_1/generated_code_1.md",
            "milestone_1/code_review_1.md",
            "milestone_1/run_instructions.md",
            "milestone_2/consensus_decision.md",
            "code/app.py",
            "run_summary.json",
        ] {
            assert!(root.join(path).exists(), "missing {}", path);
        }

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(root.join("run_summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["completed_milestones"], 2);
        assert_eq!(summary["request"], "todo app");

        let gate = engine.gate();
        assert_eq!(gate.reviewed.len(), 8);
        assert_eq!(gate.reviewed[0], "Project plan");
        assert_eq!(gate.reviewed[4], "Chosen approach for milestone 1");
        assert_eq!(gate.questions, vec!["Continue with milestone 2: Build API?"]);
    }

    #[tokio::test]
    async fn test_each_milestone_gets_one_proposal_per_backend() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let mut engine = engine(&dir, &client, ScriptedGate::auto_approve());

        engine.run("todo app").await.unwrap();

        let proposals = client.calls_with(PROPOSAL_PROMPT);
        assert_eq!(proposals.len(), 4);
        assert!(proposals[2].user.starts_with("## Milestone 2\nBuild API"));
    }

    #[tokio::test]
    async fn test_code_goes_to_code_specialized_backend() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let mut engine = engine(&dir, &client, ScriptedGate::auto_approve());

        engine.run("todo app").await.unwrap();

        let code_calls = client.calls_with(CODER_PROMPT);
        assert!(code_calls.iter().all(|c| c.backend == "beta"));
        // Second milestone sees the files written by the first.
        assert!(!code_calls[0].user.contains("## Existing Project Files"));
        assert!(code_calls[1].user.contains("### File: app.py"));
    }

    #[tokio::test]
    async fn test_declining_to_continue_holds_the_milestone() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let gate = ScriptedGate::default().with_confirmations([false]);
        let mut engine = engine(&dir, &client, gate);

        let state = engine.run("todo app").await.unwrap();

        assert_eq!(state.active_milestone_index(), 0);
        assert_eq!(state.milestones.completed_count(), 1);
        assert!(!state.milestones.milestones()[1].completed);
        assert!(!dir.path().join("milestone_2").exists());
    }
}

// =============================================================================
// Revision loops
// =============================================================================

mod revisions {
    use super::*;

    #[tokio::test]
    async fn test_plan_feedback_continues_the_plan_thread() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let gate = ScriptedGate::default()
            .with_decisions([GateDecision::Edit("add authentication".into())])
            .with_confirmations([false]);
        let mut engine = engine(&dir, &client, gate);

        let state = engine.run("todo app").await.unwrap();

        let plans = client.calls_with(PLAN_PROMPT);
        assert_eq!(plans.len(), 2);
        assert!(plans[1].user.contains("add authentication"));
        assert!(plans[0].thread.is_some());
        assert_eq!(plans[0].thread, plans[1].thread);
        assert!(!state.revision_needed);
        assert!(state.feedback.is_empty());
    }

    #[tokio::test]
    async fn test_consensus_feedback_reaches_the_decision_backend() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let mut decisions = approve_planning();
        decisions.push(GateDecision::Edit("use REST not GraphQL".into()));
        let gate = ScriptedGate::default()
            .with_decisions(decisions)
            .with_confirmations([false]);
        let mut engine = engine(&dir, &client, gate);

        engine.run("todo app").await.unwrap();

        let consensus = client.calls_with(CONSENSUS_PROMPT);
        assert_eq!(consensus.len(), 2);
        assert!(!consensus[0].user.contains("use REST not GraphQL"));
        assert!(consensus[1].user.contains("use REST not GraphQL"));
        assert!(consensus[1].user.contains("Chosen: GraphQL gateway"));
        assert!(consensus.iter().all(|c| c.backend == "lead"));
        // Proposals are not collected again.
        assert_eq!(client.calls_with(PROPOSAL_PROMPT).len(), 2);
    }

    #[tokio::test]
    async fn test_code_review_loop_is_bounded() {
        let dir = TempDir::new().unwrap();
        let client =
            Arc::new(ScriptedClient::new().with_review_verdict("NEEDS_REVISION\n- add tests"));
        let gate = ScriptedGate::default().with_confirmations([false]);
        let mut engine = engine(&dir, &client, gate).with_code_attempt_limit(2);

        let state = engine.run("todo app").await.unwrap();

        assert_eq!(client.calls_with(CODER_PROMPT).len(), 1);
        let revisions = client.calls_with(CODER_REVISION_PROMPT);
        assert_eq!(revisions.len(), 1);
        assert!(revisions[0].user.contains("- add tests"));
        assert_eq!(client.calls_with(INSTRUCTIONS_PROMPT).len(), 1);
        assert_eq!(state.code_attempts, 2);
        assert!(dir.path().join("milestone_1/code_review_2.md").exists());
    }

    #[tokio::test]
    async fn test_failed_run_regenerates_with_operator_feedback() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let mut decisions = approve_planning();
        decisions.push(GateDecision::Approve);
        decisions.push(GateDecision::Edit("server crashes on start".into()));
        let gate = ScriptedGate::default()
            .with_decisions(decisions)
            .with_confirmations([false]);
        let mut engine = engine(&dir, &client, gate);

        let state = engine.run("todo app").await.unwrap();

        let revisions = client.calls_with(CODER_REVISION_PROMPT);
        assert_eq!(revisions.len(), 1);
        assert!(revisions[0].user.contains("server crashes on start"));
        assert_eq!(client.calls_with(INSTRUCTIONS_PROMPT).len(), 2);
        assert_eq!(state.code_attempts, 1);
        assert_eq!(state.code_generation, 2);
        assert_eq!(state.milestones.completed_count(), 1);

        // Regeneration after the failed run keeps the first attempt's evidence.
        let milestone_dir = dir.path().join("milestone_1");
        for name in [
            "generated_code_1.md",
            "generated_code_2.md",
            "code_review_1.md",
            "code_review_2.md",
        ] {
            assert!(milestone_dir.join(name).exists(), "missing {}", name);
        }
    }
}

// =============================================================================
// Failures
// =============================================================================

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_proposal_backend_failure_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new().failing("alpha"));
        let mut engine = engine(&dir, &client, ScriptedGate::auto_approve());

        let err = engine.run("todo app").await.unwrap_err();
        let stage_err = err.downcast_ref::<WorkflowError>().unwrap();
        assert!(matches!(stage_err, WorkflowError::StageFailed { stage, .. } if stage == "proposals"));

        // The surviving proposal is on disk and the summary was still written.
        assert!(dir.path().join("milestone_1/proposal_beta.md").exists());
        assert!(dir.path().join("run_summary.json").exists());
        assert!(client.calls_with(CONSENSUS_PROMPT).is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_milestone_table_falls_back_to_one_milestone() {
        struct Chatty(ScriptedClient);

        #[async_trait]
        impl TextGenerationClient for Chatty {
            async fn invoke(&self, backend: &Backend, request: &GenerationRequest) -> Result<String> {
                if request.system == MILESTONE_PROMPT {
                    return Ok("Just build it all at once.".to_string());
                }
                self.0.invoke(backend, request).await
            }
        }

        let dir = TempDir::new().unwrap();
        let mut engine = WorkflowEngine::new(
            Arc::new(Chatty(ScriptedClient::new())),
            ScriptedGate::auto_approve(),
            registry(),
            ArtifactStore::new(dir.path()),
        );

        let state = engine.run("todo app").await.unwrap();
        assert_eq!(state.milestones.len(), 1);
        assert_eq!(state.milestones.completed_count(), 1);
        assert!(engine.gate().questions.is_empty());
    }
}
