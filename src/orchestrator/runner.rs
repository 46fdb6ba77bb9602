use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

use super::prompts::{self, CODER_PROMPT, CODER_REVISION_PROMPT};
use super::stage::{Stage, next_stage};
use super::state::{DEFAULT_CODE_ATTEMPT_LIMIT, RunState, RunSummary, StateUpdate};
use crate::artifacts::{Artifact, ArtifactStore, extract_diagram_source};
use crate::backend::{Backend, BackendRegistry, GenerationRequest, TextGenerationClient};
use crate::consensus::{ConsensusInput, ConsensusSelector};
use crate::errors::WorkflowError;
use crate::gates::{ArtifactReview, GateDecision, HumanGate};
use crate::materialize::{materialize, snapshot::render_code_tree};
use crate::memory::thread_id;
use crate::milestone::MilestoneTracker;
use crate::proposal::{ProposalContext, ProposalCoordinator};
use crate::review::CodeReviewer;
use crate::ui::CouncilUI;

/// Drives a run through the stage graph.
///
/// The engine is the only writer of [`RunState`]: each stage reads the state,
/// returns a [`StateUpdate`], and the engine applies it before choosing the
/// next stage. Every stage that blocks on the operator goes through `G`.
pub struct WorkflowEngine<G: HumanGate> {
    client: Arc<dyn TextGenerationClient>,
    gate: G,
    registry: BackendRegistry,
    store: ArtifactStore,
    ui: CouncilUI,
    code_attempt_limit: u32,
    stages_executed: usize,
}

impl<G: HumanGate> WorkflowEngine<G> {
    pub fn new(
        client: Arc<dyn TextGenerationClient>,
        gate: G,
        registry: BackendRegistry,
        store: ArtifactStore,
    ) -> Self {
        Self {
            client,
            gate,
            registry,
            store,
            ui: CouncilUI::hidden(),
            code_attempt_limit: DEFAULT_CODE_ATTEMPT_LIMIT,
            stages_executed: 0,
        }
    }

    pub fn with_ui(mut self, ui: CouncilUI) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_code_attempt_limit(mut self, limit: u32) -> Self {
        self.code_attempt_limit = limit;
        self
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn stages_executed(&self) -> usize {
        self.stages_executed
    }

    /// Run the whole pipeline for one request.
    pub async fn run(&mut self, request: &str) -> Result<RunState> {
        let state = RunState::new(request, self.store.root())
            .with_code_attempt_limit(self.code_attempt_limit);
        self.run_from(Stage::Plan, state).await
    }

    /// Run from `start` until the graph reaches [`Stage::End`].
    ///
    /// The run summary is exported whether the run finishes or fails.
    pub async fn run_from(&mut self, start: Stage, mut state: RunState) -> Result<RunState> {
        tracing::info!(
            run_id = %state.run_id,
            stage = %start,
            output = %self.store.root().display(),
            "Starting run"
        );

        let mut stage = start;
        while stage != Stage::End {
            match self.step(stage, &mut state).await {
                Ok(next) => stage = next,
                Err(e) => {
                    let reason = match &e {
                        WorkflowError::StageFailed { source, .. } => format!("{:#}", source),
                        other => other.to_string(),
                    };
                    self.ui.stage_failed(stage.name(), &reason);
                    self.export_summary(&state);
                    return Err(e.into());
                }
            }
        }

        self.ui.finish(state.milestones.completed_count(), state.milestones.len());
        self.export_summary(&state);
        tracing::info!(
            run_id = %state.run_id,
            stages = self.stages_executed,
            completed = state.milestones.completed_count(),
            "Run finished"
        );
        Ok(state)
    }

    /// Execute one stage, apply its update, and return the next stage.
    pub async fn step(&mut self, stage: Stage, state: &mut RunState) -> Result<Stage, WorkflowError> {
        let span = tracing::info_span!("stage", name = %stage);
        let update = self
            .execute(stage, state)
            .instrument(span)
            .await
            .map_err(|source| WorkflowError::StageFailed {
                stage: stage.to_string(),
                source,
            })?;

        state.apply(update);
        self.stages_executed += 1;

        let next = next_stage(stage, state);
        tracing::debug!(from = %stage, to = %next, "Transition");
        Ok(next)
    }

    fn export_summary(&self, state: &RunState) {
        let summary = RunSummary::new(state, self.stages_executed);
        if let Some(path) = self.store.export_json(Artifact::Summary, &summary) {
            tracing::info!(path = %path.display(), "Wrote run summary");
        }
    }

    async fn execute(&mut self, stage: Stage, state: &RunState) -> Result<StateUpdate> {
        match stage {
            Stage::Plan => self.plan(state).await,
            Stage::Milestones => self.milestones(state).await,
            Stage::Diagram => self.diagram(state).await,
            Stage::TechStack => self.tech_stack(state).await,
            Stage::SelectMilestone => Ok(self.select_milestone(state)),
            Stage::Proposals => self.proposals(state).await,
            Stage::Consensus => self.consensus(state).await,
            Stage::Code => self.code(state).await,
            Stage::CodeReview => self.code_review(state).await,
            Stage::Instructions => self.instructions(state).await,
            Stage::CompleteMilestone => self.complete_milestone(state),

            Stage::PlanReview => {
                self.gate_review("Project plan", vec![self.store.path_of(Artifact::ProjectPlan)])
            }
            Stage::MilestonesReview => self.gate_review(
                "Milestone plan",
                vec![self.store.path_of(Artifact::MilestonePlan)],
            ),
            Stage::DiagramReview => self.gate_review(
                "Architecture diagram",
                vec![self.store.path_of(Artifact::Diagram)],
            ),
            Stage::TechStackReview => {
                self.gate_review("Tech stack", vec![self.store.path_of(Artifact::TechStack)])
            }
            Stage::ConsensusReview => {
                let (index, _) = active_milestone(state)?;
                let mut locations = vec![self.store.path_of(Artifact::Consensus { milestone: index })];
                locations.extend(state.proposals.keys().map(|identity| {
                    self.store.path_of(Artifact::Proposal {
                        milestone: index,
                        backend: identity,
                    })
                }));
                self.gate_review(
                    &format!("Chosen approach for milestone {}", index + 1),
                    locations,
                )
            }
            Stage::RunReview => self.run_review(state),

            Stage::End => Ok(StateUpdate::default()),
        }
    }

    /// Call a backend with the stage spinner running.
    async fn generate(
        &self,
        stage: Stage,
        backend: &Backend,
        request: &GenerationRequest,
    ) -> Result<String> {
        self.ui.start_stage(stage.name(), &backend.identity);
        let result = self.client.invoke(backend, request).await;
        self.settle(stage, &result);
        result
    }

    fn settle<T>(&self, stage: Stage, result: &Result<T>) {
        match result {
            Ok(_) => self.ui.finish_stage(stage.name()),
            Err(e) => self.ui.stage_failed(stage.name(), &e.to_string()),
        }
    }

    /// Draft a planning document on the decision backend. Pending operator
    /// feedback is sent as a follow-up turn on the stage's thread. Returns the
    /// text and whether feedback was consumed.
    async fn draft_document(
        &self,
        stage: Stage,
        state: &RunState,
        system: &str,
        first_pass: String,
    ) -> Result<(String, bool)> {
        let (user, revised) = match state.pending_revision() {
            Some(feedback) => (prompts::revision_instruction(feedback), true),
            None => (first_pass, false),
        };
        let request = GenerationRequest::new(system, user)
            .on_thread(thread_id(&state.run_id, stage.name()));
        let text = self
            .generate(stage, self.registry.decision(), &request)
            .await?;
        Ok((text, revised))
    }

    async fn plan(&self, state: &RunState) -> Result<StateUpdate> {
        let (text, revised) = self
            .draft_document(
                Stage::Plan,
                state,
                prompts::PLAN_PROMPT,
                prompts::plan_instruction(state),
            )
            .await?;
        let path = self.store.write(Artifact::ProjectPlan, &text)?;
        self.ui.show_artifact("Project plan", &path);

        Ok(consume(
            StateUpdate {
                plan: Some(text),
                ..Default::default()
            },
            revised,
        ))
    }

    async fn milestones(&self, state: &RunState) -> Result<StateUpdate> {
        let (text, revised) = self
            .draft_document(
                Stage::Milestones,
                state,
                prompts::MILESTONE_PROMPT,
                prompts::milestone_instruction(state),
            )
            .await?;
        let path = self.store.write(Artifact::MilestonePlan, &text)?;
        self.ui.show_artifact("Milestone plan", &path);

        let tracker = MilestoneTracker::from_table(&text);
        tracing::info!(count = tracker.len(), "Parsed milestones");
        self.ui.set_milestones(tracker.len(), 0);

        Ok(consume(
            StateUpdate {
                milestone_plan: Some(text),
                milestones: Some(tracker),
                ..Default::default()
            },
            revised,
        ))
    }

    async fn diagram(&self, state: &RunState) -> Result<StateUpdate> {
        let (text, revised) = self
            .draft_document(
                Stage::Diagram,
                state,
                prompts::DIAGRAM_PROMPT,
                prompts::diagram_instruction(state),
            )
            .await?;
        let source = extract_diagram_source(&text);
        let path = self.store.write(Artifact::Diagram, &source)?;
        self.ui.show_artifact("Architecture diagram", &path);

        Ok(consume(
            StateUpdate {
                diagram_source: Some(source),
                ..Default::default()
            },
            revised,
        ))
    }

    async fn tech_stack(&self, state: &RunState) -> Result<StateUpdate> {
        let (text, revised) = self
            .draft_document(
                Stage::TechStack,
                state,
                prompts::TECH_STACK_PROMPT,
                prompts::tech_stack_instruction(state),
            )
            .await?;
        let path = self.store.write(Artifact::TechStack, &text)?;
        self.ui.show_artifact("Tech stack", &path);

        Ok(consume(
            StateUpdate {
                tech_stack: Some(text),
                ..Default::default()
            },
            revised,
        ))
    }

    /// Reset per-milestone fields for the active milestone.
    fn select_milestone(&self, state: &RunState) -> StateUpdate {
        let Some(milestone) = state.active_milestone() else {
            tracing::info!("No milestones remain");
            return StateUpdate::default();
        };
        let index = state.active_milestone_index();
        tracing::info!(milestone = index + 1, description = %milestone.description, "Selected milestone");
        self.ui
            .print_milestone_header(index, state.milestones.len(), &milestone.description);

        StateUpdate {
            proposals: Some(BTreeMap::new()),
            chosen_approach: Some(String::new()),
            generated_code: Some(String::new()),
            run_instructions: Some(String::new()),
            code_review_feedback: Some(String::new()),
            code_attempts: Some(0),
            code_generation: Some(0),
            continue_requested: Some(false),
            ..Default::default()
        }
    }

    async fn proposals(&self, state: &RunState) -> Result<StateUpdate> {
        let (index, milestone) = active_milestone(state)?;
        let backends = self.registry.proposers();
        let ctx = ProposalContext {
            milestone_index: index,
            milestone,
            plan: &state.plan,
            tech_stack: &state.tech_stack,
        };

        self.ui
            .start_stage(Stage::Proposals.name(), &format!("{} backends", backends.len()));
        let result = ProposalCoordinator::new(self.client.as_ref(), &self.store)
            .collect_proposals(&ctx, &backends)
            .await;
        self.settle(Stage::Proposals, &result);
        let proposals = result?;

        let identities: Vec<&str> = proposals.keys().map(String::as_str).collect();
        self.ui.show_proposals(&identities);

        Ok(StateUpdate {
            proposals: Some(proposals),
            ..Default::default()
        })
    }

    async fn consensus(&self, state: &RunState) -> Result<StateUpdate> {
        let (index, milestone) = active_milestone(state)?;
        let feedback = state.pending_revision();
        let input = ConsensusInput {
            milestone,
            proposals: &state.proposals,
            prior_approach: feedback.map(|_| state.chosen_approach.as_str()),
            feedback,
        };
        let backend = self.registry.decision();
        let thread = thread_id(&state.run_id, &format!("consensus-{}", index + 1));

        self.ui.start_stage(Stage::Consensus.name(), &backend.identity);
        let result = ConsensusSelector::new(self.client.as_ref(), backend)
            .select_approach(&input, Some(thread))
            .await;
        self.settle(Stage::Consensus, &result);
        let approach = result?;

        let path = self
            .store
            .write(Artifact::Consensus { milestone: index }, &approach)?;
        self.ui.show_artifact("Chosen approach", &path);

        Ok(consume(
            StateUpdate {
                chosen_approach: Some(approach),
                ..Default::default()
            },
            feedback.is_some(),
        ))
    }

    /// Generate code for the active milestone and write it into the code tree.
    ///
    /// Operator feedback from a failed run takes precedence over reviewer
    /// feedback. Files from earlier milestones and attempts are sent along so
    /// the backend can patch them instead of rewriting.
    async fn code(&self, state: &RunState) -> Result<StateUpdate> {
        let (index, milestone) = active_milestone(state)?;
        let operator_feedback = state.pending_revision();
        let feedback = operator_feedback.or_else(|| {
            Some(state.code_review_feedback.as_str()).filter(|f| !f.is_empty())
        });

        let code_dir = self.store.code_dir();
        let existing = render_code_tree(&code_dir);
        let system = if feedback.is_some() {
            CODER_REVISION_PROMPT
        } else {
            CODER_PROMPT
        };
        let request = GenerationRequest::new(
            system,
            prompts::code_instruction(state, milestone, existing.as_deref(), feedback),
        )
        .on_thread(thread_id(&state.run_id, &format!("code-{}", index + 1)));

        let backend = self.registry.coder();
        let attempt = state.code_attempts + 1;
        let generation = state.code_generation + 1;
        tracing::info!(
            milestone = index + 1,
            attempt,
            generation,
            backend = %backend.identity,
            revision = feedback.is_some(),
            "Generating code"
        );
        let text = self.generate(Stage::Code, backend, &request).await?;

        self.store.write(
            Artifact::GeneratedCode {
                milestone: index,
                generation,
            },
            &text,
        )?;
        let report = materialize(&text, &code_dir)
            .with_context(|| format!("Failed to write code under {}", code_dir.display()))?;
        self.ui.show_materialized(&report);
        tracing::info!(
            files = report.files_written(),
            unapplied = report.unapplied_units(),
            fallback = report.fallback,
            "Materialized code"
        );

        Ok(consume(
            StateUpdate {
                generated_code: Some(text),
                code_attempts: Some(attempt),
                code_generation: Some(generation),
                code_review_feedback: Some(String::new()),
                ..Default::default()
            },
            operator_feedback.is_some(),
        ))
    }

    async fn code_review(&self, state: &RunState) -> Result<StateUpdate> {
        let (index, milestone) = active_milestone(state)?;
        let code = render_code_tree(&self.store.code_dir())
            .unwrap_or_else(|| state.generated_code.clone());
        let backend = self.registry.decision();

        self.ui.start_stage(Stage::CodeReview.name(), &backend.identity);
        let result = CodeReviewer::new(self.client.as_ref(), backend)
            .review(milestone, &state.chosen_approach, &code)
            .await;
        self.settle(Stage::CodeReview, &result);
        let (verdict, raw) = result?;

        self.store.write(
            Artifact::CodeReview {
                milestone: index,
                generation: state.code_generation,
            },
            &raw,
        )?;
        self.ui.show_review_feedback(
            state.code_attempts,
            state.code_attempt_limit,
            verdict.feedback(),
        );
        if verdict.feedback().is_some() && state.code_attempts >= state.code_attempt_limit {
            tracing::warn!(
                attempts = state.code_attempts,
                "Code review attempts exhausted, handing over to the operator"
            );
        }

        Ok(StateUpdate {
            code_review_feedback: Some(verdict.feedback().unwrap_or_default().to_string()),
            ..Default::default()
        })
    }

    async fn instructions(&self, state: &RunState) -> Result<StateUpdate> {
        let (index, milestone) = active_milestone(state)?;
        let code = render_code_tree(&self.store.code_dir())
            .unwrap_or_else(|| state.generated_code.clone());
        let request = GenerationRequest::new(
            prompts::INSTRUCTIONS_PROMPT,
            prompts::instructions_instruction(state, milestone, &code),
        );
        let text = self
            .generate(Stage::Instructions, self.registry.decision(), &request)
            .await?;

        let path = self
            .store
            .write(Artifact::RunInstructions { milestone: index }, &text)?;
        self.ui.show_artifact("Run instructions", &path);

        Ok(StateUpdate {
            run_instructions: Some(text),
            code_review_feedback: Some(String::new()),
            ..Default::default()
        })
    }

    fn gate_review(&mut self, title: &str, locations: Vec<PathBuf>) -> Result<StateUpdate> {
        let review = ArtifactReview::new(title, locations);
        match self.gate.review(&review)? {
            GateDecision::Approve => {
                tracing::info!(artifact = %review.title, "Approved");
                Ok(StateUpdate::default())
            }
            GateDecision::Edit(feedback) => {
                tracing::info!(artifact = %review.title, "Changes requested");
                Ok(StateUpdate::default().request_revision(feedback))
            }
        }
    }

    /// The operator runs the code. A failure report restarts code generation
    /// with a fresh automated review budget.
    fn run_review(&mut self, state: &RunState) -> Result<StateUpdate> {
        let (index, _) = active_milestone(state)?;
        let locations = vec![
            self.store.code_dir(),
            self.store.path_of(Artifact::RunInstructions { milestone: index }),
        ];
        let title = format!(
            "Milestone {} run check (approve if it runs, edit to describe what failed)",
            index + 1
        );
        let update = self.gate_review(&title, locations)?;
        if update.revision_needed == Some(true) {
            return Ok(StateUpdate {
                code_attempts: Some(0),
                code_review_feedback: Some(String::new()),
                ..update
            });
        }
        Ok(update)
    }

    /// Mark the active milestone done and ask whether to continue. The active
    /// index only moves on an explicit yes; after the last milestone it moves
    /// past the end so nothing remains.
    fn complete_milestone(&mut self, state: &RunState) -> Result<StateUpdate> {
        let mut tracker = state.milestones.clone();
        let index = tracker.active_index();
        tracker.complete_active();
        self.ui.milestone_complete(index);

        let proceed = match tracker.milestones().get(index + 1) {
            Some(next) => self.gate.confirm(&format!(
                "Continue with milestone {}: {}?",
                index + 2,
                next.description
            ))?,
            None => true,
        };
        tracker.advance(proceed);
        if !proceed {
            tracing::info!(milestone = index + 1, "Operator stopped after milestone");
        }

        Ok(StateUpdate {
            milestones: Some(tracker),
            continue_requested: Some(proceed),
            ..Default::default()
        })
    }
}

fn active_milestone(state: &RunState) -> Result<(usize, &str)> {
    state
        .active_milestone()
        .map(|m| (state.active_milestone_index(), m.description.as_str()))
        .ok_or_else(|| anyhow!("No active milestone"))
}

fn consume(update: StateUpdate, revised: bool) -> StateUpdate {
    if revised {
        update.clear_revision()
    } else {
        update
    }
}
