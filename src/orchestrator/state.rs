//! Run state and the sparse updates stages return.
//!
//! Stages never mutate [`RunState`] directly. Each returns a [`StateUpdate`]
//! naming only the fields it changed, and the engine applies it. Between two
//! stages the state therefore always reflects a completed stage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::milestone::{Milestone, MilestoneTracker};

/// Default number of automated review rounds per milestone.
pub const DEFAULT_CODE_ATTEMPT_LIMIT: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub request: String,
    pub output_root: PathBuf,

    pub plan: String,
    pub milestone_plan: String,
    pub diagram_source: String,
    pub tech_stack: String,

    pub milestones: MilestoneTracker,
    pub proposals: BTreeMap<String, String>,
    pub chosen_approach: String,
    pub generated_code: String,
    pub run_instructions: String,

    /// Set by a gate that asked for changes. `feedback` is never empty while this is set.
    pub revision_needed: bool,
    pub feedback: String,

    /// Automated reviewer feedback; empty when the last review approved.
    pub code_review_feedback: String,
    /// Code generations since the milestone started or the operator last rejected a run.
    pub code_attempts: u32,
    /// Code generations for the active milestone. Numbers the code artifacts and
    /// only resets when a new milestone starts.
    pub code_generation: u32,
    pub code_attempt_limit: u32,
    /// Operator's answer to "continue with the next milestone?".
    pub continue_requested: bool,
}

impl RunState {
    pub fn new(request: impl Into<String>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            request: request.into(),
            output_root: output_root.into(),
            plan: String::new(),
            milestone_plan: String::new(),
            diagram_source: String::new(),
            tech_stack: String::new(),
            milestones: MilestoneTracker::default(),
            proposals: BTreeMap::new(),
            chosen_approach: String::new(),
            generated_code: String::new(),
            run_instructions: String::new(),
            revision_needed: false,
            feedback: String::new(),
            code_review_feedback: String::new(),
            code_attempts: 0,
            code_generation: 0,
            code_attempt_limit: DEFAULT_CODE_ATTEMPT_LIMIT,
            continue_requested: false,
        }
    }

    pub fn with_code_attempt_limit(mut self, limit: u32) -> Self {
        self.code_attempt_limit = limit;
        self
    }

    /// Operator feedback awaiting the producing stage, if any.
    pub fn pending_revision(&self) -> Option<&str> {
        if self.revision_needed {
            Some(self.feedback.as_str())
        } else {
            None
        }
    }

    pub fn active_milestone(&self) -> Option<&Milestone> {
        self.milestones.active()
    }

    pub fn active_milestone_index(&self) -> usize {
        self.milestones.active_index()
    }

    /// Merge a stage's update. Fields the update leaves as `None` are untouched.
    pub fn apply(&mut self, update: StateUpdate) {
        tracing::debug!(fields = ?update.changed_fields(), "Applying state update");

        let StateUpdate {
            plan,
            milestone_plan,
            diagram_source,
            tech_stack,
            milestones,
            proposals,
            chosen_approach,
            generated_code,
            run_instructions,
            revision_needed,
            feedback,
            code_review_feedback,
            code_attempts,
            code_generation,
            continue_requested,
        } = update;

        set(&mut self.plan, plan);
        set(&mut self.milestone_plan, milestone_plan);
        set(&mut self.diagram_source, diagram_source);
        set(&mut self.tech_stack, tech_stack);
        set(&mut self.milestones, milestones);
        set(&mut self.proposals, proposals);
        set(&mut self.chosen_approach, chosen_approach);
        set(&mut self.generated_code, generated_code);
        set(&mut self.run_instructions, run_instructions);
        set(&mut self.revision_needed, revision_needed);
        set(&mut self.feedback, feedback);
        set(&mut self.code_review_feedback, code_review_feedback);
        set(&mut self.code_attempts, code_attempts);
        set(&mut self.code_generation, code_generation);
        set(&mut self.continue_requested, continue_requested);

        if self.revision_needed && self.feedback.trim().is_empty() {
            tracing::warn!("Revision requested without feedback, ignoring it");
            self.revision_needed = false;
        }
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

/// Partial state produced by one stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub plan: Option<String>,
    pub milestone_plan: Option<String>,
    pub diagram_source: Option<String>,
    pub tech_stack: Option<String>,
    pub milestones: Option<MilestoneTracker>,
    pub proposals: Option<BTreeMap<String, String>>,
    pub chosen_approach: Option<String>,
    pub generated_code: Option<String>,
    pub run_instructions: Option<String>,
    pub revision_needed: Option<bool>,
    pub feedback: Option<String>,
    pub code_review_feedback: Option<String>,
    pub code_attempts: Option<u32>,
    pub code_generation: Option<u32>,
    pub continue_requested: Option<bool>,
}

impl StateUpdate {
    /// Route back to the producing stage with operator feedback.
    pub fn request_revision(mut self, feedback: impl Into<String>) -> Self {
        self.revision_needed = Some(true);
        self.feedback = Some(feedback.into());
        self
    }

    /// Mark pending feedback as consumed.
    pub fn clear_revision(mut self) -> Self {
        self.revision_needed = Some(false);
        self.feedback = Some(String::new());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Names of the fields this update sets, for logging.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let flags = [
            ("plan", self.plan.is_some()),
            ("milestone_plan", self.milestone_plan.is_some()),
            ("diagram_source", self.diagram_source.is_some()),
            ("tech_stack", self.tech_stack.is_some()),
            ("milestones", self.milestones.is_some()),
            ("proposals", self.proposals.is_some()),
            ("chosen_approach", self.chosen_approach.is_some()),
            ("generated_code", self.generated_code.is_some()),
            ("run_instructions", self.run_instructions.is_some()),
            ("revision_needed", self.revision_needed.is_some()),
            ("feedback", self.feedback.is_some()),
            ("code_review_feedback", self.code_review_feedback.is_some()),
            ("code_attempts", self.code_attempts.is_some()),
            ("code_generation", self.code_generation.is_some()),
            ("continue_requested", self.continue_requested.is_some()),
        ];
        flags
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }
}

/// Persisted at the end of a run as `run_summary.json`.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub request: &'a str,
    pub output_root: &'a Path,
    pub milestones: &'a [Milestone],
    pub active_milestone: usize,
    pub completed_milestones: usize,
    pub stages_executed: usize,
}

impl<'a> RunSummary<'a> {
    pub fn new(state: &'a RunState, stages_executed: usize) -> Self {
        Self {
            run_id: state.run_id,
            started_at: state.started_at,
            finished_at: Utc::now(),
            request: &state.request,
            output_root: &state.output_root,
            milestones: state.milestones.milestones(),
            active_milestone: state.milestones.active_index(),
            completed_milestones: state.milestones.completed_count(),
            stages_executed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new("todo app", "/tmp/out")
    }

    #[test]
    fn test_apply_only_touches_named_fields() {
        let mut state = state();
        state.tech_stack = "Python".into();
        state.apply(StateUpdate {
            plan: Some("# Plan".into()),
            ..Default::default()
        });
        assert_eq!(state.plan, "# Plan");
        assert_eq!(state.tech_stack, "Python");
        assert_eq!(state.request, "todo app");
    }

    #[test]
    fn test_revision_round_trip() {
        let mut state = state();
        state.apply(StateUpdate::default().request_revision("more detail"));
        assert_eq!(state.pending_revision(), Some("more detail"));

        state.apply(StateUpdate::default().clear_revision());
        assert!(!state.revision_needed);
        assert!(state.feedback.is_empty());
        assert_eq!(state.pending_revision(), None);
    }

    #[test]
    fn test_revision_without_feedback_is_dropped() {
        let mut state = state();
        state.apply(StateUpdate::default().request_revision("   "));
        assert!(!state.revision_needed);
    }

    #[test]
    fn test_changed_fields_lists_set_fields() {
        let update = StateUpdate {
            chosen_approach: Some("REST".into()),
            code_attempts: Some(0),
            ..Default::default()
        };
        assert_eq!(update.changed_fields(), vec!["chosen_approach", "code_attempts"]);
        assert!(StateUpdate::default().is_empty());
    }

    #[test]
    fn test_summary_reflects_tracker() {
        let mut state = state();
        state.milestones = MilestoneTracker::new(vec![Milestone::new("a"), Milestone::new("b")]);
        state.milestones.complete_active();
        state.milestones.advance(true);

        let summary = RunSummary::new(&state, 12);
        assert_eq!(summary.active_milestone, 1);
        assert_eq!(summary.completed_milestones, 1);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["milestones"][0]["description"], "a");
        assert_eq!(json["stages_executed"], 12);
    }
}
