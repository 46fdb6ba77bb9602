//! Stage graph.
//!
//! ```text
//! Plan ⇄ PlanReview → Milestones ⇄ MilestonesReview → Diagram ⇄ DiagramReview
//!   → TechStack ⇄ TechStackReview → SelectMilestone ─(none left)→ End
//!   → Proposals → Consensus ⇄ ConsensusReview → Code ⇄ CodeReview
//!   → Instructions → RunReview ─(failed)→ Code
//!   → CompleteMilestone ─(continue)→ SelectMilestone
//! ```
//!
//! [`next_stage`] is a pure function of the finished stage and the state after
//! its update was applied.

use serde::Serialize;
use std::fmt;

use super::state::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Plan,
    PlanReview,
    Milestones,
    MilestonesReview,
    Diagram,
    DiagramReview,
    TechStack,
    TechStackReview,
    SelectMilestone,
    Proposals,
    Consensus,
    ConsensusReview,
    Code,
    CodeReview,
    Instructions,
    RunReview,
    CompleteMilestone,
    End,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::PlanReview => "plan_review",
            Stage::Milestones => "milestones",
            Stage::MilestonesReview => "milestones_review",
            Stage::Diagram => "diagram",
            Stage::DiagramReview => "diagram_review",
            Stage::TechStack => "tech_stack",
            Stage::TechStackReview => "tech_stack_review",
            Stage::SelectMilestone => "select_milestone",
            Stage::Proposals => "proposals",
            Stage::Consensus => "consensus",
            Stage::ConsensusReview => "consensus_review",
            Stage::Code => "code",
            Stage::CodeReview => "code_review",
            Stage::Instructions => "instructions",
            Stage::RunReview => "run_review",
            Stage::CompleteMilestone => "complete_milestone",
            Stage::End => "end",
        }
    }

    /// Stages that block on the operator.
    pub fn is_gate(&self) -> bool {
        matches!(
            self,
            Stage::PlanReview
                | Stage::MilestonesReview
                | Stage::DiagramReview
                | Stage::TechStackReview
                | Stage::ConsensusReview
                | Stage::RunReview
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the stage after `finished`.
pub fn next_stage(finished: Stage, state: &RunState) -> Stage {
    let revise = state.revision_needed;
    match finished {
        Stage::Plan => Stage::PlanReview,
        Stage::PlanReview if revise => Stage::Plan,
        Stage::PlanReview => Stage::Milestones,

        Stage::Milestones => Stage::MilestonesReview,
        Stage::MilestonesReview if revise => Stage::Milestones,
        Stage::MilestonesReview => Stage::Diagram,

        Stage::Diagram => Stage::DiagramReview,
        Stage::DiagramReview if revise => Stage::Diagram,
        Stage::DiagramReview => Stage::TechStack,

        Stage::TechStack => Stage::TechStackReview,
        Stage::TechStackReview if revise => Stage::TechStack,
        Stage::TechStackReview => Stage::SelectMilestone,

        Stage::SelectMilestone if state.milestones.has_remaining() => Stage::Proposals,
        Stage::SelectMilestone => Stage::End,

        Stage::Proposals => Stage::Consensus,
        Stage::Consensus => Stage::ConsensusReview,
        Stage::ConsensusReview if revise => Stage::Consensus,
        Stage::ConsensusReview => Stage::Code,

        Stage::Code => Stage::CodeReview,
        Stage::CodeReview
            if !state.code_review_feedback.is_empty()
                && state.code_attempts < state.code_attempt_limit =>
        {
            Stage::Code
        }
        Stage::CodeReview => Stage::Instructions,

        Stage::Instructions => Stage::RunReview,
        Stage::RunReview if revise => Stage::Code,
        Stage::RunReview => Stage::CompleteMilestone,

        Stage::CompleteMilestone
            if state.continue_requested && state.milestones.has_remaining() =>
        {
            Stage::SelectMilestone
        }
        Stage::CompleteMilestone => Stage::End,

        Stage::End => Stage::End,
    }
}
