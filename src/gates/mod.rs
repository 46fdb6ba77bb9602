//! Human approval gates.
//!
//! Every artifact passes through a [`HumanGate`] before the pipeline moves on.
//! The gate either approves or returns operator feedback, which sends the
//! pipeline back to the producing stage. `ConsoleGate` prompts on the terminal;
//! `ScriptedGate` replays queued decisions for `--yes` runs and tests.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, theme::ColorfulTheme};
use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approve,
    /// Revise the artifact. The feedback is never empty.
    Edit(String),
}

/// What the operator is asked to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReview {
    pub title: String,
    pub locations: Vec<PathBuf>,
}

impl ArtifactReview {
    pub fn new(title: impl Into<String>, locations: Vec<PathBuf>) -> Self {
        Self {
            title: title.into(),
            locations,
        }
    }
}

/// Injectable approval capability.
pub trait HumanGate: Send {
    /// Block until the operator approves the artifact or asks for changes.
    fn review(&mut self, review: &ArtifactReview) -> Result<GateDecision>;

    /// Ask a yes/no question.
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateToken {
    Approve,
    Edit,
}

/// Recognize the two gate tokens (full word or first letter, any case).
pub fn parse_gate_token(input: &str) -> Option<GateToken> {
    match input.trim().to_lowercase().as_str() {
        "approve" | "a" => Some(GateToken::Approve),
        "edit" | "e" => Some(GateToken::Edit),
        _ => None,
    }
}

/// Trimmed feedback, or `None` if there is nothing to act on.
pub fn normalize_feedback(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Terminal gate backed by `dialoguer`.
#[derive(Debug, Default)]
pub struct ConsoleGate;

impl ConsoleGate {
    pub fn new() -> Self {
        Self
    }

    fn print_review(review: &ArtifactReview) {
        println!();
        println!("{}", style(format!("Review: {}", review.title)).bold().cyan());
        for location in &review.locations {
            println!("  {}", style(location.display()).underlined());
        }
    }
}

impl HumanGate for ConsoleGate {
    fn review(&mut self, review: &ArtifactReview) -> Result<GateDecision> {
        Self::print_review(review);

        let theme = ColorfulTheme::default();
        loop {
            let answer: String = Input::with_theme(&theme)
                .with_prompt("Type 'approve' to continue or 'edit' to request changes")
                .interact_text()
                .context("Failed to read gate decision")?;

            match parse_gate_token(&answer) {
                Some(GateToken::Approve) => return Ok(GateDecision::Approve),
                Some(GateToken::Edit) => break,
                None => println!("  {}", style("Please enter 'approve' or 'edit'.").yellow()),
            }
        }

        loop {
            let feedback: String = Input::with_theme(&theme)
                .with_prompt("What should change?")
                .allow_empty(true)
                .interact_text()
                .context("Failed to read feedback")?;

            match normalize_feedback(&feedback) {
                Some(text) => return Ok(GateDecision::Edit(text)),
                None => println!("  {}", style("Feedback cannot be empty.").yellow()),
            }
        }
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .default(true)
            .interact()
            .context("Failed to read confirmation")
    }
}

/// Gate that replays queued answers. Once a queue runs dry it approves and
/// answers yes, so an empty `ScriptedGate` drives a run straight through.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    decisions: VecDeque<GateDecision>,
    confirmations: VecDeque<bool>,
    /// Titles of every review presented, in order.
    pub reviewed: Vec<String>,
    /// Every confirmation question asked, in order.
    pub questions: Vec<String>,
}

impl ScriptedGate {
    /// Approve everything.
    pub fn auto_approve() -> Self {
        Self::default()
    }

    pub fn with_decisions(mut self, decisions: impl IntoIterator<Item = GateDecision>) -> Self {
        self.decisions.extend(decisions);
        self
    }

    pub fn with_confirmations(mut self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.confirmations.extend(answers);
        self
    }
}

impl HumanGate for ScriptedGate {
    fn review(&mut self, review: &ArtifactReview) -> Result<GateDecision> {
        self.reviewed.push(review.title.clone());
        // Empty feedback is dropped the same way the console re-prompts for it.
        while let Some(decision) = self.decisions.pop_front() {
            match decision {
                GateDecision::Edit(text) => {
                    if let Some(text) = normalize_feedback(&text) {
                        return Ok(GateDecision::Edit(text));
                    }
                }
                GateDecision::Approve => return Ok(GateDecision::Approve),
            }
        }
        Ok(GateDecision::Approve)
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        self.questions.push(question.to_string());
        Ok(self.confirmations.pop_front().unwrap_or(true))
    }
}
