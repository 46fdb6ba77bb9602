//! Milestone tracking.
//!
//! The milestone stage answers with a Markdown table. Each data row becomes
//! one [`Milestone`], described by its second column:
//!
//! ```text
//! | # | Milestone       | Deliverable        |
//! |---|-----------------|--------------------|
//! | 1 | Setup repo      | Skeleton + CI      |
//! | 2 | Build API       | CRUD endpoints     |
//! ```
//!
//! A table that yields no rows degrades to a single synthetic milestone so the
//! pipeline never stalls on an unparseable plan.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Description used when the milestone table has no parseable rows.
pub const FALLBACK_MILESTONE: &str = "Implement the complete project as described in the plan";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub description: String,
    pub completed: bool,
}

impl Milestone {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            completed: false,
        }
    }
}

fn is_separator_row(line: &str) -> bool {
    line.chars()
        .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
        && line.contains('-')
}

fn cells(line: &str) -> Vec<String> {
    let inner = line.trim().trim_start_matches('|').trim_end_matches('|');
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

/// Split text into runs of consecutive table lines.
fn table_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.starts_with('|') {
            current.push(line);
        } else if !current.is_empty() {
            blocks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn block_milestones(block: &[&str]) -> Vec<Milestone> {
    let headers: HashSet<usize> = block
        .iter()
        .enumerate()
        .filter(|(_, l)| is_separator_row(l))
        .filter_map(|(i, _)| i.checked_sub(1))
        .collect();

    block
        .iter()
        .enumerate()
        .filter(|(i, l)| !is_separator_row(l) && !headers.contains(i))
        .filter_map(|(_, l)| cells(l).into_iter().nth(1).filter(|d| !d.is_empty()))
        .map(Milestone::new)
        .collect()
}

/// Parse a Markdown milestone table into an ordered milestone list.
///
/// Rows must start with `|`. Separator rows and the header row above each
/// of them are skipped. Rows without a non-empty second column are ignored.
/// Only the first table with data rows is used; later tables (risks, notes)
/// are not milestones.
pub fn parse_milestones(table: &str) -> Vec<Milestone> {
    let milestones = table_blocks(table)
        .iter()
        .map(|block| block_milestones(block))
        .find(|m| !m.is_empty());

    milestones.unwrap_or_else(|| {
        tracing::warn!("Milestone table had no parseable rows, using a single fallback milestone");
        vec![Milestone::new(FALLBACK_MILESTONE)]
    })
}

/// Next active index. Only moves when the operator confirmed continuation,
/// and never past `len`.
pub fn advance(index: usize, len: usize, proceed: bool) -> usize {
    if proceed && index < len {
        index + 1
    } else {
        index
    }
}

/// Ordered milestones plus the active index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneTracker {
    milestones: Vec<Milestone>,
    active: usize,
}

impl MilestoneTracker {
    pub fn new(milestones: Vec<Milestone>) -> Self {
        Self {
            milestones,
            active: 0,
        }
    }

    pub fn from_table(table: &str) -> Self {
        Self::new(parse_milestones(table))
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn len(&self) -> usize {
        self.milestones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.milestones.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// The active milestone, or `None` once every milestone has been passed.
    pub fn active(&self) -> Option<&Milestone> {
        self.milestones.get(self.active)
    }

    pub fn has_remaining(&self) -> bool {
        self.active < self.milestones.len()
    }

    pub fn complete_active(&mut self) {
        if let Some(m) = self.milestones.get_mut(self.active) {
            m.completed = true;
        }
    }

    /// Advance when `proceed` is true. Returns the new active index.
    pub fn advance(&mut self, proceed: bool) -> usize {
        self.active = advance(self.active, self.milestones.len(), proceed);
        self.active
    }

    pub fn completed_count(&self) -> usize {
        self.milestones.iter().filter(|m| m.completed).count()
    }
}
