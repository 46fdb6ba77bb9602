use crate::materialize::{ApplyMode, MaterializeReport};
use crate::ui::icons::{CHECK, COUNCIL, CROSS, DOC, FILE_MOD, FILE_NEW, REVIEW, SPARKLE, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Terminal UI for a council run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Milestone bar: how many milestones have been completed
/// - Stage spinner: the stage currently running and which backend it waits on
///
/// All output goes through `MultiProgress` so gate prompts and log lines do
/// not tear the bars.
pub struct CouncilUI {
    multi: MultiProgress,
    milestone_bar: ProgressBar,
    stage_bar: ProgressBar,
    verbose: bool,
}

impl CouncilUI {
    /// Create the UI drawing to stderr.
    ///
    /// # Arguments
    /// * `verbose`: when `true`, per-call detail lines are printed
    pub fn new(verbose: bool) -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), verbose)
    }

    /// A UI that draws nothing. Used by `--yes` runs in pipelines and by tests.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), false)
    }

    fn with_target(target: ProgressDrawTarget, verbose: bool) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let milestone_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let milestone_bar = multi.add(ProgressBar::new(0));
        milestone_bar.set_style(milestone_style);
        milestone_bar.set_prefix("Milestones");

        let stage_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("     Stage");

        Self {
            multi,
            milestone_bar,
            stage_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Size the milestone bar once the milestone plan is known.
    pub fn set_milestones(&self, total: usize, completed: usize) {
        self.milestone_bar.set_length(total as u64);
        self.milestone_bar.set_position(completed as u64);
    }

    /// Print the header block for a milestone before its proposals are collected.
    pub fn print_milestone_header(&self, index: usize, total: usize, description: &str) {
        self.milestone_bar
            .set_message(format!("{}: {}", style(index + 1).yellow(), description));
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} Milestone {}/{}: {}",
            style("▶").green().bold(),
            style(index + 1).yellow().bold(),
            total,
            description
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Start the spinner while a stage waits on a backend.
    ///
    /// # Arguments
    /// * `stage`: stage name, e.g. `"Proposals"`
    /// * `detail`: what it waits on, e.g. `"3 backends"`
    pub fn start_stage(&self, stage: &str, detail: &str) {
        self.stage_bar.set_message(format!(
            "{} {}",
            style(stage).cyan(),
            style(format!("({})", detail)).dim()
        ));
        self.stage_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Stop the spinner so an operator prompt can take over the terminal.
    pub fn finish_stage(&self, stage: &str) {
        self.stage_bar.disable_steady_tick();
        self.stage_bar
            .set_message(format!("{}{}", CHECK, style(stage).green()));
    }

    pub fn stage_failed(&self, stage: &str, reason: &str) {
        self.stage_bar.disable_steady_tick();
        self.stage_bar.set_message(format!(
            "{}{} failed: {}",
            CROSS,
            style(stage).red().bold(),
            reason
        ));
    }

    /// Show where an artifact was written.
    pub fn show_artifact(&self, label: &str, path: &Path) {
        self.print_line(format!(
            "  {}{} {}",
            DOC,
            label,
            style(path.display()).dim()
        ));
    }

    pub fn show_proposals(&self, identities: &[&str]) {
        self.print_line(format!(
            "  {}Proposals from {}",
            COUNCIL,
            style(identities.join(", ")).yellow()
        ));
    }

    pub fn show_review_feedback(&self, attempt: u32, limit: u32, feedback: Option<&str>) {
        match feedback {
            None => self.print_line(format!(
                "  {}Code review {}/{}: {}",
                REVIEW,
                attempt,
                limit,
                style("approved").green()
            )),
            Some(text) => {
                self.print_line(format!(
                    "  {}Code review {}/{}: {}",
                    REVIEW,
                    attempt,
                    limit,
                    style("needs revision").yellow()
                ));
                if self.verbose {
                    for line in text.lines() {
                        self.print_line(format!("      {}", style(line).dim()));
                    }
                }
            }
        }
    }

    /// Summarize what materialization did to the code tree.
    pub fn show_materialized(&self, report: &MaterializeReport) {
        if report.fallback {
            self.print_line(format!(
                "  {}No file blocks found, saved the whole response as one file",
                WARN
            ));
        }
        for outcome in &report.outcomes {
            let line = match outcome.mode {
                ApplyMode::Written => format!(
                    "    {}{}",
                    FILE_NEW,
                    style(outcome.path.display()).green()
                ),
                ApplyMode::Patched => format!(
                    "    {}{} {}",
                    FILE_MOD,
                    style(outcome.path.display()).yellow(),
                    style(format!("({} patch units)", outcome.applied_units)).dim()
                ),
            };
            if self.verbose || outcome.unapplied_units == 0 {
                self.print_line(line);
            }
            if outcome.unapplied_units > 0 {
                self.print_line(format!(
                    "    {}{} {}",
                    WARN,
                    style(outcome.path.display()).red(),
                    style(format!(
                        "({} patch units did not match)",
                        outcome.unapplied_units
                    ))
                    .red()
                ));
            }
        }
    }

    /// Advance the milestone bar and print a completion line.
    pub fn milestone_complete(&self, index: usize) {
        self.milestone_bar.inc(1);
        self.print_line(format!(
            "\n{}Milestone {} complete!\n",
            SPARKLE,
            style(index + 1).green().bold()
        ));
    }

    /// Finish all bars at the end of the run. A run that stopped early leaves
    /// the milestone bar where it stopped.
    pub fn finish(&self, completed: usize, total: usize) {
        self.stage_bar.finish_and_clear();
        self.milestone_bar.set_position(completed as u64);
        if completed < total {
            self.milestone_bar.abandon_with_message(format!(
                "{}{}/{} milestones complete",
                WARN, completed, total
            ));
        } else {
            self.milestone_bar.finish_with_message(format!(
                "{}{}/{} milestones complete",
                CHECK, completed, total
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::ApplyOutcome;
    use std::path::PathBuf;

    #[test]
    fn test_hidden_ui_accepts_every_call() {
        let ui = CouncilUI::hidden();
        ui.set_milestones(2, 0);
        ui.print_milestone_header(0, 2, "Setup repo");
        ui.start_stage("Proposals", "2 backends");
        ui.show_proposals(&["alpha", "beta"]);
        ui.finish_stage("Proposals");
        ui.show_review_feedback(1, 3, Some("- add tests"));
        ui.show_materialized(&MaterializeReport {
            outcomes: vec![ApplyOutcome {
                path: PathBuf::from("app.py"),
                mode: ApplyMode::Patched,
                applied_units: 1,
                unapplied_units: 1,
            }],
            fallback: false,
        });
        ui.milestone_complete(0);
        ui.finish(1, 2);
        assert_eq!(ui.milestone_bar.position(), 1);
    }

    #[test]
    fn test_finish_fills_bar_only_when_every_milestone_is_done() {
        let ui = CouncilUI::hidden();
        ui.set_milestones(2, 0);
        ui.milestone_complete(0);
        ui.milestone_complete(1);
        ui.finish(2, 2);
        assert_eq!(ui.milestone_bar.position(), 2);
        assert!(ui.milestone_bar.is_finished());
    }
}
