use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use clonewright_common::RunStatus;

use crate::orchestrator::{ProgressEvent, RunReport};
use crate::ui::icons::{
    CHECK, CROSS, GLOBE, PALETTE, PROGRESS, REVIEW, ROCKET, SPARKLE, WARN, WRENCH,
};

/// Terminal rendering of one clone run.
///
/// Two bars are stacked: a spinner showing the current stage, and a section
/// bar that fills as generated sections come back. Everything else is printed
/// as a line above the bars.
pub struct RunProgressUI {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    section_bar: ProgressBar,
    verbose: bool,
}

impl RunProgressUI {
    pub fn new(url: &str, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");
        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stage");
        stage_bar.enable_steady_tick(Duration::from_millis(100));

        let section_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let section_bar = multi.add(ProgressBar::new(0));
        section_bar.set_style(section_style);
        section_bar.set_prefix("Sections");

        let ui = Self {
            multi,
            stage_bar,
            section_bar,
            verbose,
        };
        ui.print_line(format!("{}Cloning {}", GLOBE, style(url).cyan().underlined()));
        ui
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn handle(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StageEntered { stage } => {
                self.stage_bar.set_message(style(stage.to_string()).yellow().to_string());
            }
            ProgressEvent::ResourceReady { id, .. } => {
                if self.verbose {
                    self.print_line(format!("  {} environment {} ready", style("·").dim(), id));
                }
            }
            ProgressEvent::ExtractionComplete {
                title,
                sections,
                screenshots,
            } => {
                self.print_line(format!(
                    "{}Captured \"{}\": {} sections, {} screenshots",
                    CHECK, title, sections, screenshots
                ));
            }
            ProgressEvent::BudgetComputed { profile, meta, .. } => {
                self.print_line(format!(
                    "{}Budget: ~{} tokens of {} ({}, {:.0}% duplicated)",
                    PROGRESS,
                    meta.estimated_tokens,
                    meta.budget,
                    profile.framework,
                    profile.duplication_ratio * 100.0
                ));
            }
            ProgressEvent::DesignTokensReady {
                fallback,
                primary,
                heading_font,
            } => {
                let source = if *fallback { " (fallback)" } else { "" };
                self.print_line(format!(
                    "{}Design tokens{}: primary {}, headings in {}",
                    PALETTE, source, primary, heading_font
                ));
            }
            ProgressEvent::SectionsPlanned { components } => {
                self.section_bar.set_length(components.len() as u64);
                self.section_bar.set_position(0);
                if self.verbose {
                    self.print_line(format!("  planned: {}", components.join(", ")));
                }
            }
            ProgressEvent::SectionCompleted {
                component,
                success,
                error,
                completed,
                ..
            } => {
                self.section_bar.set_position(*completed as u64);
                self.section_bar.set_message(component.clone());
                if !success {
                    self.print_line(format!(
                        "{}{} failed: {}",
                        CROSS,
                        style(component).red(),
                        error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
            ProgressEvent::ReviewApplied {
                changed, rejected, ..
            } => {
                self.print_line(format!(
                    "{}Review changed {} file(s), rejected {}",
                    REVIEW,
                    changed.len(),
                    rejected.len()
                ));
            }
            ProgressEvent::ValidationResult {
                pass,
                valid,
                errors,
                warnings,
            } => {
                if *valid {
                    self.print_line(format!(
                        "{}Validation pass {} clean ({} warnings)",
                        CHECK, pass, warnings
                    ));
                } else {
                    self.print_line(format!(
                        "{}Validation pass {}: {} error(s)",
                        WARN,
                        pass,
                        errors.len()
                    ));
                    if self.verbose {
                        for err in errors {
                            self.print_line(format!("    {}", style(err).dim()));
                        }
                    }
                }
            }
            ProgressEvent::FixApplied {
                stage,
                attempt,
                changed,
            } => {
                self.print_line(format!(
                    "{}Fix {} ({}): {}",
                    WRENCH,
                    attempt,
                    stage,
                    changed.join(", ")
                ));
            }
            ProgressEvent::Deployed { endpoint, files, .. } => {
                self.section_bar.finish_and_clear();
                self.print_line(format!(
                    "{}Deployed {} files to {}",
                    ROCKET,
                    files,
                    style(endpoint).cyan()
                ));
            }
            ProgressEvent::CompileResult {
                attempt,
                compiled,
                errors,
                ..
            } => {
                if *compiled && errors.is_empty() {
                    self.print_line(format!("{}Compiled cleanly (check {})", CHECK, attempt));
                } else if errors.is_empty() {
                    self.print_line(format!(
                        "  {} check {}: no verdict yet",
                        style("·").dim(),
                        attempt
                    ));
                } else {
                    self.print_line(format!(
                        "{}Check {}: {} compile error(s)",
                        WARN,
                        attempt,
                        errors.len()
                    ));
                }
            }
            ProgressEvent::Terminal { .. } => {
                self.stage_bar.finish_and_clear();
                self.section_bar.finish_and_clear();
            }
        }
    }

    /// Print the final outcome.
    pub fn finish(&self, report: &RunReport) {
        self.stage_bar.finish_and_clear();
        self.section_bar.finish_and_clear();

        let (icon, label) = match report.status {
            RunStatus::Clean => (SPARKLE, style("clean").green().bold()),
            RunStatus::DeployedWithIssues => (WARN, style("deployed with issues").yellow().bold()),
            RunStatus::FailedBeforeDeploy => (CROSS, style("failed before deploy").red().bold()),
        };
        self.print_line(format!("{}Run {} {}", icon, style(&report.run_id).dim(), label));
        if let Some(reason) = &report.reason {
            self.print_line(format!("  reason: {}", reason));
        }
        if let Some(endpoint) = &report.endpoint {
            self.print_line(format!("  preview: {}", style(endpoint).cyan().underlined()));
        }
        self.print_line(format!(
            "  sections: {}/{} generated, {} compile fix attempt(s)",
            report.sections.len() - report.sections_failed(),
            report.sections.len(),
            report.fix_attempts
        ));
    }
}
