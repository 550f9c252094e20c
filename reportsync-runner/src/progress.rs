//! Per-folder progress narrative.

use crate::summary::{FolderOutcome, RunSummary};
use reportsync_core::domain::RunFolder;
use std::fmt;

/// Pipeline steps reported between folder start and completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Locate,
    Collect,
    Generate,
    Wait,
    Export,
    Distribute,
    Inline,
    Cleanup,
    Mark,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Locate => "locate",
            Step::Collect => "collect",
            Step::Generate => "generate",
            Step::Wait => "wait",
            Step::Export => "export",
            Step::Distribute => "distribute",
            Step::Inline => "inline",
            Step::Cleanup => "cleanup",
            Step::Mark => "mark",
        };
        f.write_str(s)
    }
}

/// Progress callback for a pipeline pass.
pub trait PipelineProgress: Send {
    /// Called when a folder is picked up.
    fn on_folder_start(&self, folder: &RunFolder, index: usize, total: usize);

    /// Called after each step with a one-line result.
    fn on_step(&self, folder: &RunFolder, step: Step, detail: &str);

    /// Called when a folder reaches its final state.
    fn on_folder_complete(&self, outcome: &FolderOutcome);

    /// Called once the pass is over.
    fn on_run_complete(&self, summary: &RunSummary);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl PipelineProgress for StdoutProgress {
    fn on_folder_start(&self, folder: &RunFolder, index: usize, total: usize) {
        println!("\n[{}/{}] Processing folder: {folder}", index + 1, total);
    }

    fn on_step(&self, _folder: &RunFolder, step: Step, detail: &str) {
        println!("  {step:<10} {detail}");
    }

    fn on_folder_complete(&self, outcome: &FolderOutcome) {
        match &outcome.detail {
            Some(detail) => println!("  => {} ({detail})", outcome.state),
            None => println!("  => {}", outcome.state),
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        println!("\n{summary}");
    }
}

/// Discards all progress; for tests and library callers.
pub struct SilentProgress;

impl PipelineProgress for SilentProgress {
    fn on_folder_start(&self, _folder: &RunFolder, _index: usize, _total: usize) {}
    fn on_step(&self, _folder: &RunFolder, _step: Step, _detail: &str) {}
    fn on_folder_complete(&self, _outcome: &FolderOutcome) {}
    fn on_run_complete(&self, _summary: &RunSummary) {}
}
