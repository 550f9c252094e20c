//! Per-folder outcomes and the run-level aggregate.
//!
//! The aggregate is a plain value threaded through the pipeline and updated
//! only when a folder finishes.

use chrono::NaiveDate;
use reportsync_core::domain::RunFolder;
use std::fmt;

/// Where a folder ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderState {
    /// Marker already present, or the marker lookup failed.
    Skipped,
    /// No result files; marked with zero files.
    NoResults,
    /// Login, trigger, wait or distribution produced no report.
    ReportFailed,
    /// Report copied into the folder.
    ReportDistributed,
    /// The wait was cancelled; the folder is left unmarked.
    Cancelled,
    /// An unexpected store failure stopped the folder.
    Failed,
}

impl fmt::Display for FolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FolderState::Skipped => "skipped",
            FolderState::NoResults => "no results",
            FolderState::ReportFailed => "report failed",
            FolderState::ReportDistributed => "report distributed",
            FolderState::Cancelled => "cancelled",
            FolderState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happened to one folder.
#[derive(Debug, Clone)]
pub struct FolderOutcome {
    pub folder: RunFolder,
    pub state: FolderState,
    pub files_copied: usize,
    pub copy_failures: usize,
    pub artifacts_distributed: usize,
    pub documents_inlined: usize,
    pub inline_failures: usize,
    pub cleanup_failures: usize,
    pub archive_bytes: Option<u64>,
    /// Error text for skips with a failed lookup, report failures and hard failures.
    pub detail: Option<String>,
    pub marked: bool,
}

impl FolderOutcome {
    pub fn new(folder: RunFolder, state: FolderState) -> Self {
        Self {
            folder,
            state,
            files_copied: 0,
            copy_failures: 0,
            artifacts_distributed: 0,
            documents_inlined: 0,
            inline_failures: 0,
            cleanup_failures: 0,
            archive_bytes: None,
            detail: None,
            marked: false,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Human-readable body written under the marker timestamp.
    pub fn marker_summary(&self) -> String {
        let mut lines = vec![format!("Files copied: {}", self.files_copied)];
        if self.copy_failures > 0 {
            lines.push(format!("Copy failures: {}", self.copy_failures));
        }
        match self.state {
            FolderState::NoResults => lines.push("Report: not attempted (no results)".into()),
            FolderState::ReportDistributed => {
                lines.push(format!(
                    "Report: distributed ({} files)",
                    self.artifacts_distributed
                ));
                if self.documents_inlined > 0 || self.inline_failures > 0 {
                    lines.push(format!(
                        "Self-contained pages: {} ({} failed)",
                        self.documents_inlined, self.inline_failures
                    ));
                }
            }
            _ => lines.push(format!(
                "Report: not generated ({})",
                self.detail.as_deref().unwrap_or("unknown error")
            )),
        }
        if let Some(bytes) = self.archive_bytes {
            lines.push(format!("Archive: {bytes} bytes"));
        }
        lines.join("\n")
    }
}

/// Aggregate over one pipeline pass.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub date: NaiveDate,
    pub found: usize,
    pub processed: usize,
    pub skipped: usize,
    pub no_results: usize,
    pub reports_generated: usize,
    pub report_failures: usize,
    pub failed: usize,
    /// Marker lookups that failed with something other than "absent".
    pub lookup_errors: usize,
    pub cancelled: bool,
    pub outcomes: Vec<FolderOutcome>,
}

impl RunSummary {
    pub fn new(date: NaiveDate, found: usize) -> Self {
        Self {
            date,
            found,
            processed: 0,
            skipped: 0,
            no_results: 0,
            reports_generated: 0,
            report_failures: 0,
            failed: 0,
            lookup_errors: 0,
            cancelled: false,
            outcomes: Vec::with_capacity(found),
        }
    }

    /// Fold one finished folder into the totals.
    pub fn record(&mut self, outcome: FolderOutcome) {
        match outcome.state {
            FolderState::Skipped => {
                self.skipped += 1;
                if outcome.detail.is_some() {
                    self.lookup_errors += 1;
                }
            }
            FolderState::NoResults => {
                self.processed += 1;
                self.no_results += 1;
            }
            FolderState::ReportFailed => {
                self.processed += 1;
                self.report_failures += 1;
            }
            FolderState::ReportDistributed => {
                self.processed += 1;
                self.reports_generated += 1;
            }
            FolderState::Cancelled => self.cancelled = true,
            FolderState::Failed => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Folders that ended without a marker and will be picked up again.
    pub fn pending(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state != FolderState::Skipped && !o.marked)
            .count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary for {}:", self.date)?;
        writeln!(f, "  Folders found:     {}", self.found)?;
        writeln!(f, "  Folders processed: {}", self.processed)?;
        writeln!(f, "  Folders skipped:   {}", self.skipped)?;
        writeln!(f, "  Reports generated: {}", self.reports_generated)?;
        writeln!(f, "  Report failures:   {}", self.report_failures)?;
        writeln!(f, "  No results:        {}", self.no_results)?;
        write!(f, "  Failed:            {}", self.failed)?;
        if self.lookup_errors > 0 {
            write!(f, "\n  Marker lookup errors: {}", self.lookup_errors)?;
        }
        if self.cancelled {
            write!(f, "\n  Run cancelled before completion")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder() -> RunFolder {
        RunFolder::new("R", NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), "run-07")
    }

    #[test]
    fn record_updates_only_matching_counters() {
        let mut summary = RunSummary::new(folder().date, 4);
        summary.record(FolderOutcome::new(folder(), FolderState::Skipped));
        summary.record(FolderOutcome::new(folder(), FolderState::Skipped).with_detail("denied"));
        summary.record(FolderOutcome::new(folder(), FolderState::ReportDistributed));
        summary.record(FolderOutcome::new(folder(), FolderState::ReportFailed));
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.lookup_errors, 1);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.reports_generated, 1);
        assert_eq!(summary.report_failures, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn marker_summary_reports_zero_files() {
        let outcome = FolderOutcome::new(folder(), FolderState::NoResults);
        assert!(outcome.marker_summary().starts_with("Files copied: 0"));
    }

    #[test]
    fn marker_summary_names_failure() {
        let mut outcome =
            FolderOutcome::new(folder(), FolderState::ReportFailed).with_detail("authentication failed: 401");
        outcome.files_copied = 3;
        let text = outcome.marker_summary();
        assert!(text.contains("Files copied: 3"));
        assert!(text.contains("Report: not generated (authentication failed: 401)"));
    }

    #[test]
    fn display_lists_totals() {
        let summary = RunSummary::new(folder().date, 0);
        let text = summary.to_string();
        assert!(text.contains("Folders found:     0"));
        assert!(!text.contains("cancelled"));
    }
}
