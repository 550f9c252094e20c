//! Pipeline orchestrator: one pass over a date's run folders.
//!
//! Folders are processed strictly in sequence because the report service
//! publishes every generation to one shared latest prefix. Per folder:
//!
//! 1. Marker gate (present or unreadable → skip)
//! 2. Locate results (none → mark with zero files)
//! 3. Stage results under `<staging>/<folder>_<file>`
//! 4. Fresh client: login, trigger generation, wait for the artifact
//! 5. Optionally download the exported archive
//! 6. Distribute the report into `<folder>/allure-report/`, then inline pages
//! 7. Purge the folder's staged files (every path after step 3)
//! 8. Write the marker
//!
//! Only a failure to enumerate folders ends the pass early. Everything else
//! is contained at the folder boundary and shows up in the summary.

use crate::config::{ConfigError, SyncConfig};
use crate::progress::{PipelineProgress, Step};
use crate::summary::{FolderOutcome, FolderState, RunSummary};
use chrono::NaiveDate;
use reportsync_core::collect::ResultCollector;
use reportsync_core::distribute::ReportDistributor;
use reportsync_core::domain::{date_prefix, RunFolder, REPORT_DIR};
use reportsync_core::inline::HtmlInliner;
use reportsync_core::locate::ResultLocator;
use reportsync_core::marker::MarkerStore;
use reportsync_core::service::{
    ArtifactWait, CancelToken, ReportError, ReportService, ServiceConnector, WaitOutcome,
};
use reportsync_core::store::{ObjectStore, StoreError};
use std::io::{Seek, SeekFrom};
use thiserror::Error;

/// Errors that end a pass.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not enumerate run folders under {prefix}: {source}")]
    Enumerate {
        prefix: String,
        #[source]
        source: StoreError,
    },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Marker state of one folder, for read-only status listings.
#[derive(Debug)]
pub struct FolderStatus {
    pub folder: RunFolder,
    pub marked: Result<bool, StoreError>,
}

/// List the run folders of `date` (immediate children of the date prefix).
pub fn discover_folders(
    store: &dyn ObjectStore,
    bucket: &str,
    run_root: &str,
    date: NaiveDate,
) -> Result<Vec<RunFolder>, PipelineError> {
    let prefix = date_prefix(run_root, date);
    let listing = store
        .list(bucket, &prefix, Some('/'))
        .map_err(|source| PipelineError::Enumerate {
            prefix: prefix.clone(),
            source,
        })?;
    let folders: Vec<RunFolder> = listing
        .common_prefixes
        .iter()
        .filter_map(|p| p.strip_prefix(prefix.as_str()))
        .map(|name| name.trim_end_matches('/'))
        .filter(|name| !name.is_empty())
        .map(|name| RunFolder::new(run_root, date, name))
        .collect();
    tracing::info!(prefix = %prefix, count = folders.len(), "run folders discovered");
    Ok(folders)
}

/// Marker state for every folder of `date`, without touching anything.
pub fn folder_status(
    store: &dyn ObjectStore,
    bucket: &str,
    run_root: &str,
    date: NaiveDate,
) -> Result<Vec<FolderStatus>, PipelineError> {
    let markers = MarkerStore::new(store, bucket);
    Ok(discover_folders(store, bucket, run_root, date)?
        .into_iter()
        .map(|folder| {
            let marked = markers.exists(&folder);
            FolderStatus { folder, marked }
        })
        .collect())
}

pub struct Pipeline<'a> {
    config: &'a SyncConfig,
    store: &'a dyn ObjectStore,
    connector: &'a dyn ServiceConnector,
    progress: &'a dyn PipelineProgress,
    cancel: CancelToken,
    latest_prefix: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a SyncConfig,
        store: &'a dyn ObjectStore,
        connector: &'a dyn ServiceConnector,
        progress: &'a dyn PipelineProgress,
    ) -> Self {
        Self {
            config,
            store,
            connector,
            progress,
            cancel: CancelToken::new(),
            latest_prefix: config.latest_prefix(),
        }
    }

    /// Share a cancellation flag with the caller (e.g. a signal handler).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn discover(&self, date: NaiveDate) -> Result<Vec<RunFolder>, PipelineError> {
        discover_folders(self.store, &self.config.source_bucket, &self.config.run_root, date)
    }

    /// Process every folder of `date` once.
    pub fn run(&self, date: NaiveDate) -> Result<RunSummary, PipelineError> {
        self.config.validate_layout()?;
        let folders = self.discover(date)?;
        let total = folders.len();
        let mut summary = RunSummary::new(date, total);

        for (i, folder) in folders.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(remaining = total - i, "run cancelled");
                summary.cancelled = true;
                break;
            }
            self.progress.on_folder_start(&folder, i, total);
            let outcome = self.process_folder(folder);
            self.progress.on_folder_complete(&outcome);
            summary.record(outcome);
        }

        tracing::info!(
            found = summary.found,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "pass complete"
        );
        self.progress.on_run_complete(&summary);
        Ok(summary)
    }

    /// Take one folder from discovery to its final state.
    pub fn process_folder(&self, folder: RunFolder) -> FolderOutcome {
        let markers = MarkerStore::new(self.store, &self.config.source_bucket);
        match markers.exists(&folder) {
            Ok(true) => {
                tracing::info!(folder = %folder, "marker present, skipping");
                return FolderOutcome::new(folder, FolderState::Skipped);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(folder = %folder, error = %e, "marker lookup failed, skipping");
                return FolderOutcome::new(folder, FolderState::Skipped)
                    .with_detail(format!("marker lookup failed: {e}"));
            }
        }

        let mut outcome = FolderOutcome::new(folder.clone(), FolderState::Failed);
        if let Err(e) = self.process_unmarked(&folder, &mut outcome) {
            tracing::error!(folder = %folder, error = %e, "folder processing failed");
            outcome.state = FolderState::Failed;
            outcome.detail = Some(e.to_string());
        }
        outcome
    }

    fn process_unmarked(
        &self,
        folder: &RunFolder,
        outcome: &mut FolderOutcome,
    ) -> Result<(), StoreError> {
        let located = ResultLocator::new(self.store, &self.config.source_bucket).locate(folder)?;
        if located.is_empty() {
            self.progress.on_step(folder, Step::Locate, "no result files");
            outcome.state = FolderState::NoResults;
            return self.mark(folder, outcome);
        }
        self.progress.on_step(
            folder,
            Step::Locate,
            &format!("{} files under {}", located.len(), located.prefix),
        );

        let collected = ResultCollector::new(
            self.store,
            &self.config.source_bucket,
            &self.config.staging_bucket,
            &self.config.staging_prefix,
        )
        .collect(folder, &located);
        outcome.files_copied = collected.copied;
        outcome.copy_failures = collected.not_staged();
        self.progress.on_step(
            folder,
            Step::Collect,
            &format!("{} staged, {} failed", collected.copied, collected.not_staged()),
        );

        let distributor = self.distributor();
        let reported = self.produce_report(folder, &distributor, outcome);

        let cleanup = distributor.cleanup(folder);
        outcome.cleanup_failures = cleanup.failures.len();
        self.progress.on_step(
            folder,
            Step::Cleanup,
            &format!("{} staged files removed", cleanup.deleted),
        );
        reported?;

        let leave_unmarked = outcome.state == FolderState::Cancelled
            || (outcome.state == FolderState::ReportFailed && self.config.retry_failed_reports);
        if leave_unmarked {
            tracing::info!(folder = %folder, state = %outcome.state, "leaving folder unmarked for retry");
            return Ok(());
        }
        self.mark(folder, outcome)
    }

    /// Steps 4–6. Service failures set the outcome; store failures propagate.
    fn produce_report(
        &self,
        folder: &RunFolder,
        distributor: &ReportDistributor<'_>,
        outcome: &mut FolderOutcome,
    ) -> Result<(), StoreError> {
        let mut client = match self.trigger_generation(folder) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(folder = %folder, error = %e, "report not triggered");
                self.progress.on_step(folder, Step::Generate, &e.to_string());
                outcome.state = match e {
                    ReportError::Cancelled => FolderState::Cancelled,
                    _ => FolderState::ReportFailed,
                };
                outcome.detail = Some(e.to_string());
                return Ok(());
            }
        };

        if self.config.export_archive {
            match self.export_archive(client.as_mut(), folder) {
                Ok(bytes) => {
                    outcome.archive_bytes = Some(bytes);
                    self.progress
                        .on_step(folder, Step::Export, &format!("{bytes} bytes"));
                }
                Err(e) => {
                    tracing::warn!(folder = %folder, error = %e, "archive export failed");
                    self.progress.on_step(folder, Step::Export, &e);
                }
            }
        }

        let copied = distributor.distribute(folder)?;
        if copied == 0 {
            self.progress
                .on_step(folder, Step::Distribute, "no report artifacts available");
            outcome.state = FolderState::ReportFailed;
            outcome.detail = Some("no report artifacts under the latest prefix".into());
            return Ok(());
        }
        outcome.state = FolderState::ReportDistributed;
        outcome.artifacts_distributed = copied;
        self.progress
            .on_step(folder, Step::Distribute, &format!("{copied} files copied"));

        if self.config.inline_html {
            let inliner = HtmlInliner::new(self.store, &self.config.source_bucket);
            match inliner.process_report_folder(&folder.report_prefix()) {
                Ok(report) => {
                    outcome.documents_inlined = report.inlined_documents();
                    outcome.inline_failures = report.failures.len();
                    self.progress.on_step(
                        folder,
                        Step::Inline,
                        &format!(
                            "{} of {} pages rewritten",
                            outcome.documents_inlined,
                            report.documents.len() + report.failures.len()
                        ),
                    );
                }
                Err(e) => {
                    tracing::warn!(folder = %folder, error = %e, "report pages not inlined");
                    self.progress.on_step(folder, Step::Inline, &e.to_string());
                }
            }
        }
        Ok(())
    }

    /// Fresh client, login, trigger, then wait until the artifact is ready.
    fn trigger_generation(&self, folder: &RunFolder) -> Result<Box<dyn ReportService>, ReportError> {
        let mut client = self.connector.connect()?;
        client.login()?;

        let wait = ArtifactWait::new(
            self.store,
            &self.config.staging_bucket,
            &self.latest_prefix,
            self.config.wait.policy(),
            self.cancel.clone(),
        );
        // The latest prefix is shared, so it may still hold the previous
        // folder's report.
        let baseline = wait.snapshot();
        client.generate_report(&self.config.service.project_id)?;
        self.progress
            .on_step(folder, Step::Generate, "generation triggered");

        let detail = match wait.wait(baseline)? {
            WaitOutcome::Ready { waited } => format!("report ready after {}s", waited.as_secs()),
            WaitOutcome::Dwelled { waited } => format!("dwelled {}s", waited.as_secs()),
        };
        self.progress.on_step(folder, Step::Wait, &detail);
        Ok(client)
    }

    /// Download the export into a temp file, then store it next to the report.
    fn export_archive(
        &self,
        client: &mut dyn ReportService,
        folder: &RunFolder,
    ) -> Result<u64, String> {
        let mut file = tempfile::tempfile().map_err(|e| format!("temp file: {e}"))?;
        client
            .download_report(&self.config.service.project_id, &mut file)
            .map_err(|e| e.to_string())?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| format!("rewind temp file: {e}"))?;
        let key = format!("{}{REPORT_DIR}.zip", folder.prefix);
        self.store
            .put_stream(&self.config.source_bucket, &key, &mut file, Some("application/zip"))
            .map_err(|e| e.to_string())
    }

    fn distributor(&self) -> ReportDistributor<'_> {
        ReportDistributor::new(
            self.store,
            &self.config.source_bucket,
            &self.config.staging_bucket,
            &self.latest_prefix,
            &self.config.staging_prefix,
        )
    }

    fn mark(&self, folder: &RunFolder, outcome: &mut FolderOutcome) -> Result<(), StoreError> {
        let summary = outcome.marker_summary();
        MarkerStore::new(self.store, &self.config.source_bucket).write(folder, &summary)?;
        outcome.marked = true;
        self.progress.on_step(folder, Step::Mark, "marker written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportsync_core::store::{MemoryStore, StoreOp};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn discovery_returns_immediate_children_only() {
        let store = MemoryStore::new();
        store.insert("src", "Result/consul/2024-05-01/run-07/allure-results/a.json", "{}");
        store.insert("src", "Result/consul/2024-05-01/run-08/executed.lck", "x");
        store.insert("src", "Result/consul/2024-05-01/stray.txt", "x");
        store.insert("src", "Result/consul/2024-05-02/run-09/a.json", "{}");
        let folders = discover_folders(&store, "src", "Result/consul", date()).unwrap();
        let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["run-07", "run-08"]);
        assert_eq!(folders[0].prefix, "Result/consul/2024-05-01/run-07/");
    }

    #[test]
    fn enumeration_failure_is_fatal() {
        let store = MemoryStore::new();
        store.fail_on(StoreOp::List, "2024-05-01");
        let err = discover_folders(&store, "src", "Result/consul", date()).unwrap_err();
        assert!(matches!(err, PipelineError::Enumerate { .. }));
    }

    #[test]
    fn status_reports_marker_state() {
        let store = MemoryStore::new();
        store.insert("src", "R/2024-05-01/a/allure-results/x.json", "{}");
        store.insert("src", "R/2024-05-01/b/executed.lck", "done");
        let status = folder_status(&store, "src", "R", date()).unwrap();
        assert_eq!(status.len(), 2);
        assert!(!*status[0].marked.as_ref().unwrap());
        assert!(*status[1].marked.as_ref().unwrap());
    }
}
