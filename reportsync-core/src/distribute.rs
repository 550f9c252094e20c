//! Copy the generated report back into the run folder and purge staging.

use crate::collect::staged_prefix;
use crate::domain::RunFolder;
use crate::store::{ensure_trailing_slash, ObjectStore, StoreError};

/// Result of a cleanup pass. Failures are kept for the summary, never raised.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failures: Vec<(String, StoreError)>,
}

pub struct ReportDistributor<'a> {
    store: &'a dyn ObjectStore,
    source_bucket: &'a str,
    staging_bucket: &'a str,
    latest_prefix: String,
    staging_prefix: String,
}

impl<'a> ReportDistributor<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        source_bucket: &'a str,
        staging_bucket: &'a str,
        latest_prefix: &str,
        staging_prefix: &str,
    ) -> Self {
        Self {
            store,
            source_bucket,
            staging_bucket,
            latest_prefix: ensure_trailing_slash(latest_prefix),
            staging_prefix: ensure_trailing_slash(staging_prefix),
        }
    }

    /// Copy every artifact under the latest prefix to `<folder>/allure-report/`.
    ///
    /// Zero means no report was available; that is for the caller to record,
    /// not an error. A listing failure or a failed copy is an error.
    pub fn distribute(&self, folder: &RunFolder) -> Result<usize, StoreError> {
        let listing = self
            .store
            .list(self.staging_bucket, &self.latest_prefix, None)?;
        let dest_prefix = folder.report_prefix();
        let mut copied = 0;
        for obj in listing.files() {
            let relative = &obj.key[self.latest_prefix.len()..];
            if relative.is_empty() {
                continue;
            }
            let dest = format!("{dest_prefix}{relative}");
            self.store
                .copy_object(self.staging_bucket, &obj.key, self.source_bucket, &dest)?;
            copied += 1;
        }
        tracing::info!(folder = %folder, copied, "report distributed");
        Ok(copied)
    }

    /// Delete every staged object belonging to the folder.
    pub fn cleanup(&self, folder: &RunFolder) -> CleanupReport {
        let prefix = staged_prefix(&self.staging_prefix, &folder.name);
        let mut report = CleanupReport::default();
        let listing = match self.store.list(self.staging_bucket, &prefix, None) {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(folder = %folder, error = %e, "could not list staged files");
                report.failures.push((prefix, e));
                return report;
            }
        };
        for obj in &listing.objects {
            match self.store.delete_object(self.staging_bucket, &obj.key) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(key = %obj.key, error = %e, "staged file left behind");
                    report.failures.push((obj.key.clone(), e));
                }
            }
        }
        report
    }
}
