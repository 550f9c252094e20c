//! Copy located results into the shared staging area.
//!
//! Staged names are `<folder-name>_<original-filename>`, so folders staged
//! side by side never overwrite each other. Collection is best effort: a
//! failed copy is logged and recorded, and the rest of the batch continues.
//! There is no rollback.
//!
//! Under the nested fallback two result directories of one folder may hold
//! the same file name. Both map to one staged key; the first copy wins and
//! the rest are recorded as collisions.

use crate::domain::RunFolder;
use crate::locate::LocatedResults;
use crate::store::{ensure_trailing_slash, file_name, is_dir_marker, ObjectStore, StoreError};
use std::collections::HashSet;

/// Staged object name for a file of a folder.
pub fn staged_name(folder_name: &str, original_file: &str) -> String {
    format!("{folder_name}_{original_file}")
}

/// Key prefix under which every staged object of a folder lives.
pub fn staged_prefix(staging_prefix: &str, folder_name: &str) -> String {
    format!("{}{folder_name}_", ensure_trailing_slash(staging_prefix))
}

/// Outcome of one collection pass.
#[derive(Debug, Default)]
pub struct CollectReport {
    pub copied: usize,
    pub staged_keys: Vec<String>,
    pub failures: Vec<(String, StoreError)>,
    /// Source keys not staged because an earlier file took their staged key.
    pub collisions: Vec<String>,
}

impl CollectReport {
    /// Files that did not reach staging.
    pub fn not_staged(&self) -> usize {
        self.failures.len() + self.collisions.len()
    }
}

pub struct ResultCollector<'a> {
    store: &'a dyn ObjectStore,
    source_bucket: &'a str,
    staging_bucket: &'a str,
    staging_prefix: String,
}

impl<'a> ResultCollector<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        source_bucket: &'a str,
        staging_bucket: &'a str,
        staging_prefix: &str,
    ) -> Self {
        Self {
            store,
            source_bucket,
            staging_bucket,
            staging_prefix: ensure_trailing_slash(staging_prefix),
        }
    }

    /// Destination key for one source key.
    pub fn staged_key(&self, folder: &RunFolder, source_key: &str) -> String {
        format!(
            "{}{}",
            self.staging_prefix,
            staged_name(&folder.name, file_name(source_key))
        )
    }

    /// Copy every located file; returns what was copied and what failed.
    pub fn collect(&self, folder: &RunFolder, located: &LocatedResults) -> CollectReport {
        let mut report = CollectReport::default();
        let mut claimed = HashSet::new();
        for file in &located.files {
            if is_dir_marker(&file.key) {
                continue;
            }
            let dest = self.staged_key(folder, &file.key);
            if !claimed.insert(dest.clone()) {
                tracing::warn!(folder = %folder, key = %file.key, staged = %dest, "staged name already taken, skipping");
                report.collisions.push(file.key.clone());
                continue;
            }
            match self
                .store
                .copy_object(self.source_bucket, &file.key, self.staging_bucket, &dest)
            {
                Ok(()) => {
                    tracing::debug!(folder = %folder, from = %file.key, to = %dest, "staged");
                    report.copied += 1;
                    report.staged_keys.push(dest);
                }
                Err(e) => {
                    tracing::warn!(folder = %folder, key = %file.key, error = %e, "copy failed, continuing");
                    report.failures.push((file.key.clone(), e));
                }
            }
        }
        report
    }
}
