//! Result discovery for a run folder.
//!
//! Resolution order:
//! 1. `<folder>/allure-results/` if it holds any file
//! 2. Otherwise every key under the folder containing the `allure-results`
//!    segment, with the prefix cut at that segment
//!
//! The fallback copes with runs uploaded at unpredictable depths. It matches
//! the substring anywhere in the key, so a file named e.g.
//! `logs/allure-results-backup.txt` is accepted too; that over-match is known
//! and kept.

use crate::domain::{ResultFile, RunFolder, RESULTS_DIR};
use crate::store::{ObjectStore, StoreError};

/// Files found for one folder plus the prefix they were found under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatedResults {
    pub prefix: String,
    pub files: Vec<ResultFile>,
}

impl LocatedResults {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

pub struct ResultLocator<'a> {
    store: &'a dyn ObjectStore,
    bucket: &'a str,
}

impl<'a> ResultLocator<'a> {
    pub fn new(store: &'a dyn ObjectStore, bucket: &'a str) -> Self {
        Self { store, bucket }
    }

    /// Locate result files; an empty result means the run produced none.
    pub fn locate(&self, folder: &RunFolder) -> Result<LocatedResults, StoreError> {
        let canonical = folder.results_prefix();
        let listing = self.store.list(self.bucket, &canonical, None)?;
        let files: Vec<ResultFile> = listing
            .files()
            .map(|o| ResultFile {
                key: o.key.clone(),
                size: o.size,
            })
            .collect();
        if !files.is_empty() {
            tracing::debug!(folder = %folder, count = files.len(), "results at canonical path");
            return Ok(LocatedResults {
                prefix: canonical,
                files,
            });
        }

        let listing = self.store.list(self.bucket, &folder.prefix, None)?;
        let mut prefix = None;
        let mut files = Vec::new();
        for obj in listing.files() {
            let Some(found) = results_prefix_of(&obj.key) else {
                continue;
            };
            if prefix.is_none() {
                prefix = Some(found.to_string());
            }
            files.push(ResultFile {
                key: obj.key.clone(),
                size: obj.size,
            });
        }

        match prefix {
            Some(prefix) => {
                tracing::info!(
                    folder = %folder,
                    prefix = %prefix,
                    count = files.len(),
                    "results found under nested path"
                );
                Ok(LocatedResults { prefix, files })
            }
            None => Ok(LocatedResults::default()),
        }
    }
}

/// Key truncated right after the first `allure-results` occurrence.
///
/// `a/b/allure-results/x.json` → `a/b/allure-results/`. When the segment is
/// not followed by `/` the cut still lands after the substring.
pub fn results_prefix_of(key: &str) -> Option<&str> {
    let idx = key.find(RESULTS_DIR)?;
    let end = idx + RESULTS_DIR.len();
    if key[end..].starts_with('/') {
        Some(&key[..=end])
    } else {
        Some(&key[..end])
    }
}
