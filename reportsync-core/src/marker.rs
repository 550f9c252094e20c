//! Completion markers.
//!
//! A folder is done when `<folder>/executed.lck` exists. Nothing else is
//! consulted, and nothing here ever deletes a marker.

use crate::domain::RunFolder;
use crate::store::{ObjectStore, StoreError};
use chrono::{DateTime, Local};

/// Reads and writes per-folder markers in one bucket.
pub struct MarkerStore<'a> {
    store: &'a dyn ObjectStore,
    bucket: &'a str,
}

impl<'a> MarkerStore<'a> {
    pub fn new(store: &'a dyn ObjectStore, bucket: &'a str) -> Self {
        Self { store, bucket }
    }

    /// Whether the folder already carries a marker.
    ///
    /// A not-found answer means "eligible"; any other failure is returned as
    /// an error rather than folded into `false`.
    pub fn exists(&self, folder: &RunFolder) -> Result<bool, StoreError> {
        match self.store.head(self.bucket, &folder.marker_key()) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write the marker with a timestamp and a free-text summary.
    pub fn write(&self, folder: &RunFolder, summary: &str) -> Result<(), StoreError> {
        let body = marker_body(Local::now(), summary);
        self.store.put_object(
            self.bucket,
            &folder.marker_key(),
            body.as_bytes(),
            Some("text/plain; charset=utf-8"),
        )
    }
}

/// Marker text: the processing instant followed by the summary lines.
pub fn marker_body(at: DateTime<Local>, summary: &str) -> String {
    let mut body = format!("Processed at {}\n", at.to_rfc3339());
    body.push_str(summary.trim_end());
    body.push('\n');
    body
}
