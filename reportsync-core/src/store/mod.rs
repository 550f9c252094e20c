//! Object-store boundary and structured error types.
//!
//! The ObjectStore trait abstracts over storage backends (a local bucket
//! mirror on disk, an in-memory store for tests) so the pipeline never knows
//! which one it is talking to. Every key is a `/`-separated string relative
//! to its bucket; keys ending in `/` are directory markers.

pub mod fs;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

pub use fs::FsStore;
pub use memory::{MemoryStore, StoreOp};

/// Structured error types for object-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("store I/O error on {bucket}/{key}: {source}")]
    Io {
        bucket: String,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid object key: '{key}'")]
    InvalidKey { key: String },

    #[error("injected {op:?} failure on {key}")]
    Injected { op: StoreOp, key: String },
}

impl StoreError {
    /// True only for a genuine "object absent" answer.
    ///
    /// Permission, transport and I/O failures all return false so callers
    /// never mistake an inaccessible object for a missing one.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// One object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    /// Not every backend reports modification times.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectEntry {
    pub fn is_dir_marker(&self) -> bool {
        is_dir_marker(&self.key)
    }
}

/// Result of a list call: objects plus the common prefixes rolled up by the delimiter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub objects: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
}

impl Listing {
    /// Objects that are not directory markers.
    pub fn files(&self) -> impl Iterator<Item = &ObjectEntry> {
        self.objects.iter().filter(|o| !o.is_dir_marker())
    }
}

/// Metadata returned by `head`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Trait for object-store backends.
///
/// Implementations must report a missing object as `StoreError::NotFound`
/// and nothing else; the marker gate depends on that distinction.
pub trait ObjectStore: Send + Sync {
    /// List every object under `prefix`, sorted by key.
    ///
    /// With a delimiter, keys containing the delimiter after the prefix are
    /// rolled up into `common_prefixes` (each ending with the delimiter) and
    /// omitted from `objects`.
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Listing, StoreError>;

    fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError>;

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Store a body read incrementally from `body`. Returns the number of bytes written.
    fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: &mut dyn Read,
        content_type: Option<&str>,
    ) -> Result<u64, StoreError>;

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError>;

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

/// Keys ending in `/` are directory placeholders, never content.
pub fn is_dir_marker(key: &str) -> bool {
    key.ends_with('/')
}

/// Last path segment of a key (`a/b/c.json` → `c.json`).
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Directory part of a key including the trailing `/`, or `""` for top-level keys.
pub fn parent_prefix(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[..=idx],
        None => "",
    }
}

/// Ensure a non-empty prefix ends with `/`.
pub fn ensure_trailing_slash(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

/// Guess a content type from the key's extension.
///
/// Only the types a generated report actually ships are covered.
pub fn content_type_for(key: &str) -> Option<&'static str> {
    let ext = file_name(key).rsplit_once('.').map(|(_, ext)| ext)?;
    let ct = match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "js" => "application/javascript",
        "css" => "text/css",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "txt" | "lck" => "text/plain; charset=utf-8",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(ct)
}

/// Roll a sorted key set up into a `Listing`, honouring an optional delimiter.
///
/// Shared by the backends so delimiter semantics stay identical.
pub(crate) fn build_listing<I>(prefix: &str, delimiter: Option<char>, entries: I) -> Listing
where
    I: IntoIterator<Item = ObjectEntry>,
{
    let mut listing = Listing::default();
    for entry in entries {
        if !entry.key.starts_with(prefix) {
            continue;
        }
        if let Some(delim) = delimiter {
            let rest = &entry.key[prefix.len()..];
            if let Some(idx) = rest.find(delim) {
                let common = format!("{prefix}{}", &rest[..idx + delim.len_utf8()]);
                if listing.common_prefixes.last() != Some(&common) {
                    listing.common_prefixes.push(common);
                }
                continue;
            }
        }
        listing.objects.push(entry);
    }
    listing.common_prefixes.dedup();
    listing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> ObjectEntry {
        ObjectEntry {
            key: key.to_string(),
            size: 1,
            last_modified: None,
        }
    }

    #[test]
    fn key_helpers() {
        assert_eq!(file_name("a/b/c.json"), "c.json");
        assert_eq!(file_name("c.json"), "c.json");
        assert_eq!(parent_prefix("a/b/c.json"), "a/b/");
        assert_eq!(parent_prefix("c.json"), "");
        assert!(is_dir_marker("a/b/"));
        assert!(!is_dir_marker("a/b"));
        assert_eq!(ensure_trailing_slash("a/b"), "a/b/");
        assert_eq!(ensure_trailing_slash("a/b/"), "a/b/");
        assert_eq!(ensure_trailing_slash(""), "");
    }

    #[test]
    fn listing_rolls_up_common_prefixes() {
        let entries = vec![
            entry("root/2024-05-01/run-01/a.json"),
            entry("root/2024-05-01/run-01/b.json"),
            entry("root/2024-05-01/run-02/a.json"),
            entry("root/2024-05-01/top.txt"),
            entry("other/x"),
        ];
        let listing = build_listing("root/2024-05-01/", Some('/'), entries);
        assert_eq!(
            listing.common_prefixes,
            vec!["root/2024-05-01/run-01/", "root/2024-05-01/run-02/"]
        );
        assert_eq!(listing.objects.len(), 1);
        assert_eq!(listing.objects[0].key, "root/2024-05-01/top.txt");
    }

    #[test]
    fn listing_without_delimiter_is_recursive() {
        let entries = vec![entry("p/a"), entry("p/b/c"), entry("p/d/")];
        let listing = build_listing("p/", None, entries);
        assert_eq!(listing.objects.len(), 3);
        assert_eq!(listing.files().count(), 2);
        assert!(listing.common_prefixes.is_empty());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("r/index.html"), Some("text/html; charset=utf-8"));
        assert_eq!(content_type_for("r/data/a.JSON"), Some("application/json"));
        assert_eq!(content_type_for("r/blob"), None);
    }
}
