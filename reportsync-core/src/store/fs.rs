//! Filesystem object-store backend.
//!
//! Layout: `{root}/{bucket}/{key}`
//!
//! Features:
//! - Atomic writes (write to a hidden temp file, rename into place)
//! - Recursive, key-sorted listings with optional delimiter roll-up
//! - Modification times surfaced as `last_modified`
//!
//! Suitable for a mounted bucket or a local mirror of one.

use super::{build_listing, Listing, ObjectEntry, ObjectMeta, ObjectStore, StoreError};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const TMP_SUFFIX: &str = ".reportsync-tmp";

/// Object store backed by one directory per bucket.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory holding the bucket directories.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Map a key onto a path inside the bucket, rejecting traversal.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let trimmed = key.trim_end_matches('/');
        if trimmed.is_empty()
            || key.starts_with('/')
            || trimmed
                .split('/')
                .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        let mut path = self.bucket_dir(bucket);
        for seg in trimmed.split('/') {
            path.push(seg);
        }
        Ok(path)
    }

    fn io_err(bucket: &str, key: &str, source: io::Error) -> StoreError {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }
        } else {
            StoreError::Io {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            }
        }
    }

    /// Write through a temp file and rename so readers never see partial objects.
    fn write_atomic<F>(&self, bucket: &str, key: &str, write: F) -> Result<u64, StoreError>
    where
        F: FnOnce(&mut fs::File) -> io::Result<u64>,
    {
        let path = self.object_path(bucket, key)?;
        if key.ends_with('/') {
            fs::create_dir_all(&path).map_err(|e| Self::io_err(bucket, key, e))?;
            return Ok(0);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_err(bucket, key, e))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!(".{file_name}{TMP_SUFFIX}"));

        let written = (|| -> io::Result<u64> {
            let mut file = fs::File::create(&tmp_path)?;
            let n = write(&mut file)?;
            file.flush()?;
            Ok(n)
        })()
        .map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Self::io_err(bucket, key, e)
        })?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Self::io_err(bucket, key, e)
        })?;
        Ok(written)
    }

    fn walk(&self, bucket: &str, dir: &Path, out: &mut Vec<ObjectEntry>) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(bucket, &path, out)?;
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let meta = entry.metadata()?;
            let rel = path
                .strip_prefix(self.bucket_dir(bucket))
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push(ObjectEntry {
                key,
                size: meta.len(),
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        Ok(())
    }
}

impl ObjectStore for FsStore {
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Listing, StoreError> {
        // Walk only the deepest directory the prefix fully names.
        let start_dir = match prefix.rfind('/') {
            Some(idx) => self.object_path(bucket, &prefix[..=idx])?,
            None => self.bucket_dir(bucket),
        };
        let mut entries = Vec::new();
        self.walk(bucket, &start_dir, &mut entries)
            .map_err(|e| Self::io_err(bucket, prefix, e))?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(build_listing(prefix, delimiter, entries))
    }

    fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError> {
        let path = self.object_path(bucket, key)?;
        let meta = fs::metadata(&path).map_err(|e| Self::io_err(bucket, key, e))?;
        if meta.is_dir() {
            return Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(ObjectMeta {
            size: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).map_err(|e| Self::io_err(bucket, key, e))
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        _content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.write_atomic(bucket, key, |file| {
            file.write_all(body)?;
            Ok(body.len() as u64)
        })?;
        Ok(())
    }

    fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: &mut dyn Read,
        _content_type: Option<&str>,
    ) -> Result<u64, StoreError> {
        self.write_atomic(bucket, key, |file| io::copy(body, file))
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        let src = self.object_path(src_bucket, src_key)?;
        let mut reader = fs::File::open(&src).map_err(|e| Self::io_err(src_bucket, src_key, e))?;
        self.write_atomic(dst_bucket, dst_key, |file| io::copy(&mut reader, file))?;
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            // Deleting an absent object succeeds, as on S3.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(bucket, key, e)),
        }
    }
}
