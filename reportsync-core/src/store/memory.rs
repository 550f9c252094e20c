//! In-memory object store with fault injection.
//!
//! Used by the pipeline tests: it counts every mutation so idempotence can be
//! asserted directly, and it can be told to fail a specific operation on keys
//! containing a fragment.

use super::{build_listing, Listing, ObjectEntry, ObjectMeta, ObjectStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    List,
    Head,
    Get,
    Put,
    Copy,
    Delete,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    key_fragment: String,
}

/// Thread-safe in-memory buckets.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    faults: Mutex<Vec<Fault>>,
    mutations: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `op` on a key containing `key_fragment` fail.
    ///
    /// For copies the fragment is matched against the source key.
    pub fn fail_on(&self, op: StoreOp, key_fragment: impl Into<String>) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).push(Fault {
            op,
            key_fragment: key_fragment.into(),
        });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of successful put/copy/delete calls so far.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// All keys in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key))
    }

    /// Content type recorded at put time.
    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)?
            .get(key)?
            .content_type
            .clone()
    }

    /// Seed an object without counting it as a pipeline mutation.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.store(bucket, key, body.into(), None);
    }

    fn check_fault(&self, op: StoreOp, key: &str) -> Result<(), StoreError> {
        let faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        if faults
            .iter()
            .any(|f| f.op == op && key.contains(&f.key_fragment))
        {
            return Err(StoreError::Injected {
                op,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn store(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: Option<&str>) {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body,
                    content_type: content_type.map(str::to_string),
                    last_modified: Utc::now(),
                },
            );
    }

    fn load(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl ObjectStore for MemoryStore {
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Listing, StoreError> {
        self.check_fault(StoreOp::List, prefix)?;
        let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<ObjectEntry> = buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .range(prefix.to_string()..)
                    .take_while(|(key, _)| key.starts_with(prefix))
                    .map(|(key, obj)| ObjectEntry {
                        key: key.clone(),
                        size: obj.body.len() as u64,
                        last_modified: Some(obj.last_modified),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(build_listing(prefix, delimiter, entries))
    }

    fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError> {
        self.check_fault(StoreOp::Head, key)?;
        let obj = self.load(bucket, key)?;
        Ok(ObjectMeta {
            size: obj.body.len() as u64,
            last_modified: Some(obj.last_modified),
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.check_fault(StoreOp::Get, key)?;
        Ok(self.load(bucket, key)?.body)
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.check_fault(StoreOp::Put, key)?;
        self.store(bucket, key, body.to_vec(), content_type);
        self.record_mutation();
        Ok(())
    }

    fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: &mut dyn Read,
        content_type: Option<&str>,
    ) -> Result<u64, StoreError> {
        self.check_fault(StoreOp::Put, key)?;
        let mut buf = Vec::new();
        body.read_to_end(&mut buf).map_err(|source| StoreError::Io {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        })?;
        let n = buf.len() as u64;
        self.store(bucket, key, buf, content_type);
        self.record_mutation();
        Ok(n)
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        self.check_fault(StoreOp::Copy, src_key)?;
        let obj = self.load(src_bucket, src_key)?;
        self.store(dst_bucket, dst_key, obj.body, obj.content_type.as_deref());
        self.record_mutation();
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.check_fault(StoreOp::Delete, key)?;
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(objects) = buckets.get_mut(bucket) {
            objects.remove(key);
        }
        self.record_mutation();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_does_not_count_as_mutation() {
        let store = MemoryStore::new();
        store.insert("b", "k", "v");
        assert_eq!(store.mutation_count(), 0);
        store.put_object("b", "k2", b"v", None).unwrap();
        assert_eq!(store.mutation_count(), 1);
    }

    #[test]
    fn injected_fault_hits_only_matching_keys() {
        let store = MemoryStore::new();
        store.insert("b", "dir/one.json", "1");
        store.insert("b", "dir/two.json", "2");
        store.fail_on(StoreOp::Copy, "two");
        assert!(store.copy_object("b", "dir/one.json", "c", "one").is_ok());
        let err = store.copy_object("b", "dir/two.json", "c", "two").unwrap_err();
        assert!(matches!(err, StoreError::Injected { op: StoreOp::Copy, .. }));
        assert!(!err.is_not_found());
    }

    #[test]
    fn listing_is_prefix_bounded() {
        let store = MemoryStore::new();
        store.insert("b", "a/1", "x");
        store.insert("b", "a/2/3", "x");
        store.insert("b", "ab/4", "x");
        let listing = store.list("b", "a/", None).unwrap();
        assert_eq!(listing.objects.len(), 2);
        let listing = store.list("b", "a/", Some('/')).unwrap();
        assert_eq!(listing.common_prefixes, vec!["a/2/"]);
        assert_eq!(listing.objects.len(), 1);
    }

    #[test]
    fn content_type_is_preserved_on_copy() {
        let store = MemoryStore::new();
        store
            .put_object("b", "r/index.html", b"<html>", Some("text/html"))
            .unwrap();
        store.copy_object("b", "r/index.html", "c", "x/index.html").unwrap();
        assert_eq!(store.content_type("c", "x/index.html").as_deref(), Some("text/html"));
    }
}
