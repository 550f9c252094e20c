//! Waiting for a triggered report to land.
//!
//! The service has no status endpoint, so readiness is read from the store.
//! The entry page under the latest prefix is snapshotted before the trigger;
//! the report is ready once the page appears or is strictly newer than the
//! snapshot. Polling is bounded by a timeout and can be cancelled. When the
//! backend reports no modification time the wait degrades to a fixed dwell.

use super::ReportError;
use crate::domain::ENTRY_PAGE;
use crate::store::{ensure_trailing_slash, ObjectMeta, ObjectStore};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single sleep, so cancellation is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Sleep a fixed interval after the trigger. A page still no newer than
    /// the snapshot afterwards is rejected.
    Fixed { dwell: Duration },
    /// Poll for a fresh entry page.
    Poll {
        interval: Duration,
        timeout: Duration,
        /// Used when the store cannot tell how old the entry page is.
        fallback_dwell: Duration,
    },
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The entry page as it stood before generation was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    Absent,
    Modified(DateTime<Utc>),
    /// Present, but the store keeps no modification time.
    Undated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A fresh entry page was observed.
    Ready { waited: Duration },
    /// The fixed dwell elapsed; readiness was not verified.
    Dwelled { waited: Duration },
}

pub struct ArtifactWait<'a> {
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    entry_key: String,
    policy: WaitPolicy,
    cancel: CancelToken,
}

impl<'a> ArtifactWait<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        bucket: &'a str,
        latest_prefix: &str,
        policy: WaitPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            bucket,
            entry_key: format!("{}{ENTRY_PAGE}", ensure_trailing_slash(latest_prefix)),
            policy,
            cancel,
        }
    }

    /// Record the entry page's state. Call before triggering generation.
    pub fn snapshot(&self) -> Baseline {
        match self.store.head(self.bucket, &self.entry_key) {
            Ok(meta) => meta.last_modified.map_or(Baseline::Undated, Baseline::Modified),
            Err(e) if e.is_not_found() => Baseline::Absent,
            Err(e) => {
                // Only a page written from here on counts as fresh.
                tracing::warn!(key = %self.entry_key, error = %e, "entry page snapshot failed");
                Baseline::Modified(Utc::now())
            }
        }
    }

    /// Block until a report newer than `baseline` is ready.
    pub fn wait(&self, baseline: Baseline) -> Result<WaitOutcome, ReportError> {
        let start = Instant::now();
        match &self.policy {
            WaitPolicy::Fixed { dwell } => {
                self.sleep(*dwell)?;
                if let Baseline::Modified(before) = baseline {
                    if let Ok(ObjectMeta {
                        last_modified: Some(modified),
                        ..
                    }) = self.store.head(self.bucket, &self.entry_key)
                    {
                        if modified <= before {
                            return Err(ReportError::Generation(format!(
                                "{} unchanged after {}s dwell",
                                self.entry_key,
                                dwell.as_secs()
                            )));
                        }
                    }
                }
                Ok(WaitOutcome::Dwelled {
                    waited: start.elapsed(),
                })
            }
            WaitPolicy::Poll {
                interval,
                timeout,
                fallback_dwell,
            } => loop {
                if self.cancel.is_cancelled() {
                    return Err(ReportError::Cancelled);
                }
                match self.store.head(self.bucket, &self.entry_key) {
                    Ok(meta) => match (baseline, meta.last_modified) {
                        (Baseline::Absent, _) => {
                            return Ok(WaitOutcome::Ready {
                                waited: start.elapsed(),
                            });
                        }
                        (Baseline::Modified(before), Some(modified)) if modified > before => {
                            return Ok(WaitOutcome::Ready {
                                waited: start.elapsed(),
                            });
                        }
                        (Baseline::Modified(_), Some(_)) => {
                            tracing::debug!(key = %self.entry_key, "entry page is stale")
                        }
                        (Baseline::Modified(_), None) | (Baseline::Undated, _) => {
                            tracing::debug!("store reports no timestamps, using fixed dwell");
                            self.sleep(fallback_dwell.saturating_sub(start.elapsed()))?;
                            return Ok(WaitOutcome::Dwelled {
                                waited: start.elapsed(),
                            });
                        }
                    },
                    Err(e) if e.is_not_found() => {}
                    Err(e) => tracing::warn!(error = %e, "poll failed, will retry"),
                }
                let elapsed = start.elapsed();
                if elapsed >= *timeout {
                    return Err(ReportError::Timeout {
                        waited_secs: elapsed.as_secs(),
                    });
                }
                self.sleep((*interval).min(*timeout - elapsed))?;
            },
        }
    }

    fn sleep(&self, total: Duration) -> Result<(), ReportError> {
        let deadline = Instant::now() + total;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ReportError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
