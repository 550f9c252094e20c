//! ReportSync Core: storage boundary, folder stages and the report service client.
//!
//! This crate holds every building block the pipeline composes:
//! - Object-store trait with a filesystem and an in-memory backend
//! - Completion markers gating reprocessing
//! - Result discovery and staging
//! - Report service client with explicit session states
//! - Report distribution and staging cleanup
//! - In-place self-containment of report pages

pub mod collect;
pub mod distribute;
pub mod domain;
pub mod inline;
pub mod locate;
pub mod marker;
pub mod service;
pub mod store;

pub use collect::{CollectReport, ResultCollector};
pub use distribute::{CleanupReport, ReportDistributor};
pub use domain::{RunFolder, ResultFile};
pub use inline::{FolderTransformReport, HtmlInliner, TransformError, TransformOutcome};
pub use locate::{LocatedResults, ResultLocator};
pub use marker::MarkerStore;
pub use service::{ReportError, ReportService, ServiceConnector, SessionState};
pub use store::{ObjectStore, StoreError};
