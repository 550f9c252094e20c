//! ReportSync Runner: configuration, the folder pipeline and run summaries.
//!
//! This crate builds on `reportsync-core` to provide:
//! - TOML + environment configuration with validation
//! - Folder discovery and read-only marker status
//! - The sequential per-folder pipeline with an explicit summary aggregate
//! - Progress reporting for the CLI

pub mod config;
pub mod pipeline;
pub mod progress;
pub mod summary;

pub use config::{ConfigError, ServiceConfig, SyncConfig, WaitConfig, WaitMode};
pub use pipeline::{discover_folders, folder_status, FolderStatus, Pipeline, PipelineError};
pub use progress::{PipelineProgress, SilentProgress, Step, StdoutProgress};
pub use summary::{FolderOutcome, FolderState, RunSummary};
