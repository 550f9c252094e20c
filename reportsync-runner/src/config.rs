//! Serializable pipeline configuration.
//!
//! Precedence, lowest to highest: built-in defaults, TOML file, environment
//! (deployment variable names), CLI flags.

use chrono::NaiveDate;
use reportsync_core::service::{ServiceSettings, WaitPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("report service credentials missing: set {0}")]
    MissingCredentials(&'static str),

    #[error("invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything one pipeline pass needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Bucket holding the run folders.
    pub source_bucket: String,

    /// Bucket holding the staging prefix and the service's latest report.
    pub staging_bucket: String,

    /// Date whose folders are processed; `None` means today (local time).
    pub target_date: Option<NaiveDate>,

    /// Informational for the filesystem backend.
    pub region: String,

    /// Folders live at `<run_root>/<date>/<folder>/`.
    pub run_root: String,

    /// Root directory of the filesystem store, one subdirectory per bucket.
    pub store_root: PathBuf,

    pub staging_prefix: String,

    /// Where the service publishes its newest report. Derived from the
    /// project id when unset.
    pub latest_prefix: Option<String>,

    /// Also download the exported archive to `<folder>/allure-report.zip`.
    pub export_archive: bool,

    /// Make distributed report pages self-contained.
    pub inline_html: bool,

    /// Leave folders whose report failed unmarked so the next pass retries them.
    pub retry_failed_reports: bool,

    pub service: ServiceConfig,

    pub wait: WaitConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_bucket: "consul-test".into(),
            staging_bucket: "qstp-consul-allure".into(),
            target_date: None,
            region: "us-east-1".into(),
            run_root: "Result/consul".into(),
            store_root: PathBuf::from("./store"),
            staging_prefix: "allure-results/".into(),
            latest_prefix: None,
            export_archive: false,
            inline_html: true,
            retry_failed_reports: false,
            service: ServiceConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

/// `[service]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub project_id: String,
    pub username: String,
    pub password: String,
    pub accept_invalid_certs: bool,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            project_id: "default".into(),
            username: String::new(),
            password: String::new(),
            accept_invalid_certs: true,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    /// Poll the store for a fresh entry page.
    Poll,
    /// Sleep `dwell_secs` after the trigger.
    Fixed,
}

/// `[wait]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WaitConfig {
    pub mode: WaitMode,
    pub dwell_secs: u64,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            mode: WaitMode::Poll,
            dwell_secs: 60,
            poll_interval_secs: 5,
            poll_timeout_secs: 300,
        }
    }
}

impl WaitConfig {
    pub fn policy(&self) -> WaitPolicy {
        match self.mode {
            WaitMode::Fixed => WaitPolicy::Fixed {
                dwell: Duration::from_secs(self.dwell_secs),
            },
            WaitMode::Poll => WaitPolicy::Poll {
                interval: Duration::from_secs(self.poll_interval_secs),
                timeout: Duration::from_secs(self.poll_timeout_secs),
                fallback_dwell: Duration::from_secs(self.dwell_secs),
            },
        }
    }
}

impl SyncConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup`; empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SOURCE_BUCKET") {
            self.source_bucket = v;
        }
        if let Some(v) = get("DEST_BUCKET") {
            self.staging_bucket = v;
        }
        if let Some(v) = get("TARGET_DATE") {
            self.target_date = Some(parse_date(&v)?);
        }
        if let Some(v) = get("AWS_REGION") {
            self.region = v;
        }
        if let Some(v) = get("RUN_ROOT") {
            self.run_root = v;
        }
        if let Some(v) = get("STORE_ROOT") {
            self.store_root = PathBuf::from(v);
        }
        if let Some(v) = get("REPORT_BASE_URL") {
            self.service.base_url = v;
        }
        if let Some(v) = get("PROJECT_ID") {
            self.service.project_id = v;
        }
        if let Some(v) = get("REPORT_USERNAME") {
            self.service.username = v;
        }
        if let Some(v) = get("REPORT_PASSWORD") {
            self.service.password = v;
        }
        Ok(())
    }

    /// Check everything a `run` needs before touching the store.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.username.trim().is_empty() {
            return Err(ConfigError::MissingCredentials("REPORT_USERNAME"));
        }
        if self.service.password.is_empty() {
            return Err(ConfigError::MissingCredentials("REPORT_PASSWORD"));
        }
        if self.service.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "service.base_url is empty (set REPORT_BASE_URL)".into(),
            ));
        }
        self.validate_layout()
    }

    /// Checks that do not involve the report service.
    pub fn validate_layout(&self) -> Result<(), ConfigError> {
        if self.source_bucket.is_empty() || self.staging_bucket.is_empty() {
            return Err(ConfigError::Invalid("bucket names must not be empty".into()));
        }
        if self.latest_prefix().trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("latest_prefix must not be empty".into()));
        }
        if self.wait.mode == WaitMode::Poll && self.wait.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("wait.poll_interval_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Date to process, defaulting to `today`.
    pub fn date_or(&self, today: NaiveDate) -> NaiveDate {
        self.target_date.unwrap_or(today)
    }

    pub fn latest_prefix(&self) -> String {
        match &self.latest_prefix {
            Some(prefix) => prefix.clone(),
            None => format!("reports/{}/latest/", self.service.project_id),
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            base_url: self.service.base_url.clone(),
            username: self.service.username.clone(),
            password: self.service.password.clone(),
            accept_invalid_certs: self.service.accept_invalid_certs,
            timeout_secs: self.service.timeout_secs,
        }
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| ConfigError::InvalidDate {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_deployment() {
        let config = SyncConfig::default();
        assert_eq!(config.source_bucket, "consul-test");
        assert_eq!(config.staging_bucket, "qstp-consul-allure");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.latest_prefix(), "reports/default/latest/");
        assert!(config.inline_html);
        assert!(!config.retry_failed_reports);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml(
            r#"
            source_bucket = "runs"
            target_date = "2024-05-01"

            [service]
            base_url = "https://reports.local"
            project_id = "consul"

            [wait]
            mode = "fixed"
            dwell_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.source_bucket, "runs");
        assert_eq!(config.staging_bucket, "qstp-consul-allure");
        assert_eq!(config.target_date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(config.latest_prefix(), "reports/consul/latest/");
        assert_eq!(config.service.timeout_secs, 300);
        assert_eq!(
            config.wait.policy(),
            WaitPolicy::Fixed {
                dwell: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn bad_toml_is_parse_error() {
        assert!(matches!(
            SyncConfig::from_toml("source_bucket = ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = SyncConfig::from_toml("source_bucket = \"from-file\"").unwrap();
        let vars = env(&[
            ("SOURCE_BUCKET", "from-env"),
            ("TARGET_DATE", "2024-05-01"),
            ("REPORT_USERNAME", "svc"),
            ("REPORT_PASSWORD", "pw"),
            ("PROJECT_ID", ""),
        ]);
        config.apply_env_from(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.source_bucket, "from-env");
        assert_eq!(config.service.username, "svc");
        assert_eq!(config.service.project_id, "default");
        assert_eq!(
            config.date_or(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn bad_env_date_is_rejected() {
        let mut config = SyncConfig::default();
        let vars = env(&[("TARGET_DATE", "05/01/2024")]);
        let err = config.apply_env_from(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDate { .. }));
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let mut config = SyncConfig::default();
        config.service.base_url = "https://reports.local".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials("REPORT_USERNAME"))
        ));
        config.service.username = "svc".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials("REPORT_PASSWORD"))
        ));
        config.service.password = "pw".into();
        assert!(config.validate().is_ok());
    }
}
