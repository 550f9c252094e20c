//! Run-folder domain types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known sub-directory holding a run's raw results.
pub const RESULTS_DIR: &str = "allure-results";

/// Sub-directory a distributed report lands in.
pub const REPORT_DIR: &str = "allure-report";

/// Marker object name, relative to the folder prefix.
pub const MARKER_NAME: &str = "executed.lck";

/// Conventional entry page of a generated report.
pub const ENTRY_PAGE: &str = "index.html";

/// One test execution's folder for a given date.
///
/// Identity is `(date, name)`; `prefix` is derived and always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunFolder {
    pub date: NaiveDate,
    pub name: String,
    pub prefix: String,
}

impl RunFolder {
    /// Build a folder under `<run_root>/<date>/<name>/`.
    pub fn new(run_root: &str, date: NaiveDate, name: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = format!("{}{name}/", date_prefix(run_root, date));
        Self { date, name, prefix }
    }

    /// Key of this folder's completion marker.
    pub fn marker_key(&self) -> String {
        format!("{}{MARKER_NAME}", self.prefix)
    }

    /// Canonical results prefix `<folder>/allure-results/`.
    pub fn results_prefix(&self) -> String {
        format!("{}{RESULTS_DIR}/", self.prefix)
    }

    /// Destination prefix for the distributed report.
    pub fn report_prefix(&self) -> String {
        format!("{}{REPORT_DIR}/", self.prefix)
    }
}

impl fmt::Display for RunFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.date, self.name)
    }
}

/// Prefix listing every run folder for a date: `<run_root>/<date>/`.
pub fn date_prefix(run_root: &str, date: NaiveDate) -> String {
    let root = run_root.trim_matches('/');
    if root.is_empty() {
        format!("{}/", date.format("%Y-%m-%d"))
    } else {
        format!("{root}/{}/", date.format("%Y-%m-%d"))
    }
}

/// A located result object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFile {
    pub key: String,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn folder_keys() {
        let folder = RunFolder::new("Result/consul/", date(), "run-07");
        assert_eq!(folder.prefix, "Result/consul/2024-05-01/run-07/");
        assert_eq!(folder.marker_key(), "Result/consul/2024-05-01/run-07/executed.lck");
        assert_eq!(
            folder.results_prefix(),
            "Result/consul/2024-05-01/run-07/allure-results/"
        );
        assert_eq!(
            folder.report_prefix(),
            "Result/consul/2024-05-01/run-07/allure-report/"
        );
        assert_eq!(folder.to_string(), "2024-05-01/run-07");
    }

    #[test]
    fn empty_root_yields_date_at_bucket_top() {
        assert_eq!(date_prefix("", date()), "2024-05-01/");
        assert_eq!(date_prefix("/runs/", date()), "runs/2024-05-01/");
    }
}
