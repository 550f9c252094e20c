//! Report service trait, session state and structured error types.
//!
//! The ReportService trait is the seam between the pipeline and the external
//! reporting service, so the HTTP client can be swapped for a fake in tests.
//! A client instance is one unit of work: the pipeline asks a
//! `ServiceConnector` for a fresh one per folder and drops it afterwards.

pub mod http;
pub mod wait;

use std::io::Write;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use http::{HttpConnector, HttpReportClient, ServiceSettings};
pub use wait::{ArtifactWait, Baseline, CancelToken, WaitOutcome, WaitPolicy};

/// Structured error types for report service operations.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("report generation failed: {0}")]
    Generation(String),

    #[error("report download failed: {0}")]
    Download(String),

    #[error("client in state {actual:?}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: SessionState,
    },

    #[error("report not ready after {waited_secs}s")]
    Timeout { waited_secs: u64 },

    #[error("wait cancelled")]
    Cancelled,

    #[error("could not build HTTP client: {0}")]
    Client(String),
}

/// Lifecycle of one client instance.
///
/// `Unauthenticated → Authenticated → GenerationTriggered → Downloading → Done`;
/// any failed step moves to `Failed`. A failed client may log in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Generating,
    GenerationTriggered,
    Downloading,
    Done,
    Failed,
}

impl SessionState {
    /// States in which the client holds a session usable for requests.
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            SessionState::Authenticated | SessionState::GenerationTriggered | SessionState::Done
        )
    }

    /// States from which `login` may be attempted.
    pub fn can_login(self) -> bool {
        matches!(self, SessionState::Unauthenticated | SessionState::Failed)
    }
}

/// Credentials obtained from a successful login.
#[derive(Debug, Clone)]
pub struct ReportSession {
    pub access_token: String,
    pub csrf_token: Option<String>,
    pub expires_at: Option<Instant>,
}

impl ReportSession {
    pub fn new(access_token: String, csrf_token: Option<String>, expires_in: Option<u64>) -> Self {
        Self {
            access_token,
            csrf_token,
            // An expiry past what `Instant` can represent never expires.
            expires_at: expires_in
                .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs))),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Operations the pipeline needs from the reporting service.
pub trait ReportService {
    fn state(&self) -> SessionState;

    /// Authenticate. On failure the client stays usable for another attempt
    /// but refuses to generate or download.
    fn login(&mut self) -> Result<(), ReportError>;

    /// Ask the service to (re)generate the project's report. Acceptance only;
    /// the artifact may not exist yet when this returns.
    fn generate_report(&mut self, project_id: &str) -> Result<(), ReportError>;

    /// Stream the exported report into `dest`, returning the byte count.
    fn download_report(&mut self, project_id: &str, dest: &mut dyn Write)
        -> Result<u64, ReportError>;
}

/// Hands out a fresh, unauthenticated client per unit of work.
pub trait ServiceConnector {
    fn connect(&self) -> Result<Box<dyn ReportService>, ReportError>;
}

/// Fail with `InvalidState` unless the client currently holds a session.
pub(crate) fn require_authenticated(state: SessionState) -> Result<(), ReportError> {
    if state.is_authenticated() {
        Ok(())
    } else {
        Err(ReportError::InvalidState {
            expected: "an authenticated session",
            actual: state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_states() {
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(SessionState::GenerationTriggered.is_authenticated());
        assert!(!SessionState::Unauthenticated.is_authenticated());
        assert!(!SessionState::Failed.is_authenticated());
        assert!(require_authenticated(SessionState::Failed).is_err());
    }

    #[test]
    fn retry_allowed_after_failure() {
        assert!(SessionState::Failed.can_login());
        assert!(!SessionState::Authenticated.can_login());
    }

    #[test]
    fn session_expiry() {
        let live = ReportSession::new("t".into(), None, Some(3600));
        assert!(!live.is_expired());
        let stale = ReportSession::new("t".into(), None, Some(0));
        assert!(stale.is_expired());
        let forever = ReportSession::new("t".into(), None, None);
        assert!(!forever.is_expired());
    }

    #[test]
    fn huge_expiry_means_no_expiry() {
        let session = ReportSession::new("t".into(), None, Some(u64::MAX));
        assert!(session.expires_at.is_none());
        assert!(!session.is_expired());
    }
}
