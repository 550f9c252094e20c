//! HTTP client for the reporting service.
//!
//! Endpoints:
//! - `POST {base}/login` → `{data: {access_token, expires_in}}` + `csrf_access_token` cookie
//! - `GET {base}/generate-report?project_id=..`
//! - `GET {base}/report/export?project_id=..` (streamed body)
//!
//! Every request is attempted once; retry policy belongs to the caller.

use super::{
    require_authenticated, ReportError, ReportService, ReportSession, ServiceConnector,
    SessionState,
};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::SET_COOKIE;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

const CSRF_COOKIE: &str = "csrf_access_token";
const CSRF_HEADER: &str = "X-CSRF-TOKEN";

/// Connection settings for the reporting service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed certificates.
    pub accept_invalid_certs: bool,
    pub timeout_secs: u64,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// reqwest-backed implementation of `ReportService`.
pub struct HttpReportClient {
    client: Client,
    settings: ServiceSettings,
    state: SessionState,
    session: Option<ReportSession>,
}

impl HttpReportClient {
    pub fn new(settings: ServiceSettings) -> Result<Self, ReportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|e| ReportError::Client(e.to_string()))?;
        Ok(Self {
            client,
            settings,
            state: SessionState::Unauthenticated,
            session: None,
        })
    }

    /// Replace credentials before another login attempt.
    pub fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.settings.username = username.into();
        self.settings.password = password.into();
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.settings.base_url.trim_end_matches('/'))
    }

    /// Attach bearer and CSRF headers, failing if the session is gone or stale.
    fn authorized(&mut self, builder: RequestBuilder) -> Result<RequestBuilder, ReportError> {
        require_authenticated(self.state)?;
        if self.session.as_ref().map_or(true, ReportSession::is_expired) {
            self.state = SessionState::Unauthenticated;
            self.session = None;
            return Err(ReportError::Auth("session expired".into()));
        }
        let Some(session) = self.session.as_ref() else {
            return Err(ReportError::Auth("no session".into()));
        };
        let mut builder = builder.bearer_auth(&session.access_token);
        if let Some(csrf) = &session.csrf_token {
            builder = builder.header(CSRF_HEADER, csrf);
        }
        Ok(builder)
    }

    fn fail<T>(&mut self, err: ReportError) -> Result<T, ReportError> {
        self.state = SessionState::Failed;
        Err(err)
    }
}

impl ReportService for HttpReportClient {
    fn state(&self) -> SessionState {
        self.state
    }

    fn login(&mut self) -> Result<(), ReportError> {
        if !self.state.can_login() {
            return Err(ReportError::InvalidState {
                expected: "an unauthenticated client",
                actual: self.state,
            });
        }
        self.session = None;
        let body = LoginRequest {
            username: &self.settings.username,
            password: &self.settings.password,
        };
        let resp = match self.client.post(self.url("login")).json(&body).send() {
            Ok(resp) => resp,
            Err(e) => return self.fail(ReportError::Auth(format!("login request: {e}"))),
        };
        let status = resp.status();
        if !status.is_success() {
            return self.fail(ReportError::Auth(format!("login returned HTTP {status}")));
        }
        let csrf_token = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|cookie| cookie_value(cookie, CSRF_COOKIE));
        let text = match resp.text() {
            Ok(text) => text,
            Err(e) => return self.fail(ReportError::Auth(format!("login body: {e}"))),
        };
        let (access_token, expires_in) = match parse_login_body(&text) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(e),
        };
        if csrf_token.is_none() {
            tracing::debug!("login response carried no CSRF cookie");
        }
        self.session = Some(ReportSession::new(access_token, csrf_token, expires_in));
        self.state = SessionState::Authenticated;
        tracing::info!(base_url = %self.settings.base_url, "report service login ok");
        Ok(())
    }

    fn generate_report(&mut self, project_id: &str) -> Result<(), ReportError> {
        let request = self
            .client
            .get(self.url("generate-report"))
            .query(&[("project_id", project_id)]);
        let request = self.authorized(request)?;
        self.state = SessionState::Generating;
        match request.send() {
            Ok(resp) if resp.status().is_success() => {
                self.state = SessionState::GenerationTriggered;
                tracing::info!(project_id, "report generation triggered");
                Ok(())
            }
            Ok(resp) => {
                let status = resp.status();
                self.fail(ReportError::Generation(format!("HTTP {status}")))
            }
            Err(e) => self.fail(ReportError::Generation(e.to_string())),
        }
    }

    fn download_report(
        &mut self,
        project_id: &str,
        dest: &mut dyn Write,
    ) -> Result<u64, ReportError> {
        let request = self
            .client
            .get(self.url("report/export"))
            .query(&[("project_id", project_id)]);
        let request = self.authorized(request)?;
        self.state = SessionState::Downloading;
        let mut resp = match request.send() {
            Ok(resp) => resp,
            Err(e) => return self.fail(ReportError::Download(e.to_string())),
        };
        let status = resp.status();
        if !status.is_success() {
            return self.fail(ReportError::Download(format!("HTTP {status}")));
        }
        match resp.copy_to(dest) {
            Ok(bytes) => {
                self.state = SessionState::Done;
                tracing::info!(project_id, bytes, "report export downloaded");
                Ok(bytes)
            }
            Err(e) => self.fail(ReportError::Download(e.to_string())),
        }
    }
}

/// Builds a new `HttpReportClient` for every unit of work.
pub struct HttpConnector {
    settings: ServiceSettings,
}

impl HttpConnector {
    pub fn new(settings: ServiceSettings) -> Self {
        Self { settings }
    }
}

impl ServiceConnector for HttpConnector {
    fn connect(&self) -> Result<Box<dyn ReportService>, ReportError> {
        Ok(Box::new(HttpReportClient::new(self.settings.clone())?))
    }
}

/// Extract `(access_token, expires_in)` from a login response body.
fn parse_login_body(text: &str) -> Result<(String, Option<u64>), ReportError> {
    let parsed: LoginResponse = serde_json::from_str(text)
        .map_err(|e| ReportError::Auth(format!("unparseable login response: {e}")))?;
    let data = parsed
        .data
        .ok_or_else(|| ReportError::Auth("login response has no data".into()))?;
    match data.access_token {
        Some(token) if !token.is_empty() => Ok((token, data.expires_in)),
        _ => Err(ReportError::Auth("login response has no access token".into())),
    }
}

/// Value of cookie `name` in a `Set-Cookie` header, if that is the cookie it sets.
fn cookie_value(header: &str, name: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (key, value) = pair.split_once('=')?;
    if key.trim() == name {
        Some(value.trim().trim_matches('"').to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> ServiceSettings {
        ServiceSettings {
            base_url: base_url.to_string(),
            username: "u".into(),
            password: "p".into(),
            accept_invalid_certs: true,
            timeout_secs: 5,
        }
    }

    #[test]
    fn login_body_parsing() {
        let ok = parse_login_body(r#"{"data":{"access_token":"abc","expires_in":900}}"#).unwrap();
        assert_eq!(ok, ("abc".to_string(), Some(900)));

        let no_expiry = parse_login_body(r#"{"data":{"access_token":"abc"}}"#).unwrap();
        assert_eq!(no_expiry.1, None);

        for bad in [
            r#"{"data":{}}"#,
            r#"{"data":{"access_token":""}}"#,
            r#"{"error":"nope"}"#,
            "<html>",
        ] {
            assert!(matches!(parse_login_body(bad), Err(ReportError::Auth(_))), "{bad}");
        }
    }

    #[test]
    fn csrf_cookie_extraction() {
        assert_eq!(
            cookie_value("csrf_access_token=xyz; Path=/; SameSite=Lax", CSRF_COOKIE).as_deref(),
            Some("xyz")
        );
        assert_eq!(
            cookie_value("access_token_cookie=abc; HttpOnly", CSRF_COOKIE),
            None
        );
        assert_eq!(cookie_value("garbage", CSRF_COOKIE), None);
    }

    #[test]
    fn generation_requires_login() {
        let mut client = HttpReportClient::new(settings("http://127.0.0.1:9")).unwrap();
        let err = client.generate_report("p").unwrap_err();
        assert!(matches!(err, ReportError::InvalidState { .. }));
        let mut sink = Vec::new();
        let err = client.download_report("p", &mut sink).unwrap_err();
        assert!(matches!(err, ReportError::InvalidState { .. }));
        assert_eq!(client.state(), SessionState::Unauthenticated);
    }

    #[test]
    fn unreachable_service_is_auth_failure_and_retryable() {
        let mut client = HttpReportClient::new(settings("http://127.0.0.1:9")).unwrap();
        assert!(matches!(client.login(), Err(ReportError::Auth(_))));
        assert_eq!(client.state(), SessionState::Failed);
        assert!(client.state().can_login());
    }

    #[test]
    fn url_joining() {
        let client = HttpReportClient::new(settings("https://reports.local/api/")).unwrap();
        assert_eq!(client.url("login"), "https://reports.local/api/login");
    }
}
