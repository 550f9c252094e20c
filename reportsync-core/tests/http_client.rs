//! Report service client against a local stub server.
//!
//! The stub answers one canned response per connection and hands the raw
//! request text back so headers and query strings can be asserted.

use reportsync_core::service::{
    HttpReportClient, ReportError, ReportService, ServiceSettings, SessionState,
};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

// ── Stub server ──────────────────────────────────────────────────────

struct Stub {
    base_url: String,
    requests: Receiver<String>,
    handle: JoinHandle<()>,
}

impl Stub {
    fn finish(self) -> Vec<String> {
        self.handle.join().unwrap();
        self.requests.try_iter().collect()
    }
}

fn response(status: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn login_ok() -> String {
    response(
        "200 OK",
        "Set-Cookie: csrf_access_token=csrf123; Path=/\r\n",
        r#"{"data":{"access_token":"tok","expires_in":900}}"#,
    )
}

fn read_request(stream: &mut impl Read) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_string();
        let body_len = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + body_len {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn serve(responses: Vec<String>) -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        for canned in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            tx.send(request).unwrap();
            stream.write_all(canned.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
    });
    Stub {
        base_url,
        requests: rx,
        handle,
    }
}

fn client(base_url: &str) -> HttpReportClient {
    HttpReportClient::new(ServiceSettings {
        base_url: base_url.to_string(),
        username: "svc".into(),
        password: "secret".into(),
        accept_invalid_certs: true,
        timeout_secs: 10,
    })
    .unwrap()
}

// ── Sessions ─────────────────────────────────────────────────────────

#[test]
fn full_session_sends_tokens_and_streams_export() {
    let archive = "PK\u{3}\u{4}fake-archive-bytes";
    let stub = serve(vec![
        login_ok(),
        response("200 OK", "", r#"{"meta_data":{"message":"ok"}}"#),
        response("200 OK", "", archive),
    ]);
    let mut client = client(&stub.base_url);

    client.login().unwrap();
    assert_eq!(client.state(), SessionState::Authenticated);
    client.generate_report("proj").unwrap();
    assert_eq!(client.state(), SessionState::GenerationTriggered);
    let mut sink = Vec::new();
    let bytes = client.download_report("proj", &mut sink).unwrap();
    assert_eq!(bytes as usize, archive.len());
    assert_eq!(sink, archive.as_bytes());
    assert_eq!(client.state(), SessionState::Done);

    let requests = stub.finish();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].starts_with("POST /login "));
    assert!(requests[0].contains(r#""username":"svc""#));

    let generate = requests[1].to_ascii_lowercase();
    assert!(generate.starts_with("get /generate-report?project_id=proj "));
    assert!(generate.contains("authorization: bearer tok"));
    assert!(generate.contains("x-csrf-token: csrf123"));

    assert!(requests[2].starts_with("GET /report/export?project_id=proj "));
}

#[test]
fn rejected_login_fails_then_retry_succeeds() {
    let stub = serve(vec![
        response("401 Unauthorized", "", r#"{"error":"bad credentials"}"#),
        login_ok(),
    ]);
    let mut client = client(&stub.base_url);

    assert!(matches!(client.login(), Err(ReportError::Auth(_))));
    assert_eq!(client.state(), SessionState::Failed);
    assert!(matches!(
        client.generate_report("proj"),
        Err(ReportError::InvalidState { .. })
    ));

    client.login().unwrap();
    assert_eq!(client.state(), SessionState::Authenticated);
    assert_eq!(stub.finish().len(), 2);
}

#[test]
fn login_without_token_is_auth_failure() {
    let stub = serve(vec![response("200 OK", "", r#"{"data":{}}"#)]);
    let mut client = client(&stub.base_url);
    assert!(matches!(client.login(), Err(ReportError::Auth(_))));
    assert_eq!(client.state(), SessionState::Failed);
    stub.finish();
}

#[test]
fn generation_error_blocks_download() {
    let stub = serve(vec![
        login_ok(),
        response("500 Internal Server Error", "", r#"{"error":"boom"}"#),
    ]);
    let mut client = client(&stub.base_url);
    client.login().unwrap();

    assert!(matches!(
        client.generate_report("proj"),
        Err(ReportError::Generation(_))
    ));
    assert_eq!(client.state(), SessionState::Failed);
    let mut sink = Vec::new();
    assert!(matches!(
        client.download_report("proj", &mut sink),
        Err(ReportError::InvalidState { .. })
    ));
    assert!(sink.is_empty());
    stub.finish();
}
