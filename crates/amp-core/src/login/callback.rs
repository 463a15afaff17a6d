//! Local login callback server.
//!
//! The browser lands on `/`, which redirects to the sign-in web app. After
//! sign-in the web app navigates to `/done?p=<payload>`; that request completes
//! the login and stops the server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::flow::{LoginFlow, LoginSummary};
use crate::core::interrupt::InterruptedError;
use crate::handoff::{PAYLOAD_PARAM, decode_param};

/// Path the handoff navigates to.
pub const DONE_PATH: &str = "/done";

/// Request heads up to 1 MiB are accepted; a large user profile makes long `p` values.
const MAX_REQUEST_HEAD: usize = 1024 * 1024;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Start,
    Done(Option<String>),
    TooLong,
    NotFound,
}

pub struct CallbackServer {
    listener: TcpListener,
    login_url: String,
}

impl CallbackServer {
    /// Binds `127.0.0.1:<port>`. Port 0 picks a free port.
    ///
    /// # Errors
    /// Returns an error if the port is unavailable.
    pub async fn bind(port: u16, login_url: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("Failed to listen on localhost:{port}"))?;
        Ok(Self {
            listener,
            login_url: login_url.into(),
        })
    }

    /// # Errors
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read callback server address")
    }

    /// URL that starts the browser flow.
    ///
    /// # Errors
    /// Returns an error if the socket address cannot be read.
    pub fn start_url(&self) -> Result<String> {
        Ok(format!("http://localhost:{}", self.local_addr()?.port()))
    }

    /// Serves requests until a handoff completes the login.
    ///
    /// Each connection is handled on its own task, so an idle connection does
    /// not hold up the handoff request. Failed handoffs are answered with an
    /// error page and the server keeps listening, so the user can retry from
    /// the browser.
    ///
    /// # Errors
    /// Returns [`InterruptedError`] when `cancel` fires, or an error on timeout.
    pub async fn serve(
        self,
        flow: &LoginFlow,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<LoginSummary> {
        let flow = Arc::new(flow.clone());
        let login_url: Arc<str> = Arc::from(self.login_url);
        let mut connections = JoinSet::new();

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(InterruptedError.into()),
                () = &mut deadline => anyhow::bail!(
                    "Timed out after {}s waiting for the browser sign-in",
                    timeout.as_secs()
                ),
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("Failed to accept callback connection")?;
                    debug!(%peer, "callback connection");
                    let flow = Arc::clone(&flow);
                    let login_url = Arc::clone(&login_url);
                    connections.spawn(async move {
                        match tokio::time::timeout(
                            CONNECTION_TIMEOUT,
                            handle_connection(stream, &login_url, &flow),
                        )
                        .await
                        {
                            Ok(Ok(summary)) => summary,
                            Ok(Err(err)) => {
                                warn!("callback connection failed: {err:#}");
                                None
                            }
                            Err(_) => {
                                warn!(%peer, "callback connection timed out");
                                None
                            }
                        }
                    });
                }
                Some(joined) = connections.join_next() => match joined {
                    Ok(Some(summary)) => return Ok(summary),
                    Ok(None) => {}
                    Err(err) => warn!("callback connection task failed: {err}"),
                },
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    login_url: &str,
    flow: &LoginFlow,
) -> Result<Option<LoginSummary>> {
    let route = match read_request_head(&mut stream).await? {
        Some(head) => parse_route(&head),
        None => Route::TooLong,
    };
    let (status, headers, body, summary) = match route {
        Route::Start => (
            "307 Temporary Redirect",
            vec![("Location", login_url.to_string())],
            String::new(),
            None,
        ),
        Route::Done(None) => (
            "400 Bad Request",
            text_headers(),
            format!("missing '{PAYLOAD_PARAM}' parameter"),
            None,
        ),
        Route::Done(Some(encoded)) => match complete(flow, &encoded).await {
            Ok(summary) => (
                "200 OK",
                vec![("Content-Type", "text/html; charset=utf-8".to_string())],
                summary.html.clone(),
                Some(summary),
            ),
            Err(err) => {
                error!("login failed: {err:#}");
                ("500 Internal Server Error", text_headers(), format!("{err:#}"), None)
            }
        },
        Route::TooLong => {
            warn!(limit = MAX_REQUEST_HEAD, "callback request line too long");
            ("414 URI Too Long", text_headers(), String::new(), None)
        }
        Route::NotFound => ("404 Not Found", text_headers(), String::new(), None),
    };

    stream
        .write_all(http_response(status, &headers, &body).as_bytes())
        .await
        .context("Failed to write callback response")?;
    let _ = stream.shutdown().await;

    Ok(summary)
}

async fn complete(flow: &LoginFlow, encoded: &str) -> Result<LoginSummary> {
    let payload = decode_param(encoded)?;
    flow.complete(&payload).await
}

/// Reads up to the end of the request head. `None` when the request line alone
/// exceeds [`MAX_REQUEST_HEAD`].
async fn read_request_head(stream: &mut TcpStream) -> Result<Option<String>> {
    let mut buffer = Vec::with_capacity(8 * 1024);
    let mut chunk = [0u8; 8 * 1024];
    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .context("Failed to read callback request")?;
        if read == 0 {
            break;
        }
        let scan_from = buffer.len().saturating_sub(3);
        buffer.extend_from_slice(&chunk[..read]);
        if buffer[scan_from..].windows(4).any(|w| w == b"\r\n\r\n")
            || buffer.len() >= MAX_REQUEST_HEAD
        {
            break;
        }
    }
    if buffer.len() >= MAX_REQUEST_HEAD && !buffer.contains(&b'\n') {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

fn parse_route(request: &str) -> Route {
    let mut parts = request.lines().next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Route::NotFound;
    };
    if method != "GET" {
        return Route::NotFound;
    }
    let Ok(url) = url::Url::parse(&format!("http://localhost{target}")) else {
        return Route::NotFound;
    };

    match url.path() {
        "/" => Route::Start,
        DONE_PATH => Route::Done(
            url.query_pairs()
                .find(|(k, _)| k == PAYLOAD_PARAM)
                .map(|(_, v)| v.to_string())
                .filter(|v| !v.is_empty()),
        ),
        _ => Route::NotFound,
    }
}

fn text_headers() -> Vec<(&'static str, String)> {
    vec![("Content-Type", "text/plain; charset=utf-8".to_string())]
}

fn http_response(status: &str, headers: &[(&str, String)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ));
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::Engine;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::HandoffConfig;
    use crate::handoff::{Gate, GateOutcome, HttpNavigator, MemoryStorage, StaticProvider};
    use crate::login::{ClerkClient, SessionStore};

    const LOGIN_URL: &str = "https://signin.example";

    #[test]
    fn test_parse_route() {
        assert_eq!(parse_route("GET / HTTP/1.1\r\n\r\n"), Route::Start);
        assert_eq!(
            parse_route("GET /done?p=abc+d%3D HTTP/1.1\r\n"),
            Route::Done(Some("abc d=".to_string()))
        );
        assert_eq!(parse_route("GET /done HTTP/1.1\r\n"), Route::Done(None));
        assert_eq!(parse_route("POST /done?p=x HTTP/1.1\r\n"), Route::NotFound);
        assert_eq!(parse_route("GET /favicon.ico HTTP/1.1\r\n"), Route::NotFound);
        assert_eq!(parse_route(""), Route::NotFound);
    }

    async fn clerk_for(token: &str, email: &str) -> MockServer {
        let server = MockServer::start().await;
        let jwt = format!(
            "h.{}.s",
            URL_SAFE_NO_PAD.encode(json!({ "email": email }).to_string())
        );
        Mock::given(method("GET"))
            .and(path("/v1/client"))
            .and(query_param("__dev_session", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"sessions": [{"last_active_token": {"jwt": jwt}}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unknown session"))
            .mount(&server)
            .await;
        server
    }

    struct Running {
        base: String,
        store: SessionStore,
        task: tokio::task::JoinHandle<Result<LoginSummary>>,
        cancel: CancellationToken,
        _dir: tempfile::TempDir,
    }

    async fn start(clerk: &MockServer) -> Running {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("jwt-dev.json"));
        let flow = LoginFlow::new(
            store.clone(),
            ClerkClient::new(clerk.uri(), true, "http://localhost:3535"),
        );
        let server = CallbackServer::bind(0, LOGIN_URL).await.unwrap();
        let base = server.start_url().unwrap();
        let cancel = CancellationToken::new();
        let serve_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            server
                .serve(&flow, serve_cancel, Duration::from_secs(30))
                .await
        });
        Running {
            base,
            store,
            task,
            cancel,
            _dir: dir,
        }
    }

    fn no_redirects() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_redirects_and_unknown_paths_404() {
        let clerk = clerk_for("tok1", "a@example.com").await;
        let running = start(&clerk).await;
        let client = no_redirects();

        let response = client.get(&running.base).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 307);
        assert_eq!(
            response.headers().get("location").unwrap().to_str().unwrap(),
            LOGIN_URL
        );

        let response = client
            .get(format!("{}/nope", running.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);

        running.cancel.cancel();
        let err = running.task.await.unwrap().unwrap_err();
        assert!(err.downcast_ref::<InterruptedError>().is_some());
    }

    #[tokio::test]
    async fn test_failed_handoff_keeps_serving_until_valid_one() {
        let clerk = clerk_for("tok1", "a@example.com").await;
        let running = start(&clerk).await;
        let client = no_redirects();

        let bad = STANDARD.encode(r#"{"userId":"u1","sessionId":"s1","token":"stale","user":{}}"#);
        let response = client
            .get(format!("{}{DONE_PATH}?p={bad}", running.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 500);
        assert!(response.text().await.unwrap().contains("http 401"));
        assert!(!running.store.has_session().unwrap());

        let response = client
            .get(format!("{}{DONE_PATH}", running.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);

        let good = STANDARD.encode(r#"{"userId":"u1","sessionId":"s1","token":"tok1","user":{}}"#);
        let response = client
            .get(format!("{}{DONE_PATH}?p={good}", running.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let summary = running.task.await.unwrap().unwrap();
        assert_eq!(summary.email, "a@example.com");
        assert_eq!(running.store.load().unwrap().unwrap().token, "tok1");
    }

    #[tokio::test]
    async fn test_large_profile_payload_is_accepted() {
        let clerk = clerk_for("tok1", "a@example.com").await;
        let running = start(&clerk).await;

        let profile = json!({"publicMetadata": "x".repeat(14_000)});
        let encoded = STANDARD.encode(
            json!({"userId": "u1", "sessionId": "s1", "token": "tok1", "user": profile})
                .to_string(),
        );
        assert!(encoded.len() > 16 * 1024);

        let response = no_redirects()
            .get(format!("{}{DONE_PATH}?p={encoded}", running.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        running.task.await.unwrap().unwrap();
        let saved: serde_json::Value =
            serde_json::from_slice(&running.store.load_raw().unwrap().unwrap()).unwrap();
        assert_eq!(saved["user"], profile);
    }

    #[tokio::test]
    async fn test_oversized_request_line_gets_414() {
        let clerk = clerk_for("tok1", "a@example.com").await;
        let running = start(&clerk).await;

        let mut request = format!("GET {DONE_PATH}?p=").into_bytes();
        request.resize(MAX_REQUEST_HEAD, b'A');
        let mut stream = TcpStream::connect(running.base.trim_start_matches("http://"))
            .await
            .unwrap();
        stream.write_all(&request).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 414"));
        assert!(!running.store.has_session().unwrap());

        running.cancel.cancel();
        assert!(running.task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_delay_handoff() {
        let clerk = clerk_for("tok1", "a@example.com").await;
        let running = start(&clerk).await;

        let _idle = TcpStream::connect(running.base.trim_start_matches("http://"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let good = STANDARD.encode(r#"{"userId":"u1","sessionId":"s1","token":"tok1","user":{}}"#);
        let request = no_redirects()
            .get(format!("{}{DONE_PATH}?p={good}", running.base))
            .send();
        let response = tokio::time::timeout(Duration::from_secs(3), request)
            .await
            .expect("handoff answered while another connection is idle")
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let summary = running.task.await.unwrap().unwrap();
        assert_eq!(summary.email, "a@example.com");
    }

    #[tokio::test]
    async fn test_handoff_end_to_end() {
        let clerk = clerk_for("tok1", "a@example.com").await;
        let running = start(&clerk).await;

        let provider = Arc::new(StaticProvider::new(LOGIN_URL).with_session_token("sess"));
        provider.sign_in("u1", "s1", json!({"name": "A"}));
        let navigator = Arc::new(HttpNavigator::new());
        let settings = HandoffConfig {
            callback_url: format!("{}{DONE_PATH}", running.base),
            delay_ms: 10,
            ..HandoffConfig::default()
        };

        let outcome = Gate::new(
            provider,
            Arc::new(MemoryStorage::new().with_item("clerk-db-jwt", "tok1")),
            Arc::clone(&navigator),
            settings,
        )
        .run(CancellationToken::new())
        .await
        .unwrap();
        assert!(matches!(outcome, GateOutcome::HandedOff(_)));

        let (status, body) = navigator.last_response().unwrap();
        assert_eq!(status, 200);
        assert!(body.contains("Successfully logged in as a@example.com"));

        let summary = running.task.await.unwrap().unwrap();
        assert_eq!(summary.email, "a@example.com");

        let saved: serde_json::Value =
            serde_json::from_slice(&running.store.load_raw().unwrap().unwrap()).unwrap();
        assert_eq!(saved["user"], json!({"name": "A"}));
    }

    #[tokio::test]
    async fn test_times_out_without_handoff() {
        let clerk = MockServer::start().await;
        let dir = tempdir().unwrap();
        let flow = LoginFlow::new(
            SessionStore::new(dir.path().join("jwt.json")),
            ClerkClient::new(clerk.uri(), true, "http://localhost:3535"),
        );
        let server = CallbackServer::bind(0, LOGIN_URL).await.unwrap();

        let err = server
            .serve(&flow, CancellationToken::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Timed out"));
    }
}
