//! Clerk Frontend API client.
//!
//! Only the pieces the CLI needs: resolve the last active session JWT for a
//! handed-off session, and read the email claim out of it.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tracing::debug;

use super::session::LoginData;
use crate::config::Config;

/// clerk-js version the Frontend API is asked to speak.
const CLERK_JS_VERSION: &str = "4.50.1";

#[derive(Debug, Clone)]
pub struct ClerkClient {
    http: reqwest::Client,
    root_url: String,
    dev_session: bool,
    origin: String,
}

#[derive(Debug, Deserialize)]
struct ClientResponse {
    response: ClientBody,
}

#[derive(Debug, Deserialize)]
struct ClientBody {
    #[serde(default)]
    sessions: Vec<Session>,
}

#[derive(Debug, Deserialize)]
struct Session {
    last_active_token: Option<SessionToken>,
}

#[derive(Debug, Deserialize)]
struct SessionToken {
    jwt: String,
}

impl ClerkClient {
    /// `dev_session` passes the handed-off token as `__dev_session`, which
    /// development instances require instead of cookies.
    pub fn new(root_url: impl Into<String>, dev_session: bool, origin: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            root_url: root_url.into(),
            dev_session,
            origin: origin.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.clerk_root_url(),
            !config.is_prod(),
            config.callback.origin(),
        )
    }

    pub fn session_url(&self, login: &LoginData) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("_clerk_js_version", CLERK_JS_VERSION);
        if self.dev_session {
            query.append_pair("__dev_session", &login.token);
        }
        format!(
            "{}/v1/client?{}",
            self.root_url.trim_end_matches('/'),
            query.finish()
        )
    }

    /// Fetches the client's sessions and returns the first one's last active JWT.
    ///
    /// # Errors
    /// Returns an error on transport failure, a non-200 status, or an empty
    /// session list.
    pub async fn fetch_session_jwt(&self, login: &LoginData) -> Result<String> {
        let mut request = self
            .http
            .get(self.session_url(login))
            .header("Origin", &self.origin);
        if let Some(cookies) = cookie_header(&login.cookies) {
            request = request.header("Cookie", cookies);
        }

        let response = request
            .send()
            .await
            .context("Failed to send session request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read session response body")?;
        if !status.is_success() {
            anyhow::bail!("http {} ({body})", status.as_u16());
        }

        let client: ClientResponse =
            serde_json::from_str(&body).context("Failed to parse session response")?;
        debug!(sessions = client.response.sessions.len(), "fetched client sessions");

        client
            .response
            .sessions
            .into_iter()
            .next()
            .context("no sessions found in response")?
            .last_active_token
            .map(|token| token.jwt)
            .context("session has no active token")
    }
}

/// Reads the `email` claim from a JWT without verifying its signature.
///
/// # Errors
/// Returns an error if the token is malformed or carries no email claim.
pub fn decode_email(jwt: &str) -> Result<String> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        anyhow::bail!("malformed JWT: expected 3 segments, got {}", parts.len());
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .context("JWT claims are not valid base64url")?;
    let claims: serde_json::Value =
        serde_json::from_slice(&decoded).context("JWT claims are not valid JSON")?;

    claims
        .get("email")
        .and_then(|v| v.as_str())
        .map(std::string::ToString::to_string)
        .context("couldn't find email address in claims")
}

fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    let pairs: Vec<String> = cookies
        .iter()
        .map(|(name, value)| {
            let value: String = value.chars().filter(|&c| valid_cookie_value_char(c)).collect();
            format!("{name}={value}")
        })
        .collect();
    Some(pairs.join("; "))
}

fn valid_cookie_value_char(c: char) -> bool {
    (' '..'\u{7f}').contains(&c) && c != '"' && c != ';' && c != '\\'
}
