use anyhow::{Context, Result};
use tracing::info;

use super::clerk::{ClerkClient, decode_email};
use super::page::render_login_success;
use super::session::{LoginData, SessionStore};

/// Result of a verified login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSummary {
    pub email: String,
    /// Page returned to the browser.
    pub html: String,
}

/// Verifies handed-off sessions against Clerk and keeps them in the session store.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    store: SessionStore,
    clerk: ClerkClient,
}

impl LoginFlow {
    pub fn new(store: SessionStore, clerk: ClerkClient) -> Self {
        Self { store, clerk }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Verifies a freshly decoded payload and persists it.
    ///
    /// # Errors
    /// Returns an error if the payload is invalid, verification fails, or the
    /// session file cannot be written. Nothing is written on failure.
    pub async fn complete(&self, payload: &[u8]) -> Result<LoginSummary> {
        let login = LoginData::from_json(payload)?;
        let summary = self.verify(&login).await?;

        self.store.save(payload)?;
        info!(
            email = %summary.email,
            path = %self.store.path().display(),
            "session saved"
        );
        Ok(summary)
    }

    /// Verifies the stored session, if any.
    ///
    /// # Errors
    /// Returns an error if the stored session cannot be read or verified.
    pub async fn verify_existing(&self) -> Result<Option<LoginSummary>> {
        let Some(login) = self.store.load()? else {
            return Ok(None);
        };
        self.verify(&login).await.map(Some)
    }

    /// Last active session JWT for the stored session, for use as a request token.
    ///
    /// # Errors
    /// Returns an error if there is no stored session or Clerk rejects it.
    pub async fn request_token(&self) -> Result<String> {
        let login = self
            .store
            .load()?
            .context("not logged in (run `amp login` first)")?;
        self.clerk.fetch_session_jwt(&login).await
    }

    async fn verify(&self, login: &LoginData) -> Result<LoginSummary> {
        let jwt = self
            .clerk
            .fetch_session_jwt(login)
            .await
            .context("Failed to verify session with Clerk")?;
        let email = decode_email(&jwt)?;
        let html = render_login_success(&email)?;
        Ok(LoginSummary { email, html })
    }
}
