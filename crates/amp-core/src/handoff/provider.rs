//! Identity provider seam.
//!
//! The provider is an injected capability: it publishes its client state on a
//! `watch` channel and answers token requests. Nothing here validates what it
//! reports.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use serde_json::Value;
use tokio::sync::watch;

/// Authentication status (`useAuth`-style view of the provider).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub is_loaded: bool,
    pub is_signed_in: bool,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// User profile status (`useUser`-style view of the provider).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
    pub is_loaded: bool,
    pub is_signed_in: bool,
    pub user: Option<Value>,
}

/// Everything the provider reports at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderState {
    pub auth: AuthState,
    pub user: UserState,
}

impl ProviderState {
    /// Both auth and user data are loaded and signed in.
    pub fn is_ready(&self) -> bool {
        self.auth.is_loaded && self.auth.is_signed_in && self.user.is_loaded && self.user.is_signed_in
    }
}

pub trait IdentityProvider: Send + Sync + 'static {
    /// Subscribes to provider state; the current value is observable immediately.
    fn state(&self) -> watch::Receiver<ProviderState>;

    /// Requests a session token for the active session.
    fn get_token(&self) -> impl Future<Output = Result<String>> + Send;

    /// Where the signed-out branch sends the browser.
    fn sign_in_url(&self) -> String;
}

/// In-process provider whose state is set by the caller.
#[derive(Debug)]
pub struct StaticProvider {
    tx: watch::Sender<ProviderState>,
    session_token: Option<String>,
    sign_in_url: String,
    token_requests: AtomicUsize,
}

impl StaticProvider {
    /// Creates a provider that has not loaded yet.
    pub fn new(sign_in_url: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(ProviderState::default());
        Self {
            tx,
            session_token: None,
            sign_in_url: sign_in_url.into(),
            token_requests: AtomicUsize::new(0),
        }
    }

    /// Token returned by [`IdentityProvider::get_token`]. Without one, token requests fail.
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Publishes a fully loaded, signed-in state.
    pub fn sign_in(&self, user_id: &str, session_id: &str, user: Value) {
        self.publish(ProviderState {
            auth: AuthState {
                is_loaded: true,
                is_signed_in: true,
                user_id: Some(user_id.to_string()),
                session_id: Some(session_id.to_string()),
            },
            user: UserState {
                is_loaded: true,
                is_signed_in: true,
                user: Some(user),
            },
        });
    }

    /// Publishes a loaded, signed-out state.
    pub fn sign_out(&self) {
        self.publish(ProviderState {
            auth: AuthState {
                is_loaded: true,
                ..AuthState::default()
            },
            user: UserState {
                is_loaded: true,
                ..UserState::default()
            },
        });
    }

    pub fn publish(&self, state: ProviderState) {
        self.tx.send_replace(state);
    }

    /// Number of token requests served so far.
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for StaticProvider {
    fn state(&self) -> watch::Receiver<ProviderState> {
        self.tx.subscribe()
    }

    fn get_token(&self) -> impl Future<Output = Result<String>> + Send {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        let signed_in = self.tx.borrow().auth.is_signed_in;
        let token = self.session_token.clone();
        async move {
            if !signed_in {
                anyhow::bail!("token request rejected: not signed in");
            }
            token.ok_or_else(|| anyhow::anyhow!("token request rejected: no active session token"))
        }
    }

    fn sign_in_url(&self) -> String {
        self.sign_in_url.clone()
    }
}
