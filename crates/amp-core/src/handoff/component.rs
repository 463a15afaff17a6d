//! The signed-in branch: builds the payload once and schedules the navigation.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::navigator::{Navigator, strip_query};
use super::payload::{HandoffPayload, callback_url};
use super::provider::{IdentityProvider, ProviderState};
use super::storage::BrowserStorage;
use crate::config::{HandoffConfig, TokenSource};
use crate::login::mask_token;

/// Static text shown by the signed-in branch, whatever the outcome.
pub const REDIRECTING_TEXT: &str = "Redirecting...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// The location was replaced with this URL.
    Navigated(String),
    /// Torn down before navigating.
    Cancelled,
}

pub struct Handoff<P, S, N> {
    provider: Arc<P>,
    storage: Arc<S>,
    navigator: Arc<N>,
    settings: HandoffConfig,
}

impl<P, S, N> Handoff<P, S, N>
where
    P: IdentityProvider,
    S: BrowserStorage,
    N: Navigator,
{
    pub fn new(
        provider: Arc<P>,
        storage: Arc<S>,
        navigator: Arc<N>,
        settings: HandoffConfig,
    ) -> Self {
        Self {
            provider,
            storage,
            navigator,
            settings,
        }
    }

    /// Registers the effect. Its body waits until the provider is ready, then
    /// runs exactly once.
    pub fn mount(self) -> HandoffHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let result = self.run(task_cancel).await;
            if let Err(err) = &result {
                error!("handoff failed: {err:#}");
            }
            result
        });

        HandoffHandle {
            cancel,
            task: Some(task),
        }
    }

    async fn run(self, cancel: CancellationToken) -> Result<HandoffOutcome> {
        let mut state = self.provider.state();

        let ready = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(HandoffOutcome::Cancelled),
            ready = wait_until_ready(&mut state) => ready,
        };
        if !ready {
            debug!("identity provider went away before sign-in completed");
            return Ok(HandoffOutcome::Cancelled);
        }
        let snapshot = state.borrow().clone();

        let session_token = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(HandoffOutcome::Cancelled),
            token = self.provider.get_token() => token.context("session token request failed")?,
        };

        let token = match self.settings.token_source {
            TokenSource::Storage => {
                debug!(token = %mask_token(&session_token), "ignoring session token");
                let key = &self.settings.storage_key;
                self.storage
                    .get_item(key)
                    .with_context(|| format!("no token in storage under '{key}'"))?
            }
            TokenSource::Session => session_token,
        };

        let payload = payload_from_state(&snapshot, token)?;
        let url = callback_url(&self.settings.callback_url, &payload.encode()?);

        debug!(delay_ms = self.settings.delay_ms, "navigation scheduled");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("pending navigation cancelled");
                return Ok(HandoffOutcome::Cancelled);
            }
            () = tokio::time::sleep(self.settings.delay()) => {}
        }

        self.navigator
            .replace(&url)
            .await
            .context("navigation to callback failed")?;
        info!(target = %strip_query(&url), "handed off sign-in");

        Ok(HandoffOutcome::Navigated(url))
    }
}

async fn wait_until_ready(state: &mut watch::Receiver<ProviderState>) -> bool {
    state.wait_for(ProviderState::is_ready).await.is_ok()
}

fn payload_from_state(state: &ProviderState, token: String) -> Result<HandoffPayload> {
    Ok(HandoffPayload {
        user_id: state
            .auth
            .user_id
            .clone()
            .context("signed-in state has no user id")?,
        session_id: state
            .auth
            .session_id
            .clone()
            .context("signed-in state has no session id")?,
        token,
        user: state.user.user.clone().unwrap_or_default(),
    })
}

/// A mounted [`Handoff`]. Dropping it tears the component down.
#[derive(Debug)]
pub struct HandoffHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<HandoffOutcome>>>,
}

impl HandoffHandle {
    pub fn view(&self) -> &'static str {
        REDIRECTING_TEXT
    }

    /// Tears the component down; a pending navigation will not fire.
    pub fn unmount(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the effect to settle. Cancel-safe.
    ///
    /// # Errors
    /// Returns the handoff failure, if any.
    pub async fn finished(&mut self) -> Result<HandoffOutcome> {
        let Some(task) = self.task.as_mut() else {
            return Ok(HandoffOutcome::Cancelled);
        };
        let joined = task.await;
        self.task = None;
        joined.context("handoff task aborted")?
    }

    /// # Errors
    /// Returns the handoff failure, if any.
    pub async fn join(mut self) -> Result<HandoffOutcome> {
        self.finished().await
    }
}

impl Drop for HandoffHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Mutex;
    use std::time::Duration;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    use super::*;
    use crate::handoff::provider::{AuthState, StaticProvider, UserState};
    use crate::handoff::storage::MemoryStorage;

    #[derive(Default)]
    struct RecordingNavigator {
        visits: Mutex<Vec<(Instant, String)>>,
    }

    impl RecordingNavigator {
        fn urls(&self) -> Vec<String> {
            self.visits
                .lock()
                .unwrap()
                .iter()
                .map(|(_, url)| url.clone())
                .collect()
        }
    }

    impl Navigator for RecordingNavigator {
        async fn replace(&self, url: &str) -> Result<()> {
            self.visits
                .lock()
                .unwrap()
                .push((Instant::now(), url.to_string()));
            Ok(())
        }
    }

    /// Signed-in provider whose token request stays pending until released.
    struct PendingTokenProvider {
        inner: StaticProvider,
        requested: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl PendingTokenProvider {
        fn signed_in() -> Self {
            let inner = StaticProvider::new("https://signin");
            inner.sign_in("u1", "s1", json!({}));
            Self {
                inner,
                requested: Arc::new(Notify::new()),
                release: Arc::new(Notify::new()),
            }
        }
    }

    impl IdentityProvider for PendingTokenProvider {
        fn state(&self) -> watch::Receiver<ProviderState> {
            self.inner.state()
        }

        fn get_token(&self) -> impl Future<Output = Result<String>> + Send {
            let requested = Arc::clone(&self.requested);
            let release = Arc::clone(&self.release);
            async move {
                requested.notify_one();
                release.notified().await;
                Ok("sess".to_string())
            }
        }

        fn sign_in_url(&self) -> String {
            self.inner.sign_in_url()
        }
    }

    fn mount(
        provider: &Arc<StaticProvider>,
        storage: MemoryStorage,
        navigator: &Arc<RecordingNavigator>,
        settings: HandoffConfig,
    ) -> HandoffHandle {
        Handoff::new(
            Arc::clone(provider),
            Arc::new(storage),
            Arc::clone(navigator),
            settings,
        )
        .mount()
    }

    fn stored_token() -> MemoryStorage {
        MemoryStorage::new().with_item("clerk-db-jwt", "tok1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigates_after_delay_with_encoded_payload() {
        let provider = Arc::new(StaticProvider::new("https://signin").with_session_token("sess"));
        provider.sign_in("u1", "s1", json!({"name": "A"}));
        let navigator = Arc::new(RecordingNavigator::default());

        let start = Instant::now();
        let handle = mount(&provider, stored_token(), &navigator, HandoffConfig::default());
        assert_eq!(handle.view(), "Redirecting...");

        let outcome = handle.join().await.unwrap();
        let expected = format!(
            "http://localhost:3535/done?p={}",
            STANDARD.encode(r#"{"userId":"u1","sessionId":"s1","token":"tok1","user":{"name":"A"}}"#)
        );
        assert_eq!(outcome, HandoffOutcome::Navigated(expected.clone()));
        assert_eq!(navigator.urls(), vec![expected]);

        let (visited_at, _) = navigator.visits.lock().unwrap()[0].clone();
        assert!(visited_at - start >= Duration::from_millis(1000));
        assert_eq!(provider.token_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timer_until_fully_signed_in() {
        let provider = Arc::new(StaticProvider::new("https://signin").with_session_token("sess"));
        provider.publish(ProviderState {
            auth: AuthState {
                is_loaded: true,
                is_signed_in: true,
                user_id: Some("u1".into()),
                session_id: Some("s1".into()),
            },
            user: UserState::default(),
        });
        let navigator = Arc::new(RecordingNavigator::default());

        let handle = mount(&provider, stored_token(), &navigator, HandoffConfig::default());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!handle.is_finished());
        assert!(navigator.urls().is_empty());
        assert_eq!(provider.token_requests(), 0);

        provider.sign_in("u1", "s1", json!({"name": "A"}));
        let outcome = handle.join().await.unwrap();
        assert!(matches!(outcome, HandoffOutcome::Navigated(_)));
        assert_eq!(navigator.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_before_delay_cancels_navigation() {
        let provider = Arc::new(StaticProvider::new("https://signin").with_session_token("sess"));
        provider.sign_in("u1", "s1", json!({}));
        let navigator = Arc::new(RecordingNavigator::default());

        let handle = mount(&provider, stored_token(), &navigator, HandoffConfig::default());
        tokio::time::sleep(Duration::from_millis(999)).await;
        handle.unmount();

        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, HandoffOutcome::Cancelled);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(navigator.urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_during_token_request_cancels_navigation() {
        let provider = Arc::new(PendingTokenProvider::signed_in());
        let navigator = Arc::new(RecordingNavigator::default());

        let handle = Handoff::new(
            Arc::clone(&provider),
            Arc::new(stored_token()),
            Arc::clone(&navigator),
            HandoffConfig::default(),
        )
        .mount();

        provider.requested.notified().await;
        handle.unmount();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, HandoffOutcome::Cancelled);

        provider.release.notify_one();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(navigator.urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_navigation() {
        let provider = Arc::new(StaticProvider::new("https://signin").with_session_token("sess"));
        provider.sign_in("u1", "s1", json!({}));
        let navigator = Arc::new(RecordingNavigator::default());

        let handle = mount(&provider, stored_token(), &navigator, HandoffConfig::default());
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(navigator.urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_request_fails_without_navigation() {
        let provider = Arc::new(StaticProvider::new("https://signin"));
        provider.sign_in("u1", "s1", json!({}));
        let navigator = Arc::new(RecordingNavigator::default());

        let handle = mount(&provider, stored_token(), &navigator, HandoffConfig::default());
        let err = handle.join().await.unwrap_err();

        assert!(format!("{err:#}").contains("session token request failed"));
        assert!(navigator.urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_storage_token_fails() {
        let provider = Arc::new(StaticProvider::new("https://signin").with_session_token("sess"));
        provider.sign_in("u1", "s1", json!({}));
        let navigator = Arc::new(RecordingNavigator::default());

        let handle = mount(&provider, MemoryStorage::new(), &navigator, HandoffConfig::default());
        let err = handle.join().await.unwrap_err();

        assert!(err.to_string().contains("clerk-db-jwt"));
        assert!(navigator.urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_token_source_forwards_fetched_token() {
        let provider = Arc::new(StaticProvider::new("https://signin").with_session_token("sess"));
        provider.sign_in("u1", "s1", json!({}));
        let navigator = Arc::new(RecordingNavigator::default());
        let settings = HandoffConfig {
            token_source: TokenSource::Session,
            ..HandoffConfig::default()
        };

        let handle = mount(&provider, MemoryStorage::new(), &navigator, settings);
        let HandoffOutcome::Navigated(url) = handle.join().await.unwrap() else {
            panic!("expected navigation");
        };

        let (_, encoded) = url.split_once("?p=").unwrap();
        let payload = HandoffPayload::decode(encoded).unwrap();
        assert_eq!(payload.token, "sess");
    }
}
