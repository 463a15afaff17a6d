//! Branch selection on sign-in status.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::component::{Handoff, HandoffHandle, HandoffOutcome};
use super::navigator::Navigator;
use super::provider::{AuthState, IdentityProvider};
use super::storage::BrowserStorage;
use crate::config::HandoffConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Authenticated view; mounts the handoff.
    SignedIn,
    /// Sends the browser to the provider's sign-in page.
    SignedOut,
}

/// Which branch renders for `auth`. `None` until the provider has loaded.
pub fn branch(auth: &AuthState) -> Option<Branch> {
    if !auth.is_loaded {
        None
    } else if auth.is_signed_in {
        Some(Branch::SignedIn)
    } else {
        Some(Branch::SignedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The handoff replaced the location with this URL.
    HandedOff(String),
    /// Torn down, or the provider went away, before any handoff.
    TornDown,
}

pub struct Gate<P, S, N> {
    provider: Arc<P>,
    storage: Arc<S>,
    navigator: Arc<N>,
    settings: HandoffConfig,
}

enum Event {
    TornDown,
    StateChanged { closed: bool },
    HandoffSettled(Result<HandoffOutcome>),
}

impl<P, S, N> Gate<P, S, N>
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

    /// Renders branches as provider state changes until the handoff navigates,
    /// `cancel` fires, or the provider closes its state channel.
    ///
    /// # Errors
    /// Returns the handoff failure, or a failed sign-in redirect.
    pub async fn run(self, cancel: CancellationToken) -> Result<GateOutcome> {
        let mut state = self.provider.state();
        let mut rendered: Option<Branch> = None;
        let mut mounted: Option<HandoffHandle> = None;

        loop {
            let current = branch(&state.borrow_and_update().auth);
            if current != rendered {
                debug!(from = ?rendered, to = ?current, "gate branch changed");
                if current != Some(Branch::SignedIn)
                    && let Some(handle) = mounted.take()
                {
                    handle.unmount();
                }

                match current {
                    Some(Branch::SignedIn) => mounted = Some(self.mount_handoff()),
                    Some(Branch::SignedOut) => {
                        info!("not signed in, redirecting to sign-in");
                        self.navigator
                            .replace(&self.provider.sign_in_url())
                            .await
                            .context("redirect to sign-in failed")?;
                    }
                    None => {}
                }
                rendered = current;
            }

            let event = tokio::select! {
                () = cancel.cancelled() => Event::TornDown,
                changed = state.changed() => Event::StateChanged { closed: changed.is_err() },
                settled = settle(&mut mounted) => Event::HandoffSettled(settled),
            };

            match event {
                Event::TornDown | Event::StateChanged { closed: true } => {
                    if let Some(handle) = mounted.take() {
                        handle.unmount();
                    }
                    return Ok(GateOutcome::TornDown);
                }
                Event::StateChanged { closed: false } => {}
                Event::HandoffSettled(settled) => {
                    mounted = None;
                    if let HandoffOutcome::Navigated(url) = settled? {
                        return Ok(GateOutcome::HandedOff(url));
                    }
                }
            }
        }
    }

    fn mount_handoff(&self) -> HandoffHandle {
        Handoff::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.storage),
            Arc::clone(&self.navigator),
            self.settings.clone(),
        )
        .mount()
    }
}

async fn settle(mounted: &mut Option<HandoffHandle>) -> Result<HandoffOutcome> {
    match mounted {
        Some(handle) => handle.finished().await,
        None => std::future::pending().await,
    }
}
