//! Handoff command: drives the browser side of sign-in from the terminal.
//!
//! Useful against a locally running `amp login` when the sign-in web app is
//! not available.

use std::sync::Arc;

use amp_core::config::{Config, HandoffConfig};
use amp_core::core::interrupt::{self, InterruptedError};
use amp_core::handoff::navigator::strip_query;
use amp_core::handoff::{
    BrowserNavigator, Gate, GateOutcome, HttpNavigator, MemoryStorage, Navigator,
    REDIRECTING_TEXT, StaticProvider,
};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(clap::Args, Debug)]
pub struct HandoffArgs {
    /// Identity provider user id
    #[arg(long)]
    user_id: String,

    /// Identity provider session id
    #[arg(long)]
    session_id: String,

    /// Token placed in browser storage under the configured key
    #[arg(long, env = "AMP_HANDOFF_TOKEN")]
    stored_token: Option<String>,

    /// Token answered to the session token request
    #[arg(long, default_value = "local-session")]
    session_token: String,

    /// User profile as JSON
    #[arg(long, default_value = "{}")]
    user: String,

    /// Callback endpoint (default: handoff.callback_url from config)
    #[arg(long)]
    callback_url: Option<String>,

    /// Follow the callback over HTTP instead of opening a browser
    #[arg(long)]
    follow: bool,
}

pub async fn run(args: HandoffArgs, config: &Config) -> Result<()> {
    let user: serde_json::Value =
        serde_json::from_str(&args.user).context("parse --user as JSON")?;

    let mut settings = config.handoff.clone();
    if let Some(url) = args.callback_url {
        settings.callback_url = url;
    }

    let provider = StaticProvider::new(config.login_url.clone())
        .with_session_token(args.session_token);
    provider.sign_in(&args.user_id, &args.session_id, user);

    let storage = args
        .stored_token
        .map(|token| MemoryStorage::new().with_item(settings.storage_key.clone(), token))
        .unwrap_or_default();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        interrupt::wait_for_interrupt().await;
        on_interrupt.cancel();
    });

    println!("{REDIRECTING_TEXT}");

    if args.follow {
        let navigator = Arc::new(HttpNavigator::new());
        let outcome =
            run_gate(provider, storage, Arc::clone(&navigator), settings, cancel).await?;
        if let Some((status, body)) = navigator.last_response() {
            debug!(body = %body, "callback response");
            println!("Callback answered HTTP {status}");
        }
        report(&outcome)
    } else {
        let outcome = run_gate(
            provider,
            storage,
            Arc::new(BrowserNavigator::from_env()),
            settings,
            cancel,
        )
        .await?;
        report(&outcome)
    }
}

async fn run_gate<N: Navigator>(
    provider: StaticProvider,
    storage: MemoryStorage,
    navigator: Arc<N>,
    settings: HandoffConfig,
    cancel: CancellationToken,
) -> Result<GateOutcome> {
    Gate::new(Arc::new(provider), Arc::new(storage), navigator, settings)
        .run(cancel)
        .await
}

fn report(outcome: &GateOutcome) -> Result<()> {
    match outcome {
        GateOutcome::HandedOff(url) => {
            println!("Handed off to {}", strip_query(url));
            Ok(())
        }
        GateOutcome::TornDown => Err(InterruptedError.into()),
    }
}
