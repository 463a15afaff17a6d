//! Auth command handlers.

use std::time::Duration;

use amp_core::config::Config;
use amp_core::core::interrupt;
use amp_core::handoff::{BrowserNavigator, Navigator};
use amp_core::login::{CallbackServer, ClerkClient, LoginFlow, SessionStore};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Gives the callback server a moment before the browser hits it.
const BROWSER_OPEN_DELAY: Duration = Duration::from_secs(1);

fn login_flow(config: &Config) -> LoginFlow {
    LoginFlow::new(
        SessionStore::for_config(config),
        ClerkClient::from_config(config),
    )
}

pub async fn login(config: &Config) -> Result<()> {
    let flow = login_flow(config);

    let existing = flow.verify_existing().await.with_context(|| {
        format!(
            "verify saved session in {} (run `amp logout` to start over)",
            flow.store().path().display()
        )
    })?;
    if let Some(summary) = existing {
        println!("You're already logged in as {}", summary.email);
        return Ok(());
    }

    let server = CallbackServer::bind(config.callback.port, config.login_url.clone()).await?;
    let start_url = server.start_url()?;

    println!("To log in to Ampersand:");
    println!();
    println!("  1. A browser window will open (or visit the URL below)");
    println!("  2. Sign in to your Ampersand account");
    println!("  3. Return here once the page says you're logged in");
    println!();
    println!("  {start_url}");
    println!();

    tokio::spawn(async move {
        tokio::time::sleep(BROWSER_OPEN_DELAY).await;
        if let Err(err) = BrowserNavigator::from_env().replace(&start_url).await {
            warn!("could not open browser: {err:#}");
        }
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        interrupt::wait_for_interrupt().await;
        on_interrupt.cancel();
    });

    let summary = server
        .serve(&flow, cancel, config.callback.timeout())
        .await?;

    println!("Successfully logged in as {}", summary.email);
    println!("  Session saved to: {}", flow.store().path().display());
    Ok(())
}

pub fn logout(config: &Config) -> Result<()> {
    let store = SessionStore::for_config(config);
    if store.clear()? {
        println!("logout successful");
    } else {
        println!("You're already logged out");
    }
    Ok(())
}

pub async fn request_token(config: &Config) -> Result<()> {
    let jwt = login_flow(config).request_token().await?;
    println!("{jwt}");
    Ok(())
}
