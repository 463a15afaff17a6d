//! Page navigation seam.
//!
//! Navigation replaces the current location; there is no history entry and no
//! response handling on the bridge side.

use std::future::Future;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, info};

/// Env var that disables opening the system browser.
pub const NO_BROWSER_ENV: &str = "AMP_NO_BROWSER";

pub trait Navigator: Send + Sync + 'static {
    /// Replaces the current location with `url`.
    fn replace(&self, url: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Hands the URL to the system browser.
#[derive(Debug, Clone)]
pub struct BrowserNavigator {
    open_browser: bool,
}

impl BrowserNavigator {
    pub fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }

    /// Opens the browser unless `AMP_NO_BROWSER` is set.
    pub fn from_env() -> Self {
        Self::new(std::env::var(NO_BROWSER_ENV).is_err())
    }
}

impl Navigator for BrowserNavigator {
    fn replace(&self, url: &str) -> impl Future<Output = Result<()>> + Send {
        let open_browser = self.open_browser;
        let url = url.to_string();
        async move {
            if open_browser {
                open::that_detached(&url)
                    .with_context(|| format!("open browser at {}", strip_query(&url)))?;
            } else {
                info!(target = %strip_query(&url), "browser disabled, skipping navigation");
            }
            Ok(())
        }
    }
}

/// Follows the URL with a plain GET, standing in for a browser.
#[derive(Debug, Default)]
pub struct HttpNavigator {
    client: reqwest::Client,
    last_response: Mutex<Option<(u16, String)>>,
}

impl HttpNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status and body of the most recent navigation.
    pub fn last_response(&self) -> Option<(u16, String)> {
        self.last_response
            .lock()
            .ok()
            .and_then(|response| response.clone())
    }
}

impl Navigator for HttpNavigator {
    fn replace(&self, url: &str) -> impl Future<Output = Result<()>> + Send {
        let request = self.client.get(url);
        let target = strip_query(url).to_string();
        async move {
            let response = request
                .send()
                .await
                .with_context(|| format!("navigate to {target}"))?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(%target, status = status.as_u16(), "navigation completed");

            if let Ok(mut last) = self.last_response.lock() {
                *last = Some((status.as_u16(), body.clone()));
            }

            if !status.is_success() {
                anyhow::bail!("Navigation to {target} failed (HTTP {status}): {body}");
            }
            Ok(())
        }
    }
}

/// Drops the query so payloads and tokens stay out of logs.
pub fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
