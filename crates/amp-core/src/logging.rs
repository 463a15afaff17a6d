//! Tracing setup for the amp binary.
//!
//! Filter comes from `AMP_LOG` when set. With `AMP_LOG_DIR` set, events go to
//! `<dir>/amp.log` instead of stderr so they don't mix with command output.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub const LOG_ENV: &str = "AMP_LOG";
pub const LOG_DIR_ENV: &str = "AMP_LOG_DIR";
const LOG_FILE: &str = "amp.log";

fn default_directives(debug: bool) -> &'static str {
    if debug {
        "amp=debug,amp_core=debug,warn"
    } else {
        "amp=info,amp_core=info,warn"
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directives(debug)))
}

/// Installs the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init(debug: bool) {
    if let Some(log_dir) = std::env::var(LOG_DIR_ENV).ok().map(PathBuf::from)
        && std::fs::create_dir_all(&log_dir).is_ok()
    {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(tracing_appender::rolling::never(&log_dir, LOG_FILE))
            .with_ansi(false)
            .with_target(true);

        if tracing_subscriber::registry()
            .with(env_filter(debug))
            .with(file_layer)
            .try_init()
            .is_ok()
        {
            tracing::debug!(path = %log_dir.join(LOG_FILE).display(), "file logging initialized");
        }
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
