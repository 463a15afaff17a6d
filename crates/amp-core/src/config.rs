//! Configuration management for amp.
//!
//! Loads configuration from ${AMP_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Env var that replaces the configured Clerk root URL.
pub const CLERK_URL_OVERRIDE_ENV: &str = "AMP_CLERK_URL_OVERRIDE";

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for amp configuration and session files.
    //!
    //! AMP_HOME resolution order:
    //! 1. AMP_HOME environment variable (if set)
    //! 2. ~/.config/amp (default)

    use std::path::PathBuf;

    /// Returns the amp home directory.
    ///
    /// Checks AMP_HOME env var first, falls back to ~/.config/amp
    pub fn amp_home() -> PathBuf {
        if let Ok(home) = std::env::var("AMP_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .unwrap_or_default()
            .join(".config")
            .join("amp")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        amp_home().join("config.toml")
    }
}

/// Which token value the handoff forwards in its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// The token stored by the identity provider SDK in browser storage.
    #[default]
    Storage,
    /// The session token returned by the provider's token request.
    Session,
}

/// Local login callback server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub port: u16,
    pub timeout_secs: u64,
}

impl CallbackConfig {
    pub const DEFAULT_PORT: u16 = 3535;
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Origin presented to the identity provider for this callback server.
    pub fn origin(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Browser-side handoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Endpoint the browser is sent to; the payload goes in `?p=`.
    pub callback_url: String,
    pub delay_ms: u64,
    pub storage_key: String,
    pub token_source: TokenSource,
}

impl HandoffConfig {
    pub const DEFAULT_CALLBACK_URL: &'static str = "http://localhost:3535/done";
    pub const DEFAULT_DELAY_MS: u64 = 1000;
    pub const DEFAULT_STORAGE_KEY: &'static str = "clerk-db-jwt";

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            callback_url: Self::DEFAULT_CALLBACK_URL.to_string(),
            delay_ms: Self::DEFAULT_DELAY_MS,
            storage_key: Self::DEFAULT_STORAGE_KEY.to_string(),
            token_source: TokenSource::default(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment stage ("prod", "dev", ...)
    pub stage: String,
    /// Clerk Frontend API root
    pub clerk_root_url: String,
    /// Sign-in web app that `/` on the callback server redirects to
    pub login_url: String,
    pub callback: CallbackConfig,
    pub handoff: HandoffConfig,
}

impl Config {
    pub const DEFAULT_STAGE: &'static str = "dev";
    pub const DEFAULT_CLERK_ROOT_URL: &'static str =
        "https://welcomed-snapper-45.clerk.accounts.dev";
    pub const DEFAULT_LOGIN_URL: &'static str = "https://ampersand-cli-auth-dev.web.app";

    /// Loads the config from the default path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads the config from a specific path, returning defaults when missing.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Writes the commented default template to `path`.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Clerk root URL, honouring `AMP_CLERK_URL_OVERRIDE`.
    pub fn clerk_root_url(&self) -> String {
        std::env::var(CLERK_URL_OVERRIDE_ENV).unwrap_or_else(|_| self.clerk_root_url.clone())
    }

    pub fn is_prod(&self) -> bool {
        self.stage == "prod"
    }

    /// Name of the session file for the configured stage.
    pub fn session_file_name(&self) -> String {
        if self.is_prod() {
            "jwt.json".to_string()
        } else {
            format!("jwt-{}.json", self.stage)
        }
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stage: Self::DEFAULT_STAGE.to_string(),
            clerk_root_url: Self::DEFAULT_CLERK_ROOT_URL.to_string(),
            login_url: Self::DEFAULT_LOGIN_URL.to_string(),
            callback: CallbackConfig::default(),
            handoff: HandoffConfig::default(),
        }
    }
}
