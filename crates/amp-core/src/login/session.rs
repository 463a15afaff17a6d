//! Session file storage.
//!
//! The handed-off payload is stored as-is (pretty-printed JSON) in
//! `<AMP_HOME>/jwt.json` (or `jwt-<stage>.json`) with restricted permissions
//! (0600). Tokens are never logged or displayed in full.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{Config, paths};

/// Fields the CLI needs from a stored or handed-off payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user_id: String,
    pub session_id: String,
    pub token: String,
    /// Cookies replayed to the identity provider when verifying the session.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
}

impl LoginData {
    /// # Errors
    /// Returns an error if `bytes` is not a login payload.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse login payload")
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for the configured stage under the amp home directory.
    pub fn for_config(config: &Config) -> Self {
        Self::new(paths::amp_home().join(config.session_file_name()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a session file is present.
    ///
    /// # Errors
    /// Returns an error if the path cannot be inspected.
    pub fn has_session(&self) -> Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(!meta.is_dir()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to inspect {}", self.path.display())),
        }
    }

    /// Raw file contents, or `None` when there is no session.
    ///
    /// # Errors
    /// Returns an error if the path is a directory or unreadable.
    pub fn load_raw(&self) -> Result<Option<Vec<u8>>> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_dir() => {
                anyhow::bail!("Session path isn't a regular file: {}", self.path.display())
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to inspect {}", self.path.display()));
            }
        }

        fs::read(&self.path)
            .map(Some)
            .with_context(|| format!("Failed to read session from {}", self.path.display()))
    }

    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<LoginData>> {
        self.load_raw()?
            .map(|bytes| {
                LoginData::from_json(&bytes)
                    .with_context(|| format!("Invalid session file {}", self.path.display()))
            })
            .transpose()
    }

    /// Saves the handed-off payload, pretty-printed, with restricted permissions (0600).
    ///
    /// # Errors
    /// Returns an error if the payload is not JSON or the file cannot be written.
    pub fn save(&self, payload: &[u8]) -> Result<()> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).context("Failed to parse login payload")?;
        let contents =
            serde_json::to_string_pretty(&value).context("Failed to serialize session")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .with_context(|| format!("Failed to open {} for writing", self.path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        #[cfg(not(unix))]
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)
                .with_context(|| format!("Failed to open {} for writing", self.path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        Ok(())
    }

    /// Removes the session file. Returns whether one existed.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to remove {}", self.path.display()))
            }
        }
    }
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 || !token.is_char_boundary(12) {
        return "***".to_string();
    }
    format!("{}...", &token[..12])
}
