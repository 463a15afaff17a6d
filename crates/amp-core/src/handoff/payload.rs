//! Handoff payload and its `?p=` wire form (JSON, then standard base64).

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query parameter carrying the encoded payload.
pub const PAYLOAD_PARAM: &str = "p";

/// Identity bundle sent from the signed-in browser to the local callback.
///
/// Field order is the serialized order: `userId`, `sessionId`, `token`, `user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffPayload {
    pub user_id: String,
    pub session_id: String,
    /// Opaque session token forwarded to the CLI.
    pub token: String,
    /// Opaque profile object as reported by the identity provider.
    pub user: Value,
}

impl HandoffPayload {
    /// Serializes to JSON and encodes as base64.
    ///
    /// # Errors
    /// Returns an error if the profile cannot be serialized.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self).context("serialize handoff payload")?;
        Ok(STANDARD.encode(json))
    }

    /// Inverse of [`HandoffPayload::encode`].
    ///
    /// # Errors
    /// Returns an error if the value is not base64 or not a payload object.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = decode_param(encoded)?;
        serde_json::from_slice(&bytes).context("parse handoff payload")
    }
}

/// Builds the navigation target: `base` plus `?p=<encoded>`, verbatim.
pub fn callback_url(base: &str, encoded: &str) -> String {
    format!("{base}?{PAYLOAD_PARAM}={encoded}")
}

/// Decodes a `p` value as received by the callback server.
///
/// The payload is appended to the URL without escaping, so form decoding on the
/// receiving end turns `+` into a space. Base64 never contains spaces, which
/// makes the reverse mapping lossless.
///
/// # Errors
/// Returns an error if the value is not valid base64.
pub fn decode_param(value: &str) -> Result<Vec<u8>> {
    let restored = value.replace(' ', "+");
    STANDARD
        .decode(restored.trim_matches(['\r', '\n', '\t']))
        .context("payload is not valid base64")
}
