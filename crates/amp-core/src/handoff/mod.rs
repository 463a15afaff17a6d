//! Browser-side sign-in handoff.
//!
//! Once the identity provider reports a signed-in user, the gate mounts the
//! handoff, which packs the session identifiers and profile into an encoded
//! payload and navigates to the CLI's local callback with it:
//!
//! provider state → [`Gate`] → [`Handoff`] → `?p=<base64 json>` → navigation
//!
//! The provider, storage and navigation are injected through traits so the
//! same flow runs against a real browser bridge or in-process.

pub mod component;
pub mod gate;
pub mod navigator;
pub mod payload;
pub mod provider;
pub mod storage;

pub use component::{Handoff, HandoffHandle, HandoffOutcome, REDIRECTING_TEXT};
pub use gate::{Branch, Gate, GateOutcome, branch};
pub use navigator::{BrowserNavigator, HttpNavigator, Navigator};
pub use payload::{HandoffPayload, PAYLOAD_PARAM, callback_url, decode_param};
pub use provider::{AuthState, IdentityProvider, ProviderState, StaticProvider, UserState};
pub use storage::{BrowserStorage, MemoryStorage};
