//! CLI side of the sign-in handoff.
//!
//! `amp login` runs a [`CallbackServer`] on localhost. The handed-off payload
//! is verified with Clerk through [`LoginFlow`] and kept in a [`SessionStore`].

pub mod callback;
pub mod clerk;
pub mod flow;
pub mod page;
pub mod session;

pub use callback::{CallbackServer, DONE_PATH};
pub use clerk::{ClerkClient, decode_email};
pub use flow::{LoginFlow, LoginSummary};
pub use page::render_login_success;
pub use session::{LoginData, SessionStore, mask_token};
