//! Core amp library (sign-in handoff, local login callback, config).

pub mod config;
pub mod core;
pub mod handoff;
pub mod logging;
pub mod login;
