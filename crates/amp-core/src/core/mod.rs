//! Core module: runtime plumbing shared by the CLI commands.
//!
//! This module contains:
//! - `interrupt`: Ctrl+C handling for long waits (login callback)

pub mod interrupt;
