//! Persistent interpreter sessions behind a small HTTP API.
//!
//! Each session owns a long-lived interactive interpreter (python3 by default). Code sent
//! to a session runs in that process, so variables and imports survive between calls.

pub mod api;
pub mod config;
pub mod interpreter;
pub mod session;
