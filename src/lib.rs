//! Rusty Chat - A multi-room line-oriented chat server implemented in Rust
//!
//! This library provides the session and room registries, message delivery,
//! moderation and command handling behind a plain TCP text protocol.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod security;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
pub use error::{ChatError, ErrorKind, Result};
