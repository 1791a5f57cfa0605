//! Connection handlers for the line protocol

pub mod connection;

// Re-export the connection driver
pub use connection::{handle_client, serve};
