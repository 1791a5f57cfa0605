//! Storage mechanisms for retaining recent room messages

pub mod message_store;

// Re-export the message store
pub use message_store::{MessageStore, SharedMessageStore};
