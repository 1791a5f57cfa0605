//! Core functionality for the chat server

pub mod commands;
pub mod connection;
pub mod delivery;
pub mod message;
pub mod moderation;
pub mod room;
pub mod server;
pub mod session;

// Re-export main components for convenience
pub use connection::Connection;
pub use delivery::Delivery;
pub use message::{HistoryEntry, Message};
pub use moderation::{BlockEntry, BlockList, Moderation};
pub use room::{Room, RoomHandle, RoomManager};
pub use server::{ChatServer, LoginStep, SharedServer};
pub use session::{Session, SessionHandle, SessionManager, SessionPhase};
