use std::error::Error;
use std::fmt;
use std::io;
use std::sync::PoisonError;

/// Broad failure categories, used to decide how an error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CapacityExceeded,
    ValidationFailed,
    NotFound,
    PermissionDenied,
    ConnectionLost,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    // Capacity errors
    SessionsFull,
    RoomsFull,
    MuteListFull,
    BlockListFull,

    // Validation errors
    InvalidName(String),
    InvalidRoomName(String),
    DuplicateRoomName(String),
    ValidationError(String),

    // Lookup errors
    SessionNotFound,
    NotLoggedIn(String),
    RoomNotFound(String),
    NotInRoom,
    BlockNotFound(u32),
    NoPriorWhisper,

    // Moderation outcomes
    SelfTalk,
    SelfMute,
    Muted(String),
    AdminImmune(String),
    AlreadyMuted(String),
    NotMuted(String),

    // Permission errors
    NotAdmin,
    PermissionDenied(String),

    // Connection errors
    ConnectionClosed,
    Io(String),

    // System errors
    SessionLock(String),
    ConfigError(String),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionsFull | Self::RoomsFull | Self::MuteListFull | Self::BlockListFull => {
                ErrorKind::CapacityExceeded
            }
            Self::InvalidName(_)
            | Self::InvalidRoomName(_)
            | Self::DuplicateRoomName(_)
            | Self::ValidationError(_)
            | Self::SelfTalk
            | Self::SelfMute
            | Self::AdminImmune(_)
            | Self::AlreadyMuted(_)
            | Self::Muted(_) => ErrorKind::ValidationFailed,
            Self::SessionNotFound
            | Self::NotLoggedIn(_)
            | Self::RoomNotFound(_)
            | Self::NotInRoom
            | Self::BlockNotFound(_)
            | Self::NoPriorWhisper
            | Self::NotMuted(_) => ErrorKind::NotFound,
            Self::NotAdmin | Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::ConnectionClosed | Self::Io(_) => ErrorKind::ConnectionLost,
            Self::SessionLock(_) | Self::ConfigError(_) => ErrorKind::Fatal,
        }
    }

    /// True when the peer can no longer be written to.
    pub fn is_connection_lost(&self) -> bool {
        self.kind() == ErrorKind::ConnectionLost
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionsFull => write!(f, "Server is full"),
            Self::RoomsFull => write!(f, "Cannot create chat room: maximum number of rooms reached"),
            Self::MuteListFull => write!(f, "Your mute list is full"),
            Self::BlockListFull => write!(f, "The block list is full"),
            Self::InvalidName(reason) => write!(f, "Invalid username: {}", reason),
            Self::InvalidRoomName(reason) => write!(f, "Invalid chat room name: {}", reason),
            Self::DuplicateRoomName(name) => write!(f, "Chat room {} already exists", name),
            Self::ValidationError(msg) => write!(f, "{}", msg),
            Self::SessionNotFound => write!(f, "Session no longer exists"),
            Self::NotLoggedIn(name) => write!(f, "User {} is not logged in", name),
            Self::RoomNotFound(name) => write!(f, "Chat room {} does not exist", name),
            Self::NotInRoom => write!(f, "You are not in a chat room"),
            Self::BlockNotFound(id) => write!(f, "No block entry with id {}", id),
            Self::NoPriorWhisper => write!(f, "Nobody has whispered to you yet"),
            Self::SelfTalk => write!(f, "You cannot whisper to yourself"),
            Self::SelfMute => write!(f, "You cannot mute yourself"),
            Self::Muted(name) => write!(f, "Cannot whisper {}: one of you has muted the other", name),
            Self::AdminImmune(name) => write!(f, "{} cannot be muted", name),
            Self::AlreadyMuted(name) => write!(f, "{} is already muted", name),
            Self::NotMuted(name) => write!(f, "{} is not muted", name),
            Self::NotAdmin => write!(f, "Permission denied: administrator only"),
            Self::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            Self::ConnectionClosed => write!(f, "Connection closed unexpectedly"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::SessionLock(msg) => write!(f, "Session lock error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for ChatError {}

// Converting from PoisonError to facilitate poisoned mutex handling
impl<T> From<PoisonError<T>> for ChatError {
    fn from(err: PoisonError<T>) -> Self {
        ChatError::SessionLock(format!("Mutex poisoned: {}", err))
    }
}

impl From<io::Error> for ChatError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => ChatError::ConnectionClosed,
            _ => ChatError::Io(err.to_string()),
        }
    }
}

// Generic result type for the chat server
pub type Result<T> = std::result::Result<T, ChatError>;
