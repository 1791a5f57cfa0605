// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3456;

// Capacity defaults
pub const DEFAULT_MAX_SESSIONS: usize = 10;
pub const DEFAULT_MAX_ROOMS: usize = 5;
pub const DEFAULT_HISTORY_SIZE: usize = 50;
pub const DEFAULT_MAX_MUTED: usize = DEFAULT_MAX_SESSIONS;
pub const DEFAULT_MAX_BLOCKS: usize = 16;
pub const MAX_USER_NAME_LEN: usize = 32;
pub const MAX_ROOM_NAME_LEN: usize = 32;

// Line protocol
pub const MAX_LINE: usize = 1024;
pub const MAX_ARGS: usize = 16;
pub const CMD_SIG: char = '/';

// Identity
pub const DEFAULT_ROOM_NAME: &str = "lobby";
pub const DEFAULT_ADMIN_NAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "chatadmin";

// Fixed protocol lines
pub const USERNAME_PROMPT: &str = "Enter username: ";
pub const PASSWORD_PROMPT: &str = "Enter password: ";
pub const BUSY_MESSAGE: &str = "Could not connect to chat server, all circuits busy.";
pub const BLOCKED_MESSAGE: &str = "You are blocked from this server.";
