//! Server configuration module
//! Handles capacity limits and identity settings for the chat server

use crate::constants::{
    DEFAULT_ADMIN_NAME, DEFAULT_ADMIN_PASSWORD, DEFAULT_HISTORY_SIZE, DEFAULT_HOST,
    DEFAULT_MAX_BLOCKS, DEFAULT_MAX_MUTED, DEFAULT_MAX_ROOMS, DEFAULT_MAX_SESSIONS, DEFAULT_PORT,
    MAX_USER_NAME_LEN,
};
use crate::error::{ChatError, Result};
use std::env;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of concurrent session slots
    pub max_sessions: usize,
    /// Number of user-creatable rooms (the default room is not counted)
    pub max_rooms: usize,
    /// Lines retained per room history ring
    pub history_size: usize,
    /// Capacity of each session's mute list
    pub max_muted: usize,
    /// Capacity of the global block list
    pub max_blocks: usize,
    pub max_name_len: usize,
    /// Reserved display name that triggers the password challenge
    pub admin_name: String,
    pub admin_password: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_rooms: DEFAULT_MAX_ROOMS,
            history_size: DEFAULT_HISTORY_SIZE,
            max_muted: DEFAULT_MAX_MUTED,
            max_blocks: DEFAULT_MAX_BLOCKS,
            max_name_len: MAX_USER_NAME_LEN,
            admin_name: DEFAULT_ADMIN_NAME.to_string(),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            host: env::var("RUSTY_CHAT_HOST").unwrap_or(defaults.host),
            port: env_parse("RUSTY_CHAT_PORT", defaults.port),
            max_sessions: env_parse("RUSTY_CHAT_MAX_SESSIONS", defaults.max_sessions),
            max_rooms: env_parse("RUSTY_CHAT_MAX_ROOMS", defaults.max_rooms),
            history_size: env_parse("RUSTY_CHAT_HISTORY_SIZE", defaults.history_size),
            max_muted: env_parse("RUSTY_CHAT_MAX_MUTED", defaults.max_muted),
            max_blocks: env_parse("RUSTY_CHAT_MAX_BLOCKS", defaults.max_blocks),
            max_name_len: defaults.max_name_len,
            admin_name: env::var("RUSTY_CHAT_ADMIN_NAME").unwrap_or(defaults.admin_name),
            admin_password: env::var("RUSTY_CHAT_ADMIN_PASSWORD")
                .unwrap_or(defaults.admin_password),
        };

        config.validate()?;
        Ok(config)
    }

    /// Override the listen port from the single positional startup argument
    pub fn apply_port_arg(&mut self, arg: &str) -> Result<()> {
        self.port = arg
            .parse()
            .map_err(|_| ChatError::ConfigError(format!("Invalid port number: {}", arg)))?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("max_sessions", self.max_sessions),
            ("max_rooms", self.max_rooms),
            ("history_size", self.history_size),
            ("max_muted", self.max_muted),
            ("max_blocks", self.max_blocks),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(ChatError::ConfigError(format!("{} must be at least 1", field)));
            }
        }

        if self.admin_password.is_empty() {
            return Err(ChatError::ConfigError(
                "admin password must not be empty".to_string(),
            ));
        }

        let admin_name_ok = !self.admin_name.is_empty()
            && self.admin_name.len() <= self.max_name_len
            && self.admin_name.chars().all(|c| c.is_ascii_alphanumeric());
        if !admin_name_ok {
            return Err(ChatError::ConfigError(format!(
                "admin name '{}' is not a valid username",
                self.admin_name
            )));
        }

        Ok(())
    }
}
