use chrono::{DateTime, Local};

/// A line destined for one or more sessions.
///
/// User text is carried as data and only ever concatenated, never used
/// as a format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ordinary room chat, subject to mute filtering
    Chat { author: String, text: String },
    /// Server-generated room notice (join, leave, rename), never filtered
    System { text: String },
    /// Administrator announcement to every session
    Broadcast { text: String },
}

impl Message {
    pub fn chat(author: &str, text: &str) -> Self {
        Self::Chat {
            author: author.to_string(),
            text: text.to_string(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    pub fn broadcast(text: &str) -> Self {
        Self::Broadcast {
            text: text.to_string(),
        }
    }

    /// Author whose mute relations apply, if any
    pub fn author(&self) -> Option<&str> {
        match self {
            Self::Chat { author, .. } => Some(author),
            Self::System { .. } | Self::Broadcast { .. } => None,
        }
    }

    /// Render the wire line (without terminator)
    pub fn render(&self) -> String {
        match self {
            Self::Chat { author, text } => {
                let mut line = String::with_capacity(author.len() + text.len() + 2);
                line.push_str(author);
                line.push_str(": ");
                line.push_str(text);
                line
            }
            Self::System { text } => text.clone(),
            Self::Broadcast { text } => {
                let mut line = String::from("[broadcast] ");
                line.push_str(text);
                line
            }
        }
    }
}

/// Attribution line written to the recipient of a whisper or reply
pub fn whisper_line(from: &str, text: &str) -> String {
    let mut line = String::from("(");
    line.push_str(from);
    line.push_str(" whispers) ");
    line.push_str(text);
    line
}

/// Confirmation echoed back to the whisperer
pub fn whisper_echo_line(to: &str, text: &str) -> String {
    let mut line = String::from("(to ");
    line.push_str(to);
    line.push_str(") ");
    line.push_str(text);
    line
}

/// One retained line of room history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub author: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl HistoryEntry {
    pub fn new(author: Option<String>, text: String) -> Self {
        Self {
            author,
            text,
            timestamp: Local::now(),
        }
    }

    pub fn from_message(message: &Message) -> Self {
        match message {
            Message::Chat { author, text } => Self::new(Some(author.clone()), text.clone()),
            Message::System { text } | Message::Broadcast { text } => Self::new(None, text.clone()),
        }
    }

    pub fn render(&self) -> String {
        let stamp = self.timestamp.format("%H:%M:%S");
        match &self.author {
            Some(author) => format!("[{}] {}: {}", stamp, author, self.text),
            None => format!("[{}] {}", stamp, self.text),
        }
    }
}
