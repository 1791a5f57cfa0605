//! Slash-command tables, tokenizer and dispatcher

use log::debug;

use crate::constants::{CMD_SIG, MAX_ARGS};
use crate::core::server::ChatServer;
use crate::core::session::Session;
use crate::error::{ChatError, Result};

/// Every command the server understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Help,
    Logout,
    ListChatRooms,
    CreateChatRoom,
    JoinChatRoom,
    LeaveChatRoom,
    WhereAmI,
    List,
    ListAll,
    Whisper,
    Reply,
    Mute,
    Unmute,
    History,
    ChangeUsername,
    Kick,
    KickAll,
    Block,
    Unblock,
    ListBlock,
    Broadcast,
}

/// One row of a command table
#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub verb: Verb,
    pub usage: &'static str,
    pub summary: &'static str,
    /// Fewest arguments accepted before the usage line is shown
    pub min_args: usize,
    /// Most arguments accepted, `None` when the tail is free text
    pub max_args: Option<usize>,
}

impl CommandSpec {
    pub fn usage_line(&self) -> String {
        if self.usage.is_empty() {
            format!("Usage: /{}", self.name)
        } else {
            format!("Usage: /{} {}", self.name, self.usage)
        }
    }

    pub fn help_line(&self) -> String {
        if self.usage.is_empty() {
            format!("  /{} - {}", self.name, self.summary)
        } else {
            format!("  /{} {} - {}", self.name, self.usage, self.summary)
        }
    }

    fn accepts(&self, argc: usize) -> bool {
        argc >= self.min_args && self.max_args.map_or(true, |max| argc <= max)
    }
}

const fn spec(
    name: &'static str,
    verb: Verb,
    usage: &'static str,
    summary: &'static str,
    min_args: usize,
    max_args: Option<usize>,
) -> CommandSpec {
    CommandSpec {
        name,
        verb,
        usage,
        summary,
        min_args,
        max_args,
    }
}

pub static USER_COMMANDS: &[CommandSpec] = &[
    spec("help", Verb::Help, "[command]", "show commands or help for one command", 0, Some(1)),
    spec("logout", Verb::Logout, "", "leave the chat server", 0, Some(0)),
    spec("listchatrooms", Verb::ListChatRooms, "", "list chat rooms", 0, Some(0)),
    spec("createchatroom", Verb::CreateChatRoom, "<name>", "create a chat room", 1, Some(1)),
    spec("joinchatroom", Verb::JoinChatRoom, "<name>", "move to a chat room", 1, Some(1)),
    spec("leavechatroom", Verb::LeaveChatRoom, "", "return to the lobby", 0, Some(0)),
    spec("whereami", Verb::WhereAmI, "", "show your current chat room", 0, Some(0)),
    spec("list", Verb::List, "", "list users in your chat room", 0, Some(0)),
    spec("listall", Verb::ListAll, "", "list every user on the server", 0, Some(0)),
    spec("whisper", Verb::Whisper, "<user> <message>", "send a private message", 2, None),
    spec("reply", Verb::Reply, "<message>", "answer the last whisper", 1, None),
    spec("mute", Verb::Mute, "[user]", "ignore a user, or list muted users", 0, Some(1)),
    spec("unmute", Verb::Unmute, "[user]", "stop ignoring a user, or everyone", 0, Some(1)),
    spec("history", Verb::History, "[lines]", "show recent messages in your chat room", 0, Some(1)),
    spec("changeusername", Verb::ChangeUsername, "<name>", "change your username", 1, Some(1)),
];

pub static ADMIN_COMMANDS: &[CommandSpec] = &[
    spec("kick", Verb::Kick, "<user>", "disconnect a user", 1, Some(1)),
    spec("kickall", Verb::KickAll, "<room>", "disconnect everyone in a chat room", 1, Some(1)),
    spec("block", Verb::Block, "<user> [reason]", "ban a user's address", 1, None),
    spec("unblock", Verb::Unblock, "<id>", "lift a block", 1, Some(1)),
    spec("listblock", Verb::ListBlock, "", "list active blocks", 0, Some(0)),
    spec("broadcast", Verb::Broadcast, "<message>", "message every user", 1, None),
];

/// Look up a verb; the flag is true for administrator commands
pub fn lookup(name: &str) -> Option<(&'static CommandSpec, bool)> {
    let find = |table: &'static [CommandSpec]| {
        table
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
    };
    find(USER_COMMANDS)
        .map(|spec| (spec, false))
        .or_else(|| find(ADMIN_COMMANDS).map(|spec| (spec, true)))
}

/// A tokenized slash-command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub verb: String,
    pub args: Vec<String>,
    /// Byte offset in `raw` at which each argument starts
    offsets: Vec<usize>,
    raw: String,
}

impl ParsedCommand {
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Everything from argument `index` onwards, spacing preserved
    pub fn text_from(&self, index: usize) -> Option<&str> {
        self.offsets
            .get(index)
            .map(|&start| self.raw[start..].trim_end())
    }
}

/// Split a `/verb arg...` line. Returns `None` for ordinary chat.
pub fn parse_command(line: &str) -> Option<ParsedCommand> {
    let body = line.strip_prefix(CMD_SIG)?;

    let mut tokens = Vec::new();
    let mut start = None;
    for (index, c) in body.char_indices() {
        match (c.is_whitespace(), start) {
            (false, None) => start = Some(index),
            (true, Some(s)) => {
                tokens.push((s, index));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push((s, body.len()));
    }

    let (&(verb_start, verb_end), rest) = tokens.split_first()?;
    let rest = &rest[..rest.len().min(MAX_ARGS)];
    Some(ParsedCommand {
        verb: body[verb_start..verb_end].to_string(),
        args: rest.iter().map(|&(s, e)| body[s..e].to_string()).collect(),
        offsets: rest.iter().map(|&(s, _)| s).collect(),
        raw: body.to_string(),
    })
}

/// What a handler asks the dispatcher to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Done,
    ShowUsage,
    Logout,
}

/// Whether the session's read loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Logout,
}

/// Run one parsed command for `session`.
///
/// Usage text and recoverable errors are written back to the caller here,
/// so handlers only report outcomes. Only a lost connection propagates.
pub async fn dispatch(server: &ChatServer, session: &Session, command: &ParsedCommand) -> Result<Flow> {
    let Some((spec, admin_only)) = lookup(&command.verb) else {
        session
            .send_line(&format!("Invalid command: {}", command.verb))
            .await?;
        session.send_line("Type /help for a list of commands.").await?;
        return Ok(Flow::Continue);
    };

    debug!("{} issued /{} ({} args)", session.display_name(), spec.name, command.argc());

    if admin_only && !session.is_admin()? {
        let err = ChatError::PermissionDenied(format!("/{} is an administrator command", spec.name));
        session.send_line(&err.to_string()).await?;
        return Ok(Flow::Continue);
    }

    let outcome = if spec.accepts(command.argc()) {
        server.execute(spec.verb, session, command).await
    } else {
        Ok(CommandOutcome::ShowUsage)
    };

    match outcome {
        Ok(CommandOutcome::Done) => Ok(Flow::Continue),
        Ok(CommandOutcome::Logout) => Ok(Flow::Logout),
        Ok(CommandOutcome::ShowUsage) => {
            session.send_line(&spec.usage_line()).await?;
            Ok(Flow::Continue)
        }
        Err(e) if e.is_connection_lost() => Err(e),
        Err(e) => {
            session.send_line(&e.to_string()).await?;
            Ok(Flow::Continue)
        }
    }
}
