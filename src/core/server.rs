//! Chat server service that coordinates sessions, rooms and moderation

use log::{debug, info, warn};
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::constants::{CMD_SIG, DEFAULT_ROOM_NAME};
use crate::core::commands::{
    dispatch, lookup, parse_command, CommandOutcome, Flow, ParsedCommand, Verb, ADMIN_COMMANDS,
    USER_COMMANDS,
};
use crate::core::connection::Connection;
use crate::core::delivery::Delivery;
use crate::core::message::Message;
use crate::core::moderation::{Moderation, DEFAULT_BLOCK_REASON};
use crate::core::room::{RoomHandle, RoomManager, Transfer};
use crate::core::session::{Session, SessionManager, SessionPhase};
use crate::error::{ChatError, Result};
use crate::security::{verify_secret, AuthTimer};

pub type SharedServer = Arc<ChatServer>;

/// Where a session stands after submitting a username
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    Admitted,
    PasswordRequired,
}

fn joined_line(name: &str, room: &str) -> String {
    let mut line = String::from(name);
    line.push_str(" joined the chat room ");
    line.push_str(room);
    line.push('.');
    line
}

fn left_line(name: &str, room: &str) -> String {
    let mut line = String::from(name);
    line.push_str(" left the chat room ");
    line.push_str(room);
    line.push('.');
    line
}

fn renamed_line(old: &str, new: &str) -> String {
    let mut line = String::from(old);
    line.push_str(" is now known as ");
    line.push_str(new);
    line.push('.');
    line
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// Owns all shared state of one chat server instance
pub struct ChatServer {
    config: ServerConfig,
    sessions: Arc<SessionManager>,
    rooms: Arc<RoomManager>,
    delivery: Delivery,
    moderation: Moderation,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.max_sessions,
            config.max_name_len,
            config.max_muted,
        ));
        let rooms = Arc::new(RoomManager::new(
            DEFAULT_ROOM_NAME,
            config.max_rooms,
            config.history_size,
        ));
        let delivery = Delivery::new(sessions.clone(), rooms.clone());
        let moderation = Moderation::new(
            sessions.clone(),
            rooms.clone(),
            config.max_blocks,
            &config.admin_name,
        );

        Self {
            config,
            sessions,
            rooms,
            delivery,
            moderation,
        }
    }

    pub fn shared(config: ServerConfig) -> SharedServer {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn moderation(&self) -> &Moderation {
        &self.moderation
    }

    pub fn is_blocked(&self, addr: IpAddr) -> Result<bool> {
        self.moderation.blocks().is_blocked(addr)
    }

    /// Give a new connection a session slot
    pub fn accept(&self, connection: Arc<Connection>) -> Result<Arc<Session>> {
        let addr = connection.addr;
        let session = self.sessions.allocate(connection)?;
        info!(
            "Client {} connected from {} ({} of {} slots in use)",
            session.id(),
            addr,
            self.sessions.used_slots()?,
            self.sessions.capacity()
        );
        Ok(session)
    }

    /// Claim `name` for a session still in the login exchange
    pub fn submit_name(&self, session: &Session, name: &str) -> Result<LoginStep> {
        self.sessions.claim_name(session.handle(), name)?;
        if self.moderation.is_admin_name(name) {
            session.set_phase(SessionPhase::AdminChallenge)?;
            return Ok(LoginStep::PasswordRequired);
        }
        Ok(LoginStep::Admitted)
    }

    /// Check the administrator password; failures are padded in time
    pub async fn submit_password(&self, session: &Session, password: &str) -> Result<bool> {
        let timer = AuthTimer::start();
        if verify_secret(password, &self.config.admin_password) {
            session.set_admin(true)?;
            info!("Administrator logged in from {}", session.addr());
            return Ok(true);
        }
        warn!("Failed administrator login from {}", session.addr());
        timer.wait().await;
        Ok(false)
    }

    /// Finish login: greet the session and place it in the default room
    pub async fn activate(&self, session: &Session) -> Result<()> {
        session.set_phase(SessionPhase::Active)?;
        let name = session.display_name();
        info!("Client {} logged in as {}", session.id(), name);

        let mut welcome = String::from("Welcome to the chat server, ");
        welcome.push_str(&name);
        welcome.push_str("! Type /help for a list of commands.");
        session.send_line(&welcome).await?;
        if session.is_admin()? {
            session
                .send_line("You are logged in as an administrator.")
                .await?;
        }

        let transfer = self.rooms.join(session, self.rooms.default_room())?;
        self.announce_transfer(&name, &transfer).await
    }

    /// Handle one inbound line from an active session
    pub async fn handle_line(&self, session: &Session, line: &str) -> Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }

        if let Some(command) = parse_command(line) {
            return dispatch(self, session, &command).await;
        }
        if line.starts_with(CMD_SIG) {
            session.send_line("Invalid command: (empty)").await?;
            session.send_line("Type /help for a list of commands.").await?;
            return Ok(Flow::Continue);
        }

        match self.chat(session, line).await {
            Ok(()) => Ok(Flow::Continue),
            Err(e) if e.is_connection_lost() => Err(e),
            Err(e) => {
                session.send_line(&e.to_string()).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn chat(&self, session: &Session, text: &str) -> Result<()> {
        let room = session.room()?.ok_or(ChatError::NotInRoom)?;
        let name = session.name()?.ok_or(ChatError::SessionNotFound)?;
        self.delivery
            .broadcast_room(room, &Message::chat(&name, text), Some(session))
            .await?;
        Ok(())
    }

    /// Leave the current room with an announcement and free the slot.
    /// Safe to call more than once; only the first call does anything.
    pub async fn disconnect(&self, session: &Session) -> Result<()> {
        if !session.begin_disconnect()? {
            return Ok(());
        }
        let name = session.display_name();

        match self.rooms.leave(session) {
            Ok((room, room_name)) => {
                let notice = Message::system(left_line(&name, &room_name));
                if let Err(e) = self.delivery.broadcast_room(room, &notice, None).await {
                    warn!("Failed to announce departure of {}: {}", name, e);
                }
            }
            Err(ChatError::NotInRoom) => {}
            Err(e) => warn!("Failed to remove {} from its room: {}", name, e),
        }

        let released = self.sessions.release(session.handle());
        session.connection().close().await;
        info!(
            "{} disconnected after {:?}",
            name,
            session.connection().connection_duration()
        );
        released.map(|_| ())
    }

    async fn announce_transfer(&self, name: &str, transfer: &Transfer) -> Result<()> {
        if let Some((room, room_name)) = &transfer.left {
            self.delivery
                .broadcast_room(*room, &Message::system(left_line(name, room_name)), None)
                .await?;
        }
        let (room, room_name) = &transfer.joined;
        self.delivery
            .broadcast_room(*room, &Message::system(joined_line(name, room_name)), None)
            .await?;
        Ok(())
    }

    async fn move_to(&self, session: &Session, target: RoomHandle) -> Result<()> {
        let transfer = self.rooms.join(session, target)?;
        let name = session.display_name();
        debug!("{} moved to {}", name, transfer.joined.1);
        self.announce_transfer(&name, &transfer).await
    }

    /// Run a command whose argument count has already been checked
    pub async fn execute(
        &self,
        verb: Verb,
        session: &Session,
        command: &ParsedCommand,
    ) -> Result<CommandOutcome> {
        match verb {
            Verb::Help => self.help(session, command.arg(0)).await,
            Verb::Logout => {
                session.send_line("Goodbye!").await?;
                Ok(CommandOutcome::Logout)
            }
            Verb::ListChatRooms => self.list_rooms(session).await,
            Verb::CreateChatRoom => self.create_room(session, command).await,
            Verb::JoinChatRoom => self.join_room(session, command).await,
            Verb::LeaveChatRoom => {
                self.move_to(session, self.rooms.default_room()).await?;
                Ok(CommandOutcome::Done)
            }
            Verb::WhereAmI => self.where_am_i(session).await,
            Verb::List => self.list_room_members(session).await,
            Verb::ListAll => self.list_all(session).await,
            Verb::Whisper => {
                let (Some(target), Some(text)) = (command.arg(0), command.text_from(1)) else {
                    return Ok(CommandOutcome::ShowUsage);
                };
                self.delivery.whisper(session, target, text).await?;
                Ok(CommandOutcome::Done)
            }
            Verb::Reply => {
                let Some(text) = command.text_from(0) else {
                    return Ok(CommandOutcome::ShowUsage);
                };
                self.delivery.reply(session, text).await?;
                Ok(CommandOutcome::Done)
            }
            Verb::Mute => self.mute(session, command.arg(0)).await,
            Verb::Unmute => self.unmute(session, command.arg(0)).await,
            Verb::History => self.history(session, command.arg(0)).await,
            Verb::ChangeUsername => self.change_username(session, command).await,
            Verb::Kick => self.kick(session, command).await,
            Verb::KickAll => self.kick_all(session, command).await,
            Verb::Block => self.block(session, command).await,
            Verb::Unblock => self.unblock(session, command).await,
            Verb::ListBlock => self.list_blocks(session).await,
            Verb::Broadcast => self.broadcast(session, command).await,
        }
    }

    async fn help(&self, session: &Session, topic: Option<&str>) -> Result<CommandOutcome> {
        let admin = session.is_admin()?;

        if let Some(topic) = topic {
            let topic = topic.trim_start_matches(CMD_SIG);
            return match lookup(topic) {
                Some((spec, admin_only)) if admin || !admin_only => {
                    session.send_line(&spec.usage_line()).await?;
                    session.send_line(&format!("  {}", spec.summary)).await?;
                    Ok(CommandOutcome::Done)
                }
                _ => Err(ChatError::ValidationError(format!(
                    "No help available for {}",
                    topic
                ))),
            };
        }

        let mut lines = vec!["Available commands:".to_string()];
        lines.extend(USER_COMMANDS.iter().map(|spec| spec.help_line()));
        if admin {
            lines.push("Administrator commands:".to_string());
            lines.extend(ADMIN_COMMANDS.iter().map(|spec| spec.help_line()));
        }
        for line in lines {
            session.send_line(&line).await?;
        }
        Ok(CommandOutcome::Done)
    }

    async fn list_rooms(&self, session: &Session) -> Result<CommandOutcome> {
        let current = session.room()?;
        let rooms = self.rooms.list_active()?;

        session.send_line("Chat rooms:").await?;
        for room in rooms {
            let marker = if Some(room.handle) == current { "*" } else { " " };
            let line = format!(
                " {}{} ({})",
                marker,
                room.name,
                plural(room.member_count, "user")
            );
            session.send_line(&line).await?;
        }
        Ok(CommandOutcome::Done)
    }

    async fn create_room(&self, session: &Session, command: &ParsedCommand) -> Result<CommandOutcome> {
        let Some(name) = command.arg(0) else {
            return Ok(CommandOutcome::ShowUsage);
        };
        self.rooms.create(name)?;
        info!("{} created chat room {}", session.display_name(), name);
        session
            .send_line(&format!("Chat room {} created.", name))
            .await?;
        Ok(CommandOutcome::Done)
    }

    async fn join_room(&self, session: &Session, command: &ParsedCommand) -> Result<CommandOutcome> {
        let Some(name) = command.arg(0) else {
            return Ok(CommandOutcome::ShowUsage);
        };
        let target = self
            .rooms
            .find_by_name(name)?
            .ok_or_else(|| ChatError::RoomNotFound(name.to_string()))?;
        self.move_to(session, target).await?;
        Ok(CommandOutcome::Done)
    }

    async fn where_am_i(&self, session: &Session) -> Result<CommandOutcome> {
        let room = session.room()?.ok_or(ChatError::NotInRoom)?;
        let name = self.rooms.name(room)?.ok_or(ChatError::NotInRoom)?;
        session
            .send_line(&format!("You are in chat room {}.", name))
            .await?;
        Ok(CommandOutcome::Done)
    }

    async fn list_room_members(&self, session: &Session) -> Result<CommandOutcome> {
        let room = session.room()?.ok_or(ChatError::NotInRoom)?;
        let room_name = self.rooms.name(room)?.ok_or(ChatError::NotInRoom)?;

        let mut names = Vec::new();
        for handle in self.rooms.members(room)? {
            if let Some(member) = self.sessions.get(handle)? {
                names.push(member.display_name());
            }
        }

        session
            .send_line(&format!("Users in {}:", room_name))
            .await?;
        for name in names {
            session.send_line(&format!("  {}", name)).await?;
        }
        Ok(CommandOutcome::Done)
    }

    async fn list_all(&self, session: &Session) -> Result<CommandOutcome> {
        let mut lines = Vec::new();
        for other in self.sessions.active_sessions()? {
            let room_name = match other.room()? {
                Some(room) => self.rooms.name(room)?.unwrap_or_default(),
                None => String::new(),
            };
            lines.push(format!("  {} ({})", other.display_name(), room_name));
        }

        session
            .send_line(&format!("Users online ({}):", lines.len()))
            .await?;
        for line in lines {
            session.send_line(&line).await?;
        }
        Ok(CommandOutcome::Done)
    }

    async fn mute(&self, session: &Session, target: Option<&str>) -> Result<CommandOutcome> {
        let Some(target) = target else {
            let muted = self.moderation.list_muted(session)?;
            if muted.is_empty() {
                session.send_line("You are not muting anyone.").await?;
            } else {
                session
                    .send_line(&format!("Muted users: {}", muted.join(", ")))
                    .await?;
            }
            return Ok(CommandOutcome::Done);
        };

        let name = self.moderation.mute(session, target)?;
        session
            .send_line(&format!("You have muted {}.", name))
            .await?;
        Ok(CommandOutcome::Done)
    }

    async fn unmute(&self, session: &Session, target: Option<&str>) -> Result<CommandOutcome> {
        let Some(target) = target else {
            let cleared = session.clear_mutes()?;
            session
                .send_line(&format!("Unmuted {}.", plural(cleared, "user")))
                .await?;
            return Ok(CommandOutcome::Done);
        };

        let name = self.moderation.unmute(session, target)?;
        session
            .send_line(&format!("You have unmuted {}.", name))
            .await?;
        Ok(CommandOutcome::Done)
    }

    async fn history(&self, session: &Session, limit: Option<&str>) -> Result<CommandOutcome> {
        let limit = match limit {
            None => None,
            Some(arg) => match arg.parse::<usize>() {
                Ok(n) if n > 0 => Some(n),
                _ => return Ok(CommandOutcome::ShowUsage),
            },
        };

        let room = session.room()?.ok_or(ChatError::NotInRoom)?;
        let room_name = self.rooms.name(room)?.ok_or(ChatError::NotInRoom)?;
        let store = self.rooms.history(room)?.ok_or(ChatError::NotInRoom)?;
        let lines: Vec<String> = {
            let store = store.lock()?;
            let entries = match limit {
                Some(n) => store.recent_messages(n),
                None => store.all_messages(),
            };
            entries.iter().map(|entry| entry.render()).collect()
        };

        if lines.is_empty() {
            session
                .send_line(&format!("No messages in chat room {}.", room_name))
                .await?;
            return Ok(CommandOutcome::Done);
        }
        session
            .send_line(&format!("History of {}:", room_name))
            .await?;
        for line in lines {
            session.send_line(&line).await?;
        }
        Ok(CommandOutcome::Done)
    }

    async fn change_username(&self, session: &Session, command: &ParsedCommand) -> Result<CommandOutcome> {
        let Some(new_name) = command.arg(0) else {
            return Ok(CommandOutcome::ShowUsage);
        };
        if session.is_admin()? {
            return Err(ChatError::PermissionDenied(
                "the administrator cannot change name".to_string(),
            ));
        }
        if self.moderation.is_admin_name(new_name) {
            return Err(ChatError::InvalidName(format!("{} is reserved", new_name)));
        }

        let old_name = self
            .sessions
            .claim_name(session.handle(), new_name)?
            .ok_or(ChatError::SessionNotFound)?;
        info!("{} is now known as {}", old_name, new_name);

        for other in self.sessions.active_sessions()? {
            other.rename_mute(&old_name, new_name)?;
        }

        match session.room()? {
            Some(room) => {
                let notice = Message::system(renamed_line(&old_name, new_name));
                self.delivery.broadcast_room(room, &notice, None).await?;
            }
            None => {
                session
                    .send_line(&renamed_line(&old_name, new_name))
                    .await?;
            }
        }
        Ok(CommandOutcome::Done)
    }

    async fn kick(&self, session: &Session, command: &ParsedCommand) -> Result<CommandOutcome> {
        let Some(target) = command.arg(0) else {
            return Ok(CommandOutcome::ShowUsage);
        };
        let name = self.moderation.kick(session, target).await?;
        session.send_line(&format!("Kicked {}.", name)).await?;
        Ok(CommandOutcome::Done)
    }

    async fn kick_all(&self, session: &Session, command: &ParsedCommand) -> Result<CommandOutcome> {
        let Some(room) = command.arg(0) else {
            return Ok(CommandOutcome::ShowUsage);
        };
        let kicked = self.moderation.kick_room(session, room).await?;
        session
            .send_line(&format!(
                "Kicked {} from {}.",
                plural(kicked.len(), "user"),
                room
            ))
            .await?;
        Ok(CommandOutcome::Done)
    }

    async fn block(&self, session: &Session, command: &ParsedCommand) -> Result<CommandOutcome> {
        let Some(target) = command.arg(0) else {
            return Ok(CommandOutcome::ShowUsage);
        };
        let reason = command.text_from(1).unwrap_or(DEFAULT_BLOCK_REASON);
        let entry = self.moderation.block(session, target, reason).await?;
        session
            .send_line(&format!(
                "Blocked {} ({}) with id {}.",
                entry.name, entry.addr, entry.id
            ))
            .await?;
        Ok(CommandOutcome::Done)
    }

    async fn unblock(&self, session: &Session, command: &ParsedCommand) -> Result<CommandOutcome> {
        let Some(id) = command.arg(0).and_then(|arg| arg.parse::<u32>().ok()) else {
            return Ok(CommandOutcome::ShowUsage);
        };
        let entry = self.moderation.unblock(session, id)?;
        session
            .send_line(&format!("Unblocked {} ({}).", entry.name, entry.addr))
            .await?;
        Ok(CommandOutcome::Done)
    }

    async fn list_blocks(&self, session: &Session) -> Result<CommandOutcome> {
        let entries = self.moderation.list_blocks(session)?;
        if entries.is_empty() {
            session.send_line("No active blocks.").await?;
            return Ok(CommandOutcome::Done);
        }
        session.send_line("Active blocks:").await?;
        for entry in entries {
            session.send_line(&entry.render()).await?;
        }
        Ok(CommandOutcome::Done)
    }

    async fn broadcast(&self, session: &Session, command: &ParsedCommand) -> Result<CommandOutcome> {
        if !session.is_admin()? {
            return Err(ChatError::NotAdmin);
        }
        let Some(text) = command.text_from(0) else {
            return Ok(CommandOutcome::ShowUsage);
        };
        let reached = self.delivery.broadcast_all(&Message::broadcast(text)).await?;
        info!(
            "{} broadcast to {}",
            session.display_name(),
            plural(reached, "session")
        );
        Ok(CommandOutcome::Done)
    }
}
