//! Message fan-out to rooms, to every session, and between two sessions.
//!
//! Recipients are resolved from a membership snapshot taken under the room
//! table lock; the lock is released before any socket is touched. Each
//! write then holds only the destination's own output lock.

use futures_util::future::join_all;
use log::{debug, warn};
use std::sync::Arc;

use crate::core::message::{whisper_echo_line, whisper_line, HistoryEntry, Message};
use crate::core::room::{RoomHandle, RoomManager};
use crate::core::session::{Session, SessionManager};
use crate::error::{ChatError, Result};

/// True when either side mutes the other
pub fn mutually_muted(a: &Session, b: &Session) -> Result<bool> {
    let (Some(a_name), Some(b_name)) = (a.name()?, b.name()?) else {
        return Ok(false);
    };
    Ok(a.is_muting(&b_name)? || b.is_muting(&a_name)?)
}

/// Delivery engine shared by every worker
pub struct Delivery {
    sessions: Arc<SessionManager>,
    rooms: Arc<RoomManager>,
}

impl Delivery {
    pub fn new(sessions: Arc<SessionManager>, rooms: Arc<RoomManager>) -> Self {
        Self { sessions, rooms }
    }

    /// Send `message` to every current member of `room`, then record it in
    /// the room's history. Members that vanish mid-broadcast are skipped.
    pub async fn broadcast_room(
        &self,
        room: RoomHandle,
        message: &Message,
        author: Option<&Session>,
    ) -> Result<usize> {
        let Some(snapshot) = self.rooms.snapshot(room)? else {
            debug!("Broadcast to vanished room {:?} dropped", room);
            return Ok(0);
        };

        let mut recipients = Vec::with_capacity(snapshot.members.len());
        for handle in &snapshot.members {
            let Some(member) = self.sessions.get(*handle)? else {
                continue;
            };
            if let Some(author) = author {
                if message.author().is_some() && mutually_muted(author, &member)? {
                    continue;
                }
            }
            recipients.push(member);
        }

        let line = message.render();
        let results = join_all(
            recipients
                .iter()
                .map(|member| member.connection().send_line_lossy(&line)),
        )
        .await;
        let delivered = results.into_iter().filter(|ok| *ok).count();

        snapshot
            .history
            .lock()?
            .add_message(HistoryEntry::from_message(message));

        debug!(
            "Broadcast to {} of {} members in {}",
            delivered,
            snapshot.members.len(),
            snapshot.name
        );
        Ok(delivered)
    }

    /// Send `message` to every logged-in session, unfiltered and unrecorded
    pub async fn broadcast_all(&self, message: &Message) -> Result<usize> {
        let recipients = self.sessions.active_sessions()?;
        let line = message.render();
        let results = join_all(
            recipients
                .iter()
                .map(|session| session.connection().send_line_lossy(&line)),
        )
        .await;
        Ok(results.into_iter().filter(|ok| *ok).count())
    }

    /// Directed message to the session named `to_name`
    pub async fn whisper(&self, from: &Session, to_name: &str, text: &str) -> Result<()> {
        let target = self
            .sessions
            .find_by_name(to_name)?
            .filter(|session| session.is_active())
            .ok_or_else(|| ChatError::NotLoggedIn(to_name.to_string()))?;
        self.deliver_whisper(from, &target, text).await
    }

    /// Answer whoever last whispered to `from`
    pub async fn reply(&self, from: &Session, text: &str) -> Result<()> {
        let handle = from.reply_target()?.ok_or(ChatError::NoPriorWhisper)?;
        let target = self
            .sessions
            .get(handle)?
            .filter(|session| session.is_active())
            .ok_or(ChatError::NoPriorWhisper)?;
        self.deliver_whisper(from, &target, text).await
    }

    async fn deliver_whisper(&self, from: &Session, target: &Session, text: &str) -> Result<()> {
        if target.handle() == from.handle() {
            return Err(ChatError::SelfTalk);
        }
        let from_name = from.name()?.ok_or(ChatError::SessionNotFound)?;
        let target_name = target.name()?.ok_or(ChatError::SessionNotFound)?;
        if mutually_muted(from, target)? {
            return Err(ChatError::Muted(target_name));
        }

        if !target
            .connection()
            .send_line_lossy(&whisper_line(&from_name, text))
            .await
        {
            warn!("Whisper from {} to {} was not delivered", from_name, target_name);
        }
        target.set_reply_target(Some(from.handle()))?;

        from.send_line(&whisper_echo_line(&target_name, text)).await
    }
}
