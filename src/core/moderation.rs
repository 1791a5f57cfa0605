//! Per-session mute lists and the server-wide block list

use chrono::{DateTime, Local};
use log::info;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::core::room::RoomManager;
use crate::core::session::{Session, SessionManager};
use crate::error::{ChatError, Result};

pub const DEFAULT_BLOCK_REASON: &str = "No reason given";

/// An administrative ban on an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub id: u32,
    pub addr: IpAddr,
    pub name: String,
    pub reason: String,
    pub active: bool,
    pub blocked_at: DateTime<Local>,
}

impl BlockEntry {
    pub fn render(&self) -> String {
        format!(
            "[{}] {} ({}) blocked {}: {}",
            self.id,
            self.name,
            self.addr,
            self.blocked_at.format("%Y-%m-%d %H:%M:%S"),
            self.reason
        )
    }
}

struct BlockTable {
    slots: Vec<Option<BlockEntry>>,
    next_id: u32,
}

/// Fixed-capacity block list; inactive slots are reused first-fit
pub struct BlockList {
    table: Mutex<BlockTable>,
}

impl BlockList {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(BlockTable {
                slots: vec![None; capacity],
                next_id: 1,
            }),
        }
    }

    pub fn add(&self, addr: IpAddr, name: &str, reason: &str) -> Result<BlockEntry> {
        let mut table = self.table.lock()?;
        let id = table.next_id;
        let slot = table
            .slots
            .iter_mut()
            .find(|slot| !matches!(slot, Some(entry) if entry.active))
            .ok_or(ChatError::BlockListFull)?;

        let entry = BlockEntry {
            id,
            addr,
            name: name.to_string(),
            reason: reason.to_string(),
            active: true,
            blocked_at: Local::now(),
        };
        *slot = Some(entry.clone());
        table.next_id += 1;
        Ok(entry)
    }

    /// Deactivate an entry by id
    pub fn remove(&self, id: u32) -> Result<BlockEntry> {
        let mut table = self.table.lock()?;
        let entry = table
            .slots
            .iter_mut()
            .flatten()
            .find(|entry| entry.active && entry.id == id)
            .ok_or(ChatError::BlockNotFound(id))?;
        entry.active = false;
        Ok(entry.clone())
    }

    pub fn is_blocked(&self, addr: IpAddr) -> Result<bool> {
        let table = self.table.lock()?;
        Ok(table
            .slots
            .iter()
            .flatten()
            .any(|entry| entry.active && entry.addr == addr))
    }

    /// Active entries in id order
    pub fn list(&self) -> Result<Vec<BlockEntry>> {
        let table = self.table.lock()?;
        let mut entries: Vec<BlockEntry> = table
            .slots
            .iter()
            .flatten()
            .filter(|entry| entry.active)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }
}

/// Mute and administrative operations
pub struct Moderation {
    sessions: Arc<SessionManager>,
    rooms: Arc<RoomManager>,
    blocks: BlockList,
    admin_name: String,
}

impl Moderation {
    pub fn new(
        sessions: Arc<SessionManager>,
        rooms: Arc<RoomManager>,
        max_blocks: usize,
        admin_name: &str,
    ) -> Self {
        Self {
            sessions,
            rooms,
            blocks: BlockList::new(max_blocks),
            admin_name: admin_name.to_string(),
        }
    }

    pub fn is_admin_name(&self, name: &str) -> bool {
        self.admin_name.eq_ignore_ascii_case(name)
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    fn require_admin(&self, submitter: &Session) -> Result<()> {
        if submitter.is_admin()? {
            Ok(())
        } else {
            Err(ChatError::NotAdmin)
        }
    }

    fn logged_in(&self, name: &str) -> Result<Arc<Session>> {
        self.sessions
            .find_by_name(name)?
            .filter(|session| session.is_active())
            .ok_or_else(|| ChatError::NotLoggedIn(name.to_string()))
    }

    /// Stop seeing messages from `target_name`; returns the stored name
    pub fn mute(&self, submitter: &Session, target_name: &str) -> Result<String> {
        let target = self.logged_in(target_name)?;
        if target.handle() == submitter.handle() {
            return Err(ChatError::SelfMute);
        }
        let name = target.name()?.ok_or(ChatError::SessionNotFound)?;
        if self.is_admin_name(&name) {
            return Err(ChatError::AdminImmune(name));
        }
        submitter.add_mute(&name)?;
        Ok(name)
    }

    pub fn unmute(&self, submitter: &Session, target_name: &str) -> Result<String> {
        submitter.remove_mute(target_name)
    }

    pub fn list_muted(&self, submitter: &Session) -> Result<Vec<String>> {
        submitter.muted_names()
    }

    /// Record a block against a connected user's address and force them out
    pub async fn block(
        &self,
        admin: &Session,
        target_name: &str,
        reason: &str,
    ) -> Result<BlockEntry> {
        self.require_admin(admin)?;
        let target = self.logged_in(target_name)?;
        if target.handle() == admin.handle() {
            return Err(ChatError::ValidationError(
                "You cannot block yourself".to_string(),
            ));
        }
        let name = target.name()?.ok_or(ChatError::SessionNotFound)?;

        let entry = self.blocks.add(target.addr().ip(), &name, reason)?;
        info!(
            "{} blocked {} ({}): {}",
            admin.display_name(),
            name,
            entry.addr,
            reason
        );

        let mut notice = String::from("You have been blocked. Reason: ");
        notice.push_str(reason);
        target.connection().send_line_lossy(&notice).await;
        target.request_logout();
        Ok(entry)
    }

    pub fn unblock(&self, admin: &Session, id: u32) -> Result<BlockEntry> {
        self.require_admin(admin)?;
        let entry = self.blocks.remove(id)?;
        info!("{} unblocked {} ({})", admin.display_name(), entry.name, entry.addr);
        Ok(entry)
    }

    pub fn list_blocks(&self, admin: &Session) -> Result<Vec<BlockEntry>> {
        self.require_admin(admin)?;
        self.blocks.list()
    }

    /// Force a single user off the server
    pub async fn kick(&self, admin: &Session, target_name: &str) -> Result<String> {
        self.require_admin(admin)?;
        let target = self.logged_in(target_name)?;
        if target.handle() == admin.handle() {
            return Err(ChatError::ValidationError(
                "You cannot kick yourself".to_string(),
            ));
        }
        let name = target.display_name();
        info!("{} kicked {}", admin.display_name(), name);
        target
            .connection()
            .send_line_lossy("You have been kicked by an administrator.")
            .await;
        target.request_logout();
        Ok(name)
    }

    /// Force every non-admin member of `room_name` off the server
    pub async fn kick_room(&self, admin: &Session, room_name: &str) -> Result<Vec<String>> {
        self.require_admin(admin)?;
        let room = self
            .rooms
            .find_by_name(room_name)?
            .ok_or_else(|| ChatError::RoomNotFound(room_name.to_string()))?;

        let mut kicked = Vec::new();
        for handle in self.rooms.members(room)? {
            let Some(member) = self.sessions.get(handle)? else {
                continue;
            };
            if member.is_admin()? {
                continue;
            }
            member
                .connection()
                .send_line_lossy("You have been kicked by an administrator.")
                .await;
            member.request_logout();
            kicked.push(member.display_name());
        }
        info!(
            "{} kicked {} users from {}",
            admin.display_name(),
            kicked.len(),
            room_name
        );
        Ok(kicked)
    }
}
