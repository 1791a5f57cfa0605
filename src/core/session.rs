//! Session registry
//!
//! A fixed pool of session slots. Every slot carries a generation counter
//! that is bumped on allocation, so a [`SessionHandle`] kept past its
//! session's disconnect (for example as someone's reply target) resolves
//! to nothing instead of to whoever reuses the slot.
//!
//! Lock order: the registry table is always taken before any session's
//! state lock, never the other way round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::core::connection::Connection;
use crate::core::room::RoomHandle;
use crate::error::{ChatError, Result};

/// Generation-checked reference to a session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: usize,
    generation: u64,
}

impl SessionHandle {
    /// Stable integer id of the session (its slot number)
    pub fn id(&self) -> usize {
        self.index
    }
}

/// Per-session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    NamePrompt,
    AdminChallenge,
    Active,
    Disconnected,
}

/// Mutable per-session fields, guarded by the session's state lock
#[derive(Debug)]
pub struct SessionState {
    pub name: Option<String>,
    pub room: Option<RoomHandle>,
    pub admin: bool,
    pub phase: SessionPhase,
    /// Last session that whispered to this one
    pub reply_target: Option<SessionHandle>,
    muted: Vec<Option<String>>,
}

impl SessionState {
    fn new(max_muted: usize) -> Self {
        Self {
            name: None,
            room: None,
            admin: false,
            phase: SessionPhase::Connecting,
            reply_target: None,
            muted: vec![None; max_muted],
        }
    }

    pub fn is_muting(&self, name: &str) -> bool {
        self.muted
            .iter()
            .flatten()
            .any(|muted| muted.eq_ignore_ascii_case(name))
    }
}

/// Server-side state for one connected client
pub struct Session {
    handle: SessionHandle,
    connection: Arc<Connection>,
    state: Mutex<SessionState>,
    logout: AtomicBool,
    logout_signal: Notify,
}

impl Session {
    fn new(handle: SessionHandle, connection: Arc<Connection>, max_muted: usize) -> Self {
        Self {
            handle,
            connection,
            state: Mutex::new(SessionState::new(max_muted)),
            logout: AtomicBool::new(false),
            logout_signal: Notify::new(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn id(&self) -> usize {
        self.handle.id()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.connection.addr
    }

    pub(crate) fn state(&self) -> Result<MutexGuard<'_, SessionState>> {
        Ok(self.state.lock()?)
    }

    pub fn name(&self) -> Result<Option<String>> {
        Ok(self.state()?.name.clone())
    }

    /// Name for logs and notices; unnamed sessions show their slot
    pub fn display_name(&self) -> String {
        match self.name() {
            Ok(Some(name)) => name,
            _ => format!("client {}", self.id()),
        }
    }

    pub fn room(&self) -> Result<Option<RoomHandle>> {
        Ok(self.state()?.room)
    }

    pub fn is_admin(&self) -> Result<bool> {
        Ok(self.state()?.admin)
    }

    pub fn set_admin(&self, admin: bool) -> Result<()> {
        self.state()?.admin = admin;
        Ok(())
    }

    pub fn phase(&self) -> Result<SessionPhase> {
        Ok(self.state()?.phase)
    }

    pub fn set_phase(&self, phase: SessionPhase) -> Result<()> {
        self.state()?.phase = phase;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase(), Ok(SessionPhase::Active))
    }

    /// Move to `Disconnected`; returns true only for the first caller
    pub fn begin_disconnect(&self) -> Result<bool> {
        let mut state = self.state()?;
        if state.phase == SessionPhase::Disconnected {
            return Ok(false);
        }
        state.phase = SessionPhase::Disconnected;
        Ok(true)
    }

    pub fn reply_target(&self) -> Result<Option<SessionHandle>> {
        Ok(self.state()?.reply_target)
    }

    pub fn set_reply_target(&self, target: Option<SessionHandle>) -> Result<()> {
        self.state()?.reply_target = target;
        Ok(())
    }

    pub fn is_muting(&self, name: &str) -> Result<bool> {
        Ok(self.state()?.is_muting(name))
    }

    /// Insert into the first empty mute slot
    pub fn add_mute(&self, name: &str) -> Result<()> {
        let mut state = self.state()?;
        if state.is_muting(name) {
            return Err(ChatError::AlreadyMuted(name.to_string()));
        }
        let slot = state
            .muted
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(ChatError::MuteListFull)?;
        *slot = Some(name.to_string());
        Ok(())
    }

    /// Remove a name from the mute list, returning the stored spelling
    pub fn remove_mute(&self, name: &str) -> Result<String> {
        let mut state = self.state()?;
        let slot = state
            .muted
            .iter_mut()
            .find(|slot| matches!(slot, Some(muted) if muted.eq_ignore_ascii_case(name)))
            .ok_or_else(|| ChatError::NotMuted(name.to_string()))?;
        Ok(slot.take().unwrap_or_default())
    }

    pub fn clear_mutes(&self) -> Result<usize> {
        let mut state = self.state()?;
        let cleared = state.muted.iter().flatten().count();
        state.muted.iter_mut().for_each(|slot| *slot = None);
        Ok(cleared)
    }

    /// Follow a muted user's rename; returns true if `old` was muted
    pub fn rename_mute(&self, old: &str, new: &str) -> Result<bool> {
        let mut state = self.state()?;
        match state
            .muted
            .iter_mut()
            .flatten()
            .find(|muted| muted.eq_ignore_ascii_case(old))
        {
            Some(muted) => {
                *muted = new.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn muted_names(&self) -> Result<Vec<String>> {
        Ok(self.state()?.muted.iter().flatten().cloned().collect())
    }

    /// Ask this session's worker to end its read loop
    pub fn request_logout(&self) {
        self.logout.store(true, Ordering::SeqCst);
        self.logout_signal.notify_one();
    }

    pub fn logout_requested(&self) -> bool {
        self.logout.load(Ordering::SeqCst)
    }

    /// Resolves once [`Session::request_logout`] has been called
    pub async fn logout_notified(&self) {
        if self.logout_requested() {
            return;
        }
        self.logout_signal.notified().await;
    }

    pub async fn send_line(&self, text: &str) -> Result<()> {
        self.connection.send_line(text).await
    }

    pub async fn send_raw(&self, text: &str) -> Result<()> {
        self.connection.send_raw(text).await
    }
}

/// Validate a candidate display name
pub fn validate_name(name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(ChatError::InvalidName("name cannot be empty".to_string()));
    }
    if name.len() > max_len {
        return Err(ChatError::InvalidName(format!(
            "name must be at most {} characters",
            max_len
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ChatError::InvalidName(
            "name may only contain letters and digits".to_string(),
        ));
    }
    Ok(())
}

struct SessionSlot {
    generation: u64,
    session: Option<Arc<Session>>,
}

/// Fixed-capacity pool of sessions
pub struct SessionManager {
    slots: Mutex<Vec<SessionSlot>>,
    capacity: usize,
    max_name_len: usize,
    max_muted: usize,
}

impl SessionManager {
    pub fn new(capacity: usize, max_name_len: usize, max_muted: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| SessionSlot {
                generation: 0,
                session: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            capacity,
            max_name_len,
            max_muted,
        }
    }

    /// Claim a free slot for a new connection
    pub fn allocate(&self, connection: Arc<Connection>) -> Result<Arc<Session>> {
        let mut slots = self.slots.lock()?;
        let (index, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.session.is_none())
            .ok_or(ChatError::SessionsFull)?;

        slot.generation += 1;
        let handle = SessionHandle {
            index,
            generation: slot.generation,
        };
        let session = Arc::new(Session::new(handle, connection, self.max_muted));
        slot.session = Some(session.clone());
        Ok(session)
    }

    /// Free the slot held by `handle`; stale handles are ignored
    pub fn release(&self, handle: SessionHandle) -> Result<Option<Arc<Session>>> {
        let mut slots = self.slots.lock()?;
        let Some(slot) = slots.get_mut(handle.index) else {
            return Ok(None);
        };
        if slot.generation != handle.generation {
            return Ok(None);
        }
        Ok(slot.session.take())
    }

    /// Resolve a handle, or `None` if that session is gone
    pub fn get(&self, handle: SessionHandle) -> Result<Option<Arc<Session>>> {
        let slots = self.slots.lock()?;
        Ok(slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.session.clone()))
    }

    /// Case-insensitive lookup among named sessions
    pub fn find_by_name(&self, name: &str) -> Result<Option<Arc<Session>>> {
        let slots = self.slots.lock()?;
        for session in slots.iter().filter_map(|slot| slot.session.as_ref()) {
            let state = session.state()?;
            if state.phase == SessionPhase::Disconnected {
                continue;
            }
            if matches!(&state.name, Some(existing) if existing.eq_ignore_ascii_case(name)) {
                return Ok(Some(session.clone()));
            }
        }
        Ok(None)
    }

    /// Validate and assign a display name in one critical section.
    ///
    /// Returns the previous name, if the session already had one.
    pub fn claim_name(&self, handle: SessionHandle, name: &str) -> Result<Option<String>> {
        validate_name(name, self.max_name_len)?;

        let slots = self.slots.lock()?;
        let mut owner = None;
        for slot in slots.iter() {
            let Some(session) = slot.session.as_ref() else {
                continue;
            };
            if session.handle == handle {
                owner = Some(session);
                continue;
            }
            let state = session.state()?;
            if state.phase == SessionPhase::Disconnected {
                continue;
            }
            if matches!(&state.name, Some(existing) if existing.eq_ignore_ascii_case(name)) {
                return Err(ChatError::InvalidName(format!("{} is already taken", name)));
            }
        }

        let owner = owner.ok_or(ChatError::SessionNotFound)?;
        let mut state = owner.state()?;
        Ok(state.name.replace(name.to_string()))
    }

    /// Snapshot of logged-in sessions; the table lock is released on return
    pub fn active_sessions(&self) -> Result<Vec<Arc<Session>>> {
        let slots = self.slots.lock()?;
        Ok(slots
            .iter()
            .filter_map(|slot| slot.session.clone())
            .filter(|session| session.is_active())
            .collect())
    }

    /// Run `f` over a snapshot of the logged-in sessions
    pub fn for_each_active<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Arc<Session>),
    {
        for session in self.active_sessions()? {
            f(&session);
        }
        Ok(())
    }

    /// Number of occupied slots, logged in or not
    pub fn used_slots(&self) -> Result<usize> {
        let slots = self.slots.lock()?;
        Ok(slots.iter().filter(|slot| slot.session.is_some()).count())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
