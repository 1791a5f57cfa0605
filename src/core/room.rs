use std::sync::{Arc, Mutex};

use crate::constants::MAX_ROOM_NAME_LEN;
use crate::core::session::{Session, SessionHandle};
use crate::error::{ChatError, Result};
use crate::storage::message_store::{create_message_store_with_capacity, SharedMessageStore};

/// Generation-checked reference to a room slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomHandle {
    index: usize,
    generation: u64,
}

impl RoomHandle {
    pub fn id(&self) -> usize {
        self.index
    }
}

/// Represents a chat room
#[derive(Debug)]
pub struct Room {
    /// Display name of the room
    pub name: String,
    /// Sessions currently in the room, in join order
    members: Vec<SessionHandle>,
    /// Recent messages; locked independently of the room table
    history: SharedMessageStore,
    in_use: bool,
    generation: u64,
}

impl Room {
    fn vacant(history_size: usize) -> Self {
        Self {
            name: String::new(),
            members: Vec::new(),
            history: create_message_store_with_capacity(history_size),
            in_use: false,
            generation: 0,
        }
    }

    /// Adds a member; a session is never listed twice
    pub fn add_member(&mut self, member: SessionHandle) -> bool {
        if self.has_member(member) {
            return false;
        }
        self.members.push(member);
        true
    }

    /// Removes a member from the room
    pub fn remove_member(&mut self, member: SessionHandle) -> bool {
        let before = self.members.len();
        self.members.retain(|m| *m != member);
        self.members.len() != before
    }

    pub fn has_member(&self, member: SessionHandle) -> bool {
        self.members.contains(&member)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Point-in-time view of a room for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub handle: RoomHandle,
    pub name: String,
    pub member_count: usize,
}

/// What a broadcast needs from a room, copied out under the table lock
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub handle: RoomHandle,
    pub name: String,
    pub members: Vec<SessionHandle>,
    pub history: SharedMessageStore,
}

/// Room membership change produced by a join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub left: Option<(RoomHandle, String)>,
    pub joined: (RoomHandle, String),
}

/// Validate a candidate room name
pub fn validate_room_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ChatError::InvalidRoomName("name cannot be empty".to_string()));
    }
    if name.len() > MAX_ROOM_NAME_LEN {
        return Err(ChatError::InvalidRoomName(format!(
            "name must be at most {} characters",
            MAX_ROOM_NAME_LEN
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ChatError::InvalidRoomName(
            "name may only contain letters and digits".to_string(),
        ));
    }
    Ok(())
}

const DEFAULT_ROOM_INDEX: usize = 0;

/// Fixed pool of rooms: the permanent default room plus user-created rooms.
///
/// Membership lives in the room table and in each session's `room` field;
/// both are updated together while the table lock is held, taking the
/// session's state lock inside it.
pub struct RoomManager {
    rooms: Mutex<Vec<Room>>,
    default_room: RoomHandle,
}

impl RoomManager {
    /// Creates a manager with `default_name` in slot 0 and `max_rooms` free slots
    pub fn new(default_name: &str, max_rooms: usize, history_size: usize) -> Self {
        let mut rooms: Vec<Room> = (0..=max_rooms)
            .map(|_| Room::vacant(history_size))
            .collect();

        let default = &mut rooms[DEFAULT_ROOM_INDEX];
        default.name = default_name.to_string();
        default.in_use = true;
        default.generation = 1;

        Self {
            rooms: Mutex::new(rooms),
            default_room: RoomHandle {
                index: DEFAULT_ROOM_INDEX,
                generation: 1,
            },
        }
    }

    pub fn default_room(&self) -> RoomHandle {
        self.default_room
    }

    fn resolve(rooms: &[Room], handle: RoomHandle) -> Option<&Room> {
        rooms
            .get(handle.index)
            .filter(|room| room.in_use && room.generation == handle.generation)
    }

    /// Creates a room in a vacant slot, or failing that in an empty user room.
    ///
    /// The whole table is scanned before deciding, so a name collision is
    /// reported even when a free slot appears earlier than the duplicate.
    pub fn create(&self, name: &str) -> Result<RoomHandle> {
        validate_room_name(name)?;

        let mut rooms = self.rooms.lock()?;
        let mut vacant = None;
        let mut empty = None;
        for (index, room) in rooms.iter().enumerate() {
            if !room.in_use {
                vacant = vacant.or(Some(index));
                continue;
            }
            if room.name.eq_ignore_ascii_case(name) {
                return Err(ChatError::DuplicateRoomName(room.name.clone()));
            }
            if index != self.default_room.index && room.member_count() == 0 {
                empty = empty.or(Some(index));
            }
        }

        let index = vacant.or(empty).ok_or(ChatError::RoomsFull)?;
        let room = &mut rooms[index];
        room.generation += 1;
        room.name = name.to_string();
        room.members.clear();
        room.in_use = true;
        room.history.lock()?.clear();

        Ok(RoomHandle {
            index,
            generation: room.generation,
        })
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<RoomHandle>> {
        let rooms = self.rooms.lock()?;
        Ok(rooms
            .iter()
            .enumerate()
            .find(|(_, room)| room.in_use && room.name.eq_ignore_ascii_case(name))
            .map(|(index, room)| RoomHandle {
                index,
                generation: room.generation,
            }))
    }

    pub fn name(&self, handle: RoomHandle) -> Result<Option<String>> {
        let rooms = self.rooms.lock()?;
        Ok(Self::resolve(&rooms, handle).map(|room| room.name.clone()))
    }

    /// Moves `session` into `target`, leaving its current room first
    pub fn join(&self, session: &Session, target: RoomHandle) -> Result<Transfer> {
        let mut rooms = self.rooms.lock()?;
        let target_name = Self::resolve(&rooms, target)
            .map(|room| room.name.clone())
            .ok_or_else(|| ChatError::RoomNotFound(format!("#{}", target.index)))?;

        let mut state = session.state()?;
        if state.room == Some(target) {
            return Err(ChatError::ValidationError(format!(
                "You are already in chat room {}",
                target_name
            )));
        }

        let left = match state.room.take() {
            Some(current) => self.detach(&mut rooms, current, session.handle()),
            None => None,
        };

        rooms[target.index].add_member(session.handle());
        state.room = Some(target);

        Ok(Transfer {
            left,
            joined: (target, target_name),
        })
    }

    /// Removes `session` from its room
    pub fn leave(&self, session: &Session) -> Result<(RoomHandle, String)> {
        let mut rooms = self.rooms.lock()?;
        let mut state = session.state()?;
        let current = state.room.take().ok_or(ChatError::NotInRoom)?;
        self.detach(&mut rooms, current, session.handle())
            .ok_or(ChatError::NotInRoom)
    }

    // Caller holds the table lock. Empty user rooms give their slot back.
    fn detach(
        &self,
        rooms: &mut [Room],
        handle: RoomHandle,
        member: SessionHandle,
    ) -> Option<(RoomHandle, String)> {
        let room = rooms.get_mut(handle.index)?;
        if !room.in_use || room.generation != handle.generation {
            return None;
        }
        room.remove_member(member);
        let name = room.name.clone();

        if handle != self.default_room && room.member_count() == 0 {
            room.in_use = false;
            if let Ok(mut history) = room.history.lock() {
                history.clear();
            }
        }
        Some((handle, name))
    }

    /// True when the room has at least one member
    pub fn is_active(&self, handle: RoomHandle) -> Result<bool> {
        let rooms = self.rooms.lock()?;
        Ok(Self::resolve(&rooms, handle)
            .map(|room| room.member_count() > 0)
            .unwrap_or(false))
    }

    /// The default room plus every room with members
    pub fn list_active(&self) -> Result<Vec<RoomInfo>> {
        let rooms = self.rooms.lock()?;
        Ok(rooms
            .iter()
            .enumerate()
            .filter(|(index, room)| {
                room.in_use && (*index == self.default_room.index || room.member_count() > 0)
            })
            .map(|(index, room)| RoomInfo {
                handle: RoomHandle {
                    index,
                    generation: room.generation,
                },
                name: room.name.clone(),
                member_count: room.member_count(),
            })
            .collect())
    }

    pub fn members(&self, handle: RoomHandle) -> Result<Vec<SessionHandle>> {
        let rooms = self.rooms.lock()?;
        Ok(Self::resolve(&rooms, handle)
            .map(|room| room.members.clone())
            .unwrap_or_default())
    }

    /// Copy out members and history handle for a broadcast
    pub fn snapshot(&self, handle: RoomHandle) -> Result<Option<RoomSnapshot>> {
        let rooms = self.rooms.lock()?;
        Ok(Self::resolve(&rooms, handle).map(|room| RoomSnapshot {
            handle,
            name: room.name.clone(),
            members: room.members.clone(),
            history: Arc::clone(&room.history),
        }))
    }

    pub fn history(&self, handle: RoomHandle) -> Result<Option<SharedMessageStore>> {
        let rooms = self.rooms.lock()?;
        Ok(Self::resolve(&rooms, handle).map(|room| Arc::clone(&room.history)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Connection;
    use crate::core::session::SessionManager;

    fn sessions(count: usize) -> (SessionManager, Vec<Arc<Session>>) {
        let manager = SessionManager::new(count, 32, 4);
        let list = (0..count)
            .map(|_| {
                let connection = Arc::new(Connection::new(
                    Box::new(tokio::io::sink()),
                    "127.0.0.1:5000".parse().unwrap(),
                ));
                manager.allocate(connection).unwrap()
            })
            .collect();
        (manager, list)
    }

    #[test]
    fn test_default_room_exists() {
        let manager = RoomManager::new("lobby", 5, 10);
        let rooms = manager.list_active().unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].name, "lobby");
        assert_eq!(rooms[0].handle, manager.default_room());
        assert!(!manager.is_active(manager.default_room()).unwrap());
    }

    #[test]
    fn test_create_rejects_duplicates_case_insensitively() {
        let manager = RoomManager::new("lobby", 5, 10);
        manager.create("devops").unwrap();
        assert!(matches!(
            manager.create("DevOps"),
            Err(ChatError::DuplicateRoomName(_))
        ));
        assert!(matches!(
            manager.create("Lobby"),
            Err(ChatError::DuplicateRoomName(_))
        ));
    }

    #[test]
    fn test_create_rejects_bad_names() {
        let manager = RoomManager::new("lobby", 5, 10);
        assert!(matches!(manager.create(""), Err(ChatError::InvalidRoomName(_))));
        assert!(matches!(
            manager.create("two words"),
            Err(ChatError::InvalidRoomName(_))
        ));
        assert!(matches!(
            manager.create(&"x".repeat(MAX_ROOM_NAME_LEN + 1)),
            Err(ChatError::InvalidRoomName(_))
        ));
    }

    #[test]
    fn test_create_fails_when_every_room_is_occupied() {
        let (_sessions, list) = sessions(2);
        let manager = RoomManager::new("lobby", 2, 10);
        let one = manager.create("one").unwrap();
        let two = manager.create("two").unwrap();
        manager.join(&list[0], one).unwrap();
        manager.join(&list[1], two).unwrap();
        assert!(matches!(manager.create("three"), Err(ChatError::RoomsFull)));
    }

    #[test]
    fn test_unjoined_rooms_do_not_exhaust_capacity() {
        let manager = RoomManager::new("lobby", 5, 10);
        let created: Vec<RoomHandle> = ["r1", "r2", "r3", "r4", "r5"]
            .iter()
            .map(|name| manager.create(name).unwrap())
            .collect();
        assert_eq!(manager.list_active().unwrap().len(), 1);

        // Nobody joined r1..r5, so the first empty one is taken over
        let devops = manager.create("devops").unwrap();
        assert_eq!(devops.id(), created[0].id());
        assert!(manager.name(created[0]).unwrap().is_none());
        assert!(manager.find_by_name("r1").unwrap().is_none());
        assert_eq!(manager.find_by_name("r2").unwrap(), Some(created[1]));
    }

    #[test]
    fn test_vacant_slot_preferred_over_empty_room() {
        let (_sessions, list) = sessions(1);
        let manager = RoomManager::new("lobby", 2, 10);
        let first = manager.create("first").unwrap();
        manager.join(&list[0], first).unwrap();
        manager.leave(&list[0]).unwrap();
        let idle = manager.create("idle").unwrap();

        // Slot 1 was vacated; "idle" sits unjoined in slot 1 and slot 2 is vacant
        let next = manager.create("next").unwrap();
        assert_ne!(next.id(), idle.id());
        assert_eq!(manager.find_by_name("idle").unwrap(), Some(idle));
    }

    #[test]
    fn test_duplicate_wins_over_earlier_free_slot() {
        let (_sessions, list) = sessions(1);
        let manager = RoomManager::new("lobby", 3, 10);
        let first = manager.create("first").unwrap();
        manager.create("second").unwrap();

        // Free the first slot by emptying it
        manager.join(&list[0], first).unwrap();
        manager.leave(&list[0]).unwrap();
        assert!(manager.find_by_name("first").unwrap().is_none());

        // Slot 1 is free and scanned before "second", yet the name clash wins
        assert!(matches!(
            manager.create("second"),
            Err(ChatError::DuplicateRoomName(_))
        ));
    }

    #[test]
    fn test_join_moves_between_rooms() {
        let (_sessions, list) = sessions(2);
        let manager = RoomManager::new("lobby", 5, 10);
        let lobby = manager.default_room();
        let dev = manager.create("dev").unwrap();

        let first = manager.join(&list[0], lobby).unwrap();
        assert_eq!(first.left, None);
        manager.join(&list[1], lobby).unwrap();
        assert_eq!(manager.members(lobby).unwrap().len(), 2);

        let transfer = manager.join(&list[0], dev).unwrap();
        assert_eq!(transfer.left, Some((lobby, "lobby".to_string())));
        assert_eq!(transfer.joined, (dev, "dev".to_string()));
        assert_eq!(manager.members(lobby).unwrap(), vec![list[1].handle()]);
        assert_eq!(manager.members(dev).unwrap(), vec![list[0].handle()]);
        assert_eq!(list[0].room().unwrap(), Some(dev));
    }

    #[test]
    fn test_join_same_room_is_rejected() {
        let (_sessions, list) = sessions(1);
        let manager = RoomManager::new("lobby", 5, 10);
        let lobby = manager.default_room();
        manager.join(&list[0], lobby).unwrap();
        assert!(matches!(
            manager.join(&list[0], lobby),
            Err(ChatError::ValidationError(_))
        ));
        assert_eq!(manager.members(lobby).unwrap().len(), 1);
    }

    #[test]
    fn test_leave_without_room() {
        let (_sessions, list) = sessions(1);
        let manager = RoomManager::new("lobby", 5, 10);
        assert!(matches!(manager.leave(&list[0]), Err(ChatError::NotInRoom)));
    }

    #[test]
    fn test_empty_room_slot_is_reclaimed() {
        let (_sessions, list) = sessions(1);
        let manager = RoomManager::new("lobby", 1, 10);
        let dev = manager.create("dev").unwrap();
        manager.join(&list[0], dev).unwrap();
        manager.join(&list[0], manager.default_room()).unwrap();

        // Old handle is stale once the slot is reused
        let ops = manager.create("ops").unwrap();
        assert_eq!(ops.id(), dev.id());
        assert!(manager.name(dev).unwrap().is_none());
        assert!(matches!(
            manager.join(&list[0], dev),
            Err(ChatError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_default_room_is_never_reclaimed() {
        let (_sessions, list) = sessions(1);
        let manager = RoomManager::new("lobby", 1, 10);
        let lobby = manager.default_room();
        manager.join(&list[0], lobby).unwrap();
        manager.leave(&list[0]).unwrap();
        assert_eq!(manager.name(lobby).unwrap().as_deref(), Some("lobby"));
    }

    #[test]
    fn test_concurrent_joins_keep_counts_consistent() {
        let (_sessions, list) = sessions(8);
        let manager = Arc::new(RoomManager::new("lobby", 2, 10));
        let lobby = manager.default_room();
        let a = manager.create("a").unwrap();

        // The anchor keeps room "a" occupied so its slot is never reclaimed
        let (anchor, movers) = list.split_first().unwrap();
        manager.join(anchor, a).unwrap();
        for session in movers {
            manager.join(session, lobby).unwrap();
        }

        let threads: Vec<_> = movers
            .iter()
            .cloned()
            .map(|session| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    for round in 0..100 {
                        let target = if round % 2 == 0 { a } else { lobby };
                        manager.join(&session, target).unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        // 100 rounds end on an odd index, i.e. back in the lobby
        assert_eq!(manager.members(lobby).unwrap().len(), movers.len());
        assert_eq!(manager.members(a).unwrap(), vec![anchor.handle()]);
        for session in movers {
            assert_eq!(session.room().unwrap(), Some(lobby));
        }
    }
}
