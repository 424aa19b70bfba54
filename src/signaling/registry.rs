use std::collections::HashMap;

use tracing::info;

use super::types::{Room, RoomId};

/// Room table owned by the router task.
///
/// Keys are compared by exact string equality. Nothing expires on its own;
/// rooms go away only through [`RoomRegistry::remove`].
#[derive(Debug, Default)]
pub(crate) struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, room_id: &RoomId) -> &mut Room {
        self.rooms.entry(room_id.clone()).or_insert_with(|| {
            info!("Room created: {}", room_id);
            Room::default()
        })
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub fn remove(&mut self, room_id: &RoomId) -> Option<Room> {
        let room = self.rooms.remove(room_id);
        if room.is_some() {
            info!("Room removed: {}", room_id);
        }
        room
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}
