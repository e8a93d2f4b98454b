//! In-memory room store for tests and ephemeral servers.
//!
//! Supports injected save failures and latency so callers can exercise
//! persistence error and timeout paths.

use async_trait::async_trait;
use blockroom_core::Room;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{check_room_id, RoomStore, StoreError};

#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<String, Room>>,
    fail_saves: AtomicBool,
    latency: Mutex<Option<Duration>>,
    loads: AtomicU64,
    saves: AtomicU64,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stored room directly.
    pub async fn insert(&self, room: Room) {
        self.rooms.write().await.insert(room.id.clone(), room);
    }

    /// Stored snapshot of a room, bypassing the load counter.
    pub async fn stored(&self, room_id: &str) -> Option<Room> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Make every subsequent save fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Delay every create, load and save by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = latency;
        }
    }

    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = self.latency.lock().ok().and_then(|slot| *slot);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create(&self, room_id: &str) -> Result<Room, StoreError> {
        check_room_id(room_id)?;
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(room_id) {
            return Err(StoreError::AlreadyExists(room_id.to_string()));
        }
        let room = Room::new(room_id);
        rooms.insert(room_id.to_string(), room.clone());
        drop(rooms);
        // Stored before the caller hears back, like a file that already exists.
        self.delay().await;
        Ok(room)
    }

    async fn load(&self, room_id: &str) -> Result<Room, StoreError> {
        check_room_id(room_id)?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))
    }

    async fn save(&self, room: &Room) -> Result<(), StoreError> {
        self.delay().await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("injected save failure")));
        }
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(&room.id) {
            Some(slot) => {
                *slot = room.clone();
                self.saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::NotFound(room.id.clone())),
        }
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
