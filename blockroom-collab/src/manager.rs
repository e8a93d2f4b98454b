//! Room registry with per-room serialized mutation.
//!
//! ```text
//!            rooms: DashMap<room_id, Arc<OnceCell<RoomHandle>>>
//!                              │
//!   get_room ──► OnceCell::get_or_try_init ──► RoomStore::load   (once per id)
//!                              │
//!   apply    ──► Mutex<RoomState> ──► reconcile ─► upsert ─► normalize ─► save
//!                  (held until the save resolves or times out)
//! ```
//!
//! The per-room `tokio::sync::Mutex` is fair, so operations on one room run
//! one at a time in the order they asked for the lock. Rooms never share a
//! lock, so a slow save only stalls its own room.
//!
//! `forget` marks the state it evicts while holding its lock. An operation
//! that was already queued on that lock sees the mark and starts over from
//! the registry, so only one state per room is ever live.

use blockroom_core::{Applied, Cursor, CursorTracker, Operation, Room};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};

use crate::error::RoomError;
use crate::storage::{is_valid_room_id, RoomStore, StoreError};

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upper bound for a single load or save.
    pub persist_timeout: Duration,
    /// Seed for the color fallback RNGs. `None` seeds from OS entropy.
    pub color_seed: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            persist_timeout: Duration::from_secs(5),
            color_seed: None,
        }
    }
}

/// Manager statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub operations: u64,
    pub anomalies: u64,
    pub persist_failures: u64,
    pub rooms_loaded: u64,
    pub rooms_evicted: u64,
    pub cached_rooms: usize,
}

#[derive(Default)]
struct AtomicManagerStats {
    operations: AtomicU64,
    anomalies: AtomicU64,
    persist_failures: AtomicU64,
    rooms_loaded: AtomicU64,
    rooms_evicted: AtomicU64,
}

/// A mutation result paired with the outcome of persisting it.
///
/// `value` reflects in-memory state, which is kept even when `persisted`
/// is an error.
#[derive(Debug)]
pub struct Persisted<T> {
    pub value: T,
    pub persisted: Result<(), RoomError>,
}

struct RoomState {
    room: Room,
    tracker: CursorTracker,
    /// Set once the registry no longer points at this state.
    evicted: bool,
}

type RoomHandle = Arc<Mutex<RoomState>>;
type RoomSlot = Arc<OnceCell<RoomHandle>>;

pub struct RoomManager {
    store: Arc<dyn RoomStore>,
    config: ManagerConfig,
    rooms: DashMap<String, RoomSlot>,
    seeds: std::sync::Mutex<StdRng>,
    stats: AtomicManagerStats,
}

impl RoomManager {
    pub fn new(store: Arc<dyn RoomStore>, config: ManagerConfig) -> Self {
        let seeds = match config.color_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            config,
            rooms: DashMap::new(),
            seeds: std::sync::Mutex::new(seeds),
            stats: AtomicManagerStats::default(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Current state of a room, loading it from the store on first access.
    pub async fn get_room(&self, room_id: &str) -> Result<Room, RoomError> {
        let state = self.lock(room_id).await?;
        Ok(state.room.clone())
    }

    /// Create a room in the store and cache it.
    pub async fn create_room(&self, room_id: &str) -> Result<Room, RoomError> {
        if !is_valid_room_id(room_id) {
            return Err(RoomError::InvalidRoomId(room_id.to_string()));
        }
        let room = self.bounded(room_id, self.store.create(room_id)).await?;
        // A concurrent get_room may have loaded the new room already; keep
        // whatever state it holds.
        self.slot(room_id)
            .get_or_init(|| async { self.handle(room.clone()) })
            .await;
        log::info!("Room {room_id} created ({})", self.store.backend());
        Ok(room)
    }

    /// Replace the cached state of `room.id` and persist it.
    ///
    /// The cache is updated even if the save fails.
    pub async fn save_room(&self, room: Room) -> Result<(), RoomError> {
        if !is_valid_room_id(&room.id) {
            return Err(RoomError::InvalidRoomId(room.id));
        }
        let mut state = loop {
            let handle = self
                .slot(&room.id)
                .get_or_init(|| async { self.handle(room.clone()) })
                .await
                .clone();
            let state = handle.lock_owned().await;
            if !state.evicted {
                break state;
            }
        };
        state.room = room;
        self.persist(&state.room).await
    }

    /// Evict a room from memory. Storage is left alone.
    ///
    /// Waits for any operation already holding the room to finish first.
    /// A room still being loaded is left alone.
    pub async fn forget(&self, room_id: &str) -> bool {
        let Some(slot) = self.rooms.get(room_id).map(|s| s.value().clone()) else {
            return false;
        };
        let Some(handle) = slot.get() else {
            return false;
        };
        let mut state = handle.lock().await;
        let removed = self
            .rooms
            .remove_if(room_id, |_, s| Arc::ptr_eq(s, &slot))
            .is_some();
        if removed {
            state.evicted = true;
            self.stats.rooms_evicted.fetch_add(1, Ordering::Relaxed);
            log::info!("Room {room_id} evicted from memory");
        }
        removed
    }

    /// Whether the room is currently held in memory.
    pub fn is_cached(&self, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|slot| slot.initialized())
    }

    /// Apply one edit gesture from `user_id` and persist the result.
    pub async fn apply(
        &self,
        room_id: &str,
        user_id: &str,
        op: Operation,
    ) -> Result<Persisted<Applied>, RoomError> {
        let mut state = self.lock(room_id).await?;
        let RoomState { room, tracker, .. } = &mut *state;

        let name = op.name();
        let applied = room.apply_edit(op.into_edit(), user_id, tracker);
        self.stats.operations.fetch_add(1, Ordering::Relaxed);

        let report = &applied.report;
        if report.is_anomalous() {
            self.stats.anomalies.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "Room {room_id}: {name} from {user_id} had unresolved references \
                 (anchor_missing={}, missing_deletes={:?}, duplicate_creates={:?})",
                report.anchor_missing,
                report.missing_deletes,
                report.duplicate_creates,
            );
        }
        if !report.appended_updates.is_empty() {
            log::debug!("Room {room_id}: appended unknown blocks {:?}", report.appended_updates);
        }
        log::debug!(
            "Room {room_id}: {name} from {user_id} ({} blocks, {} cursors updated)",
            room.blocks.len(),
            applied.broadcast.updated_cursors.len()
        );

        let persisted = self.persist(room).await;
        Ok(Persisted {
            value: applied,
            persisted,
        })
    }

    /// Drop cursors of users not in `active` and persist.
    ///
    /// Returns the room as it stands afterwards.
    pub async fn sync_presence(
        &self,
        room_id: &str,
        active: &HashSet<String>,
    ) -> Result<Persisted<Room>, RoomError> {
        let mut state = self.lock(room_id).await?;

        let removed = state.room.prune_cursors(active);
        if !removed.is_empty() {
            log::debug!("Room {room_id}: pruned stale cursors {removed:?}");
        }
        let persisted = self.persist(&state.room).await;
        Ok(Persisted {
            value: state.room.clone(),
            persisted,
        })
    }

    /// Remove `user_id`'s cursor, persisting only if one was present.
    pub async fn remove_cursor(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Persisted<Option<Cursor>>, RoomError> {
        let mut state = self.lock(room_id).await?;

        let removed = state.room.remove_cursor(user_id);
        let persisted = match removed {
            Some(_) => self.persist(&state.room).await,
            None => Ok(()),
        };
        Ok(Persisted {
            value: removed,
            persisted,
        })
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            operations: self.stats.operations.load(Ordering::Relaxed),
            anomalies: self.stats.anomalies.load(Ordering::Relaxed),
            persist_failures: self.stats.persist_failures.load(Ordering::Relaxed),
            rooms_loaded: self.stats.rooms_loaded.load(Ordering::Relaxed),
            rooms_evicted: self.stats.rooms_evicted.load(Ordering::Relaxed),
            cached_rooms: self.rooms.iter().filter(|s| s.value().initialized()).count(),
        }
    }

    fn slot(&self, room_id: &str) -> RoomSlot {
        self.rooms.entry(room_id.to_string()).or_default().value().clone()
    }

    fn handle(&self, room: Room) -> RoomHandle {
        let tracker = match self.seeds.lock() {
            Ok(mut seeds) => CursorTracker::seeded(seeds.next_u64()),
            Err(_) => CursorTracker::from_entropy(),
        };
        Arc::new(Mutex::new(RoomState {
            room,
            tracker,
            evicted: false,
        }))
    }

    /// Lock the live state of `room_id`, starting over if `forget` evicted
    /// the handle while we waited on it.
    async fn lock(&self, room_id: &str) -> Result<OwnedMutexGuard<RoomState>, RoomError> {
        loop {
            let state = self.resolve(room_id).await?.lock_owned().await;
            if !state.evicted {
                return Ok(state);
            }
            log::debug!("Room {room_id} was evicted while waiting, reloading");
        }
    }

    /// Cached handle for `room_id`, loading at most once per id.
    async fn resolve(&self, room_id: &str) -> Result<RoomHandle, RoomError> {
        if !is_valid_room_id(room_id) {
            return Err(RoomError::InvalidRoomId(room_id.to_string()));
        }
        let slot = self.slot(room_id);
        let loaded = slot
            .get_or_try_init(|| async {
                let room = self.bounded(room_id, self.store.load(room_id)).await?;
                self.stats.rooms_loaded.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "Room {room_id} loaded ({} blocks, {} cursors)",
                    room.blocks.len(),
                    room.cursors.len()
                );
                Ok::<_, RoomError>(self.handle(room))
            })
            .await;

        match loaded {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                self.rooms
                    .remove_if(room_id, |_, s| Arc::ptr_eq(s, &slot) && !s.initialized());
                Err(e)
            }
        }
    }

    async fn persist(&self, room: &Room) -> Result<(), RoomError> {
        let result = self.bounded(&room.id, self.store.save(room)).await;
        if let Err(e) = &result {
            self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
            log::error!("Failed to persist room {}: {e}", room.id);
        }
        result
    }

    async fn bounded<T>(
        &self,
        room_id: &str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, RoomError> {
        match tokio::time::timeout(self.config.persist_timeout, fut).await {
            Ok(result) => result.map_err(|e| RoomError::from_store(room_id, e)),
            Err(_) => Err(RoomError::PersistenceTimeout {
                room: room_id.to_string(),
                after: self.config.persist_timeout,
            }),
        }
    }
}
