//! Per-room fan-out of server frames to connected peers.
//!
//! Uses tokio broadcast channels: one send reaches every subscriber of the
//! room. Each peer gets an independent receiver buffering up to `capacity`
//! frames; a peer that falls further behind loses the oldest ones.
//!
//! Frames are encoded once and carry the id of the connection they came
//! from, so a peer's own receive loop can skip them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerMessage};

/// An encoded frame and the connection it originated from.
#[derive(Debug)]
pub struct Envelope {
    pub origin: Option<Uuid>,
    pub payload: String,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Broadcast group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Envelope>>,
    /// Connection id → user id
    peers: RwLock<HashMap<Uuid, String>>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::default(),
        }
    }

    /// Register a connection and return its receiver.
    pub async fn add_peer(&self, conn_id: Uuid, user_id: &str) -> broadcast::Receiver<Arc<Envelope>> {
        let mut peers = self.peers.write().await;
        peers.insert(conn_id, user_id.to_string());
        self.sender.subscribe()
    }

    /// Unregister a connection, returning the user it was bound to.
    pub async fn remove_peer(&self, conn_id: &Uuid) -> Option<String> {
        self.peers.write().await.remove(conn_id)
    }

    /// Encode `msg` once and fan it out.
    ///
    /// Returns the number of receivers, including the origin's own.
    pub fn broadcast(&self, origin: Option<Uuid>, msg: &ServerMessage) -> Result<usize, ProtocolError> {
        let envelope = Arc::new(Envelope {
            origin,
            payload: msg.encode()?,
        });
        let count = self.sender.send(envelope).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    /// Account for frames a lagging receiver skipped.
    pub fn record_dropped(&self, n: u64) {
        self.atomic_stats.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Distinct user ids with at least one live connection.
    pub async fn active_users(&self) -> HashSet<String> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_user(&self, user_id: &str) -> bool {
        self.peers.read().await.values().any(|u| u == user_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("room {room} is full ({max} peers)")]
pub struct RoomFull {
    pub room: String,
    pub max: usize,
}

/// Outcome of a connection leaving its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub user_id: Option<String>,
    /// The same user is still connected through another socket.
    pub user_still_present: bool,
    /// No connections remain; the group has been dropped.
    pub room_empty: bool,
}

/// Maps room ids to broadcast groups.
pub struct Channels {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
    max_peers: usize,
}

impl Channels {
    pub fn new(default_capacity: usize, max_peers: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
            max_peers,
        }
    }

    /// Add a connection to `room_id`, creating the group on first join.
    pub async fn join(
        &self,
        room_id: &str,
        conn_id: Uuid,
        user_id: &str,
    ) -> Result<(Arc<BroadcastGroup>, broadcast::Receiver<Arc<Envelope>>), RoomFull> {
        let mut rooms = self.rooms.write().await;
        let group = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone();

        if group.peer_count().await >= self.max_peers {
            return Err(RoomFull {
                room: room_id.to_string(),
                max: self.max_peers,
            });
        }
        let rx = group.add_peer(conn_id, user_id).await;
        Ok((group, rx))
    }

    /// Remove a connection, dropping the group once it is empty.
    pub async fn leave(&self, room_id: &str, conn_id: Uuid) -> Departure {
        let mut rooms = self.rooms.write().await;
        let Some(group) = rooms.get(room_id).cloned() else {
            return Departure {
                user_id: None,
                user_still_present: false,
                room_empty: true,
            };
        };

        let user_id = group.remove_peer(&conn_id).await;
        let user_still_present = match &user_id {
            Some(user) => group.has_user(user).await,
            None => false,
        };
        let room_empty = group.peer_count().await == 0;
        if room_empty {
            rooms.remove(room_id);
        }
        Departure {
            user_id,
            user_still_present,
            room_empty,
        }
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
