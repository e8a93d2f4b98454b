//! WebSocket room server.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Channels (room_id) ── BroadcastGroup ──► other peers
//! Client B ──┘          │
//!                        └── RoomManager ── Mutex<Room> ── RoomStore
//! ```
//!
//! A connection binds to one room and one user with its first `join` frame.
//! Edits are applied through the manager, which serializes them per room and
//! persists each result; the resulting delta is fanned out to every other
//! connection in the room.
//!
//! On disconnect the user's cursor is removed (unless they still have another
//! connection open) and the room is evicted from memory once its last
//! connection is gone.

use futures_util::{Sink, SinkExt, StreamExt};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, Channels, Envelope};
use crate::config::ServerConfig;
use crate::error::RoomError;
use crate::manager::RoomManager;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::storage::{RoomStore, StoreError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_frames: u64,
}

/// What a connection is bound to after `join`.
struct Session {
    room_id: String,
    user_id: String,
    group: Arc<BroadcastGroup>,
}

#[derive(Clone)]
pub struct RoomServer {
    config: Arc<ServerConfig>,
    manager: Arc<RoomManager>,
    channels: Arc<Channels>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RoomServer {
    /// Build a server around an already opened store.
    pub fn new(config: ServerConfig, store: Arc<dyn RoomStore>) -> Self {
        let manager = Arc::new(RoomManager::new(store, config.manager_config()));
        let channels = Arc::new(Channels::new(config.broadcast_capacity, config.max_peers_per_room));
        Self {
            config: Arc::new(config),
            manager,
            channels,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Open the configured store and build a server on it.
    pub async fn open(config: ServerConfig) -> Result<Self, StoreError> {
        let store = config.open_store().await?;
        log::info!("Using {} room store", store.backend());
        Ok(Self::new(config, store))
    }

    /// Bind to the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from an existing listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Room server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub fn manager(&self) -> &Arc<RoomManager> {
        &self.manager
    }

    pub fn channels(&self) -> &Arc<Channels> {
        &self.channels
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let conn_id = Uuid::new_v4();

        log::info!("WebSocket connection {conn_id} established from {addr}");
        {
            let mut s = self.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut session: Option<Session> = None;
        let mut broadcast_rx: Option<broadcast::Receiver<Arc<Envelope>>> = None;

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                {
                                    let mut s = self.stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += text.len() as u64;
                                }
                                let frame = match ClientMessage::decode(text.as_str()) {
                                    Ok(frame) => frame,
                                    Err(e) => {
                                        log::warn!("Failed to decode frame from {addr}: {e}");
                                        self.stats.write().await.rejected_frames += 1;
                                        send(&mut ws_sender, &ServerMessage::error(e.to_string())).await?;
                                        continue;
                                    }
                                };

                                match frame {
                                    ClientMessage::Join { room_id, user_id } => {
                                        if session.is_some() {
                                            send(&mut ws_sender, &ServerMessage::error("already joined a room")).await?;
                                            continue;
                                        }
                                        if user_id.is_empty() {
                                            send(&mut ws_sender, &ServerMessage::error("userId must not be empty")).await?;
                                            break;
                                        }
                                        if let Err(e) = self.open_room(&room_id).await {
                                            log::warn!("Join to room {room_id:?} from {addr} refused: {e}");
                                            send(&mut ws_sender, &ServerMessage::error(e.to_string())).await?;
                                            break;
                                        }
                                        match self.channels.join(&room_id, conn_id, &user_id).await {
                                            Ok((group, rx)) => {
                                                log::info!("User {user_id} joined room {room_id} ({conn_id})");
                                                broadcast_rx = Some(rx);
                                                session = Some(Session { room_id, user_id, group });
                                            }
                                            Err(full) => {
                                                log::warn!("{full}");
                                                send(&mut ws_sender, &ServerMessage::error(full.to_string())).await?;
                                                break;
                                            }
                                        }
                                    }

                                    ClientMessage::Load => {
                                        let Some(s) = &session else {
                                            send(&mut ws_sender, &ServerMessage::error("join a room first")).await?;
                                            continue;
                                        };
                                        let active: HashSet<String> = s.group.active_users().await;
                                        let reply = match self.manager.sync_presence(&s.room_id, &active).await {
                                            Ok(result) => {
                                                if let Err(e) = result.persisted {
                                                    log::warn!("Room {}: presence sync not persisted: {e}", s.room_id);
                                                }
                                                ServerMessage::Init {
                                                    blocks: result.value.blocks,
                                                    cursors: result.value.cursors,
                                                }
                                            }
                                            Err(e) => ServerMessage::error(e.to_string()),
                                        };
                                        send(&mut ws_sender, &reply).await?;
                                    }

                                    ClientMessage::Edit { operation } => {
                                        let Some(s) = &session else {
                                            send(&mut ws_sender, &ServerMessage::error("join a room first")).await?;
                                            continue;
                                        };
                                        match self.manager.apply(&s.room_id, &s.user_id, operation).await {
                                            Ok(result) => {
                                                let delta = ServerMessage::Change(result.value.broadcast);
                                                if let Err(e) = s.group.broadcast(Some(conn_id), &delta) {
                                                    log::error!("Failed to broadcast to room {}: {e}", s.room_id);
                                                }
                                                if let Err(e) = result.persisted {
                                                    send(&mut ws_sender, &ServerMessage::error(e.to_string())).await?;
                                                }
                                            }
                                            Err(e) => {
                                                send(&mut ws_sender, &ServerMessage::error(e.to_string())).await?;
                                            }
                                        }
                                    }

                                    ClientMessage::Ping => {
                                        send(&mut ws_sender, &ServerMessage::Pong).await?;
                                    }
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection {conn_id} closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    msg = async {
                        match broadcast_rx.as_mut() {
                            Some(rx) => rx.recv().await,
                            // Not joined yet.
                            None => std::future::pending().await,
                        }
                    } => {
                        match msg {
                            Ok(envelope) => {
                                if envelope.origin == Some(conn_id) {
                                    continue;
                                }
                                ws_sender.send(Message::Text(envelope.payload.clone().into())).await?;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Connection {conn_id} lagged by {n} frames");
                                if let Some(s) = &session {
                                    s.group.record_dropped(n);
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        if let Some(s) = session {
            self.leave(conn_id, s).await;
        }
        {
            let mut s = self.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        result
    }

    /// Make sure the room is loaded, creating it if policy allows.
    async fn open_room(&self, room_id: &str) -> Result<(), RoomError> {
        match self.manager.get_room(room_id).await {
            Ok(_) => Ok(()),
            Err(RoomError::RoomNotFound(_)) if self.config.auto_create_rooms => {
                match self.manager.create_room(room_id).await {
                    Ok(_) => Ok(()),
                    // Someone else created it first.
                    Err(RoomError::RoomAlreadyExists(_)) => self.manager.get_room(room_id).await.map(|_| ()),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn leave(&self, conn_id: Uuid, session: Session) {
        let Session { room_id, user_id, group } = session;
        let departure = self.channels.leave(&room_id, conn_id).await;
        log::info!("User {user_id} left room {room_id} ({conn_id})");

        if !departure.user_still_present {
            match self.manager.remove_cursor(&room_id, &user_id).await {
                Ok(result) => {
                    if result.value.is_some() {
                        let msg = ServerMessage::CursorRemove { user_id: user_id.clone() };
                        if let Err(e) = group.broadcast(Some(conn_id), &msg) {
                            log::error!("Failed to broadcast cursor removal in room {room_id}: {e}");
                        }
                    }
                    if let Err(e) = result.persisted {
                        log::warn!("Room {room_id}: cursor removal for {user_id} not persisted: {e}");
                    }
                }
                Err(e) => log::warn!("Room {room_id}: could not remove cursor of {user_id}: {e}"),
            }
        }

        if departure.room_empty {
            self.manager.forget(&room_id).await;
        }
    }
}

async fn send<S>(sink: &mut S, msg: &ServerMessage) -> Result<(), BoxError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(Message::Text(msg.encode()?.into())).await?;
    Ok(())
}
