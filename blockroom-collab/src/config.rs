//! Server configuration and command-line parsing.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::manager::ManagerConfig;
use crate::storage::{FsRoomStore, MemoryRoomStore, RoomStore, StoreError};

/// Which persistence backend holds room snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// One JSON file per room under `data_dir`
    Fs,
    /// Process memory only; rooms vanish on exit
    Memory,
    /// RocksDB database at `data_dir` (requires the `rocks` feature)
    Rocks,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Room snapshot location for the fs and rocks stores
    pub data_dir: PathBuf,
    pub store: StoreKind,
    /// Upper bound for a single load or save
    pub persist_timeout: Duration,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Maximum connections per room
    pub max_peers_per_room: usize,
    /// Create rooms that don't exist yet when someone joins them
    pub auto_create_rooms: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9001".to_string(),
            data_dir: PathBuf::from("data"),
            store: StoreKind::Fs,
            persist_timeout: Duration::from_secs(5),
            broadcast_capacity: 256,
            max_peers_per_room: 100,
            auto_create_rooms: true,
        }
    }
}

impl ServerConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            persist_timeout: self.persist_timeout,
            ..ManagerConfig::default()
        }
    }

    /// Open the configured store.
    pub async fn open_store(&self) -> Result<Arc<dyn RoomStore>, StoreError> {
        match self.store {
            StoreKind::Fs => Ok(Arc::new(FsRoomStore::open(&self.data_dir).await?)),
            StoreKind::Memory => Ok(Arc::new(MemoryRoomStore::new())),
            #[cfg(feature = "rocks")]
            StoreKind::Rocks => {
                let config = crate::storage::rocks::RocksConfig {
                    path: self.data_dir.clone(),
                    ..Default::default()
                };
                Ok(Arc::new(crate::storage::RocksRoomStore::open(config)?))
            }
            #[cfg(not(feature = "rocks"))]
            StoreKind::Rocks => Err(StoreError::Database(
                "built without the `rocks` feature".to_string(),
            )),
        }
    }
}

/// Real-time block editor room server.
#[derive(Debug, Parser)]
#[command(name = "blockroom-server", version, about)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "BLOCKROOM_BIND", default_value = "127.0.0.1:9001")]
    pub bind: String,

    /// Directory (or database path) for room snapshots
    #[arg(long, env = "BLOCKROOM_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Persistence backend
    #[arg(long, env = "BLOCKROOM_STORE", value_enum, default_value_t = StoreKind::Fs)]
    pub store: StoreKind,

    /// Timeout for a single load or save, in milliseconds
    #[arg(long, env = "BLOCKROOM_PERSIST_TIMEOUT_MS", default_value_t = 5000)]
    pub persist_timeout_ms: u64,

    /// Frames buffered per peer before a slow peer starts losing them
    #[arg(long, env = "BLOCKROOM_BROADCAST_CAPACITY", default_value_t = 256)]
    pub broadcast_capacity: usize,

    /// Maximum connections per room
    #[arg(long, env = "BLOCKROOM_MAX_PEERS", default_value_t = 100)]
    pub max_peers: usize,

    /// Reject joins to rooms that don't exist instead of creating them
    #[arg(long, env = "BLOCKROOM_NO_AUTO_CREATE")]
    pub no_auto_create: bool,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            data_dir: self.data_dir,
            store: self.store,
            persist_timeout: Duration::from_millis(self.persist_timeout_ms),
            broadcast_capacity: self.broadcast_capacity,
            max_peers_per_room: self.max_peers,
            auto_create_rooms: !self.no_auto_create,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9001");
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.store, StoreKind::Fs);
        assert_eq!(config.persist_timeout, Duration::from_secs(5));
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.max_peers_per_room, 100);
        assert!(config.auto_create_rooms);
    }

    #[test]
    fn test_cli_defaults_match_config() {
        let config = Cli::parse_from(["blockroom-server"]).into_config();
        let default = ServerConfig::default();
        assert_eq!(config.bind_addr, default.bind_addr);
        assert_eq!(config.persist_timeout, default.persist_timeout);
        assert_eq!(config.max_peers_per_room, default.max_peers_per_room);
        assert!(config.auto_create_rooms);
    }

    #[test]
    fn test_cli_flags() {
        let config = Cli::parse_from([
            "blockroom-server",
            "--bind",
            "0.0.0.0:8080",
            "--store",
            "memory",
            "--persist-timeout-ms",
            "250",
            "--no-auto-create",
        ])
        .into_config();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.persist_timeout, Duration::from_millis(250));
        assert!(!config.auto_create_rooms);
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config = ServerConfig {
            store: StoreKind::Memory,
            ..ServerConfig::default()
        };
        assert_eq!(config.open_store().await.unwrap().backend(), "memory");
    }

    #[cfg(not(feature = "rocks"))]
    #[tokio::test]
    async fn test_rocks_requires_feature() {
        let config = ServerConfig {
            store: StoreKind::Rocks,
            ..ServerConfig::default()
        };
        assert!(matches!(config.open_store().await, Err(StoreError::Database(_))));
    }
}
