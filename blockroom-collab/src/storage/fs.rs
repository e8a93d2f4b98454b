//! JSON-file room store: one pretty-printed `<room_id>.json` per room.
//!
//! Every write lands in a uniquely named temp file in the same directory
//! first. `create` claims the room name with a hard link, which fails if the
//! name is taken; `save` renames over the previous snapshot. Readers never see
//! an empty or half-written room file.
//!
//! Writes run on the blocking pool under a per-room lock that travels with the
//! work, so a save whose caller gave up still finishes before the next save of
//! that room starts.

use async_trait::async_trait;
use blockroom_core::Room;
use dashmap::DashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{blocking, check_room_id, RoomStore, StoreError};

pub struct FsRoomStore {
    dir: PathBuf,
    writers: DashMap<String, Arc<Mutex<()>>>,
}

impl FsRoomStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !fs::try_exists(&dir).await? {
            log::info!("Creating data directory at {}", dir.display());
            fs::create_dir_all(&dir).await?;
        }
        Ok(Self {
            dir,
            writers: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, room_id: &str) -> Result<PathBuf, StoreError> {
        check_room_id(room_id)?;
        Ok(self.dir.join(format!("{room_id}.json")))
    }

    fn writer(&self, room_id: &str) -> Arc<Mutex<()>> {
        self.writers.entry(room_id.to_string()).or_default().value().clone()
    }
}

/// Write `bytes` to a fresh synced temp file next to `path`.
fn write_temp(path: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    let written = std::fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    match written {
        Ok(()) => Ok(tmp),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

#[async_trait]
impl RoomStore for FsRoomStore {
    async fn create(&self, room_id: &str) -> Result<Room, StoreError> {
        let path = self.path(room_id)?;
        let room = Room::new(room_id);
        let bytes = serde_json::to_vec_pretty(&room)?;
        let id = room_id.to_string();

        blocking(move || {
            let tmp = write_temp(&path, &bytes)?;
            let claimed = std::fs::hard_link(&tmp, &path);
            let _ = std::fs::remove_file(&tmp);
            match claimed {
                Ok(()) => {
                    log::info!("Room {id} created at {}", path.display());
                    Ok(room)
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::AlreadyExists(id)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn load(&self, room_id: &str) -> Result<Room, StoreError> {
        let path = self.path(room_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(room_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut room: Room = serde_json::from_slice(&bytes)?;
        if room.id != room_id {
            log::warn!("Room file {} carries id {:?}, using {room_id}", path.display(), room.id);
            room.id = room_id.to_string();
        }
        log::debug!("Loaded room {room_id} ({} blocks, {} cursors)", room.blocks.len(), room.cursors.len());
        Ok(room)
    }

    async fn save(&self, room: &Room) -> Result<(), StoreError> {
        let path = self.path(&room.id)?;
        let bytes = serde_json::to_vec_pretty(room)?;
        let id = room.id.clone();
        let guard = self.writer(&room.id).lock_owned().await;

        blocking(move || {
            let _guard = guard;
            // Never resurrect a room whose file was removed behind our back.
            if !path.try_exists()? {
                return Err(StoreError::NotFound(id));
            }
            let tmp = write_temp(&path, &bytes)?;
            if let Err(e) = std::fs::rename(&tmp, &path) {
                let _ = std::fs::remove_file(&tmp);
                return Err(e.into());
            }
            log::trace!("Room {id} saved");
            Ok(())
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "fs"
    }
}
