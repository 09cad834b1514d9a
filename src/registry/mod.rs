//! Room registry: code allocation, room lifecycle, and the public lobby list

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::info;
use uuid::Uuid;

use crate::game::{GameRoom, RoomCommand, RoomConfig, RoomError, RoomHandle, SessionSender};

/// Room code alphabet (uppercase letters and digits)
const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// Display names are truncated to this many characters
const NAME_MAX_CHARS: usize = 15;

/// Public lobby entry for one room
#[derive(Debug, Clone, Serialize)]
pub struct PublicRoomInfo {
    pub id: String,
    pub owner_name: String,
    pub player_count: usize,
    pub max_players: usize,
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomHandle>>,
    config: RoomConfig,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Create a new room with the caller as sole player and owner.
    /// Returns the room handle and the assigned player id; the welcome
    /// message arrives on the session channel.
    pub async fn create_room(
        &self,
        name: String,
        is_public: bool,
        sender: SessionSender,
    ) -> Result<(RoomHandle, Uuid), RoomError> {
        let name = sanitize_name(&name)?;
        let player_id = Uuid::new_v4();

        // Allocate a fresh code; the vacant-entry insert makes allocation
        // collision-safe under concurrent creation
        let handle = loop {
            let code = generate_room_code();
            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    let (room, handle) = GameRoom::new(code.clone(), is_public, self.config);
                    vacant.insert(handle.clone());

                    let rooms = Arc::clone(&self.rooms);
                    tokio::spawn(async move {
                        room.run().await;
                        rooms.remove(&code);
                        info!(room_id = %code, "Room removed from registry");
                    });

                    break handle;
                }
            }
        };

        info!(room_id = %handle.id, player_id = %player_id, is_public, "Room created");

        self.attach(&handle, player_id, name, sender).await?;
        Ok((handle, player_id))
    }

    /// Join an existing room by code
    pub async fn join_room(
        &self,
        room_id: &str,
        name: String,
        sender: SessionSender,
    ) -> Result<(RoomHandle, Uuid), RoomError> {
        let name = sanitize_name(&name)?;
        let code = room_id.trim().to_uppercase();

        let handle = self
            .rooms
            .get(&code)
            .map(|entry| entry.value().clone())
            .ok_or(RoomError::RoomNotFound)?;

        let player_id = Uuid::new_v4();
        self.attach(&handle, player_id, name, sender).await?;
        Ok((handle, player_id))
    }

    /// Funnel a disconnect through the room's command channel
    pub async fn remove_session(&self, room_id: &str, player_id: Uuid) {
        if let Some(handle) = self.rooms.get(room_id).map(|entry| entry.value().clone()) {
            let _ = handle
                .cmd_tx
                .send(RoomCommand::Leave { player_id })
                .await;
        }
    }

    /// Snapshot of public rooms still waiting for players
    pub fn list_public_rooms(&self) -> Vec<PublicRoomInfo> {
        self.rooms
            .iter()
            .filter_map(|entry| {
                let lobby = entry.value().lobby.read();
                (lobby.is_public && lobby.joinable && lobby.player_count > 0).then(|| {
                    PublicRoomInfo {
                        id: entry.key().clone(),
                        owner_name: lobby.owner_name.clone(),
                        player_count: lobby.player_count,
                        max_players: lobby.max_players,
                    }
                })
            })
            .collect()
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_players(&self) -> usize {
        self.rooms
            .iter()
            .map(|entry| entry.value().lobby.read().player_count)
            .sum()
    }

    async fn attach(
        &self,
        handle: &RoomHandle,
        player_id: Uuid,
        name: String,
        sender: SessionSender,
    ) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        handle
            .cmd_tx
            .send(RoomCommand::Join {
                player_id,
                name,
                sender,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RoomError::RoomNotFound)?;

        // A dropped reply means the room task died between lookup and join
        reply_rx.await.map_err(|_| RoomError::RoomNotFound)?
    }
}

fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Trim and length-limit a display name
fn sanitize_name(name: &str) -> Result<String, RoomError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RoomError::InvalidName);
    }
    Ok(trimmed.chars().take(NAME_MAX_CHARS).collect())
}
