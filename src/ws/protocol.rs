//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Create a new room, caller becomes owner
    Create {
        /// Display name for the creating player
        name: String,
        /// Whether the room appears in the public lobby listing
        #[serde(default)]
        is_public: bool,
    },

    /// Join an existing room by code
    Join { name: String, room_id: String },

    /// Owner requests countdown start
    Start,

    /// Directional push delta since the client's last significant move
    Input { dx: f32, dy: f32 },

    /// Owner requests a new round with the same roster
    Rematch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Request rejected; client returns to menu
    Error { message: String },

    /// Join/create succeeded; echoes the full room snapshot
    Welcome {
        player_id: Uuid,
        room: RoomSnapshot,
    },

    /// Membership changed
    PlayerJoined { room: RoomSnapshot },

    /// Membership changed
    PlayerLeft { room: RoomSnapshot },

    /// Countdown about to begin
    GameStarting { room: RoomSnapshot },

    /// One tick of the pre-game countdown
    Countdown { room: RoomSnapshot, countdown: u32 },

    /// Per-tick authoritative snapshot while playing
    State { room: RoomSnapshot },

    /// Round ended; `winner` is null on a draw
    Finished {
        room: RoomSnapshot,
        winner: Option<Uuid>,
    },

    /// New round beginning with reset positions
    RematchStarting { room: RoomSnapshot },
}

/// Room state as exposed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStateKind {
    Waiting,
    Countdown,
    Playing,
    Finished,
}

/// Serializable full state of a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: String,
    pub owner_id: Uuid,
    pub is_public: bool,
    pub state: RoomStateKind,
    pub arena_radius: f32,
    pub player_radius: f32,
    pub max_players: usize,
    pub players: HashMap<Uuid, PlayerSnapshot>,
}

/// Player state in a room snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub x: f32,
    pub y: f32,
    pub alive: bool,
    pub score: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_message() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"create","name":"Alice"}"#).unwrap();
        match msg {
            ClientMsg::Create { name, is_public } => {
                assert_eq!(name, "Alice");
                assert!(!is_public);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_input_message() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"input","dx":3.5,"dy":-1.0}"#).unwrap();
        match msg {
            ClientMsg::Input { dx, dy } => {
                assert_eq!(dx, 3.5);
                assert_eq!(dy, -1.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_message_type() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"teleport","x":0}"#).is_err());
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"join","name":"Bob"}"#).is_err());
    }

    #[test]
    fn room_state_serializes_as_bare_string() {
        assert_eq!(
            serde_json::to_string(&RoomStateKind::Waiting).unwrap(),
            r#""waiting""#
        );
        assert_eq!(
            serde_json::to_string(&RoomStateKind::Finished).unwrap(),
            r#""finished""#
        );
    }

    #[test]
    fn server_msg_uses_type_tag() {
        let json = serde_json::to_string(&ServerMsg::Error {
            message: "room not found".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("room not found"));
    }
}
