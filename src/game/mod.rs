//! Game simulation modules

pub mod physics;
pub mod room;
pub mod snapshot;

pub use room::{GameRoom, RoomCommand, RoomConfig, RoomError, RoomHandle};

use tokio::sync::mpsc;

use crate::ws::protocol::ServerMsg;

/// Outbound channel to one session. Rooms broadcast with `try_send`, so a
/// slow or dead client drops messages instead of stalling the tick loop.
pub type SessionSender = mpsc::Sender<ServerMsg>;

/// Capacity of each session's outbound channel
pub const SESSION_CHANNEL_CAPACITY: usize = 64;
