//! Wire snapshot construction

use uuid::Uuid;

use crate::game::room::{PlayerState, RoomConfig, RoomPhase};
use crate::ws::protocol::{PlayerSnapshot, RoomSnapshot, RoomStateKind};

/// Map the internal phase to the wire-compatible state string
pub fn phase_kind(phase: &RoomPhase) -> RoomStateKind {
    match phase {
        RoomPhase::Waiting => RoomStateKind::Waiting,
        RoomPhase::Countdown { .. } => RoomStateKind::Countdown,
        RoomPhase::Playing => RoomStateKind::Playing,
        RoomPhase::Finished { .. } => RoomStateKind::Finished,
    }
}

/// Build the full room snapshot broadcast to clients
pub fn build<'a>(
    id: &str,
    owner_id: Option<Uuid>,
    is_public: bool,
    phase: &RoomPhase,
    config: &RoomConfig,
    players: impl Iterator<Item = &'a PlayerState>,
) -> RoomSnapshot {
    RoomSnapshot {
        id: id.to_string(),
        owner_id: owner_id.unwrap_or_default(),
        is_public,
        state: phase_kind(phase),
        arena_radius: config.arena_radius,
        player_radius: config.player_radius,
        max_players: config.max_players,
        players: players
            .map(|p| {
                (
                    p.id,
                    PlayerSnapshot {
                        id: p.id,
                        name: p.name.clone(),
                        color: p.color.clone(),
                        x: p.x,
                        y: p.y,
                        alive: p.alive,
                        score: p.score,
                    },
                )
            })
            .collect(),
    }
}
