//! Room state machine and authoritative tick loop
//!
//! Each room is an isolated actor: one tokio task owns all room state and
//! drains a command channel at tick boundaries, so membership changes,
//! inputs, and simulation steps are serialized with no shared locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::physics::{PhysicsSystem, COLLISION_PASSES};
use crate::game::{snapshot, SessionSender};
use crate::util::time::{SIMULATION_TPS, TICK_DURATION_MICROS};
use crate::ws::protocol::{RoomSnapshot, ServerMsg};

/// Pre-round countdown length in seconds
pub const COUNTDOWN_SECONDS: u32 = 3;

/// Fixed avatar color palette, assigned by join order
pub const PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
];

/// Room phase (serialized to bare strings on the wire)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoomPhase {
    /// In the lobby, waiting for the owner to start
    Waiting,
    /// Pre-round countdown, in simulation ticks
    Countdown { ticks_left: u32 },
    /// Round in progress
    Playing,
    /// Round over; `winner` is None on a draw
    Finished { winner: Option<Uuid> },
}

/// Simulation constants fixed at room creation
#[derive(Debug, Clone, Copy)]
pub struct RoomConfig {
    pub arena_radius: f32,
    pub player_radius: f32,
    pub max_players: usize,
    pub min_players: usize,
    pub idle_timeout: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            arena_radius: 300.0,
            player_radius: 25.0,
            max_players: 8,
            min_players: 2,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Room errors, surfaced to the offending client only
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("name must not be empty")]
    InvalidName,

    #[error("room not found")]
    RoomNotFound,

    #[error("room is full")]
    RoomFull,

    #[error("room is not joinable")]
    RoomNotJoinable,

    #[error("only the room owner can do that")]
    NotOwner,

    #[error("not enough players")]
    NotEnoughPlayers,

    #[error("cannot {0} in the current room state")]
    InvalidTransition(&'static str),
}

/// One player's authoritative state
#[derive(Debug)]
pub struct PlayerState {
    pub id: Uuid,
    pub name: String,
    pub color: String,

    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub alive: bool,
    pub score: u32,

    /// Monotonic join sequence; drives owner reassignment and spawn order
    pub join_seq: u64,

    /// Accumulated input deltas, consumed at the next tick boundary
    pub pending_dx: f32,
    pub pending_dy: f32,

    pub sender: SessionSender,
}

/// Commands routed into a room's task
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        player_id: Uuid,
        name: String,
        sender: SessionSender,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        player_id: Uuid,
    },
    Start {
        player_id: Uuid,
    },
    Input {
        player_id: Uuid,
        dx: f32,
        dy: f32,
    },
    Rematch {
        player_id: Uuid,
    },
}

/// Lobby-facing room info, updated by the room task and read by the registry
#[derive(Debug, Clone, Default)]
pub struct LobbyInfo {
    pub owner_name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub is_public: bool,
    pub joinable: bool,
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub lobby: Arc<RwLock<LobbyInfo>>,
}

/// The authoritative game room
pub struct GameRoom {
    id: String,
    is_public: bool,
    config: RoomConfig,
    phase: RoomPhase,
    players: HashMap<Uuid, PlayerState>,
    owner_id: Option<Uuid>,
    next_join_seq: u64,
    cmd_rx: mpsc::Receiver<RoomCommand>,
    lobby: Arc<RwLock<LobbyInfo>>,
    had_players: bool,
    shutdown: bool,
    last_activity: Instant,
}

impl GameRoom {
    /// Create a new room in the waiting state
    pub fn new(id: String, is_public: bool, config: RoomConfig) -> (Self, RoomHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let lobby = Arc::new(RwLock::new(LobbyInfo {
            max_players: config.max_players,
            is_public,
            joinable: true,
            ..LobbyInfo::default()
        }));

        let handle = RoomHandle {
            id: id.clone(),
            cmd_tx,
            lobby: lobby.clone(),
        };

        let room = Self {
            id,
            is_public,
            config,
            phase: RoomPhase::Waiting,
            players: HashMap::new(),
            owner_id: None,
            next_join_seq: 0,
            cmd_rx,
            lobby,
            had_players: false,
            shutdown: false,
            last_activity: Instant::now(),
        };

        (room, handle)
    }

    /// Run the authoritative tick loop until the room empties or idles out
    pub async fn run(mut self) {
        info!(room_id = %self.id, "Room started");

        let mut tick_interval = interval(Duration::from_micros(TICK_DURATION_MICROS));
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain buffered commands at the tick boundary
            while let Ok(cmd) = self.cmd_rx.try_recv() {
                self.handle_command(cmd);
            }

            self.advance_tick();

            if self.shutdown || (self.had_players && self.players.is_empty()) {
                info!(room_id = %self.id, "All players left, closing room");
                break;
            }

            if self.last_activity.elapsed() >= self.config.idle_timeout {
                warn!(room_id = %self.id, "Room idle timeout, closing room");
                self.broadcast(ServerMsg::Error {
                    message: "room closed due to inactivity".to_string(),
                });
                break;
            }
        }

        info!(room_id = %self.id, "Room stopped");
    }

    /// Apply one command. All room mutation funnels through here or
    /// [`advance_tick`](Self::advance_tick), both called only from the room task.
    pub fn handle_command(&mut self, cmd: RoomCommand) {
        self.last_activity = Instant::now();

        match cmd {
            RoomCommand::Join {
                player_id,
                name,
                sender,
                reply,
            } => {
                let result = self.try_add_player(player_id, name, sender);
                let _ = reply.send(result);
            }
            RoomCommand::Leave { player_id } => self.handle_leave(player_id),
            RoomCommand::Start { player_id } => self.handle_start(player_id),
            RoomCommand::Input { player_id, dx, dy } => self.handle_input(player_id, dx, dy),
            RoomCommand::Rematch { player_id } => self.handle_rematch(player_id),
        }
    }

    fn try_add_player(
        &mut self,
        player_id: Uuid,
        name: String,
        sender: SessionSender,
    ) -> Result<(), RoomError> {
        if !matches!(self.phase, RoomPhase::Waiting) {
            return Err(RoomError::RoomNotJoinable);
        }
        if self.players.len() >= self.config.max_players {
            return Err(RoomError::RoomFull);
        }

        let join_seq = self.next_join_seq;
        self.next_join_seq += 1;

        let (x, y) = PhysicsSystem::spawn_position(
            join_seq as usize,
            self.config.max_players,
            self.config.arena_radius,
        );

        let player = PlayerState {
            id: player_id,
            name,
            color: self.assign_color(),
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            alive: true,
            score: 0,
            join_seq,
            pending_dx: 0.0,
            pending_dy: 0.0,
            sender,
        };

        if self.owner_id.is_none() {
            self.owner_id = Some(player_id);
        }
        self.players.insert(player_id, player);
        self.had_players = true;
        self.update_lobby();

        let room = self.snapshot();
        self.send_to(
            player_id,
            ServerMsg::Welcome {
                player_id,
                room: room.clone(),
            },
        );
        self.broadcast(ServerMsg::PlayerJoined { room });

        info!(
            room_id = %self.id,
            player_id = %player_id,
            player_count = self.players.len(),
            "Player joined room"
        );

        Ok(())
    }

    /// First palette color not in use, falling back to cycling once exhausted
    fn assign_color(&self) -> String {
        PALETTE
            .iter()
            .find(|c| !self.players.values().any(|p| p.color == **c))
            .copied()
            .unwrap_or(PALETTE[self.players.len() % PALETTE.len()])
            .to_string()
    }

    fn handle_leave(&mut self, player_id: Uuid) {
        if self.players.remove(&player_id).is_none() {
            return;
        }

        info!(
            room_id = %self.id,
            player_id = %player_id,
            player_count = self.players.len(),
            "Player left room"
        );

        if self.players.is_empty() {
            self.shutdown = true;
            self.update_lobby();
            return;
        }

        if self.owner_id == Some(player_id) {
            self.owner_id = self
                .players
                .values()
                .min_by_key(|p| p.join_seq)
                .map(|p| p.id);
            if let Some(new_owner) = self.owner_id {
                info!(room_id = %self.id, owner_id = %new_owner, "Owner reassigned");
            }
        }

        // A countdown without enough players reverts to the lobby
        if matches!(self.phase, RoomPhase::Countdown { .. })
            && self.players.len() < self.config.min_players
        {
            self.phase = RoomPhase::Waiting;
            info!(room_id = %self.id, "Countdown aborted, not enough players");
        }

        self.update_lobby();
        self.broadcast(ServerMsg::PlayerLeft {
            room: self.snapshot(),
        });

        // Mid-round departure counts as elimination
        self.check_terminal();
    }

    fn handle_start(&mut self, player_id: Uuid) {
        let result = match self.phase {
            RoomPhase::Waiting => {
                if self.owner_id != Some(player_id) {
                    Err(RoomError::NotOwner)
                } else if self.players.len() < self.config.min_players {
                    Err(RoomError::NotEnoughPlayers)
                } else {
                    Ok(())
                }
            }
            _ => Err(RoomError::InvalidTransition("start")),
        };

        match result {
            Ok(()) => {
                self.begin_countdown();
                self.broadcast(ServerMsg::GameStarting {
                    room: self.snapshot(),
                });
                info!(room_id = %self.id, "Game starting");
            }
            Err(e) => self.send_error(player_id, &e),
        }
    }

    fn handle_rematch(&mut self, player_id: Uuid) {
        let result = match self.phase {
            RoomPhase::Finished { .. } => {
                if self.owner_id != Some(player_id) {
                    Err(RoomError::NotOwner)
                } else if self.players.len() < self.config.min_players {
                    Err(RoomError::NotEnoughPlayers)
                } else {
                    Ok(())
                }
            }
            _ => Err(RoomError::InvalidTransition("rematch")),
        };

        match result {
            Ok(()) => {
                self.begin_countdown();
                self.broadcast(ServerMsg::RematchStarting {
                    room: self.snapshot(),
                });
                info!(room_id = %self.id, "Rematch starting");
            }
            Err(e) => self.send_error(player_id, &e),
        }
    }

    fn handle_input(&mut self, player_id: Uuid, dx: f32, dy: f32) {
        if !matches!(self.phase, RoomPhase::Playing) {
            return;
        }
        if let Some(player) = self.players.get_mut(&player_id) {
            if player.alive {
                player.pending_dx += dx;
                player.pending_dy += dy;
            }
        }
    }

    /// Reset positions and enter the countdown; scores are kept
    fn begin_countdown(&mut self) {
        self.reset_round();
        self.phase = RoomPhase::Countdown {
            ticks_left: COUNTDOWN_SECONDS * SIMULATION_TPS,
        };
        self.update_lobby();
    }

    fn reset_round(&mut self) {
        let count = self.players.len();
        let mut ordered: Vec<&mut PlayerState> = self.players.values_mut().collect();
        ordered.sort_by_key(|p| p.join_seq);

        for (index, player) in ordered.into_iter().enumerate() {
            let (x, y) =
                PhysicsSystem::spawn_position(index, count, self.config.arena_radius);
            player.x = x;
            player.y = y;
            player.vx = 0.0;
            player.vy = 0.0;
            player.alive = true;
            player.pending_dx = 0.0;
            player.pending_dy = 0.0;
        }
    }

    /// Advance one simulation tick
    pub fn advance_tick(&mut self) {
        match self.phase {
            RoomPhase::Waiting | RoomPhase::Finished { .. } => {}
            RoomPhase::Countdown { ticks_left } => {
                if ticks_left % SIMULATION_TPS == 0 {
                    let countdown = ticks_left / SIMULATION_TPS;
                    self.broadcast(ServerMsg::Countdown {
                        room: self.snapshot(),
                        countdown,
                    });
                }

                let remaining = ticks_left - 1;
                if remaining == 0 {
                    self.phase = RoomPhase::Playing;
                    self.update_lobby();
                    info!(room_id = %self.id, "Round started");
                } else {
                    self.phase = RoomPhase::Countdown {
                        ticks_left: remaining,
                    };
                }
            }
            RoomPhase::Playing => self.step_simulation(),
        }
    }

    fn step_simulation(&mut self) {
        // An active round keeps the room from idling out
        self.last_activity = Instant::now();

        // 1. Consume pending inputs from a consistent per-tick snapshot
        for player in self.players.values_mut() {
            if player.alive && (player.pending_dx != 0.0 || player.pending_dy != 0.0) {
                let (vx, vy) = PhysicsSystem::apply_push(
                    player.vx,
                    player.vy,
                    player.pending_dx,
                    player.pending_dy,
                );
                player.vx = vx;
                player.vy = vy;
            }
            player.pending_dx = 0.0;
            player.pending_dy = 0.0;
        }

        // 2. Integrate and apply friction
        for player in self.players.values_mut().filter(|p| p.alive) {
            let (x, y, vx, vy) = PhysicsSystem::integrate(player.x, player.y, player.vx, player.vy);
            player.x = x;
            player.y = y;
            player.vx = vx;
            player.vy = vy;
        }

        // 3. Pairwise collisions in ascending-id order, iterated to
        //    approximate simultaneous multi-way contact
        let mut alive_ids: Vec<Uuid> = self
            .players
            .values()
            .filter(|p| p.alive)
            .map(|p| p.id)
            .collect();
        alive_ids.sort_unstable();

        for _ in 0..COLLISION_PASSES {
            for i in 0..alive_ids.len() {
                for j in (i + 1)..alive_ids.len() {
                    self.resolve_pair(alive_ids[i], alive_ids[j]);
                }
            }
        }

        // 4. Eliminate avatars pushed out of the arena; dead players freeze
        let arena_radius = self.config.arena_radius;
        for player in self.players.values_mut().filter(|p| p.alive) {
            if PhysicsSystem::is_outside_arena(player.x, player.y, arena_radius) {
                player.alive = false;
                player.vx = 0.0;
                player.vy = 0.0;
                debug!(room_id = %self.id, player_id = %player.id, "Player eliminated");
            }
        }

        // 5/6. Terminal check, then broadcast unless the round just ended
        if !self.check_terminal() {
            self.broadcast(ServerMsg::State {
                room: self.snapshot(),
            });
        }
    }

    fn resolve_pair(&mut self, id1: Uuid, id2: Uuid) {
        let Some(p1) = self.players.get(&id1) else {
            return;
        };
        let Some(p2) = self.players.get(&id2) else {
            return;
        };
        let (x1, y1, vx1, vy1) = (p1.x, p1.y, p1.vx, p1.vy);
        let (x2, y2, vx2, vy2) = (p2.x, p2.y, p2.vx, p2.vy);

        if !PhysicsSystem::check_collision(x1, y1, x2, y2, self.config.player_radius) {
            return;
        }

        let (a, b) = PhysicsSystem::resolve_collision(
            x1,
            y1,
            vx1,
            vy1,
            x2,
            y2,
            vx2,
            vy2,
            self.config.player_radius,
        );

        if let Some(p1) = self.players.get_mut(&id1) {
            (p1.x, p1.y, p1.vx, p1.vy) = a;
        }
        if let Some(p2) = self.players.get_mut(&id2) {
            (p2.x, p2.y, p2.vx, p2.vy) = b;
        }
    }

    /// Transition to finished when at most one player is left alive.
    /// Returns true if the round ended this call.
    fn check_terminal(&mut self) -> bool {
        if !matches!(self.phase, RoomPhase::Playing) {
            return false;
        }

        let alive: Vec<Uuid> = self
            .players
            .values()
            .filter(|p| p.alive)
            .map(|p| p.id)
            .collect();
        if alive.len() > 1 {
            return false;
        }

        // Exactly one survivor wins; simultaneous elimination is a draw
        let winner = alive.first().copied();
        if let Some(id) = winner {
            if let Some(player) = self.players.get_mut(&id) {
                player.score += 1;
            }
        }

        self.phase = RoomPhase::Finished { winner };
        self.update_lobby();
        self.broadcast(ServerMsg::Finished {
            room: self.snapshot(),
            winner,
        });

        info!(room_id = %self.id, winner = ?winner, "Round finished");
        true
    }

    /// Build the wire snapshot of this room
    pub fn snapshot(&self) -> RoomSnapshot {
        snapshot::build(
            &self.id,
            self.owner_id,
            self.is_public,
            &self.phase,
            &self.config,
            self.players.values(),
        )
    }

    fn update_lobby(&self) {
        let owner_name = self
            .owner_id
            .and_then(|id| self.players.get(&id))
            .map(|p| p.name.clone())
            .unwrap_or_default();

        *self.lobby.write() = LobbyInfo {
            owner_name,
            player_count: self.players.len(),
            max_players: self.config.max_players,
            is_public: self.is_public,
            joinable: matches!(self.phase, RoomPhase::Waiting),
        };
    }

    /// Fire-and-forget broadcast to every connected session
    fn broadcast(&self, msg: ServerMsg) {
        for player in self.players.values() {
            let _ = player.sender.try_send(msg.clone());
        }
    }

    fn send_to(&self, player_id: Uuid, msg: ServerMsg) {
        if let Some(player) = self.players.get(&player_id) {
            let _ = player.sender.try_send(msg);
        }
    }

    fn send_error(&self, player_id: Uuid, err: &RoomError) {
        debug!(room_id = %self.id, player_id = %player_id, error = %err, "Rejected command");
        self.send_to(
            player_id,
            ServerMsg::Error {
                message: err.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::RoomStateKind;

    fn test_room(config: RoomConfig) -> GameRoom {
        let (room, _handle) = GameRoom::new("AB12".to_string(), true, config);
        room
    }

    fn join(room: &mut GameRoom, name: &str) -> (Uuid, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(256);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let player_id = Uuid::new_v4();
        room.handle_command(RoomCommand::Join {
            player_id,
            name: name.to_string(),
            sender: tx,
            reply: reply_tx,
        });
        assert_eq!(reply_rx.try_recv().unwrap(), Ok(()));
        (player_id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    /// Drive the room into the playing phase with two players
    fn start_playing(room: &mut GameRoom, owner: Uuid) {
        room.handle_command(RoomCommand::Start { player_id: owner });
        for _ in 0..(COUNTDOWN_SECONDS * SIMULATION_TPS) {
            room.advance_tick();
        }
        assert_eq!(room.phase, RoomPhase::Playing);
    }

    #[test]
    fn input_never_moves_players_outside_playing() {
        let mut room = test_room(RoomConfig::default());
        let (p1, mut rx1) = join(&mut room, "Alice");
        let (_p2, _rx2) = join(&mut room, "Bob");

        let before = room.snapshot();
        room.handle_command(RoomCommand::Input {
            player_id: p1,
            dx: 10.0,
            dy: 0.0,
        });
        for _ in 0..120 {
            room.advance_tick();
        }

        let after = room.snapshot();
        for (id, player) in &before.players {
            assert_eq!(player.x, after.players[id].x);
            assert_eq!(player.y, after.players[id].y);
        }
        assert!(!drain(&mut rx1)
            .iter()
            .any(|m| matches!(m, ServerMsg::State { .. })));
    }

    #[test]
    fn start_requires_owner() {
        let mut room = test_room(RoomConfig::default());
        let (_p1, _rx1) = join(&mut room, "Alice");
        let (p2, mut rx2) = join(&mut room, "Bob");
        drain(&mut rx2);

        room.handle_command(RoomCommand::Start { player_id: p2 });

        assert_eq!(room.snapshot().state, RoomStateKind::Waiting);
        let msgs = drain(&mut rx2);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::Error { message } if message.contains("owner"))));
    }

    #[test]
    fn start_requires_two_players() {
        let mut room = test_room(RoomConfig::default());
        let (p1, mut rx1) = join(&mut room, "Alice");
        drain(&mut rx1);

        room.handle_command(RoomCommand::Start { player_id: p1 });

        assert_eq!(room.snapshot().state, RoomStateKind::Waiting);
        assert!(drain(&mut rx1)
            .iter()
            .any(|m| matches!(m, ServerMsg::Error { message } if message.contains("players"))));
    }

    #[test]
    fn rematch_while_waiting_is_rejected() {
        let mut room = test_room(RoomConfig::default());
        let (p1, mut rx1) = join(&mut room, "Alice");
        let (_p2, _rx2) = join(&mut room, "Bob");
        drain(&mut rx1);

        room.handle_command(RoomCommand::Rematch { player_id: p1 });

        assert_eq!(room.snapshot().state, RoomStateKind::Waiting);
        assert!(drain(&mut rx1)
            .iter()
            .any(|m| matches!(m, ServerMsg::Error { .. })));
    }

    #[test]
    fn countdown_broadcasts_three_two_one_then_state() {
        let mut room = test_room(RoomConfig::default());
        let (p1, mut rx1) = join(&mut room, "Alice");
        let (_p2, _rx2) = join(&mut room, "Bob");
        drain(&mut rx1);

        room.handle_command(RoomCommand::Start { player_id: p1 });
        for _ in 0..(COUNTDOWN_SECONDS * SIMULATION_TPS + 1) {
            room.advance_tick();
        }

        let msgs = drain(&mut rx1);
        assert!(matches!(msgs[0], ServerMsg::GameStarting { .. }));

        let counts: Vec<u32> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMsg::Countdown { countdown, .. } => Some(*countdown),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![3, 2, 1]);

        assert!(matches!(msgs.last(), Some(ServerMsg::State { .. })));
    }

    #[test]
    fn player_past_arena_edge_dies_next_tick() {
        let config = RoomConfig {
            arena_radius: 200.0,
            ..RoomConfig::default()
        };
        let mut room = test_room(config);
        let (p1, _rx1) = join(&mut room, "Alice");
        let (p2, _rx2) = join(&mut room, "Bob");
        start_playing(&mut room, p1);

        {
            let pushed = room.players.get_mut(&p2).unwrap();
            pushed.x = 210.0;
            pushed.y = 0.0;
            pushed.vx = 0.0;
            pushed.vy = 0.0;
        }
        {
            let safe = room.players.get_mut(&p1).unwrap();
            safe.x = 0.0;
            safe.y = 0.0;
        }

        room.advance_tick();

        assert!(!room.players[&p2].alive);
        assert_eq!(room.phase, RoomPhase::Finished { winner: Some(p1) });
    }

    #[test]
    fn winner_scores_once_and_state_stops_after_finish() {
        let config = RoomConfig {
            arena_radius: 200.0,
            ..RoomConfig::default()
        };
        let mut room = test_room(config);
        let (p1, mut rx1) = join(&mut room, "Alice");
        let (p2, _rx2) = join(&mut room, "Bob");
        start_playing(&mut room, p1);

        room.players.get_mut(&p2).unwrap().x = 500.0;
        room.players.get_mut(&p1).unwrap().x = 0.0;
        room.advance_tick();
        assert_eq!(room.players[&p1].score, 1);

        drain(&mut rx1);
        for _ in 0..120 {
            room.advance_tick();
        }

        assert_eq!(room.players[&p1].score, 1);
        assert!(drain(&mut rx1).is_empty());
    }

    #[test]
    fn simultaneous_elimination_is_a_draw() {
        let config = RoomConfig {
            arena_radius: 200.0,
            ..RoomConfig::default()
        };
        let mut room = test_room(config);
        let (p1, _rx1) = join(&mut room, "Alice");
        let (p2, _rx2) = join(&mut room, "Bob");
        start_playing(&mut room, p1);

        room.players.get_mut(&p1).unwrap().x = 500.0;
        room.players.get_mut(&p2).unwrap().x = -500.0;
        room.advance_tick();

        assert_eq!(room.phase, RoomPhase::Finished { winner: None });
        assert_eq!(room.players[&p1].score, 0);
        assert_eq!(room.players[&p2].score, 0);
    }

    #[test]
    fn collision_pushes_players_apart_symmetrically() {
        let mut room = test_room(RoomConfig::default());
        let (p1, _rx1) = join(&mut room, "Alice");
        let (p2, _rx2) = join(&mut room, "Bob");
        start_playing(&mut room, p1);

        {
            let a = room.players.get_mut(&p1).unwrap();
            a.x = -10.0;
            a.y = 0.0;
            a.vx = 0.0;
            a.vy = 0.0;
        }
        {
            let b = room.players.get_mut(&p2).unwrap();
            b.x = 10.0;
            b.y = 0.0;
            b.vx = 0.0;
            b.vy = 0.0;
        }

        room.advance_tick();

        let (ax, avx) = (room.players[&p1].x, room.players[&p1].vx);
        let (bx, bvx) = (room.players[&p2].x, room.players[&p2].vx);
        assert!((ax + bx).abs() < 1e-3, "displacement not symmetric");
        assert!((avx + bvx).abs() < 1e-3, "impulse not symmetric");
        assert!(bx - ax >= 2.0 * room.config.player_radius - 1e-3);
    }

    #[test]
    fn owner_leave_transfers_to_earliest_joined() {
        let mut room = test_room(RoomConfig::default());
        let (p1, _rx1) = join(&mut room, "Alice");
        let (p2, _rx2) = join(&mut room, "Bob");
        let (_p3, _rx3) = join(&mut room, "Cleo");

        room.handle_command(RoomCommand::Leave { player_id: p1 });

        assert_eq!(room.snapshot().owner_id, p2);
    }

    #[test]
    fn last_leave_shuts_the_room_down() {
        let mut room = test_room(RoomConfig::default());
        let (p1, _rx1) = join(&mut room, "Alice");

        room.handle_command(RoomCommand::Leave { player_id: p1 });

        assert!(room.shutdown);
        assert!(room.players.is_empty());
    }

    #[test]
    fn join_full_room_is_rejected_without_broadcast() {
        let config = RoomConfig {
            max_players: 2,
            ..RoomConfig::default()
        };
        let mut room = test_room(config);
        let (_p1, mut rx1) = join(&mut room, "Alice");
        let (_p2, _rx2) = join(&mut room, "Bob");
        drain(&mut rx1);

        let (tx, _rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        room.handle_command(RoomCommand::Join {
            player_id: Uuid::new_v4(),
            name: "Late".to_string(),
            sender: tx,
            reply: reply_tx,
        });

        assert_eq!(reply_rx.try_recv().unwrap(), Err(RoomError::RoomFull));
        assert!(!drain(&mut rx1)
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerJoined { .. })));
    }

    #[test]
    fn join_rejected_while_playing() {
        let mut room = test_room(RoomConfig::default());
        let (p1, _rx1) = join(&mut room, "Alice");
        let (_p2, _rx2) = join(&mut room, "Bob");
        start_playing(&mut room, p1);

        let (tx, _rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        room.handle_command(RoomCommand::Join {
            player_id: Uuid::new_v4(),
            name: "Late".to_string(),
            sender: tx,
            reply: reply_tx,
        });

        assert_eq!(reply_rx.try_recv().unwrap(), Err(RoomError::RoomNotJoinable));
    }

    #[test]
    fn leave_during_countdown_reverts_to_waiting() {
        let mut room = test_room(RoomConfig::default());
        let (p1, _rx1) = join(&mut room, "Alice");
        let (p2, _rx2) = join(&mut room, "Bob");

        room.handle_command(RoomCommand::Start { player_id: p1 });
        assert!(matches!(room.phase, RoomPhase::Countdown { .. }));

        room.handle_command(RoomCommand::Leave { player_id: p2 });
        assert_eq!(room.phase, RoomPhase::Waiting);
    }

    #[test]
    fn mid_round_disconnect_ends_round_with_survivor_win() {
        let mut room = test_room(RoomConfig::default());
        let (p1, _rx1) = join(&mut room, "Alice");
        let (p2, _rx2) = join(&mut room, "Bob");
        start_playing(&mut room, p1);

        room.handle_command(RoomCommand::Leave { player_id: p2 });

        assert_eq!(room.phase, RoomPhase::Finished { winner: Some(p1) });
        assert_eq!(room.players[&p1].score, 1);
    }

    #[test]
    fn rematch_resets_round_but_keeps_scores() {
        let config = RoomConfig {
            arena_radius: 200.0,
            ..RoomConfig::default()
        };
        let mut room = test_room(config);
        let (p1, mut rx1) = join(&mut room, "Alice");
        let (p2, _rx2) = join(&mut room, "Bob");
        start_playing(&mut room, p1);

        room.players.get_mut(&p2).unwrap().x = 500.0;
        room.advance_tick();
        assert!(matches!(room.phase, RoomPhase::Finished { .. }));
        drain(&mut rx1);

        room.handle_command(RoomCommand::Rematch { player_id: p1 });

        assert!(matches!(room.phase, RoomPhase::Countdown { .. }));
        assert!(room.players[&p2].alive);
        assert_eq!(room.players[&p1].score, 1);
        assert!(drain(&mut rx1)
            .iter()
            .any(|m| matches!(m, ServerMsg::RematchStarting { .. })));
    }

    #[test]
    fn colors_are_unique_while_palette_lasts() {
        let mut room = test_room(RoomConfig::default());
        for i in 0..8 {
            let _ = join(&mut room, &format!("P{i}"));
        }
        let snapshot = room.snapshot();
        let mut colors: Vec<&str> = snapshot.players.values().map(|p| p.color.as_str()).collect();
        colors.sort_unstable();
        colors.dedup();
        assert_eq!(colors.len(), 8);
    }
}
