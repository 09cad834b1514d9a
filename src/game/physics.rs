//! Sumo physics: integration, friction, and pairwise collision resolution
//!
//! All functions are pure and operate in per-tick units at a fixed 60 Hz
//! simulation rate, so velocities are displacement-per-tick.

/// Velocity retained per tick (coast to rest absent input)
pub const FRICTION: f32 = 0.98;

/// Impulse added per consumed input vector
pub const PUSH_IMPULSE: f32 = 2.0;

/// Impulse applied to each body of a colliding pair
pub const BOUNCE_IMPULSE: f32 = 15.0;

/// Hard cap on speed after a push is applied
pub const MAX_SPEED: f32 = 40.0;

/// Resolution passes per tick to approximate simultaneous multi-way contact
pub const COLLISION_PASSES: u32 = 2;

/// Players spawn on a ring at this fraction of the arena radius
pub const SPAWN_RING_FACTOR: f32 = 0.7;

/// Physics system for updating avatar positions and velocities
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Apply a push input to a velocity.
    /// The input is a direction; its magnitude is discarded and a fixed
    /// impulse is applied. Returns (new_vx, new_vy).
    pub fn apply_push(vx: f32, vy: f32, dx: f32, dy: f32) -> (f32, f32) {
        let magnitude = (dx * dx + dy * dy).sqrt();
        if magnitude <= f32::EPSILON {
            return (vx, vy);
        }

        let mut new_vx = vx + (dx / magnitude) * PUSH_IMPULSE;
        let mut new_vy = vy + (dy / magnitude) * PUSH_IMPULSE;

        let speed = (new_vx * new_vx + new_vy * new_vy).sqrt();
        if speed > MAX_SPEED {
            let scale = MAX_SPEED / speed;
            new_vx *= scale;
            new_vy *= scale;
        }

        (new_vx, new_vy)
    }

    /// Integrate one tick of movement and apply friction.
    /// Returns (new_x, new_y, new_vx, new_vy).
    pub fn integrate(x: f32, y: f32, vx: f32, vy: f32) -> (f32, f32, f32, f32) {
        (x + vx, y + vy, vx * FRICTION, vy * FRICTION)
    }

    /// Check whether two avatars overlap
    pub fn check_collision(x1: f32, y1: f32, x2: f32, y2: f32, player_radius: f32) -> bool {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let combined = player_radius * 2.0;
        dx * dx + dy * dy < combined * combined
    }

    /// Resolve a collision between two avatars: separate positions
    /// symmetrically along the contact normal and apply equal-and-opposite
    /// bounce impulses. Returns ((x1, y1, vx1, vy1), (x2, y2, vx2, vy2)).
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_collision(
        x1: f32,
        y1: f32,
        vx1: f32,
        vy1: f32,
        x2: f32,
        y2: f32,
        vx2: f32,
        vy2: f32,
        player_radius: f32,
    ) -> ((f32, f32, f32, f32), (f32, f32, f32, f32)) {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let dist = (dx * dx + dy * dy).sqrt();
        let combined = player_radius * 2.0;

        // Coincident centers: pick an arbitrary but fixed normal
        let (nx, ny) = if dist < 0.001 {
            (1.0, 0.0)
        } else {
            (dx / dist, dy / dist)
        };

        let overlap = combined - dist;
        if overlap <= 0.0 {
            return ((x1, y1, vx1, vy1), (x2, y2, vx2, vy2));
        }

        let push = overlap / 2.0;
        (
            (
                x1 - nx * push,
                y1 - ny * push,
                vx1 - nx * BOUNCE_IMPULSE,
                vy1 - ny * BOUNCE_IMPULSE,
            ),
            (
                x2 + nx * push,
                y2 + ny * push,
                vx2 + nx * BOUNCE_IMPULSE,
                vy2 + ny * BOUNCE_IMPULSE,
            ),
        )
    }

    /// An avatar whose center leaves the arena circle is eliminated
    pub fn is_outside_arena(x: f32, y: f32, arena_radius: f32) -> bool {
        x * x + y * y > arena_radius * arena_radius
    }

    /// Deterministic spawn position: avatars are spaced evenly on a ring,
    /// ordered by join sequence.
    pub fn spawn_position(index: usize, count: usize, arena_radius: f32) -> (f32, f32) {
        let count = count.max(1);
        let angle = std::f32::consts::TAU * index as f32 / count as f32;
        let distance = arena_radius * SPAWN_RING_FACTOR;
        (angle.cos() * distance, angle.sin() * distance)
    }
}
