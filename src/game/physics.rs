//! World bounds, clamping and straight-line projectile motion

use serde::{Deserialize, Serialize};

/// Play-field width
pub const WORLD_WIDTH: f32 = 900.0;
/// Play-field height
pub const WORLD_HEIGHT: f32 = 600.0;
/// Player sprite size reserved at the right/bottom edges
pub const PLAYER_SIZE: f32 = 20.0;
/// Largest x a player may occupy
pub const PLAYER_MAX_X: f32 = WORLD_WIDTH - PLAYER_SIZE;
/// Largest y a player may occupy
pub const PLAYER_MAX_Y: f32 = WORLD_HEIGHT - PLAYER_SIZE;

/// 2D coordinate in world pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Physics helpers shared by players and bullets
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Clamp a player position into [0, 880] x [0, 580]
    pub fn clamp_player(pos: Position) -> Position {
        Position {
            x: pos.x.clamp(0.0, PLAYER_MAX_X),
            y: pos.y.clamp(0.0, PLAYER_MAX_Y),
        }
    }

    /// Whether a bullet at (x, y) is still inside [0, 900] x [0, 600]
    pub fn in_bullet_bounds(x: f32, y: f32) -> bool {
        (0.0..=WORLD_WIDTH).contains(&x) && (0.0..=WORLD_HEIGHT).contains(&y)
    }

    /// Unit vector of (vx, vy), or (0, 0) for a zero-length vector
    pub fn normalize(vx: f32, vy: f32) -> (f32, f32) {
        let len = vx.hypot(vy);
        if len <= f32::EPSILON || !len.is_finite() {
            return (0.0, 0.0);
        }
        (vx / len, vy / len)
    }

    /// Advance (x, y) by `speed` units along the direction of (vx, vy)
    pub fn advance(x: f32, y: f32, vx: f32, vy: f32, speed: f32) -> (f32, f32) {
        let (dx, dy) = Self::normalize(vx, vy);
        (x + dx * speed, y + dy * speed)
    }
}
