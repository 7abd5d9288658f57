//! Bullet ledger - in-flight projectiles

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::physics::{PhysicsSystem, Position};

/// Active bullet in the world
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

impl Bullet {
    /// Create a bullet with a fresh server-side id
    pub fn new(origin: Position, vx: f32, vy: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            x: origin.x,
            y: origin.y,
            vx,
            vy,
        }
    }

    /// Move `speed` units along the velocity direction, returns false once out of bounds
    pub fn update(&mut self, speed: f32) -> bool {
        let (x, y) = PhysicsSystem::advance(self.x, self.y, self.vx, self.vy, speed);
        self.x = x;
        self.y = y;
        self.in_bounds()
    }

    pub fn in_bounds(&self) -> bool {
        PhysicsSystem::in_bullet_bounds(self.x, self.y)
    }
}

/// Outcome of one ledger tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Bullets in flight when the tick started
    pub advanced: usize,
    /// Bullets removed for leaving the field
    pub pruned: usize,
}

/// Bullets in spawn order
#[derive(Debug, Default)]
pub struct BulletLedger {
    bullets: Vec<Bullet>,
}

impl BulletLedger {
    /// Spawn a bullet. One that starts out of bounds is returned but never stored.
    pub fn spawn(&mut self, origin: Position, vx: f32, vy: f32) -> Bullet {
        let bullet = Bullet::new(origin, vx, vy);
        if bullet.in_bounds() {
            self.bullets.push(bullet);
        }
        bullet
    }

    /// Advance every bullet and prune those that left the field
    pub fn tick(&mut self, speed: f32) -> TickReport {
        let advanced = self.bullets.len();
        self.bullets.retain_mut(|b| b.update(speed));
        TickReport {
            advanced,
            pruned: advanced - self.bullets.len(),
        }
    }

    pub fn snapshot(&self) -> Vec<Bullet> {
        self.bullets.clone()
    }

    pub fn len(&self) -> usize {
        self.bullets.len()
    }
}
