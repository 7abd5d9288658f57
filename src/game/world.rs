//! Authoritative world state behind a single lock
//!
//! Connections, players and bullets share one mutex so that a snapshot never
//! observes one registry updated and another not. Callers only ever get owned
//! copies out; serialization and socket writes happen after the guard drops.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::connections::{ConnectionHandle, ConnectionRegistry, Frame};

use super::bullets::{Bullet, BulletLedger, TickReport};
use super::physics::Position;
use super::players::{Player, PlayerPatch, PlayerRegistry};

#[derive(Debug, Default)]
struct WorldState {
    connections: ConnectionRegistry,
    players: PlayerRegistry,
    bullets: BulletLedger,
}

impl WorldState {
    fn prune_stale(&mut self) -> Vec<Uuid> {
        let stale = self.connections.stale();
        for id in &stale {
            self.connections.remove(id);
            self.players.remove(id);
        }
        stale
    }

    fn live_targets(&self) -> Vec<ConnectionHandle> {
        let mut targets = Vec::with_capacity(self.connections.len());
        self.connections.for_each_live(|c| targets.push(c.clone()));
        targets
    }
}

/// Point-in-time copy of the world plus the connections to deliver it to
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    pub players: Vec<Player>,
    pub bullets: Option<Vec<Bullet>>,
    pub targets: Vec<ConnectionHandle>,
    /// Connections found closed and removed while taking the snapshot
    pub reaped: Vec<Uuid>,
}

/// Registry sizes for health reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorldStats {
    pub connections: usize,
    pub players: usize,
    pub bullets: usize,
}

/// Shared world, one per server process
#[derive(Debug, Default)]
pub struct World {
    state: Mutex<WorldState>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and its default player in one step
    pub fn connect(&self, outbound: mpsc::Sender<Frame>) -> Uuid {
        let mut state = self.state.lock();
        let id = state.connections.add(outbound);
        state.players.upsert(id, PlayerPatch::default());
        id
    }

    /// Drop a connection and its player together.
    /// Returns false if the connection was already gone.
    pub fn disconnect(&self, id: &Uuid) -> bool {
        let mut state = self.state.lock();
        let removed = state.connections.remove(id).is_some();
        let had_player = state.players.remove(id).is_some();
        removed || had_player
    }

    /// Merge a partial update into a player, but only while its connection
    /// is still registered
    pub fn update_connected(&self, id: Uuid, patch: PlayerPatch) -> Option<Player> {
        let mut state = self.state.lock();
        if !state.connections.contains(&id) {
            return None;
        }
        Some(state.players.upsert(id, patch).clone())
    }

    #[cfg(test)]
    pub fn player(&self, id: &Uuid) -> Option<Player> {
        self.state.lock().players.get(id).cloned()
    }

    pub fn spawn_bullet(&self, origin: Position, vx: f32, vy: f32) -> Bullet {
        self.state.lock().bullets.spawn(origin, vx, vy)
    }

    /// Advance all bullets and prune the ones that left the field
    pub fn tick(&self, speed: f32) -> TickReport {
        self.state.lock().bullets.tick(speed)
    }

    /// Full-state copy plus live delivery targets, taken under one lock.
    /// Connections whose writer is gone are removed first so the copy never
    /// lists a player nobody can reach.
    pub fn snapshot(&self, include_bullets: bool) -> WorldSnapshot {
        let mut state = self.state.lock();
        let reaped = state.prune_stale();
        WorldSnapshot {
            players: state.players.snapshot(),
            bullets: include_bullets.then(|| state.bullets.snapshot()),
            targets: state.live_targets(),
            reaped,
        }
    }

    /// Live delivery targets, plus the ids pruned while collecting them
    pub fn targets(&self) -> (Vec<ConnectionHandle>, Vec<Uuid>) {
        let mut state = self.state.lock();
        let reaped = state.prune_stale();
        (state.live_targets(), reaped)
    }

    pub fn connection(&self, id: &Uuid) -> Option<ConnectionHandle> {
        self.state.lock().connections.get(id).cloned()
    }

    pub fn stats(&self) -> WorldStats {
        let state = self.state.lock();
        WorldStats {
            connections: state.connections.len(),
            players: state.players.len(),
            bullets: state.bullets.len(),
        }
    }
}
