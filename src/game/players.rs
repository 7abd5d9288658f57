//! Player registry

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::physics::Position;

/// Player state as replicated to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub name: String,
    pub position: Position,
}

impl Player {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            name: String::new(),
            position: Position::default(),
        }
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct PlayerPatch {
    pub name: Option<String>,
    pub position: Option<Position>,
}

impl PlayerPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            position: None,
        }
    }

    pub fn position(position: Position) -> Self {
        Self {
            name: None,
            position: Some(position),
        }
    }
}

/// Players keyed by connection identity, iterated in join order
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: IndexMap<Uuid, Player>,
}

impl PlayerRegistry {
    /// Merge `patch` into the player, creating a default one if absent
    pub fn upsert(&mut self, id: Uuid, patch: PlayerPatch) -> &Player {
        let player = self.players.entry(id).or_insert_with(|| Player::new(id));
        if let Some(name) = patch.name {
            player.name = name;
        }
        if let Some(position) = patch.position {
            player.position = position;
        }
        player
    }

    /// Remove a player, keeping the order of the rest
    pub fn remove(&mut self, id: &Uuid) -> Option<Player> {
        self.players.shift_remove(id)
    }

    #[cfg(test)]
    pub fn get(&self, id: &Uuid) -> Option<&Player> {
        self.players.get(id)
    }

    /// Owned copy in insertion order
    pub fn snapshot(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }
}
