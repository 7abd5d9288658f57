//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Bullet, Player, Position};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Set the display name of the sending player
    Register {
        /// Client-side id; the server-minted id is authoritative
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: String,
    },

    /// New position of the sending player
    Move {
        #[serde(default)]
        id: Option<String>,
        position: Position,
    },

    /// Fire a bullet
    Bullet { bullet: BulletShot },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Bullet as proposed by a client. Any client id is discarded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BulletShot {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// First frame on every connection, carries the server-minted identity
    Welcome { id: Uuid, server_time: u64 },

    /// Full player state
    Players {
        players: Vec<Player>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bullets: Option<Vec<Bullet>>,
    },

    /// A bullet was just spawned
    Bullet { bullet: Bullet },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}
