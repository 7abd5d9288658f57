//! WebSocket transport: wire protocol, connection registry, fan-out and sessions

pub mod broadcast;
pub mod connections;
pub mod handler;
pub mod protocol;
pub mod session;
