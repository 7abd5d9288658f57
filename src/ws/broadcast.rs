//! Broadcast engine - full-state and event fan-out to every live connection

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::{Bullet, World};
use crate::util::time::unix_millis;

use super::connections::{ConnectionHandle, Frame};
use super::protocol::ServerMsg;

/// Why a single recipient did not get a frame
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,
}

/// Per-publish delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Frames enqueued
    pub delivered: usize,
    /// Frames skipped because a recipient's queue was full
    pub dropped: usize,
    /// Connections removed because their queue was closed
    pub removed: usize,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.removed += other.removed;
    }
}

/// Serializes world state once and enqueues it on every connection
#[derive(Clone)]
pub struct Broadcaster {
    world: Arc<World>,
    /// Held while a snapshot is taken and enqueued so every connection sees
    /// frames in the same order. Never held across an await.
    order: Arc<Mutex<()>>,
    include_bullets: bool,
}

impl Broadcaster {
    pub fn new(world: Arc<World>, include_bullets: bool) -> Self {
        Self {
            world,
            order: Arc::new(Mutex::new(())),
            include_bullets,
        }
    }

    /// Register a new connection and enqueue its `welcome` ahead of any broadcast
    pub fn admit(&self, outbound: tokio::sync::mpsc::Sender<Frame>) -> Uuid {
        let _order = self.order.lock();
        let id = self.world.connect(outbound.clone());
        let welcome = ServerMsg::Welcome {
            id,
            server_time: unix_millis(),
        };
        if let Some(frame) = encode(&welcome) {
            let handle = ConnectionHandle { id, outbound };
            if let Err(e) = send_frame(&handle, frame) {
                warn!(conn_id = %id, error = %e, "Failed to enqueue welcome");
            }
        }
        id
    }

    /// Send the full player list (and bullets, if configured) to every live connection
    pub fn publish_state(&self) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        loop {
            let (report, dead) = {
                let _order = self.order.lock();
                let snapshot = self.world.snapshot(self.include_bullets);
                log_reaped(&snapshot.reaped);
                total.removed += snapshot.reaped.len();

                let msg = ServerMsg::Players {
                    players: snapshot.players,
                    bullets: snapshot.bullets,
                };
                let Some(frame) = encode(&msg) else {
                    return total;
                };
                deliver(&frame, &snapshot.targets)
            };
            total.merge(report);

            // A queue that closed mid-delivery: drop it and resend so the
            // others stop seeing its player
            let removed = self.reap(&dead);
            total.removed += removed;
            if removed == 0 {
                return total;
            }
        }
    }

    /// Send a freshly spawned bullet to every live connection
    pub fn publish_event(&self, bullet: Bullet) -> DeliveryReport {
        let (mut report, dead, reaped) = {
            let _order = self.order.lock();
            let (targets, reaped) = self.world.targets();
            log_reaped(&reaped);
            let Some(frame) = encode(&ServerMsg::Bullet { bullet }) else {
                return DeliveryReport::default();
            };
            let (report, dead) = deliver(&frame, &targets);
            (report, dead, reaped.len())
        };

        let removed = self.reap(&dead) + reaped;
        report.removed += removed;
        if removed > 0 {
            report.merge(self.publish_state());
        }
        report
    }

    /// Send a message to one connection only
    pub fn send_to(&self, id: &Uuid, msg: &ServerMsg) -> Result<(), DeliveryError> {
        let Some(handle) = self.world.connection(id) else {
            return Err(DeliveryError::Closed);
        };
        let Some(frame) = encode(msg) else {
            return Ok(());
        };

        let result = {
            let _order = self.order.lock();
            send_frame(&handle, frame)
        };
        if let Err(DeliveryError::Closed) = result {
            if self.reap(&[*id]) > 0 {
                self.publish_state();
            }
        }
        result
    }

    /// Remove connections whose queues are gone; returns how many were still registered
    fn reap(&self, dead: &[Uuid]) -> usize {
        let removed: Vec<Uuid> = dead
            .iter()
            .copied()
            .filter(|id| self.world.disconnect(id))
            .collect();
        log_reaped(&removed);
        removed.len()
    }
}

fn log_reaped(ids: &[Uuid]) {
    for id in ids {
        info!(conn_id = %id, "Removed unreachable connection");
    }
}

/// Enqueue a frame without waiting
fn send_frame(handle: &ConnectionHandle, frame: Frame) -> Result<(), DeliveryError> {
    handle.outbound.try_send(frame).map_err(|e| match e {
        TrySendError::Full(_) => DeliveryError::QueueFull,
        TrySendError::Closed(_) => DeliveryError::Closed,
    })
}

/// Offer `frame` to every target; failures are isolated per recipient
fn deliver(frame: &Frame, targets: &[ConnectionHandle]) -> (DeliveryReport, Vec<Uuid>) {
    let mut report = DeliveryReport::default();
    let mut dead = Vec::new();

    for target in targets {
        match send_frame(target, frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(DeliveryError::QueueFull) => {
                warn!(conn_id = %target.id, "Client lagging, dropping frame");
                report.dropped += 1;
            }
            Err(DeliveryError::Closed) => {
                debug!(conn_id = %target.id, "Outbound queue closed");
                dead.push(target.id);
            }
        }
    }

    (report, dead)
}

fn encode(msg: &ServerMsg) -> Option<Frame> {
    match serde_json::to_string(msg) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(error = %e, "Failed to serialize server message");
            None
        }
    }
}
