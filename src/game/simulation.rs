//! Free-running bullet clock, independent of message arrival

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, trace};

use crate::ws::broadcast::Broadcaster;

use super::bullets::TickReport;
use super::world::World;

/// Advances the bullet ledger at a fixed rate
pub struct Simulation {
    world: Arc<World>,
    broadcaster: Broadcaster,
    tick_duration: Duration,
    bullet_speed: f32,
    /// Push a state frame after every tick that moved bullets
    publish_bullets: bool,
    tick: u64,
}

impl Simulation {
    pub fn new(
        world: Arc<World>,
        broadcaster: Broadcaster,
        tick_duration: Duration,
        bullet_speed: f32,
        publish_bullets: bool,
    ) -> Self {
        Self {
            world,
            broadcaster,
            tick_duration,
            bullet_speed,
            publish_bullets,
            tick: 0,
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick_duration.as_millis() as u64, "Simulation started");

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.step();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(ticks = self.tick, "Simulation stopped");
    }

    /// One tick: advance, prune, optionally publish
    pub fn step(&mut self) -> TickReport {
        self.tick += 1;
        let report = self.world.tick(self.bullet_speed);

        if report.advanced > 0 {
            trace!(
                tick = self.tick,
                advanced = report.advanced,
                pruned = report.pruned,
                "Bullets advanced"
            );
            if self.publish_bullets {
                self.broadcaster.publish_state();
            }
        }

        report
    }
}
