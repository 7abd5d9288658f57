//! Application state shared across routes and sessions

use std::sync::Arc;

use crate::config::Config;
use crate::game::World;
use crate::ws::broadcast::Broadcaster;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub world: Arc<World>,
    pub broadcaster: Broadcaster,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // One authoritative world per process
        let world = Arc::new(World::new());

        let broadcaster = Broadcaster::new(world.clone(), config.broadcast_bullets);

        Self {
            config,
            world,
            broadcaster,
        }
    }
}
