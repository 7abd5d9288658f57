//! Game state: players, bullets and the lock that guards them

pub mod bullets;
pub mod physics;
pub mod players;
pub mod simulation;
pub mod world;

pub use bullets::Bullet;
pub use physics::{PhysicsSystem, Position};
pub use players::{Player, PlayerPatch};
pub use simulation::Simulation;
pub use world::{World, WorldStats};
