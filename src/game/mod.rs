//! Game Logic Module
//!
//! All simulation code. Deterministic for a given seed and command stream.
//!
//! ## Module Structure
//!
//! - `input`: Command intake, validation, ordering
//! - `state`: Actors, players, NPCs, ground items, obstacles
//! - `world`: Entity registry, join/leave, defeat, snapshots
//! - `tick`: Authoritative per-tick pipeline
//! - `barrier`: Write barriers (the only mutators of broadcast state)
//! - `collision`: Axis-separated movement against obstacles
//! - `nav`: A* grid and path follower
//! - `ai`: Compiled finite-state machines for NPCs
//! - `stats`: Layered attribute aggregation
//! - `effects`: Effect definitions, catalog, hooks, manager
//! - `status`: Status effects (burning)
//! - `combat`: Hit dispatch
//! - `ability`: Named abilities and cooldowns
//! - `items`: Ground stacks and ore durability
//! - `map`: Construction-time layout

pub mod input;
pub mod state;
pub mod world;
pub mod tick;
pub mod barrier;
pub mod collision;
pub mod nav;
pub mod ai;
pub mod stats;
pub mod effects;
pub mod status;
pub mod combat;
pub mod ability;
pub mod items;
pub mod map;

// Re-export key types
pub use input::{ClientCommand, Command, DropReason};
pub use state::{Actor, Archetype, Facing, Npc, Obstacle, ObstacleKind, Player};
pub use tick::TickResult;
pub use world::{World, WorldError};
