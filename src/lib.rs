//! # Emberfall Server
//!
//! Authoritative fixed-tick simulation for the Emberfall action RPG.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    EMBERFALL SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── units.rs    - Tick rate, tile size, quantization        │
//! │  ├── vec2.rs     - 2D vector                                 │
//! │  ├── rng.rs      - Seeded Xorshift128+ per subsystem         │
//! │  └── hash.rs     - Catalog and state digests                 │
//! │                                                              │
//! │  game/           - Simulation (deterministic)                │
//! │  ├── world.rs    - Entity registry                           │
//! │  ├── tick.rs     - Per-tick pipeline                         │
//! │  ├── barrier.rs  - Write barriers                            │
//! │  ├── nav.rs      - A* and path following                     │
//! │  ├── ai/         - Compiled NPC state machines               │
//! │  ├── effects/    - Effect catalog, hooks, manager            │
//! │  └── ...                                                     │
//! │                                                              │
//! │  journal/        - Patches, lifecycle events, keyframes      │
//! │                                                              │
//! │  network/        - Transport (non-deterministic)             │
//! │  ├── broadcast.rs- Subscriber queues, keyframe recovery      │
//! │  ├── session.rs  - Simulation task                           │
//! │  ├── server.rs   - WebSocket adaptor                         │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! `core/` and `game/` never read the clock or OS randomness:
//! - No HashMap (BTreeMap for sorted iteration)
//! - All randomness from seed-derived subsystem generators
//! - Durations converted to whole ticks at a single rate
//!
//! Given the same seed and command stream, two worlds produce identical
//! journals.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod config;
pub mod telemetry;
pub mod game;
pub mod journal;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use core::vec2::Vec2;
pub use config::{ServerConfig, WorldConfig};
pub use game::{World, WorldError};
pub use journal::{Journal, JournalFrame};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version; part of the effect-catalog hash.
pub const PROTOCOL_VERSION: u32 = 1;

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 15;

/// World units per tile.
pub const TILE_SIZE: f64 = 40.0;

/// Quantized sub-units per tile.
pub const COORD_SCALE: i32 = 16;
