//! Core deterministic primitives.
//!
//! Vectors, unit conversions, seeded randomness and hashing. Nothing in
//! this module reads the clock or touches global state.

pub mod vec2;
pub mod units;
pub mod rng;
pub mod hash;

// Re-export core types
pub use vec2::Vec2;
pub use rng::{DeterministicRng, SubsystemRngs};
pub use hash::StateHasher;
