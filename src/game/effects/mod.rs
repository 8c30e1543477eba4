//! Effect Pipeline
//!
//! ```text
//! EffectIntent ──enqueue──▶ EffectManager ──run_tick──▶ EffectInstance
//!                                │                          │
//!                                │ hooks (by HookId)        │ spawn/update/end
//!                                ▼                          ▼
//!                           HookOutput                Journal + LifecycleSink
//! ```
//!
//! Definitions come from the [`catalog::EffectRegistry`]. Instances see the
//! world only through an [`ArenaView`] and report back through
//! [`hooks::HookOutput`]; the world applies hits in a later phase.

pub mod definition;
pub mod shape;
pub mod hooks;
pub mod catalog;
pub mod manager;

use std::collections::BTreeMap;

use crate::core::vec2::Vec2;
use crate::game::state::{Facing, Obstacle};
use crate::journal::lifecycle::GeometryView;

pub use catalog::{CatalogError, EffectRegistry};
pub use definition::{EffectDefinition, EndReason};
pub use hooks::{HitRequest, HookOutput, MiningRequest};
pub use manager::{EffectInstance, EffectManager};

/// Request to spawn an effect.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectIntent {
    /// Definition type ID.
    pub type_id: String,
    /// Owning actor.
    pub source_actor_id: String,
    /// Target actor for target delivery.
    pub target_actor_id: Option<String>,
    /// Geometry override (sub-units, relative to the anchor).
    pub geometry: Option<GeometryView>,
    /// Absolute anchor (sub-units); defaults to the owner or target center.
    pub origin: Option<(i32, i32)>,
    /// Travel direction; defaults to the owner's facing.
    pub direction: Option<Vec2>,
    /// Lifetime override in ticks.
    pub duration_ticks: Option<u64>,
    /// OnTick cadence override.
    pub tick_every: Option<u64>,
    /// Parameter overrides.
    pub params: BTreeMap<String, i64>,
    /// Instance ID reserved at enqueue time.
    pub reserved_id: Option<String>,
}

impl EffectIntent {
    /// Intent with no overrides.
    pub fn new(type_id: &str, source_actor_id: &str) -> Self {
        Self {
            type_id: type_id.to_string(),
            source_actor_id: source_actor_id.to_string(),
            target_actor_id: None,
            geometry: None,
            origin: None,
            direction: None,
            duration_ticks: None,
            tick_every: None,
            params: BTreeMap::new(),
            reserved_id: None,
        }
    }

    /// Set the geometry.
    pub fn with_geometry(mut self, geometry: GeometryView) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Anchor at an absolute quantized point.
    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.origin = Some((x, y));
        self
    }

    /// Attach to a target actor.
    pub fn targeting(mut self, target: &str) -> Self {
        self.target_actor_id = Some(target.to_string());
        self
    }

    /// Travel along `direction`.
    pub fn toward(mut self, direction: Vec2) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Override the lifetime.
    pub fn lasting(mut self, ticks: u64) -> Self {
        self.duration_ticks = Some(ticks);
        self
    }

    /// Override one parameter.
    pub fn with_param(mut self, key: &str, value: i64) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// What an effect can see of one actor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorProbe {
    /// Actor ID.
    pub id: String,
    /// Center.
    pub position: Vec2,
    /// Body radius.
    pub radius: f64,
    /// Facing.
    pub facing: Facing,
}

/// Read-only world view handed to the effect manager.
#[derive(Debug, Clone, Copy)]
pub struct ArenaView<'a> {
    /// Living actors sorted by ID.
    pub actors: &'a [ActorProbe],
    /// Obstacles.
    pub obstacles: &'a [Obstacle],
}

impl<'a> ArenaView<'a> {
    /// Look up an actor.
    pub fn actor(&self, id: &str) -> Option<&'a ActorProbe> {
        self.actors
            .binary_search_by(|probe| probe.id.as_str().cmp(id))
            .ok()
            .and_then(|idx| self.actors.get(idx))
    }
}
