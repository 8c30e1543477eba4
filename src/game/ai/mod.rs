//! NPC AI
//!
//! Compiled finite-state machines, one per archetype.
//!
//! ```text
//!   data/ai/*.json ──compile──▶ AiLibrary ──┐
//!                                            ▼
//!   Npc.blackboard ◀──── executor::run ────▶ Vec<(npc, Directive)>
//!                                            │
//!                                            ▼
//!                                  world applies directives
//! ```
//!
//! "Decide every N ticks" is a stored `next_decision_at` counter; nothing
//! suspends. All randomness comes from the AI subsystem RNG.

pub mod config;
pub mod executor;

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::ability::Ability;
use crate::game::collision::Bounds;
use crate::game::state::{Archetype, Facing};

pub use config::{AiConfigError, AiLibrary, CompiledAi};
pub use executor::{decide, run, MAX_DECISIONS_PER_TICK};

/// Per-NPC AI scratch state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blackboard {
    /// Current state index.
    pub state: usize,
    /// Tick the current state was entered.
    pub state_entered_tick: u64,
    /// Entry actions of the current state have run.
    pub entered: bool,
    /// Next tick a decision is due.
    pub next_decision_at: u64,
    /// Patrol route.
    pub waypoints: Vec<Vec2>,
    /// Current waypoint.
    pub waypoint_index: usize,
    /// State timer deadline.
    pub wait_until: u64,
    /// Consecutive decisions without movement.
    pub stuck_counter: u32,
    /// Position at the previous decision.
    pub last_position: Vec2,
    /// Spawn point.
    pub home: Vec2,
    /// Tracked actor.
    pub target_actor_id: Option<String>,
    /// Free destination (wander, flee).
    pub destination: Option<Vec2>,
}

impl Blackboard {
    /// Fresh blackboard at `home`.
    pub fn new(home: Vec2, waypoints: Vec<Vec2>) -> Self {
        Self {
            state: 0,
            state_entered_tick: 0,
            entered: false,
            next_decision_at: 0,
            waypoints,
            waypoint_index: 0,
            wait_until: 0,
            stuck_counter: 0,
            last_position: home,
            home,
            target_actor_id: None,
            destination: None,
        }
    }

    /// Current patrol waypoint.
    pub fn waypoint(&self) -> Option<Vec2> {
        self.waypoints.get(self.waypoint_index).copied()
    }
}

/// What an NPC perceives about another actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingKind {
    /// A player.
    Player,
    /// An NPC of this archetype.
    Npc(Archetype),
}

/// One visible actor.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    /// Actor ID.
    pub id: String,
    /// Position.
    pub position: Vec2,
    /// Kind.
    pub kind: SightingKind,
}

/// Read-only inputs for one AI pass.
#[derive(Debug, Clone, Copy)]
pub struct AiContext<'a> {
    /// Current tick.
    pub tick: u64,
    /// Living actors sorted by ID.
    pub actors: &'a [Sighting],
    /// World bounds.
    pub bounds: Bounds,
}

impl<'a> AiContext<'a> {
    /// Look up a sighting.
    pub fn actor(&self, id: &str) -> Option<&'a Sighting> {
        self.actors
            .binary_search_by(|s| s.id.as_str().cmp(id))
            .ok()
            .and_then(|idx| self.actors.get(idx))
    }
}

/// Movement and combat output of a decision, applied by the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Directive {
    /// Plan a path to this point.
    MoveTo(Vec2),
    /// Clear path and intent.
    Stop,
    /// Turn.
    Face(Facing),
    /// Fire an ability.
    UseAbility(Ability),
}
