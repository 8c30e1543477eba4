//! AI Configs
//!
//! Authored as JSON (one file per archetype) and compiled once into
//! index-based tables. State names and ability names are resolved here so
//! the executor never compares strings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::info;

use crate::game::ability::Ability;
use crate::game::state::Archetype;

const GOBLIN_JSON: &str = include_str!("../../../data/ai/goblin.json");
const RAT_JSON: &str = include_str!("../../../data/ai/rat.json");

/// AI config loading failure.
#[derive(Debug, Error)]
pub enum AiConfigError {
    /// File could not be read.
    #[error("failed to read AI config {path}: {source}")]
    Io {
        /// Path.
        path: String,
        /// Cause.
        #[source]
        source: std::io::Error,
    },
    /// Malformed JSON.
    #[error("invalid AI config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// Config without states.
    #[error("AI config {archetype} has no states")]
    Empty {
        /// Archetype name.
        archetype: String,
    },
    /// A state name is declared twice.
    #[error("AI config {archetype} declares state {state} twice")]
    DuplicateState {
        /// Archetype name.
        archetype: String,
        /// State name.
        state: String,
    },
    /// A transition or the initial state names a missing state.
    #[error("AI config {archetype} references unknown state {state}")]
    UnknownState {
        /// Archetype name.
        archetype: String,
        /// State name.
        state: String,
    },
    /// `useAbility` or `cooldownReady` names a missing ability.
    #[error("AI config {archetype} references unknown ability {ability}")]
    UnknownAbility {
        /// Archetype name.
        archetype: String,
        /// Ability name.
        ability: String,
    },
}

// =============================================================================
// AUTHORED FORM
// =============================================================================

/// What an action or transition points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AiTarget {
    /// Current patrol waypoint.
    Waypoint,
    /// Tracked actor.
    Player,
    /// Destination vector on the blackboard.
    Vector,
}

/// Waypoint selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaypointMode {
    /// Next waypoint, wrapping.
    Advance,
    /// Jump to an index.
    Index(usize),
}

/// Authored action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionDef {
    /// Seed the path follower toward a target.
    MoveToward {
        /// Target.
        target: AiTarget,
    },
    /// Clear path and intent.
    Stop,
    /// Fire an ability.
    UseAbility {
        /// Ability name.
        name: String,
    },
    /// Rotate toward a target.
    Face {
        /// Target.
        target: AiTarget,
    },
    /// Start the state timer.
    SetTimer {
        /// Override for the state's dwell.
        #[serde(default, rename = "durationTicks")]
        duration_ticks: Option<u64>,
    },
    /// Change the patrol waypoint.
    SetWaypoint {
        /// Selection.
        mode: WaypointMode,
    },
    /// Pick a destination around home.
    SetRandomDestination {
        /// Outer radius.
        radius: f64,
        /// Inner radius.
        #[serde(default, rename = "minRadius")]
        min_radius: Option<f64>,
    },
    /// Flee from the tracked actor.
    MoveAway {
        /// Maximum flee distance.
        distance: f64,
        /// Minimum flee distance.
        #[serde(default, rename = "minDistance")]
        min_distance: Option<f64>,
    },
}

/// Authored transition condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConditionDef {
    /// Within `radius` of the current waypoint or destination.
    ReachedWaypoint {
        /// Arrival radius.
        #[serde(default)]
        radius: Option<f64>,
    },
    /// State timer ran out.
    TimerExpired,
    /// A player is within `radius`; tracks the nearest.
    PlayerWithin {
        /// Radius.
        radius: f64,
    },
    /// A non-rat actor is within `radius`; tracks the nearest.
    NonRatWithin {
        /// Radius.
        radius: f64,
    },
    /// Tracked actor is gone or beyond `radius`.
    LostSight {
        /// Radius.
        radius: f64,
    },
    /// Ability is off cooldown.
    CooldownReady {
        /// Ability name.
        ability: String,
    },
    /// Moved less than `epsilon` for `decisions` decisions in a row.
    Stuck {
        /// Movement threshold.
        epsilon: f64,
        /// Consecutive decisions.
        decisions: u32,
    },
}

/// Authored transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    /// Destination state name.
    pub to: String,
    /// Condition.
    pub when: ConditionDef,
}

/// Authored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDef {
    /// Unique name.
    pub name: String,
    /// Decision cadence.
    #[serde(default = "default_tick_every")]
    pub tick_every: u64,
    /// Dwell used by `setTimer`.
    #[serde(default)]
    pub duration_ticks: Option<u64>,
    /// Actions.
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    /// Transitions in priority order.
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

fn default_tick_every() -> u64 {
    1
}

/// Authored config for one archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfigDef {
    /// Archetype the config drives.
    pub archetype: Archetype,
    /// Initial state; defaults to the first.
    #[serde(default)]
    pub initial_state: Option<String>,
    /// States.
    pub states: Vec<StateDef>,
}

// =============================================================================
// COMPILED FORM
// =============================================================================

/// Compiled action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// See [`ActionDef::MoveToward`].
    MoveToward(AiTarget),
    /// See [`ActionDef::Stop`].
    Stop,
    /// See [`ActionDef::UseAbility`].
    UseAbility(Ability),
    /// See [`ActionDef::Face`].
    Face(AiTarget),
    /// See [`ActionDef::SetTimer`].
    SetTimer(Option<u64>),
    /// See [`ActionDef::SetWaypoint`].
    SetWaypoint(WaypointMode),
    /// See [`ActionDef::SetRandomDestination`].
    SetRandomDestination {
        /// Outer radius.
        radius: f64,
        /// Inner radius.
        min_radius: f64,
    },
    /// See [`ActionDef::MoveAway`].
    MoveAway {
        /// Maximum distance.
        distance: f64,
        /// Minimum distance.
        min_distance: f64,
    },
}

impl Action {
    /// True for actions that only run when the state is entered.
    pub fn on_enter_only(&self) -> bool {
        matches!(
            self,
            Action::SetTimer(_)
                | Action::SetWaypoint(_)
                | Action::SetRandomDestination { .. }
                | Action::MoveAway { .. }
        )
    }
}

/// Compiled condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    /// See [`ConditionDef::ReachedWaypoint`].
    ReachedWaypoint(f64),
    /// See [`ConditionDef::TimerExpired`].
    TimerExpired,
    /// See [`ConditionDef::PlayerWithin`].
    PlayerWithin(f64),
    /// See [`ConditionDef::NonRatWithin`].
    NonRatWithin(f64),
    /// See [`ConditionDef::LostSight`].
    LostSight(f64),
    /// See [`ConditionDef::CooldownReady`].
    CooldownReady(Ability),
    /// See [`ConditionDef::Stuck`].
    Stuck {
        /// Movement threshold.
        epsilon: f64,
        /// Consecutive decisions.
        decisions: u32,
    },
}

/// Default radius for `reachedWaypoint`.
pub const DEFAULT_REACHED_RADIUS: f64 = 12.0;

/// Compiled state.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledState {
    /// Name, for logs only.
    pub name: String,
    /// Decision cadence (≥ 1).
    pub tick_every: u64,
    /// Dwell for `setTimer`.
    pub duration_ticks: u64,
    /// Entry-only actions.
    pub on_enter: Vec<Action>,
    /// Actions run on every decision.
    pub actions: Vec<Action>,
    /// `(condition, destination index)` in priority order.
    pub transitions: Vec<(Condition, usize)>,
}

/// Compiled config.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledAi {
    /// Archetype.
    pub archetype: Archetype,
    /// Initial state index.
    pub initial: usize,
    /// States.
    pub states: Vec<CompiledState>,
}

impl CompiledAi {
    /// Parse and compile one config.
    pub fn from_json(json: &str) -> Result<Self, AiConfigError> {
        let def: AiConfigDef = serde_json::from_str(json)?;
        Self::compile(&def)
    }

    /// Resolve names into indices.
    pub fn compile(def: &AiConfigDef) -> Result<Self, AiConfigError> {
        let archetype = def.archetype.as_str().to_string();
        if def.states.is_empty() {
            return Err(AiConfigError::Empty { archetype });
        }

        let mut index = BTreeMap::new();
        for (i, state) in def.states.iter().enumerate() {
            if index.insert(state.name.as_str(), i).is_some() {
                return Err(AiConfigError::DuplicateState { archetype, state: state.name.clone() });
            }
        }
        let resolve_state = |name: &str| {
            index.get(name).copied().ok_or_else(|| AiConfigError::UnknownState {
                archetype: archetype.clone(),
                state: name.to_string(),
            })
        };
        let resolve_ability = |name: &str| {
            Ability::parse(name).ok_or_else(|| AiConfigError::UnknownAbility {
                archetype: archetype.clone(),
                ability: name.to_string(),
            })
        };

        let initial = match &def.initial_state {
            Some(name) => resolve_state(name)?,
            None => 0,
        };

        let mut states = Vec::with_capacity(def.states.len());
        for state in &def.states {
            let mut on_enter = Vec::new();
            let mut actions = Vec::new();
            for action in &state.actions {
                let compiled = match action {
                    ActionDef::MoveToward { target } => Action::MoveToward(*target),
                    ActionDef::Stop => Action::Stop,
                    ActionDef::UseAbility { name } => Action::UseAbility(resolve_ability(name)?),
                    ActionDef::Face { target } => Action::Face(*target),
                    ActionDef::SetTimer { duration_ticks } => Action::SetTimer(*duration_ticks),
                    ActionDef::SetWaypoint { mode } => Action::SetWaypoint(*mode),
                    ActionDef::SetRandomDestination { radius, min_radius } => Action::SetRandomDestination {
                        radius: *radius,
                        min_radius: min_radius.unwrap_or(0.0),
                    },
                    ActionDef::MoveAway { distance, min_distance } => Action::MoveAway {
                        distance: *distance,
                        min_distance: min_distance.unwrap_or(*distance),
                    },
                };
                if compiled.on_enter_only() {
                    on_enter.push(compiled);
                } else {
                    actions.push(compiled);
                }
            }

            let mut transitions = Vec::with_capacity(state.transitions.len());
            for transition in &state.transitions {
                let condition = match &transition.when {
                    ConditionDef::ReachedWaypoint { radius } => {
                        Condition::ReachedWaypoint(radius.unwrap_or(DEFAULT_REACHED_RADIUS))
                    }
                    ConditionDef::TimerExpired => Condition::TimerExpired,
                    ConditionDef::PlayerWithin { radius } => Condition::PlayerWithin(*radius),
                    ConditionDef::NonRatWithin { radius } => Condition::NonRatWithin(*radius),
                    ConditionDef::LostSight { radius } => Condition::LostSight(*radius),
                    ConditionDef::CooldownReady { ability } => Condition::CooldownReady(resolve_ability(ability)?),
                    ConditionDef::Stuck { epsilon, decisions } => Condition::Stuck {
                        epsilon: *epsilon,
                        decisions: *decisions,
                    },
                };
                transitions.push((condition, resolve_state(&transition.to)?));
            }

            states.push(CompiledState {
                name: state.name.clone(),
                tick_every: state.tick_every.max(1),
                duration_ticks: state.duration_ticks.unwrap_or(0),
                on_enter,
                actions,
                transitions,
            });
        }

        Ok(Self { archetype: def.archetype, initial, states })
    }
}

/// Every compiled config, addressed by index.
#[derive(Debug, Clone, Default)]
pub struct AiLibrary {
    configs: Vec<CompiledAi>,
}

impl AiLibrary {
    /// Configs shipped with the server.
    pub fn builtin() -> Result<Self, AiConfigError> {
        let library = Self::from_configs(vec![CompiledAi::from_json(GOBLIN_JSON)?, CompiledAi::from_json(RAT_JSON)?]);
        info!(configs = library.len(), "AI configs compiled");
        Ok(library)
    }

    /// Load one config per file.
    pub fn from_files(paths: &[&Path]) -> Result<Self, AiConfigError> {
        let mut configs = Vec::with_capacity(paths.len());
        for path in paths {
            let json = std::fs::read_to_string(path).map_err(|source| AiConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            configs.push(CompiledAi::from_json(&json)?);
        }
        Ok(Self::from_configs(configs))
    }

    /// Wrap compiled configs.
    pub fn from_configs(configs: Vec<CompiledAi>) -> Self {
        Self { configs }
    }

    /// Config by index.
    pub fn get(&self, index: usize) -> Option<&CompiledAi> {
        self.configs.get(index)
    }

    /// Index of the config driving `archetype`.
    pub fn index_of(&self, archetype: Archetype) -> Option<usize> {
        self.configs.iter().position(|c| c.archetype == archetype)
    }

    /// Number of configs.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_compiles() {
        let library = AiLibrary::builtin().unwrap();
        let goblin = library.get(library.index_of(Archetype::Goblin).unwrap()).unwrap();
        assert_eq!(goblin.states[goblin.initial].name, "patrol");

        let wait = goblin.states.iter().find(|s| s.name == "wait").unwrap();
        assert_eq!(wait.duration_ticks, 30);
        assert!(wait.on_enter.contains(&Action::SetWaypoint(WaypointMode::Advance)));
        assert!(wait.actions.contains(&Action::Stop));

        assert!(library.index_of(Archetype::Rat).is_some());
    }

    #[test]
    fn test_unknown_state_rejected() {
        let json = r#"{
            "archetype": "rat",
            "states": [
                { "name": "idle", "transitions": [ { "to": "nowhere", "when": { "type": "timerExpired" } } ] }
            ]
        }"#;
        assert!(matches!(CompiledAi::from_json(json), Err(AiConfigError::UnknownState { .. })));
    }

    #[test]
    fn test_unknown_ability_rejected() {
        let json = r#"{
            "archetype": "goblin",
            "states": [ { "name": "a", "actions": [ { "type": "useAbility", "name": "teleport" } ] } ]
        }"#;
        assert!(matches!(CompiledAi::from_json(json), Err(AiConfigError::UnknownAbility { .. })));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let json = r#"{
            "archetype": "goblin",
            "states": [ { "name": "a", "actions": [ { "type": "dance" } ] } ]
        }"#;
        assert!(matches!(CompiledAi::from_json(json), Err(AiConfigError::Parse(_))));
    }

    #[test]
    fn test_duplicate_and_empty() {
        let dup = r#"{ "archetype": "rat", "states": [ { "name": "a" }, { "name": "a" } ] }"#;
        assert!(matches!(CompiledAi::from_json(dup), Err(AiConfigError::DuplicateState { .. })));
        let empty = r#"{ "archetype": "rat", "states": [] }"#;
        assert!(matches!(CompiledAi::from_json(empty), Err(AiConfigError::Empty { .. })));
    }
}
