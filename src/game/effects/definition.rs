//! Effect Definitions
//!
//! Content-authored templates keyed by type ID, plus the built-in set every
//! catalog merges onto.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::core::units::{quantize, ticks_from_millis, MELEE_DURATION_MS, MELEE_REACH, MELEE_WIDTH, PLAYER_HALF};
use crate::game::effects::hooks::HookId;
use crate::game::status::StatusKind;
use crate::journal::lifecycle::GeometryView;

/// Parameter holding the health delta applied on hit.
pub const PARAM_HEALTH_DELTA: &str = "healthDelta";
/// Projectile speed in sub-units per second.
pub const PARAM_SPEED: &str = "speed";
/// Projectile range in sub-units.
pub const PARAM_RANGE: &str = "range";
/// Ticks before an area may hit the same actor again.
pub const PARAM_REHIT_TICKS: &str = "rehitTicks";
/// Parabolic gravity in sub-units per second squared.
pub const PARAM_GRAVITY: &str = "gravity";

/// How an effect reaches its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    /// Hits actors overlapping its shape.
    Area,
    /// Attached to one target actor.
    Target,
    /// Presentation only; never hits.
    Visual,
}

/// Collision shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Circle of `radius`.
    Circle,
    /// Axis-aligned `width × height`.
    Rect,
    /// Circular sector of `radius` and `arcDegrees`.
    Arc,
    /// Line of `length` along `rotation`.
    Segment,
    /// Segment swept by `radius`.
    Capsule,
}

/// Motion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionKind {
    /// Stationary.
    None,
    /// Stationary, resolved on the spawn tick.
    Instant,
    /// Constant velocity along a direction.
    Linear,
    /// Ballistic arc that lands after its range.
    Parabolic,
    /// Snaps to the attached actor every tick.
    Follow,
}

impl MotionKind {
    /// True when the instance moves on its own.
    pub fn travels(self) -> bool {
        matches!(self, MotionKind::Linear | MotionKind::Parabolic)
    }
}

/// Which actors a moving or area effect hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImpactPolicy {
    /// First non-owner actor, then stop.
    FirstHit,
    /// Every unique actor traversed.
    AllInPath,
    /// Up to `pierce` unique actors.
    Pierce,
}

/// When an instance ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndPolicy {
    /// When ticks remaining reach zero.
    Duration,
    /// On first impact.
    OnImpact,
    /// When the owner no longer exists.
    OwnerLost,
    /// Only on cancel.
    Manual,
}

/// Why an instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// Lifetime ran out.
    Expired,
    /// Struck an actor or obstacle.
    Impact,
    /// Owner or attached actor vanished.
    OwnerLost,
    /// Cancelled by a hook, a failure or a caller.
    Cancelled,
    /// World shut down.
    MapChange,
}

impl EndReason {
    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Expired => "expired",
            EndReason::Impact => "impact",
            EndReason::OwnerLost => "ownerLost",
            EndReason::Cancelled => "cancelled",
            EndReason::MapChange => "mapChange",
        }
    }
}

/// Fields an update event may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateField {
    /// Position, geometry and motion.
    Delivery,
    /// Behaviour counters.
    Behavior,
    /// Parameter map.
    Params,
}

/// Which lifecycle events are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSpec {
    /// Send the spawn event.
    pub send_spawn: bool,
    /// Send update events.
    pub send_updates: bool,
    /// Send the end event.
    pub send_end: bool,
    /// Fields carried by updates; empty means the full delivery state.
    pub update_fields: Vec<UpdateField>,
}

impl ReplicationSpec {
    /// Spawn and end only.
    pub fn spawn_and_end() -> Self {
        Self {
            send_spawn: true,
            send_updates: false,
            send_end: true,
            update_fields: Vec::new(),
        }
    }

    /// Everything, with a field whitelist.
    pub fn full(update_fields: Vec<UpdateField>) -> Self {
        Self {
            send_spawn: true,
            send_updates: true,
            send_end: true,
            update_fields,
        }
    }

    /// True when `field` is carried by updates.
    pub fn allows(&self, field: UpdateField) -> bool {
        self.update_fields.is_empty() || self.update_fields.contains(&field)
    }
}

/// Hooks bound to each hook point, run in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSet {
    /// After instantiation.
    pub on_spawn: Vec<HookId>,
    /// Every `tickEvery` ticks of age.
    pub on_tick: Vec<HookId>,
    /// Once per actor hit.
    pub on_hit: Vec<HookId>,
    /// When the lifetime runs out.
    pub on_expire: Vec<HookId>,
}

/// Materialized effect template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectDefinition {
    /// Type ID.
    pub type_id: String,
    /// Delivery kind.
    pub delivery: DeliveryKind,
    /// Collision shape.
    pub shape: ShapeKind,
    /// Motion model.
    pub motion: MotionKind,
    /// Impact policy.
    pub impact: ImpactPolicy,
    /// Lifetime in ticks; 0 is unlimited.
    pub lifetime_ticks: u64,
    /// Pierce budget for `pierce` impact.
    pub pierce: u32,
    /// OnTick cadence in ticks.
    pub tick_every: u64,
    /// Default quantized geometry.
    pub geometry: GeometryView,
    /// Default parameters.
    pub params: BTreeMap<String, i64>,
    /// Bound hooks.
    pub hooks: HookSet,
    /// Replication.
    pub replication: ReplicationSpec,
    /// End policy.
    pub end_policy: EndPolicy,
    /// The client owns the visual.
    pub managed_by_client: bool,
    /// Anchored to the owner's position.
    pub owner_anchored: bool,
    /// Effect spawned where this one impacts.
    pub explode_on_impact: Option<String>,
    /// Status applied to actors hit.
    pub status_effect: Option<StatusKind>,
    /// Client visual hint.
    pub client_effect: Option<String>,
}

impl EffectDefinition {
    /// Integer parameter.
    pub fn param(&self, key: &str) -> Option<i64> {
        self.params.get(key).copied()
    }
}

/// Geometry with every field zero except the shape.
pub fn geometry(shape: ShapeKind) -> GeometryView {
    GeometryView {
        shape,
        offset_x: 0,
        offset_y: 0,
        width: 0,
        height: 0,
        radius: 0,
        length: 0,
        arc_degrees: 0,
        rotation: 0,
    }
}

fn params(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Melee swing geometry for facing right.
pub fn melee_geometry() -> GeometryView {
    GeometryView {
        offset_x: quantize(PLAYER_HALF + MELEE_REACH / 2.0),
        width: quantize(MELEE_REACH),
        height: quantize(MELEE_WIDTH),
        ..geometry(ShapeKind::Rect)
    }
}

/// Built-in definitions.
pub fn builtin_definitions() -> Vec<EffectDefinition> {
    vec![
        EffectDefinition {
            type_id: "attack".to_string(),
            delivery: DeliveryKind::Area,
            shape: ShapeKind::Rect,
            motion: MotionKind::Instant,
            impact: ImpactPolicy::AllInPath,
            lifetime_ticks: ticks_from_millis(MELEE_DURATION_MS),
            pierce: 0,
            tick_every: 1,
            geometry: melee_geometry(),
            params: params(&[(PARAM_HEALTH_DELTA, -10)]),
            hooks: HookSet {
                on_spawn: vec![HookId::MineOre],
                on_hit: vec![HookId::Damage, HookId::BloodSplatter],
                ..HookSet::default()
            },
            replication: ReplicationSpec::spawn_and_end(),
            end_policy: EndPolicy::Duration,
            managed_by_client: false,
            owner_anchored: true,
            explode_on_impact: None,
            status_effect: None,
            client_effect: Some("melee-swing".to_string()),
        },
        EffectDefinition {
            type_id: "fireball".to_string(),
            delivery: DeliveryKind::Area,
            shape: ShapeKind::Circle,
            motion: MotionKind::Linear,
            impact: ImpactPolicy::FirstHit,
            lifetime_ticks: 30,
            pierce: 0,
            tick_every: 1,
            geometry: GeometryView {
                radius: quantize(10.0),
                offset_x: quantize(24.0),
                ..geometry(ShapeKind::Circle)
            },
            params: params(&[(PARAM_SPEED, 128), (PARAM_RANGE, 192), (PARAM_HEALTH_DELTA, -15)]),
            hooks: HookSet {
                on_tick: vec![HookId::FizzleInLava],
                on_hit: vec![HookId::Damage],
                ..HookSet::default()
            },
            replication: ReplicationSpec::full(vec![UpdateField::Delivery]),
            end_policy: EndPolicy::OnImpact,
            managed_by_client: false,
            owner_anchored: false,
            explode_on_impact: Some("fire-burst".to_string()),
            status_effect: None,
            client_effect: Some("fireball".to_string()),
        },
        EffectDefinition {
            type_id: "fire-burst".to_string(),
            delivery: DeliveryKind::Area,
            shape: ShapeKind::Circle,
            motion: MotionKind::Instant,
            impact: ImpactPolicy::AllInPath,
            lifetime_ticks: 2,
            pierce: 0,
            tick_every: 1,
            geometry: GeometryView {
                radius: quantize(48.0),
                ..geometry(ShapeKind::Circle)
            },
            params: params(&[(PARAM_HEALTH_DELTA, -6)]),
            hooks: HookSet {
                on_hit: vec![HookId::Damage],
                ..HookSet::default()
            },
            replication: ReplicationSpec::spawn_and_end(),
            end_policy: EndPolicy::Duration,
            managed_by_client: false,
            owner_anchored: false,
            explode_on_impact: None,
            status_effect: Some(StatusKind::Burning),
            client_effect: Some("fire-burst".to_string()),
        },
        EffectDefinition {
            type_id: "burning-visual".to_string(),
            delivery: DeliveryKind::Visual,
            shape: ShapeKind::Circle,
            motion: MotionKind::Follow,
            impact: ImpactPolicy::FirstHit,
            lifetime_ticks: 0,
            pierce: 0,
            tick_every: 1,
            geometry: GeometryView {
                radius: quantize(20.0),
                ..geometry(ShapeKind::Circle)
            },
            params: BTreeMap::new(),
            hooks: HookSet::default(),
            replication: ReplicationSpec::spawn_and_end(),
            end_policy: EndPolicy::Manual,
            managed_by_client: true,
            owner_anchored: false,
            explode_on_impact: None,
            status_effect: None,
            client_effect: Some("burning".to_string()),
        },
        EffectDefinition {
            type_id: "blood-splatter".to_string(),
            delivery: DeliveryKind::Visual,
            shape: ShapeKind::Circle,
            motion: MotionKind::Instant,
            impact: ImpactPolicy::FirstHit,
            lifetime_ticks: ticks_from_millis(600),
            pierce: 0,
            tick_every: 1,
            geometry: GeometryView {
                radius: quantize(12.0),
                ..geometry(ShapeKind::Circle)
            },
            params: BTreeMap::new(),
            hooks: HookSet::default(),
            replication: ReplicationSpec::spawn_and_end(),
            end_policy: EndPolicy::Duration,
            managed_by_client: true,
            owner_anchored: false,
            explode_on_impact: None,
            status_effect: None,
            client_effect: Some("blood-splatter".to_string()),
        },
    ]
}
