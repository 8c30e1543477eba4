//! Effect Hooks
//!
//! Hooks are named in content and resolved to [`HookId`] when the catalog
//! loads; dispatch is a `match`, never a string lookup. A hook reads the
//! instance and the arena and writes requests into [`HookOutput`]. It never
//! touches the instance's sequence counters.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::core::units::quantize;
use crate::game::effects::definition::PARAM_HEALTH_DELTA;
use crate::game::effects::manager::EffectInstance;
use crate::game::effects::{ActorProbe, ArenaView, EffectIntent};
use crate::game::state::ObstacleKind;
use crate::game::status::StatusKind;

/// Built-in hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookId {
    /// Request the `healthDelta` param as a hit on the target.
    Damage,
    /// Chip gold-ore obstacles overlapping the shape.
    MineOre,
    /// Spawn a blood-splatter visual on the target.
    BloodSplatter,
    /// Cancel a projectile that flies over lava.
    FizzleInLava,
    /// Spawn the follow-up effect where the instance expires.
    Detonate,
}

impl HookId {
    /// Every hook.
    pub const ALL: [HookId; 5] = [
        HookId::Damage,
        HookId::MineOre,
        HookId::BloodSplatter,
        HookId::FizzleInLava,
        HookId::Detonate,
    ];

    /// Content name.
    pub fn as_str(self) -> &'static str {
        match self {
            HookId::Damage => "damage",
            HookId::MineOre => "mine-ore",
            HookId::BloodSplatter => "blood-splatter",
            HookId::FizzleInLava => "fizzle-in-lava",
            HookId::Detonate => "detonate",
        }
    }

    /// Resolve a content name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hook| hook.as_str() == name)
    }
}

impl Serialize for HookId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HookId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        HookId::parse(&name).ok_or_else(|| serde::de::Error::custom(format!("unknown hook {name:?}")))
    }
}

/// Hook failures; the instance is cancelled on the next tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HookError {
    /// Required parameter missing.
    #[error("hook {hook} requires param {param}")]
    MissingParam {
        /// Hook name.
        hook: &'static str,
        /// Parameter name.
        param: &'static str,
    },

    /// OnHit hook called without a target.
    #[error("hook {hook} requires a target")]
    MissingTarget {
        /// Hook name.
        hook: &'static str,
    },

    /// Follow-up effect not configured.
    #[error("hook {hook} has no follow-up effect on {effect}")]
    MissingFollowUp {
        /// Hook name.
        hook: &'static str,
        /// Effect type.
        effect: String,
    },
}

/// What to do with the instance after a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFlow {
    /// Keep advancing.
    Continue,
    /// End with reason `cancelled`.
    Cancel,
}

/// Damage (or healing) to apply through the hit dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct HitRequest {
    /// Instance that caused the hit.
    pub effect_id: String,
    /// Effect (or status) type.
    pub effect_type: String,
    /// Owning actor, if any.
    pub source_actor_id: Option<String>,
    /// Actor hit.
    pub target_id: String,
    /// Raw health delta before source scaling.
    pub delta: f64,
    /// Tick the instance spawned.
    pub spawn_tick: u64,
    /// First hit landed by the instance.
    pub first_hit: bool,
    /// Status to apply to the target.
    pub status: Option<StatusKind>,
    /// Scale damage by the source's physical multiplier.
    pub scale_by_source: bool,
}

/// A melee swing chipping an ore obstacle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningRequest {
    /// Obstacle ID.
    pub obstacle_id: String,
    /// Actor mining.
    pub miner_id: String,
}

/// Requests collected from hooks during one manager tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookOutput {
    /// Follow-up intents, enqueued for the next tick.
    pub intents: Vec<EffectIntent>,
    /// Hits for the dispatcher.
    pub hits: Vec<HitRequest>,
    /// Ore chips.
    pub mining: Vec<MiningRequest>,
}

impl HookOutput {
    /// True when nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty() && self.hits.is_empty() && self.mining.is_empty()
    }
}

/// Inputs to a hook call.
pub struct HookContext<'a> {
    /// Instance being advanced.
    pub instance: &'a EffectInstance,
    /// Current tick.
    pub tick: u64,
    /// Current time (ms).
    pub now_ms: u64,
    /// World view.
    pub arena: &'a ArenaView<'a>,
    /// Actor hit (OnHit only).
    pub target: Option<&'a ActorProbe>,
}

/// Run one hook.
pub fn run_hook(hook: HookId, ctx: &HookContext<'_>, out: &mut HookOutput) -> Result<HookFlow, HookError> {
    match hook {
        HookId::Damage => damage(ctx, out),
        HookId::MineOre => mine_ore(ctx, out),
        HookId::BloodSplatter => blood_splatter(ctx, out),
        HookId::FizzleInLava => fizzle_in_lava(ctx),
        HookId::Detonate => detonate(ctx, out),
    }
}

fn damage(ctx: &HookContext<'_>, out: &mut HookOutput) -> Result<HookFlow, HookError> {
    let target = ctx.target.ok_or(HookError::MissingTarget { hook: "damage" })?;
    let delta = ctx
        .instance
        .param(PARAM_HEALTH_DELTA)
        .ok_or(HookError::MissingParam { hook: "damage", param: PARAM_HEALTH_DELTA })?;

    out.hits.push(HitRequest {
        effect_id: ctx.instance.id.clone(),
        effect_type: ctx.instance.definition.type_id.clone(),
        source_actor_id: Some(ctx.instance.owner_id.clone()),
        target_id: target.id.clone(),
        delta: delta as f64,
        spawn_tick: ctx.instance.spawn_tick,
        first_hit: ctx.instance.hits == 0,
        status: ctx.instance.definition.status_effect,
        scale_by_source: true,
    });
    Ok(HookFlow::Continue)
}

fn mine_ore(ctx: &HookContext<'_>, out: &mut HookOutput) -> Result<HookFlow, HookError> {
    let shape = ctx.instance.world_shape();
    for obstacle in ctx.arena.obstacles {
        if obstacle.kind == ObstacleKind::GoldOre && shape.intersects_rect(&obstacle.rect()) {
            out.mining.push(MiningRequest {
                obstacle_id: obstacle.id.clone(),
                miner_id: ctx.instance.owner_id.clone(),
            });
        }
    }
    Ok(HookFlow::Continue)
}

fn blood_splatter(ctx: &HookContext<'_>, out: &mut HookOutput) -> Result<HookFlow, HookError> {
    let target = ctx.target.ok_or(HookError::MissingTarget { hook: "blood-splatter" })?;
    out.intents.push(
        EffectIntent::new("blood-splatter", &ctx.instance.owner_id)
            .at(quantize(target.position.x), quantize(target.position.y)),
    );
    Ok(HookFlow::Continue)
}

fn fizzle_in_lava(ctx: &HookContext<'_>) -> Result<HookFlow, HookError> {
    let over_lava = ctx
        .arena
        .obstacles
        .iter()
        .any(|o| o.kind == ObstacleKind::Lava && o.rect().contains(ctx.instance.shape_center()));
    Ok(if over_lava { HookFlow::Cancel } else { HookFlow::Continue })
}

fn detonate(ctx: &HookContext<'_>, out: &mut HookOutput) -> Result<HookFlow, HookError> {
    let follow_up = ctx
        .instance
        .definition
        .explode_on_impact
        .as_deref()
        .ok_or_else(|| HookError::MissingFollowUp {
            hook: "detonate",
            effect: ctx.instance.definition.type_id.clone(),
        })?;
    out.intents.push(ctx.instance.follow_up_intent(follow_up));
    Ok(HookFlow::Continue)
}
