//! Hit Dispatch
//!
//! Applies one [`HitRequest`] to one actor: health through the barrier,
//! telemetry, and any status the hit carries. Defeat handling (loot drop,
//! removal) is left to the world, which sees every actor.

use tracing::debug;

use crate::game::barrier::{set_health, ActorRole};
use crate::game::effects::{EffectManager, HitRequest};
use crate::game::state::Actor;
use crate::game::status::apply_status;
use crate::journal::Journal;
use crate::telemetry::{EffectHitRecord, Telemetry};

/// Result of one applied hit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitOutcome {
    /// Health change actually applied.
    pub applied: f64,
    /// Health reached zero on this hit.
    pub defeated: bool,
    /// Initial status tick to dispatch next.
    pub follow_up: Option<HitRequest>,
}

/// Scale a raw delta by the source's damage multiplier.
///
/// Only damage scales; healing passes through.
pub fn scaled_delta(hit: &HitRequest, source_damage: Option<f64>) -> f64 {
    match source_damage {
        Some(scale) if hit.scale_by_source && hit.delta < 0.0 => hit.delta * scale.max(0.0),
        _ => hit.delta,
    }
}

/// Apply a hit to `actor`. `source_damage` is the source's
/// `physical_damage` multiplier when the source is still alive.
#[allow(clippy::too_many_arguments)]
pub fn apply_effect_hit(
    actor: &mut Actor,
    role: ActorRole,
    hit: &HitRequest,
    source_damage: Option<f64>,
    tick: u64,
    effects: &mut EffectManager,
    journal: &mut Journal,
    telemetry: &mut Telemetry,
) -> HitOutcome {
    if actor.is_defeated() {
        return HitOutcome::default();
    }

    let delta = scaled_delta(hit, source_damage);
    let before = actor.health;
    set_health(actor, role, before + delta, journal);
    let applied = actor.health - before;

    telemetry.record_effect_hit(&EffectHitRecord {
        effect_type: &hit.effect_type,
        target: &actor.id,
        delta,
        spawn_tick: hit.spawn_tick,
        tick,
        first_hit: hit.first_hit,
    });

    let defeated = actor.is_defeated();
    if defeated {
        debug!(actor = %actor.id, effect = %hit.effect_type, tick, "actor defeated");
    }

    let follow_up = match hit.status {
        Some(kind) if !defeated => {
            apply_status(actor, kind, hit.source_actor_id.as_deref(), tick, effects, journal)
        }
        _ => None,
    };

    HitOutcome { applied, defeated, follow_up }
}
