//! Status Effects
//!
//! Timed conditions attached to an actor. Apply is idempotent per
//! `(actor, kind)`: a second application only pushes the expiry out. Each
//! tick of a status becomes a [`HitRequest`] for the hit dispatcher, and an
//! attached visual effect follows the actor until the status expires.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::units::ticks_from_millis;
use crate::game::effects::{EffectIntent, EffectManager, EndReason, HitRequest};
use crate::game::state::Actor;
use crate::journal::Journal;
use crate::TICK_RATE;

/// Param on the attached visual holding the expiry tick.
pub const PARAM_EXPIRES_AT: &str = "expiresAt";

/// Status type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Fire damage over time.
    Burning,
}

impl StatusKind {
    /// Wire name, also used as the effect type in hit telemetry.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Burning => "burning",
        }
    }

    /// Timing and damage.
    pub fn definition(self) -> StatusDefinition {
        match self {
            StatusKind::Burning => StatusDefinition {
                duration_ticks: ticks_from_millis(3000),
                tick_interval_ticks: ticks_from_millis(200),
                initial_tick: true,
                damage_per_second: 10.0,
                visual_effect: Some("burning-visual"),
            },
        }
    }
}

/// Status template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusDefinition {
    /// Lifetime after the latest application.
    pub duration_ticks: u64,
    /// Ticks between damage ticks.
    pub tick_interval_ticks: u64,
    /// Deal a tick on first application.
    pub initial_tick: bool,
    /// Damage per second of exposure.
    pub damage_per_second: f64,
    /// Effect attached while active.
    pub visual_effect: Option<&'static str>,
}

impl StatusDefinition {
    /// Damage dealt by one tick: `dps · interval`.
    pub fn damage_per_tick(&self) -> f64 {
        self.damage_per_second * self.tick_interval_ticks as f64 / TICK_RATE as f64
    }
}

/// Active status on an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEffectInstance {
    /// Status type.
    pub kind: StatusKind,
    /// Actor that applied it, if any.
    pub source_actor_id: Option<String>,
    /// First application tick.
    pub applied_at: u64,
    /// Removal tick.
    pub expires_at: u64,
    /// Next damage tick.
    pub next_tick_at: u64,
    /// Attached visual instance.
    pub visual_effect_id: Option<String>,
}

fn status_hit(actor: &Actor, status: &StatusEffectInstance, tick: u64) -> HitRequest {
    let definition = status.kind.definition();
    HitRequest {
        effect_id: status
            .visual_effect_id
            .clone()
            .unwrap_or_else(|| format!("status-{}", status.kind.as_str())),
        effect_type: status.kind.as_str().to_string(),
        source_actor_id: status.source_actor_id.clone(),
        target_id: actor.id.clone(),
        delta: -definition.damage_per_tick(),
        spawn_tick: status.applied_at,
        first_hit: status.applied_at == tick,
        status: None,
        scale_by_source: false,
    }
}

/// Apply or refresh a status. Returns the initial tick's hit, if any.
pub fn apply_status(
    actor: &mut Actor,
    kind: StatusKind,
    source_actor_id: Option<&str>,
    tick: u64,
    effects: &mut EffectManager,
    journal: &mut Journal,
) -> Option<HitRequest> {
    let definition = kind.definition();
    let expires_at = tick + definition.duration_ticks;

    if let Some(existing) = actor.statuses.get_mut(&kind) {
        if expires_at > existing.expires_at {
            existing.expires_at = expires_at;
            if let Some(visual) = &existing.visual_effect_id {
                effects.set_param(visual, PARAM_EXPIRES_AT, expires_at as i64, journal);
            }
        }
        return None;
    }

    let visual_effect_id = definition.visual_effect.map(|visual| {
        effects.enqueue(
            EffectIntent::new(visual, &actor.id)
                .targeting(&actor.id)
                .with_param(PARAM_EXPIRES_AT, expires_at as i64),
        )
    });

    let status = StatusEffectInstance {
        kind,
        source_actor_id: source_actor_id.map(str::to_string),
        applied_at: tick,
        expires_at,
        next_tick_at: tick + definition.tick_interval_ticks,
        visual_effect_id,
    };
    debug!(actor = %actor.id, status = kind.as_str(), expires_at, "status applied");

    let initial = definition.initial_tick.then(|| status_hit(actor, &status, tick));
    actor.statuses.insert(kind, status);
    initial
}

/// Expire and tick an actor's statuses. Expiry is checked before damage.
pub fn advance_statuses(actor: &mut Actor, tick: u64, effects: &mut EffectManager) -> Vec<HitRequest> {
    let mut hits = Vec::new();
    let mut expired = Vec::new();

    for (kind, status) in &actor.statuses {
        if tick >= status.expires_at {
            expired.push(*kind);
        }
    }
    for kind in expired {
        if let Some(status) = actor.statuses.remove(&kind) {
            debug!(actor = %actor.id, status = kind.as_str(), "status expired");
            if let Some(visual) = status.visual_effect_id {
                effects.request_end(&visual, EndReason::Expired);
            }
        }
    }

    let kinds: Vec<StatusKind> = actor.statuses.keys().copied().collect();
    for kind in kinds {
        let due = actor.statuses.get(&kind).filter(|s| tick >= s.next_tick_at).cloned();
        if let Some(status) = due {
            hits.push(status_hit(actor, &status, tick));
            if let Some(s) = actor.statuses.get_mut(&kind) {
                s.next_tick_at = tick + kind.definition().tick_interval_ticks;
            }
        }
    }
    hits
}

/// Drop every status; attached visuals end with `ownerLost`.
pub fn clear_statuses(actor: &mut Actor, effects: &mut EffectManager) {
    for (_, status) in std::mem::take(&mut actor.statuses) {
        if let Some(visual) = status.visual_effect_id {
            effects.request_end(&visual, EndReason::OwnerLost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::JournalConfig;
    use crate::core::vec2::Vec2;
    use crate::game::effects::EffectRegistry;
    use crate::game::state::Player;

    fn rig() -> (Player, EffectManager, Journal) {
        (
            Player::new("p1", Vec2::new(100.0, 100.0)),
            EffectManager::new(Arc::new(EffectRegistry::builtin())),
            Journal::new(JournalConfig::default()),
        )
    }

    #[test]
    fn test_burning_timing() {
        let def = StatusKind::Burning.definition();
        assert_eq!(def.duration_ticks, 45);
        assert_eq!(def.tick_interval_ticks, 3);
        assert_eq!(def.damage_per_tick(), 2.0);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (mut player, mut effects, mut journal) = rig();
        let actor = &mut player.actor;
        let first = apply_status(actor, StatusKind::Burning, None, 10, &mut effects, &mut journal);
        assert_eq!(first.map(|h| h.delta), Some(-2.0));
        assert_eq!(effects.queued(), 1);

        let again = apply_status(actor, StatusKind::Burning, None, 20, &mut effects, &mut journal);
        assert!(again.is_none());
        assert_eq!(effects.queued(), 1);
        assert_eq!(actor.statuses[&StatusKind::Burning].expires_at, 65);

        // An earlier application never shortens it
        apply_status(actor, StatusKind::Burning, None, 12, &mut effects, &mut journal);
        assert_eq!(actor.statuses[&StatusKind::Burning].expires_at, 65);
    }

    #[test]
    fn test_ticks_then_expires() {
        let (mut player, mut effects, mut journal) = rig();
        let actor = &mut player.actor;
        apply_status(actor, StatusKind::Burning, Some("npc-1"), 10, &mut effects, &mut journal);

        let mut hit_ticks = Vec::new();
        for tick in 11..=60 {
            if !advance_statuses(actor, tick, &mut effects).is_empty() {
                hit_ticks.push(tick);
            }
        }
        let expected: Vec<u64> = (13..55).step_by(3).collect();
        assert_eq!(hit_ticks, expected);
        assert!(actor.statuses.is_empty());
    }

    #[test]
    fn test_clear_requests_visual_end() {
        let (mut player, mut effects, mut journal) = rig();
        apply_status(&mut player.actor, StatusKind::Burning, None, 1, &mut effects, &mut journal);
        clear_statuses(&mut player.actor, &mut effects);
        assert!(player.actor.statuses.is_empty());
        // The visual was still queued, so it is dropped outright
        assert_eq!(effects.queued(), 0);
    }
}
