//! Telemetry Adaptor
//!
//! The narrow interface the simulation reports through: labelled counters
//! and per-effect-type parity summaries. Counter bumps are mirrored to
//! `tracing` at debug level; exporting is left to the transport layer,
//! which reads [`Telemetry::snapshot`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

/// Commands dropped during intake, labelled by reason.
pub const COMMANDS_DROPPED: &str = "commands_dropped_total";
/// Lifecycle update for an instance that already ended.
pub const JOURNAL_UPDATE_AFTER_END: &str = "journal_update_after_end";
/// Lifecycle update for an instance whose spawn was never recorded.
pub const JOURNAL_UNKNOWN_ID_UPDATE: &str = "journal_unknown_id_update";
/// Second end event for the same instance.
pub const JOURNAL_DUPLICATE_END: &str = "journal_duplicate_end";
/// Outbound message dropped because a subscriber queue was full.
pub const BROADCAST_QUEUE_DROPPED: &str = "broadcast_queue_dropped_total";
/// Keyframe evicted from the ring, labelled by reason.
pub const KEYFRAME_EVICTED: &str = "keyframe_evicted_total";
/// Keyframe request refused, labelled by reason.
pub const KEYFRAME_NACK: &str = "keyframe_nack_total";
/// Effect intent naming an unregistered type.
pub const EFFECT_INTENT_UNKNOWN_TYPE: &str = "effect_intent_unknown_type";
/// Effect intent whose owner vanished before instantiation.
pub const EFFECT_INTENT_ORPHANED: &str = "effect_intent_orphaned";
/// Hook returned an error, labelled by hook.
pub const EFFECT_HOOK_FAILED: &str = "effect_hook_failed_total";
/// Hits applied through the dispatcher, labelled by effect type.
pub const EFFECT_HITS: &str = "effect_hits_total";
/// NPC decisions pushed to a later tick by the per-tick cap.
pub const AI_DECISIONS_DEFERRED: &str = "ai_decisions_deferred";
/// A* found no route.
pub const PATH_PLAN_FAILED: &str = "path_plan_failed";
/// Keyframe could not be encoded for the ring.
pub const KEYFRAME_ENCODE_FAILED: &str = "keyframe_encode_failed";

/// Aggregate hit statistics for one effect type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EffectParity {
    /// Damaging hits applied.
    pub hits: u64,
    /// Distinct actors damaged.
    pub unique_victims: BTreeSet<String>,
    /// Sum of damage dealt (positive number).
    pub total_damage: f64,
    /// Instances that landed at least one damaging hit.
    pub first_hits: u64,
    /// Sum of spawn-to-first-hit latencies in ticks.
    pub first_hit_latency_ticks_total: u64,
    /// Worst spawn-to-first-hit latency in ticks.
    pub first_hit_latency_ticks_max: u64,
}

impl EffectParity {
    /// Mean spawn-to-first-hit latency in ticks.
    pub fn mean_first_hit_latency(&self) -> Option<f64> {
        if self.first_hits == 0 {
            return None;
        }
        Some(self.first_hit_latency_ticks_total as f64 / self.first_hits as f64)
    }
}

/// One applied effect hit, as reported by the hit dispatcher.
#[derive(Debug, Clone)]
pub struct EffectHitRecord<'a> {
    /// Effect type ID.
    pub effect_type: &'a str,
    /// Actor that was hit.
    pub target: &'a str,
    /// Health delta applied (negative for damage).
    pub delta: f64,
    /// Tick the instance spawned.
    pub spawn_tick: u64,
    /// Tick of the hit.
    pub tick: u64,
    /// First hit landed by this instance.
    pub first_hit: bool,
}

/// Read-only view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// Counter values keyed by `name{label=value}`.
    pub counters: BTreeMap<String, u64>,
    /// Parity summaries keyed by effect type.
    pub parity: BTreeMap<String, EffectParity>,
}

/// Counter and parity recorder owned by the simulation task.
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: BTreeMap<String, u64>,
    parity: BTreeMap<String, EffectParity>,
}

impl Telemetry {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump an unlabelled counter.
    pub fn incr(&mut self, name: &'static str) {
        self.add(name, None, 1);
    }

    /// Bump a counter with one label.
    pub fn incr_labeled(&mut self, name: &'static str, label: &'static str, value: &str) {
        self.add(name, Some((label, value)), 1);
    }

    fn add(&mut self, name: &'static str, label: Option<(&'static str, &str)>, delta: u64) {
        let key = match label {
            Some((label, value)) => format!("{name}{{{label}={value}}}"),
            None => name.to_string(),
        };
        debug!(counter = %key, delta, "telemetry");
        *self.counters.entry(key).or_insert(0) += delta;
    }

    /// Current value of an unlabelled counter.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Current value of a labelled counter.
    pub fn counter_labeled(&self, name: &str, label: &str, value: &str) -> u64 {
        self.counters
            .get(&format!("{name}{{{label}={value}}}"))
            .copied()
            .unwrap_or(0)
    }

    /// Record an applied effect hit; damage also feeds parity.
    pub fn record_effect_hit(&mut self, hit: &EffectHitRecord<'_>) {
        self.add(EFFECT_HITS, Some(("type", hit.effect_type)), 1);

        if hit.delta >= 0.0 {
            return;
        }

        let parity = self.parity.entry(hit.effect_type.to_string()).or_default();
        parity.hits += 1;
        parity.unique_victims.insert(hit.target.to_string());
        parity.total_damage += -hit.delta;
        if hit.first_hit {
            let latency = hit.tick.saturating_sub(hit.spawn_tick);
            parity.first_hits += 1;
            parity.first_hit_latency_ticks_total += latency;
            parity.first_hit_latency_ticks_max = parity.first_hit_latency_ticks_max.max(latency);
        }
    }

    /// Parity summary for one effect type.
    pub fn parity(&self, effect_type: &str) -> Option<&EffectParity> {
        self.parity.get(effect_type)
    }

    /// Copy of all counters and parity summaries.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            counters: self.counters.clone(),
            parity: self.parity.clone(),
        }
    }

    /// Log one line per effect type with damage parity.
    pub fn log_parity_summary(&self, tick: u64) {
        for (effect_type, parity) in &self.parity {
            info!(
                tick,
                effect_type = %effect_type,
                hits = parity.hits,
                unique_victims = parity.unique_victims.len(),
                total_damage = parity.total_damage,
                mean_first_hit_latency = ?parity.mean_first_hit_latency(),
                "effect parity"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut t = Telemetry::new();
        t.incr(JOURNAL_UPDATE_AFTER_END);
        t.incr(JOURNAL_UPDATE_AFTER_END);
        t.incr_labeled(COMMANDS_DROPPED, "reason", "invalid_facing");

        assert_eq!(t.counter(JOURNAL_UPDATE_AFTER_END), 2);
        assert_eq!(t.counter_labeled(COMMANDS_DROPPED, "reason", "invalid_facing"), 1);
        assert_eq!(t.counter_labeled(COMMANDS_DROPPED, "reason", "non_finite"), 0);
        assert!(t.snapshot().counters.contains_key("commands_dropped_total{reason=invalid_facing}"));
    }

    #[test]
    fn test_parity_ignores_heals() {
        let mut t = Telemetry::new();
        t.record_effect_hit(&EffectHitRecord {
            effect_type: "heal",
            target: "p1",
            delta: 5.0,
            spawn_tick: 1,
            tick: 2,
            first_hit: true,
        });
        assert!(t.parity("heal").is_none());
        assert_eq!(t.counter_labeled(EFFECT_HITS, "type", "heal"), 1);
    }

    #[test]
    fn test_parity_summary() {
        let mut t = Telemetry::new();
        for (target, tick, first) in [("a", 3, true), ("b", 3, false), ("a", 5, false)] {
            t.record_effect_hit(&EffectHitRecord {
                effect_type: "attack",
                target,
                delta: -10.0,
                spawn_tick: 1,
                tick,
                first_hit: first,
            });
        }
        let parity = t.parity("attack").unwrap();
        assert_eq!(parity.hits, 3);
        assert_eq!(parity.unique_victims.len(), 2);
        assert_eq!(parity.total_damage, 30.0);
        assert_eq!(parity.first_hits, 1);
        assert_eq!(parity.mean_first_hit_latency(), Some(2.0));
        assert_eq!(parity.first_hit_latency_ticks_max, 2);
    }
}
