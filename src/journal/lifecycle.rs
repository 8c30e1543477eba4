//! Effect lifecycle events and the per-tick lifecycle batch.
//!
//! Every effect instance produces `spawn (update*) end?`. Each event carries
//! the instance's own sequence plus the journal's global sequence, and the
//! tracker here rejects events that would break that grammar.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Serialize, Deserialize};

use crate::game::effects::definition::{DeliveryKind, EndReason, MotionKind, ShapeKind};

/// Ended IDs remembered for duplicate/late detection.
const ENDED_MEMORY: usize = 4096;

// =============================================================================
// VIEWS
// =============================================================================

/// Quantized collision geometry relative to the anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryView {
    /// Shape tag.
    pub shape: ShapeKind,
    /// Offset from the anchor along X.
    pub offset_x: i32,
    /// Offset from the anchor along Y.
    pub offset_y: i32,
    /// Rect width.
    pub width: i32,
    /// Rect height.
    pub height: i32,
    /// Circle/arc/capsule radius.
    pub radius: i32,
    /// Segment/capsule length.
    pub length: i32,
    /// Arc sweep in degrees.
    pub arc_degrees: i32,
    /// Orientation in degrees (0 = +X, clockwise in screen space).
    pub rotation: i32,
}

/// Quantized motion state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionView {
    /// Motion tag.
    pub kind: MotionKind,
    /// Velocity X (sub-units per second).
    pub velocity_x: i32,
    /// Velocity Y (sub-units per second).
    pub velocity_y: i32,
    /// Distance travelled (sub-units).
    pub travelled: i32,
    /// Remaining range (sub-units).
    pub range: i32,
    /// Height above ground for parabolic motion (sub-units).
    pub height: i32,
}

/// Quantized delivery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryView {
    /// Center X (sub-units).
    pub x: i32,
    /// Center Y (sub-units).
    pub y: i32,
    /// Geometry.
    pub geometry: GeometryView,
    /// Motion, absent for stationary effects.
    pub motion: Option<MotionView>,
}

/// Behaviour counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorView {
    /// Ticks until expiry (0 = unlimited).
    pub ticks_remaining: u64,
    /// Stack count.
    pub stacks: u32,
    /// Unique actors hit.
    pub hits: u32,
    /// Damage dealt so far.
    pub accumulated_damage: i64,
}

/// How an instance tracks actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FollowMode {
    /// Free-standing.
    None,
    /// Anchored to the owner.
    Owner,
    /// Anchored to the attached target.
    Target,
}

/// Full instance state sent with a spawn and stored in keyframes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectInstanceView {
    /// Instance ID.
    pub id: String,
    /// Definition type ID.
    pub definition_id: String,
    /// Owning actor.
    pub owner_actor_id: String,
    /// Delivery kind.
    pub delivery_kind: DeliveryKind,
    /// Follow mode.
    pub follow_mode: FollowMode,
    /// Attached actor for follow/target delivery.
    pub attached_actor_id: Option<String>,
    /// Delivery state.
    pub delivery: DeliveryView,
    /// Behaviour counters.
    pub behavior: BehaviorView,
    /// Parameters.
    pub params: BTreeMap<String, i64>,
    /// Tick the instance spawned.
    pub start_tick: u64,
    /// The client owns the visual.
    pub managed_by_client: bool,
    /// Client visual hint.
    pub client_effect: Option<String>,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Instance created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectSpawnEvent {
    /// Per-instance sequence.
    pub seq: u64,
    /// Global journal sequence.
    pub journal_seq: u64,
    /// Tick.
    pub tick: u64,
    /// Full instance state.
    pub instance: EffectInstanceView,
}

/// Instance changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectUpdateEvent {
    /// Instance ID.
    pub id: String,
    /// Per-instance sequence.
    pub seq: u64,
    /// Global journal sequence.
    pub journal_seq: u64,
    /// Tick.
    pub tick: u64,
    /// Delivery state when whitelisted.
    pub delivery: Option<DeliveryView>,
    /// Behaviour counters when whitelisted.
    pub behavior: Option<BehaviorView>,
    /// Parameters when whitelisted.
    pub params: Option<BTreeMap<String, i64>>,
}

/// Instance ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectEndEvent {
    /// Instance ID.
    pub id: String,
    /// Per-instance sequence.
    pub seq: u64,
    /// Global journal sequence.
    pub journal_seq: u64,
    /// Tick.
    pub tick: u64,
    /// Why it ended.
    pub reason: EndReason,
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Spawn.
    Spawn(EffectSpawnEvent),
    /// Update.
    Update(EffectUpdateEvent),
    /// End.
    End(EffectEndEvent),
}

impl LifecycleEvent {
    /// Instance ID.
    pub fn id(&self) -> &str {
        match self {
            LifecycleEvent::Spawn(e) => &e.instance.id,
            LifecycleEvent::Update(e) => &e.id,
            LifecycleEvent::End(e) => &e.id,
        }
    }

    /// Per-instance sequence.
    pub fn seq(&self) -> u64 {
        match self {
            LifecycleEvent::Spawn(e) => e.seq,
            LifecycleEvent::Update(e) => e.seq,
            LifecycleEvent::End(e) => e.seq,
        }
    }

    /// Global sequence (0 until recorded).
    pub fn journal_seq(&self) -> u64 {
        match self {
            LifecycleEvent::Spawn(e) => e.journal_seq,
            LifecycleEvent::Update(e) => e.journal_seq,
            LifecycleEvent::End(e) => e.journal_seq,
        }
    }

    pub(crate) fn set_journal_seq(&mut self, seq: u64) {
        match self {
            LifecycleEvent::Spawn(e) => e.journal_seq = seq,
            LifecycleEvent::Update(e) => e.journal_seq = seq,
            LifecycleEvent::End(e) => e.journal_seq = seq,
        }
    }
}

/// External consumer of accepted lifecycle events.
pub trait LifecycleSink {
    /// Called once per accepted event, in global sequence order.
    fn emit(&mut self, event: &LifecycleEvent);
}

/// Sink that discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl LifecycleSink for NoopSink {
    fn emit(&mut self, _event: &LifecycleEvent) {}
}

impl LifecycleSink for Vec<LifecycleEvent> {
    fn emit(&mut self, event: &LifecycleEvent) {
        self.push(event.clone());
    }
}

// =============================================================================
// BATCH
// =============================================================================

/// Lifecycle events accumulated for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleBatch {
    /// Spawns in global order.
    pub spawns: Vec<EffectSpawnEvent>,
    /// Updates in global order.
    pub updates: Vec<EffectUpdateEvent>,
    /// Ends in global order.
    pub ends: Vec<EffectEndEvent>,
    /// Last per-instance sequence for every instance touched this tick.
    pub cursors: BTreeMap<String, u64>,
}

impl LifecycleBatch {
    /// True when no event was recorded.
    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.updates.is_empty() && self.ends.is_empty()
    }

    pub(crate) fn push(&mut self, event: LifecycleEvent) {
        self.cursors.insert(event.id().to_string(), event.seq());
        match event {
            LifecycleEvent::Spawn(e) => self.spawns.push(e),
            LifecycleEvent::Update(e) => self.updates.push(e),
            LifecycleEvent::End(e) => self.ends.push(e),
        }
    }
}

// =============================================================================
// TRACKER
// =============================================================================

/// Why an event was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Update for an ended instance.
    UpdateAfterEnd,
    /// Update for an instance never spawned.
    UnknownId,
    /// Second end.
    DuplicateEnd,
    /// Per-instance sequence went backwards.
    StaleSequence,
}

/// Per-instance grammar enforcement.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    live: BTreeMap<String, u64>,
    ended: BTreeSet<String>,
    ended_order: VecDeque<String>,
}

impl LifecycleTracker {
    /// Validate and record an event.
    pub fn check(&mut self, event: &LifecycleEvent) -> Result<(), Rejection> {
        let id = event.id();
        match event {
            LifecycleEvent::Spawn(e) => {
                if self.live.contains_key(id) || self.ended.contains(id) {
                    return Err(Rejection::StaleSequence);
                }
                self.live.insert(id.to_string(), e.seq);
                Ok(())
            }
            LifecycleEvent::Update(e) => {
                if self.ended.contains(id) {
                    return Err(Rejection::UpdateAfterEnd);
                }
                let cursor = self.live.get_mut(id).ok_or(Rejection::UnknownId)?;
                if e.seq <= *cursor {
                    return Err(Rejection::StaleSequence);
                }
                *cursor = e.seq;
                Ok(())
            }
            LifecycleEvent::End(e) => {
                if self.ended.contains(id) {
                    return Err(Rejection::DuplicateEnd);
                }
                // An end without a sent spawn is still terminal for the ID
                if let Some(cursor) = self.live.get(id) {
                    if e.seq <= *cursor {
                        return Err(Rejection::StaleSequence);
                    }
                }
                self.live.remove(id);
                self.mark_ended(id);
                Ok(())
            }
        }
    }

    fn mark_ended(&mut self, id: &str) {
        self.ended.insert(id.to_string());
        self.ended_order.push_back(id.to_string());
        while self.ended_order.len() > ENDED_MEMORY {
            if let Some(old) = self.ended_order.pop_front() {
                self.ended.remove(&old);
            }
        }
    }

    /// Cursor for every live instance.
    pub fn cursors(&self) -> BTreeMap<String, u64> {
        self.live.clone()
    }

    /// Drop knowledge of an ID without ending it (simulates a lost spawn).
    pub fn forget(&mut self, id: &str) {
        self.live.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end(id: &str, seq: u64) -> LifecycleEvent {
        LifecycleEvent::End(EffectEndEvent {
            id: id.to_string(),
            seq,
            journal_seq: 0,
            tick: 1,
            reason: EndReason::Expired,
        })
    }

    fn update(id: &str, seq: u64) -> LifecycleEvent {
        LifecycleEvent::Update(EffectUpdateEvent {
            id: id.to_string(),
            seq,
            journal_seq: 0,
            tick: 1,
            delivery: None,
            behavior: None,
            params: None,
        })
    }

    #[test]
    fn test_update_rules() {
        let mut tracker = LifecycleTracker::default();
        assert_eq!(tracker.check(&update("effect-1", 2)), Err(Rejection::UnknownId));

        assert_eq!(tracker.check(&end("effect-2", 1)), Ok(()));
        assert_eq!(tracker.check(&update("effect-2", 2)), Err(Rejection::UpdateAfterEnd));
        assert_eq!(tracker.check(&end("effect-2", 3)), Err(Rejection::DuplicateEnd));
    }

    #[test]
    fn test_batch_cursors() {
        let mut batch = LifecycleBatch::default();
        batch.push(update("effect-1", 2));
        batch.push(end("effect-1", 3));
        assert_eq!(batch.cursors.get("effect-1"), Some(&3));
        assert_eq!(batch.updates.len(), 1);
        assert_eq!(batch.ends.len(), 1);
        assert!(!batch.is_empty());
    }
}
