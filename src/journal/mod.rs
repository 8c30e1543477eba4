//! Journal
//!
//! The authoritative record of each tick's observable changes:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ staged patches   {kind, entityId, payload}  (deduped)    │
//! │ lifecycle batch  spawns / updates / ends / cursors       │
//! ├──────────────────────────────────────────────────────────┤
//! │ finalize(tick) → JournalFrame { sequence, ... }          │
//! │ keyframe ring    sequence → bincode snapshot             │
//! │ frame history    recent frames for keyframe catch-up     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The journal references entities by ID only.

pub mod patch;
pub mod lifecycle;
pub mod keyframe;
pub mod replica;

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::JournalConfig;
use crate::telemetry::{
    Telemetry, JOURNAL_DUPLICATE_END, JOURNAL_UNKNOWN_ID_UPDATE, JOURNAL_UPDATE_AFTER_END,
    KEYFRAME_ENCODE_FAILED, KEYFRAME_EVICTED,
};

pub use patch::{Patch, PatchKind, PatchPayload};
pub use lifecycle::{LifecycleBatch, LifecycleEvent, LifecycleSink, NoopSink};
pub use keyframe::{Keyframe, KeyframeError, KeyframeRing};
pub use replica::Replica;

use lifecycle::{LifecycleTracker, Rejection};

/// Everything observable about one finalized tick.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalFrame {
    /// Global broadcast sequence.
    pub sequence: u64,
    /// Tick.
    pub tick: u64,
    /// Patches in append order.
    pub patches: Vec<Patch>,
    /// Lifecycle events.
    pub lifecycle: LifecycleBatch,
    /// Receivers should rebaseline from `keyframe`.
    pub resync: bool,
    /// Snapshot recorded with this frame.
    pub keyframe: Option<Arc<Keyframe>>,
    /// Sequence of the newest stored keyframe.
    pub keyframe_seq: u64,
}

/// Keyframe plus the frames needed to catch up to the present.
#[derive(Debug, Clone)]
pub struct KeyframeRecovery {
    /// Decoded keyframe.
    pub keyframe: Keyframe,
    /// Frames after the keyframe, oldest first.
    pub frames: Vec<Arc<JournalFrame>>,
}

/// Patch and lifecycle journal.
#[derive(Debug)]
pub struct Journal {
    config: JournalConfig,
    sequence: u64,
    lifecycle_seq: u64,
    staged: Vec<Patch>,
    lifecycle: LifecycleBatch,
    tracker: LifecycleTracker,
    unknown_updates: u32,
    resync_hint: bool,
    keyframes: KeyframeRing,
    latest_keyframe_seq: u64,
    history: VecDeque<Arc<JournalFrame>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new(config: JournalConfig) -> Self {
        let keyframes = KeyframeRing::new(config.keyframe_capacity, config.keyframe_max_age_ms);
        Self {
            config,
            sequence: 0,
            lifecycle_seq: 0,
            staged: Vec::new(),
            lifecycle: LifecycleBatch::default(),
            tracker: LifecycleTracker::default(),
            unknown_updates: 0,
            resync_hint: false,
            keyframes,
            latest_keyframe_seq: 0,
            history: VecDeque::new(),
        }
    }

    /// Settings.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Last finalized sequence.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sequence of the newest stored keyframe.
    pub fn keyframe_sequence(&self) -> u64 {
        self.latest_keyframe_seq
    }

    // =========================================================================
    // PATCHES
    // =========================================================================

    /// Stage a patch. A staged patch with the same `(kind, entityId)` is
    /// replaced in place.
    pub fn append_patch(&mut self, patch: Patch) {
        if let Some(existing) = self
            .staged
            .iter_mut()
            .rev()
            .find(|p| p.kind == patch.kind && p.entity_id == patch.entity_id)
        {
            *existing = patch;
            return;
        }
        self.staged.push(patch);
    }

    /// Remove every staged patch referencing `entity_id`.
    pub fn purge_entity(&mut self, entity_id: &str) {
        self.staged.retain(|p| p.entity_id != entity_id);
    }

    /// Patches staged so far this tick.
    pub fn staged_patches(&self) -> &[Patch] {
        &self.staged
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Validate a lifecycle event, assign its global sequence and stage it.
    ///
    /// Returns the accepted event, or `None` when it was dropped.
    pub fn record_lifecycle(
        &mut self,
        mut event: LifecycleEvent,
        telemetry: &mut Telemetry,
    ) -> Option<LifecycleEvent> {
        match self.tracker.check(&event) {
            Ok(()) => {}
            Err(Rejection::UpdateAfterEnd) => {
                telemetry.incr(JOURNAL_UPDATE_AFTER_END);
                debug!(id = event.id(), "dropped update after end");
                return None;
            }
            Err(Rejection::UnknownId) => {
                telemetry.incr(JOURNAL_UNKNOWN_ID_UPDATE);
                self.unknown_updates += 1;
                if self.unknown_updates >= self.config.unknown_update_resync_threshold {
                    if !self.resync_hint {
                        warn!(id = event.id(), "update for unknown effect; raising resync");
                    }
                    self.resync_hint = true;
                    self.unknown_updates = 0;
                }
                return None;
            }
            Err(Rejection::DuplicateEnd) => {
                telemetry.incr(JOURNAL_DUPLICATE_END);
                return None;
            }
            Err(Rejection::StaleSequence) => {
                warn!(id = event.id(), seq = event.seq(), "dropped out-of-order lifecycle event");
                return None;
            }
        }

        self.lifecycle_seq += 1;
        event.set_journal_seq(self.lifecycle_seq);
        self.lifecycle.push(event.clone());
        Some(event)
    }

    /// Forget an instance's spawn, as if the spawn had been lost.
    pub fn forget_lifecycle(&mut self, id: &str) {
        self.tracker.forget(id);
    }

    /// Resync hint raised by unknown-ID updates.
    pub fn resync_pending(&self) -> bool {
        self.resync_hint
    }

    /// Cursor for every live instance.
    pub fn lifecycle_cursors(&self) -> std::collections::BTreeMap<String, u64> {
        self.tracker.cursors()
    }

    // =========================================================================
    // FINALIZE & KEYFRAMES
    // =========================================================================

    /// Sequence the next finalized frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.sequence + 1
    }

    /// True when the frame for `tick` should carry a keyframe.
    pub fn keyframe_due(&self, tick: u64) -> bool {
        self.resync_hint || tick % self.config.keyframe_interval_ticks.max(1) == 0
    }

    /// Store a keyframe without finalizing a frame.
    pub fn store_keyframe(&mut self, keyframe: &Keyframe, now_ms: u64, telemetry: &mut Telemetry) -> bool {
        match self.keyframes.insert(keyframe, now_ms) {
            Ok(evicted) => {
                for reason in evicted {
                    telemetry.incr_labeled(KEYFRAME_EVICTED, "reason", reason.as_str());
                    debug!(reason = reason.as_str(), "keyframe evicted");
                }
                self.latest_keyframe_seq = keyframe.sequence;
                true
            }
            Err(err) => {
                telemetry.incr(KEYFRAME_ENCODE_FAILED);
                warn!(error = %err, "keyframe not stored");
                false
            }
        }
    }

    /// Close the tick: assign the next sequence, attach the keyframe,
    /// record history and clear staging.
    pub fn finalize(
        &mut self,
        tick: u64,
        now_ms: u64,
        keyframe: Option<Keyframe>,
        telemetry: &mut Telemetry,
    ) -> Arc<JournalFrame> {
        self.sequence += 1;

        for reason in self.keyframes.prune(now_ms) {
            telemetry.incr_labeled(KEYFRAME_EVICTED, "reason", reason.as_str());
        }

        let keyframe = keyframe.map(|mut kf| {
            kf.sequence = self.sequence;
            self.store_keyframe(&kf, now_ms, telemetry);
            Arc::new(kf)
        });
        let resync = self.resync_hint && keyframe.is_some();
        if resync {
            self.resync_hint = false;
        }

        let frame = Arc::new(JournalFrame {
            sequence: self.sequence,
            tick,
            patches: std::mem::take(&mut self.staged),
            lifecycle: std::mem::take(&mut self.lifecycle),
            resync,
            keyframe,
            keyframe_seq: self.latest_keyframe_seq,
        });

        self.history.push_back(frame.clone());
        while self.history.len() > self.config.frame_history {
            self.history.pop_front();
        }
        frame
    }

    /// Keyframe at or before `sequence` plus every later frame.
    ///
    /// Fails with `Expired` when no stored keyframe covers the sequence or
    /// the frame history no longer reaches back to it.
    pub fn recover(&mut self, sequence: u64, now_ms: u64, telemetry: &mut Telemetry) -> Result<KeyframeRecovery, KeyframeError> {
        for reason in self.keyframes.prune(now_ms) {
            telemetry.incr_labeled(KEYFRAME_EVICTED, "reason", reason.as_str());
        }
        let keyframe = self.keyframes.find_at_or_before(sequence)?;

        let oldest = self.history.front().map(|f| f.sequence).unwrap_or(self.sequence + 1);
        if keyframe.sequence < self.sequence && oldest > keyframe.sequence + 1 {
            return Err(KeyframeError::Expired { requested: sequence });
        }

        let frames = self
            .history
            .iter()
            .filter(|f| f.sequence > keyframe.sequence)
            .cloned()
            .collect();
        Ok(KeyframeRecovery { keyframe, frames })
    }

    /// Newest stored keyframe.
    pub fn latest_keyframe(&self) -> Result<Keyframe, KeyframeError> {
        self.keyframes.latest()
    }

    /// Stored keyframe sequences, oldest first.
    pub fn keyframe_sequences(&self) -> Vec<u64> {
        self.keyframes.sequences()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::effects::definition::EndReason;
    use lifecycle::{EffectEndEvent, EffectUpdateEvent};

    fn journal() -> Journal {
        Journal::new(JournalConfig::default())
    }

    #[test]
    fn test_dedupe_same_kind_and_id() {
        let mut j = journal();
        j.append_patch(Patch::new(PatchKind::PlayerPosition, "p1", PatchPayload::Position { x: 1.0, y: 1.0 }));
        j.append_patch(Patch::new(PatchKind::PlayerFacing, "p1", PatchPayload::Removed {}));
        j.append_patch(Patch::new(PatchKind::PlayerPosition, "p1", PatchPayload::Position { x: 2.0, y: 1.0 }));
        assert_eq!(j.staged_patches().len(), 2);
        assert_eq!(j.staged_patches()[0].payload, PatchPayload::Position { x: 2.0, y: 1.0 });
    }

    #[test]
    fn test_purge() {
        let mut j = journal();
        j.append_patch(Patch::new(PatchKind::NpcPosition, "npc-1", PatchPayload::Position { x: 1.0, y: 1.0 }));
        j.append_patch(Patch::new(PatchKind::NpcPosition, "npc-2", PatchPayload::Position { x: 1.0, y: 1.0 }));
        j.purge_entity("npc-1");
        assert_eq!(j.staged_patches().len(), 1);
        assert_eq!(j.staged_patches()[0].entity_id, "npc-2");
    }

    #[test]
    fn test_finalize_sequences() {
        let mut j = journal();
        let mut t = Telemetry::new();
        let a = j.finalize(1, 0, None, &mut t);
        let b = j.finalize(2, 66, None, &mut t);
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert!(b.patches.is_empty());
        assert!(!b.resync);
    }

    #[test]
    fn test_unknown_update_raises_resync() {
        let mut j = journal();
        let mut t = Telemetry::new();
        let event = LifecycleEvent::Update(EffectUpdateEvent {
            id: "effect-9".to_string(),
            seq: 2,
            journal_seq: 0,
            tick: 1,
            delivery: None,
            behavior: None,
            params: None,
        });
        assert!(j.record_lifecycle(event, &mut t).is_none());
        assert_eq!(t.counter(JOURNAL_UNKNOWN_ID_UPDATE), 1);
        assert!(j.resync_pending());
        assert!(j.keyframe_due(7));
    }

    #[test]
    fn test_duplicate_end_dropped() {
        let mut j = journal();
        let mut t = Telemetry::new();
        let end = |seq| {
            LifecycleEvent::End(EffectEndEvent {
                id: "effect-1".to_string(),
                seq,
                journal_seq: 0,
                tick: 1,
                reason: EndReason::Cancelled,
            })
        };
        let accepted = j.record_lifecycle(end(1), &mut t).unwrap();
        assert_eq!(accepted.journal_seq(), 1);
        assert!(j.record_lifecycle(end(2), &mut t).is_none());
        assert_eq!(t.counter(JOURNAL_DUPLICATE_END), 1);
    }
}
