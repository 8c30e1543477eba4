//! Keyframes and the keyframe ring.
//!
//! A keyframe is a full-world snapshot paired with the journal sequence it
//! describes. The ring stores keyframes bincode-encoded, bounded by count
//! and by age; every read decodes a fresh copy.

use std::collections::{BTreeMap, VecDeque};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::state::{Actor, Archetype, Equipment, Facing, GroundItem, ItemStack, Obstacle, Player, Npc};
use crate::game::status::StatusKind;
use crate::journal::lifecycle::EffectInstanceView;

/// Keyframe errors.
#[derive(Debug, Error)]
pub enum KeyframeError {
    /// Snapshot could not be encoded.
    #[error("keyframe encode failed: {0}")]
    Encode(bincode::Error),

    /// Stored bytes could not be decoded.
    #[error("keyframe decode failed: {0}")]
    Decode(bincode::Error),

    /// No stored keyframe covers the requested sequence.
    #[error("no keyframe at or before sequence {requested}")]
    Expired {
        /// Requested sequence.
        requested: u64,
    },
}

/// Why a keyframe left the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Capacity exceeded.
    Count,
    /// Older than the maximum age.
    Expired,
}

impl EvictionReason {
    /// Telemetry label.
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionReason::Count => "count",
            EvictionReason::Expired => "expired",
        }
    }
}

// =============================================================================
// SNAPSHOT TYPES
// =============================================================================

/// Status effect on an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Status type.
    pub kind: StatusKind,
    /// Expiry tick.
    pub expires_at: u64,
    /// Attached visual instance.
    pub visual_effect_id: Option<String>,
}

/// Actor fields shared by players and NPCs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorSnapshot {
    /// ID.
    pub id: String,
    /// Center X.
    pub x: f64,
    /// Center Y.
    pub y: f64,
    /// Facing.
    pub facing: Facing,
    /// Health.
    pub health: f64,
    /// Health cap.
    pub max_health: f64,
    /// Intent X.
    pub intent_x: f64,
    /// Intent Y.
    pub intent_y: f64,
    /// Inventory slots.
    pub inventory: Vec<ItemStack>,
    /// Equipment.
    pub equipment: Equipment,
    /// Active statuses.
    pub statuses: Vec<StatusSnapshot>,
    /// Version counter.
    pub version: u64,
}

impl From<&Actor> for ActorSnapshot {
    fn from(actor: &Actor) -> Self {
        Self {
            id: actor.id.clone(),
            x: actor.position.x,
            y: actor.position.y,
            facing: actor.facing,
            health: actor.health,
            max_health: actor.max_health,
            intent_x: actor.intent.x,
            intent_y: actor.intent.y,
            inventory: actor.inventory.slots.clone(),
            equipment: actor.equipment.clone(),
            statuses: actor
                .statuses
                .values()
                .map(|s| StatusSnapshot {
                    kind: s.kind,
                    expires_at: s.expires_at,
                    visual_effect_id: s.visual_effect_id.clone(),
                })
                .collect(),
            version: actor.version,
        }
    }
}

impl From<&Player> for ActorSnapshot {
    fn from(player: &Player) -> Self {
        Self::from(&player.actor)
    }
}

/// NPC snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcSnapshot {
    /// Actor fields.
    pub actor: ActorSnapshot,
    /// Archetype.
    pub archetype: Archetype,
}

impl From<&Npc> for NpcSnapshot {
    fn from(npc: &Npc) -> Self {
        Self {
            actor: ActorSnapshot::from(&npc.actor),
            archetype: npc.archetype,
        }
    }
}

/// Ground item snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundItemSnapshot {
    /// ID.
    pub id: String,
    /// Item type.
    pub item_type: String,
    /// Merge key.
    pub fungibility_key: String,
    /// Quantity.
    pub quantity: u32,
    /// X.
    pub x: f64,
    /// Y.
    pub y: f64,
    /// Tile column.
    pub tile_x: i32,
    /// Tile row.
    pub tile_y: i32,
    /// Version counter.
    pub version: u64,
}

impl From<&GroundItem> for GroundItemSnapshot {
    fn from(item: &GroundItem) -> Self {
        Self {
            id: item.id.clone(),
            item_type: item.item_type.clone(),
            fungibility_key: item.fungibility_key.clone(),
            quantity: item.quantity,
            x: item.position.x,
            y: item.position.y,
            tile_x: item.tile.x,
            tile_y: item.tile.y,
            version: item.version,
        }
    }
}

/// World settings a client needs to rebaseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    /// Root seed.
    pub seed: String,
    /// Width in tiles.
    pub width: f64,
    /// Height in tiles.
    pub height: f64,
    /// Tick rate in Hz.
    pub tick_rate: u32,
    /// Sub-units per tile.
    pub coord_scale: i32,
}

/// Full-world snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    /// Journal sequence this snapshot describes.
    pub sequence: u64,
    /// Tick.
    pub tick: u64,
    /// Players by ID.
    pub players: Vec<ActorSnapshot>,
    /// NPCs by ID.
    pub npcs: Vec<NpcSnapshot>,
    /// Remaining obstacles.
    pub obstacles: Vec<Obstacle>,
    /// Ground items by ID.
    pub ground_items: Vec<GroundItemSnapshot>,
    /// Live effect instances.
    pub effects: Vec<EffectInstanceView>,
    /// Last per-instance sequence for every live instance.
    pub cursors: BTreeMap<String, u64>,
    /// World settings.
    pub config: ConfigSnapshot,
}

// =============================================================================
// RING
// =============================================================================

#[derive(Debug, Clone)]
struct StoredKeyframe {
    sequence: u64,
    recorded_at_ms: u64,
    bytes: Vec<u8>,
}

/// Bounded keyframe store.
///
/// `capacity == 0` stores nothing; `max_age_ms == 0` disables age eviction.
#[derive(Debug, Clone)]
pub struct KeyframeRing {
    capacity: usize,
    max_age_ms: u64,
    entries: VecDeque<StoredKeyframe>,
}

impl KeyframeRing {
    /// Create an empty ring.
    pub fn new(capacity: usize, max_age_ms: u64) -> Self {
        Self {
            capacity,
            max_age_ms,
            entries: VecDeque::new(),
        }
    }

    /// Encode and store a keyframe; returns the evictions it caused.
    pub fn insert(&mut self, keyframe: &Keyframe, now_ms: u64) -> Result<Vec<EvictionReason>, KeyframeError> {
        let bytes = bincode::serialize(keyframe).map_err(KeyframeError::Encode)?;
        let mut evicted = self.prune(now_ms);

        self.entries.push_back(StoredKeyframe {
            sequence: keyframe.sequence,
            recorded_at_ms: now_ms,
            bytes,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted.push(EvictionReason::Count);
        }
        Ok(evicted)
    }

    /// Drop keyframes older than the maximum age.
    pub fn prune(&mut self, now_ms: u64) -> Vec<EvictionReason> {
        let mut evicted = Vec::new();
        if self.max_age_ms == 0 {
            return evicted;
        }
        while let Some(front) = self.entries.front() {
            if now_ms.saturating_sub(front.recorded_at_ms) <= self.max_age_ms {
                break;
            }
            self.entries.pop_front();
            evicted.push(EvictionReason::Expired);
        }
        evicted
    }

    /// Newest keyframe whose sequence is at or before `sequence`.
    pub fn find_at_or_before(&self, sequence: u64) -> Result<Keyframe, KeyframeError> {
        let stored = self
            .entries
            .iter()
            .rev()
            .find(|k| k.sequence <= sequence)
            .ok_or(KeyframeError::Expired { requested: sequence })?;
        bincode::deserialize(&stored.bytes).map_err(KeyframeError::Decode)
    }

    /// Newest stored keyframe.
    pub fn latest(&self) -> Result<Keyframe, KeyframeError> {
        self.find_at_or_before(u64::MAX)
    }

    /// Sequences currently stored, oldest first.
    pub fn sequences(&self) -> Vec<u64> {
        self.entries.iter().map(|k| k.sequence).collect()
    }

    /// Number of stored keyframes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::state::ObstacleKind;

    fn keyframe(sequence: u64) -> Keyframe {
        let player = Player::new("p1", Vec2::new(200.0, 180.0));
        Keyframe {
            sequence,
            tick: sequence,
            players: vec![ActorSnapshot::from(&player)],
            npcs: vec![],
            obstacles: vec![Obstacle {
                id: "obstacle-1".to_string(),
                kind: ObstacleKind::Lava,
                x: 40.0,
                y: 40.0,
                width: 80.0,
                height: 40.0,
            }],
            ground_items: vec![],
            effects: vec![],
            cursors: BTreeMap::new(),
            config: ConfigSnapshot {
                seed: "prototype".to_string(),
                width: 100.0,
                height: 100.0,
                tick_rate: 15,
                coord_scale: 16,
            },
        }
    }

    #[test]
    fn test_decode_copy() {
        let mut ring = KeyframeRing::new(4, 5000);
        ring.insert(&keyframe(3), 0).unwrap();
        let decoded = ring.find_at_or_before(7).unwrap();
        assert_eq!(decoded, keyframe(3));
        assert!(matches!(ring.find_at_or_before(2), Err(KeyframeError::Expired { requested: 2 })));
    }

    #[test]
    fn test_count_eviction() {
        let mut ring = KeyframeRing::new(2, 0);
        assert!(ring.insert(&keyframe(1), 0).unwrap().is_empty());
        assert!(ring.insert(&keyframe(2), 0).unwrap().is_empty());
        assert_eq!(ring.insert(&keyframe(3), 0).unwrap(), vec![EvictionReason::Count]);
        assert_eq!(ring.sequences(), vec![2, 3]);
    }

    #[test]
    fn test_age_eviction() {
        let mut ring = KeyframeRing::new(8, 1000);
        ring.insert(&keyframe(1), 0).unwrap();
        ring.insert(&keyframe(2), 600).unwrap();
        let evicted = ring.insert(&keyframe(3), 1200).unwrap();
        assert_eq!(evicted, vec![EvictionReason::Expired]);
        assert_eq!(ring.sequences(), vec![2, 3]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut ring = KeyframeRing::new(0, 5000);
        assert_eq!(ring.insert(&keyframe(1), 0).unwrap(), vec![EvictionReason::Count]);
        assert!(ring.is_empty());
        assert!(ring.latest().is_err());
    }
}
