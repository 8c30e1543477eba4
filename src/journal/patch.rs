//! Field-level patches.
//!
//! A patch carries the new authoritative value of one entity field, never a
//! delta, so receivers can apply patches idempotently.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::state::{Equipment, Facing, ItemStack};

/// Patch kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    /// Player center.
    PlayerPosition,
    /// Player facing.
    PlayerFacing,
    /// Player movement intent.
    PlayerIntent,
    /// Player health and cap.
    PlayerHealth,
    /// Player inventory slots.
    PlayerInventory,
    /// Player equipment.
    PlayerEquipment,
    /// Player left or was defeated.
    PlayerRemoved,
    /// NPC center.
    NpcPosition,
    /// NPC facing.
    NpcFacing,
    /// NPC movement intent.
    NpcIntent,
    /// NPC health and cap.
    NpcHealth,
    /// NPC inventory slots.
    NpcInventory,
    /// NPC equipment.
    NpcEquipment,
    /// NPC defeated.
    NpcRemoved,
    /// Effect instance position (sub-units).
    EffectPosition,
    /// Effect instance parameters.
    EffectParams,
    /// Ground item position.
    GroundItemPosition,
    /// Ground item quantity.
    GroundItemQuantity,
    /// Ground item picked up.
    GroundItemRemoved,
    /// Obstacle destroyed.
    ObstacleRemoved,
}

impl PatchKind {
    /// True for terminal patches.
    pub fn is_removal(self) -> bool {
        matches!(
            self,
            PatchKind::PlayerRemoved
                | PatchKind::NpcRemoved
                | PatchKind::GroundItemRemoved
                | PatchKind::ObstacleRemoved
        )
    }
}

/// New value carried by a patch.
///
/// Variants are distinguished by their field names on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchPayload {
    /// Position in world units (sub-units for effects).
    Position {
        /// X
        x: f64,
        /// Y
        y: f64,
    },
    /// Facing.
    Facing {
        /// New facing.
        facing: Facing,
    },
    /// Normalized intent.
    Intent {
        /// X component.
        dx: f64,
        /// Y component.
        dy: f64,
    },
    /// Health and cap.
    Health {
        /// Current health.
        health: f64,
        /// Cap.
        #[serde(rename = "maxHealth")]
        max_health: f64,
    },
    /// Inventory slots.
    Inventory {
        /// Full slot list.
        slots: Vec<ItemStack>,
    },
    /// Equipment.
    Equipment {
        /// Full equipment.
        equipment: Equipment,
    },
    /// Stack quantity.
    Quantity {
        /// New quantity.
        quantity: u32,
        /// Item type, so a receiver can create the stack.
        #[serde(rename = "itemType")]
        item_type: String,
    },
    /// Effect parameters.
    Params {
        /// Full parameter map.
        params: BTreeMap<String, i64>,
    },
    /// Terminal marker.
    Removed {},
}

impl PatchPayload {
    /// Position payload.
    pub fn position(v: Vec2) -> Self {
        PatchPayload::Position { x: v.x, y: v.y }
    }

    /// Intent payload.
    pub fn intent(v: Vec2) -> Self {
        PatchPayload::Intent { dx: v.x, dy: v.y }
    }
}

/// One journaled field change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Kind tag.
    pub kind: PatchKind,
    /// Entity referenced by ID.
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// New value.
    pub payload: PatchPayload,
}

impl Patch {
    /// Create a patch.
    pub fn new(kind: PatchKind, entity_id: &str, payload: PatchPayload) -> Self {
        Self {
            kind,
            entity_id: entity_id.to_string(),
            payload,
        }
    }

    /// Terminal patch.
    pub fn removed(kind: PatchKind, entity_id: &str) -> Self {
        Self::new(kind, entity_id, PatchPayload::Removed {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let patch = Patch::new(
            PatchKind::PlayerHealth,
            "p1",
            PatchPayload::Health { health: 85.0, max_health: 100.0 },
        );
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["kind"], "player_health");
        assert_eq!(json["entityId"], "p1");
        assert_eq!(json["payload"]["maxHealth"], 100.0);

        let removed = serde_json::to_value(Patch::removed(PatchKind::GroundItemRemoved, "ground-1")).unwrap();
        assert_eq!(removed["kind"], "ground_item_removed");
        assert!(removed["payload"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_payload_parse_by_fields() {
        let p: PatchPayload = serde_json::from_str(r#"{"dx":1.0,"dy":0.0}"#).unwrap();
        assert_eq!(p, PatchPayload::Intent { dx: 1.0, dy: 0.0 });
        let p: PatchPayload = serde_json::from_str(r#"{"facing":"left"}"#).unwrap();
        assert_eq!(p, PatchPayload::Facing { facing: Facing::Left });
        let p: PatchPayload = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(p, PatchPayload::Removed {});
    }
}
