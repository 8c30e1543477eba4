//! Receiver-side state rebuilt from keyframes and frames.
//!
//! Used by observers that only see the broadcast stream (bots, replay
//! tooling). Applying the same frames to replicas built from different
//! keyframes converges on the same state.

use std::collections::BTreeMap;

use crate::game::state::{Equipment, Facing, ItemStack};
use crate::journal::keyframe::{ActorSnapshot, Keyframe};
use crate::journal::patch::{Patch, PatchKind, PatchPayload};
use crate::journal::JournalFrame;

/// Replicated actor fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaActor {
    /// Center.
    pub position: (f64, f64),
    /// Facing.
    pub facing: Facing,
    /// Health.
    pub health: f64,
    /// Health cap.
    pub max_health: f64,
    /// Intent.
    pub intent: (f64, f64),
    /// Inventory slots.
    pub inventory: Vec<ItemStack>,
    /// Equipment.
    pub equipment: Equipment,
}

impl Default for ReplicaActor {
    fn default() -> Self {
        Self {
            position: (0.0, 0.0),
            facing: Facing::Down,
            health: 0.0,
            max_health: 0.0,
            intent: (0.0, 0.0),
            inventory: Vec::new(),
            equipment: Equipment::default(),
        }
    }
}

impl From<&ActorSnapshot> for ReplicaActor {
    fn from(s: &ActorSnapshot) -> Self {
        Self {
            position: (s.x, s.y),
            facing: s.facing,
            health: s.health,
            max_health: s.max_health,
            intent: (s.intent_x, s.intent_y),
            inventory: s.inventory.clone(),
            equipment: s.equipment.clone(),
        }
    }
}

/// Replicated ground item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicaItem {
    /// Item type.
    pub item_type: String,
    /// Quantity.
    pub quantity: u32,
    /// Position.
    pub position: (f64, f64),
}

/// Observable world state as a receiver sees it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replica {
    /// Last applied sequence.
    pub sequence: u64,
    /// Players by ID.
    pub players: BTreeMap<String, ReplicaActor>,
    /// NPCs by ID.
    pub npcs: BTreeMap<String, ReplicaActor>,
    /// Ground items by ID.
    pub ground_items: BTreeMap<String, ReplicaItem>,
    /// Remaining obstacle IDs.
    pub obstacles: Vec<String>,
    /// Live effect cursors.
    pub effects: BTreeMap<String, u64>,
}

impl Replica {
    /// Baseline from a keyframe.
    pub fn from_keyframe(keyframe: &Keyframe) -> Self {
        Self {
            sequence: keyframe.sequence,
            players: keyframe
                .players
                .iter()
                .map(|p| (p.id.clone(), ReplicaActor::from(p)))
                .collect(),
            npcs: keyframe
                .npcs
                .iter()
                .map(|n| (n.actor.id.clone(), ReplicaActor::from(&n.actor)))
                .collect(),
            ground_items: keyframe
                .ground_items
                .iter()
                .map(|g| {
                    (
                        g.id.clone(),
                        ReplicaItem {
                            item_type: g.item_type.clone(),
                            quantity: g.quantity,
                            position: (g.x, g.y),
                        },
                    )
                })
                .collect(),
            obstacles: keyframe.obstacles.iter().map(|o| o.id.clone()).collect(),
            effects: keyframe.cursors.clone(),
        }
    }

    /// Apply a frame. Frames at or before the current sequence are ignored;
    /// a resync frame rebaselines from its keyframe.
    pub fn apply_frame(&mut self, frame: &JournalFrame) {
        if frame.sequence <= self.sequence {
            return;
        }
        if frame.resync {
            if let Some(keyframe) = &frame.keyframe {
                *self = Self::from_keyframe(keyframe);
                return;
            }
        }
        for patch in &frame.patches {
            self.apply_patch(patch);
        }
        for spawn in &frame.lifecycle.spawns {
            self.effects.insert(spawn.instance.id.clone(), spawn.seq);
        }
        for update in &frame.lifecycle.updates {
            if let Some(cursor) = self.effects.get_mut(&update.id) {
                *cursor = update.seq;
            }
        }
        for end in &frame.lifecycle.ends {
            self.effects.remove(&end.id);
        }
        self.sequence = frame.sequence;
    }

    /// Apply one patch; patches for unseen IDs create the entity.
    pub fn apply_patch(&mut self, patch: &Patch) {
        let id = patch.entity_id.clone();
        match patch.kind {
            PatchKind::PlayerRemoved => {
                self.players.remove(&id);
            }
            PatchKind::NpcRemoved => {
                self.npcs.remove(&id);
            }
            PatchKind::GroundItemRemoved => {
                self.ground_items.remove(&id);
            }
            PatchKind::ObstacleRemoved => {
                self.obstacles.retain(|o| *o != id);
            }
            PatchKind::GroundItemPosition | PatchKind::GroundItemQuantity => {
                let item = self.ground_items.entry(id).or_default();
                match &patch.payload {
                    PatchPayload::Position { x, y } => item.position = (*x, *y),
                    PatchPayload::Quantity { quantity, item_type } => {
                        item.quantity = *quantity;
                        item.item_type = item_type.clone();
                    }
                    _ => {}
                }
            }
            PatchKind::EffectPosition | PatchKind::EffectParams => {}
            PatchKind::PlayerPosition
            | PatchKind::PlayerFacing
            | PatchKind::PlayerIntent
            | PatchKind::PlayerHealth
            | PatchKind::PlayerInventory
            | PatchKind::PlayerEquipment => {
                let actor = self.players.entry(id).or_default();
                apply_actor_payload(actor, &patch.payload);
            }
            PatchKind::NpcPosition
            | PatchKind::NpcFacing
            | PatchKind::NpcIntent
            | PatchKind::NpcHealth
            | PatchKind::NpcInventory
            | PatchKind::NpcEquipment => {
                let actor = self.npcs.entry(id).or_default();
                apply_actor_payload(actor, &patch.payload);
            }
        }
    }
}

fn apply_actor_payload(actor: &mut ReplicaActor, payload: &PatchPayload) {
    match payload {
        PatchPayload::Position { x, y } => actor.position = (*x, *y),
        PatchPayload::Facing { facing } => actor.facing = *facing,
        PatchPayload::Intent { dx, dy } => actor.intent = (*dx, *dy),
        PatchPayload::Health { health, max_health } => {
            actor.health = *health;
            actor.max_health = *max_health;
        }
        PatchPayload::Inventory { slots } => actor.inventory = slots.clone(),
        PatchPayload::Equipment { equipment } => actor.equipment = equipment.clone(),
        PatchPayload::Quantity { .. } | PatchPayload::Params { .. } | PatchPayload::Removed {} => {}
    }
}
