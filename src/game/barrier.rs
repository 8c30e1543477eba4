//! Write Barriers
//!
//! The only way to mutate broadcast state. Each barrier:
//!
//! 1. skips the write when the value is unchanged (`1e-6` for floats,
//!    exact for integers, ordered equality for inventory slots);
//! 2. bumps the entity version;
//! 3. appends a patch carrying the new value.
//!
//! Every function returns whether a write happened.

use crate::core::units::quantize;
use crate::core::vec2::{Vec2, EPSILON};
use crate::game::effects::manager::EffectInstance;
use crate::game::state::{Actor, Equipment, Facing, GroundItem, Inventory};
use crate::journal::{Journal, Patch, PatchKind, PatchPayload};

/// Which patch family an actor's barriers write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    /// `player_*` patches.
    Player,
    /// `npc_*` patches.
    Npc,
}

impl ActorRole {
    fn position(self) -> PatchKind {
        match self {
            ActorRole::Player => PatchKind::PlayerPosition,
            ActorRole::Npc => PatchKind::NpcPosition,
        }
    }

    fn facing(self) -> PatchKind {
        match self {
            ActorRole::Player => PatchKind::PlayerFacing,
            ActorRole::Npc => PatchKind::NpcFacing,
        }
    }

    fn intent(self) -> PatchKind {
        match self {
            ActorRole::Player => PatchKind::PlayerIntent,
            ActorRole::Npc => PatchKind::NpcIntent,
        }
    }

    fn health(self) -> PatchKind {
        match self {
            ActorRole::Player => PatchKind::PlayerHealth,
            ActorRole::Npc => PatchKind::NpcHealth,
        }
    }

    fn inventory(self) -> PatchKind {
        match self {
            ActorRole::Player => PatchKind::PlayerInventory,
            ActorRole::Npc => PatchKind::NpcInventory,
        }
    }

    fn equipment(self) -> PatchKind {
        match self {
            ActorRole::Player => PatchKind::PlayerEquipment,
            ActorRole::Npc => PatchKind::NpcEquipment,
        }
    }

    /// Terminal patch kind.
    pub fn removed(self) -> PatchKind {
        match self {
            ActorRole::Player => PatchKind::PlayerRemoved,
            ActorRole::Npc => PatchKind::NpcRemoved,
        }
    }
}

fn same(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

// =============================================================================
// ACTORS
// =============================================================================

/// Move an actor.
pub fn set_position(actor: &mut Actor, role: ActorRole, position: Vec2, journal: &mut Journal) -> bool {
    if actor.position.approx_eq(position) {
        return false;
    }
    actor.position = position;
    actor.version += 1;
    journal.append_patch(Patch::new(role.position(), &actor.id, PatchPayload::position(position)));
    true
}

/// Turn an actor.
pub fn set_facing(actor: &mut Actor, role: ActorRole, facing: Facing, journal: &mut Journal) -> bool {
    if actor.facing == facing {
        return false;
    }
    actor.facing = facing;
    actor.version += 1;
    journal.append_patch(Patch::new(role.facing(), &actor.id, PatchPayload::Facing { facing }));
    true
}

/// Set the movement intent; normalized to unit length (or zero).
pub fn set_intent(actor: &mut Actor, role: ActorRole, intent: Vec2, journal: &mut Journal) -> bool {
    let intent = intent.normalize();
    if actor.intent.approx_eq(intent) {
        return false;
    }
    actor.intent = intent;
    actor.version += 1;
    journal.append_patch(Patch::new(role.intent(), &actor.id, PatchPayload::intent(intent)));
    true
}

/// Set health, clamped to `[0, max_health]`.
pub fn set_health(actor: &mut Actor, role: ActorRole, health: f64, journal: &mut Journal) -> bool {
    let health = if health.is_finite() { health.clamp(0.0, actor.max_health) } else { actor.health };
    if same(actor.health, health) {
        return false;
    }
    actor.health = health;
    actor.version += 1;
    push_health(actor, role, journal);
    true
}

/// Set the health cap; current health is clamped to the new cap.
pub fn set_max_health(actor: &mut Actor, role: ActorRole, max_health: f64, journal: &mut Journal) -> bool {
    let max_health = max_health.max(1.0);
    if same(actor.max_health, max_health) {
        return false;
    }
    actor.max_health = max_health;
    actor.health = actor.health.min(max_health);
    actor.version += 1;
    push_health(actor, role, journal);
    true
}

fn push_health(actor: &Actor, role: ActorRole, journal: &mut Journal) {
    journal.append_patch(Patch::new(
        role.health(),
        &actor.id,
        PatchPayload::Health { health: actor.health, max_health: actor.max_health },
    ));
}

/// Edit the inventory in place.
pub fn mutate_inventory<F>(actor: &mut Actor, role: ActorRole, journal: &mut Journal, edit: F) -> bool
where
    F: FnOnce(&mut Inventory),
{
    let before = actor.inventory.clone();
    edit(&mut actor.inventory);
    if actor.inventory == before {
        return false;
    }
    actor.version += 1;
    journal.append_patch(Patch::new(
        role.inventory(),
        &actor.id,
        PatchPayload::Inventory { slots: actor.inventory.slots.clone() },
    ));
    true
}

/// Edit the equipment in place; the equipment stat layer is rebuilt.
pub fn mutate_equipment<F>(actor: &mut Actor, role: ActorRole, journal: &mut Journal, edit: F) -> bool
where
    F: FnOnce(&mut Equipment),
{
    let before = actor.equipment.clone();
    edit(&mut actor.equipment);
    if actor.equipment == before {
        return false;
    }
    actor.sync_equipment_stats();
    actor.version += 1;
    journal.append_patch(Patch::new(
        role.equipment(),
        &actor.id,
        PatchPayload::Equipment { equipment: actor.equipment.clone() },
    ));
    true
}

/// Stage the full observable state of a new actor so receivers can create it.
pub fn announce_actor(actor: &Actor, role: ActorRole, journal: &mut Journal) {
    journal.append_patch(Patch::new(role.position(), &actor.id, PatchPayload::position(actor.position)));
    journal.append_patch(Patch::new(role.facing(), &actor.id, PatchPayload::Facing { facing: actor.facing }));
    push_health(actor, role, journal);
    if !actor.inventory.is_empty() {
        journal.append_patch(Patch::new(
            role.inventory(),
            &actor.id,
            PatchPayload::Inventory { slots: actor.inventory.slots.clone() },
        ));
    }
}

/// Drop staged patches for an entity and stage its terminal patch.
pub fn remove_entity(kind: PatchKind, entity_id: &str, journal: &mut Journal) {
    journal.purge_entity(entity_id);
    journal.append_patch(Patch::removed(kind, entity_id));
}

// =============================================================================
// GROUND ITEMS
// =============================================================================

/// Stage position and quantity of a freshly created stack.
pub fn announce_ground_item(item: &GroundItem, journal: &mut Journal) {
    journal.append_patch(Patch::new(PatchKind::GroundItemPosition, &item.id, PatchPayload::position(item.position)));
    journal.append_patch(Patch::new(
        PatchKind::GroundItemQuantity,
        &item.id,
        PatchPayload::Quantity { quantity: item.quantity, item_type: item.item_type.clone() },
    ));
}

/// Move a ground stack.
pub fn set_ground_item_position(item: &mut GroundItem, position: Vec2, journal: &mut Journal) -> bool {
    if item.position.approx_eq(position) {
        return false;
    }
    item.position = position;
    item.version += 1;
    journal.append_patch(Patch::new(PatchKind::GroundItemPosition, &item.id, PatchPayload::position(position)));
    true
}

/// Change a ground stack's quantity.
pub fn set_ground_item_quantity(item: &mut GroundItem, quantity: u32, journal: &mut Journal) -> bool {
    if item.quantity == quantity {
        return false;
    }
    item.quantity = quantity;
    item.version += 1;
    journal.append_patch(Patch::new(
        PatchKind::GroundItemQuantity,
        &item.id,
        PatchPayload::Quantity { quantity, item_type: item.item_type.clone() },
    ));
    true
}

// =============================================================================
// EFFECTS
// =============================================================================

/// Move an effect anchor; the patch carries quantized sub-units.
pub fn set_effect_position(instance: &mut EffectInstance, position: Vec2, journal: &mut Journal) -> bool {
    if instance.position.approx_eq(position) {
        return false;
    }
    let before = (quantize(instance.position.x), quantize(instance.position.y));
    instance.position = position;
    let after = (quantize(position.x), quantize(position.y));
    if before == after {
        return false;
    }
    instance.version += 1;
    journal.append_patch(Patch::new(
        PatchKind::EffectPosition,
        &instance.id,
        PatchPayload::Position { x: after.0 as f64, y: after.1 as f64 },
    ));
    true
}

/// Set one effect parameter.
pub fn set_effect_param(instance: &mut EffectInstance, key: &str, value: i64, journal: &mut Journal) -> bool {
    if instance.params.get(key) == Some(&value) {
        return false;
    }
    instance.params.insert(key.to_string(), value);
    instance.version += 1;
    journal.append_patch(Patch::new(
        PatchKind::EffectParams,
        &instance.id,
        PatchPayload::Params { params: instance.params.clone() },
    ));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::game::state::{ItemStack, Player};

    fn setup() -> (Player, Journal) {
        (Player::new("p1", Vec2::new(100.0, 100.0)), Journal::new(JournalConfig::default()))
    }

    #[test]
    fn test_noop_writes_skip() {
        let (mut player, mut journal) = setup();
        let actor = &mut player.actor;
        assert!(!set_position(actor, ActorRole::Player, Vec2::new(100.0, 100.0 + 1e-9), &mut journal));
        assert!(!set_facing(actor, ActorRole::Player, Facing::Down, &mut journal));
        assert_eq!(actor.version, 0);
        assert!(journal.staged_patches().is_empty());
    }

    #[test]
    fn test_version_and_patch_per_write() {
        let (mut player, mut journal) = setup();
        let actor = &mut player.actor;
        assert!(set_position(actor, ActorRole::Player, Vec2::new(110.0, 100.0), &mut journal));
        assert!(set_facing(actor, ActorRole::Player, Facing::Left, &mut journal));
        assert!(set_intent(actor, ActorRole::Player, Vec2::new(-3.0, 0.0), &mut journal));
        assert_eq!(actor.version, 3);
        assert_eq!(actor.intent, Vec2::LEFT);

        let kinds: Vec<_> = journal.staged_patches().iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PatchKind::PlayerPosition, PatchKind::PlayerFacing, PatchKind::PlayerIntent]);
    }

    #[test]
    fn test_health_clamped() {
        let (mut player, mut journal) = setup();
        let actor = &mut player.actor;
        let max = actor.max_health;
        assert!(!set_health(actor, ActorRole::Npc, max + 50.0, &mut journal));
        assert!(set_health(actor, ActorRole::Npc, -5.0, &mut journal));
        assert_eq!(actor.health, 0.0);
        assert_eq!(journal.staged_patches()[0].kind, PatchKind::NpcHealth);

        assert!(set_max_health(actor, ActorRole::Npc, 20.0, &mut journal));
        assert_eq!(actor.health, 0.0);
    }

    #[test]
    fn test_inventory_ordered_equality() {
        let (mut player, mut journal) = setup();
        let actor = &mut player.actor;
        assert!(mutate_inventory(actor, ActorRole::Player, &mut journal, |inv| inv.add(ItemStack::new("gold", 3))));
        assert!(!mutate_inventory(actor, ActorRole::Player, &mut journal, |_| {}));
        assert!(mutate_inventory(actor, ActorRole::Player, &mut journal, |inv| inv.add(ItemStack::new("gold", 2))));
        assert_eq!(actor.inventory.quantity_of("gold"), 5);
        // Deduped to the latest value
        assert_eq!(journal.staged_patches().len(), 1);
    }

    #[test]
    fn test_remove_entity_purges() {
        let (mut player, mut journal) = setup();
        set_position(&mut player.actor, ActorRole::Player, Vec2::new(120.0, 100.0), &mut journal);
        remove_entity(PatchKind::PlayerRemoved, "p1", &mut journal);
        assert_eq!(journal.staged_patches().len(), 1);
        assert_eq!(journal.staged_patches()[0].kind, PatchKind::PlayerRemoved);
    }
}
