//! Entity Definitions
//!
//! Actors (players and NPCs), ground items and obstacles. These are plain
//! data; every observable mutation goes through the write barriers in
//! [`crate::game::barrier`].

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::hash::StateHasher;
use crate::core::units::{tile_of, PLAYER_HALF};
use crate::core::vec2::Vec2;
use crate::game::ability::Ability;
use crate::game::ai::Blackboard;
use crate::game::collision::Rect;
use crate::game::nav::PathFollower;
use crate::game::stats::{SourceKey, StatLayer, StatModifier, StatVector, StatsComponent};
use crate::game::status::{StatusEffectInstance, StatusKind};

// =============================================================================
// FACING
// =============================================================================

/// Cardinal facing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// -Y
    Up,
    /// +Y
    #[default]
    Down,
    /// -X
    Left,
    /// +X
    Right,
}

impl Facing {
    /// Parse a wire string; the empty string means `down`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "down" => Some(Facing::Down),
            "up" => Some(Facing::Up),
            "left" => Some(Facing::Left),
            "right" => Some(Facing::Right),
            _ => None,
        }
    }

    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Facing::Up => "up",
            Facing::Down => "down",
            Facing::Left => "left",
            Facing::Right => "right",
        }
    }

    /// Unit vector in screen space.
    pub fn unit(self) -> Vec2 {
        match self {
            Facing::Up => Vec2::UP,
            Facing::Down => Vec2::DOWN,
            Facing::Left => Vec2::LEFT,
            Facing::Right => Vec2::RIGHT,
        }
    }

    /// Facing along the dominant axis of `v`; ties favour horizontal.
    pub fn from_vector(v: Vec2) -> Option<Self> {
        if v.is_zero() {
            return None;
        }
        if v.x.abs() >= v.y.abs() {
            Some(if v.x >= 0.0 { Facing::Right } else { Facing::Left })
        } else {
            Some(if v.y >= 0.0 { Facing::Down } else { Facing::Up })
        }
    }

    /// True for up/down.
    pub fn is_vertical(self) -> bool {
        matches!(self, Facing::Up | Facing::Down)
    }
}

// =============================================================================
// ITEMS
// =============================================================================

/// A quantity of one fungible item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStack {
    /// Item type (e.g. `gold`).
    pub item_type: String,
    /// Stacks with equal keys merge.
    pub fungibility_key: String,
    /// Quantity (> 0).
    pub quantity: u32,
}

impl ItemStack {
    /// Stack whose fungibility key is its item type.
    pub fn new(item_type: &str, quantity: u32) -> Self {
        Self {
            item_type: item_type.to_string(),
            fungibility_key: item_type.to_string(),
            quantity,
        }
    }
}

/// Ordered inventory slots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Slots in acquisition order.
    pub slots: Vec<ItemStack>,
}

impl Inventory {
    /// Merge a stack into the slot with the same fungibility key, or append.
    pub fn add(&mut self, stack: ItemStack) {
        if stack.quantity == 0 {
            return;
        }
        match self
            .slots
            .iter_mut()
            .find(|slot| slot.fungibility_key == stack.fungibility_key)
        {
            Some(slot) => slot.quantity = slot.quantity.saturating_add(stack.quantity),
            None => self.slots.push(stack),
        }
    }

    /// Remove and return every stack.
    pub fn take_all(&mut self) -> Vec<ItemStack> {
        std::mem::take(&mut self.slots)
    }

    /// Total quantity held for a fungibility key.
    pub fn quantity_of(&self, fungibility_key: &str) -> u32 {
        self.slots
            .iter()
            .filter(|slot| slot.fungibility_key == fungibility_key)
            .map(|slot| slot.quantity)
            .sum()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Equipment slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EquipSlot {
    /// Weapon hand.
    MainHand,
    /// Shield hand.
    OffHand,
    /// Helmet.
    Head,
    /// Armour.
    Body,
}

impl EquipSlot {
    /// Stable string used as a stat source ID.
    pub fn as_str(self) -> &'static str {
        match self {
            EquipSlot::MainHand => "main-hand",
            EquipSlot::OffHand => "off-hand",
            EquipSlot::Head => "head",
            EquipSlot::Body => "body",
        }
    }
}

/// An equipped item and the stats it grants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquippedItem {
    /// Item type.
    pub item_type: String,
    /// Additive bonus in the equipment layer.
    pub bonus: StatVector,
}

/// Worn items by slot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    /// Slot contents.
    pub slots: BTreeMap<EquipSlot, EquippedItem>,
}

// =============================================================================
// ACTORS
// =============================================================================

/// Common state for players and NPCs.
#[derive(Clone, Debug)]
pub struct Actor {
    /// Stable ID.
    pub id: String,
    /// Center position (world units).
    pub position: Vec2,
    /// Facing.
    pub facing: Facing,
    /// Current health in [0, max_health].
    pub health: f64,
    /// Health cap, derived from stats.
    pub max_health: f64,
    /// Unit-length movement intent (or zero).
    pub intent: Vec2,
    /// Carried items.
    pub inventory: Inventory,
    /// Worn items.
    pub equipment: Equipment,
    /// Tick each ability last fired.
    pub cooldowns: BTreeMap<Ability, u64>,
    /// Active status effects.
    pub statuses: BTreeMap<StatusKind, StatusEffectInstance>,
    /// Layered stats.
    pub stats: StatsComponent,
    /// Bumped on every observable mutation.
    pub version: u64,
}

impl Actor {
    /// New actor at full health for the given base stats.
    pub fn new(id: &str, position: Vec2, base_kind: &str, base_id: &str, base: StatVector) -> Self {
        let stats = StatsComponent::with_base(base_kind, base_id, base);
        let max_health = stats.derived().max_health;
        Self {
            id: id.to_string(),
            position,
            facing: Facing::Down,
            health: max_health,
            max_health,
            intent: Vec2::ZERO,
            inventory: Inventory::default(),
            equipment: Equipment::default(),
            cooldowns: BTreeMap::new(),
            statuses: BTreeMap::new(),
            stats,
            version: 0,
        }
    }

    /// Collision circle radius.
    #[inline]
    pub fn radius(&self) -> f64 {
        PLAYER_HALF
    }

    /// Movement speed from derived stats.
    #[inline]
    pub fn move_speed(&self) -> f64 {
        self.stats.derived().move_speed
    }

    /// True once health reached zero.
    #[inline]
    pub fn is_defeated(&self) -> bool {
        self.health <= 0.0
    }

    /// Rebuild the equipment stat layer from worn items.
    pub fn sync_equipment_stats(&mut self) {
        self.stats.remove_kind(StatLayer::Equipment, "equipment");
        for (slot, item) in &self.equipment.slots {
            self.stats.apply(
                StatLayer::Equipment,
                SourceKey::new("equipment", slot.as_str()),
                StatModifier::additive(item.bonus),
            );
        }
    }

    /// Feed observable fields into a state digest.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_str(&self.id);
        hasher.update_f64(self.position.x);
        hasher.update_f64(self.position.y);
        hasher.update_str(self.facing.as_str());
        hasher.update_f64(self.health);
        hasher.update_f64(self.max_health);
        hasher.update_f64(self.intent.x);
        hasher.update_f64(self.intent.y);
        hasher.update_u32(self.inventory.slots.len() as u32);
        for slot in &self.inventory.slots {
            hasher.update_str(&slot.fungibility_key);
            hasher.update_u32(slot.quantity);
        }
        hasher.update_u64(self.version);
    }
}

/// Heartbeat metadata reported by the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeartbeatInfo {
    /// Client `sentAt` timestamp (ms).
    pub sent_at: i64,
    /// Tick the heartbeat was ingested.
    pub received_tick: u64,
}

/// A connected player.
#[derive(Clone, Debug)]
pub struct Player {
    /// Actor state.
    pub actor: Actor,
    /// Active click-to-move path.
    pub path: Option<PathFollower>,
    /// Tick of the last input command.
    pub last_input_tick: u64,
    /// Last heartbeat.
    pub last_heartbeat: Option<HeartbeatInfo>,
    /// Round-trip time observed by the transport (ms).
    pub rtt_ms: Option<f64>,
}

impl Player {
    /// Base stats for every player.
    pub const BASE_STATS: StatVector = StatVector::new(10.0, 10.0, 10.0, 10.0);

    /// New player at `position`.
    pub fn new(id: &str, position: Vec2) -> Self {
        Self {
            actor: Actor::new(id, position, "archetype", "player", Self::BASE_STATS),
            path: None,
            last_input_tick: 0,
            last_heartbeat: None,
            rtt_ms: None,
        }
    }
}

/// NPC archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Archetype {
    /// Patrols and attacks players.
    Goblin,
    /// Wanders and flees.
    Rat,
}

impl Archetype {
    /// Wire/config name.
    pub fn as_str(self) -> &'static str {
        match self {
            Archetype::Goblin => "goblin",
            Archetype::Rat => "rat",
        }
    }

    /// Base layer stats.
    pub fn base_stats(self) -> StatVector {
        match self {
            Archetype::Goblin => StatVector::new(10.0, 4.0, 8.0, 8.0),
            Archetype::Rat => StatVector::new(2.0, 0.0, 4.0, 12.0),
        }
    }
}

/// Loot dropped on defeat.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RewardTable {
    /// Experience granted to the defeating actor.
    pub experience: u32,
}

/// A simulated non-player actor.
#[derive(Clone, Debug)]
pub struct Npc {
    /// Actor state.
    pub actor: Actor,
    /// Archetype tag.
    pub archetype: Archetype,
    /// Index into the compiled AI library.
    pub ai_config: usize,
    /// AI scratch state.
    pub blackboard: Blackboard,
    /// Active path.
    pub path: Option<PathFollower>,
    /// Reward metadata.
    pub reward: RewardTable,
}

impl Npc {
    /// New NPC with archetype base stats.
    pub fn new(id: &str, archetype: Archetype, ai_config: usize, position: Vec2, waypoints: Vec<Vec2>) -> Self {
        let reward = match archetype {
            Archetype::Goblin => RewardTable { experience: 25 },
            Archetype::Rat => RewardTable { experience: 5 },
        };
        Self {
            actor: Actor::new(id, position, "archetype", archetype.as_str(), archetype.base_stats()),
            archetype,
            ai_config,
            blackboard: Blackboard::new(position, waypoints),
            path: None,
            reward,
        }
    }
}

// =============================================================================
// GROUND ITEMS
// =============================================================================

/// Integer grid cell of a ground item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileKey {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl TileKey {
    /// Tile containing a world position.
    pub fn containing(position: Vec2) -> Self {
        let (x, y) = tile_of(position.x, position.y);
        Self { x, y }
    }
}

/// An item stack lying in the world.
#[derive(Clone, Debug, PartialEq)]
pub struct GroundItem {
    /// Stable ID.
    pub id: String,
    /// Item type.
    pub item_type: String,
    /// Merge key.
    pub fungibility_key: String,
    /// Quantity (> 0).
    pub quantity: u32,
    /// Position (world units).
    pub position: Vec2,
    /// Tile the stack is indexed under.
    pub tile: TileKey,
    /// Bumped on every observable mutation.
    pub version: u64,
}

// =============================================================================
// OBSTACLES
// =============================================================================

/// Obstacle type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObstacleKind {
    /// Solid blocker.
    Rock,
    /// Walkable; applies burning.
    Lava,
    /// Solid and minable.
    GoldOre,
}

/// Axis-aligned obstacle. `position` is the top-left corner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obstacle {
    /// Stable ID.
    pub id: String,
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: ObstacleKind,
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Obstacle {
    /// Rectangle in world space.
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Everything except lava blocks movement.
    #[inline]
    pub fn blocks_movement(&self) -> bool {
        self.kind != ObstacleKind::Lava
    }

    /// Center point.
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}
