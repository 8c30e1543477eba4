//! Ground Items and Mining
//!
//! Stacks lying in the world are indexed by tile. Within one tile there is
//! at most one stack per fungibility key: a drop onto an occupied tile
//! merges into the existing stack instead of creating a new one.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::rng::DeterministicRng;
use crate::TILE_SIZE;
use crate::core::vec2::Vec2;
use crate::game::barrier::{self, announce_ground_item, set_ground_item_quantity};
use crate::game::state::{GroundItem, ItemStack, Obstacle, ObstacleKind, TileKey};
use crate::journal::{Journal, PatchKind};

/// Item type dropped by ore and goblins.
pub const GOLD: &str = "gold";

/// Strikes a gold-ore obstacle survives.
pub const ORE_DURABILITY: u32 = 3;

/// Gold dropped by a depleted ore.
pub const ORE_GOLD_YIELD: u32 = 5;

/// Margin kept from tile edges when scattering.
const SCATTER_MARGIN: f64 = 4.0;

/// Registry of ground stacks with a per-tile index.
#[derive(Debug, Clone, Default)]
pub struct GroundItems {
    items: BTreeMap<String, GroundItem>,
    tiles: BTreeMap<TileKey, BTreeSet<String>>,
    next_id: u64,
}

impl GroundItems {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stack.
    pub fn get(&self, id: &str) -> Option<&GroundItem> {
        self.items.get(id)
    }

    /// Every stack in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &GroundItem> {
        self.items.values()
    }

    /// Number of stacks.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing lies on the ground.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Stacks indexed under `tile`.
    pub fn in_tile(&self, tile: TileKey) -> impl Iterator<Item = &GroundItem> {
        self.tiles
            .get(&tile)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.items.get(id))
    }

    /// Drop a stack at `position`, merging into a same-key stack in the tile.
    ///
    /// Returns the ID of the stack that now holds the items.
    pub fn drop_stack(&mut self, stack: ItemStack, position: Vec2, journal: &mut Journal) -> Option<String> {
        if stack.quantity == 0 {
            return None;
        }
        let tile = TileKey::containing(position);

        let existing = self
            .in_tile(tile)
            .find(|item| item.fungibility_key == stack.fungibility_key)
            .map(|item| item.id.clone());
        if let Some(id) = existing {
            if let Some(item) = self.items.get_mut(&id) {
                let merged = item.quantity.saturating_add(stack.quantity);
                set_ground_item_quantity(item, merged, journal);
                debug!(id = %id, quantity = merged, "ground stack merged");
            }
            return Some(id);
        }

        self.next_id += 1;
        let id = format!("ground-{}", self.next_id);
        let item = GroundItem {
            id: id.clone(),
            item_type: stack.item_type,
            fungibility_key: stack.fungibility_key,
            quantity: stack.quantity,
            position,
            tile,
            version: 1,
        };
        announce_ground_item(&item, journal);
        debug!(id = %id, item = %item.item_type, quantity = item.quantity, "ground stack created");
        self.tiles.entry(tile).or_default().insert(id.clone());
        self.items.insert(id.clone(), item);
        Some(id)
    }

    /// Scatter stacks inside the tile containing `origin`.
    pub fn scatter(&mut self, stacks: Vec<ItemStack>, origin: Vec2, rng: &mut DeterministicRng, journal: &mut Journal) {
        let tile = TileKey::containing(origin);
        let left = tile.x as f64 * TILE_SIZE;
        let top = tile.y as f64 * TILE_SIZE;
        for stack in stacks {
            let position = Vec2::new(
                left + rng.next_range(SCATTER_MARGIN, TILE_SIZE - SCATTER_MARGIN),
                top + rng.next_range(SCATTER_MARGIN, TILE_SIZE - SCATTER_MARGIN),
            );
            self.drop_stack(stack, position, journal);
        }
    }

    /// Stacks within `radius` of `position`, in ID order.
    pub fn within(&self, position: Vec2, radius: f64) -> Vec<String> {
        let r2 = radius * radius;
        self.items
            .values()
            .filter(|item| item.position.distance_squared(position) <= r2)
            .map(|item| item.id.clone())
            .collect()
    }

    /// Remove a stack and stage its terminal patch.
    pub fn take(&mut self, id: &str, journal: &mut Journal) -> Option<ItemStack> {
        let item = self.items.remove(id)?;
        if let Some(ids) = self.tiles.get_mut(&item.tile) {
            ids.remove(id);
            if ids.is_empty() {
                self.tiles.remove(&item.tile);
            }
        }
        barrier::remove_entity(PatchKind::GroundItemRemoved, id, journal);
        Some(ItemStack {
            item_type: item.item_type,
            fungibility_key: item.fungibility_key,
            quantity: item.quantity,
        })
    }
}

/// Remaining strikes per gold-ore obstacle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OreDurability {
    remaining: BTreeMap<String, u32>,
}

impl OreDurability {
    /// Full durability for every ore in `obstacles`.
    pub fn new(obstacles: &[Obstacle]) -> Self {
        Self {
            remaining: obstacles
                .iter()
                .filter(|o| o.kind == ObstacleKind::GoldOre)
                .map(|o| (o.id.clone(), ORE_DURABILITY))
                .collect(),
        }
    }

    /// Remaining strikes for an ore.
    pub fn remaining(&self, id: &str) -> Option<u32> {
        self.remaining.get(id).copied()
    }

    /// Strike an ore. Returns `Some(true)` when it was depleted by this
    /// strike, `None` for unknown IDs.
    pub fn strike(&mut self, id: &str) -> Option<bool> {
        let left = self.remaining.get_mut(id)?;
        *left = left.saturating_sub(1);
        if *left == 0 {
            self.remaining.remove(id);
            return Some(true);
        }
        Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::telemetry::Telemetry;

    fn quantity_patches(journal: &Journal) -> usize {
        journal
            .staged_patches()
            .iter()
            .filter(|p| p.kind == PatchKind::GroundItemQuantity)
            .count()
    }

    #[test]
    fn test_same_tile_merges() {
        let mut items = GroundItems::new();
        let mut journal = Journal::new(JournalConfig::default());
        let mut telemetry = Telemetry::new();
        let mut total_quantity_patches = 0;

        let a = items.drop_stack(ItemStack::new(GOLD, 3), Vec2::new(105.0, 105.0), &mut journal);
        total_quantity_patches += quantity_patches(&journal);
        journal.finalize(1, 0, None, &mut telemetry);

        let b = items.drop_stack(ItemStack::new(GOLD, 5), Vec2::new(110.0, 118.0), &mut journal);
        total_quantity_patches += quantity_patches(&journal);

        assert_eq!(a, b);
        assert_eq!(items.len(), 1);
        assert_eq!(items.iter().next().map(|i| i.quantity), Some(8));
        assert_eq!(total_quantity_patches, 2);
    }

    #[test]
    fn test_other_tile_or_key_does_not_merge() {
        let mut items = GroundItems::new();
        let mut journal = Journal::new(JournalConfig::default());
        items.drop_stack(ItemStack::new(GOLD, 3), Vec2::new(10.0, 10.0), &mut journal);
        items.drop_stack(ItemStack::new(GOLD, 3), Vec2::new(50.0, 10.0), &mut journal);
        items.drop_stack(ItemStack::new("ember", 1), Vec2::new(12.0, 12.0), &mut journal);
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_take_removes_index() {
        let mut items = GroundItems::new();
        let mut journal = Journal::new(JournalConfig::default());
        let id = items.drop_stack(ItemStack::new(GOLD, 2), Vec2::new(10.0, 10.0), &mut journal).unwrap();
        let stack = items.take(&id, &mut journal).unwrap();
        assert_eq!(stack.quantity, 2);
        assert!(items.is_empty());
        assert_eq!(items.in_tile(TileKey { x: 0, y: 0 }).count(), 0);
        // Creation patches purged, terminal patch staged
        assert_eq!(journal.staged_patches().len(), 1);
        assert_eq!(journal.staged_patches()[0].kind, PatchKind::GroundItemRemoved);
    }

    #[test]
    fn test_scatter_stays_in_tile() {
        let mut items = GroundItems::new();
        let mut journal = Journal::new(JournalConfig::default());
        let mut rng = DeterministicRng::new(7);
        let stacks = vec![ItemStack::new(GOLD, 4), ItemStack::new("ember", 1)];
        items.scatter(stacks, Vec2::new(95.0, 130.0), &mut rng, &mut journal);
        for item in items.iter() {
            assert_eq!(item.tile, TileKey { x: 2, y: 3 });
        }
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_ore_durability() {
        let ore = Obstacle { id: "ore-1".into(), kind: ObstacleKind::GoldOre, x: 0.0, y: 0.0, width: 40.0, height: 40.0 };
        let rock = Obstacle { id: "rock-1".into(), kind: ObstacleKind::Rock, ..ore.clone() };
        let mut durability = OreDurability::new(&[ore, rock]);
        assert_eq!(durability.remaining("ore-1"), Some(ORE_DURABILITY));
        assert_eq!(durability.strike("rock-1"), None);
        assert_eq!(durability.strike("ore-1"), Some(false));
        assert_eq!(durability.strike("ore-1"), Some(false));
        assert_eq!(durability.strike("ore-1"), Some(true));
        assert_eq!(durability.strike("ore-1"), None);
    }
}
