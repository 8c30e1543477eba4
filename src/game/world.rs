//! World State & Entity Registry
//!
//! The simulation singleton. Owns every entity map, the obstacle list, the
//! subsystem RNGs, the effect manager and the journal. Mutation of broadcast
//! state goes through the write barriers; this module adds the entity
//! lifecycle (join, leave, defeat, pickup, mining) and full-world snapshots.
//!
//! The per-tick pipeline lives in [`crate::game::tick`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::WorldConfig;
use crate::core::hash::StateHasher;
use crate::core::rng::SubsystemRngs;
use crate::core::units::{PICKUP_RADIUS, PLAYER_HALF};
use crate::core::vec2::Vec2;
use crate::game::ai::{AiConfigError, AiLibrary};
use crate::game::barrier::{self, ActorRole};
use crate::game::collision::Bounds;
use crate::game::effects::{ActorProbe, EffectRegistry, EffectManager};
use crate::game::items::{GroundItems, OreDurability, GOLD, ORE_GOLD_YIELD};
use crate::game::map;
use crate::game::nav::NavGrid;
use crate::game::state::{Actor, Archetype, ItemStack, Npc, Obstacle, Player};
use crate::game::status::clear_statuses;
use crate::journal::keyframe::{ActorSnapshot, ConfigSnapshot, GroundItemSnapshot, NpcSnapshot};
use crate::journal::{Journal, Keyframe, KeyframeError, PatchKind};
use crate::journal::KeyframeRecovery;
use crate::telemetry::Telemetry;
use crate::{COORD_SCALE, TICK_RATE};

/// World-level failures. Nothing inside a tick produces these; they guard
/// the driver's preconditions and construction.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// `step` was called with a tick that does not advance.
    #[error("tick {tick} does not follow {last}")]
    NonMonotonicTick {
        /// Requested tick.
        tick: u64,
        /// Last stepped tick.
        last: u64,
    },

    /// An actor with this ID already exists.
    #[error("actor {0} already exists")]
    DuplicateActor(String),

    /// No AI config for an archetype.
    #[error("no AI config for archetype {0:?}")]
    MissingAi(Archetype),

    /// AI configs failed to compile.
    #[error(transparent)]
    Ai(#[from] AiConfigError),
}

/// The simulation singleton.
#[derive(Debug)]
pub struct World {
    pub(crate) config: WorldConfig,
    pub(crate) bounds: Bounds,
    pub(crate) tick: u64,
    pub(crate) players: BTreeMap<String, Player>,
    pub(crate) npcs: BTreeMap<String, Npc>,
    pub(crate) ground: GroundItems,
    pub(crate) obstacles: Vec<Obstacle>,
    pub(crate) ore: OreDurability,
    pub(crate) nav: NavGrid,
    pub(crate) rngs: SubsystemRngs,
    pub(crate) effects: EffectManager,
    pub(crate) ai: AiLibrary,
    pub(crate) journal: Journal,
    pub(crate) telemetry: Telemetry,
    joins: u64,
}

impl World {
    /// Build a world with the embedded AI configs.
    pub fn new(config: WorldConfig, registry: Arc<EffectRegistry>) -> Result<Self, WorldError> {
        let ai = AiLibrary::builtin()?;
        Self::with_ai(config, registry, ai)
    }

    /// Build a world with an explicit AI library.
    pub fn with_ai(config: WorldConfig, registry: Arc<EffectRegistry>, ai: AiLibrary) -> Result<Self, WorldError> {
        let mut rngs = SubsystemRngs::from_seed(&config.seed);
        let layout = map::generate(&config, &mut rngs.world_gen);

        let bounds = Bounds { width: config.width_units(), height: config.height_units() };
        let nav = NavGrid::build(bounds.width, bounds.height, &layout.obstacles);
        let ore = OreDurability::new(&layout.obstacles);

        let mut npcs = BTreeMap::new();
        for seed in layout.npcs {
            let ai_index = ai.index_of(seed.archetype).ok_or(WorldError::MissingAi(seed.archetype))?;
            let mut npc = Npc::new(&seed.id, seed.archetype, ai_index, seed.position, seed.waypoints);
            for stack in seed.loot {
                npc.actor.inventory.add(stack);
            }
            npcs.insert(seed.id, npc);
        }

        let mut world = Self {
            journal: Journal::new(config.journal.clone()),
            config,
            bounds,
            tick: 0,
            players: BTreeMap::new(),
            npcs,
            ground: GroundItems::new(),
            obstacles: layout.obstacles,
            ore,
            nav,
            rngs,
            effects: EffectManager::new(registry),
            ai,
            telemetry: Telemetry::new(),
            joins: 0,
        };

        let initial = world.snapshot();
        world.journal.store_keyframe(&initial, 0, &mut world.telemetry);

        info!(
            seed = %world.config.seed,
            width = world.config.width,
            height = world.config.height,
            obstacles = world.obstacles.len(),
            npcs = world.npcs.len(),
            catalog_hash = %world.catalog_hash(),
            "world constructed"
        );
        Ok(world)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Construction options.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Last stepped tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Actor bounds in world units.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Players by ID.
    pub fn players(&self) -> &BTreeMap<String, Player> {
        &self.players
    }

    /// One player.
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    /// NPCs by ID.
    pub fn npcs(&self) -> &BTreeMap<String, Npc> {
        &self.npcs
    }

    /// One NPC.
    pub fn npc(&self, id: &str) -> Option<&Npc> {
        self.npcs.get(id)
    }

    /// Ground stacks.
    pub fn ground_items(&self) -> &GroundItems {
        &self.ground
    }

    /// Remaining obstacles.
    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Navigation grid.
    pub fn nav(&self) -> &NavGrid {
        &self.nav
    }

    /// Effect manager.
    pub fn effects(&self) -> &EffectManager {
        &self.effects
    }

    /// Journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Mutable journal access for hosts that simulate loss.
    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// Counters and parity summaries.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Mutable telemetry, for collaborators that count into the world's
    /// counters (the broadcaster).
    pub fn telemetry_mut(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }

    /// Hash of the effect catalog clients must match.
    pub fn catalog_hash(&self) -> &str {
        self.effects.registry().hash()
    }

    /// Look up any actor.
    pub fn actor(&self, id: &str) -> Option<&Actor> {
        self.players
            .get(id)
            .map(|p| &p.actor)
            .or_else(|| self.npcs.get(id).map(|n| &n.actor))
    }

    /// True for a live player or NPC.
    pub fn has_actor(&self, id: &str) -> bool {
        self.players.contains_key(id) || self.npcs.contains_key(id)
    }

    // =========================================================================
    // JOIN / LEAVE
    // =========================================================================

    /// Add a player at the next spawn slot. Returns the spawn point.
    pub fn join(&mut self, id: &str) -> Result<Vec2, WorldError> {
        let position = map::player_spawn(&self.nav, self.bounds.width, self.bounds.height, self.joins);
        self.join_at(id, position)
    }

    /// Add a player at `position` (clamped to the bounds).
    pub fn join_at(&mut self, id: &str, position: Vec2) -> Result<Vec2, WorldError> {
        if self.has_actor(id) {
            return Err(WorldError::DuplicateActor(id.to_string()));
        }
        let position = self.bounds.clamp(position, PLAYER_HALF);
        let player = Player::new(id, position);
        barrier::announce_actor(&player.actor, ActorRole::Player, &mut self.journal);
        self.players.insert(id.to_string(), player);
        self.joins += 1;
        info!(player = %id, x = position.x, y = position.y, "player joined");
        Ok(position)
    }

    /// Remove a player. Returns false for unknown IDs.
    pub fn leave(&mut self, id: &str) -> bool {
        let Some(mut player) = self.players.remove(id) else {
            return false;
        };
        clear_statuses(&mut player.actor, &mut self.effects);
        barrier::remove_entity(PatchKind::PlayerRemoved, id, &mut self.journal);
        info!(player = %id, "player left");
        true
    }

    /// Seed an NPC after construction.
    pub fn spawn_npc(&mut self, id: &str, archetype: Archetype, position: Vec2, waypoints: Vec<Vec2>) -> Result<(), WorldError> {
        if self.has_actor(id) {
            return Err(WorldError::DuplicateActor(id.to_string()));
        }
        let ai_index = self.ai.index_of(archetype).ok_or(WorldError::MissingAi(archetype))?;
        let position = self.bounds.clamp(position, PLAYER_HALF);
        let npc = Npc::new(id, archetype, ai_index, position, waypoints);
        barrier::announce_actor(&npc.actor, ActorRole::Npc, &mut self.journal);
        self.npcs.insert(id.to_string(), npc);
        debug!(npc = %id, archetype = archetype.as_str(), "npc spawned");
        Ok(())
    }

    // =========================================================================
    // INVENTORY & GROUND ITEMS
    // =========================================================================

    /// Put a stack into an actor's inventory.
    pub fn grant_item(&mut self, actor_id: &str, stack: ItemStack) -> bool {
        let Some((actor, role)) = actor_entry(&mut self.players, &mut self.npcs, actor_id) else {
            return false;
        };
        barrier::mutate_inventory(actor, role, &mut self.journal, |inv| inv.add(stack))
    }

    /// Empty an actor's inventory onto the ground around it. Returns the
    /// number of stacks dropped.
    pub fn drop_all_inventory(&mut self, actor_id: &str) -> usize {
        let Some((actor, role)) = actor_entry(&mut self.players, &mut self.npcs, actor_id) else {
            return 0;
        };
        if actor.inventory.is_empty() {
            return 0;
        }
        let origin = actor.position;
        let mut stacks = Vec::new();
        barrier::mutate_inventory(actor, role, &mut self.journal, |inv| stacks = inv.take_all());
        let count = stacks.len();
        self.ground.scatter(stacks, origin, &mut self.rngs.loot, &mut self.journal);
        count
    }

    /// Players collect stacks within reach. Players are visited in ID order,
    /// so a contested stack goes to the lowest ID.
    pub(crate) fn collect_pickups(&mut self) {
        for player in self.players.values_mut() {
            if player.actor.is_defeated() {
                continue;
            }
            for id in self.ground.within(player.actor.position, PICKUP_RADIUS) {
                let Some(stack) = self.ground.take(&id, &mut self.journal) else {
                    continue;
                };
                debug!(player = %player.actor.id, item = %stack.item_type, quantity = stack.quantity, "picked up");
                barrier::mutate_inventory(&mut player.actor, ActorRole::Player, &mut self.journal, |inv| inv.add(stack));
            }
        }
    }

    /// Chip an ore. At zero durability the ore is removed, the grid rebuilt,
    /// and gold dropped in its tile.
    pub(crate) fn strike_ore(&mut self, obstacle_id: &str, miner_id: &str) {
        match self.ore.strike(obstacle_id) {
            Some(true) => {}
            Some(false) => {
                debug!(ore = %obstacle_id, miner = %miner_id, left = ?self.ore.remaining(obstacle_id), "ore struck");
                return;
            }
            None => return,
        }
        let Some(index) = self.obstacles.iter().position(|o| o.id == obstacle_id) else {
            return;
        };
        let ore = self.obstacles.remove(index);
        barrier::remove_entity(PatchKind::ObstacleRemoved, &ore.id, &mut self.journal);
        self.nav = NavGrid::build(self.bounds.width, self.bounds.height, &self.obstacles);
        self.ground.scatter(
            vec![ItemStack::new(GOLD, ORE_GOLD_YIELD)],
            ore.center(),
            &mut self.rngs.loot,
            &mut self.journal,
        );
        info!(ore = %ore.id, miner = %miner_id, "ore depleted");
    }

    // =========================================================================
    // DEFEAT
    // =========================================================================

    /// Remove a defeated actor: drop its inventory, end its statuses, stage
    /// the terminal patch. Returns false when the actor is unknown.
    pub(crate) fn handle_defeat(&mut self, actor_id: &str) -> bool {
        self.drop_all_inventory(actor_id);
        if let Some(mut npc) = self.npcs.remove(actor_id) {
            clear_statuses(&mut npc.actor, &mut self.effects);
            barrier::remove_entity(PatchKind::NpcRemoved, actor_id, &mut self.journal);
            info!(npc = %actor_id, archetype = npc.archetype.as_str(), reward = npc.reward.experience, "npc defeated");
            return true;
        }
        if let Some(mut player) = self.players.remove(actor_id) {
            clear_statuses(&mut player.actor, &mut self.effects);
            barrier::remove_entity(PatchKind::PlayerRemoved, actor_id, &mut self.journal);
            info!(player = %actor_id, "player defeated");
            return true;
        }
        warn!(actor = %actor_id, "defeat for unknown actor");
        false
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Full-world snapshot tagged with the last finalized sequence.
    pub fn snapshot(&self) -> Keyframe {
        Keyframe {
            sequence: self.journal.sequence(),
            tick: self.tick,
            players: self.players.values().map(ActorSnapshot::from).collect(),
            npcs: self.npcs.values().map(NpcSnapshot::from).collect(),
            obstacles: self.obstacles.clone(),
            ground_items: self.ground.iter().map(GroundItemSnapshot::from).collect(),
            effects: self.effects.views(),
            cursors: self.journal.lifecycle_cursors(),
            config: self.config_snapshot(),
        }
    }

    /// Settings a client needs to rebaseline.
    pub fn config_snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            seed: self.config.seed.clone(),
            width: self.config.width,
            height: self.config.height,
            tick_rate: TICK_RATE,
            coord_scale: COORD_SCALE,
        }
    }

    /// Keyframe covering `sequence` plus later frames.
    pub fn recover(&mut self, sequence: u64, now_ms: u64) -> Result<KeyframeRecovery, KeyframeError> {
        self.journal.recover(sequence, now_ms, &mut self.telemetry)
    }

    /// Digest of all observable actor and item state.
    pub fn state_hash(&self) -> String {
        let mut hasher = StateHasher::for_world_state();
        hasher.update_u64(self.tick);
        for player in self.players.values() {
            player.actor.hash_into(&mut hasher);
        }
        for npc in self.npcs.values() {
            npc.actor.hash_into(&mut hasher);
            hasher.update_u32(npc.blackboard.state as u32);
        }
        for item in self.ground.iter() {
            hasher.update_str(&item.id);
            hasher.update_u32(item.quantity);
            hasher.update_f64(item.position.x);
            hasher.update_f64(item.position.y);
        }
        for obstacle in &self.obstacles {
            hasher.update_str(&obstacle.id);
        }
        hasher.update_u64(self.journal.sequence());
        hasher.finalize_hex()
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    /// Effect-facing view of every living actor, sorted by ID.
    pub(crate) fn actor_probes(&self) -> Vec<ActorProbe> {
        let mut probes: Vec<ActorProbe> = self
            .players
            .values()
            .map(|p| &p.actor)
            .chain(self.npcs.values().map(|n| &n.actor))
            .filter(|a| !a.is_defeated())
            .map(|a| ActorProbe { id: a.id.clone(), position: a.position, radius: a.radius(), facing: a.facing })
            .collect();
        probes.sort_by(|a, b| a.id.cmp(&b.id));
        probes
    }
}

/// Split-borrow lookup across both actor maps.
pub(crate) fn actor_entry<'a>(
    players: &'a mut BTreeMap<String, Player>,
    npcs: &'a mut BTreeMap<String, Npc>,
    id: &str,
) -> Option<(&'a mut Actor, ActorRole)> {
    if let Some(player) = players.get_mut(id) {
        return Some((&mut player.actor, ActorRole::Player));
    }
    npcs.get_mut(id).map(|npc| (&mut npc.actor, ActorRole::Npc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::ObstacleKind;
    use crate::journal::PatchPayload;

    fn empty_world() -> World {
        World::new(WorldConfig::empty(100.0, 100.0), Arc::new(EffectRegistry::builtin())).unwrap()
    }

    #[test]
    fn test_construction_seeds_layout() {
        let world = World::new(WorldConfig::default(), Arc::new(EffectRegistry::builtin())).unwrap();
        assert!(!world.obstacles().is_empty());
        assert!(!world.npcs().is_empty());
        assert_eq!(world.journal().keyframe_sequences(), vec![0]);
        let goblin = world.npcs().values().find(|n| n.archetype == Archetype::Goblin).unwrap();
        assert_eq!(goblin.actor.inventory.quantity_of(GOLD), 3);
    }

    #[test]
    fn test_join_and_leave() {
        let mut world = empty_world();
        let at = world.join("p1").unwrap();
        assert_eq!(at, Vec2::new(2000.0, 2000.0));
        assert!(matches!(world.join("p1"), Err(WorldError::DuplicateActor(_))));
        assert!(world
            .journal()
            .staged_patches()
            .iter()
            .any(|p| p.kind == PatchKind::PlayerPosition && p.entity_id == "p1"));

        assert!(world.leave("p1"));
        assert!(!world.leave("p1"));
        let staged = world.journal().staged_patches();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].kind, PatchKind::PlayerRemoved);
    }

    #[test]
    fn test_join_clamped_to_bounds() {
        let mut world = empty_world();
        let at = world.join_at("p1", Vec2::new(-50.0, 9000.0)).unwrap();
        assert_eq!(at, Vec2::new(PLAYER_HALF, 4000.0 - PLAYER_HALF));
    }

    #[test]
    fn test_drop_all_inventory_scatters_in_tile() {
        let mut world = empty_world();
        world.spawn_npc("npc-rat-1", Archetype::Rat, Vec2::new(100.0, 100.0), Vec::new()).unwrap();
        assert!(world.grant_item("npc-rat-1", ItemStack::new(GOLD, 4)));
        assert_eq!(world.drop_all_inventory("npc-rat-1"), 1);
        assert_eq!(world.drop_all_inventory("npc-rat-1"), 0);

        let items: Vec<_> = world.ground_items().iter().collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 4);
        assert_eq!(items[0].tile, crate::game::state::TileKey { x: 2, y: 2 });
        assert!(world.npc("npc-rat-1").unwrap().actor.inventory.is_empty());
    }

    #[test]
    fn test_ore_depletes_after_three_strikes() {
        let mut world = empty_world();
        world.obstacles.push(Obstacle {
            id: "ore-0".to_string(),
            kind: ObstacleKind::GoldOre,
            x: 400.0,
            y: 400.0,
            width: 40.0,
            height: 40.0,
        });
        world.ore = OreDurability::new(&world.obstacles);
        world.nav = NavGrid::build(world.bounds.width, world.bounds.height, &world.obstacles);
        assert!(world.nav.is_blocked((10, 10)));

        world.strike_ore("ore-0", "p1");
        world.strike_ore("ore-0", "p1");
        assert_eq!(world.obstacles().len(), 1);
        world.strike_ore("ore-0", "p1");
        assert!(world.obstacles().is_empty());
        assert!(!world.nav.is_blocked((10, 10)));

        let gold: u32 = world.ground_items().iter().map(|g| g.quantity).sum();
        assert_eq!(gold, ORE_GOLD_YIELD);
        assert!(world
            .journal()
            .staged_patches()
            .iter()
            .any(|p| p.kind == PatchKind::ObstacleRemoved && p.entity_id == "ore-0"));
    }

    #[test]
    fn test_defeat_purges_and_drops_loot() {
        let mut world = empty_world();
        world.spawn_npc("npc-goblin-1", Archetype::Goblin, Vec2::new(300.0, 300.0), Vec::new()).unwrap();
        world.grant_item("npc-goblin-1", ItemStack::new(GOLD, 3));
        assert!(world.handle_defeat("npc-goblin-1"));
        assert!(world.npc("npc-goblin-1").is_none());

        let staged = world.journal().staged_patches();
        let about_goblin: Vec<_> = staged.iter().filter(|p| p.entity_id == "npc-goblin-1").collect();
        assert_eq!(about_goblin.len(), 1);
        assert_eq!(about_goblin[0].kind, PatchKind::NpcRemoved);
        assert!(staged.iter().any(|p| matches!(
            p.payload,
            PatchPayload::Quantity { quantity: 3, .. }
        )));
    }

    #[test]
    fn test_snapshot_contents() {
        let mut world = empty_world();
        world.join_at("p1", Vec2::new(200.0, 180.0)).unwrap();
        let snapshot = world.snapshot();
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].x, 200.0);
        assert_eq!(snapshot.config.tick_rate, 15);
        assert_eq!(snapshot.config.coord_scale, 16);
    }
}
