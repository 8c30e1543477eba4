//! World Layout
//!
//! Deterministic construction-time placement of obstacles and NPCs.
//! Everything draws from the world-gen subsystem RNG, so a seed fully
//! determines the layout.
//!
//! Placement order is fixed: rocks, gold ore, lava, goblins, rats. A clear
//! zone around the world center keeps the player spawn walkable.

use tracing::debug;

use crate::config::WorldConfig;
use crate::core::rng::DeterministicRng;
use crate::core::units::PLAYER_HALF;
use crate::core::vec2::Vec2;
use crate::game::collision::Rect;
use crate::game::items::GOLD;
use crate::game::nav::NavGrid;
use crate::game::state::{Archetype, ItemStack, Obstacle, ObstacleKind};
use crate::TILE_SIZE;

/// Attempts per placement before giving up on that item.
const PLACEMENT_ATTEMPTS: u32 = 32;
/// Radius around the world center kept free of obstacles and NPCs.
const SPAWN_CLEARING: f64 = 3.0 * TILE_SIZE;
/// Gap kept between obstacles.
const OBSTACLE_GAP: f64 = TILE_SIZE;
/// Patrol leg length range for goblins.
const PATROL_LEG: (f64, f64) = (3.0 * TILE_SIZE, 6.0 * TILE_SIZE);
/// Gold carried by each goblin.
const GOBLIN_GOLD: u32 = 3;
/// Spacing between successive player spawns.
const SPAWN_SPACING: f64 = 2.0 * TILE_SIZE;

/// An NPC to spawn at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct NpcSeed {
    /// Stable ID.
    pub id: String,
    /// Archetype.
    pub archetype: Archetype,
    /// Spawn point.
    pub position: Vec2,
    /// Patrol route (goblins only).
    pub waypoints: Vec<Vec2>,
    /// Reward inventory dropped on defeat.
    pub loot: Vec<ItemStack>,
}

/// Generated world contents.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorldLayout {
    /// Obstacles in placement order.
    pub obstacles: Vec<Obstacle>,
    /// NPCs in placement order.
    pub npcs: Vec<NpcSeed>,
}

/// Generate the layout for `config`.
pub fn generate(config: &WorldConfig, rng: &mut DeterministicRng) -> WorldLayout {
    let width = config.width_units();
    let height = config.height_units();
    let center = Vec2::new(width / 2.0, height / 2.0);
    let mut layout = WorldLayout::default();

    let groups = [
        (config.obstacles, config.obstacles_count, ObstacleKind::Rock),
        (config.gold_mines, config.gold_mine_count, ObstacleKind::GoldOre),
        (config.lava, config.lava_count, ObstacleKind::Lava),
    ];
    for (enabled, count, kind) in groups {
        if !enabled {
            continue;
        }
        for n in 0..count {
            if let Some(obstacle) = place_obstacle(kind, n, width, height, center, &layout.obstacles, rng) {
                layout.obstacles.push(obstacle);
            }
        }
    }

    if config.npcs {
        let grid = NavGrid::build(width, height, &layout.obstacles);
        for n in 0..config.goblin_count {
            if let Some(seed) = place_npc(Archetype::Goblin, n, &grid, center, rng) {
                layout.npcs.push(seed);
            }
        }
        for n in 0..config.rat_count {
            if let Some(seed) = place_npc(Archetype::Rat, n, &grid, center, rng) {
                layout.npcs.push(seed);
            }
        }
    }

    debug!(
        obstacles = layout.obstacles.len(),
        npcs = layout.npcs.len(),
        seed = %config.seed,
        "world layout generated"
    );
    layout
}

fn obstacle_prefix(kind: ObstacleKind) -> &'static str {
    match kind {
        ObstacleKind::Rock => "rock",
        ObstacleKind::GoldOre => "ore",
        ObstacleKind::Lava => "lava",
    }
}

/// Size range in tiles.
fn obstacle_tiles(kind: ObstacleKind) -> (i32, i32) {
    match kind {
        ObstacleKind::Rock => (1, 3),
        ObstacleKind::GoldOre => (1, 1),
        ObstacleKind::Lava => (2, 4),
    }
}

fn place_obstacle(
    kind: ObstacleKind,
    n: u32,
    width: f64,
    height: f64,
    center: Vec2,
    existing: &[Obstacle],
    rng: &mut DeterministicRng,
) -> Option<Obstacle> {
    let (min_tiles, max_tiles) = obstacle_tiles(kind);
    let cols = (width / TILE_SIZE).floor() as i32;
    let rows = (height / TILE_SIZE).floor() as i32;

    for _ in 0..PLACEMENT_ATTEMPTS {
        let w = rng.next_int_range(min_tiles, max_tiles + 1);
        let h = rng.next_int_range(min_tiles, max_tiles + 1);
        if cols - w - 1 < 1 || rows - h - 1 < 1 {
            return None;
        }
        let col = rng.next_int_range(1, cols - w);
        let row = rng.next_int_range(1, rows - h);

        let rect = Rect::new(
            col as f64 * TILE_SIZE,
            row as f64 * TILE_SIZE,
            w as f64 * TILE_SIZE,
            h as f64 * TILE_SIZE,
        );
        if rect.intersects_circle(center, SPAWN_CLEARING) {
            continue;
        }
        let padded = rect.inflate(OBSTACLE_GAP);
        if existing.iter().any(|o| padded.overlaps(&o.rect())) {
            continue;
        }

        return Some(Obstacle {
            id: format!("{}-{}", obstacle_prefix(kind), n),
            kind,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
    }
    debug!(kind = obstacle_prefix(kind), n, "obstacle placement gave up");
    None
}

fn place_npc(
    archetype: Archetype,
    n: u32,
    grid: &NavGrid,
    center: Vec2,
    rng: &mut DeterministicRng,
) -> Option<NpcSeed> {
    let position = random_open_point(grid, center, rng)?;

    let (waypoints, loot) = match archetype {
        Archetype::Goblin => {
            let far = rng.next_in_ring(position, PATROL_LEG.0, PATROL_LEG.1);
            let far = grid.center(grid.nearest_free(grid.cell_of(far))?);
            (vec![position, far], vec![ItemStack::new(GOLD, GOBLIN_GOLD)])
        }
        Archetype::Rat => (Vec::new(), Vec::new()),
    };

    Some(NpcSeed {
        id: format!("npc-{}-{:03}", archetype.as_str(), n),
        archetype,
        position,
        waypoints,
        loot,
    })
}

fn random_open_point(grid: &NavGrid, center: Vec2, rng: &mut DeterministicRng) -> Option<Vec2> {
    for _ in 0..PLACEMENT_ATTEMPTS {
        let col = rng.next_int_range(0, grid.cols());
        let row = rng.next_int_range(0, grid.rows());
        let cell = (col, row);
        if grid.is_blocked(cell) || grid.is_lava(cell) {
            continue;
        }
        let point = grid.center(cell);
        if point.distance(center) < SPAWN_CLEARING + PLAYER_HALF {
            continue;
        }
        return Some(point);
    }
    None
}

/// Spawn point for the `index`-th player to join: a spiral of slots around
/// the world center, snapped to the nearest walkable cell.
pub fn player_spawn(grid: &NavGrid, width: f64, height: f64, index: u64) -> Vec2 {
    let center = Vec2::new(width / 2.0, height / 2.0);
    let slot = (index % 9) as i32;
    let offset = match slot {
        0 => Vec2::ZERO,
        _ => Vec2::RIGHT.rotate_degrees(45.0 * (slot - 1) as f64).scale(SPAWN_SPACING),
    };
    let wanted = center + offset;
    match grid.nearest_free(grid.cell_of(wanted)) {
        Some(cell) if cell == grid.cell_of(wanted) => wanted,
        Some(cell) => grid.center(cell),
        None => center,
    }
}
