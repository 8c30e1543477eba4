//! Navigation
//!
//! Coarse grid A* plus a per-actor path follower.
//!
//! ```text
//!  NW  N  NE      orthogonal step  1000
//!   W  ·  E       diagonal step    1414  (both flanks must be free)
//!  SW  S  SE      heuristic        octile
//! ```
//!
//! Integer costs keep expansion order identical on every platform. Ties in
//! the open set break on `(f, h, cell index)`.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use crate::core::units::{
    NAV_CELL_SIZE, PATH_NODE_REACHED_EPSILON, PATH_PROGRESS_EPSILON, PATH_PUSH_RECALC_THRESHOLD,
    PATH_RECALC_COOLDOWN_TICKS, PATH_STALL_THRESHOLD_TICKS, PLAYER_HALF,
};
use crate::core::vec2::Vec2;
use crate::game::state::Obstacle;

const ORTHOGONAL_COST: u64 = 1000;
const DIAGONAL_COST: u64 = 1414;
/// Extra cost for entering a lava cell.
const LAVA_PENALTY: u64 = 4000;

/// Neighbour offsets: N, S, W, E, NW, NE, SW, SE.
const NEIGHBOURS: [(i32, i32); 8] = [
    (0, -1),
    (0, 1),
    (-1, 0),
    (1, 0),
    (-1, -1),
    (1, -1),
    (-1, 1),
    (1, 1),
];

/// Grid cell.
pub type Cell = (i32, i32);

/// Walkability grid built from static obstacles.
#[derive(Debug, Clone)]
pub struct NavGrid {
    cols: i32,
    rows: i32,
    width: f64,
    height: f64,
    blocked: Vec<bool>,
    lava: Vec<bool>,
}

impl NavGrid {
    /// Rasterize obstacles: a cell is blocked when its center lies inside a
    /// solid obstacle grown by the actor radius.
    pub fn build(width: f64, height: f64, obstacles: &[Obstacle]) -> Self {
        let cols = (width / NAV_CELL_SIZE).ceil().max(1.0) as i32;
        let rows = (height / NAV_CELL_SIZE).ceil().max(1.0) as i32;
        let mut grid = Self {
            cols,
            rows,
            width,
            height,
            blocked: vec![false; (cols * rows) as usize],
            lava: vec![false; (cols * rows) as usize],
        };
        for row in 0..rows {
            for col in 0..cols {
                let center = grid.center((col, row));
                let idx = grid.index((col, row));
                for obstacle in obstacles {
                    if obstacle.blocks_movement() {
                        if obstacle.rect().inflate(PLAYER_HALF).contains(center) {
                            grid.blocked[idx] = true;
                        }
                    } else if obstacle.rect().contains(center) {
                        grid.lava[idx] = true;
                    }
                }
            }
        }
        grid
    }

    /// Columns.
    pub fn cols(&self) -> i32 {
        self.cols
    }

    /// Rows.
    pub fn rows(&self) -> i32 {
        self.rows
    }

    fn index(&self, (col, row): Cell) -> usize {
        (row * self.cols + col) as usize
    }

    fn in_bounds(&self, (col, row): Cell) -> bool {
        col >= 0 && row >= 0 && col < self.cols && row < self.rows
    }

    /// Cell containing a position, clamped to the grid.
    pub fn cell_of(&self, position: Vec2) -> Cell {
        let col = (position.x / NAV_CELL_SIZE).floor() as i32;
        let row = (position.y / NAV_CELL_SIZE).floor() as i32;
        (col.clamp(0, self.cols - 1), row.clamp(0, self.rows - 1))
    }

    /// Cell center, kept inside the walkable band.
    pub fn center(&self, (col, row): Cell) -> Vec2 {
        let x = (col as f64 + 0.5) * NAV_CELL_SIZE;
        let y = (row as f64 + 0.5) * NAV_CELL_SIZE;
        Vec2::new(
            x.clamp(PLAYER_HALF, (self.width - PLAYER_HALF).max(PLAYER_HALF)),
            y.clamp(PLAYER_HALF, (self.height - PLAYER_HALF).max(PLAYER_HALF)),
        )
    }

    /// True for cells inside a solid obstacle (or outside the grid).
    pub fn is_blocked(&self, cell: Cell) -> bool {
        !self.in_bounds(cell) || self.blocked[self.index(cell)]
    }

    /// True for lava cells.
    pub fn is_lava(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && self.lava[self.index(cell)]
    }

    /// Nearest unblocked cell by Chebyshev ring, then Euclidean distance.
    pub fn nearest_free(&self, cell: Cell) -> Option<Cell> {
        if !self.is_blocked(cell) {
            return Some(cell);
        }
        let max_ring = self.cols.max(self.rows);
        for ring in 1..=max_ring {
            let mut best: Option<(i64, Cell)> = None;
            for dy in -ring..=ring {
                for dx in -ring..=ring {
                    if dx.abs() != ring && dy.abs() != ring {
                        continue;
                    }
                    let candidate = (cell.0 + dx, cell.1 + dy);
                    if self.is_blocked(candidate) {
                        continue;
                    }
                    let d = (dx * dx + dy * dy) as i64;
                    if best.map_or(true, |(bd, bc)| d < bd || (d == bd && candidate < bc)) {
                        best = Some((d, candidate));
                    }
                }
            }
            if let Some((_, found)) = best {
                return Some(found);
            }
        }
        None
    }

    /// A* from `start` to `goal`. `dynamic` holds cells occupied by other
    /// actors; they only forbid cutting diagonal corners.
    ///
    /// Returns the waypoints after the start cell, ending at `goal` (or the
    /// nearest free cell when the goal is blocked). `None` when unreachable.
    pub fn find_path(&self, start: Vec2, goal: Vec2, dynamic: &BTreeSet<Cell>) -> Option<Vec<Vec2>> {
        let start_cell = self.cell_of(start);
        let requested = self.cell_of(goal);
        let goal_cell = self.nearest_free(requested)?;
        let final_point = if goal_cell == requested {
            Vec2::new(
                goal.x.clamp(PLAYER_HALF, (self.width - PLAYER_HALF).max(PLAYER_HALF)),
                goal.y.clamp(PLAYER_HALF, (self.height - PLAYER_HALF).max(PLAYER_HALF)),
            )
        } else {
            self.center(goal_cell)
        };

        if start_cell == goal_cell {
            return Some(vec![final_point]);
        }

        let cells = (self.cols * self.rows) as usize;
        let mut g = vec![u64::MAX; cells];
        let mut came_from = vec![usize::MAX; cells];
        let mut closed = vec![false; cells];
        let mut open = BinaryHeap::new();

        let start_idx = self.index(start_cell);
        let goal_idx = self.index(goal_cell);
        g[start_idx] = 0;
        let h0 = octile(start_cell, goal_cell);
        open.push(Reverse((h0, h0, start_idx)));

        while let Some(Reverse((_, _, idx))) = open.pop() {
            if closed[idx] {
                continue;
            }
            if idx == goal_idx {
                return Some(self.reconstruct(&came_from, start_idx, goal_idx, final_point));
            }
            closed[idx] = true;
            let cell = (idx as i32 % self.cols, idx as i32 / self.cols);

            for (dx, dy) in NEIGHBOURS {
                let next = (cell.0 + dx, cell.1 + dy);
                if self.is_blocked(next) {
                    continue;
                }
                let diagonal = dx != 0 && dy != 0;
                if diagonal {
                    let flank_a = (cell.0 + dx, cell.1);
                    let flank_b = (cell.0, cell.1 + dy);
                    if self.is_blocked(flank_a)
                        || self.is_blocked(flank_b)
                        || dynamic.contains(&flank_a)
                        || dynamic.contains(&flank_b)
                    {
                        continue;
                    }
                }
                let next_idx = self.index(next);
                if closed[next_idx] {
                    continue;
                }
                let mut step = if diagonal { DIAGONAL_COST } else { ORTHOGONAL_COST };
                if self.lava[next_idx] {
                    step += LAVA_PENALTY;
                }
                let tentative = g[idx] + step;
                if tentative < g[next_idx] {
                    g[next_idx] = tentative;
                    came_from[next_idx] = idx;
                    let h = octile(next, goal_cell);
                    open.push(Reverse((tentative + h, h, next_idx)));
                }
            }
        }
        None
    }

    fn reconstruct(&self, came_from: &[usize], start: usize, goal: usize, final_point: Vec2) -> Vec<Vec2> {
        let mut cells = Vec::new();
        let mut current = goal;
        while current != start && current != usize::MAX {
            cells.push(current);
            current = came_from[current];
        }
        cells.reverse();
        let mut points: Vec<Vec2> = cells
            .iter()
            .map(|&idx| self.center((idx as i32 % self.cols, idx as i32 / self.cols)))
            .collect();
        if let Some(last) = points.last_mut() {
            *last = final_point;
        }
        points
    }
}

fn octile(a: Cell, b: Cell) -> u64 {
    let dx = (a.0 - b.0).unsigned_abs() as u64;
    let dy = (a.1 - b.1).unsigned_abs() as u64;
    let (lo, hi) = if dx < dy { (dx, dy) } else { (dy, dx) };
    ORTHOGONAL_COST * hi + (DIAGONAL_COST - ORTHOGONAL_COST) * lo
}

// =============================================================================
// PATH FOLLOWER
// =============================================================================

/// What the follower wants this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FollowStep {
    /// Move along this unit vector.
    Intent(Vec2),
    /// Final node reached.
    Arrived,
    /// Stalled or pushed off the path; plan again.
    Replan,
}

/// Progress along a planned path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFollower {
    /// Waypoints.
    pub path: Vec<Vec2>,
    /// Current waypoint.
    pub index: usize,
    /// Requested destination.
    pub goal: Vec2,
    /// Distance to the current node last tick.
    pub last_distance: f64,
    /// Ticks without progress.
    pub stall_ticks: u32,
    /// No replanning before this tick.
    pub recalc_tick: u64,
    /// Radius for the final node.
    pub arrive_radius: f64,
}

impl PathFollower {
    /// Follow a freshly planned path.
    pub fn new(path: Vec<Vec2>, goal: Vec2, arrive_radius: f64) -> Self {
        Self {
            path,
            index: 0,
            goal,
            last_distance: f64::INFINITY,
            stall_ticks: 0,
            recalc_tick: 0,
            arrive_radius,
        }
    }

    /// Current waypoint.
    pub fn target(&self) -> Option<Vec2> {
        self.path.get(self.index).copied()
    }

    /// Swap in a new plan, keeping the cooldown.
    pub fn replace_path(&mut self, path: Vec<Vec2>) {
        self.path = path;
        self.index = 0;
        self.last_distance = f64::INFINITY;
        self.stall_ticks = 0;
    }

    /// Back off after a failed plan.
    pub fn mark_failed(&mut self, tick: u64) {
        self.recalc_tick = tick + PATH_RECALC_COOLDOWN_TICKS;
        self.stall_ticks = 0;
    }

    /// Advance from the actor's current position.
    pub fn advance(&mut self, position: Vec2, tick: u64) -> FollowStep {
        loop {
            let Some(node) = self.path.get(self.index).copied() else {
                return FollowStep::Arrived;
            };
            let is_last = self.index + 1 == self.path.len();
            let radius = if is_last { self.arrive_radius } else { PATH_NODE_REACHED_EPSILON };
            let distance = position.distance(node);

            if distance <= radius {
                if is_last {
                    return FollowStep::Arrived;
                }
                self.index += 1;
                self.last_distance = f64::INFINITY;
                self.stall_ticks = 0;
                continue;
            }

            if self.last_distance.is_finite() {
                if distance > self.last_distance + PATH_PUSH_RECALC_THRESHOLD {
                    self.last_distance = distance;
                    if tick >= self.recalc_tick {
                        return FollowStep::Replan;
                    }
                } else if distance < self.last_distance - PATH_PROGRESS_EPSILON {
                    self.stall_ticks = 0;
                } else {
                    self.stall_ticks += 1;
                    if self.stall_ticks >= PATH_STALL_THRESHOLD_TICKS && tick >= self.recalc_tick {
                        self.stall_ticks = 0;
                        self.last_distance = distance;
                        return FollowStep::Replan;
                    }
                }
            }
            self.last_distance = distance;
            return FollowStep::Intent((node - position).normalize());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::ObstacleKind;

    fn wall(x: f64, y: f64, w: f64, h: f64) -> Obstacle {
        Obstacle { id: "rock".to_string(), kind: ObstacleKind::Rock, x, y, width: w, height: h }
    }

    #[test]
    fn test_straight_line() {
        let grid = NavGrid::build(400.0, 400.0, &[]);
        let path = grid.find_path(Vec2::new(20.0, 20.0), Vec2::new(180.0, 20.0), &BTreeSet::new()).unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(*path.last().unwrap(), Vec2::new(180.0, 20.0));
    }

    #[test]
    fn test_routes_around_wall() {
        // Wall across columns 3..5 from the top down to row 7
        let grid = NavGrid::build(400.0, 400.0, &[wall(120.0, 0.0, 80.0, 300.0)]);
        let start = Vec2::new(60.0, 60.0);
        let goal = Vec2::new(300.0, 60.0);
        let path = grid.find_path(start, goal, &BTreeSet::new()).unwrap();
        assert!(path.iter().all(|p| !grid.is_blocked(grid.cell_of(*p))));
        assert!(path.iter().any(|p| p.y > 300.0));
        assert_eq!(*path.last().unwrap(), goal);
    }

    #[test]
    fn test_blocked_goal_uses_nearest_free() {
        let grid = NavGrid::build(400.0, 400.0, &[wall(160.0, 160.0, 80.0, 80.0)]);
        let path = grid.find_path(Vec2::new(20.0, 20.0), Vec2::new(200.0, 200.0), &BTreeSet::new()).unwrap();
        let end = grid.cell_of(*path.last().unwrap());
        assert!(!grid.is_blocked(end));
    }

    #[test]
    fn test_unreachable() {
        // Box the goal in completely
        let obstacles = [
            wall(120.0, 120.0, 160.0, 20.0),
            wall(120.0, 260.0, 160.0, 20.0),
            wall(120.0, 120.0, 20.0, 160.0),
            wall(260.0, 120.0, 20.0, 160.0),
        ];
        let grid = NavGrid::build(400.0, 400.0, &obstacles);
        assert!(grid.find_path(Vec2::new(20.0, 20.0), Vec2::new(200.0, 200.0), &BTreeSet::new()).is_none());
    }

    #[test]
    fn test_dynamic_blocker_forbids_corner_cut() {
        let grid = NavGrid::build(400.0, 400.0, &[]);
        let free = grid.find_path(Vec2::new(20.0, 20.0), Vec2::new(60.0, 60.0), &BTreeSet::new()).unwrap();
        assert_eq!(free.len(), 1);

        let blockers: BTreeSet<Cell> = [(1, 0)].into_iter().collect();
        let around = grid.find_path(Vec2::new(20.0, 20.0), Vec2::new(60.0, 60.0), &blockers).unwrap();
        assert_eq!(around.len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let grid = NavGrid::build(800.0, 800.0, &[wall(200.0, 100.0, 40.0, 500.0)]);
        let a = grid.find_path(Vec2::new(50.0, 300.0), Vec2::new(700.0, 320.0), &BTreeSet::new());
        let b = grid.find_path(Vec2::new(50.0, 300.0), Vec2::new(700.0, 320.0), &BTreeSet::new());
        assert_eq!(a, b);
    }

    #[test]
    fn test_follower_arrives() {
        let mut follower = PathFollower::new(vec![Vec2::new(20.0, 0.0), Vec2::new(40.0, 0.0)], Vec2::new(40.0, 0.0), 6.0);
        assert_eq!(follower.advance(Vec2::ZERO, 1), FollowStep::Intent(Vec2::RIGHT));
        assert_eq!(follower.advance(Vec2::new(15.0, 0.0), 2), FollowStep::Intent(Vec2::RIGHT));
        assert_eq!(follower.index, 1);
        assert_eq!(follower.advance(Vec2::new(36.0, 0.0), 3), FollowStep::Arrived);
    }

    #[test]
    fn test_follower_stall_and_cooldown() {
        let mut follower = PathFollower::new(vec![Vec2::new(100.0, 0.0)], Vec2::new(100.0, 0.0), 6.0);
        let mut replan_at = None;
        for tick in 1..=20 {
            if follower.advance(Vec2::ZERO, tick) == FollowStep::Replan {
                replan_at = Some(tick);
                break;
            }
        }
        assert_eq!(replan_at, Some(1 + PATH_STALL_THRESHOLD_TICKS as u64));

        follower.mark_failed(13);
        for tick in 14..21 {
            assert_ne!(follower.advance(Vec2::ZERO, tick), FollowStep::Replan);
        }
    }

    #[test]
    fn test_follower_push_replans() {
        let mut follower = PathFollower::new(vec![Vec2::new(100.0, 0.0)], Vec2::new(100.0, 0.0), 6.0);
        follower.advance(Vec2::new(50.0, 0.0), 1);
        assert_eq!(follower.advance(Vec2::new(0.0, -40.0), 2), FollowStep::Replan);
    }
}
