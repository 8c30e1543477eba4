//! Collision Detection
//!
//! Axis-separated movement of actor circles against obstacle rectangles.
//!
//! ```text
//! integrate X → clamp to bounds → clamp against obstacle vertical edges
//! integrate Y → clamp to bounds → clamp against obstacle horizontal edges
//! penetration pass: push out along the shortest escape axis
//! ```
//!
//! Lava never blocks; overlapping it is reported so the caller can
//! schedule a burning status.

use crate::core::vec2::{Vec2, EPSILON};
use crate::game::state::{Obstacle, ObstacleKind};

/// Axis-aligned rectangle anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Rect {
    /// Create from top-left corner and size.
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Create from a center point and size.
    pub fn centered(center: Vec2, width: f64, height: f64) -> Self {
        Self::new(center.x - width / 2.0, center.y - height / 2.0, width, height)
    }

    /// Right edge.
    #[inline]
    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    #[inline]
    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    /// Center point.
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Grow every side by `amount`.
    pub fn inflate(&self, amount: f64) -> Self {
        Self::new(
            self.x - amount,
            self.y - amount,
            self.width + amount * 2.0,
            self.height + amount * 2.0,
        )
    }

    /// Strict interior containment.
    pub fn contains(&self, point: Vec2) -> bool {
        point.x > self.x && point.x < self.max_x() && point.y > self.y && point.y < self.max_y()
    }

    /// Closest point of the rectangle to `point`.
    pub fn closest_point(&self, point: Vec2) -> Vec2 {
        Vec2::new(
            point.x.clamp(self.x, self.max_x()),
            point.y.clamp(self.y, self.max_y()),
        )
    }

    /// Check if two rectangles overlap (touching edges do not count).
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.max_x()
            && other.x < self.max_x()
            && self.y < other.max_y()
            && other.y < self.max_y()
    }

    /// Check if a circle overlaps the rectangle.
    pub fn intersects_circle(&self, center: Vec2, radius: f64) -> bool {
        let closest = self.closest_point(center);
        closest.distance_squared(center) < radius * radius - EPSILON
    }
}

/// Check if two circles overlap.
#[inline]
pub fn circles_overlap(pos_a: Vec2, radius_a: f64, pos_b: Vec2, radius_b: f64) -> bool {
    let combined = radius_a + radius_b;
    pos_a.distance_squared(pos_b) <= combined * combined
}

/// World rectangle actors are confined to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Width in world units.
    pub width: f64,
    /// Height in world units.
    pub height: f64,
}

impl Bounds {
    /// Clamp a center so a circle of `radius` stays inside.
    pub fn clamp(&self, position: Vec2, radius: f64) -> Vec2 {
        Vec2::new(
            clamp_axis(position.x, radius, self.width),
            clamp_axis(position.y, radius, self.height),
        )
    }
}

fn clamp_axis(value: f64, radius: f64, extent: f64) -> f64 {
    if extent <= radius * 2.0 {
        return extent / 2.0;
    }
    value.clamp(radius, extent - radius)
}

/// Result of integrating one actor for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveResult {
    /// Resolved center.
    pub position: Vec2,
    /// The actor circle overlaps a lava pool.
    pub touching_lava: bool,
}

/// Move a circle by `intent · speed · dt` with axis-separated resolution.
///
/// `intent` is normalized first; a zero intent produces no motion but the
/// penetration and lava checks still run.
pub fn integrate_movement(
    position: Vec2,
    intent: Vec2,
    speed: f64,
    dt: f64,
    radius: f64,
    bounds: Bounds,
    obstacles: &[Obstacle],
) -> MoveResult {
    let direction = intent.normalize();
    let step = direction.scale(speed * dt);
    let mut pos = position;

    // X axis
    if step.x != 0.0 {
        let mut x = clamp_axis(pos.x + step.x, radius, bounds.width);
        for obstacle in obstacles.iter().filter(|o| o.blocks_movement()) {
            let rect = obstacle.rect();
            if pos.y + radius <= rect.y || pos.y - radius >= rect.max_y() {
                continue;
            }
            if step.x > 0.0 && pos.x + radius <= rect.x + EPSILON && x + radius > rect.x {
                x = rect.x - radius;
            } else if step.x < 0.0 && pos.x - radius >= rect.max_x() - EPSILON && x - radius < rect.max_x() {
                x = rect.max_x() + radius;
            }
        }
        pos.x = x;
    }

    // Y axis, with the updated X
    if step.y != 0.0 {
        let mut y = clamp_axis(pos.y + step.y, radius, bounds.height);
        for obstacle in obstacles.iter().filter(|o| o.blocks_movement()) {
            let rect = obstacle.rect();
            if pos.x + radius <= rect.x || pos.x - radius >= rect.max_x() {
                continue;
            }
            if step.y > 0.0 && pos.y + radius <= rect.y + EPSILON && y + radius > rect.y {
                y = rect.y - radius;
            } else if step.y < 0.0 && pos.y - radius >= rect.max_y() - EPSILON && y - radius < rect.max_y() {
                y = rect.max_y() + radius;
            }
        }
        pos.y = y;
    }

    pos = resolve_penetration(pos, radius, obstacles);
    pos = bounds.clamp(pos, radius);

    let touching_lava = obstacles
        .iter()
        .filter(|o| o.kind == ObstacleKind::Lava)
        .any(|o| o.rect().intersects_circle(pos, radius));

    MoveResult { position: pos, touching_lava }
}

/// Push a circle out of every blocking rectangle it overlaps.
///
/// Each overlap is resolved along the axis with the smallest escape
/// distance. Obstacles are visited in list order.
pub fn resolve_penetration(position: Vec2, radius: f64, obstacles: &[Obstacle]) -> Vec2 {
    let mut pos = position;
    for obstacle in obstacles.iter().filter(|o| o.blocks_movement()) {
        let rect = obstacle.rect();
        if !rect.intersects_circle(pos, radius) {
            continue;
        }
        let escape_left = (pos.x + radius) - rect.x;
        let escape_right = rect.max_x() - (pos.x - radius);
        let escape_up = (pos.y + radius) - rect.y;
        let escape_down = rect.max_y() - (pos.y - radius);

        let min = escape_left.min(escape_right).min(escape_up).min(escape_down);
        if min == escape_left {
            pos.x -= escape_left;
        } else if min == escape_right {
            pos.x += escape_right;
        } else if min == escape_up {
            pos.y -= escape_up;
        } else {
            pos.y += escape_down;
        }
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::PLAYER_HALF;
    use proptest::prelude::*;

    fn rock(x: f64, y: f64, w: f64, h: f64) -> Obstacle {
        Obstacle {
            id: "rock".to_string(),
            kind: ObstacleKind::Rock,
            x,
            y,
            width: w,
            height: h,
        }
    }

    const BOUNDS: Bounds = Bounds { width: 800.0, height: 600.0 };

    #[test]
    fn test_circles_overlap() {
        assert!(circles_overlap(Vec2::ZERO, 10.0, Vec2::new(15.0, 0.0), 10.0));
        assert!(!circles_overlap(Vec2::ZERO, 10.0, Vec2::new(25.0, 0.0), 4.0));
    }

    #[test]
    fn test_rect_circle() {
        let rect = Rect::new(100.0, 100.0, 40.0, 40.0);
        assert!(rect.intersects_circle(Vec2::new(90.0, 120.0), 14.0));
        assert!(!rect.intersects_circle(Vec2::new(86.0, 120.0), 14.0));
        assert!(rect.contains(Vec2::new(120.0, 120.0)));
        assert!(!rect.contains(Vec2::new(100.0, 120.0)));
    }

    #[test]
    fn test_move_free() {
        let result = integrate_movement(
            Vec2::new(200.0, 200.0),
            Vec2::new(3.0, 4.0),
            150.0,
            0.1,
            PLAYER_HALF,
            BOUNDS,
            &[],
        );
        assert!(result.position.approx_eq(Vec2::new(209.0, 212.0)));
        assert!(!result.touching_lava);
    }

    #[test]
    fn test_zero_intent_no_motion() {
        let start = Vec2::new(200.0, 200.0);
        let result = integrate_movement(start, Vec2::ZERO, 150.0, 0.1, PLAYER_HALF, BOUNDS, &[]);
        assert_eq!(result.position, start);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let result = integrate_movement(
            Vec2::new(20.0, 20.0),
            Vec2::new(-1.0, -1.0),
            1000.0,
            1.0,
            PLAYER_HALF,
            BOUNDS,
            &[],
        );
        assert_eq!(result.position, Vec2::new(PLAYER_HALF, PLAYER_HALF));
    }

    #[test]
    fn test_blocked_by_rock_on_x() {
        let obstacles = [rock(240.0, 180.0, 40.0, 40.0)];
        let result = integrate_movement(
            Vec2::new(200.0, 200.0),
            Vec2::RIGHT,
            400.0,
            0.25,
            PLAYER_HALF,
            BOUNDS,
            &obstacles,
        );
        assert_eq!(result.position, Vec2::new(240.0 - PLAYER_HALF, 200.0));
    }

    #[test]
    fn test_slides_along_edge() {
        // Rock to the right; diagonal intent keeps the Y component
        let obstacles = [rock(230.0, 100.0, 40.0, 300.0)];
        let result = integrate_movement(
            Vec2::new(200.0, 200.0),
            Vec2::new(1.0, 1.0),
            100.0,
            1.0,
            PLAYER_HALF,
            BOUNDS,
            &obstacles,
        );
        assert_eq!(result.position.x, 230.0 - PLAYER_HALF);
        assert!(result.position.y > 260.0);
    }

    #[test]
    fn test_penetration_pushes_out() {
        let obstacles = [rock(100.0, 100.0, 40.0, 40.0)];
        let pushed = resolve_penetration(Vec2::new(104.0, 120.0), PLAYER_HALF, &obstacles);
        assert_eq!(pushed, Vec2::new(100.0 - PLAYER_HALF, 120.0));
    }

    #[test]
    fn test_lava_not_blocking() {
        let lava = Obstacle {
            id: "lava-1".to_string(),
            kind: ObstacleKind::Lava,
            x: 220.0,
            y: 180.0,
            width: 80.0,
            height: 40.0,
        };
        let result = integrate_movement(
            Vec2::new(200.0, 200.0),
            Vec2::RIGHT,
            160.0,
            0.25,
            PLAYER_HALF,
            BOUNDS,
            &[lava],
        );
        assert_eq!(result.position, Vec2::new(240.0, 200.0));
        assert!(result.touching_lava);
    }

    proptest! {
        #[test]
        fn test_positions_stay_in_bounds_and_out_of_rocks(
            start_x in 0.0f64..800.0,
            start_y in 0.0f64..600.0,
            steps in prop::collection::vec((-1.0f64..1.0, -1.0f64..1.0), 1..40),
        ) {
            let obstacles = [rock(300.0, 200.0, 120.0, 80.0)];
            let mut pos = Vec2::new(start_x, start_y);
            prop_assume!(!obstacles[0].rect().inflate(PLAYER_HALF).contains(pos));
            pos = BOUNDS.clamp(pos, PLAYER_HALF);

            for (dx, dy) in steps {
                let result = integrate_movement(
                    pos,
                    Vec2::new(dx, dy),
                    160.0,
                    1.0 / 15.0,
                    PLAYER_HALF,
                    BOUNDS,
                    &obstacles,
                );
                pos = result.position;
                prop_assert!(pos.x >= PLAYER_HALF && pos.x <= BOUNDS.width - PLAYER_HALF);
                prop_assert!(pos.y >= PLAYER_HALF && pos.y <= BOUNDS.height - PLAYER_HALF);
                prop_assert!(!obstacles[0].rect().contains(pos));
            }
        }
    }
}
