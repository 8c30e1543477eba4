//! Effect collision shapes in world space.

use crate::core::units::dequantize;
use crate::core::vec2::Vec2;
use crate::game::collision::Rect;
use crate::game::effects::definition::ShapeKind;
use crate::journal::lifecycle::GeometryView;

/// A resolved shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorldShape {
    /// Circle.
    Circle {
        /// Center.
        center: Vec2,
        /// Radius.
        radius: f64,
    },
    /// Axis-aligned rectangle.
    Rect(Rect),
    /// Circular sector.
    Arc {
        /// Apex.
        center: Vec2,
        /// Radius.
        radius: f64,
        /// Unit bisector.
        direction: Vec2,
        /// Half the sweep, in degrees.
        half_angle: f64,
    },
    /// Swept segment; radius 0 for a plain segment.
    Capsule {
        /// Start.
        from: Vec2,
        /// End.
        to: Vec2,
        /// Sweep radius.
        radius: f64,
    },
}

impl WorldShape {
    /// Resolve quantized geometry centered at `center` (world units).
    pub fn from_geometry(geometry: &GeometryView, center: Vec2) -> Self {
        let direction = Vec2::RIGHT.rotate_degrees(geometry.rotation as f64);
        match geometry.shape {
            ShapeKind::Circle => WorldShape::Circle {
                center,
                radius: dequantize(geometry.radius),
            },
            ShapeKind::Rect => WorldShape::Rect(Rect::centered(
                center,
                dequantize(geometry.width),
                dequantize(geometry.height),
            )),
            ShapeKind::Arc => WorldShape::Arc {
                center,
                radius: dequantize(geometry.radius),
                direction,
                half_angle: geometry.arc_degrees as f64 / 2.0,
            },
            ShapeKind::Segment => WorldShape::Capsule {
                from: center,
                to: center + direction.scale(dequantize(geometry.length)),
                radius: 0.0,
            },
            ShapeKind::Capsule => WorldShape::Capsule {
                from: center,
                to: center + direction.scale(dequantize(geometry.length)),
                radius: dequantize(geometry.radius),
            },
        }
    }

    /// Check if the shape overlaps a circle (actor body).
    pub fn intersects_circle(&self, point: Vec2, radius: f64) -> bool {
        match *self {
            WorldShape::Circle { center, radius: r } => {
                let reach = r + radius;
                center.distance_squared(point) <= reach * reach
            }
            WorldShape::Rect(rect) => rect.intersects_circle(point, radius),
            WorldShape::Arc { center, radius: r, direction, half_angle } => {
                let offset = point - center;
                let distance = offset.length();
                if distance > r + radius {
                    return false;
                }
                if distance <= radius {
                    return true;
                }
                let cos = offset.normalize().dot(direction).clamp(-1.0, 1.0);
                let angle = cos.acos().to_degrees();
                // Widen the sector by the angle the body subtends
                let slack = (radius / distance).min(1.0).asin().to_degrees();
                angle <= half_angle + slack
            }
            WorldShape::Capsule { from, to, radius: r } => {
                let reach = r + radius;
                segment_distance_squared(from, to, point) <= reach * reach
            }
        }
    }

    /// Check if the shape overlaps a rectangle (obstacle).
    pub fn intersects_rect(&self, rect: &Rect) -> bool {
        match *self {
            WorldShape::Circle { center, radius } => rect.intersects_circle(center, radius),
            WorldShape::Rect(own) => own.overlaps(rect),
            WorldShape::Arc { center, radius, direction, half_angle } => {
                if !rect.intersects_circle(center, radius) {
                    return false;
                }
                if rect.contains(center) {
                    return true;
                }
                let within = |p: Vec2| {
                    let cos = (p - center).normalize().dot(direction).clamp(-1.0, 1.0);
                    cos.acos().to_degrees() <= half_angle
                };
                within(rect.closest_point(center)) || within(rect.center())
            }
            WorldShape::Capsule { from, to, radius } => {
                segment_hits_rect(from, to, &rect.inflate(radius))
            }
        }
    }

    /// Reference point.
    pub fn center(&self) -> Vec2 {
        match *self {
            WorldShape::Circle { center, .. } | WorldShape::Arc { center, .. } => center,
            WorldShape::Rect(rect) => rect.center(),
            WorldShape::Capsule { from, .. } => from,
        }
    }
}

/// Squared distance from `p` to segment `a..b`.
pub fn segment_distance_squared(a: Vec2, b: Vec2, p: Vec2) -> f64 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f64::EPSILON {
        return a.distance_squared(p);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (a + ab.scale(t)).distance_squared(p)
}

/// Liang-Barsky clip of segment `a..b` against a rectangle.
pub fn segment_hits_rect(a: Vec2, b: Vec2, rect: &Rect) -> bool {
    let d = b - a;
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    let checks = [
        (-d.x, a.x - rect.x),
        (d.x, rect.max_x() - a.x),
        (-d.y, a.y - rect.y),
        (d.y, rect.max_y() - a.y),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return false;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return false;
        }
    }
    true
}
