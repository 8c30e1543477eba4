//! World Units and Quantization
//!
//! The simulation runs in real-valued world units. Everything that crosses
//! the wire as geometry is quantized to integer sub-units:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  1 tile  = TILE_SIZE world units  = COORD_SCALE sub-units   │
//! │  40.0    world units              = 16 sub-units            │
//! │  1 sub-unit = 2.5 world units                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Durations are converted to ticks from integer milliseconds so that
//! `200 ms` at 15 Hz is exactly 3 ticks (no float rounding surprises).

use crate::{COORD_SCALE, TICK_RATE, TILE_SIZE};

// =============================================================================
// GAME CONSTANTS
// =============================================================================

/// Actor half extent (collision radius) in world units.
pub const PLAYER_HALF: f64 = 14.0;

/// Base movement speed in world units per second at Speed 10.
pub const BASE_MOVE_SPEED: f64 = 160.0;

/// Melee reach along the facing axis (world units).
pub const MELEE_REACH: f64 = 56.0;

/// Melee swath across the facing axis (world units).
pub const MELEE_WIDTH: f64 = 40.0;

/// Melee effect lifetime in milliseconds.
pub const MELEE_DURATION_MS: u64 = 150;

/// Navigation grid cell size (world units).
pub const NAV_CELL_SIZE: f64 = 40.0;

/// Distance at which a path follower promotes to the next node.
pub const PATH_NODE_REACHED_EPSILON: f64 = 8.0;

/// Ticks without progress before a follower replans.
pub const PATH_STALL_THRESHOLD_TICKS: u32 = 12;

/// Ticks to wait after a failed replan.
pub const PATH_RECALC_COOLDOWN_TICKS: u64 = 8;

/// Sudden distance increase treated as being pushed off the path.
pub const PATH_PUSH_RECALC_THRESHOLD: f64 = 40.0;

/// Minimum per-tick distance improvement that counts as progress.
pub const PATH_PROGRESS_EPSILON: f64 = 0.1;

/// Arrive radius used for player path commands.
pub const PLAYER_ARRIVE_RADIUS: f64 = 6.0;

/// Radius within which players collect ground items.
pub const PICKUP_RADIUS: f64 = PLAYER_HALF + 10.0;

// =============================================================================
// CONVERSIONS
// =============================================================================

/// Convert world units to integer sub-units.
#[inline]
pub fn quantize(value: f64) -> i32 {
    (value * COORD_SCALE as f64 / TILE_SIZE).round() as i32
}

/// Convert integer sub-units back to world units.
#[inline]
pub fn dequantize(value: i32) -> f64 {
    value as f64 * TILE_SIZE / COORD_SCALE as f64
}

/// Convert a duration in milliseconds to ticks: `ceil(ms·rate/1000)`, min 1.
#[inline]
pub fn ticks_from_millis(ms: u64) -> u64 {
    let scaled = ms.saturating_mul(TICK_RATE as u64);
    scaled.div_ceil(1000).max(1)
}

/// Convert a duration in seconds to ticks via whole milliseconds.
#[inline]
pub fn ticks_from_seconds(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 1;
    }
    ticks_from_millis((seconds * 1000.0).round() as u64)
}

/// Length of one tick in seconds.
#[inline]
pub fn tick_seconds() -> f64 {
    1.0 / TICK_RATE as f64
}

/// Integer grid cell containing a world position.
#[inline]
pub fn tile_of(x: f64, y: f64) -> (i32, i32) {
    ((x / TILE_SIZE).floor() as i32, (y / TILE_SIZE).floor() as i32)
}

// =============================================================================
// TESTS
// =============================================================================
