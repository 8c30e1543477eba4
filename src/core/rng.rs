//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ for fast, deterministic randomness. The world holds a
//! root seed string; every subsystem that needs randomness gets its own
//! generator derived from that string, so adding draws in one subsystem
//! never perturbs another.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::vec2::Vec2;

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// Given the same seed, this RNG produces the exact same sequence on any
/// platform.
///
/// # Example
///
/// ```
/// use emberfall::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create the generator for one subsystem of a world seeded with `seed`.
    pub fn for_subsystem(seed: &str, subsystem: &str) -> Self {
        Self::new(derive_subsystem_seed(seed, subsystem))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random u32.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max - min + 1) as u32;
        min + self.next_int(range) as i32
    }

    /// Generate a real in [0, 1) from the top 53 bits.
    #[inline]
    pub fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a real in [min, max).
    #[inline]
    pub fn next_range(&mut self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        min + self.next_unit() * (max - min)
    }

    /// Generate a point at a random angle with distance in [min_radius, radius).
    pub fn next_in_ring(&mut self, center: Vec2, min_radius: f64, radius: f64) -> Vec2 {
        let angle = self.next_range(0.0, 360.0);
        let distance = self.next_range(min_radius.max(0.0), radius.max(min_radius));
        center + Vec2::RIGHT.rotate_degrees(angle).scale(distance)
    }

    /// Shuffle a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            slice.get(idx)
        }
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }

    /// Restore from saved state.
    pub fn set_state(&mut self, state: [u64; 2]) {
        self.state = state;
    }
}

/// Generators for each randomness consumer in the world.
#[derive(Clone, Debug)]
pub struct SubsystemRngs {
    /// Obstacle, NPC and waypoint placement at construction.
    pub world_gen: DeterministicRng,
    /// AI random destinations.
    pub ai: DeterministicRng,
    /// Loot quantities and drop scatter.
    pub loot: DeterministicRng,
}

impl SubsystemRngs {
    /// Derive all subsystem generators from the root seed string.
    pub fn from_seed(seed: &str) -> Self {
        Self {
            world_gen: DeterministicRng::for_subsystem(seed, "world-gen"),
            ai: DeterministicRng::for_subsystem(seed, "ai"),
            loot: DeterministicRng::for_subsystem(seed, "loot"),
        }
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a 64-bit seed for `subsystem` from the world seed string.
///
/// This is the only process-wide randomness input; it is a pure function.
pub fn derive_subsystem_seed(seed: &str, subsystem: &str) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"EMBERFALL_SEED_V1");
    hasher.update((seed.len() as u32).to_le_bytes());
    hasher.update(seed.as_bytes());
    hasher.update(subsystem.as_bytes());

    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(bytes)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(1);
        let mut rng2 = DeterministicRng::new(2);

        let same = (0..100).filter(|_| rng1.next_u64() == rng2.next_u64()).count();
        assert!(same < 5);
    }

    #[test]
    fn test_next_int_range() {
        let mut rng = DeterministicRng::new(99);
        for _ in 0..1000 {
            let v = rng.next_int_range(-5, 5);
            assert!((-5..=5).contains(&v));
        }
        assert_eq!(rng.next_int_range(3, 3), 3);
    }

    #[test]
    fn test_next_unit_bounds() {
        let mut rng = DeterministicRng::new(7);
        for _ in 0..1000 {
            let v = rng.next_unit();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_next_in_ring() {
        let mut rng = DeterministicRng::new(8);
        let center = Vec2::new(100.0, 100.0);
        for _ in 0..200 {
            let p = rng.next_in_ring(center, 20.0, 50.0);
            let d = p.distance(center);
            assert!(d >= 20.0 - 1e-9 && d < 50.0 + 1e-9);
        }
    }

    #[test]
    fn test_shuffle_determinism() {
        let mut a: Vec<u32> = (0..20).collect();
        let mut b = a.clone();
        DeterministicRng::new(4).shuffle(&mut a);
        DeterministicRng::new(4).shuffle(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_subsystem_seeds_are_independent() {
        let ai = derive_subsystem_seed("prototype", "ai");
        let loot = derive_subsystem_seed("prototype", "loot");
        assert_ne!(ai, loot);
        assert_eq!(ai, derive_subsystem_seed("prototype", "ai"));
        assert_ne!(ai, derive_subsystem_seed("other", "ai"));
    }

    #[test]
    fn test_subsystem_rngs_from_seed() {
        let mut a = SubsystemRngs::from_seed("prototype");
        let mut b = SubsystemRngs::from_seed("prototype");
        assert_eq!(a.ai.next_u64(), b.ai.next_u64());
        assert_eq!(a.loot.next_u64(), b.loot.next_u64());
        assert_eq!(a.world_gen.next_u64(), b.world_gen.next_u64());
    }

    #[test]
    fn test_state_checkpoint() {
        let mut rng = DeterministicRng::new(5555);

        for _ in 0..50 {
            rng.next_u64();
        }

        let saved_state = rng.state();
        let next_values: Vec<u64> = (0..10).map(|_| rng.next_u64()).collect();
        rng.set_state(saved_state);

        for expected in next_values {
            assert_eq!(rng.next_u64(), expected);
        }
    }
}
