//! Layered Stats
//!
//! Four primary stats aggregated across six modifier layers:
//!
//! ```text
//! Base → Permanent → Equipment → Temporary → Environment → Admin
//! ```
//!
//! Within a layer sources fold in `(kind, id)` order: add, then multiply,
//! then apply overrides. Derived values are pure functions of the totals.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use serde::{Serialize, Deserialize};

use crate::core::units::BASE_MOVE_SPEED;

/// Primary stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryStat {
    /// Physical power and health.
    Might,
    /// Spell power and mana.
    Resonance,
    /// Accuracy, casting and cooldowns.
    Focus,
    /// Movement and evasion.
    Speed,
}

impl PrimaryStat {
    /// All stats in index order.
    pub const ALL: [PrimaryStat; 4] = [
        PrimaryStat::Might,
        PrimaryStat::Resonance,
        PrimaryStat::Focus,
        PrimaryStat::Speed,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// One value per primary stat.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatVector(pub [f64; 4]);

impl StatVector {
    /// All zeros.
    pub const ZERO: Self = Self([0.0; 4]);

    /// All ones (multiplicative identity).
    pub const ONE: Self = Self([1.0; 4]);

    /// Build from individual values.
    pub const fn new(might: f64, resonance: f64, focus: f64, speed: f64) -> Self {
        Self([might, resonance, focus, speed])
    }

    /// Vector with one stat set and the rest zero.
    pub fn single(stat: PrimaryStat, value: f64) -> Self {
        let mut v = Self::ZERO;
        v[stat] = value;
        v
    }
}

impl Index<PrimaryStat> for StatVector {
    type Output = f64;

    fn index(&self, stat: PrimaryStat) -> &f64 {
        &self.0[stat.index()]
    }
}

impl IndexMut<PrimaryStat> for StatVector {
    fn index_mut(&mut self, stat: PrimaryStat) -> &mut f64 {
        &mut self.0[stat.index()]
    }
}

/// Modifier layers in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatLayer {
    /// Archetype baseline.
    Base,
    /// Long-lived progression.
    Permanent,
    /// Equipped items.
    Equipment,
    /// Expiring buffs and debuffs.
    Temporary,
    /// World-driven modifiers.
    Environment,
    /// Operator overrides.
    Admin,
}

impl StatLayer {
    /// Layers in resolution order.
    pub const ORDER: [StatLayer; 6] = [
        StatLayer::Base,
        StatLayer::Permanent,
        StatLayer::Equipment,
        StatLayer::Temporary,
        StatLayer::Environment,
        StatLayer::Admin,
    ];
}

/// Identifies one modifier source within a layer.
///
/// Field order gives the `(kind, id)` sort used for folding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    /// Source kind (e.g. `archetype`, `equipment`, `status`).
    pub kind: String,
    /// Source ID within the kind.
    pub id: String,
}

impl SourceKey {
    /// Create a key.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// Contribution of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatModifier {
    /// Added before multiplication.
    pub add: StatVector,
    /// Multiplier applied after the layer's adds.
    pub mul: StatVector,
    /// Replaces the stat outright when set.
    pub overrides: [Option<f64>; 4],
    /// Temporary layer only: removed once `tick >= expires_at_tick`.
    pub expires_at_tick: Option<u64>,
}

impl Default for StatModifier {
    fn default() -> Self {
        Self {
            add: StatVector::ZERO,
            mul: StatVector::ONE,
            overrides: [None; 4],
            expires_at_tick: None,
        }
    }
}

impl StatModifier {
    /// Purely additive modifier.
    pub fn additive(add: StatVector) -> Self {
        Self {
            add,
            ..Self::default()
        }
    }

    /// Purely multiplicative modifier.
    pub fn multiplicative(mul: StatVector) -> Self {
        Self {
            mul,
            ..Self::default()
        }
    }

    /// Override one stat.
    pub fn with_override(mut self, stat: PrimaryStat, value: f64) -> Self {
        self.overrides[stat.index()] = Some(value);
        self
    }

    /// Expire at `tick`.
    pub fn expiring_at(mut self, tick: u64) -> Self {
        self.expires_at_tick = Some(tick);
        self
    }
}

/// Values derived from primary totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedStats {
    /// Health cap.
    pub max_health: f64,
    /// Mana cap.
    pub max_mana: f64,
    /// Multiplier on physical damage dealt.
    pub physical_damage: f64,
    /// Multiplier on spell damage dealt.
    pub spell_damage: f64,
    /// Hit chance in [0, 1].
    pub accuracy: f64,
    /// Dodge chance in [0, 0.75].
    pub evasion: f64,
    /// Cast speed multiplier.
    pub cast_speed: f64,
    /// Cooldown recovery multiplier.
    pub cooldown_rate: f64,
    /// Stagger resistance in [0, 0.9].
    pub stagger_resist: f64,
    /// Movement speed in world units per second.
    pub move_speed: f64,
}

impl DerivedStats {
    /// Pure function of primary totals.
    pub fn from_totals(totals: &StatVector) -> Self {
        let might = totals[PrimaryStat::Might];
        let resonance = totals[PrimaryStat::Resonance];
        let focus = totals[PrimaryStat::Focus];
        let speed = totals[PrimaryStat::Speed];

        Self {
            max_health: (50.0 + might * 5.0).max(1.0),
            max_mana: (30.0 + resonance * 4.0).max(0.0),
            physical_damage: (1.0 + (might - 10.0) * 0.05).max(0.1),
            spell_damage: (1.0 + (resonance - 10.0) * 0.05).max(0.1),
            accuracy: (0.75 + focus * 0.01).clamp(0.0, 1.0),
            evasion: (speed * 0.01).clamp(0.0, 0.75),
            cast_speed: (1.0 + (focus - 10.0) * 0.02).max(0.25),
            cooldown_rate: (1.0 + (focus - 10.0) * 0.01).max(0.25),
            stagger_resist: (might * 0.02).clamp(0.0, 0.9),
            move_speed: (BASE_MOVE_SPEED * (1.0 + (speed - 10.0) * 0.04)).max(BASE_MOVE_SPEED * 0.25),
        }
    }
}

/// Layered stat aggregation for one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsComponent {
    layers: BTreeMap<StatLayer, BTreeMap<SourceKey, StatModifier>>,
    totals: StatVector,
    derived: DerivedStats,
    dirty: bool,
    last_resolve_tick: Option<u64>,
}

impl Default for StatsComponent {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsComponent {
    /// Empty component; resolves to all-zero totals.
    pub fn new() -> Self {
        Self {
            layers: BTreeMap::new(),
            totals: StatVector::ZERO,
            derived: DerivedStats::from_totals(&StatVector::ZERO),
            dirty: true,
            last_resolve_tick: None,
        }
    }

    /// Component with a base layer already resolved.
    pub fn with_base(kind: &str, id: &str, base: StatVector) -> Self {
        let mut stats = Self::new();
        stats.apply(StatLayer::Base, SourceKey::new(kind, id), StatModifier::additive(base));
        stats.recompute();
        stats
    }

    /// Insert or replace a source in a layer.
    pub fn apply(&mut self, layer: StatLayer, key: SourceKey, modifier: StatModifier) {
        self.layers.entry(layer).or_default().insert(key, modifier);
        self.dirty = true;
    }

    /// Remove a source; returns whether it existed.
    pub fn remove(&mut self, layer: StatLayer, key: &SourceKey) -> bool {
        let removed = self
            .layers
            .get_mut(&layer)
            .is_some_and(|sources| sources.remove(key).is_some());
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Remove every source of `kind` in a layer.
    pub fn remove_kind(&mut self, layer: StatLayer, kind: &str) {
        if let Some(sources) = self.layers.get_mut(&layer) {
            let before = sources.len();
            sources.retain(|key, _| key.kind != kind);
            if sources.len() != before {
                self.dirty = true;
            }
        }
    }

    /// Cull expired temporaries and recompute if anything changed.
    ///
    /// Returns true when totals were recomputed.
    pub fn resolve(&mut self, tick: u64) -> bool {
        if !self.dirty && self.last_resolve_tick == Some(tick) {
            return false;
        }

        if let Some(temporary) = self.layers.get_mut(&StatLayer::Temporary) {
            let before = temporary.len();
            temporary.retain(|_, m| m.expires_at_tick.map_or(true, |at| at > tick));
            if temporary.len() != before {
                self.dirty = true;
            }
        }

        self.last_resolve_tick = Some(tick);
        if !self.dirty {
            return false;
        }
        self.recompute();
        true
    }

    fn recompute(&mut self) {
        let mut value = StatVector::ZERO;

        for layer in StatLayer::ORDER {
            let Some(sources) = self.layers.get(&layer) else {
                continue;
            };
            // BTreeMap iteration is the (kind, id) order
            for modifier in sources.values() {
                for stat in PrimaryStat::ALL {
                    value[stat] += modifier.add[stat];
                }
            }
            for modifier in sources.values() {
                for stat in PrimaryStat::ALL {
                    value[stat] *= modifier.mul[stat];
                }
            }
            for modifier in sources.values() {
                for stat in PrimaryStat::ALL {
                    if let Some(v) = modifier.overrides[stat.index()] {
                        value[stat] = v;
                    }
                }
            }
        }

        self.totals = value;
        self.derived = DerivedStats::from_totals(&value);
        self.dirty = false;
    }

    /// Resolved primary totals.
    pub fn totals(&self) -> &StatVector {
        &self.totals
    }

    /// Resolved derived values.
    pub fn derived(&self) -> &DerivedStats {
        &self.derived
    }

    /// True when an apply/remove has not been resolved yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base() -> StatsComponent {
        StatsComponent::with_base("archetype", "player", StatVector::new(10.0, 10.0, 10.0, 10.0))
    }

    #[test]
    fn test_base_derived() {
        let stats = base();
        assert_eq!(stats.derived().max_health, 100.0);
        assert_eq!(stats.derived().physical_damage, 1.0);
        assert_eq!(stats.derived().move_speed, BASE_MOVE_SPEED);
    }

    #[test]
    fn test_layer_order() {
        let mut stats = base();
        // Equipment adds after base; Temporary doubles the result
        stats.apply(
            StatLayer::Temporary,
            SourceKey::new("status", "rage"),
            StatModifier::multiplicative(StatVector::new(2.0, 1.0, 1.0, 1.0)),
        );
        stats.apply(
            StatLayer::Equipment,
            SourceKey::new("equipment", "main-hand"),
            StatModifier::additive(StatVector::single(PrimaryStat::Might, 2.0)),
        );
        assert!(stats.resolve(1));
        assert_eq!(stats.totals()[PrimaryStat::Might], 24.0);
    }

    #[test]
    fn test_add_then_mul_then_override() {
        let mut stats = base();
        stats.apply(
            StatLayer::Permanent,
            SourceKey::new("a", "1"),
            StatModifier::additive(StatVector::single(PrimaryStat::Focus, 5.0)),
        );
        stats.apply(
            StatLayer::Permanent,
            SourceKey::new("b", "1"),
            StatModifier::multiplicative(StatVector::new(1.0, 1.0, 2.0, 1.0)),
        );
        stats.resolve(1);
        assert_eq!(stats.totals()[PrimaryStat::Focus], 30.0);

        stats.apply(
            StatLayer::Admin,
            SourceKey::new("admin", "freeze"),
            StatModifier::default().with_override(PrimaryStat::Speed, 0.0),
        );
        stats.resolve(1);
        assert_eq!(stats.totals()[PrimaryStat::Speed], 0.0);
        assert!((stats.derived().move_speed - BASE_MOVE_SPEED * 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_temporary_expiry() {
        let mut stats = base();
        stats.apply(
            StatLayer::Temporary,
            SourceKey::new("status", "haste"),
            StatModifier::additive(StatVector::single(PrimaryStat::Speed, 5.0)).expiring_at(10),
        );
        stats.resolve(9);
        assert_eq!(stats.totals()[PrimaryStat::Speed], 15.0);
        assert!(stats.resolve(10));
        assert_eq!(stats.totals()[PrimaryStat::Speed], 10.0);
    }

    #[test]
    fn test_resolve_noop_when_clean() {
        let mut stats = base();
        stats.resolve(5);
        assert!(!stats.resolve(5));
        assert!(!stats.resolve(6));
        stats.apply(
            StatLayer::Base,
            SourceKey::new("archetype", "bonus"),
            StatModifier::additive(StatVector::single(PrimaryStat::Might, 1.0)),
        );
        assert!(stats.is_dirty());
        assert!(stats.resolve(6));
    }

    #[test]
    fn test_remove_kind() {
        let mut stats = base();
        stats.apply(
            StatLayer::Equipment,
            SourceKey::new("equipment", "head"),
            StatModifier::additive(StatVector::single(PrimaryStat::Might, 3.0)),
        );
        stats.resolve(1);
        stats.remove_kind(StatLayer::Equipment, "equipment");
        stats.resolve(1);
        assert_eq!(stats.totals()[PrimaryStat::Might], 10.0);
    }

    fn arb_modifier() -> impl Strategy<Value = StatModifier> {
        (
            prop::array::uniform4(-20.0f64..20.0),
            prop::array::uniform4(0.25f64..3.0),
            prop::option::of(0.0f64..50.0),
        )
            .prop_map(|(add, mul, over)| StatModifier {
                add: StatVector(add),
                mul: StatVector(mul),
                overrides: [over, None, None, None],
                expires_at_tick: None,
            })
    }

    proptest! {
        #[test]
        fn test_apply_order_commutes_within_layer(
            a in arb_modifier(),
            b in arb_modifier(),
            layer_idx in 0usize..6,
            id_a in "[a-z]{1,6}",
            id_b in "[a-z]{1,6}",
        ) {
            prop_assume!(id_a != id_b);
            let layer = StatLayer::ORDER[layer_idx];
            let key_a = SourceKey::new("src", id_a);
            let key_b = SourceKey::new("src", id_b);

            let mut first = base();
            first.apply(layer, key_a.clone(), a.clone());
            first.apply(layer, key_b.clone(), b.clone());
            first.resolve(1);

            let mut second = base();
            second.apply(layer, key_b, b);
            second.apply(layer, key_a, a);
            second.resolve(1);

            prop_assert_eq!(first.totals(), second.totals());
            prop_assert_eq!(first.derived(), second.derived());
        }
    }
}
