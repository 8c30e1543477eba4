//! Named Abilities
//!
//! Each ability maps to one effect type and a cooldown. Using an ability
//! stamps the cooldown and enqueues an effect intent whose geometry is
//! turned to the actor's facing.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::units::ticks_from_millis;
use crate::game::effects::{EffectIntent, EffectManager};
use crate::game::state::{Actor, Facing};
use crate::journal::lifecycle::GeometryView;

/// Ability cooldowns in milliseconds.
pub const ABILITY_COOLDOWNS_MS: [u64; 2] = [
    400, // Attack
    650, // Fireball
];

/// Ability identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    /// Melee swing in front of the actor.
    Attack = 0,
    /// Linear projectile.
    Fireball = 1,
}

impl Ability {
    /// Every ability.
    pub const ALL: [Ability; 2] = [Ability::Attack, Ability::Fireball];

    /// Parse an action name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "attack" => Some(Ability::Attack),
            "fireball" => Some(Ability::Fireball),
            _ => None,
        }
    }

    /// Action name.
    pub fn as_str(self) -> &'static str {
        match self {
            Ability::Attack => "attack",
            Ability::Fireball => "fireball",
        }
    }

    /// Effect type spawned on use.
    pub fn effect_type(self) -> &'static str {
        self.as_str()
    }

    /// Cooldown in ticks.
    pub fn cooldown_ticks(self) -> u64 {
        ticks_from_millis(ABILITY_COOLDOWNS_MS[self as usize])
    }
}

/// True when `ability` may fire at `tick`.
pub fn is_ready(actor: &Actor, ability: Ability, tick: u64) -> bool {
    actor
        .cooldowns
        .get(&ability)
        .map_or(true, |&last| tick >= last + ability.cooldown_ticks())
}

/// Turn right-facing geometry toward `facing`.
///
/// Offsets rotate with the facing; vertical facings swap width and height
/// so rectangles stay axis-aligned.
pub fn oriented_geometry(base: &GeometryView, facing: Facing) -> GeometryView {
    let mut geometry = base.clone();
    let (ox, oy) = (base.offset_x, base.offset_y);
    let (offset, rotation) = match facing {
        Facing::Right => ((ox, oy), 0),
        Facing::Down => ((-oy, ox), 90),
        Facing::Left => ((-ox, -oy), 180),
        Facing::Up => ((oy, -ox), 270),
    };
    geometry.offset_x = offset.0;
    geometry.offset_y = offset.1;
    geometry.rotation = (base.rotation + rotation).rem_euclid(360);
    if facing.is_vertical() {
        std::mem::swap(&mut geometry.width, &mut geometry.height);
    }
    geometry
}

/// Fire an ability. Returns the reserved effect ID, or `None` while the
/// ability is cooling down.
pub fn use_ability(actor: &mut Actor, ability: Ability, tick: u64, effects: &mut EffectManager) -> Option<String> {
    if !is_ready(actor, ability, tick) {
        debug!(actor = %actor.id, ability = ability.as_str(), tick, "ability on cooldown");
        return None;
    }
    actor.cooldowns.insert(ability, tick);

    let mut intent = EffectIntent::new(ability.effect_type(), &actor.id).toward(actor.facing.unit());
    if let Some(definition) = effects.registry().get(ability.effect_type()) {
        intent = intent.with_geometry(oriented_geometry(&definition.geometry, actor.facing));
    }
    Some(effects.enqueue(intent))
}
