//! AI executor: transitions, entry actions, per-decision actions.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::rng::DeterministicRng;
use crate::core::units::PLAYER_HALF;
use crate::core::vec2::Vec2;
use crate::game::ability::is_ready;
use crate::game::ai::config::{Action, AiTarget, CompiledAi, Condition, WaypointMode};
use crate::game::ai::{AiContext, Blackboard, Directive, SightingKind};
use crate::game::ai::AiLibrary;
use crate::game::state::{Actor, Archetype, Facing, Npc};
use crate::telemetry::{Telemetry, AI_DECISIONS_DEFERRED};

/// Decisions allowed per tick; the rest wait for the next tick.
pub const MAX_DECISIONS_PER_TICK: usize = 64;

/// Run every due NPC in ID order.
pub fn run(
    npcs: &mut BTreeMap<String, Npc>,
    library: &AiLibrary,
    ctx: &AiContext<'_>,
    rng: &mut DeterministicRng,
    telemetry: &mut Telemetry,
) -> Vec<(String, Directive)> {
    let mut directives = Vec::new();
    let mut decisions = 0;

    for (id, npc) in npcs.iter_mut() {
        if npc.actor.is_defeated() || npc.blackboard.next_decision_at > ctx.tick {
            continue;
        }
        if decisions >= MAX_DECISIONS_PER_TICK {
            telemetry.incr(AI_DECISIONS_DEFERRED);
            continue;
        }
        let Some(config) = library.get(npc.ai_config) else {
            continue;
        };
        decisions += 1;
        for directive in decide(npc, config, ctx, rng) {
            directives.push((id.clone(), directive));
        }
    }
    directives
}

/// One decision for one NPC.
pub fn decide(npc: &mut Npc, config: &CompiledAi, ctx: &AiContext<'_>, rng: &mut DeterministicRng) -> Vec<Directive> {
    let mut out = Vec::new();
    if config.states.is_empty() {
        return out;
    }
    let Npc { actor, blackboard, .. } = npc;

    let mut start = config.initial.min(config.states.len() - 1);
    if blackboard.state >= config.states.len() {
        warn!(npc = %actor.id, state = blackboard.state, "invalid AI state; resetting");
        blackboard.state = 0;
        blackboard.entered = false;
        start = 0;
    }
    if !blackboard.entered {
        enter(actor, blackboard, config, start, ctx, rng);
    }

    let moved = actor.position.distance(blackboard.last_position);
    blackboard.last_position = actor.position;

    let transitions = &config.states[blackboard.state].transitions;
    for &(condition, to) in transitions {
        if evaluate(condition, actor, blackboard, ctx, moved) {
            debug!(
                npc = %actor.id,
                from = %config.states[blackboard.state].name,
                to = %config.states[to].name,
                tick = ctx.tick,
                "AI transition"
            );
            enter(actor, blackboard, config, to, ctx, rng);
            break;
        }
    }

    let state = &config.states[blackboard.state];
    for action in &state.actions {
        if let Some(directive) = perform(*action, actor, blackboard, ctx) {
            out.push(directive);
        }
    }
    blackboard.next_decision_at = ctx.tick + state.tick_every;
    out
}

fn enter(
    actor: &Actor,
    blackboard: &mut Blackboard,
    config: &CompiledAi,
    state: usize,
    ctx: &AiContext<'_>,
    rng: &mut DeterministicRng,
) {
    blackboard.state = state;
    blackboard.state_entered_tick = ctx.tick;
    blackboard.entered = true;
    blackboard.stuck_counter = 0;

    let compiled = &config.states[state];
    for action in &compiled.on_enter {
        match *action {
            Action::SetTimer(duration) => {
                blackboard.wait_until = ctx.tick + duration.unwrap_or(compiled.duration_ticks);
            }
            Action::SetWaypoint(mode) => {
                let len = blackboard.waypoints.len();
                if len > 0 {
                    blackboard.waypoint_index = match mode {
                        WaypointMode::Advance => (blackboard.waypoint_index + 1) % len,
                        WaypointMode::Index(i) => i.min(len - 1),
                    };
                }
            }
            Action::SetRandomDestination { radius, min_radius } => {
                let point = rng.next_in_ring(blackboard.home, min_radius, radius);
                blackboard.destination = Some(ctx.bounds.clamp(point, PLAYER_HALF));
            }
            Action::MoveAway { distance, min_distance } => {
                let threat = blackboard
                    .target_actor_id
                    .as_deref()
                    .and_then(|id| ctx.actor(id))
                    .map(|s| s.position);
                if let Some(threat) = threat {
                    let away = actor.position - threat;
                    let direction = if away.is_zero() { Vec2::RIGHT } else { away.normalize() };
                    let span = if distance > min_distance {
                        rng.next_range(min_distance, distance)
                    } else {
                        distance
                    };
                    let point = actor.position + direction.scale(span);
                    blackboard.destination = Some(ctx.bounds.clamp(point, PLAYER_HALF));
                }
            }
            _ => {}
        }
    }
}

fn evaluate(
    condition: Condition,
    actor: &Actor,
    blackboard: &mut Blackboard,
    ctx: &AiContext<'_>,
    moved: f64,
) -> bool {
    match condition {
        Condition::ReachedWaypoint(radius) => blackboard
            .destination
            .or_else(|| blackboard.waypoint())
            .is_some_and(|goal| actor.position.distance(goal) <= radius),
        Condition::TimerExpired => ctx.tick >= blackboard.wait_until,
        Condition::PlayerWithin(radius) => {
            track_nearest(actor, blackboard, ctx, radius, |kind| kind == SightingKind::Player)
        }
        Condition::NonRatWithin(radius) => {
            track_nearest(actor, blackboard, ctx, radius, |kind| kind != SightingKind::Npc(Archetype::Rat))
        }
        Condition::LostSight(radius) => {
            let visible = blackboard
                .target_actor_id
                .as_deref()
                .and_then(|id| ctx.actor(id))
                .is_some_and(|s| s.position.distance(actor.position) <= radius);
            if !visible {
                blackboard.target_actor_id = None;
            }
            !visible
        }
        Condition::CooldownReady(ability) => is_ready(actor, ability, ctx.tick),
        Condition::Stuck { epsilon, decisions } => {
            if moved < epsilon {
                blackboard.stuck_counter += 1;
            } else {
                blackboard.stuck_counter = 0;
            }
            blackboard.stuck_counter >= decisions
        }
    }
}

/// Track the nearest matching actor within `radius`; ties go to the lower ID.
fn track_nearest<F>(actor: &Actor, blackboard: &mut Blackboard, ctx: &AiContext<'_>, radius: f64, accept: F) -> bool
where
    F: Fn(SightingKind) -> bool,
{
    let r2 = radius * radius;
    let mut best: Option<(f64, &str)> = None;
    for sighting in ctx.actors {
        if sighting.id == actor.id || !accept(sighting.kind) {
            continue;
        }
        let d2 = sighting.position.distance_squared(actor.position);
        if d2 <= r2 && best.map_or(true, |(bd, _)| d2 < bd) {
            best = Some((d2, sighting.id.as_str()));
        }
    }
    match best {
        Some((_, id)) => {
            blackboard.target_actor_id = Some(id.to_string());
            true
        }
        None => false,
    }
}

fn target_point(target: AiTarget, blackboard: &Blackboard, ctx: &AiContext<'_>) -> Option<Vec2> {
    match target {
        AiTarget::Waypoint => blackboard.waypoint(),
        AiTarget::Player => blackboard
            .target_actor_id
            .as_deref()
            .and_then(|id| ctx.actor(id))
            .map(|s| s.position),
        AiTarget::Vector => blackboard.destination,
    }
}

fn perform(action: Action, actor: &Actor, blackboard: &mut Blackboard, ctx: &AiContext<'_>) -> Option<Directive> {
    match action {
        Action::MoveToward(target) => {
            if target == AiTarget::Waypoint {
                blackboard.destination = None;
            }
            target_point(target, blackboard, ctx).map(Directive::MoveTo)
        }
        Action::Stop => Some(Directive::Stop),
        Action::UseAbility(ability) => Some(Directive::UseAbility(ability)),
        Action::Face(target) => target_point(target, blackboard, ctx)
            .and_then(|point| Facing::from_vector(point - actor.position))
            .map(Directive::Face),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ability::Ability;
    use crate::game::ai::Sighting;
    use crate::game::collision::Bounds;

    const BOUNDS: Bounds = Bounds { width: 4000.0, height: 4000.0 };

    fn goblin(library: &AiLibrary) -> Npc {
        let config = library.index_of(Archetype::Goblin).unwrap();
        Npc::new(
            "npc-goblin-1",
            Archetype::Goblin,
            config,
            Vec2::new(400.0, 400.0),
            vec![Vec2::new(400.0, 400.0), Vec2::new(600.0, 400.0)],
        )
    }

    fn player_at(x: f64, y: f64) -> Sighting {
        Sighting { id: "p1".to_string(), position: Vec2::new(x, y), kind: SightingKind::Player }
    }

    fn state_name<'a>(library: &'a AiLibrary, npc: &Npc) -> &'a str {
        &library.get(npc.ai_config).unwrap().states[npc.blackboard.state].name
    }

    #[test]
    fn test_goblin_waits_then_patrols() {
        let library = AiLibrary::builtin().unwrap();
        let mut npc = goblin(&library);
        let mut rng = DeterministicRng::new(1);
        let config = library.get(npc.ai_config).unwrap().clone();

        // Spawned on waypoint 0: straight into wait, route advanced
        let ctx = AiContext { tick: 1, actors: &[], bounds: BOUNDS };
        let out = decide(&mut npc, &config, &ctx, &mut rng);
        assert_eq!(state_name(&library, &npc), "wait");
        assert_eq!(npc.blackboard.waypoint_index, 1);
        assert_eq!(out, vec![Directive::Stop]);

        // Timer runs 30 ticks
        let ctx = AiContext { tick: 30, actors: &[], bounds: BOUNDS };
        decide(&mut npc, &config, &ctx, &mut rng);
        assert_eq!(state_name(&library, &npc), "wait");

        let ctx = AiContext { tick: 31, actors: &[], bounds: BOUNDS };
        let out = decide(&mut npc, &config, &ctx, &mut rng);
        assert_eq!(state_name(&library, &npc), "patrol");
        assert_eq!(out, vec![Directive::MoveTo(Vec2::new(600.0, 400.0))]);
    }

    #[test]
    fn test_goblin_pursues_and_loses_sight() {
        let library = AiLibrary::builtin().unwrap();
        let mut npc = goblin(&library);
        let mut rng = DeterministicRng::new(1);
        let config = library.get(npc.ai_config).unwrap().clone();

        let near = [player_at(400.0, 200.0)];
        let ctx = AiContext { tick: 1, actors: &near, bounds: BOUNDS };
        let out = decide(&mut npc, &config, &ctx, &mut rng);
        assert_eq!(state_name(&library, &npc), "pursue");
        assert_eq!(npc.blackboard.target_actor_id.as_deref(), Some("p1"));
        assert_eq!(out, vec![Directive::Face(Facing::Up), Directive::MoveTo(Vec2::new(400.0, 200.0))]);

        let far = [player_at(400.0, 0.0)];
        let ctx = AiContext { tick: 2, actors: &far, bounds: BOUNDS };
        decide(&mut npc, &config, &ctx, &mut rng);
        assert_eq!(state_name(&library, &npc), "patrol");
        assert!(npc.blackboard.target_actor_id.is_none());
    }

    #[test]
    fn test_goblin_strikes_in_reach() {
        let library = AiLibrary::builtin().unwrap();
        let mut npc = goblin(&library);
        let mut rng = DeterministicRng::new(1);
        let config = library.get(npc.ai_config).unwrap().clone();

        let close = [player_at(430.0, 400.0)];
        let ctx = AiContext { tick: 1, actors: &close, bounds: BOUNDS };
        decide(&mut npc, &config, &ctx, &mut rng);
        let ctx = AiContext { tick: 2, actors: &close, bounds: BOUNDS };
        let out = decide(&mut npc, &config, &ctx, &mut rng);
        assert_eq!(state_name(&library, &npc), "strike");
        assert!(out.contains(&Directive::UseAbility(Ability::Attack)));
        assert!(out.contains(&Directive::Face(Facing::Right)));
    }

    #[test]
    fn test_rat_flees_from_player() {
        let library = AiLibrary::builtin().unwrap();
        let config_idx = library.index_of(Archetype::Rat).unwrap();
        let config = library.get(config_idx).unwrap().clone();
        let mut rat = Npc::new("npc-rat-1", Archetype::Rat, config_idx, Vec2::new(500.0, 500.0), Vec::new());
        let mut rng = DeterministicRng::new(9);

        let threat = [player_at(450.0, 500.0)];
        let ctx = AiContext { tick: 1, actors: &threat, bounds: BOUNDS };
        let out = decide(&mut rat, &config, &ctx, &mut rng);
        assert_eq!(state_name(&library, &rat), "flee");
        let Some(Directive::MoveTo(goal)) = out.first().copied() else { panic!("expected a move") };
        assert!(goal.x > 500.0 + 119.0);
    }

    #[test]
    fn test_cadence_and_invalid_state() {
        let library = AiLibrary::builtin().unwrap();
        let mut npcs = BTreeMap::new();
        let mut npc = goblin(&library);
        npc.blackboard.state = 99;
        npc.blackboard.entered = true;
        npcs.insert(npc.actor.id.clone(), npc);

        let mut rng = DeterministicRng::new(1);
        let mut telemetry = Telemetry::new();
        let ctx = AiContext { tick: 5, actors: &[], bounds: BOUNDS };
        run(&mut npcs, &library, &ctx, &mut rng, &mut telemetry);
        let npc = &npcs["npc-goblin-1"];
        assert!(npc.blackboard.state < library.get(npc.ai_config).unwrap().states.len());
        assert_eq!(npc.blackboard.next_decision_at, 6);
    }

    #[test]
    fn test_decision_cap_defers() {
        let library = AiLibrary::builtin().unwrap();
        let config = library.index_of(Archetype::Rat).unwrap();
        let mut npcs = BTreeMap::new();
        for i in 0..(MAX_DECISIONS_PER_TICK + 6) {
            let id = format!("npc-rat-{i:03}");
            npcs.insert(id.clone(), Npc::new(&id, Archetype::Rat, config, Vec2::new(200.0, 200.0), Vec::new()));
        }
        let mut rng = DeterministicRng::new(1);
        let mut telemetry = Telemetry::new();
        let ctx = AiContext { tick: 1, actors: &[], bounds: BOUNDS };
        run(&mut npcs, &library, &ctx, &mut rng, &mut telemetry);
        assert_eq!(telemetry.counter(AI_DECISIONS_DEFERRED), 6);
        assert_eq!(npcs["npc-rat-069"].blackboard.next_decision_at, 0);
    }
}
