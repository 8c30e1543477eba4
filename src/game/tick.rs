//! Authoritative Simulation Tick
//!
//! One call to [`step`] advances the world exactly one tick and produces
//! exactly one journal frame. Phase order is fixed:
//!
//! 1. intake: sort commands by `(actor, arrival)`, drop malformed
//! 2. resolve stats
//! 3. AI executor over NPCs in ID order
//! 4. commands and AI directives become intents, paths and ability uses
//! 5. integrate movement and commit through the write barriers
//! 6. advance path followers
//! 7. advance status effects (lava contact applies burning)
//! 8. effect manager tick
//! 9. dispatch hits and mining
//! 10. remove defeated actors
//! 11. finalize the journal frame
//!
//! Iteration is over `BTreeMap`s or ID-sorted vectors throughout; all
//! randomness comes from the subsystem RNGs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::debug;
#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::core::units::PLAYER_ARRIVE_RADIUS;
use crate::core::vec2::Vec2;
use crate::game::ability::use_ability;
use crate::game::ai::{self, AiContext, Directive, Sighting, SightingKind};
use crate::game::barrier::{self, ActorRole};
use crate::game::collision::integrate_movement;
use crate::game::combat::apply_effect_hit;
use crate::game::effects::definition::EndReason;
use crate::game::effects::{ArenaView, HitRequest};
use crate::game::input::{intake, Command, ValidCommand};
use crate::game::nav::{Cell, FollowStep, NavGrid, PathFollower};
use crate::game::state::{Actor, Facing, HeartbeatInfo};
use crate::game::status::{advance_statuses, apply_status, StatusKind};
use crate::game::world::{actor_entry, World, WorldError};
use crate::journal::{Journal, JournalFrame, LifecycleSink};
use crate::telemetry::{Telemetry, PATH_PLAN_FAILED};
use crate::TICK_RATE;

/// Ticks between parity summaries in the log.
const PARITY_LOG_INTERVAL: u64 = TICK_RATE as u64 * 60;

/// Result of a tick.
#[derive(Debug, Clone)]
pub struct TickResult {
    /// The finalized journal frame.
    pub frame: Arc<JournalFrame>,
    /// Actors removed this tick, in ID order.
    pub defeated: Vec<String>,
}

/// Run one simulation tick.
///
/// `tick` must be greater than the previous call's; `dt` is normally
/// `1 / TICK_RATE`. `commands` are already bound to authenticated actors.
pub fn step(
    world: &mut World,
    tick: u64,
    now_ms: u64,
    dt: f64,
    commands: Vec<Command>,
    sink: &mut dyn LifecycleSink,
) -> Result<TickResult, WorldError> {
    if tick <= world.tick {
        return Err(WorldError::NonMonotonicTick { tick, last: world.tick });
    }
    world.tick = tick;

    // 1. Intake
    let accepted = {
        let players = &world.players;
        intake(commands, |id| players.contains_key(id), &mut world.telemetry)
    };

    // 2. Stats
    resolve_stats(world, tick);

    // 3. AI
    let directives = run_ai(world, tick);

    // 4. Commands and directives
    let occupied = occupied_cells(world);
    apply_commands(world, tick, accepted, &occupied);
    apply_directives(world, tick, directives, &occupied);

    // 5. Movement
    let lava_contacts = integrate_all(world, dt);
    world.collect_pickups();

    // 6. Path followers
    let occupied = occupied_cells(world);
    advance_paths(world, tick, &occupied);

    // 7. Statuses
    let mut hits = advance_all_statuses(world, tick, &lava_contacts);

    // 8. Effects
    let probes = world.actor_probes();
    let output = {
        let arena = ArenaView { actors: &probes, obstacles: &world.obstacles };
        world.effects.run_tick(tick, now_ms, dt, &arena, &mut world.journal, &mut world.telemetry, sink)
    };
    hits.extend(output.hits);

    // 9. Hits and mining
    dispatch_hits(world, tick, hits);
    for request in output.mining {
        world.strike_ore(&request.obstacle_id, &request.miner_id);
    }

    // 10. Defeat
    let defeated = remove_defeated(world);

    // 11. Finalize
    let keyframe = world.journal.keyframe_due(tick).then(|| world.snapshot());
    let frame = world.journal.finalize(tick, now_ms, keyframe, &mut world.telemetry);

    #[cfg(feature = "debug-tracing")]
    trace!(
        tick,
        sequence = frame.sequence,
        patches = frame.patches.len(),
        spawns = frame.lifecycle.spawns.len(),
        updates = frame.lifecycle.updates.len(),
        ends = frame.lifecycle.ends.len(),
        keyframe = frame.keyframe.is_some(),
        "tick finalized"
    );

    if tick % PARITY_LOG_INTERVAL == 0 {
        world.telemetry.log_parity_summary(tick);
    }

    Ok(TickResult { frame, defeated })
}

impl World {
    /// Advance one tick. See [`step`].
    pub fn step(
        &mut self,
        tick: u64,
        now_ms: u64,
        dt: f64,
        commands: Vec<Command>,
        sink: &mut dyn LifecycleSink,
    ) -> Result<TickResult, WorldError> {
        step(self, tick, now_ms, dt, commands, sink)
    }

    /// Terminal frame: every live effect ends with `mapChange` and queued
    /// intents are dropped. Nothing else is simulated.
    pub fn close_map(&mut self, tick: u64, now_ms: u64, sink: &mut dyn LifecycleSink) -> Result<Arc<JournalFrame>, WorldError> {
        if tick <= self.tick {
            return Err(WorldError::NonMonotonicTick { tick, last: self.tick });
        }
        self.tick = tick;
        self.effects
            .end_all(tick, EndReason::MapChange, &mut self.journal, &mut self.telemetry, sink);
        let frame = self.journal.finalize(tick, now_ms, None, &mut self.telemetry);
        debug!(tick, ends = frame.lifecycle.ends.len(), "map closed");
        Ok(frame)
    }
}

// =============================================================================
// PHASE 2: STATS
// =============================================================================

fn resolve_stats(world: &mut World, tick: u64) {
    let World { players, npcs, journal, .. } = world;
    let actors = players
        .values_mut()
        .map(|p| (&mut p.actor, ActorRole::Player))
        .chain(npcs.values_mut().map(|n| (&mut n.actor, ActorRole::Npc)));
    for (actor, role) in actors {
        if actor.stats.resolve(tick) {
            let max_health = actor.stats.derived().max_health;
            barrier::set_max_health(actor, role, max_health, journal);
        }
    }
}

// =============================================================================
// PHASE 3: AI
// =============================================================================

fn run_ai(world: &mut World, tick: u64) -> Vec<(String, Directive)> {
    let mut sightings: Vec<Sighting> = world
        .players
        .values()
        .filter(|p| !p.actor.is_defeated())
        .map(|p| Sighting { id: p.actor.id.clone(), position: p.actor.position, kind: SightingKind::Player })
        .chain(world.npcs.values().filter(|n| !n.actor.is_defeated()).map(|n| Sighting {
            id: n.actor.id.clone(),
            position: n.actor.position,
            kind: SightingKind::Npc(n.archetype),
        }))
        .collect();
    sightings.sort_by(|a, b| a.id.cmp(&b.id));

    let ctx = AiContext { tick, actors: &sightings, bounds: world.bounds };
    ai::run(&mut world.npcs, &world.ai, &ctx, &mut world.rngs.ai, &mut world.telemetry)
}

// =============================================================================
// PHASE 4: COMMANDS & DIRECTIVES
// =============================================================================

/// Navigation cell of every living actor.
fn occupied_cells(world: &World) -> BTreeMap<String, Cell> {
    world
        .players
        .values()
        .map(|p| &p.actor)
        .chain(world.npcs.values().map(|n| &n.actor))
        .filter(|a| !a.is_defeated())
        .map(|a| (a.id.clone(), world.nav.cell_of(a.position)))
        .collect()
}

/// Cells of everyone except `self_id`.
fn blockers(occupied: &BTreeMap<String, Cell>, self_id: &str) -> BTreeSet<Cell> {
    occupied
        .iter()
        .filter(|(id, _)| id.as_str() != self_id)
        .map(|(_, cell)| *cell)
        .collect()
}

/// Plan a path and seed the first intent. `None` when unreachable.
#[allow(clippy::too_many_arguments)]
fn plan(
    nav: &NavGrid,
    actor: &mut Actor,
    role: ActorRole,
    goal: Vec2,
    arrive_radius: f64,
    tick: u64,
    occupied: &BTreeMap<String, Cell>,
    journal: &mut Journal,
    telemetry: &mut Telemetry,
) -> Option<PathFollower> {
    let Some(path) = nav.find_path(actor.position, goal, &blockers(occupied, &actor.id)) else {
        telemetry.incr(PATH_PLAN_FAILED);
        debug!(actor = %actor.id, x = goal.x, y = goal.y, "no path");
        barrier::set_intent(actor, role, Vec2::ZERO, journal);
        return None;
    };
    let mut follower = PathFollower::new(path, goal, arrive_radius);
    follow(&mut follower, actor, role, tick, journal);
    Some(follower)
}

/// Advance a follower once and write the resulting intent and facing.
/// Returns the step for the caller to handle `Arrived` and `Replan`.
fn follow(follower: &mut PathFollower, actor: &mut Actor, role: ActorRole, tick: u64, journal: &mut Journal) -> FollowStep {
    let step = follower.advance(actor.position, tick);
    match step {
        FollowStep::Intent(direction) => {
            barrier::set_intent(actor, role, direction, journal);
            if let Some(facing) = Facing::from_vector(direction) {
                barrier::set_facing(actor, role, facing, journal);
            }
        }
        FollowStep::Arrived => {
            barrier::set_intent(actor, role, Vec2::ZERO, journal);
        }
        FollowStep::Replan => {}
    }
    step
}

fn apply_commands(world: &mut World, tick: u64, accepted: Vec<(String, ValidCommand)>, occupied: &BTreeMap<String, Cell>) {
    let World { players, effects, nav, journal, telemetry, .. } = world;
    let role = ActorRole::Player;

    for (id, command) in accepted {
        let Some(player) = players.get_mut(&id) else {
            continue;
        };
        if player.actor.is_defeated() {
            continue;
        }
        let actor = &mut player.actor;
        match command {
            ValidCommand::Move { intent, facing } => {
                player.last_input_tick = tick;
                if intent.is_zero() && player.path.is_some() {
                    continue;
                }
                player.path = None;
                barrier::set_intent(actor, role, intent, journal);
                barrier::set_facing(actor, role, facing, journal);
            }
            ValidCommand::Path { target } => {
                player.last_input_tick = tick;
                player.path = plan(nav, actor, role, target, PLAYER_ARRIVE_RADIUS, tick, occupied, journal, telemetry);
            }
            ValidCommand::CancelPath => {
                player.path = None;
                barrier::set_intent(actor, role, Vec2::ZERO, journal);
            }
            ValidCommand::UseAbility(ability) => {
                use_ability(actor, ability, tick, effects);
            }
            ValidCommand::Heartbeat { sent_at, rtt } => {
                player.last_heartbeat = Some(HeartbeatInfo { sent_at, received_tick: tick });
                if rtt.is_some() {
                    player.rtt_ms = rtt;
                }
            }
        }
    }
}

fn apply_directives(world: &mut World, tick: u64, directives: Vec<(String, Directive)>, occupied: &BTreeMap<String, Cell>) {
    let World { npcs, effects, nav, journal, telemetry, .. } = world;
    let role = ActorRole::Npc;

    for (id, directive) in directives {
        let Some(npc) = npcs.get_mut(&id) else {
            continue;
        };
        let actor = &mut npc.actor;
        match directive {
            Directive::MoveTo(goal) => {
                // Keep a plan that already heads to (nearly) the same place
                let keep = npc
                    .path
                    .as_ref()
                    .is_some_and(|f| f.goal.distance(goal) <= nav_tolerance());
                if !keep {
                    npc.path = plan(nav, actor, role, goal, ai::config::DEFAULT_REACHED_RADIUS, tick, occupied, journal, telemetry);
                }
            }
            Directive::Stop => {
                npc.path = None;
                barrier::set_intent(actor, role, Vec2::ZERO, journal);
            }
            Directive::Face(facing) => {
                barrier::set_facing(actor, role, facing, journal);
            }
            Directive::UseAbility(ability) => {
                use_ability(actor, ability, tick, effects);
            }
        }
    }
}

fn nav_tolerance() -> f64 {
    crate::core::units::NAV_CELL_SIZE / 2.0
}

// =============================================================================
// PHASE 5: MOVEMENT
// =============================================================================

/// Integrate every living actor on scratch positions, then commit. Returns
/// the IDs touching lava.
fn integrate_all(world: &mut World, dt: f64) -> Vec<String> {
    let World { players, npcs, obstacles, bounds, journal, .. } = world;
    let bounds = *bounds;

    let mut scratch = Vec::new();
    let actors = players
        .values()
        .map(|p| &p.actor)
        .chain(npcs.values().map(|n| &n.actor))
        .filter(|a| !a.is_defeated());
    for actor in actors {
        let result = integrate_movement(
            actor.position,
            actor.intent,
            actor.move_speed(),
            dt,
            actor.radius(),
            bounds,
            obstacles.as_slice(),
        );
        scratch.push((actor.id.clone(), result));
    }

    let mut lava = Vec::new();
    for (id, result) in scratch {
        if let Some((actor, role)) = actor_entry(players, npcs, &id) {
            barrier::set_position(actor, role, result.position, journal);
        }
        if result.touching_lava {
            lava.push(id);
        }
    }
    lava.sort();
    lava
}

// =============================================================================
// PHASE 6: PATH FOLLOWERS
// =============================================================================

fn advance_paths(world: &mut World, tick: u64, occupied: &BTreeMap<String, Cell>) {
    let World { players, npcs, nav, journal, telemetry, .. } = world;

    let entries = players
        .values_mut()
        .map(|p| (&mut p.actor, &mut p.path, ActorRole::Player))
        .chain(npcs.values_mut().map(|n| (&mut n.actor, &mut n.path, ActorRole::Npc)));

    for (actor, path, role) in entries {
        let Some(follower) = path.as_mut() else {
            continue;
        };
        match follow(follower, actor, role, tick, journal) {
            FollowStep::Intent(_) => {}
            FollowStep::Arrived => {
                *path = None;
            }
            FollowStep::Replan => {
                match nav.find_path(actor.position, follower.goal, &blockers(occupied, &actor.id)) {
                    Some(route) => {
                        debug!(actor = %actor.id, tick, "path replanned");
                        follower.replace_path(route);
                    }
                    None => {
                        telemetry.incr(PATH_PLAN_FAILED);
                        follower.mark_failed(tick);
                    }
                }
            }
        }
    }
}

// =============================================================================
// PHASE 7: STATUSES
// =============================================================================

fn advance_all_statuses(world: &mut World, tick: u64, lava_contacts: &[String]) -> Vec<HitRequest> {
    let World { players, npcs, effects, journal, .. } = world;
    let mut hits = Vec::new();

    for id in lava_contacts {
        if let Some((actor, _)) = actor_entry(players, npcs, id) {
            hits.extend(apply_status(actor, StatusKind::Burning, None, tick, effects, journal));
        }
    }

    let actors = players
        .values_mut()
        .map(|p| &mut p.actor)
        .chain(npcs.values_mut().map(|n| &mut n.actor));
    for actor in actors {
        if actor.statuses.is_empty() {
            continue;
        }
        hits.extend(advance_statuses(actor, tick, effects));
    }
    hits
}

// =============================================================================
// PHASE 9: HITS
// =============================================================================

fn dispatch_hits(world: &mut World, tick: u64, hits: Vec<HitRequest>) {
    let mut queue: VecDeque<HitRequest> = hits.into();
    while let Some(hit) = queue.pop_front() {
        let source_damage = hit
            .source_actor_id
            .as_deref()
            .and_then(|id| world.actor(id))
            .filter(|a| !a.is_defeated())
            .map(|a| a.stats.derived().physical_damage);

        let World { players, npcs, effects, journal, telemetry, .. } = world;
        let Some((actor, role)) = actor_entry(players, npcs, &hit.target_id) else {
            continue;
        };
        let outcome = apply_effect_hit(actor, role, &hit, source_damage, tick, effects, journal, telemetry);
        if let Some(follow_up) = outcome.follow_up {
            queue.push_back(follow_up);
        }
    }
}

// =============================================================================
// PHASE 10: DEFEAT
// =============================================================================

fn remove_defeated(world: &mut World) -> Vec<String> {
    let defeated: Vec<String> = world
        .players
        .values()
        .map(|p| &p.actor)
        .chain(world.npcs.values().map(|n| &n.actor))
        .filter(|a| a.is_defeated())
        .map(|a| a.id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    for id in &defeated {
        world.handle_defeat(id);
    }
    defeated
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::config::WorldConfig;
    use crate::core::units::{quantize, ticks_from_millis, MELEE_DURATION_MS, MELEE_REACH, PLAYER_HALF};
    use crate::game::effects::definition::DeliveryKind;
    use crate::game::effects::EffectRegistry;
    use crate::game::input::ClientCommand;
    use crate::game::items::GOLD;
    use crate::game::state::{Archetype, ItemStack, Obstacle, ObstacleKind};
    use crate::journal::{KeyframeError, LifecycleEvent, NoopSink, PatchKind, Replica};

    const DT: f64 = 1.0 / TICK_RATE as f64;

    fn empty_world() -> World {
        World::new(WorldConfig::empty(100.0, 100.0), Arc::new(EffectRegistry::builtin())).unwrap()
    }

    fn now(tick: u64) -> u64 {
        tick * 1000 / TICK_RATE as u64
    }

    fn run(world: &mut World, tick: u64, commands: Vec<Command>, events: &mut Vec<LifecycleEvent>) -> Arc<JournalFrame> {
        world.step(tick, now(tick), DT, commands, events).unwrap().frame
    }

    fn idle(world: &mut World, ticks: std::ops::RangeInclusive<u64>) -> Vec<Arc<JournalFrame>> {
        ticks.map(|t| world.step(t, now(t), DT, Vec::new(), &mut NoopSink).unwrap().frame).collect()
    }

    fn teleport(world: &mut World, id: &str, to: Vec2) {
        let World { players, npcs, journal, .. } = world;
        if let Some((actor, role)) = actor_entry(players, npcs, id) {
            barrier::set_position(actor, role, to, journal);
        }
    }

    fn state_name(world: &World, id: &str) -> String {
        let npc = world.npc(id).unwrap();
        world.ai.get(npc.ai_config).unwrap().states[npc.blackboard.state].name.clone()
    }

    #[test]
    fn test_non_monotonic_tick_rejected() {
        let mut world = empty_world();
        world.step(1, 0, DT, Vec::new(), &mut NoopSink).unwrap();
        let err = world.step(1, 0, DT, Vec::new(), &mut NoopSink).unwrap_err();
        assert!(matches!(err, WorldError::NonMonotonicTick { tick: 1, last: 1 }));
    }

    #[test]
    fn test_close_map_ends_live_effects() {
        let mut world = empty_world();
        world.join_at("p1", Vec2::new(200.0, 180.0)).unwrap();
        let mut events = Vec::new();
        let commands = vec![Command::new("p1", 0, ClientCommand::Action { name: "fireball".to_string() })];
        run(&mut world, 1, commands, &mut events);
        assert_eq!(world.effects().live_count(), 1);

        let frame = world.close_map(2, now(2), &mut events).unwrap();
        assert_eq!(frame.lifecycle.ends.len(), 1);
        assert_eq!(frame.lifecycle.ends[0].reason, EndReason::MapChange);
        assert_eq!(world.effects().live_count(), 0);
        assert!(world.close_map(2, now(2), &mut events).is_err());
    }

    #[test]
    fn test_one_frame_per_tick() {
        let mut world = empty_world();
        let frames = idle(&mut world, 1..=5);
        let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_melee_anchor() {
        let mut world = empty_world();
        world.join_at("p1", Vec2::new(200.0, 180.0)).unwrap();
        let mut events = Vec::new();

        let commands = vec![
            Command::new("p1", 0, ClientCommand::Input { dx: 0.0, dy: 0.0, facing: "right".to_string() }),
            Command::new("p1", 1, ClientCommand::Action { name: "attack".to_string() }),
        ];
        run(&mut world, 1, commands, &mut events);
        for tick in 2..=5 {
            run(&mut world, tick, Vec::new(), &mut events);
        }

        let spawns: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                LifecycleEvent::Spawn(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(spawns.len(), 1);
        let spawn = spawns[0];
        assert_eq!(spawn.tick, 1);
        assert_eq!(spawn.instance.definition_id, "attack");
        assert_eq!(spawn.instance.owner_actor_id, "p1");
        assert_eq!(spawn.instance.delivery_kind, DeliveryKind::Area);
        assert_eq!(spawn.instance.delivery.geometry.offset_x, quantize(PLAYER_HALF + MELEE_REACH / 2.0));
        assert_eq!(spawn.instance.delivery.geometry.offset_y, 0);
        assert!(spawn.instance.delivery.motion.is_none());

        let end = events
            .iter()
            .find_map(|e| match e {
                LifecycleEvent::End(end) if end.id == spawn.instance.id => Some(end),
                _ => None,
            })
            .expect("attack ends");
        assert!(end.tick <= spawn.tick + ticks_from_millis(MELEE_DURATION_MS));
    }

    #[test]
    fn test_burning_on_lava() {
        let mut world = empty_world();
        world.obstacles.push(Obstacle {
            id: "lava-0".to_string(),
            kind: ObstacleKind::Lava,
            x: 400.0,
            y: 400.0,
            width: 80.0,
            height: 80.0,
        });
        world.join_at("p1", Vec2::new(200.0, 180.0)).unwrap();
        let mut events = Vec::new();
        // The join frame carries the announced health; nothing burns before lava
        let joined = idle(&mut world, 1..=9);
        assert!(joined[1..]
            .iter()
            .all(|f| !f.patches.iter().any(|p| p.kind == PatchKind::PlayerHealth)));
        let mut frames = Vec::new();

        teleport(&mut world, "p1", Vec2::new(440.0, 440.0));
        frames.push(run(&mut world, 10, Vec::new(), &mut events));
        assert!(world.player("p1").unwrap().actor.statuses.contains_key(&StatusKind::Burning));

        teleport(&mut world, "p1", Vec2::new(200.0, 180.0));
        for tick in 11..=60 {
            frames.push(run(&mut world, tick, Vec::new(), &mut events));
        }

        let health_ticks: Vec<u64> = frames
            .iter()
            .filter(|f| f.patches.iter().any(|p| p.kind == PatchKind::PlayerHealth && p.entity_id == "p1"))
            .map(|f| f.tick)
            .collect();
        let expected: Vec<u64> = (10..55).step_by(3).collect();
        assert_eq!(health_ticks, expected);

        let visual = events
            .iter()
            .find_map(|e| match e {
                LifecycleEvent::Spawn(s) if s.instance.definition_id == "burning-visual" => Some(s),
                _ => None,
            })
            .expect("visual spawned");
        assert_eq!(visual.tick, 10);
        assert_eq!(visual.instance.attached_actor_id.as_deref(), Some("p1"));

        let end = events
            .iter()
            .find_map(|e| match e {
                LifecycleEvent::End(end) if end.id == visual.instance.id => Some(end),
                _ => None,
            })
            .expect("visual ended");
        assert_eq!((end.tick, end.reason), (55, EndReason::Expired));
        assert!(world.player("p1").unwrap().actor.statuses.is_empty());
    }

    #[test]
    fn test_goblin_patrol_pursue_patrol() {
        let mut world = empty_world();
        let id = "npc-goblin-001";
        world
            .spawn_npc(
                id,
                Archetype::Goblin,
                Vec2::new(400.0, 400.0),
                vec![Vec2::new(400.0, 400.0), Vec2::new(600.0, 400.0)],
            )
            .unwrap();

        let mut seen = BTreeSet::new();
        for tick in 1..=99 {
            world.step(tick, now(tick), DT, Vec::new(), &mut NoopSink).unwrap();
            seen.insert(state_name(&world, id));
        }
        assert!(seen.contains("patrol"));
        assert!(seen.contains("wait"));
        assert!(!seen.contains("pursue"));

        let goblin = world.npc(id).unwrap().actor.position;
        world.join_at("p1", goblin + Vec2::new(200.0, 0.0)).unwrap();
        world.step(100, now(100), DT, Vec::new(), &mut NoopSink).unwrap();
        assert_eq!(state_name(&world, id), "pursue");
        world.step(101, now(101), DT, Vec::new(), &mut NoopSink).unwrap();
        assert_eq!(state_name(&world, id), "pursue");
        assert_eq!(world.npc(id).unwrap().actor.facing, Facing::Right);

        let goblin = world.npc(id).unwrap().actor.position;
        teleport(&mut world, "p1", goblin + Vec2::new(1200.0, 0.0));
        world.step(102, now(102), DT, Vec::new(), &mut NoopSink).unwrap();
        assert_eq!(state_name(&world, id), "patrol");
        assert!(world.npc(id).unwrap().blackboard.target_actor_id.is_none());
    }

    #[test]
    fn test_ground_items_merge_across_drops() {
        let mut world = empty_world();
        world.spawn_npc("npc-rat-001", Archetype::Rat, Vec2::new(100.0, 100.0), Vec::new()).unwrap();

        world.grant_item("npc-rat-001", ItemStack::new(GOLD, 3));
        world.drop_all_inventory("npc-rat-001");
        let first = world.step(1, now(1), DT, Vec::new(), &mut NoopSink).unwrap().frame;

        world.grant_item("npc-rat-001", ItemStack::new(GOLD, 5));
        world.drop_all_inventory("npc-rat-001");
        let second = world.step(2, now(2), DT, Vec::new(), &mut NoopSink).unwrap().frame;

        let items: Vec<_> = world.ground_items().iter().collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 8);

        let quantity_patches = [first, second]
            .iter()
            .flat_map(|f| f.patches.iter())
            .filter(|p| p.kind == PatchKind::GroundItemQuantity)
            .count();
        assert_eq!(quantity_patches, 2);
    }

    #[test]
    fn test_keyframe_recovery_and_expiry() {
        let mut world = empty_world();
        world.join_at("p1", Vec2::new(200.0, 180.0)).unwrap();
        let commands = vec![Command::new("p1", 0, ClientCommand::Input { dx: 1.0, dy: 0.0, facing: "right".to_string() })];
        world.step(1, now(1), DT, commands, &mut NoopSink).unwrap();
        idle(&mut world, 2..=40);

        // Subscriber last saw sequence 20
        let recovery = world.recover(20, now(40)).unwrap();
        assert_eq!(recovery.keyframe.sequence, 15);
        let sequences: Vec<u64> = recovery.frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, (16..=40).collect::<Vec<_>>());

        idle(&mut world, 41..=200);
        let err = world.recover(2, now(200)).unwrap_err();
        assert!(matches!(err, KeyframeError::Expired { requested: 2 }));
    }

    #[test]
    fn test_replay_from_keyframe_matches_server() {
        let mut world = empty_world();
        world.join_at("p1", Vec2::new(200.0, 180.0)).unwrap();
        world.spawn_npc("npc-rat-001", Archetype::Rat, Vec2::new(600.0, 600.0), Vec::new()).unwrap();
        world.grant_item("npc-rat-001", ItemStack::new(GOLD, 2));

        let mut frames = Vec::new();
        for tick in 1..=50 {
            let commands = match tick {
                3 => vec![Command::new("p1", 0, ClientCommand::Path { x: 620.0, y: 560.0 })],
                20 => vec![Command::new("p1", 0, ClientCommand::Action { name: "attack".to_string() })],
                35 => {
                    world.drop_all_inventory("npc-rat-001");
                    Vec::new()
                }
                _ => Vec::new(),
            };
            frames.push(world.step(tick, now(tick), DT, commands, &mut NoopSink).unwrap().frame);
        }

        let server = Replica::from_keyframe(&world.snapshot());
        for keyframe_seq in world.journal().keyframe_sequences() {
            let keyframe = world.recover(keyframe_seq, now(50)).unwrap().keyframe;
            let mut replica = Replica::from_keyframe(&keyframe);
            for frame in &frames {
                replica.apply_frame(frame);
            }
            assert_eq!(replica.sequence, server.sequence);
            assert_eq!(replica.players, server.players, "players from keyframe {keyframe_seq}");
            assert_eq!(replica.npcs, server.npcs, "npcs from keyframe {keyframe_seq}");
            assert_eq!(replica.ground_items, server.ground_items);
            assert_eq!(replica.obstacles, server.obstacles);
        }
    }

    #[test]
    fn test_resync_after_lost_spawn() {
        let mut world = empty_world();
        world.join_at("p1", Vec2::new(200.0, 180.0)).unwrap();
        let mut events = Vec::new();

        let commands = vec![
            Command::new("p1", 0, ClientCommand::Input { dx: 0.0, dy: 0.0, facing: "right".to_string() }),
            Command::new("p1", 1, ClientCommand::Action { name: "fireball".to_string() }),
        ];
        let first = run(&mut world, 1, commands, &mut events);
        assert!(!first.resync);
        let fireball = first.lifecycle.spawns[0].instance.id.clone();

        world.journal_mut().forget_lifecycle(&fireball);
        let second = run(&mut world, 2, Vec::new(), &mut events);
        assert!(second.resync);
        assert!(second.keyframe.is_some());
        assert!(second.lifecycle.updates.iter().all(|u| u.id != fireball));
        assert_eq!(world.telemetry().counter(crate::telemetry::JOURNAL_UNKNOWN_ID_UPDATE), 1);
    }

    fn random_commands(rng: &mut StdRng, players: &[&str], arrival: &mut u64) -> Vec<Command> {
        const FACINGS: [&str; 4] = ["up", "down", "left", "right"];
        let mut commands = Vec::new();
        for id in players {
            *arrival += 1;
            let kind = match rng.gen_range(0..10) {
                0..=5 => ClientCommand::Input {
                    dx: rng.gen_range(-1.0..=1.0),
                    dy: rng.gen_range(-1.0..=1.0),
                    facing: FACINGS[rng.gen_range(0..4)].to_string(),
                },
                6 => ClientCommand::Path { x: rng.gen_range(0.0..4000.0), y: rng.gen_range(0.0..4000.0) },
                7 => ClientCommand::Action { name: "attack".to_string() },
                8 => ClientCommand::Action { name: "fireball".to_string() },
                _ => ClientCommand::CancelPath,
            };
            commands.push(Command::new(id, *arrival, kind));
        }
        commands
    }

    #[test]
    fn test_same_seed_and_commands_same_journal() {
        let registry = Arc::new(EffectRegistry::builtin());
        let mut a = World::new(WorldConfig::default(), registry.clone()).unwrap();
        let mut b = World::new(WorldConfig::default(), registry).unwrap();
        for world in [&mut a, &mut b] {
            world.join("p1").unwrap();
            world.join("p2").unwrap();
        }

        let mut rng = StdRng::seed_from_u64(7);
        let mut arrival = 0;
        let mut versions: BTreeMap<String, u64> = BTreeMap::new();
        for tick in 1..=120 {
            let commands = random_commands(&mut rng, &["p1", "p2"], &mut arrival);
            let fa = a.step(tick, now(tick), DT, commands.clone(), &mut NoopSink).unwrap();
            let fb = b.step(tick, now(tick), DT, commands, &mut NoopSink).unwrap();
            assert_eq!(fa.frame, fb.frame, "frames diverged at tick {tick}");

            for player in a.players().values() {
                let last = versions.insert(player.actor.id.clone(), player.actor.version).unwrap_or(0);
                assert!(player.actor.version >= last);
            }
        }
        assert_eq!(a.state_hash(), b.state_hash());
    }
}
