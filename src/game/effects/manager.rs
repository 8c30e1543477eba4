//! Effect Manager
//!
//! Owns every live [`EffectInstance`]. One call to [`EffectManager::run_tick`]
//! does, in order:
//!
//! ```text
//! 1. drain the intent queue → instantiate → OnSpawn → spawn events
//! 2. convert hook failures from the last tick into cancellations
//! 3. advance live instances in insertion order:
//!      OnTick → motion → static impact → actor hits (OnHit) → end policy
//! 4. flush spawns, then updates, then ends through the journal
//! 5. enqueue follow-up intents requested by hooks for the next tick
//! ```
//!
//! Per instance the emitted stream is `spawn (update*) end?`; the
//! per-instance `seq` is bumped right before each event is built.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::units::{dequantize, quantize};
use crate::core::vec2::{Vec2, EPSILON};
use crate::game::barrier;
use crate::game::effects::catalog::EffectRegistry;
use crate::game::effects::definition::{
    DeliveryKind, EffectDefinition, EndPolicy, EndReason, ImpactPolicy, MotionKind, UpdateField,
    PARAM_GRAVITY, PARAM_RANGE, PARAM_REHIT_TICKS, PARAM_SPEED,
};
use crate::game::effects::hooks::{run_hook, HookContext, HookError, HookFlow, HookId, HookOutput};
use crate::game::effects::shape::WorldShape;
use crate::game::effects::{ActorProbe, ArenaView, EffectIntent};
use crate::journal::lifecycle::{
    BehaviorView, DeliveryView, EffectEndEvent, EffectInstanceView, EffectSpawnEvent,
    EffectUpdateEvent, FollowMode, GeometryView, LifecycleEvent, LifecycleSink, MotionView,
};
use crate::journal::Journal;
use crate::telemetry::{
    Telemetry, EFFECT_HOOK_FAILED, EFFECT_INTENT_ORPHANED, EFFECT_INTENT_UNKNOWN_TYPE,
};
use crate::{COORD_SCALE, TILE_SIZE};

/// Convert a sub-unit parameter to world units.
fn world_units(value: i64) -> f64 {
    value as f64 * TILE_SIZE / COORD_SCALE as f64
}

// =============================================================================
// INSTANCE
// =============================================================================

/// A live effect.
#[derive(Debug, Clone)]
pub struct EffectInstance {
    /// Unique ID (`effect-{n}`).
    pub id: String,
    /// Definition.
    pub definition: Arc<EffectDefinition>,
    /// Owning actor.
    pub owner_id: String,
    /// How the anchor tracks actors.
    pub follow_mode: FollowMode,
    /// Actor followed or targeted.
    pub attached_actor_id: Option<String>,
    /// Tick of instantiation.
    pub spawn_tick: u64,
    /// Anchor in world units; the shape sits at `anchor + offset`.
    pub position: Vec2,
    /// Quantized geometry.
    pub geometry: GeometryView,
    /// World units per second.
    pub velocity: Vec2,
    /// World units travelled.
    pub travelled: f64,
    /// World units of range left.
    pub range: f64,
    /// Height above ground (parabolic).
    pub height: f64,
    /// Vertical speed (parabolic).
    pub vertical_velocity: f64,
    /// Downward acceleration (parabolic).
    pub gravity: f64,
    /// Lifetime in ticks; 0 is unlimited.
    pub lifetime: u64,
    /// Ticks left before expiry.
    pub ticks_remaining: u64,
    /// OnTick cadence.
    pub tick_every: u64,
    /// Resolved parameters.
    pub params: BTreeMap<String, i64>,
    /// Last tick each actor was hit.
    pub hit_actors: BTreeMap<String, u64>,
    /// Stack count.
    pub stacks: u32,
    /// Hits landed.
    pub hits: u32,
    /// Damage requested so far.
    pub accumulated_damage: i64,
    /// Per-instance event sequence.
    pub seq: u64,
    /// Spawn event was emitted.
    pub spawn_sent: bool,
    /// Bumped by the effect write barriers.
    pub version: u64,
    /// Ends at the next flush.
    pub pending_end: Option<EndReason>,
    /// A hook failed; cancel on the next tick.
    pub cancel_requested: bool,
}

impl EffectInstance {
    /// Parameter value.
    pub fn param(&self, key: &str) -> Option<i64> {
        self.params.get(key).copied()
    }

    /// Shape center in world units.
    pub fn shape_center(&self) -> Vec2 {
        self.position + Vec2::new(dequantize(self.geometry.offset_x), dequantize(self.geometry.offset_y))
    }

    /// Collision shape in world space.
    pub fn world_shape(&self) -> WorldShape {
        WorldShape::from_geometry(&self.geometry, self.shape_center())
    }

    /// Intent for an effect spawned where this one is.
    pub fn follow_up_intent(&self, type_id: &str) -> EffectIntent {
        let center = self.shape_center();
        EffectIntent::new(type_id, &self.owner_id).at(quantize(center.x), quantize(center.y))
    }

    /// Quantized delivery state.
    pub fn delivery_view(&self) -> DeliveryView {
        let motion = match self.definition.motion {
            MotionKind::None | MotionKind::Instant => None,
            kind => Some(MotionView {
                kind,
                velocity_x: quantize(self.velocity.x),
                velocity_y: quantize(self.velocity.y),
                travelled: quantize(self.travelled),
                range: quantize(self.range),
                height: quantize(self.height),
            }),
        };
        DeliveryView {
            x: quantize(self.position.x),
            y: quantize(self.position.y),
            geometry: self.geometry.clone(),
            motion,
        }
    }

    /// Behaviour counters.
    pub fn behavior_view(&self) -> BehaviorView {
        BehaviorView {
            ticks_remaining: self.ticks_remaining,
            stacks: self.stacks,
            hits: self.hits,
            accumulated_damage: self.accumulated_damage,
        }
    }

    /// Full state for spawns and keyframes.
    pub fn view(&self) -> EffectInstanceView {
        EffectInstanceView {
            id: self.id.clone(),
            definition_id: self.definition.type_id.clone(),
            owner_actor_id: self.owner_id.clone(),
            delivery_kind: self.definition.delivery,
            follow_mode: self.follow_mode,
            attached_actor_id: self.attached_actor_id.clone(),
            delivery: self.delivery_view(),
            behavior: self.behavior_view(),
            params: self.params.clone(),
            start_tick: self.spawn_tick,
            managed_by_client: self.definition.managed_by_client,
            client_effect: self.definition.client_effect.clone(),
        }
    }

    fn observed(&self) -> Observed {
        Observed {
            delivery: self.delivery_view(),
            counters: (self.stacks, self.hits, self.accumulated_damage),
            params: self.params.clone(),
        }
    }

    fn move_to(&mut self, position: Vec2, journal: &mut Journal) {
        barrier::set_effect_position(self, position, journal);
    }
}

/// Replicated state captured before an advance. The countdown is left out;
/// receivers derive it from the tick.
#[derive(Debug, PartialEq)]
struct Observed {
    delivery: DeliveryView,
    counters: (u32, u32, i64),
    params: BTreeMap<String, i64>,
}

enum HookRun {
    Continue,
    Cancel,
    Failed(HookId, HookError),
}

fn run_hooks(
    hooks: &[HookId],
    instance: &EffectInstance,
    tick: u64,
    now_ms: u64,
    arena: &ArenaView<'_>,
    target: Option<&ActorProbe>,
    out: &mut HookOutput,
) -> HookRun {
    let ctx = HookContext { instance, tick, now_ms, arena, target };
    for &hook in hooks {
        match run_hook(hook, &ctx, out) {
            Ok(HookFlow::Continue) => {}
            Ok(HookFlow::Cancel) => return HookRun::Cancel,
            Err(err) => return HookRun::Failed(hook, err),
        }
    }
    HookRun::Continue
}

fn report_hook_failure(instance: &EffectInstance, hook: HookId, err: &HookError, telemetry: &mut Telemetry) {
    telemetry.incr_labeled(EFFECT_HOOK_FAILED, "hook", hook.as_str());
    warn!(id = %instance.id, effect = %instance.definition.type_id, hook = hook.as_str(), error = %err, "effect hook failed");
}

// =============================================================================
// MANAGER
// =============================================================================

/// Intent queue and live instances.
#[derive(Debug)]
pub struct EffectManager {
    registry: Arc<EffectRegistry>,
    queue: VecDeque<EffectIntent>,
    instances: Vec<EffectInstance>,
    next_id: u64,
}

impl EffectManager {
    /// Create an empty manager.
    pub fn new(registry: Arc<EffectRegistry>) -> Self {
        Self {
            registry,
            queue: VecDeque::new(),
            instances: Vec::new(),
            next_id: 0,
        }
    }

    /// Definitions in use.
    pub fn registry(&self) -> &Arc<EffectRegistry> {
        &self.registry
    }

    /// Allocate an instance ID.
    pub fn reserve_id(&mut self) -> String {
        self.next_id += 1;
        format!("effect-{}", self.next_id)
    }

    /// Queue an intent for the next `run_tick`; returns the instance ID it
    /// will receive.
    pub fn enqueue(&mut self, mut intent: EffectIntent) -> String {
        let id = match &intent.reserved_id {
            Some(id) => id.clone(),
            None => {
                let id = self.reserve_id();
                intent.reserved_id = Some(id.clone());
                id
            }
        };
        self.queue.push_back(intent);
        id
    }

    /// Intents waiting for instantiation.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Live instances.
    pub fn live_count(&self) -> usize {
        self.instances.len()
    }

    /// Live instance by ID.
    pub fn instance(&self, id: &str) -> Option<&EffectInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// Live instances in insertion order.
    pub fn instances(&self) -> impl Iterator<Item = &EffectInstance> {
        self.instances.iter()
    }

    /// Views of every live instance, for keyframes.
    pub fn views(&self) -> Vec<EffectInstanceView> {
        self.instances.iter().map(EffectInstance::view).collect()
    }

    /// End an instance at the next `run_tick`. A still-queued intent is
    /// dropped without any event. Returns false for unknown IDs.
    pub fn request_end(&mut self, id: &str, reason: EndReason) -> bool {
        if let Some(instance) = self.instances.iter_mut().find(|i| i.id == id) {
            instance.pending_end.get_or_insert(reason);
            return true;
        }
        let before = self.queue.len();
        self.queue.retain(|intent| intent.reserved_id.as_deref() != Some(id));
        before != self.queue.len()
    }

    /// End an instance with reason `cancelled`.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.request_end(id, EndReason::Cancelled)
    }

    /// Set a parameter on a live instance through the write barrier.
    pub fn set_param(&mut self, id: &str, key: &str, value: i64, journal: &mut Journal) -> bool {
        match self.instances.iter_mut().find(|i| i.id == id) {
            Some(instance) => barrier::set_effect_param(instance, key, value, journal),
            None => false,
        }
    }

    /// End everything now and drop queued intents (shutdown).
    pub fn end_all(
        &mut self,
        tick: u64,
        reason: EndReason,
        journal: &mut Journal,
        telemetry: &mut Telemetry,
        sink: &mut dyn LifecycleSink,
    ) {
        self.queue.clear();
        for instance in &mut self.instances {
            instance.pending_end.get_or_insert(reason);
        }
        let ends = self.collect_ends(tick);
        flush(ends, journal, telemetry, sink);
    }

    /// Advance one tick. Returns the hits and mining requests for the world
    /// to apply; follow-up intents are already queued for the next tick.
    #[allow(clippy::too_many_arguments)]
    pub fn run_tick(
        &mut self,
        tick: u64,
        now_ms: u64,
        dt: f64,
        arena: &ArenaView<'_>,
        journal: &mut Journal,
        telemetry: &mut Telemetry,
        sink: &mut dyn LifecycleSink,
    ) -> HookOutput {
        let mut out = HookOutput::default();
        let mut spawns = Vec::new();
        let mut updates = Vec::new();

        // Failures from the previous tick become cancellations now
        for instance in &mut self.instances {
            if instance.cancel_requested {
                instance.pending_end.get_or_insert(EndReason::Cancelled);
            }
        }

        let queued: Vec<EffectIntent> = self.queue.drain(..).collect();
        for intent in queued {
            let Some(mut instance) = self.instantiate(intent, tick, arena, telemetry) else {
                continue;
            };
            let definition = instance.definition.clone();
            match run_hooks(&definition.hooks.on_spawn, &instance, tick, now_ms, arena, None, &mut out) {
                HookRun::Continue => {}
                HookRun::Cancel => {
                    instance.pending_end = Some(EndReason::Cancelled);
                }
                HookRun::Failed(hook, err) => {
                    report_hook_failure(&instance, hook, &err, telemetry);
                    instance.cancel_requested = true;
                }
            }
            if definition.replication.send_spawn {
                instance.seq += 1;
                instance.spawn_sent = true;
                spawns.push(LifecycleEvent::Spawn(EffectSpawnEvent {
                    seq: instance.seq,
                    journal_seq: 0,
                    tick,
                    instance: instance.view(),
                }));
            }
            self.instances.push(instance);
        }

        for instance in &mut self.instances {
            if instance.pending_end.is_some() || instance.cancel_requested {
                continue;
            }
            if let Some(update) = advance(instance, tick, now_ms, dt, arena, journal, telemetry, &mut out) {
                updates.push(update);
            }
        }

        let ends = self.collect_ends(tick);
        flush(spawns, journal, telemetry, sink);
        flush(updates, journal, telemetry, sink);
        flush(ends, journal, telemetry, sink);

        for intent in std::mem::take(&mut out.intents) {
            self.enqueue(intent);
        }
        out
    }

    fn instantiate(
        &mut self,
        intent: EffectIntent,
        tick: u64,
        arena: &ArenaView<'_>,
        telemetry: &mut Telemetry,
    ) -> Option<EffectInstance> {
        let Some(definition) = self.registry.get(&intent.type_id).cloned() else {
            telemetry.incr(EFFECT_INTENT_UNKNOWN_TYPE);
            debug!(effect = %intent.type_id, "intent for unknown effect type");
            return None;
        };

        let owner = arena.actor(&intent.source_actor_id);
        let target = intent.target_actor_id.as_deref().and_then(|id| arena.actor(id));

        let follow_mode = if intent.target_actor_id.is_some()
            && (definition.delivery == DeliveryKind::Target || definition.motion == MotionKind::Follow)
        {
            FollowMode::Target
        } else if definition.owner_anchored {
            FollowMode::Owner
        } else {
            FollowMode::None
        };

        let anchor = match (intent.origin, follow_mode) {
            (_, FollowMode::Target) => target.map(|t| t.position),
            (Some((x, y)), _) => Some(Vec2::new(dequantize(x), dequantize(y))),
            (None, _) => owner.map(|o| o.position),
        };
        let Some(anchor) = anchor else {
            telemetry.incr(EFFECT_INTENT_ORPHANED);
            debug!(effect = %intent.type_id, owner = %intent.source_actor_id, "intent lost its anchor");
            return None;
        };

        let mut params = definition.params.clone();
        params.extend(intent.params.iter().map(|(k, v)| (k.clone(), *v)));

        let direction = intent
            .direction
            .filter(|d| d.is_finite() && !d.is_zero())
            .map(Vec2::normalize)
            .or_else(|| owner.map(|o| o.facing.unit()))
            .unwrap_or(Vec2::RIGHT);

        let (velocity, range, vertical_velocity, gravity) = if definition.motion.travels() {
            let speed = world_units(params.get(PARAM_SPEED).copied().unwrap_or(0));
            let range = world_units(params.get(PARAM_RANGE).copied().unwrap_or(0));
            let gravity = world_units(params.get(PARAM_GRAVITY).copied().unwrap_or(0));
            let vz = if definition.motion == MotionKind::Parabolic && speed > EPSILON {
                gravity * (range / speed) / 2.0
            } else {
                0.0
            };
            (direction.scale(speed), range, vz, gravity)
        } else {
            (Vec2::ZERO, 0.0, 0.0, 0.0)
        };

        let lifetime = intent.duration_ticks.unwrap_or(definition.lifetime_ticks);
        let id = match intent.reserved_id {
            Some(id) => id,
            None => self.reserve_id(),
        };

        Some(EffectInstance {
            id,
            owner_id: intent.source_actor_id,
            follow_mode,
            attached_actor_id: match follow_mode {
                FollowMode::Target => intent.target_actor_id,
                _ => None,
            },
            spawn_tick: tick,
            position: anchor,
            geometry: intent.geometry.unwrap_or_else(|| definition.geometry.clone()),
            velocity,
            travelled: 0.0,
            range,
            height: 0.0,
            vertical_velocity,
            gravity,
            lifetime,
            ticks_remaining: lifetime,
            tick_every: intent.tick_every.unwrap_or(definition.tick_every).max(1),
            params,
            hit_actors: BTreeMap::new(),
            stacks: 1,
            hits: 0,
            accumulated_damage: 0,
            seq: 0,
            spawn_sent: false,
            version: 0,
            pending_end: None,
            cancel_requested: false,
            definition,
        })
    }

    /// Remove instances marked for end, keeping insertion order.
    fn collect_ends(&mut self, tick: u64) -> Vec<LifecycleEvent> {
        let mut ends = Vec::new();
        let instances = std::mem::take(&mut self.instances);
        for mut instance in instances {
            let Some(reason) = instance.pending_end else {
                self.instances.push(instance);
                continue;
            };
            debug!(id = %instance.id, effect = %instance.definition.type_id, reason = reason.as_str(), "effect ended");
            if instance.definition.replication.send_end {
                instance.seq += 1;
                ends.push(LifecycleEvent::End(EffectEndEvent {
                    id: instance.id,
                    seq: instance.seq,
                    journal_seq: 0,
                    tick,
                    reason,
                }));
            }
        }
        ends
    }
}

fn flush(
    events: Vec<LifecycleEvent>,
    journal: &mut Journal,
    telemetry: &mut Telemetry,
    sink: &mut dyn LifecycleSink,
) {
    for event in events {
        if let Some(accepted) = journal.record_lifecycle(event, telemetry) {
            sink.emit(&accepted);
        }
    }
}

/// Advance one instance; sets `pending_end` when it finishes and returns an
/// update event when replicated state changed.
#[allow(clippy::too_many_arguments)]
fn advance(
    instance: &mut EffectInstance,
    tick: u64,
    now_ms: u64,
    dt: f64,
    arena: &ArenaView<'_>,
    journal: &mut Journal,
    telemetry: &mut Telemetry,
    out: &mut HookOutput,
) -> Option<LifecycleEvent> {
    let definition = instance.definition.clone();
    let before = instance.observed();
    let age = tick.saturating_sub(instance.spawn_tick);
    let mut end: Option<EndReason> = None;
    let mut impact = false;
    let mut exhausted = false;
    let mut landed = true;

    if !definition.hooks.on_tick.is_empty() && age % instance.tick_every == 0 {
        match run_hooks(&definition.hooks.on_tick, instance, tick, now_ms, arena, None, out) {
            HookRun::Continue => {}
            HookRun::Cancel => end = Some(EndReason::Cancelled),
            HookRun::Failed(hook, err) => {
                report_hook_failure(instance, hook, &err, telemetry);
                instance.cancel_requested = true;
                return None;
            }
        }
    }

    if end.is_none() {
        match definition.motion {
            MotionKind::None | MotionKind::Instant => {
                if instance.follow_mode == FollowMode::Owner {
                    if let Some(owner) = arena.actor(&instance.owner_id) {
                        instance.move_to(owner.position, journal);
                    }
                }
            }
            MotionKind::Linear | MotionKind::Parabolic => {
                let parabolic = definition.motion == MotionKind::Parabolic;
                if parabolic {
                    landed = false;
                }
                if age > 0 {
                    let mut step = instance.velocity.scale(dt);
                    let length = step.length();
                    if length > instance.range {
                        step = step.scale(instance.range / length);
                    }
                    let moved = step.length();
                    instance.travelled += moved;
                    instance.range = (instance.range - moved).max(0.0);
                    let next = instance.position + step;
                    instance.move_to(next, journal);
                    exhausted = instance.range <= EPSILON;

                    if parabolic {
                        instance.height += instance.vertical_velocity * dt;
                        instance.vertical_velocity -= instance.gravity * dt;
                        if instance.height <= EPSILON || exhausted {
                            instance.height = 0.0;
                            landed = true;
                            impact = true;
                        }
                    }
                }
            }
            MotionKind::Follow => {
                match instance.attached_actor_id.as_deref().and_then(|id| arena.actor(id)) {
                    Some(actor) => instance.move_to(actor.position, journal),
                    None => end = Some(EndReason::OwnerLost),
                }
            }
        }
    }

    if end.is_none() && definition.motion.travels() && landed && !impact {
        let shape = instance.world_shape();
        impact = arena
            .obstacles
            .iter()
            .any(|o| o.blocks_movement() && shape.intersects_rect(&o.rect()));
    }

    if end.is_none() && landed && definition.delivery != DeliveryKind::Visual {
        let hits_before = instance.hits;
        match resolve_hits(instance, &definition, tick, now_ms, arena, out) {
            Ok(hit_impact) => {
                impact |= hit_impact;
                // on-impact ends on the first landed hit whatever the impact policy
                if definition.end_policy == EndPolicy::OnImpact && instance.hits > hits_before {
                    impact = true;
                }
            }
            Err((hook, err)) => {
                report_hook_failure(instance, hook, &err, telemetry);
                instance.cancel_requested = true;
                return update_event(instance, &definition, tick, before);
            }
        }
    }

    if end.is_none() {
        if impact {
            if let Some(follow_up) = &definition.explode_on_impact {
                out.intents.push(instance.follow_up_intent(follow_up));
            }
            end = Some(EndReason::Impact);
        } else if exhausted {
            end = Some(EndReason::Expired);
        }
    }

    if instance.lifetime > 0 && instance.ticks_remaining > 0 {
        instance.ticks_remaining -= 1;
        if instance.ticks_remaining == 0 && end.is_none() && definition.end_policy != EndPolicy::Manual {
            end = Some(EndReason::Expired);
        }
    }

    if end.is_none()
        && definition.end_policy == EndPolicy::OwnerLost
        && arena.actor(&instance.owner_id).is_none()
    {
        end = Some(EndReason::OwnerLost);
    }

    if end == Some(EndReason::Expired) && !definition.hooks.on_expire.is_empty() {
        if let HookRun::Failed(hook, err) =
            run_hooks(&definition.hooks.on_expire, instance, tick, now_ms, arena, None, out)
        {
            report_hook_failure(instance, hook, &err, telemetry);
        }
    }

    instance.pending_end = end;
    update_event(instance, &definition, tick, before)
}

/// Hit actors per the impact policy. `Ok(true)` means the instance impacted.
fn resolve_hits(
    instance: &mut EffectInstance,
    definition: &EffectDefinition,
    tick: u64,
    now_ms: u64,
    arena: &ArenaView<'_>,
    out: &mut HookOutput,
) -> Result<bool, (HookId, HookError)> {
    let shape = instance.world_shape();
    let center = shape.center();
    let rehit = instance.param(PARAM_REHIT_TICKS).filter(|r| *r > 0).map(|r| r as u64);
    let attached = match definition.delivery {
        DeliveryKind::Target => instance.attached_actor_id.clone(),
        _ => None,
    };

    let mut victims: Vec<&ActorProbe> = arena
        .actors
        .iter()
        .filter(|a| a.id != instance.owner_id)
        .filter(|a| attached.as_ref().map_or(true, |t| *t == a.id))
        .filter(|a| shape.intersects_circle(a.position, a.radius))
        .filter(|a| match instance.hit_actors.get(&a.id) {
            None => true,
            Some(&last) => rehit.is_some_and(|r| tick >= last + r),
        })
        .collect();

    match definition.impact {
        ImpactPolicy::FirstHit => {
            victims.sort_by(|a, b| {
                a.position
                    .distance_squared(center)
                    .total_cmp(&b.position.distance_squared(center))
                    .then_with(|| a.id.cmp(&b.id))
            });
            victims.truncate(1);
        }
        ImpactPolicy::Pierce => {
            let budget = definition.pierce.max(1) as usize;
            let room = budget.saturating_sub(instance.hit_actors.len());
            victims.truncate(room);
        }
        ImpactPolicy::AllInPath => {}
    }

    let mut impacted = false;
    for victim in victims {
        instance.hit_actors.insert(victim.id.clone(), tick);
        let first = out.hits.len();
        match run_hooks(&definition.hooks.on_hit, instance, tick, now_ms, arena, Some(victim), out) {
            HookRun::Continue => {}
            HookRun::Cancel => impacted = true,
            HookRun::Failed(hook, err) => return Err((hook, err)),
        }
        instance.hits += 1;
        instance.accumulated_damage += out.hits[first..]
            .iter()
            .map(|h| (-h.delta).max(0.0) as i64)
            .sum::<i64>();
        if definition.impact == ImpactPolicy::FirstHit {
            impacted = true;
        }
    }

    if definition.impact == ImpactPolicy::Pierce
        && instance.hit_actors.len() >= definition.pierce.max(1) as usize
    {
        impacted = true;
    }
    Ok(impacted)
}

fn update_event(
    instance: &mut EffectInstance,
    definition: &EffectDefinition,
    tick: u64,
    before: Observed,
) -> Option<LifecycleEvent> {
    let replication = &definition.replication;
    if !instance.spawn_sent || !replication.send_updates {
        return None;
    }
    let after = instance.observed();
    let delivery_changed = after.delivery != before.delivery;
    let behavior_changed = after.counters != before.counters;
    let params_changed = after.params != before.params;

    let full = replication.update_fields.is_empty();
    let send_delivery = full || (replication.allows(UpdateField::Delivery) && delivery_changed);
    let send_behavior = full || (replication.allows(UpdateField::Behavior) && behavior_changed);
    let send_params = full || (replication.allows(UpdateField::Params) && params_changed);

    let any_change = if full {
        delivery_changed || behavior_changed || params_changed
    } else {
        send_delivery || send_behavior || send_params
    };
    if !any_change {
        return None;
    }

    instance.seq += 1;
    Some(LifecycleEvent::Update(EffectUpdateEvent {
        id: instance.id.clone(),
        seq: instance.seq,
        journal_seq: 0,
        tick,
        delivery: send_delivery.then_some(after.delivery),
        behavior: send_behavior.then(|| instance.behavior_view()),
        params: send_params.then_some(after.params),
    }))
}
