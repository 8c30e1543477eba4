//! Subscriber Broadcast
//!
//! Each subscriber gets a bounded `mpsc` channel drained by its connection's
//! writer task. The simulation task only ever calls `try_send`: when the
//! channel is full, messages wait in a backlog owned by the simulation task.
//! A full backlog drops its oldest non-keyframe message, counts it, and marks
//! the subscriber for a keyframe-carrying resync on the next frame.
//!
//! Keyframe requests are answered here too, rate limited per subscriber.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::journal::keyframe::ConfigSnapshot;
use crate::journal::{JournalFrame, Keyframe, KeyframeError, KeyframeRecovery};
use crate::network::protocol::{KeyframeNack, NackReason, ServerMessage, StateMessage};
use crate::telemetry::{Telemetry, BROADCAST_QUEUE_DROPPED, KEYFRAME_NACK};

/// Minimum spacing between one subscriber's keyframe requests.
pub const KEYFRAME_REQUEST_INTERVAL_MS: u64 = 250;

/// One encoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Sequence the message belongs to (0 for out-of-band replies).
    pub sequence: u64,
    /// Carries a keyframe; never dropped for backpressure while others remain.
    pub keyframe: bool,
    /// JSON text.
    pub text: Arc<str>,
}

impl Outbound {
    /// Encode a message.
    pub fn encode(message: &ServerMessage, sequence: u64) -> Result<Self, serde_json::Error> {
        let keyframe = match message {
            ServerMessage::Keyframe(_) => true,
            ServerMessage::State(state) => state.keyframe.is_some(),
            _ => false,
        };
        Ok(Self { sequence, keyframe, text: Arc::from(message.to_json()?) })
    }
}

/// Simulation-side end of one subscriber.
#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<Outbound>,
    backlog: VecDeque<Outbound>,
    backlog_capacity: usize,
    resync_needed: bool,
    last_keyframe_request_ms: Option<u64>,
}

impl Subscriber {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let subscriber = Self {
            tx,
            backlog: VecDeque::new(),
            backlog_capacity: capacity,
            resync_needed: false,
            last_keyframe_request_ms: None,
        };
        (subscriber, rx)
    }

    /// Move backlog into the channel while it has room.
    fn flush(&mut self) {
        while let Some(message) = self.backlog.pop_front() {
            match self.tx.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    self.backlog.push_front(message);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    return;
                }
            }
        }
    }

    /// Messages that can be accepted without dropping anything.
    fn room(&mut self) -> usize {
        self.flush();
        self.tx.capacity() + self.backlog_capacity.saturating_sub(self.backlog.len())
    }

    /// Enqueue without waiting. Returns how many messages were dropped.
    fn push(&mut self, message: Outbound) -> usize {
        if self.tx.is_closed() {
            self.backlog.clear();
            return 0;
        }
        self.flush();
        let message = if self.backlog.is_empty() {
            match self.tx.try_send(message) {
                Ok(()) => return 0,
                Err(TrySendError::Full(message)) => message,
                Err(TrySendError::Closed(_)) => return 0,
            }
        } else {
            message
        };

        let mut dropped = 0;
        while self.backlog.len() >= self.backlog_capacity {
            let victim = self.backlog.iter().position(|m| !m.keyframe).unwrap_or(0);
            self.backlog.remove(victim);
            dropped += 1;
        }
        self.backlog.push_back(message);
        if dropped > 0 {
            self.resync_needed = true;
        }
        dropped
    }

    /// Push and count drops.
    fn deliver(&mut self, id: &str, message: Outbound, telemetry: &mut Telemetry) {
        let dropped = self.push(message);
        if dropped > 0 {
            for _ in 0..dropped {
                telemetry.incr_labeled(BROADCAST_QUEUE_DROPPED, "subscriber", id);
            }
            debug!(subscriber = %id, dropped, "outbound queue overflow");
        }
    }
}

/// All subscribers of one session.
#[derive(Debug)]
pub struct Broadcaster {
    capacity: usize,
    subscribers: BTreeMap<String, Subscriber>,
}

impl Broadcaster {
    /// Create a broadcaster. Each subscriber's channel and backlog hold
    /// `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, subscribers: BTreeMap::new() }
    }

    /// Register a subscriber and return the receiving end of its channel.
    /// A previous subscription under the same ID is dropped, which ends its
    /// receiver.
    pub fn subscribe(&mut self, id: &str) -> mpsc::Receiver<Outbound> {
        let (subscriber, rx) = Subscriber::new(self.capacity);
        self.subscribers.insert(id.to_string(), subscriber);
        rx
    }

    /// Remove a subscriber. Its receiver yields what was already sent, then
    /// `None`.
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Subscriber count.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// True without subscribers.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Push one frame to everyone. Subscribers that overflowed since the
    /// last frame get this frame as a resync carrying `snapshot()` instead.
    pub fn publish<F>(&mut self, frame: &JournalFrame, mut snapshot: F, telemetry: &mut Telemetry)
    where
        F: FnMut() -> Keyframe,
    {
        if self.subscribers.is_empty() {
            return;
        }
        let state = StateMessage::from_frame(frame);
        let regular = match Outbound::encode(&ServerMessage::State(state.clone()), frame.sequence) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, sequence = frame.sequence, "state encode failed");
                return;
            }
        };
        let mut resync: Option<Outbound> = None;

        for (id, subscriber) in &mut self.subscribers {
            let needs_resync = std::mem::take(&mut subscriber.resync_needed);
            let message = if needs_resync && !regular.keyframe {
                if resync.is_none() {
                    let mut keyframe = snapshot();
                    keyframe.sequence = frame.sequence;
                    let message = ServerMessage::State(state.clone().with_resync(keyframe));
                    match Outbound::encode(&message, frame.sequence) {
                        Ok(encoded) => resync = Some(encoded),
                        Err(err) => warn!(error = %err, "resync encode failed"),
                    }
                }
                debug!(subscriber = %id, sequence = frame.sequence, "resync after overflow");
                resync.clone().unwrap_or_else(|| regular.clone())
            } else {
                regular.clone()
            };
            subscriber.deliver(id, message, telemetry);
        }
    }

    /// Answer a keyframe request: the keyframe and every later frame, or a
    /// nack. At most one request per subscriber per
    /// [`KEYFRAME_REQUEST_INTERVAL_MS`]. A reply that would not fit in the
    /// subscriber's channel and backlog is refused as expired; the client
    /// rebaselines from the attached config instead of receiving a reply
    /// with a hole in it.
    pub fn handle_keyframe_request<F>(
        &mut self,
        id: &str,
        sequence: u64,
        now_ms: u64,
        recover: F,
        config: ConfigSnapshot,
        telemetry: &mut Telemetry,
    ) -> Result<(), NackReason>
    where
        F: FnOnce(u64) -> Result<KeyframeRecovery, KeyframeError>,
    {
        let Some(subscriber) = self.subscribers.get_mut(id) else {
            return Ok(());
        };

        let limited = subscriber
            .last_keyframe_request_ms
            .is_some_and(|last| now_ms < last + KEYFRAME_REQUEST_INTERVAL_MS);
        if limited {
            nack(id, subscriber, sequence, NackReason::RateLimited, None, telemetry);
            return Err(NackReason::RateLimited);
        }
        subscriber.last_keyframe_request_ms = Some(now_ms);

        let recovery = match recover(sequence) {
            Ok(recovery) => recovery,
            Err(err) => {
                debug!(subscriber = %id, sequence, error = %err, "keyframe request missed");
                nack(id, subscriber, sequence, NackReason::Expired, Some(config), telemetry);
                return Err(NackReason::Expired);
            }
        };

        let keyframe_seq = recovery.keyframe.sequence;
        let mut messages = Vec::with_capacity(recovery.frames.len() + 1);
        messages.push(Outbound::encode(&ServerMessage::Keyframe(recovery.keyframe), keyframe_seq));
        for frame in &recovery.frames {
            messages.push(Outbound::encode(&ServerMessage::State(StateMessage::from_frame(frame)), frame.sequence));
        }
        let messages = match messages.into_iter().collect::<Result<Vec<_>, _>>() {
            Ok(messages) => messages,
            Err(err) => {
                warn!(error = %err, "keyframe reply encode failed");
                nack(id, subscriber, sequence, NackReason::Expired, Some(config), telemetry);
                return Err(NackReason::Expired);
            }
        };

        let room = subscriber.room();
        if messages.len() > room {
            debug!(subscriber = %id, sequence, needed = messages.len(), room, "keyframe reply does not fit");
            nack(id, subscriber, sequence, NackReason::Expired, Some(config), telemetry);
            return Err(NackReason::Expired);
        }

        let frames = messages.len() - 1;
        for message in messages {
            subscriber.deliver(id, message, telemetry);
        }
        debug!(subscriber = %id, sequence, keyframe_seq, frames, "keyframe sent");
        Ok(())
    }

    /// Drop every subscriber after a last flush. Receivers drain what
    /// reached their channel, then end; anything still in a backlog is
    /// counted as dropped.
    pub fn close_all(&mut self, telemetry: &mut Telemetry) {
        for (id, mut subscriber) in std::mem::take(&mut self.subscribers) {
            subscriber.flush();
            for _ in 0..subscriber.backlog.len() {
                telemetry.incr_labeled(BROADCAST_QUEUE_DROPPED, "subscriber", &id);
            }
        }
    }
}

fn nack(
    id: &str,
    subscriber: &mut Subscriber,
    sequence: u64,
    reason: NackReason,
    config: Option<ConfigSnapshot>,
    telemetry: &mut Telemetry,
) {
    telemetry.incr_labeled(KEYFRAME_NACK, "reason", reason.as_str());
    let resync = (reason == NackReason::Expired).then_some(true);
    let message = ServerMessage::KeyframeNack(KeyframeNack { sequence, reason, resync, config });
    match Outbound::encode(&message, 0) {
        Ok(encoded) => subscriber.deliver(id, encoded, telemetry),
        Err(err) => warn!(error = %err, "nack encode failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    use crate::config::WorldConfig;
    use crate::core::vec2::Vec2;
    use crate::game::effects::EffectRegistry;
    use crate::game::World;
    use crate::journal::NoopSink;

    fn text(n: u64) -> Outbound {
        Outbound { sequence: n, keyframe: false, text: Arc::from(format!("m{n}")) }
    }

    fn world() -> World {
        let mut world = World::new(WorldConfig::empty(50.0, 50.0), Arc::new(EffectRegistry::builtin())).unwrap();
        world.join_at("p1", Vec2::new(100.0, 100.0)).unwrap();
        world
    }

    fn run(world: &mut World, ticks: std::ops::RangeInclusive<u64>) {
        for tick in ticks {
            world.step(tick, tick * 66, 1.0 / 15.0, Vec::new(), &mut NoopSink).unwrap();
        }
    }

    fn sequences(rx: &mut mpsc::Receiver<Outbound>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message.sequence);
        }
        out
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(ServerMessage::from_json(&message.text).unwrap());
        }
        out
    }

    #[test]
    fn test_overflow_drops_oldest_non_keyframe() {
        let (mut subscriber, mut rx) = Subscriber::new(2);
        assert_eq!(subscriber.push(text(1)), 0);
        assert_eq!(subscriber.push(text(2)), 0);
        assert_eq!(subscriber.push(Outbound { sequence: 3, keyframe: true, text: Arc::from("kf") }), 0);
        assert_eq!(subscriber.push(text(4)), 0);
        assert!(!subscriber.resync_needed);

        // channel and backlog are both full; 4 goes, the keyframe stays
        assert_eq!(subscriber.push(text(5)), 1);
        assert!(subscriber.resync_needed);

        assert_eq!(sequences(&mut rx), vec![1, 2]);
        assert_eq!(subscriber.push(text(6)), 0);
        assert_eq!(sequences(&mut rx), vec![3, 5]);
        subscriber.flush();
        assert_eq!(sequences(&mut rx), vec![6]);
    }

    #[test]
    fn test_receiver_ends_after_unsubscribe() {
        let mut world = world();
        let mut broadcaster = Broadcaster::new(8);
        let mut rx = broadcaster.subscribe("p1");
        let mut telemetry = Telemetry::new();

        let result = world.step(1, 66, 1.0 / 15.0, Vec::new(), &mut NoopSink).unwrap();
        broadcaster.publish(&result.frame, || world.snapshot(), &mut telemetry);
        assert!(broadcaster.unsubscribe("p1"));
        assert!(!broadcaster.unsubscribe("p1"));
        assert!(broadcaster.is_empty());

        assert_eq!(rx.try_recv().map(|m| m.sequence), Ok(1));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_closed_receiver_is_not_counted() {
        let (mut subscriber, rx) = Subscriber::new(1);
        drop(rx);
        for n in 1..=5 {
            assert_eq!(subscriber.push(text(n)), 0);
        }
        assert!(subscriber.backlog.is_empty());
        assert!(!subscriber.resync_needed);
    }

    #[test]
    fn test_publish_and_resync_after_overflow() {
        let mut world = world();
        let mut broadcaster = Broadcaster::new(2);
        let mut rx = broadcaster.subscribe("p1");
        let mut telemetry = Telemetry::new();

        for tick in 1..=5 {
            let result = world.step(tick, tick * 66, 1.0 / 15.0, Vec::new(), &mut NoopSink).unwrap();
            broadcaster.publish(&result.frame, || world.snapshot(), &mut telemetry);
        }
        assert_eq!(telemetry.counter_labeled(BROADCAST_QUEUE_DROPPED, "subscriber", "p1"), 1);
        let mut messages = drain(&mut rx);

        for tick in 6..=7 {
            let result = world.step(tick, tick * 66, 1.0 / 15.0, Vec::new(), &mut NoopSink).unwrap();
            broadcaster.publish(&result.frame, || world.snapshot(), &mut telemetry);
            messages.extend(drain(&mut rx));
        }

        let states: Vec<&StateMessage> = messages
            .iter()
            .map(|m| match m {
                ServerMessage::State(state) => state,
                other => panic!("expected state, got {other:?}"),
            })
            .collect();
        let seen: Vec<u64> = states.iter().map(|s| s.sequence).collect();
        assert_eq!(seen, vec![1, 2, 4, 5, 6, 7]);

        let resync = states.iter().find(|s| s.sequence == 6).unwrap();
        assert!(resync.resync);
        assert_eq!(resync.keyframe.as_ref().map(|k| k.sequence), Some(6));
        assert!(states.iter().filter(|s| s.resync).count() == 1);
        assert_eq!(telemetry.counter_labeled(BROADCAST_QUEUE_DROPPED, "subscriber", "p1"), 1);
    }

    #[test]
    fn test_keyframe_request_replies_and_rate_limits() {
        let mut world = world();
        let mut broadcaster = Broadcaster::new(64);
        let mut rx = broadcaster.subscribe("p1");
        let mut telemetry = Telemetry::new();
        run(&mut world, 1..=20);

        let config = world.config_snapshot();
        let reply = broadcaster.handle_keyframe_request(
            "p1",
            17,
            1400,
            |seq| world.recover(seq, 1400),
            config.clone(),
            &mut telemetry,
        );
        assert!(reply.is_ok());
        let messages = drain(&mut rx);
        let ServerMessage::Keyframe(keyframe) = &messages[0] else { panic!("expected keyframe") };
        assert_eq!(keyframe.sequence, 15);
        assert_eq!(messages.len(), 1 + 5);

        let again = broadcaster.handle_keyframe_request(
            "p1",
            17,
            1500,
            |seq| world.recover(seq, 1500),
            config,
            &mut telemetry,
        );
        assert_eq!(again, Err(NackReason::RateLimited));
        let messages = drain(&mut rx);
        assert!(matches!(
            &messages[0],
            ServerMessage::KeyframeNack(KeyframeNack { reason: NackReason::RateLimited, resync: None, .. })
        ));
        assert_eq!(telemetry.counter_labeled(KEYFRAME_NACK, "reason", "rate_limited"), 1);
    }

    #[test]
    fn test_long_recovery_arrives_contiguous() {
        let mut world = world();
        let mut broadcaster = Broadcaster::new(64);
        let mut rx = broadcaster.subscribe("p1");
        let mut telemetry = Telemetry::new();
        run(&mut world, 1..=80);

        let config = world.config_snapshot();
        let reply = broadcaster.handle_keyframe_request(
            "p1",
            16,
            5280,
            |seq| world.recover(seq, 5280),
            config,
            &mut telemetry,
        );
        assert!(reply.is_ok());

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 66);
        let ServerMessage::Keyframe(keyframe) = &messages[0] else { panic!("expected keyframe") };
        assert_eq!(keyframe.sequence, 15);
        let frames: Vec<u64> = messages[1..]
            .iter()
            .map(|m| match m {
                ServerMessage::State(state) => state.sequence,
                other => panic!("expected state, got {other:?}"),
            })
            .collect();
        assert_eq!(frames, (16..=80).collect::<Vec<u64>>());
        assert_eq!(telemetry.counter_labeled(BROADCAST_QUEUE_DROPPED, "subscriber", "p1"), 0);
    }

    #[test]
    fn test_recovery_larger_than_queue_is_refused() {
        let mut world = world();
        let mut broadcaster = Broadcaster::new(4);
        let mut rx = broadcaster.subscribe("p1");
        let mut telemetry = Telemetry::new();
        run(&mut world, 1..=20);

        let config = world.config_snapshot();
        let reply = broadcaster.handle_keyframe_request(
            "p1",
            3,
            1400,
            |seq| world.recover(seq, 1400),
            config,
            &mut telemetry,
        );
        assert_eq!(reply, Err(NackReason::Expired));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        let ServerMessage::KeyframeNack(nack) = &messages[0] else { panic!("expected nack") };
        assert_eq!(nack.reason, NackReason::Expired);
        assert_eq!(nack.resync, Some(true));
        assert!(nack.config.is_some());
        assert_eq!(telemetry.counter_labeled(KEYFRAME_NACK, "reason", "expired"), 1);
        assert_eq!(telemetry.counter_labeled(BROADCAST_QUEUE_DROPPED, "subscriber", "p1"), 0);
    }

    #[test]
    fn test_keyframe_request_expired() {
        let mut broadcaster = Broadcaster::new(8);
        let mut rx = broadcaster.subscribe("p1");
        let mut telemetry = Telemetry::new();
        let config = world().config_snapshot();

        let reply = broadcaster.handle_keyframe_request(
            "p1",
            3,
            0,
            |seq| Err(KeyframeError::Expired { requested: seq }),
            config,
            &mut telemetry,
        );
        assert_eq!(reply, Err(NackReason::Expired));
        let messages = drain(&mut rx);
        let ServerMessage::KeyframeNack(nack) = &messages[0] else { panic!("expected nack") };
        assert_eq!(nack.reason, NackReason::Expired);
        assert_eq!(nack.resync, Some(true));
        assert!(nack.config.is_some());
        assert_eq!(telemetry.counter_labeled(KEYFRAME_NACK, "reason", "expired"), 1);
    }

    #[test]
    fn test_close_all_ends_receivers() {
        let mut broadcaster = Broadcaster::new(2);
        let mut rx = broadcaster.subscribe("p1");
        let mut telemetry = Telemetry::new();
        if let Some(subscriber) = broadcaster.subscribers.get_mut("p1") {
            for n in 1..=3 {
                subscriber.push(text(n));
            }
        }
        broadcaster.close_all(&mut telemetry);

        assert!(broadcaster.is_empty());
        assert_eq!(sequences(&mut rx), vec![1, 2]);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(telemetry.counter_labeled(BROADCAST_QUEUE_DROPPED, "subscriber", "p1"), 1);
    }
}
