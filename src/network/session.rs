//! Simulation Session
//!
//! Hosts the world on a single task that loops at the tick rate. Connection
//! tasks talk to it through a bounded inbound channel; everything they send
//! is drained at the start of the next tick, in FIFO order. Outbound traffic
//! goes through the [`Broadcaster`], which only uses `try_send`, so the loop
//! never waits on a client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::game::input::{ClientCommand, Command, DropReason};
use crate::game::{World, WorldError};
use crate::journal::{JournalFrame, NoopSink};
use crate::network::broadcast::{Broadcaster, Outbound};
use crate::network::protocol::{JoinResponse, ServerMessage};
use crate::telemetry::{Telemetry, COMMANDS_DROPPED};
use crate::TICK_RATE;

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Client effect catalog differs from the server's.
    #[error("effect catalog mismatch (server {expected}, client {got})")]
    CatalogMismatch {
        /// Server hash.
        expected: String,
        /// Client hash.
        got: String,
    },

    /// World refused the operation.
    #[error("world error: {0}")]
    World(#[from] WorldError),

    /// Message encoding failed.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Inbound channel full; the message was dropped.
    #[error("inbound channel full")]
    InboundFull,

    /// The session task has stopped.
    #[error("session closed")]
    Closed,
}

/// Accepted join.
#[derive(Debug)]
pub struct JoinAccepted {
    /// Player ID.
    pub player_id: String,
    /// Encoded join response; send before draining `outbound`.
    pub response: Arc<str>,
    /// Frames and replies for this player. Ends after leave or shutdown.
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Messages from connection tasks to the session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Enter the world.
    Join {
        /// Player ID assigned by the transport.
        player_id: String,
        /// Client's catalog hash.
        catalog_hash: Option<String>,
        /// Reply channel.
        reply: oneshot::Sender<Result<JoinAccepted, SessionError>>,
    },
    /// Leave the world.
    Leave {
        /// Player ID.
        player_id: String,
    },
    /// Simulation command.
    Command {
        /// Player ID.
        player_id: String,
        /// Command body.
        command: ClientCommand,
    },
    /// Keyframe request.
    KeyframeRequest {
        /// Player ID.
        player_id: String,
        /// Last applied sequence.
        sequence: u64,
    },
    /// A message the transport could not parse.
    Dropped {
        /// Counter label.
        reason: DropReason,
    },
}

/// Cloneable sender side of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Join and wait for the session's answer.
    pub async fn join(&self, player_id: &str, catalog_hash: Option<String>) -> Result<JoinAccepted, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Join { player_id: player_id.to_string(), catalog_hash, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Leave. Waits for channel space so a leave is never lost.
    pub async fn leave(&self, player_id: &str) -> Result<(), SessionError> {
        self.tx
            .send(SessionCommand::Leave { player_id: player_id.to_string() })
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Forward a command for the next tick.
    pub fn command(&self, player_id: &str, command: ClientCommand) -> Result<(), SessionError> {
        self.try_send(SessionCommand::Command { player_id: player_id.to_string(), command })
    }

    /// Ask for a keyframe.
    pub fn keyframe_request(&self, player_id: &str, sequence: u64) -> Result<(), SessionError> {
        self.try_send(SessionCommand::KeyframeRequest { player_id: player_id.to_string(), sequence })
    }

    /// Count a message the transport dropped.
    pub fn report_dropped(&self, reason: DropReason) -> Result<(), SessionError> {
        self.try_send(SessionCommand::Dropped { reason })
    }

    fn try_send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => SessionError::InboundFull,
            TrySendError::Closed(_) => SessionError::Closed,
        })
    }
}

/// The simulation host.
pub struct SimulationSession {
    world: World,
    broadcaster: Broadcaster,
    inbound: mpsc::Receiver<SessionCommand>,
    /// Transport counters (queue drops, nacks).
    telemetry: Telemetry,
    tick: u64,
    arrival: u64,
    started: Instant,
}

impl SimulationSession {
    /// Wrap a world. Returns the session and its handle.
    pub fn new(world: World, config: &ServerConfig) -> (Self, SessionHandle) {
        let (tx, inbound) = mpsc::channel(config.inbound_capacity.max(1));
        let session = Self {
            tick: world.tick(),
            world,
            broadcaster: Broadcaster::new(config.outbound_capacity),
            inbound,
            telemetry: Telemetry::new(),
            arrival: 0,
            started: Instant::now(),
        };
        (session, SessionHandle { tx })
    }

    /// The hosted world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Transport counters.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Tick at the fixed rate until `shutdown` flips to true or its sender
    /// is dropped, then close the map. A failed tick also closes the map
    /// before its error is returned.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SessionError> {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / TICK_RATE as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_rate = TICK_RATE, catalog_hash = %self.world.catalog_hash(), "simulation started");

        let result = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_tick() {
                        error!(tick = self.tick, error = %err, "tick failed, closing the map");
                        break Err(err);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
            }
        };

        let closed = self.shutdown();
        result.and(closed)
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Drain the inbound channel, step once and broadcast the frame.
    pub fn run_tick(&mut self) -> Result<Arc<JournalFrame>, SessionError> {
        let now_ms = self.now_ms();
        let mut commands = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            self.handle(message, now_ms, &mut commands);
        }

        self.tick += 1;
        let result = self.world.step(self.tick, now_ms, 1.0 / TICK_RATE as f64, commands, &mut NoopSink)?;
        for id in &result.defeated {
            debug!(actor = %id, tick = self.tick, "removed after defeat");
        }

        let world = &self.world;
        self.broadcaster.publish(&result.frame, || world.snapshot(), &mut self.telemetry);
        Ok(result.frame)
    }

    fn handle(&mut self, message: SessionCommand, now_ms: u64, commands: &mut Vec<Command>) {
        match message {
            SessionCommand::Join { player_id, catalog_hash, reply } => {
                let outcome = self.accept(&player_id, catalog_hash);
                let accepted = outcome.is_ok();
                if reply.send(outcome).is_err() && accepted {
                    // Connection gave up before the answer arrived
                    self.world.leave(&player_id);
                    self.broadcaster.unsubscribe(&player_id);
                }
            }
            SessionCommand::Leave { player_id } => {
                self.world.leave(&player_id);
                self.broadcaster.unsubscribe(&player_id);
            }
            SessionCommand::Command { player_id, command } => {
                self.arrival += 1;
                commands.push(Command::new(&player_id, self.arrival, command));
            }
            SessionCommand::KeyframeRequest { player_id, sequence } => {
                let config = self.world.config_snapshot();
                let world = &mut self.world;
                let reply = self.broadcaster.handle_keyframe_request(
                    &player_id,
                    sequence,
                    now_ms,
                    |seq| world.recover(seq, now_ms),
                    config,
                    &mut self.telemetry,
                );
                if let Err(reason) = reply {
                    debug!(player = %player_id, sequence, reason = reason.as_str(), "keyframe request refused");
                }
            }
            SessionCommand::Dropped { reason } => {
                self.world
                    .telemetry_mut()
                    .incr_labeled(COMMANDS_DROPPED, "reason", reason.as_str());
            }
        }
    }

    fn accept(&mut self, player_id: &str, catalog_hash: Option<String>) -> Result<JoinAccepted, SessionError> {
        if let Some(got) = catalog_hash {
            let expected = self.world.catalog_hash();
            if got != expected {
                warn!(player = %player_id, %got, %expected, "join refused: catalog mismatch");
                return Err(SessionError::CatalogMismatch { expected: expected.to_string(), got });
            }
        }
        self.world.join(player_id)?;
        let response = ServerMessage::Join(JoinResponse::from_world(player_id, &self.world)).to_json()?;
        let outbound = self.broadcaster.subscribe(player_id);
        Ok(JoinAccepted { player_id: player_id.to_string(), response: Arc::from(response), outbound })
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        // Commands that raced the shutdown are discarded; joins get an answer
        while let Ok(message) = self.inbound.try_recv() {
            if let SessionCommand::Join { reply, .. } = message {
                let _ = reply.send(Err(SessionError::Closed));
            }
        }

        // A failed step may leave the session counter behind the world's
        self.tick = self.tick.max(self.world.tick()) + 1;
        let closed = self.world.close_map(self.tick, self.now_ms(), &mut NoopSink);
        let frame = match closed {
            Ok(frame) => frame,
            Err(err) => {
                self.broadcaster.close_all(&mut self.telemetry);
                return Err(err.into());
            }
        };
        let world = &self.world;
        self.broadcaster.publish(&frame, || world.snapshot(), &mut self.telemetry);
        self.broadcaster.close_all(&mut self.telemetry);

        self.world.telemetry().log_parity_summary(self.tick);
        info!(
            tick = self.tick,
            ended_effects = frame.lifecycle.ends.len(),
            transport = ?self.telemetry.snapshot(),
            "simulation stopped"
        );
        Ok(())
    }
}
