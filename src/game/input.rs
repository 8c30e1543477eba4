//! Command Intake
//!
//! Client commands arrive as raw wire values, already bound to an
//! authenticated actor ID by the transport. Intake sorts them by
//! `(actor, arrival)` and validates each one; anything malformed is dropped
//! and counted under `commands_dropped_total{reason}`.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::vec2::Vec2;
use crate::game::ability::Ability;
use crate::game::state::Facing;
use crate::telemetry::{Telemetry, COMMANDS_DROPPED};

// =============================================================================
// WIRE FORM
// =============================================================================

/// Raw client command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Direct movement.
    Input {
        /// X axis in [-1, 1].
        dx: f64,
        /// Y axis in [-1, 1].
        dy: f64,
        /// Facing string; empty means `down`.
        #[serde(default)]
        facing: String,
    },
    /// Click-to-move.
    Path {
        /// Destination X.
        x: f64,
        /// Destination Y.
        y: f64,
    },
    /// Abandon the active path.
    CancelPath,
    /// Use a named ability.
    Action {
        /// Ability name.
        name: String,
    },
    /// Liveness probe.
    Heartbeat {
        /// Client timestamp (ms).
        #[serde(rename = "sentAt", default)]
        sent_at: i64,
        /// Round-trip time measured by the transport (ms).
        #[serde(default)]
        rtt: Option<f64>,
    },
}

/// A command bound to an actor and an arrival index.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    /// Authenticated actor.
    pub actor_id: String,
    /// Arrival order on the inbound channel.
    pub arrival: u64,
    /// Payload.
    pub kind: ClientCommand,
}

impl Command {
    /// Bind a payload to an actor.
    pub fn new(actor_id: &str, arrival: u64, kind: ClientCommand) -> Self {
        Self { actor_id: actor_id.to_string(), arrival, kind }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Why a command was discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// NaN or infinite number.
    NonFinite,
    /// Facing outside `{up, down, left, right}`.
    InvalidFacing,
    /// Action names no ability.
    UnknownAction,
    /// No such actor.
    UnknownActor,
    /// Message type the server does not know.
    UnknownType,
    /// Not parseable as a command at all.
    Malformed,
}

impl DropReason {
    /// Counter label.
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::NonFinite => "non_finite",
            DropReason::InvalidFacing => "invalid_facing",
            DropReason::UnknownAction => "unknown_action",
            DropReason::UnknownActor => "unknown_actor",
            DropReason::UnknownType => "unknown_type",
            DropReason::Malformed => "malformed",
        }
    }
}

/// A validated command.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidCommand {
    /// Movement intent (clamped to unit length) and facing.
    Move {
        /// Intent.
        intent: Vec2,
        /// Facing.
        facing: Facing,
    },
    /// Plan a path.
    Path {
        /// Destination.
        target: Vec2,
    },
    /// Drop the active path.
    CancelPath,
    /// Fire an ability.
    UseAbility(Ability),
    /// Liveness.
    Heartbeat {
        /// Client timestamp.
        sent_at: i64,
        /// Transport RTT.
        rtt: Option<f64>,
    },
}

/// Validate one payload.
pub fn validate(command: &ClientCommand) -> Result<ValidCommand, DropReason> {
    match command {
        ClientCommand::Input { dx, dy, facing } => {
            if !dx.is_finite() || !dy.is_finite() {
                return Err(DropReason::NonFinite);
            }
            let facing = Facing::parse(facing).ok_or(DropReason::InvalidFacing)?;
            let mut intent = Vec2::new(*dx, *dy);
            if intent.length_squared() > 1.0 {
                intent = intent.normalize();
            }
            Ok(ValidCommand::Move { intent, facing })
        }
        ClientCommand::Path { x, y } => {
            if !x.is_finite() || !y.is_finite() {
                return Err(DropReason::NonFinite);
            }
            Ok(ValidCommand::Path { target: Vec2::new(*x, *y) })
        }
        ClientCommand::CancelPath => Ok(ValidCommand::CancelPath),
        ClientCommand::Action { name } => Ability::parse(name)
            .map(ValidCommand::UseAbility)
            .ok_or(DropReason::UnknownAction),
        ClientCommand::Heartbeat { sent_at, rtt } => {
            if rtt.is_some_and(|r| !r.is_finite()) {
                return Err(DropReason::NonFinite);
            }
            Ok(ValidCommand::Heartbeat { sent_at: *sent_at, rtt: *rtt })
        }
    }
}

/// Sort by `(actor, arrival)`, validate, and drop unknown actors.
pub fn intake<F>(mut commands: Vec<Command>, is_known: F, telemetry: &mut Telemetry) -> Vec<(String, ValidCommand)>
where
    F: Fn(&str) -> bool,
{
    commands.sort_by(|a, b| a.actor_id.cmp(&b.actor_id).then(a.arrival.cmp(&b.arrival)));

    let mut accepted = Vec::with_capacity(commands.len());
    for command in commands {
        let result = if is_known(&command.actor_id) {
            validate(&command.kind)
        } else {
            Err(DropReason::UnknownActor)
        };
        match result {
            Ok(valid) => accepted.push((command.actor_id, valid)),
            Err(reason) => {
                telemetry.incr_labeled(COMMANDS_DROPPED, "reason", reason.as_str());
                debug!(actor = %command.actor_id, reason = reason.as_str(), "command dropped");
            }
        }
    }
    accepted
}
