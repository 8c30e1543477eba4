//! Protocol Messages
//!
//! JSON wire format between clients and the server. Every message is an
//! object carrying `{ver, type}`; the body fields sit alongside them.
//! Geometry inside lifecycle payloads is in integer sub-units.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::effects::definition::EffectDefinition;
use crate::game::input::{ClientCommand, DropReason};
use crate::game::state::Obstacle;
use crate::game::World;
use crate::journal::keyframe::{ActorSnapshot, ConfigSnapshot, GroundItemSnapshot, NpcSnapshot};
use crate::journal::lifecycle::{EffectEndEvent, EffectSpawnEvent, EffectUpdateEvent};
use crate::journal::{JournalFrame, Keyframe, Patch};
use crate::PROTOCOL_VERSION;

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON, or fields of the wrong shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The client speaks another protocol version.
    #[error("protocol version {got} (expected {expected})")]
    VersionMismatch {
        /// Version sent.
        got: u64,
        /// Version spoken here.
        expected: u32,
    },

    /// No `type` field.
    #[error("message has no type")]
    MissingType,

    /// A `type` the server does not handle.
    #[error("unknown message type {0:?}")]
    UnknownType(String),
}

impl ProtocolError {
    /// Counter label for a message that could not be turned into a command.
    pub fn drop_reason(&self) -> DropReason {
        match self {
            ProtocolError::UnknownType(_) => DropReason::UnknownType,
            _ => DropReason::Malformed,
        }
    }
}

/// `{ver, ...body}` wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Protocol version.
    pub ver: u32,
    /// Message body, flattened next to `ver`.
    #[serde(flatten)]
    pub body: T,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Enter the world. Must be the first message on a connection.
    Join {
        /// Hash of the client's effect catalog; refused when it differs.
        effect_catalog_hash: Option<String>,
    },
    /// Ask for a keyframe covering `sequence`.
    KeyframeRequest {
        /// Last sequence the client applied.
        sequence: u64,
    },
    /// Leave the world.
    Leave,
    /// Simulation command.
    Command(ClientCommand),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Control {
    Join {
        #[serde(rename = "effectCatalogHash", default, skip_serializing_if = "Option::is_none")]
        effect_catalog_hash: Option<String>,
    },
    KeyframeRequest {
        #[serde(alias = "keyframeSeq")]
        sequence: u64,
    },
    Leave,
}

impl ClientMessage {
    /// Parse a client frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if let Some(ver) = value.get("ver").and_then(|v| v.as_u64()) {
            if ver != PROTOCOL_VERSION as u64 {
                return Err(ProtocolError::VersionMismatch { got: ver, expected: PROTOCOL_VERSION });
            }
        }
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        match kind.as_str() {
            "join" | "keyframeRequest" | "leave" => Ok(match serde_json::from_value(value)? {
                Control::Join { effect_catalog_hash } => ClientMessage::Join { effect_catalog_hash },
                Control::KeyframeRequest { sequence } => ClientMessage::KeyframeRequest { sequence },
                Control::Leave => ClientMessage::Leave,
            }),
            "input" | "path" | "cancelPath" | "action" | "heartbeat" => {
                Ok(ClientMessage::Command(serde_json::from_value(value)?))
            }
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }

    /// Serialize with the envelope (bots and tests).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let ver = PROTOCOL_VERSION;
        match self {
            ClientMessage::Join { effect_catalog_hash } => serde_json::to_string(&Envelope {
                ver,
                body: Control::Join { effect_catalog_hash: effect_catalog_hash.clone() },
            }),
            ClientMessage::KeyframeRequest { sequence } => serde_json::to_string(&Envelope {
                ver,
                body: Control::KeyframeRequest { sequence: *sequence },
            }),
            ClientMessage::Leave => serde_json::to_string(&Envelope { ver, body: Control::Leave }),
            ClientMessage::Command(command) => serde_json::to_string(&Envelope { ver, body: command }),
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Join accepted: the full world at join time.
    Join(JoinResponse),
    /// Join refused.
    JoinRejected {
        /// Human-readable reason.
        reason: String,
    },
    /// One finalized tick.
    State(StateMessage),
    /// Keyframe reply.
    Keyframe(Keyframe),
    /// Keyframe request refused.
    KeyframeNack(KeyframeNack),
    /// Heartbeat echo.
    Heartbeat(Heartbeat),
}

impl ServerMessage {
    /// Serialize with the envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope { ver: PROTOCOL_VERSION, body: self })
    }

    /// Parse an enveloped server frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope<ServerMessage> = serde_json::from_str(text)?;
        Ok(envelope.body)
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Join(_) => "join",
            ServerMessage::JoinRejected { .. } => "joinRejected",
            ServerMessage::State(_) => "state",
            ServerMessage::Keyframe(_) => "keyframe",
            ServerMessage::KeyframeNack(_) => "keyframeNack",
            ServerMessage::Heartbeat(_) => "heartbeat",
        }
    }
}

/// World settings sent on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfig {
    /// Root seed.
    pub seed: String,
    /// Width in tiles.
    pub width: f64,
    /// Height in tiles.
    pub height: f64,
    /// Effect definitions clients render from.
    pub effect_catalog: Vec<EffectDefinition>,
}

/// Join response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    /// Assigned player ID.
    pub id: String,
    /// World settings.
    pub config: JoinConfig,
    /// Catalog hash.
    pub effect_catalog_hash: String,
    /// Sequence the state stream continues from.
    pub sequence: u64,
    /// Players.
    pub players: Vec<ActorSnapshot>,
    /// NPCs.
    pub npcs: Vec<NpcSnapshot>,
    /// Obstacles.
    pub obstacles: Vec<Obstacle>,
    /// Ground stacks.
    pub ground_items: Vec<GroundItemSnapshot>,
    /// Always empty; the world state above is complete.
    pub patches: Vec<Patch>,
}

impl JoinResponse {
    /// Describe `world` to the player that just joined as `player_id`.
    pub fn from_world(player_id: &str, world: &World) -> Self {
        let snapshot = world.snapshot();
        let registry = world.effects().registry();
        Self {
            id: player_id.to_string(),
            config: JoinConfig {
                seed: snapshot.config.seed,
                width: snapshot.config.width,
                height: snapshot.config.height,
                effect_catalog: registry.definitions().cloned().collect(),
            },
            effect_catalog_hash: registry.hash().to_string(),
            sequence: snapshot.sequence,
            players: snapshot.players,
            npcs: snapshot.npcs,
            obstacles: snapshot.obstacles,
            ground_items: snapshot.ground_items,
            patches: Vec::new(),
        }
    }
}

/// Per-tick state message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    /// Global sequence.
    pub sequence: u64,
    /// Tick.
    pub tick: u64,
    /// Newest stored keyframe.
    pub keyframe_seq: u64,
    /// Rebaseline from `keyframe`.
    pub resync: bool,
    /// Patches in append order.
    pub patches: Vec<Patch>,
    /// Spawns.
    #[serde(rename = "effect_spawned")]
    pub effect_spawned: Vec<EffectSpawnEvent>,
    /// Updates.
    #[serde(rename = "effect_update")]
    pub effect_update: Vec<EffectUpdateEvent>,
    /// Ends.
    #[serde(rename = "effect_ended")]
    pub effect_ended: Vec<EffectEndEvent>,
    /// Last per-instance sequence for instances touched this tick.
    #[serde(rename = "effect_seq_cursors")]
    pub effect_seq_cursors: BTreeMap<String, u64>,
    /// Snapshot for resync frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyframe: Option<Keyframe>,
}

impl StateMessage {
    /// Message for a finalized frame. Only resync frames carry their keyframe.
    pub fn from_frame(frame: &JournalFrame) -> Self {
        Self {
            sequence: frame.sequence,
            tick: frame.tick,
            keyframe_seq: frame.keyframe_seq,
            resync: frame.resync,
            patches: frame.patches.clone(),
            effect_spawned: frame.lifecycle.spawns.clone(),
            effect_update: frame.lifecycle.updates.clone(),
            effect_ended: frame.lifecycle.ends.clone(),
            effect_seq_cursors: frame.lifecycle.cursors.clone(),
            keyframe: frame
                .resync
                .then(|| frame.keyframe.as_deref().cloned())
                .flatten(),
        }
    }

    /// Mark as resync and attach `keyframe`.
    pub fn with_resync(mut self, keyframe: Keyframe) -> Self {
        self.resync = true;
        self.keyframe = Some(keyframe);
        self
    }
}

/// Why a keyframe request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NackReason {
    /// No stored keyframe covers the sequence.
    Expired,
    /// Too many requests.
    RateLimited,
}

impl NackReason {
    /// Wire and counter label.
    pub fn as_str(self) -> &'static str {
        match self {
            NackReason::Expired => "expired",
            NackReason::RateLimited => "rate_limited",
        }
    }
}

/// Keyframe refusal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeNack {
    /// Requested sequence.
    pub sequence: u64,
    /// Why.
    pub reason: NackReason,
    /// The client should re-join or wait for a forced keyframe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resync: Option<bool>,
    /// Current settings, for clients that rebaseline from scratch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSnapshot>,
}

/// Heartbeat in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Sender's clock when sent (ms).
    pub sent_at: i64,
    /// Server clock (ms), on replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<i64>,
    /// Client clock (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_time: Option<i64>,
    /// Round trip measured by the client (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::WorldConfig;
    use crate::core::vec2::Vec2;
    use crate::game::effects::EffectRegistry;

    #[test]
    fn test_client_control_messages() {
        let join = ClientMessage::from_json(r#"{"ver":1,"type":"join","effectCatalogHash":"abc"}"#).unwrap();
        assert_eq!(join, ClientMessage::Join { effect_catalog_hash: Some("abc".to_string()) });

        let bare = ClientMessage::from_json(r#"{"type":"join"}"#).unwrap();
        assert_eq!(bare, ClientMessage::Join { effect_catalog_hash: None });

        let request = ClientMessage::from_json(r#"{"ver":1,"type":"keyframeRequest","keyframeSeq":41}"#).unwrap();
        assert_eq!(request, ClientMessage::KeyframeRequest { sequence: 41 });

        let json = ClientMessage::Leave.to_json().unwrap();
        assert!(json.contains(r#""ver":1"#));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), ClientMessage::Leave);
    }

    #[test]
    fn test_client_commands() {
        let msg = ClientMessage::from_json(r#"{"ver":1,"type":"input","dx":1,"dy":0,"facing":"right"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Command(ClientCommand::Input { dx: 1.0, dy: 0.0, facing: "right".to_string() })
        );

        let msg = ClientMessage::Command(ClientCommand::Action { name: "attack".to_string() });
        assert_eq!(ClientMessage::from_json(&msg.to_json().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_client_errors() {
        let err = ClientMessage::from_json(r#"{"ver":1,"type":"dance"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref t) if t == "dance"));
        assert_eq!(err.drop_reason(), DropReason::UnknownType);

        let err = ClientMessage::from_json(r#"{"ver":9,"type":"leave"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { got: 9, .. }));

        assert!(matches!(ClientMessage::from_json(r#"{"dx":1}"#), Err(ProtocolError::MissingType)));
        let err = ClientMessage::from_json("not json").unwrap_err();
        assert_eq!(err.drop_reason(), DropReason::Malformed);
    }

    #[test]
    fn test_server_envelope() {
        let msg = ServerMessage::KeyframeNack(KeyframeNack {
            sequence: 7,
            reason: NackReason::RateLimited,
            resync: None,
            config: None,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""ver":1"#));
        assert!(json.contains(r#""type":"keyframeNack""#));
        assert!(json.contains(r#""reason":"rate_limited""#));
        assert!(!json.contains("resync"));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);

        let beat = ServerMessage::Heartbeat(Heartbeat { sent_at: 5, server_time: Some(9), client_time: None, rtt: None });
        let json = beat.to_json().unwrap();
        assert!(json.contains(r#""sentAt":5"#));
        assert!(json.contains(r#""serverTime":9"#));
        assert_eq!(beat.kind(), "heartbeat");
    }

    #[test]
    fn test_state_message_field_names() {
        let mut world = World::new(WorldConfig::empty(20.0, 20.0), Arc::new(EffectRegistry::builtin())).unwrap();
        world.join_at("p1", Vec2::new(100.0, 100.0)).unwrap();
        let result = world.step(1, 66, 1.0 / 15.0, Vec::new(), &mut crate::journal::NoopSink).unwrap();

        let state = StateMessage::from_frame(&result.frame);
        assert!(state.keyframe.is_none());
        let json = ServerMessage::State(state).to_json().unwrap();
        for field in ["\"keyframeSeq\"", "\"effect_spawned\"", "\"effect_update\"", "\"effect_ended\"", "\"effect_seq_cursors\""] {
            assert!(json.contains(field), "missing {field}");
        }
        assert!(json.contains(r#""entityId":"p1""#));
    }

    #[test]
    fn test_join_response() {
        let mut world = World::new(WorldConfig::default(), Arc::new(EffectRegistry::builtin())).unwrap();
        world.join("p1").unwrap();
        let response = JoinResponse::from_world("p1", &world);
        assert_eq!(response.id, "p1");
        assert_eq!(response.effect_catalog_hash, world.catalog_hash());
        assert_eq!(response.players.len(), 1);
        assert!(!response.config.effect_catalog.is_empty());
        assert!(response.patches.is_empty());

        let json = ServerMessage::Join(response).to_json().unwrap();
        assert!(json.contains(r#""groundItems""#));
        assert!(json.contains(r#""effectCatalog""#));
    }
}
