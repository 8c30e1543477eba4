//! Network Layer
//!
//! WebSocket transport and the task that hosts the simulation.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod protocol;
pub mod broadcast;
pub mod session;
pub mod server;

pub use broadcast::{Broadcaster, Outbound};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage, StateMessage};
pub use session::{JoinAccepted, SessionError, SessionHandle, SimulationSession};
pub use server::{GameServer, GameServerError};
