pub mod chat;
pub mod entity;
pub mod message;
pub mod net;
pub mod session;
pub mod simulation;
pub mod wire;
pub mod world;

/// Transport-level handle for one remote peer.
pub type ConnectionId = u32;

pub use chat::{ChatEntry, ChatLog, ChatMessage, SYSTEM_SENDER, timestamp_now};
pub use entity::{
    Entity, EntityBody, EntityId, EntityKind, KindInfo, Player, Sign, Traits, UsernameError,
    validate_username,
};
pub use message::{CtsMessage, StcMessage};
pub use net::{
    ClientConnection, ConnectError, ConnectionManager, ConnectionState, DEFAULT_PORT,
    DEFAULT_TICK_RATE, NetworkEndpoint, NetworkStats, Packet, PacketError, PacketHeader,
    PacketType, Rejection, ReliableChannel,
};
pub use session::{
    ActionError, ClientSession, DenyReason, Inbound, Outbound, ServerSession, SessionConfig,
};
pub use simulation::FixedTimestep;
pub use wire::{DecodeError, WireReader, WireWriter};
pub use world::{CHUNK_SIZE, WorldContainer, WorldError};
