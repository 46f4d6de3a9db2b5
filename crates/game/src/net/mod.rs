mod channel;
mod connection;
mod endpoint;
mod protocol;
mod stats;

pub use channel::{DEFAULT_RESEND_INTERVAL, MAX_MESSAGE_SIZE, RECEIVE_WINDOW, ReliableChannel};
pub use connection::{ClientConnection, ConnectError, ConnectionManager, ConnectionState};
pub use endpoint::{NetworkEndpoint, Rejection, vet};
pub use protocol::{ArchivedPacket, sequence_greater_than};
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_FRAGMENT_SIZE, MAX_PACKET_SIZE, PROTOCOL_MAGIC,
    PROTOCOL_VERSION, Packet, PacketError, PacketHeader, PacketType,
};
pub use stats::{NetworkStats, rand_u64};
