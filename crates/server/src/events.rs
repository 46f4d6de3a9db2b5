use std::net::SocketAddr;

use tilesync::{ConnectionId, EntityId};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnecting {
        addr: SocketAddr,
        username: String,
    },
    ClientConnected {
        client_id: ConnectionId,
        addr: SocketAddr,
        entity_id: EntityId,
    },
    ClientDisconnected {
        client_id: ConnectionId,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Shutdown => "server shutting down",
        }
    }
}
