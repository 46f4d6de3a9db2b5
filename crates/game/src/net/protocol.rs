use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const MAX_FRAGMENT_SIZE: usize = 1024;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5453_594E;
pub const DEFAULT_PORT: u16 = 27016;
pub const DEFAULT_TICK_RATE: u32 = 20;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }
}

impl PacketHeader {
    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest {
        client_salt: u64,
        username: String,
        display_name: String,
    },
    ConnectionChallenge {
        server_salt: u64,
        challenge: u64,
    },
    ChallengeResponse {
        combined_salt: u64,
    },
    ConnectionAccepted {
        client_id: u32,
    },
    ConnectionDenied {
        reason: String,
    },
    /// One fragment of a reliable-ordered message; `last` closes the message.
    Reliable {
        sequence: u32,
        last: bool,
        payload: Vec<u8>,
    },
    /// Everything before `next_expected` has been received.
    Ack {
        next_expected: u32,
    },
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Disconnect {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Packet {
    pub fn new(payload: PacketType) -> Self {
        Self {
            header: PacketHeader::default(),
            payload,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        // Datagram buffers carry no alignment guarantee.
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(PacketError::Deserialize)
    }
}

impl From<PacketType> for Packet {
    fn from(payload: PacketType) -> Self {
        Self::new(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
        assert!(!sequence_greater_than(7, 7));
    }

    #[test]
    fn test_packet_serialization() {
        let packet = Packet::new(PacketType::ConnectionRequest {
            client_salt: 0xDEAD_BEEF,
            username: "alice_01".into(),
            display_name: "Alice".into(),
        });

        let serialized = packet.serialize().unwrap();
        let deserialized = Packet::deserialize(&serialized).unwrap();

        assert!(deserialized.header.is_valid());
        assert_eq!(packet, deserialized);
    }

    #[test]
    fn test_unaligned_input() {
        let packet = Packet::new(PacketType::Ping { timestamp: 12345 });
        let serialized = packet.serialize().unwrap();

        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&serialized);
        let deserialized = Packet::deserialize(&shifted[1..]).unwrap();
        assert_eq!(packet, deserialized);
    }

    #[test]
    fn test_full_fragment_fits_mtu() {
        let packet = Packet::new(PacketType::Reliable {
            sequence: u32::MAX,
            last: true,
            payload: vec![0xAB; MAX_FRAGMENT_SIZE],
        });
        assert!(packet.serialize().unwrap().len() <= MAX_PACKET_SIZE);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Packet::deserialize(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).is_err());
    }
}
