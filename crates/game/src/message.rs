//! Game messages carried on the reliable channel.
//!
//! Every message is a tag byte followed by its payload. Server-to-client
//! messages are encoded straight from borrowed entities so a broadcast never
//! clones world state.

use glam::IVec2;

use crate::chat::ChatMessage;
use crate::entity::{Entity, EntityId};
use crate::wire::{DecodeError, WireReader, WireWriter};
use crate::world::WorldContainer;

pub mod stc {
    pub const JOINED: u8 = 0;
    pub const OBJECT_ADDED: u8 = 1;
    pub const OBJECT_REMOVED: u8 = 2;
    pub const OBJECT_CHANGED: u8 = 3;
    pub const CHAT_MESSAGE: u8 = 4;
}

pub mod cts {
    pub const ADD_OBJECT: u8 = 0;
    pub const REMOVE_OBJECT: u8 = 1;
    pub const PLAYER_MOVE: u8 = 2;
    pub const CHAT_MESSAGE: u8 = 3;
}

const ID_SIZE: usize = 16;
const CHAT_HEADER_SIZE: usize = 1 + ID_SIZE + 8 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StcMessage {
    Joined { entities: Vec<Entity> },
    ObjectAdded { entity: Entity },
    ObjectRemoved { id: EntityId },
    /// The delta stays raw until the receiver finds the entity it targets.
    ObjectChanged { id: EntityId, delta: Vec<u8> },
    Chat(ChatMessage),
}

impl StcMessage {
    pub fn encode_joined(world: &WorldContainer) -> Vec<u8> {
        let capacity = 1 + 4 + world.entities().map(Entity::size_hint).sum::<usize>();
        let mut writer = WireWriter::with_capacity(capacity);
        writer.write_u8(stc::JOINED);
        writer.write_i32(world.len() as i32);
        for entity in world.entities() {
            entity.serialize_full(&mut writer);
        }
        writer.into_bytes()
    }

    pub fn encode_object_added(entity: &Entity) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(1 + entity.size_hint());
        writer.write_u8(stc::OBJECT_ADDED);
        entity.serialize_full(&mut writer);
        writer.into_bytes()
    }

    pub fn encode_object_removed(id: EntityId) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(1 + ID_SIZE);
        writer.write_u8(stc::OBJECT_REMOVED);
        writer.write_id(id);
        writer.into_bytes()
    }

    pub fn encode_object_changed(entity: &Entity) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(1 + entity.size_hint());
        writer.write_u8(stc::OBJECT_CHANGED);
        writer.write_id(entity.id());
        entity.serialize_delta(&mut writer);
        writer.into_bytes()
    }

    pub fn encode_chat(message: &ChatMessage) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(CHAT_HEADER_SIZE + message.text.len());
        writer.write_u8(stc::CHAT_MESSAGE);
        writer.write_id(message.sender);
        writer.write_u64(message.timestamp);
        writer.write_str(&message.text);
        writer.into_bytes()
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Joined { entities } => {
                let mut writer = WireWriter::new();
                writer.write_u8(stc::JOINED);
                writer.write_i32(entities.len() as i32);
                for entity in entities {
                    entity.serialize_full(&mut writer);
                }
                writer.into_bytes()
            }
            Self::ObjectAdded { entity } => Self::encode_object_added(entity),
            Self::ObjectRemoved { id } => Self::encode_object_removed(*id),
            Self::ObjectChanged { id, delta } => {
                let mut writer = WireWriter::with_capacity(1 + ID_SIZE + delta.len());
                writer.write_u8(stc::OBJECT_CHANGED);
                writer.write_id(*id);
                let mut bytes = writer.into_bytes();
                bytes.extend_from_slice(delta);
                bytes
            }
            Self::Chat(message) => Self::encode_chat(message),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(bytes);
        let message = match reader.read_u8()? {
            stc::JOINED => {
                let count = reader.read_i32()?;
                if count < 0 {
                    return Err(DecodeError::NegativeCount(count));
                }
                // Cap the preallocation; the count is untrusted.
                let mut entities = Vec::with_capacity((count as usize).min(1024));
                for _ in 0..count {
                    entities.push(Entity::deserialize_full(&mut reader)?);
                }
                Self::Joined { entities }
            }
            stc::OBJECT_ADDED => Self::ObjectAdded {
                entity: Entity::deserialize_full(&mut reader)?,
            },
            stc::OBJECT_REMOVED => Self::ObjectRemoved {
                id: reader.read_id()?,
            },
            stc::OBJECT_CHANGED => Self::ObjectChanged {
                id: reader.read_id()?,
                delta: reader.read_rest().to_vec(),
            },
            stc::CHAT_MESSAGE => Self::Chat(ChatMessage {
                sender: reader.read_id()?,
                timestamp: reader.read_u64()?,
                text: reader.read_string()?,
            }),
            tag => return Err(DecodeError::UnknownTag(tag)),
        };
        reader.finish()?;
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtsMessage {
    AddObject { entity: Entity },
    RemoveObject { id: EntityId },
    PlayerMove { direction: IVec2 },
    Chat { timestamp: u64, text: String },
}

impl CtsMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::AddObject { entity } => {
                let mut writer = WireWriter::with_capacity(1 + entity.size_hint());
                writer.write_u8(cts::ADD_OBJECT);
                entity.serialize_full(&mut writer);
                writer.into_bytes()
            }
            Self::RemoveObject { id } => {
                let mut writer = WireWriter::with_capacity(1 + ID_SIZE);
                writer.write_u8(cts::REMOVE_OBJECT);
                writer.write_id(*id);
                writer.into_bytes()
            }
            Self::PlayerMove { direction } => {
                let mut writer = WireWriter::with_capacity(1 + 8);
                writer.write_u8(cts::PLAYER_MOVE);
                writer.write_ivec2(*direction);
                writer.into_bytes()
            }
            Self::Chat { timestamp, text } => {
                let mut writer = WireWriter::with_capacity(1 + 8 + 4 + text.len());
                writer.write_u8(cts::CHAT_MESSAGE);
                writer.write_u64(*timestamp);
                writer.write_str(text);
                writer.into_bytes()
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(bytes);
        let message = match reader.read_u8()? {
            cts::ADD_OBJECT => Self::AddObject {
                entity: Entity::deserialize_full(&mut reader)?,
            },
            cts::REMOVE_OBJECT => Self::RemoveObject {
                id: reader.read_id()?,
            },
            cts::PLAYER_MOVE => Self::PlayerMove {
                direction: reader.read_ivec2()?,
            },
            cts::CHAT_MESSAGE => Self::Chat {
                timestamp: reader.read_u64()?,
                text: reader.read_string()?,
            },
            tag => return Err(DecodeError::UnknownTag(tag)),
        };
        reader.finish()?;
        Ok(message)
    }
}
