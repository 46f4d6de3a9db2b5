use std::collections::VecDeque;

use glam::IVec2;

use super::SessionConfig;
use crate::chat::{ChatLog, ChatMessage, timestamp_now};
use crate::entity::{Entity, EntityBody, EntityId, EntityKind, Sign};
use crate::message::{CtsMessage, StcMessage};
use crate::wire::{DecodeError, WireReader};
use crate::world::WorldContainer;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("tile {0} is occupied")]
    Occupied(IVec2),
    #[error("nothing removable at {0}")]
    NothingToRemove(IVec2),
    #[error("{0} cannot be spawned by clients")]
    NotSpawnable(&'static str),
    #[error("not joined yet")]
    NotJoined,
}

/// What a server message did to the local replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Joined(usize),
    Added(EntityId),
    Removed(EntityId),
    Changed(EntityId),
    Chat(ChatMessage),
    Ignored,
}

/// Client half of the session protocol: a world replica fed by server
/// messages, plus the queue of locally initiated actions.
#[derive(Debug)]
pub struct ClientSession {
    world: WorldContainer,
    username: String,
    local_player: Option<EntityId>,
    joined: bool,
    chat: ChatLog,
    outbound: VecDeque<Vec<u8>>,
}

impl ClientSession {
    pub fn new(username: impl Into<String>, config: &SessionConfig) -> Self {
        Self {
            world: WorldContainer::new(),
            username: username.into(),
            local_player: None,
            joined: false,
            chat: ChatLog::new(
                config.chat_capacity,
                config.chat_fade_after(),
                config.chat_lifetime(),
            ),
            outbound: VecDeque::new(),
        }
    }

    pub fn world(&self) -> &WorldContainer {
        &self.world
    }

    /// Lets callers subscribe to replica events.
    pub fn world_mut(&mut self) -> &mut WorldContainer {
        &mut self.world
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn chat_mut(&mut self) -> &mut ChatLog {
        &mut self.chat
    }

    pub fn local_player(&self) -> Option<&Entity> {
        self.local_player.and_then(|id| self.world.get(id))
    }

    pub fn handle_message(&mut self, payload: &[u8]) -> Result<Inbound, DecodeError> {
        let inbound = match StcMessage::decode(payload)? {
            StcMessage::Joined { entities } => {
                self.world.reset();
                self.local_player = None;
                let count = entities.len();
                for entity in entities {
                    self.insert(entity);
                }
                self.joined = true;
                log::info!("joined with {} entities", count);
                Inbound::Joined(count)
            }
            StcMessage::ObjectAdded { entity } => {
                let id = entity.id();
                if self.world.contains(id) {
                    log::warn!("duplicate ObjectAdded for {}", id);
                    Inbound::Ignored
                } else {
                    self.insert(entity);
                    Inbound::Added(id)
                }
            }
            StcMessage::ObjectRemoved { id } => {
                if self.local_player == Some(id) {
                    self.local_player = None;
                }
                match self.world.remove(id) {
                    Some(_) => Inbound::Removed(id),
                    None => Inbound::Ignored,
                }
            }
            StcMessage::ObjectChanged { id, delta } => {
                let Some(entity) = self.world.get_mut(id) else {
                    log::warn!("ObjectChanged for unknown entity {}", id);
                    return Ok(Inbound::Ignored);
                };
                let mut updated = entity.clone();
                let mut reader = WireReader::new(&delta);
                updated.deserialize_delta(&mut reader)?;
                reader.finish()?;
                *entity = updated;
                self.world.mark_changed(id);
                Inbound::Changed(id)
            }
            StcMessage::Chat(message) => {
                self.chat.push(message.clone());
                Inbound::Chat(message)
            }
        };
        Ok(inbound)
    }

    fn insert(&mut self, entity: Entity) {
        let is_local = entity
            .as_player()
            .is_some_and(|p| p.username() == self.username);
        let id = entity.id();
        match self.world.add(entity) {
            Ok(()) if is_local => self.local_player = Some(id),
            Ok(()) => {}
            Err(e) => log::warn!("{}", e),
        }
    }

    /// Asks the server to place a new entity. Refused locally when the tile
    /// already holds something.
    pub fn request_spawn(
        &mut self,
        kind: EntityKind,
        position: IVec2,
    ) -> Result<EntityId, ActionError> {
        let body = EntityBody::simple(kind).ok_or(ActionError::NotSpawnable(kind.name()))?;
        self.request_add(Entity::spawn(position, body))
    }

    pub fn request_sign(
        &mut self,
        position: IVec2,
        text: impl Into<String>,
    ) -> Result<EntityId, ActionError> {
        let body = EntityBody::Sign(Sign { text: text.into() });
        self.request_add(Entity::spawn(position, body))
    }

    fn request_add(&mut self, entity: Entity) -> Result<EntityId, ActionError> {
        if !self.joined {
            return Err(ActionError::NotJoined);
        }
        if self.world.try_get_at(entity.position, None).is_some() {
            return Err(ActionError::Occupied(entity.position));
        }
        let id = entity.id();
        self.outbound
            .push_back(CtsMessage::AddObject { entity }.encode());
        Ok(id)
    }

    /// Asks the server to remove the first non-player entity on a tile.
    pub fn request_remove_at(&mut self, position: IVec2) -> Result<EntityId, ActionError> {
        if !self.joined {
            return Err(ActionError::NotJoined);
        }
        let id = self
            .world
            .entities_at(position)
            .find(|e| !e.is_player())
            .map(Entity::id)
            .ok_or(ActionError::NothingToRemove(position))?;
        self.outbound
            .push_back(CtsMessage::RemoveObject { id }.encode());
        Ok(id)
    }

    pub fn request_move(&mut self, direction: IVec2) {
        self.outbound
            .push_back(CtsMessage::PlayerMove { direction }.encode());
    }

    pub fn send_chat(&mut self, text: impl Into<String>) {
        let message = CtsMessage::Chat {
            timestamp: timestamp_now(),
            text: text.into(),
        };
        self.outbound.push_back(message.encode());
    }

    /// Flags the local player after a fresh round-trip measurement.
    pub fn mark_ping_dirty(&mut self) {
        if let Some(player) = self
            .local_player
            .and_then(|id| self.world.get_mut(id))
            .and_then(Entity::as_player_mut)
        {
            player.ping_dirty = true;
        }
    }

    /// Clears and returns the local ping flag.
    pub fn take_ping_dirty(&mut self) -> bool {
        self.local_player
            .and_then(|id| self.world.get_mut(id))
            .and_then(Entity::as_player_mut)
            .is_some_and(|player| std::mem::take(&mut player.ping_dirty))
    }

    /// Highlights the player standing on `position`, clearing any other
    /// highlight.
    pub fn highlight_at(&mut self, position: IVec2) -> Option<EntityId> {
        let target = self
            .world
            .entities_at(position)
            .find(|e| e.is_player())
            .map(Entity::id);
        let players: Vec<EntityId> = self.world.players().map(Entity::id).collect();
        for id in players {
            if let Some(player) = self.world.get_mut(id).and_then(Entity::as_player_mut) {
                player.highlighted = Some(id) == target;
            }
        }
        target
    }

    pub fn drain_outbound(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.outbound.drain(..)
    }

    /// Forgets all replicated state, e.g. after losing the connection.
    pub fn reset(&mut self) {
        self.world.reset();
        self.local_player = None;
        self.joined = false;
        self.outbound.clear();
    }
}
