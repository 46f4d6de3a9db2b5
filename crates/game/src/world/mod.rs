use std::collections::{HashMap, HashSet};

use glam::IVec2;

use crate::entity::{Entity, EntityId, EntityKind};

pub const CHUNK_SIZE: i32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("entity {0} already exists")]
    DuplicateId(EntityId),
}

pub type Subscriber = Box<dyn FnMut(&Entity)>;

pub fn chunk_of(position: IVec2) -> IVec2 {
    position.div_euclid(IVec2::splat(CHUNK_SIZE))
}

struct Slot {
    entity: Entity,
    chunk: IVec2,
}

/// Authoritative id → entity map with a chunk index and change events.
///
/// Every mutating call fires its event synchronously, exactly once, before
/// returning. In-place edits made through [`WorldContainer::get_mut`] are
/// invisible to subscribers until [`WorldContainer::mark_changed`] is called.
#[derive(Default)]
pub struct WorldContainer {
    entities: HashMap<EntityId, Slot>,
    chunks: HashMap<IVec2, HashSet<EntityId>>,
    on_added: Vec<Subscriber>,
    on_removed: Vec<Subscriber>,
    on_changed: Vec<Subscriber>,
}

impl std::fmt::Debug for WorldContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldContainer")
            .field("entities", &self.entities.len())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl WorldContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_added(&mut self, subscriber: impl FnMut(&Entity) + 'static) {
        self.on_added.push(Box::new(subscriber));
    }

    pub fn on_removed(&mut self, subscriber: impl FnMut(&Entity) + 'static) {
        self.on_removed.push(Box::new(subscriber));
    }

    pub fn on_changed(&mut self, subscriber: impl FnMut(&Entity) + 'static) {
        self.on_changed.push(Box::new(subscriber));
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id).map(|slot| &slot.entity)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id).map(|slot| &mut slot.entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().map(|slot| &slot.entity)
    }

    pub fn players(&self) -> impl Iterator<Item = &Entity> {
        self.entities().filter(|e| e.is_player())
    }

    pub fn find_player(&self, username: &str) -> Option<&Entity> {
        self.players()
            .find(|e| e.as_player().is_some_and(|p| p.username() == username))
    }

    pub fn add(&mut self, entity: Entity) -> Result<(), WorldError> {
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(WorldError::DuplicateId(id));
        }

        let chunk = chunk_of(entity.position);
        self.chunks.entry(chunk).or_default().insert(id);
        self.entities.insert(id, Slot { entity, chunk });

        let entity = &self.entities[&id].entity;
        for subscriber in &mut self.on_added {
            subscriber(entity);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let Some(slot) = self.entities.remove(&id) else {
            log::warn!("remove: entity {} not present", id);
            return None;
        };

        self.unindex(id, slot.chunk);
        for subscriber in &mut self.on_removed {
            subscriber(&slot.entity);
        }
        Some(slot.entity)
    }

    /// Signals that `id` was mutated in place. Moves the entity to its new
    /// chunk if its position changed.
    pub fn mark_changed(&mut self, id: EntityId) -> bool {
        let Some(slot) = self.entities.get_mut(&id) else {
            log::warn!("mark_changed: entity {} not present", id);
            return false;
        };

        let chunk = chunk_of(slot.entity.position);
        let old_chunk = std::mem::replace(&mut slot.chunk, chunk);
        if old_chunk != chunk {
            self.unindex(id, old_chunk);
            self.chunks.entry(chunk).or_default().insert(id);
        }

        let entity = &self.entities[&id].entity;
        for subscriber in &mut self.on_changed {
            subscriber(entity);
        }
        true
    }

    pub fn entities_at(&self, position: IVec2) -> impl Iterator<Item = &Entity> {
        self.chunks
            .get(&chunk_of(position))
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
            .filter(move |e| e.position == position)
    }

    pub fn try_get_at(&self, position: IVec2, kind: Option<EntityKind>) -> Option<&Entity> {
        self.entities_at(position)
            .find(|e| kind.is_none_or(|k| e.kind() == k))
    }

    pub fn blocker_at(&self, position: IVec2) -> Option<&Entity> {
        self.entities_at(position).find(|e| e.blocks_movement())
    }

    /// Drops every entity without firing events. Subscribers stay wired.
    pub fn reset(&mut self) {
        self.entities.clear();
        self.chunks.clear();
    }

    fn unindex(&mut self, id: EntityId, chunk: IVec2) {
        if let Some(ids) = self.chunks.get_mut(&chunk) {
            ids.remove(&id);
            if ids.is_empty() {
                self.chunks.remove(&chunk);
            }
        }
    }
}
