use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;

use glam::IVec2;

use super::SessionConfig;
use crate::ConnectionId;
use crate::chat::{ChatMessage, timestamp_now};
use crate::entity::{Entity, EntityId, Player, UsernameError, validate_username};
use crate::message::{CtsMessage, StcMessage};
use crate::simulation;
use crate::world::{WorldContainer, WorldError};

/// How far from the spawn point a free tile is searched for.
pub const SPAWN_SEARCH_RADIUS: i32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenyReason {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("display name must not be empty")]
    EmptyDisplayName,
    #[error("username is longer than {0} bytes")]
    UsernameTooLong(usize),
    #[error("display name is longer than {0} bytes")]
    DisplayNameTooLong(usize),
    #[error(transparent)]
    InvalidUsername(#[from] UsernameError),
    #[error("player '{0}' already exists")]
    AlreadyExists(String),
    #[error("connection {0} already has a session")]
    AlreadyInSession(ConnectionId),
}

/// One encoded game message addressed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub connection: ConnectionId,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
enum SessionState {
    /// Approved, player built but not yet in the world.
    Approved(Entity),
    Joined(EntityId),
}

/// Server half of the session protocol.
///
/// Owns the authoritative world. Every entry point that can mutate the world
/// turns the resulting world events into [`Outbound`] messages before it
/// returns, addressed to the connections joined at that moment.
#[derive(Debug)]
pub struct ServerSession {
    world: WorldContainer,
    config: SessionConfig,
    sessions: HashMap<ConnectionId, SessionState>,
    events: mpsc::Receiver<Vec<u8>>,
    outbound: VecDeque<Outbound>,
}

impl ServerSession {
    pub fn new(config: SessionConfig) -> Self {
        let (tx, events) = mpsc::channel();
        let mut world = WorldContainer::new();

        let added = tx.clone();
        world.on_added(move |entity| {
            let _ = added.send(StcMessage::encode_object_added(entity));
        });
        let removed = tx.clone();
        world.on_removed(move |entity| {
            let _ = removed.send(StcMessage::encode_object_removed(entity.id()));
        });
        world.on_changed(move |entity| {
            let _ = tx.send(StcMessage::encode_object_changed(entity));
        });

        Self {
            world,
            config,
            sessions: HashMap::new(),
            events,
            outbound: VecDeque::new(),
        }
    }

    pub fn world(&self) -> &WorldContainer {
        &self.world
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Validates a connection request. On success the player is built and
    /// held until [`ServerSession::on_connected`].
    pub fn approve(
        &mut self,
        connection: ConnectionId,
        username: &str,
        display_name: &str,
    ) -> Result<(), DenyReason> {
        if self.sessions.contains_key(&connection) {
            return Err(DenyReason::AlreadyInSession(connection));
        }
        if username.is_empty() {
            return Err(DenyReason::EmptyUsername);
        }
        if display_name.trim().is_empty() {
            return Err(DenyReason::EmptyDisplayName);
        }
        if username.len() > self.config.max_username_len {
            return Err(DenyReason::UsernameTooLong(self.config.max_username_len));
        }
        if display_name.len() > self.config.max_display_name_len {
            return Err(DenyReason::DisplayNameTooLong(
                self.config.max_display_name_len,
            ));
        }
        validate_username(username)?;
        if self.username_taken(username) {
            return Err(DenyReason::AlreadyExists(username.to_string()));
        }

        let mut player = Player::new(username.to_string(), display_name.to_string());
        player.connection = Some(connection);
        let entity = Entity::player(self.config.spawn_point, player);

        log::info!(
            "approved connection {} as '{}' ({})",
            connection,
            username,
            entity.id()
        );
        self.sessions
            .insert(connection, SessionState::Approved(entity));
        self.broadcast_chat(&ChatMessage::system(format!("{} is joining", display_name)));
        Ok(())
    }

    /// Transport confirmed the connection: hail, then add the player.
    pub fn on_connected(&mut self, connection: ConnectionId) -> bool {
        let mut entity = match self.sessions.remove(&connection) {
            Some(SessionState::Approved(entity)) => entity,
            Some(state) => {
                log::warn!("connection {} connected twice", connection);
                self.sessions.insert(connection, state);
                return false;
            }
            None => {
                log::warn!("connection {} connected without approval", connection);
                return false;
            }
        };

        entity.position = self.find_spawn();
        let id = entity.id();
        let display_name = entity
            .as_player()
            .map(|p| p.display_name.clone())
            .unwrap_or_default();

        self.send_to(connection, StcMessage::encode_joined(&self.world));
        self.sessions.insert(connection, SessionState::Joined(id));
        if let Err(e) = self.world.add(entity) {
            log::error!("connection {}: {}", connection, e);
            self.sessions.remove(&connection);
            return false;
        }
        self.fan_out();

        log::info!("connection {} joined as {}", connection, id);
        self.broadcast_chat(&ChatMessage::system(format!("{} joined", display_name)));
        let welcome = ChatMessage::system(self.config.welcome.clone());
        self.send_to(connection, StcMessage::encode_chat(&welcome));
        true
    }

    pub fn on_disconnected(&mut self, connection: ConnectionId, reason: &str) {
        match self.sessions.remove(&connection) {
            Some(SessionState::Joined(id)) => {
                let name = self
                    .world
                    .remove(id)
                    .and_then(|e| e.as_player().map(|p| p.display_name.clone()))
                    .unwrap_or_else(|| id.to_string());
                self.fan_out();
                log::info!("connection {} left: {}", connection, reason);
                self.broadcast_chat(&ChatMessage::system(format!("{} left ({})", name, reason)));
            }
            Some(SessionState::Approved(_)) => {
                log::info!("connection {} dropped before joining: {}", connection, reason);
            }
            None => log::debug!("disconnect for unknown connection {}", connection),
        }
    }

    /// Applies one client-to-server message. Malformed or disallowed
    /// messages are logged and dropped; the connection stays up.
    pub fn handle_message(&mut self, connection: ConnectionId, payload: &[u8]) {
        let Some(player_id) = self.player_id(connection) else {
            log::warn!("dropping message from connection {} without a player", connection);
            return;
        };
        let message = match CtsMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("connection {}: bad message: {}", connection, e);
                return;
            }
        };

        match message {
            CtsMessage::AddObject { entity } => {
                if entity.is_player() {
                    log::warn!("connection {} tried to add a player", connection);
                } else if let Err(e) = self.world.add(entity) {
                    log::warn!("connection {}: {}", connection, e);
                }
            }
            CtsMessage::RemoveObject { id } => match self.world.get(id).map(Entity::is_player) {
                None => log::warn!("connection {} removed unknown entity {}", connection, id),
                Some(true) => {
                    log::warn!("connection {} tried to remove player {}", connection, id)
                }
                Some(false) => {
                    self.world.remove(id);
                }
            },
            CtsMessage::PlayerMove { direction } => {
                let updated = match self.world.get_mut(player_id).and_then(Entity::as_player_mut) {
                    Some(player) if player.intent != direction => {
                        player.intent = direction;
                        true
                    }
                    _ => false,
                };
                if updated {
                    self.world.mark_changed(player_id);
                }
            }
            CtsMessage::Chat { timestamp, text } => {
                log::debug!(
                    "chat from {} (client clock skew {} ms)",
                    player_id,
                    timestamp_now() as i64 - timestamp as i64
                );
                let message = ChatMessage {
                    sender: player_id,
                    timestamp: timestamp_now(),
                    text,
                };
                self.broadcast_chat(&message);
            }
        }
        self.fan_out();
    }

    /// Runs one simulation step and returns how many players moved.
    pub fn tick(&mut self) -> usize {
        let moved = simulation::step(&mut self.world);
        self.fan_out();
        moved
    }

    pub fn spawn(&mut self, entity: Entity) -> Result<EntityId, WorldError> {
        let id = entity.id();
        self.world.add(entity)?;
        self.fan_out();
        Ok(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.world.remove(id);
        self.fan_out();
        entity
    }

    /// Mutates an entity in place and replicates the change.
    pub fn update(&mut self, id: EntityId, edit: impl FnOnce(&mut Entity)) -> bool {
        let Some(entity) = self.world.get_mut(id) else {
            return false;
        };
        edit(entity);
        let changed = self.world.mark_changed(id);
        self.fan_out();
        changed
    }

    pub fn broadcast_system(&mut self, text: impl Into<String>) {
        self.broadcast_chat(&ChatMessage::system(text));
    }

    pub fn player_for(&self, connection: ConnectionId) -> Option<&Entity> {
        self.player_id(connection).and_then(|id| self.world.get(id))
    }

    pub fn is_joined(&self, connection: ConnectionId) -> bool {
        self.player_id(connection).is_some()
    }

    pub fn is_pending(&self, connection: ConnectionId) -> bool {
        matches!(
            self.sessions.get(&connection),
            Some(SessionState::Approved(_))
        )
    }

    /// Joined connections in ascending order.
    pub fn joined_connections(&self) -> Vec<ConnectionId> {
        let mut connections: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, state)| matches!(state, SessionState::Joined(_)))
            .map(|(&connection, _)| connection)
            .collect();
        connections.sort_unstable();
        connections
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut connections: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        connections.sort_unstable();
        connections
    }

    pub fn drain_outbound(&mut self) -> impl Iterator<Item = Outbound> + '_ {
        self.outbound.drain(..)
    }

    fn player_id(&self, connection: ConnectionId) -> Option<EntityId> {
        match self.sessions.get(&connection)? {
            SessionState::Joined(id) => Some(*id),
            SessionState::Approved(_) => None,
        }
    }

    fn username_taken(&self, username: &str) -> bool {
        let pending = self.sessions.values().any(|state| match state {
            SessionState::Approved(entity) => entity
                .as_player()
                .is_some_and(|p| p.username() == username),
            SessionState::Joined(_) => false,
        });
        pending || self.world.find_player(username).is_some()
    }

    fn find_spawn(&self) -> IVec2 {
        let origin = self.config.spawn_point;
        if self.world.blocker_at(origin).is_none() {
            return origin;
        }
        for radius in 1..=SPAWN_SEARCH_RADIUS {
            for y in -radius..=radius {
                for x in -radius..=radius {
                    if x.abs().max(y.abs()) != radius {
                        continue;
                    }
                    let (Some(tx), Some(ty)) = (origin.x.checked_add(x), origin.y.checked_add(y))
                    else {
                        continue;
                    };
                    let tile = IVec2::new(tx, ty);
                    if self.world.blocker_at(tile).is_none() {
                        return tile;
                    }
                }
            }
        }
        log::warn!("no free tile within {} of {}", SPAWN_SEARCH_RADIUS, origin);
        origin
    }

    fn fan_out(&mut self) {
        let recipients = self.joined_connections();
        while let Ok(payload) = self.events.try_recv() {
            for &connection in &recipients {
                self.outbound.push_back(Outbound {
                    connection,
                    payload: payload.clone(),
                });
            }
        }
    }

    fn broadcast_chat(&mut self, message: &ChatMessage) {
        let payload = StcMessage::encode_chat(message);
        for connection in self.joined_connections() {
            self.send_to(connection, payload.clone());
        }
    }

    fn send_to(&mut self, connection: ConnectionId, payload: Vec<u8>) {
        self.outbound.push_back(Outbound {
            connection,
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityBody;
    use crate::message::stc;

    fn tags_for(session: &mut ServerSession, connection: ConnectionId) -> Vec<u8> {
        session
            .drain_outbound()
            .filter(|o| o.connection == connection)
            .map(|o| o.payload[0])
            .collect()
    }

    #[test]
    fn test_approval_rules() {
        let mut session = ServerSession::new(SessionConfig::default());
        assert_eq!(session.approve(1, "", "Empty"), Err(DenyReason::EmptyUsername));
        assert_eq!(session.approve(1, "abc", " "), Err(DenyReason::EmptyDisplayName));
        assert_eq!(
            session.approve(1, "a b", "A"),
            Err(DenyReason::InvalidUsername(UsernameError::InvalidChar(' ')))
        );
        assert_eq!(
            session.approve(1, &"x".repeat(33), "X"),
            Err(DenyReason::UsernameTooLong(32))
        );

        session.approve(1, "alice_01", "Alice").unwrap();
        assert!(session.is_pending(1));
        assert_eq!(
            session.approve(1, "other", "Other"),
            Err(DenyReason::AlreadyInSession(1))
        );
        // Pending names are reserved too.
        assert_eq!(
            session.approve(2, "alice_01", "Alice"),
            Err(DenyReason::AlreadyExists("alice_01".into()))
        );
    }

    #[test]
    fn test_hail_precedes_own_object_added() {
        let mut session = ServerSession::new(SessionConfig::default());
        session.approve(1, "alice", "Alice").unwrap();
        assert!(session.on_connected(1));

        assert_eq!(
            tags_for(&mut session, 1),
            vec![stc::JOINED, stc::OBJECT_ADDED, stc::CHAT_MESSAGE, stc::CHAT_MESSAGE]
        );
        assert!(session.is_joined(1));
        assert_eq!(session.world().len(), 1);
    }

    #[test]
    fn test_pending_connections_get_no_broadcasts() {
        let mut session = ServerSession::new(SessionConfig::default());
        session.approve(1, "alice", "Alice").unwrap();
        session.on_connected(1);
        session.approve(2, "bob", "Bob").unwrap();
        session.drain_outbound().for_each(drop);

        session
            .spawn(Entity::spawn(IVec2::new(3, 3), EntityBody::Crate))
            .unwrap();
        let outbound: Vec<Outbound> = session.drain_outbound().collect();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].connection, 1);
    }

    #[test]
    fn test_connect_without_approval_is_refused() {
        let mut session = ServerSession::new(SessionConfig::default());
        assert!(!session.on_connected(7));
        assert_eq!(session.drain_outbound().count(), 0);
    }

    #[test]
    fn test_spawn_skips_blocked_tiles() {
        let mut session = ServerSession::new(SessionConfig::default());
        session
            .spawn(Entity::spawn(IVec2::ZERO, EntityBody::Wall))
            .unwrap();
        session.approve(1, "alice", "Alice").unwrap();
        session.on_connected(1);

        let position = session.player_for(1).unwrap().position;
        assert_ne!(position, IVec2::ZERO);
        assert_eq!(position.abs().max_element(), 1);
    }

    #[test]
    fn test_messages_before_join_are_dropped() {
        let mut session = ServerSession::new(SessionConfig::default());
        session.approve(1, "alice", "Alice").unwrap();
        session.drain_outbound().for_each(drop);

        let add = CtsMessage::AddObject {
            entity: Entity::spawn(IVec2::new(2, 2), EntityBody::Crate),
        };
        session.handle_message(1, &add.encode());
        assert!(session.world().is_empty());
    }

    #[test]
    fn test_disconnect_removes_player_and_announces() {
        let mut session = ServerSession::new(SessionConfig::default());
        session.approve(1, "alice", "Alice").unwrap();
        session.on_connected(1);
        session.approve(2, "bob", "Bob").unwrap();
        session.on_connected(2);
        session.drain_outbound().for_each(drop);

        session.on_disconnected(1, "timed out");
        assert!(session.world().find_player("alice").is_none());
        assert_eq!(
            tags_for(&mut session, 2),
            vec![stc::OBJECT_REMOVED, stc::CHAT_MESSAGE]
        );

        // The name is free again.
        assert!(session.approve(3, "alice", "Alice").is_ok());
    }

    #[test]
    fn test_player_move_replicates_new_intent_once() {
        let mut session = ServerSession::new(SessionConfig::default());
        session.approve(1, "alice", "Alice").unwrap();
        session.on_connected(1);
        session.drain_outbound().for_each(drop);

        let step = CtsMessage::PlayerMove {
            direction: IVec2::new(0, 1),
        }
        .encode();
        session.handle_message(1, &step);
        assert_eq!(tags_for(&mut session, 1), vec![stc::OBJECT_CHANGED]);
        assert_eq!(
            session.player_for(1).unwrap().as_player().unwrap().intent,
            IVec2::new(0, 1)
        );

        session.handle_message(1, &step);
        assert!(tags_for(&mut session, 1).is_empty());
    }

    #[test]
    fn test_spawn_search_near_grid_edge() {
        let config = SessionConfig {
            spawn_point: IVec2::splat(i32::MAX),
            ..Default::default()
        };
        let mut session = ServerSession::new(config);
        session
            .spawn(Entity::spawn(IVec2::splat(i32::MAX), EntityBody::Wall))
            .unwrap();
        session.approve(1, "alice", "Alice").unwrap();
        session.on_connected(1);

        assert_eq!(
            session.player_for(1).unwrap().position,
            IVec2::splat(i32::MAX - 1)
        );
    }
}
