use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::IVec2;

use tilesync::{
    ConnectionId, ConnectionManager, ConnectionState, Entity, EntityBody, FixedTimestep,
    NetworkEndpoint, NetworkStats, Packet, PacketType, ServerSession, Sign,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};

pub struct GameServer {
    endpoint: NetworkEndpoint,
    connections: ConnectionManager,
    session: ServerSession,
    config: ServerConfig,
    timestep: FixedTimestep,
    last_update: Instant,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let endpoint = NetworkEndpoint::bind(bind_addr)?;
        let mut connections =
            ConnectionManager::with_timeout(config.max_clients, config.timeout_secs);
        connections.set_resend_interval(Duration::from_millis(config.resend_interval_ms));

        Ok(Self {
            endpoint,
            connections,
            session: ServerSession::new(config.session.clone()),
            timestep: FixedTimestep::new(config.tick_rate),
            last_update: Instant::now(),
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Places a handful of fixtures around the spawn point.
    pub fn seed_demo(&mut self) {
        let origin = self.config.session.spawn_point;
        let mut fixtures = Vec::new();
        for x in -6..=6 {
            fixtures.push((IVec2::new(x, -6), EntityBody::Wall));
            fixtures.push((IVec2::new(x, 6), EntityBody::Wall));
        }
        for y in -5..=5 {
            fixtures.push((IVec2::new(-6, y), EntityBody::Wall));
            fixtures.push((IVec2::new(6, y), EntityBody::Wall));
        }
        fixtures.push((IVec2::new(2, 0), EntityBody::Crate));
        fixtures.push((IVec2::new(3, 0), EntityBody::Crate));
        fixtures.push((IVec2::new(-3, 2), EntityBody::Boulder));
        fixtures.push((
            IVec2::new(0, -2),
            EntityBody::Sign(Sign {
                text: "Crates weigh 1, boulders 3. You can push 2.".into(),
            }),
        ));

        let count = fixtures.len();
        for (offset, body) in fixtures {
            if let Err(e) = self.session.spawn(Entity::spawn(origin + offset, body)) {
                log::warn!("seed: {}", e);
            }
        }
        log::info!("seeded {} demo entities", count);
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        self.timestep
            .accumulate((now - self.last_update).as_secs_f32());
        self.last_update = now;

        if let Err(e) = self.process_network() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            });
        }

        while self.timestep.consume_tick() {
            self.session.tick();
        }

        for client in self.connections.cleanup_timed_out() {
            self.session
                .on_disconnected(client.client_id, DisconnectReason::Timeout.as_str());
            self.pending_events
                .push_back(ServerEvent::ClientDisconnected {
                    client_id: client.client_id,
                    reason: DisconnectReason::Timeout,
                });
        }

        self.flush();
    }

    /// Moves session output onto the reliable channels and puts everything
    /// due on the wire.
    fn flush(&mut self) {
        for outbound in self.session.drain_outbound() {
            match self.connections.get_mut(outbound.connection) {
                Some(client) => client.channel.send(&outbound.payload),
                None => log::debug!(
                    "dropping message for gone connection {}",
                    outbound.connection
                ),
            }
        }

        let now = Instant::now();
        let mut datagrams = Vec::new();
        for client in self.connections.iter_mut() {
            if client.state != ConnectionState::Connected {
                continue;
            }
            let addr = client.addr;
            datagrams.extend(client.channel.take_ack().map(|ack| (ack, addr)));
            datagrams.extend(client.channel.outgoing(now).into_iter().map(|p| (p, addr)));
        }

        for (payload, addr) in datagrams {
            if let Err(e) = self.endpoint.send_payload(payload, addr) {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("Failed to send to {}: {}", addr, e),
                });
            }
        }
    }

    pub fn kick_client(&mut self, client_id: ConnectionId) -> bool {
        self.drop_client(client_id, DisconnectReason::Kicked)
    }

    pub fn shutdown_connections(&mut self) {
        for client_id in self.connections.client_ids() {
            self.drop_client(client_id, DisconnectReason::Shutdown);
        }
    }

    fn drop_client(&mut self, client_id: ConnectionId, reason: DisconnectReason) -> bool {
        let Some(client) = self.connections.remove(client_id) else {
            return false;
        };
        let packet = PacketType::Disconnect {
            reason: reason.as_str().to_string(),
        };
        if let Err(e) = self.endpoint.send_payload(packet, client.addr) {
            log::debug!("disconnect notice to {} failed: {}", client.addr, e);
        }

        self.session.on_disconnected(client_id, reason.as_str());
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { client_id, reason });
        self.flush();
        true
    }

    pub fn broadcast_system(&mut self, text: &str) {
        self.session.broadcast_system(text);
        self.flush();
    }

    fn process_network(&mut self) -> io::Result<()> {
        let packets = self.endpoint.receive()?;
        self.dispatch(packets);
        Ok(())
    }

    /// Handles a batch of datagrams. A failed reply costs only its own packet.
    fn dispatch(&mut self, packets: Vec<(Packet, SocketAddr)>) {
        for (packet, addr) in packets {
            if let Err(e) = self.handle_packet(packet.payload, addr) {
                log::warn!("reply to {} failed: {}", addr, e);
            }
        }
    }

    fn handle_packet(&mut self, payload: PacketType, addr: SocketAddr) -> io::Result<()> {
        let result = match payload {
            PacketType::ConnectionRequest {
                client_salt,
                username,
                display_name,
            } => self.handle_connection_request(addr, client_salt, username, display_name),
            PacketType::ChallengeResponse { combined_salt } => {
                self.handle_challenge_response(addr, combined_salt)
            }
            PacketType::Reliable {
                sequence,
                last,
                payload,
            } => {
                self.handle_reliable(addr, sequence, last, payload);
                Ok(())
            }
            PacketType::Ack { next_expected } => {
                if let Some(client) = self.connections.get_by_addr_mut(&addr) {
                    client.channel.on_ack(next_expected);
                }
                Ok(())
            }
            PacketType::Ping { timestamp } => self
                .endpoint
                .send_payload(PacketType::Pong { timestamp }, addr)
                .map(drop),
            PacketType::Disconnect { reason } => {
                self.handle_disconnect(addr, &reason);
                Ok(())
            }
            other => {
                log::debug!("unexpected packet from {}: {:?}", addr, other);
                Ok(())
            }
        };

        if let Some(client) = self.connections.get_by_addr_mut(&addr) {
            client.touch();
        }

        result
    }

    fn handle_connection_request(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
        username: String,
        display_name: String,
    ) -> io::Result<()> {
        if let Some(client) = self.connections.get_by_addr(&addr) {
            // Retransmitted request: repeat the challenge.
            if client.state == ConnectionState::ChallengeResponse {
                let challenge = PacketType::ConnectionChallenge {
                    server_salt: client.server_salt,
                    challenge: client.combined_salt(),
                };
                self.endpoint.send_payload(challenge, addr)?;
            }
            return Ok(());
        }

        self.pending_events.push_back(ServerEvent::ClientConnecting {
            addr,
            username: username.clone(),
        });

        let client_id = match self.connections.get_or_create_pending(addr, client_salt) {
            Ok(client) => client.client_id,
            Err(reason) => return self.deny(addr, reason.to_string()),
        };

        if let Err(reason) = self.session.approve(client_id, &username, &display_name) {
            self.connections.remove(client_id);
            return self.deny(addr, reason.to_string());
        }

        let Some(client) = self.connections.get_mut(client_id) else {
            return Ok(());
        };
        client.username = username;
        client.state = ConnectionState::ChallengeResponse;
        let challenge = PacketType::ConnectionChallenge {
            server_salt: client.server_salt,
            challenge: client.combined_salt(),
        };
        self.endpoint.send_payload(challenge, addr)?;
        self.flush();

        Ok(())
    }

    fn deny(&mut self, addr: SocketAddr, reason: String) -> io::Result<()> {
        log::info!("denied {}: {}", addr, reason);
        self.endpoint.send_payload(
            PacketType::ConnectionDenied {
                reason: reason.clone(),
            },
            addr,
        )?;
        self.pending_events
            .push_back(ServerEvent::ConnectionDenied { addr, reason });
        Ok(())
    }

    fn handle_challenge_response(
        &mut self,
        addr: SocketAddr,
        combined_salt: u64,
    ) -> io::Result<()> {
        let Some(client) = self.connections.get_by_addr_mut(&addr) else {
            return Ok(());
        };
        let client_id = client.client_id;

        if client.state == ConnectionState::Connected {
            // Our ConnectionAccepted was lost.
            self.endpoint
                .send_payload(PacketType::ConnectionAccepted { client_id }, addr)?;
            return Ok(());
        }

        if combined_salt != client.combined_salt() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Invalid challenge response from {}", addr),
            });
            return Ok(());
        }

        client.state = ConnectionState::Connected;
        // A lost notice is repaired when the client repeats its response.
        let accepted = self
            .endpoint
            .send_payload(PacketType::ConnectionAccepted { client_id }, addr);

        if !self.session.on_connected(client_id) {
            self.connections.remove(client_id);
            return self.deny(addr, "session lost".into());
        }
        if let Some(player) = self.session.player_for(client_id) {
            self.pending_events.push_back(ServerEvent::ClientConnected {
                client_id,
                addr,
                entity_id: player.id(),
            });
        }
        self.flush();

        accepted.map(drop)
    }

    fn handle_reliable(&mut self, addr: SocketAddr, sequence: u32, last: bool, payload: Vec<u8>) {
        let Some(client) = self.connections.get_by_addr_mut(&addr) else {
            log::debug!("reliable fragment from unknown {}", addr);
            return;
        };
        if client.state != ConnectionState::Connected {
            return;
        }
        let client_id = client.client_id;
        for message in client.channel.receive(sequence, last, payload) {
            self.session.handle_message(client_id, &message);
        }
    }

    fn handle_disconnect(&mut self, addr: SocketAddr, reason: &str) {
        if let Some(client) = self.connections.remove_by_addr(&addr) {
            log::debug!("{} disconnected: {}", addr, reason);
            self.session
                .on_disconnected(client.client_id, DisconnectReason::Graceful.as_str());
            self.pending_events
                .push_back(ServerEvent::ClientDisconnected {
                    client_id: client.client_id,
                    reason: DisconnectReason::Graceful,
                });
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.timestep.tick(),
            client_count: self.connections.connected_count(),
            max_clients: self.config.max_clients,
            entity_count: self.session.world().len(),
            network_stats: self.endpoint.stats().clone(),
        }
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        let mut infos: Vec<ClientInfo> = self
            .connections
            .iter()
            .filter(|c| c.state == ConnectionState::Connected)
            .map(|c| ClientInfo {
                client_id: c.client_id,
                addr: c.addr,
                username: c.username.clone(),
                position: self.session.player_for(c.client_id).map(|e| e.position),
                connected_secs: c.connected_at.elapsed().as_secs(),
                unacked: c.channel.unacked_count(),
                resent: c.channel.resent_count(),
            })
            .collect();
        infos.sort_by_key(|info| info.client_id);
        infos
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u64,
    pub client_count: usize,
    pub max_clients: usize,
    pub entity_count: usize,
    pub network_stats: NetworkStats,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: ConnectionId,
    pub addr: SocketAddr,
    pub username: String,
    pub position: Option<IVec2>,
    pub connected_secs: u64,
    pub unacked: usize,
    pub resent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> GameServer {
        GameServer::new("127.0.0.1:0", ServerConfig::default()).unwrap()
    }

    fn request(username: &str) -> Packet {
        Packet::new(PacketType::ConnectionRequest {
            client_salt: 7,
            username: username.into(),
            display_name: username.into(),
        })
    }

    #[test]
    fn test_failed_reply_does_not_drop_the_batch() {
        let mut server = server();
        // An IPv4 socket cannot answer an IPv6 sender.
        let unreachable: SocketAddr = "[::1]:5000".parse().unwrap();
        let client: SocketAddr = "127.0.0.1:5001".parse().unwrap();

        server.dispatch(vec![
            (Packet::new(PacketType::Ping { timestamp: 1 }), unreachable),
            (request("alice"), client),
        ]);

        assert_eq!(server.connections.total_count(), 1);
        let pending = server.connections.get_by_addr(&client).unwrap();
        assert_eq!(pending.state, ConnectionState::ChallengeResponse);
        assert!(server.session.is_pending(pending.client_id));
        assert!(server.drain_events().any(|event| matches!(
            event,
            ServerEvent::ClientConnecting { username, .. } if username == "alice"
        )));
    }

    #[test]
    fn test_denial_to_unreachable_peer_keeps_going() {
        let mut server = server();
        let unreachable: SocketAddr = "[::1]:5000".parse().unwrap();
        let client: SocketAddr = "127.0.0.1:5002".parse().unwrap();

        server.dispatch(vec![(request("Bad Name"), unreachable), (request("bob"), client)]);

        assert!(server.connections.get_by_addr(&unreachable).is_none());
        assert!(server.connections.get_by_addr(&client).is_some());
    }
}
