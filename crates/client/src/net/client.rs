use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tilesync::net::rand_u64;
use tilesync::{
    ClientSession, ConnectionId, ConnectionState, Inbound, NetworkEndpoint, NetworkStats, Packet,
    PacketType, ReliableChannel, timestamp_now,
};

use super::config::ClientConfig;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected { client_id: ConnectionId },
    Denied { reason: String },
    Disconnected { reason: String },
    Inbound(Inbound),
}

pub struct NetworkClient {
    endpoint: NetworkEndpoint,
    channel: ReliableChannel,
    session: ClientSession,
    config: ClientConfig,
    state: ConnectionState,
    client_salt: u64,
    server_salt: Option<u64>,
    display_name: String,
    connection_start_time: Option<Instant>,
    last_request_time: Instant,
    last_ping_time: Instant,
    events: VecDeque<ClientEvent>,
}

impl NetworkClient {
    pub fn new(
        config: ClientConfig,
        username: impl Into<String>,
        display_name: impl Into<String>,
    ) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind("0.0.0.0:0")?;
        endpoint.set_timeout(Duration::from_secs(config.timeout_secs));

        Ok(Self {
            endpoint,
            channel: ReliableChannel::new(Duration::from_millis(config.resend_interval_ms)),
            session: ClientSession::new(username, &config.session),
            state: ConnectionState::Disconnected,
            client_salt: rand_u64(),
            server_salt: None,
            display_name: display_name.into(),
            connection_start_time: None,
            last_request_time: Instant::now(),
            last_ping_time: Instant::now(),
            events: VecDeque::new(),
            config,
        })
    }

    pub fn connect(&mut self, server_addr: SocketAddr) -> io::Result<()> {
        log::info!("Connecting to {} as '{}'", server_addr, self.session.username());

        self.endpoint.set_remote(server_addr);
        self.state = ConnectionState::Connecting;
        self.connection_start_time = Some(Instant::now());

        self.send_connection_request()
    }

    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            let packet = Packet::new(PacketType::Disconnect {
                reason: "quit".into(),
            });
            if let Err(e) = self.endpoint.send(&packet) {
                log::debug!("Disconnect notice failed: {}", e);
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.server_salt = None;
        self.client_salt = rand_u64();
        self.connection_start_time = None;
        self.channel.reset();
        self.session.reset();
    }

    fn send_connection_request(&mut self) -> io::Result<()> {
        self.last_request_time = Instant::now();
        let packet = Packet::new(PacketType::ConnectionRequest {
            client_salt: self.client_salt,
            username: self.session.username().to_string(),
            display_name: self.display_name.clone(),
        });
        self.endpoint.send(&packet)?;
        Ok(())
    }

    pub fn update(&mut self) -> io::Result<()> {
        self.process_network()?;

        let request_interval = Duration::from_millis(self.config.request_interval_ms);
        match self.state {
            ConnectionState::Connecting | ConnectionState::ChallengeResponse => {
                if self
                    .connection_start_time
                    .is_some_and(|start| {
                        start.elapsed() > Duration::from_secs(self.config.connection_timeout_secs)
                    })
                {
                    log::warn!("Connection timeout");
                    self.lost("connection timed out");
                } else if self.last_request_time.elapsed() >= request_interval {
                    // Handshake datagrams are unreliable; repeat until answered.
                    match (self.state, self.server_salt) {
                        (ConnectionState::ChallengeResponse, Some(server_salt)) => {
                            self.last_request_time = Instant::now();
                            self.send_challenge_response(server_salt)?;
                        }
                        _ => self.send_connection_request()?,
                    }
                }
            }
            ConnectionState::Connected => {
                if self.last_ping_time.elapsed()
                    >= Duration::from_millis(self.config.ping_interval_ms)
                {
                    self.send_ping()?;
                    self.last_ping_time = Instant::now();
                }

                if self.endpoint.is_timed_out() {
                    log::warn!("Server connection lost");
                    self.lost("server stopped responding");
                }
            }
            ConnectionState::Disconnected => {}
        }

        self.flush()?;
        self.session.chat_mut().prune(Instant::now());
        Ok(())
    }

    fn lost(&mut self, reason: &str) {
        self.events.push_back(ClientEvent::Disconnected {
            reason: reason.to_string(),
        });
        self.reset();
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.state != ConnectionState::Connected {
            return Ok(());
        }
        for message in self.session.drain_outbound() {
            self.channel.send(&message);
        }

        let mut payloads: Vec<PacketType> = self.channel.take_ack().into_iter().collect();
        payloads.extend(self.channel.outgoing(Instant::now()));
        for payload in payloads {
            self.endpoint.send(&Packet::new(payload))?;
        }
        Ok(())
    }

    fn send_ping(&mut self) -> io::Result<()> {
        let packet = Packet::new(PacketType::Ping {
            timestamp: timestamp_now(),
        });
        self.endpoint.send(&packet)?;
        Ok(())
    }

    fn process_network(&mut self) -> io::Result<()> {
        let packets = self.endpoint.receive()?;

        // The endpoint is pinned to the server, so strangers never get here.
        for (packet, _) in packets {
            self.handle_payload(packet.payload)?;
        }

        Ok(())
    }

    fn handle_payload(&mut self, payload: PacketType) -> io::Result<()> {
        match payload {
            PacketType::ConnectionChallenge {
                server_salt,
                challenge,
            } => {
                self.handle_challenge(server_salt, challenge)?;
            }
            PacketType::ConnectionAccepted { client_id } => {
                self.handle_connection_accepted(client_id);
            }
            PacketType::ConnectionDenied { reason } => {
                log::warn!("Connection denied: {}", reason);
                self.events.push_back(ClientEvent::Denied { reason });
                self.reset();
            }
            PacketType::Reliable {
                sequence,
                last,
                payload,
            } => {
                if self.state == ConnectionState::Connected {
                    for message in self.channel.receive(sequence, last, payload) {
                        self.handle_message(&message);
                    }
                }
            }
            PacketType::Ack { next_expected } => self.channel.on_ack(next_expected),
            PacketType::Pong { timestamp } => self.handle_pong(timestamp),
            PacketType::Disconnect { reason } => {
                log::info!("Disconnected by server: {}", reason);
                self.events.push_back(ClientEvent::Disconnected { reason });
                self.reset();
            }
            other => log::debug!("Unexpected packet: {:?}", other),
        }

        Ok(())
    }

    fn handle_message(&mut self, message: &[u8]) {
        match self.session.handle_message(message) {
            Ok(Inbound::Ignored) => {}
            Ok(inbound) => self.events.push_back(ClientEvent::Inbound(inbound)),
            Err(e) => log::warn!("Bad message from server: {}", e),
        }
    }

    fn handle_challenge(&mut self, server_salt: u64, challenge: u64) -> io::Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        log::debug!("Received challenge from server");

        if challenge != self.client_salt ^ server_salt {
            log::warn!("Challenge mismatch");
            return Ok(());
        }

        self.server_salt = Some(server_salt);
        self.state = ConnectionState::ChallengeResponse;
        self.send_challenge_response(server_salt)
    }

    fn send_challenge_response(&mut self, server_salt: u64) -> io::Result<()> {
        let packet = Packet::new(PacketType::ChallengeResponse {
            combined_salt: self.client_salt ^ server_salt,
        });
        self.endpoint.send(&packet)?;
        Ok(())
    }

    fn handle_connection_accepted(&mut self, client_id: ConnectionId) {
        if self.state == ConnectionState::Connected {
            return;
        }
        log::info!("Connected to server with client ID {}", client_id);

        self.state = ConnectionState::Connected;
        self.events.push_back(ClientEvent::Connected { client_id });
    }

    fn handle_pong(&mut self, timestamp: u64) {
        let rtt = timestamp_now().saturating_sub(timestamp);
        log::debug!("Ping RTT: {} ms", rtt);
        self.endpoint.record_rtt(rtt as f32);
        self.session.mark_ping_dirty();
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }
}
