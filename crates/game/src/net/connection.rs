use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::channel::ReliableChannel;
use super::stats::rand_u64;
use crate::ConnectionId;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ChallengeResponse,
    Connected,
}

#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub client_id: ConnectionId,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub username: String,
    pub connected_at: Instant,
    pub last_receive_time: Instant,
    pub channel: ReliableChannel,
}

impl ClientConnection {
    pub fn new(addr: SocketAddr, client_id: ConnectionId, client_salt: u64) -> Self {
        let now = Instant::now();
        Self {
            addr,
            client_id,
            state: ConnectionState::Connecting,
            client_salt,
            server_salt: rand_u64(),
            username: String::new(),
            connected_at: now,
            last_receive_time: now,
            channel: ReliableChannel::default(),
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Server full")]
    ServerFull,
}

#[derive(Debug)]
pub struct ConnectionManager {
    clients_by_addr: HashMap<SocketAddr, ConnectionId>,
    clients: HashMap<ConnectionId, ClientConnection>,
    next_client_id: ConnectionId,
    max_clients: usize,
    timeout: Duration,
    resend_interval: Option<Duration>,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(max_clients: usize, timeout_secs: u64) -> Self {
        Self {
            clients_by_addr: HashMap::new(),
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout: Duration::from_secs(timeout_secs),
            resend_interval: None,
        }
    }

    pub fn set_resend_interval(&mut self, interval: Duration) {
        self.resend_interval = Some(interval);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Looks up the connection for `addr`, creating a pending one if needed.
    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
    ) -> Result<&mut ClientConnection, ConnectError> {
        let client_id = match self.clients_by_addr.get(&addr) {
            Some(&client_id) => client_id,
            None => {
                if self.clients.len() >= self.max_clients {
                    return Err(ConnectError::ServerFull);
                }
                let client_id = self.next_client_id;
                self.next_client_id = self.next_client_id.wrapping_add(1).max(1);

                let mut connection = ClientConnection::new(addr, client_id, client_salt);
                if let Some(interval) = self.resend_interval {
                    connection.channel = ReliableChannel::new(interval);
                }
                self.clients.insert(client_id, connection);
                self.clients_by_addr.insert(addr, client_id);
                client_id
            }
        };

        self.clients
            .get_mut(&client_id)
            .ok_or(ConnectError::ServerFull)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ClientConnection> {
        self.clients_by_addr
            .get(addr)
            .and_then(|id| self.clients.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ClientConnection> {
        let id = self.clients_by_addr.get(addr)?;
        self.clients.get_mut(id)
    }

    pub fn get(&self, client_id: ConnectionId) -> Option<&ClientConnection> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ConnectionId) -> Option<&mut ClientConnection> {
        self.clients.get_mut(&client_id)
    }

    pub fn remove(&mut self, client_id: ConnectionId) -> Option<ClientConnection> {
        let conn = self.clients.remove(&client_id)?;
        self.clients_by_addr.remove(&conn.addr);
        Some(conn)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<ClientConnection> {
        let client_id = self.clients_by_addr.remove(addr)?;
        self.clients.remove(&client_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientConnection> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientConnection> {
        self.clients.values_mut()
    }

    pub fn client_ids(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    pub fn cleanup_timed_out(&mut self) -> Vec<ClientConnection> {
        let timed_out: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.clients.len()
    }
}
