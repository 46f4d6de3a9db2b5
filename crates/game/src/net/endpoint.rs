//! Non-blocking UDP socket that speaks [`Packet`]s.
//!
//! Every inbound datagram is vetted before the protocol layer sees it. An
//! endpoint with a peer (the client side) also drops traffic from anyone else
//! and tracks how long that peer has been silent.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use super::protocol::{MAX_FRAGMENT_SIZE, MAX_PACKET_SIZE, Packet, PacketType};
use super::stats::NetworkStats;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
// Smaller than any archived packet.
const MIN_DATAGRAM_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("{0} byte datagram is too short")]
    Runt(usize),
    #[error("not a packet")]
    Undecodable,
    #[error("wrong magic or protocol version")]
    BadHeader,
    #[error("{0} byte fragment exceeds the fragment limit")]
    OversizedFragment(usize),
    #[error("sender is not the connected peer")]
    Stranger,
}

/// Decodes one datagram, or says why it must be dropped.
pub fn vet(
    data: &[u8],
    from: SocketAddr,
    peer: Option<SocketAddr>,
) -> Result<Packet, Rejection> {
    if peer.is_some_and(|peer| peer != from) {
        return Err(Rejection::Stranger);
    }
    if data.len() < MIN_DATAGRAM_SIZE {
        return Err(Rejection::Runt(data.len()));
    }
    let packet = Packet::deserialize(data).map_err(|_| Rejection::Undecodable)?;
    if !packet.header.is_valid() {
        return Err(Rejection::BadHeader);
    }
    match &packet.payload {
        PacketType::Reliable { payload, .. } if payload.len() > MAX_FRAGMENT_SIZE => {
            Err(Rejection::OversizedFragment(payload.len()))
        }
        _ => Ok(packet),
    }
}

pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,
    stats: NetworkStats,
    buffer: [u8; MAX_PACKET_SIZE],
    timeout: Duration,
    last_heard: Instant,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            local_addr: socket.local_addr()?,
            socket,
            peer: None,
            stats: NetworkStats::default(),
            buffer: [0u8; MAX_PACKET_SIZE],
            timeout: DEFAULT_TIMEOUT,
            last_heard: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Pins the endpoint to one peer and restarts its silence timer.
    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.peer = Some(addr);
        self.touch();
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn record_rtt(&mut self, rtt_ms: f32) {
        self.stats.record_rtt(rtt_ms);
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        if let PacketType::Reliable { payload, .. } = &packet.payload {
            if payload.len() > MAX_FRAGMENT_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} byte fragment exceeds {}", payload.len(), MAX_FRAGMENT_SIZE),
                ));
            }
        }
        let data = packet
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} byte datagram exceeds {}", data.len(), MAX_PACKET_SIZE),
            ));
        }

        let bytes = self.socket.send_to(&data, addr)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        Ok(bytes)
    }

    /// Sends to the pinned peer.
    pub fn send(&mut self, packet: &Packet) -> io::Result<usize> {
        let addr = self
            .peer
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no peer set"))?;
        self.send_to(packet, addr)
    }

    pub fn send_payload(&mut self, payload: PacketType, addr: SocketAddr) -> io::Result<usize> {
        self.send_to(&Packet::new(payload), addr)
    }

    /// Drains the socket, keeping only datagrams that pass [`vet`].
    pub fn receive(&mut self) -> io::Result<Vec<(Packet, SocketAddr)>> {
        let mut packets = Vec::new();
        loop {
            let (size, from) = match self.socket.recv_from(&mut self.buffer) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send surfaces here on Windows.
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            };
            match vet(&self.buffer[..size], from, self.peer) {
                Ok(packet) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;
                    self.last_heard = Instant::now();
                    packets.push((packet, from));
                }
                Err(rejection) => {
                    log::debug!("dropped datagram from {}: {}", from, rejection);
                    self.stats.packets_rejected += 1;
                }
            }
        }
        Ok(packets)
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_heard.elapsed() > self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn touch(&mut self) {
        self.last_heard = Instant::now();
    }
}
