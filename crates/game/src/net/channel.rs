//! Reliable-ordered delivery on top of unreliable datagrams.
//!
//! Messages are split into fragments, each carrying its own sequence number.
//! Fragments are resent until a cumulative [`PacketType::Ack`] covers them and
//! the receiver hands out whole messages strictly in send order.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::protocol::{MAX_FRAGMENT_SIZE, PacketType, sequence_greater_than};

pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_millis(200);
pub const RECEIVE_WINDOW: u32 = 4096;
/// Largest reassembled message a peer may deliver.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
struct InFlight {
    sequence: u32,
    last: bool,
    payload: Vec<u8>,
    sent_at: Option<Instant>,
    sends: u32,
}

#[derive(Debug, Clone)]
struct Fragment {
    last: bool,
    payload: Vec<u8>,
}

#[derive(Debug)]
pub struct ReliableChannel {
    next_send: u32,
    in_flight: VecDeque<InFlight>,
    next_expected: u32,
    out_of_order: HashMap<u32, Fragment>,
    assembling: Vec<u8>,
    discarding: bool,
    resend_interval: Duration,
    ack_pending: bool,
    resent: u64,
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new(DEFAULT_RESEND_INTERVAL)
    }
}

impl ReliableChannel {
    pub fn new(resend_interval: Duration) -> Self {
        Self {
            next_send: 0,
            in_flight: VecDeque::new(),
            next_expected: 0,
            out_of_order: HashMap::new(),
            assembling: Vec::new(),
            discarding: false,
            resend_interval,
            ack_pending: false,
            resent: 0,
        }
    }

    /// Queues a message; it goes out on the next [`ReliableChannel::outgoing`].
    pub fn send(&mut self, message: &[u8]) {
        if message.len() > MAX_MESSAGE_SIZE {
            log::warn!(
                "sending {} byte message, peers drop anything over {}",
                message.len(),
                MAX_MESSAGE_SIZE
            );
        }
        let mut chunks = message.chunks(MAX_FRAGMENT_SIZE).peekable();
        if chunks.peek().is_none() {
            self.push_fragment(true, Vec::new());
            return;
        }
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            self.push_fragment(last, chunk.to_vec());
        }
    }

    fn push_fragment(&mut self, last: bool, payload: Vec<u8>) {
        let sequence = self.next_send;
        self.next_send = self.next_send.wrapping_add(1);
        self.in_flight.push_back(InFlight {
            sequence,
            last,
            payload,
            sent_at: None,
            sends: 0,
        });
    }

    /// Fragments that were never sent or whose resend timer expired.
    pub fn outgoing(&mut self, now: Instant) -> Vec<PacketType> {
        let interval = self.resend_interval;
        let mut packets = Vec::new();
        for fragment in &mut self.in_flight {
            let due = fragment
                .sent_at
                .is_none_or(|sent| now.saturating_duration_since(sent) >= interval);
            if !due {
                continue;
            }
            if fragment.sends > 0 {
                self.resent += 1;
            }
            fragment.sent_at = Some(now);
            fragment.sends += 1;
            packets.push(PacketType::Reliable {
                sequence: fragment.sequence,
                last: fragment.last,
                payload: fragment.payload.clone(),
            });
        }
        packets
    }

    pub fn on_ack(&mut self, next_expected: u32) {
        while self
            .in_flight
            .front()
            .is_some_and(|f| sequence_greater_than(next_expected, f.sequence))
        {
            self.in_flight.pop_front();
        }
    }

    /// Accepts one fragment and returns every message it completes, in order.
    pub fn receive(&mut self, sequence: u32, last: bool, payload: Vec<u8>) -> Vec<Vec<u8>> {
        self.ack_pending = true;

        let offset = sequence.wrapping_sub(self.next_expected);
        if offset >= RECEIVE_WINDOW {
            log::trace!("dropping fragment {} outside receive window", sequence);
            return Vec::new();
        }
        self.out_of_order
            .entry(sequence)
            .or_insert(Fragment { last, payload });

        let mut delivered = Vec::new();
        while let Some(fragment) = self.out_of_order.remove(&self.next_expected) {
            self.next_expected = self.next_expected.wrapping_add(1);
            if let Some(message) = self.assemble(fragment) {
                delivered.push(message);
            }
        }
        delivered
    }

    fn assemble(&mut self, fragment: Fragment) -> Option<Vec<u8>> {
        if self.discarding {
            self.discarding = !fragment.last;
            return None;
        }
        if self.assembling.len() + fragment.payload.len() > MAX_MESSAGE_SIZE {
            log::warn!(
                "discarding message larger than {} bytes at fragment {}",
                MAX_MESSAGE_SIZE,
                self.next_expected.wrapping_sub(1)
            );
            self.assembling = Vec::new();
            self.discarding = !fragment.last;
            return None;
        }
        self.assembling.extend_from_slice(&fragment.payload);
        fragment.last.then(|| std::mem::take(&mut self.assembling))
    }

    pub fn take_ack(&mut self) -> Option<PacketType> {
        if !std::mem::take(&mut self.ack_pending) {
            return None;
        }
        Some(PacketType::Ack {
            next_expected: self.next_expected,
        })
    }

    pub fn unacked_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn resent_count(&self) -> u64 {
        self.resent
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.resend_interval);
    }
}
