use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::entity::EntityId;

pub const SYSTEM_SENDER: EntityId = EntityId::nil();

pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: EntityId,
    pub timestamp: u64,
    pub text: String,
}

impl ChatMessage {
    pub fn new(sender: EntityId, text: impl Into<String>) -> Self {
        Self {
            sender,
            timestamp: timestamp_now(),
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SYSTEM_SENDER, text)
    }

    pub fn is_system(&self) -> bool {
        self.sender.is_nil()
    }
}

#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub message: ChatMessage,
    pub received_at: Instant,
}

/// Client-side chat history. Entries stay opaque for `fade_after`, fade
/// linearly until `lifetime`, then get pruned.
#[derive(Debug)]
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
    capacity: usize,
    fade_after: Duration,
    lifetime: Duration,
}

impl ChatLog {
    pub fn new(capacity: usize, fade_after: Duration, lifetime: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            fade_after,
            lifetime: lifetime.max(fade_after),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.push_at(message, Instant::now());
    }

    pub fn push_at(&mut self, message: ChatMessage, received_at: Instant) {
        while self.entries.len() >= self.capacity.max(1) {
            self.entries.pop_front();
        }
        self.entries.push_back(ChatEntry {
            message,
            received_at,
        });
    }

    pub fn alpha(&self, entry: &ChatEntry, now: Instant) -> f32 {
        let age = now.saturating_duration_since(entry.received_at);
        if age <= self.fade_after {
            return 1.0;
        }
        if age >= self.lifetime {
            return 0.0;
        }
        let span = (self.lifetime - self.fade_after).as_secs_f32();
        1.0 - (age - self.fade_after).as_secs_f32() / span
    }

    /// Entries still on screen at `now`, oldest first, with their opacity.
    pub fn visible(&self, now: Instant) -> impl Iterator<Item = (&ChatEntry, f32)> {
        self.entries
            .iter()
            .map(move |entry| (entry, self.alpha(entry, now)))
            .filter(|(_, alpha)| *alpha > 0.0)
    }

    pub fn prune(&mut self, now: Instant) {
        let lifetime = self.lifetime;
        self.entries
            .retain(|entry| now.saturating_duration_since(entry.received_at) < lifetime);
    }

    pub fn latest(&self) -> Option<&ChatMessage> {
        self.entries.back().map(|entry| &entry.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> ChatLog {
        ChatLog::new(3, Duration::from_secs(5), Duration::from_secs(10))
    }

    #[test]
    fn test_system_messages_use_nil_sender() {
        let msg = ChatMessage::system("server restarting");
        assert!(msg.is_system());
        assert!(!ChatMessage::new(EntityId::new_v4(), "hi").is_system());
    }

    #[test]
    fn test_fade_lifecycle() {
        let mut chat = log();
        let start = Instant::now();
        chat.push_at(ChatMessage::system("hello"), start);

        let alpha_at = |secs: f32| {
            let now = start + Duration::from_secs_f32(secs);
            chat.visible(now).map(|(_, a)| a).next()
        };

        assert_eq!(alpha_at(1.0), Some(1.0));
        let mid = alpha_at(7.5).unwrap();
        assert!((mid - 0.5).abs() < 0.01);
        assert_eq!(alpha_at(10.0), None);
    }

    #[test]
    fn test_prune_drops_expired_entries() {
        let mut chat = log();
        let start = Instant::now();
        chat.push_at(ChatMessage::system("old"), start);
        chat.push_at(ChatMessage::system("new"), start + Duration::from_secs(8));

        chat.prune(start + Duration::from_secs(12));
        assert_eq!(chat.len(), 1);
        assert_eq!(chat.latest().unwrap().text, "new");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut chat = log();
        for i in 0..5 {
            chat.push(ChatMessage::system(format!("line {i}")));
        }
        assert_eq!(chat.len(), 3);
        let first = chat.visible(Instant::now()).next().unwrap().0;
        assert_eq!(first.message.text, "line 2");
    }
}
