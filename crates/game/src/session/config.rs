use std::time::Duration;

use glam::IVec2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub spawn_point: IVec2,
    pub welcome: String,
    pub max_username_len: usize,
    pub max_display_name_len: usize,
    pub chat_capacity: usize,
    pub chat_fade_after_ms: u64,
    pub chat_lifetime_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            spawn_point: IVec2::ZERO,
            welcome: "Welcome to tilesync!".into(),
            max_username_len: 32,
            max_display_name_len: 64,
            chat_capacity: 64,
            chat_fade_after_ms: 8_000,
            chat_lifetime_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn chat_fade_after(&self) -> Duration {
        Duration::from_millis(self.chat_fade_after_ms)
    }

    pub fn chat_lifetime(&self) -> Duration {
        Duration::from_millis(self.chat_lifetime_ms)
    }
}
