use serde::{Deserialize, Serialize};
use tilesync::{DEFAULT_TICK_RATE, SessionConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub timeout_secs: u64,
    pub resend_interval_ms: u64,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            timeout_secs: 30,
            resend_interval_ms: 200,
            session: SessionConfig::default(),
        }
    }
}
