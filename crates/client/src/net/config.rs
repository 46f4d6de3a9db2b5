use serde::{Deserialize, Serialize};
use tilesync::SessionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connection_timeout_secs: u64,
    pub timeout_secs: u64,
    pub request_interval_ms: u64,
    pub resend_interval_ms: u64,
    pub ping_interval_ms: u64,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 5,
            timeout_secs: 30,
            request_interval_ms: 500,
            resend_interval_ms: 200,
            ping_interval_ms: 1000,
            session: SessionConfig::default(),
        }
    }
}
