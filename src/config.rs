//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, TransportError};
use crate::types::Target;

/// Gateway the client dials when none is configured.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8765/";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `ws://host[:port][/path]`
    pub url: String,
    /// Constant wait between a lost connection and the next attempt.
    pub reconnect_delay_ms: u64,
    /// How long buffered content waits for a `wake_ack`.
    pub wake_timeout_ms: u64,
    /// Answer inbound `wake_signal` with `wake_ack{ready:true}` (display role).
    pub auto_ack_wake: bool,
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_delay_ms: 3000,
            wake_timeout_ms: 5000,
            auto_ack_wake: false,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Config {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_wake_timeout(mut self, timeout: Duration) -> Self {
        self.wake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_auto_ack_wake(mut self, enabled: bool) -> Self {
        self.auto_ack_wake = enabled;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn wake_timeout(&self) -> Duration {
        Duration::from_millis(self.wake_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn target(&self) -> Result<Target, TransportError> {
        Target::parse(&self.url)
    }
}
