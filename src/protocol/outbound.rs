use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use super::{WakeAck, WakeSignal};
use crate::error::ProtocolError;
use crate::types::NamedKey;

/// Messages the core sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Input { text: String },
    Key { key: NamedKey },
    Image { data: String },
    ListSessions,
    SwitchSession { session: String },
    WakeSignal(WakeSignal),
    WakeAck(WakeAck),
}

impl Outbound {
    /// `image` message carrying `bytes` base64-encoded.
    pub fn image(bytes: &[u8]) -> Self {
        Outbound::Image {
            data: STANDARD.encode(bytes),
        }
    }

    /// Wire discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Input { .. } => "input",
            Outbound::Key { .. } => "key",
            Outbound::Image { .. } => "image",
            Outbound::ListSessions => "list_sessions",
            Outbound::SwitchSession { .. } => "switch_session",
            Outbound::WakeSignal(_) => "wake_signal",
            Outbound::WakeAck(_) => "wake_ack",
        }
    }

    /// Part of the wake handshake itself, so never held back by it.
    pub fn is_wake_control(&self) -> bool {
        matches!(self, Outbound::WakeSignal(_) | Outbound::WakeAck(_))
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
