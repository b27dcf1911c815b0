mod key;
mod target;

pub use key::NamedKey;
pub use target::{Target, DEFAULT_WS_PORT};

/// Caller-assigned id of one streamed message; unique per connection lifetime.
pub type MessageId = String;

/// Lifecycle of one connection attempt.
///
/// `Disconnected -> Connecting -> (Connected | Error) -> Disconnected`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the attempt is over and a fresh one may start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error(_))
    }
}
