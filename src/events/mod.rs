//! Event types emitted by the client.

use serde_json::Value;

use crate::error::WakeError;
use crate::protocol::{Envelope, WakeSignal};
use crate::types::MessageId;

/// Events delivered on the channel returned by [Client::new](crate::Client::new).
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A connection finished its upgrade.
    Connected,

    /// The current connection ended (peer close, read error, or local close).
    Disconnected { reason: Option<String> },

    /// An attempt failed before connecting; the supervisor retries if still armed.
    ConnectFailed { reason: String },

    /// The ordered view changed. Carries a copy of the full view.
    ViewUpdated { lines: Vec<String> },

    /// Running content of an in-flight streamed message.
    StreamUpdated { message_id: MessageId, content: String },

    /// A streamed message was finalized.
    StreamFinished { message_id: MessageId, content: String },

    /// `sessions` payload, forwarded unmodified.
    Sessions(Value),

    /// `session_switched` payload, forwarded unmodified.
    SessionSwitched(Value),

    /// Gateway reported an error.
    ServerError { message: String },

    /// Remote process exited.
    Exit { code: i64 },

    /// The peer asked this endpoint to wake.
    WakeRequested(WakeSignal),

    /// Display acknowledged; buffered content was flushed in order.
    WakeCompleted { delivered: usize },

    /// Buffered content was dropped. Emitted once per wake cycle.
    WakeFailed { cause: WakeError, dropped: usize },

    /// Message with a discriminator the core does not handle.
    Unhandled(Envelope),
}
