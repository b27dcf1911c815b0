use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the link core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("wake: {0}")]
    Wake(#[from] WakeError),

    #[error("not connected")]
    NotConnected,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the error leaves the byte stream at an unknown position.
    ///
    /// A connection that hits one of these cannot decode further frames.
    pub fn is_stream_fatal(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Protocol(p) => p.is_stream_fatal(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(TransportError::Io(e.to_string()))
    }
}

/// Socket, handshake and connection-level failures.
///
/// These trigger the reconnect supervisor and never end the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("connect timed out")]
    Timeout,

    #[error("disconnected")]
    Disconnected,
}

/// Wire and envelope decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame length {declared} exceeds cap of {max} bytes")]
    FrameTooLarge { declared: u64, max: u64 },

    #[error("reserved opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("handshake response exceeds {0} bytes")]
    HandshakeTooLarge(usize),

    #[error("payload is not valid utf-8")]
    InvalidUtf8,

    #[error("malformed json: {0}")]
    Json(String),

    #[error("envelope has no type discriminator")]
    MissingType,

    #[error("bad `{kind}` payload: {reason}")]
    BadPayload { kind: String, reason: String },
}

impl ProtocolError {
    /// Header-level failures abort the connection; message-level ones only drop the message.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooLarge { .. } | ProtocolError::HandshakeTooLarge(_)
        )
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e.to_string())
    }
}

/// Why buffered content never reached the display.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeError {
    #[error("display answered not ready")]
    NotReady,

    #[error("no acknowledgment before timeout")]
    Timeout,

    #[error("wake signal could not be sent")]
    SignalNotSent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_errors_are_fatal_message_errors_are_not() {
        let too_large = Error::from(ProtocolError::FrameTooLarge {
            declared: u64::MAX,
            max: 10,
        });
        assert!(too_large.is_stream_fatal());
        assert!(!Error::from(ProtocolError::InvalidUtf8).is_stream_fatal());
        assert!(!Error::from(ProtocolError::MissingType).is_stream_fatal());
        assert!(Error::from(TransportError::Disconnected).is_stream_fatal());
    }

    #[test]
    fn io_errors_map_to_transport() {
        let e: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(e, Error::Transport(TransportError::Io(_))));
    }
}
