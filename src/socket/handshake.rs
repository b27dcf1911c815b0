//! HTTP/1.1 Upgrade exchange that turns a raw stream into a framed channel.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::Result;

/// Upper bound on the response head; a peer that never sends `\r\n\r\n` is cut off here.
pub const MAX_RESPONSE_HEAD: usize = 8 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Fresh base64-encoded 16-byte `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

fn build_request(host: &str, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// Read the response head one byte at a time, stopping exactly at the blank line.
///
/// Nothing past the terminator is consumed, so the first frame stays in the stream.
async fn read_response_head<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(256);
    while !head.ends_with(HEAD_TERMINATOR) {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(ProtocolError::HandshakeTooLarge(MAX_RESPONSE_HEAD).into());
        }
        head.push(reader.read_u8().await?);
    }
    String::from_utf8(head).map_err(|_| ProtocolError::InvalidUtf8.into())
}

fn status_code(status_line: &str) -> Option<&str> {
    status_line.split_whitespace().nth(1)
}

/// Perform the client upgrade on `stream`.
///
/// Returns `Ok(true)` iff the peer answered `101`. I/O failures surface as errors;
/// there is no retry here.
pub async fn negotiate<S>(stream: &mut S, host: &str, path: &str) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    stream
        .write_all(build_request(host, path, &key).as_bytes())
        .await?;
    stream.flush().await?;

    let head = read_response_head(stream).await?;
    let status_line = head.lines().next().unwrap_or_default();
    let upgraded = status_code(status_line) == Some("101");
    if upgraded {
        tracing::debug!(host, path, "websocket upgrade accepted");
    } else {
        tracing::warn!(host, path, status = status_line, "websocket upgrade refused");
    }
    Ok(upgraded)
}
