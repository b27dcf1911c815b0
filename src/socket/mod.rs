//! Raw-socket WebSocket layer.
//!
//! Frames follow RFC 6455: FIN/opcode byte, MASK bit plus 7-bit length, optional
//! 16- or 64-bit big-endian extended length, optional 4-byte mask key, payload.
//! The client role always masks; frames from the server are expected unmasked.

pub(crate) mod connection;
pub mod frame;
pub mod handshake;
mod tcp;

pub use connection::{AsyncStream, BoxedStream, Connector, LinkEvent, TransportConnection};
pub use frame::{decode_one, encode, encode_frame, Decoded, Frame, Opcode, Role};
pub use handshake::negotiate;
pub use tcp::TcpConnector;

use bytes::{BufMut, BytesMut};

/// Hard cap on a single frame's payload (10 MiB). Larger frames are rejected, never truncated.
pub const MAX_FRAME_SIZE: u64 = 10 * 1024 * 1024;

/// Largest payload that fits the 7-bit length field.
const MAX_SHORT_LEN: u64 = 125;

/// Largest payload that fits the 16-bit extended length field.
const MAX_MEDIUM_LEN: u64 = 0xFFFF;

/// Writes the second header byte and any extended length for a payload of `len` bytes.
///
/// The length stays 64 bits wide the whole way; payloads of 4 GiB and more keep their
/// high word.
pub fn write_frame_len(buf: &mut BytesMut, len: u64, masked: bool) {
    let mask_bit = if masked { 0x80 } else { 0x00 };
    if len <= MAX_SHORT_LEN {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= MAX_MEDIUM_LEN {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(len);
    }
}
