//! Single-frame codec over a raw byte stream.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{write_frame_len, MAX_FRAME_SIZE};
use crate::error::ProtocolError;
use crate::Result;

/// Frame opcode (low nibble of the first header byte).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// Which end of the connection is encoding; fixed for the life of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Masks every outbound frame.
    Client,
    /// Never masks.
    Server,
}

/// One decoded wire unit. The payload is already unmasked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as UTF-8 text.
    pub fn into_text(self) -> std::result::Result<String, ProtocolError> {
        String::from_utf8(self.payload).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// Outcome of reading one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// The peer closed the stream or sent a Close frame.
    EndOfStream,
}

/// Encode `payload` as a complete, masked client frame with FIN set.
pub fn encode(payload: &[u8], as_text: bool) -> Bytes {
    let opcode = if as_text { Opcode::Text } else { Opcode::Binary };
    encode_frame(Role::Client, opcode, payload)
}

/// Encode one unfragmented frame for `role`, drawing a fresh mask key for the client role.
pub fn encode_frame(role: Role, opcode: Opcode, payload: &[u8]) -> Bytes {
    let mask = match role {
        Role::Client => Some(rand::random::<[u8; 4]>()),
        Role::Server => None,
    };
    encode_with_mask(opcode, payload, mask)
}

/// Encode with an explicit mask key (or none).
pub fn encode_with_mask(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let mut buf = BytesMut::with_capacity(14 + payload.len());
    buf.put_u8(0x80 | opcode as u8);
    write_frame_len(&mut buf, payload.len() as u64, mask.is_some());
    match mask {
        Some(key) => {
            buf.put_slice(&key);
            buf.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => buf.put_slice(payload),
    }
    buf.freeze()
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= key[i % 4];
    }
}

/// Fill `buf` completely. `Ok(false)` means the stream ended first.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read exactly one frame from `reader`, waiting until all of its bytes arrive.
///
/// A length above [`MAX_FRAME_SIZE`] is rejected before anything is allocated for
/// the payload; the stream position is then unknown and the caller must drop the
/// connection. A Close frame is reported as [`Decoded::EndOfStream`].
pub async fn decode_one<R>(reader: &mut R) -> Result<Decoded>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    if !read_full(reader, &mut head).await? {
        return Ok(Decoded::EndOfStream);
    }
    let fin = head[0] & 0x80 != 0;
    let raw_opcode = head[0] & 0x0F;

    let masked = head[1] & 0x80 != 0;
    let len = match head[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            if !read_full(reader, &mut ext).await? {
                return Ok(Decoded::EndOfStream);
            }
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            if !read_full(reader, &mut ext).await? {
                return Ok(Decoded::EndOfStream);
            }
            u64::from_be_bytes(ext)
        }
        n => n as u64,
    };
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            declared: len,
            max: MAX_FRAME_SIZE,
        }
        .into());
    }

    let mask_key = if masked {
        let mut key = [0u8; 4];
        if !read_full(reader, &mut key).await? {
            return Ok(Decoded::EndOfStream);
        }
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload).await? {
        return Ok(Decoded::EndOfStream);
    }
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    let opcode = match Opcode::from_u8(raw_opcode) {
        Some(Opcode::Close) => return Ok(Decoded::EndOfStream),
        Some(op) => op,
        None => return Err(ProtocolError::UnknownOpcode(raw_opcode).into()),
    };

    Ok(Decoded::Frame(Frame {
        fin,
        opcode,
        masked,
        mask_key,
        payload,
    }))
}
