//! JSON envelopes exchanged over the link, discriminated by a `type` string.

mod outbound;

pub use outbound::Outbound;

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::sync::Delta;
use crate::types::MessageId;

/// Why the relay wants the display awake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    StreamContent,
    NewMessage,
    CronMessage,
}

/// `wake_signal` body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeSignal {
    pub reason: WakeReason,
    pub buffered_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    pub timestamp: i64,
}

/// `wake_ack` body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeAck {
    pub ready: bool,
    pub timestamp: i64,
}

/// A decoded message before classification: discriminator plus the whole object.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let payload: Value = serde_json::from_str(text)?;
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        Ok(Self { kind, payload })
    }

    fn body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.payload).map_err(|e| ProtocolError::BadPayload {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }
}

/// Inbound messages the core acts on.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Snapshot(Vec<String>),
    Delta(Delta),
    StreamChunk { message_id: MessageId, chunk: String },
    StreamEnd { message_id: MessageId },
    Sessions(Value),
    SessionSwitched(Value),
    Error(String),
    Exit(i64),
    WakeSignal(WakeSignal),
    WakeAck(WakeAck),
    /// Discriminator the core does not know; forwarded untouched.
    Unknown(Envelope),
}

#[derive(Deserialize)]
struct SnapshotBody {
    lines: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeltaBody {
    #[serde(default)]
    changed_lines: HashMap<String, String>,
    total_lines: i64,
}

impl From<DeltaBody> for Delta {
    fn from(body: DeltaBody) -> Self {
        let changed: BTreeMap<usize, String> = body
            .changed_lines
            .into_iter()
            .filter_map(|(k, v)| k.trim().parse::<usize>().ok().map(|i| (i, v)))
            .collect();
        Delta {
            changed,
            total_lines: body.total_lines.max(0).try_into().unwrap_or(usize::MAX),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunkBody {
    message_id: MessageId,
    chunk: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEndBody {
    message_id: MessageId,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct ExitBody {
    code: i64,
}

impl TryFrom<Envelope> for Inbound {
    type Error = ProtocolError;

    fn try_from(env: Envelope) -> Result<Self, ProtocolError> {
        Ok(match env.kind.as_str() {
            "output" | "terminal_update" => Inbound::Snapshot(env.body::<SnapshotBody>()?.lines),
            "output_delta" => Inbound::Delta(env.body::<DeltaBody>()?.into()),
            "stream_chunk" => {
                let b: StreamChunkBody = env.body()?;
                Inbound::StreamChunk {
                    message_id: b.message_id,
                    chunk: b.chunk,
                }
            }
            "stream_end" => Inbound::StreamEnd {
                message_id: env.body::<StreamEndBody>()?.message_id,
            },
            "sessions" => Inbound::Sessions(env.payload),
            "session_switched" => Inbound::SessionSwitched(env.payload),
            "error" => Inbound::Error(env.body::<ErrorBody>()?.error),
            "exit" => Inbound::Exit(env.body::<ExitBody>()?.code),
            "wake_signal" => Inbound::WakeSignal(env.body()?),
            "wake_ack" => Inbound::WakeAck(env.body()?),
            _ => Inbound::Unknown(env),
        })
    }
}

impl Inbound {
    /// Parse and classify one text payload.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Envelope::parse(text)?.try_into()
    }
}

/// Milliseconds since the Unix epoch, for envelope timestamps.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
