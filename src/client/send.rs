//! Outbound messages.

use tracing::debug;

use super::Client;
use crate::protocol::{now_millis, Outbound, WakeAck, WakeReason};
use crate::types::{MessageId, NamedKey};
use crate::Result;

impl Client {
    /// Send free text to the remote terminal.
    pub async fn send_input(&self, text: &str) -> Result<()> {
        self.send_content(Outbound::Input {
            text: text.to_string(),
        })
        .await
    }

    pub async fn send_key(&self, key: NamedKey) -> Result<()> {
        self.send_content(Outbound::Key { key }).await
    }

    /// Send raw image bytes; they travel base64-encoded.
    pub async fn send_image(&self, bytes: &[u8]) -> Result<()> {
        self.send_content(Outbound::image(bytes)).await
    }

    pub async fn list_sessions(&self) -> Result<()> {
        self.send_direct(Outbound::ListSessions).await
    }

    pub async fn switch_session(&self, session: &str) -> Result<()> {
        self.send_direct(Outbound::SwitchSession {
            session: session.to_string(),
        })
        .await
    }

    /// Wake the display before pushing `buffered_count` pieces of content. Content sent
    /// until the ack (or timeout) is held back.
    pub async fn request_wake(
        &self,
        reason: WakeReason,
        buffered_count: u32,
        message_id: Option<MessageId>,
    ) -> Result<()> {
        self.wake.request_wake(reason, buffered_count, message_id).await
    }

    /// Answer a [`Event::WakeRequested`](crate::Event::WakeRequested) from the display side.
    pub async fn acknowledge_wake(&self, ready: bool) -> Result<()> {
        self.send_direct(Outbound::WakeAck(WakeAck {
            ready,
            timestamp: now_millis(),
        }))
        .await
    }

    /// Content goes through the wake gate.
    async fn send_content(&self, msg: Outbound) -> Result<()> {
        let json = msg.to_json()?;
        debug!(kind = msg.kind(), len = json.len(), "send");
        self.wake.send(json).await
    }

    async fn send_direct(&self, msg: Outbound) -> Result<()> {
        let json = msg.to_json()?;
        debug!(kind = msg.kind(), len = json.len(), "send");
        self.transport.send(&json).await
    }
}
