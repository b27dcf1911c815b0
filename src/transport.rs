//! Outbound transport abstraction.
//!
//! Implemented by a single [`TransportConnection`](crate::socket::TransportConnection)
//! and by the [`ReconnectSupervisor`](crate::supervisor::ReconnectSupervisor) that
//! forwards to whichever connection is current. Receiving is not part of the trait:
//! inbound text arrives as [`LinkEvent`](crate::socket::LinkEvent)s on a channel.

use crate::Result;
use async_trait::async_trait;

/// Async sink for serialized envelopes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text payload. Fails with `Error::NotConnected` rather than queueing.
    async fn send(&self, text: &str) -> Result<()>;

    /// Close the transport.
    async fn close(&self) -> Result<()>;
}
