//! # glasslink
//!
//! Transport and synchronization core linking a wearable display, a mobile relay and
//! an agent gateway.
//!
//! ## Features
//!
//! - WebSocket-compatible framing over any byte stream (TCP, BLE-backed sockets)
//! - HTTP Upgrade handshake that never reads past the response head
//! - Constant-delay reconnect supervision
//! - Snapshot and delta view synchronization, streamed message accumulation
//! - Sleep/wake handshake that holds content back until the display is awake
//!
//! ## Example
//!
//! ```ignore
//! use glasslink::{Client, Config, Event};
//!
//! #[tokio::main]
//! async fn main() -> glasslink::Result<()> {
//!     let (client, mut events) = Client::tcp(Config::new("ws://127.0.0.1:8765/"))?;
//!     client.connect();
//!     while let Some(event) = events.recv().await {
//!         if let Event::ViewUpdated { lines } = event {
//!             println!("{}", lines.join("\n"));
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod socket;
pub mod supervisor;
pub mod sync;
pub mod transport;
pub mod types;
pub mod wake;

pub use client::Client;
pub use config::Config;
pub use error::{Error, ProtocolError, Result, TransportError, WakeError};
pub use events::Event;
pub use protocol::{Inbound, Outbound, WakeReason};
pub use socket::{Connector, TcpConnector, TransportConnection};
pub use supervisor::ReconnectSupervisor;
pub use sync::SyncReducer;
pub use transport::Transport;
pub use types::{ConnectionState, MessageId, NamedKey, Target};
pub use wake::WakeCoordinator;
