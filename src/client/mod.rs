//! Connection handle tying the transport, reducer and wake gate together.

mod router;
mod send;

use std::sync::{Arc, Mutex as StdMutex, RwLock};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::events::Event;
use crate::socket::{Connector, LinkEvent, TcpConnector};
use crate::supervisor::ReconnectSupervisor;
use crate::sync::SyncReducer;
use crate::transport::Transport;
use crate::types::ConnectionState;
use crate::wake::WakeGate;
use crate::Result;

use router::ProtocolRouter;

/// One logical channel to the peer.
///
/// Owned by whoever constructs it; dropping the handle stops reconnecting and closes
/// the current connection.
pub struct Client {
    config: Config,
    supervisor: ReconnectSupervisor,
    transport: Arc<dyn Transport>,
    view: Arc<RwLock<SyncReducer>>,
    wake: WakeGate,
    /// Taken by the first `connect()`.
    dispatch: StdMutex<Option<(mpsc::UnboundedReceiver<LinkEvent>, ProtocolRouter)>>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a client dialing through `connector`. Events arrive on the returned receiver.
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Event>)> {
        let target = config.target()?;
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let supervisor = ReconnectSupervisor::new(
            connector,
            target,
            config.reconnect_delay(),
            config.connect_timeout(),
            link_tx,
        );
        let transport: Arc<dyn Transport> = Arc::new(supervisor.clone());
        let view = Arc::new(RwLock::new(SyncReducer::new()));
        let wake = WakeGate::new(Arc::clone(&transport), config.wake_timeout(), event_tx.clone());
        let router = ProtocolRouter::new(
            Arc::clone(&view),
            wake.clone(),
            Arc::clone(&transport),
            event_tx,
            config.auto_ack_wake,
        );

        let client = Self {
            config,
            supervisor,
            transport,
            view,
            wake,
            dispatch: StdMutex::new(Some((link_rx, router))),
            dispatcher: StdMutex::new(None),
        };
        Ok((client, event_rx))
    }

    /// Client over plain TCP to `config.url`.
    pub fn tcp(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<Event>)> {
        Self::new(config, Arc::new(TcpConnector))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start connecting and keep reconnecting until [`disconnect`](Self::disconnect).
    ///
    /// Returns `false` if an attempt was already in flight.
    pub fn connect(&self) -> bool {
        self.start_dispatcher();
        self.supervisor.connect()
    }

    /// Close the current connection. No reconnect follows.
    pub async fn disconnect(&self) {
        self.supervisor.disconnect().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Connection-status indicator.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Copy of the current ordered view.
    pub fn lines(&self) -> Vec<String> {
        self.read_view(|v| v.lines())
    }

    /// Accumulated content of an in-flight streamed message.
    pub fn stream_content(&self, message_id: &str) -> Option<String> {
        self.read_view(|v| v.stream(message_id))
    }

    /// Whether content is being held back for a wake acknowledgment.
    pub async fn is_awaiting_wake(&self) -> bool {
        self.wake.is_awaiting().await
    }

    fn read_view<T>(&self, f: impl FnOnce(&SyncReducer) -> T) -> T {
        let view = self
            .view
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&view)
    }

    fn start_dispatcher(&self) {
        let taken = self
            .dispatch
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some((mut link_rx, router)) = taken else {
            return;
        };
        let handle = tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                router.handle_link_event(event).await;
            }
            debug!("dispatcher finished");
        });
        *self
            .dispatcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.supervisor.disarm();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let supervisor = self.supervisor.clone();
            runtime.spawn(async move { supervisor.disconnect().await });
        }
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            handle.abort();
        }
    }
}
