//! Reconnect policy around [`TransportConnection`].
//!
//! `Idle -> Connecting -> Connected -> (Closed | Failed) -> Idle (after delay) -> Connecting`.
//! The delay is constant; the peer is usually on the local network.
//!
//! Published state per attempt is `Connecting -> Connected -> Disconnected` or
//! `Connecting -> Error(message)`. A failed attempt keeps `Error` through the delay so
//! the status indicator still shows why, and the next attempt starts from it directly:
//! `Error` is terminal just like `Disconnected`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, TransportError};
use crate::socket::{Connector, LinkEvent, TransportConnection};
use crate::transport::Transport;
use crate::types::{ConnectionState, Target};
use crate::Result;

/// Keeps one logical channel connected until told to stop.
#[derive(Clone)]
pub struct ReconnectSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    target: Target,
    delay: Duration,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
    armed: AtomicBool,
    running: AtomicBool,
    attempts: AtomicU64,
    current: RwLock<Option<Arc<TransportConnection>>>,
    state: watch::Sender<ConnectionState>,
    disarmed: Notify,
}

impl ReconnectSupervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        target: Target,
        delay: Duration,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                target,
                delay,
                connect_timeout,
                events,
                armed: AtomicBool::new(false),
                running: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
                current: RwLock::new(None),
                state,
                disarmed: Notify::new(),
            }),
        }
    }

    /// Arm the supervisor and start connecting.
    ///
    /// Returns `false` when an attempt or backoff is already in flight; the running
    /// loop picks up the re-arm.
    pub fn connect(&self) -> bool {
        self.inner.armed.store(true, Ordering::SeqCst);
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!(peer = %self.inner.target, "connect ignored, attempt already in flight");
            return false;
        }
        tokio::spawn(Inner::run(Arc::clone(&self.inner)));
        true
    }

    /// Disarm and close the current connection. No reconnect is scheduled afterwards.
    pub async fn disconnect(&self) {
        self.disarm();
        let current = self.inner.current.write().await.take();
        if let Some(conn) = current {
            conn.close().await;
        }
    }

    /// Stop scheduling reconnects without touching the live connection.
    pub fn disarm(&self) {
        self.inner.armed.store(false, Ordering::SeqCst);
        self.inner.disarmed.notify_waiters();
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of connection attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    async fn current(&self) -> Option<Arc<TransportConnection>> {
        self.inner.current.read().await.clone()
    }
}

impl Inner {
    fn armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn clear_current(&self, conn: &Arc<TransportConnection>) {
        let mut current = self.current.write().await;
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            current.take();
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.run_attempts().await;
            self.running.store(false, Ordering::SeqCst);
            // connect() may have re-armed after the last check but before the flag cleared.
            if !self.armed() || self.running.swap(true, Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn run_attempts(&self) {
        while self.armed() {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_state(ConnectionState::Connecting);
            debug!(peer = %self.target, attempt, "connecting");

            // Current before connecting, so a send racing the Opened event reaches it.
            let conn = TransportConnection::new();
            *self.current.write().await = Some(Arc::clone(&conn));
            let outcome = tokio::time::timeout(
                self.connect_timeout,
                conn.connect_then(
                    self.connector.as_ref(),
                    &self.target,
                    self.events.clone(),
                    || self.set_state(ConnectionState::Connected),
                ),
            )
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout.into()));

            match outcome {
                Ok(()) => {
                    if !self.armed() {
                        conn.close().await;
                    }
                    conn.closed().await;
                    self.clear_current(&conn).await;
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    self.clear_current(&conn).await;
                    warn!(peer = %self.target, attempt, error = %e, "connection attempt failed");
                    self.set_state(ConnectionState::Error(e.to_string()));
                    let _ = self.events.send(LinkEvent::Failed {
                        reason: e.to_string(),
                    });
                }
            }

            if !self.armed() {
                break;
            }
            info!(peer = %self.target, delay_ms = self.delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = self.disarmed.notified() => {}
            }
        }
        if !matches!(*self.state.borrow(), ConnectionState::Error(_)) {
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

#[async_trait]
impl Transport for ReconnectSupervisor {
    async fn send(&self, text: &str) -> Result<()> {
        match self.current().await {
            Some(conn) => conn.send(text).await,
            None => Err(Error::NotConnected),
        }
    }

    async fn close(&self) -> Result<()> {
        self.disconnect().await;
        Ok(())
    }
}
