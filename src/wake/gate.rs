use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{Submit, WakeCoordinator, WakeResolution, WakeStart};
use crate::error::WakeError;
use crate::events::Event;
use crate::protocol::{Outbound, WakeReason};
use crate::transport::Transport;
use crate::types::MessageId;
use crate::Result;

/// Sends through a [`WakeCoordinator`], holding content back while a wake is pending.
///
/// The coordinator lock is held across transport writes so a flush and later sends
/// keep their relative order.
#[derive(Clone)]
pub struct WakeGate {
    inner: Arc<Inner>,
}

struct Inner {
    coordinator: Mutex<WakeCoordinator>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    events: mpsc::UnboundedSender<Event>,
    timer: StdMutex<Option<JoinHandle<()>>>,
}

impl WakeGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        timeout: Duration,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                coordinator: Mutex::new(WakeCoordinator::new()),
                transport,
                timeout,
                events,
                timer: StdMutex::new(None),
            }),
        }
    }

    pub async fn is_awaiting(&self) -> bool {
        self.inner.coordinator.lock().await.is_awaiting()
    }

    pub async fn pending(&self) -> usize {
        self.inner.coordinator.lock().await.pending()
    }

    /// Send `payload` now, or queue it if the display is being woken.
    pub async fn send(&self, payload: String) -> Result<()> {
        let mut coordinator = self.inner.coordinator.lock().await;
        match coordinator.submit(payload) {
            Submit::SendNow(payload) => self.inner.transport.send(&payload).await,
            Submit::Queued { pending } => {
                tracing::debug!(pending, "held back until wake ack");
                Ok(())
            }
        }
    }

    /// Emit a wake signal and start holding content back.
    ///
    /// A request while already waiting merges into that cycle. If the signal cannot
    /// be sent the cycle fails at once.
    pub async fn request_wake(
        &self,
        reason: WakeReason,
        buffered_count: u32,
        message_id: Option<MessageId>,
    ) -> Result<()> {
        let mut coordinator = self.inner.coordinator.lock().await;
        let (generation, signal) = match coordinator.request_wake(reason, buffered_count, message_id) {
            WakeStart::Merged { .. } => return Ok(()),
            WakeStart::Started { generation, signal } => (generation, signal),
        };

        let sent = match Outbound::WakeSignal(signal).to_json() {
            Ok(json) => self.inner.transport.send(&json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!(generation, error = %e, "wake signal not sent");
            let resolution = coordinator.abort(generation, WakeError::SignalNotSent);
            self.report(resolution);
            return Err(e);
        }

        let gate = self.clone();
        let timeout = self.inner.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            gate.expire(generation).await;
        });
        if let Some(old) = self.replace_timer(Some(timer)) {
            old.abort();
        }
        Ok(())
    }

    /// Resolve the pending cycle with the display's `wake_ack`.
    pub async fn acknowledge(&self, ready: bool) {
        let mut coordinator = self.inner.coordinator.lock().await;
        if let Some(timer) = self.replace_timer(None) {
            timer.abort();
        }
        match coordinator.acknowledge(ready) {
            WakeResolution::Flush { session, payloads } => {
                let total = payloads.len();
                let mut delivered = 0;
                for payload in payloads {
                    match self.inner.transport.send(&payload).await {
                        Ok(()) => delivered += 1,
                        Err(e) => warn!(generation = session.generation, error = %e, "flush send failed"),
                    }
                }
                info!(generation = session.generation, delivered, total, "wake acknowledged, flushed");
                let _ = self.inner.events.send(Event::WakeCompleted { delivered });
            }
            other => self.report(other),
        }
    }

    async fn expire(&self, generation: u64) {
        let resolution = self.inner.coordinator.lock().await.expire(generation);
        self.report(resolution);
    }

    fn report(&self, resolution: WakeResolution) {
        match resolution {
            WakeResolution::Dropped {
                session,
                dropped,
                cause,
            } => {
                warn!(generation = session.generation, dropped, %cause, "wake failed, buffered content dropped");
                let _ = self.inner.events.send(Event::WakeFailed { cause, dropped });
            }
            WakeResolution::Ignored => tracing::debug!("no wake cycle pending"),
            WakeResolution::Flush { .. } => {}
        }
    }

    fn replace_timer(&self, timer: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut slot = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::replace(&mut *slot, timer)
    }
}
