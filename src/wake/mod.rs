//! Sleep/wake handshake between the relay and a power-managed display.
//!
//! [`WakeCoordinator`] is the state machine (`Idle -> AwaitingAck -> Idle`) and owns
//! the queue of held-back payloads. [`WakeGate`] drives it against a transport and
//! the timeout timer.

pub(crate) mod gate;

pub use gate::WakeGate;

use std::collections::VecDeque;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::error::WakeError;
use crate::protocol::{now_millis, WakeReason, WakeSignal};
use crate::types::MessageId;

/// One wake cycle, alive from the request until ack or timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WakeSession {
    pub reason: WakeReason,
    pub buffered_count: u32,
    pub message_id: Option<MessageId>,
    pub created_at: SystemTime,
    pub generation: u64,
}

#[derive(Debug, Default)]
enum WakeState {
    #[default]
    Idle,
    AwaitingAck {
        session: WakeSession,
        queue: VecDeque<String>,
    },
}

/// Outcome of [`WakeCoordinator::request_wake`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WakeStart {
    /// New cycle; send `signal` and arm a timer for `generation`.
    Started { generation: u64, signal: WakeSignal },
    /// Folded into the cycle already waiting; its timer keeps running.
    Merged { generation: u64 },
}

/// Outcome of [`WakeCoordinator::submit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submit {
    SendNow(String),
    Queued { pending: usize },
}

/// How a cycle ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WakeResolution {
    /// Deliver these, in order.
    Flush {
        session: WakeSession,
        payloads: Vec<String>,
    },
    Dropped {
        session: WakeSession,
        dropped: usize,
        cause: WakeError,
    },
    /// No cycle matched (already resolved, or a stale timer).
    Ignored,
}

#[derive(Debug, Default)]
pub struct WakeCoordinator {
    state: WakeState,
    generation: u64,
}

impl WakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, WakeState::AwaitingAck { .. })
    }

    pub fn session(&self) -> Option<&WakeSession> {
        match &self.state {
            WakeState::AwaitingAck { session, .. } => Some(session),
            WakeState::Idle => None,
        }
    }

    /// Payloads currently held back.
    pub fn pending(&self) -> usize {
        match &self.state {
            WakeState::AwaitingAck { queue, .. } => queue.len(),
            WakeState::Idle => 0,
        }
    }

    /// Enter `AwaitingAck`, or merge into the cycle already waiting.
    ///
    /// `buffered_count` is how much content the caller is about to push; it goes out
    /// in the signal as `bufferedCount`. The queue is always empty at signal time.
    pub fn request_wake(
        &mut self,
        reason: WakeReason,
        buffered_count: u32,
        message_id: Option<MessageId>,
    ) -> WakeStart {
        match &mut self.state {
            WakeState::AwaitingAck { session, queue } => {
                session.reason = reason;
                session.buffered_count = session
                    .buffered_count
                    .max(buffered_count)
                    .max(queue.len() as u32);
                if message_id.is_some() {
                    session.message_id = message_id;
                }
                debug!(generation = session.generation, "wake request merged");
                WakeStart::Merged {
                    generation: session.generation,
                }
            }
            WakeState::Idle => {
                self.generation += 1;
                let session = WakeSession {
                    reason,
                    buffered_count,
                    message_id,
                    created_at: SystemTime::now(),
                    generation: self.generation,
                };
                let signal = WakeSignal {
                    reason,
                    buffered_count: session.buffered_count,
                    message_id: session.message_id.clone(),
                    timestamp: now_millis(),
                };
                info!(generation = self.generation, ?reason, "awaiting wake ack");
                self.state = WakeState::AwaitingAck {
                    session,
                    queue: VecDeque::new(),
                };
                WakeStart::Started {
                    generation: self.generation,
                    signal,
                }
            }
        }
    }

    /// Hand back `payload` for immediate sending, or hold it until the cycle resolves.
    pub fn submit(&mut self, payload: String) -> Submit {
        match &mut self.state {
            WakeState::Idle => Submit::SendNow(payload),
            WakeState::AwaitingAck { queue, .. } => {
                queue.push_back(payload);
                Submit::Queued {
                    pending: queue.len(),
                }
            }
        }
    }

    /// Resolve the current cycle with the display's answer.
    pub fn acknowledge(&mut self, ready: bool) -> WakeResolution {
        match std::mem::take(&mut self.state) {
            WakeState::Idle => WakeResolution::Ignored,
            WakeState::AwaitingAck { session, queue } if ready => WakeResolution::Flush {
                session,
                payloads: queue.into(),
            },
            WakeState::AwaitingAck { session, queue } => WakeResolution::Dropped {
                session,
                dropped: queue.len(),
                cause: WakeError::NotReady,
            },
        }
    }

    /// Timer fired for `generation`. Stale generations are ignored.
    pub fn expire(&mut self, generation: u64) -> WakeResolution {
        self.abort(generation, WakeError::Timeout)
    }

    /// Drop the cycle `generation` for `cause`.
    pub fn abort(&mut self, generation: u64, cause: WakeError) -> WakeResolution {
        match &self.state {
            WakeState::AwaitingAck { session, .. } if session.generation == generation => {}
            _ => return WakeResolution::Ignored,
        }
        match std::mem::take(&mut self.state) {
            WakeState::AwaitingAck { session, queue } => WakeResolution::Dropped {
                session,
                dropped: queue.len(),
                cause,
            },
            WakeState::Idle => WakeResolution::Ignored,
        }
    }
}
