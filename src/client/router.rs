//! Classifies inbound envelopes and drives the reducer and wake gate.

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::Event;
use crate::protocol::{now_millis, Inbound, Outbound, WakeAck};
use crate::socket::LinkEvent;
use crate::sync::SyncReducer;
use crate::transport::Transport;
use crate::wake::WakeGate;

/// Runs on the dispatcher task; the only writer of the reducer.
pub(crate) struct ProtocolRouter {
    view: Arc<RwLock<SyncReducer>>,
    wake: WakeGate,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<Event>,
    auto_ack_wake: bool,
}

impl ProtocolRouter {
    pub(crate) fn new(
        view: Arc<RwLock<SyncReducer>>,
        wake: WakeGate,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<Event>,
        auto_ack_wake: bool,
    ) -> Self {
        Self {
            view,
            wake,
            transport,
            events,
            auto_ack_wake,
        }
    }

    pub(crate) async fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { conn_id } => {
                let dropped = self.with_view(|v| v.reset_streams());
                if dropped > 0 {
                    debug!(%conn_id, dropped, "discarded partial streams from previous connection");
                }
                info!(%conn_id, "link up");
                self.emit(Event::Connected);
            }
            LinkEvent::Message { conn_id, text } => {
                debug!(%conn_id, len = text.len(), "message");
                self.route(&text).await;
            }
            LinkEvent::Closed { conn_id, reason } => {
                info!(%conn_id, ?reason, "link down");
                self.emit(Event::Disconnected { reason });
            }
            LinkEvent::Failed { reason } => self.emit(Event::ConnectFailed { reason }),
        }
    }

    /// Decode one text payload and dispatch it. Malformed input is logged and dropped.
    pub(crate) async fn route(&self, text: &str) {
        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "dropping undecodable message");
                return;
            }
        };

        match inbound {
            Inbound::Snapshot(lines) => {
                if let Some(lines) = self.with_view(|v| v.apply_snapshot(lines).then(|| v.lines())) {
                    self.emit(Event::ViewUpdated { lines });
                }
            }
            Inbound::Delta(delta) => {
                let lines = self.with_view(|v| {
                    v.apply_delta(&delta);
                    v.lines()
                });
                self.emit(Event::ViewUpdated { lines });
            }
            Inbound::StreamChunk { message_id, chunk } => {
                let state = self.with_view(|v| v.apply_stream_chunk(&message_id, &chunk));
                self.emit(Event::StreamUpdated {
                    message_id: state.message_id,
                    content: state.content,
                });
            }
            Inbound::StreamEnd { message_id } => {
                let state = self.with_view(|v| v.apply_stream_end(&message_id));
                self.emit(Event::StreamFinished {
                    message_id: state.message_id,
                    content: state.content,
                });
            }
            Inbound::Sessions(value) => self.emit(Event::Sessions(value)),
            Inbound::SessionSwitched(value) => self.emit(Event::SessionSwitched(value)),
            Inbound::Error(message) => self.emit(Event::ServerError { message }),
            Inbound::Exit(code) => self.emit(Event::Exit { code }),
            Inbound::WakeAck(ack) => self.wake.acknowledge(ack.ready).await,
            Inbound::WakeSignal(signal) => {
                self.emit(Event::WakeRequested(signal));
                if self.auto_ack_wake {
                    self.send_ack().await;
                }
            }
            Inbound::Unknown(env) => {
                debug!(kind = %env.kind, "forwarding unhandled message");
                self.emit(Event::Unhandled(env));
            }
        }
    }

    async fn send_ack(&self) {
        let ack = Outbound::WakeAck(WakeAck {
            ready: true,
            timestamp: now_millis(),
        });
        let sent = match ack.to_json() {
            Ok(json) => self.transport.send(&json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!(error = %e, "wake ack not sent");
        }
    }

    fn with_view<T>(&self, f: impl FnOnce(&mut SyncReducer) -> T) -> T {
        let mut view = self
            .view
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut view)
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::gate::tests::RecordingTransport;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    struct Harness {
        router: ProtocolRouter,
        view: Arc<RwLock<SyncReducer>>,
        transport: Arc<RecordingTransport>,
        rx: mpsc::UnboundedReceiver<Event>,
    }

    fn harness(auto_ack_wake: bool) -> Harness {
        let view = Arc::new(RwLock::new(SyncReducer::new()));
        let transport = Arc::new(RecordingTransport::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let wake = WakeGate::new(transport.clone(), Duration::from_secs(5), tx.clone());
        let router = ProtocolRouter::new(view.clone(), wake, transport.clone(), tx, auto_ack_wake);
        Harness {
            router,
            view,
            transport,
            rx,
        }
    }

    #[tokio::test]
    async fn snapshot_then_delta() {
        let mut h = harness(false);
        h.router
            .route(&json!({"type": "output", "lines": ["a", "b", "c"]}).to_string())
            .await;
        h.router
            .route(r#"{"type":"output_delta","changedLines":{"1":"B"},"totalLines":4}"#)
            .await;
        assert!(matches!(h.rx.try_recv(), Ok(Event::ViewUpdated { .. })));
        assert_eq!(
            h.rx.try_recv().unwrap(),
            Event::ViewUpdated {
                lines: vec!["a".into(), "B".into(), "c".into(), "".into()]
            }
        );
    }

    #[tokio::test]
    async fn skipped_blank_snapshot_emits_nothing() {
        let mut h = harness(false);
        h.router.route(r#"{"type":"output","lines":["x"]}"#).await;
        h.rx.try_recv().unwrap();
        h.router.route(r#"{"type":"output","lines":["",""]}"#).await;
        assert!(h.rx.try_recv().is_err());
        assert_eq!(h.view.read().unwrap().lines(), vec!["x"]);
    }

    #[tokio::test]
    async fn stream_chunks_and_end() {
        let mut h = harness(false);
        h.router
            .route(r#"{"type":"stream_chunk","messageId":"m1","chunk":"He"}"#)
            .await;
        h.router
            .route(r#"{"type":"stream_chunk","messageId":"m1","chunk":"llo"}"#)
            .await;
        h.router.route(r#"{"type":"stream_end","messageId":"m1"}"#).await;
        h.rx.try_recv().unwrap();
        assert_eq!(
            h.rx.try_recv().unwrap(),
            Event::StreamUpdated {
                message_id: "m1".into(),
                content: "Hello".into()
            }
        );
        assert_eq!(
            h.rx.try_recv().unwrap(),
            Event::StreamFinished {
                message_id: "m1".into(),
                content: "Hello".into()
            }
        );
        assert!(h.view.read().unwrap().stream("m1").is_none());
    }

    #[tokio::test]
    async fn reconnect_clears_streams_but_keeps_view() {
        let mut h = harness(false);
        h.router.route(r#"{"type":"output","lines":["keep"]}"#).await;
        h.router
            .route(r#"{"type":"stream_chunk","messageId":"m","chunk":"part"}"#)
            .await;
        h.router
            .handle_link_event(LinkEvent::Opened {
                conn_id: Uuid::new_v4(),
            })
            .await;
        let view = h.view.read().unwrap();
        assert!(view.open_streams().is_empty());
        assert_eq!(view.lines(), vec!["keep"]);
        drop(view);
        h.rx.try_recv().unwrap();
        h.rx.try_recv().unwrap();
        assert_eq!(h.rx.try_recv().unwrap(), Event::Connected);
    }

    #[tokio::test]
    async fn pass_through_and_unknown() {
        let mut h = harness(false);
        let sessions = json!({"type": "sessions", "sessions": ["a"]});
        h.router.route(&sessions.to_string()).await;
        h.router.route(r#"{"type":"error","error":"nope"}"#).await;
        h.router.route(r#"{"type":"exit","code":0}"#).await;
        h.router.route(r#"{"type":"photo","id":1}"#).await;
        assert_eq!(h.rx.try_recv().unwrap(), Event::Sessions(sessions));
        assert_eq!(
            h.rx.try_recv().unwrap(),
            Event::ServerError {
                message: "nope".into()
            }
        );
        assert_eq!(h.rx.try_recv().unwrap(), Event::Exit { code: 0 });
        assert!(matches!(h.rx.try_recv(), Ok(Event::Unhandled(env)) if env.kind == "photo"));
    }

    #[tokio::test]
    async fn malformed_input_is_dropped() {
        let mut h = harness(false);
        h.router.route("{oops").await;
        h.router.route(r#"{"lines":[]}"#).await;
        h.router.route(r#"{"type":"stream_end"}"#).await;
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn display_role_auto_acks() {
        let mut h = harness(true);
        h.router
            .route(r#"{"type":"wake_signal","reason":"new_message","bufferedCount":1,"timestamp":3}"#)
            .await;
        assert!(matches!(h.rx.try_recv(), Ok(Event::WakeRequested(_))));
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(v["type"], "wake_ack");
        assert_eq!(v["ready"], true);
    }

    #[tokio::test]
    async fn relay_role_leaves_ack_to_caller() {
        let mut h = harness(false);
        h.router
            .route(r#"{"type":"wake_signal","reason":"cron_message","bufferedCount":0,"timestamp":3}"#)
            .await;
        assert!(matches!(h.rx.try_recv(), Ok(Event::WakeRequested(_))));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn link_failures_become_events() {
        let mut h = harness(false);
        let conn_id = Uuid::new_v4();
        h.router
            .handle_link_event(LinkEvent::Closed {
                conn_id,
                reason: Some("eof".into()),
            })
            .await;
        h.router
            .handle_link_event(LinkEvent::Failed {
                reason: "refused".into(),
            })
            .await;
        assert_eq!(
            h.rx.try_recv().unwrap(),
            Event::Disconnected {
                reason: Some("eof".into())
            }
        );
        assert_eq!(
            h.rx.try_recv().unwrap(),
            Event::ConnectFailed {
                reason: "refused".into()
            }
        );
    }
}
