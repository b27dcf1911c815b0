use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::frame::{self, Decoded, Frame, Opcode, Role};
use super::handshake;
use super::MAX_FRAME_SIZE;
use crate::error::{Error, ProtocolError, TransportError};
use crate::types::{ConnectionState, Target};
use crate::Result;

/// Byte stream a connection can run over (TCP socket, BLE-backed stream, test pipe).
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Supplies the physical stream for a target.
///
/// The device layer implements this for a Bluetooth socket; [`TcpConnector`](super::TcpConnector)
/// covers Wi-Fi and development setups.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, target: &Target) -> Result<BoxedStream>;
}

/// What a connection reports to whoever consumes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Opened { conn_id: Uuid },
    Message { conn_id: Uuid, text: String },
    Closed { conn_id: Uuid, reason: Option<String> },
    /// An attempt never reached `Connected`.
    Failed { reason: String },
}

/// One physical socket: upgrade once, then a read loop plus a mutually exclusive write path.
pub struct TransportConnection {
    id: Uuid,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    state: watch::Sender<ConnectionState>,
    shutdown: Notify,
}

impl TransportConnection {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            id: Uuid::new_v4(),
            writer: Mutex::new(None),
            state,
            shutdown: Notify::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Open the stream, run the upgrade and start the read loop.
    ///
    /// On failure the state is left at `Error` and the error is returned.
    pub async fn connect(
        self: &Arc<Self>,
        connector: &dyn Connector,
        target: &Target,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<()> {
        self.connect_then(connector, target, events, || {}).await
    }

    /// Like [`connect`](Self::connect), running `on_open` after the state becomes
    /// `Connected` and before `Opened` is reported.
    ///
    /// A failed connection stays at `Error`; instances are not reused across attempts.
    pub(crate) async fn connect_then<F: FnOnce()>(
        self: &Arc<Self>,
        connector: &dyn Connector,
        target: &Target,
        events: mpsc::UnboundedSender<LinkEvent>,
        on_open: F,
    ) -> Result<()> {
        self.state.send_replace(ConnectionState::Connecting);
        match self.open(connector, target).await {
            Ok(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                *self.writer.lock().await = Some(writer);
                self.state.send_replace(ConnectionState::Connected);
                on_open();
                info!(conn_id = %self.id, peer = %target, "connected");
                let _ = events.send(LinkEvent::Opened { conn_id: self.id });
                tokio::spawn(Arc::clone(self).read_loop(reader, events));
                Ok(())
            }
            Err(e) => {
                warn!(conn_id = %self.id, peer = %target, error = %e, "connect failed");
                self.state.send_replace(ConnectionState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn open(&self, connector: &dyn Connector, target: &Target) -> Result<BoxedStream> {
        let mut stream = connector.open(target).await?;
        if !handshake::negotiate(&mut stream, &target.host_header(), &target.path).await? {
            return Err(TransportError::HandshakeRejected(target.to_string()).into());
        }
        Ok(stream)
    }

    /// Send one text frame. Rejected with [`Error::NotConnected`] unless connected; never queued.
    pub async fn send(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.write_frame(Opcode::Text, text.as_bytes()).await
    }

    async fn write_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let wire = frame::encode_frame(Role::Client, opcode, payload);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::NotConnected)?;
        let written = async {
            writer.write_all(&wire).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(conn_id = %self.id, error = %e, "write failed, closing");
            guard.take();
            drop(guard);
            self.shutdown.notify_one();
            return Err(e.into());
        }
        Ok(())
    }

    /// Send a Close frame best-effort, shut the socket and unblock the read loop.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let close = frame::encode_frame(Role::Client, Opcode::Close, &[]);
            let _ = writer.write_all(&close).await;
            let _ = writer.shutdown().await;
        }
        self.shutdown.notify_one();
    }

    /// Resolves once the read loop has ended (or the attempt failed).
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| matches!(s, ConnectionState::Disconnected | ConnectionState::Error(_)))
            .await;
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: ReadHalf<BoxedStream>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) {
        let mut partial: Option<Vec<u8>> = None;
        let reason = loop {
            let decoded = tokio::select! {
                _ = self.shutdown.notified() => break None,
                decoded = frame::decode_one(&mut reader) => decoded,
            };
            match decoded {
                Ok(Decoded::Frame(f)) => self.on_frame(f, &mut partial, &events).await,
                Ok(Decoded::EndOfStream) => break Some("end of stream".to_string()),
                Err(e) if e.is_stream_fatal() => {
                    warn!(conn_id = %self.id, error = %e, "unrecoverable read error");
                    break Some(e.to_string());
                }
                Err(e) => warn!(conn_id = %self.id, error = %e, "discarding frame"),
            }
        };

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        info!(conn_id = %self.id, reason = reason.as_deref().unwrap_or("closed locally"), "disconnected");
        let _ = events.send(LinkEvent::Closed {
            conn_id: self.id,
            reason,
        });
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn on_frame(
        &self,
        frame: Frame,
        partial: &mut Option<Vec<u8>>,
        events: &mpsc::UnboundedSender<LinkEvent>,
    ) {
        match frame.opcode {
            Opcode::Ping => {
                if let Err(e) = self.write_frame(Opcode::Pong, &frame.payload).await {
                    debug!(conn_id = %self.id, error = %e, "pong not sent");
                }
            }
            Opcode::Pong | Opcode::Close => {}
            Opcode::Text | Opcode::Binary if frame.fin => self.deliver(frame.payload, events),
            Opcode::Text | Opcode::Binary => *partial = Some(frame.payload),
            Opcode::Continuation => {
                let Some(buf) = partial.as_mut() else {
                    warn!(conn_id = %self.id, "continuation without a started message");
                    return;
                };
                if (buf.len() + frame.payload.len()) as u64 > MAX_FRAME_SIZE {
                    warn!(conn_id = %self.id, "fragmented message exceeds cap, discarding");
                    *partial = None;
                    return;
                }
                buf.extend_from_slice(&frame.payload);
                if frame.fin {
                    if let Some(whole) = partial.take() {
                        self.deliver(whole, events);
                    }
                }
            }
        }
    }

    fn deliver(&self, payload: Vec<u8>, events: &mpsc::UnboundedSender<LinkEvent>) {
        match String::from_utf8(payload) {
            Ok(text) => {
                debug!(conn_id = %self.id, len = text.len(), "inbound message");
                let _ = events.send(LinkEvent::Message {
                    conn_id: self.id,
                    text,
                });
            }
            Err(_) => warn!(conn_id = %self.id, error = %ProtocolError::InvalidUtf8, "discarding message"),
        }
    }
}

#[async_trait]
impl crate::transport::Transport for TransportConnection {
    async fn send(&self, text: &str) -> Result<()> {
        TransportConnection::send(self, text).await
    }

    async fn close(&self) -> Result<()> {
        TransportConnection::close(self).await;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::socket::frame::encode_frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncReadExt, BufReader, DuplexStream};

    const SWITCHING: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
                               Upgrade: websocket\r\nConnection: Upgrade\r\n\r\n";

    /// Server end of an in-memory connection, past the upgrade.
    pub(crate) struct FakePeer {
        pub stream: DuplexStream,
    }

    impl FakePeer {
        /// Complete the upgrade from the server side.
        pub(crate) async fn accept(stream: DuplexStream) -> Self {
            let mut reader = BufReader::new(stream);
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 || line == "\r\n" {
                    break;
                }
            }
            let mut stream = reader.into_inner();
            stream.write_all(SWITCHING).await.unwrap();
            Self { stream }
        }

        pub(crate) async fn send_text(&mut self, text: &str) {
            let wire = encode_frame(Role::Server, Opcode::Text, text.as_bytes());
            self.stream.write_all(&wire).await.unwrap();
        }

        pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
            self.stream.write_all(bytes).await.unwrap();
        }

        /// Next frame the client wrote, or `None` once it closed.
        pub(crate) async fn recv(&mut self) -> Option<Frame> {
            match frame::decode_one(&mut self.stream).await.ok()? {
                Decoded::Frame(f) => Some(f),
                Decoded::EndOfStream => None,
            }
        }

        pub(crate) async fn recv_text(&mut self) -> Option<String> {
            self.recv().await.map(|f| f.into_text().unwrap())
        }
    }

    /// Hands out in-memory streams and passes the server ends to the test.
    pub(crate) struct PipeConnector {
        peers: mpsc::UnboundedSender<DuplexStream>,
        pub opened: AtomicUsize,
    }

    impl PipeConnector {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                peers: tx,
                opened: AtomicUsize::new(0),
            });
            (connector, rx)
        }
    }

    #[async_trait]
    impl Connector for PipeConnector {
        async fn open(&self, _target: &Target) -> Result<BoxedStream> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (client, server) = duplex(1 << 20);
            self.peers
                .send(server)
                .map_err(|_| TransportError::Io("no peer listening".into()))?;
            Ok(Box::new(client))
        }
    }

    pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("link event channel closed")
    }

    async fn connected() -> (
        Arc<TransportConnection>,
        FakePeer,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let (connector, mut peers) = PipeConnector::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = TransportConnection::new();
        let target = Target::new("glasses", 8765);
        let accept = tokio::spawn(async move { FakePeer::accept(peers.recv().await.unwrap()).await });
        conn.connect(connector.as_ref(), &target, tx).await.unwrap();
        (conn, accept.await.unwrap(), rx)
    }

    #[tokio::test]
    async fn connect_reports_open_and_dispatches_text() {
        let (conn, mut peer, mut rx) = connected().await;
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(matches!(next_event(&mut rx).await, LinkEvent::Opened { .. }));

        peer.send_text("{\"type\":\"exit\",\"code\":0}").await;
        match next_event(&mut rx).await {
            LinkEvent::Message { text, conn_id } => {
                assert_eq!(conn_id, conn.id());
                assert_eq!(text, "{\"type\":\"exit\",\"code\":0}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn sends_are_masked_and_ordered() {
        let (conn, mut peer, _rx) = connected().await;
        for text in ["one", "two", "three"] {
            conn.send(text).await.unwrap();
        }
        for expected in ["one", "two", "three"] {
            let frame = peer.recv().await.unwrap();
            assert!(frame.masked);
            assert_eq!(frame.into_text().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn concurrent_sends_do_not_interleave() {
        let (conn, mut peer, _rx) = connected().await;
        let big = "x".repeat(200_000);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let conn = Arc::clone(&conn);
            let big = big.clone();
            tasks.push(tokio::spawn(async move { conn.send(&big).await.unwrap() }));
        }
        for _ in 0..8 {
            let frame = peer.recv().await.unwrap();
            assert_eq!(frame.payload.len(), 200_000);
        }
        for t in tasks {
            t.await.unwrap();
        }
    }

    #[tokio::test]
    async fn peer_close_frame_ends_loop() {
        let (conn, mut peer, mut rx) = connected().await;
        let _ = next_event(&mut rx).await;
        peer.send_raw(&encode_frame(Role::Server, Opcode::Close, &[])).await;
        assert!(matches!(next_event(&mut rx).await, LinkEvent::Closed { .. }));
        conn.closed().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.send("late").await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn local_close_unblocks_read_loop() {
        let (conn, mut peer, mut rx) = connected().await;
        let _ = next_event(&mut rx).await;
        conn.close().await;
        match next_event(&mut rx).await {
            LinkEvent::Closed { reason, .. } => assert_eq!(reason, None),
            other => panic!("unexpected {other:?}"),
        }
        // Close frame went out before the socket shut.
        assert!(peer.recv().await.is_none());
        let mut rest = Vec::new();
        peer.stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (_conn, mut peer, _rx) = connected().await;
        peer.send_raw(&encode_frame(Role::Server, Opcode::Ping, b"hb")).await;
        let pong = peer.recv().await.unwrap();
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload, b"hb");
    }

    #[tokio::test]
    async fn fragmented_message_is_reassembled() {
        let (_conn, mut peer, mut rx) = connected().await;
        let _ = next_event(&mut rx).await;
        let first = frame::encode_with_mask(Opcode::Text, b"hel", None);
        let mut first = first.to_vec();
        first[0] &= 0x7F;
        let mut middle = frame::encode_with_mask(Opcode::Continuation, b"lo ", None).to_vec();
        middle[0] &= 0x7F;
        let last = frame::encode_with_mask(Opcode::Continuation, b"there", None);
        peer.send_raw(&first).await;
        peer.send_raw(&encode_frame(Role::Server, Opcode::Pong, b"")).await;
        peer.send_raw(&middle).await;
        peer.send_raw(&last).await;
        match next_event(&mut rx).await {
            LinkEvent::Message { text, .. } => assert_eq!(text, "hello there"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn fragmented_message_over_cap_is_discarded() {
        let (conn, mut peer, mut rx) = connected().await;
        let _ = next_event(&mut rx).await;
        let piece = vec![b'a'; 6 * 1024 * 1024];

        let mut first = frame::encode_with_mask(Opcode::Text, &piece, None).to_vec();
        first[0] &= 0x7F;
        let mut middle = frame::encode_with_mask(Opcode::Continuation, &piece, None).to_vec();
        middle[0] &= 0x7F;
        let last = frame::encode_with_mask(Opcode::Continuation, b"tail", None);
        peer.send_raw(&first).await;
        peer.send_raw(&middle).await;
        peer.send_raw(&last).await;
        peer.send_text("after").await;

        match next_event(&mut rx).await {
            LinkEvent::Message { text, .. } => assert_eq!(text, "after"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn oversized_header_aborts_connection() {
        let (_conn, mut peer, mut rx) = connected().await;
        let _ = next_event(&mut rx).await;
        let mut header = vec![0x81, 0x7F];
        header.extend_from_slice(&(64u64 * 1024 * 1024).to_be_bytes());
        peer.send_raw(&header).await;
        match next_event(&mut rx).await {
            LinkEvent::Closed { reason, .. } => assert!(reason.unwrap().contains("exceeds cap")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_utf8_is_dropped_not_fatal() {
        let (_conn, mut peer, mut rx) = connected().await;
        let _ = next_event(&mut rx).await;
        peer.send_raw(&encode_frame(Role::Server, Opcode::Binary, &[0xff, 0xfe])).await;
        peer.send_text("ok").await;
        match next_event(&mut rx).await {
            LinkEvent::Message { text, .. } => assert_eq!(text, "ok"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_upgrade_leaves_error_state() {
        let (connector, mut peers) = PipeConnector::new();
        tokio::spawn(async move {
            let mut server = peers.recv().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = server.read(&mut buf).await;
            server
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .unwrap();
            server
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = TransportConnection::new();
        let err = conn
            .connect(connector.as_ref(), &Target::new("h", 1), tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::HandshakeRejected(_))
        ));
        assert!(matches!(conn.state(), ConnectionState::Error(_)));
        assert!(matches!(conn.send("x").await, Err(Error::NotConnected)));
    }
}
