use crate::codec;
use crate::error::{ChatError, Result};
use crate::types::WireFrame;
use futures_util::{SinkExt, Stream, StreamExt};
use log::*;
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        error::{Error as WsError, ProtocolError},
        protocol::{frame::coding::CloseCode, CloseFrame, Message},
    },
};
use url::Url;

/// Close code for an intentional, non-error shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the peer sent a close frame without a status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Reported when the stream ended without any close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Frames queued for one socket before further writes are refused.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 32;
/// How long a locally closed socket waits for the peer's close reply.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEventKind {
    Opened,
    Frame(WireFrame),
    Closed { code: u16, reason: String },
    Errored(String),
}

/// A lifecycle or data event raised by one socket, tagged with the socket's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEvent {
    pub socket_id: u64,
    pub kind: SocketEventKind,
}

/// Reports events for one socket into the supervisor's event channel.
#[derive(Debug, Clone)]
pub struct EventReporter {
    socket_id: u64,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl EventReporter {
    pub fn socket_id(&self) -> u64 {
        self.socket_id
    }

    /// Returns `false` once nobody listens for this socket anymore.
    pub fn emit(&self, kind: SocketEventKind) -> bool {
        self.events
            .send(SocketEvent {
                socket_id: self.socket_id,
                kind,
            })
            .is_ok()
    }

    /// Decodes an inbound text frame and reports it. Malformed frames are
    /// logged and dropped without affecting the connection.
    pub fn frame_text(&self, text: &str) -> bool {
        trace!("[Socket {}] Received text frame: {}", self.socket_id, text);
        match codec::decode(text) {
            Ok(frame) => self.emit(SocketEventKind::Frame(frame)),
            Err(e) => {
                warn!(
                    "[Socket {}] Dropping malformed frame: {}",
                    self.socket_id, e
                );
                true
            }
        }
    }

    pub fn frame_binary(&self, bytes: &[u8]) -> bool {
        trace!(
            "[Socket {}] Received binary frame ({} bytes)",
            self.socket_id,
            bytes.len()
        );
        match codec::decode_binary(bytes) {
            Ok(frame) => self.emit(SocketEventKind::Frame(frame)),
            Err(e) => {
                warn!(
                    "[Socket {}] Dropping malformed binary frame: {}",
                    self.socket_id, e
                );
                true
            }
        }
    }
}

/// The connector-facing half of a socket: the queue of frames to write and
/// the reporter for everything that happens on the wire.
#[derive(Debug)]
pub struct SocketLink {
    outbound: mpsc::Receiver<Message>,
    reporter: EventReporter,
}

impl SocketLink {
    pub fn socket_id(&self) -> u64 {
        self.reporter.socket_id
    }

    pub fn split(self) -> (mpsc::Receiver<Message>, EventReporter) {
        (self.outbound, self.reporter)
    }
}

/// Opens the underlying duplex connection for a [`SocketTransport`].
///
/// `open` must return immediately. The spawned task reports `Opened` or
/// `Errored` once the handshake finishes, then every frame and the final
/// closure, and writes whatever arrives on the link's outbound queue.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: Url, link: SocketLink) -> JoinHandle<()>;
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: Url, link: SocketLink) -> JoinHandle<()> {
        tokio::spawn(run_socket(url, link))
    }
}

async fn run_socket(url: Url, link: SocketLink) {
    let (mut outbound, reporter) = link.split();
    let id = reporter.socket_id();

    // The query carries the ticket, keep it out of the logs.
    info!(
        "[Socket {}] Connecting to {}://{}{}",
        id,
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.path()
    );
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, response)) => {
            info!(
                "[Socket {}] Connected. Response: {:?}",
                id,
                response.status()
            );
            stream
        }
        Err(e) => {
            error!("[Socket {}] Connection failed: {}", id, e);
            let err = ChatError::WebsocketError(format!("connection failed: {}", e));
            reporter.emit(SocketEventKind::Errored(err.to_string()));
            return;
        }
    };
    if !reporter.emit(SocketEventKind::Opened) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = write.send(message).await {
                        error!("[Socket {}] Send error: {}", id, e);
                        reporter.emit(SocketEventKind::Errored(format!("send failed: {}", e)));
                        break;
                    }
                    if closing {
                        debug!("[Socket {}] Close frame sent.", id);
                        await_close_reply(id, &mut read).await;
                        break;
                    }
                }
                None => {
                    debug!("[Socket {}] Outbound queue dropped, closing.", id);
                    if write.send(Message::Close(None)).await.is_ok() {
                        await_close_reply(id, &mut read).await;
                    }
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    reporter.frame_text(&text);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    reporter.frame_binary(&bytes);
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!("[Socket {}] Received WS Ping, answering", id);
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        error!("[Socket {}] Failed to send Pong: {}", id, e);
                        reporter.emit(SocketEventKind::Errored(format!("pong failed: {}", e)));
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!("[Socket {}] Received WS Pong", id);
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                    warn!("[Socket {}] Received close frame: code={} reason={:?}", id, code, reason);
                    reporter.emit(SocketEventKind::Closed { code, reason });
                    // sends the queued close reply
                    let _ = write.flush().await;
                    break;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed))
                | Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)))
                | None => {
                    info!("[Socket {}] Connection dropped without close frame.", id);
                    reporter.emit(SocketEventKind::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection dropped without closing handshake".to_string(),
                    });
                    break;
                }
                Some(Err(e)) => {
                    error!("[Socket {}] Read error: {}", id, e);
                    reporter.emit(SocketEventKind::Errored(e.to_string()));
                    break;
                }
            }
        }
    }
    info!("[Socket {}] Task finished.", id);
}

/// Reads until the peer answers our close frame or the stream ends.
async fn await_close_reply<S>(id: u64, read: &mut S)
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    let reply = timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while let Some(Ok(message)) = read.next().await {
            if matches!(message, Message::Close(_)) {
                return true;
            }
        }
        false
    })
    .await;
    match reply {
        Ok(true) => debug!("[Socket {}] Closing handshake complete.", id),
        Ok(false) => debug!("[Socket {}] Stream ended before close reply.", id),
        Err(_) => warn!(
            "[Socket {}] No close reply within {:?}, dropping connection.",
            id, CLOSE_HANDSHAKE_TIMEOUT
        ),
    }
}

/// Writes encoded frames into a socket's outbound queue without waiting.
#[derive(Debug, Clone)]
pub struct FrameSender {
    outbound: mpsc::Sender<Message>,
}

impl FrameSender {
    /// Fails with `NotConnected` once the socket task is gone, and with
    /// `WebsocketError` when the writer has fallen behind and the queue is full.
    pub fn send(&self, frame: &WireFrame) -> Result<()> {
        match self.outbound.try_send(Message::Text(codec::encode(frame))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    "[Socket] Outbound queue full ({} frames), dropping {:?} frame.",
                    OUTBOUND_QUEUE_CAPACITY,
                    frame.chat_type()
                );
                Err(ChatError::WebsocketError("outbound queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => Err(ChatError::NotConnected),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opening,
    Open,
    Closed,
}

/// Owns exactly one underlying connection.
#[derive(Debug)]
pub struct SocketTransport {
    socket_id: u64,
    outbound: mpsc::Sender<Message>,
    task: JoinHandle<()>,
    phase: Phase,
}

impl SocketTransport {
    /// Starts the handshake without waiting for it.
    pub fn open(
        connector: &dyn Connector,
        url: Url,
        socket_id: u64,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let link = SocketLink {
            outbound: outbound_rx,
            reporter: EventReporter { socket_id, events },
        };
        let task = connector.open(url, link);
        Self {
            socket_id,
            outbound,
            task,
            phase: Phase::Opening,
        }
    }

    pub fn id(&self) -> u64 {
        self.socket_id
    }

    /// Records the `Opened` event. Has no effect once the socket is closed.
    pub fn mark_open(&mut self) {
        if self.phase == Phase::Opening {
            self.phase = Phase::Open;
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Whether `close` or `abandon` has been called.
    pub fn is_closing(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn sender(&self) -> FrameSender {
        FrameSender {
            outbound: self.outbound.clone(),
        }
    }

    pub fn send(&self, frame: &WireFrame) -> Result<()> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }
        self.sender().send(frame)
    }

    /// Closes the connection. An open socket gets a close frame; a socket
    /// still handshaking is dropped. Repeated calls do nothing.
    pub fn close(&mut self, code: u16, reason: &str) {
        match self.phase {
            Phase::Closed => return,
            Phase::Open => {
                debug!(
                    "[Socket {}] Closing with code {} ({})",
                    self.socket_id, code, reason
                );
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: Cow::Owned(reason.to_string()),
                };
                if self.outbound.try_send(Message::Close(Some(frame))).is_err() {
                    debug!(
                        "[Socket {}] Close frame could not be queued, dropping connection",
                        self.socket_id
                    );
                    self.task.abort();
                }
            }
            Phase::Opening => {
                debug!("[Socket {}] Abandoning handshake", self.socket_id);
                self.task.abort();
            }
        }
        self.phase = Phase::Closed;
    }

    /// Tears down a socket that already failed.
    pub fn abandon(&mut self) {
        self.phase = Phase::Closed;
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{accept_async, WebSocketStream};

    #[derive(Default)]
    struct CaptureConnector {
        links: Mutex<Vec<SocketLink>>,
    }

    impl Connector for CaptureConnector {
        fn open(&self, _url: Url, link: SocketLink) -> JoinHandle<()> {
            self.links.lock().unwrap().push(link);
            tokio::spawn(async {})
        }
    }

    fn url() -> Url {
        Url::parse("ws://localhost/ws/chat?chatTicket=t").unwrap()
    }

    #[tokio::test]
    async fn test_send_requires_open_socket() {
        let connector = CaptureConnector::default();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut socket = SocketTransport::open(&connector, url(), 1, events_tx);

        let result = socket.send(&WireFrame::Talk("early".to_string()));
        assert!(matches!(result, Err(ChatError::NotConnected)));

        socket.mark_open();
        socket.send(&WireFrame::Talk("hello".to_string())).unwrap();

        let link = connector.links.lock().unwrap().pop().unwrap();
        let (mut outbound, _) = link.split();
        match outbound.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(text, r#"{"chatType":"TALK","content":"hello"}"#),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = CaptureConnector::default();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut socket = SocketTransport::open(&connector, url(), 7, events_tx);
        socket.mark_open();

        socket.close(NORMAL_CLOSURE, "bye");
        socket.close(NORMAL_CLOSURE, "bye again");
        assert!(socket.is_closing());
        assert!(!socket.is_open());
        assert!(socket.send(&WireFrame::Ping).is_err());

        socket.mark_open();
        assert!(!socket.is_open());

        let link = connector.links.lock().unwrap().pop().unwrap();
        let (mut outbound, _) = link.split();
        match outbound.try_recv().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), NORMAL_CLOSURE);
                assert_eq!(frame.reason, "bye");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_while_opening_sends_nothing() {
        let connector = CaptureConnector::default();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut socket = SocketTransport::open(&connector, url(), 3, events_tx);
        socket.close(NORMAL_CLOSURE, "never opened");

        let link = connector.links.lock().unwrap().pop().unwrap();
        let (mut outbound, _) = link.split();
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reporter_drops_malformed_frames() {
        let connector = CaptureConnector::default();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _socket = SocketTransport::open(&connector, url(), 9, events_tx);
        let link = connector.links.lock().unwrap().pop().unwrap();
        assert_eq!(link.socket_id(), 9);
        let (_, reporter) = link.split();

        assert!(reporter.frame_text("{not json"));
        assert!(reporter.frame_text(r#"{"chatType":"TALK","content":"hi"}"#));
        assert!(reporter.frame_binary(&[0xc3, 0x28]));

        let event = events_rx.try_recv().unwrap();
        assert_eq!(
            event,
            SocketEvent {
                socket_id: 9,
                kind: SocketEventKind::Frame(WireFrame::Talk("hi".to_string())),
            }
        );
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_refuses_frames_without_blocking() {
        let connector = CaptureConnector::default();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut socket = SocketTransport::open(&connector, url(), 4, events_tx);
        socket.mark_open();

        for i in 0..OUTBOUND_QUEUE_CAPACITY {
            socket.send(&WireFrame::Talk(format!("msg {}", i))).unwrap();
        }
        let result = socket.send(&WireFrame::Talk("one too many".to_string()));
        assert!(matches!(result, Err(ChatError::WebsocketError(_))));

        let link = connector.links.lock().unwrap().pop().unwrap();
        let (mut outbound, _) = link.split();
        let mut queued = 0;
        while outbound.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, OUTBOUND_QUEUE_CAPACITY);

        // Room again once the writer catches up.
        socket.send(&WireFrame::Ping).unwrap();
    }

    // --- Real sockets over loopback ---

    async fn start_server() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = Url::parse(&format!("ws://127.0.0.1:{}/ws/chat?chatTicket=t", port)).unwrap();
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn next_kind(events: &mut mpsc::UnboundedReceiver<SocketEvent>) -> SocketEventKind {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("Timed out waiting for socket event")
            .expect("Event channel closed")
            .kind
    }

    #[tokio::test]
    async fn test_ws_connector_delivers_talk_and_reports_dropped_connection() {
        let (listener, url) = start_server().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _socket = SocketTransport::open(&WsConnector, url, 1, events_tx);

        let mut server = accept(&listener).await;
        server
            .send(Message::Text(r#"{"chatType":"TALK","content":"hi"}"#.to_string()))
            .await
            .unwrap();
        // Gone without a closing handshake.
        drop(server);

        assert_eq!(next_kind(&mut events_rx).await, SocketEventKind::Opened);
        assert_eq!(
            next_kind(&mut events_rx).await,
            SocketEventKind::Frame(WireFrame::Talk("hi".to_string()))
        );
        match next_kind(&mut events_rx).await {
            SocketEventKind::Closed { code, .. } => assert_eq!(code, ABNORMAL_CLOSURE),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ws_connector_maps_close_without_status() {
        let (listener, url) = start_server().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _socket = SocketTransport::open(&WsConnector, url, 2, events_tx);

        let mut server = accept(&listener).await;
        assert_eq!(next_kind(&mut events_rx).await, SocketEventKind::Opened);
        server.close(None).await.unwrap();

        assert_eq!(
            next_kind(&mut events_rx).await,
            SocketEventKind::Closed {
                code: NO_STATUS_RECEIVED,
                reason: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_ws_connector_sends_normal_close() {
        let (listener, url) = start_server().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut socket = SocketTransport::open(&WsConnector, url, 3, events_tx);

        let mut server = accept(&listener).await;
        assert_eq!(next_kind(&mut events_rx).await, SocketEventKind::Opened);
        socket.mark_open();
        socket.close(NORMAL_CLOSURE, "bye");

        let received = timeout(Duration::from_secs(5), async {
            while let Some(message) = server.next().await {
                if let Message::Close(frame) = message.unwrap() {
                    return frame;
                }
            }
            None
        })
        .await
        .expect("Timed out waiting for close frame");
        let frame = received.expect("Close frame without status");
        assert_eq!(frame.code, CloseCode::Normal);
        assert_eq!(frame.reason, "bye");

        // Flushes the server's close reply; the client then hangs up.
        let _ = timeout(Duration::from_secs(5), server.next()).await;
        // The closing handshake completed, so nothing else is reported.
        assert!(events_rx.try_recv().is_err());
    }
}
