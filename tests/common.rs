// tests/common.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chat_connector_rs::config::{ChatConfig, Environment};
use chat_connector_rs::error::{ChatError, Result};
use chat_connector_rs::network::ManualNetwork;
use chat_connector_rs::rest::TicketClient;
use chat_connector_rs::types::{ConnectionState, RoomId, Ticket};
use chat_connector_rs::websocket::{
    ChatClient, Connector, EventReporter, SocketEventKind, SocketLink,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

static INIT: Once = Once::new();

// Loads .env (for the live tests) and initialises the logger once.
pub fn setup() {
    INIT.call_once(|| {
        if dotenv::from_path(".env").is_err() {
            let _ = dotenv::from_path("../.env");
        }
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn get_env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{} environment variable not set", name))
}

pub const PING_FRAME: &str = r#"{"chatType":"PING","content":null}"#;

pub fn talk_frame(text: &str) -> String {
    serde_json::json!({ "chatType": "TALK", "content": text }).to_string()
}

// --- Tickets ---

/// Ticket client with scripted failures; succeeds with `ticket-N` otherwise.
#[derive(Default)]
pub struct MockTickets {
    failures: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RoomId>>,
}

impl MockTickets {
    pub fn fail_next(&self, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back("ticket service unavailable".to_string());
        }
    }

    pub fn calls(&self) -> Vec<RoomId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TicketClient for MockTickets {
    async fn issue_ticket(&self, room_id: &RoomId) -> Result<Ticket> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(room_id.clone());
            calls.len()
        };
        if let Some(reason) = self.failures.lock().unwrap().pop_front() {
            return Err(ChatError::TicketError(reason));
        }
        Ok(Ticket::new(format!("ticket-{}", call)))
    }
}

// --- Sockets ---

struct AbortFlag(Arc<AtomicBool>);

impl Drop for AbortFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// In-memory connector. Each opened socket is handed to the test, which
/// plays the server side.
pub struct MockConnector {
    sockets: mpsc::UnboundedSender<MockSocket>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        let (sockets, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { sockets }), rx)
    }
}

impl Connector for MockConnector {
    fn open(&self, url: Url, link: SocketLink) -> JoinHandle<()> {
        let socket_id = link.socket_id();
        let (outbound, reporter) = link.split();
        let released = Arc::new(AtomicBool::new(false));
        let guard = AbortFlag(Arc::clone(&released));
        let _ = self.sockets.send(MockSocket {
            url,
            socket_id,
            opened_at: Instant::now(),
            reporter,
            outbound,
            sent: Vec::new(),
            aborted: released,
        });
        // Lives until the transport abandons the socket.
        tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        })
    }
}

pub struct MockSocket {
    pub url: Url,
    pub socket_id: u64,
    pub opened_at: Instant,
    reporter: EventReporter,
    outbound: mpsc::Receiver<Message>,
    sent: Vec<Message>,
    aborted: Arc<AtomicBool>,
}

impl MockSocket {
    pub fn ticket(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "chatTicket")
            .map(|(_, value)| value.into_owned())
    }

    pub fn open(&self) {
        self.reporter.emit(SocketEventKind::Opened);
    }

    /// Delivers a raw inbound text frame, well-formed or not.
    pub fn receive(&self, text: &str) {
        self.reporter.frame_text(text);
    }

    pub fn close(&self, code: u16) {
        self.reporter.emit(SocketEventKind::Closed {
            code,
            reason: "closed by test".to_string(),
        });
    }

    pub fn error(&self, message: &str) {
        self.reporter
            .emit(SocketEventKind::Errored(message.to_string()));
    }

    fn drain(&mut self) {
        while let Ok(message) = self.outbound.try_recv() {
            self.sent.push(message);
        }
    }

    /// Everything the client wrote so far.
    pub fn sent(&mut self) -> &[Message] {
        self.drain();
        &self.sent
    }

    pub fn ping_count(&mut self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, Message::Text(text) if text == PING_FRAME))
            .count()
    }

    pub fn talk_frames(&mut self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|m| match m {
                Message::Text(text) if text != PING_FRAME => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn close_code(&mut self) -> Option<u16> {
        self.sent().iter().find_map(|m| match m {
            Message::Close(Some(frame)) => Some(u16::from(frame.code)),
            _ => None,
        })
    }

    /// Closed by the client or abandoned after a failure.
    pub fn is_released(&mut self) -> bool {
        self.close_code().is_some() || self.aborted.load(Ordering::SeqCst)
    }
}

// --- Harness ---

pub struct Harness {
    pub client: ChatClient,
    pub tickets: Arc<MockTickets>,
    pub network: Arc<ManualNetwork>,
    sockets: mpsc::UnboundedReceiver<MockSocket>,
}

pub fn harness() -> Harness {
    harness_with(true)
}

pub fn harness_with(online: bool) -> Harness {
    setup();
    let config = ChatConfig::for_environment(Environment::Staging).unwrap();
    let tickets = Arc::new(MockTickets::default());
    let network = Arc::new(ManualNetwork::new(online));
    let (connector, sockets) = MockConnector::new();
    let client = ChatClient::with_connector(config, tickets.clone(), network.clone(), connector)
        .expect("Failed to create chat client");
    Harness {
        client,
        tickets,
        network,
        sockets,
    }
}

impl Harness {
    pub async fn next_socket(&mut self) -> MockSocket {
        timeout(Duration::from_secs(3600), self.sockets.recv())
            .await
            .expect("Timed out waiting for a socket")
            .expect("Connector dropped")
    }

    pub fn try_next_socket(&mut self) -> Option<MockSocket> {
        self.sockets.try_recv().ok()
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut changes = self.client.state_changes();
        timeout(Duration::from_secs(3600), changes.wait_for(|s| *s == state))
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for state {}", state))
            .expect("Supervisor stopped");
    }

    /// Connects to `room` and returns its socket once `Connected`.
    pub async fn connected(&mut self, room: &str) -> MockSocket {
        self.client.connect(room);
        let socket = self.next_socket().await;
        socket.open();
        self.wait_for_state(ConnectionState::Connected).await;
        socket
    }
}

/// Lets the supervisor work through everything already queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
