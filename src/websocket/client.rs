use super::backoff::Backoff;
use super::heartbeat::HeartbeatScheduler;
use super::transport::{
    Connector, SocketEvent, SocketEventKind, SocketTransport, WsConnector, NORMAL_CLOSURE,
};
use crate::bus::{EventBus, Subscription};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::network::NetworkAwareness;
use crate::rest::TicketClient;
use crate::types::{ConnectionState, InboundEvent, NetworkEvent, RoomId, Ticket, WireFrame};
use chrono::Utc;
use log::*;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};

type TicketFuture = Pin<Box<dyn Future<Output = Result<Ticket>> + Send>>;

enum Command {
    Connect(RoomId),
    Disconnect(oneshot::Sender<()>),
    Send(String),
    Shutdown(oneshot::Sender<()>),
}

// Message text stays out of the logs.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect(room_id) => write!(f, "Connect({})", room_id),
            Command::Disconnect(_) => f.write_str("Disconnect"),
            Command::Send(text) => write!(f, "Send(<{} bytes>)", text.len()),
            Command::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

/// Handle to a supervised chat connection.
///
/// All calls are fire-and-forget: failures are handled by the supervisor
/// (backoff, offline parking) and never surface to the caller. Dropping the
/// handle disconnects and stops the supervisor.
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    bus: EventBus,
    state: watch::Receiver<ConnectionState>,
    manager_handle: JoinHandle<()>,
}

impl ChatClient {
    /// Creates a client that opens real WebSocket connections.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: ChatConfig,
        tickets: Arc<dyn TicketClient>,
        network: Arc<dyn NetworkAwareness>,
    ) -> Result<Self> {
        Self::with_connector(config, tickets, network, Arc::new(WsConnector))
    }

    pub fn with_connector(
        config: ChatConfig,
        tickets: Arc<dyn TicketClient>,
        network: Arc<dyn NetworkAwareness>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (socket_events_tx, socket_events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let bus = EventBus::new(config.event_buffer);

        // Subscribe before sampling so no transition falls in between.
        let network_events = network.subscribe();
        let online = network.is_online();

        let supervisor = Supervisor {
            heartbeat: HeartbeatScheduler::new(config.heartbeat_interval),
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            config,
            tickets,
            network,
            connector,
            bus: bus.clone(),
            state_tx,
            commands: commands_rx,
            socket_events_tx,
            socket_events: socket_events_rx,
            network_events: Some(network_events),
            online,
            session: None,
            next_socket_id: 0,
        };
        let manager_handle = tokio::spawn(supervisor.run());

        Ok(Self {
            commands: commands_tx,
            bus,
            state: state_rx,
            manager_handle,
        })
    }

    /// Starts connecting to `room_id`. A no-op if that room is already
    /// connected or being connected; any other room is left first.
    pub fn connect(&self, room_id: impl Into<RoomId>) {
        let _ = self.command(Command::Connect(room_id.into()));
    }

    /// Sends a chat message if the socket is open. Dropped otherwise.
    pub fn send(&self, text: impl Into<String>) {
        let _ = self.command(Command::Send(text.into()));
    }

    /// Leaves the current room. When this returns, the retry timer and the
    /// heartbeat are cancelled and the socket close has been issued.
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command(Command::Disconnect(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Subscribes to chat messages received from now on.
    pub fn events(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Disconnects and waits for the supervisor to stop.
    pub async fn shutdown(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = self.manager_handle.await {
            error!("[Supervisor] Task panicked: {}", e);
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|e| {
            debug!("[Supervisor] Not running, dropping {:?}", e.0);
            ChatError::SupervisorClosed
        })
    }
}

/// Everything that exists for one room between `connect` and `disconnect`.
/// The session only exists while the room is wanted open; `disconnect` drops it.
struct RoomSession {
    room_id: RoomId,
    retry_attempt: u32,
    current_ticket: Option<Ticket>,
    socket: Option<SocketTransport>,
    pending_ticket: Option<TicketFuture>,
    retry_timer: Option<Pin<Box<Sleep>>>,
}

impl RoomSession {
    fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            retry_attempt: 0,
            current_ticket: None,
            socket: None,
            pending_ticket: None,
            retry_timer: None,
        }
    }

    fn attempt_in_flight(&self) -> bool {
        self.socket.is_some() || self.pending_ticket.is_some()
    }

    fn is_active(&self) -> bool {
        self.attempt_in_flight() || self.retry_timer.is_some()
    }
}

enum Input {
    Command(Command),
    CommandsClosed,
    Socket(SocketEvent),
    Network(NetworkEvent),
    NetworkLagged,
    NetworkClosed,
    TicketIssued(Result<Ticket>),
    RetryDue,
}

/// The single owner of connection state. Every transition happens inside
/// `run`; the socket task, heartbeat and network source only send it events.
struct Supervisor {
    config: ChatConfig,
    tickets: Arc<dyn TicketClient>,
    network: Arc<dyn NetworkAwareness>,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    state_tx: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    socket_events_tx: mpsc::UnboundedSender<SocketEvent>,
    socket_events: mpsc::UnboundedReceiver<SocketEvent>,
    network_events: Option<broadcast::Receiver<NetworkEvent>>,
    online: bool,
    session: Option<RoomSession>,
    heartbeat: HeartbeatScheduler,
    backoff: Backoff,
    next_socket_id: u64,
}

async fn next_network_event(rx: &mut Option<broadcast::Receiver<NetworkEvent>>) -> Input {
    let Some(rx) = rx.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Ok(event) => Input::Network(event),
        Err(broadcast::error::RecvError::Lagged(_)) => Input::NetworkLagged,
        Err(broadcast::error::RecvError::Closed) => Input::NetworkClosed,
    }
}

/// Resolves when the session's ticket request finishes or its retry timer fires.
async fn session_wake(session: &mut Option<RoomSession>) -> Input {
    match session {
        Some(RoomSession {
            pending_ticket: Some(request),
            ..
        }) => Input::TicketIssued(request.await),
        Some(RoomSession {
            retry_timer: Some(timer),
            ..
        }) => {
            timer.await;
            Input::RetryDue
        }
        _ => std::future::pending().await,
    }
}

impl Supervisor {
    async fn run(mut self) {
        info!("[Supervisor] Started (online: {}).", self.online);
        loop {
            let input = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => Input::Command(command),
                    None => Input::CommandsClosed,
                },
                Some(event) = self.socket_events.recv() => Input::Socket(event),
                input = next_network_event(&mut self.network_events) => input,
                input = session_wake(&mut self.session) => input,
            };

            match input {
                Input::Command(Command::Connect(room_id)) => self.connect(room_id).await,
                Input::Command(Command::Disconnect(ack)) => {
                    self.teardown("disconnect requested").await;
                    let _ = ack.send(());
                }
                Input::Command(Command::Send(text)) => self.send_talk(text),
                Input::Command(Command::Shutdown(ack)) => {
                    self.teardown("shutdown").await;
                    let _ = ack.send(());
                    break;
                }
                Input::CommandsClosed => {
                    self.teardown("client dropped").await;
                    break;
                }
                Input::Socket(event) => self.on_socket_event(event).await,
                Input::Network(event) => self.on_network(event),
                Input::NetworkLagged => {
                    let online = self.network.is_online();
                    self.on_network(NetworkEvent { online });
                }
                Input::NetworkClosed => {
                    warn!("[Supervisor] Network source closed; connectivity recovery disabled.");
                    self.network_events = None;
                }
                Input::TicketIssued(result) => self.on_ticket(result).await,
                Input::RetryDue => self.on_retry_due(),
            }
        }
        info!("[Supervisor] Task finished.");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("[Supervisor] State {} -> {}", current, state);
            *current = state;
            true
        });
    }

    async fn connect(&mut self, room_id: RoomId) {
        let existing = self
            .session
            .as_ref()
            .map(|session| (session.room_id.clone(), session.is_active()));
        match existing {
            Some((current, true)) if current == room_id => {
                debug!("[Supervisor] Room {} already connecting or connected.", room_id);
                return;
            }
            Some((current, false)) if current == room_id => {
                info!("[Supervisor] Resuming parked session for room {}", room_id);
                self.begin_attempt();
                return;
            }
            Some((current, _)) => {
                info!("[Supervisor] Switching from room {} to {}", current, room_id);
                self.teardown("switching rooms").await;
            }
            None => {}
        }

        info!("[Supervisor] Connecting to room {}", room_id);
        self.session = Some(RoomSession::new(room_id));
        self.begin_attempt();
    }

    fn begin_attempt(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.retry_timer = None;
        session.current_ticket = None;
        info!(
            "[Supervisor] Requesting ticket for room {} (retry attempt {})",
            session.room_id, session.retry_attempt
        );
        let tickets = Arc::clone(&self.tickets);
        let room_id = session.room_id.clone();
        session.pending_ticket = Some(Box::pin(async move { tickets.issue_ticket(&room_id).await }));
        self.set_state(ConnectionState::Connecting);
    }

    async fn on_ticket(&mut self, result: Result<Ticket>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.pending_ticket = None;

        let ticket = match result {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!("[Supervisor] Ticket failure for room {}: {}", session.room_id, e);
                self.handle_failure().await;
                return;
            }
        };
        let url = match self.config.socket_url(&ticket) {
            Ok(url) => url,
            Err(e) => {
                warn!("[Supervisor] Unusable ticket for room {}: {}", session.room_id, e);
                self.handle_failure().await;
                return;
            }
        };

        self.next_socket_id += 1;
        let socket = SocketTransport::open(
            self.connector.as_ref(),
            url,
            self.next_socket_id,
            self.socket_events_tx.clone(),
        );
        debug!(
            "[Supervisor] Opening socket {} for room {}",
            socket.id(),
            session.room_id
        );
        session.current_ticket = Some(ticket);
        session.socket = Some(socket);
    }

    async fn on_socket_event(&mut self, event: SocketEvent) {
        let current = self
            .session
            .as_ref()
            .and_then(|session| session.socket.as_ref())
            .map(|socket| socket.id());
        if current != Some(event.socket_id) {
            debug!(
                "[Supervisor] Ignoring event from stale socket {}",
                event.socket_id
            );
            return;
        }

        match event.kind {
            SocketEventKind::Opened => self.on_opened(),
            SocketEventKind::Frame(frame) => self.on_frame(frame),
            // A socket we closed has already left the session, so every
            // closure seen here was not asked for, whatever its code.
            SocketEventKind::Closed { code, reason } => {
                warn!(
                    "[Supervisor] Socket {} closed abnormally: code={} reason={:?}",
                    event.socket_id, code, reason
                );
                self.handle_failure().await;
            }
            SocketEventKind::Errored(e) => {
                warn!("[Supervisor] Socket {} errored: {}", event.socket_id, e);
                self.handle_failure().await;
            }
        }
    }

    fn on_opened(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(socket) = session.socket.as_mut() else {
            return;
        };
        socket.mark_open();
        let sink = socket.sender();
        session.retry_attempt = 0;
        info!("[Supervisor] Connected to room {}", session.room_id);
        self.heartbeat.start(sink);
        self.set_state(ConnectionState::Connected);
    }

    fn on_frame(&self, frame: WireFrame) {
        match frame {
            WireFrame::Talk(text) => {
                let Some(session) = self.session.as_ref() else {
                    return;
                };
                let delivered = self.bus.publish(InboundEvent {
                    room_id: session.room_id.clone(),
                    text,
                    received_at: Utc::now(),
                });
                trace!("[Supervisor] Message delivered to {} subscribers", delivered);
            }
            WireFrame::Pong => trace!("[Supervisor] Keepalive acknowledged."),
            WireFrame::Ping => trace!("[Supervisor] Ignoring keepalive from server."),
        }
    }

    fn send_talk(&self, text: String) {
        let socket = self
            .session
            .as_ref()
            .and_then(|session| session.socket.as_ref())
            .filter(|socket| socket.is_open());
        match socket {
            Some(socket) => {
                if let Err(e) = socket.send(&WireFrame::Talk(text)) {
                    debug!("[Supervisor] Dropping outbound message: {}", e);
                }
            }
            None => debug!("[Supervisor] Not connected, dropping outbound message."),
        }
    }

    /// Common path for ticket failure, open failure and abnormal closure.
    async fn handle_failure(&mut self) {
        self.heartbeat.stop().await;
        let online = self.network.is_online();
        let Some(session) = self.session.as_mut() else {
            self.set_state(ConnectionState::Idle);
            return;
        };
        if let Some(mut socket) = session.socket.take() {
            socket.abandon();
        }
        session.pending_ticket = None;
        session.current_ticket = None;
        session.retry_timer = None;

        if !online {
            info!(
                "[Supervisor] Offline, no retry for room {} until connectivity returns.",
                session.room_id
            );
            self.set_state(ConnectionState::Idle);
            return;
        }

        let delay = self.backoff.delay(session.retry_attempt);
        session.retry_attempt = self.backoff.next_attempt(session.retry_attempt);
        warn!(
            "[Supervisor] Disconnected from room {}. Retrying in {:?}...",
            session.room_id, delay
        );
        session.retry_timer = Some(Box::pin(sleep(delay)));
        self.set_state(ConnectionState::AwaitingRetry);
    }

    fn on_retry_due(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.retry_timer = None;
        if !self.network.is_online() {
            info!(
                "[Supervisor] Still offline, parking room {} until connectivity returns.",
                session.room_id
            );
            self.set_state(ConnectionState::Idle);
            return;
        }
        self.begin_attempt();
    }

    fn on_network(&mut self, event: NetworkEvent) {
        let was_online = std::mem::replace(&mut self.online, event.online);
        if !event.online {
            if was_online {
                info!("[Supervisor] Connectivity lost.");
            }
            return;
        }
        if was_online {
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.attempt_in_flight() {
            return;
        }
        info!(
            "[Supervisor] Connectivity restored, reconnecting room {} now.",
            session.room_id
        );
        session.retry_attempt = 0;
        self.begin_attempt();
    }

    /// Cancels everything scoped to the session and closes its socket.
    async fn teardown(&mut self, reason: &str) {
        self.heartbeat.stop().await;
        if let Some(mut session) = self.session.take() {
            session.retry_timer = None;
            session.pending_ticket = None;
            session.current_ticket = None;
            if let Some(mut socket) = session.socket.take() {
                socket.close(NORMAL_CLOSURE, reason);
            }
            info!("[Supervisor] Left room {} ({}).", session.room_id, reason);
        }
        self.set_state(ConnectionState::Idle);
    }
}
