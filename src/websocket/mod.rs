//! Supervised WebSocket connection to a chat room.
//!
//! [`ChatClient`] is the entry point. It hands every request to a single
//! supervisor task which owns the connection state and runs the state machine:
//!
//! - `Idle` → `Connecting`: a ticket is requested for the room, then a socket
//!   is opened with it.
//! - `Connecting` → `Connected`: the socket opened; the retry counter resets and
//!   a `PING` heartbeat starts.
//! - → `AwaitingRetry`: the ticket request, the handshake or an open socket
//!   failed while still wanted and online. The retry waits
//!   `min(2^attempt * 1s, 10s)`.
//! - → `Idle`: the failure happened offline (no retry until connectivity
//!   returns), or `disconnect` was called.
//!
//! Socket tasks, the heartbeat and the connectivity source never touch the
//! state themselves; they only report events to the supervisor.
//!
//! # Usage
//!
//! ```no_run
//! use chat_connector_rs::config::{ChatConfig, Environment};
//! use chat_connector_rs::network::ManualNetwork;
//! use chat_connector_rs::rest::HttpTicketClient;
//! use chat_connector_rs::websocket::ChatClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ChatConfig::for_environment(Environment::Staging).expect("config");
//!     let tickets = HttpTicketClient::new(&config, Some("access-token".to_string()))
//!         .expect("Failed to create ticket client");
//!     let network = Arc::new(ManualNetwork::new(true));
//!
//!     let client = ChatClient::new(config, Arc::new(tickets), network.clone())
//!         .expect("Failed to create chat client");
//!     let mut events = client.events();
//!     client.connect("42");
//!
//!     // Platform connectivity callbacks feed the supervisor.
//!     network.set_online(true);
//!
//!     while let Some(event) = events.recv().await {
//!         println!("[{}] {}", event.room_id, event.text);
//!         client.send("got it");
//!     }
//!     client.shutdown().await;
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod heartbeat;
pub mod transport;

pub use backoff::Backoff;
pub use client::ChatClient;
pub use heartbeat::HeartbeatScheduler;
pub use transport::{
    Connector, EventReporter, FrameSender, SocketEvent, SocketEventKind, SocketLink,
    SocketTransport, WsConnector, ABNORMAL_CLOSURE, NORMAL_CLOSURE, NO_STATUS_RECEIVED,
};
