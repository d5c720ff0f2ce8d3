//! Ticket issuance over the chat REST API.
//!
//! Opening a chat socket requires a one-time ticket for the room. The
//! supervisor only depends on [`TicketClient`]; [`HttpTicketClient`] is the
//! implementation that talks to the real API.

pub mod client;

pub use client::HttpTicketClient;

use crate::error::Result;
use crate::types::{RoomId, Ticket};
use async_trait::async_trait;

#[async_trait]
pub trait TicketClient: Send + Sync + 'static {
    /// Requests a fresh one-time ticket for `room_id`. Any error counts as a
    /// ticket failure.
    async fn issue_ticket(&self, room_id: &RoomId) -> Result<Ticket>;
}
