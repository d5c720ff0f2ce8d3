//! Fan-out of decoded chat messages to every current subscriber.
//!
//! Subscribers only see events published after they subscribed. Publishing
//! never waits on a subscriber: a subscriber that falls more than the buffer
//! capacity behind skips the oldest events and keeps going.

use crate::types::InboundEvent;
use log::*;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<InboundEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers the event was handed to.
    pub fn publish(&self, event: InboundEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live feed of inbound chat events.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<InboundEvent>,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[Events] Subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("[Events] Subscriber lagged, skipped {} events", skipped);
                }
                Err(_) => return None,
            }
        }
    }
}
