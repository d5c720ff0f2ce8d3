//! Device connectivity as seen by the connection supervisor.
//!
//! Platform code owns the real connectivity observer. It bridges into this
//! crate through [`NetworkAwareness`], most simply by driving a
//! [`ManualNetwork`] from its own callbacks.

use crate::types::NetworkEvent;
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

const NETWORK_EVENT_BUFFER: usize = 16;

pub trait NetworkAwareness: Send + Sync + 'static {
    fn is_online(&self) -> bool;

    /// A live feed of connectivity transitions.
    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent>;
}

/// A [`NetworkAwareness`] source fed by the embedding application.
#[derive(Debug)]
pub struct ManualNetwork {
    online: AtomicBool,
    tx: broadcast::Sender<NetworkEvent>,
}

impl ManualNetwork {
    pub fn new(online: bool) -> Self {
        let (tx, _) = broadcast::channel(NETWORK_EVENT_BUFFER);
        Self {
            online: AtomicBool::new(online),
            tx,
        }
    }

    /// Records the current connectivity and publishes an event if it changed.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        info!(
            "[Network] Connectivity changed: {}",
            if online { "online" } else { "offline" }
        );
        let _ = self.tx.send(NetworkEvent { online });
    }
}

impl Default for ManualNetwork {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkAwareness for ManualNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.tx.subscribe()
    }
}
