use super::transport::FrameSender;
use crate::error::ChatError;
use crate::types::WireFrame;
use log::*;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Sends a `PING` frame on a fixed period while a socket is open.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    period: Duration,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl HeartbeatScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Starts pinging through `sink`. The first ping goes out one full period
    /// after this call. A previous schedule is cancelled first.
    pub fn start(&mut self, sink: FrameSender) {
        if let Some((token, _)) = self.running.take() {
            token.cancel();
        }
        let token = CancellationToken::new();
        let period = self.period;
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            match sink.send(&WireFrame::Ping) {
                                Ok(()) => trace!("[Heartbeat] Ping sent."),
                                Err(ChatError::NotConnected) => {
                                    debug!("[Heartbeat] Socket queue closed, stopping.");
                                    break;
                                }
                                // Queue full; the next tick tries again.
                                Err(e) => debug!("[Heartbeat] Ping skipped: {}", e),
                            }
                        }
                    }
                }
            }
        });
        debug!("[Heartbeat] Started with period {:?}", period);
        self.running = Some((token, handle));
    }

    /// Cancels the timer and waits for the task to exit, so no ping can be
    /// sent after this returns. Safe to call when not running.
    pub async fn stop(&mut self) {
        if let Some((token, handle)) = self.running.take() {
            token.cancel();
            let _ = handle.await;
            debug!("[Heartbeat] Stopped.");
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        if let Some((token, handle)) = self.running.take() {
            token.cancel();
            handle.abort();
        }
    }
}
