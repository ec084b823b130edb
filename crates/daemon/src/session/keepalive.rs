//! Keepalive pinging for terminal connections.
//!
//! Reverse proxies and load balancers drop WebSocket connections that stay
//! silent for too long (often around a minute). The monitor sends a ping on
//! a fixed interval so an idle terminal keeps its connection, and optionally
//! declares the peer dead after a number of unanswered pings.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::OutboundFrame;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::KeepaliveConfig;
use crate::session::pty::SessionId;

/// Periodic ping sender for one session.
///
/// The ping task stops when the monitor is cancelled or dropped, when the
/// outgoing channel closes, or after signalling expiry.
pub struct KeepaliveMonitor {
    /// Stops the ping task.
    token: CancellationToken,
    /// Set by the first call to cancel.
    cancelled: AtomicBool,
    /// Pings sent since the last pong.
    outstanding: Arc<AtomicU32>,
    /// Total ping attempts.
    pings_sent: Arc<AtomicU64>,
}

impl KeepaliveMonitor {
    /// Starts pinging.
    ///
    /// Pings are queued on `outgoing` every `config.interval_secs`, starting
    /// one interval from now. When `config.max_missed_pongs` is non-zero and
    /// that many pings go unanswered, `expired` is cancelled and pinging
    /// stops.
    pub fn start(
        config: &KeepaliveConfig,
        outgoing: mpsc::Sender<OutboundFrame>,
        expired: CancellationToken,
        session_id: SessionId,
    ) -> Self {
        let monitor = Self {
            token: CancellationToken::new(),
            cancelled: AtomicBool::new(false),
            outstanding: Arc::new(AtomicU32::new(0)),
            pings_sent: Arc::new(AtomicU64::new(0)),
        };

        let pinger = Pinger {
            interval: config.interval(),
            max_missed: config.max_missed_pongs,
            outgoing,
            expired,
            token: monitor.token.clone(),
            outstanding: Arc::clone(&monitor.outstanding),
            pings_sent: Arc::clone(&monitor.pings_sent),
            session_id,
        };
        tokio::spawn(pinger.run());

        monitor
    }

    /// Records a pong from the peer.
    pub fn record_pong(&self) {
        self.outstanding.store(0, Ordering::SeqCst);
    }

    /// Stops pinging. Returns true only for the call that actually stopped it.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Number of pings attempted so far.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::SeqCst)
    }
}

impl Drop for KeepaliveMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// State owned by the ping task.
struct Pinger {
    interval: Duration,
    max_missed: u32,
    outgoing: mpsc::Sender<OutboundFrame>,
    expired: CancellationToken,
    token: CancellationToken,
    outstanding: Arc<AtomicU32>,
    pings_sent: Arc<AtomicU64>,
    session_id: SessionId,
}

impl Pinger {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.on_tick() {
                        break;
                    }
                }
            }
        }

        tracing::trace!(session_id = %self.session_id, "Keepalive stopped");
    }

    /// Handles one interval. Returns false when pinging should stop.
    fn on_tick(&self) -> bool {
        if self.outgoing.is_closed() {
            return false;
        }

        let missed = self.outstanding.load(Ordering::SeqCst);
        if self.max_missed > 0 && missed >= self.max_missed {
            tracing::warn!(
                session_id = %self.session_id,
                missed = missed,
                "Peer stopped answering keepalive pings"
            );
            self.expired.cancel();
            return false;
        }

        self.pings_sent.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        match self.outgoing.try_send(OutboundFrame::Ping(Vec::new())) {
            Ok(()) => tracing::trace!(session_id = %self.session_id, "Sent keepalive ping"),
            Err(e) => tracing::debug!(
                session_id = %self.session_id,
                error = %e,
                "Dropped keepalive ping"
            ),
        }

        true
    }
}
