//! Connection state monitoring across all brokers.
//!
//! The `Supervisor` watches the state channel of every established
//! subscription, logs transitions and keeps a count of live connections.
//! When the last one reaches a terminal state outside of shutdown, the
//! `all_lost` token is cancelled so the application can exit.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::ConnectionState;

#[derive(Debug, Clone)]
pub struct Supervisor {
    /// Connections that have not reached a terminal state
    live: Arc<AtomicUsize>,

    /// Cancelled once every watched connection is lost
    all_lost: CancellationToken,

    /// Stops the monitors; set before an orderly shutdown
    cancel_token: CancellationToken,
}

impl Supervisor {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            all_lost: CancellationToken::new(),
            cancel_token,
        }
    }

    /// Starts monitoring a batch of established connections.
    ///
    /// The whole batch is counted as live before any monitor runs, so a
    /// connection that is already down cannot bring the count to zero while
    /// the rest of the batch is still being registered.
    pub fn watch_all<I>(&self, connections: I)
    where
        I: IntoIterator<Item = (String, watch::Receiver<ConnectionState>)>,
    {
        let connections: Vec<_> = connections.into_iter().collect();
        self.live.fetch_add(connections.len(), Ordering::AcqRel);
        for (target, state_rx) in connections {
            let supervisor = self.clone();
            tokio::spawn(async move {
                supervisor.run_monitor_loop(target, state_rx).await;
            });
        }
    }

    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Token cancelled when no live connection remains.
    pub fn all_lost(&self) -> CancellationToken {
        self.all_lost.clone()
    }

    async fn run_monitor_loop(&self, target: String, mut state_rx: watch::Receiver<ConnectionState>) {
        debug!(broker = %target, "Supervisor monitoring started");

        let reason = loop {
            let state = state_rx.borrow_and_update().clone();
            match &state {
                ConnectionState::Connected => info!(broker = %target, "Connection up"),
                ConnectionState::Reconnecting(_) => warn!(broker = %target, "Connection {}", state),
                ConnectionState::Disconnected(reason) => break reason.clone(),
                ConnectionState::Connecting => {}
            }

            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!(broker = %target, "Supervisor monitoring stopped");
                    return;
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break "connection task ended".to_string();
                    }
                }
            }
        };

        self.on_lost(&target, &reason);
    }

    fn on_lost(&self, target: &str, reason: &str) {
        let remaining = self.live.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        if self.cancel_token.is_cancelled() {
            return;
        }

        warn!(broker = %target, "Connection lost: {}", reason);
        if remaining == 0 {
            error!("All broker connections lost");
            self.all_lost.cancel();
        } else {
            info!("{} broker connection(s) remaining", remaining);
        }
    }
}
