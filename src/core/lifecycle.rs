//! Process lifecycle: wait for a stop condition, then tear down.
//!
//! The coordinator blocks the main task until one of:
//! - SIGINT / Ctrl+C
//! - SIGTERM (unix)
//! - the internal stop handle being cancelled
//! - the connection set reporting that every connection is lost
//!
//! It then disconnects every registered subscription exactly once, in
//! parallel, each bounded by the grace period, and reports how the process
//! should exit.

use std::time::Duration;

use mtrwatch_mqtt::{ConnectionSet, Subscriber};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Error setting up signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Stopped,
    AllConnectionsLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    ConnectionsLost,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::ConnectionsLost => 1,
        }
    }
}

impl From<ShutdownReason> for ExitStatus {
    fn from(reason: ShutdownReason) -> Self {
        match reason {
            ShutdownReason::AllConnectionsLost => ExitStatus::ConnectionsLost,
            _ => ExitStatus::Clean,
        }
    }
}

pub struct Coordinator {
    stop: CancellationToken,
    grace: Duration,
}

impl Coordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            stop: CancellationToken::new(),
            grace,
        }
    }

    /// Cancelling the returned token stops the coordinator.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Waits for the first stop condition.
    pub async fn wait_for_shutdown(
        &self,
        all_lost: CancellationToken,
    ) -> Result<ShutdownReason, LifecycleError> {
        #[cfg(unix)]
        let reason = {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;

            tokio::select! {
                _ = sigint.recv() => ShutdownReason::Interrupt,
                _ = sigterm.recv() => ShutdownReason::Terminate,
                _ = self.stop.cancelled() => ShutdownReason::Stopped,
                _ = all_lost.cancelled() => ShutdownReason::AllConnectionsLost,
            }
        };

        #[cfg(not(unix))]
        let reason = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                ShutdownReason::Interrupt
            }
            _ = self.stop.cancelled() => ShutdownReason::Stopped,
            _ = all_lost.cancelled() => ShutdownReason::AllConnectionsLost,
        };

        Ok(reason)
    }

    /// Blocks until shutdown is requested, then disconnects every subscription.
    pub async fn run<S: Subscriber>(
        &self,
        connections: &mut ConnectionSet<S>,
    ) -> Result<ExitStatus, LifecycleError> {
        let reason = self.wait_for_shutdown(connections.all_lost()).await?;
        match reason {
            ShutdownReason::Interrupt => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...")
            }
            ShutdownReason::Terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...")
            }
            ShutdownReason::Stopped => info!("Stop requested, initiating graceful shutdown..."),
            ShutdownReason::AllConnectionsLost => {
                error!("No broker connection left, shutting down")
            }
        }

        self.teardown(connections).await;
        Ok(reason.into())
    }

    async fn teardown<S: Subscriber>(&self, connections: &mut ConnectionSet<S>) {
        let closed = connections.disconnect_all(self.grace).await;
        info!("Closed {} subscription(s)", closed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use mtrwatch_mqtt::{
        BrokerTarget, ConnectionState, SharedHandler, SubscriberConfig, Subscription, TransferError,
    };
    use tokio::sync::watch;

    use super::*;

    #[derive(Default)]
    struct MockSubscriber {
        disconnects: Arc<AtomicUsize>,
    }

    struct MockSubscription {
        target: String,
        // Held so the state channel stays open.
        _state_tx: watch::Sender<ConnectionState>,
        state_rx: watch::Receiver<ConnectionState>,
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Subscription for MockSubscription {
        fn target(&self) -> &str {
            &self.target
        }

        fn state(&self) -> watch::Receiver<ConnectionState> {
            self.state_rx.clone()
        }

        async fn disconnect(&mut self, _grace: Duration) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Subscriber for MockSubscriber {
        type Subscription = MockSubscription;

        async fn subscribe(
            &self,
            target: BrokerTarget,
            _client_id: String,
            _handler: SharedHandler,
        ) -> Result<MockSubscription, TransferError> {
            let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
            Ok(MockSubscription {
                target: target.as_str().to_string(),
                _state_tx: state_tx,
                state_rx,
                disconnects: self.disconnects.clone(),
            })
        }
    }

    async fn open(
        subscriber: Arc<MockSubscriber>,
        brokers: &[&str],
    ) -> ConnectionSet<MockSubscriber> {
        let config = SubscriberConfig {
            brokers: brokers.iter().map(|b| b.to_string()).collect(),
            client_id: "watch".into(),
            ..Default::default()
        };
        let handler: SharedHandler = Arc::new(|_: &str, _: &str, _: &[u8]| {});
        ConnectionSet::open(subscriber, &config, handler).await.unwrap()
    }

    #[tokio::test]
    async fn test_stop_handle_disconnects_each_once() {
        let subscriber = Arc::new(MockSubscriber::default());
        let disconnects = subscriber.disconnects.clone();
        let mut connections = open(subscriber, &["tcp://a", "tcp://b", "tcp://c"]).await;

        let coordinator = Coordinator::new(Duration::from_millis(10));
        let stop = coordinator.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.cancel();
        });

        let status = coordinator.run(&mut connections).await.unwrap();
        assert_eq!(status, ExitStatus::Clean);
        assert_eq!(status.code(), 0);
        assert_eq!(disconnects.load(Ordering::SeqCst), 3);
        assert!(connections.is_empty());
    }

    #[tokio::test]
    async fn test_all_lost_exits_non_zero() {
        let coordinator = Coordinator::new(Duration::from_millis(10));
        let all_lost = CancellationToken::new();
        all_lost.cancel();

        let reason = coordinator.wait_for_shutdown(all_lost).await.unwrap();
        assert_eq!(reason, ShutdownReason::AllConnectionsLost);
        assert_eq!(ExitStatus::from(reason).code(), 1);
    }

    #[test]
    fn test_signals_exit_clean() {
        assert_eq!(ExitStatus::from(ShutdownReason::Interrupt), ExitStatus::Clean);
        assert_eq!(ExitStatus::from(ShutdownReason::Terminate), ExitStatus::Clean);
        assert_eq!(ExitStatus::from(ShutdownReason::Stopped), ExitStatus::Clean);
    }
}
