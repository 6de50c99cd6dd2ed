//! Subscription capability and its rumqttc implementation.
//!
//! `Subscriber` opens one established subscription per call; the connection
//! set is generic over it so tests can substitute an in-memory transport.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rumqttc::AsyncClient;
use tokio::{sync::oneshot, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    client::ClientBuilder, config::SubscriberConfig, connection::ConnectionKernel,
    error::TransferError, handler::SharedHandler, state::ConnectionState, target::BrokerTarget,
};

/// One established broker subscription.
#[async_trait]
pub trait Subscription: Send + Sync + 'static {
    /// Target this subscription was opened for.
    fn target(&self) -> &str;

    /// Receiver observing the connection state.
    fn state(&self) -> watch::Receiver<ConnectionState>;

    /// Requests a graceful disconnect and waits at most `grace` for it.
    ///
    /// Calling it again after the first call does nothing.
    async fn disconnect(&mut self, grace: Duration);
}

/// Opens subscriptions on broker targets.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    type Subscription: Subscription;

    /// Connects to `target` and subscribes to the configured topic.
    ///
    /// Returns only once the broker acknowledged both CONNECT and SUBSCRIBE,
    /// or with the error that prevented it. Failed targets are not retried.
    async fn subscribe(
        &self,
        target: BrokerTarget,
        client_id: String,
        handler: SharedHandler,
    ) -> Result<Self::Subscription, TransferError>;
}

/// Subscriber backed by rumqttc.
#[derive(Debug, Clone)]
pub struct MqttSubscriber {
    config: Arc<SubscriberConfig>,
}

impl MqttSubscriber {
    pub fn new(config: SubscriberConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }
}

#[async_trait]
impl Subscriber for MqttSubscriber {
    type Subscription = MqttSubscription;

    async fn subscribe(
        &self,
        target: BrokerTarget,
        client_id: String,
        handler: SharedHandler,
    ) -> Result<MqttSubscription, TransferError> {
        let (client, event_loop) =
            ClientBuilder::from_config(&self.config, &target, &client_id).build()?;

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let kernel = ConnectionKernel::new(
            target.as_str(),
            self.config.topic.as_str(),
            client.clone(),
            event_loop,
            handler,
            cancel.clone(),
            ready_tx,
        );
        let state = kernel.subscribe_state();

        debug!(broker = %target, client_id = %client_id, "Connecting");
        let mut task = tokio::spawn(kernel.run());

        let timeout = self.config.connection_timeout();
        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(MqttSubscription {
                target: target.as_str().to_string(),
                client,
                cancel,
                state,
                task: Some(task),
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => {
                let reason = match (&mut task).await {
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                    Ok(Ok(())) => "connection task ended".to_string(),
                };
                Err(TransferError::ConnectionKernel(reason))
            }
            Err(_) => {
                cancel.cancel();
                task.abort();
                Err(TransferError::ConnectTimeout(timeout))
            }
        }
    }
}

/// Established rumqttc subscription.
pub struct MqttSubscription {
    target: String,
    client: AsyncClient,
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<Result<(), TransferError>>>,
}

#[async_trait]
impl Subscription for MqttSubscription {
    fn target(&self) -> &str {
        &self.target
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    async fn disconnect(&mut self, grace: Duration) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        // Queued without waiting; the kernel flushes it on its next poll.
        if let Err(e) = self.client.try_disconnect() {
            debug!(broker = %self.target, "Could not queue DISCONNECT: {}", e);
        }

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(Ok(()))) => debug!(broker = %self.target, "Disconnected"),
            Ok(Ok(Err(e))) => debug!(broker = %self.target, "Connection ended with error: {}", e),
            Ok(Err(e)) => warn!(broker = %self.target, "Connection task failed: {}", e),
            Err(_) => {
                debug!(broker = %self.target, "Disconnect grace period elapsed, closing");
                self.cancel.cancel();
                task.abort();
            }
        }
    }
}

impl Drop for MqttSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
