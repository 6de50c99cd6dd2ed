//! The set of broker connections opened at startup.
//!
//! `ConnectionSet::open` starts one establishment task per broker target.
//! Each task reports its outcome on a shared results channel; the set keeps
//! every established subscription in its registry and counts the rest as
//! failed. One failing target never affects the others.
//!
//! ```ignore
//! let set = ConnectionSet::open(Arc::new(MqttSubscriber::new(config.clone())), &config, handler).await?;
//! let lost = set.all_lost();
//! // ... wait for a stop signal or `lost.cancelled()`
//! set.disconnect_all(Duration::from_millis(250)).await;
//! ```

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::{
    config::SubscriberConfig,
    error::TransferError,
    handler::SharedHandler,
    subscriber::{MqttSubscriber, Subscriber, Subscription},
    supervisor::Supervisor,
    target::BrokerTarget,
};

/// Connection set backed by rumqttc.
pub type MqttConnectionSet = ConnectionSet<MqttSubscriber>;

struct Outcome<T> {
    target: String,
    result: Result<T, TransferError>,
}

pub struct ConnectionSet<S: Subscriber> {
    /// Established subscriptions, drained by `disconnect_all`
    registry: Vec<S::Subscription>,

    /// Number of targets that were configured
    total: usize,

    supervisor: Supervisor,

    /// Stops the supervisor monitors before an orderly shutdown
    cancel_token: CancellationToken,
}

impl MqttConnectionSet {
    /// Opens every configured target with the rumqttc subscriber.
    pub async fn connect(
        config: SubscriberConfig,
        handler: SharedHandler,
    ) -> Result<Self, TransferError> {
        let subscriber = Arc::new(MqttSubscriber::new(config));
        let config = subscriber.config().clone();
        Self::open(subscriber, &config, handler).await
    }
}

impl<S: Subscriber> ConnectionSet<S> {
    /// Establishes subscriptions on all configured targets concurrently.
    ///
    /// Returns once every target reported success or failure. Fails only when
    /// no target could be established.
    pub async fn open(
        subscriber: Arc<S>,
        config: &SubscriberConfig,
        handler: SharedHandler,
    ) -> Result<Self, TransferError> {
        config.validate()?;

        let total = config.brokers.len();
        let mut failed = 0usize;
        let mut targets = Vec::with_capacity(total);
        for raw in &config.brokers {
            match BrokerTarget::parse(raw) {
                Ok(target) => targets.push(target),
                Err(e) => {
                    error!("{}", e);
                    failed += 1;
                }
            }
        }

        let client_ids = assign_client_ids(&targets, &config.client_id);

        let (results_tx, mut results_rx) = mpsc::channel(total.max(1));
        for (target, client_id) in targets.into_iter().zip(client_ids) {
            let subscriber = subscriber.clone();
            let handler = handler.clone();
            let results_tx = results_tx.clone();
            tokio::spawn(async move {
                let raw = target.as_str().to_string();
                let result = subscriber.subscribe(target, client_id, handler).await;
                let _ = results_tx
                    .send(Outcome {
                        target: raw,
                        result,
                    })
                    .await;
            });
        }
        drop(results_tx);

        let cancel_token = CancellationToken::new();
        let supervisor = Supervisor::new(cancel_token.clone());
        let mut registry = Vec::with_capacity(total);

        while let Some(outcome) = results_rx.recv().await {
            match outcome.result {
                Ok(subscription) => {
                    info!(broker = %outcome.target, "Connected and subscribed to {}", config.topic);
                    registry.push(subscription);
                }
                Err(e) => {
                    error!(broker = %outcome.target, "Connection failed: {}", e);
                    failed += 1;
                }
            }
        }

        if registry.is_empty() {
            return Err(TransferError::NoConnections { failed, total });
        }

        supervisor.watch_all(
            registry
                .iter()
                .map(|s| (s.target().to_string(), s.state())),
        );

        info!("Connected to {} of {} broker(s)", registry.len(), total);
        Ok(Self {
            registry,
            total,
            supervisor,
            cancel_token,
        })
    }

    /// Number of established subscriptions still in the registry.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn targets(&self) -> Vec<String> {
        self.registry.iter().map(|s| s.target().to_string()).collect()
    }

    pub fn live_connections(&self) -> usize {
        self.supervisor.live_connections()
    }

    /// Token cancelled once every established connection is lost.
    pub fn all_lost(&self) -> CancellationToken {
        self.supervisor.all_lost()
    }

    /// Disconnects every registered subscription in parallel.
    ///
    /// Each subscription is removed from the registry before it is
    /// disconnected, so it is disconnected at most once. Returns the number
    /// of subscriptions disconnected by this call.
    pub async fn disconnect_all(&mut self, grace: Duration) -> usize {
        self.cancel_token.cancel();

        let mut tasks = JoinSet::new();
        for mut subscription in self.registry.drain(..) {
            tasks.spawn(async move {
                subscription.disconnect(grace).await;
                subscription.target().to_string()
            });
        }

        let mut count = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(target) => {
                    debug!(broker = %target, "Subscription closed");
                    count += 1;
                }
                Err(e) => warn!("Disconnect task failed: {}", e),
            }
        }

        if count > 0 {
            info!("Disconnected from {} broker(s)", count);
        }
        count
    }
}

/// Client identifiers for each target.
///
/// Targets sharing a `host:port` endpoint would evict each other on the broker,
/// so every repeat gets `-<index>` appended.
fn assign_client_ids(targets: &[BrokerTarget], client_id: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .enumerate()
        .map(|(index, target)| {
            if seen.insert(target.endpoint()) {
                client_id.to_string()
            } else {
                let unique = format!("{client_id}-{index}");
                warn!(
                    broker = %target,
                    "Endpoint {} configured more than once, using client id {}",
                    target.endpoint(),
                    unique
                );
                unique
            }
        })
        .collect()
}
