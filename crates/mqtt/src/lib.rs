//! Multi-broker MQTT subscription.
//!
//! Opens one subscription per broker target on a single topic and delivers
//! every payload to a shared [`MessageHandler`]. Connections are established
//! concurrently and fail independently; a [`ConnectionSet`] tracks the ones
//! that succeeded and tears them down together.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod manager;
pub mod state;
pub mod subscriber;
pub mod supervisor;
pub mod target;
pub mod tls;

pub use config::{SubscriberConfig, TlsConfig, DEFAULT_TOPIC};
pub use error::TransferError;
pub use handler::{MessageHandler, SharedHandler};
pub use manager::{ConnectionSet, MqttConnectionSet};
pub use state::ConnectionState;
pub use subscriber::{MqttSubscriber, MqttSubscription, Subscriber, Subscription};
pub use target::{split_broker_list, BrokerTarget, Scheme};
