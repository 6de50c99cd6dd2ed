//! Error handling for broker connections.
//!
//! `TransferError` is the single error type of this crate. Variants fall into
//! two groups:
//!
//! **Setup errors** (detected before any packet leaves the process):
//! - `InvalidTarget`: a broker target string that cannot be turned into a host/port
//! - `ClientSetup`: TLS material or client options that cannot be assembled
//! - `ConfigError`: validation failures in `SubscriberConfig`
//! - `Io`: CA certificate could not be read
//!
//! **Establishment / runtime errors** (one connection only):
//! - `ClientConnection`: network, TLS or broker refusal reported by the event loop
//! - `ClientTransfer`: the request channel towards the event loop is closed
//! - `SubscriptionRejected`: the broker answered SUBACK with a failure code
//! - `ConnectTimeout`: no CONNACK/SUBACK within the configured timeout
//! - `NoConnections`: every configured target failed to establish

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The broker target string is malformed or uses an unsupported scheme.
    #[error("Invalid broker target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// MQTT client initialization failed (TLS material, options).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Subscriber settings failed validation.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The request channel towards the event loop is gone.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Connection to the broker failed or was lost.
    ///
    /// Boxed because `rumqttc::ConnectionError` is large.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// The broker refused the topic subscription.
    #[error("Subscription to '{0}' rejected by broker")]
    SubscriptionRejected(String),

    /// Establishment did not complete in time.
    #[error("Connection not established within {0:?}")]
    ConnectTimeout(Duration),

    /// The connection worker stopped before reporting an outcome.
    #[error("Connection kernel error: {0}")]
    ConnectionKernel(String),

    /// None of the configured targets could be established.
    #[error("No broker connection could be established ({failed} of {total} failed)")]
    NoConnections { failed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}

impl TransferError {
    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        TransferError::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }
}
