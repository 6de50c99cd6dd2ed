//! Configuration for the broker connection set.
//!
//! `SubscriberConfig` carries everything the connection set needs: the broker
//! targets, the topic, the client identity and transport security. It is built
//! once at startup and never mutated afterwards.
//!
//! All constraints are checked with the `validator` crate so an invalid value is
//! rejected before any connection attempt.
//!
//! ```ignore
//! let config = SubscriberConfig {
//!     brokers: vec!["tcp://bus-a:1883".into(), "ssl://bus-b:8883".into()],
//!     client_id: "watch-01".into(),
//!     tls: TlsConfig::with_ca_only("/etc/mtr/ca.pem"),
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use std::{path::PathBuf, time::Duration};

use validator::Validate;

/// Topic mtr probes publish to unless configured otherwise.
pub const DEFAULT_TOPIC: &str = "/metrics/mtr";

#[derive(Debug, Clone, Validate)]
pub struct SubscriberConfig {
    /// Broker target strings, already split and trimmed.
    #[validate(length(min = 1, message = "At least one broker target is required"))]
    pub brokers: Vec<String>,

    /// Topic every connection subscribes to.
    #[validate(length(
        min = 1,
        max = 65535,
        message = "Topic must be between 1 and 65535 bytes"
    ))]
    pub topic: String,

    /// Client identifier presented to every broker.
    #[validate(length(min = 1, message = "Client ID must not be empty"))]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Time allowed for CONNACK + SUBACK on each connection, in seconds.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Capacity of the request channel between client and event loop.
    #[validate(range(
        min = 1,
        max = 255,
        message = "Request channel capacity must be between 1 and 255"
    ))]
    pub request_channel_capacity: u8,

    /// Transport security applied to every connection.
    pub tls: TlsConfig,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        SubscriberConfig {
            brokers: Vec::new(),
            topic: DEFAULT_TOPIC.to_string(),
            client_id: String::new(),
            keep_alive: 60,
            connection_timeout: 30,
            request_channel_capacity: 10,
            tls: TlsConfig::default(),
        }
    }
}

impl SubscriberConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

/// TLS settings shared by all connections.
///
/// TLS is switched on for a connection when its target uses a TLS scheme or
/// when any field here is set. The CA file is read when each client is
/// built; a missing file fails that connection.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA certificate (PEM) used to verify brokers.
    pub ca_cert_path: Option<PathBuf>,

    /// Skip server certificate chain and host name verification.
    pub insecure: bool,
}

impl TlsConfig {
    pub fn with_ca_only(ca_cert_path: impl Into<PathBuf>) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            insecure: false,
        }
    }

    /// True when TLS must be used regardless of the target scheme.
    pub fn is_forced(&self) -> bool {
        self.ca_cert_path.is_some() || self.insecure
    }
}
