//! MQTT client builder with TLS support.
//!
//! `ClientBuilder` turns one `BrokerTarget` plus the shared `SubscriberConfig`
//! into a rumqttc `AsyncClient` / `EventLoop` pair. Every broker target gets
//! its own builder, so a bad target or unreadable certificate only affects
//! that connection.
//!
//! # Transport selection
//!
//! - TLS scheme or `tls.insecure` or `tls.ca_cert_path` ⇒ TLS
//! - `tls.insecure` ⇒ rustls with verification disabled
//! - `tls.ca_cert_path` ⇒ rustls trusting only that CA
//! - otherwise ⇒ rustls with the platform roots
//!
//! ```ignore
//! let target = BrokerTarget::parse("ssl://bus.example.net")?;
//! let (client, event_loop) = ClientBuilder::new("watch-01", &target, 10)
//!     .keep_alive(60)
//!     .with_tls_ca_only("/etc/mtr/ca.pem")
//!     .build()?;
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use tracing::debug;

use super::{
    config::{SubscriberConfig, TlsConfig},
    error::TransferError,
    target::{BrokerTarget, Scheme},
    tls,
};

/// Builder for one broker connection.
///
/// The builder is consumed by `build()`, which returns the client (to send
/// subscribe/disconnect requests) and its event loop (to receive packets).
/// The `EventLoop` must be driven by exactly one task.
pub struct ClientBuilder {
    /// MQTT protocol options (host, port, keep-alive, client id)
    opts: MqttOptions,

    /// Whether the target scheme asked for TLS
    scheme: Scheme,

    /// Capacity of the request channel
    cap: usize,

    /// TLS settings shared by all connections
    tls_config: TlsConfig,
}

impl ClientBuilder {
    /// Creates a builder for `target` with default options.
    pub fn new(client_id: impl Into<String>, target: &BrokerTarget, cap: usize) -> Self {
        Self {
            opts: MqttOptions::new(client_id, target.host(), target.port()),
            scheme: target.scheme(),
            cap,
            tls_config: TlsConfig::default(),
        }
    }

    /// Creates a builder from the shared subscriber configuration.
    ///
    /// `client_id` is passed separately because it may be suffixed per target.
    pub fn from_config(
        config: &SubscriberConfig,
        target: &BrokerTarget,
        client_id: &str,
    ) -> Self {
        let builder = Self::new(client_id, target, config.request_channel_capacity as usize)
            .keep_alive(config.keep_alive)
            // Nothing is retained across sessions; every CONNACK re-subscribes.
            .clean_session(true)
            .insecure(config.tls.insecure);
        match &config.tls.ca_cert_path {
            Some(path) => builder.with_tls_ca_only(path),
            None => builder,
        }
    }

    /// Configures TLS with a CA certificate.
    pub fn with_tls_ca_only(mut self, ca_cert_path: impl Into<PathBuf>) -> Self {
        self.tls_config.ca_cert_path = Some(ca_cert_path.into());
        self
    }

    /// Disables server certificate chain and host name verification.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.tls_config.insecure = insecure;
        self
    }

    /// Sets the keep-alive interval (in seconds).
    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    /// Configures whether to use a clean session.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    /// Client identifier that will be sent in CONNECT.
    pub fn client_id(&self) -> String {
        self.opts.client_id()
    }

    fn uses_tls(&self) -> bool {
        self.scheme == Scheme::Tls || self.tls_config.is_forced()
    }

    fn load_file(path: &Path) -> Result<Vec<u8>, TransferError> {
        Ok(fs::read(path)?)
    }

    /// Builds the TLS transport for this connection.
    fn build_tls_transport(&self) -> Result<Transport, TransferError> {
        if self.tls_config.insecure {
            debug!("Server certificate verification disabled");
            return Ok(Transport::Tls(TlsConfiguration::Rustls(
                tls::insecure_client_config(),
            )));
        }

        match &self.tls_config.ca_cert_path {
            Some(path) => {
                let ca = Self::load_file(path).map_err(|e| {
                    TransferError::ClientSetup(format!(
                        "Cannot read CA certificate {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(Transport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                }))
            }
            None => Ok(Transport::tls_with_default_config()),
        }
    }

    /// Constructs the MQTT client and event loop.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let transport = if self.uses_tls() {
            self.build_tls_transport()?
        } else {
            Transport::Tcp
        };

        let mut opts = self.opts;
        opts.set_transport(transport);

        Ok(AsyncClient::new(opts, self.cap))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::TempDir;

    use super::*;

    struct TestFiles {
        _temp_dir: TempDir,
        ca_cert: PathBuf,
    }

    impl TestFiles {
        fn new() -> std::io::Result<Self> {
            let temp_dir = TempDir::new()?;
            let ca_cert = temp_dir.path().join("ca.crt");
            File::create(&ca_cert)?.write_all(b"ca certificate content")?;
            Ok(TestFiles {
                _temp_dir: temp_dir,
                ca_cert,
            })
        }
    }

    fn target(raw: &str) -> BrokerTarget {
        BrokerTarget::parse(raw).unwrap()
    }

    #[test]
    fn test_plain_target_uses_tcp() {
        let builder = ClientBuilder::new("watch", &target("tcp://localhost:1883"), 10);
        assert!(!builder.uses_tls());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_tls_scheme_uses_tls() {
        let builder = ClientBuilder::new("watch", &target("ssl://localhost"), 10);
        assert!(builder.uses_tls());
    }

    #[test]
    fn test_ca_forces_tls_on_plain_scheme() {
        let files = TestFiles::new().unwrap();
        let builder =
            ClientBuilder::new("watch", &target("localhost"), 10).with_tls_ca_only(&files.ca_cert);
        assert!(builder.uses_tls());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_insecure_builds() {
        let builder = ClientBuilder::new("watch", &target("ssl://localhost"), 10).insecure(true);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_missing_ca_fails_build() {
        let result = ClientBuilder::new("watch", &target("ssl://localhost"), 10)
            .with_tls_ca_only("/nonexistent/ca.crt")
            .build();
        assert!(matches!(result, Err(TransferError::ClientSetup(_))));
    }

    #[test]
    fn test_from_config_keeps_client_id() {
        let config = SubscriberConfig {
            brokers: vec!["tcp://localhost".into()],
            client_id: "watch-01".into(),
            ..Default::default()
        };
        let builder = ClientBuilder::from_config(&config, &target("tcp://localhost"), "watch-01-2");
        assert_eq!(builder.client_id(), "watch-01-2");
        assert_eq!(builder.cap, 10);
    }

    #[test]
    fn test_from_config_applies_tls_settings() {
        let files = TestFiles::new().unwrap();
        let config = SubscriberConfig {
            brokers: vec!["tcp://localhost".into()],
            client_id: "watch".into(),
            tls: TlsConfig::with_ca_only(&files.ca_cert),
            ..Default::default()
        };
        let builder = ClientBuilder::from_config(&config, &target("tcp://localhost"), "watch");
        assert!(builder.uses_tls());
        assert_eq!(builder.tls_config.ca_cert_path.as_deref(), Some(files.ca_cert.as_path()));
        assert!(builder.build().is_ok());

        let config = SubscriberConfig {
            tls: TlsConfig {
                ca_cert_path: None,
                insecure: true,
            },
            ..config
        };
        let builder = ClientBuilder::from_config(&config, &target("tcp://localhost"), "watch");
        assert!(builder.uses_tls());
        assert!(builder.tls_config.insecure);
    }
}
