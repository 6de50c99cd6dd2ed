//! Broker target parsing.
//!
//! A target is one entry of the configured broker list, e.g. `tcp://probe-bus:1883`,
//! `ssl://bus.example.net:8883` or a bare `localhost`. Parsing happens per target so
//! a malformed entry only disqualifies itself.

use std::fmt;

use url::{Host, Url};

use super::error::TransferError;

/// Default port for plain MQTT.
pub const DEFAULT_PORT: u16 = 1883;

/// Default port for MQTT over TLS.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Network security requested by the target's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Plain,
    Tls,
}

/// A parsed broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    raw: String,
    scheme: Scheme,
    host: String,
    port: u16,
}

impl BrokerTarget {
    /// Parses a single broker target string.
    ///
    /// Surrounding whitespace is ignored. Recognized schemes are `tcp`, `mqtt`
    /// (plain) and `ssl`, `tls`, `mqtts` (TLS). Without a scheme the target is plain.
    pub fn parse(input: &str) -> Result<Self, TransferError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(TransferError::invalid_target(raw, "empty target"));
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("tcp://{}", raw)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| TransferError::invalid_target(raw, e.to_string()))?;

        let scheme = match url.scheme() {
            "tcp" | "mqtt" => Scheme::Plain,
            "ssl" | "tls" | "mqtts" => Scheme::Tls,
            other => {
                return Err(TransferError::invalid_target(
                    raw,
                    format!("unsupported scheme '{}'", other),
                ))
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(TransferError::invalid_target(raw, "missing host")),
        };

        let port = url.port().unwrap_or(match scheme {
            Scheme::Plain => DEFAULT_PORT,
            Scheme::Tls => DEFAULT_TLS_PORT,
        });

        Ok(Self {
            raw: raw.to_string(),
            scheme,
            host,
            port,
        })
    }

    /// The target as configured (trimmed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, used to detect two targets pointing at the same broker.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for BrokerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits a comma separated broker list, trimming every entry and dropping empty ones.
pub fn split_broker_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
