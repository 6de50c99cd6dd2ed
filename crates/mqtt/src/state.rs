//! Connection state of a single broker subscription.
//!
//! Each connection kernel publishes its state on a watch channel. The
//! supervisor observes every channel to log transitions and to count live
//! connections.
//!
//! ```text
//! Connecting ──(CONNACK + SUBACK)──> Connected
//!     │                                  │
//!     │                          (transient error)
//!     │                                  ▼
//!     │                          Reconnecting(secs) ──> Connected
//!     │                                  │
//!     └──(failure / fatal error / shutdown)──> Disconnected(reason)
//! ```
//!
//! `Disconnected` is terminal: the kernel has stopped and will not publish
//! further states.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent, waiting for CONNACK and SUBACK.
    Connecting,

    /// Connected and subscribed; messages are being delivered.
    Connected,

    /// Transport dropped after establishment; the event loop is re-polled
    /// after the given number of seconds.
    Reconnecting(f64),

    /// The kernel stopped. The reason is either a shutdown request or the
    /// error that ended the connection.
    Disconnected(String),
}

impl ConnectionState {
    /// Short identifier, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
            ConnectionState::Disconnected(_) => "Disconnected",
        }
    }

    pub fn details(&self) -> String {
        match self {
            ConnectionState::Connecting | ConnectionState::Connected => String::new(),
            ConnectionState::Reconnecting(seconds) => format!("in {seconds} seconds"),
            ConnectionState::Disconnected(reason) => reason.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True once the kernel has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}
