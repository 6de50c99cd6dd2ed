//! The message handling capability shared by all connections.

use std::sync::Arc;

/// Receives every payload delivered on any broker connection.
///
/// The same handler instance is shared by all connections, so `on_message`
/// may run concurrently from several connection tasks. Within one connection
/// calls are sequential and in delivery order.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, broker: &str, topic: &str, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &str, &[u8]) + Send + Sync + 'static,
{
    fn on_message(&self, broker: &str, topic: &str, payload: &[u8]) {
        self(broker, topic, payload)
    }
}

/// Shared handle passed to every connection.
pub type SharedHandler = Arc<dyn MessageHandler>;
