//! Per-connection event loop driver.
//!
//! `ConnectionKernel` owns the rumqttc `EventLoop` of one broker connection.
//! It subscribes on every CONNACK, reports establishment once the first
//! SUBACK arrives, hands every PUBLISH payload to the shared handler and
//! publishes its `ConnectionState` on a watch channel.
//!
//! ```text
//! MqttSubscriber
//!     ↓ spawns
//! ConnectionKernel (one tokio task per broker)
//!     ↓ polls
//! rumqttc EventLoop (MQTT protocol)
//!     ↓
//! Network (TCP/TLS)
//! ```
//!
//! Errors before establishment end the kernel and are reported through the
//! `ready` channel; the failed target is not retried. After establishment,
//! transient errors are left to rumqttc, which reconnects on the next poll.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{error::TransferError, handler::SharedHandler, state::ConnectionState};

/// Pause before re-polling an established connection after a transient error.
pub const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Establishment outcome sent once per kernel.
pub type ReadySender = oneshot::Sender<Result<(), TransferError>>;

enum Flow {
    Continue,
    Stop,
}

pub struct ConnectionKernel {
    /// Broker target as configured, used for logging and handler calls
    target: String,

    /// Topic subscribed on every CONNACK
    topic: String,

    /// Client used to issue SUBSCRIBE requests
    client: AsyncClient,

    /// The event loop that receives MQTT events
    event_loop: EventLoop,

    /// Receives every payload
    handler: SharedHandler,

    /// Stops the kernel without waiting for the broker
    cancel: CancellationToken,

    state_tx: watch::Sender<ConnectionState>,

    /// Resolved on the first SUBACK, or with the error that ended the kernel
    ready: Option<ReadySender>,

    established: bool,
}

impl ConnectionKernel {
    pub fn new(
        target: impl Into<String>,
        topic: impl Into<String>,
        client: AsyncClient,
        event_loop: EventLoop,
        handler: SharedHandler,
        cancel: CancellationToken,
        ready: ReadySender,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            target: target.into(),
            topic: topic.into(),
            client,
            event_loop,
            handler,
            cancel,
            state_tx,
            ready: Some(ready),
            established: false,
        }
    }

    /// Subscribes to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            debug!(broker = %self.target, "Connection state changed to: {}", state);
        }
    }

    /// Runs the kernel until shutdown or a terminating error.
    ///
    /// If the kernel ends before establishment the error is delivered through
    /// the `ready` channel and `Ok(())` is returned; afterwards the error is
    /// returned to the caller.
    pub async fn run(mut self) -> Result<(), TransferError> {
        self.update_state(ConnectionState::Connecting);
        debug!(broker = %self.target, "Starting connection event loop");

        let outcome = self.drive().await;

        let reason = match &outcome {
            Ok(()) => "shutdown".to_string(),
            Err(e) => e.to_string(),
        };
        self.update_state(ConnectionState::Disconnected(reason));

        match (self.ready.take(), outcome) {
            (Some(ready), Err(e)) => {
                let _ = ready.send(Err(e));
                Ok(())
            }
            (Some(ready), Ok(())) => {
                let _ = ready.send(Err(TransferError::ConnectionKernel(
                    "stopped before the subscription was established".into(),
                )));
                Ok(())
            }
            (None, outcome) => outcome,
        }
    }

    async fn drive(&mut self) -> Result<(), TransferError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(broker = %self.target, "Connection kernel cancelled");
                    return Ok(());
                }

                event = self.event_loop.poll() => match event {
                    Ok(event) => {
                        if let Flow::Stop = self.handle_event(event)? {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        if !self.established {
                            return Err(e.into());
                        }
                        if is_fatal_error(&e) {
                            error!(broker = %self.target, "Fatal connection error: {}", get_error_message(&e));
                            return Err(e.into());
                        }

                        warn!(
                            broker = %self.target,
                            "Connection interrupted, retrying in {:.1} seconds: {}",
                            RECONNECT_PAUSE.as_secs_f64(),
                            get_error_message(&e)
                        );
                        self.update_state(ConnectionState::Reconnecting(RECONNECT_PAUSE.as_secs_f64()));
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(RECONNECT_PAUSE) => {}
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Result<Flow, TransferError> {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(conn_ack) => {
                    if conn_ack.code == ConnectReturnCode::Success {
                        debug!(broker = %self.target, "CONNACK received, subscribing to {}", self.topic);
                        // The event loop is this task; a blocking send could never drain.
                        self.client.try_subscribe(self.topic.as_str(), QoS::AtLeastOnce)?;
                    }
                }
                Packet::SubAck(sub_ack) => {
                    if sub_ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(TransferError::SubscriptionRejected(self.topic.clone()));
                    }
                    if !self.established {
                        self.established = true;
                        info!(broker = %self.target, "Subscribed to {}", self.topic);
                        if let Some(ready) = self.ready.take() {
                            let _ = ready.send(Ok(()));
                        }
                    } else {
                        info!(broker = %self.target, "Subscription to {} restored", self.topic);
                    }
                    self.update_state(ConnectionState::Connected);
                }
                Packet::Publish(publish) => {
                    trace!(broker = %self.target, "Received publish on topic {}", publish.topic);
                    self.handler
                        .on_message(&self.target, &publish.topic, &publish.payload);
                }
                Packet::Disconnect => {
                    warn!(broker = %self.target, "Disconnected by broker");
                }
                _ => {}
            },
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!(broker = %self.target, "DISCONNECT sent");
                return Ok(Flow::Stop);
            }
            Event::Outgoing(outgoing) => {
                trace!("Outgoing packet: {:?}", outgoing);
            }
        }
        Ok(Flow::Continue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    // Error is unrecoverable, polling again makes no sense
    Fatal,
    // Error is temporary, the transport reconnects on the next poll
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Invalid certificates or incompatible crypto setup
        ConnectionError::Tls(_) => Fatal,

        // Internal MQTT state corruption or protocol violation
        ConnectionError::MqttState(_) => Fatal,

        // Broker responded with something other than CONNACK
        ConnectionError::NotConnAck(_) => Fatal,

        // Request channel closed, the client is gone
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

/// Innermost message of an error chain, without surrounding quotes.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use rumqttc::{ConnAck, MqttOptions, Publish, SubAck};

    use super::*;

    type Seen = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    fn kernel() -> (ConnectionKernel, oneshot::Receiver<Result<(), TransferError>>, Seen) {
        let (client, event_loop) =
            AsyncClient::new(MqttOptions::new("test_kernel", "localhost", 1883), 10);
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: SharedHandler = Arc::new(move |broker: &str, _: &str, payload: &[u8]| {
            sink.lock().unwrap().push((broker.to_string(), payload.to_vec()));
        });
        let (ready_tx, ready_rx) = oneshot::channel();
        let kernel = ConnectionKernel::new(
            "tcp://localhost:1883",
            "/metrics/mtr",
            client,
            event_loop,
            handler,
            CancellationToken::new(),
            ready_tx,
        );
        (kernel, ready_rx, seen)
    }

    #[tokio::test]
    async fn test_suback_marks_established() {
        let (mut kernel, mut ready_rx, _) = kernel();
        let mut state_rx = kernel.subscribe_state();

        kernel
            .handle_event(Event::Incoming(Packet::ConnAck(ConnAck::new(
                ConnectReturnCode::Success,
                false,
            ))))
            .unwrap();
        assert!(ready_rx.try_recv().is_err());

        kernel
            .handle_event(Event::Incoming(Packet::SubAck(SubAck::new(
                1,
                vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
            ))))
            .unwrap();

        assert!(matches!(ready_rx.try_recv(), Ok(Ok(()))));
        assert!(state_rx.borrow_and_update().is_connected());
    }

    #[tokio::test]
    async fn test_suback_failure_is_rejection() {
        let (mut kernel, _ready_rx, _) = kernel();
        let result = kernel.handle_event(Event::Incoming(Packet::SubAck(SubAck::new(
            1,
            vec![SubscribeReasonCode::Failure],
        ))));
        assert!(matches!(result, Err(TransferError::SubscriptionRejected(_))));
    }

    #[tokio::test]
    async fn test_publish_reaches_handler() {
        let (mut kernel, _ready_rx, seen) = kernel();
        let publish = Publish::new("/metrics/mtr", QoS::AtMostOnce, b"{\"hops\":1}".to_vec());
        kernel
            .handle_event(Event::Incoming(Packet::Publish(publish)))
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "tcp://localhost:1883");
        assert_eq!(seen[0].1, b"{\"hops\":1}".to_vec());
    }

    #[tokio::test]
    async fn test_outgoing_disconnect_stops() {
        let (mut kernel, _ready_rx, _) = kernel();
        let flow = kernel
            .handle_event(Event::Outgoing(Outgoing::Disconnect))
            .unwrap();
        assert!(matches!(flow, Flow::Stop));
    }

    #[tokio::test]
    async fn test_cancel_before_establishment_reports_failure() {
        let (kernel, ready_rx, _) = kernel();
        let mut state_rx = kernel.subscribe_state();
        kernel.cancel.cancel();

        assert!(kernel.run().await.is_ok());
        assert!(matches!(
            ready_rx.await,
            Ok(Err(TransferError::ConnectionKernel(_)))
        ));
        assert!(state_rx.borrow_and_update().is_terminal());
    }

    #[test]
    fn test_is_fatal_error_detection() {
        let refused = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(!is_fatal_error(&refused));

        let denied = ConnectionError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert!(is_fatal_error(&denied));

        assert!(is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized
        )));
        assert!(!is_fatal_error(&ConnectionError::NetworkTimeout));
    }
}
