use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::InboundMessage;

const MAX_KEPT_ERRORS: usize = 16;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

impl MQTTStatus {
    fn record_error(&mut self, message: String) {
        if self.error_messages.len() == MAX_KEPT_ERRORS {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect to {broker} after {attempts} attempts: {reason}")]
    Connect {
        broker: String,
        attempts: u32,
        reason: String,
    },

    #[error("Connect to {0} was cancelled")]
    Cancelled(String),

    #[error("Failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Failed to disconnect: {0}")]
    Disconnect(String),
}

/// Outbound side of the broker as seen by the loops.
pub trait TelemetrySink: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: String,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

// Cheap cloneable publisher shared by both loops
#[derive(Clone, Debug)]
pub struct SessionPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl TelemetrySink for SessionPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SessionError> {
        // try_publish so an outage with a full request queue never stalls a loop
        self.client
            .try_publish(topic, self.qos, false, payload.into_bytes())
            .map_err(|e| SessionError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// One live broker connection plus the task that drives its event loop.
pub struct BrokerSession {
    client: AsyncClient,
    qos: QoS,
    client_id: String,
    subscriptions: Arc<RwLock<Vec<String>>>,
    status: watch::Receiver<MQTTStatus>,
    cancel: CancellationToken,
    dispatch: JoinHandle<()>,
}

impl BrokerSession {
    /// Connects and starts the dispatch task.
    ///
    /// Inbound PUBLISH packets are delivered in arrival order on the returned
    /// receiver. Failed connection attempts are retried with backoff up to
    /// `connect_attempts` times.
    pub async fn connect(
        config: &MqttConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), SessionError> {
        let client_id = config.client_id();
        let broker = config.broker_address();
        info!("Connecting to MQTT broker {} as {}", broker, client_id);

        let mut mqtt_options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        mqtt_options.set_keep_alive(config.keep_alive());

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, config.channel_capacity);

        let mut status = MQTTStatus {
            connection_state: ConnectionState::Connecting,
            ..MQTTStatus::default()
        };
        let mut backoff = Backoff::new(
            Duration::from_millis(config.backoff_initial_ms),
            Duration::from_millis(config.backoff_max_ms),
        );

        let attempts = config.connect_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled(broker)),
                result = wait_for_connack(&mut eventloop) => result,
            };

            match result {
                Ok(()) => break,
                Err(e) if attempt < attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Connect attempt {}/{} to {} failed: {}, retrying in {:?}",
                        attempt, attempts, broker, e, delay
                    );
                    status.record_error(e.to_string());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(SessionError::Cancelled(broker)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!("Giving up on {} after {} attempts: {}", broker, attempts, e);
                    return Err(SessionError::Connect {
                        broker,
                        attempts,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("Connected to MQTT broker {}", broker);
        backoff.reset();
        status.connection_state = ConnectionState::Connected;
        status.last_activity = Some(Local::now());

        let (status_tx, status_rx) = watch::channel(status);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let subscriptions = Arc::new(RwLock::new(Vec::new()));
        // Independent of the caller's token so that shutdown can still flush DISCONNECT
        let session_cancel = CancellationToken::new();

        let dispatcher = Dispatcher {
            client: client.clone(),
            qos: config.qos(),
            subscriptions: subscriptions.clone(),
            inbound: inbound_tx,
            status: status_tx,
            backoff,
            pending_resubscribe: Vec::new(),
        };
        let dispatch = tokio::spawn(dispatcher.run(eventloop, session_cancel.clone()));
        debug!("MQTT dispatch task spawned");

        Ok((
            Self {
                client,
                qos: config.qos(),
                client_id,
                subscriptions,
                status: status_rx,
                cancel: session_cancel,
                dispatch,
            },
            inbound_rx,
        ))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn publisher(&self) -> SessionPublisher {
        SessionPublisher {
            client: self.client.clone(),
            qos: self.qos,
        }
    }

    pub fn status(&self) -> watch::Receiver<MQTTStatus> {
        self.status.clone()
    }

    /// Subscribes now and again after every reconnect.
    pub async fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        info!("Subscribing to {} with {:?}", topic, self.qos);
        self.client
            .subscribe(topic, self.qos)
            .await
            .map_err(|e| SessionError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let mut subscriptions = self.subscriptions.write().await;
        if !subscriptions.iter().any(|t| t == topic) {
            subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    /// Sends DISCONNECT and stops the dispatch task.
    pub async fn disconnect(self) -> Result<MQTTStatus, SessionError> {
        info!("Disconnecting MQTT session {}", self.client_id);
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| SessionError::Disconnect(e.to_string()));

        // The dispatch loop exits on its own once DISCONNECT has been flushed
        let mut dispatch = self.dispatch;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut dispatch).await.is_err() {
            debug!("Dispatch task still running after grace period, cancelling");
            self.cancel.cancel();
            if tokio::time::timeout(DISCONNECT_GRACE, &mut dispatch).await.is_err() {
                warn!("MQTT dispatch task did not stop in time, aborting it");
                dispatch.abort();
            }
        }

        let status = self.status.borrow().clone();
        info!(
            "MQTT session closed: {} received, {} sent",
            status.messages_received, status.messages_sent
        );
        result.map(|_| status)
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                debug!("Received CONNACK: {:?}", ack);
                return Ok(());
            }
            event => debug!("Event before CONNACK: {:?}", event),
        }
    }
}

// Owns the event loop for the lifetime of the session
struct Dispatcher {
    client: AsyncClient,
    qos: QoS,
    subscriptions: Arc<RwLock<Vec<String>>>,
    inbound: mpsc::Sender<InboundMessage>,
    status: watch::Sender<MQTTStatus>,
    backoff: Backoff,
    // Restored topics still waiting for room in the request queue
    pending_resubscribe: Vec<String>,
}

impl Dispatcher {
    async fn run(mut self, mut eventloop: EventLoop, cancel: CancellationToken) {
        info!("MQTT dispatch loop started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage::from_bytes(publish.topic.clone(), &publish.payload);
                    debug!("Received {}", message);
                    self.status.send_modify(|s| {
                        s.messages_received += 1;
                        s.last_activity = Some(message.received_at);
                    });
                    // Awaiting here keeps messages in arrival order
                    if self.inbound.send(message).await.is_err() {
                        debug!("No consumer for inbound messages, dropping");
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT reconnected, restoring subscriptions");
                    self.backoff.reset();
                    self.status.send_modify(|s| {
                        s.connection_state = ConnectionState::Connected;
                        s.last_activity = Some(Local::now());
                    });
                    self.pending_resubscribe = self.subscriptions.read().await.clone();
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker sent DISCONNECT");
                    self.status
                        .send_modify(|s| s.connection_state = ConnectionState::Reconnecting);
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::Publish(_))) => {
                    self.status.send_modify(|s| {
                        s.messages_sent += 1;
                        s.last_activity = Some(Local::now());
                    });
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    info!("DISCONNECT sent, stopping dispatch loop");
                    break;
                }
                Ok(event) => debug!("MQTT event: {:?}", event),
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!("MQTT connection error: {}, reconnecting in {:?}", e, delay);
                    self.status.send_modify(|s| {
                        s.connection_state = ConnectionState::Reconnecting;
                        s.record_error(e.to_string());
                    });
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            if !self.pending_resubscribe.is_empty() {
                self.resubscribe();
            }
        }

        self.status
            .send_modify(|s| s.connection_state = ConnectionState::Disconnected);
        info!("MQTT dispatch loop stopped");
    }

    // Only this task drains the request queue, so it must never wait for room in it
    fn resubscribe(&mut self) {
        let client = &self.client;
        let qos = self.qos;
        self.pending_resubscribe
            .retain(|topic| match client.try_subscribe(topic.clone(), qos) {
                Ok(()) => {
                    debug!("Re-subscribed to {}", topic);
                    false
                }
                Err(e) => {
                    debug!("Deferring re-subscribe to {}: {}", topic, e);
                    true
                }
            });
    }
}
