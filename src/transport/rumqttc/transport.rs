//! MQTT transport implementation using `rumqttc`.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns the MQTT `EventLoop`.
//! - The actor publishes outbound envelopes, registers and releases broker
//!   subscriptions, polls the `EventLoop` for incoming publishes and shuts
//!   the connection down.
//! - All interaction with the MQTT client is serialized through this actor;
//!   no other task ever touches the event loop directly.
//!
//! ## Wire format
//!
//! Envelopes travel JSON-encoded as the MQTT payload, published to the
//! envelope address with the envelope's QoS and retain flag. Correlation
//! id, reply route and keyword ride inside the JSON.
//!
//! ## Subscriptions
//!
//! - Topic subscriptions become broker subscriptions. `subscribe()` returns
//!   once the broker confirmed with a SUBACK. SUBACKs carry only packet ids,
//!   so pending confirmations are completed in the order they were sent.
//! - Keyword subscriptions are local filters: they receive every incoming
//!   envelope carrying the keyword, on any topic this connection is
//!   subscribed to. They never reach the broker.
//! - `unsubscribe()` releases one handle. The broker UNSUBSCRIBE is sent
//!   only when the last local inbox for the topic is gone.
//! - After a reconnect every broker topic is subscribed again.
//!
//! Delivery is best-effort and non-durable. A subscriber whose inbox is full
//! or closed is evicted.

use rumqttc::{
    //
    AsyncClient,
    ConnectReturnCode,
    Event,
    EventLoop,
    MqttOptions,
    Packet,
    Publish,
    QoS,
};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Envelope,
    Error,
    Qos,
    Result,
    Subscription,
    SubscriptionHandle,
    SubscriptionId,
    Transport,
    TransportConfig,
    TransportPtr,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const INBOX_CAPACITY: usize = 64;

type InboxMap = Arc<RwLock<HashMap<Subscription, Vec<(SubscriptionId, mpsc::Sender<Envelope>)>>>>;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        topic: String,
        qos: QoS,
        resp: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        topic: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor
    async fn handle(self, actor: &mut MqttActor) -> ActorStep {
        // ---
        match self {
            Cmd::Publish { env, resp } => {
                let result = actor.handle_publish(env).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Subscribe { topic, qos, resp } => {
                actor.handle_subscribe(topic, qos, resp).await;
                ActorStep::Continue
            }
            Cmd::Unsubscribe { topic, resp } => {
                let result = actor.handle_unsubscribe(&topic).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                actor.handle_close().await;
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

/// MQTT-based implementation of the `Transport` trait.
///
/// Represents a single broker connection. Connection to the broker happens
/// lazily when the EventLoop begins polling.
pub struct RumqttcTransport {
    // ---
    transport_id: String,
    cmd_tx: mpsc::Sender<Cmd>,
    inboxes: InboxMap,
    next_id: AtomicU64,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttcTransport {
    // ---

    /// Creates a new rumqttc transport with the given client and event loop.
    ///
    /// Must be called from within a tokio runtime; the actor task is spawned
    /// immediately.
    pub fn create(
        transport_id: impl Into<String>,
        client: AsyncClient,
        event_loop: EventLoop,
    ) -> TransportPtr {
        // ---
        let transport_id = transport_id.into();

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let inboxes: InboxMap = Arc::new(RwLock::new(HashMap::new()));

        let actor = MqttActor {
            transport_id: transport_id.clone(),
            client,
            event_loop,
            cmd_rx,
            inboxes: Arc::clone(&inboxes),
            subscribed: HashMap::new(),
            pending_subacks: VecDeque::new(),
            resubscribe_acks: 0,
            reconnect: false,
        };

        let handle = tokio::task::spawn(actor.run());

        Arc::new(Self {
            transport_id,
            cmd_tx,
            inboxes,
            next_id: AtomicU64::new(1),
            actor: Mutex::new(Some(handle)),
        })
    }

    async fn request(&self, cmd: Cmd, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        // ---
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::Transport(format!("{}: actor stopped", self.transport_id)))?;

        rx.await
            .map_err(|_| Error::Transport(format!("{}: actor dropped request", self.transport_id)))?
    }

    /// Drop inbox `id`; returns true if no inbox is left for `sub`.
    async fn remove_inbox(&self, sub: &Subscription, id: SubscriptionId) -> bool {
        // ---
        let mut map = self.inboxes.write().await;
        let Some(senders) = map.get_mut(sub) else {
            return true;
        };

        senders.retain(|(inbox, _)| *inbox != id);
        if senders.is_empty() {
            map.remove(sub);
            return true;
        }
        false
    }
}

struct MqttActor {
    // ---
    transport_id: String, // for logging only
    client: AsyncClient,
    event_loop: EventLoop,
    cmd_rx: mpsc::Receiver<Cmd>,
    inboxes: InboxMap,
    /// Broker topics and their QoS, replayed after a reconnect.
    subscribed: HashMap<String, QoS>,
    /// Subscribe requests awaiting their SUBACK, in send order.
    pending_subacks: VecDeque<(String, oneshot::Sender<Result<()>>)>,
    /// SUBACKs still owed for the resubscribes sent after a reconnect.
    resubscribe_acks: usize,
    reconnect: bool,
}

impl MqttActor {
    // ---

    async fn run(mut self) {
        // ---
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                event = self.event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.handle_incoming(publish).await;
                        }
                        Ok(Event::Incoming(Packet::SubAck(suback))) => {
                            self.handle_suback(suback);
                        }
                        Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                            self.handle_connack(connack);

                            if self.reconnect {
                                self.resubscribe().await;
                            }
                        }
                        Ok(_event) => {
                            log_debug!("{}: received mqtt event (ignored): {:?}",
                                       self.transport_id, _event);
                        }
                        Err(err) => {
                            if is_disconnect(&err) {
                                self.reconnect = true;
                                self.fail_pending("broker disconnected");
                                log_error!("{}: broker disconnected: {err}", self.transport_id);
                            } else {
                                log_error!("{}: mqtt error: {err}", self.transport_id);
                            }
                            tokio::time::sleep(RECONNECT_DELAY).await;
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Publishes an envelope to the broker as JSON.
    async fn handle_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        let payload = serde_json::to_vec(&env).map_err(|err| {
            log_error!("{}: failed to serialize envelope: {err}", self.transport_id);
            Error::Transport(format!("envelope encoding: {err}"))
        })?;

        let topic = env.address.as_str();

        self.client
            .publish(topic, mqtt_qos(env.qos), env.retained, payload)
            .await
            .map_err(|err| {
                log_error!("{}: publish failed for topic {topic}: {err}", self.transport_id);
                Error::Transport(format!("publish to {topic}: {err}"))
            })
    }

    /// Sends a broker subscription and queues the responder until its SUBACK.
    async fn handle_subscribe(&mut self, topic: String, qos: QoS, resp: oneshot::Sender<Result<()>>) {
        // ---
        match self.client.subscribe(&topic, qos).await {
            Ok(()) => {
                self.subscribed.insert(topic.clone(), qos);
                self.pending_subacks.push_back((topic, resp));
            }
            Err(err) => {
                log_error!(
                    "{}: failed to send subscribe for topic {topic}: {err}",
                    self.transport_id
                );
                let _ = resp.send(Err(Error::Transport(format!("subscribe to {topic}: {err}"))));
            }
        }
    }

    async fn handle_unsubscribe(&mut self, topic: &str) -> Result<()> {
        // ---
        self.subscribed.remove(topic);
        self.client.unsubscribe(topic).await.map_err(|err| {
            log_error!("{}: unsubscribe failed for topic {topic}: {err}", self.transport_id);
            Error::Transport(format!("unsubscribe from {topic}: {err}"))
        })
    }

    /// Completes the oldest pending subscription.
    fn handle_suback(&mut self, suback: rumqttc::SubAck) {
        // ---
        if self.resubscribe_acks > 0 {
            self.resubscribe_acks -= 1;
            log_debug!("{}: SUBACK received for reconnect re-subscribe", self.transport_id);
            return;
        }

        let Some((topic, responder)) = self.pending_subacks.pop_front() else {
            log_debug!("{}: unexpected SUBACK {}", self.transport_id, suback.pkid);
            return;
        };

        let success = suback
            .return_codes
            .iter()
            .all(|code| !matches!(code, rumqttc::SubscribeReasonCode::Failure));

        if success {
            log_info!("{}: subscribed to topic {topic}", self.transport_id);
            let _ = responder.send(Ok(()));
        } else {
            log_error!(
                "{}: subscription failed for topic {topic}: {:?}",
                self.transport_id,
                suback.return_codes
            );
            let _ = responder.send(Err(Error::Transport(format!(
                "broker rejected subscription to {topic}"
            ))));
        }
    }

    fn fail_pending(&mut self, reason: &str) {
        // ---
        self.resubscribe_acks = 0;
        for (topic, responder) in self.pending_subacks.drain(..) {
            let _ = responder.send(Err(Error::Transport(format!("subscribe to {topic}: {reason}"))));
        }
    }

    async fn resubscribe(&mut self) {
        // ---
        let topics: Vec<(String, QoS)> = self
            .subscribed
            .iter()
            .map(|(topic, qos)| (topic.clone(), *qos))
            .collect();

        for (topic, qos) in topics {
            match self.client.subscribe(&topic, qos).await {
                Ok(()) => {
                    self.resubscribe_acks += 1;
                    log_info!("{}: resubscribed to {topic}", self.transport_id);
                }
                Err(err) => {
                    log_error!("{}: resubscribe failed for {topic}: {err}", self.transport_id);
                }
            }
        }
        self.reconnect = false;
    }

    fn handle_connack(&self, connack: rumqttc::ConnAck) {
        // ---
        if connack.code == ConnectReturnCode::Success {
            log_info!("{}: connected to broker", self.transport_id);
        } else {
            log_error!("{}: connection failed: {:?}", self.transport_id, connack.code);
        }
    }

    async fn handle_close(&mut self) {
        // ---
        log_debug!("{}: disconnecting mqtt client", self.transport_id);

        self.fail_pending("transport closed");
        if let Err(_err) = self.client.disconnect().await {
            log_debug!("{}: mqtt disconnect failed: {_err}", self.transport_id);
        }
    }

    /// Decodes an incoming publish and fans it out to every matching inbox.
    async fn handle_incoming(&self, publish: Publish) {
        // ---
        let env = match serde_json::from_slice::<Envelope>(&publish.payload) {
            Ok(env) => env,
            Err(_err) => {
                log_debug!(
                    "{}: invalid envelope on topic {}: {_err}",
                    self.transport_id,
                    publish.topic
                );
                return;
            }
        };

        let mut evicted = false;
        {
            let map = self.inboxes.read().await;
            for (sub, senders) in map.iter().filter(|(sub, _)| sub.matches(&env)) {
                for (_, tx) in senders {
                    if tx.try_send(env.clone()).is_err() {
                        log_debug!("{}: evicting inbox for {sub:?}", self.transport_id);
                        evicted = true;
                    }
                }
            }
        }

        if evicted {
            let mut map = self.inboxes.write().await;
            for senders in map.values_mut() {
                senders.retain(|(_, tx)| !tx.is_closed() && tx.capacity() > 0);
            }
            map.retain(|_, senders| !senders.is_empty());
        }
    }
} // MqttActor

fn mqtt_qos(qos: Qos) -> QoS {
    // ---
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn is_disconnect(err: &rumqttc::ConnectionError) -> bool {
    // ---
    matches!(
        err,
        rumqttc::ConnectionError::Io(_) | rumqttc::ConnectionError::MqttState(_)
    )
}

#[async_trait::async_trait]
impl Transport for RumqttcTransport {
    // ---

    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.request(Cmd::Publish { env, resp: tx }, rx).await
    }

    async fn subscribe(&self, sub: Subscription, qos: Qos) -> Result<SubscriptionHandle> {
        // ---
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        {
            let mut map = self.inboxes.write().await;
            map.entry(sub.clone()).or_default().push((id, tx));
        }

        let handle = SubscriptionHandle {
            id,
            subscription: sub.clone(),
            inbox: rx,
        };

        let Subscription::Topic(topic) = &sub else {
            log_debug!("{}: local keyword subscription {sub:?} ({id})", self.transport_id);
            return Ok(handle);
        };

        let (resp_tx, resp_rx) = oneshot::channel();
        let cmd = Cmd::Subscribe {
            topic: topic.to_string(),
            qos: mqtt_qos(qos),
            resp: resp_tx,
        };

        if let Err(err) = self.request(cmd, resp_rx).await {
            self.remove_inbox(&sub, id).await;
            return Err(err);
        }

        Ok(handle)
    }

    async fn unsubscribe(&self, sub: Subscription, id: SubscriptionId) -> Result<()> {
        // ---
        let last = self.remove_inbox(&sub, id).await;

        match &sub {
            Subscription::Topic(topic) if last => {
                let (tx, rx) = oneshot::channel();
                let cmd = Cmd::Unsubscribe {
                    topic: topic.to_string(),
                    resp: tx,
                };
                self.request(cmd, rx).await
            }
            Subscription::Topic(_) => {
                log_debug!("{}: released {id}, topic still in use", self.transport_id);
                Ok(())
            }
            Subscription::Keyword(_) => Ok(()),
        }
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        let _ = self.cmd_tx.send(Cmd::Close { resp: tx }).await;
        let _ = rx.await;

        if let Some(handle) = self.actor.lock().await.take() {
            let _ = handle.await;
        }

        self.inboxes.write().await.clear();
        Ok(())
    }
}

/// Creates a rumqttc-based MQTT transport from the given configuration.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the broker URI cannot be parsed.
///
/// # Connection Behavior
///
/// The actual connection to the broker happens lazily when the EventLoop
/// starts polling in the background actor task.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    let (client, event_loop) = create_mqtt_client(&config)?;
    Ok(RumqttcTransport::create(config.node_id, client, event_loop))
}

/// Creates an MQTT client and event loop from the given configuration.
///
/// Fallible only due to URI parsing; `AsyncClient::new()` connects lazily.
fn create_mqtt_client(config: &TransportConfig) -> Result<(AsyncClient, EventLoop)> {
    // ---
    let uri = config.uri.as_str();

    let authority = uri
        .strip_prefix("mqtt://")
        .or_else(|| uri.strip_prefix("tcp://"))
        .unwrap_or(uri);

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|err| {
                log_error!("rumqttc: invalid port in broker URI {uri}: {err}");
                Error::InvalidConfig(format!("invalid port in broker URI {uri}: {err}"))
            })?;
            (host, port)
        }
        None => (authority, 1883),
    };

    if host.is_empty() {
        return Err(Error::InvalidConfig(format!("missing host in broker URI {uri}")));
    }

    let mut mqtt_options = MqttOptions::new(config.node_id.clone(), host, port);

    if let Some(keep_alive_secs) = config.keep_alive_secs {
        mqtt_options.set_keep_alive(Duration::from_secs(u64::from(keep_alive_secs)));
    }

    Ok(AsyncClient::new(mqtt_options, 10))
}
