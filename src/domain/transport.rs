// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the broker-facing interface used by the broker-backed
//! raw operations (`BrokerCall`, `BrokerObservable`) to exchange messages. It
//! intentionally avoids any reference to concrete protocols, brokers, or
//! client libraries.
//!
//! The transport layer is responsible only for delivering opaque envelopes
//! to subscribed consumers. Higher-level semantics such as reply correlation,
//! timeouts, cancellation and typed conversion are handled by the dispatch
//! layer.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use crate::{Qos, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Configuration for creating a transport instance.
///
/// Produced by [`TransportBuilder`](crate::TransportBuilder) and passed to the
/// transport factory functions (`create_*_transport()`).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Broker URI (e.g. `"mqtt://localhost:1883"`, `"memory://"`).
    pub uri: String,
    /// Node ID for this transport instance; used as the MQTT client id and
    /// in log lines.
    pub node_id: String,
    /// Optional transport type override (`"memory"`, `"rumqttc"`).
    /// If `None`, the URI scheme selects the transport.
    pub transport_type: Option<String>,
    /// Broker keep-alive interval in seconds.
    pub keep_alive_secs: Option<u16>,
}

/// A transport address.
///
/// An `Address` is a destination to which messages may be published. Its
/// interpretation is transport-specific (an MQTT topic for the broker
/// transports), but it is treated as an opaque identifier at the domain
/// level.
///
/// Addresses are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    /// Borrow the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription filter.
///
/// A subscription either names a topic (matched against an envelope's
/// [`Address`]) or a keyword (matched against an envelope's `keyword`). How a
/// topic subscription matches an address is defined by the transport; the
/// in-memory transport uses exact string equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subscription {
    /// Receive envelopes published to this topic.
    Topic(Arc<str>),
    /// Receive envelopes tagged with this keyword, whatever their topic.
    Keyword(Arc<str>),
}

impl Subscription {
    /// Subscribe to a topic.
    pub fn topic(topic: impl Into<Arc<str>>) -> Self {
        Subscription::Topic(topic.into())
    }

    /// Subscribe to a keyword.
    pub fn keyword(keyword: impl Into<Arc<str>>) -> Self {
        Subscription::Keyword(keyword.into())
    }

    /// Returns true if `env` is deliverable to this subscription.
    pub fn matches(&self, env: &Envelope) -> bool {
        // ---
        match self {
            Subscription::Topic(topic) => env.address.0 == *topic,
            Subscription::Keyword(keyword) => env.keyword.as_ref() == Some(keyword),
        }
    }
}

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        // ---
        Subscription::Topic(address.0)
    }
}

/// An opaque message envelope.
///
/// An `Envelope` is the unit of transport between producers and consumers.
/// It carries a payload along with optional metadata used by the dispatch
/// layer for reply routing and correlation.
///
/// The transport layer does not interpret the payload or metadata fields;
/// it is responsible only for delivery.
///
/// # Example
///
/// ```
/// # use mom_dispatch::{Envelope, Address};
/// # use bytes::Bytes;
/// let envelope = Envelope::new(Address::from("user/123"), Bytes::from_static(b"{}"))
///     .with_keyword("user")
///     .with_reply_to(Address::from("user/123/reply"));
/// assert_eq!(envelope.keyword.as_deref(), Some("user"));
/// ```
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    // ---
    /// Delivery address (topic) used by the transport.
    pub address: Address,

    /// Optional routing keyword, matched by keyword subscriptions.
    pub keyword: Option<Arc<str>>,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Correlation identifier used to associate requests with replies.
    pub correlation_id: Option<Arc<str>>,

    /// Optional reply address. Responders publish replies here.
    pub reply_to: Option<Address>,

    /// Optional content type metadata (e.g., "application/json").
    pub content_type: Option<Arc<str>>,

    /// Whether the broker should retain this message (MQTT retain flag).
    #[serde(default)]
    pub retained: bool,

    /// Delivery guarantee requested from the broker.
    #[serde(default)]
    pub qos: Qos,
}

impl Envelope {
    // ---
    /// Create an envelope carrying `payload` to `address`, with no metadata.
    pub fn new(address: Address, payload: Bytes) -> Self {
        // ---
        Self {
            address,
            keyword: None,
            payload,
            correlation_id: None,
            reply_to: None,
            content_type: None,
            retained: false,
            qos: Qos::default(),
        }
    }

    /// Tag the envelope with a routing keyword.
    pub fn with_keyword(mut self, keyword: impl Into<Arc<str>>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    /// Set the correlation identifier.
    pub fn with_correlation_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the reply address.
    pub fn with_reply_to(mut self, reply_to: Address) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Set the delivery guarantee.
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<Arc<str>>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Create the reply to this envelope: addressed to its `reply_to` (or its
    /// own address when absent) and carrying the same correlation id.
    pub fn reply(&self, payload: Bytes) -> Self {
        // ---
        let address = self
            .reply_to
            .clone()
            .unwrap_or_else(|| self.address.clone());

        Self {
            address,
            keyword: None,
            payload,
            correlation_id: self.correlation_id.clone(),
            reply_to: None,
            content_type: self.content_type.clone(),
            retained: false,
            qos: self.qos,
        }
    }
}

/// Identifies one subscription handle within the transport that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle returned from a successful subscription.
///
/// The subscription remains active until either:
/// - The handle is dropped (receiver channel closes)
/// - The handle is released with [`Transport::unsubscribe`] or the transport
///   is closed
pub struct SubscriptionHandle {
    // ---
    /// Identity of this handle, used to release it.
    pub id: SubscriptionId,

    /// The filter this handle was registered with.
    pub subscription: Subscription,

    /// Receiver channel for delivered envelopes matching this subscription.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Transport abstraction.
///
/// A `Transport` provides best-effort delivery of message envelopes between
/// producers and subscribers. It defines the minimal contract required by
/// the broker-backed raw operations without committing to any specific
/// protocol or broker.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, messages published *after* that
///   point and matching the subscription are deliverable.
/// - `publish()` is non-blocking with respect to subscribers.
/// - Envelopes delivered to one inbox keep their publish order.
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns the transport_id of the transport (used in log lines).
    fn transport_id(&self) -> &str;

    /// Publish an envelope to its address.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Register a subscription and return a handle for receiving messages.
    ///
    /// `qos` is the delivery guarantee asked of the broker; transports
    /// without broker-side QoS ignore it.
    async fn subscribe(&self, sub: Subscription, qos: Qos) -> Result<SubscriptionHandle>;

    /// Release the inbox of handle `id` registered for `sub`. Other handles
    /// on the same filter, of this or any other transport, keep receiving.
    /// The broker subscription is released with the last local inbox.
    async fn unsubscribe(&self, sub: Subscription, id: SubscriptionId) -> Result<()>;

    /// Close the transport and release the inboxes it registered.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn Transport>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple clones share the same underlying connection
pub type TransportPtr = Arc<dyn Transport>;
