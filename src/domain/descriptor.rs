// src/domain/descriptor.rs

//! Request and subscription descriptors.
//!
//! A descriptor is the immutable, transport-independent description of what
//! to send or what to subscribe to. Descriptors are produced once per handle
//! by a [`DescriptorFactory`](crate::DescriptorFactory) and are never mutated
//! afterwards.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use serde::{Deserialize, Serialize};

use crate::{Address, Envelope, Subscription};

/// MQTT-style delivery guarantee requested for a publish or subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qos {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Exactly-once handshake.
    ExactlyOnce,
}

impl Qos {
    /// Map a numeric QoS level to a `Qos`, clamped to `0..=2`.
    pub fn from_level(level: u8) -> Self {
        // ---
        match level {
            0 => Qos::AtMostOnce,
            1 => Qos::AtLeastOnce,
            _ => Qos::ExactlyOnce,
        }
    }

    /// Numeric QoS level.
    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// One relation a subscription or reply route listens on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    /// A literal topic.
    Topic(Address),
    /// A keyword carried by envelopes, independent of their topic.
    Keyword(Arc<str>),
}

impl Relation {
    /// The transport subscription that listens on this relation.
    pub fn subscription(&self) -> Subscription {
        // ---
        match self {
            Relation::Topic(address) => Subscription::from(address.clone()),
            Relation::Keyword(keyword) => Subscription::Keyword(keyword.clone()),
        }
    }
}

/// Describes one request: where to publish, what to publish and, optionally,
/// where the reply is expected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Topic the request is published to.
    pub topic: Address,
    /// Encoded request payload.
    pub payload: Bytes,
    /// Requested delivery guarantee.
    pub qos: Qos,
    /// Whether the broker should retain the request.
    pub retained: bool,
    /// Keyword tagged on the outgoing envelope, if any.
    pub keyword: Option<Arc<str>>,
    /// Where the reply arrives. `None` means the request is publish-only.
    pub reply: Option<Relation>,
    /// How long to wait for the reply.
    pub timeout: Duration,
}

impl RequestDescriptor {
    /// Create a publish-only request with default settings.
    pub fn new(topic: impl Into<Address>, payload: impl Into<Bytes>) -> Self {
        // ---
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::default(),
            retained: false,
            keyword: None,
            reply: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Expect the reply on `relation`.
    pub fn with_reply(mut self, relation: Relation) -> Self {
        self.reply = Some(relation);
        self
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The envelope carrying this request, without correlation metadata.
    pub fn envelope(&self) -> Envelope {
        // ---
        let mut env = Envelope::new(self.topic.clone(), self.payload.clone());
        env.keyword = self.keyword.clone();
        env.retained = self.retained;
        env.qos = self.qos;
        if let Some(Relation::Topic(reply_to)) = &self.reply {
            env.reply_to = Some(reply_to.clone());
        }
        env
    }
}

/// Describes one subscription: the relations to listen on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionDescriptor {
    /// Relations to subscribe; at least one for a usable descriptor.
    pub relations: Vec<Relation>,
    /// Requested delivery guarantee.
    pub qos: Qos,
}

impl SubscriptionDescriptor {
    /// Create a descriptor over the given relations.
    pub fn new(relations: Vec<Relation>) -> Self {
        Self {
            relations,
            qos: Qos::default(),
        }
    }

    /// Convenience constructor for a single topic.
    pub fn topic(topic: impl Into<Address>) -> Self {
        Self::new(vec![Relation::Topic(topic.into())])
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_qos_levels_clamp() {
        // ---
        assert_eq!(Qos::from_level(1), Qos::AtLeastOnce);
        assert_eq!(Qos::from_level(2).level(), 2);
        assert_eq!(Qos::from_level(0), Qos::AtMostOnce);
        assert_eq!(Qos::from_level(7), Qos::ExactlyOnce);
    }

    #[test]
    fn test_envelope_carries_topic_reply() {
        // ---
        let request = RequestDescriptor::new("user/123", Bytes::from_static(b"{}"))
            .with_reply(Relation::Topic(Address::from("user/123/reply")));

        let request = RequestDescriptor {
            qos: Qos::AtLeastOnce,
            ..request
        };

        let env = request.envelope();
        assert_eq!(env.address, Address::from("user/123"));
        assert_eq!(env.qos, Qos::AtLeastOnce);
        assert_eq!(env.reply_to, Some(Address::from("user/123/reply")));
    }

    #[test]
    fn test_keyword_reply_has_no_reply_to() {
        // ---
        let request =
            RequestDescriptor::new("user/123", Bytes::new()).with_reply(Relation::Keyword("user".into()));

        assert!(request.envelope().reply_to.is_none());
        assert_eq!(
            request.reply.as_ref().map(Relation::subscription),
            Some(Subscription::keyword("user"))
        );
    }
}
