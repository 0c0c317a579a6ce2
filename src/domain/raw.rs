// src/domain/raw.rs

//! Collaborator contracts consumed by the dispatch handles.
//!
//! A handle never talks to a broker directly. It asks a
//! [`DescriptorFactory`] for a descriptor, hands that to a transport factory
//! ([`CallFactory`] or [`ObservableFactory`]) and drives the returned raw
//! operation. Raw operations report back through the raw callback traits on
//! whatever thread performs their I/O.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    // ---
    Address,
    Args,
    Error,
    Relation,
    RequestDescriptor,
    Result,
    SubscriptionDescriptor,
};

/// Body of a raw response: the topic it arrived on and its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseBody {
    /// Topic the message arrived on.
    pub topic: Address,
    /// Undecoded payload bytes.
    pub payload: Bytes,
}

/// A response as produced by the raw transport, before conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    /// Keyword the message was routed by, if any.
    pub keyword: Option<Arc<str>>,
    /// Message body.
    pub body: ResponseBody,
}

impl RawResponse {
    /// Create a raw response for `payload` received on `topic`.
    pub fn new(topic: impl Into<Address>, payload: impl Into<Bytes>) -> Self {
        // ---
        Self {
            keyword: None,
            body: ResponseBody {
                topic: topic.into(),
                payload: payload.into(),
            },
        }
    }
}

/// Acknowledgement of a subscribe or unsubscribe request.
///
/// An empty acknowledgement (no relations) is the canonical value delivered
/// when the transport produced no acknowledgement payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeAck {
    /// Relations the broker acknowledged.
    pub relations: Vec<Relation>,
}

impl SubscribeAck {
    /// Acknowledgement covering the given relations.
    pub fn new(relations: Vec<Relation>) -> Self {
        Self { relations }
    }

    /// The empty acknowledgement.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if no relation is listed.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Builds descriptors from call-site arguments.
pub trait DescriptorFactory: Send + Sync {
    /// Build the descriptor of a request.
    fn build_request(&self, args: &Args) -> Result<RequestDescriptor>;

    /// Build the descriptor of a subscription.
    fn build_subscription(&self, args: &Args) -> Result<SubscriptionDescriptor>;
}

/// Cancellation surface shared by every raw operation.
pub trait RawOperation: Send + Sync {
    /// Cancel the operation if possible. Must not block on network I/O.
    fn cancel(&self);

    /// Returns true once the operation was canceled.
    fn is_canceled(&self) -> bool;
}

/// Receives the outcome of a raw request/response exchange.
pub trait RawCallback: Send + Sync {
    /// The reply arrived.
    fn on_response(&self, response: RawResponse);

    /// The exchange failed.
    fn on_failure(&self, error: Error);
}

/// Receives subscribe or unsubscribe acknowledgements.
pub trait RawAckCallback: Send + Sync {
    /// The broker acknowledged. `None` when no acknowledgement payload exists.
    fn on_ack(&self, ack: Option<SubscribeAck>);

    /// The subscription failed.
    fn on_failure(&self, error: Error);
}

/// Receives both channels of a live subscription.
pub trait RawObservableCallback: RawAckCallback {
    /// A message arrived on one of the subscribed relations.
    fn on_response(&self, response: RawResponse);
}

/// A live request/response operation against the broker.
pub trait RawCall: RawOperation {
    /// The request this operation was created for.
    fn request(&self) -> RequestDescriptor;

    /// Publish the request without waiting for a reply.
    fn publish(&self);

    /// Publish the request and report the reply to `callback`.
    fn enqueue(&self, callback: Arc<dyn RawCallback>);
}

/// A live subscription operation against the broker.
pub trait RawObservable: RawOperation {
    /// The subscription this operation was created for.
    fn subscription(&self) -> SubscriptionDescriptor;

    /// Subscribe; events go to `callback` when present and are dropped
    /// otherwise.
    fn enqueue(&self, callback: Option<Arc<dyn RawObservableCallback>>);

    /// Unsubscribe; the acknowledgement goes to `callback` when present.
    fn unsubscribe(&self, callback: Option<Arc<dyn RawAckCallback>>);
}

/// Creates raw request operations from descriptors.
pub trait CallFactory: Send + Sync {
    /// Create the raw operation for `request`.
    fn new_call(&self, request: RequestDescriptor) -> Result<Arc<dyn RawCall>>;
}

/// Creates raw subscription operations from descriptors.
pub trait ObservableFactory: Send + Sync {
    /// Create the raw operation for `subscription`.
    fn new_observable(&self, subscription: SubscriptionDescriptor) -> Result<Arc<dyn RawObservable>>;
}
