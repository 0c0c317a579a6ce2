//! Typed, cancelable dispatch of requests and subscriptions over a
//! message-broker transport.
//!
//! A [`Dispatcher`] turns an [`Endpoint`] and call-site [`Args`] into a
//! dispatch handle:
//!
//! - [`Call`] for one request/response exchange, reported to a [`Callback`]
//! - [`Observable`] for one subscription, reported to a [`Consumer`]
//!
//! Handles build their raw transport operation lazily and exactly once,
//! cache recoverable construction faults, can be canceled from any thread
//! and route conversion faults to the caller's failure callback.
//!
//! Transports are created with [`TransportBuilder`]: an in-process
//! [`MemoryHub`] transport is always available, an MQTT transport comes with
//! the `transport_rumqttc` feature.

// Import all sub modules once...
mod broker;
mod converter;
mod correlation;
mod dispatch;
mod dispatcher;
mod dispatcher_builder;
mod domain;
mod error;
mod macros;
mod response;
mod template;
mod transport;
mod transport_builder;

#[allow(unused_imports)]
pub(crate) use macros::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_trace,
    log_warn,
};

// --- public re-exports

pub use broker::{
    //
    BrokerCall,
    BrokerFactory,
    BrokerObservable,
};
pub use converter::{
    //
    BodyConverter,
    BytesConverter,
    Converter,
    JsonConverter,
    StringConverter,
    UnitConverter,
};
pub use correlation::CorrelationId;
pub use dispatch::{
    //
    Call,
    Callback,
    Consumer,
    ConsumerShape,
    Observable,
};
pub use dispatcher::Dispatcher;
pub use dispatcher_builder::DispatcherBuilder;
pub use error::{ConversionError, Error, Result};
pub use response::Response;
pub use template::{
    //
    Args,
    Endpoint,
    EndpointFactory,
};
pub use transport_builder::TransportBuilder;

pub use domain::{
    //
    Address,
    CallFactory,
    DescriptorFactory,
    Envelope,
    ObservableFactory,
    Qos,
    RawAckCallback,
    RawCall,
    RawCallback,
    RawObservable,
    RawObservableCallback,
    RawOperation,
    RawResponse,
    Relation,
    RequestDescriptor,
    ResponseBody,
    SubscribeAck,
    Subscription,
    SubscriptionDescriptor,
    SubscriptionHandle,
    SubscriptionId,
    Transport,
    TransportConfig,
    TransportPtr,
};

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
};

#[cfg(feature = "transport_rumqttc")]
pub use transport::create_rumqttc_transport;
