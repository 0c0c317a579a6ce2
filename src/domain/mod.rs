//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! transport implementations and of the dispatch handles: descriptors, the
//! raw-operation contracts the handles drive, and the transport interface the
//! broker-backed raw operations run on.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod descriptor;
mod raw;
mod transport;

// --- Descriptor re-exports ---

pub use descriptor::{
    //
    Qos,
    Relation,
    RequestDescriptor,
    SubscriptionDescriptor,
};

// --- Raw operation re-exports ---

pub use raw::{
    //
    CallFactory,
    DescriptorFactory,
    ObservableFactory,
    RawAckCallback,
    RawCall,
    RawCallback,
    RawObservable,
    RawObservableCallback,
    RawOperation,
    RawResponse,
    ResponseBody,
    SubscribeAck,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    Address,
    Envelope,
    Subscription,
    SubscriptionHandle,
    SubscriptionId,
    Transport,
    TransportConfig,
    TransportPtr,
};
