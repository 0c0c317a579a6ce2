// src/dispatch/observable.rs

//! Subscription dispatch handle and its consumer shapes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::converter::{convert_response, Converter};
use crate::dispatch::guard_callback;
use crate::dispatch::slot::{Action, Preamble, RawSlot};
use crate::{
    // ---
    Args,
    DescriptorFactory,
    Error,
    ObservableFactory,
    RawAckCallback,
    RawObservable,
    RawObservableCallback,
    RawResponse,
    Response,
    Result,
    SubscribeAck,
    SubscriptionDescriptor,
};

type ResponseFn<T> = Arc<dyn Fn(&Observable<T>, Response<T>) + Send + Sync>;
type AckFn<T> = Arc<dyn Fn(&Observable<T>, SubscribeAck) + Send + Sync>;
type FailureFn<T> = Arc<dyn Fn(&Observable<T>, Error) + Send + Sync>;

/// Which channels a [`Consumer`] listens on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumerShape {
    None,
    Data,
    Ack,
    Full,
}

/// The callbacks a caller registers on an [`Observable`].
///
/// The variant fixes which events are delivered: a `Data` consumer never
/// sees acknowledgements, an `Ack` consumer never sees data events, and
/// `None` sees nothing. Every non-`None` shape has a failure slot.
pub enum Consumer<T> {
    /// Fire-and-forget.
    None,
    /// Data events and failures.
    Data {
        on_response: ResponseFn<T>,
        on_failure: FailureFn<T>,
    },
    /// Acknowledgements and failures.
    Ack {
        on_ack: AckFn<T>,
        on_failure: FailureFn<T>,
    },
    /// Everything.
    Full {
        on_response: ResponseFn<T>,
        on_ack: AckFn<T>,
        on_failure: FailureFn<T>,
    },
}

impl<T> Consumer<T> {
    /// A consumer of data events.
    pub fn data<R, F>(on_response: R, on_failure: F) -> Self
    where
        R: Fn(&Observable<T>, Response<T>) + Send + Sync + 'static,
        F: Fn(&Observable<T>, Error) + Send + Sync + 'static,
    {
        Consumer::Data {
            on_response: Arc::new(on_response),
            on_failure: Arc::new(on_failure),
        }
    }

    /// A consumer of acknowledgements.
    pub fn ack<A, F>(on_ack: A, on_failure: F) -> Self
    where
        A: Fn(&Observable<T>, SubscribeAck) + Send + Sync + 'static,
        F: Fn(&Observable<T>, Error) + Send + Sync + 'static,
    {
        Consumer::Ack {
            on_ack: Arc::new(on_ack),
            on_failure: Arc::new(on_failure),
        }
    }

    /// A consumer of both data events and acknowledgements.
    pub fn full<R, A, F>(on_response: R, on_ack: A, on_failure: F) -> Self
    where
        R: Fn(&Observable<T>, Response<T>) + Send + Sync + 'static,
        A: Fn(&Observable<T>, SubscribeAck) + Send + Sync + 'static,
        F: Fn(&Observable<T>, Error) + Send + Sync + 'static,
    {
        Consumer::Full {
            on_response: Arc::new(on_response),
            on_ack: Arc::new(on_ack),
            on_failure: Arc::new(on_failure),
        }
    }

    pub fn shape(&self) -> ConsumerShape {
        // ---
        match self {
            Consumer::None => ConsumerShape::None,
            Consumer::Data { .. } => ConsumerShape::Data,
            Consumer::Ack { .. } => ConsumerShape::Ack,
            Consumer::Full { .. } => ConsumerShape::Full,
        }
    }

    fn response_slot(&self) -> Option<&ResponseFn<T>> {
        match self {
            Consumer::Data { on_response, .. } | Consumer::Full { on_response, .. } => {
                Some(on_response)
            }
            Consumer::None | Consumer::Ack { .. } => None,
        }
    }

    fn ack_slot(&self) -> Option<&AckFn<T>> {
        match self {
            Consumer::Ack { on_ack, .. } | Consumer::Full { on_ack, .. } => Some(on_ack),
            Consumer::None | Consumer::Data { .. } => None,
        }
    }

    fn failure_slot(&self) -> Option<&FailureFn<T>> {
        match self {
            Consumer::None => None,
            Consumer::Data { on_failure, .. }
            | Consumer::Ack { on_failure, .. }
            | Consumer::Full { on_failure, .. } => Some(on_failure),
        }
    }
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        // ---
        match self {
            Consumer::None => Consumer::None,
            Consumer::Data {
                on_response,
                on_failure,
            } => Consumer::Data {
                on_response: on_response.clone(),
                on_failure: on_failure.clone(),
            },
            Consumer::Ack { on_ack, on_failure } => Consumer::Ack {
                on_ack: on_ack.clone(),
                on_failure: on_failure.clone(),
            },
            Consumer::Full {
                on_response,
                on_ack,
                on_failure,
            } => Consumer::Full {
                on_response: on_response.clone(),
                on_ack: on_ack.clone(),
                on_failure: on_failure.clone(),
            },
        }
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Consumer").field(&self.shape()).finish()
    }
}

/// One subscription to a set of relations.
///
/// Like [`Call`](crate::Call), an `Observable` builds its raw operation
/// lazily and exactly once and can be canceled from any thread. It supports
/// two terminal actions, each at most once: [`enqueue`](Self::enqueue)
/// subscribes and [`unsubscribe`](Self::unsubscribe) releases the
/// subscription.
///
/// Data events and acknowledgements are delivered in the order the raw
/// operation produced them. A raw failure is reported once; events after it
/// are dropped. A conversion fault fails only the event that caused it.
pub struct Observable<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    descriptors: Arc<dyn DescriptorFactory>,
    args: Args,
    observable_factory: Arc<dyn ObservableFactory>,
    converter: Arc<dyn Converter<T>>,
    slot: RawSlot<dyn RawObservable>,
}

impl<T: 'static> Observable<T> {
    pub fn new(
        descriptors: Arc<dyn DescriptorFactory>,
        args: Args,
        observable_factory: Arc<dyn ObservableFactory>,
        converter: Arc<dyn Converter<T>>,
    ) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                descriptors,
                args,
                observable_factory,
                converter,
                slot: RawSlot::new(),
            }),
        }
    }

    /// The subscription this handle manages, building the raw operation if
    /// needed.
    pub fn subscription(&self) -> Result<SubscriptionDescriptor> {
        // ---
        self.inner
            .slot
            .obtain(|| self.create_raw())
            .map(|raw| raw.subscription())
    }

    /// Subscribe and deliver events to `consumer`.
    ///
    /// A construction fault goes to the consumer's failure slot
    /// synchronously (and is dropped for [`Consumer::None`]).
    ///
    /// # Errors
    ///
    /// [`Error::Fatal`] for a fatal construction fault,
    /// [`Error::AlreadyExecuted`] if the handle was already enqueued.
    pub fn enqueue(&self, consumer: Consumer<T>) -> Result<()> {
        // ---
        match self.inner.slot.begin(Action::Dispatch, || self.create_raw())? {
            Preamble::Dispatch(raw) => {
                let callback = match consumer {
                    Consumer::None => None,
                    consumer => {
                        let delivery: Arc<dyn RawObservableCallback> = Arc::new(EventDelivery {
                            observable: self.clone(),
                            consumer,
                            failed: AtomicBool::new(false),
                        });
                        Some(delivery)
                    }
                };
                raw.enqueue(callback);
            }
            Preamble::Failed(err) => self.report_construction_failure(&consumer, err),
            Preamble::Canceled => {}
        }
        Ok(())
    }

    /// Release the subscription.
    ///
    /// Only the acknowledgement and failure slots of `consumer` are used.
    /// Pass [`Consumer::None`] to unsubscribe fire-and-forget.
    ///
    /// # Errors
    ///
    /// [`Error::Fatal`] for a fatal construction fault,
    /// [`Error::AlreadyExecuted`] if the handle was already unsubscribed.
    pub fn unsubscribe(&self, consumer: Consumer<T>) -> Result<()> {
        // ---
        match self.inner.slot.begin(Action::Unsubscribe, || self.create_raw())? {
            Preamble::Dispatch(raw) => {
                let callback = match consumer {
                    Consumer::None => None,
                    consumer => {
                        let delivery: Arc<dyn RawAckCallback> = Arc::new(AckDelivery {
                            observable: self.clone(),
                            consumer,
                            completed: AtomicBool::new(false),
                        });
                        Some(delivery)
                    }
                };
                raw.unsubscribe(callback);
            }
            Preamble::Failed(err) => self.report_construction_failure(&consumer, err),
            Preamble::Canceled => {}
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.inner.slot.cancel();
    }

    /// Returns true once `enqueue` or `unsubscribe` reached the raw operation.
    pub fn is_executed(&self) -> bool {
        self.inner.slot.is_executed()
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.slot.is_canceled()
    }

    fn create_raw(&self) -> Result<Arc<dyn RawObservable>> {
        // ---
        let subscription = self.inner.descriptors.build_subscription(&self.inner.args)?;
        self.inner.observable_factory.new_observable(subscription)
    }

    fn report_construction_failure(&self, consumer: &Consumer<T>, err: Error) {
        // ---
        match consumer.failure_slot() {
            Some(on_failure) => guard_callback("on_failure", || on_failure(self, err)),
            None => crate::log_debug!("subscription could not be created: {err}"),
        }
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("args", &self.inner.args)
            .finish()
    }
}

/// Demultiplexes the raw events of one subscription into the consumer's
/// slots.
struct EventDelivery<T> {
    observable: Observable<T>,
    consumer: Consumer<T>,
    failed: AtomicBool,
}

impl<T> EventDelivery<T> {
    fn is_failed(&self) -> bool {
        // ---
        let failed = self.failed.load(Ordering::Acquire);
        if failed {
            crate::log_trace!("dropping subscription event after failure");
        }
        failed
    }
}

impl<T: 'static> RawAckCallback for EventDelivery<T> {
    fn on_ack(&self, ack: Option<SubscribeAck>) {
        // ---
        if self.is_failed() {
            return;
        }

        if let Some(on_ack) = self.consumer.ack_slot() {
            let ack = ack.unwrap_or_default();
            guard_callback("on_ack", || on_ack(&self.observable, ack));
        }
    }

    fn on_failure(&self, error: Error) {
        // ---
        if self.failed.swap(true, Ordering::AcqRel) {
            crate::log_debug!("duplicate subscription failure dropped: {error}");
            return;
        }

        if let Some(on_failure) = self.consumer.failure_slot() {
            guard_callback("on_failure", || on_failure(&self.observable, error));
        }
    }
}

impl<T: 'static> RawObservableCallback for EventDelivery<T> {
    fn on_response(&self, response: RawResponse) {
        // ---
        if self.is_failed() {
            return;
        }

        let Some(on_response) = self.consumer.response_slot() else {
            return;
        };

        match convert_response(self.observable.inner.converter.as_ref(), response) {
            Ok(response) => guard_callback("on_response", || on_response(&self.observable, response)),
            Err(err) => {
                if let Some(on_failure) = self.consumer.failure_slot() {
                    guard_callback("on_failure", || on_failure(&self.observable, err));
                }
            }
        }
    }
}

/// Routes the outcome of an unsubscribe to the consumer's ack and failure
/// slots; one terminal notification.
struct AckDelivery<T> {
    observable: Observable<T>,
    consumer: Consumer<T>,
    completed: AtomicBool,
}

impl<T: 'static> RawAckCallback for AckDelivery<T> {
    fn on_ack(&self, ack: Option<SubscribeAck>) {
        // ---
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(on_ack) = self.consumer.ack_slot() {
            let ack = ack.unwrap_or_default();
            guard_callback("on_ack", || on_ack(&self.observable, ack));
        }
    }

    fn on_failure(&self, error: Error) {
        // ---
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(on_failure) = self.consumer.failure_slot() {
            guard_callback("on_failure", || on_failure(&self.observable, error));
        }
    }
}
