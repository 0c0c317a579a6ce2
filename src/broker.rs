//! Broker-backed raw operations.
//!
//! [`BrokerFactory`] turns descriptors into raw operations that run on a
//! [`Transport`](crate::Transport) inside a tokio runtime. It is the default
//! [`CallFactory`] and [`ObservableFactory`] of a
//! [`Dispatcher`](crate::Dispatcher).
//!
//! - A [`BrokerCall`] publishes its request and, when enqueued, waits on the
//!   reply route for the first envelope carrying its correlation id (or no
//!   correlation id at all), bounded by the request timeout.
//! - A [`BrokerObservable`] subscribes every relation of its descriptor,
//!   acknowledges once, then forwards data events until it is canceled or
//!   unsubscribed. Unsubscribe releases only the handles this observable
//!   registered.
//!
//! Raw callbacks run on runtime worker threads. No lock is held while a
//! callback runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};

use crate::{
    // ---
    CallFactory,
    CorrelationId,
    Envelope,
    Error,
    ObservableFactory,
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
    Result,
    SubscribeAck,
    Subscription,
    SubscriptionDescriptor,
    SubscriptionHandle,
    SubscriptionId,
    TransportPtr,
};

const FAN_IN_CAPACITY: usize = 64;

/// Transport handles registered by a subscription stream; released by
/// unsubscribe.
type Registrations = Arc<Mutex<Vec<(Subscription, SubscriptionId)>>>;

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Creates broker-backed raw operations over one transport.
#[derive(Clone)]
pub struct BrokerFactory {
    transport: TransportPtr,
    runtime: Handle,
}

impl BrokerFactory {
    /// Run operations on `transport`, spawning their I/O on `runtime`.
    pub fn new(transport: TransportPtr, runtime: Handle) -> Self {
        Self { transport, runtime }
    }

    /// Like [`new`](Self::new), on the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConfig`] outside a tokio runtime.
    pub fn current(transport: TransportPtr) -> Result<Self> {
        // ---
        let runtime = Handle::try_current()
            .map_err(|_| Error::MissingConfig("tokio runtime (not inside a runtime context)".into()))?;
        Ok(Self::new(transport, runtime))
    }
}

impl CallFactory for BrokerFactory {
    fn new_call(&self, request: RequestDescriptor) -> Result<Arc<dyn RawCall>> {
        // ---
        Ok(Arc::new(BrokerCall {
            request,
            transport: self.transport.clone(),
            runtime: self.runtime.clone(),
            canceled: AtomicBool::new(false),
            state: Mutex::new(CallState::default()),
        }))
    }
}

impl ObservableFactory for BrokerFactory {
    fn new_observable(&self, subscription: SubscriptionDescriptor) -> Result<Arc<dyn RawObservable>> {
        // ---
        Ok(Arc::new(BrokerObservable {
            subscription,
            transport: self.transport.clone(),
            runtime: self.runtime.clone(),
            canceled: AtomicBool::new(false),
            stream: Mutex::new(None),
            registrations: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

// --------------------
// Request/response
// --------------------

/// The callback of an enqueued call, taken by whichever of completion and
/// cancellation gets there first.
struct PendingReply {
    callback: Mutex<Option<Arc<dyn RawCallback>>>,
}

impl PendingReply {
    fn take(&self) -> Option<Arc<dyn RawCallback>> {
        lock_ignore_poison(&self.callback).take()
    }
}

#[derive(Default)]
struct CallState {
    pending: Option<Arc<PendingReply>>,
    task: Option<AbortHandle>,
}

/// Raw request/response operation on a transport.
pub struct BrokerCall {
    request: RequestDescriptor,
    transport: TransportPtr,
    runtime: Handle,
    canceled: AtomicBool,
    state: Mutex<CallState>,
}

impl RawOperation for BrokerCall {
    /// Abort the exchange. A pending callback receives [`Error::Canceled`].
    fn cancel(&self) {
        // ---
        if !self.canceled.swap(true, Ordering::AcqRel) {
            self.abort_and_notify();
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

impl RawCall for BrokerCall {
    fn request(&self) -> RequestDescriptor {
        self.request.clone()
    }

    fn publish(&self) {
        // ---
        if self.is_canceled() {
            return;
        }

        let transport = self.transport.clone();
        let env = self.request.envelope();

        self.runtime.spawn(async move {
            if let Err(_err) = transport.publish(env).await {
                crate::log_warn!("{}: fire-and-forget publish failed: {_err}", transport.transport_id());
            }
        });
    }

    fn enqueue(&self, callback: Arc<dyn RawCallback>) {
        // ---
        if self.is_canceled() {
            callback.on_failure(Error::Canceled);
            return;
        }

        let pending = Arc::new(PendingReply {
            callback: Mutex::new(Some(callback)),
        });

        let task = {
            let pending = pending.clone();
            let transport = self.transport.clone();
            let request = self.request.clone();

            self.runtime.spawn(async move {
                let outcome = exchange(&transport, &request).await;

                let Some(callback) = pending.take() else {
                    return;
                };
                match outcome {
                    Ok(response) => callback.on_response(response),
                    Err(err) => callback.on_failure(err),
                }
            })
        };

        {
            let mut state = lock_ignore_poison(&self.state);
            state.pending = Some(pending);
            state.task = Some(task.abort_handle());
        }

        // cancel() may have run before the task handle was stored
        if self.is_canceled() {
            self.abort_and_notify();
        }
    }
}

impl BrokerCall {
    fn abort_and_notify(&self) {
        // ---
        let (task, pending) = {
            let mut state = lock_ignore_poison(&self.state);
            (state.task.take(), state.pending.take())
        };

        if let Some(task) = task {
            task.abort();
        }
        if let Some(callback) = pending.and_then(|pending| pending.take()) {
            crate::log_debug!("call to {} canceled", self.request.topic);
            callback.on_failure(Error::Canceled);
        }
    }
}

/// Publish `request` and wait for its reply.
///
/// The reply route is subscribed before the request goes out so a fast
/// responder cannot be missed. Afterwards only this call's inbox is
/// released; other calls sharing the route keep theirs.
async fn exchange(transport: &TransportPtr, request: &RequestDescriptor) -> Result<RawResponse> {
    // ---
    let route = request.reply.as_ref().ok_or(Error::MissingReplyRoute)?;
    let mut handle = transport.subscribe(route.subscription(), request.qos).await?;

    let correlation_id = CorrelationId::generate();
    let outgoing = request.envelope().with_correlation_id(correlation_id.clone());

    crate::log_debug!(
        "{}: request to {} [{correlation_id}]",
        transport.transport_id(),
        request.topic
    );
    if let Err(err) = transport.publish(outgoing.clone()).await {
        release(transport, handle).await;
        return Err(err);
    }

    let wait = async {
        while let Some(env) = handle.inbox.recv().await {
            if is_echo(&env, &outgoing) {
                continue;
            }
            if correlation_id.accepts(env.correlation_id.as_deref()) {
                return Ok(raw_response(env));
            }
            crate::log_trace!("ignoring reply for {:?}", env.correlation_id);
        }
        Err(Error::Transport(format!(
            "reply subscription for {} closed",
            request.topic
        )))
    };

    let outcome = match tokio::time::timeout(request.timeout, wait).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::Timeout),
    };

    release(transport, handle).await;
    outcome
}

/// Release one reply inbox. Other calls sharing the route keep theirs.
async fn release(transport: &TransportPtr, handle: SubscriptionHandle) {
    // ---
    let SubscriptionHandle { id, subscription, .. } = handle;
    if let Err(_err) = transport.unsubscribe(subscription, id).await {
        crate::log_debug!("{}: releasing reply route failed: {_err}", transport.transport_id());
    }
}

/// Returns true if `env` is the request itself, seen on a reply route that
/// also matches the request.
fn is_echo(env: &Envelope, outgoing: &Envelope) -> bool {
    // ---
    env.correlation_id == outgoing.correlation_id
        && env.address == outgoing.address
        && env.keyword == outgoing.keyword
        && env.reply_to == outgoing.reply_to
        && env.payload == outgoing.payload
}

fn raw_response(env: Envelope) -> RawResponse {
    // ---
    RawResponse {
        keyword: env.keyword,
        body: ResponseBody {
            topic: env.address,
            payload: env.payload,
        },
    }
}

// --------------------
// Subscriptions
// --------------------

/// Raw subscription operation on a transport.
pub struct BrokerObservable {
    subscription: SubscriptionDescriptor,
    transport: TransportPtr,
    runtime: Handle,
    canceled: AtomicBool,
    stream: Mutex<Option<AbortHandle>>,
    registrations: Registrations,
}

impl BrokerObservable {
    fn stop_stream(&self) {
        // ---
        let stream = lock_ignore_poison(&self.stream).take();
        if let Some(stream) = stream {
            stream.abort();
        }
    }
}

impl RawOperation for BrokerObservable {
    /// Stop delivering events. Broker subscriptions are left in place.
    fn cancel(&self) {
        // ---
        if !self.canceled.swap(true, Ordering::AcqRel) {
            self.stop_stream();
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

impl RawObservable for BrokerObservable {
    fn subscription(&self) -> SubscriptionDescriptor {
        self.subscription.clone()
    }

    fn enqueue(&self, callback: Option<Arc<dyn RawObservableCallback>>) {
        // ---
        if self.is_canceled() {
            return;
        }

        let transport = self.transport.clone();
        let subscription = self.subscription.clone();
        let registrations = self.registrations.clone();

        let task = self.runtime.spawn(async move {
            stream_events(transport, subscription, registrations, callback).await;
        });

        *lock_ignore_poison(&self.stream) = Some(task.abort_handle());

        // cancel() may have run before the task handle was stored
        if self.is_canceled() {
            self.stop_stream();
        }
    }

    fn unsubscribe(&self, callback: Option<Arc<dyn RawAckCallback>>) {
        // ---
        self.stop_stream();

        let transport = self.transport.clone();
        let relations = self.subscription.relations.clone();
        let registered = std::mem::take(&mut *lock_ignore_poison(&self.registrations));

        self.runtime.spawn(async move {
            for (sub, id) in registered {
                if let Err(err) = transport.unsubscribe(sub.clone(), id).await {
                    crate::log_warn!("{}: unsubscribe {sub:?} failed: {err}", transport.transport_id());
                    if let Some(callback) = &callback {
                        callback.on_failure(err);
                    }
                    return;
                }
            }

            crate::log_debug!("{}: unsubscribed {relations:?}", transport.transport_id());
            if let Some(callback) = &callback {
                callback.on_ack(Some(SubscribeAck::new(relations)));
            }
        });
    }
}

/// Subscribe every relation, acknowledge, then forward events until every
/// inbox closes.
async fn stream_events(
    transport: TransportPtr,
    subscription: SubscriptionDescriptor,
    registrations: Registrations,
    callback: Option<Arc<dyn RawObservableCallback>>,
) {
    // ---
    let relations: Vec<Relation> = subscription.relations;
    let (tx, mut rx) = mpsc::channel::<Envelope>(FAN_IN_CAPACITY);
    let mut forwarders = JoinSet::new();

    for relation in &relations {
        let mut handle = match transport.subscribe(relation.subscription(), subscription.qos).await {
            Ok(handle) => handle,
            Err(err) => {
                crate::log_warn!("{}: subscribe {relation:?} failed: {err}", transport.transport_id());
                if let Some(callback) = &callback {
                    callback.on_failure(err);
                }
                return;
            }
        };

        lock_ignore_poison(&registrations).push((handle.subscription.clone(), handle.id));

        let tx = tx.clone();
        forwarders.spawn(async move {
            while let Some(env) = handle.inbox.recv().await {
                if tx.send(env).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    crate::log_debug!("{}: subscribed {relations:?}", transport.transport_id());
    if let Some(callback) = &callback {
        callback.on_ack(Some(SubscribeAck::new(relations)));
    }

    while let Some(env) = rx.recv().await {
        match &callback {
            Some(callback) => callback.on_response(raw_response(env)),
            None => crate::log_trace!("event on {} dropped, no consumer", env.address),
        }
    }

    // every forwarder ended: the transport closed all inboxes
    if let Some(callback) = &callback {
        callback.on_failure(Error::Transport("subscription stream closed".into()));
    }
}
