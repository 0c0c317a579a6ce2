// tests/common/mod.rs
//
// Scripted collaborators shared by the dispatch handle tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use bytes::Bytes;

use mom_dispatch::{
    // ---
    Args,
    Call,
    CallFactory,
    Callback,
    DescriptorFactory,
    Error,
    Observable,
    ObservableFactory,
    RawAckCallback,
    RawCall,
    RawCallback,
    RawObservable,
    RawObservableCallback,
    RawOperation,
    RawResponse,
    RequestDescriptor,
    Response,
    Result,
    SubscribeAck,
    SubscriptionDescriptor,
};

// --------------------
// Logging
// --------------------

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}

// --------------------
// Descriptor factory
// --------------------

/// Builds fixed descriptors and counts how often it was asked to.
pub struct FixedDescriptors {
    pub builds: AtomicUsize,
    pub failure: Option<Error>,
}

impl FixedDescriptors {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicUsize::new(0),
            failure: None,
        })
    }

    pub fn failing(error: Error) -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicUsize::new(0),
            failure: Some(error),
        })
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        // ---
        self.builds.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl DescriptorFactory for FixedDescriptors {
    fn build_request(&self, _args: &Args) -> Result<RequestDescriptor> {
        self.check()?;
        Ok(RequestDescriptor::new("user/123", Bytes::from_static(b"{}")))
    }

    fn build_subscription(&self, _args: &Args) -> Result<SubscriptionDescriptor> {
        self.check()?;
        Ok(SubscriptionDescriptor::topic("sensor/kitchen"))
    }
}

// --------------------
// Scripted raw call
// --------------------

#[derive(Clone, Debug)]
pub enum CallEvent {
    Response(RawResponse),
    Failure(Error),
}

pub fn response(topic: &str, payload: &'static [u8]) -> RawResponse {
    RawResponse::new(topic, Bytes::from_static(payload))
}

/// A raw call that replays its script synchronously inside `enqueue`.
pub struct ScriptedCall {
    pub request: RequestDescriptor,
    pub script: Vec<CallEvent>,
    pub publishes: AtomicUsize,
    pub enqueues: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl RawOperation for ScriptedCall {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn is_canceled(&self) -> bool {
        self.cancels.load(Ordering::SeqCst) > 0
    }
}

impl RawCall for ScriptedCall {
    fn request(&self) -> RequestDescriptor {
        self.request.clone()
    }

    fn publish(&self) {
        self.publishes.fetch_add(1, Ordering::SeqCst);
    }

    fn enqueue(&self, callback: Arc<dyn RawCallback>) {
        // ---
        self.enqueues.fetch_add(1, Ordering::SeqCst);
        for event in &self.script {
            match event.clone() {
                CallEvent::Response(response) => callback.on_response(response),
                CallEvent::Failure(err) => callback.on_failure(err),
            }
        }
    }
}

/// Lets a test hold `new_call` open: the factory waits on `entered`, then on
/// `release`. Both barriers are shared with exactly one test thread.
pub struct Gate {
    pub entered: Barrier,
    pub release: Barrier,
}

/// Creates scripted calls, or fails with a fixed error.
pub struct ScriptedCallFactory {
    pub script: Vec<CallEvent>,
    pub failure: Option<Error>,
    pub gate: Option<Gate>,
    pub delay: Duration,
    pub creates: AtomicUsize,
    pub created: Mutex<Vec<Arc<ScriptedCall>>>,
}

impl ScriptedCallFactory {
    fn build(script: Vec<CallEvent>, failure: Option<Error>, gate: Option<Gate>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script,
            failure,
            gate,
            delay,
            creates: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn new(script: Vec<CallEvent>) -> Arc<Self> {
        Self::build(script, None, None, Duration::ZERO)
    }

    pub fn failing(error: Error) -> Arc<Self> {
        Self::build(Vec::new(), Some(error), None, Duration::ZERO)
    }

    /// Blocks inside `new_call` until the test passes both gate barriers.
    pub fn gated(script: Vec<CallEvent>) -> Arc<Self> {
        let gate = Gate {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        };
        Self::build(script, None, Some(gate), Duration::ZERO)
    }

    /// Sleeps for `delay` inside `new_call`.
    pub fn slow(script: Vec<CallEvent>, delay: Duration) -> Arc<Self> {
        Self::build(script, None, None, delay)
    }

    pub fn gate(&self) -> &Gate {
        self.gate.as_ref().expect("factory is not gated")
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// The most recently created raw call.
    pub fn last(&self) -> Arc<ScriptedCall> {
        self.created.lock().unwrap().last().cloned().expect("no raw call created")
    }
}

impl CallFactory for ScriptedCallFactory {
    fn new_call(&self, request: RequestDescriptor) -> Result<Arc<dyn RawCall>> {
        // ---
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.wait();
            gate.release.wait();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let call = Arc::new(ScriptedCall {
            request,
            script: self.script.clone(),
            publishes: AtomicUsize::new(0),
            enqueues: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(call.clone());
        Ok(call)
    }
}

// --------------------
// Scripted raw observable
// --------------------

#[derive(Clone, Debug)]
pub enum StreamEvent {
    Ack(Option<SubscribeAck>),
    Data(RawResponse),
    Failure(Error),
}

/// A raw observable that replays its scripts synchronously.
pub struct ScriptedObservable {
    pub subscription: SubscriptionDescriptor,
    pub script: Vec<StreamEvent>,
    pub unsubscribe_script: Vec<StreamEvent>,
    pub enqueues: AtomicUsize,
    pub unsubscribes: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl RawOperation for ScriptedObservable {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn is_canceled(&self) -> bool {
        self.cancels.load(Ordering::SeqCst) > 0
    }
}

impl RawObservable for ScriptedObservable {
    fn subscription(&self) -> SubscriptionDescriptor {
        self.subscription.clone()
    }

    fn enqueue(&self, callback: Option<Arc<dyn RawObservableCallback>>) {
        // ---
        self.enqueues.fetch_add(1, Ordering::SeqCst);
        let Some(callback) = callback else {
            return;
        };

        for event in &self.script {
            match event.clone() {
                StreamEvent::Ack(ack) => callback.on_ack(ack),
                StreamEvent::Data(response) => callback.on_response(response),
                StreamEvent::Failure(err) => callback.on_failure(err),
            }
        }
    }

    fn unsubscribe(&self, callback: Option<Arc<dyn RawAckCallback>>) {
        // ---
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        let Some(callback) = callback else {
            return;
        };

        for event in &self.unsubscribe_script {
            match event.clone() {
                StreamEvent::Ack(ack) => callback.on_ack(ack),
                StreamEvent::Data(_) => {}
                StreamEvent::Failure(err) => callback.on_failure(err),
            }
        }
    }
}

pub struct ScriptedObservableFactory {
    pub script: Vec<StreamEvent>,
    pub unsubscribe_script: Vec<StreamEvent>,
    pub creates: AtomicUsize,
    pub created: Mutex<Vec<Arc<ScriptedObservable>>>,
}

impl ScriptedObservableFactory {
    pub fn new(script: Vec<StreamEvent>, unsubscribe_script: Vec<StreamEvent>) -> Arc<Self> {
        Arc::new(Self {
            script,
            unsubscribe_script,
            creates: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Arc<ScriptedObservable> {
        self.created.lock().unwrap().last().cloned().expect("no raw observable created")
    }
}

impl ObservableFactory for ScriptedObservableFactory {
    fn new_observable(&self, subscription: SubscriptionDescriptor) -> Result<Arc<dyn RawObservable>> {
        // ---
        self.creates.fetch_add(1, Ordering::SeqCst);

        let observable = Arc::new(ScriptedObservable {
            subscription,
            script: self.script.clone(),
            unsubscribe_script: self.unsubscribe_script.clone(),
            enqueues: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(observable.clone());
        Ok(observable)
    }
}

// --------------------
// Recording callbacks
// --------------------

/// Records every outcome delivered to a call callback.
pub struct Recorder<T> {
    pub responses: Arc<Mutex<Vec<T>>>,
    pub failures: Arc<Mutex<Vec<Error>>>,
}

impl<T> Recorder<T> {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn responses(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    pub fn failures(&self) -> Vec<Error> {
        self.failures.lock().unwrap().clone()
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            responses: self.responses.clone(),
            failures: self.failures.clone(),
        }
    }
}

impl<T: Send + 'static> Callback<T> for Recorder<T> {
    fn on_response(&self, _call: &Call<T>, response: Response<T>) {
        self.responses.lock().unwrap().push(response.into_body());
    }

    fn on_failure(&self, _call: &Call<T>, error: Error) {
        self.failures.lock().unwrap().push(error);
    }
}

/// Everything an observable consumer saw, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum Seen<T> {
    Data(T),
    Ack(SubscribeAck),
    Failure(Error),
}

pub type Journal<T> = Arc<Mutex<Vec<Seen<T>>>>;

pub fn journal<T>() -> Journal<T> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn on_data<T: Send + 'static>(journal: &Journal<T>) -> impl Fn(&Observable<T>, Response<T>) + Send + Sync + 'static {
    let journal = journal.clone();
    move |_, response| journal.lock().unwrap().push(Seen::Data(response.into_body()))
}

pub fn on_ack<T: Send + 'static>(journal: &Journal<T>) -> impl Fn(&Observable<T>, SubscribeAck) + Send + Sync + 'static {
    let journal = journal.clone();
    move |_, ack| journal.lock().unwrap().push(Seen::Ack(ack))
}

pub fn on_failure<T: Send + 'static>(journal: &Journal<T>) -> impl Fn(&Observable<T>, Error) + Send + Sync + 'static {
    let journal = journal.clone();
    move |_, err| journal.lock().unwrap().push(Seen::Failure(err))
}
