// src/dispatch/call.rs

//! Request/response dispatch handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::converter::{convert_response, Converter};
use crate::dispatch::guard_callback;
use crate::dispatch::slot::{Action, Preamble, RawSlot};
use crate::{
    // ---
    Args,
    CallFactory,
    DescriptorFactory,
    Error,
    RawCall,
    RawCallback,
    RawResponse,
    RequestDescriptor,
    Response,
    Result,
};

/// Receives the outcome of [`Call::enqueue`].
///
/// Exactly one of the two methods is invoked per dispatched call. Both run on
/// the thread that delivered the raw transport event, or synchronously inside
/// `enqueue` when the call could not be constructed.
pub trait Callback<T>: Send + Sync {
    /// The reply arrived and converted successfully.
    fn on_response(&self, call: &Call<T>, response: Response<T>);

    /// Construction, transport or conversion failed.
    fn on_failure(&self, call: &Call<T>, error: Error);
}

/// One request/response exchange.
///
/// A `Call` is created once per logical invocation. The raw transport
/// operation behind it is built lazily on first use, exactly once; a
/// recoverable construction fault is cached and replayed. The call can be
/// dispatched once, with [`publish`](Self::publish) (fire-and-forget) or
/// [`enqueue`](Self::enqueue) (reply delivered to a [`Callback`]), and can be
/// canceled at any time from any thread.
///
/// Cloning a `Call` is cheap; clones share the same state.
pub struct Call<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    descriptors: Arc<dyn DescriptorFactory>,
    args: Args,
    call_factory: Arc<dyn CallFactory>,
    converter: Arc<dyn Converter<T>>,
    slot: RawSlot<dyn RawCall>,
}

impl<T: 'static> Call<T> {
    /// Create a call for `args`, built by `descriptors`, run by
    /// `call_factory` and decoded by `converter`.
    pub fn new(
        descriptors: Arc<dyn DescriptorFactory>,
        args: Args,
        call_factory: Arc<dyn CallFactory>,
        converter: Arc<dyn Converter<T>>,
    ) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                descriptors,
                args,
                call_factory,
                converter,
                slot: RawSlot::new(),
            }),
        }
    }

    /// The request this call sends, building the raw operation if needed.
    ///
    /// # Errors
    ///
    /// Returns the (cached) creation fault if the raw operation cannot be
    /// built.
    pub fn request(&self) -> Result<RequestDescriptor> {
        // ---
        self.obtain().map(|raw| raw.request())
    }

    /// Send the request without listening for a reply.
    ///
    /// Recoverable construction faults are swallowed. If the call was
    /// canceled, cancel is forwarded to the raw operation instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] for a fatal construction fault and
    /// [`Error::AlreadyExecuted`] if the call was already dispatched.
    pub fn publish(&self) -> Result<()> {
        // ---
        match self.begin()? {
            Preamble::Dispatch(raw) => raw.publish(),
            Preamble::Failed(_err) => {
                crate::log_debug!("publish dropped, call could not be created: {_err}");
            }
            Preamble::Canceled => {}
        }
        Ok(())
    }

    /// Send the request and deliver the reply to `callback`.
    ///
    /// A construction fault is reported to `callback.on_failure`
    /// synchronously, and nothing is sent. A canceled call forwards cancel
    /// to the raw operation and reports nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] for a fatal construction fault and
    /// [`Error::AlreadyExecuted`] if the call was already dispatched. Neither
    /// is delivered to `callback`.
    pub fn enqueue<C>(&self, callback: C) -> Result<()>
    where
        C: Callback<T> + 'static,
    {
        // ---
        let callback: Arc<dyn Callback<T>> = Arc::new(callback);

        match self.begin()? {
            Preamble::Dispatch(raw) => {
                let delivery = Delivery {
                    call: self.clone(),
                    callback,
                    completed: AtomicBool::new(false),
                };
                raw.enqueue(Arc::new(delivery));
            }
            Preamble::Failed(err) => {
                guard_callback("on_failure", || callback.on_failure(self, err));
            }
            Preamble::Canceled => {}
        }
        Ok(())
    }

    /// Send the request and wait for its outcome.
    ///
    /// Same dispatch rules as [`enqueue`](Self::enqueue); the outcome that
    /// would reach a callback resolves the future instead.
    ///
    /// # Errors
    ///
    /// Everything `enqueue` returns or reports, and [`Error::Canceled`] if
    /// the call was canceled before an outcome arrived.
    pub async fn execute(&self) -> Result<Response<T>>
    where
        T: Send,
    {
        // ---
        let (tx, rx) = oneshot::channel();
        self.enqueue(Outcome {
            tx: Mutex::new(Some(tx)),
        })?;

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) if self.is_canceled() => Err(Error::Canceled),
            Err(_) => Err(Error::Transport("call dropped without outcome".into())),
        }
    }

    /// Cancel the call.
    ///
    /// Sets the cancellation flag immediately and forwards cancel to the raw
    /// operation once it exists. Does not wait for in-flight I/O.
    pub fn cancel(&self) {
        self.inner.slot.cancel();
    }

    /// Returns true once `publish` or `enqueue` reached the raw operation.
    pub fn is_executed(&self) -> bool {
        self.inner.slot.is_executed()
    }

    /// Returns true if the call or its raw operation was canceled.
    pub fn is_canceled(&self) -> bool {
        self.inner.slot.is_canceled()
    }

    fn obtain(&self) -> Result<Arc<dyn RawCall>> {
        self.inner.slot.obtain(|| self.create_raw())
    }

    fn begin(&self) -> Result<Preamble<dyn RawCall>> {
        self.inner.slot.begin(Action::Dispatch, || self.create_raw())
    }

    fn create_raw(&self) -> Result<Arc<dyn RawCall>> {
        // ---
        let request = self.inner.descriptors.build_request(&self.inner.args)?;
        self.inner.call_factory.new_call(request)
    }
}

impl<T> Clone for Call<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Call<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call").field("args", &self.inner.args).finish()
    }
}

/// Adapts the raw callback of one dispatch to the caller's [`Callback`].
///
/// Holds a clone of the call so the callback can be handed its handle; the
/// cycle is released when the raw operation drops the adapter.
struct Delivery<T> {
    call: Call<T>,
    callback: Arc<dyn Callback<T>>,
    completed: AtomicBool,
}

impl<T> Delivery<T> {
    /// Claim the single terminal notification of this dispatch.
    fn complete(&self) -> bool {
        // ---
        let first = !self.completed.swap(true, Ordering::AcqRel);
        if !first {
            crate::log_debug!("dropping raw event after terminal notification");
        }
        first
    }
}

impl<T: 'static> RawCallback for Delivery<T> {
    fn on_response(&self, response: RawResponse) {
        // ---
        if !self.complete() {
            return;
        }

        match convert_response(self.call.inner.converter.as_ref(), response) {
            Ok(response) => guard_callback("on_response", || {
                self.callback.on_response(&self.call, response)
            }),
            Err(err) => guard_callback("on_failure", || self.callback.on_failure(&self.call, err)),
        }
    }

    fn on_failure(&self, error: Error) {
        // ---
        if !self.complete() {
            return;
        }
        guard_callback("on_failure", || self.callback.on_failure(&self.call, error));
    }
}

/// Forwards the single outcome of [`Call::execute`] into its future.
struct Outcome<T> {
    tx: Mutex<Option<oneshot::Sender<Result<Response<T>>>>>,
}

impl<T> Outcome<T> {
    fn send(&self, outcome: Result<Response<T>>) {
        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }
}

impl<T: Send> Callback<T> for Outcome<T> {
    fn on_response(&self, _call: &Call<T>, response: Response<T>) {
        self.send(Ok(response));
    }

    fn on_failure(&self, _call: &Call<T>, error: Error) {
        self.send(Err(error));
    }
}
