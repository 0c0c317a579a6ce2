// src/dispatch/slot.rs

//! Per-handle raw operation slot.
//!
//! `RawSlot` owns the lazily created raw operation of one handle together
//! with the cached creation fault, the execution claims and the cancellation
//! flag. Both [`Call`](crate::Call) and [`Observable`](crate::Observable) are
//! thin typed shells around a slot.
//!
//! ## Locking
//!
//! - `canceled` is an atomic and the created raw operation sits in a
//!   `OnceLock`, so `is_canceled()` never waits on the state mutex and
//!   `cancel()` sets its flag before touching it.
//! - Everything else lives behind one mutex. Only construction (the
//!   descriptor and transport factories) runs while it is held.
//! - Raw `cancel()`, raw dispatch and user callbacks always run after the
//!   guard is dropped, so a callback may call back into its own handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::{Error, RawOperation, Result};

/// Which terminal action a dispatch claims.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    /// `publish()` / `enqueue(..)`.
    Dispatch,
    /// `unsubscribe(..)` (observables only).
    Unsubscribe,
}

/// Outcome of a single construction attempt.
enum Creation<R: ?Sized> {
    Ready(Arc<R>),
    Recoverable(Error),
    Fatal(Error),
}

/// What a dispatch method should do after the shared preamble.
pub(crate) enum Preamble<R: ?Sized> {
    /// Issue the action on this raw operation.
    Dispatch(Arc<R>),
    /// Construction failed (now or earlier); report and stop.
    Failed(Error),
    /// The handle was canceled; cancel was forwarded, nothing is dispatched.
    Canceled,
}

struct SlotState {
    creation_failure: Option<Error>,
    executed: bool,
    unsubscribed: bool,
    cancel_forwarded: bool,
}

pub(crate) struct RawSlot<R: ?Sized> {
    canceled: AtomicBool,
    /// Written once, under `state`.
    raw: OnceLock<Arc<R>>,
    state: Mutex<SlotState>,
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<R: RawOperation + ?Sized> RawSlot<R> {
    // ---
    pub(crate) fn new() -> Self {
        // ---
        Self {
            canceled: AtomicBool::new(false),
            raw: OnceLock::new(),
            state: Mutex::new(SlotState {
                creation_failure: None,
                executed: false,
                unsubscribed: false,
                cancel_forwarded: false,
            }),
        }
    }

    /// Return the raw operation, creating it on first use.
    ///
    /// A recoverable creation fault is cached and replayed; a fatal one is
    /// returned without being cached. Transport faults are cached as
    /// [`Error::Construction`], any other kind as [`Error::Unexpected`].
    pub(crate) fn obtain<F>(&self, create: F) -> Result<Arc<R>>
    where
        F: FnOnce() -> Result<Arc<R>>,
    {
        // ---
        let (creation, to_cancel) = {
            let mut state = lock_ignore_poison(&self.state);
            let creation = self.obtain_locked(&mut state, create);
            let to_cancel = self.take_cancel_locked(&mut state);
            (creation, to_cancel)
        };

        if let Some(raw) = to_cancel {
            raw.cancel();
        }

        match creation {
            Creation::Ready(raw) => Ok(raw),
            Creation::Recoverable(err) | Creation::Fatal(err) => Err(err),
        }
    }

    /// Shared preamble of every dispatch method: claim `action`, obtain the
    /// raw operation and run the cancel check.
    ///
    /// Returns `Err` only for a fatal creation fault or a repeated action;
    /// everything else is a [`Preamble`] value.
    pub(crate) fn begin<F>(&self, action: Action, create: F) -> Result<Preamble<R>>
    where
        F: FnOnce() -> Result<Arc<R>>,
    {
        // ---
        let (preamble, to_cancel) = {
            let mut state = lock_ignore_poison(&self.state);

            let claimed = match action {
                Action::Dispatch => state.executed,
                Action::Unsubscribe => state.unsubscribed,
            };
            if claimed {
                return Err(Error::AlreadyExecuted);
            }

            let preamble = match self.obtain_locked(&mut state, create) {
                Creation::Fatal(err) => return Err(err),
                Creation::Recoverable(err) => Preamble::Failed(err),
                Creation::Ready(_) if self.canceled.load(Ordering::Acquire) => Preamble::Canceled,
                Creation::Ready(raw) => {
                    match action {
                        Action::Dispatch => state.executed = true,
                        Action::Unsubscribe => state.unsubscribed = true,
                    }
                    Preamble::Dispatch(raw)
                }
            };

            (preamble, self.take_cancel_locked(&mut state))
        };

        if let Some(raw) = to_cancel {
            crate::log_debug!("handle canceled before dispatch, forwarding cancel");
            raw.cancel();
        }

        Ok(preamble)
    }

    /// Set the cancellation flag and forward cancel to an existing raw
    /// operation, at most once per handle.
    pub(crate) fn cancel(&self) {
        // ---
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }

        // Blocks only while a construction is in flight; the flag is already
        // visible to every other caller.
        let to_cancel = {
            let mut state = lock_ignore_poison(&self.state);
            self.take_cancel_locked(&mut state)
        };

        if let Some(raw) = to_cancel {
            raw.cancel();
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        // ---
        if self.canceled.load(Ordering::Acquire) {
            return true;
        }

        self.raw.get().is_some_and(|raw| raw.is_canceled())
    }

    /// True once either claim reached the raw operation.
    pub(crate) fn is_executed(&self) -> bool {
        let state = lock_ignore_poison(&self.state);
        state.executed || state.unsubscribed
    }

    fn obtain_locked<F>(&self, state: &mut SlotState, create: F) -> Creation<R>
    where
        F: FnOnce() -> Result<Arc<R>>,
    {
        // ---
        if let Some(raw) = self.raw.get() {
            return Creation::Ready(raw.clone());
        }

        if let Some(err) = &state.creation_failure {
            return Creation::Recoverable(err.clone());
        }

        match create() {
            Ok(raw) => {
                // only ever set while `state` is held, so this is the first set
                let _ = self.raw.set(raw.clone());
                Creation::Ready(raw)
            }
            Err(err) if err.is_fatal() => {
                crate::log_error!("raw operation creation failed fatally: {err}");
                Creation::Fatal(err)
            }
            Err(err) => {
                let err = recoverable(err);
                crate::log_debug!("raw operation creation failed, caching: {err}");
                state.creation_failure = Some(err.clone());
                Creation::Recoverable(err)
            }
        }
    }

    /// Claim the one-time cancel forward if the handle is canceled and the
    /// raw operation exists. The caller cancels it after unlocking.
    fn take_cancel_locked(&self, state: &mut SlotState) -> Option<Arc<R>> {
        // ---
        if state.cancel_forwarded || !self.canceled.load(Ordering::Acquire) {
            return None;
        }

        let raw = self.raw.get().cloned()?;
        state.cancel_forwarded = true;
        Some(raw)
    }
}

/// Narrow a non-fatal creation fault to the two recoverable kinds.
fn recoverable(err: Error) -> Error {
    match err {
        Error::Construction(_) | Error::Unexpected(_) => err,
        Error::Transport(msg) => Error::Construction(msg),
        other => Error::Unexpected(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeRaw {
        cancels: AtomicUsize,
    }

    impl RawOperation for FakeRaw {
        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        fn is_canceled(&self) -> bool {
            self.cancels.load(Ordering::SeqCst) > 0
        }
    }

    #[test]
    fn test_obtain_memoizes_success() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();
        let created = AtomicUsize::new(0);

        for _ in 0..3 {
            slot.obtain(|| {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakeRaw::default()))
            })
            .unwrap();
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_obtain_caches_recoverable_failure() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();
        let created = AtomicUsize::new(0);
        let create = || {
            created.fetch_add(1, Ordering::SeqCst);
            Err(Error::Construction("socket".into()))
        };

        assert_eq!(slot.obtain(create).err(), Some(Error::Construction("socket".into())));
        assert_eq!(slot.obtain(create).err(), Some(Error::Construction("socket".into())));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_obtain_does_not_cache_fatal_failure() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();

        let first = slot.obtain(|| Err(Error::Fatal("oom".into())));
        assert_eq!(first.err(), Some(Error::Fatal("oom".into())));

        assert!(slot.obtain(|| Ok(Arc::new(FakeRaw::default()))).is_ok());
    }

    #[test]
    fn test_cancel_forwards_exactly_once() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();
        let raw = slot.obtain(|| Ok(Arc::new(FakeRaw::default()))).unwrap();

        slot.cancel();
        slot.cancel();
        assert!(matches!(
            slot.begin(Action::Dispatch, || unreachable!()),
            Ok(Preamble::Canceled)
        ));

        assert_eq!(raw.cancels.load(Ordering::SeqCst), 1);
        assert!(slot.is_canceled());
    }

    #[test]
    fn test_cancel_before_create_cancels_new_raw() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();
        slot.cancel();

        let raw = slot.obtain(|| Ok(Arc::new(FakeRaw::default()))).unwrap();
        assert_eq!(raw.cancels.load(Ordering::SeqCst), 1);
        assert!(!slot.is_executed());
    }

    #[test]
    fn test_second_dispatch_is_rejected() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();
        let create = || Ok(Arc::new(FakeRaw::default()));

        assert!(matches!(slot.begin(Action::Dispatch, create), Ok(Preamble::Dispatch(_))));
        assert!(slot.is_executed());
        assert!(matches!(
            slot.begin(Action::Dispatch, create),
            Err(Error::AlreadyExecuted)
        ));
        assert!(matches!(
            slot.begin(Action::Unsubscribe, create),
            Ok(Preamble::Dispatch(_))
        ));
    }

    #[test]
    fn test_transport_creation_fault_cached_as_construction() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();
        let create = || Err(Error::Transport("broker unreachable".into()));

        let expected = Some(Error::Construction("broker unreachable".into()));
        assert_eq!(slot.obtain(create).err(), expected);
        assert_eq!(slot.obtain(|| unreachable!()).err(), expected);
    }

    #[test]
    fn test_other_creation_fault_cached_as_unexpected() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();

        let first = slot.obtain(|| Err(Error::MissingReplyRoute));
        let Some(Error::Unexpected(msg)) = first.err() else {
            panic!("expected an unexpected-kind fault");
        };
        assert_eq!(msg, Error::MissingReplyRoute.to_string());
        assert!(matches!(
            slot.begin(Action::Dispatch, || unreachable!()),
            Ok(Preamble::Failed(Error::Unexpected(_)))
        ));
    }

    #[test]
    fn test_unsubscribe_claim_counts_as_executed() {
        // ---
        let slot: RawSlot<FakeRaw> = RawSlot::new();

        assert!(matches!(
            slot.begin(Action::Unsubscribe, || Ok(Arc::new(FakeRaw::default()))),
            Ok(Preamble::Dispatch(_))
        ));
        assert!(slot.is_executed());
    }
}
