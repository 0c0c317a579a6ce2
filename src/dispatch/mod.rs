//! Dispatch handles.
//!
//! [`Call`] covers one request/response exchange and [`Observable`] one
//! subscription. Both own a lazily created raw operation through a shared
//! [`RawSlot`](slot::RawSlot) and route raw transport events to the caller's
//! callbacks on the delivering thread.

mod call;
mod observable;
mod slot;

use std::panic::{self, AssertUnwindSafe};

use crate::converter::panic_message;

pub use call::{
    //
    Call,
    Callback,
};

pub use observable::{
    //
    Consumer,
    ConsumerShape,
    Observable,
};

/// Run a user callback, containing a panic so it never unwinds through the
/// thread that delivered the raw event.
pub(crate) fn guard_callback<F>(slot: &str, f: F)
where
    F: FnOnce(),
{
    // ---
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(f)) {
        let message = panic_message(panic.as_ref());
        crate::log_error!("{slot} callback panicked: {message}");
    }
}
