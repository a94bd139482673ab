//! Interpreter Lock Coordinator
//!
//! The native runtime serializes all object access behind one global lock.
//! This module wraps the raw ensure/release pair in a scoped, re-entrant
//! guard:
//!
//! - [`Runtime::acquire`](crate::runtime::Runtime::acquire) returns a
//!   [`GilGuard`]; dropping it releases the lock.
//! - Nested acquisition on the same thread is counted, not re-entered
//!   natively. Only the outermost guard touches the runtime.
//! - [`is_acquired`] is an O(1) thread-local read, usable from drop glue.
//! - When the outermost guard releases, the deferred-release queue is
//!   drained first, so handles dropped off-lock are returned to the
//!   runtime no later than the next lock release on any thread.
//!
//! A [`GilGuard`] is deliberately `!Send`: the native release must happen
//! on the acquiring thread.

use std::cell::Cell;
use std::ffi::c_int;
use std::marker::PhantomData;

use krait_abi::NativeApi;

use crate::runtime::Runtime;

thread_local! {
    /// Nesting depth of guards held by this thread.
    static DEPTH: Cell<u32> = const { Cell::new(0) };
    /// Cookie returned by the native ensure call, consumed by the matching
    /// release. Only meaningful while `DEPTH > 0`.
    static COOKIE: Cell<c_int> = const { Cell::new(0) };
}

/// Proof that the current thread holds the interpreter lock.
///
/// Every operation that touches a runtime object takes `&GilGuard`; code
/// without one cannot reach the native table. The guard borrows the
/// runtime, so it also proves initialization.
pub struct GilGuard<'rt> {
    runtime: &'rt Runtime,
    // The native release must run on the acquiring thread.
    _not_send: PhantomData<*mut ()>,
}

impl<'rt> GilGuard<'rt> {
    /// The native function table, for call helpers inside this crate.
    pub(crate) fn api(&self) -> &'static NativeApi {
        self.runtime.api()
    }

    /// The runtime this guard locks.
    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }
}

/// True if the current thread holds the interpreter lock.
///
/// Thread-local read only; never calls into the runtime. Safe from drop
/// glue and finalization paths.
pub fn is_acquired() -> bool {
    DEPTH.with(|depth| depth.get() > 0)
}

/// Acquire the lock for the current thread, or bump the nesting count if
/// it is already held here.
pub(crate) fn acquire(runtime: &Runtime) -> GilGuard<'_> {
    DEPTH.with(|depth| {
        let current = depth.get();
        if current == 0 {
            let cookie = unsafe { (runtime.api().gil_ensure)() };
            COOKIE.with(|slot| slot.set(cookie));
        }
        depth.set(current + 1);
    });
    GilGuard {
        runtime,
        _not_send: PhantomData,
    }
}

impl Drop for GilGuard<'_> {
    fn drop(&mut self) {
        DEPTH.with(|depth| {
            let current = depth.get();
            debug_assert!(current > 0, "guard dropped without matching acquire");
            if current == 1 {
                // Still holding the lock: hand queued releases back to the
                // runtime before letting go. Anything enqueued after this
                // drain is picked up at the next outermost release.
                self.runtime.drain_deferred_releases();
                let cookie = COOKIE.with(|slot| slot.get());
                unsafe { (self.runtime.api().gil_release)(cookie) };
            }
            depth.set(current - 1);
        });
    }
}
