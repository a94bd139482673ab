//! Process-Global Runtime
//!
//! The embedded interpreter exists at most once per process and is never
//! torn down once started. [`Runtime::initialize`] resolves the native
//! table from an installed runtime, starts the interpreter, and parks the
//! lock so that no thread holds it by default; [`Runtime::initialize_with_api`]
//! installs a pre-built table instead (embedders, hermetic tests).
//!
//! The runtime owns two pieces of cross-thread state:
//!
//! - the deferred-release queue, fed by handles dropped while the lock is
//!   not held and drained at every outermost lock release;
//! - the lazily started background event loop for awaitable execution.

use std::fmt;
use std::sync::OnceLock;

use crossbeam_queue::SegQueue;
use krait_abi::{load_native_api, InstallDescriptor, NativeApi, RawObject};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::asyncio::EventLoop;
use crate::error::{InteropError, InteropResult};
use crate::gil::{self, GilGuard};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// The process-global interop runtime.
///
/// Obtained from [`Runtime::initialize`] (or its `_with_api` variant) and
/// afterwards from [`Runtime::global`]. Never dropped.
pub struct Runtime {
    api: &'static NativeApi,
    /// Addresses of objects whose reference must be returned under the
    /// lock. Fed off-lock, drained at outermost release.
    deferred_releases: SegQueue<usize>,
    event_loop: Mutex<Option<&'static EventLoop>>,
}

impl Runtime {
    /// Load the runtime library named by `descriptor`, start the
    /// interpreter, and install the global runtime.
    ///
    /// Fails if the library or a symbol is missing, or if a runtime is
    /// already installed.
    pub fn initialize(descriptor: &InstallDescriptor) -> InteropResult<&'static Runtime> {
        let api = load_native_api(descriptor)?.leak();
        debug!(version = %descriptor.version, "runtime library loaded");
        Self::install(api)
    }

    /// Install a pre-built native table as the global runtime.
    ///
    /// Used by embedders that already hold an interpreter and by the
    /// in-process test double.
    pub fn initialize_with_api(api: &'static NativeApi) -> InteropResult<&'static Runtime> {
        Self::install(api)
    }

    fn install(api: &'static NativeApi) -> InteropResult<&'static Runtime> {
        let mut fresh = false;
        let runtime = RUNTIME.get_or_init(|| {
            fresh = true;
            unsafe {
                if (api.is_initialized)() == 0 {
                    (api.initialize)(1);
                    // The starting thread holds the lock after interpreter
                    // startup. Park it so every thread goes through the
                    // coordinator from here on.
                    let _main_state = (api.eval_save_thread)();
                }
            }
            debug!("interop runtime installed");
            Runtime {
                api,
                deferred_releases: SegQueue::new(),
                event_loop: Mutex::new(None),
            }
        });
        if fresh {
            Ok(runtime)
        } else {
            Err(InteropError::AlreadyInitialized)
        }
    }

    /// The installed global runtime.
    pub fn global() -> InteropResult<&'static Runtime> {
        RUNTIME.get().ok_or(InteropError::NotInitialized)
    }

    /// The installed global runtime, if any. Used from drop glue, which
    /// must not fail.
    pub fn try_global() -> Option<&'static Runtime> {
        RUNTIME.get()
    }

    /// The native function table.
    pub fn api(&self) -> &'static NativeApi {
        self.api
    }

    /// Acquire the interpreter lock for the current thread.
    pub fn acquire(&self) -> GilGuard<'_> {
        gil::acquire(self)
    }

    /// The background event loop, started on first use.
    pub fn event_loop(&self) -> InteropResult<&'static EventLoop> {
        let mut slot = self.event_loop.lock();
        if let Some(event_loop) = *slot {
            return Ok(event_loop);
        }
        let event_loop: &'static EventLoop = Box::leak(Box::new(EventLoop::start()?));
        *slot = Some(event_loop);
        Ok(event_loop)
    }

    /// Queue an object reference for release at the next outermost lock
    /// release. Called from handle drop glue when the lock is not held.
    pub(crate) fn defer_release(&self, ptr: *mut RawObject) {
        trace!(ptr = ?ptr, "deferring reference release");
        self.deferred_releases.push(ptr as usize);
    }

    /// Return every queued reference to the runtime. Caller must hold the
    /// interpreter lock.
    pub(crate) fn drain_deferred_releases(&self) {
        while let Some(addr) = self.deferred_releases.pop() {
            unsafe { (self.api.decref)(addr as *mut RawObject) };
        }
    }

    /// Number of references currently waiting for a deferred release.
    pub fn deferred_release_count(&self) -> usize {
        self.deferred_releases.len()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("deferred_releases", &self.deferred_releases.len())
            .finish_non_exhaustive()
    }
}
