//! Async Bridge
//!
//! Awaitables run on one persistent background thread that owns a
//! runtime event loop for the life of the process. The thread parks
//! inside the loop's `run_forever`; every completion callback and every
//! host-side request stops the loop, lets the thread drain its request
//! queue and conclude finished futures, then re-enters `run_forever`.
//!
//! Hosts interact through [`EventLoop::schedule`], which returns a
//! [`ScheduledTask`]: a host future resolving to the awaitable's result
//! handle. Conclusion checks run in a fixed order (done, cancelled,
//! exception, result) so a cancelled future never reports a spurious
//! result. Cancellation is requested through a [`TaskCanceller`] and is
//! a no-op once the future has concluded.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use futures::channel::oneshot;
use tracing::{debug, trace, warn};

use crate::convert::{cast_error, FromPy, PyShaped, Shape};
use crate::error::{InteropError, InteropResult};
use crate::except::{self, PythonException};
use crate::gil::GilGuard;
use crate::handle::{self, Handle};
use crate::runtime::Runtime;

// Evaluated once at loop startup; attached to every scheduled future so
// that its completion stops the loop and wakes the pump.
const STOP_WHEN_DONE: &str = "lambda fut: fut.get_loop().stop()";

enum Request {
    Schedule {
        id: u64,
        awaitable: Handle,
        completion: oneshot::Sender<TaskOutcome>,
    },
    Cancel {
        id: u64,
    },
    Shutdown,
}

enum TaskOutcome {
    Value(Handle),
    Error(InteropError),
    Cancelled,
}

/// Handles for waking the parked loop thread from any host thread.
struct WakeHandles {
    call_soon_threadsafe: Handle,
    stop: Handle,
}

impl WakeHandles {
    fn wake(&self, py: &GilGuard<'_>) -> InteropResult<()> {
        self.call_soon_threadsafe.call(py, &[&self.stop])?;
        Ok(())
    }
}

/// The background event loop.
///
/// Obtained from [`Runtime::event_loop`]; started on first use and kept
/// for the rest of the process.
pub struct EventLoop {
    sender: Sender<Request>,
    wake: Arc<WakeHandles>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    thread: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Spawn the loop thread and wait for it to come up.
    pub(crate) fn start() -> InteropResult<EventLoop> {
        let (sender, receiver) = unbounded::<Request>();
        let (ready_tx, ready_rx) = bounded::<InteropResult<WakeHandles>>(1);
        let thread = thread::Builder::new()
            .name("krait-event-loop".to_string())
            .spawn(move || loop_thread(receiver, ready_tx))
            .map_err(|_| InteropError::LoopShutDown)?;
        let wake = ready_rx
            .recv()
            .map_err(|_| InteropError::LoopShutDown)??;
        debug!("background event loop started");
        Ok(EventLoop {
            sender,
            wake: Arc::new(wake),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            thread: parking_lot::Mutex::new(Some(thread)),
        })
    }

    /// Hand an awaitable to the loop.
    ///
    /// The returned task resolves to the awaitable's result handle once
    /// the loop concludes it.
    pub fn schedule(&self, awaitable: &Handle) -> InteropResult<ScheduledTask> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(InteropError::LoopShutDown);
        }
        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        let awaitable = awaitable.clone_ref(&py)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (completion, receiver) = oneshot::channel();
        self.sender
            .send(Request::Schedule {
                id,
                awaitable,
                completion,
            })
            .map_err(|_| InteropError::LoopShutDown)?;
        self.wake.wake(&py)?;
        trace!(id, "awaitable scheduled");
        Ok(ScheduledTask {
            receiver,
            canceller: TaskCanceller {
                id,
                sender: self.sender.clone(),
                wake: Arc::clone(&self.wake),
            },
        })
    }

    /// Stop accepting work, cancel what is outstanding, and join the loop
    /// thread.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.sender.send(Request::Shutdown).is_ok() {
            if let Ok(runtime) = Runtime::global() {
                let py = runtime.acquire();
                if self.wake.wake(&py).is_err() {
                    debug!("event loop wake failed during shutdown");
                }
            }
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("event loop thread panicked");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A cancellation handle for one scheduled awaitable. Cloneable and
/// thread-safe; cancelling an already-concluded task is a no-op.
#[derive(Clone)]
pub struct TaskCanceller {
    id: u64,
    sender: Sender<Request>,
    wake: Arc<WakeHandles>,
}

impl TaskCanceller {
    /// Request cancellation of the task.
    pub fn cancel(&self) -> InteropResult<()> {
        let runtime = Runtime::global()?;
        self.sender
            .send(Request::Cancel { id: self.id })
            .map_err(|_| InteropError::LoopShutDown)?;
        let py = runtime.acquire();
        self.wake.wake(&py)
    }
}

/// A host future for one scheduled awaitable.
pub struct ScheduledTask {
    receiver: oneshot::Receiver<TaskOutcome>,
    canceller: TaskCanceller,
}

impl ScheduledTask {
    /// A handle for cancelling this task from another thread.
    pub fn canceller(&self) -> TaskCanceller {
        self.canceller.clone()
    }

    /// Block the calling thread until the task concludes.
    pub fn wait(self) -> InteropResult<Handle> {
        futures::executor::block_on(self)
    }
}

impl Future for ScheduledTask {
    type Output = InteropResult<Handle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|res| match res {
            Ok(TaskOutcome::Value(handle)) => Ok(handle),
            Ok(TaskOutcome::Error(err)) => Err(err),
            Ok(TaskOutcome::Cancelled) => Err(InteropError::Cancelled),
            Err(oneshot::Canceled) => Err(InteropError::LoopShutDown),
        })
    }
}

// ============================================================================
// Typed awaitable wrapper
// ============================================================================

/// A typed view of a runtime awaitable.
///
/// Decoding a coroutine object produces one of these; awaiting it runs
/// the coroutine on the background loop and decodes the result as `T`.
#[derive(Debug)]
pub struct PyCoroutine<T> {
    awaitable: Handle,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: FromPy> PyCoroutine<T> {
    /// Wrap an awaitable object.
    pub fn new(awaitable: Handle) -> InteropResult<Self> {
        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        let is_awaitable = awaitable.is_instance_of(&py, py.api().coro_type)
            || awaitable.hasattr(&py, "__await__")?;
        if !is_awaitable {
            return Err(cast_error(&Shape::Coroutine, &awaitable, &py));
        }
        Ok(PyCoroutine {
            awaitable,
            _marker: std::marker::PhantomData,
        })
    }

    /// Schedule on the background loop without waiting.
    pub fn schedule(&self) -> InteropResult<ScheduledTask> {
        Runtime::global()?.event_loop()?.schedule(&self.awaitable)
    }

    /// Run to completion and decode the result.
    pub async fn wait(self) -> InteropResult<T> {
        let task = self.schedule()?;
        let result = task.await?;
        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        T::from_py(&result, &py)
    }

    /// Blocking form of [`wait`](PyCoroutine::wait).
    pub fn wait_blocking(self) -> InteropResult<T> {
        futures::executor::block_on(self.wait())
    }

    /// The wrapped awaitable.
    pub fn as_handle(&self) -> &Handle {
        &self.awaitable
    }
}

impl<T> PyShaped for PyCoroutine<T> {
    fn shape() -> Shape {
        Shape::Coroutine
    }
}

impl<T: FromPy> FromPy for PyCoroutine<T> {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        PyCoroutine::new(obj.clone_ref(py)?)
    }
}

// ============================================================================
// Async iteration
// ============================================================================

/// A typed pull-stream over a runtime async iterable.
///
/// Each pull calls `__anext__` and runs the resulting awaitable on the
/// background loop. The async stop signal ends the stream; exhaustion is
/// sticky.
#[derive(Debug)]
pub struct PyAsyncIterator<T> {
    anext: Handle,
    exhausted: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: FromPy> PyAsyncIterator<T> {
    /// Ask `iterable` for its async iterator.
    ///
    /// Objects exposing `__aiter__` are asked for one; objects that
    /// already are async iterators (bare `__anext__`) are used directly.
    pub fn new(iterable: Handle) -> InteropResult<Self> {
        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        let iterator = if iterable.hasattr(&py, "__aiter__")? {
            iterable.getattr(&py, "__aiter__")?.call0(&py)?
        } else if iterable.hasattr(&py, "__anext__")? {
            iterable
        } else {
            return Err(cast_error(&Shape::AsyncIterator, &iterable, &py));
        };
        let anext = iterator.getattr(&py, "__anext__")?;
        Ok(PyAsyncIterator {
            anext,
            exhausted: false,
            _marker: std::marker::PhantomData,
        })
    }

    /// Pull the next item, blocking until its awaitable concludes.
    ///
    /// `Ok(None)` is exhaustion. A failed pull reports its error once and
    /// ends the stream.
    pub fn next_blocking(&mut self) -> InteropResult<Option<T>> {
        if self.exhausted {
            return Ok(None);
        }
        let runtime = Runtime::global()?;
        // The step awaitable is built under a short-lived guard; the loop
        // thread needs the lock to conclude it.
        let step = {
            let py = runtime.acquire();
            self.anext.call0(&py)?
        };
        let task = runtime.event_loop()?.schedule(&step)?;
        match task.wait() {
            Ok(item) => {
                let py = runtime.acquire();
                Ok(Some(T::from_py(&item, &py)?))
            }
            Err(InteropError::Python(exc)) => {
                self.exhausted = true;
                let stream_end = {
                    let py = runtime.acquire();
                    is_async_stop(&py, &exc)
                };
                if stream_end {
                    Ok(None)
                } else {
                    Err(InteropError::Python(exc))
                }
            }
            Err(err) => {
                self.exhausted = true;
                Err(err)
            }
        }
    }

    /// Drain the remaining items into a vector.
    pub fn collect_blocking(mut self) -> InteropResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next_blocking()? {
            items.push(item);
        }
        Ok(items)
    }
}

/// Whether a projected exception is the async stop signal.
fn is_async_stop(py: &GilGuard<'_>, exc: &PythonException) -> bool {
    exc.value().is_some_and(|value| unsafe {
        (py.api().err_given_exception_matches)(value.as_ptr(), py.api().exc_stop_async_iteration)
    } != 0)
}

impl<T> PyShaped for PyAsyncIterator<T> {
    fn shape() -> Shape {
        Shape::AsyncIterator
    }
}

impl<T: FromPy> FromPy for PyAsyncIterator<T> {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        PyAsyncIterator::new(obj.clone_ref(py)?)
    }
}

// ============================================================================
// Loop thread
// ============================================================================

struct LoopContext {
    event_loop: Handle,
    run_forever: Handle,
    close: Handle,
    ensure_future: Handle,
    stop_when_done: Handle,
}

struct NativeTask {
    id: u64,
    future: Handle,
    completion: Option<oneshot::Sender<TaskOutcome>>,
}

fn loop_thread(receiver: Receiver<Request>, ready: Sender<InteropResult<WakeHandles>>) {
    let runtime = match Runtime::global() {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    // Held for the life of the thread; the runtime releases it internally
    // while the loop is idle.
    let py = runtime.acquire();

    let context = match loop_setup(&py) {
        Ok((context, wake)) => {
            let _ = ready.send(Ok(wake));
            context
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    pump(&py, &context, &receiver);

    if context.close.call0(&py).is_err() {
        debug!("event loop close failed");
        unsafe { (py.api().err_clear)() };
    }
    debug!("event loop thread exiting");
}

fn loop_setup(py: &GilGuard<'_>) -> InteropResult<(LoopContext, WakeHandles)> {
    let asyncio = handle::import_module(py, "asyncio")?;
    let event_loop = asyncio.getattr(py, "new_event_loop")?.call0(py)?;
    let run_forever = event_loop.getattr(py, "run_forever")?;
    let stop = event_loop.getattr(py, "stop")?;
    let call_soon_threadsafe = event_loop.getattr(py, "call_soon_threadsafe")?;
    let close = event_loop.getattr(py, "close")?;
    let ensure_future = asyncio.getattr(py, "ensure_future")?;
    let stop_when_done = handle::eval_expression(py, STOP_WHEN_DONE)?;

    let wake = WakeHandles {
        call_soon_threadsafe,
        stop,
    };
    let context = LoopContext {
        event_loop,
        run_forever,
        close,
        ensure_future,
        stop_when_done,
    };
    Ok((context, wake))
}

fn pump(py: &GilGuard<'_>, context: &LoopContext, receiver: &Receiver<Request>) {
    let mut tasks: Vec<NativeTask> = Vec::new();
    let mut stopping = false;

    loop {
        // Park until a completion callback or a host request stops the
        // loop.
        if let Err(err) = context.run_forever.call0(py) {
            warn!("event loop broke: {err}");
            for task in &mut tasks {
                if let Some(completion) = task.completion.take() {
                    let _ = completion.send(TaskOutcome::Error(InteropError::LoopShutDown));
                }
            }
            return;
        }

        while let Ok(request) = receiver.try_recv() {
            match request {
                Request::Schedule {
                    id,
                    awaitable,
                    completion,
                } => {
                    if stopping {
                        let _ = completion.send(TaskOutcome::Cancelled);
                        continue;
                    }
                    match submit(py, context, &awaitable) {
                        Ok(future) => tasks.push(NativeTask {
                            id,
                            future,
                            completion: Some(completion),
                        }),
                        Err(err) => {
                            let _ = completion.send(TaskOutcome::Error(err));
                        }
                    }
                }
                Request::Cancel { id } => {
                    // Unknown ids already concluded; cancelling them is a
                    // no-op.
                    if let Some(task) = tasks.iter().find(|task| task.id == id) {
                        request_native_cancel(py, &task.future);
                    }
                }
                Request::Shutdown => {
                    stopping = true;
                    for task in &tasks {
                        request_native_cancel(py, &task.future);
                    }
                }
            }
        }

        tasks.retain_mut(|task| match conclude(py, &task.future) {
            Ok(None) => true,
            Ok(Some(outcome)) => {
                trace!(id = task.id, "task concluded");
                if let Some(completion) = task.completion.take() {
                    let _ = completion.send(outcome);
                }
                false
            }
            Err(err) => {
                if let Some(completion) = task.completion.take() {
                    let _ = completion.send(TaskOutcome::Error(err));
                }
                false
            }
        });

        if stopping && tasks.is_empty() {
            return;
        }
    }
}

/// Submit one awaitable to the native loop and attach the stop callback.
fn submit(py: &GilGuard<'_>, context: &LoopContext, awaitable: &Handle) -> InteropResult<Handle> {
    let args = handle::new_tuple(py, &[awaitable])?;
    let kwargs = unsafe { Handle::from_new_reference(py, (py.api().dict_new)()) }?;
    let key = crate::convert::encode(&"loop", py)?;
    let rc = unsafe {
        (py.api().dict_set_item)(kwargs.as_ptr(), key.as_ptr(), context.event_loop.as_ptr())
    };
    if rc != 0 {
        return Err(except::take_pending(py, "kwargs store"));
    }
    let future = context.ensure_future.call_with(py, &args, Some(&kwargs))?;
    future
        .getattr(py, "add_done_callback")?
        .call(py, &[&context.stop_when_done])?;
    Ok(future)
}

fn request_native_cancel(py: &GilGuard<'_>, future: &Handle) {
    let cancelled = future
        .getattr(py, "cancel")
        .and_then(|cancel| cancel.call0(py));
    if cancelled.is_err() {
        debug!("future cancel request failed");
        unsafe { (py.api().err_clear)() };
    }
}

/// Check one future for conclusion.
///
/// The order is fixed: not done keeps the task; a done future reports
/// cancellation first, then its exception, then its result. A stop
/// signal raised as the "exception" carries the awaitable's terminal
/// value and is reported as a normal result.
fn conclude(py: &GilGuard<'_>, future: &Handle) -> InteropResult<Option<TaskOutcome>> {
    let done = future.getattr(py, "done")?.call0(py)?.is_truthy(py)?;
    if !done {
        return Ok(None);
    }

    let cancelled = future.getattr(py, "cancelled")?.call0(py)?.is_truthy(py)?;
    if cancelled {
        return Ok(Some(TaskOutcome::Cancelled));
    }

    let exception = future.getattr(py, "exception")?.call0(py)?;
    if !exception.is_none(py) {
        let matches_stop = unsafe {
            (py.api().err_given_exception_matches)(
                exception.as_ptr(),
                py.api().exc_stop_iteration,
            )
        } != 0;
        if matches_stop {
            let value = if exception.hasattr(py, "value")? {
                exception.getattr(py, "value")?
            } else {
                Handle::none(py)
            };
            return Ok(Some(TaskOutcome::Value(value)));
        }
        return Ok(Some(TaskOutcome::Error(InteropError::Python(
            PythonException::from_exception_object(py, exception),
        ))));
    }

    let result = future.getattr(py, "result")?.call0(py)?;
    Ok(Some(TaskOutcome::Value(result)))
}
