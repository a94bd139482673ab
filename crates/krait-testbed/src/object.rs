//! The double's object model.
//!
//! Every object handed across the table is a leaked [`TbObject`] with an
//! explicit reference count. A count reaching zero destroys the object
//! and releases the references it owns, so refcount bugs in the layer
//! under test become observable leaks or double frees here.

use std::ffi::CString;
use std::sync::atomic::{AtomicIsize, Ordering};

use krait_abi::RawObjectPtr;
use parking_lot::{Condvar, Mutex};

/// Reference count given to singletons so they are never destroyed.
pub(crate) const IMMORTAL: isize = 1 << 40;

pub(crate) struct TbObject {
    pub refcount: AtomicIsize,
    pub value: Value,
}

// All mutation is either atomic (refcount) or behind a Mutex, and raw
// child pointers are only dereferenced through this module.
unsafe impl Send for TbObject {}
unsafe impl Sync for TbObject {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeKind {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List,
    Tuple,
    Dict,
    Generator,
    AsyncGenerator,
    Coroutine,
    Module,
    Traceback,
    Builtin,
    Future,
    EventLoop,
    Iterator,
    MappingProxy,
    BufferExporter,
    Exception(&'static str),
}

impl TypeKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::Bytes => "bytes",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Generator => "generator",
            TypeKind::AsyncGenerator => "async_generator",
            TypeKind::Coroutine => "coroutine",
            TypeKind::Module => "module",
            TypeKind::Traceback => "traceback",
            TypeKind::Builtin => "builtin_function_or_method",
            TypeKind::Future => "Future",
            TypeKind::EventLoop => "EventLoop",
            TypeKind::Iterator => "iterator",
            TypeKind::MappingProxy => "mappingproxy",
            TypeKind::BufferExporter => "memoryview",
            TypeKind::Exception(name) => name,
        }
    }
}

pub(crate) struct ExceptionData {
    /// Borrowed pointer to the immortal exception type object.
    pub ty: RawObjectPtr,
    pub message: String,
    /// Owned; the terminal value a stop signal carries.
    pub value_attr: Option<RawObjectPtr>,
    /// Owned traceback object, if attached.
    pub traceback: Option<RawObjectPtr>,
}

pub(crate) struct GeneratorState {
    /// Owned values yielded in order.
    pub yields: Vec<RawObjectPtr>,
    /// Owned terminal value raised with the stop signal.
    pub terminal: RawObjectPtr,
    /// Raise at this resume index instead of yielding.
    pub fail_at: Option<(usize, String)>,
    /// Yield the sent value back instead of the scripted one.
    pub echo: bool,
    pub pos: usize,
    pub finished: bool,
    pub closed: bool,
}

pub(crate) struct AsyncGenState {
    /// Owned items not yet pulled; each `__anext__` wraps the next one in
    /// a fresh awaitable.
    pub items: Vec<RawObjectPtr>,
    pub pos: usize,
    /// Fail the awaitable produced at this pull index instead of yielding.
    pub fail_at: Option<(usize, String)>,
}

pub(crate) enum CoroOutcome {
    /// Conclude with this owned value.
    Value(RawObjectPtr),
    /// Conclude with an exception of the named type.
    Error { ty: RawObjectPtr, message: String },
    /// Conclude with a stop signal carrying this owned terminal value.
    StopSignal(RawObjectPtr),
    /// Never conclude on its own; only cancellation ends it.
    Pending,
}

pub(crate) struct CoroPlan {
    /// Loop cycles before the outcome applies.
    pub countdown: u32,
    pub outcome: CoroOutcome,
    /// Set once handed to `ensure_future`.
    pub consumed: bool,
}

pub(crate) enum Concluded {
    Cancelled,
    /// Owned result value.
    Value(RawObjectPtr),
    /// Owned exception instance.
    Error(RawObjectPtr),
}

pub(crate) struct FutureState {
    pub countdown: u32,
    pub outcome: CoroOutcome,
    pub concluded: Option<Concluded>,
    /// Owned done callbacks, run once after conclusion.
    pub callbacks: Vec<RawObjectPtr>,
    pub callbacks_pending: bool,
    /// Owned reference to the loop driving this future.
    pub event_loop: RawObjectPtr,
}

pub(crate) struct LoopState {
    /// Owned callbacks queued by `call_soon_threadsafe`.
    pub callbacks: Vec<RawObjectPtr>,
    /// Owned futures driven by this loop.
    pub futures: Vec<RawObjectPtr>,
    pub stop_requested: bool,
    pub closed: bool,
}

pub(crate) struct LoopObject {
    pub state: Mutex<LoopState>,
    /// Parking spot for `run_forever`; woken by threadsafe callbacks.
    pub wake: Mutex<bool>,
    pub wake_cv: Condvar,
}

pub(crate) struct IterState {
    /// Owned items not yet handed out.
    pub items: Vec<RawObjectPtr>,
    pub pos: usize,
}

pub(crate) struct ExporterState {
    pub data: Vec<u8>,
    pub format: CString,
    pub itemsize: isize,
    pub shape: Vec<isize>,
    pub strides: Option<Vec<isize>>,
    pub readonly: bool,
    /// Outstanding exports; incremented on get, decremented on release.
    pub exports: usize,
}

pub(crate) enum MethodKind {
    GenSend,
    GenClose,
    AiterSelf,
    AnextStep,
    LoopRunForever,
    LoopStop,
    LoopCallSoonThreadsafe,
    LoopClose,
    FutDone,
    FutCancelled,
    FutException,
    FutResult,
    FutCancel,
    FutAddDoneCallback,
    MapItems,
}

pub(crate) enum FnKind {
    NewEventLoop,
    EnsureFuture,
    FormatTb,
}

pub(crate) enum Builtin {
    /// A method bound to an owned receiver.
    Method {
        recv: RawObjectPtr,
        kind: MethodKind,
    },
    Function(FnKind),
    /// The loop-stopping done callback produced by evaluating the
    /// well-known lambda.
    StopWhenDone,
}

pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str { text: String, c: CString },
    Bytes(Vec<u8>),
    List(Mutex<Vec<RawObjectPtr>>),
    Tuple(Mutex<Vec<RawObjectPtr>>),
    Dict(Mutex<Vec<(RawObjectPtr, RawObjectPtr)>>),
    Type(TypeKind),
    Module {
        attrs: Vec<(&'static str, RawObjectPtr)>,
    },
    Exception(ExceptionData),
    Traceback {
        frames: Vec<String>,
    },
    Generator(Mutex<GeneratorState>),
    AsyncGenerator(Mutex<AsyncGenState>),
    Coroutine(Mutex<CoroPlan>),
    EventLoop(LoopObject),
    Future(Mutex<FutureState>),
    Iterator(Mutex<IterState>),
    MappingProxy {
        /// Owned key/value pairs, insertion-ordered.
        pairs: Vec<(RawObjectPtr, RawObjectPtr)>,
    },
    BufferExporter(Mutex<ExporterState>),
    Builtin(Builtin),
}

// ============================================================================
// Allocation and reference counting
// ============================================================================

pub(crate) fn alloc(value: Value) -> RawObjectPtr {
    Box::into_raw(Box::new(TbObject {
        refcount: AtomicIsize::new(1),
        value,
    }))
    .cast()
}

pub(crate) fn alloc_immortal(value: Value) -> RawObjectPtr {
    Box::into_raw(Box::new(TbObject {
        refcount: AtomicIsize::new(IMMORTAL),
        value,
    }))
    .cast()
}

/// Borrow the object behind a table pointer.
///
/// # Safety
///
/// `ptr` must come from [`alloc`]/[`alloc_immortal`] and still be alive.
pub(crate) unsafe fn obj<'a>(ptr: RawObjectPtr) -> &'a TbObject {
    &*ptr.cast::<TbObject>()
}

pub(crate) fn incref(ptr: RawObjectPtr) {
    if !ptr.is_null() {
        unsafe { obj(ptr) }.refcount.fetch_add(1, Ordering::AcqRel);
    }
}

pub(crate) fn decref(ptr: RawObjectPtr) {
    if ptr.is_null() {
        return;
    }
    let previous = unsafe { obj(ptr) }.refcount.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0, "refcount underflow");
    if previous == 1 {
        destroy(ptr);
    }
}

/// Current reference count, for leak assertions in tests.
pub fn refcount(ptr: RawObjectPtr) -> isize {
    if ptr.is_null() {
        return 0;
    }
    unsafe { obj(ptr) }.refcount.load(Ordering::Acquire)
}

fn destroy(ptr: RawObjectPtr) {
    let boxed = unsafe { Box::from_raw(ptr.cast::<TbObject>()) };
    match boxed.value {
        Value::None
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::Str { .. }
        | Value::Bytes(_)
        | Value::Type(_)
        | Value::Traceback { .. }
        | Value::BufferExporter(_) => {}
        Value::List(items) => {
            for item in items.into_inner() {
                decref(item);
            }
        }
        Value::Tuple(items) => {
            for item in items.into_inner() {
                decref(item);
            }
        }
        Value::Dict(entries) => {
            for (key, value) in entries.into_inner() {
                decref(key);
                decref(value);
            }
        }
        Value::Module { attrs } => {
            for (_, value) in attrs {
                decref(value);
            }
        }
        Value::Exception(data) => {
            if let Some(value) = data.value_attr {
                decref(value);
            }
            if let Some(traceback) = data.traceback {
                decref(traceback);
            }
        }
        Value::Generator(state) => {
            let state = state.into_inner();
            for item in state.yields {
                decref(item);
            }
            decref(state.terminal);
        }
        Value::AsyncGenerator(state) => {
            let state = state.into_inner();
            for item in state.items.into_iter().skip(state.pos) {
                decref(item);
            }
        }
        Value::Coroutine(plan) => {
            let plan = plan.into_inner();
            match plan.outcome {
                CoroOutcome::Value(value) | CoroOutcome::StopSignal(value) => decref(value),
                CoroOutcome::Error { .. } | CoroOutcome::Pending => {}
            }
        }
        Value::EventLoop(event_loop) => {
            let state = event_loop.state.into_inner();
            for callback in state.callbacks {
                decref(callback);
            }
            for future in state.futures {
                decref(future);
            }
        }
        Value::Future(state) => {
            let state = state.into_inner();
            match state.outcome {
                CoroOutcome::Value(value) | CoroOutcome::StopSignal(value) => decref(value),
                CoroOutcome::Error { .. } | CoroOutcome::Pending => {}
            }
            match state.concluded {
                Some(Concluded::Value(value)) | Some(Concluded::Error(value)) => decref(value),
                Some(Concluded::Cancelled) | None => {}
            }
            for callback in state.callbacks {
                decref(callback);
            }
            decref(state.event_loop);
        }
        Value::Iterator(state) => {
            let state = state.into_inner();
            for item in state.items.into_iter().skip(state.pos) {
                decref(item);
            }
        }
        Value::MappingProxy { pairs } => {
            for (key, value) in pairs {
                decref(key);
                decref(value);
            }
        }
        Value::Builtin(builtin) => {
            if let Builtin::Method { recv, .. } = builtin {
                decref(recv);
            }
        }
    }
}

// ============================================================================
// Construction helpers
// ============================================================================

pub(crate) fn new_str(text: impl Into<String>) -> RawObjectPtr {
    let text = text.into();
    let c = CString::new(text.clone()).unwrap_or_default();
    alloc(Value::Str { text, c })
}

pub(crate) fn new_int(value: i64) -> RawObjectPtr {
    alloc(Value::Int(value))
}

/// Structural equality for dict keys and comparisons. The runtime's bool
/// compares equal to its int value.
pub(crate) fn value_eq(a: RawObjectPtr, b: RawObjectPtr) -> bool {
    if a == b {
        return true;
    }
    let (a, b) = unsafe { (obj(a), obj(b)) };
    match (&a.value, &b.value) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Bool(x), Value::Int(y)) | (Value::Int(y), Value::Bool(x)) => {
            i64::from(*x) == *y
        }
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Str { text: x, .. }, Value::Str { text: y, .. }) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::None, Value::None) => true,
        _ => false,
    }
}
