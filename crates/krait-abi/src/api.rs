//! The native runtime function table.
//!
//! `NativeApi` enumerates every native entry point the interop core is
//! allowed to call, as plain `unsafe extern "C"` function pointers, plus a
//! handful of process-immortal object addresses (singletons, builtin type
//! objects, exception types).
//!
//! Reference semantics are part of the contract and are documented on every
//! field: **new** means the caller receives a reference it must eventually
//! release; **borrowed** means the pointer is only valid while its owner is
//! alive and must be cloned before being stored; **steals** means the callee
//! takes over the caller's reference even on failure. Misclassifying one of
//! these is the most consequential bug class in the whole system, which is
//! why the classification lives here, next to the pointer, and not at call
//! sites.
//!
//! Every function in this table must only be invoked while the interpreter
//! lock is held by the calling thread, with the exception of `gil_ensure`,
//! `is_initialized` and `initialize`.

use std::ffi::{c_char, c_int};

use crate::buffer::RawBuffer;
use crate::object::{RawObject, RawThreadState};

/// Rich-comparison operation selector, matching the native `Py_LT`..`Py_GE`
/// constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CompareOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

/// Function table over the embedded runtime's C ABI.
///
/// Constructed once per process, either by [`crate::loader::load_native_api`]
/// (resolving exported `libpython` symbols) or by an embedding test double.
/// The table is immutable after construction and shared across all threads.
pub struct NativeApi {
    // ------------------------------------------------------------------
    // Interpreter lifecycle
    // ------------------------------------------------------------------
    /// `Py_InitializeEx`. Argument 0 suppresses signal-handler install.
    pub initialize: unsafe extern "C" fn(c_int),
    /// `Py_IsInitialized`.
    pub is_initialized: unsafe extern "C" fn() -> c_int,
    /// `Py_FinalizeEx`.
    pub finalize: unsafe extern "C" fn() -> c_int,
    /// `PyEval_SaveThread`. Releases the lock held by the initializing
    /// thread and returns its thread state (never inspected host-side).
    pub eval_save_thread: unsafe extern "C" fn() -> *mut RawThreadState,

    // ------------------------------------------------------------------
    // Interpreter lock
    // ------------------------------------------------------------------
    /// `PyGILState_Ensure`. Blocks until the lock is held by this thread;
    /// returns an opaque state cookie for the matching release.
    pub gil_ensure: unsafe extern "C" fn() -> c_int,
    /// `PyGILState_Release`.
    pub gil_release: unsafe extern "C" fn(c_int),

    // ------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------
    /// `Py_IncRef`.
    pub incref: unsafe extern "C" fn(*mut RawObject),
    /// `Py_DecRef`.
    pub decref: unsafe extern "C" fn(*mut RawObject),

    // ------------------------------------------------------------------
    // Object protocol
    // ------------------------------------------------------------------
    /// `PyObject_GetAttrString`: new reference, or null with error set.
    pub getattr: unsafe extern "C" fn(*mut RawObject, *const c_char) -> *mut RawObject,
    /// `PyObject_HasAttrString`.
    pub hasattr: unsafe extern "C" fn(*mut RawObject, *const c_char) -> c_int,
    /// `PyObject_CallNoArgs`: new reference.
    pub call_no_args: unsafe extern "C" fn(*mut RawObject) -> *mut RawObject,
    /// `PyObject_Call(callable, args_tuple, kwargs_dict_or_null)`: new
    /// reference. `args_tuple` must be a tuple, never null.
    pub call: unsafe extern "C" fn(
        *mut RawObject,
        *mut RawObject,
        *mut RawObject,
    ) -> *mut RawObject,
    /// `PyObject_Str`: new reference.
    pub object_str: unsafe extern "C" fn(*mut RawObject) -> *mut RawObject,
    /// `PyObject_Repr`: new reference.
    pub object_repr: unsafe extern "C" fn(*mut RawObject) -> *mut RawObject,
    /// `PyObject_Type`: new reference to the object's type.
    pub object_type: unsafe extern "C" fn(*mut RawObject) -> *mut RawObject,
    /// `PyObject_IsTrue`: 1/0, or -1 with error set.
    pub is_true: unsafe extern "C" fn(*mut RawObject) -> c_int,
    /// `PyObject_RichCompareBool`: 1/0, or -1 with error set.
    pub rich_compare_bool: unsafe extern "C" fn(*mut RawObject, *mut RawObject, c_int) -> c_int,
    /// `PyObject_GetIter`: new reference, or null with error set.
    pub get_iter: unsafe extern "C" fn(*mut RawObject) -> *mut RawObject,
    /// `PyObject_IsInstance(obj, type)`: 1/0, or -1 with error set.
    pub is_instance: unsafe extern "C" fn(*mut RawObject, *mut RawObject) -> c_int,

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------
    /// `PyLong_FromLongLong`: new reference.
    pub long_from_i64: unsafe extern "C" fn(i64) -> *mut RawObject,
    /// `PyLong_AsLongLong`: -1 with error set on overflow or non-int.
    pub long_as_i64: unsafe extern "C" fn(*mut RawObject) -> i64,
    /// `PyFloat_FromDouble`: new reference.
    pub float_from_f64: unsafe extern "C" fn(f64) -> *mut RawObject,
    /// `PyFloat_AsDouble`: -1.0 with error set on non-float.
    pub float_as_f64: unsafe extern "C" fn(*mut RawObject) -> f64,
    /// `PyUnicode_FromStringAndSize`: new reference.
    pub str_from_utf8: unsafe extern "C" fn(*const c_char, isize) -> *mut RawObject,
    /// `PyUnicode_AsUTF8AndSize`: borrowed byte buffer owned by the string
    /// object; null with error set on non-string.
    pub str_as_utf8: unsafe extern "C" fn(*mut RawObject, *mut isize) -> *const c_char,
    /// `PyBytes_FromStringAndSize`: new reference.
    pub bytes_from: unsafe extern "C" fn(*const c_char, isize) -> *mut RawObject,
    /// `PyBytes_AsStringAndSize`: borrowed byte buffer; -1 with error set
    /// on non-bytes.
    pub bytes_as_ptr:
        unsafe extern "C" fn(*mut RawObject, *mut *mut c_char, *mut isize) -> c_int,

    // ------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------
    /// `PyList_New`: new reference; slots are null until filled.
    pub list_new: unsafe extern "C" fn(isize) -> *mut RawObject,
    /// `PyList_Size`.
    pub list_size: unsafe extern "C" fn(*mut RawObject) -> isize,
    /// `PyList_GetItem`: **borrowed** reference.
    pub list_get_item: unsafe extern "C" fn(*mut RawObject, isize) -> *mut RawObject,
    /// `PyList_SetItem`: **steals** the item reference, even on failure.
    pub list_set_item: unsafe extern "C" fn(*mut RawObject, isize, *mut RawObject) -> c_int,
    /// `PyTuple_New`: new reference; slots are null until filled.
    pub tuple_new: unsafe extern "C" fn(isize) -> *mut RawObject,
    /// `PyTuple_Size`.
    pub tuple_size: unsafe extern "C" fn(*mut RawObject) -> isize,
    /// `PyTuple_GetItem`: **borrowed** reference.
    pub tuple_get_item: unsafe extern "C" fn(*mut RawObject, isize) -> *mut RawObject,
    /// `PyTuple_SetItem`: **steals** the item reference, even on failure.
    pub tuple_set_item: unsafe extern "C" fn(*mut RawObject, isize, *mut RawObject) -> c_int,
    /// `PyDict_New`: new reference.
    pub dict_new: unsafe extern "C" fn() -> *mut RawObject,
    /// `PyDict_SetItem`: does **not** steal; increments both key and value.
    pub dict_set_item:
        unsafe extern "C" fn(*mut RawObject, *mut RawObject, *mut RawObject) -> c_int,
    /// `PyMapping_Items`: new reference to a list of `(key, value)` tuples.
    pub mapping_items: unsafe extern "C" fn(*mut RawObject) -> *mut RawObject,
    /// `PyMapping_Check`: structural mapping-protocol probe, no error.
    pub mapping_check: unsafe extern "C" fn(*mut RawObject) -> c_int,
    /// `PySequence_Check`: structural sequence-protocol probe, no error.
    pub sequence_check: unsafe extern "C" fn(*mut RawObject) -> c_int,
    /// `PySequence_Size`: -1 with error set if not sized.
    pub sequence_size: unsafe extern "C" fn(*mut RawObject) -> isize,
    /// `PySequence_GetItem`: **new** reference (unlike the list/tuple
    /// accessors above).
    pub sequence_get_item: unsafe extern "C" fn(*mut RawObject, isize) -> *mut RawObject,

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------
    /// `PyIter_Next`: new reference; null with no error set means the
    /// iterator is exhausted, null with error set is a failure.
    pub iter_next: unsafe extern "C" fn(*mut RawObject) -> *mut RawObject,

    // ------------------------------------------------------------------
    // Error indicator
    // ------------------------------------------------------------------
    /// `PyErr_Occurred`: **borrowed** reference to the pending exception
    /// type, or null if no error is set.
    pub err_occurred: unsafe extern "C" fn() -> *mut RawObject,
    /// `PyErr_Fetch`: transfers ownership of (type, value, traceback) to
    /// the caller and clears the indicator. Any output may be null.
    pub err_fetch: unsafe extern "C" fn(
        *mut *mut RawObject,
        *mut *mut RawObject,
        *mut *mut RawObject,
    ),
    /// `PyErr_Clear`.
    pub err_clear: unsafe extern "C" fn(),
    /// `PyErr_GivenExceptionMatches(given, exc_type)`.
    pub err_given_exception_matches:
        unsafe extern "C" fn(*mut RawObject, *mut RawObject) -> c_int,

    // ------------------------------------------------------------------
    // Import and evaluation
    // ------------------------------------------------------------------
    /// `PyImport_ImportModule`: new reference.
    pub import_module: unsafe extern "C" fn(*const c_char) -> *mut RawObject,
    /// `PyRun_String(code, start, globals, locals)`: new reference. The
    /// interop core only ever passes [`PY_EVAL_INPUT`] with fresh dicts.
    pub run_string: unsafe extern "C" fn(
        *const c_char,
        c_int,
        *mut RawObject,
        *mut RawObject,
    ) -> *mut RawObject,

    // ------------------------------------------------------------------
    // Buffer protocol
    // ------------------------------------------------------------------
    /// `PyObject_CheckBuffer`: structural probe, no error.
    pub check_buffer: unsafe extern "C" fn(*mut RawObject) -> c_int,
    /// `PyObject_GetBuffer`: fills `view` and takes an export on success
    /// (0); -1 with error set on failure.
    pub get_buffer: unsafe extern "C" fn(*mut RawObject, *mut RawBuffer, c_int) -> c_int,
    /// `PyBuffer_Release`: releases the export exactly once.
    pub release_buffer: unsafe extern "C" fn(*mut RawBuffer),

    // ------------------------------------------------------------------
    // Immortal objects and type addresses (all borrowed, never released)
    // ------------------------------------------------------------------
    /// The `None` singleton (`_Py_NoneStruct`).
    pub none: *mut RawObject,
    /// The `True` singleton (`_Py_TrueStruct`).
    pub true_obj: *mut RawObject,
    /// The `False` singleton (`_Py_FalseStruct`).
    pub false_obj: *mut RawObject,
    /// `PyDict_Type`.
    pub dict_type: *mut RawObject,
    /// `PyList_Type`.
    pub list_type: *mut RawObject,
    /// `PyTuple_Type`.
    pub tuple_type: *mut RawObject,
    /// `PyUnicode_Type`.
    pub str_type: *mut RawObject,
    /// `PyLong_Type`.
    pub long_type: *mut RawObject,
    /// `PyFloat_Type`.
    pub float_type: *mut RawObject,
    /// `PyBool_Type`.
    pub bool_type: *mut RawObject,
    /// `PyBytes_Type`.
    pub bytes_type: *mut RawObject,
    /// `PyGen_Type`.
    pub gen_type: *mut RawObject,
    /// `PyCoro_Type`.
    pub coro_type: *mut RawObject,
    /// `PyExc_StopIteration`.
    pub exc_stop_iteration: *mut RawObject,
    /// `PyExc_StopAsyncIteration`.
    pub exc_stop_async_iteration: *mut RawObject,
}

/// Start token for [`NativeApi::run_string`]: evaluate a single expression
/// (the native `Py_eval_input` constant).
pub const PY_EVAL_INPUT: c_int = 258;

// The table holds only immortal addresses and stateless function pointers;
// all mutation happens inside the runtime under its own lock.
unsafe impl Send for NativeApi {}
unsafe impl Sync for NativeApi {}

impl NativeApi {
    /// Buffer-request flags used by the interop core: item format plus full
    /// shape/stride information.
    pub const BUFFER_REQUEST: c_int =
        crate::buffer::PYBUF_FORMAT | crate::buffer::PYBUF_STRIDES;
}

impl std::fmt::Debug for NativeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeApi")
            .field("none", &self.none)
            .field("true_obj", &self.true_obj)
            .field("false_obj", &self.false_obj)
            .finish_non_exhaustive()
    }
}
