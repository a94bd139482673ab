//! The table: every entry point, backed by the double's object model.

use std::ffi::{c_char, c_int, CStr};
use std::sync::OnceLock;

use krait_abi::{NativeApi, RawBuffer, RawObject, RawObjectPtr, RawThreadState, PYBUF_WRITABLE};
use parking_lot::Mutex;

use crate::calls;
use crate::errors;
use crate::lock;
use crate::object::{self, alloc, decref, incref, obj, Builtin, FnKind, IterState, Value};
use crate::singletons::{sing, type_of};

fn cstr<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

fn ok_or_null(result: Result<RawObjectPtr, ()>) -> RawObjectPtr {
    result.unwrap_or(std::ptr::null_mut())
}

// ============================================================================
// Lifecycle and lock
// ============================================================================

unsafe extern "C" fn tb_initialize(_install_signal_handlers: c_int) {}

unsafe extern "C" fn tb_is_initialized() -> c_int {
    1
}

unsafe extern "C" fn tb_finalize() -> c_int {
    0
}

unsafe extern "C" fn tb_eval_save_thread() -> *mut RawThreadState {
    std::ptr::null_mut()
}

unsafe extern "C" fn tb_gil_ensure() -> c_int {
    lock::acquire();
    0
}

unsafe extern "C" fn tb_gil_release(_cookie: c_int) {
    lock::release();
}

// ============================================================================
// Reference counting
// ============================================================================

unsafe extern "C" fn tb_incref(ptr: *mut RawObject) {
    incref(ptr);
}

unsafe extern "C" fn tb_decref(ptr: *mut RawObject) {
    decref(ptr);
}

// ============================================================================
// Object protocol
// ============================================================================

unsafe extern "C" fn tb_getattr(target: RawObjectPtr, name: *const c_char) -> RawObjectPtr {
    ok_or_null(calls::getattr_impl(target, cstr(name)))
}

unsafe extern "C" fn tb_hasattr(target: RawObjectPtr, name: *const c_char) -> c_int {
    c_int::from(calls::hasattr_impl(target, cstr(name)))
}

unsafe extern "C" fn tb_call_no_args(callable: RawObjectPtr) -> RawObjectPtr {
    ok_or_null(calls::invoke(callable, &[], std::ptr::null_mut()))
}

unsafe extern "C" fn tb_call(
    callable: RawObjectPtr,
    args: RawObjectPtr,
    kwargs: RawObjectPtr,
) -> RawObjectPtr {
    let arg_items: Vec<RawObjectPtr> = match &obj(args).value {
        Value::Tuple(items) => items.lock().clone(),
        _ => {
            errors::raise(sing().exc_type_error, "argument list must be a tuple");
            return std::ptr::null_mut();
        }
    };
    ok_or_null(calls::invoke(callable, &arg_items, kwargs))
}

unsafe extern "C" fn tb_object_str(target: RawObjectPtr) -> RawObjectPtr {
    object::new_str(calls::render(target))
}

unsafe extern "C" fn tb_object_repr(target: RawObjectPtr) -> RawObjectPtr {
    let repr = match &obj(target).value {
        Value::Str { text, .. } => format!("'{text}'"),
        _ => calls::render(target),
    };
    object::new_str(repr)
}

unsafe extern "C" fn tb_object_type(target: RawObjectPtr) -> RawObjectPtr {
    let ty = type_of(target);
    incref(ty);
    ty
}

unsafe extern "C" fn tb_is_true(target: RawObjectPtr) -> c_int {
    c_int::from(calls::truthy(target))
}

unsafe extern "C" fn tb_rich_compare_bool(
    a: RawObjectPtr,
    b: RawObjectPtr,
    op: c_int,
) -> c_int {
    match calls::compare(a, b, op) {
        Ok(result) => c_int::from(result),
        Err(()) => -1,
    }
}

unsafe extern "C" fn tb_get_iter(target: RawObjectPtr) -> RawObjectPtr {
    let items: Vec<RawObjectPtr> = match &obj(target).value {
        Value::List(items) => items.lock().clone(),
        Value::Tuple(items) => items.lock().clone(),
        Value::MappingProxy { pairs } => pairs.iter().map(|(key, _)| *key).collect(),
        Value::Generator(_) | Value::Iterator(_) => {
            incref(target);
            return target;
        }
        _ => {
            errors::raise(
                sing().exc_type_error,
                format!("'{}' object is not iterable", calls::type_name(target)),
            );
            return std::ptr::null_mut();
        }
    };
    for item in &items {
        incref(*item);
    }
    alloc(Value::Iterator(Mutex::new(IterState { items, pos: 0 })))
}

unsafe extern "C" fn tb_is_instance(target: RawObjectPtr, ty: RawObjectPtr) -> c_int {
    let s = sing();
    let target_type = type_of(target);
    let hit = target_type == ty
        // bool subclasses int
        || (target_type == s.type_bool && ty == s.type_int);
    c_int::from(hit)
}

// ============================================================================
// Scalars
// ============================================================================

unsafe extern "C" fn tb_long_from_i64(value: i64) -> RawObjectPtr {
    object::new_int(value)
}

unsafe extern "C" fn tb_long_as_i64(target: RawObjectPtr) -> i64 {
    match &obj(target).value {
        Value::Int(value) => *value,
        Value::Bool(value) => i64::from(*value),
        _ => {
            errors::raise(sing().exc_type_error, "an integer is required");
            -1
        }
    }
}

unsafe extern "C" fn tb_float_from_f64(value: f64) -> RawObjectPtr {
    alloc(Value::Float(value))
}

unsafe extern "C" fn tb_float_as_f64(target: RawObjectPtr) -> f64 {
    match &obj(target).value {
        Value::Float(value) => *value,
        Value::Int(value) => *value as f64,
        _ => {
            errors::raise(sing().exc_type_error, "a float is required");
            -1.0
        }
    }
}

unsafe extern "C" fn tb_str_from_utf8(data: *const c_char, size: isize) -> RawObjectPtr {
    let bytes = std::slice::from_raw_parts(data.cast::<u8>(), size.max(0) as usize);
    object::new_str(String::from_utf8_lossy(bytes).into_owned())
}

unsafe extern "C" fn tb_str_as_utf8(target: RawObjectPtr, size: *mut isize) -> *const c_char {
    match &obj(target).value {
        Value::Str { text, c } => {
            if !size.is_null() {
                *size = text.len() as isize;
            }
            c.as_ptr()
        }
        _ => {
            errors::raise(sing().exc_type_error, "a str is required");
            std::ptr::null()
        }
    }
}

unsafe extern "C" fn tb_bytes_from(data: *const c_char, size: isize) -> RawObjectPtr {
    let bytes = std::slice::from_raw_parts(data.cast::<u8>(), size.max(0) as usize);
    alloc(Value::Bytes(bytes.to_vec()))
}

unsafe extern "C" fn tb_bytes_as_ptr(
    target: RawObjectPtr,
    out_data: *mut *mut c_char,
    out_size: *mut isize,
) -> c_int {
    match &obj(target).value {
        Value::Bytes(data) => {
            *out_data = data.as_ptr() as *mut c_char;
            *out_size = data.len() as isize;
            0
        }
        _ => {
            errors::raise(sing().exc_type_error, "a bytes object is required");
            -1
        }
    }
}

// ============================================================================
// Containers
// ============================================================================

unsafe extern "C" fn tb_list_new(size: isize) -> RawObjectPtr {
    alloc(Value::List(Mutex::new(vec![
        std::ptr::null_mut();
        size.max(0) as usize
    ])))
}

unsafe extern "C" fn tb_list_size(target: RawObjectPtr) -> isize {
    match &obj(target).value {
        Value::List(items) => items.lock().len() as isize,
        _ => {
            errors::raise(sing().exc_type_error, "a list is required");
            -1
        }
    }
}

unsafe extern "C" fn tb_list_get_item(target: RawObjectPtr, index: isize) -> RawObjectPtr {
    match &obj(target).value {
        Value::List(items) => {
            let items = items.lock();
            match items.get(index.max(0) as usize) {
                // Borrowed reference, mirroring the native contract.
                Some(item) if !item.is_null() => *item,
                _ => {
                    errors::raise(sing().exc_value_error, "list index out of range");
                    std::ptr::null_mut()
                }
            }
        }
        _ => {
            errors::raise(sing().exc_type_error, "a list is required");
            std::ptr::null_mut()
        }
    }
}

unsafe extern "C" fn tb_list_set_item(
    target: RawObjectPtr,
    index: isize,
    item: RawObjectPtr,
) -> c_int {
    match &obj(target).value {
        Value::List(items) => {
            let mut items = items.lock();
            let index = index.max(0) as usize;
            if index >= items.len() {
                // Steals even on failure.
                decref(item);
                errors::raise(sing().exc_value_error, "list index out of range");
                return -1;
            }
            let old = std::mem::replace(&mut items[index], item);
            decref(old);
            0
        }
        _ => {
            decref(item);
            errors::raise(sing().exc_type_error, "a list is required");
            -1
        }
    }
}

unsafe extern "C" fn tb_tuple_new(size: isize) -> RawObjectPtr {
    alloc(Value::Tuple(Mutex::new(vec![
        std::ptr::null_mut();
        size.max(0) as usize
    ])))
}

unsafe extern "C" fn tb_tuple_size(target: RawObjectPtr) -> isize {
    match &obj(target).value {
        Value::Tuple(items) => items.lock().len() as isize,
        _ => {
            errors::raise(sing().exc_type_error, "a tuple is required");
            -1
        }
    }
}

unsafe extern "C" fn tb_tuple_get_item(target: RawObjectPtr, index: isize) -> RawObjectPtr {
    match &obj(target).value {
        Value::Tuple(items) => {
            let items = items.lock();
            match items.get(index.max(0) as usize) {
                Some(item) if !item.is_null() => *item,
                _ => {
                    errors::raise(sing().exc_value_error, "tuple index out of range");
                    std::ptr::null_mut()
                }
            }
        }
        _ => {
            errors::raise(sing().exc_type_error, "a tuple is required");
            std::ptr::null_mut()
        }
    }
}

unsafe extern "C" fn tb_tuple_set_item(
    target: RawObjectPtr,
    index: isize,
    item: RawObjectPtr,
) -> c_int {
    match &obj(target).value {
        Value::Tuple(items) => {
            let mut items = items.lock();
            let index = index.max(0) as usize;
            if index >= items.len() {
                decref(item);
                errors::raise(sing().exc_value_error, "tuple index out of range");
                return -1;
            }
            let old = std::mem::replace(&mut items[index], item);
            decref(old);
            0
        }
        _ => {
            decref(item);
            errors::raise(sing().exc_type_error, "a tuple is required");
            -1
        }
    }
}

unsafe extern "C" fn tb_dict_new() -> RawObjectPtr {
    alloc(Value::Dict(Mutex::new(Vec::new())))
}

unsafe extern "C" fn tb_dict_set_item(
    target: RawObjectPtr,
    key: RawObjectPtr,
    value: RawObjectPtr,
) -> c_int {
    match &obj(target).value {
        Value::Dict(entries) => {
            let mut entries = entries.lock();
            incref(key);
            incref(value);
            if let Some(slot) = entries
                .iter_mut()
                .find(|(existing, _)| object::value_eq(*existing, key))
            {
                decref(key);
                let old = std::mem::replace(&mut slot.1, value);
                decref(old);
            } else {
                entries.push((key, value));
            }
            0
        }
        _ => {
            errors::raise(sing().exc_type_error, "a dict is required");
            -1
        }
    }
}

unsafe extern "C" fn tb_mapping_items(target: RawObjectPtr) -> RawObjectPtr {
    match calls::getattr_impl(target, "items") {
        Ok(items_method) => {
            let result = calls::invoke(items_method, &[], std::ptr::null_mut());
            decref(items_method);
            ok_or_null(result)
        }
        Err(()) => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn tb_mapping_check(target: RawObjectPtr) -> c_int {
    c_int::from(matches!(
        &obj(target).value,
        Value::Dict(_) | Value::MappingProxy { .. }
    ))
}

unsafe extern "C" fn tb_sequence_check(target: RawObjectPtr) -> c_int {
    c_int::from(matches!(
        &obj(target).value,
        Value::List(_)
            | Value::Tuple(_)
            | Value::Str { .. }
            | Value::Bytes(_)
            | Value::MappingProxy { .. }
    ))
}

unsafe extern "C" fn tb_sequence_size(target: RawObjectPtr) -> isize {
    match &obj(target).value {
        Value::List(items) => items.lock().len() as isize,
        Value::Tuple(items) => items.lock().len() as isize,
        Value::Str { text, .. } => text.chars().count() as isize,
        Value::Bytes(data) => data.len() as isize,
        Value::MappingProxy { pairs } => pairs.len() as isize,
        _ => {
            errors::raise(sing().exc_type_error, "object has no length");
            -1
        }
    }
}

unsafe extern "C" fn tb_sequence_get_item(target: RawObjectPtr, index: isize) -> RawObjectPtr {
    let index = index.max(0) as usize;
    let out_of_range = || {
        errors::raise(sing().exc_value_error, "index out of range");
        std::ptr::null_mut()
    };
    match &obj(target).value {
        Value::List(items) => match items.lock().get(index) {
            Some(item) if !item.is_null() => {
                incref(*item);
                *item
            }
            _ => out_of_range(),
        },
        Value::Tuple(items) => match items.lock().get(index) {
            Some(item) if !item.is_null() => {
                incref(*item);
                *item
            }
            _ => out_of_range(),
        },
        Value::Str { text, .. } => match text.chars().nth(index) {
            Some(ch) => object::new_str(ch.to_string()),
            None => out_of_range(),
        },
        Value::Bytes(data) => match data.get(index) {
            Some(byte) => object::new_int(i64::from(*byte)),
            None => out_of_range(),
        },
        Value::MappingProxy { pairs } => match pairs.get(index) {
            Some((key, _)) => {
                incref(*key);
                *key
            }
            None => out_of_range(),
        },
        _ => {
            errors::raise(sing().exc_type_error, "object is not indexable");
            std::ptr::null_mut()
        }
    }
}

// ============================================================================
// Iteration
// ============================================================================

unsafe extern "C" fn tb_iter_next(target: RawObjectPtr) -> RawObjectPtr {
    let s = sing();
    match &obj(target).value {
        Value::Iterator(state) => {
            let mut state = state.lock();
            if state.pos < state.items.len() {
                // Ownership of the item transfers to the caller.
                let item = state.items[state.pos];
                state.pos += 1;
                item
            } else {
                std::ptr::null_mut()
            }
        }
        Value::Generator(_) => {
            match calls::gen_send(target, s.none) {
                Ok(item) => item,
                Err(()) => {
                    // Plain exhaustion is null without an error.
                    if errors::occurred() == s.exc_stop_iteration {
                        errors::clear();
                    }
                    std::ptr::null_mut()
                }
            }
        }
        _ => {
            errors::raise(s.exc_type_error, "object is not an iterator");
            std::ptr::null_mut()
        }
    }
}

// ============================================================================
// Error indicator
// ============================================================================

unsafe extern "C" fn tb_err_occurred() -> RawObjectPtr {
    errors::occurred()
}

unsafe extern "C" fn tb_err_fetch(
    out_ty: *mut RawObjectPtr,
    out_value: *mut RawObjectPtr,
    out_traceback: *mut RawObjectPtr,
) {
    errors::fetch(out_ty, out_value, out_traceback);
}

unsafe extern "C" fn tb_err_clear() {
    errors::clear();
}

unsafe extern "C" fn tb_err_given_exception_matches(
    given: RawObjectPtr,
    ty: RawObjectPtr,
) -> c_int {
    c_int::from(errors::exception_matches(given, ty))
}

// ============================================================================
// Imports and evaluation
// ============================================================================

unsafe extern "C" fn tb_import_module(name: *const c_char) -> RawObjectPtr {
    match cstr(name) {
        "asyncio" => alloc(Value::Module {
            attrs: vec![
                (
                    "new_event_loop",
                    alloc(Value::Builtin(Builtin::Function(FnKind::NewEventLoop))),
                ),
                (
                    "ensure_future",
                    alloc(Value::Builtin(Builtin::Function(FnKind::EnsureFuture))),
                ),
            ],
        }),
        "traceback" => alloc(Value::Module {
            attrs: vec![(
                "format_tb",
                alloc(Value::Builtin(Builtin::Function(FnKind::FormatTb))),
            )],
        }),
        other => {
            errors::raise(
                sing().exc_runtime_error,
                format!("no module named '{other}'"),
            );
            std::ptr::null_mut()
        }
    }
}

const STOP_WHEN_DONE_SOURCE: &str = "lambda fut: fut.get_loop().stop()";

unsafe extern "C" fn tb_run_string(
    code: *const c_char,
    _start: c_int,
    _globals: RawObjectPtr,
    _locals: RawObjectPtr,
) -> RawObjectPtr {
    if cstr(code) == STOP_WHEN_DONE_SOURCE {
        alloc(Value::Builtin(Builtin::StopWhenDone))
    } else {
        errors::raise(sing().exc_runtime_error, "unsupported source");
        std::ptr::null_mut()
    }
}

// ============================================================================
// Buffers
// ============================================================================

unsafe extern "C" fn tb_check_buffer(target: RawObjectPtr) -> c_int {
    c_int::from(matches!(&obj(target).value, Value::BufferExporter(_)))
}

unsafe extern "C" fn tb_get_buffer(
    target: RawObjectPtr,
    raw: *mut RawBuffer,
    flags: c_int,
) -> c_int {
    let Value::BufferExporter(state) = &obj(target).value else {
        errors::raise(
            sing().exc_type_error,
            "object does not export the buffer protocol",
        );
        return -1;
    };
    let mut state = state.lock();
    if flags & PYBUF_WRITABLE != 0 && state.readonly {
        errors::raise(sing().exc_type_error, "buffer is not writable");
        return -1;
    }
    state.exports += 1;
    incref(target);
    let out = &mut *raw;
    out.buf = state.data.as_ptr() as *mut std::ffi::c_void;
    out.obj = target;
    out.len = state.data.len() as isize;
    out.itemsize = state.itemsize;
    out.readonly = c_int::from(state.readonly);
    out.ndim = state.shape.len() as c_int;
    out.format = state.format.as_ptr();
    out.shape = state.shape.as_ptr() as *mut isize;
    out.strides = state
        .strides
        .as_ref()
        .map_or(std::ptr::null_mut(), |strides| {
            strides.as_ptr() as *mut isize
        });
    out.suboffsets = std::ptr::null_mut();
    out.internal = std::ptr::null_mut();
    0
}

unsafe extern "C" fn tb_release_buffer(raw: *mut RawBuffer) {
    let raw = &mut *raw;
    if raw.obj.is_null() {
        return;
    }
    if let Value::BufferExporter(state) = &obj(raw.obj).value {
        let mut state = state.lock();
        state.exports = state.exports.saturating_sub(1);
    }
    decref(raw.obj);
    raw.obj = std::ptr::null_mut();
    raw.buf = std::ptr::null_mut();
}

// ============================================================================
// Table construction
// ============================================================================

/// The double's complete function table. Built once and leaked.
pub fn native_api() -> &'static NativeApi {
    static API: OnceLock<NativeApi> = OnceLock::new();
    API.get_or_init(|| {
        let s = sing();
        NativeApi {
            initialize: tb_initialize,
            is_initialized: tb_is_initialized,
            finalize: tb_finalize,
            eval_save_thread: tb_eval_save_thread,

            gil_ensure: tb_gil_ensure,
            gil_release: tb_gil_release,

            incref: tb_incref,
            decref: tb_decref,

            getattr: tb_getattr,
            hasattr: tb_hasattr,
            call_no_args: tb_call_no_args,
            call: tb_call,
            object_str: tb_object_str,
            object_repr: tb_object_repr,
            object_type: tb_object_type,
            is_true: tb_is_true,
            rich_compare_bool: tb_rich_compare_bool,
            get_iter: tb_get_iter,
            is_instance: tb_is_instance,

            long_from_i64: tb_long_from_i64,
            long_as_i64: tb_long_as_i64,
            float_from_f64: tb_float_from_f64,
            float_as_f64: tb_float_as_f64,
            str_from_utf8: tb_str_from_utf8,
            str_as_utf8: tb_str_as_utf8,
            bytes_from: tb_bytes_from,
            bytes_as_ptr: tb_bytes_as_ptr,

            list_new: tb_list_new,
            list_size: tb_list_size,
            list_get_item: tb_list_get_item,
            list_set_item: tb_list_set_item,
            tuple_new: tb_tuple_new,
            tuple_size: tb_tuple_size,
            tuple_get_item: tb_tuple_get_item,
            tuple_set_item: tb_tuple_set_item,
            dict_new: tb_dict_new,
            dict_set_item: tb_dict_set_item,
            mapping_items: tb_mapping_items,
            mapping_check: tb_mapping_check,
            sequence_check: tb_sequence_check,
            sequence_size: tb_sequence_size,
            sequence_get_item: tb_sequence_get_item,

            iter_next: tb_iter_next,

            err_occurred: tb_err_occurred,
            err_fetch: tb_err_fetch,
            err_clear: tb_err_clear,
            err_given_exception_matches: tb_err_given_exception_matches,

            import_module: tb_import_module,
            run_string: tb_run_string,

            check_buffer: tb_check_buffer,
            get_buffer: tb_get_buffer,
            release_buffer: tb_release_buffer,

            none: s.none,
            true_obj: s.true_obj,
            false_obj: s.false_obj,
            dict_type: s.type_dict,
            list_type: s.type_list,
            tuple_type: s.type_tuple,
            str_type: s.type_str,
            long_type: s.type_int,
            float_type: s.type_float,
            bool_type: s.type_bool,
            bytes_type: s.type_bytes,
            gen_type: s.type_generator,
            coro_type: s.type_coroutine,
            exc_stop_iteration: s.exc_stop_iteration,
            exc_stop_async_iteration: s.exc_stop_async_iteration,
        }
    })
}
