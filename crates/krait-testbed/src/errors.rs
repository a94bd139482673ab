//! Per-thread error indicator.
//!
//! Mirrors the real runtime's contract: raising stores a (type, value,
//! traceback) triple for the current thread, fetching transfers
//! ownership of all three and clears the slot.

use std::cell::RefCell;

use krait_abi::RawObjectPtr;

use crate::object::{alloc, decref, incref, ExceptionData, Value};

struct Pending {
    /// Borrowed immortal type object.
    ty: RawObjectPtr,
    /// Owned exception instance.
    value: RawObjectPtr,
    /// Owned traceback, or null.
    traceback: RawObjectPtr,
}

thread_local! {
    static PENDING: RefCell<Option<Pending>> = const { RefCell::new(None) };
}

/// Build an exception instance of `ty`.
pub(crate) fn new_exception(
    ty: RawObjectPtr,
    message: impl Into<String>,
    value_attr: Option<RawObjectPtr>,
    frames: Vec<String>,
) -> RawObjectPtr {
    let traceback = if frames.is_empty() {
        None
    } else {
        Some(alloc(Value::Traceback { frames }))
    };
    alloc(Value::Exception(ExceptionData {
        ty,
        message: message.into(),
        value_attr,
        traceback,
    }))
}

/// Raise an exception of `ty` with `message` on the current thread.
pub(crate) fn raise(ty: RawObjectPtr, message: impl Into<String>) {
    let value = new_exception(ty, message, None, Vec::new());
    set(ty, value);
}

/// Raise with scripted traceback frames attached.
pub(crate) fn raise_with_frames(ty: RawObjectPtr, message: impl Into<String>, frames: Vec<String>) {
    let value = new_exception(ty, message, None, frames);
    set(ty, value);
}

/// Raise the stop signal, consuming `terminal` into its `value`
/// attribute.
pub(crate) fn raise_stop(terminal: RawObjectPtr) {
    let ty = crate::singletons::sing().exc_stop_iteration;
    let value = new_exception(ty, "", Some(terminal), Vec::new());
    set(ty, value);
}

/// Raise an existing exception instance.
pub(crate) fn raise_object(exc: RawObjectPtr) {
    let ty = match &unsafe { crate::object::obj(exc) }.value {
        Value::Exception(data) => data.ty,
        _ => crate::singletons::sing().exc_runtime_error,
    };
    incref(exc);
    set(ty, exc);
}

fn set(ty: RawObjectPtr, value: RawObjectPtr) {
    let traceback = match &unsafe { crate::object::obj(value) }.value {
        Value::Exception(data) => data.traceback.unwrap_or(std::ptr::null_mut()),
        _ => std::ptr::null_mut(),
    };
    incref(traceback);
    clear();
    PENDING.with(|slot| {
        *slot.borrow_mut() = Some(Pending {
            ty,
            value,
            traceback,
        });
    });
}

/// The pending exception type, borrowed, or null.
pub(crate) fn occurred() -> RawObjectPtr {
    PENDING.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null_mut(), |pending| pending.ty)
    })
}

/// Transfer the pending triple to the caller and clear the slot.
pub(crate) fn fetch(
    out_ty: *mut RawObjectPtr,
    out_value: *mut RawObjectPtr,
    out_traceback: *mut RawObjectPtr,
) {
    let taken = PENDING.with(|slot| slot.borrow_mut().take());
    let (ty, value, traceback) = match taken {
        Some(pending) => {
            // The caller gets a new reference to the immortal type.
            incref(pending.ty);
            (pending.ty, pending.value, pending.traceback)
        }
        None => (
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        ),
    };
    unsafe {
        *out_ty = ty;
        *out_value = value;
        *out_traceback = traceback;
    }
}

/// Drop the pending triple, if any.
pub(crate) fn clear() {
    if let Some(pending) = PENDING.with(|slot| slot.borrow_mut().take()) {
        decref(pending.value);
        decref(pending.traceback);
    }
}

/// True if the pending (or given) exception is of type `ty`.
pub(crate) fn exception_matches(given: RawObjectPtr, ty: RawObjectPtr) -> bool {
    if given.is_null() {
        return false;
    }
    if given == ty {
        return true;
    }
    match &unsafe { crate::object::obj(given) }.value {
        Value::Exception(data) => data.ty == ty,
        _ => false,
    }
}
