//! Owned References
//!
//! [`Handle`] is the host-side owner of exactly one runtime reference.
//! Creating one from a new reference takes ownership; creating one from a
//! borrowed reference increments first. Dropping a handle returns the
//! reference immediately when the current thread holds the interpreter
//! lock, and otherwise queues it on the runtime's deferred-release queue.
//!
//! Every object operation takes a [`GilGuard`], so the type system rules
//! out unlocked access. A disposed handle holds the null sentinel and
//! fails every subsequent operation with [`InteropError::Disposed`].

use std::ffi::CString;
use std::mem;
use std::ptr;

use krait_abi::{CompareOp, RawObject, PY_EVAL_INPUT};
use tracing::warn;

use crate::error::{InteropError, InteropResult};
use crate::except;
use crate::gil::{self, GilGuard};
use crate::runtime::Runtime;

/// An owned reference to a runtime object.
pub struct Handle {
    ptr: *mut RawObject,
}

// A handle is a pointer plus refcount ownership. All dereferencing goes
// through the native table under a GilGuard, and the runtime's refcount
// operations are lock-protected, so moving or sharing the wrapper across
// threads is sound.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    /// Take ownership of a new reference returned by a native call.
    ///
    /// A null pointer means the call failed; the pending error indicator
    /// is consumed and projected.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a new (owned) reference that no other owner
    /// will release.
    pub unsafe fn from_new_reference(
        py: &GilGuard<'_>,
        ptr: *mut RawObject,
    ) -> InteropResult<Handle> {
        if ptr.is_null() {
            return Err(except::take_pending(py, "object constructor"));
        }
        Ok(Handle { ptr })
    }

    /// Own a reference to an object the runtime only lent us.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a valid borrowed reference, live for the
    /// duration of this call.
    pub unsafe fn from_borrowed_reference(
        py: &GilGuard<'_>,
        ptr: *mut RawObject,
    ) -> InteropResult<Handle> {
        if ptr.is_null() {
            return Err(except::take_pending(py, "borrowed reference"));
        }
        (py.api().incref)(ptr);
        Ok(Handle { ptr })
    }

    /// Wrap an owned pointer without a failure projection. Internal
    /// plumbing for paths that already fetched the error state.
    pub(crate) unsafe fn from_owned_ptr(ptr: *mut RawObject) -> Option<Handle> {
        if ptr.is_null() {
            None
        } else {
            Some(Handle { ptr })
        }
    }

    /// A new owned reference to the runtime's `None` singleton.
    pub fn none(py: &GilGuard<'_>) -> Handle {
        let ptr = py.api().none;
        unsafe { (py.api().incref)(ptr) };
        Handle { ptr }
    }

    /// True until the handle is disposed.
    pub fn is_valid(&self) -> bool {
        !self.ptr.is_null()
    }

    /// The raw object address. Null after disposal.
    pub fn as_ptr(&self) -> *mut RawObject {
        self.ptr
    }

    /// Identity comparison (same runtime object).
    pub fn is(&self, other: &Handle) -> bool {
        !self.ptr.is_null() && self.ptr == other.ptr
    }

    fn checked_ptr(&self) -> InteropResult<*mut RawObject> {
        if self.ptr.is_null() {
            Err(InteropError::disposed("handle"))
        } else {
            Ok(self.ptr)
        }
    }

    /// A second owned reference to the same object.
    pub fn clone_ref(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let ptr = self.checked_ptr()?;
        unsafe { (py.api().incref)(ptr) };
        Ok(Handle { ptr })
    }

    /// Release the owned reference now (under the lock) or queue it for
    /// the next outermost lock release. Safe to call more than once.
    pub fn dispose(&mut self) {
        release_reference(mem::replace(&mut self.ptr, ptr::null_mut()));
    }

    // ========================================================================
    // Object protocol
    // ========================================================================

    /// Read attribute `name`.
    pub fn getattr(&self, py: &GilGuard<'_>, name: &str) -> InteropResult<Handle> {
        let ptr = self.checked_ptr()?;
        let cname = cstring(name)?;
        let raw = unsafe { (py.api().getattr)(ptr, cname.as_ptr()) };
        unsafe { Handle::from_new_reference(py, raw) }
    }

    /// True if the object has attribute `name`.
    pub fn hasattr(&self, py: &GilGuard<'_>, name: &str) -> InteropResult<bool> {
        let ptr = self.checked_ptr()?;
        let cname = cstring(name)?;
        Ok(unsafe { (py.api().hasattr)(ptr, cname.as_ptr()) } != 0)
    }

    /// Call the object with no arguments.
    pub fn call0(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let ptr = self.checked_ptr()?;
        let raw = unsafe { (py.api().call_no_args)(ptr) };
        unsafe { Handle::from_new_reference(py, raw) }
    }

    /// Call the object with positional arguments.
    pub fn call(&self, py: &GilGuard<'_>, args: &[&Handle]) -> InteropResult<Handle> {
        let args_tuple = new_tuple(py, args)?;
        self.call_with(py, &args_tuple, None)
    }

    /// Call the object with a prepared argument tuple and optional keyword
    /// dict.
    pub fn call_with(
        &self,
        py: &GilGuard<'_>,
        args_tuple: &Handle,
        kwargs: Option<&Handle>,
    ) -> InteropResult<Handle> {
        let ptr = self.checked_ptr()?;
        let args_ptr = args_tuple.checked_ptr()?;
        let kwargs_ptr = match kwargs {
            Some(handle) => handle.checked_ptr()?,
            None => ptr::null_mut(),
        };
        let raw = unsafe { (py.api().call)(ptr, args_ptr, kwargs_ptr) };
        unsafe { Handle::from_new_reference(py, raw) }
    }

    /// `str(self)` as a host string.
    pub fn str_text(&self, py: &GilGuard<'_>) -> InteropResult<String> {
        let ptr = self.checked_ptr()?;
        let raw = unsafe { (py.api().object_str)(ptr) };
        let text_obj = unsafe { Handle::from_new_reference(py, raw)? };
        text_obj.text(py)
    }

    /// `repr(self)` as a host string.
    pub fn repr_text(&self, py: &GilGuard<'_>) -> InteropResult<String> {
        let ptr = self.checked_ptr()?;
        let raw = unsafe { (py.api().object_repr)(ptr) };
        let repr_obj = unsafe { Handle::from_new_reference(py, raw)? };
        repr_obj.text(py)
    }

    /// The object's type name.
    pub fn type_name(&self, py: &GilGuard<'_>) -> InteropResult<String> {
        let ptr = self.checked_ptr()?;
        let raw = unsafe { (py.api().object_type)(ptr) };
        let type_obj = unsafe { Handle::from_new_reference(py, raw)? };
        type_obj.getattr(py, "__name__")?.text(py)
    }

    /// Truthiness of the object.
    pub fn is_truthy(&self, py: &GilGuard<'_>) -> InteropResult<bool> {
        let ptr = self.checked_ptr()?;
        match unsafe { (py.api().is_true)(ptr) } {
            -1 => Err(except::take_pending(py, "truth test")),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    /// Rich comparison against another object.
    pub fn rich_compare(
        &self,
        py: &GilGuard<'_>,
        other: &Handle,
        op: CompareOp,
    ) -> InteropResult<bool> {
        let lhs = self.checked_ptr()?;
        let rhs = other.checked_ptr()?;
        match unsafe { (py.api().rich_compare_bool)(lhs, rhs, op as i32) } {
            -1 => Err(except::take_pending(py, "rich comparison")),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    /// Identity check against the runtime's `None` singleton.
    pub fn is_none(&self, py: &GilGuard<'_>) -> bool {
        self.ptr == py.api().none
    }

    /// An iterator over the object (`iter(self)`).
    pub fn get_iter(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let ptr = self.checked_ptr()?;
        let raw = unsafe { (py.api().get_iter)(ptr) };
        unsafe { Handle::from_new_reference(py, raw) }
    }

    /// `isinstance(self, type_addr)` against an entry from the native
    /// table's type slots.
    pub(crate) fn is_instance_of(&self, py: &GilGuard<'_>, type_addr: *mut RawObject) -> bool {
        if self.ptr.is_null() {
            return false;
        }
        unsafe { (py.api().is_instance)(self.ptr, type_addr) == 1 }
    }

    /// UTF-8 contents of a runtime string object.
    pub(crate) fn text(&self, py: &GilGuard<'_>) -> InteropResult<String> {
        let ptr = self.checked_ptr()?;
        let mut size: isize = 0;
        let data = unsafe { (py.api().str_as_utf8)(ptr, &mut size) };
        if data.is_null() {
            return Err(except::take_pending(py, "string decode"));
        }
        let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) };
        // The runtime guarantees the buffer is valid UTF-8.
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        release_reference(mem::replace(&mut self.ptr, ptr::null_mut()));
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ptr.is_null() {
            write!(f, "Handle(disposed)")
        } else {
            write!(f, "Handle({:p})", self.ptr)
        }
    }
}

/// Return one owned reference to the runtime, immediately when the lock is
/// held and via the deferred queue otherwise.
fn release_reference(ptr: *mut RawObject) {
    if ptr.is_null() {
        return;
    }
    match Runtime::try_global() {
        Some(runtime) => {
            if gil::is_acquired() {
                unsafe { (runtime.api().decref)(ptr) };
            } else {
                runtime.defer_release(ptr);
            }
        }
        None => {
            // No runtime to return the reference to. Leaking is the only
            // safe option.
            warn!(ptr = ?ptr, "handle dropped with no runtime installed; leaking reference");
        }
    }
}

// ============================================================================
// Module-level helpers
// ============================================================================

/// Import a module by name.
pub fn import_module(py: &GilGuard<'_>, name: &str) -> InteropResult<Handle> {
    let cname = cstring(name)?;
    let raw = unsafe { (py.api().import_module)(cname.as_ptr()) };
    unsafe { Handle::from_new_reference(py, raw) }
}

/// Evaluate a single expression in a fresh namespace.
pub(crate) fn eval_expression(py: &GilGuard<'_>, code: &str) -> InteropResult<Handle> {
    let ccode = cstring(code)?;
    let globals =
        unsafe { Handle::from_new_reference(py, (py.api().dict_new)()) }?;
    let locals = unsafe { Handle::from_new_reference(py, (py.api().dict_new)()) }?;
    let raw = unsafe {
        (py.api().run_string)(
            ccode.as_ptr(),
            PY_EVAL_INPUT,
            globals.as_ptr(),
            locals.as_ptr(),
        )
    };
    unsafe { Handle::from_new_reference(py, raw) }
}

/// Build a tuple owning one reference per element.
pub(crate) fn new_tuple(py: &GilGuard<'_>, items: &[&Handle]) -> InteropResult<Handle> {
    let raw = unsafe { (py.api().tuple_new)(items.len() as isize) };
    let tuple = unsafe { Handle::from_new_reference(py, raw)? };
    for (index, item) in items.iter().enumerate() {
        // tuple_set_item steals a reference, so hand it one of our own.
        let owned = item.clone_ref(py)?;
        let item_ptr = owned.as_ptr();
        mem::forget(owned);
        let rc =
            unsafe { (py.api().tuple_set_item)(tuple.as_ptr(), index as isize, item_ptr) };
        if rc != 0 {
            return Err(except::take_pending(py, "tuple item store"));
        }
    }
    Ok(tuple)
}

fn cstring(value: &str) -> InteropResult<CString> {
    CString::new(value).map_err(|_| InteropError::cast("NUL-free string", value))
}
