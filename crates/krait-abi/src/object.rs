//! Opaque native object types.
//!
//! The runtime's objects are never dereferenced from Rust; they exist only
//! as addresses handed back to the runtime's own entry points. Both types
//! here are zero-sized opaque structs so that the raw pointers cannot be
//! read, written, or sized by accident.

use std::fmt;

/// An object managed by the native runtime's reference-counted heap.
///
/// Only ever used behind `*mut RawObject`. A null pointer is the universal
/// "no object" / error-return sentinel at the ABI layer; ownership of
/// non-null pointers (new vs. borrowed reference) is documented per entry
/// point on [`crate::NativeApi`].
#[repr(C)]
pub struct RawObject {
    _private: [u8; 0],
}

/// Convenience alias for the pointer type used throughout the ABI.
pub type RawObjectPtr = *mut RawObject;

/// An interpreter thread-state record.
///
/// Returned by `eval_save_thread` when the initializing thread parks the
/// interpreter lock after startup. Never inspected host-side.
#[repr(C)]
pub struct RawThreadState {
    _private: [u8; 0],
}

impl fmt::Debug for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawObject({:p})", self)
    }
}
