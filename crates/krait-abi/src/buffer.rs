//! Buffer-protocol export record.
//!
//! `RawBuffer` is a field-for-field mirror of the native `Py_buffer`
//! struct. The runtime fills it on `get_buffer` and reads it back on
//! `release_buffer`; the interop layer validates and reinterprets the
//! described memory but never frees any of it directly.

use std::ffi::{c_char, c_int, c_void};

use crate::object::RawObject;

/// Request flags for `get_buffer`, matching the native `PyBUF_*` values.
pub const PYBUF_SIMPLE: c_int = 0;
pub const PYBUF_WRITABLE: c_int = 0x0001;
pub const PYBUF_FORMAT: c_int = 0x0004;
pub const PYBUF_ND: c_int = 0x0008;
pub const PYBUF_STRIDES: c_int = 0x0010 | PYBUF_ND;

/// Mirror of the native `Py_buffer` export record.
///
/// All pointers inside the record are owned by the exporting object and
/// remain valid only until `release_buffer` is called with this record.
#[repr(C)]
#[derive(Debug)]
pub struct RawBuffer {
    /// Start of the exported memory.
    pub buf: *mut c_void,
    /// New reference to the exporting object, released by `release_buffer`.
    pub obj: *mut RawObject,
    /// Total length of the export in bytes.
    pub len: isize,
    /// Size in bytes of one item.
    pub itemsize: isize,
    /// Non-zero if the memory must not be written through this export.
    pub readonly: c_int,
    /// Number of dimensions (0 for a scalar export).
    pub ndim: c_int,
    /// NUL-terminated struct-format string, or null if not requested.
    pub format: *const c_char,
    /// Per-dimension element counts (`ndim` entries), or null.
    pub shape: *mut isize,
    /// Per-dimension byte strides (`ndim` entries), or null for packed
    /// C-contiguous layout.
    pub strides: *mut isize,
    /// Only used by the PIL-style indirect layout; always null here.
    pub suboffsets: *mut isize,
    /// Exporter-private storage.
    pub internal: *mut c_void,
}

impl RawBuffer {
    /// A zeroed record, suitable for passing to `get_buffer`.
    pub fn zeroed() -> Self {
        RawBuffer {
            buf: std::ptr::null_mut(),
            obj: std::ptr::null_mut(),
            len: 0,
            itemsize: 0,
            readonly: 0,
            ndim: 0,
            format: std::ptr::null(),
            shape: std::ptr::null_mut(),
            strides: std::ptr::null_mut(),
            suboffsets: std::ptr::null_mut(),
            internal: std::ptr::null_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_record_is_empty() {
        let raw = RawBuffer::zeroed();
        assert!(raw.buf.is_null());
        assert!(raw.obj.is_null());
        assert_eq!(raw.len, 0);
        assert_eq!(raw.ndim, 0);
    }

    #[test]
    fn test_strides_flag_implies_nd() {
        assert_eq!(PYBUF_STRIDES & PYBUF_ND, PYBUF_ND);
    }
}
