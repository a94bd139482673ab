//! Scalar conversions: integers, floats, booleans, strings, bytes.
//!
//! Integers narrower than the runtime's 64-bit transport are range
//! checked; an out-of-range value fails with `IntegerOverflow` rather
//! than truncating. Floats and ints never cross-convert.

use crate::convert::{cast_error, FromPy, PyShaped, Shape, ToPy};
use crate::error::{InteropError, InteropResult};
use crate::except;
use crate::gil::GilGuard;
use crate::handle::Handle;

// ============================================================================
// Integers
// ============================================================================

fn decode_i64(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<i64> {
    if !obj.is_instance_of(py, py.api().long_type) {
        return Err(cast_error(&Shape::Int, obj, py));
    }
    let value = unsafe { (py.api().long_as_i64)(obj.as_ptr()) };
    // -1 doubles as the error return; disambiguate via the indicator.
    if value == -1 && unsafe { !(py.api().err_occurred)().is_null() } {
        return Err(except::take_pending(py, "integer conversion"));
    }
    Ok(value)
}

fn encode_i64(value: i64, py: &GilGuard<'_>) -> InteropResult<Handle> {
    let raw = unsafe { (py.api().long_from_i64)(value) };
    unsafe { Handle::from_new_reference(py, raw) }
}

impl PyShaped for i64 {
    fn shape() -> Shape {
        Shape::Int
    }
}

impl FromPy for i64 {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        decode_i64(obj, py)
    }
}

impl ToPy for i64 {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        encode_i64(*self, py)
    }
}

macro_rules! narrow_int_impl {
    ($($ty:ty),+) => {
        $(
            impl PyShaped for $ty {
                fn shape() -> Shape {
                    Shape::Int
                }
            }

            impl FromPy for $ty {
                fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
                    let wide = decode_i64(obj, py)?;
                    <$ty>::try_from(wide)
                        .map_err(|_| InteropError::overflow(wide, stringify!($ty)))
                }
            }

            impl ToPy for $ty {
                fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
                    encode_i64(i64::from(*self), py)
                }
            }
        )+
    };
}

narrow_int_impl!(i8, i16, i32, u8, u16, u32);

impl PyShaped for usize {
    fn shape() -> Shape {
        Shape::Int
    }
}

impl FromPy for usize {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        let wide = decode_i64(obj, py)?;
        usize::try_from(wide).map_err(|_| InteropError::overflow(wide, "usize"))
    }
}

impl ToPy for usize {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let wide = i64::try_from(*self)
            .map_err(|_| InteropError::cast("int (64-bit)", self.to_string()))?;
        encode_i64(wide, py)
    }
}

// ============================================================================
// Floats
// ============================================================================

impl PyShaped for f64 {
    fn shape() -> Shape {
        Shape::Float
    }
}

impl FromPy for f64 {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        if !obj.is_instance_of(py, py.api().float_type) {
            return Err(cast_error(&Shape::Float, obj, py));
        }
        let value = unsafe { (py.api().float_as_f64)(obj.as_ptr()) };
        if value == -1.0 && unsafe { !(py.api().err_occurred)().is_null() } {
            return Err(except::take_pending(py, "float conversion"));
        }
        Ok(value)
    }
}

impl ToPy for f64 {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let raw = unsafe { (py.api().float_from_f64)(*self) };
        unsafe { Handle::from_new_reference(py, raw) }
    }
}

// ============================================================================
// Booleans
// ============================================================================

impl PyShaped for bool {
    fn shape() -> Shape {
        Shape::Bool
    }
}

impl FromPy for bool {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        // The runtime's bool subclasses int, so this must be an exact
        // instance check, not a truthiness test.
        if !obj.is_instance_of(py, py.api().bool_type) {
            return Err(cast_error(&Shape::Bool, obj, py));
        }
        Ok(obj.as_ptr() == py.api().true_obj)
    }
}

impl ToPy for bool {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let ptr = if *self {
            py.api().true_obj
        } else {
            py.api().false_obj
        };
        unsafe { Handle::from_borrowed_reference(py, ptr) }
    }
}

// ============================================================================
// Strings
// ============================================================================

impl PyShaped for String {
    fn shape() -> Shape {
        Shape::Str
    }
}

impl FromPy for String {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        if !obj.is_instance_of(py, py.api().str_type) {
            return Err(cast_error(&Shape::Str, obj, py));
        }
        obj.text(py)
    }
}

impl ToPy for String {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        self.as_str().to_py(py)
    }
}

impl<'a> PyShaped for &'a str {
    fn shape() -> Shape {
        Shape::Str
    }
}

impl<'a> ToPy for &'a str {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let raw = unsafe {
            (py.api().str_from_utf8)(self.as_ptr().cast(), self.len() as isize)
        };
        unsafe { Handle::from_new_reference(py, raw) }
    }
}

// ============================================================================
// Byte strings
// ============================================================================

/// A host byte string that converts to and from the runtime's `bytes`.
///
/// Distinct from `Vec<u8>`, which converts as a generic integer sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteString(pub Vec<u8>);

impl PyShaped for ByteString {
    fn shape() -> Shape {
        Shape::Bytes
    }
}

impl FromPy for ByteString {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        if !obj.is_instance_of(py, py.api().bytes_type) {
            return Err(cast_error(&Shape::Bytes, obj, py));
        }
        let mut data: *mut std::ffi::c_char = std::ptr::null_mut();
        let mut size: isize = 0;
        let rc = unsafe { (py.api().bytes_as_ptr)(obj.as_ptr(), &mut data, &mut size) };
        if rc != 0 || data.is_null() {
            return Err(except::take_pending(py, "bytes access"));
        }
        let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) };
        Ok(ByteString(bytes.to_vec()))
    }
}

impl ToPy for ByteString {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let raw = unsafe {
            (py.api().bytes_from)(self.0.as_ptr().cast(), self.0.len() as isize)
        };
        unsafe { Handle::from_new_reference(py, raw) }
    }
}
