//! Buffer Bridge
//!
//! Zero-copy views over objects that export the buffer protocol. A
//! [`PyBuffer`] owns one export: acquiring it pins the exporter's memory,
//! releasing it (explicitly or on drop) returns the pin.
//!
//! Reinterpretation is validated, never assumed:
//!
//! - the export's item format must name the requested element type,
//! - the byte order must be the host's native order,
//! - the geometry must fit the requested view (contiguous for a flat
//!   slice, row-major with a contiguous inner dimension for a 2-D view),
//! - writable views require a writable export.

use std::marker::PhantomData;

use krait_abi::{NativeApi, RawBuffer};

use crate::convert::{cast_error, Shape};
use crate::error::{InteropError, InteropResult};
use crate::except;
use crate::gil::GilGuard;
use crate::handle::Handle;
use crate::runtime::Runtime;

/// Element types that a buffer view may reinterpret to.
///
/// # Safety
///
/// Implementations must be plain-old-data with no invalid bit patterns,
/// and `CODES` must only name struct-format codes whose native size is
/// `size_of::<Self>()`.
pub unsafe trait BufferElement: Copy {
    /// Struct-format codes describing this element.
    const CODES: &'static [char];
    /// Host-facing name for error messages.
    const NAME: &'static str;
}

macro_rules! buffer_element_impl {
    ($($ty:ty => $name:literal, [$($code:literal),+]);+ $(;)?) => {
        $(
            unsafe impl BufferElement for $ty {
                const CODES: &'static [char] = &[$($code),+];
                const NAME: &'static str = $name;
            }
        )+
    };
}

// 'l'/'L' and 'n'/'N' are 64-bit on every platform this crate targets.
buffer_element_impl! {
    u8 => "u8", ['B', 'c'];
    i8 => "i8", ['b'];
    u16 => "u16", ['H'];
    i16 => "i16", ['h'];
    u32 => "u32", ['I'];
    i32 => "i32", ['i'];
    u64 => "u64", ['Q', 'L', 'N'];
    i64 => "i64", ['q', 'l', 'n'];
    f32 => "f32", ['f'];
    f64 => "f64", ['d'];
}

/// An acquired buffer export.
#[derive(Debug)]
pub struct PyBuffer {
    raw: RawBuffer,
    format: String,
    item_code: char,
    released: bool,
}

// The export record's pointers stay valid until release, independent of
// which thread reads them; mutation goes through &mut self.
unsafe impl Send for PyBuffer {}
unsafe impl Sync for PyBuffer {}

impl PyBuffer {
    /// Pin `exporter`'s memory and validate the export's format header.
    ///
    /// Fails when the object does not export the protocol, when the
    /// export cannot satisfy the standard request (format and strides),
    /// or when the declared byte order is not the host's.
    pub fn acquire(exporter: &Handle, py: &GilGuard<'_>) -> InteropResult<PyBuffer> {
        let api = py.api();
        if unsafe { (api.check_buffer)(exporter.as_ptr()) } == 0 {
            return Err(cast_error(&Shape::Buffer, exporter, py));
        }
        let mut raw = RawBuffer::zeroed();
        let rc =
            unsafe { (api.get_buffer)(exporter.as_ptr(), &mut raw, NativeApi::BUFFER_REQUEST) };
        if rc != 0 {
            return Err(except::take_pending(py, "buffer acquisition"));
        }

        let format = read_format(&raw);
        match parse_format(&format) {
            Ok(item_code) => Ok(PyBuffer {
                raw,
                format,
                item_code,
                released: false,
            }),
            Err(err) => {
                // Invalid header: give the pin back before failing.
                unsafe { (api.release_buffer)(&mut raw) };
                Err(err)
            }
        }
    }

    fn ensure_live(&self) -> InteropResult<()> {
        if self.released {
            Err(InteropError::disposed("buffer view"))
        } else {
            Ok(())
        }
    }

    // Metadata reads on a released view would answer from a stale export
    // record, so the public getters go through `ensure_live` like the
    // view constructors do; the raw accessors serve code that has already
    // checked.

    fn raw_len_bytes(&self) -> usize {
        self.raw.len.max(0) as usize
    }

    fn raw_item_size(&self) -> usize {
        self.raw.itemsize.max(0) as usize
    }

    fn raw_dimensions(&self) -> usize {
        self.raw.ndim.max(0) as usize
    }

    /// Total length of the export in bytes.
    pub fn len_bytes(&self) -> InteropResult<usize> {
        self.ensure_live()?;
        Ok(self.raw_len_bytes())
    }

    /// Size of one item in bytes.
    pub fn item_size(&self) -> InteropResult<usize> {
        self.ensure_live()?;
        Ok(self.raw_item_size())
    }

    /// Number of dimensions.
    pub fn dimensions(&self) -> InteropResult<usize> {
        self.ensure_live()?;
        Ok(self.raw_dimensions())
    }

    /// True if the export forbids writes.
    pub fn is_read_only(&self) -> InteropResult<bool> {
        self.ensure_live()?;
        Ok(self.raw.readonly != 0)
    }

    /// The export's struct-format string.
    pub fn format(&self) -> InteropResult<&str> {
        self.ensure_live()?;
        Ok(&self.format)
    }

    fn element_check<T: BufferElement>(&self) -> InteropResult<()> {
        self.ensure_live()?;
        if !T::CODES.contains(&self.item_code) || self.raw_item_size() != std::mem::size_of::<T>() {
            return Err(InteropError::BufferFormat {
                expected: T::NAME,
                actual: self.format.clone(),
            });
        }
        Ok(())
    }

    fn flat_count<T: BufferElement>(&self) -> InteropResult<usize> {
        self.element_check::<T>()?;
        if self.raw_dimensions() > 1 {
            return Err(InteropError::buffer_layout(format!(
                "{}-dimensional export cannot be viewed as a flat slice",
                self.raw_dimensions()
            )));
        }
        if self.raw_dimensions() == 1 && !self.raw.strides.is_null() {
            let stride = unsafe { *self.raw.strides };
            if stride != self.raw.itemsize {
                return Err(InteropError::buffer_layout(
                    "non-contiguous export cannot be viewed as a flat slice",
                ));
            }
        }
        Ok(self.raw_len_bytes() / std::mem::size_of::<T>())
    }

    /// A read-only flat view of a contiguous export.
    pub fn as_slice<T: BufferElement>(&self) -> InteropResult<&[T]> {
        let count = self.flat_count::<T>()?;
        Ok(unsafe { std::slice::from_raw_parts(self.raw.buf.cast::<T>(), count) })
    }

    /// A writable flat view of a contiguous, writable export.
    pub fn as_mut_slice<T: BufferElement>(&mut self) -> InteropResult<&mut [T]> {
        self.ensure_live()?;
        if self.raw.readonly != 0 {
            return Err(InteropError::BufferReadOnly);
        }
        let count = self.flat_count::<T>()?;
        Ok(unsafe { std::slice::from_raw_parts_mut(self.raw.buf.cast::<T>(), count) })
    }

    fn plan_rows<T: BufferElement>(&self) -> InteropResult<RowPlan> {
        self.element_check::<T>()?;
        if self.raw_dimensions() != 2 || self.raw.shape.is_null() {
            return Err(InteropError::buffer_layout(format!(
                "{}-dimensional export cannot be viewed as rows",
                self.raw_dimensions()
            )));
        }
        let rows = unsafe { *self.raw.shape }.max(0) as usize;
        let cols = unsafe { *self.raw.shape.add(1) }.max(0) as usize;
        let packed_row = (cols as isize) * self.raw.itemsize;
        let row_stride = if self.raw.strides.is_null() {
            packed_row
        } else {
            let inner = unsafe { *self.raw.strides.add(1) };
            if inner != self.raw.itemsize {
                return Err(InteropError::buffer_layout(
                    "inner dimension is not contiguous (transposed export?)",
                ));
            }
            let outer = unsafe { *self.raw.strides };
            if outer < packed_row {
                return Err(InteropError::buffer_layout("overlapping row strides"));
            }
            outer
        };
        Ok(RowPlan {
            rows,
            cols,
            row_stride,
        })
    }

    /// A read-only row-major 2-D view.
    pub fn rows<T: BufferElement>(&self) -> InteropResult<Rows2D<'_, T>> {
        let plan = self.plan_rows::<T>()?;
        Ok(Rows2D {
            base: self.raw.buf.cast::<u8>(),
            plan,
            _marker: PhantomData,
        })
    }

    /// A writable row-major 2-D view of a writable export.
    pub fn rows_mut<T: BufferElement>(&mut self) -> InteropResult<RowsMut2D<'_, T>> {
        self.ensure_live()?;
        if self.raw.readonly != 0 {
            return Err(InteropError::BufferReadOnly);
        }
        let plan = self.plan_rows::<T>()?;
        Ok(RowsMut2D {
            base: self.raw.buf.cast::<u8>(),
            plan,
            _marker: PhantomData,
        })
    }

    /// Return the pin to the exporter. Further view requests fail with
    /// `Disposed`. Safe to call more than once.
    pub fn release(&mut self, py: &GilGuard<'_>) {
        if !self.released {
            unsafe { (py.api().release_buffer)(&mut self.raw) };
            self.released = true;
        }
    }
}

impl Drop for PyBuffer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Releasing requires the lock; acquire it if this thread does not
        // already hold it.
        if let Some(runtime) = Runtime::try_global() {
            let py = runtime.acquire();
            self.release(&py);
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RowPlan {
    rows: usize,
    cols: usize,
    row_stride: isize,
}

/// Read-only row access into a 2-D export.
#[derive(Debug)]
pub struct Rows2D<'buf, T> {
    base: *const u8,
    plan: RowPlan,
    _marker: PhantomData<&'buf [T]>,
}

impl<'buf, T: BufferElement> Rows2D<'buf, T> {
    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.plan.rows
    }

    /// Items per row.
    pub fn row_len(&self) -> usize {
        self.plan.cols
    }

    /// One row, or `None` past the end.
    pub fn row(&self, index: usize) -> Option<&'buf [T]> {
        if index >= self.plan.rows {
            return None;
        }
        let start = unsafe { self.base.offset(self.plan.row_stride * index as isize) };
        Some(unsafe { std::slice::from_raw_parts(start.cast::<T>(), self.plan.cols) })
    }

    /// Iterate the rows in order.
    pub fn iter(&self) -> impl Iterator<Item = &'buf [T]> + '_ {
        (0..self.plan.rows).filter_map(move |index| self.row(index))
    }
}

/// Writable row access into a 2-D export.
pub struct RowsMut2D<'buf, T> {
    base: *mut u8,
    plan: RowPlan,
    _marker: PhantomData<&'buf mut [T]>,
}

impl<'buf, T: BufferElement> RowsMut2D<'buf, T> {
    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.plan.rows
    }

    /// Items per row.
    pub fn row_len(&self) -> usize {
        self.plan.cols
    }

    /// One writable row, or `None` past the end.
    pub fn row_mut(&mut self, index: usize) -> Option<&mut [T]> {
        if index >= self.plan.rows {
            return None;
        }
        let start = unsafe { self.base.offset(self.plan.row_stride * index as isize) };
        Some(unsafe { std::slice::from_raw_parts_mut(start.cast::<T>(), self.plan.cols) })
    }
}

fn read_format(raw: &RawBuffer) -> String {
    if raw.format.is_null() {
        // The standard request always asks for the format; a missing one
        // means unsigned bytes per the protocol.
        return "B".to_string();
    }
    unsafe { std::ffi::CStr::from_ptr(raw.format) }
        .to_string_lossy()
        .into_owned()
}

/// Validate the format header and extract the single item code.
///
/// Explicit byte-order markers are accepted only when they name the
/// host's native order; cross-order reinterpretation is refused.
fn parse_format(format: &str) -> InteropResult<char> {
    let mut chars = format.chars().peekable();
    if let Some(&first) = chars.peek() {
        match first {
            '@' | '=' => {
                chars.next();
            }
            '<' => {
                if !cfg!(target_endian = "little") {
                    return Err(InteropError::BufferByteOrder {
                        format: format.to_string(),
                    });
                }
                chars.next();
            }
            '>' | '!' => {
                if !cfg!(target_endian = "big") {
                    return Err(InteropError::BufferByteOrder {
                        format: format.to_string(),
                    });
                }
                chars.next();
            }
            _ => {}
        }
    }
    match (chars.next(), chars.next()) {
        (Some(code), None) => Ok(code),
        _ => Err(InteropError::BufferFormat {
            expected: "single-item format",
            actual: format.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_format_native_markers() {
        assert_eq!(parse_format("@d").ok(), Some('d'));
        assert_eq!(parse_format("=q").ok(), Some('q'));
        assert_eq!(parse_format("f").ok(), Some('f'));
    }

    #[test]
    fn test_parse_format_rejects_cross_order() {
        let foreign = if cfg!(target_endian = "little") { ">d" } else { "<d" };
        assert!(matches!(
            parse_format(foreign),
            Err(InteropError::BufferByteOrder { .. })
        ));
    }

    #[test]
    fn test_parse_format_rejects_compound() {
        assert!(matches!(
            parse_format("2d"),
            Err(InteropError::BufferFormat { .. })
        ));
    }
}
