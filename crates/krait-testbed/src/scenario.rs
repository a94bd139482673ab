//! Scripted objects for exercising the layer above.
//!
//! Everything here returns an owned table pointer. Hand it to the layer
//! under test through `Handle::from_new_reference` and the double's
//! reference counting takes over.

use std::ffi::CString;

use krait_abi::RawObjectPtr;
use parking_lot::Mutex;

use crate::object::{
    alloc, incref, obj, AsyncGenState, CoroOutcome, CoroPlan, ExporterState, GeneratorState, Value,
};
use crate::singletons::sing;

// ============================================================================
// Plain values
// ============================================================================

pub fn int_value(value: i64) -> RawObjectPtr {
    crate::object::new_int(value)
}

pub fn float_value(value: f64) -> RawObjectPtr {
    alloc(Value::Float(value))
}

pub fn str_value(text: &str) -> RawObjectPtr {
    crate::object::new_str(text)
}

pub fn none_value() -> RawObjectPtr {
    let none = sing().none;
    incref(none);
    none
}

/// An object with scripted attributes, for attribute-mapped decoding.
/// Takes ownership of the attribute values.
pub fn object_with_attrs(attrs: Vec<(&'static str, RawObjectPtr)>) -> RawObjectPtr {
    alloc(Value::Module { attrs })
}

/// A read-only mapping that is not a dict but supports `items()`.
/// Takes ownership of the pairs.
pub fn mapping_proxy(pairs: Vec<(RawObjectPtr, RawObjectPtr)>) -> RawObjectPtr {
    alloc(Value::MappingProxy { pairs })
}

// ============================================================================
// Generators
// ============================================================================

fn generator(
    yields: Vec<RawObjectPtr>,
    terminal: RawObjectPtr,
    fail_at: Option<(usize, String)>,
    echo: bool,
) -> RawObjectPtr {
    alloc(Value::Generator(Mutex::new(GeneratorState {
        yields,
        terminal,
        fail_at,
        echo,
        pos: 0,
        finished: false,
        closed: false,
    })))
}

/// Yields each integer in order, then stops carrying `terminal`.
pub fn int_generator(yields: &[i64], terminal: i64) -> RawObjectPtr {
    generator(
        yields.iter().copied().map(int_value).collect(),
        int_value(terminal),
        None,
        false,
    )
}

/// Yields `first`, then echoes back whatever is sent in, for `steps`
/// resumes total. Stops with `None`.
pub fn echo_generator(first: i64, steps: usize) -> RawObjectPtr {
    generator(
        (0..steps).map(|_| int_value(first)).collect(),
        none_value(),
        None,
        true,
    )
}

/// Yields integers until resume `fail_index`, then raises with
/// `message` and a scripted traceback.
pub fn failing_generator(yields: &[i64], fail_index: usize, message: &str) -> RawObjectPtr {
    generator(
        yields.iter().copied().map(int_value).collect(),
        none_value(),
        Some((fail_index, message.to_string())),
        false,
    )
}

pub use crate::calls::generator_closed;
pub use crate::object::refcount;

// ============================================================================
// Coroutines
// ============================================================================

fn coroutine(countdown: u32, outcome: CoroOutcome) -> RawObjectPtr {
    alloc(Value::Coroutine(Mutex::new(CoroPlan {
        countdown,
        outcome,
        consumed: false,
    })))
}

/// Concludes with `value` after `steps` loop cycles.
pub fn coroutine_value(steps: u32, value: i64) -> RawObjectPtr {
    coroutine(steps, CoroOutcome::Value(int_value(value)))
}

/// Concludes with the given text after `steps` loop cycles.
pub fn coroutine_text(steps: u32, text: &str) -> RawObjectPtr {
    coroutine(steps, CoroOutcome::Value(str_value(text)))
}

/// Fails with a `ValueError` carrying `message` after `steps` cycles.
pub fn coroutine_error(steps: u32, message: &str) -> RawObjectPtr {
    coroutine(
        steps,
        CoroOutcome::Error {
            ty: sing().exc_value_error,
            message: message.to_string(),
        },
    )
}

/// Finishes by raising the stop signal with `value` attached, the shape
/// a generator-based awaitable produces.
pub fn coroutine_stop_signal(steps: u32, value: i64) -> RawObjectPtr {
    coroutine(steps, CoroOutcome::StopSignal(int_value(value)))
}

/// Never concludes on its own; only cancellation ends it.
pub fn coroutine_pending() -> RawObjectPtr {
    coroutine(0, CoroOutcome::Pending)
}

// ============================================================================
// Async generators
// ============================================================================

fn async_generator(items: Vec<RawObjectPtr>, fail_at: Option<(usize, String)>) -> RawObjectPtr {
    alloc(Value::AsyncGenerator(Mutex::new(AsyncGenState {
        items,
        pos: 0,
        fail_at,
    })))
}

/// Each `__anext__` resolves to the next integer; pulling past the end
/// raises the async stop signal.
pub fn async_int_iterator(items: &[i64]) -> RawObjectPtr {
    async_generator(items.iter().copied().map(int_value).collect(), None)
}

/// Resolves items until pull `fail_index`, whose awaitable raises a
/// `ValueError` carrying `message`.
pub fn failing_async_iterator(items: &[i64], fail_index: usize, message: &str) -> RawObjectPtr {
    async_generator(
        items.iter().copied().map(int_value).collect(),
        Some((fail_index, message.to_string())),
    )
}

// ============================================================================
// Buffer exporters
// ============================================================================

fn exporter(
    data: Vec<u8>,
    format: &str,
    itemsize: isize,
    shape: Vec<isize>,
    strides: Option<Vec<isize>>,
    readonly: bool,
) -> RawObjectPtr {
    alloc(Value::BufferExporter(Mutex::new(ExporterState {
        data,
        format: CString::new(format).unwrap_or_default(),
        itemsize,
        shape,
        strides,
        readonly,
        exports: 0,
    })))
}

/// A contiguous one-dimensional `f64` exporter.
pub fn buffer_1d_f64(values: &[f64], readonly: bool) -> RawObjectPtr {
    let mut data = Vec::with_capacity(values.len() * 8);
    for value in values {
        data.extend_from_slice(&value.to_ne_bytes());
    }
    let len = values.len() as isize;
    exporter(data, "d", 8, vec![len], Some(vec![8]), readonly)
}

/// A contiguous one-dimensional `u8` exporter with format "B".
pub fn buffer_1d_u8(values: &[u8], readonly: bool) -> RawObjectPtr {
    let len = values.len() as isize;
    exporter(values.to_vec(), "B", 1, vec![len], Some(vec![1]), readonly)
}

/// A two-dimensional `i32` exporter, row-major, with `pad_bytes` of
/// trailing padding per row so the outer stride exceeds the packed row.
pub fn buffer_2d_i32(rows: &[Vec<i32>], pad_bytes: usize, readonly: bool) -> RawObjectPtr {
    let cols = rows.first().map_or(0, Vec::len);
    let row_stride = cols * 4 + pad_bytes;
    let mut data = Vec::with_capacity(rows.len() * row_stride);
    for row in rows {
        for value in row {
            data.extend_from_slice(&value.to_ne_bytes());
        }
        data.extend(std::iter::repeat(0u8).take(pad_bytes));
    }
    exporter(
        data,
        "i",
        4,
        vec![rows.len() as isize, cols as isize],
        Some(vec![row_stride as isize, 4]),
        readonly,
    )
}

/// A column-major two-dimensional `i32` exporter: the inner stride is
/// the full column height, not the item size.
pub fn buffer_2d_i32_transposed(rows: isize, cols: isize) -> RawObjectPtr {
    let count = (rows * cols).max(0) as usize;
    let mut data = Vec::with_capacity(count * 4);
    for index in 0..count as i32 {
        data.extend_from_slice(&index.to_ne_bytes());
    }
    exporter(
        data,
        "i",
        4,
        vec![rows, cols],
        Some(vec![4, rows * 4]),
        false,
    )
}

/// An exporter whose format declares a foreign byte order.
pub fn buffer_foreign_order_u16(values: &[u16]) -> RawObjectPtr {
    let format = if cfg!(target_endian = "little") {
        ">H"
    } else {
        "<H"
    };
    let mut data = Vec::with_capacity(values.len() * 2);
    for value in values {
        data.extend_from_slice(&value.to_ne_bytes());
    }
    let len = values.len() as isize;
    exporter(data, format, 2, vec![len], Some(vec![2]), false)
}

/// Outstanding buffer exports on an exporter object.
pub fn export_count(exporter: RawObjectPtr) -> usize {
    match &unsafe { obj(exporter) }.value {
        Value::BufferExporter(state) => state.lock().exports,
        _ => 0,
    }
}
