//! Exception Projection
//!
//! When a native call fails, the runtime's pending error indicator is
//! consumed exactly once and projected as a [`PythonException`]: type
//! name, message, and the traceback object. The traceback is kept as a
//! handle and only formatted (via the runtime's own `traceback` module)
//! the first time [`PythonException::stack_trace`] is asked for, since
//! most projected exceptions are logged by message alone.
//!
//! The stop signal of iterators and coroutines is special-cased into
//! [`InteropError::StopIteration`] so that bridge code can recover the
//! terminal value without string matching.

use std::ptr;
use std::sync::OnceLock;

use thiserror::Error;

use crate::error::{InteropError, InteropResult};
use crate::gil::GilGuard;
use crate::handle::{self, Handle};
use crate::runtime::Runtime;

/// A runtime exception projected into the host.
#[derive(Error, Debug)]
#[error("{type_name}: {message}")]
pub struct PythonException {
    type_name: String,
    message: String,
    value: Option<Handle>,
    traceback: Option<Handle>,
    formatted: OnceLock<Vec<String>>,
}

impl PythonException {
    /// The exception's type name, e.g. `ValueError`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The exception message (`str(value)`).
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The projected exception object, if one was attached.
    pub fn value(&self) -> Option<&Handle> {
        self.value.as_ref()
    }

    /// Formatted traceback lines, most recent call last.
    ///
    /// Formatting runs at most once; the first call acquires the lock and
    /// asks the runtime's `traceback` module, later calls return the
    /// cached lines. An exception without a traceback yields no lines.
    pub fn stack_trace(&self) -> InteropResult<&[String]> {
        if let Some(lines) = self.formatted.get() {
            return Ok(lines);
        }
        let lines = self.format_traceback()?;
        Ok(self.formatted.get_or_init(|| lines))
    }

    fn format_traceback(&self) -> InteropResult<Vec<String>> {
        let Some(traceback) = &self.traceback else {
            return Ok(Vec::new());
        };
        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        let module = handle::import_module(&py, "traceback")?;
        let format_tb = module.getattr(&py, "format_tb")?;
        let lines_list = format_tb.call(&py, &[traceback])?;

        let api = py.api();
        let count = unsafe { (api.list_size)(lines_list.as_ptr()) };
        let mut lines = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let raw = unsafe { (api.list_get_item)(lines_list.as_ptr(), index) };
            let line = unsafe { Handle::from_borrowed_reference(&py, raw)? };
            lines.push(line.text(&py)?);
        }
        Ok(lines)
    }

    /// Project an exception we hold as an object (event-loop outcomes)
    /// rather than via the error indicator.
    pub(crate) fn from_exception_object(py: &GilGuard<'_>, exc: Handle) -> PythonException {
        let type_name = best_effort(py, || exc.type_name(py), || "<unknown>".to_string());
        let message = best_effort(py, || exc.str_text(py), String::new);
        let traceback = best_effort(
            py,
            || {
                let tb = exc.getattr(py, "__traceback__")?;
                Ok(if tb.is_none(py) { None } else { Some(tb) })
            },
            || None,
        );
        PythonException {
            type_name,
            message,
            value: Some(exc),
            traceback,
            formatted: OnceLock::new(),
        }
    }
}

/// Consume the pending error indicator and project it.
///
/// Must only be called right after a native entry point reported failure.
/// If the indicator is clear, the failure is reported as a binding bug
/// (`MissingErrorIndicator`) instead of being invented.
pub(crate) fn take_pending(py: &GilGuard<'_>, context: &'static str) -> InteropError {
    let api = py.api();
    unsafe {
        if (api.err_occurred)().is_null() {
            return InteropError::MissingErrorIndicator { context };
        }

        let mut raw_type: *mut krait_abi::RawObject = ptr::null_mut();
        let mut raw_value: *mut krait_abi::RawObject = ptr::null_mut();
        let mut raw_traceback: *mut krait_abi::RawObject = ptr::null_mut();
        (api.err_fetch)(&mut raw_type, &mut raw_value, &mut raw_traceback);

        let exc_type = Handle::from_owned_ptr(raw_type);
        let value = Handle::from_owned_ptr(raw_value);
        let traceback = Handle::from_owned_ptr(raw_traceback);

        let Some(exc_type) = exc_type else {
            return InteropError::MissingErrorIndicator { context };
        };

        if (api.err_given_exception_matches)(exc_type.as_ptr(), api.exc_stop_iteration) != 0 {
            return InteropError::StopIteration {
                value: stop_value(py, value.as_ref()),
            };
        }

        let type_name = best_effort(
            py,
            || exc_type.getattr(py, "__name__")?.text(py),
            || "<unknown>".to_string(),
        );
        let message = match &value {
            Some(value) => best_effort(py, || value.str_text(py), String::new),
            None => String::new(),
        };

        InteropError::Python(PythonException {
            type_name,
            message,
            value,
            traceback,
            formatted: OnceLock::new(),
        })
    }
}

/// The terminal value a stop signal carries: the exception's `value`
/// attribute when present, the runtime's `None` otherwise.
fn stop_value(py: &GilGuard<'_>, exc_value: Option<&Handle>) -> Handle {
    if let Some(exc_value) = exc_value {
        let carried = best_effort(
            py,
            || {
                if exc_value.hasattr(py, "value")? {
                    Ok(Some(exc_value.getattr(py, "value")?))
                } else {
                    Ok(None)
                }
            },
            || None,
        );
        if let Some(carried) = carried {
            return carried;
        }
    }
    Handle::none(py)
}

/// Run a projection step, clearing any error it raises itself. Projection
/// must never replace the original failure with a secondary one.
fn best_effort<T>(
    py: &GilGuard<'_>,
    attempt: impl FnOnce() -> InteropResult<T>,
    fallback: impl FnOnce() -> T,
) -> T {
    match attempt() {
        Ok(value) => value,
        Err(_) => {
            unsafe { (py.api().err_clear)() };
            fallback()
        }
    }
}
