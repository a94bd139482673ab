//! Interop Error Types
//!
//! Every fallible operation in this crate returns [`InteropResult`]. The
//! variants fall into four groups:
//!
//! - Projected runtime exceptions ([`InteropError::Python`])
//! - Conversion failures (casts, overflow, buffer validation)
//! - Lifecycle violations (uninitialized runtime, disposed handles)
//! - Scheduler outcomes (cancellation, loop shutdown)

use thiserror::Error;

use crate::except::PythonException;
use crate::handle::Handle;

/// Result type for interop operations.
pub type InteropResult<T> = Result<T, InteropError>;

/// Interop error types.
#[derive(Error, Debug)]
pub enum InteropError {
    /// The runtime raised an exception; projected with its type name,
    /// message and (lazily formatted) traceback.
    #[error(transparent)]
    Python(#[from] PythonException),

    /// An iterator or coroutine finished. Carries the terminal value the
    /// runtime attached to the stop signal (the runtime's `None` when the
    /// producer finished without one).
    #[error("iteration finished")]
    StopIteration {
        /// The terminal value attached to the stop signal.
        value: Handle,
    },

    /// A runtime value did not satisfy the structural checks for the
    /// requested host type.
    #[error("cannot convert `{actual}` value where `{expected}` is required")]
    Cast {
        /// The host-side shape that was requested.
        expected: String,
        /// The runtime type name of the rejected value.
        actual: String,
    },

    /// A runtime integer does not fit the requested host integer type.
    #[error("integer {value} does not fit in `{target}`")]
    IntegerOverflow {
        /// The out-of-range value.
        value: i64,
        /// Name of the requested host type.
        target: &'static str,
    },

    /// An operation was attempted through an already-released resource.
    #[error("{what} has already been disposed")]
    Disposed {
        /// What was disposed (handle, buffer view, iterator).
        what: &'static str,
    },

    /// The global runtime has not been initialized yet.
    #[error("runtime is not initialized; call Runtime::initialize first")]
    NotInitialized,

    /// A second initialization was attempted with a different installation.
    #[error("runtime is already initialized")]
    AlreadyInitialized,

    /// A native entry point reported failure without setting the error
    /// indicator. Always a runtime or binding bug, surfaced rather than
    /// swallowed.
    #[error("native call `{context}` failed without setting the error indicator")]
    MissingErrorIndicator {
        /// The entry point that misbehaved.
        context: &'static str,
    },

    /// A scheduled task was cancelled before it produced a result.
    #[error("task was cancelled")]
    Cancelled,

    /// The background event loop is shutting down and no longer accepts
    /// work.
    #[error("event loop is shut down")]
    LoopShutDown,

    /// A buffer export's item format does not match the requested element
    /// type.
    #[error("buffer format `{actual}` does not describe `{expected}` items")]
    BufferFormat {
        /// Host element type that was requested.
        expected: &'static str,
        /// The export's format string.
        actual: String,
    },

    /// A buffer export declares a non-native byte order.
    #[error("buffer format `{format}` uses a non-native byte order")]
    BufferByteOrder {
        /// The export's format string.
        format: String,
    },

    /// A buffer export's geometry cannot be viewed as requested
    /// (dimensionality, stride layout, or length mismatch).
    #[error("buffer layout mismatch: {message}")]
    BufferLayout {
        /// Description of the mismatch.
        message: String,
    },

    /// A mutable view was requested over a read-only export.
    #[error("buffer is read-only")]
    BufferReadOnly,

    /// The runtime library or one of its symbols failed to resolve.
    #[error(transparent)]
    Load(#[from] krait_abi::LoadError),
}

impl InteropError {
    /// Conversion failure for `actual` where `expected` was required.
    pub fn cast(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        InteropError::Cast {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Overflow converting `value` into the host type `target`.
    pub fn overflow(value: i64, target: &'static str) -> Self {
        InteropError::IntegerOverflow { value, target }
    }

    /// Use of a disposed resource.
    pub fn disposed(what: &'static str) -> Self {
        InteropError::Disposed { what }
    }

    /// Geometry mismatch in a buffer view request.
    pub fn buffer_layout(message: impl Into<String>) -> Self {
        InteropError::BufferLayout {
            message: message.into(),
        }
    }

    /// True if this error is the projection of a runtime exception.
    pub fn is_python(&self) -> bool {
        matches!(self, InteropError::Python(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cast_error_names_both_sides() {
        let err = InteropError::cast("list[int]", "dict");
        assert_eq!(
            err.to_string(),
            "cannot convert `dict` value where `list[int]` is required"
        );
    }

    #[test]
    fn test_overflow_error_names_target() {
        let err = InteropError::overflow(1 << 40, "i32");
        assert_eq!(err.to_string(), "integer 1099511627776 does not fit in `i32`");
    }
}
