//! Interop core for an embedded Python runtime.
//!
//! This crate owns the four disciplines that make embedding safe:
//!
//! - **Lifetime**: [`Handle`] owns exactly one runtime reference and
//!   returns it deterministically, deferring the release when dropped
//!   off-lock ([`handle`], [`runtime`]).
//! - **Locking**: the interpreter lock is a scoped, re-entrant guard;
//!   holding a [`GilGuard`] is the capability to touch runtime objects
//!   ([`gil`]).
//! - **Conversion**: typed, validated, bidirectional value conversion
//!   with no silent coercion ([`convert`]).
//! - **Bridging**: generators, awaitables and buffer exports surface as
//!   host-native iterators, futures and slices ([`iter`], [`asyncio`],
//!   [`buffer`]).
//!
//! Failures from the runtime are projected once, eagerly for type name
//! and message and lazily for the formatted traceback ([`except`]).
//!
//! ## Getting started
//!
//! ```ignore
//! use krait_interop::{convert, Runtime};
//!
//! let runtime = Runtime::initialize(&descriptor)?;
//! let py = runtime.acquire();
//! let list = convert::encode(&vec![1i64, 2, 3], &py)?;
//! let back: Vec<i64> = convert::decode(&list, &py)?;
//! ```

pub mod asyncio;
pub mod buffer;
pub mod convert;
pub mod error;
pub mod except;
pub mod gil;
pub mod handle;
pub mod iter;
pub mod runtime;

pub use krait_abi::CompareOp;

pub use asyncio::{EventLoop, PyAsyncIterator, PyCoroutine, ScheduledTask, TaskCanceller};
pub use buffer::{BufferElement, PyBuffer, Rows2D, RowsMut2D};
pub use convert::{decode, encode, FromPy, PyShaped, Shape, ToPy};
pub use error::{InteropError, InteropResult};
pub use except::PythonException;
pub use gil::GilGuard;
pub use handle::{import_module, Handle};
pub use iter::{IteratorState, PyGenerator, ValueIter};
pub use runtime::Runtime;
