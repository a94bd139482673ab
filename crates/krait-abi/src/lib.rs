//! Raw ABI surface for the embedded Python runtime.
//!
//! This crate defines the seam between the interop core and the native
//! runtime: opaque object pointers, the `NativeApi` function table, the
//! buffer export record, and a loader that resolves the table from an
//! installed `libpython` shared library.
//!
//! Nothing in this crate touches reference counts or the interpreter lock
//! on its own. Higher layers (krait-interop) own lifetime and locking
//! discipline; this crate only guarantees that every entry in the table
//! points at the native routine it documents.
//!
//! ## Providers
//!
//! Two providers exist for the table:
//!
//! - [`loader::load_native_api`] resolves each entry from a resolved
//!   runtime installation (the production path).
//! - `krait-testbed` fills the table with an in-process runtime double
//!   (the hermetic test path).

pub mod api;
pub mod buffer;
pub mod loader;
pub mod object;

pub use api::{CompareOp, NativeApi, PY_EVAL_INPUT};
pub use buffer::{RawBuffer, PYBUF_FORMAT, PYBUF_ND, PYBUF_SIMPLE, PYBUF_STRIDES, PYBUF_WRITABLE};
pub use loader::{load_native_api, InstallDescriptor, LoadError, LoadResult, LoadedApi};
pub use object::{RawObject, RawObjectPtr, RawThreadState};
