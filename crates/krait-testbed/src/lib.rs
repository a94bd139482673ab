//! In-process double of the embedded runtime.
//!
//! Fills a complete function table with Rust implementations backed by
//! a small object model, so the interop layer can be exercised
//! hermetically: no interpreter on disk, no process-global state beyond
//! the leaked singletons, and observable reference counts.
//!
//! The double honors the native contracts the layer above depends on:
//! `list_set_item` and `tuple_set_item` steal, `*_get_item` borrow,
//! `iter_next` returns null without an error on plain exhaustion, and
//! the error indicator is per thread with fetch transferring ownership.
//!
//! ```no_run
//! let api = krait_testbed::native_api();
//! // hand `api` to the layer under test in place of a loaded library
//! ```

mod api;
mod calls;
mod eloop;
mod errors;
mod lock;
mod object;
mod scenario;
mod singletons;

pub use api::native_api;
pub use scenario::{
    async_int_iterator, buffer_1d_f64, buffer_1d_u8, buffer_2d_i32, buffer_2d_i32_transposed,
    buffer_foreign_order_u16, coroutine_error, coroutine_pending, coroutine_stop_signal,
    coroutine_text, coroutine_value, echo_generator, export_count, failing_async_iterator,
    failing_generator, float_value, generator_closed, int_generator, int_value, mapping_proxy,
    none_value, object_with_attrs, refcount, str_value,
};
