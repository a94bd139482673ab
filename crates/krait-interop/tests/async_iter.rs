//! Async pull-stream behavior against scripted async-generator doubles.
//!
//! Each pull schedules a step awaitable onto the shared background loop,
//! so handles are built under a short-lived guard and released before
//! waiting.

mod common;

use krait_interop::{Handle, InteropError, PyAsyncIterator};
use pretty_assertions::assert_eq;

use common::{own, runtime};

fn source(ptr: *mut krait_abi::RawObject) -> Handle {
    let py = runtime().acquire();
    own(&py, ptr)
}

#[test]
fn test_async_iteration_yields_each_item_in_order() {
    let stream = source(krait_testbed::async_int_iterator(&[10, 20, 30]));
    let mut iter: PyAsyncIterator<i64> = PyAsyncIterator::new(stream).unwrap();
    assert_eq!(iter.next_blocking().unwrap(), Some(10));
    assert_eq!(iter.next_blocking().unwrap(), Some(20));
    assert_eq!(iter.next_blocking().unwrap(), Some(30));
    assert_eq!(iter.next_blocking().unwrap(), None);
}

#[test]
fn test_exhaustion_is_sticky() {
    let stream = source(krait_testbed::async_int_iterator(&[1]));
    let mut iter: PyAsyncIterator<i64> = PyAsyncIterator::new(stream).unwrap();
    assert_eq!(iter.next_blocking().unwrap(), Some(1));
    assert_eq!(iter.next_blocking().unwrap(), None);
    assert_eq!(iter.next_blocking().unwrap(), None);
}

#[test]
fn test_collect_drains_the_stream() {
    let stream = source(krait_testbed::async_int_iterator(&[4, 5, 6]));
    let iter: PyAsyncIterator<i64> = PyAsyncIterator::new(stream).unwrap();
    assert_eq!(iter.collect_blocking().unwrap(), vec![4, 5, 6]);
}

#[test]
fn test_empty_stream_ends_on_first_pull() {
    let stream = source(krait_testbed::async_int_iterator(&[]));
    let mut iter: PyAsyncIterator<i64> = PyAsyncIterator::new(stream).unwrap();
    assert_eq!(iter.next_blocking().unwrap(), None);
}

#[test]
fn test_mid_stream_failure_is_projected_and_ends_the_stream() {
    let stream = source(krait_testbed::failing_async_iterator(&[7, 8, 9], 1, "bad item"));
    let mut iter: PyAsyncIterator<i64> = PyAsyncIterator::new(stream).unwrap();
    assert_eq!(iter.next_blocking().unwrap(), Some(7));
    let err = iter.next_blocking().unwrap_err();
    let InteropError::Python(exc) = err else {
        panic!("expected a projected exception, got {err}");
    };
    assert_eq!(exc.type_name(), "ValueError");
    assert_eq!(exc.message(), "bad item");
    assert_eq!(iter.next_blocking().unwrap(), None);
}

#[test]
fn test_non_async_iterable_is_rejected_with_shape() {
    let obj = source(krait_testbed::int_value(5));
    let err = PyAsyncIterator::<i64>::new(obj).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot convert `int` value where `async iterator` is required"
    );
}
