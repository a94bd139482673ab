//! Async bridge behavior against scripted coroutine doubles.
//!
//! Every test schedules onto the shared background loop, so handles are
//! built under a short-lived guard and released before waiting.

mod common;

use krait_interop::{Handle, InteropError, PyCoroutine};
use pretty_assertions::assert_eq;

use common::{own, runtime};

fn awaitable(ptr: *mut krait_abi::RawObject) -> Handle {
    let py = runtime().acquire();
    own(&py, ptr)
}

#[test]
fn test_awaitable_resolves_to_its_value() {
    let coroutine = awaitable(krait_testbed::coroutine_value(2, 99));
    let bridge: PyCoroutine<i64> = PyCoroutine::new(coroutine).unwrap();
    assert_eq!(bridge.wait_blocking().unwrap(), 99);
}

#[test]
fn test_awaitable_resolves_immediately_when_ready() {
    let coroutine = awaitable(krait_testbed::coroutine_text(0, "done"));
    let bridge: PyCoroutine<String> = PyCoroutine::new(coroutine).unwrap();
    assert_eq!(bridge.wait_blocking().unwrap(), "done");
}

#[test]
fn test_awaitable_failure_is_projected_with_traceback() {
    let coroutine = awaitable(krait_testbed::coroutine_error(1, "bad input"));
    let bridge: PyCoroutine<i64> = PyCoroutine::new(coroutine).unwrap();
    let err = bridge.wait_blocking().unwrap_err();
    let InteropError::Python(exc) = err else {
        panic!("expected a projected exception, got {err}");
    };
    assert_eq!(exc.type_name(), "ValueError");
    assert_eq!(exc.message(), "bad input");
    let trace = exc.stack_trace().unwrap();
    assert!(trace.iter().any(|line| line.contains("task.py")));
}

#[test]
fn test_stop_signal_outcome_is_a_result_not_an_error() {
    let coroutine = awaitable(krait_testbed::coroutine_stop_signal(1, 7));
    let bridge: PyCoroutine<i64> = PyCoroutine::new(coroutine).unwrap();
    assert_eq!(bridge.wait_blocking().unwrap(), 7);
}

#[test]
fn test_cancellation_of_a_pending_awaitable() {
    let coroutine = awaitable(krait_testbed::coroutine_pending());
    let bridge: PyCoroutine<i64> = PyCoroutine::new(coroutine).unwrap();
    let task = bridge.schedule().unwrap();
    let canceller = task.canceller();
    canceller.cancel().unwrap();
    assert!(matches!(task.wait(), Err(InteropError::Cancelled)));
}

#[test]
fn test_cancel_after_conclusion_is_a_noop() {
    let coroutine = awaitable(krait_testbed::coroutine_value(0, 5));
    let bridge: PyCoroutine<i64> = PyCoroutine::new(coroutine).unwrap();
    let task = bridge.schedule().unwrap();
    let canceller = task.canceller();
    let result = task.wait().unwrap();
    {
        let py = runtime().acquire();
        assert!(!result.is_none(&py));
    }
    canceller.cancel().unwrap();
}

#[test]
fn test_concurrent_awaitables_each_get_their_own_result() {
    let first: PyCoroutine<i64> =
        PyCoroutine::new(awaitable(krait_testbed::coroutine_value(3, 1))).unwrap();
    let second: PyCoroutine<i64> =
        PyCoroutine::new(awaitable(krait_testbed::coroutine_value(1, 2))).unwrap();
    let third: PyCoroutine<i64> =
        PyCoroutine::new(awaitable(krait_testbed::coroutine_value(0, 3))).unwrap();

    let tasks = [
        first.schedule().unwrap(),
        second.schedule().unwrap(),
        third.schedule().unwrap(),
    ];
    let mut results = Vec::new();
    for task in tasks {
        let handle = task.wait().unwrap();
        let py = runtime().acquire();
        results.push(krait_interop::convert::decode::<i64>(&handle, &py).unwrap());
    }
    assert_eq!(results, vec![1, 2, 3]);
}

#[test]
fn test_scheduling_an_awaitable_twice_fails() {
    let coroutine = awaitable(krait_testbed::coroutine_value(0, 4));
    let bridge: PyCoroutine<i64> = PyCoroutine::new(coroutine).unwrap();
    let first = bridge.schedule().unwrap();
    assert!(first.wait().is_ok());

    let second = bridge.schedule().unwrap();
    let err = second.wait().unwrap_err();
    let InteropError::Python(exc) = err else {
        panic!("expected a projected exception, got {err}");
    };
    assert_eq!(exc.type_name(), "RuntimeError");
}

#[test]
fn test_non_awaitable_is_rejected_with_shape() {
    let obj = awaitable(krait_testbed::int_value(5));
    let err = PyCoroutine::<i64>::new(obj).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot convert `int` value where `coroutine` is required"
    );
}
