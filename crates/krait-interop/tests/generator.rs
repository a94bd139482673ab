//! Iterator bridge behavior against scripted generator doubles.

mod common;

use krait_interop::convert::encode;
use krait_interop::{InteropError, IteratorState, PyGenerator, ValueIter};
use pretty_assertions::assert_eq;

use common::{own, runtime};

#[test]
fn test_generator_yields_then_exposes_terminal_value() {
    let rt = runtime();
    let generator = {
        let py = rt.acquire();
        own(&py, krait_testbed::int_generator(&[10, 20], 42))
    };
    let mut bridge: PyGenerator<i64, i64, i64> = PyGenerator::new(generator).unwrap();
    assert_eq!(bridge.state(), IteratorState::Created);

    assert!(bridge.advance().unwrap());
    assert_eq!(bridge.current(), Some(&10));
    assert_eq!(bridge.state(), IteratorState::Active);

    assert!(bridge.advance().unwrap());
    assert_eq!(bridge.current(), Some(&20));

    assert!(!bridge.advance().unwrap());
    assert_eq!(bridge.state(), IteratorState::Exhausted);
    assert_eq!(bridge.current(), None);
    assert_eq!(bridge.return_value(), Some(&42));

    // Advancing past exhaustion stays a quiet no-op.
    assert!(!bridge.advance().unwrap());
}

#[test]
fn test_send_feeds_the_suspended_yield() {
    let rt = runtime();
    let generator = {
        let py = rt.acquire();
        own(&py, krait_testbed::echo_generator(7, 3))
    };
    let mut bridge: PyGenerator<i64, i64, Option<i64>> = PyGenerator::new(generator).unwrap();

    assert!(bridge.advance().unwrap());
    assert_eq!(bridge.current(), Some(&7));

    assert!(bridge.send(&55).unwrap());
    assert_eq!(bridge.current(), Some(&55));

    assert!(bridge.send(&56).unwrap());
    assert_eq!(bridge.current(), Some(&56));

    assert!(!bridge.advance().unwrap());
    assert_eq!(bridge.return_value(), Some(&None));
}

#[test]
fn test_failure_mid_iteration_projects_and_poisons() {
    let rt = runtime();
    let generator = {
        let py = rt.acquire();
        own(&py, krait_testbed::failing_generator(&[1, 2, 3], 1, "boom"))
    };
    let mut bridge: PyGenerator<i64, i64, Option<i64>> = PyGenerator::new(generator).unwrap();

    assert!(bridge.advance().unwrap());
    assert_eq!(bridge.current(), Some(&1));

    let err = bridge.advance().unwrap_err();
    let InteropError::Python(exc) = err else {
        panic!("expected a projected exception");
    };
    assert_eq!(exc.type_name(), "ValueError");
    assert_eq!(exc.message(), "boom");
    let trace = exc.stack_trace().unwrap();
    assert!(trace.iter().any(|line| line.contains("worker.py")));

    assert_eq!(bridge.state(), IteratorState::Failed);
    assert!(matches!(
        bridge.advance(),
        Err(InteropError::Disposed { .. })
    ));
}

#[test]
fn test_close_is_idempotent() {
    let rt = runtime();
    let generator = {
        let py = rt.acquire();
        own(&py, krait_testbed::int_generator(&[1], 0))
    };
    let mut bridge: PyGenerator<i64, i64, i64> = PyGenerator::new(generator).unwrap();
    assert!(bridge.advance().unwrap());

    bridge.close().unwrap();
    bridge.close().unwrap();
    assert_eq!(bridge.state(), IteratorState::Closed);
    assert!(matches!(
        bridge.advance(),
        Err(InteropError::Disposed { .. })
    ));
}

#[test]
fn test_drop_closes_a_suspended_generator() {
    let rt = runtime();
    let (generator, ptr) = {
        let py = rt.acquire();
        let ptr = krait_testbed::int_generator(&[1, 2, 3], 0);
        let keeper = own(&py, ptr);
        let for_bridge = keeper.clone_ref(&py).unwrap();
        std::mem::forget(keeper);
        (for_bridge, ptr)
    };

    {
        let mut bridge: PyGenerator<i64, i64, i64> = PyGenerator::new(generator).unwrap();
        assert!(bridge.advance().unwrap());
        assert!(!krait_testbed::generator_closed(ptr));
    }
    assert!(krait_testbed::generator_closed(ptr));
}

#[test]
fn test_non_generator_is_rejected_with_shape() {
    let rt = runtime();
    let obj = {
        let py = rt.acquire();
        own(&py, krait_testbed::int_value(5))
    };
    let err = PyGenerator::<i64, i64, i64>::new(obj).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot convert `int` value where `generator` is required"
    );
}

#[test]
fn test_value_iter_over_a_list() {
    let rt = runtime();
    let list = {
        let py = rt.acquire();
        encode(&vec![3i64, 1, 4], &py).unwrap()
    };
    let items: Vec<i64> = ValueIter::<i64>::new(&list)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(items, vec![3, 1, 4]);
}

#[test]
fn test_value_iter_drains_a_generator() {
    let rt = runtime();
    let generator = {
        let py = rt.acquire();
        own(&py, krait_testbed::int_generator(&[5, 6], 0))
    };
    let items: Vec<i64> = ValueIter::<i64>::new(&generator)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(items, vec![5, 6]);
}

#[test]
fn test_value_iter_surfaces_mid_stream_failure() {
    let rt = runtime();
    let generator = {
        let py = rt.acquire();
        own(&py, krait_testbed::failing_generator(&[9], 1, "cut short"))
    };
    let mut iter = ValueIter::<i64>::new(&generator).unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), 9);
    let err = iter.next().unwrap().unwrap_err();
    assert!(err.is_python(), "got {err}");
    assert!(iter.next().is_none());
}
