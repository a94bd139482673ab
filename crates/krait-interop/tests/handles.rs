//! Reference ownership and lock coordination against the double.

mod common;

use krait_interop::{gil, CompareOp, Handle, InteropError};
use krait_testbed::refcount;
use pretty_assertions::assert_eq;

use common::{own, runtime};

/// The deferred-release queue is process global; tests that assert on its
/// length take this lock so parallel test threads cannot perturb it.
static QUEUE_CHECK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[test]
fn test_clone_ref_owns_a_second_reference() {
    let rt = runtime();
    let py = rt.acquire();
    let ptr = krait_testbed::int_value(5);
    let handle = own(&py, ptr);
    assert_eq!(refcount(ptr), 1);

    let clone = handle.clone_ref(&py).unwrap();
    assert_eq!(refcount(ptr), 2);
    assert!(clone.is(&handle));

    drop(clone);
    assert_eq!(refcount(ptr), 1);
}

#[test]
fn test_dispose_is_idempotent_and_poisons_the_handle() {
    let rt = runtime();
    let py = rt.acquire();
    let ptr = krait_testbed::int_value(9);
    let mut handle = own(&py, ptr);
    let keeper = handle.clone_ref(&py).unwrap();

    handle.dispose();
    handle.dispose();
    assert!(!handle.is_valid());
    assert_eq!(refcount(ptr), 1);

    let err = handle.clone_ref(&py).unwrap_err();
    assert!(matches!(err, InteropError::Disposed { .. }));
    drop(keeper);
}

#[test]
fn test_drop_off_lock_defers_the_release() {
    let _serial = QUEUE_CHECK.lock().unwrap_or_else(|e| e.into_inner());
    let rt = runtime();
    let ptr;
    let keeper;
    let pending;
    {
        let py = rt.acquire();
        ptr = krait_testbed::int_value(33);
        keeper = own(&py, ptr);
        pending = keeper.clone_ref(&py).unwrap();
        assert_eq!(refcount(ptr), 2);
    }

    // No guard held: the drop must queue, not touch the runtime.
    let before = rt.deferred_release_count();
    drop(pending);
    assert_eq!(rt.deferred_release_count(), before + 1);
    assert_eq!(refcount(ptr), 2);

    // The next outermost release drains the queue.
    drop(rt.acquire());
    assert_eq!(rt.deferred_release_count(), 0);
    assert_eq!(refcount(ptr), 1);
    drop(keeper);
}

#[test]
fn test_cross_thread_drop_reaches_the_queue() {
    let _serial = QUEUE_CHECK.lock().unwrap_or_else(|e| e.into_inner());
    let rt = runtime();
    let py = rt.acquire();
    let ptr = krait_testbed::int_value(77);
    let keeper = own(&py, ptr);
    let travelling = keeper.clone_ref(&py).unwrap();
    drop(py);

    std::thread::spawn(move || drop(travelling))
        .join()
        .unwrap();

    drop(rt.acquire());
    assert_eq!(refcount(ptr), 1);
    drop(keeper);
}

#[test]
fn test_lock_nesting_counts_without_reentering() {
    let rt = runtime();
    assert!(!gil::is_acquired());
    let outer = rt.acquire();
    assert!(gil::is_acquired());
    {
        let _inner = rt.acquire();
        assert!(gil::is_acquired());
    }
    assert!(gil::is_acquired());
    drop(outer);
    assert!(!gil::is_acquired());
}

#[test]
fn test_acquire_blocks_until_the_holder_releases() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let rt = runtime();
    let released = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&released);

    let holder = rt.acquire();
    let waiter = std::thread::spawn(move || {
        let py = runtime().acquire();
        // Visible only if the flag was set before this acquisition went
        // through, i.e. before the holder dropped its guard.
        let ordered = seen.load(Ordering::SeqCst);
        drop(py);
        ordered
    });

    // Give the waiter time to park on the lock.
    std::thread::sleep(std::time::Duration::from_millis(100));
    released.store(true, Ordering::SeqCst);
    drop(holder);

    assert!(waiter.join().unwrap());
}

#[test]
fn test_none_identity_and_truthiness() {
    let rt = runtime();
    let py = rt.acquire();
    let none = Handle::none(&py);
    assert!(none.is_none(&py));
    assert!(!none.is_truthy(&py).unwrap());

    let five = own(&py, krait_testbed::int_value(5));
    assert!(!five.is_none(&py));
    assert!(five.is_truthy(&py).unwrap());
}

#[test]
fn test_str_and_type_name() {
    let rt = runtime();
    let py = rt.acquire();
    let five = own(&py, krait_testbed::int_value(5));
    assert_eq!(five.str_text(&py).unwrap(), "5");
    assert_eq!(five.type_name(&py).unwrap(), "int");

    let text = own(&py, krait_testbed::str_value("hi"));
    assert_eq!(text.repr_text(&py).unwrap(), "'hi'");
}

#[test]
fn test_rich_compare_orders_numbers() {
    let rt = runtime();
    let py = rt.acquire();
    let two = own(&py, krait_testbed::int_value(2));
    let three = own(&py, krait_testbed::int_value(3));
    assert!(two.rich_compare(&py, &three, CompareOp::Lt).unwrap());
    assert!(!two.rich_compare(&py, &three, CompareOp::Eq).unwrap());
    assert!(three.rich_compare(&py, &two, CompareOp::Ge).unwrap());
}

#[test]
fn test_rich_compare_type_error_is_projected() {
    let rt = runtime();
    let py = rt.acquire();
    let two = own(&py, krait_testbed::int_value(2));
    let none = Handle::none(&py);
    let err = two.rich_compare(&py, &none, CompareOp::Lt).unwrap_err();
    let InteropError::Python(exc) = err else {
        panic!("expected a projected exception");
    };
    assert_eq!(exc.type_name(), "TypeError");
}

#[test]
fn test_unknown_import_is_projected() {
    let rt = runtime();
    let py = rt.acquire();
    let err = krait_interop::import_module(&py, "no_such_module").unwrap_err();
    let InteropError::Python(exc) = err else {
        panic!("expected a projected exception");
    };
    assert_eq!(exc.type_name(), "RuntimeError");
    assert!(exc.message().contains("no_such_module"));
}

#[test]
fn test_missing_attribute_error_carries_names() {
    let rt = runtime();
    let py = rt.acquire();
    let five = own(&py, krait_testbed::int_value(5));
    assert!(!five.hasattr(&py, "missing").unwrap());
    let err = five.getattr(&py, "missing").unwrap_err();
    let InteropError::Python(exc) = err else {
        panic!("expected a projected exception");
    };
    assert_eq!(exc.type_name(), "AttributeError");
    assert!(exc.message().contains("missing"));
}
