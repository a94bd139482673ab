//! Buffer bridge behavior against scripted exporter doubles.

mod common;

use krait_interop::{InteropError, PyBuffer};
use krait_testbed::export_count;
use pretty_assertions::assert_eq;

use common::{own, runtime};

#[test]
fn test_flat_f64_view() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_1d_f64(&[1.0, 2.5, -3.0], false));
    let buffer = PyBuffer::acquire(&exporter, &py).unwrap();

    assert_eq!(buffer.dimensions().unwrap(), 1);
    assert_eq!(buffer.item_size().unwrap(), 8);
    assert_eq!(buffer.format().unwrap(), "d");
    assert_eq!(buffer.as_slice::<f64>().unwrap(), &[1.0, 2.5, -3.0]);
    assert_eq!(export_count(exporter.as_ptr()), 1);
}

#[test]
fn test_writes_persist_across_exports() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_1d_f64(&[0.0, 0.0], false));

    let mut buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    buffer.as_mut_slice::<f64>().unwrap()[1] = 42.0;
    buffer.release(&py);

    let buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    assert_eq!(buffer.as_slice::<f64>().unwrap(), &[0.0, 42.0]);
}

#[test]
fn test_read_only_export_refuses_writable_view() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_1d_f64(&[1.0], true));
    let mut buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    assert!(buffer.is_read_only().unwrap());
    assert!(matches!(
        buffer.as_mut_slice::<f64>(),
        Err(InteropError::BufferReadOnly)
    ));
    // The read side still works.
    assert_eq!(buffer.as_slice::<f64>().unwrap(), &[1.0]);
}

#[test]
fn test_element_type_must_match_the_format() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_1d_f64(&[1.0], false));
    let buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    let err = buffer.as_slice::<i32>().unwrap_err();
    assert_eq!(
        err.to_string(),
        "buffer format `d` does not describe `i32` items"
    );
}

#[test]
fn test_u8_view_accepts_byte_format() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_1d_u8(&[7, 8, 9], false));
    let buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    assert_eq!(buffer.as_slice::<u8>().unwrap(), &[7, 8, 9]);
}

#[test]
fn test_foreign_byte_order_is_refused_and_released() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_foreign_order_u16(&[1, 2]));
    let err = PyBuffer::acquire(&exporter, &py).unwrap_err();
    assert!(matches!(err, InteropError::BufferByteOrder { .. }));
    // The failed acquisition must not leak the export pin.
    assert_eq!(export_count(exporter.as_ptr()), 0);
}

#[test]
fn test_rows_over_a_padded_export() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(
        &py,
        krait_testbed::buffer_2d_i32(&[vec![1, 2, 3], vec![4, 5, 6]], 4, false),
    );
    let buffer = PyBuffer::acquire(&exporter, &py).unwrap();

    let rows = buffer.rows::<i32>().unwrap();
    assert_eq!(rows.row_count(), 2);
    assert_eq!(rows.row_len(), 3);
    assert_eq!(rows.row(0).unwrap(), &[1, 2, 3]);
    assert_eq!(rows.row(1).unwrap(), &[4, 5, 6]);
    assert!(rows.row(2).is_none());

    // Padding makes the flat view ill-defined.
    assert!(matches!(
        buffer.as_slice::<i32>(),
        Err(InteropError::BufferLayout { .. })
    ));
}

#[test]
fn test_rows_mut_writes_one_row() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(
        &py,
        krait_testbed::buffer_2d_i32(&[vec![0, 0], vec![0, 0]], 0, false),
    );
    let mut buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    {
        let mut rows = buffer.rows_mut::<i32>().unwrap();
        rows.row_mut(1).unwrap().copy_from_slice(&[8, 9]);
    }
    let rows = buffer.rows::<i32>().unwrap();
    assert_eq!(rows.row(0).unwrap(), &[0, 0]);
    assert_eq!(rows.row(1).unwrap(), &[8, 9]);
}

#[test]
fn test_transposed_export_is_refused() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_2d_i32_transposed(2, 3));
    let buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    let err = buffer.rows::<i32>().unwrap_err();
    let InteropError::BufferLayout { message } = err else {
        panic!("expected a layout error");
    };
    assert!(message.contains("transposed"));
}

#[test]
fn test_release_is_idempotent_and_poisons_views() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_1d_f64(&[1.0], false));
    let mut buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    assert_eq!(export_count(exporter.as_ptr()), 1);

    buffer.release(&py);
    buffer.release(&py);
    assert_eq!(export_count(exporter.as_ptr()), 0);
    assert!(matches!(
        buffer.as_slice::<f64>(),
        Err(InteropError::Disposed { .. })
    ));
}

#[test]
fn test_released_view_refuses_metadata_reads() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_1d_f64(&[1.0, 2.0], false));
    let mut buffer = PyBuffer::acquire(&exporter, &py).unwrap();
    buffer.release(&py);

    assert!(matches!(buffer.len_bytes(), Err(InteropError::Disposed { .. })));
    assert!(matches!(buffer.item_size(), Err(InteropError::Disposed { .. })));
    assert!(matches!(buffer.dimensions(), Err(InteropError::Disposed { .. })));
    assert!(matches!(buffer.format(), Err(InteropError::Disposed { .. })));
    assert!(matches!(buffer.is_read_only(), Err(InteropError::Disposed { .. })));
    assert!(matches!(
        buffer.as_mut_slice::<f64>(),
        Err(InteropError::Disposed { .. })
    ));
}

#[test]
fn test_drop_returns_the_pin() {
    let rt = runtime();
    let py = rt.acquire();
    let exporter = own(&py, krait_testbed::buffer_1d_f64(&[1.0], false));
    {
        let _buffer = PyBuffer::acquire(&exporter, &py).unwrap();
        assert_eq!(export_count(exporter.as_ptr()), 1);
    }
    assert_eq!(export_count(exporter.as_ptr()), 0);
}

#[test]
fn test_non_exporter_is_rejected_with_shape() {
    let rt = runtime();
    let py = rt.acquire();
    let obj = own(&py, krait_testbed::int_value(5));
    let err = PyBuffer::acquire(&obj, &py).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot convert `int` value where `buffer` is required"
    );
}
