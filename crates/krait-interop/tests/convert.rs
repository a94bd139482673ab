//! Conversion behavior against the in-process runtime double.

mod common;

use indexmap::IndexMap;
use krait_interop::convert::{decode, encode, ByteString};
use krait_interop::{py_record, Handle, InteropError};
use pretty_assertions::assert_eq;

use common::{own, runtime};

#[test]
fn test_i64_roundtrip() {
    let py = runtime().acquire();
    let obj = encode(&42i64, &py).unwrap();
    assert_eq!(decode::<i64>(&obj, &py).unwrap(), 42);
}

#[test]
fn test_bool_decodes_as_int_but_not_the_reverse() {
    let py = runtime().acquire();
    let truth = encode(&true, &py).unwrap();
    // bool subclasses int, so the widening direction is allowed.
    assert_eq!(decode::<i64>(&truth, &py).unwrap(), 1);

    let one = own(&py, krait_testbed::int_value(1));
    let err = decode::<bool>(&one, &py).unwrap_err();
    assert!(matches!(err, InteropError::Cast { .. }), "got {err}");
    assert_eq!(
        err.to_string(),
        "cannot convert `int` value where `bool` is required"
    );
}

#[test]
fn test_int_never_coerces_to_float() {
    let py = runtime().acquire();
    let three = own(&py, krait_testbed::int_value(3));
    assert!(matches!(
        decode::<f64>(&three, &py),
        Err(InteropError::Cast { .. })
    ));
}

#[test]
fn test_float_roundtrip() {
    let py = runtime().acquire();
    let obj = encode(&2.5f64, &py).unwrap();
    assert_eq!(decode::<f64>(&obj, &py).unwrap(), 2.5);
}

#[test]
fn test_narrow_integer_overflow_is_rejected() {
    let py = runtime().acquire();
    let obj = own(&py, krait_testbed::int_value(300));
    let err = decode::<u8>(&obj, &py).unwrap_err();
    assert!(matches!(
        err,
        InteropError::IntegerOverflow {
            value: 300,
            target: "u8"
        }
    ));

    let negative = own(&py, krait_testbed::int_value(-1));
    assert!(matches!(
        decode::<u32>(&negative, &py),
        Err(InteropError::IntegerOverflow { .. })
    ));
}

#[test]
fn test_string_roundtrip() {
    let py = runtime().acquire();
    let obj = encode(&"grüße".to_string(), &py).unwrap();
    assert_eq!(decode::<String>(&obj, &py).unwrap(), "grüße");
}

#[test]
fn test_bytes_roundtrip_and_sequence_view() {
    let py = runtime().acquire();
    let obj = encode(&ByteString(vec![1, 2, 255]), &py).unwrap();
    assert_eq!(
        decode::<ByteString>(&obj, &py).unwrap(),
        ByteString(vec![1, 2, 255])
    );
    // bytes also satisfies the sequence protocol, one int per byte.
    assert_eq!(decode::<Vec<i64>>(&obj, &py).unwrap(), vec![1, 2, 255]);
}

#[test]
fn test_optional_none_and_value() {
    let py = runtime().acquire();
    let none = own(&py, krait_testbed::none_value());
    assert_eq!(decode::<Option<i64>>(&none, &py).unwrap(), None);
    assert!(matches!(
        decode::<i64>(&none, &py),
        Err(InteropError::Cast { .. })
    ));

    let five = own(&py, krait_testbed::int_value(5));
    assert_eq!(decode::<Option<i64>>(&five, &py).unwrap(), Some(5));

    let encoded_none = encode(&None::<i64>, &py).unwrap();
    assert!(encoded_none.is_none(&py));
}

#[test]
fn test_vec_roundtrip() {
    let py = runtime().acquire();
    let obj = encode(&vec![1i64, 2, 3], &py).unwrap();
    assert_eq!(decode::<Vec<i64>>(&obj, &py).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_vec_decodes_from_tuple() {
    let py = runtime().acquire();
    let obj = encode(&(1i64, 2i64, 3i64), &py).unwrap();
    assert_eq!(decode::<Vec<i64>>(&obj, &py).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_vec_rejects_non_sequence() {
    let py = runtime().acquire();
    let obj = own(&py, krait_testbed::int_value(7));
    let err = decode::<Vec<i64>>(&obj, &py).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot convert `int` value where `list[int]` is required"
    );
}

#[test]
fn test_mapping_roundtrip_preserves_order() {
    let py = runtime().acquire();
    let mut map = IndexMap::new();
    map.insert("b".to_string(), 2i64);
    map.insert("a".to_string(), 1i64);
    let obj = encode(&map, &py).unwrap();
    let back: IndexMap<String, i64> = decode(&obj, &py).unwrap();
    assert_eq!(back, map);
    assert_eq!(
        back.keys().cloned().collect::<Vec<_>>(),
        vec!["b".to_string(), "a".to_string()]
    );
}

#[test]
fn test_mapping_proxy_decodes_as_mapping() {
    let py = runtime().acquire();
    let proxy = own(
        &py,
        krait_testbed::mapping_proxy(vec![
            (krait_testbed::str_value("x"), krait_testbed::int_value(10)),
            (krait_testbed::str_value("y"), krait_testbed::int_value(20)),
        ]),
    );
    let map: IndexMap<String, i64> = decode(&proxy, &py).unwrap();
    assert_eq!(map.get("x"), Some(&10));
    assert_eq!(map.get("y"), Some(&20));
}

#[test]
fn test_mapping_wins_over_sequence_ambiguity() {
    // A mapping proxy also satisfies the sequence protocol; it must
    // still decode as a mapping, never as its key sequence.
    let py = runtime().acquire();
    let proxy = own(
        &py,
        krait_testbed::mapping_proxy(vec![(
            krait_testbed::str_value("k"),
            krait_testbed::int_value(1),
        )]),
    );
    let map: IndexMap<String, i64> = decode(&proxy, &py).unwrap();
    assert_eq!(map.len(), 1);
}

#[test]
fn test_tuple_roundtrip() {
    let py = runtime().acquire();
    let value = (7i64, "seven".to_string(), true);
    let obj = encode(&value, &py).unwrap();
    assert_eq!(decode::<(i64, String, bool)>(&obj, &py).unwrap(), value);
}

#[test]
fn test_tuple_arity_mismatch_names_expected_shape() {
    let py = runtime().acquire();
    let obj = encode(&(1i64, 2i64, 3i64), &py).unwrap();
    let err = decode::<(i64, i64)>(&obj, &py).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot convert `tuple of length 3` value where `tuple[int, int]` is required"
    );
}

#[test]
fn test_tuple_overflow_slot_flattens_and_repacks() {
    let py = runtime().acquire();
    let value = (1i64, 2i64, 3i64, 4i64, 5i64, 6i64, 7i64, (8i64, 9i64));
    let obj = encode(&value, &py).unwrap();

    // The native form is flat: nine integer positions, not eight.
    let flat: Vec<i64> = decode(&obj, &py).unwrap();
    assert_eq!(flat, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);

    let back: (i64, i64, i64, i64, i64, i64, i64, (i64, i64)) = decode(&obj, &py).unwrap();
    assert_eq!(back, value);
}

#[test]
fn test_tuple_overflow_slot_accepts_empty_tail() {
    let py = runtime().acquire();
    type Wide = (i64, i64, i64, i64, i64, i64, i64, (i64,));
    let value: Wide = (1, 2, 3, 4, 5, 6, 7, (8,));
    let obj = encode(&value, &py).unwrap();
    let flat: Vec<i64> = decode(&obj, &py).unwrap();
    assert_eq!(flat, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(decode::<Wide>(&obj, &py).unwrap(), value);
}

#[test]
fn test_handle_passthrough_preserves_identity() {
    let py = runtime().acquire();
    let obj = own(&py, krait_testbed::int_value(11));
    let through: Handle = decode(&obj, &py).unwrap();
    assert!(through.is(&obj));
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, PartialEq)]
struct Measurement {
    sensor_name: String,
    reading: f64,
    flagged: bool,
}

py_record!(Measurement {
    sensor_name: String,
    reading: f64,
    flagged: bool,
});

#[test]
fn test_record_decodes_from_attributes() {
    let py = runtime().acquire();
    let obj = own(
        &py,
        krait_testbed::object_with_attrs(vec![
            ("sensor_name", krait_testbed::str_value("probe-1")),
            ("reading", krait_testbed::float_value(21.5)),
            ("flagged", krait_testbed::int_value(0)),
        ]),
    );
    // "flagged" is an int attribute; bool decoding must reject it.
    let err = decode::<Measurement>(&obj, &py).unwrap_err();
    assert!(matches!(err, InteropError::Cast { .. }));
}

#[test]
fn test_record_roundtrip_of_valid_object() {
    let py = runtime().acquire();
    let flag = encode(&true, &py).unwrap();
    let flag_ptr = flag.as_ptr();
    std::mem::forget(flag);
    let obj = own(
        &py,
        krait_testbed::object_with_attrs(vec![
            ("sensor_name", krait_testbed::str_value("probe-1")),
            ("reading", krait_testbed::float_value(21.5)),
            ("flagged", flag_ptr),
        ]),
    );
    let record: Measurement = decode(&obj, &py).unwrap();
    assert_eq!(
        record,
        Measurement {
            sensor_name: "probe-1".to_string(),
            reading: 21.5,
            flagged: true,
        }
    );
}

#[test]
fn test_record_missing_attribute_projects_error() {
    let py = runtime().acquire();
    let obj = own(
        &py,
        krait_testbed::object_with_attrs(vec![(
            "sensor_name",
            krait_testbed::str_value("probe-2"),
        )]),
    );
    let err = decode::<Measurement>(&obj, &py).unwrap_err();
    let InteropError::Python(exc) = err else {
        panic!("expected a projected exception, got {err}");
    };
    assert_eq!(exc.type_name(), "AttributeError");
}
