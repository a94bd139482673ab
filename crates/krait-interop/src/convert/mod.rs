//! Value Conversion
//!
//! Bidirectional, shape-driven conversion between host values and runtime
//! objects:
//!
//! - [`FromPy`] decodes a runtime object into a host value, validating
//!   structure first; no silent coercion, no silent truncation.
//! - [`ToPy`] encodes a host value as a new runtime object.
//! - [`Shape`] is the closed descriptor of what a host type expects; it
//!   is computed once per host type and cached ([`shape_of`]).
//!
//! Inspection of the runtime side goes through [`category_of`], which
//! checks concrete types first and protocol fallbacks last. Dict-like
//! types are checked before sequence types: many mapping objects also
//! satisfy the sequence protocol, and a mapping must decode as a mapping.
//!
//! Submodules carry the implementations: scalars, collections, tuples
//! (with the tail-packing rule at arity 8), and record decoding.

use std::any::TypeId;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{InteropError, InteropResult};
use crate::gil::GilGuard;
use crate::handle::Handle;

mod collections;
mod record;
mod scalar;
mod tuple;

pub use record::{decode_record, snake_case, FromPyRecord, Record};
pub use scalar::ByteString;

/// Structural descriptor of a host type, used for validation and for
/// naming the expected side of a conversion failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Any integer-valued host type.
    Int,
    /// A floating-point host type.
    Float,
    /// A boolean.
    Bool,
    /// A host string.
    Str,
    /// A byte string.
    Bytes,
    /// A value that may be the runtime's `None`.
    Optional(Box<Shape>),
    /// A homogeneous sequence.
    Sequence(Box<Shape>),
    /// A homogeneous mapping.
    Mapping(Box<Shape>, Box<Shape>),
    /// A fixed-arity heterogeneous tuple.
    Tuple(Vec<Shape>),
    /// A named record decoded attribute-by-attribute.
    Record(&'static str),
    /// A generator bridge.
    Iterator,
    /// An awaitable bridge.
    Coroutine,
    /// An async pull-stream bridge.
    AsyncIterator,
    /// A buffer-protocol view.
    Buffer,
    /// An opaque handle, passed through unconverted.
    Object,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Int => write!(f, "int"),
            Shape::Float => write!(f, "float"),
            Shape::Bool => write!(f, "bool"),
            Shape::Str => write!(f, "str"),
            Shape::Bytes => write!(f, "bytes"),
            Shape::Optional(inner) => write!(f, "{inner} | None"),
            Shape::Sequence(item) => write!(f, "list[{item}]"),
            Shape::Mapping(key, value) => write!(f, "dict[{key}, {value}]"),
            Shape::Tuple(items) => {
                write!(f, "tuple[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Shape::Record(name) => write!(f, "{name}"),
            Shape::Iterator => write!(f, "generator"),
            Shape::Coroutine => write!(f, "coroutine"),
            Shape::AsyncIterator => write!(f, "async iterator"),
            Shape::Buffer => write!(f, "buffer"),
            Shape::Object => write!(f, "object"),
        }
    }
}

/// A host type with a conversion shape.
pub trait PyShaped {
    /// The structural descriptor of this type.
    fn shape() -> Shape;
}

/// Decode a runtime object into a host value.
pub trait FromPy: PyShaped + Sized {
    /// Validate and convert. Fails with [`InteropError::Cast`] when the
    /// object does not satisfy this type's shape.
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self>;
}

/// Encode a host value as a new runtime object.
pub trait ToPy: PyShaped {
    /// Convert, returning a new owned reference.
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle>;
}

/// Decode `obj` as `T`.
pub fn decode<T: FromPy>(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<T> {
    T::from_py(obj, py)
}

/// Encode `value` as a runtime object.
pub fn encode<T: ToPy + ?Sized>(value: &T, py: &GilGuard<'_>) -> InteropResult<Handle> {
    value.to_py(py)
}

// ============================================================================
// Shape cache
// ============================================================================

static SHAPES: OnceLock<RwLock<FxHashMap<TypeId, &'static Shape>>> = OnceLock::new();

/// The cached shape of `T`, computed at most once per host type.
///
/// A lost race computes the shape twice and keeps one copy; both are
/// equal, so callers never observe the difference.
pub fn shape_of<T: PyShaped + 'static>() -> &'static Shape {
    let cache = SHAPES.get_or_init(|| RwLock::new(FxHashMap::default()));
    if let Some(shape) = cache.read().get(&TypeId::of::<T>()) {
        return shape;
    }
    let computed: &'static Shape = Box::leak(Box::new(T::shape()));
    *cache.write().entry(TypeId::of::<T>()).or_insert(computed)
}

// ============================================================================
// Runtime-side inspection
// ============================================================================

/// What kind of object the runtime handed us, for dispatch and error
/// messages. Concrete types first, protocol fallbacks last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    None,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Dict,
    List,
    Tuple,
    Generator,
    Coroutine,
    BufferExporter,
    Mapping,
    Sequence,
    Other,
}

/// Classify a runtime object.
///
/// `Bool` is checked before `Int` (the runtime's bool subclasses its
/// int), and dict-like categories before the sequence fallback.
pub fn category_of(obj: &Handle, py: &GilGuard<'_>) -> Category {
    let api = py.api();
    if obj.is_none(py) {
        Category::None
    } else if obj.is_instance_of(py, api.bool_type) {
        Category::Bool
    } else if obj.is_instance_of(py, api.long_type) {
        Category::Int
    } else if obj.is_instance_of(py, api.float_type) {
        Category::Float
    } else if obj.is_instance_of(py, api.str_type) {
        Category::Str
    } else if obj.is_instance_of(py, api.bytes_type) {
        Category::Bytes
    } else if obj.is_instance_of(py, api.dict_type) {
        Category::Dict
    } else if obj.is_instance_of(py, api.list_type) {
        Category::List
    } else if obj.is_instance_of(py, api.tuple_type) {
        Category::Tuple
    } else if obj.is_instance_of(py, api.gen_type) {
        Category::Generator
    } else if obj.is_instance_of(py, api.coro_type) {
        Category::Coroutine
    } else if unsafe { (py.api().check_buffer)(obj.as_ptr()) } != 0 {
        Category::BufferExporter
    } else if is_mapping_with_items(obj, py) {
        Category::Mapping
    } else if unsafe { (py.api().sequence_check)(obj.as_ptr()) } != 0 {
        Category::Sequence
    } else {
        Category::Other
    }
}

/// True for objects that satisfy the mapping protocol and expose
/// `items()`. The protocol check alone is too permissive; the decode path
/// relies on `items()`.
pub(crate) fn is_mapping_with_items(obj: &Handle, py: &GilGuard<'_>) -> bool {
    if obj.as_ptr().is_null() {
        return false;
    }
    (unsafe { (py.api().mapping_check)(obj.as_ptr()) != 0 })
        && obj.hasattr(py, "items").unwrap_or(false)
}

/// A conversion failure naming the expected shape and the actual runtime
/// type.
pub(crate) fn cast_error(expected: &Shape, obj: &Handle, py: &GilGuard<'_>) -> InteropError {
    let actual = obj
        .type_name(py)
        .unwrap_or_else(|_| "<unknown>".to_string());
    InteropError::cast(expected.to_string(), actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_shape_display_names_nested_types() {
        let shape = Shape::Mapping(
            Box::new(Shape::Str),
            Box::new(Shape::Sequence(Box::new(Shape::Int))),
        );
        assert_eq!(shape.to_string(), "dict[str, list[int]]");
    }

    #[test]
    fn test_shape_display_tuple() {
        let shape = Shape::Tuple(vec![Shape::Int, Shape::Optional(Box::new(Shape::Str))]);
        assert_eq!(shape.to_string(), "tuple[int, str | None]");
    }

    #[test]
    fn test_shape_cache_returns_same_descriptor() {
        let first = shape_of::<Vec<i64>>();
        let second = shape_of::<Vec<i64>>();
        assert!(std::ptr::eq(first, second));
        assert_eq!(*first, Shape::Sequence(Box::new(Shape::Int)));
    }
}
