//! Sequence, mapping and optional conversions.
//!
//! Decoding a sequence takes the exact-list fast path (borrowed item
//! access) when possible and falls back to the generic sequence protocol
//! otherwise. Mappings decode through `items()` so that dict subclasses
//! and non-dict mappings behave identically.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::mem;

use indexmap::IndexMap;

use crate::convert::{
    cast_error, category_of, shape_of, Category, FromPy, PyShaped, Shape, ToPy,
};
use crate::error::InteropResult;
use crate::except;
use crate::gil::GilGuard;
use crate::handle::Handle;

// ============================================================================
// Option
// ============================================================================

impl<T: PyShaped> PyShaped for Option<T> {
    fn shape() -> Shape {
        Shape::Optional(Box::new(T::shape()))
    }
}

impl<T: FromPy> FromPy for Option<T> {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        if obj.is_none(py) {
            Ok(None)
        } else {
            T::from_py(obj, py).map(Some)
        }
    }
}

impl<T: ToPy> ToPy for Option<T> {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        match self {
            Some(value) => value.to_py(py),
            None => Ok(Handle::none(py)),
        }
    }
}

// ============================================================================
// Handle passthrough
// ============================================================================

impl PyShaped for Handle {
    fn shape() -> Shape {
        Shape::Object
    }
}

impl FromPy for Handle {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        obj.clone_ref(py)
    }
}

impl ToPy for Handle {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        self.clone_ref(py)
    }
}

// ============================================================================
// Sequences
// ============================================================================

impl<T: PyShaped> PyShaped for Vec<T> {
    fn shape() -> Shape {
        Shape::Sequence(Box::new(T::shape()))
    }
}

impl<T: FromPy + 'static> FromPy for Vec<T> {
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        match category_of(obj, py) {
            Category::List => {
                let api = py.api();
                let count = unsafe { (api.list_size)(obj.as_ptr()) };
                let mut items = Vec::with_capacity(count.max(0) as usize);
                for index in 0..count {
                    let raw = unsafe { (api.list_get_item)(obj.as_ptr(), index) };
                    let item = unsafe { Handle::from_borrowed_reference(py, raw)? };
                    items.push(T::from_py(&item, py)?);
                }
                Ok(items)
            }
            // Tuples, bytes and arbitrary sequence-protocol objects share
            // the generic path; item access returns new references here.
            Category::Tuple | Category::Bytes | Category::Sequence => {
                let api = py.api();
                let count = unsafe { (api.sequence_size)(obj.as_ptr()) };
                if count < 0 {
                    return Err(except::take_pending(py, "sequence length"));
                }
                let mut items = Vec::with_capacity(count as usize);
                for index in 0..count {
                    let raw = unsafe { (api.sequence_get_item)(obj.as_ptr(), index) };
                    let item = unsafe { Handle::from_new_reference(py, raw)? };
                    items.push(T::from_py(&item, py)?);
                }
                Ok(items)
            }
            _ => Err(cast_error(shape_of::<Self>(), obj, py)),
        }
    }
}

impl<T: ToPy> ToPy for Vec<T> {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        encode_list(self.iter(), self.len(), py)
    }
}

impl<'a, T: PyShaped> PyShaped for &'a [T] {
    fn shape() -> Shape {
        Shape::Sequence(Box::new(T::shape()))
    }
}

impl<'a, T: ToPy> ToPy for &'a [T] {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        encode_list(self.iter(), self.len(), py)
    }
}

fn encode_list<'a, T: ToPy + 'a>(
    items: impl Iterator<Item = &'a T>,
    count: usize,
    py: &GilGuard<'_>,
) -> InteropResult<Handle> {
    let api = py.api();
    let raw = unsafe { (api.list_new)(count as isize) };
    let list = unsafe { Handle::from_new_reference(py, raw)? };
    for (index, item) in items.enumerate() {
        let encoded = item.to_py(py)?;
        // list_set_item steals the reference.
        let encoded_ptr = encoded.as_ptr();
        mem::forget(encoded);
        let rc = unsafe { (api.list_set_item)(list.as_ptr(), index as isize, encoded_ptr) };
        if rc != 0 {
            return Err(except::take_pending(py, "list item store"));
        }
    }
    Ok(list)
}

// ============================================================================
// Mappings
// ============================================================================

fn decode_mapping<K, V, M>(obj: &Handle, py: &GilGuard<'_>, expected: &Shape) -> InteropResult<M>
where
    K: FromPy,
    V: FromPy,
    M: FromIterator<(K, V)>,
{
    match category_of(obj, py) {
        Category::Dict | Category::Mapping => {}
        _ => return Err(cast_error(expected, obj, py)),
    }
    let api = py.api();
    let raw_items = unsafe { (api.mapping_items)(obj.as_ptr()) };
    let items = unsafe { Handle::from_new_reference(py, raw_items)? };
    let count = unsafe { (api.list_size)(items.as_ptr()) };
    (0..count)
        .map(|index| {
            let raw_pair = unsafe { (api.list_get_item)(items.as_ptr(), index) };
            let pair = unsafe { Handle::from_borrowed_reference(py, raw_pair)? };
            let raw_key = unsafe { (api.tuple_get_item)(pair.as_ptr(), 0) };
            let key = unsafe { Handle::from_borrowed_reference(py, raw_key)? };
            let raw_value = unsafe { (api.tuple_get_item)(pair.as_ptr(), 1) };
            let value = unsafe { Handle::from_borrowed_reference(py, raw_value)? };
            Ok((K::from_py(&key, py)?, V::from_py(&value, py)?))
        })
        .collect()
}

fn encode_mapping<'a, K, V>(
    entries: impl Iterator<Item = (&'a K, &'a V)>,
    py: &GilGuard<'_>,
) -> InteropResult<Handle>
where
    K: ToPy + 'a,
    V: ToPy + 'a,
{
    let api = py.api();
    let raw = unsafe { (api.dict_new)() };
    let dict = unsafe { Handle::from_new_reference(py, raw)? };
    for (key, value) in entries {
        let encoded_key = key.to_py(py)?;
        let encoded_value = value.to_py(py)?;
        // dict_set_item takes its own references; ours drop normally.
        let rc = unsafe {
            (api.dict_set_item)(dict.as_ptr(), encoded_key.as_ptr(), encoded_value.as_ptr())
        };
        if rc != 0 {
            return Err(except::take_pending(py, "dict item store"));
        }
    }
    Ok(dict)
}

impl<K: PyShaped, V: PyShaped> PyShaped for IndexMap<K, V> {
    fn shape() -> Shape {
        Shape::Mapping(Box::new(K::shape()), Box::new(V::shape()))
    }
}

impl<K, V> FromPy for IndexMap<K, V>
where
    K: FromPy + Hash + Eq + 'static,
    V: FromPy + 'static,
{
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        decode_mapping(obj, py, shape_of::<Self>())
    }
}

impl<K: ToPy, V: ToPy> ToPy for IndexMap<K, V> {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        encode_mapping(self.iter(), py)
    }
}

impl<K: PyShaped, V: PyShaped, S> PyShaped for HashMap<K, V, S> {
    fn shape() -> Shape {
        Shape::Mapping(Box::new(K::shape()), Box::new(V::shape()))
    }
}

impl<K, V, S> FromPy for HashMap<K, V, S>
where
    K: FromPy + Hash + Eq + 'static,
    V: FromPy + 'static,
    S: BuildHasher + Default + 'static,
{
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        decode_mapping(obj, py, shape_of::<Self>())
    }
}

impl<K: ToPy, V: ToPy, S> ToPy for HashMap<K, V, S> {
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        encode_mapping(self.iter(), py)
    }
}
