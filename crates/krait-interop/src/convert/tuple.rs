//! Fixed-arity tuple conversions.
//!
//! Host tuples up to arity 8 convert positionally. At arity 8 the last
//! position is the overflow slot: when the eighth host type is itself
//! tuple-shaped, encoding flattens it into the native tuple and decoding
//! packs every native item past the seventh back into it. Longer native
//! tuples therefore decode as `(A, B, C, D, E, F, G, (H, ...))`, and the
//! nesting can repeat in the tail.

use std::mem;

use crate::convert::{cast_error, shape_of, FromPy, PyShaped, Shape, ToPy};
use crate::error::{InteropError, InteropResult};
use crate::except;
use crate::gil::GilGuard;
use crate::handle::{self, Handle};

/// Borrowed items of a native tuple with exactly `arity` elements.
fn tuple_items(
    obj: &Handle,
    py: &GilGuard<'_>,
    arity: usize,
    expected: &Shape,
) -> InteropResult<Vec<Handle>> {
    let size = checked_tuple_size(obj, py, expected)?;
    if size != arity as isize {
        return Err(InteropError::cast(
            expected.to_string(),
            format!("tuple of length {size}"),
        ));
    }
    collect_items(obj, py, 0, size)
}

fn checked_tuple_size(
    obj: &Handle,
    py: &GilGuard<'_>,
    expected: &Shape,
) -> InteropResult<isize> {
    if !obj.is_instance_of(py, py.api().tuple_type) {
        return Err(cast_error(expected, obj, py));
    }
    Ok(unsafe { (py.api().tuple_size)(obj.as_ptr()) })
}

fn collect_items(
    obj: &Handle,
    py: &GilGuard<'_>,
    start: isize,
    end: isize,
) -> InteropResult<Vec<Handle>> {
    let mut items = Vec::with_capacity((end - start).max(0) as usize);
    for index in start..end {
        let raw = unsafe { (py.api().tuple_get_item)(obj.as_ptr(), index) };
        items.push(unsafe { Handle::from_borrowed_reference(py, raw)? });
    }
    Ok(items)
}

/// Build a native tuple from already-encoded items, consuming their
/// references.
fn assemble_tuple(py: &GilGuard<'_>, items: Vec<Handle>) -> InteropResult<Handle> {
    let api = py.api();
    let raw = unsafe { (api.tuple_new)(items.len() as isize) };
    let tuple = unsafe { Handle::from_new_reference(py, raw)? };
    for (index, item) in items.into_iter().enumerate() {
        // tuple_set_item steals the reference.
        let item_ptr = item.as_ptr();
        mem::forget(item);
        let rc = unsafe { (api.tuple_set_item)(tuple.as_ptr(), index as isize, item_ptr) };
        if rc != 0 {
            return Err(except::take_pending(py, "tuple item store"));
        }
    }
    Ok(tuple)
}

macro_rules! tuple_conv_impl {
    ($arity:literal; $($name:ident : $idx:tt),+) => {
        impl<$($name: PyShaped),+> PyShaped for ($($name,)+) {
            fn shape() -> Shape {
                Shape::Tuple(vec![$($name::shape()),+])
            }
        }

        impl<$($name: FromPy + 'static),+> FromPy for ($($name,)+) {
            fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
                let items = tuple_items(obj, py, $arity, shape_of::<Self>())?;
                Ok(($($name::from_py(&items[$idx], py)?,)+))
            }
        }

        impl<$($name: ToPy),+> ToPy for ($($name,)+) {
            fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
                let encoded = vec![$(self.$idx.to_py(py)?),+];
                let refs: Vec<&Handle> = encoded.iter().collect();
                handle::new_tuple(py, &refs)
            }
        }
    };
}

tuple_conv_impl!(1; A: 0);
tuple_conv_impl!(2; A: 0, B: 1);
tuple_conv_impl!(3; A: 0, B: 1, C: 2);
tuple_conv_impl!(4; A: 0, B: 1, C: 2, D: 3);
tuple_conv_impl!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_conv_impl!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_conv_impl!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);

// Arity 8 carries the overflow slot and is written out by hand.

impl<A, B, C, D, E, F, G, H> PyShaped for (A, B, C, D, E, F, G, H)
where
    A: PyShaped,
    B: PyShaped,
    C: PyShaped,
    D: PyShaped,
    E: PyShaped,
    F: PyShaped,
    G: PyShaped,
    H: PyShaped,
{
    fn shape() -> Shape {
        Shape::Tuple(vec![
            A::shape(),
            B::shape(),
            C::shape(),
            D::shape(),
            E::shape(),
            F::shape(),
            G::shape(),
            H::shape(),
        ])
    }
}

impl<A, B, C, D, E, F, G, H> FromPy for (A, B, C, D, E, F, G, H)
where
    A: FromPy + 'static,
    B: FromPy + 'static,
    C: FromPy + 'static,
    D: FromPy + 'static,
    E: FromPy + 'static,
    F: FromPy + 'static,
    G: FromPy + 'static,
    H: FromPy + 'static,
{
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        let expected = shape_of::<Self>();
        let size = checked_tuple_size(obj, py, expected)?;
        let tail_is_tuple = matches!(shape_of::<H>(), Shape::Tuple(_));

        if tail_is_tuple {
            if size < 7 {
                return Err(InteropError::cast(
                    expected.to_string(),
                    format!("tuple of length {size}"),
                ));
            }
            let head = collect_items(obj, py, 0, 7)?;
            // Pack the native tail back into a fresh tuple for the
            // overflow slot.
            let mut tail_items = Vec::with_capacity((size - 7) as usize);
            for index in 7..size {
                let raw = unsafe { (py.api().tuple_get_item)(obj.as_ptr(), index) };
                tail_items.push(unsafe { Handle::from_borrowed_reference(py, raw)? });
            }
            let packed = assemble_tuple(py, tail_items)?;
            return Ok((
                A::from_py(&head[0], py)?,
                B::from_py(&head[1], py)?,
                C::from_py(&head[2], py)?,
                D::from_py(&head[3], py)?,
                E::from_py(&head[4], py)?,
                F::from_py(&head[5], py)?,
                G::from_py(&head[6], py)?,
                H::from_py(&packed, py)?,
            ));
        }

        let items = tuple_items(obj, py, 8, expected)?;
        Ok((
            A::from_py(&items[0], py)?,
            B::from_py(&items[1], py)?,
            C::from_py(&items[2], py)?,
            D::from_py(&items[3], py)?,
            E::from_py(&items[4], py)?,
            F::from_py(&items[5], py)?,
            G::from_py(&items[6], py)?,
            H::from_py(&items[7], py)?,
        ))
    }
}

impl<A, B, C, D, E, F, G, H> ToPy for (A, B, C, D, E, F, G, H)
where
    A: ToPy,
    B: ToPy,
    C: ToPy,
    D: ToPy,
    E: ToPy,
    F: ToPy,
    G: ToPy,
    H: ToPy + PyShaped + 'static,
{
    fn to_py(&self, py: &GilGuard<'_>) -> InteropResult<Handle> {
        let mut encoded = vec![
            self.0.to_py(py)?,
            self.1.to_py(py)?,
            self.2.to_py(py)?,
            self.3.to_py(py)?,
            self.4.to_py(py)?,
            self.5.to_py(py)?,
            self.6.to_py(py)?,
        ];
        let tail = self.7.to_py(py)?;

        if matches!(shape_of::<H>(), Shape::Tuple(_)) {
            // Flatten the overflow slot so the native tuple mirrors what
            // decoding expects to re-pack.
            let tail_len = unsafe { (py.api().tuple_size)(tail.as_ptr()) };
            for index in 0..tail_len {
                let raw = unsafe { (py.api().tuple_get_item)(tail.as_ptr(), index) };
                encoded.push(unsafe { Handle::from_borrowed_reference(py, raw)? });
            }
        } else {
            encoded.push(tail);
        }
        assemble_tuple(py, encoded)
    }
}
