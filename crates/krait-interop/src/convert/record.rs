//! Record decoding: runtime objects to host structs, attribute by
//! attribute.
//!
//! A host struct implements [`FromPyRecord`] (usually through the
//! [`py_record!`](crate::py_record) macro) and reads its fields from a
//! [`Record`], which resolves each field name to a snake_case runtime
//! attribute. A field may also bind the object itself, keeping a handle
//! for later method calls.

use crate::convert::FromPy;
use crate::error::InteropResult;
use crate::gil::GilGuard;
use crate::handle::Handle;

/// A runtime object being decoded attribute-by-attribute.
pub struct Record<'a, 'py> {
    obj: &'a Handle,
    py: &'a GilGuard<'py>,
}

impl<'a, 'py> Record<'a, 'py> {
    /// Read and decode the attribute backing `field`.
    ///
    /// The attribute name is the snake_case form of the field name, so
    /// hosts with other naming conventions map automatically.
    pub fn field<T: FromPy>(&self, field: &str) -> InteropResult<T> {
        let attr = self.obj.getattr(self.py, &snake_case(field))?;
        T::from_py(&attr, self.py)
    }

    /// Read and decode the attribute named `name` verbatim.
    pub fn attr<T: FromPy>(&self, name: &str) -> InteropResult<T> {
        let attr = self.obj.getattr(self.py, name)?;
        T::from_py(&attr, self.py)
    }

    /// Bind the record object itself, for fields that keep the handle.
    pub fn bind_self(&self) -> InteropResult<Handle> {
        self.obj.clone_ref(self.py)
    }
}

/// A host struct that decodes from runtime object attributes.
pub trait FromPyRecord: Sized {
    /// Name used in shape descriptions and cast errors.
    const RECORD_NAME: &'static str;

    /// Build the struct from the record's attributes.
    fn from_record(record: &Record<'_, '_>) -> InteropResult<Self>;
}

/// Decode `obj` as the record type `T`.
pub fn decode_record<T: FromPyRecord>(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<T> {
    T::from_record(&Record { obj, py })
}

/// Convert a PascalCase or camelCase name to snake_case. Names already in
/// snake_case pass through unchanged.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

/// Wire a struct into the conversion framework as a record.
///
/// ```ignore
/// struct Point {
///     x: f64,
///     y: f64,
/// }
///
/// py_record!(Point { x: f64, y: f64 });
/// ```
#[macro_export]
macro_rules! py_record {
    ($ty:ident { $($field:ident : $fty:ty),+ $(,)? }) => {
        impl $crate::convert::FromPyRecord for $ty {
            const RECORD_NAME: &'static str = stringify!($ty);

            fn from_record(
                record: &$crate::convert::Record<'_, '_>,
            ) -> $crate::InteropResult<Self> {
                Ok(Self {
                    $($field: record.field::<$fty>(stringify!($field))?,)+
                })
            }
        }

        impl $crate::convert::PyShaped for $ty {
            fn shape() -> $crate::convert::Shape {
                $crate::convert::Shape::Record(stringify!($ty))
            }
        }

        impl $crate::convert::FromPy for $ty {
            fn from_py(
                obj: &$crate::Handle,
                py: &$crate::GilGuard<'_>,
            ) -> $crate::InteropResult<Self> {
                $crate::convert::decode_record(obj, py)
            }
        }
    };
}

impl<'a, 'py> std::fmt::Debug for Record<'a, 'py> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Record({:?})", self.obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snake_case_pascal() {
        assert_eq!(snake_case("UserName"), "user_name");
        assert_eq!(snake_case("HTTPStatus"), "httpstatus");
    }

    #[test]
    fn test_snake_case_camel() {
        assert_eq!(snake_case("createdAt2"), "created_at2");
    }

    #[test]
    fn test_snake_case_identity() {
        assert_eq!(snake_case("already_snake"), "already_snake");
    }
}
