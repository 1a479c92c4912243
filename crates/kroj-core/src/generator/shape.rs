//! Structural description of native types.
//!
//! A [`Shape`] is what the generator sees of a Rust type: a scalar, an
//! object with named properties, a sequence, a map or an enumeration.
//! Object properties are produced by a thunk, so a type that refers to
//! itself (directly or through other types) still has a finite shape.

use crate::descriptor::ScalarKind;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Types that can describe their own structure.
///
/// # Example
///
/// ```
/// use kroj_core::generator::{ObjectShape, Property, ProtoShape, Shape};
///
/// struct Node {
///     label: String,
///     children: Vec<Node>,
/// }
///
/// impl ProtoShape for Node {
///     fn shape() -> Shape {
///         Shape::Object(ObjectShape::new("Node", || {
///             vec![
///                 Property::of::<String>("label"),
///                 Property::of::<Vec<Node>>("children"),
///             ]
///         }))
///     }
/// }
/// ```
pub trait ProtoShape {
    /// Returns the structural shape of the type
    fn shape() -> Shape;
}

/// Structural shape of a native type
#[derive(Debug, Clone)]
pub enum Shape {
    /// A single scalar value
    Scalar(ScalarKind),
    /// A named record with properties
    Object(ObjectShape),
    /// A sequence of elements
    Array(Box<Shape>),
    /// A key/value mapping
    Map {
        /// Key shape, must be an integral, bool or string scalar
        key: Box<Shape>,
        /// Value shape
        value: Box<Shape>,
    },
    /// A named enumeration
    Enum(EnumShape),
}

impl Shape {
    /// Shorthand for an array of `element`
    pub fn array(element: Shape) -> Self {
        Shape::Array(Box::new(element))
    }

    /// Shorthand for a map
    pub fn map(key: Shape, value: Shape) -> Self {
        Shape::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// Short description used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Shape::Scalar(_) => "scalar",
            Shape::Object(_) => "object",
            Shape::Array(_) => "array",
            Shape::Map { .. } => "map",
            Shape::Enum(_) => "enum",
        }
    }
}

type PropertyThunk = Arc<dyn Fn() -> Vec<Property> + Send + Sync>;

/// A named record whose properties are computed on demand
#[derive(Clone)]
pub struct ObjectShape {
    name: String,
    properties: PropertyThunk,
}

impl ObjectShape {
    /// Creates an object shape
    pub fn new(
        name: impl Into<String>,
        properties: impl Fn() -> Vec<Property> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            properties: Arc::new(properties),
        }
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the property list
    pub fn properties(&self) -> Vec<Property> {
        (self.properties)()
    }
}

impl fmt::Debug for ObjectShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Properties are not expanded: they may refer back to this object
        f.debug_struct("ObjectShape")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One property of an object
#[derive(Debug, Clone)]
pub struct Property {
    /// Property name, used as the field name
    pub name: String,
    /// Property shape
    pub shape: Shape,
    /// Explicit field number
    pub number: Option<u32>,
    /// Whether the property must be present
    pub required: bool,
}

impl Property {
    /// Creates an optional, unnumbered property
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
            number: None,
            required: false,
        }
    }

    /// Creates a property with the shape of `T`
    pub fn of<T: ProtoShape>(name: impl Into<String>) -> Self {
        Self::new(name, T::shape())
    }

    /// Pins the field number
    pub fn number(mut self, number: u32) -> Self {
        self.number = Some(number);
        self
    }

    /// Marks the property as required
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// A named enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumShape {
    /// Type name
    pub name: String,
    /// Values in declaration order
    pub values: Vec<EnumValueShape>,
}

impl EnumShape {
    /// Creates an enum whose values are numbered by ordinal
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|name| EnumValueShape {
                    name: name.into(),
                    number: None,
                })
                .collect(),
        }
    }
}

/// One value of an enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueShape {
    /// Value name
    pub name: String,
    /// Explicit number; the ordinal is used otherwise
    pub number: Option<i32>,
}

macro_rules! scalar_shape {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl ProtoShape for $ty {
                fn shape() -> Shape {
                    Shape::Scalar(ScalarKind::$kind)
                }
            }
        )*
    };
}

scalar_shape!(
    bool => Bool,
    i8 => Int32,
    i16 => Int32,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint32,
    u16 => Uint32,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float,
    f64 => Double,
    String => String,
    Bytes => Bytes,
);

impl<T: ProtoShape> ProtoShape for Vec<T> {
    fn shape() -> Shape {
        Shape::array(T::shape())
    }
}

impl<T: ProtoShape> ProtoShape for Option<T> {
    fn shape() -> Shape {
        T::shape()
    }
}

impl<T: ProtoShape> ProtoShape for Box<T> {
    fn shape() -> Shape {
        T::shape()
    }
}

impl<K: ProtoShape, V: ProtoShape, S> ProtoShape for HashMap<K, V, S> {
    fn shape() -> Shape {
        Shape::map(K::shape(), V::shape())
    }
}

impl<K: ProtoShape, V: ProtoShape> ProtoShape for BTreeMap<K, V> {
    fn shape() -> Shape {
        Shape::map(K::shape(), V::shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_shapes() {
        assert!(matches!(u16::shape(), Shape::Scalar(ScalarKind::Uint32)));
        assert!(matches!(Option::<i64>::shape(), Shape::Scalar(ScalarKind::Int64)));
        match Vec::<Box<String>>::shape() {
            Shape::Array(inner) => assert!(matches!(*inner, Shape::Scalar(ScalarKind::String))),
            other => panic!("unexpected {:?}", other),
        }
        match HashMap::<String, Vec<f64>>::shape() {
            Shape::Map { key, value } => {
                assert!(matches!(*key, Shape::Scalar(ScalarKind::String)));
                assert_eq!(value.kind_name(), "array");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_self_referential_shape_is_finite() {
        struct Node;
        impl ProtoShape for Node {
            fn shape() -> Shape {
                Shape::Object(ObjectShape::new("Node", || {
                    vec![Property::of::<Vec<Node>>("children").number(3)]
                }))
            }
        }

        let Shape::Object(node) = Node::shape() else {
            panic!("expected an object");
        };
        let properties = node.properties();
        assert_eq!(properties[0].number, Some(3));
        assert!(format!("{:?}", node).contains("Node"));
    }
}
