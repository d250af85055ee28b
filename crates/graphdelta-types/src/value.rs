//! Dynamically typed values held by object members, list items and array cells.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::object::ObjectRef;
use crate::type_info::scalar;

/// A single value in an object graph.
///
/// Scalars compare by value; references compare by identity. Structural
/// comparison of referenced objects is the diff engine's job, never
/// `PartialEq`'s.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    /// Placeholder for a collection slot that exists on one side only.
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Ref(ObjectRef),
}

impl Value {
    /// Name of the runtime type of this value.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Null => scalar::NULL,
            Self::Missing => "missing",
            Self::Bool(_) => scalar::BOOL,
            Self::Int(_) => scalar::INT,
            Self::Float(_) => scalar::FLOAT,
            Self::Str(_) => scalar::STRING,
            Self::Ref(obj) => obj.type_name(),
        }
    }

    /// The referenced object, if this is a reference.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Ref(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns `true` if this value is an object reference.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    /// Returns `true` for the padding placeholder.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Missing, Self::Missing) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Missing => write!(f, "missing"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Ref(obj) => write!(f, "{}", obj.type_name()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Missing => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Ref(obj) => serializer.serialize_str(&format!("<{}>", obj.type_name())),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Self::Ref(obj)
    }
}

impl From<&ObjectRef> for Value {
    fn from(obj: &ObjectRef) -> Self {
        Self::Ref(Arc::clone(obj))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::type_info::TypeInfo;

    #[test]
    fn scalars_compare_by_value() {
        assert_eq!(Value::from(1), Value::Int(1));
        assert_eq!(Value::from("a"), Value::from(String::from("a")));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Null, Value::Missing);
    }

    #[test]
    fn references_compare_by_identity() {
        let ty = TypeInfo::object("Point").member("x", scalar::INT).build();
        let a = Object::new(&ty);
        let b = Object::new(&ty);
        assert_eq!(Value::from(&a), Value::from(&a));
        assert_ne!(Value::from(&a), Value::from(&b));
    }

    #[test]
    fn display_and_type_name() {
        let ty = TypeInfo::object("Point").build();
        let obj = Value::from(Object::new(&ty));
        assert_eq!(obj.to_string(), "Point");
        assert_eq!(obj.type_name(), "Point");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn serializes_references_as_type_tags() {
        let ty = TypeInfo::object("Point").build();
        let obj = Value::from(Object::new(&ty));
        assert_eq!(serde_json::to_string(&obj).unwrap(), "\"<Point>\"");
        assert_eq!(serde_json::to_string(&Value::from(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Value::Missing).unwrap(), "null");
    }
}
