//! Object identity values.
//!
//! An identity is the value of an object's identity column(s). Scalar
//! identities cover the common single-column case; `CompositeId` is the
//! ordered tuple used when an identity spans more than one column.
//! Both have structural equality and hashing so they can key the
//! identity map directly.

use crate::error::{Error, Result, TypeError};
use crate::value::Value;

/// One component of an identity value.
///
/// Only equality-stable value kinds may participate in an identity;
/// floating point and JSON columns are rejected at conversion time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdPart {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(i64),
}

impl IdPart {
    /// Convert a column value into an identity component.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(IdPart::Bool(*b)),
            Value::Int(i) => Ok(IdPart::Int(i64::from(*i))),
            Value::BigInt(i) => Ok(IdPart::Int(*i)),
            Value::Text(s) => Ok(IdPart::Text(s.clone())),
            Value::Bytes(b) => Ok(IdPart::Bytes(b.clone())),
            Value::Timestamp(t) => Ok(IdPart::Timestamp(*t)),
            other => Err(Error::Type(TypeError {
                expected: "identity-compatible value",
                actual: other.type_name().to_string(),
                column: None,
            })),
        }
    }

    /// Convert back to a bindable column value.
    pub fn to_value(&self) -> Value {
        match self {
            IdPart::Bool(b) => Value::Bool(*b),
            IdPart::Int(i) => Value::BigInt(*i),
            IdPart::Text(s) => Value::Text(s.clone()),
            IdPart::Bytes(b) => Value::Bytes(b.clone()),
            IdPart::Timestamp(t) => Value::Timestamp(*t),
        }
    }
}

/// A composite-key value: an ordered tuple with structural equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId {
    parts: Vec<IdPart>,
}

impl CompositeId {
    /// Create a composite identity from its ordered components.
    pub fn new(parts: Vec<IdPart>) -> Self {
        Self { parts }
    }

    /// The ordered components.
    pub fn parts(&self) -> &[IdPart] {
        &self.parts
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the tuple is empty.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// The identity of a persistent object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// Single identity column.
    Single(IdPart),
    /// Identity spanning multiple columns.
    Composite(CompositeId),
}

impl Identity {
    /// Build an identity from the values of the identity columns, in
    /// declared column order.
    ///
    /// Returns a `Type` error for empty input, NULL components or value
    /// kinds that cannot participate in an identity.
    pub fn from_values(values: &[Value]) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::Type(TypeError {
                expected: "at least one identity column value",
                actual: "empty value list".to_string(),
                column: None,
            }));
        }
        if values.iter().any(Value::is_null) {
            return Err(Error::Type(TypeError {
                expected: "non-null identity value",
                actual: "NULL".to_string(),
                column: None,
            }));
        }
        if values.len() == 1 {
            Ok(Identity::Single(IdPart::from_value(&values[0])?))
        } else {
            let parts = values
                .iter()
                .map(IdPart::from_value)
                .collect::<Result<Vec<_>>>()?;
            Ok(Identity::Composite(CompositeId::new(parts)))
        }
    }

    /// The identity as bindable column values, in declared column order.
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            Identity::Single(part) => vec![part.to_value()],
            Identity::Composite(id) => id.parts().iter().map(IdPart::to_value).collect(),
        }
    }

    /// Number of identity columns this value spans.
    pub fn width(&self) -> usize {
        match self {
            Identity::Single(_) => 1,
            Identity::Composite(id) => id.len(),
        }
    }
}

impl From<i64> for Identity {
    fn from(v: i64) -> Self {
        Identity::Single(IdPart::Int(v))
    }
}

impl From<&str> for Identity {
    fn from(v: &str) -> Self {
        Identity::Single(IdPart::Text(v.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let id = Identity::from_values(&[Value::BigInt(42)]).unwrap();
        assert_eq!(id, Identity::from(42));
        assert_eq!(id.to_values(), vec![Value::BigInt(42)]);
        assert_eq!(id.width(), 1);
    }

    #[test]
    fn composite_structural_equality() {
        let a = Identity::from_values(&[Value::BigInt(1), Value::Text("x".into())]).unwrap();
        let b = Identity::from_values(&[Value::BigInt(1), Value::Text("x".into())]).unwrap();
        let c = Identity::from_values(&[Value::BigInt(1), Value::Text("y".into())]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.width(), 2);
    }

    #[test]
    fn composite_is_order_sensitive() {
        let a = Identity::from_values(&[Value::BigInt(1), Value::BigInt(2)]).unwrap();
        let b = Identity::from_values(&[Value::BigInt(2), Value::BigInt(1)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_null_component() {
        assert!(Identity::from_values(&[Value::BigInt(1), Value::Null]).is_err());
    }

    #[test]
    fn rejects_float_identity() {
        assert!(Identity::from_values(&[Value::Double(1.5)]).is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(Identity::from_values(&[]).is_err());
    }
}
