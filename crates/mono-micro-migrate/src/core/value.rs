//! Identifier and field value types for store-agnostic record handling.
//!
//! Values are fully owned: rows are extracted once per entity and live for
//! the whole pipeline run, so there is no borrowing from driver buffers here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A record identifier in the source schema or a target store.
///
/// This enum allows handling the different identifier shapes uniformly
/// across remapping, graph reconstruction, and verification.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Id {
    /// Integer identifier (covers int, bigint sequence values).
    Int(i64),
    /// UUID identifier (document stores, generated keys).
    Uuid(Uuid),
    /// String identifier (natural keys carried as-is).
    Text(String),
}

impl Id {
    /// The integer value, if this is an integer identifier.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Id::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Check for degenerate identifiers no store should accept.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        match self {
            Id::Int(_) => false,
            Id::Uuid(v) => v.is_nil(),
            Id::Text(v) => v.trim().is_empty(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int(v) => write!(f, "{}", v),
            Id::Uuid(v) => write!(f, "{}", v),
            Id::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::Int(v)
    }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self {
        Id::Int(v as i64)
    }
}

impl From<Uuid> for Id {
    fn from(v: Uuid) -> Self {
        Id::Uuid(v)
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Id::Text(v)
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Id::Text(v.to_string())
    }
}

/// A field value in a source row or target record.
///
/// Reference fields are explicit: any [`Value::Ref`] or [`Value::RefList`]
/// in a record is treated as a cross-record reference by validation and
/// integrity checking. Scalar fields never participate in closure checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL / absent value.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit floating point.
    Float(f64),

    /// Decimal value with arbitrary precision.
    Decimal(Decimal),

    /// Text data.
    Text(String),

    /// UTC timestamp.
    Timestamp(DateTime<Utc>),

    /// Single reference to another record.
    Ref(Id),

    /// Ordered list of references (embedded many-to-many side).
    RefList(Vec<Id>),
}

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The text content, if this is a text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// The integer content, if this is an integer value.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Interpret this value as an identifier, if its shape allows it.
    ///
    /// Integer, text, and reference values convert; NULL and other scalars
    /// do not. Used when reading id and foreign-key columns out of source
    /// rows.
    #[must_use]
    pub fn to_id(&self) -> Option<Id> {
        match self {
            Value::Int(v) => Some(Id::Int(*v)),
            Value::Text(v) => {
                if let Ok(u) = Uuid::parse_str(v) {
                    Some(Id::Uuid(u))
                } else {
                    Some(Id::Text(v.clone()))
                }
            }
            Value::Ref(id) => Some(id.clone()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Id> for Value {
    fn from(v: Id) -> Self {
        Value::Ref(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(Id::Int(42).to_string(), "42");
        assert_eq!(Id::Text("usr-9".into()).to_string(), "usr-9");
    }

    #[test]
    fn test_value_to_id() {
        assert_eq!(Value::Int(7).to_id(), Some(Id::Int(7)));
        assert_eq!(Value::Text("abc".into()).to_id(), Some(Id::Text("abc".into())));
        assert_eq!(Value::Null.to_id(), None);
        assert_eq!(Value::Bool(true).to_id(), None);
    }

    #[test]
    fn test_text_value_to_uuid_id() {
        let u = Uuid::new_v4();
        assert_eq!(Value::Text(u.to_string()).to_id(), Some(Id::Uuid(u)));
    }

    #[test]
    fn test_from_implementations() {
        let v: Value = 42i32.into();
        assert_eq!(v, Value::Int(42));

        let v: Value = "hello".into();
        assert_eq!(v, Value::Text("hello".to_string()));

        let v: Value = Option::<i64>::None.into();
        assert!(v.is_null());
    }
}
