//! Scalar field values and index keys.

use serde::{Deserialize, Serialize};

use crate::schema::FieldKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Int(_) => FieldKind::Integer,
            Value::Float(_) => FieldKind::Float,
            Value::Bool(_) => FieldKind::Bool,
            Value::Str(_) => FieldKind::String,
        }
    }

    /// The zero value a field reads as when it was never set.
    pub fn default_for(kind: FieldKind) -> Value {
        match kind {
            FieldKind::Integer => Value::Int(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::String => Value::Str(String::new()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
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

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Hashable, serializable form of a [`Value`] used as an index key.
/// Floats are keyed by their raw bits; NaN keys are therefore legal but
/// only ever equal to the same NaN bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKey {
    Int(i64),
    Float(u64),
    Bool(bool),
    Str(String),
}

impl IndexKey {
    pub fn kind(&self) -> FieldKind {
        match self {
            IndexKey::Int(_) => FieldKind::Integer,
            IndexKey::Float(_) => FieldKind::Float,
            IndexKey::Bool(_) => FieldKind::Bool,
            IndexKey::Str(_) => FieldKind::String,
        }
    }
}

impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Int(v) => IndexKey::Int(*v),
            Value::Float(v) => IndexKey::Float(v.to_bits()),
            Value::Bool(v) => IndexKey::Bool(*v),
            Value::Str(v) => IndexKey::Str(v.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_kinds_match_variants() {
        assert_eq!(Value::from(1).kind(), FieldKind::Integer);
        assert_eq!(Value::from(1.5).kind(), FieldKind::Float);
        assert_eq!(Value::from(true).kind(), FieldKind::Bool);
        assert_eq!(Value::from("x").kind(), FieldKind::String);
    }

    #[test]
    fn index_keys_are_value_equal() {
        assert_eq!(IndexKey::from(&Value::from(3)), IndexKey::Int(3));
        assert_eq!(
            IndexKey::from(&Value::from(2.5)),
            IndexKey::Float(2.5f64.to_bits())
        );
        assert_eq!(
            IndexKey::from(&Value::from("abc")),
            IndexKey::Str("abc".to_string())
        );
    }
}
