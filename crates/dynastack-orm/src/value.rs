//! In-memory field values.
//!
//! [`Value`] is the tagged representation every entity field passes through
//! on its way to and from the store. [`FieldValue`] connects it to ordinary
//! Rust field types.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::FpCategory;

use bytes::Bytes;

use dynastack_model::AttributeValue;

use crate::error::{OrmError, OrmResult};

/// A field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent or null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer number.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// String.
    String(String),
    /// Binary.
    Binary(Bytes),
    /// Homogeneous string set.
    StringSet(BTreeSet<String>),
    /// Homogeneous integer set.
    NumberSet(BTreeSet<i64>),
    /// Ordered list.
    List(Vec<Value>),
    /// Key-ordered map.
    Map(BTreeMap<String, Value>),
    /// Plain string-keyed record, as the store returns nested documents.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the kind name used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::StringSet(_) => "string set",
            Self::NumberSet(_) => "number set",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }

    /// Returns `true` for null, `""`, and empty sets, maps, records, lists
    /// and binaries. `0` and `false` are not empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            Self::Binary(b) => b.is_empty(),
            Self::StringSet(s) => s.is_empty(),
            Self::NumberSet(s) => s.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Map(m) | Self::Object(m) => m.is_empty(),
            Self::Bool(_) | Self::Int(_) | Self::Float(_) => false,
        }
    }

    /// Returns `true` for set values.
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self, Self::StringSet(_) | Self::NumberSet(_))
    }

    /// Returns `true` for the scalar types allowed as key material.
    #[must_use]
    pub fn is_key_scalar(&self) -> bool {
        matches!(self, Self::String(_) | Self::Int(_) | Self::Float(_))
    }

    /// Returns `true` if the value can identify an item: a non-empty string
    /// or a non-zero number. A zero number is an unset numeric key.
    #[must_use]
    pub fn is_key_value(&self) -> bool {
        match self {
            Self::String(s) => !s.is_empty(),
            Self::Int(i) => *i != 0,
            Self::Float(f) => !matches!(f.classify(), FpCategory::Zero | FpCategory::Nan),
            _ => false,
        }
    }

    /// Converts into the store representation.
    ///
    /// Empty sets have no store form and become `NULL`.
    #[must_use]
    pub fn to_attribute_value(&self) -> AttributeValue {
        match self {
            Self::Null => AttributeValue::Null(true),
            Self::Bool(b) => AttributeValue::Bool(*b),
            Self::Int(i) => AttributeValue::number(i),
            Self::Float(f) => AttributeValue::number(f),
            Self::String(s) => AttributeValue::S(s.clone()),
            Self::Binary(b) => AttributeValue::B(b.clone()),
            Self::StringSet(s) if s.is_empty() => AttributeValue::Null(true),
            Self::NumberSet(s) if s.is_empty() => AttributeValue::Null(true),
            Self::StringSet(s) => AttributeValue::Ss(s.iter().cloned().collect()),
            Self::NumberSet(s) => AttributeValue::Ns(s.iter().map(ToString::to_string).collect()),
            Self::List(l) => AttributeValue::L(l.iter().map(Self::to_attribute_value).collect()),
            Self::Map(m) | Self::Object(m) => AttributeValue::M(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_attribute_value()))
                    .collect(),
            ),
        }
    }

    /// Decodes a stored value without any field-type knowledge.
    ///
    /// Nested documents become [`Value::Object`]; numbers become
    /// [`Value::Int`] when integral.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for malformed numbers.
    pub fn from_attribute_value(value: &AttributeValue) -> OrmResult<Self> {
        Ok(match value {
            AttributeValue::S(s) => Self::String(s.clone()),
            AttributeValue::N(n) => parse_number(n)?,
            AttributeValue::B(b) => Self::Binary(b.clone()),
            AttributeValue::Ss(v) => Self::StringSet(v.iter().cloned().collect()),
            AttributeValue::Ns(v) => Self::NumberSet(
                v.iter()
                    .map(|n| {
                        n.parse::<i64>()
                            .map_err(|_| OrmError::mismatch("integer set element", "number"))
                    })
                    .collect::<OrmResult<_>>()?,
            ),
            AttributeValue::Bs(v) => Self::List(v.iter().cloned().map(Self::Binary).collect()),
            AttributeValue::Bool(b) => Self::Bool(*b),
            AttributeValue::Null(_) => Self::Null,
            AttributeValue::L(l) => {
                Self::List(l.iter().map(Self::from_attribute_value).collect::<OrmResult<_>>()?)
            }
            AttributeValue::M(m) => Self::Object(
                m.iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_attribute_value(v)?)))
                    .collect::<OrmResult<_>>()?,
            ),
        })
    }
}

fn parse_number(n: &str) -> OrmResult<Value> {
    if let Ok(i) = n.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    n.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| OrmError::mismatch("number", "string"))
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Binary(v)
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// Conversion between a Rust field type and [`Value`].
///
/// A [`Value::Null`] converts to the type's default for non-optional types.
pub trait FieldValue: Sized {
    /// Converts the field into a value.
    fn to_value(&self) -> Value;

    /// Builds the field from a value.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when the value has the wrong kind.
    fn from_value(value: Value) -> OrmResult<Self>;
}

impl FieldValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        Ok(value)
    }
}

impl FieldValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::String(s) => Ok(s),
            Value::Null => Ok(Self::new()),
            other => Err(OrmError::mismatch("string", other.kind_name())),
        }
    }
}

impl FieldValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(OrmError::mismatch("bool", other.kind_name())),
        }
    }
}

macro_rules! impl_integer_field {
    ($($ty:ty),*) => {
        $(
            impl FieldValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }

                #[allow(clippy::cast_possible_truncation)]
                fn from_value(value: Value) -> OrmResult<Self> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(i)
                            .map_err(|_| OrmError::mismatch(stringify!($ty), "integer")),
                        Value::Float(f) if f.fract().abs() < f64::EPSILON => <$ty>::try_from(f as i64)
                            .map_err(|_| OrmError::mismatch(stringify!($ty), "number")),
                        Value::Null => Ok(0),
                        other => Err(OrmError::mismatch(stringify!($ty), other.kind_name())),
                    }
                }
            }
        )*
    };
}

impl_integer_field!(i64, i32, u32);

impl FieldValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            Value::Null => Ok(0.0),
            other => Err(OrmError::mismatch("number", other.kind_name())),
        }
    }
}

impl FieldValue for Bytes {
    fn to_value(&self) -> Value {
        Value::Binary(self.clone())
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Binary(b) => Ok(b),
            Value::Null => Ok(Self::new()),
            other => Err(OrmError::mismatch("binary", other.kind_name())),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldValue::to_value)
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(FieldValue::to_value).collect())
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::List(l) => l.into_iter().map(T::from_value).collect(),
            Value::Null => Ok(Self::new()),
            other => Err(OrmError::mismatch("list", other.kind_name())),
        }
    }
}

impl FieldValue for BTreeSet<String> {
    fn to_value(&self) -> Value {
        Value::StringSet(self.clone())
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::StringSet(s) => Ok(s),
            Value::Null => Ok(Self::new()),
            other => Err(OrmError::mismatch("string set", other.kind_name())),
        }
    }
}

impl FieldValue for BTreeSet<i64> {
    fn to_value(&self) -> Value {
        Value::NumberSet(self.clone())
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::NumberSet(s) => Ok(s),
            Value::Null => Ok(Self::new()),
            other => Err(OrmError::mismatch("number set", other.kind_name())),
        }
    }
}

impl<T: FieldValue> FieldValue for BTreeMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Map(m) | Value::Object(m) => m
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_value(v)?)))
                .collect(),
            Value::Null => Ok(Self::new()),
            other => Err(OrmError::mismatch("map", other.kind_name())),
        }
    }
}

impl<T: FieldValue> FieldValue for HashMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Map(m) | Value::Object(m) => m
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_value(v)?)))
                .collect(),
            Value::Null => Ok(Self::new()),
            other => Err(OrmError::mismatch("object", other.kind_name())),
        }
    }
}
