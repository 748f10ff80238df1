//! Field values exchanged by the merge engine.
//!
//! Every mergeable field of a record is projected into a [`FieldValue`]. The
//! merge never looks at the concrete Rust type of a field, only at the value
//! kind tag, which keeps equality rules in one place ([`deep_equal`]).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when reading or writing a record field through its
/// generic projection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Invalid value for field '{field}': {message}")]
    Invalid { field: String, message: String },
}

/// Coarse value kind used to dispatch equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Primitive,
    Instant,
    List,
    Map,
}

/// A single field value, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Instant(DateTime<Utc>),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) | Self::Text(_) => {
                ValueKind::Primitive
            }
            Self::Instant(_) => ValueKind::Instant,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Instant(_) => "instant",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text as an instant, when it parses as RFC 3339.
    fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Instant(value) => Some(*value),
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|value| value.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn into_text(self, field: &str) -> Result<String, FieldError> {
        match self {
            Self::Text(value) => Ok(value),
            other => Err(mismatch(field, "text", &other)),
        }
    }

    pub fn into_optional_text(self, field: &str) -> Result<Option<String>, FieldError> {
        match self {
            Self::Null => Ok(None),
            Self::Text(value) => Ok(Some(value)),
            other => Err(mismatch(field, "text or null", &other)),
        }
    }

    pub fn into_i64(self, field: &str) -> Result<i64, FieldError> {
        match self {
            Self::Integer(value) => Ok(value),
            other => Err(mismatch(field, "integer", &other)),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn into_optional_f64(self, field: &str) -> Result<Option<f64>, FieldError> {
        match self {
            Self::Null => Ok(None),
            Self::Float(value) => Ok(Some(value)),
            Self::Integer(value) => Ok(Some(value as f64)),
            other => Err(mismatch(field, "float or null", &other)),
        }
    }

    pub fn into_bool(self, field: &str) -> Result<bool, FieldError> {
        match self {
            Self::Bool(value) => Ok(value),
            other => Err(mismatch(field, "bool", &other)),
        }
    }

    pub fn into_instant(self, field: &str) -> Result<DateTime<Utc>, FieldError> {
        match self.as_instant() {
            Some(value) => Ok(value),
            None => Err(mismatch(field, "instant", &self)),
        }
    }

    pub fn into_text_list(self, field: &str) -> Result<Vec<String>, FieldError> {
        match self {
            Self::List(items) => items.into_iter().map(|item| item.into_text(field)).collect(),
            other => Err(mismatch(field, "list of text", &other)),
        }
    }

    /// Parse user input into a value of the same kind as `template`.
    ///
    /// Used when a human types an explicit conflict resolution: the recorded
    /// local value tells us what shape the field has.
    pub fn parse_like(template: &Self, field: &str, raw: &str) -> Result<Self, FieldError> {
        let raw = raw.trim();
        let invalid = |message: String| FieldError::Invalid {
            field: field.to_string(),
            message,
        };
        if raw.eq_ignore_ascii_case("null") {
            return Ok(Self::Null);
        }

        match template {
            Self::Bool(_) => raw
                .parse::<bool>()
                .map(Self::Bool)
                .map_err(|error| invalid(error.to_string())),
            Self::Integer(_) => raw
                .parse::<i64>()
                .map(Self::Integer)
                .map_err(|error| invalid(error.to_string())),
            Self::Float(_) => raw
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|error| invalid(error.to_string())),
            Self::Instant(_) => DateTime::parse_from_rfc3339(raw)
                .map(|value| Self::Instant(value.with_timezone(&Utc)))
                .map_err(|error| invalid(error.to_string())),
            Self::List(_) => Ok(Self::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| Self::Text(item.to_string()))
                    .collect(),
            )),
            Self::Map(_) => Err(invalid("map values cannot be typed inline".to_string())),
            Self::Null | Self::Text(_) => Ok(Self::Text(raw.to_string())),
        }
    }
}

fn mismatch(field: &str, expected: &'static str, found: &FieldValue) -> FieldError {
    FieldError::TypeMismatch {
        field: field.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// Deep, type-aware equality used by the three-way merge.
///
/// Scalars compare by value (an integer equals a float with the same numeric
/// value), instants by the moment they denote (RFC 3339 text is accepted on
/// either side), lists element-wise in order, maps key by key.
pub fn deep_equal(left: &FieldValue, right: &FieldValue) -> bool {
    match (left.kind(), right.kind()) {
        (ValueKind::Instant, _) | (_, ValueKind::Instant) => {
            match (left.as_instant(), right.as_instant()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (ValueKind::Primitive, ValueKind::Primitive) => primitive_equal(left, right),
        (ValueKind::List, ValueKind::List) => match (left, right) {
            (FieldValue::List(a), FieldValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_equal(x, y))
            }
            _ => false,
        },
        (ValueKind::Map, ValueKind::Map) => match (left, right) {
            (FieldValue::Map(a), FieldValue::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, x)| b.get(key).is_some_and(|y| deep_equal(x, y)))
            }
            _ => false,
        },
        _ => false,
    }
}

#[allow(clippy::float_cmp, clippy::cast_precision_loss)]
fn primitive_equal(left: &FieldValue, right: &FieldValue) -> bool {
    match (left, right) {
        (FieldValue::Null, FieldValue::Null) => true,
        (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
        (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
        (FieldValue::Float(a), FieldValue::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
        (FieldValue::Integer(a), FieldValue::Float(b))
        | (FieldValue::Float(b), FieldValue::Integer(a)) => *a as f64 == *b,
        (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
        _ => false,
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        deep_equal(self, other)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Instant(value) => f.write_str(&value.to_rfc3339()),
            Self::List(items) => {
                let rendered = items.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(f, "[{}]", rendered.join(", "))
            }
            Self::Map(entries) => {
                let rendered = entries
                    .iter()
                    .map(|(key, value)| format!("{key}: {value}"))
                    .collect::<Vec<_>>();
                write!(f, "{{{}}}", rendered.join(", "))
            }
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Instant(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value.into_iter().map(Self::Text).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
