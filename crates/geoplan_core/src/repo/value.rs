//! Attribute values exchanged with repository callers.
//!
//! # Responsibility
//! - Represent one column value independently of SQLite storage classes.
//! - Convert between caller values and SQLite values per declared type.
//!
//! # Invariants
//! - JSON values are carried as document text and never interpreted here.
//! - Rows read back only contain non-null attributes.

use crate::schema::entity::ColumnType;
use rusqlite::types::{Value, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Generated row identifier.
pub type RowId = Uuid;

/// Column name -> value map used for create/update/link payloads.
pub type Attrs = BTreeMap<String, FieldValue>;

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Clears a nullable column on update.
    Null,
    Id(RowId),
    Text(String),
    /// Also used for `Timestamp` columns (epoch ms).
    Integer(i64),
    Real(f64),
    Bool(bool),
    /// JSON document text; must be well-formed.
    Json(String),
}

impl FieldValue {
    /// Serializes a JSON value into a `Json` attribute.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::Json(value.to_string())
    }

    /// Parses a `Json` attribute back into a JSON value.
    pub fn as_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Json(text) => serde_json::from_str(text).ok(),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<RowId> {
        match self {
            Self::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub(crate) fn to_sql(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Id(id) => Value::Text(id.to_string()),
            Self::Text(text) | Self::Json(text) => Value::Text(text.clone()),
            Self::Integer(value) => Value::Integer(*value),
            Self::Real(value) => Value::Real(*value),
            Self::Bool(value) => Value::Integer(i64::from(*value)),
        }
    }

    /// Reads a stored value according to its declared column type.
    pub(crate) fn from_sql(ty: ColumnType, value: ValueRef<'_>) -> Result<Self, String> {
        if let ValueRef::Null = value {
            return Ok(Self::Null);
        }
        match (ty, value) {
            (ColumnType::Id, ValueRef::Text(bytes)) => {
                let text = std::str::from_utf8(bytes).map_err(|err| err.to_string())?;
                Uuid::parse_str(text)
                    .map(Self::Id)
                    .map_err(|_| format!("invalid uuid `{text}`"))
            }
            (ColumnType::Text { .. }, ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
                .map(|text| Self::Text(text.to_string()))
                .map_err(|err| err.to_string()),
            (ColumnType::Json, ValueRef::Text(bytes)) => std::str::from_utf8(bytes)
                .map(|text| Self::Json(text.to_string()))
                .map_err(|err| err.to_string()),
            (ColumnType::Integer | ColumnType::Timestamp, ValueRef::Integer(value)) => {
                Ok(Self::Integer(value))
            }
            (ColumnType::Real, ValueRef::Real(value)) => Ok(Self::Real(value)),
            (ColumnType::Real, ValueRef::Integer(value)) => Ok(Self::Real(value as f64)),
            (ColumnType::Boolean, ValueRef::Integer(0)) => Ok(Self::Bool(false)),
            (ColumnType::Boolean, ValueRef::Integer(1)) => Ok(Self::Bool(true)),
            (ty, other) => Err(format!(
                "stored {:?} value does not fit {} column",
                other.data_type(),
                ty.label()
            )),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        Self::Id(value)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        Self::json(&value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Builds an attribute map from `(column, value)` pairs.
pub fn attrs<K, V, I>(pairs: I) -> Attrs
where
    K: Into<String>,
    V: Into<FieldValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{attrs, FieldValue};
    use crate::schema::entity::ColumnType;
    use rusqlite::types::ValueRef;
    use serde_json::json;

    #[test]
    fn json_helpers_round_trip_documents() {
        let value = FieldValue::json(&json!({"zoom": 5}));
        assert_eq!(value, FieldValue::Json("{\"zoom\":5}".to_string()));
        assert_eq!(value.as_json(), Some(json!({"zoom": 5})));
        assert_eq!(FieldValue::from("x").as_json(), None);
    }

    #[test]
    fn from_sql_respects_declared_type() {
        assert_eq!(
            FieldValue::from_sql(ColumnType::Boolean, ValueRef::Integer(1)),
            Ok(FieldValue::Bool(true))
        );
        assert_eq!(
            FieldValue::from_sql(ColumnType::Real, ValueRef::Integer(2)),
            Ok(FieldValue::Real(2.0))
        );
        assert_eq!(
            FieldValue::from_sql(ColumnType::long_text(), ValueRef::Null),
            Ok(FieldValue::Null)
        );
        assert!(FieldValue::from_sql(ColumnType::Id, ValueRef::Text(b"not-a-uuid")).is_err());
        assert!(FieldValue::from_sql(ColumnType::Boolean, ValueRef::Integer(7)).is_err());
    }

    #[test]
    fn attrs_builder_converts_values() {
        let map = attrs([
            ("name", FieldValue::from("Roads")),
            ("visible", true.into()),
            ("opacity", Option::<f64>::None.into()),
        ]);
        assert_eq!(map.get("name"), Some(&FieldValue::Text("Roads".to_string())));
        assert_eq!(map.get("visible"), Some(&FieldValue::Bool(true)));
        assert_eq!(map.get("opacity"), Some(&FieldValue::Null));
    }
}
