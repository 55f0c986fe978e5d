//! Cell values and record identifiers exchanged with the warehouse.

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// One typed cell of a warehouse row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name used in diagnostics. Never includes the value itself.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Record identifier (`id` column) of the governed table.
///
/// Only integer and text ids are accepted; they are totally ordered, which
/// keeps the already-processed set deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum RecordId {
    Integer(i64),
    Text(String),
}

impl RecordId {
    /// Storage-type independent form: `Integer(42)` and `Text("42")` share a key.
    ///
    /// Matches SQLite's `CAST(id AS TEXT)`, so ids compare equal no matter
    /// which affinity the ledger column converted them to.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl TryFrom<&CellValue> for RecordId {
    /// Type name of the rejected value.
    type Error = &'static str;

    fn try_from(value: &CellValue) -> Result<Self, Self::Error> {
        match value {
            CellValue::Integer(id) => Ok(Self::Integer(*id)),
            CellValue::Text(id) => Ok(Self::Text(id.clone())),
            other => Err(other.type_name()),
        }
    }
}

impl From<RecordId> for CellValue {
    fn from(value: RecordId) -> Self {
        match value {
            RecordId::Integer(id) => Self::Integer(id),
            RecordId::Text(id) => Self::Text(id),
        }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}
