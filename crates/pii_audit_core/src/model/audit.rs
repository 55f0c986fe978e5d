//! PII column set, snapshot rows and audit ledger records.
//!
//! # Responsibility
//! - Hold the validated, ordered PII column set of one run.
//! - Define the ledger column layout shared by reader and writer.
//!
//! # Invariants
//! - A `PiiColumnSet` is non-empty, duplicate-free and never contains a
//!   reserved ledger column.
//! - `SnapshotRow::pii_values` is aligned with the column set it was read with.

use crate::config::{ConfigError, ConfigResult};
use crate::model::identifier::{ColumnName, TableId};
use crate::model::value::{CellValue, RecordId};
use serde::Serialize;

pub const TABLE_ID_COLUMN: &str = "table_id";
pub const ID_COLUMN: &str = "id";
pub const LOADED_AT_COLUMN: &str = "loaded_at";
pub const FIRST_ANONYMIZED_AT_COLUMN: &str = "first_anonymized_at";
pub const ANONYMIZED_AT_COLUMN: &str = "anonymized_at";

/// Columns owned by the ledger itself.
pub const RESERVED_LEDGER_COLUMNS: [&str; 4] = [
    TABLE_ID_COLUMN,
    ID_COLUMN,
    FIRST_ANONYMIZED_AT_COLUMN,
    ANONYMIZED_AT_COLUMN,
];

/// Ordered set of PII columns resolved for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PiiColumnSet {
    columns: Vec<ColumnName>,
}

impl PiiColumnSet {
    /// Validates registry output into a column set.
    ///
    /// Duplicates (case-insensitive) keep their first position.
    ///
    /// # Errors
    /// - `InvalidIdentifier` when a name fails the allow-list.
    /// - `ReservedColumn` when a name collides with a ledger column.
    /// - `NoPiiColumns` when nothing remains.
    pub fn from_names<I, S>(table_id: &TableId, names: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut columns: Vec<ColumnName> = Vec::new();
        for name in names {
            let column = ColumnName::parse(name.as_ref())?;
            if RESERVED_LEDGER_COLUMNS
                .iter()
                .any(|reserved| column.same_as(reserved))
            {
                return Err(ConfigError::ReservedColumn(column.to_string()));
            }
            if columns
                .iter()
                .any(|existing| existing.same_as(column.as_str()))
            {
                continue;
            }
            columns.push(column);
        }

        if columns.is_empty() {
            return Err(ConfigError::NoPiiColumns {
                table_id: table_id.to_string(),
            });
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnName] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnName> {
        self.columns.iter()
    }

    /// Column names as plain strings, for reports and logs.
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(ToString::to_string).collect()
    }
}

impl<'a> IntoIterator for &'a PiiColumnSet {
    type Item = &'a ColumnName;
    type IntoIter = std::slice::Iter<'a, ColumnName>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

/// First-anonymized state of one record, as read back from the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub id: RecordId,
    /// One value per PII column, in column-set order.
    pub pii_values: Vec<CellValue>,
    /// Copied verbatim from the primary table's `loaded_at`.
    pub first_anonymized_at: CellValue,
}

/// One ledger entry before the run-wide `anonymized_at` is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub table_id: TableId,
    pub pii_values: Vec<CellValue>,
    pub id: RecordId,
    pub first_anonymized_at: CellValue,
}

impl AuditRecord {
    pub fn from_snapshot(table_id: &TableId, row: SnapshotRow) -> Self {
        Self {
            table_id: table_id.clone(),
            pii_values: row.pii_values,
            id: row.id,
            first_anonymized_at: row.first_anonymized_at,
        }
    }

    /// Ledger row cells in `ledger_columns` order.
    pub fn into_cells(self, anonymized_at: i64) -> Vec<CellValue> {
        let mut cells = Vec::with_capacity(self.pii_values.len() + 4);
        cells.push(CellValue::Text(self.table_id.to_string()));
        cells.extend(self.pii_values);
        cells.push(self.id.into());
        cells.push(self.first_anonymized_at);
        cells.push(CellValue::Integer(anonymized_at));
        cells
    }
}

/// Ledger column layout for a given PII column set:
/// `table_id, <pii…>, id, first_anonymized_at, anonymized_at`.
pub fn ledger_columns(columns: &PiiColumnSet) -> Vec<ColumnName> {
    let mut layout = Vec::with_capacity(columns.len() + 4);
    layout.push(ColumnName::trusted(TABLE_ID_COLUMN));
    layout.extend(columns.iter().cloned());
    layout.push(ColumnName::trusted(ID_COLUMN));
    layout.push(ColumnName::trusted(FIRST_ANONYMIZED_AT_COLUMN));
    layout.push(ColumnName::trusted(ANONYMIZED_AT_COLUMN));
    layout
}

#[cfg(test)]
mod tests {
    use super::{ledger_columns, AuditRecord, PiiColumnSet, SnapshotRow};
    use crate::config::ConfigError;
    use crate::model::identifier::TableId;
    use crate::model::value::{CellValue, RecordId};

    fn table() -> TableId {
        TableId::parse("p.d.customers").unwrap()
    }

    #[test]
    fn column_set_keeps_order_and_drops_duplicates() {
        let set = PiiColumnSet::from_names(&table(), ["name", "email", "Name", "phone"]).unwrap();
        assert_eq!(set.names(), vec!["name", "email", "phone"]);
    }

    #[test]
    fn empty_column_set_is_a_config_error() {
        let err = PiiColumnSet::from_names(&table(), Vec::<String>::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NoPiiColumns {
                table_id: "p.d.customers".to_string()
            }
        );
    }

    #[test]
    fn reserved_and_invalid_columns_are_rejected() {
        assert!(matches!(
            PiiColumnSet::from_names(&table(), ["name", "ID"]),
            Err(ConfigError::ReservedColumn(_))
        ));
        assert!(matches!(
            PiiColumnSet::from_names(&table(), ["name; DROP TABLE t"]),
            Err(ConfigError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn audit_record_cells_follow_ledger_layout() {
        let set = PiiColumnSet::from_names(&table(), ["name"]).unwrap();
        let layout: Vec<String> = ledger_columns(&set)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            layout,
            vec!["table_id", "name", "id", "first_anonymized_at", "anonymized_at"]
        );

        let record = AuditRecord::from_snapshot(
            &table(),
            SnapshotRow {
                id: RecordId::Integer(1),
                pii_values: vec![CellValue::from("REDACTED")],
                first_anonymized_at: CellValue::Integer(100),
            },
        );
        assert_eq!(
            record.into_cells(999),
            vec![
                CellValue::from("p.d.customers"),
                CellValue::from("REDACTED"),
                CellValue::Integer(1),
                CellValue::Integer(100),
                CellValue::Integer(999),
            ]
        );
    }
}
