//! Map-backed column registry for embedding callers and tests.

use super::{ColumnRegistry, RegistryResult};
use crate::model::identifier::TableId;
use std::collections::BTreeMap;

/// Registry with a fixed table-to-columns mapping.
#[derive(Debug, Clone, Default)]
pub struct StaticColumnRegistry {
    columns: BTreeMap<TableId, Vec<String>>,
}

impl StaticColumnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the PII columns of `table`, replacing any previous entry.
    pub fn with_table<I, S>(mut self, table: TableId, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns
            .insert(table, columns.into_iter().map(Into::into).collect());
        self
    }
}

impl ColumnRegistry for StaticColumnRegistry {
    /// Unknown tables resolve to no columns.
    fn resolve_pii_columns(&self, table: &TableId) -> RegistryResult<Vec<String>> {
        Ok(self.columns.get(table).cloned().unwrap_or_default())
    }
}
