//! Parameterized SQL statements.
//!
//! # Invariants
//! - Values reach the engine only as bound parameters.
//! - Identifiers are spliced only in quoted form from validated
//!   `TableId`/`ColumnName` values.

use crate::model::value::CellValue;

/// One SQL statement plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    label: &'static str,
    sql: String,
    params: Vec<CellValue>,
}

impl Statement {
    /// Creates a statement. `label` names it in logs and job ids.
    pub fn new(label: &'static str, sql: impl Into<String>) -> Self {
        Self {
            label,
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Appends the next positional parameter (`?1`, `?2`, ...).
    pub fn bind(mut self, value: impl Into<CellValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[CellValue] {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::Statement;
    use crate::model::value::CellValue;

    #[test]
    fn bind_keeps_positional_order() {
        let statement = Statement::new("ping", "SELECT ?1, ?2")
            .bind("a")
            .bind(2_i64);
        assert_eq!(statement.label(), "ping");
        assert_eq!(
            statement.params(),
            &[CellValue::from("a"), CellValue::Integer(2)]
        );
    }
}
