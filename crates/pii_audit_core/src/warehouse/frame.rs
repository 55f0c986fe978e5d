//! In-memory tabular data handed to the bulk loader.

use super::{WarehouseError, WarehouseResult};
use crate::model::identifier::ColumnName;
use crate::model::value::CellValue;

/// Column-named rows; every row has exactly one cell per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    columns: Vec<ColumnName>,
    rows: Vec<Vec<CellValue>>,
    /// Indexes of columns created without a declared type.
    untyped: Vec<usize>,
}

impl Frame {
    /// Creates an empty frame.
    ///
    /// # Errors
    /// - `InvalidData` when `columns` contains a duplicate name.
    pub fn new(columns: Vec<ColumnName>) -> WarehouseResult<Self> {
        for (index, column) in columns.iter().enumerate() {
            if columns[..index]
                .iter()
                .any(|earlier| earlier.same_as(column.as_str()))
            {
                return Err(WarehouseError::InvalidData(format!(
                    "duplicate frame column `{column}`"
                )));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
            untyped: Vec::new(),
        })
    }

    /// Keeps `column` free of type affinity when the loader creates it, so
    /// values of mixed types are stored as given.
    ///
    /// # Errors
    /// - `InvalidData` when the frame has no such column.
    pub fn mark_untyped(&mut self, column: &str) -> WarehouseResult<()> {
        let index = self
            .columns
            .iter()
            .position(|candidate| candidate.same_as(column))
            .ok_or_else(|| {
                WarehouseError::InvalidData(format!("frame has no column `{column}`"))
            })?;
        if !self.untyped.contains(&index) {
            self.untyped.push(index);
        }
        Ok(())
    }

    pub fn is_untyped(&self, column_index: usize) -> bool {
        self.untyped.contains(&column_index)
    }

    /// Appends one row.
    ///
    /// # Errors
    /// - `InvalidData` when the row width differs from the column count.
    pub fn push_row(&mut self, row: Vec<CellValue>) -> WarehouseResult<()> {
        if row.len() != self.columns.len() {
            return Err(WarehouseError::InvalidData(format!(
                "frame row has {} cells, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnName] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First non-null value of a column, used for type autodetection.
    pub fn first_non_null(&self, column_index: usize) -> Option<&CellValue> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column_index))
            .find(|value| !value.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::Frame;
    use crate::model::identifier::ColumnName;
    use crate::model::value::CellValue;

    fn columns(names: &[&str]) -> Vec<ColumnName> {
        names.iter().map(|name| ColumnName::parse(name).unwrap()).collect()
    }

    #[test]
    fn rejects_duplicate_columns_and_ragged_rows() {
        assert!(Frame::new(columns(&["id", "ID"])).is_err());

        let mut frame = Frame::new(columns(&["id", "name"])).unwrap();
        assert!(frame.push_row(vec![CellValue::Integer(1)]).is_err());
        frame
            .push_row(vec![CellValue::Integer(1), CellValue::Null])
            .unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn first_non_null_skips_leading_nulls() {
        let mut frame = Frame::new(columns(&["phone"])).unwrap();
        frame.push_row(vec![CellValue::Null]).unwrap();
        frame.push_row(vec![CellValue::from("555")]).unwrap();
        assert_eq!(frame.first_non_null(0), Some(&CellValue::from("555")));
    }

    #[test]
    fn untyped_marks_resolve_case_insensitively() {
        let mut frame = Frame::new(columns(&["table_id", "id"])).unwrap();
        frame.mark_untyped("ID").unwrap();
        assert!(frame.is_untyped(1));
        assert!(!frame.is_untyped(0));
        assert!(frame.mark_untyped("missing").is_err());
    }
}
