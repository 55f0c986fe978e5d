//! Query execution and bulk-load interfaces of the analytical store.
//!
//! # Responsibility
//! - Define the `QueryService` / `BulkLoader` seams the pipeline runs on.
//! - Define the warehouse error taxonomy, including the recoverable
//!   `NotFound` case.
//! - Ship the embedded SQLite implementation.
//!
//! # Invariants
//! - Every submitted unit of work is observed through a `QueryJob`, and
//!   callers always wait with a bounded timeout.

use crate::db::DbError;
use crate::model::identifier::TableId;
use crate::model::value::CellValue;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod frame;
pub mod job;
pub mod sqlite;
pub mod statement;

pub use frame::Frame;
pub use job::QueryJob;
pub use sqlite::SqliteWarehouse;
pub use statement::Statement;

pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// One result row: column name to value.
pub type Row = BTreeMap<String, CellValue>;

/// Failures reported by the query service or the bulk loader.
#[derive(Debug)]
pub enum WarehouseError {
    /// Referenced table does not exist.
    NotFound { object: String },
    /// Storage engine failure.
    Db(DbError),
    /// Generic job failure not tied to a storage engine error.
    Execution { message: String },
    /// Load would add columns while schema updates are disabled.
    SchemaMismatch { table: String, columns: Vec<String> },
    /// `WriteDisposition::Empty` load into a table that has rows.
    DestinationNotEmpty { table: String },
    /// Job did not complete within the wait bound and was cancelled.
    Timeout { job_id: String, waited: Duration },
    /// Job worker vanished without reporting a result.
    JobLost { job_id: String },
    /// Row or frame content is not representable.
    InvalidData(String),
}

impl WarehouseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Display for WarehouseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { object } => write!(f, "not found: {object}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Execution { message } => write!(f, "job execution failed: {message}"),
            Self::SchemaMismatch { table, columns } => write!(
                f,
                "load into `{table}` would add columns [{}] but schema updates are disabled",
                columns.join(", ")
            ),
            Self::DestinationNotEmpty { table } => {
                write!(f, "destination `{table}` is not empty")
            }
            Self::Timeout { job_id, waited } => write!(
                f,
                "job {job_id} did not complete within {}ms",
                waited.as_millis()
            ),
            Self::JobLost { job_id } => write!(f, "job {job_id} ended without a result"),
            Self::InvalidData(message) => write!(f, "invalid warehouse data: {message}"),
        }
    }
}

impl Error for WarehouseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for WarehouseError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for WarehouseError {
    fn from(value: rusqlite::Error) -> Self {
        sqlite::map_sqlite_error(value)
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    /// Rows produced by the statement, in the statement's own order.
    pub rows: Vec<Row>,
    /// Rows changed by a DML statement or written by a load.
    pub affected_rows: u64,
}

impl QueryOutcome {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            affected_rows: 0,
        }
    }

    pub fn affected(affected_rows: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected_rows,
        }
    }
}

/// How a load treats rows already in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    Append,
    /// Replace existing rows.
    Truncate,
    /// Fail unless the destination is empty.
    Empty,
}

/// Whether a load may extend the destination schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaUpdate {
    AllowFieldAddition,
    None,
}

/// Bulk load options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    pub write_disposition: WriteDisposition,
    pub schema_update: SchemaUpdate,
    /// Infer column types from the frame when creating or extending a table.
    pub autodetect: bool,
}

impl LoadConfig {
    /// Append-only, additive-schema load used for the audit ledger.
    pub fn append_additive() -> Self {
        Self {
            write_disposition: WriteDisposition::Append,
            schema_update: SchemaUpdate::AllowFieldAddition,
            autodetect: true,
        }
    }
}

/// Submits SQL statements as asynchronous jobs.
pub trait QueryService {
    fn submit(&self, statement: Statement) -> WarehouseResult<QueryJob>;
}

/// Writes tabular data into a destination table.
pub trait BulkLoader {
    fn load(
        &self,
        frame: Frame,
        destination: &TableId,
        config: &LoadConfig,
    ) -> WarehouseResult<QueryJob>;
}

impl<T: QueryService + ?Sized> QueryService for &T {
    fn submit(&self, statement: Statement) -> WarehouseResult<QueryJob> {
        (**self).submit(statement)
    }
}

impl<T: BulkLoader + ?Sized> BulkLoader for &T {
    fn load(
        &self,
        frame: Frame,
        destination: &TableId,
        config: &LoadConfig,
    ) -> WarehouseResult<QueryJob> {
        (**self).load(frame, destination, config)
    }
}
