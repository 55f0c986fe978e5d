//! Embedded SQLite implementation of `QueryService` and `BulkLoader`.
//!
//! # Responsibility
//! - Execute statements and loads as jobs on worker threads.
//! - Map fully-qualified table ids onto quoted SQLite table names.
//! - Evolve load destinations additively when the load config allows it.
//!
//! # Invariants
//! - One connection, serialized by a mutex. Jobs run one at a time.
//! - A cancelled job that has not started is skipped; a running one is
//!   interrupted. An interrupt never reaches a job other than the cancelled
//!   one.
//! - A load runs in one transaction: it lands completely or not at all.

use super::{
    BulkLoader, Frame, LoadConfig, QueryJob, QueryOutcome, QueryService, Row, SchemaUpdate,
    Statement, WarehouseError, WarehouseResult, WriteDisposition,
};
use crate::db::{open_db, open_db_in_memory, DbError, DbResult};
use crate::model::identifier::{ColumnName, TableId};
use crate::model::value::CellValue;
use log::{debug, error, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, InterruptHandle, Transaction};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

const NO_SUCH_TABLE_PREFIX: &str = "no such table: ";
const NO_RUNNING_JOB: u64 = 0;

/// SQLite-backed analytical store.
pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
    running_job: Arc<RunningJob>,
    next_job: AtomicU64,
}

/// Sequence of the job holding the connection, paired with its interrupt.
///
/// The marker is only changed, and the interrupt only fired, under the
/// same lock, so a job that finishes cannot hand the interrupt to its
/// successor.
struct RunningJob {
    sequence: Mutex<u64>,
    interrupt: InterruptHandle,
}

impl RunningJob {
    fn new(interrupt: InterruptHandle) -> Self {
        Self {
            sequence: Mutex::new(NO_RUNNING_JOB),
            interrupt,
        }
    }

    fn set(&self, sequence: u64) {
        *self
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = sequence;
    }

    /// Interrupts the connection when `sequence` is the running job.
    fn interrupt_if_running(&self, sequence: u64) -> bool {
        let running = self
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *running != sequence {
            return false;
        }
        self.interrupt.interrupt();
        true
    }
}

impl SqliteWarehouse {
    /// Wraps a ready connection (see `db::open_db`).
    pub fn new(conn: Connection) -> Self {
        let running_job = Arc::new(RunningJob::new(conn.get_interrupt_handle()));
        Self {
            conn: Arc::new(Mutex::new(conn)),
            running_job,
            next_job: AtomicU64::new(1),
        }
    }

    /// Opens a warehouse file with registry migrations applied.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Runs `work` on the connection directly, bypassing the job queue.
    ///
    /// Intended for seeding and inspection; pipeline steps go through
    /// `submit`/`load`.
    pub fn with_connection<T>(
        &self,
        work: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> WarehouseResult<T> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        work(&conn).map_err(WarehouseError::from)
    }

    /// Returns the names of all user tables, sorted.
    pub fn table_names(&self) -> WarehouseResult<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name;",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
    }

    fn spawn_job<F>(&self, label: &'static str, work: F) -> WarehouseResult<QueryJob>
    where
        F: FnOnce(&mut Connection) -> WarehouseResult<QueryOutcome> + Send + 'static,
    {
        let sequence = self.next_job.fetch_add(1, Ordering::Relaxed);
        let job_id = format!("{label}-{sequence}");
        let (sender, receiver) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let conn = Arc::clone(&self.conn);
        let running_job = Arc::clone(&self.running_job);
        let worker_cancelled = Arc::clone(&cancelled);
        let worker_job_id = job_id.clone();
        thread::Builder::new()
            .name(format!("warehouse-{job_id}"))
            .spawn(move || {
                let started_at = Instant::now();
                let result = match conn.lock() {
                    Ok(mut guard) => {
                        running_job.set(sequence);
                        let result = if worker_cancelled.load(Ordering::SeqCst) {
                            Err(WarehouseError::Execution {
                                message: format!("job {worker_job_id} cancelled before start"),
                            })
                        } else {
                            work(&mut guard)
                        };
                        // Cleared before the connection lock is released.
                        running_job.set(NO_RUNNING_JOB);
                        result
                    }
                    Err(_) => Err(poisoned()),
                };

                match &result {
                    Ok(outcome) => debug!(
                        "event=job_run module=warehouse status=ok job_id={} rows={} affected_rows={} duration_ms={}",
                        worker_job_id,
                        outcome.rows.len(),
                        outcome.affected_rows,
                        started_at.elapsed().as_millis()
                    ),
                    Err(err) if err.is_not_found() => debug!(
                        "event=job_run module=warehouse status=not_found job_id={} duration_ms={}",
                        worker_job_id,
                        started_at.elapsed().as_millis()
                    ),
                    Err(err) => error!(
                        "event=job_run module=warehouse status=error job_id={} duration_ms={} error={}",
                        worker_job_id,
                        started_at.elapsed().as_millis(),
                        err
                    ),
                }
                let _ = sender.send(result);
            })
            .map_err(|err| WarehouseError::Execution {
                message: format!("failed to spawn job worker: {err}"),
            })?;

        debug!("event=job_submit module=warehouse status=ok job_id={job_id}");

        let running_job = Arc::clone(&self.running_job);
        Ok(QueryJob::new(job_id, receiver).with_canceller(move || {
            cancelled.store(true, Ordering::SeqCst);
            running_job.interrupt_if_running(sequence);
        }))
    }
}

impl QueryService for SqliteWarehouse {
    fn submit(&self, statement: Statement) -> WarehouseResult<QueryJob> {
        let label = statement.label();
        self.spawn_job(label, move |conn| run_statement(conn, &statement))
    }
}

impl BulkLoader for SqliteWarehouse {
    fn load(
        &self,
        frame: Frame,
        destination: &TableId,
        config: &LoadConfig,
    ) -> WarehouseResult<QueryJob> {
        let destination = destination.clone();
        let config = *config;
        info!(
            "event=bulk_load module=warehouse status=start destination={} rows={} columns={}",
            destination,
            frame.len(),
            frame.columns().len()
        );
        self.spawn_job("bulk_load", move |conn| {
            load_frame(conn, &frame, &destination, &config)
        })
    }
}

/// Maps engine errors onto the warehouse taxonomy.
///
/// A missing table becomes `NotFound`; everything else stays a `Db` error.
pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> WarehouseError {
    if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
        if let Some(object) = message.strip_prefix(NO_SUCH_TABLE_PREFIX) {
            return WarehouseError::NotFound {
                object: object.to_string(),
            };
        }
    }
    WarehouseError::Db(DbError::Sqlite(err))
}

fn run_statement(conn: &Connection, statement: &Statement) -> WarehouseResult<QueryOutcome> {
    let mut stmt = conn.prepare(statement.sql())?;
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let params = statement.params().iter().map(to_sql_value);

    if column_names.is_empty() {
        let affected = stmt.execute(params_from_iter(params))?;
        return Ok(QueryOutcome::affected(affected as u64));
    }

    let mut rows = stmt.query(params_from_iter(params))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (index, name) in column_names.iter().enumerate() {
            let value: Value = row.get(index)?;
            record.insert(name.clone(), from_sql_value(value));
        }
        records.push(record);
    }
    Ok(QueryOutcome::with_rows(records))
}

fn load_frame(
    conn: &mut Connection,
    frame: &Frame,
    destination: &TableId,
    config: &LoadConfig,
) -> WarehouseResult<QueryOutcome> {
    let tx = conn.transaction()?;

    match existing_columns(&tx, destination)? {
        None if !config.autodetect => {
            return Err(WarehouseError::NotFound {
                object: destination.to_string(),
            });
        }
        None => create_table(&tx, destination, frame)?,
        Some(existing) => {
            let missing: Vec<(usize, &ColumnName)> = frame
                .columns()
                .iter()
                .enumerate()
                .filter(|(_, column)| !existing.iter().any(|name| column.same_as(name)))
                .collect();

            if !missing.is_empty() {
                if config.schema_update == SchemaUpdate::None {
                    return Err(WarehouseError::SchemaMismatch {
                        table: destination.to_string(),
                        columns: missing
                            .iter()
                            .map(|(_, column)| column.to_string())
                            .collect(),
                    });
                }
                for (index, column) in missing {
                    let definition = column_definition(frame, index, column, config.autodetect);
                    tx.execute_batch(&format!(
                        "ALTER TABLE {} ADD COLUMN {definition};",
                        destination.quoted()
                    ))?;
                    info!(
                        "event=schema_extend module=warehouse status=ok destination={destination} column={column}"
                    );
                }
            }
            apply_write_disposition(&tx, destination, config.write_disposition)?;
        }
    }

    let inserted = insert_rows(&tx, destination, frame)?;
    tx.commit()?;
    Ok(QueryOutcome::affected(inserted))
}

fn existing_columns(tx: &Transaction<'_>, table: &TableId) -> WarehouseResult<Option<Vec<String>>> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({});", table.quoted()))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(if columns.is_empty() {
        None
    } else {
        Some(columns)
    })
}

fn create_table(tx: &Transaction<'_>, table: &TableId, frame: &Frame) -> WarehouseResult<()> {
    let definitions = frame
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| column_definition(frame, index, column, true))
        .collect::<Vec<_>>()
        .join(", ");
    tx.execute_batch(&format!(
        "CREATE TABLE {} ({definitions});",
        table.quoted()
    ))?;
    info!(
        "event=table_create module=warehouse status=ok destination={table} columns={}",
        frame.columns().len()
    );
    Ok(())
}

fn apply_write_disposition(
    tx: &Transaction<'_>,
    table: &TableId,
    disposition: WriteDisposition,
) -> WarehouseResult<()> {
    match disposition {
        WriteDisposition::Append => Ok(()),
        WriteDisposition::Truncate => {
            tx.execute_batch(&format!("DELETE FROM {};", table.quoted()))?;
            Ok(())
        }
        WriteDisposition::Empty => {
            let has_rows: i64 = tx.query_row(
                &format!("SELECT EXISTS(SELECT 1 FROM {});", table.quoted()),
                [],
                |row| row.get(0),
            )?;
            if has_rows == 1 {
                return Err(WarehouseError::DestinationNotEmpty {
                    table: table.to_string(),
                });
            }
            Ok(())
        }
    }
}

fn insert_rows(tx: &Transaction<'_>, table: &TableId, frame: &Frame) -> WarehouseResult<u64> {
    if frame.is_empty() {
        return Ok(0);
    }

    let column_list = frame
        .columns()
        .iter()
        .map(ColumnName::quoted)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=frame.columns().len())
        .map(|position| format!("?{position}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {} ({column_list}) VALUES ({placeholders});",
        table.quoted()
    ))?;

    let mut inserted = 0_u64;
    for row in frame.rows() {
        inserted += stmt.execute(params_from_iter(row.iter().map(to_sql_value)))? as u64;
    }
    Ok(inserted)
}

fn column_definition(frame: &Frame, index: usize, column: &ColumnName, autodetect: bool) -> String {
    let declared_type = if autodetect && !frame.is_untyped(index) {
        frame.first_non_null(index).map_or("", declared_type_for)
    } else {
        ""
    };
    if declared_type.is_empty() {
        column.quoted()
    } else {
        format!("{} {declared_type}", column.quoted())
    }
}

fn declared_type_for(value: &CellValue) -> &'static str {
    match value {
        CellValue::Null => "",
        CellValue::Integer(_) => "INTEGER",
        CellValue::Real(_) => "REAL",
        CellValue::Text(_) => "TEXT",
        CellValue::Blob(_) => "BLOB",
    }
}

fn to_sql_value(value: &CellValue) -> Value {
    match value {
        CellValue::Null => Value::Null,
        CellValue::Integer(value) => Value::Integer(*value),
        CellValue::Real(value) => Value::Real(*value),
        CellValue::Text(value) => Value::Text(value.clone()),
        CellValue::Blob(value) => Value::Blob(value.clone()),
    }
}

fn from_sql_value(value: Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::Integer(value) => CellValue::Integer(value),
        Value::Real(value) => CellValue::Real(value),
        Value::Text(value) => CellValue::Text(value),
        Value::Blob(value) => CellValue::Blob(value),
    }
}

fn poisoned() -> WarehouseError {
    WarehouseError::Execution {
        message: "warehouse connection lock poisoned".to_string(),
    }
}
