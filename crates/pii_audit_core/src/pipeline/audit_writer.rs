//! Appends first-time anonymized records to the audit ledger.
//!
//! # Responsibility
//! - Read the snapshot back in id order.
//! - Keep only ids the ledger does not hold yet for this table.
//! - Append them in one load, stamped with one run-wide `anonymized_at`.
//!
//! # Invariants
//! - No load is submitted when nothing is new.
//! - The ledger schema only grows: new PII columns are added, existing
//!   columns are never dropped or retyped.

use super::{record_id, run_job, Clock, PipelineError, PipelineResult, PipelineStep};
use crate::config::PipelineConfig;
use crate::model::audit::{
    ledger_columns, AuditRecord, PiiColumnSet, SnapshotRow, FIRST_ANONYMIZED_AT_COLUMN,
    ID_COLUMN,
};
use crate::model::identifier::{ColumnName, TableId};
use crate::model::value::CellValue;
use crate::warehouse::{
    BulkLoader, Frame, LoadConfig, QueryService, Row, Statement, WarehouseError,
};
use log::{debug, info};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Result of the audit write step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditWriteOutcome {
    pub snapshot_rows: usize,
    pub appended: u64,
    /// Stamp shared by every appended row; `None` when nothing was appended.
    pub anonymized_at: Option<i64>,
}

/// `SELECT id, <pii...>, first_anonymized_at FROM <snapshot> ORDER BY id`.
pub fn build_snapshot_read_statement(columns: &PiiColumnSet, snapshot: &TableId) -> Statement {
    let id = ColumnName::trusted(ID_COLUMN).quoted();
    let first_anonymized_at = ColumnName::trusted(FIRST_ANONYMIZED_AT_COLUMN).quoted();
    let pii = columns
        .iter()
        .map(|column| format!("{0} AS {0}", column.quoted()))
        .collect::<Vec<_>>()
        .join(", ");
    Statement::new(
        "snapshot_read",
        format!(
            "SELECT {id} AS {id}, {pii}, {first_anonymized_at} AS {first_anonymized_at}
             FROM {}
             ORDER BY {id};",
            snapshot.quoted()
        ),
    )
}

/// Reads every snapshot row, PII values aligned with `columns`.
///
/// # Errors
/// - `Warehouse { step: AuditWrite }` when the read job fails.
/// - `InvalidData` when a row lacks a column or has an unusable id.
pub fn read_snapshot_rows<Q: QueryService + ?Sized>(
    service: &Q,
    snapshot: &TableId,
    columns: &PiiColumnSet,
    timeout: Duration,
) -> PipelineResult<Vec<SnapshotRow>> {
    let outcome = run_job(
        service,
        build_snapshot_read_statement(columns, snapshot),
        timeout,
    )
    .map_err(|err| PipelineError::warehouse(PipelineStep::AuditWrite, err))?;

    outcome
        .rows
        .iter()
        .map(|row| {
            Ok(SnapshotRow {
                id: record_id(row, PipelineStep::AuditWrite)?,
                pii_values: columns
                    .iter()
                    .map(|column| cell(row, column.as_str()))
                    .collect::<PipelineResult<Vec<_>>>()?,
                first_anonymized_at: cell(row, FIRST_ANONYMIZED_AT_COLUMN)?,
            })
        })
        .collect()
}

/// Keeps snapshot rows whose id key is not in `processed`, in input order.
pub fn select_new_records(
    table_id: &TableId,
    rows: Vec<SnapshotRow>,
    processed: &BTreeSet<String>,
) -> Vec<AuditRecord> {
    rows.into_iter()
        .filter(|row| !processed.contains(&row.id.key()))
        .map(|row| AuditRecord::from_snapshot(table_id, row))
        .collect()
}

/// Lays out `records` as a ledger frame.
///
/// # Errors
/// - `InvalidData` when a record does not match the column layout.
pub fn build_audit_frame(
    columns: &PiiColumnSet,
    records: Vec<AuditRecord>,
    anonymized_at: i64,
) -> PipelineResult<Frame> {
    let invalid = |err: WarehouseError| PipelineError::warehouse(PipelineStep::AuditWrite, err);
    let mut frame = Frame::new(ledger_columns(columns)).map_err(invalid)?;
    // One ledger serves tables with integer and text ids alike.
    frame.mark_untyped(ID_COLUMN).map_err(invalid)?;
    for record in records {
        debug!(
            "event=audit_row_created module=pipeline table_id={} id={}",
            record.table_id, record.id
        );
        frame
            .push_row(record.into_cells(anonymized_at))
            .map_err(invalid)?;
    }
    Ok(frame)
}

/// Appends ledger rows for every snapshot id not yet audited.
///
/// # Errors
/// - `Warehouse { step: AuditWrite }` when the snapshot read or the load
///   fails. The primary table is already merged at this point; the next run
///   appends the missing rows.
pub fn write_audit_entries<S, C>(
    warehouse: &S,
    config: &PipelineConfig,
    snapshot: &TableId,
    columns: &PiiColumnSet,
    processed: &BTreeSet<String>,
    clock: &C,
) -> PipelineResult<AuditWriteOutcome>
where
    S: QueryService + BulkLoader + ?Sized,
    C: Clock + ?Sized,
{
    let started_at = Instant::now();
    let table_id = config.table_id();
    let ledger = config.ledger_table();

    let rows = read_snapshot_rows(warehouse, snapshot, columns, config.job_timeout())?;
    let snapshot_rows = rows.len();
    let records = select_new_records(table_id, rows, processed);
    if records.is_empty() {
        info!(
            "event=audit_write module=pipeline status=skip reason=no_new_records table_id={table_id} ledger={ledger} snapshot_rows={snapshot_rows}"
        );
        return Ok(AuditWriteOutcome {
            snapshot_rows,
            appended: 0,
            anonymized_at: None,
        });
    }

    let anonymized_at = clock.now_epoch_ms();
    let frame = build_audit_frame(columns, records, anonymized_at)?;
    let outcome = warehouse
        .load(frame, ledger, &LoadConfig::append_additive())
        .and_then(|job| job.wait(config.job_timeout()))
        .map_err(|err| PipelineError::warehouse(PipelineStep::AuditWrite, err))?;

    info!(
        "event=audit_write module=pipeline status=ok table_id={table_id} ledger={ledger} snapshot_rows={snapshot_rows} appended={} duration_ms={}",
        outcome.affected_rows,
        started_at.elapsed().as_millis()
    );
    Ok(AuditWriteOutcome {
        snapshot_rows,
        appended: outcome.affected_rows,
        anonymized_at: Some(anonymized_at),
    })
}

fn cell(row: &Row, column: &str) -> PipelineResult<CellValue> {
    row.get(column)
        .cloned()
        .ok_or_else(|| PipelineError::InvalidData {
            step: PipelineStep::AuditWrite,
            message: format!("snapshot row has no `{column}` column"),
        })
}
