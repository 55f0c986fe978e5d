//! Reads the ids already recorded in the audit ledger.
//!
//! Ids come back as `RecordId::key` strings. A shared ledger stores ids of
//! several tables in one column, whose affinity may convert them; comparing
//! by key keeps the processed check independent of that conversion.

use super::{record_id, run_job, PipelineError, PipelineResult, PipelineStep};
use crate::model::audit::{ID_COLUMN, TABLE_ID_COLUMN};
use crate::model::identifier::{ColumnName, TableId};
use crate::warehouse::{QueryService, Statement};
use log::{info, warn};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Distinct non-null ids the ledger holds for `table_id`, cast to text.
pub fn build_already_audited_statement(ledger: &TableId, table_id: &TableId) -> Statement {
    let id = ColumnName::trusted(ID_COLUMN).quoted();
    let table_column = ColumnName::trusted(TABLE_ID_COLUMN).quoted();
    Statement::new(
        "ledger_read",
        format!(
            "SELECT DISTINCT CAST({id} AS TEXT) AS {id}
             FROM {ledger}
             WHERE {table_column} = ?1 AND {id} IS NOT NULL;",
            ledger = ledger.quoted(),
        ),
    )
    .bind(table_id.to_string())
}

/// Returns the keys of `table_id` ids already present in `ledger`.
///
/// A missing ledger is the bootstrap case and yields an empty set.
///
/// # Errors
/// - `Warehouse { step: AuditRead }` for any failure other than a missing
///   ledger.
pub fn read_already_audited<Q: QueryService + ?Sized>(
    service: &Q,
    ledger: &TableId,
    table_id: &TableId,
    timeout: Duration,
) -> PipelineResult<BTreeSet<String>> {
    let started_at = Instant::now();
    let statement = build_already_audited_statement(ledger, table_id);
    let outcome = match run_job(service, statement, timeout) {
        Ok(outcome) => outcome,
        Err(err) if err.is_not_found() => {
            warn!(
                "event=ledger_read module=pipeline status=skip reason=ledger_missing ledger={ledger} table_id={table_id}"
            );
            return Ok(BTreeSet::new());
        }
        Err(err) => return Err(PipelineError::warehouse(PipelineStep::AuditRead, err)),
    };

    let ids = outcome
        .rows
        .iter()
        .map(|row| record_id(row, PipelineStep::AuditRead).map(|id| id.key()))
        .collect::<PipelineResult<BTreeSet<_>>>()?;
    info!(
        "event=ledger_read module=pipeline status=ok ledger={ledger} table_id={table_id} ids={} duration_ms={}",
        ids.len(),
        started_at.elapsed().as_millis()
    );
    Ok(ids)
}
