//! Overwrites primary-table PII columns from the snapshot.

use super::{run_job, PipelineError, PipelineResult, PipelineStep};
use crate::config::PipelineConfig;
use crate::model::audit::{PiiColumnSet, ID_COLUMN};
use crate::model::identifier::{ColumnName, TableId};
use crate::warehouse::{QueryService, Statement};
use log::info;
use std::time::Instant;

/// `UPDATE ... FROM` setting every PII column of every matching id.
///
/// Rows already equal to the snapshot are excluded, so a repeated merge
/// changes nothing. `IS NOT` treats two NULLs as equal.
pub fn build_merge_statement(
    config: &PipelineConfig,
    columns: &PiiColumnSet,
    snapshot: &TableId,
) -> Statement {
    let id = ColumnName::trusted(ID_COLUMN);
    let assignments = columns
        .iter()
        .map(|column| format!("{} = {}", column.quoted(), column.qualified("snap")))
        .collect::<Vec<_>>()
        .join(",\n                ");
    let differs = columns
        .iter()
        .map(|column| {
            format!(
                "{} IS NOT {}",
                column.qualified("target"),
                column.qualified("snap")
            )
        })
        .collect::<Vec<_>>()
        .join(" OR ");

    Statement::new(
        "merge",
        format!(
            "UPDATE {target} AS target
            SET {assignments}
            FROM {snapshot} AS snap
            WHERE {target_id} = {snap_id}
              AND ({differs});",
            target = config.table_id().quoted(),
            snapshot = snapshot.quoted(),
            target_id = id.qualified("target"),
            snap_id = id.qualified("snap"),
        ),
    )
}

/// Applies the snapshot to the primary table. Returns the rows changed.
///
/// Rows whose id is absent from the snapshot are left untouched.
///
/// # Errors
/// - `Warehouse { step: Merge }` when the update job fails.
pub fn merge_snapshot<Q: QueryService + ?Sized>(
    service: &Q,
    config: &PipelineConfig,
    snapshot: &TableId,
    columns: &PiiColumnSet,
) -> PipelineResult<u64> {
    let started_at = Instant::now();
    let statement = build_merge_statement(config, columns, snapshot);
    let outcome = run_job(service, statement, config.job_timeout())
        .map_err(|err| PipelineError::warehouse(PipelineStep::Merge, err))?;
    info!(
        "event=merge module=pipeline status=ok table_id={} snapshot={snapshot} rows={} duration_ms={}",
        config.table_id(),
        outcome.affected_rows,
        started_at.elapsed().as_millis()
    );
    Ok(outcome.affected_rows)
}
