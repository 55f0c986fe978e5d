//! First-anonymized snapshot table.
//!
//! # Responsibility
//! - Materialize, per id, the PII values of the earliest row carrying the
//!   anonymization marker into a run-scoped table.
//! - Guarantee that table is dropped when the run ends, however it ends.
//!
//! # Invariants
//! - The snapshot name is unique per run:
//!   `<table>__anon_snapshot_<run id>`, a sibling of the target.
//! - The snapshot holds at most one row per id.
//! - The marker is bound as a parameter and matched as a literal substring.

use super::{run_job, PipelineError, PipelineResult, PipelineStep};
use crate::config::{ConfigError, PipelineConfig};
use crate::model::audit::{PiiColumnSet, FIRST_ANONYMIZED_AT_COLUMN, ID_COLUMN, LOADED_AT_COLUMN};
use crate::model::identifier::{ColumnName, TableId};
use crate::model::value::CellValue;
use crate::warehouse::{QueryService, Statement, WarehouseResult};
use log::{error, info, warn};
use std::time::{Duration, Instant};
use uuid::Uuid;

const SNAPSHOT_INFIX: &str = "__anon_snapshot_";

/// Run-scoped snapshot table name for `table_id`.
pub fn snapshot_table_id(table_id: &TableId, run_id: Uuid) -> PipelineResult<TableId> {
    let name = format!("{}{SNAPSHOT_INFIX}{}", table_id.table(), run_id.simple());
    table_id
        .sibling(&name)
        .map_err(|err| PipelineError::Config(ConfigError::from(err)))
}

/// `CREATE TABLE <snapshot> AS` the first-anonymized state of every id.
pub fn build_snapshot_statement(
    config: &PipelineConfig,
    columns: &PiiColumnSet,
    snapshot: &TableId,
) -> Statement {
    let source = config.table_id().quoted();
    let id = ColumnName::trusted(ID_COLUMN);
    let loaded_at = ColumnName::trusted(LOADED_AT_COLUMN);
    let first_anonymized_at = ColumnName::trusted(FIRST_ANONYMIZED_AT_COLUMN);
    let marker = config.marker_column();
    let pii_select = columns
        .iter()
        .map(|column| format!("{} AS {}", column.qualified("p"), column.quoted()))
        .collect::<Vec<_>>()
        .join(",\n                ");

    Statement::new(
        "snapshot_create",
        format!(
            "CREATE TABLE {snapshot} AS
            WITH first_anonymized AS (
                SELECT {id} AS id, MIN({loaded_at}) AS first_anonymized_at
                FROM {source}
                WHERE instr({marker}, ?1) > 0
                GROUP BY {id}
            )
            SELECT DISTINCT
                {p_id} AS {id},
                {pii_select},
                f.first_anonymized_at AS {first_anonymized_at}
            FROM {source} AS p
            INNER JOIN first_anonymized AS f
                ON {p_id} = f.id AND {p_loaded_at} = f.first_anonymized_at
            WHERE instr({p_marker}, ?1) > 0;",
            snapshot = snapshot.quoted(),
            id = id.quoted(),
            loaded_at = loaded_at.quoted(),
            first_anonymized_at = first_anonymized_at.quoted(),
            marker = marker.quoted(),
            p_id = id.qualified("p"),
            p_loaded_at = loaded_at.qualified("p"),
            p_marker = marker.qualified("p"),
        ),
    )
    .bind(config.marker())
}

fn build_shape_statement(snapshot: &TableId) -> Statement {
    let id = ColumnName::trusted(ID_COLUMN).quoted();
    Statement::new(
        "snapshot_shape",
        format!(
            "SELECT COUNT(*) AS total_rows, COUNT(DISTINCT {id}) AS distinct_ids FROM {};",
            snapshot.quoted()
        ),
    )
}

fn build_drop_statement(snapshot: &TableId) -> Statement {
    Statement::new(
        "snapshot_drop",
        format!("DROP TABLE IF EXISTS {};", snapshot.quoted()),
    )
}

/// Owns the run-scoped snapshot table.
///
/// Call `drop_table` on the success path to observe cleanup errors. If the
/// guard is dropped without it, the table is dropped best-effort and a
/// failure is only logged.
pub struct SnapshotTable<'s, Q: QueryService + ?Sized> {
    service: &'s Q,
    table: TableId,
    timeout: Duration,
    row_count: u64,
    released: bool,
}

impl<'s, Q: QueryService + ?Sized> SnapshotTable<'s, Q> {
    /// Builds the snapshot of `config.table_id()` for this run.
    ///
    /// # Errors
    /// - `Warehouse { step: Snapshot }` when creation or verification fails.
    /// - `AmbiguousSnapshot` when some id has several distinct marker rows at
    ///   its earliest `loaded_at`.
    pub fn create(
        service: &'s Q,
        config: &PipelineConfig,
        columns: &PiiColumnSet,
        run_id: Uuid,
    ) -> PipelineResult<Self> {
        let started_at = Instant::now();
        let table = snapshot_table_id(config.table_id(), run_id)?;
        // Guard first: a statement that times out may still create the table.
        let mut snapshot = Self {
            service,
            table,
            timeout: config.job_timeout(),
            row_count: 0,
            released: false,
        };

        let statement = build_snapshot_statement(config, columns, &snapshot.table);
        run_job(service, statement, snapshot.timeout)
            .map_err(|err| PipelineError::warehouse(PipelineStep::Snapshot, err))?;
        snapshot.row_count = snapshot.verify_one_row_per_id()?;

        info!(
            "event=snapshot_create module=pipeline status=ok snapshot={} rows={} duration_ms={}",
            snapshot.table,
            snapshot.row_count,
            started_at.elapsed().as_millis()
        );
        Ok(snapshot)
    }

    pub fn table_id(&self) -> &TableId {
        &self.table
    }

    /// Number of ids in the snapshot.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Drops the snapshot table and reports failure.
    ///
    /// # Errors
    /// - `Warehouse { step: Cleanup }` when the drop job fails.
    pub fn drop_table(mut self) -> PipelineResult<()> {
        self.released = true;
        drop_snapshot(self.service, &self.table, self.timeout)
            .map_err(|err| PipelineError::warehouse(PipelineStep::Cleanup, err))?;
        info!(
            "event=snapshot_drop module=pipeline status=ok snapshot={}",
            self.table
        );
        Ok(())
    }

    fn verify_one_row_per_id(&self) -> PipelineResult<u64> {
        let outcome = run_job(self.service, build_shape_statement(&self.table), self.timeout)
            .map_err(|err| PipelineError::warehouse(PipelineStep::Snapshot, err))?;
        let row = outcome.rows.first().ok_or_else(|| PipelineError::InvalidData {
            step: PipelineStep::Snapshot,
            message: "row count query returned no rows".to_string(),
        })?;
        let rows = count_cell(row.get("total_rows"))?;
        let distinct_ids = count_cell(row.get("distinct_ids"))?;

        if rows != distinct_ids {
            return Err(PipelineError::AmbiguousSnapshot {
                snapshot: self.table.to_string(),
                rows,
                distinct_ids,
            });
        }
        Ok(rows)
    }
}

impl<Q: QueryService + ?Sized> Drop for SnapshotTable<'_, Q> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match drop_snapshot(self.service, &self.table, self.timeout) {
            Ok(()) => warn!(
                "event=snapshot_drop module=pipeline status=ok trigger=abort snapshot={}",
                self.table
            ),
            Err(err) => error!(
                "event=snapshot_drop module=pipeline status=error trigger=abort snapshot={} error={err}",
                self.table
            ),
        }
    }
}

fn drop_snapshot<Q: QueryService + ?Sized>(
    service: &Q,
    table: &TableId,
    timeout: Duration,
) -> WarehouseResult<()> {
    run_job(service, build_drop_statement(table), timeout).map(|_| ())
}

fn count_cell(value: Option<&CellValue>) -> PipelineResult<u64> {
    match value {
        Some(CellValue::Integer(count)) => u64::try_from(*count).map_err(|_| {
            PipelineError::InvalidData {
                step: PipelineStep::Snapshot,
                message: format!("negative row count {count}"),
            }
        }),
        other => Err(PipelineError::InvalidData {
            step: PipelineStep::Snapshot,
            message: format!(
                "row count is {}",
                other.map_or("missing", CellValue::type_name)
            ),
        }),
    }
}
