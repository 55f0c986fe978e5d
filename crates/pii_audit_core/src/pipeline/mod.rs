//! Anonymization-and-audit pipeline.
//!
//! # Responsibility
//! - Run discovery, ledger read, snapshot, merge, audit write and cleanup in
//!   strict order for one table.
//! - Tag every failure with the step that raised it.
//!
//! # Invariants
//! - Each step's job completes before the next step submits anything.
//! - No table is mutated before discovery and ledger read succeed.
//! - The run-scoped snapshot table is dropped on every exit path.
//! - Merge and audit write are independent idempotent steps. A failed audit
//!   write is repaired by the next run, because the affected ids are still in
//!   the snapshot and not yet in the ledger.

use crate::config::{ConfigError, PipelineConfig};
use crate::model::audit::{PiiColumnSet, ID_COLUMN};
use crate::model::identifier::TableId;
use crate::model::value::RecordId;
use crate::registry::{ColumnRegistry, RegistryError};
use crate::warehouse::{
    BulkLoader, QueryOutcome, QueryService, Row, Statement, WarehouseError, WarehouseResult,
};
use log::{error, info};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub mod audit_writer;
pub mod discovery;
pub mod ledger_reader;
pub mod merge;
pub mod snapshot;

pub use audit_writer::{write_audit_entries, AuditWriteOutcome};
pub use discovery::discover_pii_columns;
pub use ledger_reader::read_already_audited;
pub use merge::merge_snapshot;
pub use snapshot::SnapshotTable;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Discovery,
    AuditRead,
    Snapshot,
    Merge,
    AuditWrite,
    Cleanup,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::AuditRead => "audit_read",
            Self::Snapshot => "snapshot",
            Self::Merge => "merge",
            Self::AuditWrite => "audit_write",
            Self::Cleanup => "cleanup",
        }
    }
}

impl Display for PipelineStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal pipeline failure.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    /// Column discovery failed; raised before any table mutation.
    Registry(RegistryError),
    Warehouse {
        step: PipelineStep,
        source: WarehouseError,
    },
    /// The snapshot holds more than one row for some id.
    AmbiguousSnapshot {
        snapshot: String,
        rows: u64,
        distinct_ids: u64,
    },
    InvalidData {
        step: PipelineStep,
        message: String,
    },
}

impl PipelineError {
    pub(crate) fn warehouse(step: PipelineStep, source: WarehouseError) -> Self {
        Self::Warehouse { step, source }
    }

    /// Stage label for logs: a pipeline step or `config`.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Registry(_) => PipelineStep::Discovery.as_str(),
            Self::Warehouse { step, .. } | Self::InvalidData { step, .. } => step.as_str(),
            Self::AmbiguousSnapshot { .. } => PipelineStep::Snapshot.as_str(),
        }
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Registry(err) => write!(f, "column discovery failed: {err}"),
            Self::Warehouse { step, source } => write!(f, "{step} step failed: {source}"),
            Self::AmbiguousSnapshot {
                snapshot,
                rows,
                distinct_ids,
            } => write!(
                f,
                "snapshot `{snapshot}` has {rows} rows for {distinct_ids} ids; first anonymized state is ambiguous"
            ),
            Self::InvalidData { step, message } => {
                write!(f, "{step} step read invalid data: {message}")
            }
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Warehouse { source, .. } => Some(source),
            Self::AmbiguousSnapshot { .. } | Self::InvalidData { .. } => None,
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Wall-clock source for the run-wide `anonymized_at` stamp.
pub trait Clock {
    fn now_epoch_ms(&self) -> i64;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
            })
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_epoch_ms(&self) -> i64 {
        self.0
    }
}

/// Summary of one successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub table_id: TableId,
    pub ledger_table: TableId,
    pub pii_columns: PiiColumnSet,
    /// Ids already in the ledger for this table before the run.
    pub already_audited: usize,
    /// Ids in the first-anonymized snapshot.
    pub snapshot_rows: u64,
    /// Primary-table rows whose PII columns changed.
    pub merged_rows: u64,
    pub audit_rows_appended: u64,
    /// Set only when audit rows were appended.
    pub anonymized_at: Option<i64>,
    pub duration_ms: u64,
}

/// One-table anonymization pipeline.
pub struct AnonymizationPipeline<R, W, C = SystemClock> {
    config: PipelineConfig,
    registry: R,
    warehouse: W,
    clock: C,
}

impl<R, W> AnonymizationPipeline<R, W, SystemClock>
where
    R: ColumnRegistry,
    W: QueryService + BulkLoader,
{
    pub fn new(config: PipelineConfig, registry: R, warehouse: W) -> Self {
        Self {
            config,
            registry,
            warehouse,
            clock: SystemClock,
        }
    }
}

impl<R, W, C> AnonymizationPipeline<R, W, C>
where
    R: ColumnRegistry,
    W: QueryService + BulkLoader,
    C: Clock,
{
    /// Replaces the clock used for `anonymized_at`.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> AnonymizationPipeline<R, W, C2> {
        AnonymizationPipeline {
            config: self.config,
            registry: self.registry,
            warehouse: self.warehouse,
            clock,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Runs all steps once.
    ///
    /// # Errors
    /// - `Config` / `Registry` before any table is touched.
    /// - `Warehouse` tagged with the failing step; the snapshot table is
    ///   still dropped.
    /// - `AmbiguousSnapshot` when the first anonymized state of an id is not
    ///   unique; nothing is merged.
    pub fn run(&self) -> PipelineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Instant::now();
        info!(
            "event=pipeline_run module=pipeline status=start run_id={run_id} table_id={} ledger={}",
            self.config.table_id(),
            self.config.ledger_table()
        );

        match self.run_steps(run_id, started_at) {
            Ok(report) => {
                info!(
                    "event=pipeline_run module=pipeline status=ok run_id={run_id} snapshot_rows={} merged_rows={} audit_rows_appended={} duration_ms={}",
                    report.snapshot_rows,
                    report.merged_rows,
                    report.audit_rows_appended,
                    report.duration_ms
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    "event=pipeline_run module=pipeline status=error run_id={run_id} stage={} duration_ms={} error={err}",
                    err.stage(),
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    fn run_steps(&self, run_id: Uuid, started_at: Instant) -> PipelineResult<RunReport> {
        self.config.validate()?;
        let table_id = self.config.table_id();
        let timeout = self.config.job_timeout();

        let columns = discover_pii_columns(&self.registry, table_id)?;
        let already_audited =
            read_already_audited(&self.warehouse, self.config.ledger_table(), table_id, timeout)?;

        let snapshot = SnapshotTable::create(&self.warehouse, &self.config, &columns, run_id)?;
        let merged_rows =
            merge_snapshot(&self.warehouse, &self.config, snapshot.table_id(), &columns)?;
        let audit = write_audit_entries(
            &self.warehouse,
            &self.config,
            snapshot.table_id(),
            &columns,
            &already_audited,
            &self.clock,
        )?;
        let snapshot_rows = snapshot.row_count();
        snapshot.drop_table()?;

        Ok(RunReport {
            run_id,
            table_id: table_id.clone(),
            ledger_table: self.config.ledger_table().clone(),
            pii_columns: columns,
            already_audited: already_audited.len(),
            snapshot_rows,
            merged_rows,
            audit_rows_appended: audit.appended,
            anonymized_at: audit.anonymized_at,
            duration_ms: u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Submits `statement` and waits for it within `timeout`.
pub(crate) fn run_job<Q: QueryService + ?Sized>(
    service: &Q,
    statement: Statement,
    timeout: Duration,
) -> WarehouseResult<QueryOutcome> {
    service.submit(statement)?.wait(timeout)
}

/// Reads the `id` cell of a result row.
pub(crate) fn record_id(row: &Row, step: PipelineStep) -> PipelineResult<RecordId> {
    let value = row.get(ID_COLUMN).ok_or_else(|| PipelineError::InvalidData {
        step,
        message: format!("result row has no `{ID_COLUMN}` column"),
    })?;
    RecordId::try_from(value).map_err(|type_name| PipelineError::InvalidData {
        step,
        message: format!("unsupported {type_name} value in `{ID_COLUMN}`"),
    })
}
