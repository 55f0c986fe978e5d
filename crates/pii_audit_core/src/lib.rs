//! Core of the PII anonymization and audit pipeline.
//!
//! For one warehouse table this crate resolves the tagged PII columns,
//! rewrites every record to its first anonymized state, and appends newly
//! anonymized records to an audit ledger.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod warehouse;

pub use config::{ConfigError, ConfigResult, PipelineConfig};
pub use logging::{
    default_log_level, init_logging, init_stderr_logging, logging_status, LogSink,
};
pub use model::audit::{AuditRecord, PiiColumnSet, SnapshotRow};
pub use model::identifier::{ColumnName, IdentifierError, TableId};
pub use model::value::{CellValue, RecordId};
pub use pipeline::{
    AnonymizationPipeline, Clock, FixedClock, PipelineError, PipelineResult, PipelineStep,
    RunReport, SystemClock,
};
pub use registry::{
    ColumnRegistry, RegistryError, RegistryResult, SqlitePolicyTagRegistry,
    StaticColumnRegistry,
};
pub use warehouse::{
    BulkLoader, LoadConfig, QueryJob, QueryService, SqliteWarehouse, Statement, WarehouseError,
    WarehouseResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
