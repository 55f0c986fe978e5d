//! Explicit per-run pipeline configuration.
//!
//! # Responsibility
//! - Carry the target table, ledger location, marker rule and job timeout.
//! - Reject configurations that would make a run degenerate.
//!
//! # Invariants
//! - The ledger table is never the target table.
//! - The marker is non-blank and the job timeout is non-zero.

use crate::model::identifier::{ColumnName, IdentifierError, TableId};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Literal substring that marks a row as already anonymized.
pub const DEFAULT_MARKER: &str = "anonymized";
/// Column searched for the anonymization marker.
pub const DEFAULT_MARKER_COLUMN: &str = "email";
/// Ledger table name, resolved in the target's project and dataset.
pub const DEFAULT_LEDGER_TABLE: &str = "audit_table";
/// Upper bound for a single warehouse job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors. All of them are fatal and raised before any table
/// is mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The registry resolved no PII column for the table.
    NoPiiColumns { table_id: String },
    /// A PII column collides with a column the ledger owns.
    ReservedColumn(String),
    InvalidIdentifier(IdentifierError),
    InvalidMarker,
    InvalidTimeout,
    LedgerIsTarget(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPiiColumns { table_id } => {
                write!(f, "no PII columns are tagged for table `{table_id}`")
            }
            Self::ReservedColumn(name) => {
                write!(f, "PII column `{name}` collides with a reserved ledger column")
            }
            Self::InvalidIdentifier(err) => write!(f, "{err}"),
            Self::InvalidMarker => write!(f, "anonymization marker cannot be blank"),
            Self::InvalidTimeout => write!(f, "job timeout must be greater than zero"),
            Self::LedgerIsTarget(table_id) => {
                write!(f, "ledger table `{table_id}` cannot be the target table")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidIdentifier(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IdentifierError> for ConfigError {
    fn from(value: IdentifierError) -> Self {
        Self::InvalidIdentifier(value)
    }
}

/// Configuration for one anonymization run against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    table_id: TableId,
    ledger_table: TableId,
    marker: String,
    marker_column: ColumnName,
    job_timeout: Duration,
}

impl PipelineConfig {
    /// Creates a config with defaults derived from `table_id`.
    ///
    /// The ledger defaults to `<project>.<dataset>.audit_table`.
    pub fn new(table_id: TableId) -> ConfigResult<Self> {
        let ledger_table = table_id.sibling(DEFAULT_LEDGER_TABLE)?;
        Ok(Self {
            table_id,
            ledger_table,
            marker: DEFAULT_MARKER.to_string(),
            marker_column: ColumnName::trusted(DEFAULT_MARKER_COLUMN),
            job_timeout: DEFAULT_JOB_TIMEOUT,
        })
    }

    pub fn with_ledger(mut self, ledger_table: TableId) -> Self {
        self.ledger_table = ledger_table;
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_marker_column(mut self, marker_column: ColumnName) -> Self {
        self.marker_column = marker_column;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    /// - `InvalidMarker` for a blank marker.
    /// - `InvalidTimeout` for a zero timeout.
    /// - `LedgerIsTarget` when the ledger and target are the same table.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.marker.trim().is_empty() {
            return Err(ConfigError::InvalidMarker);
        }
        if self.job_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.ledger_table.same_table(&self.table_id) {
            return Err(ConfigError::LedgerIsTarget(self.ledger_table.to_string()));
        }
        Ok(())
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn ledger_table(&self) -> &TableId {
        &self.ledger_table
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn marker_column(&self) -> &ColumnName {
        &self.marker_column
    }

    pub fn job_timeout(&self) -> Duration {
        self.job_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, PipelineConfig, DEFAULT_JOB_TIMEOUT, DEFAULT_MARKER};
    use crate::model::identifier::TableId;
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig::new(TableId::parse("proj.crm.customers").unwrap()).unwrap()
    }

    #[test]
    fn defaults_derive_ledger_from_target_dataset() {
        let config = config();
        assert_eq!(config.ledger_table().to_string(), "proj.crm.audit_table");
        assert_eq!(config.marker(), DEFAULT_MARKER);
        assert_eq!(config.marker_column().as_str(), "email");
        assert_eq!(config.job_timeout(), DEFAULT_JOB_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_settings() {
        assert_eq!(
            config().with_marker("  ").validate(),
            Err(ConfigError::InvalidMarker)
        );
        assert_eq!(
            config().with_job_timeout(Duration::ZERO).validate(),
            Err(ConfigError::InvalidTimeout)
        );

        let target = TableId::parse("proj.crm.customers").unwrap();
        let err = config().with_ledger(target).validate().unwrap_err();
        assert!(matches!(err, ConfigError::LedgerIsTarget(_)));
    }

    #[test]
    fn ledger_differing_from_target_only_in_case_is_rejected() {
        let ledger = TableId::parse("proj.crm.Customers").unwrap();
        let err = config().with_ledger(ledger).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::LedgerIsTarget("proj.crm.Customers".to_string())
        );

        let other = TableId::parse("proj.crm.customers_audit").unwrap();
        assert!(config().with_ledger(other).validate().is_ok());
    }
}
