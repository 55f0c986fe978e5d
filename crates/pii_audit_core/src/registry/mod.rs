//! Sensitive-column registry contracts and implementations.
//!
//! # Responsibility
//! - Answer "which columns of this table are PII" for column discovery.
//! - Keep registry storage details out of the pipeline.
//!
//! # Invariants
//! - Registries return raw column names in a stable order; validation of
//!   those names is the caller's job.

use crate::db::DbError;
use crate::model::identifier::{IdentifierError, TableId};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod policy_tags;
pub mod static_registry;

pub use policy_tags::{PolicyTagBinding, SqlitePolicyTagRegistry};
pub use static_registry::StaticColumnRegistry;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry lookup or administration failure.
#[derive(Debug)]
pub enum RegistryError {
    Db(DbError),
    InvalidColumn(IdentifierError),
    InvalidPolicyTag(String),
    /// Registry backend cannot answer right now.
    Unavailable(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidColumn(err) => write!(f, "{err}"),
            Self::InvalidPolicyTag(value) => write!(f, "invalid policy tag: `{value}`"),
            Self::Unavailable(message) => write!(f, "column registry unavailable: {message}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidColumn(err) => Some(err),
            Self::InvalidPolicyTag(_) | Self::Unavailable(_) => None,
        }
    }
}

impl From<DbError> for RegistryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<IdentifierError> for RegistryError {
    fn from(value: IdentifierError) -> Self {
        Self::InvalidColumn(value)
    }
}

/// Source of PII column designations.
pub trait ColumnRegistry {
    /// Returns the PII column names of `table`, in registry order.
    fn resolve_pii_columns(&self, table: &TableId) -> RegistryResult<Vec<String>>;
}

impl<T: ColumnRegistry + ?Sized> ColumnRegistry for &T {
    fn resolve_pii_columns(&self, table: &TableId) -> RegistryResult<Vec<String>> {
        (**self).resolve_pii_columns(table)
    }
}
