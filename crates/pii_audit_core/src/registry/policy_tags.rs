//! SQLite-backed policy-tag registry.
//!
//! # Responsibility
//! - Store column-level policy tags in `pii_policy_tags`.
//! - Resolve tagged columns in tagging order.
//! - Back the `pii-audit tag|untag|tags` commands, which fill the registry
//!   the pipeline reads.
//!
//! # Invariants
//! - One tag per `(table_id, column_name)`; re-tagging replaces the tag and
//!   keeps the original ordinal.
//! - Column names are validated before they are stored.

use super::{ColumnRegistry, RegistryError, RegistryResult};
use crate::db::migrations::latest_version;
use crate::model::identifier::{ColumnName, TableId};
use log::info;
use rusqlite::{params, Connection};
use serde::Serialize;

/// One tagged column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyTagBinding {
    pub column_name: String,
    pub policy_tag: String,
    pub ordinal: i64,
}

/// Policy-tag registry over a migrated SQLite connection.
pub struct SqlitePolicyTagRegistry<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePolicyTagRegistry<'conn> {
    /// Constructs a registry from a migrated connection.
    ///
    /// # Errors
    /// - `Unavailable` when registry migrations have not been applied.
    pub fn try_new(conn: &'conn Connection) -> RegistryResult<Self> {
        let version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if version < latest_version() {
            return Err(RegistryError::Unavailable(format!(
                "registry schema version {version} is older than required {}",
                latest_version()
            )));
        }
        Ok(Self { conn })
    }

    /// Tags `column` of `table` as PII.
    pub fn tag_column(&self, table: &TableId, column: &str, policy_tag: &str) -> RegistryResult<()> {
        let column = ColumnName::parse(column)?;
        let policy_tag = policy_tag.trim();
        if policy_tag.is_empty() {
            return Err(RegistryError::InvalidPolicyTag(policy_tag.to_string()));
        }

        self.conn.execute(
            "INSERT INTO pii_policy_tags (table_id, column_name, policy_tag, ordinal)
             VALUES (
                ?1,
                ?2,
                ?3,
                (SELECT COALESCE(MAX(ordinal), 0) + 1 FROM pii_policy_tags WHERE table_id = ?1)
             )
             ON CONFLICT (table_id, column_name) DO UPDATE SET policy_tag = excluded.policy_tag;",
            params![table.to_string(), column.as_str(), policy_tag],
        )?;
        info!(
            "event=policy_tag_set module=registry status=ok table_id={table} column={column} policy_tag={policy_tag}"
        );
        Ok(())
    }

    /// Removes the tag of `column`. Returns whether a tag existed.
    pub fn untag_column(&self, table: &TableId, column: &str) -> RegistryResult<bool> {
        let column = ColumnName::parse(column)?;
        let removed = self.conn.execute(
            "DELETE FROM pii_policy_tags WHERE table_id = ?1 AND column_name = ?2;",
            params![table.to_string(), column.as_str()],
        )?;
        Ok(removed > 0)
    }

    /// Lists all bindings of `table` in resolution order.
    pub fn list_bindings(&self, table: &TableId) -> RegistryResult<Vec<PolicyTagBinding>> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name, policy_tag, ordinal
             FROM pii_policy_tags
             WHERE table_id = ?1
             ORDER BY ordinal ASC, column_name ASC;",
        )?;
        let bindings = stmt
            .query_map([table.to_string()], |row| {
                Ok(PolicyTagBinding {
                    column_name: row.get(0)?,
                    policy_tag: row.get(1)?,
                    ordinal: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bindings)
    }
}

impl ColumnRegistry for SqlitePolicyTagRegistry<'_> {
    fn resolve_pii_columns(&self, table: &TableId) -> RegistryResult<Vec<String>> {
        Ok(self
            .list_bindings(table)?
            .into_iter()
            .map(|binding| binding.column_name)
            .collect())
    }
}
