//! Validated warehouse identifiers.
//!
//! # Responsibility
//! - Parse fully-qualified table ids (`project.dataset.table`).
//! - Parse column names against a strict allow-list.
//! - Render both as quoted SQL identifiers.
//!
//! # Invariants
//! - A value of `TableId`/`ColumnName` always matches the allow-list, so its
//!   quoted form never contains a quote character.
//! - Identifiers from the tag registry are never interpolated unchecked.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

const MAX_IDENTIFIER_CHARS: usize = 300;

static PROJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("valid project regex"));
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name regex"));

pub type IdentifierResult<T> = Result<T, IdentifierError>;

/// Identifier parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Input was blank.
    Empty { kind: &'static str },
    /// Input does not match the allow-list for `kind`.
    Invalid { kind: &'static str, value: String },
}

impl Display for IdentifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty { kind } => write!(f, "{kind} cannot be empty"),
            Self::Invalid { kind, value } => write!(f, "invalid {kind}: `{value}`"),
        }
    }
}

impl Error for IdentifierError {}

/// Fully-qualified table identifier: `project.dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId {
    project: String,
    dataset: String,
    table: String,
}

impl TableId {
    /// Parses and validates a fully-qualified table id.
    ///
    /// # Errors
    /// - `Empty` for blank input.
    /// - `Invalid` when the id does not have exactly three valid segments.
    pub fn parse(value: &str) -> IdentifierResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty { kind: "table id" });
        }
        let invalid = || IdentifierError::Invalid {
            kind: "table id",
            value: trimmed.to_string(),
        };

        let segments: Vec<&str> = trimmed.split('.').collect();
        let [project, dataset, table] = segments.as_slice() else {
            return Err(invalid());
        };
        if !is_within_length(project) || !PROJECT_RE.is_match(project) {
            return Err(invalid());
        }
        if !is_valid_name(dataset) || !is_valid_name(table) {
            return Err(invalid());
        }

        Ok(Self {
            project: (*project).to_string(),
            dataset: (*dataset).to_string(),
            table: (*table).to_string(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns a table id in the same project and dataset.
    pub fn sibling(&self, table: &str) -> IdentifierResult<Self> {
        if !is_valid_name(table) {
            return Err(IdentifierError::Invalid {
                kind: "table name",
                value: table.to_string(),
            });
        }
        Ok(Self {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: table.to_string(),
        })
    }

    /// Quoted SQL identifier for the whole fully-qualified name.
    pub fn quoted(&self) -> String {
        format!("\"{self}\"")
    }

    /// True when both ids name the same SQLite table, which ignores ASCII case.
    pub fn same_table(&self, other: &TableId) -> bool {
        self.project.eq_ignore_ascii_case(&other.project)
            && self.dataset.eq_ignore_ascii_case(&other.dataset)
            && self.table.eq_ignore_ascii_case(&other.table)
    }
}

impl Display for TableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableId {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Serialize for TableId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Column name matching `^[A-Za-z_][A-Za-z0-9_]*$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ColumnName(String);

impl ColumnName {
    /// Parses and validates a column name.
    pub fn parse(value: &str) -> IdentifierResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty {
                kind: "column name",
            });
        }
        if !is_valid_name(trimmed) {
            return Err(IdentifierError::Invalid {
                kind: "column name",
                value: trimmed.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Builds a name from a crate-internal constant known to be valid.
    pub(crate) fn trusted(value: &'static str) -> Self {
        debug_assert!(is_valid_name(value), "constant column name must be valid");
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted SQL identifier.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Quoted identifier qualified by a table alias, e.g. `snap."name"`.
    pub fn qualified(&self, alias: &str) -> String {
        format!("{alias}.\"{}\"", self.0)
    }

    /// SQLite compares identifiers case-insensitively.
    pub fn same_as(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Display for ColumnName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ColumnName {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

fn is_valid_name(value: &str) -> bool {
    is_within_length(value) && NAME_RE.is_match(value)
}

fn is_within_length(value: &str) -> bool {
    value.chars().count() <= MAX_IDENTIFIER_CHARS
}
