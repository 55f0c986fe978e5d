//! Domain model for the anonymization audit workflow.
//!
//! # Responsibility
//! - Define validated identifiers, typed cell values and ledger records.
//! - Keep warehouse-specific types out of the domain shapes.
//!
//! # Invariants
//! - Identifiers are validated at construction and cannot carry SQL.

pub mod audit;
pub mod identifier;
pub mod value;
