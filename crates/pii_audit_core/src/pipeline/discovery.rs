//! PII column discovery.

use super::{PipelineError, PipelineResult};
use crate::model::audit::PiiColumnSet;
use crate::model::identifier::TableId;
use crate::registry::ColumnRegistry;
use log::{error, info};
use std::time::Instant;

/// Resolves and validates the PII columns of `table_id`.
///
/// # Errors
/// - `Registry` when the registry cannot be read.
/// - `Config(NoPiiColumns)` when no column is tagged; the run must stop
///   before touching any table.
/// - `Config` when a tagged name fails validation.
pub fn discover_pii_columns<R: ColumnRegistry + ?Sized>(
    registry: &R,
    table_id: &TableId,
) -> PipelineResult<PiiColumnSet> {
    let started_at = Instant::now();
    let names = registry.resolve_pii_columns(table_id).map_err(|err| {
        error!(
            "event=pii_discovery module=pipeline status=error table_id={table_id} error={err}"
        );
        PipelineError::Registry(err)
    })?;

    let columns = PiiColumnSet::from_names(table_id, &names)?;
    info!(
        "event=pii_discovery module=pipeline status=ok table_id={table_id} columns={} duration_ms={}",
        columns.names().join(","),
        started_at.elapsed().as_millis()
    );
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::discover_pii_columns;
    use crate::config::ConfigError;
    use crate::model::identifier::TableId;
    use crate::pipeline::PipelineError;
    use crate::registry::StaticColumnRegistry;

    #[test]
    fn resolves_tagged_columns_in_order() {
        let table = TableId::parse("p.d.customers").unwrap();
        let registry = StaticColumnRegistry::new().with_table(table.clone(), ["phone", "name"]);

        let columns = discover_pii_columns(&registry, &table).unwrap();
        assert_eq!(columns.names(), vec!["phone", "name"]);
    }

    #[test]
    fn untagged_table_is_a_config_error() {
        let table = TableId::parse("p.d.customers").unwrap();
        let err = discover_pii_columns(&StaticColumnRegistry::new(), &table).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::NoPiiColumns { .. })
        ));
    }
}
