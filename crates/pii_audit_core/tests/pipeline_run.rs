use pii_audit_core::{
    AnonymizationPipeline, ConfigError, FixedClock, PipelineConfig, PipelineError,
    SqliteWarehouse, StaticColumnRegistry, TableId,
};
use rusqlite::params;

const ANONYMIZED_AT: i64 = 1_700_000_000_000;

fn customers() -> TableId {
    TableId::parse("proj.crm.customers").unwrap()
}

fn ledger() -> TableId {
    TableId::parse("proj.crm.audit_table").unwrap()
}

fn seed_customers(warehouse: &SqliteWarehouse, rows: &[(i64, &str, &str, &str, i64)]) {
    warehouse
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE \"proj.crm.customers\" (
                    id INTEGER,
                    name TEXT,
                    phone TEXT,
                    email TEXT,
                    loaded_at INTEGER
                );",
            )?;
            for (id, name, phone, email, loaded_at) in rows {
                conn.execute(
                    "INSERT INTO \"proj.crm.customers\" (id, name, phone, email, loaded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5);",
                    params![id, name, phone, email, loaded_at],
                )?;
            }
            Ok(())
        })
        .unwrap();
}

fn pipeline(
    warehouse: &SqliteWarehouse,
    registry: StaticColumnRegistry,
) -> AnonymizationPipeline<StaticColumnRegistry, &SqliteWarehouse, FixedClock> {
    let config = PipelineConfig::new(customers()).unwrap();
    AnonymizationPipeline::new(config, registry, warehouse).with_clock(FixedClock(ANONYMIZED_AT))
}

fn pii_registry() -> StaticColumnRegistry {
    StaticColumnRegistry::new().with_table(customers(), ["name", "phone"])
}

fn customer_rows(warehouse: &SqliteWarehouse) -> Vec<(i64, String, String, i64)> {
    warehouse
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, phone, loaded_at FROM \"proj.crm.customers\"
                 ORDER BY id, loaded_at;",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .unwrap()
}

fn ledger_rows(warehouse: &SqliteWarehouse) -> Vec<(String, i64, String, String, i64, i64)> {
    warehouse
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT table_id, id, name, phone, first_anonymized_at, anonymized_at
                 FROM \"proj.crm.audit_table\"
                 ORDER BY table_id, id;",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .unwrap()
}

fn snapshot_tables(warehouse: &SqliteWarehouse) -> Vec<String> {
    warehouse
        .table_names()
        .unwrap()
        .into_iter()
        .filter(|name| name.contains("__anon_snapshot_"))
        .collect()
}

fn ledger_exists(warehouse: &SqliteWarehouse) -> bool {
    warehouse
        .table_names()
        .unwrap()
        .contains(&ledger().to_string())
}

#[test]
fn first_anonymized_state_is_merged_and_audited_once() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[
            (1, "Alice", "555-0100", "a@x.com", 100),
            (1, "REDACTED", "000", "a@anonymized.com", 200),
            (1, "REDACTED-LATER", "111", "a@anonymized.com", 300),
            (2, "Bob", "555-0200", "b@x.com", 100),
            (3, "REDACTED", "000", "c@anonymized.com", 150),
        ],
    );

    let report = pipeline(&warehouse, pii_registry()).run().unwrap();
    assert_eq!(report.table_id, customers());
    assert_eq!(report.ledger_table, ledger());
    assert_eq!(report.pii_columns.names(), vec!["name", "phone"]);
    assert_eq!(report.already_audited, 0);
    assert_eq!(report.snapshot_rows, 2);
    assert_eq!(report.merged_rows, 2);
    assert_eq!(report.audit_rows_appended, 2);
    assert_eq!(report.anonymized_at, Some(ANONYMIZED_AT));

    assert_eq!(
        customer_rows(&warehouse),
        vec![
            (1, "REDACTED".to_string(), "000".to_string(), 100),
            (1, "REDACTED".to_string(), "000".to_string(), 200),
            (1, "REDACTED".to_string(), "000".to_string(), 300),
            (2, "Bob".to_string(), "555-0200".to_string(), 100),
            (3, "REDACTED".to_string(), "000".to_string(), 150),
        ]
    );
    assert_eq!(
        ledger_rows(&warehouse),
        vec![
            (
                "proj.crm.customers".to_string(),
                1,
                "REDACTED".to_string(),
                "000".to_string(),
                200,
                ANONYMIZED_AT
            ),
            (
                "proj.crm.customers".to_string(),
                3,
                "REDACTED".to_string(),
                "000".to_string(),
                150,
                ANONYMIZED_AT
            ),
        ]
    );
    assert!(snapshot_tables(&warehouse).is_empty());
}

#[test]
fn second_run_without_changes_appends_nothing() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[
            (1, "Alice", "555-0100", "a@x.com", 100),
            (1, "REDACTED", "000", "a@anonymized.com", 200),
            (1, "REDACTED", "000", "a@anonymized.com", 300),
        ],
    );

    let first = pipeline(&warehouse, pii_registry()).run().unwrap();
    assert_eq!(first.audit_rows_appended, 1);
    let ledger_after_first = ledger_rows(&warehouse);
    let customers_after_first = customer_rows(&warehouse);

    let second = pipeline(&warehouse, pii_registry()).run().unwrap();
    assert_eq!(second.already_audited, 1);
    assert_eq!(second.snapshot_rows, 1);
    assert_eq!(second.merged_rows, 0);
    assert_eq!(second.audit_rows_appended, 0);
    assert_eq!(second.anonymized_at, None);
    assert_ne!(first.run_id, second.run_id);

    assert_eq!(ledger_rows(&warehouse), ledger_after_first);
    assert_eq!(customer_rows(&warehouse), customers_after_first);
    assert!(snapshot_tables(&warehouse).is_empty());
}

#[test]
fn newly_anonymized_ids_are_appended_on_later_runs() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[
            (1, "REDACTED", "000", "a@anonymized.com", 200),
            (2, "Bob", "555-0200", "b@x.com", 100),
        ],
    );
    pipeline(&warehouse, pii_registry()).run().unwrap();

    warehouse
        .with_connection(|conn| {
            conn.execute(
                "INSERT INTO \"proj.crm.customers\" (id, name, phone, email, loaded_at)
                 VALUES (2, 'REDACTED', '000', 'b@anonymized.com', 400);",
                [],
            )
        })
        .unwrap();

    let report = pipeline(&warehouse, pii_registry()).run().unwrap();
    assert_eq!(report.already_audited, 1);
    assert_eq!(report.snapshot_rows, 2);
    assert_eq!(report.audit_rows_appended, 1);

    let ids: Vec<i64> = ledger_rows(&warehouse).iter().map(|row| row.1).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn empty_snapshot_is_a_no_op() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[
            (1, "Alice", "555-0100", "a@x.com", 100),
            (2, "Bob", "555-0200", "b@x.com", 100),
        ],
    );
    let before = customer_rows(&warehouse);

    let report = pipeline(&warehouse, pii_registry()).run().unwrap();
    assert_eq!(report.snapshot_rows, 0);
    assert_eq!(report.merged_rows, 0);
    assert_eq!(report.audit_rows_appended, 0);
    assert_eq!(report.anonymized_at, None);

    assert_eq!(customer_rows(&warehouse), before);
    assert!(!ledger_exists(&warehouse));
    assert!(snapshot_tables(&warehouse).is_empty());
}

#[test]
fn marker_match_is_a_case_sensitive_literal() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[
            (1, "REDACTED", "000", "a@ANONYMIZED.com", 100),
            (2, "REDACTED", "000", "b@anon%.com", 100),
        ],
    );

    let upper = pipeline(&warehouse, pii_registry()).run().unwrap();
    assert_eq!(upper.snapshot_rows, 0);

    let config = PipelineConfig::new(customers())
        .unwrap()
        .with_marker("anon%");
    let report = AnonymizationPipeline::new(config, pii_registry(), &warehouse)
        .run()
        .unwrap();
    assert_eq!(report.snapshot_rows, 1);
    let ids: Vec<i64> = ledger_rows(&warehouse).iter().map(|row| row.1).collect();
    assert_eq!(ids, vec![2]);
}

#[test]
fn empty_pii_set_fails_before_any_table_is_touched() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[
            (1, "Alice", "555-0100", "a@x.com", 100),
            (1, "REDACTED", "000", "a@anonymized.com", 200),
        ],
    );
    let before = customer_rows(&warehouse);
    let tables_before = warehouse.table_names().unwrap();

    let err = pipeline(&warehouse, StaticColumnRegistry::new())
        .run()
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Config(ConfigError::NoPiiColumns { .. })
    ));
    assert_eq!(err.stage(), "config");

    assert_eq!(customer_rows(&warehouse), before);
    assert_eq!(warehouse.table_names().unwrap(), tables_before);
}

#[test]
fn ambiguous_first_state_fails_without_merging() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[
            (5, "REDACTED-A", "000", "e@anonymized.com", 100),
            (5, "REDACTED-B", "000", "e@anonymized.com", 100),
            (5, "Eve", "555-0500", "e@x.com", 50),
        ],
    );
    let before = customer_rows(&warehouse);

    let err = pipeline(&warehouse, pii_registry()).run().unwrap_err();
    match err {
        PipelineError::AmbiguousSnapshot {
            rows, distinct_ids, ..
        } => {
            assert_eq!(rows, 2);
            assert_eq!(distinct_ids, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(customer_rows(&warehouse), before);
    assert!(!ledger_exists(&warehouse));
    assert!(snapshot_tables(&warehouse).is_empty());
}

#[test]
fn ledger_schema_is_unioned_across_tables() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[(1, "REDACTED", "000", "a@anonymized.com", 200)],
    );
    let orders = TableId::parse("proj.crm.orders").unwrap();
    warehouse
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE \"proj.crm.orders\" (
                    id TEXT,
                    address TEXT,
                    email TEXT,
                    loaded_at INTEGER
                );
                INSERT INTO \"proj.crm.orders\" VALUES ('o-1', 'REDACTED', 'anonymized', 10);",
            )
        })
        .unwrap();

    let registry = pii_registry().with_table(orders.clone(), ["address"]);
    pipeline(&warehouse, registry.clone()).run().unwrap();
    let report = AnonymizationPipeline::new(
        PipelineConfig::new(orders).unwrap(),
        registry,
        &warehouse,
    )
    .with_clock(FixedClock(ANONYMIZED_AT))
    .run()
    .unwrap();
    assert_eq!(report.audit_rows_appended, 1);

    let columns: Vec<String> = warehouse
        .with_connection(|conn| {
            let mut stmt = conn.prepare("PRAGMA table_info(\"proj.crm.audit_table\");")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>("name"))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .unwrap();
    assert_eq!(
        columns,
        vec![
            "table_id",
            "name",
            "phone",
            "id",
            "first_anonymized_at",
            "anonymized_at",
            "address"
        ]
    );

    let order_row: (Option<String>, Option<String>, String) = warehouse
        .with_connection(|conn| {
            conn.query_row(
                "SELECT name, address, id FROM \"proj.crm.audit_table\"
                 WHERE table_id = 'proj.crm.orders';",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
        })
        .unwrap();
    assert_eq!(order_row, (None, Some("REDACTED".to_string()), "o-1".to_string()));
}

#[test]
fn run_report_serializes_to_json() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[(1, "REDACTED", "000", "a@anonymized.com", 200)],
    );

    let report = pipeline(&warehouse, pii_registry()).run().unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["table_id"], "proj.crm.customers");
    assert_eq!(json["ledger_table"], "proj.crm.audit_table");
    assert_eq!(json["pii_columns"], serde_json::json!(["name", "phone"]));
    assert_eq!(json["audit_rows_appended"], 1);
    assert_eq!(json["anonymized_at"], ANONYMIZED_AT);
    assert_eq!(json["snapshot_rows"], 1);
    assert!(json["run_id"].is_string());
}

fn seed_accounts(warehouse: &SqliteWarehouse) -> TableId {
    warehouse
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE \"proj.crm.accounts\" (
                    id TEXT,
                    holder TEXT,
                    email TEXT,
                    loaded_at INTEGER
                );
                INSERT INTO \"proj.crm.accounts\" VALUES ('42', 'Zed', 'z@x.com', 10);
                INSERT INTO \"proj.crm.accounts\" VALUES ('42', 'REDACTED', 'anonymized', 20);",
            )
        })
        .unwrap();
    TableId::parse("proj.crm.accounts").unwrap()
}

fn run_accounts(warehouse: &SqliteWarehouse, accounts: &TableId) -> u64 {
    let registry = StaticColumnRegistry::new().with_table(accounts.clone(), ["holder"]);
    AnonymizationPipeline::new(PipelineConfig::new(accounts.clone()).unwrap(), registry, warehouse)
        .with_clock(FixedClock(ANONYMIZED_AT))
        .run()
        .unwrap()
        .audit_rows_appended
}

fn ledger_ids_of(warehouse: &SqliteWarehouse, table_id: &str) -> Vec<(String, String)> {
    warehouse
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT typeof(id), CAST(id AS TEXT) FROM \"proj.crm.audit_table\"
                 WHERE table_id = ?1 ORDER BY id;",
            )?;
            let ids = stmt
                .query_map([table_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .unwrap()
}

#[test]
fn shared_ledger_with_integer_and_text_ids_stays_idempotent() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    seed_customers(
        &warehouse,
        &[(7, "REDACTED", "000", "g@anonymized.com", 100)],
    );
    let accounts = seed_accounts(&warehouse);

    let first = pipeline(&warehouse, pii_registry()).run().unwrap();
    assert_eq!(first.audit_rows_appended, 1);

    assert_eq!(run_accounts(&warehouse, &accounts), 1);
    assert_eq!(run_accounts(&warehouse, &accounts), 0);
    assert_eq!(run_accounts(&warehouse, &accounts), 0);
    assert_eq!(pipeline(&warehouse, pii_registry()).run().unwrap().audit_rows_appended, 0);

    assert_eq!(
        ledger_ids_of(&warehouse, "proj.crm.customers"),
        vec![("integer".to_string(), "7".to_string())]
    );
    assert_eq!(
        ledger_ids_of(&warehouse, "proj.crm.accounts"),
        vec![("text".to_string(), "42".to_string())]
    );
}

#[test]
fn ledger_with_integer_id_column_still_recognizes_text_ids() {
    let warehouse = SqliteWarehouse::open_in_memory().unwrap();
    warehouse
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE \"proj.crm.audit_table\" (
                    table_id TEXT,
                    id INTEGER,
                    first_anonymized_at INTEGER,
                    anonymized_at INTEGER
                );",
            )
        })
        .unwrap();
    let accounts = seed_accounts(&warehouse);

    assert_eq!(run_accounts(&warehouse, &accounts), 1);
    // The INTEGER column converted '42' on insert.
    assert_eq!(
        ledger_ids_of(&warehouse, "proj.crm.accounts"),
        vec![("integer".to_string(), "42".to_string())]
    );
    assert_eq!(run_accounts(&warehouse, &accounts), 0);
}
