use pii_audit_core::db::open_db_in_memory;
use pii_audit_core::pipeline::discover_pii_columns;
use pii_audit_core::{ColumnRegistry, RegistryError, SqlitePolicyTagRegistry, TableId};
use rusqlite::Connection;

fn customers() -> TableId {
    TableId::parse("proj.crm.customers").unwrap()
}

#[test]
fn tagged_columns_resolve_in_tagging_order() {
    let conn = open_db_in_memory().unwrap();
    let registry = SqlitePolicyTagRegistry::try_new(&conn).unwrap();

    registry.tag_column(&customers(), "phone", "pii.phone").unwrap();
    registry.tag_column(&customers(), "name", "pii.name").unwrap();
    registry
        .tag_column(&TableId::parse("proj.crm.orders").unwrap(), "address", "pii.address")
        .unwrap();

    assert_eq!(
        registry.resolve_pii_columns(&customers()).unwrap(),
        vec!["phone", "name"]
    );
}

#[test]
fn retagging_replaces_tag_and_keeps_position() {
    let conn = open_db_in_memory().unwrap();
    let registry = SqlitePolicyTagRegistry::try_new(&conn).unwrap();

    registry.tag_column(&customers(), "name", "pii.name").unwrap();
    registry.tag_column(&customers(), "phone", "pii.phone").unwrap();
    registry.tag_column(&customers(), "NAME", "pii.restricted").unwrap();

    let bindings = registry.list_bindings(&customers()).unwrap();
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0].column_name, "name");
    assert_eq!(bindings[0].policy_tag, "pii.restricted");
    assert_eq!(bindings[0].ordinal, 1);
    assert_eq!(bindings[1].column_name, "phone");
}

#[test]
fn untagging_removes_column_from_discovery() {
    let conn = open_db_in_memory().unwrap();
    let registry = SqlitePolicyTagRegistry::try_new(&conn).unwrap();
    registry.tag_column(&customers(), "name", "pii.name").unwrap();
    registry.tag_column(&customers(), "phone", "pii.phone").unwrap();

    assert!(registry.untag_column(&customers(), "name").unwrap());
    assert!(!registry.untag_column(&customers(), "name").unwrap());

    let columns = discover_pii_columns(&registry, &customers()).unwrap();
    assert_eq!(columns.names(), vec!["phone"]);
}

#[test]
fn invalid_column_or_tag_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let registry = SqlitePolicyTagRegistry::try_new(&conn).unwrap();

    assert!(matches!(
        registry.tag_column(&customers(), "name\"; DROP TABLE x; --", "pii"),
        Err(RegistryError::InvalidColumn(_))
    ));
    assert!(matches!(
        registry.tag_column(&customers(), "name", "   "),
        Err(RegistryError::InvalidPolicyTag(_))
    ));
    assert!(registry.list_bindings(&customers()).unwrap().is_empty());
}

#[test]
fn unmigrated_connection_is_unavailable() {
    let conn = Connection::open_in_memory().unwrap();
    assert!(matches!(
        SqlitePolicyTagRegistry::try_new(&conn),
        Err(RegistryError::Unavailable(_))
    ));
}
