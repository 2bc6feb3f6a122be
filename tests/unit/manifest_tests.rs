//! Unit tests for manifest loading and offline planning

use std::fs;

use tempfile::TempDir;

use rust_sqlsecurity::dialect::Capabilities;
use rust_sqlsecurity::model::ObjectKind;
use rust_sqlsecurity::{load_manifest, plan_manifest, ManifestError};

const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Manifest>
  <Login name="app_login" password="Pl@nned1" defaultDatabase="AppDb" />
  <Database name="AppDb">
    <Role name="readers" />
    <User name="app" login="app_login" defaultSchema="sales">
      <Member role="readers" />
    </User>
    <Schema name="sales" owner="app" />
    <Permissions principal="app">
      <Grant>VIEW DEFINITION</Grant>
    </Permissions>
    <Script verify="TABLE sales.Orders" file="scripts/orders.sql" />
  </Database>
</Manifest>
"#;

const ORDERS_SCRIPT: &str = "CREATE TABLE sales.Orders (Id INT NOT NULL)\nGO\nCREATE INDEX IX_Orders ON sales.Orders (Id)\n";

fn write_manifest(content: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("scripts")).unwrap();
    fs::write(dir.path().join("scripts").join("orders.sql"), ORDERS_SCRIPT).unwrap();
    fs::write(dir.path().join("manifest.xml"), content).unwrap();
    dir
}

#[test]
fn test_load_manifest_resolves_script_files() {
    let dir = write_manifest(MANIFEST);
    let manifest = load_manifest(&dir.path().join("manifest.xml")).unwrap();

    assert_eq!(manifest.logins.len(), 1);
    let db = &manifest.databases[0];
    assert_eq!(db.scripts.len(), 1);
    assert_eq!(db.scripts[0].script, ORDERS_SCRIPT);
}

#[test]
fn test_missing_manifest_is_read_error() {
    let dir = TempDir::new().unwrap();
    let err = load_manifest(&dir.path().join("absent.xml")).unwrap_err();
    assert!(matches!(err, ManifestError::Read { .. }));
}

#[test]
fn test_malformed_manifest_is_parse_error() {
    let dir = write_manifest("<Manifest><Database name=\"x\"></Manifest>");
    let err = load_manifest(&dir.path().join("manifest.xml")).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }));
}

#[test]
fn test_plan_orders_objects_for_apply() {
    let dir = write_manifest(MANIFEST);
    let manifest = load_manifest(&dir.path().join("manifest.xml")).unwrap();
    let caps = Capabilities::for_target_platform("Sql160").unwrap();
    let steps = plan_manifest(&manifest, caps).unwrap();

    let kinds: Vec<ObjectKind> = steps.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ObjectKind::Login,
            ObjectKind::Role,
            ObjectKind::User,
            ObjectKind::Schema,
            ObjectKind::Permissions,
            ObjectKind::Script,
        ]
    );

    assert_eq!(steps[0].key.database, "master");
    assert_eq!(
        steps[0].statements[0].display(),
        "CREATE LOGIN [app_login] WITH PASSWORD = N'********', DEFAULT_DATABASE = [AppDb]"
    );
    assert_eq!(
        steps[2].statements.iter().map(|s| s.sql.as_str()).collect::<Vec<_>>(),
        vec![
            "CREATE USER [app] FOR LOGIN [app_login] WITH DEFAULT_SCHEMA = [sales]",
            "ALTER ROLE [readers] ADD MEMBER [app]",
        ]
    );
    assert_eq!(steps[3].statements[0].sql, "CREATE SCHEMA [sales] AUTHORIZATION [app]");
    assert_eq!(steps[5].statements.len(), 2);
}

#[test]
fn test_plan_rejects_script_missing_its_target() {
    let content = MANIFEST.replace("TABLE sales.Orders", "VIEW sales.OrderSummary");
    let dir = write_manifest(&content);
    let manifest = load_manifest(&dir.path().join("manifest.xml")).unwrap();
    let caps = Capabilities::for_target_platform("Sql160").unwrap();
    let err = plan_manifest(&manifest, caps).unwrap_err();
    assert!(format!("{:#}", err).contains("verification target"));
}

#[test]
fn test_plan_honours_dialect() {
    let content = r#"<Manifest><Database name="AppDb">
        <User name="ops@contoso.com" />
      </Database></Manifest>"#;
    let dir = write_manifest(content);
    let manifest = load_manifest(&dir.path().join("manifest.xml")).unwrap();

    assert!(plan_manifest(&manifest, Capabilities::for_target_platform("Sql160").unwrap()).is_ok());
    assert!(plan_manifest(&manifest, Capabilities::for_target_platform("Sql150").unwrap()).is_err());
}
