//! Integration tests for applying a whole manifest

use std::path::Path;

use pretty_assertions::assert_eq;

use rust_sqlsecurity::manifest::parse_manifest;
use rust_sqlsecurity::{apply_manifest, ApplyOptions, ApplySummary, Manifest, Reconciler};

use crate::common::*;

const MANIFEST: &str = r#"<Manifest>
  <Database name="AppDb">
    <Role name="readers" />
    <User name="app" password="$(APP_PASSWORD)">
      <Member role="readers" />
    </User>
    <Schema name="sales" owner="app" />
  </Database>
</Manifest>"#;

fn manifest() -> Manifest {
    parse_manifest(MANIFEST, Path::new("manifest.xml"), Path::new("."), |name| {
        (name == "APP_PASSWORD").then(|| "Appl1ed!".to_string())
    })
    .unwrap()
}

#[test]
fn test_apply_creates_missing_objects_in_order() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"])
        .respond_after("CREATE ROLE", ROLE_QUERY, vec![role_row("readers", "dbo", "")])
        .respond_after(
            "CREATE USER",
            USER_QUERY,
            vec![user_row("app", "DATABASE", "dbo", vec![0x01], "", "[readers]")],
        )
        .respond_after("CREATE SCHEMA", SCHEMA_QUERY, vec![schema_row("sales", "app")]);
    let mut reconciler = Reconciler::connect(session).unwrap();

    let summary = apply_manifest(&mut reconciler, &manifest(), ApplyOptions::default()).unwrap();

    assert_eq!(
        summary,
        ApplySummary {
            created: 3,
            updated: 0,
            unchanged: 0,
            scripts_run: 0,
        }
    );
    assert_eq!(
        reconciler.session().executed_sql(),
        vec![
            "CREATE ROLE [readers]",
            "CREATE USER [app] WITH PASSWORD = N'Appl1ed!', DEFAULT_SCHEMA = [dbo], DEFAULT_LANGUAGE = NONE",
            "ALTER ROLE [readers] ADD MEMBER [app]",
            "CREATE SCHEMA [sales] AUTHORIZATION [app]",
        ]
    );
}

#[test]
fn test_apply_leaves_converged_objects_alone() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"])
        .respond(ROLE_QUERY, vec![role_row("readers", "dbo", "[app]")])
        .respond(
            USER_QUERY,
            vec![user_row("app", "DATABASE", "dbo", vec![0x01], "", "[readers]")],
        )
        .respond(SCHEMA_QUERY, vec![schema_row("sales", "dbo")])
        .respond_after("ALTER AUTHORIZATION", SCHEMA_QUERY, vec![schema_row("sales", "app")]);
    let mut reconciler = Reconciler::connect(session).unwrap();

    let summary = apply_manifest(&mut reconciler, &manifest(), ApplyOptions::default()).unwrap();

    // Only the schema owner drifted
    assert_eq!(summary.unchanged, 2);
    assert_eq!(summary.updated, 1);
    assert_eq!(
        reconciler.session().executed_sql(),
        vec!["ALTER AUTHORIZATION ON SCHEMA::[sales] TO [app]"]
    );
}

#[test]
fn test_apply_twice_is_a_no_op() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"])
        .respond(ROLE_QUERY, vec![role_row("readers", "dbo", "[app]")])
        .respond(
            USER_QUERY,
            vec![user_row("app", "DATABASE", "dbo", vec![0x01], "", "[readers]")],
        )
        .respond(SCHEMA_QUERY, vec![schema_row("sales", "app")]);
    let mut reconciler = Reconciler::connect(session).unwrap();

    let summary = apply_manifest(&mut reconciler, &manifest(), ApplyOptions::default()).unwrap();

    assert_eq!(summary.unchanged, 3);
    assert!(reconciler.session().executed.is_empty());
}

#[test]
fn test_apply_rotates_user_passwords_on_request() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"])
        .respond(ROLE_QUERY, vec![role_row("readers", "dbo", "[app]")])
        .respond(
            USER_QUERY,
            vec![user_row("app", "DATABASE", "dbo", vec![0x01], "", "[readers]")],
        )
        .respond(SCHEMA_QUERY, vec![schema_row("sales", "app")]);
    let mut reconciler = Reconciler::connect(session).unwrap();

    let options = ApplyOptions {
        rotate_passwords: true,
    };
    let summary = apply_manifest(&mut reconciler, &manifest(), options).unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(
        reconciler.session().executed_sql(),
        vec!["ALTER USER [app] WITH PASSWORD = N'Appl1ed!'"]
    );
}

const LOGIN_MANIFEST: &str = r#"<Manifest>
  <Login name="app_login" auth="password" password="Secr3t!" />
</Manifest>"#;

fn login_manifest() -> Manifest {
    parse_manifest(LOGIN_MANIFEST, Path::new("manifest.xml"), Path::new("."), |_| None).unwrap()
}

#[test]
fn test_apply_keeps_matching_login_password() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &[])
        .respond(LOGIN_QUERY, vec![login_row("app_login", "S")])
        .respond(PASSWORD_CHECK_QUERY, vec![row(vec![int(1)])]);
    let mut reconciler = Reconciler::connect(session).unwrap();

    let summary = apply_manifest(&mut reconciler, &login_manifest(), ApplyOptions::default()).unwrap();

    assert_eq!(summary.unchanged, 1);
    assert!(reconciler.session().executed.is_empty());
    let check = reconciler
        .session()
        .queries
        .iter()
        .find(|q| q.sql.contains(PASSWORD_CHECK_QUERY))
        .unwrap();
    assert_eq!(check.database, "master");
    assert!(!check.sql.contains("Secr3t!"));
}

#[test]
fn test_apply_resets_changed_login_password() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &[])
        .respond(LOGIN_QUERY, vec![login_row("app_login", "S")]);
    let mut reconciler = Reconciler::connect(session).unwrap();

    let summary = apply_manifest(&mut reconciler, &login_manifest(), ApplyOptions::default()).unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(
        reconciler.session().executed_sql(),
        vec!["ALTER LOGIN [app_login] WITH PASSWORD = N'Secr3t!'"]
    );
}

#[test]
fn test_apply_stops_at_missing_database() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &[]);
    let mut reconciler = Reconciler::connect(session).unwrap();
    let err = apply_manifest(&mut reconciler, &manifest(), ApplyOptions::default()).unwrap_err();
    assert!(format!("{:#}", err).contains("not found"));
    assert!(reconciler.session().executed.is_empty());
}
