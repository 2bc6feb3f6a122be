//! Integration tests for the reconciler
//!
//! These tests drive full lifecycle calls against a scripted in-memory
//! session and check what was queried, what was executed, and what came back.

use pretty_assertions::assert_eq;
use rust_sqlsecurity::error::ReconcileError;
use rust_sqlsecurity::model::{
    LoginSpec, ObjectKey, ObjectKind, Operation, PermissionsSpec, RoleSpec, SchemaSpec, UserSpec,
};
use rust_sqlsecurity::reconcile::{
    DeleteOptions, Deleted, Logins, Permissions, Refreshed, Roles, Schemas, Updated, Users,
};
use rust_sqlsecurity::session::Value;
use rust_sqlsecurity::Reconciler;

use crate::common::*;

fn reconciler(session: FakeSession) -> Reconciler<FakeSession> {
    Reconciler::connect(session).unwrap()
}

fn app_db() -> FakeSession {
    FakeSession::with_databases(SQL2022_BANNER, &["AppDb"])
}

// ============================================================================
// Create
// ============================================================================

#[test]
fn test_create_schema_reads_back() {
    let session = app_db().respond_after("CREATE SCHEMA", SCHEMA_QUERY, vec![schema_row("sales", "alice")]);
    let mut reconciler = reconciler(session);
    let key = ObjectKey::new("AppDb", "sales");

    let applied = reconciler
        .ensure_created::<Schemas>(&key, &SchemaSpec::new("sales").owned_by("alice"))
        .unwrap();

    assert_eq!(applied.entity.owner_name, "alice");
    assert_eq!(applied.statements.len(), 1);
    let executed = &reconciler.session().executed;
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].database, "AppDb");
    assert_eq!(executed[0].sql, "CREATE SCHEMA [sales] AUTHORIZATION [alice]");
    assert!(executed[0].params.is_empty());
}

#[test]
fn test_second_create_is_already_exists() {
    let session = app_db().respond(SCHEMA_QUERY, vec![schema_row("sales", "dbo")]);
    let mut reconciler = reconciler(session);

    let err = reconciler
        .ensure_created::<Schemas>(&ObjectKey::new("AppDb", "sales"), &SchemaSpec::new("sales"))
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::AlreadyExists {
            kind: ObjectKind::Schema,
            ..
        }
    ));
    assert!(reconciler.session().executed.is_empty());
}

#[test]
fn test_create_in_missing_database_is_not_found() {
    let mut reconciler = reconciler(app_db());
    let err = reconciler
        .ensure_created::<Roles>(&ObjectKey::new("Gone", "readers"), &RoleSpec::new("readers"))
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::NotFound {
            kind: ObjectKind::Database,
            ..
        }
    ));
    assert!(err.is_not_found());
}

#[test]
fn test_create_missing_after_apply_is_ambiguous() {
    let mut reconciler = reconciler(app_db());
    let err = reconciler
        .ensure_created::<Roles>(&ObjectKey::new("AppDb", "readers"), &RoleSpec::new("readers"))
        .unwrap_err();
    assert!(matches!(err, ReconcileError::AmbiguousState { kind: ObjectKind::Role, .. }));
    assert_eq!(reconciler.session().executed_sql(), vec!["CREATE ROLE [readers]"]);
}

#[test]
fn test_create_rejects_mismatched_name() {
    let mut reconciler = reconciler(app_db());
    let err = reconciler
        .ensure_created::<Roles>(&ObjectKey::new("AppDb", "readers"), &RoleSpec::new("writers"))
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Validation { .. }));
}

#[test]
fn test_failed_statement_reports_operation() {
    let session = app_db().fail_on("CREATE ROLE");
    let mut reconciler = reconciler(session);
    let err = reconciler
        .ensure_created::<Roles>(&ObjectKey::new("AppDb", "readers"), &RoleSpec::new("readers"))
        .unwrap_err();
    match err {
        ReconcileError::Execution { operation, kind, .. } => {
            assert_eq!(operation, Operation::Create);
            assert_eq!(kind, ObjectKind::Role);
        }
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[test]
fn test_login_runs_in_master() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &[])
        .respond_after("CREATE LOGIN", LOGIN_QUERY, vec![login_row("app_login", "S")]);
    let mut reconciler = reconciler(session);

    let applied = reconciler
        .ensure_created::<Logins>(
            &ObjectKey::server("app_login"),
            &LoginSpec::with_password("app_login", "Secr3t!"),
        )
        .unwrap();
    assert_eq!(applied.entity.name, "app_login");
    assert_eq!(reconciler.session().executed[0].database, "master");
}

// ============================================================================
// Refresh
// ============================================================================

#[test]
fn test_refresh_gone_when_database_missing() {
    let mut reconciler = reconciler(app_db());
    let refreshed = reconciler.refresh::<Schemas>(&ObjectKey::new("Dropped", "sales")).unwrap();
    assert!(refreshed.is_gone());
}

#[test]
fn test_refresh_user_resolves_login_by_sid() {
    let session = app_db()
        .respond(USER_QUERY, vec![user_row("alice", "INSTANCE", "dbo", vec![0x0A, 0x0B], "", "[readers]")])
        .respond("[sys].[sql_logins] sl WHERE sl.sid", vec![row(vec![text("alice_login")])]);
    let mut reconciler = reconciler(session);

    let user = reconciler
        .get::<Users>(&ObjectKey::new("AppDb", "alice"))
        .unwrap()
        .unwrap();
    assert_eq!(user.login_name, "alice_login");
    assert!(user.roles.contains("readers"));
}

#[test]
fn test_refresh_user_with_unmatched_sid_is_ambiguous() {
    let session = app_db().respond(
        USER_QUERY,
        vec![user_row("alice", "INSTANCE", "dbo", vec![0x0A], "", "")],
    );
    let mut reconciler = reconciler(session);
    let err = reconciler.refresh::<Users>(&ObjectKey::new("AppDb", "alice")).unwrap_err();
    assert!(matches!(err, ReconcileError::AmbiguousState { .. }));
}

#[test]
fn test_refresh_federated_user_matches_sid_prefix() {
    let mut sid = vec![0x11; 16];
    sid.extend_from_slice(&[0xAA, 0xDE]);
    let session = FakeSession::with_databases(AZURE_BANNER, &["AppDb"])
        .respond(USER_QUERY, vec![user_row("app", "EXTERNAL", "dbo", sid, "", "")])
        .respond("@sid_prefix", vec![row(vec![text("app-registration")])]);
    let mut reconciler = reconciler(session);

    let user = reconciler.get::<Users>(&ObjectKey::new("AppDb", "app")).unwrap().unwrap();
    assert_eq!(user.login_name, "app-registration");

    let lookup = reconciler
        .session()
        .queries
        .iter()
        .find(|q| q.sql.contains("@sid_prefix"))
        .unwrap();
    assert_eq!(lookup.database, "master");
    assert_eq!(lookup.params[0].value, Value::Text(format!("0x{}", "11".repeat(16))));
}

#[test]
fn test_hosted_catalog_views_are_not_database_qualified() {
    let session = FakeSession::with_databases(AZURE_BANNER, &["AppDb"]);
    let mut reconciler = reconciler(session);
    reconciler.refresh::<Schemas>(&ObjectKey::new("AppDb", "sales")).unwrap();

    let query = reconciler
        .session()
        .queries
        .iter()
        .find(|q| q.sql.contains(SCHEMA_QUERY))
        .unwrap();
    assert!(query.sql.contains("FROM [sys].[schemas]"));
    assert!(!query.sql.contains("[AppDb]"));
    assert_eq!(query.database, "AppDb");
}

#[test]
fn test_older_release_aggregates_with_xml_path() {
    let session = FakeSession::with_databases(SQL2016_BANNER, &["AppDb"]);
    let mut reconciler = reconciler(session);
    reconciler.refresh::<Roles>(&ObjectKey::new("AppDb", "readers")).unwrap();

    let query = reconciler
        .session()
        .queries
        .iter()
        .find(|q| q.sql.contains(ROLE_QUERY))
        .unwrap();
    assert!(query.sql.contains("FOR XML PATH"));
    assert!(!query.sql.contains("STRING_AGG"));
}

// ============================================================================
// Update
// ============================================================================

#[test]
fn test_update_user_membership() {
    let session = app_db()
        .respond(
            USER_QUERY,
            vec![user_row("alice", "DATABASE", "dbo", vec![0x01], "", "[admins],[readers]")],
        )
        .respond_after(
            "ADD MEMBER",
            USER_QUERY,
            vec![user_row("alice", "DATABASE", "dbo", vec![0x01], "", "[readers],[writers]")],
        );
    let mut reconciler = reconciler(session);

    let desired = UserSpec::new("alice").with_roles(["readers", "writers"]);
    let updated = reconciler
        .ensure_updated::<Users>(&ObjectKey::new("AppDb", "alice"), &desired)
        .unwrap();

    let Updated::Applied(applied) = updated else {
        panic!("user should exist");
    };
    assert_eq!(
        reconciler.session().executed_sql(),
        vec![
            "ALTER ROLE [admins] DROP MEMBER [alice]",
            "ALTER ROLE [writers] ADD MEMBER [alice]",
        ]
    );
    assert_eq!(applied.statements.len(), 2);
    assert!(applied.entity.roles.contains("writers"));
    assert!(!applied.entity.roles.contains("admins"));
}

#[test]
fn test_update_converged_executes_nothing() {
    let session = app_db().respond(ROLE_QUERY, vec![role_row("readers", "dbo", "[alice]")]);
    let mut reconciler = reconciler(session);

    let updated = reconciler
        .ensure_updated::<Roles>(&ObjectKey::new("AppDb", "readers"), &RoleSpec::new("readers").owned_by(""))
        .unwrap();
    match updated {
        Updated::Applied(applied) => {
            assert!(applied.statements.is_empty());
            assert_eq!(applied.entity.members.len(), 1);
        }
        Updated::Gone => panic!("role should exist"),
    }
    assert!(reconciler.session().executed.is_empty());
}

#[test]
fn test_update_gone_when_object_missing() {
    let mut reconciler = reconciler(app_db());
    let mut roles = reconciler.objects::<Roles>();
    let updated = roles
        .update(&ObjectKey::new("AppDb", "readers"), &RoleSpec::new("readers"))
        .unwrap();
    assert!(updated.is_none());
}

// ============================================================================
// Delete
// ============================================================================

#[test]
fn test_delete_user_reassigns_ownership() {
    let session = app_db()
        .respond(USER_QUERY, vec![user_row("alice", "DATABASE", "dbo", vec![0x01], "", "")])
        .respond(
            OWNED_QUERY,
            vec![
                row(vec![text("S"), text("sales")]),
                row(vec![text("R"), text("readers")]),
            ],
        )
        .respond("SELECT USER_NAME()", vec![row(vec![text("deployer")])]);
    let mut reconciler = reconciler(session);

    let deleted = reconciler
        .delete::<Users>(&ObjectKey::new("AppDb", "alice"), DeleteOptions::default())
        .unwrap();
    assert!(matches!(deleted, Deleted::Dropped { .. }));
    assert_eq!(
        reconciler.session().executed_sql(),
        vec![
            "ALTER AUTHORIZATION ON ROLE::[readers] TO [deployer]",
            "ALTER AUTHORIZATION ON SCHEMA::[sales] TO [deployer]",
            "DROP USER [alice]",
        ]
    );
}

#[test]
fn test_delete_preserve_leaves_object() {
    let session = app_db().respond(ROLE_QUERY, vec![role_row("readers", "dbo", "")]);
    let mut reconciler = reconciler(session);
    let deleted = reconciler
        .delete::<Roles>(&ObjectKey::new("AppDb", "readers"), DeleteOptions::preserve())
        .unwrap();
    assert_eq!(deleted, Deleted::Preserved);
    assert!(reconciler.session().executed.is_empty());
}

#[test]
fn test_delete_absent_and_gone() {
    let mut reconciler = reconciler(app_db());
    assert_eq!(
        reconciler
            .delete::<Roles>(&ObjectKey::new("AppDb", "readers"), DeleteOptions::default())
            .unwrap(),
        Deleted::AlreadyAbsent
    );
    assert_eq!(
        reconciler
            .delete::<Roles>(&ObjectKey::new("Dropped", "readers"), DeleteOptions::preserve())
            .unwrap(),
        Deleted::Gone
    );
}

// ============================================================================
// Permissions
// ============================================================================

#[test]
fn test_permissions_with_only_connect_are_absent() {
    let session = app_db()
        .respond(PERMISSION_PRINCIPAL_QUERY, vec![row(vec![int(5), text("app")])])
        .respond(PERMISSION_QUERY, vec![perm_row("CONNECT", "G")]);
    let mut reconciler = reconciler(session);
    let refreshed = reconciler.refresh::<Permissions>(&ObjectKey::new("AppDb", "app")).unwrap();
    assert_eq!(refreshed, Refreshed::Gone);
}

#[test]
fn test_update_permissions_diffs_grants() {
    let session = app_db()
        .respond(PERMISSION_PRINCIPAL_QUERY, vec![row(vec![int(5), text("app")])])
        .respond(
            PERMISSION_QUERY,
            vec![perm_row("CONNECT", "G"), perm_row("ALTER", "G")],
        )
        .respond_after(
            "GRANT SELECT",
            PERMISSION_QUERY,
            vec![perm_row("CONNECT", "G"), perm_row("SELECT", "G")],
        );
    let mut reconciler = reconciler(session);

    let current = reconciler
        .objects::<Permissions>()
        .update(&ObjectKey::new("AppDb", "app"), &PermissionsSpec::new("app", ["select"]))
        .unwrap()
        .unwrap();
    assert_eq!(
        reconciler.session().executed_sql(),
        vec!["REVOKE ALTER FROM [app]", "GRANT SELECT TO [app]"]
    );
    assert!(current.permissions.contains("SELECT"));
    assert!(!current.permissions.contains("CONNECT"));
}

#[test]
fn test_update_permissions_revokes_grant_option_with_cascade() {
    let session = app_db()
        .respond(PERMISSION_PRINCIPAL_QUERY, vec![row(vec![int(5), text("app")])])
        .respond(
            PERMISSION_QUERY,
            vec![perm_row("CONNECT", "G"), perm_row("SELECT", "W"), perm_row("INSERT", "G")],
        )
        .respond_after(
            "GRANT DELETE",
            PERMISSION_QUERY,
            vec![perm_row("CONNECT", "G"), perm_row("DELETE", "G")],
        );
    let mut reconciler = reconciler(session);

    let current = reconciler
        .objects::<Permissions>()
        .update(&ObjectKey::new("AppDb", "app"), &PermissionsSpec::new("app", ["DELETE"]))
        .unwrap()
        .unwrap();
    assert_eq!(
        reconciler.session().executed_sql(),
        vec![
            "REVOKE INSERT FROM [app]",
            "REVOKE SELECT FROM [app] CASCADE",
            "GRANT DELETE TO [app]",
        ]
    );
    assert!(current.grantable.is_empty());
}

#[test]
fn test_refresh_permissions_reports_grant_option() {
    let session = app_db()
        .respond(PERMISSION_PRINCIPAL_QUERY, vec![row(vec![int(5), text("app")])])
        .respond(PERMISSION_QUERY, vec![perm_row("CONNECT", "W"), perm_row("SELECT", "W")]);
    let mut reconciler = reconciler(session);

    let current = reconciler
        .get::<Permissions>(&ObjectKey::new("AppDb", "app"))
        .unwrap()
        .unwrap();
    assert_eq!(current.grantable.len(), 1);
    assert!(current.grantable.contains("SELECT"));
}

#[test]
fn test_delete_permissions_cascades_grant_option() {
    let session = app_db()
        .respond(PERMISSION_PRINCIPAL_QUERY, vec![row(vec![int(5), text("app")])])
        .respond(PERMISSION_QUERY, vec![perm_row("SELECT", "W"), perm_row("UPDATE", "G")]);
    let mut reconciler = reconciler(session);

    let deleted = reconciler
        .delete::<Permissions>(&ObjectKey::new("AppDb", "app"), DeleteOptions::default())
        .unwrap();
    assert!(matches!(deleted, Deleted::Dropped { .. }));
    assert_eq!(
        reconciler.session().executed_sql(),
        vec!["REVOKE SELECT FROM [app] CASCADE", "REVOKE UPDATE FROM [app]"]
    );
}

#[test]
fn test_empty_permission_set_rejected() {
    let mut reconciler = reconciler(app_db());
    let err = reconciler
        .ensure_created::<Permissions>(&ObjectKey::new("AppDb", "app"), &PermissionsSpec::new("app", ["CONNECT"]))
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Validation { .. }));
}
