//! Integration tests for raw script execution and verification

use rust_sqlsecurity::error::ReconcileError;
use rust_sqlsecurity::model::ScriptSpec;
use rust_sqlsecurity::reconcile::{Deleted, ScriptOutcome};
use rust_sqlsecurity::synth::VerifyTarget;
use rust_sqlsecurity::util::script_digest;
use rust_sqlsecurity::Reconciler;

use crate::common::*;

const SCRIPT: &str = "CREATE TABLE dbo.Users (Id INT NOT NULL)\nGO\nINSERT INTO dbo.Users (Id) VALUES (1)\nGO\n";

fn spec(target: Option<&str>) -> ScriptSpec {
    ScriptSpec {
        script: SCRIPT.to_string(),
        verify: target.map(|t| VerifyTarget::parse(t).unwrap()),
    }
}

fn reconciler(session: FakeSession) -> Reconciler<FakeSession> {
    Reconciler::connect(session).unwrap()
}

#[test]
fn test_run_script_executes_each_batch() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"])
        .respond_after("CREATE TABLE", "sys.tables o", vec![row(vec![int(1)])]);
    let mut reconciler = reconciler(session);

    let result = reconciler.run_script("AppDb", &spec(Some("TABLE dbo.Users"))).unwrap();

    assert_eq!(result.batches, 2);
    assert_eq!(result.digest, script_digest(SCRIPT));
    assert_eq!(result.verified, Some(true));
    let executed = &reconciler.session().executed;
    assert_eq!(executed.len(), 2);
    assert!(executed[0].sql.starts_with("CREATE TABLE dbo.Users"));
    assert!(executed[1].sql.starts_with("INSERT INTO dbo.Users"));
    assert!(executed.iter().all(|c| c.database == "AppDb"));
}

#[test]
fn test_run_script_reports_missing_target() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"]);
    let mut reconciler = reconciler(session);
    let result = reconciler.run_script("AppDb", &spec(Some("TABLE dbo.Users"))).unwrap();
    assert_eq!(result.verified, Some(false));

    let result = reconciler.run_script("AppDb", &spec(None)).unwrap();
    assert_eq!(result.verified, None);
}

#[test]
fn test_run_script_rejects_undeclared_target() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"]);
    let mut reconciler = reconciler(session);
    let err = reconciler
        .run_script("AppDb", &spec(Some("VIEW dbo.ActiveUsers")))
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Validation { .. }));
    assert!(reconciler.session().executed.is_empty());
}

#[test]
fn test_run_script_in_missing_database() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"]);
    let mut reconciler = reconciler(session);
    let err = reconciler.run_script("Elsewhere", &spec(None)).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_update_script_compares_digest() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"]);
    let mut reconciler = reconciler(session);
    let digest = script_digest(SCRIPT).to_ascii_lowercase();

    let outcome = reconciler.update_script("AppDb", &digest, &spec(None)).unwrap();
    assert_eq!(outcome, ScriptOutcome::Unchanged);
    assert!(reconciler.session().executed.is_empty());

    let outcome = reconciler.update_script("AppDb", "00", &spec(None)).unwrap();
    assert!(matches!(outcome, ScriptOutcome::Executed(result) if result.batches == 2));

    let outcome = reconciler.update_script("Elsewhere", "00", &spec(None)).unwrap();
    assert_eq!(outcome, ScriptOutcome::Gone);
}

#[test]
fn test_verify_and_delete_script() {
    let session = FakeSession::with_databases(SQL2022_BANNER, &["AppDb"])
        .respond("sys.tables o", vec![row(vec![int(1)])]);
    let mut reconciler = reconciler(session);
    let target = VerifyTarget::parse("TABLE dbo.Users").unwrap();

    assert!(!reconciler.verify_script("AppDb", Some(&target)).unwrap().is_gone());
    assert!(reconciler.verify_script("Elsewhere", Some(&target)).unwrap().is_gone());

    let missing = VerifyTarget::parse("VIEW dbo.ActiveUsers").unwrap();
    assert!(reconciler.verify_script("AppDb", Some(&missing)).unwrap().is_gone());

    assert_eq!(reconciler.delete_script("AppDb").unwrap(), Deleted::Preserved);
    assert_eq!(reconciler.delete_script("Elsewhere").unwrap(), Deleted::Gone);
    assert!(reconciler.session().executed.is_empty());
}
