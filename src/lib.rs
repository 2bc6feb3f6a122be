//! rust-sqlsecurity: declarative management of SQL Server security principals
//!
//! Reads the live catalog state of logins, users, roles, schemas, master
//! keys, credentials, external data sources and database permissions,
//! compares it with a declared desired state, and synthesizes the T-SQL that
//! converges the two. Works against on-premises SQL Server (2014 and later)
//! and the hosted Azure SQL Database edition.

pub mod catalog;
pub mod config;
pub mod dialect;
pub mod error;
pub mod manifest;
pub mod model;
pub mod quote;
pub mod reconcile;
pub mod session;
pub mod synth;
pub mod util;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

pub use dialect::Capabilities;
pub use error::{ManifestError, ReconcileError, SessionError};
pub use manifest::{load_manifest, DatabaseManifest, Manifest};
pub use reconcile::{Reconciler, Refreshed};
pub use synth::{Statement, Synthesizer};

use model::{LoginAuth, LoginSpec, ObjectKey, ObjectKind, ScriptSpec, UserSpec};
use reconcile::{
    Credentials, ExternalDataSources, Logins, ManagedObject, MasterKeys, Permissions, Roles,
    Schemas, Updated, Users,
};
use session::Session;
use synth::script_declares;
use util::split_batches;

/// Statements that would create one declared object on an empty server
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub kind: ObjectKind,
    pub key: ObjectKey,
    pub statements: Vec<Statement>,
}

/// Synthesize creation statements for every object in the manifest, in
/// apply order, without touching a server.
pub fn plan_manifest(manifest: &Manifest, caps: Capabilities) -> Result<Vec<PlannedStep>> {
    let synth = Synthesizer::new(caps);
    let mut steps = Vec::with_capacity(manifest.object_count());

    for login in &manifest.logins {
        steps.push(PlannedStep {
            kind: ObjectKind::Login,
            key: ObjectKey::server(&login.name),
            statements: synth
                .create_login(login)
                .with_context(|| format!("Failed to plan login {}", login.name))?,
        });
    }

    for db in &manifest.databases {
        let mut plan = |kind: ObjectKind, name: &str, statements: error::Result<Vec<Statement>>| -> Result<()> {
            let key = ObjectKey::new(&db.name, name);
            let statements = statements.with_context(|| format!("Failed to plan {} {}", kind, key))?;
            steps.push(PlannedStep { kind, key, statements });
            Ok(())
        };

        if let Some(master_key) = &db.master_key {
            plan(ObjectKind::MasterKey, model::MASTER_KEY_NAME, synth.create_master_key(master_key))?;
        }
        for credential in &db.credentials {
            plan(ObjectKind::Credential, &credential.name, synth.create_credential(credential))?;
        }
        for source in &db.external_data_sources {
            plan(
                ObjectKind::ExternalDataSource,
                &source.name,
                synth.create_external_data_source(source),
            )?;
        }
        for role in &db.roles {
            plan(ObjectKind::Role, &role.name, synth.create_role(role))?;
        }
        for user in &db.users {
            plan(ObjectKind::User, &user.name, synth.create_user(user))?;
        }
        for schema in &db.schemas {
            plan(ObjectKind::Schema, &schema.name, synth.create_schema(schema))?;
        }
        for permissions in &db.permissions {
            plan(
                ObjectKind::Permissions,
                &permissions.principal_name,
                synth.grant_permissions(permissions),
            )?;
        }
        for script in &db.scripts {
            plan(ObjectKind::Script, &script_name(script), script_batches(script))?;
        }
    }

    Ok(steps)
}

fn script_name(script: &ScriptSpec) -> String {
    script
        .verify
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "script".to_string())
}

fn script_batches(script: &ScriptSpec) -> error::Result<Vec<Statement>> {
    if let Some(target) = &script.verify {
        if !script_declares(&script.script, target)? {
            return Err(ReconcileError::validation(
                format!("script for {}", target),
                "does not create or alter the verification target",
            ));
        }
    }
    Ok(split_batches(&script.script)
        .into_iter()
        .map(Statement::new)
        .collect())
}

/// Counts reported by [`apply_manifest`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub scripts_run: usize,
}

/// Knobs for [`apply_manifest`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Re-apply the declared password of every existing contained user.
    /// The server cannot compare those, so they are otherwise only set on
    /// creation.
    pub rotate_passwords: bool,
}

/// Converge the server to the manifest: create what is missing and update
/// what drifted. Nothing is dropped; objects absent from the manifest are
/// left alone.
///
/// A master key that already exists is left as is (updating one always
/// regenerates it). SQL login passwords are re-applied only when
/// `PWDCOMPARE` says they differ (always on the hosted edition, which lacks
/// it). Scripts run when their verification target is missing, or on every
/// apply when they declare none.
pub fn apply_manifest<S: Session>(
    reconciler: &mut Reconciler<S>,
    manifest: &Manifest,
    options: ApplyOptions,
) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();

    for login in &manifest.logins {
        let key = ObjectKey::server(&login.name);
        let login = settle_login_password(reconciler, login)?;
        converge::<Logins, S>(reconciler, &key, &login, &mut summary)?;
    }

    for db in &manifest.databases {
        info!(database = %db.name, "Applying database manifest");

        if let Some(master_key) = &db.master_key {
            let key = ObjectKey::master_key(&db.name);
            if reconciler.exists::<MasterKeys>(&key)? {
                summary.unchanged += 1;
            } else {
                reconciler
                    .ensure_created::<MasterKeys>(&key, master_key)
                    .with_context(|| format!("Failed to create master key in [{}]", db.name))?;
                summary.created += 1;
            }
        }
        for credential in &db.credentials {
            let key = ObjectKey::new(&db.name, &credential.name);
            converge::<Credentials, S>(reconciler, &key, credential, &mut summary)?;
        }
        for source in &db.external_data_sources {
            let key = ObjectKey::new(&db.name, &source.name);
            converge::<ExternalDataSources, S>(reconciler, &key, source, &mut summary)?;
        }
        for role in &db.roles {
            converge::<Roles, S>(reconciler, &ObjectKey::new(&db.name, &role.name), role, &mut summary)?;
        }
        for user in &db.users {
            let key = ObjectKey::new(&db.name, &user.name);
            let user = settle_user_password(user, options);
            converge::<Users, S>(reconciler, &key, &user, &mut summary)?;
        }
        for schema in &db.schemas {
            converge::<Schemas, S>(reconciler, &ObjectKey::new(&db.name, &schema.name), schema, &mut summary)?;
        }
        for permissions in &db.permissions {
            let key = ObjectKey::new(&db.name, &permissions.principal_name);
            converge::<Permissions, S>(reconciler, &key, permissions, &mut summary)?;
        }
        for script in &db.scripts {
            if script.verify.is_some()
                && !reconciler
                    .verify_script(&db.name, script.verify.as_ref())?
                    .is_gone()
            {
                summary.unchanged += 1;
                continue;
            }
            let result = reconciler
                .run_script(&db.name, script)
                .with_context(|| format!("Failed to run {} in [{}]", script_name(script), db.name))?;
            if result.verified == Some(false) {
                warn!(database = %db.name, script = %script_name(script), "Script did not produce its verification target");
            }
            summary.scripts_run += 1;
        }
    }

    info!(
        created = summary.created,
        updated = summary.updated,
        unchanged = summary.unchanged,
        scripts_run = summary.scripts_run,
        "Manifest applied"
    );
    Ok(summary)
}

/// Clears `rotate_password` when the server already holds the declared
/// password of an existing SQL login.
fn settle_login_password<S: Session>(reconciler: &mut Reconciler<S>, login: &LoginSpec) -> Result<LoginSpec> {
    let LoginAuth::Password(password) = &login.auth else {
        return Ok(login.clone());
    };
    if reconciler.capabilities().is_hosted_edition() {
        return Ok(login.clone());
    }
    let matches = reconciler
        .catalog()
        .login_password_matches(&login.name, password)
        .with_context(|| format!("Failed to compare password of login {}", login.name))?;
    if matches {
        debug!(login = %login.name, "Password unchanged");
        Ok(login.clone().password_unchanged())
    } else {
        Ok(login.clone())
    }
}

fn settle_user_password(user: &UserSpec, options: ApplyOptions) -> UserSpec {
    if options.rotate_passwords {
        user.clone()
    } else {
        user.clone().password_unchanged()
    }
}

fn converge<K: ManagedObject, S: Session>(
    reconciler: &mut Reconciler<S>,
    key: &ObjectKey,
    desired: &K::Desired,
    summary: &mut ApplySummary,
) -> Result<()> {
    if !reconciler.exists::<K>(key)? {
        reconciler
            .ensure_created::<K>(key, desired)
            .with_context(|| format!("Failed to create {} {}", K::KIND, key))?;
        summary.created += 1;
        return Ok(());
    }

    match reconciler
        .ensure_updated::<K>(key, desired)
        .with_context(|| format!("Failed to update {} {}", K::KIND, key))?
    {
        Updated::Applied(applied) if applied.statements.is_empty() => summary.unchanged += 1,
        Updated::Applied(_) => summary.updated += 1,
        Updated::Gone => bail!("{} {} disappeared while being updated", K::KIND, key),
    }
    Ok(())
}
