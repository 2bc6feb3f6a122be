//! Per-kind wiring of catalog reads to statement synthesis

use crate::catalog::Catalog;
use crate::error::{ReconcileError, Result};
use crate::model::{
    Credential, CredentialSpec, DatabasePermissions, ExternalDataSource, ExternalDataSourceSpec,
    Login, LoginSpec, MasterKey, MasterKeySpec, ObjectKey, ObjectKind, PermissionsSpec, Role,
    RoleSpec, Schema, SchemaSpec, User, UserSpec, MASTER_DATABASE, MASTER_KEY_NAME,
};
use crate::synth::{Statement, Synthesizer, IMPLICIT_PERMISSION};

/// An object kind the reconciler can drive through its lifecycle.
///
/// Implementations are stateless markers: they read current state, and turn
/// desired (and current) state into statements. Sequencing, execution and
/// read-back live in [`Reconciler`](super::Reconciler).
pub trait ManagedObject {
    const KIND: ObjectKind;

    /// Declared state supplied by the caller
    type Desired;
    /// State read back from the catalog
    type Current: Clone + std::fmt::Debug;

    /// Name the desired state declares; must match the key it is applied to
    fn desired_name(desired: &Self::Desired) -> &str;

    /// Database the generated statements run in
    fn execution_database(key: &ObjectKey) -> &str {
        &key.database
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<Self::Current>>;

    fn plan_create(synth: &Synthesizer, desired: &Self::Desired) -> Result<Vec<Statement>>;

    fn plan_update(
        synth: &Synthesizer,
        current: &Self::Current,
        desired: &Self::Desired,
    ) -> Result<Vec<Statement>>;

    fn plan_delete(
        catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        key: &ObjectKey,
        current: &Self::Current,
    ) -> Result<Vec<Statement>>;
}

/// Server logins; keys live in `master`
pub struct Logins;

impl ManagedObject for Logins {
    const KIND: ObjectKind = ObjectKind::Login;
    type Desired = LoginSpec;
    type Current = Login;

    fn desired_name(desired: &LoginSpec) -> &str {
        &desired.name
    }

    fn execution_database(_key: &ObjectKey) -> &str {
        MASTER_DATABASE
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<Login>> {
        catalog.read_login(key)
    }

    fn plan_create(synth: &Synthesizer, desired: &LoginSpec) -> Result<Vec<Statement>> {
        synth.create_login(desired)
    }

    fn plan_update(synth: &Synthesizer, current: &Login, desired: &LoginSpec) -> Result<Vec<Statement>> {
        synth.alter_login(current, desired)
    }

    fn plan_delete(
        _catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        _key: &ObjectKey,
        current: &Login,
    ) -> Result<Vec<Statement>> {
        synth.drop_login(&current.name)
    }
}

/// Database users
pub struct Users;

impl ManagedObject for Users {
    const KIND: ObjectKind = ObjectKind::User;
    type Desired = UserSpec;
    type Current = User;

    fn desired_name(desired: &UserSpec) -> &str {
        &desired.name
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<User>> {
        catalog.read_user(key)
    }

    fn plan_create(synth: &Synthesizer, desired: &UserSpec) -> Result<Vec<Statement>> {
        synth.create_user(desired)
    }

    fn plan_update(synth: &Synthesizer, current: &User, desired: &UserSpec) -> Result<Vec<Statement>> {
        synth.alter_user(current, desired)
    }

    fn plan_delete(
        catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        key: &ObjectKey,
        current: &User,
    ) -> Result<Vec<Statement>> {
        let owned = catalog.read_owned_objects(ObjectKind::User, key)?;
        let new_owner = catalog.current_user(&key.database)?;
        synth.drop_user(&current.name, &owned, &new_owner)
    }
}

/// Database roles
pub struct Roles;

impl ManagedObject for Roles {
    const KIND: ObjectKind = ObjectKind::Role;
    type Desired = RoleSpec;
    type Current = Role;

    fn desired_name(desired: &RoleSpec) -> &str {
        &desired.name
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<Role>> {
        catalog.read_role(key)
    }

    fn plan_create(synth: &Synthesizer, desired: &RoleSpec) -> Result<Vec<Statement>> {
        synth.create_role(desired)
    }

    fn plan_update(synth: &Synthesizer, current: &Role, desired: &RoleSpec) -> Result<Vec<Statement>> {
        synth.alter_role(current, desired)
    }

    fn plan_delete(
        catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        key: &ObjectKey,
        current: &Role,
    ) -> Result<Vec<Statement>> {
        let owned = catalog.read_owned_objects(ObjectKind::Role, key)?;
        let new_owner = catalog.current_user(&key.database)?;
        synth.drop_role(current, &owned, &new_owner)
    }
}

/// Schemas
pub struct Schemas;

impl ManagedObject for Schemas {
    const KIND: ObjectKind = ObjectKind::Schema;
    type Desired = SchemaSpec;
    type Current = Schema;

    fn desired_name(desired: &SchemaSpec) -> &str {
        &desired.name
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<Schema>> {
        catalog.read_schema(key)
    }

    fn plan_create(synth: &Synthesizer, desired: &SchemaSpec) -> Result<Vec<Statement>> {
        synth.create_schema(desired)
    }

    fn plan_update(synth: &Synthesizer, current: &Schema, desired: &SchemaSpec) -> Result<Vec<Statement>> {
        synth.alter_schema(current, desired)
    }

    fn plan_delete(
        _catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        _key: &ObjectKey,
        current: &Schema,
    ) -> Result<Vec<Statement>> {
        synth.drop_schema(&current.name)
    }
}

/// The database master key. The password cannot be read back, so every
/// update regenerates the key.
pub struct MasterKeys;

impl ManagedObject for MasterKeys {
    const KIND: ObjectKind = ObjectKind::MasterKey;
    type Desired = MasterKeySpec;
    type Current = MasterKey;

    fn desired_name(_desired: &MasterKeySpec) -> &str {
        MASTER_KEY_NAME
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<MasterKey>> {
        catalog.read_master_key(key)
    }

    fn plan_create(synth: &Synthesizer, desired: &MasterKeySpec) -> Result<Vec<Statement>> {
        synth.create_master_key(desired)
    }

    fn plan_update(synth: &Synthesizer, _current: &MasterKey, desired: &MasterKeySpec) -> Result<Vec<Statement>> {
        synth.alter_master_key(desired)
    }

    fn plan_delete(
        _catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        _key: &ObjectKey,
        _current: &MasterKey,
    ) -> Result<Vec<Statement>> {
        synth.drop_master_key()
    }
}

/// Database scoped credentials
pub struct Credentials;

impl ManagedObject for Credentials {
    const KIND: ObjectKind = ObjectKind::Credential;
    type Desired = CredentialSpec;
    type Current = Credential;

    fn desired_name(desired: &CredentialSpec) -> &str {
        &desired.name
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<Credential>> {
        catalog.read_credential(key)
    }

    fn plan_create(synth: &Synthesizer, desired: &CredentialSpec) -> Result<Vec<Statement>> {
        synth.create_credential(desired)
    }

    fn plan_update(synth: &Synthesizer, current: &Credential, desired: &CredentialSpec) -> Result<Vec<Statement>> {
        synth.alter_credential(current, desired)
    }

    fn plan_delete(
        _catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        _key: &ObjectKey,
        current: &Credential,
    ) -> Result<Vec<Statement>> {
        synth.drop_credential(&current.name)
    }
}

/// External data sources
pub struct ExternalDataSources;

impl ManagedObject for ExternalDataSources {
    const KIND: ObjectKind = ObjectKind::ExternalDataSource;
    type Desired = ExternalDataSourceSpec;
    type Current = ExternalDataSource;

    fn desired_name(desired: &ExternalDataSourceSpec) -> &str {
        &desired.name
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<ExternalDataSource>> {
        catalog.read_external_data_source(key)
    }

    fn plan_create(synth: &Synthesizer, desired: &ExternalDataSourceSpec) -> Result<Vec<Statement>> {
        synth.create_external_data_source(desired)
    }

    fn plan_update(
        synth: &Synthesizer,
        current: &ExternalDataSource,
        desired: &ExternalDataSourceSpec,
    ) -> Result<Vec<Statement>> {
        synth.alter_external_data_source(current, desired)
    }

    fn plan_delete(
        _catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        _key: &ObjectKey,
        current: &ExternalDataSource,
    ) -> Result<Vec<Statement>> {
        synth.drop_external_data_source(&current.name)
    }
}

/// Database-level permissions of one principal, keyed by the principal name.
/// The set exists while the principal holds at least one managed permission.
pub struct Permissions;

impl ManagedObject for Permissions {
    const KIND: ObjectKind = ObjectKind::Permissions;
    type Desired = PermissionsSpec;
    type Current = DatabasePermissions;

    fn desired_name(desired: &PermissionsSpec) -> &str {
        &desired.principal_name
    }

    fn read(catalog: &mut Catalog<'_>, key: &ObjectKey) -> Result<Option<DatabasePermissions>> {
        let Some(mut current) = catalog.read_permissions(key)? else {
            return Ok(None);
        };
        current
            .permissions
            .retain(|p| !p.eq_ignore_ascii_case(IMPLICIT_PERMISSION));
        current
            .grantable
            .retain(|p| !p.eq_ignore_ascii_case(IMPLICIT_PERMISSION));
        Ok(Some(current).filter(|c| !c.permissions.is_empty()))
    }

    fn plan_create(synth: &Synthesizer, desired: &PermissionsSpec) -> Result<Vec<Statement>> {
        require_managed_permission(desired)?;
        synth.grant_permissions(desired)
    }

    fn plan_update(
        synth: &Synthesizer,
        current: &DatabasePermissions,
        desired: &PermissionsSpec,
    ) -> Result<Vec<Statement>> {
        require_managed_permission(desired)?;
        synth.permission_changes(
            &desired.principal_name,
            &current.permissions,
            &current.grantable,
            &desired.permissions,
        )
    }

    fn plan_delete(
        _catalog: &mut Catalog<'_>,
        synth: &Synthesizer,
        _key: &ObjectKey,
        current: &DatabasePermissions,
    ) -> Result<Vec<Statement>> {
        synth.revoke_permissions(&current.principal_name, &current.permissions, &current.grantable)
    }
}

/// An empty set is expressed by deleting, not by declaring nothing
fn require_managed_permission(desired: &PermissionsSpec) -> Result<()> {
    if desired
        .permissions
        .iter()
        .all(|p| p.eq_ignore_ascii_case(IMPLICIT_PERMISSION))
    {
        return Err(ReconcileError::validation(
            format!("permissions of {}", desired.principal_name),
            "at least one permission besides CONNECT is required",
        ));
    }
    Ok(())
}
