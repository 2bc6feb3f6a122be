//! Schemas, master keys, credentials, external data sources and permissions

use std::collections::BTreeSet;

use super::Catalog;
use crate::error::Result;
use crate::model::{
    is_default_owner, Credential, DatabasePermissions, ExternalDataSource, MasterKey, ObjectKey,
    ObjectKind, Schema, MASTER_DATABASE,
};
use crate::session::Param;

impl Catalog<'_> {
    pub fn read_schema(&mut self, key: &ObjectKey) -> Result<Option<Schema>> {
        let schemas = self.sys_view(&key.database, "schemas")?;
        let principals = self.sys_view(&key.database, "database_principals")?;
        let sql = format!(
            "SELECT s.schema_id, s.name, s.principal_id, COALESCE(o.name, N'') \
             FROM {schemas} s LEFT JOIN {principals} o ON o.principal_id = s.principal_id \
             WHERE s.name = @name"
        );

        let schema = self.read_one(
            ObjectKind::Schema,
            key,
            &key.database,
            &sql,
            &[Param::new("name", key.name.as_str())],
            |row| {
                Ok(Schema {
                    schema_id: row.int(0)?,
                    name: row.text(1)?,
                    owner_id: row.int(2)?,
                    owner_name: row.text_or_empty(3)?,
                })
            },
        )?;

        // Default-owned schemas of the hosted master read back with no owner
        Ok(schema.map(|mut schema| {
            if self.caps.is_hosted_edition()
                && key.database.eq_ignore_ascii_case(MASTER_DATABASE)
                && is_default_owner(&schema.owner_name)
            {
                schema.owner_name = String::new();
            }
            schema
        }))
    }

    pub fn read_master_key(&mut self, key: &ObjectKey) -> Result<Option<MasterKey>> {
        let keys = self.sys_view(&key.database, "symmetric_keys")?;
        let sql = format!(
            "SELECT k.name, COALESCE(k.principal_id, 0), k.symmetric_key_id, k.key_length, \
             k.key_algorithm, k.algorithm_desc, CONVERT(nvarchar(36), k.key_guid) \
             FROM {keys} k WHERE k.name = @name"
        );
        self.read_one(
            ObjectKind::MasterKey,
            key,
            &key.database,
            &sql,
            &[Param::new("name", key.name.as_str())],
            |row| {
                Ok(MasterKey {
                    name: row.text(0)?,
                    principal_id: row.int(1)?,
                    symmetric_key_id: row.int(2)?,
                    key_length: row.int(3)?,
                    key_algorithm: row.text(4)?,
                    algorithm_desc: row.text(5)?,
                    key_guid: row.text_or_empty(6)?,
                })
            },
        )
    }

    pub fn read_credential(&mut self, key: &ObjectKey) -> Result<Option<Credential>> {
        let credentials = self.sys_view(&key.database, "database_scoped_credentials")?;
        let sql = format!(
            "SELECT c.credential_id, c.name, c.credential_identity FROM {credentials} c WHERE c.name = @name"
        );
        self.read_one(
            ObjectKind::Credential,
            key,
            &key.database,
            &sql,
            &[Param::new("name", key.name.as_str())],
            |row| {
                Ok(Credential {
                    credential_id: row.int(0)?,
                    name: row.text(1)?,
                    identity: row.text_or_empty(2)?,
                })
            },
        )
    }

    pub fn read_external_data_source(&mut self, key: &ObjectKey) -> Result<Option<ExternalDataSource>> {
        let sources = self.sys_view(&key.database, "external_data_sources")?;
        let credentials = self.sys_view(&key.database, "database_scoped_credentials")?;
        let sql = format!(
            "SELECT ds.data_source_id, ds.name, ds.location, ds.type_desc, \
             COALESCE(ds.database_name, N''), COALESCE(c.name, N'') \
             FROM {sources} ds LEFT JOIN {credentials} c ON c.credential_id = ds.credential_id \
             WHERE ds.name = @name"
        );
        self.read_one(
            ObjectKind::ExternalDataSource,
            key,
            &key.database,
            &sql,
            &[Param::new("name", key.name.as_str())],
            |row| {
                Ok(ExternalDataSource {
                    data_source_id: row.int(0)?,
                    name: row.text(1)?,
                    location: row.text(2)?,
                    type_desc: row.text(3)?,
                    database_name: row.text_or_empty(4)?,
                    credential_name: row.text_or_empty(5)?,
                })
            },
        )
    }

    /// Database-level (class 0) permissions granted to the principal named in
    /// `key`. `None` when the principal does not exist.
    pub fn read_permissions(&mut self, key: &ObjectKey) -> Result<Option<DatabasePermissions>> {
        let principals = self.sys_view(&key.database, "database_principals")?;
        let sql = format!("SELECT p.principal_id, p.name FROM {principals} p WHERE p.name = @name");
        let principal = self.read_one(
            ObjectKind::Permissions,
            key,
            &key.database,
            &sql,
            &[Param::new("name", key.name.as_str())],
            |row| Ok((row.int(0)?, row.text(1)?)),
        )?;
        let Some((principal_id, principal_name)) = principal else {
            return Ok(None);
        };

        let permissions_view = self.sys_view(&key.database, "database_permissions")?;
        let sql = format!(
            "SELECT perm.permission_name, perm.state FROM {permissions_view} perm \
             WHERE perm.grantee_principal_id = @principal_id AND perm.class = 0 AND perm.state IN ('G', 'W')"
        );
        let rows = self.read_all(
            ObjectKind::Permissions,
            key,
            &key.database,
            &sql,
            &[Param::new("principal_id", principal_id)],
            |row| Ok((row.text(0)?, row.text(1)?)),
        )?;

        let mut permissions = BTreeSet::new();
        let mut grantable = BTreeSet::new();
        for (permission, state) in rows {
            let permission = permission.trim().to_string();
            if state.trim() == "W" {
                grantable.insert(permission.clone());
            }
            permissions.insert(permission);
        }

        Ok(Some(DatabasePermissions {
            principal_id,
            principal_name,
            permissions,
            grantable,
        }))
    }
}
