//! Logins, users, roles and principal-owned objects

use tracing::debug;

use super::Catalog;
use crate::error::{ReconcileError, Result};
use crate::model::{
    AuthenticationType, Login, LoginType, ObjectKey, ObjectKind, OwnedObjects, Role, User,
    MASTER_DATABASE,
};
use crate::quote::split_quoted_list;
use crate::session::Param;

impl Catalog<'_> {
    /// Server login by name, read through `master`
    pub fn read_login(&mut self, key: &ObjectKey) -> Result<Option<Login>> {
        let sql = "SELECT sp.principal_id, sp.name, sp.type, sp.sid, \
                   COALESCE(sp.default_database_name, N''), COALESCE(sp.default_language_name, N''), sp.is_disabled \
                   FROM [sys].[server_principals] sp \
                   WHERE sp.name = @name AND sp.type IN ('S', 'U', 'G', 'E', 'X')";
        self.read_one(
            ObjectKind::Login,
            key,
            MASTER_DATABASE,
            sql,
            &[Param::new("name", key.name.as_str())],
            |row| {
                Ok(Login {
                    principal_id: row.int(0)?,
                    name: row.text(1)?,
                    login_type: LoginType::from_code(&row.text(2)?),
                    sid: row.bytes(3)?,
                    default_database: row.text_or_empty(4)?,
                    default_language: row.text_or_empty(5)?,
                    is_disabled: row.bool(6)?,
                })
            },
        )
    }

    /// Whether `password` is the current password of SQL login `name`. False
    /// when the session cannot see the password hash.
    pub fn login_password_matches(&mut self, name: &str, password: &str) -> Result<bool> {
        let key = ObjectKey::server(name);
        let found = self.read_one(
            ObjectKind::Login,
            &key,
            MASTER_DATABASE,
            "SELECT 1 FROM [sys].[sql_logins] sl \
             WHERE sl.name = @name AND PWDCOMPARE(@password, sl.password_hash) = 1",
            &[Param::new("name", name), Param::new("password", password)],
            |_| Ok(()),
        )?;
        Ok(found.is_some())
    }

    /// Database user by name, with its direct role memberships and the login
    /// it maps to.
    ///
    /// When the primary query cannot link the user to a server principal, the
    /// link is chased in `master`: by SID for instance-authenticated users,
    /// and by the directory-object prefix of the SID for federated external
    /// users.
    pub fn read_user(&mut self, key: &ObjectKey) -> Result<Option<User>> {
        let principals = self.sys_view(&key.database, "database_principals")?;
        let role_members = self.sys_view(&key.database, "database_role_members")?;
        let (login_column, login_join) = if self.caps.supports_cross_database_qualified_names() {
            (
                "COALESCE(sl.name, N'')",
                " LEFT JOIN [master].[sys].[sql_logins] sl ON p.sid = sl.sid",
            )
        } else {
            ("N''", "")
        };
        let roles = self.name_aggregate(
            "r.name",
            &format!(
                "FROM {rm} drm INNER JOIN {dp} r ON r.principal_id = drm.role_principal_id \
                 WHERE drm.member_principal_id = p.principal_id",
                rm = role_members,
                dp = principals
            ),
        );
        let sql = format!(
            "SELECT p.principal_id, p.name, p.type, p.authentication_type_desc, \
             COALESCE(p.default_schema_name, N''), COALESCE(p.default_language_name, N''), \
             p.sid, {login_column}, {roles} \
             FROM {principals} p{login_join} \
             WHERE p.name = @name AND p.type NOT IN ('R', 'A')"
        );

        let user = self.read_one(
            ObjectKind::User,
            key,
            &key.database,
            &sql,
            &[Param::new("name", key.name.as_str())],
            |row| {
                Ok((
                    User {
                        principal_id: row.int(0)?,
                        name: row.text(1)?,
                        type_code: row.text(2)?,
                        authentication: AuthenticationType::from_desc(&row.text(3)?),
                        default_schema: row.text_or_empty(4)?,
                        default_language: row.text_or_empty(5)?,
                        sid: row.bytes(6)?,
                        login_name: row.text_or_empty(7)?,
                        roles: Default::default(),
                    },
                    row.text_or_empty(8)?,
                ))
            },
        )?;

        let Some((mut user, roles)) = user else {
            return Ok(None);
        };
        user.roles = split_quoted_list(&roles)?;

        if user.authentication == AuthenticationType::Instance && user.login_name.is_empty() {
            debug!(user = %key, "Resolving login by SID");
            user.login_name = self.login_name_by_sid(key, &user)?;
        } else if user.authentication == AuthenticationType::External && user.has_federated_sid() {
            debug!(user = %key, "Resolving external principal by SID prefix");
            user.login_name = self.external_principal_by_sid_prefix(key, &user)?;
        }
        Ok(Some(user))
    }

    fn login_name_by_sid(&mut self, key: &ObjectKey, user: &User) -> Result<String> {
        let name = self.read_one(
            ObjectKind::User,
            key,
            MASTER_DATABASE,
            "SELECT sl.name FROM [sys].[sql_logins] sl WHERE sl.sid = @sid",
            &[Param::new("sid", user.sid.clone())],
            |row| row.text(0),
        )?;
        name.ok_or_else(|| ReconcileError::AmbiguousState {
            kind: ObjectKind::User,
            name: key.qualified_name(),
            message: format!("no login matches SID {}", user.sid_hex()),
        })
    }

    fn external_principal_by_sid_prefix(&mut self, key: &ObjectKey, user: &User) -> Result<String> {
        let name = self.read_one(
            ObjectKind::User,
            key,
            MASTER_DATABASE,
            "SELECT sp.name FROM [sys].[server_principals] sp \
             WHERE sp.type NOT IN ('G', 'R') AND CONVERT(varchar(64), sp.sid, 1) = @sid_prefix",
            &[Param::new("sid_prefix", user.federated_sid_prefix())],
            |row| row.text(0),
        )?;
        name.ok_or_else(|| ReconcileError::AmbiguousState {
            kind: ObjectKind::User,
            name: key.qualified_name(),
            message: format!(
                "no server principal matches SID prefix {}",
                user.federated_sid_prefix()
            ),
        })
    }

    /// Database role by name, with its owner and direct members
    pub fn read_role(&mut self, key: &ObjectKey) -> Result<Option<Role>> {
        let principals = self.sys_view(&key.database, "database_principals")?;
        let role_members = self.sys_view(&key.database, "database_role_members")?;
        let members = self.name_aggregate(
            "m.name",
            &format!(
                "FROM {rm} drm INNER JOIN {dp} m ON m.principal_id = drm.member_principal_id \
                 WHERE drm.role_principal_id = r.principal_id",
                rm = role_members,
                dp = principals
            ),
        );
        let sql = format!(
            "SELECT r.principal_id, r.name, COALESCE(r.owning_principal_id, 0), COALESCE(o.name, N''), {members} \
             FROM {principals} r LEFT JOIN {principals} o ON o.principal_id = r.owning_principal_id \
             WHERE r.name = @name AND r.type = 'R'"
        );

        let role = self.read_one(
            ObjectKind::Role,
            key,
            &key.database,
            &sql,
            &[Param::new("name", key.name.as_str())],
            |row| {
                Ok((
                    Role {
                        principal_id: row.int(0)?,
                        name: row.text(1)?,
                        owner_id: row.int(2)?,
                        owner_name: row.text_or_empty(3)?,
                        members: Default::default(),
                    },
                    row.text_or_empty(4)?,
                ))
            },
        )?;

        match role {
            Some((mut role, members)) => {
                role.members = split_quoted_list(&members)?;
                Ok(Some(role))
            }
            None => Ok(None),
        }
    }

    /// Roles and schemas owned by the principal named in `key`, each sorted
    pub fn read_owned_objects(&mut self, kind: ObjectKind, key: &ObjectKey) -> Result<OwnedObjects> {
        let principals = self.sys_view(&key.database, "database_principals")?;
        let schemas = self.sys_view(&key.database, "schemas")?;
        let sql = format!(
            "SELECT 'R', o.name FROM {principals} o \
             INNER JOIN {principals} p ON o.owning_principal_id = p.principal_id \
             WHERE p.name = @name AND o.type = 'R' \
             UNION ALL \
             SELECT 'S', s.name FROM {schemas} s \
             INNER JOIN {principals} p ON s.principal_id = p.principal_id \
             WHERE p.name = @name"
        );

        let rows = self.read_all(
            kind,
            key,
            &key.database,
            &sql,
            &[Param::new("name", key.name.as_str())],
            |row| Ok((row.text(0)?, row.text(1)?)),
        )?;

        let mut owned = OwnedObjects::default();
        for (class, name) in rows {
            if class == "R" {
                owned.roles.push(name);
            } else {
                owned.schemas.push(name);
            }
        }
        owned.roles.sort();
        owned.schemas.sort();
        Ok(owned)
    }
}
