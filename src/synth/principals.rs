//! Logins, users and roles

use tracing::debug;

use super::{language_clause, Statement, Synthesizer};
use crate::error::{ReconcileError, Result};
use crate::model::{
    is_default_owner, owners_match, AuthenticationType, Login, LoginAuth, LoginSpec, LoginType,
    OwnedObjects, Role, RoleSpec, User, UserIdentity, UserSpec, DEFAULT_OWNER,
};
use crate::quote::{quote_ident, quote_nliteral, validate_secret};
use crate::util::sid_to_hex;

impl Synthesizer {
    // ========================================================================
    // Logins
    // ========================================================================

    pub fn create_login(&self, desired: &LoginSpec) -> Result<Vec<Statement>> {
        let name = quote_ident(&desired.name)?;
        let options = self.login_options(desired, None)?;

        let statement = match &desired.auth {
            LoginAuth::Password(password) => {
                validate_secret("login password", password)?;
                let mut sql = format!("CREATE LOGIN {} WITH PASSWORD = {}", name, quote_nliteral(password)?);
                for option in &options {
                    sql.push_str(", ");
                    sql.push_str(option);
                }
                Statement::with_secret(sql, password)?
            }
            LoginAuth::Windows => Statement::new(with_clause(
                format!("CREATE LOGIN {} FROM WINDOWS", name),
                &options,
            )),
            LoginAuth::External => {
                if !self.caps.supports_external_provider() {
                    return Err(ReconcileError::validation(
                        format!("login {}", desired.name),
                        "external provider logins are not supported by this server",
                    ));
                }
                Statement::new(with_clause(
                    format!("CREATE LOGIN {} FROM EXTERNAL PROVIDER", name),
                    &options,
                ))
            }
        };
        Ok(vec![statement])
    }

    /// The server never reports a password back, so a declared one is applied
    /// unless `rotate_password` was cleared.
    pub fn alter_login(&self, current: &Login, desired: &LoginSpec) -> Result<Vec<Statement>> {
        let compatible = matches!(
            (&desired.auth, &current.login_type),
            (LoginAuth::Password(_), LoginType::Sql)
                | (LoginAuth::Windows, LoginType::WindowsUser | LoginType::WindowsGroup)
                | (LoginAuth::External, LoginType::ExternalUser | LoginType::ExternalGroup)
        );
        if !compatible {
            return Err(ReconcileError::validation(
                format!("login {}", desired.name),
                "changing the authentication kind requires replacing the login",
            ));
        }

        let name = quote_ident(&desired.name)?;
        let mut statements = Vec::new();
        if let (LoginAuth::Password(password), true) = (&desired.auth, desired.rotate_password) {
            validate_secret("login password", password)?;
            let sql = format!("ALTER LOGIN {} WITH PASSWORD = {}", name, quote_nliteral(password)?);
            statements.push(Statement::with_secret(sql, password)?);
        }
        let options = self.login_options(desired, Some(current))?;
        if !options.is_empty() {
            statements.push(Statement::new(with_clause(format!("ALTER LOGIN {}", name), &options)));
        }
        Ok(statements)
    }

    pub fn drop_login(&self, name: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!("DROP LOGIN {}", quote_ident(name)?))])
    }

    /// `DEFAULT_DATABASE` / `DEFAULT_LANGUAGE` options that differ from `current`
    fn login_options(&self, desired: &LoginSpec, current: Option<&Login>) -> Result<Vec<String>> {
        let mut options = Vec::new();
        if let Some(database) = desired.default_database.as_deref().filter(|d| !d.is_empty()) {
            if current.map_or(true, |c| !c.default_database.eq_ignore_ascii_case(database)) {
                options.push(format!("DEFAULT_DATABASE = {}", quote_ident(database)?));
            }
        }
        if let Some(language) = desired.default_language.as_deref().filter(|l| !l.is_empty()) {
            if !self.caps.supports_default_language() {
                debug!(login = %desired.name, "Skipping DEFAULT_LANGUAGE on hosted edition");
            } else if current.map_or(true, |c| !c.default_language.eq_ignore_ascii_case(language)) {
                options.push(format!("DEFAULT_LANGUAGE = {}", quote_ident(language)?));
            }
        }
        Ok(options)
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// CREATE USER for whichever identity binding the desired state selects,
    /// followed by one `ADD MEMBER` per role.
    pub fn create_user(&self, desired: &UserSpec) -> Result<Vec<Statement>> {
        let name = quote_ident(&desired.name)?;
        let schema = quote_ident(default_schema(desired))?;
        let hosted = self.caps.is_hosted_edition();

        let create = match desired.identity()? {
            UserIdentity::Login(login) => Statement::new(format!(
                "CREATE USER {} FOR LOGIN {} WITH DEFAULT_SCHEMA = {}",
                name,
                quote_ident(&login)?,
                schema
            )),
            UserIdentity::Password(password) => {
                validate_secret("user password", &password)?;
                let mut sql = format!(
                    "CREATE USER {} WITH PASSWORD = {}, DEFAULT_SCHEMA = {}",
                    name,
                    quote_nliteral(&password)?,
                    schema
                );
                if self.caps.supports_default_language() {
                    sql.push_str(", ");
                    sql.push_str(&language_clause(desired.default_language.as_deref())?);
                }
                Statement::with_secret(sql, &password)?
            }
            UserIdentity::External {
                object_id: Some(object_id),
                external_type,
            } => {
                if !hosted {
                    return Err(ReconcileError::validation(
                        format!("user {}", desired.name),
                        "object id binding is only available on the hosted edition",
                    ));
                }
                Statement::new(format!(
                    "CREATE USER {} WITH DEFAULT_SCHEMA = {}, SID = {}, TYPE = {}",
                    name,
                    schema,
                    sid_to_hex(&object_id.to_bytes_le()),
                    external_type.code()
                ))
            }
            UserIdentity::External { object_id: None, .. } => {
                if !self.caps.supports_external_provider() {
                    return Err(ReconcileError::validation(
                        format!("user {}", desired.name),
                        "external provider users are not supported by this server",
                    ));
                }
                let mut sql = format!(
                    "CREATE USER {} FROM EXTERNAL PROVIDER WITH DEFAULT_SCHEMA = {}",
                    name, schema
                );
                // alter_user compares the language of external users, so a
                // declared one is set here too
                let language = desired.default_language.as_deref().filter(|l| !l.is_empty());
                if language.is_some() && self.caps.supports_default_language() {
                    sql.push_str(", ");
                    sql.push_str(&language_clause(language)?);
                }
                Statement::new(sql)
            }
        };

        let mut statements = vec![create];
        statements.extend(self.membership_changes(
            &desired.name,
            &Default::default(),
            &desired.roles,
        )?);
        Ok(statements)
    }

    /// Diff-based ALTER USER plus membership changes. A declared password is
    /// applied unless `rotate_password` was cleared.
    pub fn alter_user(&self, current: &User, desired: &UserSpec) -> Result<Vec<Statement>> {
        let identity = desired.identity()?;
        if let UserIdentity::Login(login) = &identity {
            if !current.login_name.is_empty() && !current.login_name.eq_ignore_ascii_case(login) {
                return Err(ReconcileError::validation(
                    format!("user {}", desired.name),
                    format!(
                        "login binding changed from {} to {}; the user must be replaced",
                        current.login_name, login
                    ),
                ));
            }
        }

        let name = quote_ident(&desired.name)?;
        let mut clauses = Vec::new();
        let mut secret = None;

        let schema = default_schema(desired);
        if !current.default_schema.eq_ignore_ascii_case(schema) {
            clauses.push(format!("DEFAULT_SCHEMA = {}", quote_ident(schema)?));
        }

        if let UserIdentity::Password(password) = &identity {
            if current.authentication != AuthenticationType::Database {
                return Err(ReconcileError::validation(
                    format!("user {}", desired.name),
                    "a password can only be set on a contained database user",
                ));
            }
            if desired.rotate_password {
                validate_secret("user password", password)?;
                clauses.push(format!("PASSWORD = {}", quote_nliteral(password)?));
                secret = Some(password.as_str());
            }
        }

        if self.caps.supports_default_language() && current.authentication != AuthenticationType::Instance {
            let desired_language = desired.default_language.as_deref().unwrap_or("");
            if !current.default_language.eq_ignore_ascii_case(desired_language) {
                clauses.push(language_clause(desired.default_language.as_deref())?);
            }
        }

        let mut statements = Vec::new();
        if !clauses.is_empty() {
            let sql = format!("ALTER USER {} WITH {}", name, clauses.join(", "));
            statements.push(match secret {
                Some(secret) => Statement::with_secret(sql, secret)?,
                None => Statement::new(sql),
            });
        }
        statements.extend(self.membership_changes(&desired.name, &current.roles, &desired.roles)?);
        Ok(statements)
    }

    /// Ownership of every owned role, then every owned schema, moves to
    /// `new_owner` before the user is dropped.
    pub fn drop_user(&self, name: &str, owned: &OwnedObjects, new_owner: &str) -> Result<Vec<Statement>> {
        let mut statements = self.reassign_ownership(owned, new_owner)?;
        statements.push(Statement::new(format!("DROP USER {}", quote_ident(name)?)));
        Ok(statements)
    }

    // ========================================================================
    // Roles
    // ========================================================================

    pub fn create_role(&self, desired: &RoleSpec) -> Result<Vec<Statement>> {
        let mut sql = format!("CREATE ROLE {}", quote_ident(&desired.name)?);
        if !is_default_owner(&desired.owner_name) {
            sql.push_str(&format!(" AUTHORIZATION {}", quote_ident(&desired.owner_name)?));
        }
        Ok(vec![Statement::new(sql)])
    }

    pub fn alter_role(&self, current: &Role, desired: &RoleSpec) -> Result<Vec<Statement>> {
        if owners_match(&current.owner_name, &desired.owner_name) {
            return Ok(Vec::new());
        }
        Ok(vec![Statement::new(format!(
            "ALTER AUTHORIZATION ON ROLE::{} TO {}",
            quote_ident(&desired.name)?,
            quote_ident(owner_or_default(&desired.owner_name))?
        ))])
    }

    /// Members leave, owned objects change hands, then the role is dropped.
    pub fn drop_role(&self, current: &Role, owned: &OwnedObjects, new_owner: &str) -> Result<Vec<Statement>> {
        let role = quote_ident(&current.name)?;
        let mut statements = Vec::new();
        for member in &current.members {
            statements.push(Statement::new(format!(
                "ALTER ROLE {} DROP MEMBER {}",
                role,
                quote_ident(member)?
            )));
        }
        statements.extend(self.reassign_ownership(owned, new_owner)?);
        statements.push(Statement::new(format!("DROP ROLE {}", role)));
        Ok(statements)
    }
}

fn default_schema(desired: &UserSpec) -> &str {
    owner_or_default(&desired.default_schema)
}

pub(super) fn owner_or_default(owner: &str) -> &str {
    if owner.is_empty() {
        DEFAULT_OWNER
    } else {
        owner
    }
}

fn with_clause(mut sql: String, options: &[String]) -> String {
    if !options.is_empty() {
        sql.push_str(" WITH ");
        sql.push_str(&options.join(", "));
    }
    sql
}
