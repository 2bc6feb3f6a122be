//! Domain entities: value snapshots of catalog state and declared desired state

mod objects;
mod principals;

pub use objects::*;
pub use principals::*;

use std::fmt;

/// Name of the server-scope catalog database
pub const MASTER_DATABASE: &str = "master";

/// Default owner principal of roles and schemas
pub const DEFAULT_OWNER: &str = "dbo";

/// Kind of object a reconciliation call operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Database,
    Login,
    User,
    Role,
    Schema,
    MasterKey,
    Credential,
    ExternalDataSource,
    Permissions,
    Script,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Database => "database",
            ObjectKind::Login => "login",
            ObjectKind::User => "user",
            ObjectKind::Role => "role",
            ObjectKind::Schema => "schema",
            ObjectKind::MasterKey => "master key",
            ObjectKind::Credential => "database scoped credential",
            ObjectKind::ExternalDataSource => "external data source",
            ObjectKind::Permissions => "database permissions",
            ObjectKind::Script => "sql script",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation attempted when an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    Verify,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Verify => "verify",
        })
    }
}

/// Immutable identity of a reconciled object: the database it lives in and
/// its name within that database. Renames are delete + create.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub database: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
        }
    }

    /// Key of a server-scope object (logins), read through `master`
    pub fn server(name: impl Into<String>) -> Self {
        Self::new(MASTER_DATABASE, name)
    }

    /// Key of the single master key of `database`
    pub fn master_key(database: impl Into<String>) -> Self {
        Self::new(database, MASTER_KEY_NAME)
    }

    /// Display name (e.g., [AppDb].[alice]) used in logs and errors
    pub fn qualified_name(&self) -> String {
        format!("[{}].[{}]", self.database, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// `''` and `dbo` both mean "owned by the database owner"
pub fn is_default_owner(owner: &str) -> bool {
    owner.is_empty() || owner.eq_ignore_ascii_case(DEFAULT_OWNER)
}

/// Owner comparison with the default-owner equivalence applied
pub fn owners_match(a: &str, b: &str) -> bool {
    (is_default_owner(a) && is_default_owner(b)) || a == b
}
