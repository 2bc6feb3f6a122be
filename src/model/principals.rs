//! Security principals: logins, users and roles

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::error::{ReconcileError, Result};
use crate::model::DEFAULT_OWNER;
use crate::util::sid_to_hex;

/// Suffix of the hex SID string of an Entra ID principal created from an
/// application or user object id
pub const FEDERATED_SID_SUFFIX: &str = "AADE";

/// Number of leading characters (`0x` + 32 hex digits, the directory object
/// GUID) compared when matching a federated database SID to a server principal
pub const FEDERATED_SID_PREFIX_LEN: usize = 34;

/// `authentication_type_desc` of a database principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationType {
    None,
    Instance,
    Database,
    Windows,
    External,
    Other(String),
}

impl AuthenticationType {
    pub fn from_desc(desc: &str) -> Self {
        match desc.to_ascii_uppercase().as_str() {
            "NONE" => AuthenticationType::None,
            "INSTANCE" => AuthenticationType::Instance,
            "DATABASE" => AuthenticationType::Database,
            "WINDOWS" => AuthenticationType::Windows,
            "EXTERNAL" => AuthenticationType::External,
            _ => AuthenticationType::Other(desc.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AuthenticationType::None => "NONE",
            AuthenticationType::Instance => "INSTANCE",
            AuthenticationType::Database => "DATABASE",
            AuthenticationType::Windows => "WINDOWS",
            AuthenticationType::External => "EXTERNAL",
            AuthenticationType::Other(s) => s,
        }
    }
}

/// Principal type of an Entra ID (external) user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExternalType {
    /// `E`: external user or application
    #[default]
    User,
    /// `X`: external group
    Group,
}

impl ExternalType {
    pub fn code(&self) -> &'static str {
        match self {
            ExternalType::User => "E",
            ExternalType::Group => "X",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "E" | "e" => Ok(ExternalType::User),
            "X" | "x" => Ok(ExternalType::Group),
            other => Err(ReconcileError::validation(
                "external type",
                format!("'{}' is not one of E, X", other),
            )),
        }
    }
}

// ============================================================================
// Logins
// ============================================================================

/// Server principal type (`sys.server_principals.type`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginType {
    Sql,
    WindowsUser,
    WindowsGroup,
    ExternalUser,
    ExternalGroup,
    Other(String),
}

impl LoginType {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "S" => LoginType::Sql,
            "U" => LoginType::WindowsUser,
            "G" => LoginType::WindowsGroup,
            "E" => LoginType::ExternalUser,
            "X" => LoginType::ExternalGroup,
            other => LoginType::Other(other.to_string()),
        }
    }
}

/// Current state of a server login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub principal_id: i32,
    pub name: String,
    pub login_type: LoginType,
    pub sid: Vec<u8>,
    pub default_database: String,
    pub default_language: String,
    pub is_disabled: bool,
}

impl Login {
    pub fn sid_hex(&self) -> String {
        sid_to_hex(&self.sid)
    }
}

/// How a declared login authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAuth {
    Password(String),
    Windows,
    External,
}

/// Desired state of a server login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSpec {
    pub name: String,
    pub auth: LoginAuth,
    pub default_database: Option<String>,
    pub default_language: Option<String>,
    /// Apply the declared password on update. Cleared when the caller knows
    /// the server already holds it.
    pub rotate_password: bool,
}

impl LoginSpec {
    pub fn with_password(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth: LoginAuth::Password(password.into()),
            default_database: None,
            default_language: None,
            rotate_password: true,
        }
    }

    /// Keep the password out of updates; creation still sets it
    pub fn password_unchanged(mut self) -> Self {
        self.rotate_password = false;
        self
    }

    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = Some(database.into());
        self
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = Some(language.into());
        self
    }
}

// ============================================================================
// Users
// ============================================================================

/// Current state of a database user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub principal_id: i32,
    pub name: String,
    /// `sys.database_principals.type` (S, U, G, E, X, ...)
    pub type_code: String,
    pub authentication: AuthenticationType,
    pub default_schema: String,
    pub default_language: String,
    pub sid: Vec<u8>,
    /// Server login the user maps to; empty for contained users
    pub login_name: String,
    pub roles: BTreeSet<String>,
}

impl User {
    pub fn sid_hex(&self) -> String {
        sid_to_hex(&self.sid)
    }

    /// Entra ID principals created from an object id carry a marker suffix
    pub fn has_federated_sid(&self) -> bool {
        self.sid_hex().ends_with(FEDERATED_SID_SUFFIX)
    }

    /// Directory object portion of a federated SID, matched against
    /// server principals. Tied to the Entra ID SID layout.
    pub fn federated_sid_prefix(&self) -> String {
        self.sid_hex()
            .chars()
            .take(FEDERATED_SID_PREFIX_LEN)
            .collect()
    }
}

/// The one identity binding used to create a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdentity {
    /// `FOR LOGIN [login]`
    Login(String),
    /// Contained user `WITH PASSWORD`
    Password(String),
    /// `FROM EXTERNAL PROVIDER`, or an explicit SID from the directory object id
    External {
        object_id: Option<Uuid>,
        external_type: ExternalType,
    },
}

/// Desired state of a database user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    pub login_name: Option<String>,
    pub password: Option<String>,
    pub object_id: Option<String>,
    pub external_type: Option<ExternalType>,
    pub default_schema: String,
    pub default_language: Option<String>,
    pub roles: BTreeSet<String>,
    /// Apply the declared password on update (contained users only)
    pub rotate_password: bool,
}

impl UserSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            login_name: None,
            password: None,
            object_id: None,
            external_type: None,
            default_schema: DEFAULT_OWNER.to_string(),
            default_language: None,
            roles: BTreeSet::new(),
            rotate_password: true,
        }
    }

    pub fn for_login(mut self, login: impl Into<String>) -> Self {
        self.login_name = Some(login.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Keep the password out of updates; creation still sets it
    pub fn password_unchanged(mut self) -> Self {
        self.rotate_password = false;
        self
    }

    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn with_external_type(mut self, external_type: ExternalType) -> Self {
        self.external_type = Some(external_type);
        self
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = Some(language.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve the identity binding. Exactly one of login name, password and
    /// object id may be set; none selects the external provider path.
    pub fn identity(&self) -> Result<UserIdentity> {
        let login = non_empty(&self.login_name);
        let password = non_empty(&self.password);
        let object_id = non_empty(&self.object_id);

        let supplied = [login.is_some(), password.is_some(), object_id.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        if supplied > 1 {
            return Err(ReconcileError::validation(
                format!("identity of user {}", self.name),
                "only one of login name, password and object id may be set",
            ));
        }

        if let Some(login) = login {
            return Ok(UserIdentity::Login(login.to_string()));
        }
        if let Some(password) = password {
            return Ok(UserIdentity::Password(password.to_string()));
        }
        let object_id = object_id
            .map(|id| {
                Uuid::parse_str(id).map_err(|e| {
                    ReconcileError::validation(
                        format!("object id of user {}", self.name),
                        e.to_string(),
                    )
                })
            })
            .transpose()?;
        Ok(UserIdentity::External {
            object_id,
            external_type: self.external_type.unwrap_or_default(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

// ============================================================================
// Roles
// ============================================================================

/// Current state of a database role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub principal_id: i32,
    pub name: String,
    pub owner_id: i32,
    pub owner_name: String,
    /// Direct members; the reverse view of [`User::roles`]
    pub members: BTreeSet<String>,
}

/// Desired state of a database role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    pub owner_name: String,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner_name: DEFAULT_OWNER.to_string(),
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner_name = owner.into();
        self
    }
}

/// Roles and schemas owned by a principal, which must change hands before
/// the principal can be dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedObjects {
    pub roles: Vec<String>,
    pub schemas: Vec<String>,
}

impl OwnedObjects {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.schemas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.roles.len() + self.schemas.len()
    }
}
