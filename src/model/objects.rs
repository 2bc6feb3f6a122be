//! Database-scoped objects: schemas, keys, credentials, external data
//! sources, permissions and scripts

use std::collections::BTreeSet;

use crate::error::{ReconcileError, Result};
use crate::model::DEFAULT_OWNER;
use crate::synth::VerifyTarget;

/// Fixed name of a database master key in `sys.symmetric_keys`
pub const MASTER_KEY_NAME: &str = "##MS_DatabaseMasterKey##";

/// Current state of a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub schema_id: i32,
    pub name: String,
    pub owner_id: i32,
    pub owner_name: String,
}

/// Desired state of a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSpec {
    pub name: String,
    pub owner_name: String,
}

impl SchemaSpec {
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

/// Database master key; every attribute is server-reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKey {
    pub name: String,
    pub principal_id: i32,
    pub symmetric_key_id: i32,
    pub key_length: i32,
    pub key_algorithm: String,
    pub algorithm_desc: String,
    pub key_guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKeySpec {
    pub password: String,
}

/// Database scoped credential. The secret is write-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub credential_id: i32,
    pub name: String,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSpec {
    pub name: String,
    pub identity: String,
    pub secret: String,
}

/// `TYPE =` of an external data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalDataSourceType {
    Rdbms,
    BlobStorage,
}

impl ExternalDataSourceType {
    pub fn keyword(&self) -> &'static str {
        match self {
            ExternalDataSourceType::Rdbms => "RDBMS",
            ExternalDataSourceType::BlobStorage => "BLOB_STORAGE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RDBMS" => Ok(ExternalDataSourceType::Rdbms),
            "BLOB_STORAGE" => Ok(ExternalDataSourceType::BlobStorage),
            other => Err(ReconcileError::validation(
                "external data source type",
                format!("'{}' is not one of RDBMS, BLOB_STORAGE", other),
            )),
        }
    }
}

/// Current state of an external data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDataSource {
    pub data_source_id: i32,
    pub name: String,
    pub location: String,
    /// `type_desc` as reported by the server
    pub type_desc: String,
    pub database_name: String,
    pub credential_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDataSourceSpec {
    pub name: String,
    pub source_type: ExternalDataSourceType,
    pub location: String,
    pub database_name: Option<String>,
    pub credential_name: Option<String>,
}

/// Database-level permissions granted to one principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabasePermissions {
    pub principal_id: i32,
    pub principal_name: String,
    pub permissions: BTreeSet<String>,
    /// Subset of `permissions` held WITH GRANT OPTION; revoking these needs CASCADE
    pub grantable: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionsSpec {
    pub principal_name: String,
    pub permissions: BTreeSet<String>,
}

impl PermissionsSpec {
    pub fn new<I, S>(principal: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            principal_name: principal.into(),
            permissions: permissions
                .into_iter()
                .map(|p| p.as_ref().trim().to_ascii_uppercase())
                .collect(),
        }
    }
}

/// A raw script plus the object whose existence proves it ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSpec {
    pub script: String,
    pub verify: Option<VerifyTarget>,
}

/// Outcome of running a script; not persisted by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptExecutionResult {
    /// Upper-case hex SHA-256 of the script text
    pub digest: String,
    pub batches: usize,
    /// `None` when no verification target was declared
    pub verified: Option<bool>,
}
