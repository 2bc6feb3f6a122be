//! Desired-state manifest
//!
//! An XML document declaring logins and, per database, the principals and
//! objects that should exist:
//!
//! ```xml
//! <Manifest>
//!   <Login name="app_login" password="$(APP_LOGIN_PASSWORD)" defaultDatabase="AppDb" />
//!   <Database name="AppDb">
//!     <Role name="readers" />
//!     <User name="app" login="app_login" defaultSchema="sales">
//!       <Member role="readers" />
//!     </User>
//!     <Schema name="sales" owner="app" />
//!     <Permissions principal="app">
//!       <Grant>VIEW DEFINITION</Grant>
//!     </Permissions>
//!     <Script verify="TABLE sales.Orders" file="scripts/orders.sql" />
//!   </Database>
//! </Manifest>
//! ```
//!
//! Attribute values and text may reference `$(NAME)` variables, resolved from
//! the process environment when the manifest is loaded.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use roxmltree::{Document, Node};

use crate::error::ManifestError;
use crate::model::{
    CredentialSpec, ExternalDataSourceSpec, ExternalDataSourceType, ExternalType, LoginAuth,
    LoginSpec, MasterKeySpec, DEFAULT_OWNER, PermissionsSpec, RoleSpec, SchemaSpec, ScriptSpec, UserSpec,
};
use crate::synth::VerifyTarget;

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\((\w+)\)").unwrap());

/// Loaded manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub logins: Vec<LoginSpec>,
    pub databases: Vec<DatabaseManifest>,
}

/// Objects declared inside one database, in the order they are applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseManifest {
    pub name: String,
    pub master_key: Option<MasterKeySpec>,
    pub credentials: Vec<CredentialSpec>,
    pub external_data_sources: Vec<ExternalDataSourceSpec>,
    pub roles: Vec<RoleSpec>,
    pub users: Vec<UserSpec>,
    pub schemas: Vec<SchemaSpec>,
    pub permissions: Vec<PermissionsSpec>,
    pub scripts: Vec<ScriptSpec>,
}

impl Manifest {
    /// Total number of declared objects
    pub fn object_count(&self) -> usize {
        self.logins.len()
            + self
                .databases
                .iter()
                .map(|db| {
                    usize::from(db.master_key.is_some())
                        + db.credentials.len()
                        + db.external_data_sources.len()
                        + db.roles.len()
                        + db.users.len()
                        + db.schemas.len()
                        + db.permissions.len()
                        + db.scripts.len()
                })
                .sum::<usize>()
    }
}

/// Load a manifest file, substituting variables from the environment
pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    parse_manifest(&content, path, &base_dir, |name| std::env::var(name).ok())
}

/// Parse manifest text. `path` is used for error reporting, `base_dir`
/// resolves relative script files, `lookup` resolves `$(NAME)` variables.
pub fn parse_manifest<F>(
    content: &str,
    path: &Path,
    base_dir: &Path,
    lookup: F,
) -> Result<Manifest, ManifestError>
where
    F: Fn(&str) -> Option<String>,
{
    let doc = Document::parse(content).map_err(|e| ManifestError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "Manifest" {
        return Err(invalid(format!(
            "root element must be <Manifest>, found <{}>",
            root.tag_name().name()
        )));
    }

    let ctx = Context { base_dir, lookup: &lookup };
    let mut manifest = Manifest::default();
    for node in root.children().filter(Node::is_element) {
        match node.tag_name().name() {
            "Login" => manifest.logins.push(ctx.login(&node)?),
            "Database" => manifest.databases.push(ctx.database(&node)?),
            other => return Err(invalid(format!("unexpected <{}> in <Manifest>", other))),
        }
    }
    Ok(manifest)
}

fn invalid(message: impl Into<String>) -> ManifestError {
    ManifestError::Invalid {
        message: message.into(),
    }
}

struct Context<'a> {
    base_dir: &'a Path,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Context<'_> {
    fn substitute(&self, value: &str) -> Result<String, ManifestError> {
        let mut missing = None;
        let result = VARIABLE_RE.replace_all(value, |caps: &regex::Captures| {
            let name = &caps[1];
            (self.lookup)(name).unwrap_or_else(|| {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            })
        });
        match missing {
            Some(name) => Err(invalid(format!("variable $({}) is not set", name))),
            None => Ok(result.into_owned()),
        }
    }

    fn optional(&self, node: &Node, attribute: &str) -> Result<Option<String>, ManifestError> {
        node.attribute(attribute)
            .map(|value| self.substitute(value))
            .transpose()
    }

    fn required(&self, node: &Node, attribute: &str) -> Result<String, ManifestError> {
        self.optional(node, attribute)?.ok_or_else(|| {
            invalid(format!(
                "<{}> requires the '{}' attribute",
                node.tag_name().name(),
                attribute
            ))
        })
    }

    fn text(&self, node: &Node) -> Result<String, ManifestError> {
        self.substitute(node.text().unwrap_or("").trim())
    }

    fn login(&self, node: &Node) -> Result<LoginSpec, ManifestError> {
        let name = self.required(node, "name")?;
        let auth = match node.attribute("auth").unwrap_or("password") {
            "password" => LoginAuth::Password(self.required(node, "password")?),
            "windows" => LoginAuth::Windows,
            "external" => LoginAuth::External,
            other => {
                return Err(invalid(format!(
                    "login {}: auth '{}' is not one of password, windows, external",
                    name, other
                )))
            }
        };
        Ok(LoginSpec {
            name,
            auth,
            default_database: self.optional(node, "defaultDatabase")?,
            default_language: self.optional(node, "defaultLanguage")?,
            rotate_password: true,
        })
    }

    fn database(&self, node: &Node) -> Result<DatabaseManifest, ManifestError> {
        let mut db = DatabaseManifest {
            name: self.required(node, "name")?,
            ..Default::default()
        };

        for child in node.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "MasterKey" => {
                    if db.master_key.is_some() {
                        return Err(invalid(format!("database {} declares two master keys", db.name)));
                    }
                    db.master_key = Some(MasterKeySpec {
                        password: self.required(&child, "password")?,
                    });
                }
                "Credential" => db.credentials.push(CredentialSpec {
                    name: self.required(&child, "name")?,
                    identity: self.required(&child, "identity")?,
                    secret: self.optional(&child, "secret")?.unwrap_or_default(),
                }),
                "ExternalDataSource" => db.external_data_sources.push(ExternalDataSourceSpec {
                    name: self.required(&child, "name")?,
                    source_type: ExternalDataSourceType::parse(&self.required(&child, "type")?)
                        .map_err(|e| invalid(e.to_string()))?,
                    location: self.required(&child, "location")?,
                    database_name: self.optional(&child, "databaseName")?,
                    credential_name: self.optional(&child, "credential")?,
                }),
                "Role" => db.roles.push(RoleSpec {
                    name: self.required(&child, "name")?,
                    owner_name: self
                        .optional(&child, "owner")?
                        .unwrap_or_else(|| DEFAULT_OWNER.to_string()),
                }),
                "User" => db.users.push(self.user(&child)?),
                "Schema" => db.schemas.push(SchemaSpec {
                    name: self.required(&child, "name")?,
                    owner_name: self
                        .optional(&child, "owner")?
                        .unwrap_or_else(|| DEFAULT_OWNER.to_string()),
                }),
                "Permissions" => {
                    let grants = child
                        .children()
                        .filter(|n| n.has_tag_name("Grant"))
                        .map(|n| self.text(&n))
                        .collect::<Result<Vec<_>, _>>()?;
                    db.permissions
                        .push(PermissionsSpec::new(self.required(&child, "principal")?, grants));
                }
                "Script" => db.scripts.push(self.script(&child)?),
                other => {
                    return Err(invalid(format!(
                        "unexpected <{}> in database {}",
                        other, db.name
                    )))
                }
            }
        }
        Ok(db)
    }

    fn user(&self, node: &Node) -> Result<UserSpec, ManifestError> {
        let mut user = UserSpec::new(self.required(node, "name")?);
        user.login_name = self.optional(node, "login")?;
        user.password = self.optional(node, "password")?;
        user.object_id = self.optional(node, "objectId")?;
        user.external_type = node
            .attribute("type")
            .map(ExternalType::from_code)
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;
        if let Some(schema) = self.optional(node, "defaultSchema")? {
            user.default_schema = schema;
        }
        user.default_language = self.optional(node, "defaultLanguage")?;
        user.roles = node
            .children()
            .filter(|n| n.has_tag_name("Member"))
            .map(|n| self.required(&n, "role"))
            .collect::<Result<_, _>>()?;
        Ok(user)
    }

    fn script(&self, node: &Node) -> Result<ScriptSpec, ManifestError> {
        let script = match self.optional(node, "file")? {
            Some(file) => {
                let path: PathBuf = self.base_dir.join(file);
                std::fs::read_to_string(&path).map_err(|e| ManifestError::Read { path, source: e })?
            }
            None => node.text().unwrap_or("").to_string(),
        };
        if script.trim().is_empty() {
            return Err(invalid("<Script> needs a 'file' attribute or inline text"));
        }
        let verify = self
            .optional(node, "verify")?
            .filter(|target| !target.trim().is_empty())
            .map(|target| VerifyTarget::parse(&target))
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(ScriptSpec { script, verify })
    }
}
