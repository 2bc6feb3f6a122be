//! Statement synthesis
//!
//! Turns a desired-state entity (and, for updates, its current-state
//! counterpart) into the ordered statements that converge the two. All
//! branching on server features goes through the [`Capabilities`] the
//! synthesizer was built with, and every name or value spliced into statement
//! text goes through [`crate::quote`].

mod membership;
mod objects;
mod permissions;
mod principals;
mod verify;

pub use membership::{set_delta, SetDelta, PUBLIC_ROLE};
pub use permissions::IMPLICIT_PERMISSION;
pub use verify::{exists_query, script_declares, VerifyKind, VerifyTarget};

use std::fmt;

use crate::dialect::Capabilities;
use crate::error::Result;
use crate::quote::{quote_ident, quote_nliteral};

const REDACTED_LITERAL: &str = "N'********'";

/// One generated statement, executed as its own batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    /// Rendering with secrets masked, when the statement carries one
    redacted: Option<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            redacted: None,
        }
    }

    /// A statement embedding `secret`; logs and plans show it masked
    fn with_secret(sql: String, secret: &str) -> Result<Self> {
        let quoted = quote_nliteral(secret)?;
        let redacted = sql.replace(&quoted, REDACTED_LITERAL);
        Ok(Self {
            sql,
            redacted: Some(redacted),
        })
    }

    /// Text safe to log or print
    pub fn display(&self) -> &str {
        self.redacted.as_deref().unwrap_or(&self.sql)
    }

    pub fn contains_secret(&self) -> bool {
        self.redacted.is_some()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

/// Builds statements for one server dialect
#[derive(Debug, Clone, Copy)]
pub struct Synthesizer {
    caps: Capabilities,
}

impl Synthesizer {
    pub fn new(caps: Capabilities) -> Self {
        Self { caps }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// `ALTER AUTHORIZATION` statements moving every owned role, then every
    /// owned schema, to `new_owner`
    pub fn reassign_ownership(
        &self,
        owned: &crate::model::OwnedObjects,
        new_owner: &str,
    ) -> Result<Vec<Statement>> {
        let owner = quote_ident(new_owner)?;
        let mut statements = Vec::with_capacity(owned.len());
        for role in &owned.roles {
            statements.push(Statement::new(format!(
                "ALTER AUTHORIZATION ON ROLE::{} TO {}",
                quote_ident(role)?,
                owner
            )));
        }
        for schema in &owned.schemas {
            statements.push(Statement::new(format!(
                "ALTER AUTHORIZATION ON SCHEMA::{} TO {}",
                quote_ident(schema)?,
                owner
            )));
        }
        Ok(statements)
    }
}

/// `DEFAULT_LANGUAGE` value: a quoted language name, or `NONE` when unset
fn language_clause(language: Option<&str>) -> Result<String> {
    match language.filter(|l| !l.is_empty()) {
        Some(language) => Ok(format!("DEFAULT_LANGUAGE = {}", quote_ident(language)?)),
        None => Ok("DEFAULT_LANGUAGE = NONE".to_string()),
    }
}
