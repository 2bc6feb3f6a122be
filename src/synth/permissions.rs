//! Database-level GRANT / REVOKE

use std::collections::BTreeSet;

use super::{set_delta, Statement, Synthesizer};
use crate::error::Result;
use crate::model::PermissionsSpec;
use crate::quote::{quote_ident, validate_permission_keyword};

/// Granted to every user on creation and revoked by dropping it; never diffed.
pub const IMPLICIT_PERMISSION: &str = "CONNECT";

fn managed(permissions: &BTreeSet<String>) -> BTreeSet<String> {
    permissions
        .iter()
        .filter(|p| !p.eq_ignore_ascii_case(IMPLICIT_PERMISSION))
        .cloned()
        .collect()
}

impl Synthesizer {
    /// Revokes what is no longer desired, then grants what is missing.
    ///
    /// Permissions in `grantable` were granted WITH GRANT OPTION; the server
    /// refuses to revoke those without CASCADE.
    pub fn permission_changes(
        &self,
        principal: &str,
        current: &BTreeSet<String>,
        grantable: &BTreeSet<String>,
        desired: &BTreeSet<String>,
    ) -> Result<Vec<Statement>> {
        let principal = quote_ident(principal)?;
        let current = managed(current);
        let desired = managed(desired);
        let delta = set_delta(&current, &desired);

        let mut statements = Vec::with_capacity(delta.len());
        for permission in &delta.to_remove {
            validate_permission_keyword(permission)?;
            let cascade = if grantable.iter().any(|g| g.eq_ignore_ascii_case(permission)) {
                " CASCADE"
            } else {
                ""
            };
            statements.push(Statement::new(format!(
                "REVOKE {} FROM {}{}",
                permission, principal, cascade
            )));
        }
        for permission in &delta.to_add {
            validate_permission_keyword(permission)?;
            statements.push(Statement::new(format!("GRANT {} TO {}", permission, principal)));
        }
        Ok(statements)
    }

    pub fn grant_permissions(&self, desired: &PermissionsSpec) -> Result<Vec<Statement>> {
        self.permission_changes(
            &desired.principal_name,
            &BTreeSet::new(),
            &BTreeSet::new(),
            &desired.permissions,
        )
    }

    pub fn revoke_permissions(
        &self,
        principal: &str,
        current: &BTreeSet<String>,
        grantable: &BTreeSet<String>,
    ) -> Result<Vec<Statement>> {
        self.permission_changes(principal, current, grantable, &BTreeSet::new())
    }
}
