//! Set difference for many-to-many edges (role membership, granted permissions)

use std::collections::{BTreeMap, BTreeSet};

use super::{Statement, Synthesizer};
use crate::error::Result;
use crate::quote::quote_ident;

/// Every principal is implicitly a member of `public`; it is never diffed.
pub const PUBLIC_ROLE: &str = "public";

/// Changes that turn a current set into a desired set. Names compare
/// case-insensitively, matching the default catalog collation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDelta<'a> {
    pub to_remove: Vec<&'a str>,
    pub to_add: Vec<&'a str>,
}

impl SetDelta<'_> {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_remove.len() + self.to_add.len()
    }
}

/// `to_remove = current - desired`, `to_add = desired - current`, both sorted.
pub fn set_delta<'a>(current: &'a BTreeSet<String>, desired: &'a BTreeSet<String>) -> SetDelta<'a> {
    let current = fold(current);
    let desired = fold(desired);
    SetDelta {
        to_remove: current
            .iter()
            .filter(|(key, _)| !desired.contains_key(*key))
            .map(|(_, name)| *name)
            .collect(),
        to_add: desired
            .iter()
            .filter(|(key, _)| !current.contains_key(*key))
            .map(|(_, name)| *name)
            .collect(),
    }
}

fn fold(names: &BTreeSet<String>) -> BTreeMap<String, &str> {
    names
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| (name.to_lowercase(), name.as_str()))
        .collect()
}

/// Drops `public` from a membership set
pub(crate) fn without_public(roles: &BTreeSet<String>) -> BTreeSet<String> {
    roles
        .iter()
        .filter(|role| !role.eq_ignore_ascii_case(PUBLIC_ROLE))
        .cloned()
        .collect()
}

impl Synthesizer {
    /// One `ALTER ROLE` per membership change for `member`, removals first.
    pub fn membership_changes(
        &self,
        member: &str,
        current: &BTreeSet<String>,
        desired: &BTreeSet<String>,
    ) -> Result<Vec<Statement>> {
        let current = without_public(current);
        let desired = without_public(desired);
        let delta = set_delta(&current, &desired);
        let member = quote_ident(member)?;

        let mut statements = Vec::with_capacity(delta.len());
        for role in &delta.to_remove {
            statements.push(Statement::new(format!(
                "ALTER ROLE {} DROP MEMBER {}",
                quote_ident(role)?,
                member
            )));
        }
        for role in &delta.to_add {
            statements.push(Statement::new(format!(
                "ALTER ROLE {} ADD MEMBER {}",
                quote_ident(role)?,
                member
            )));
        }
        Ok(statements)
    }
}
