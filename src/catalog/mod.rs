//! Catalog reader
//!
//! Read-only queries against the system views that materialize the current
//! state of one named object. Absence is `Ok(None)`; anything else the
//! session reports is wrapped as a read failure for that object.
//!
//! All values travel as named parameters. Identifiers only reach the query
//! text when a catalog view has to be qualified with its database, which
//! happens when the dialect allows cross-database names.

mod objects;
mod principals;

use std::time::Instant;

use crate::dialect::Capabilities;
use crate::error::{ReconcileError, Result, SessionError};
use crate::model::{ObjectKey, ObjectKind, Operation, MASTER_DATABASE};
use crate::quote::quote_ident;
use crate::session::{Param, Row, Session, SessionTarget};

/// The server's `@@VERSION` banner, read before capabilities are known
pub fn version_banner(session: &mut dyn Session, deadline: Option<Instant>) -> Result<String> {
    let target = SessionTarget::new(MASTER_DATABASE).with_deadline(deadline);
    let mut banner = String::new();
    session
        .query_row(&target, "SELECT @@VERSION", &[], &mut |row: &Row| -> Result<(), SessionError> {
            banner = row.text(0)?;
            Ok(())
        })
        .map_err(|e| ReconcileError::execution(Operation::Read, ObjectKind::Database, MASTER_DATABASE, e))?;
    Ok(banner)
}

/// Catalog access bound to one session for the duration of a call
pub struct Catalog<'a> {
    session: &'a mut dyn Session,
    caps: Capabilities,
    deadline: Option<Instant>,
}

impl<'a> Catalog<'a> {
    pub fn new(session: &'a mut dyn Session, caps: Capabilities, deadline: Option<Instant>) -> Self {
        Self {
            session,
            caps,
            deadline,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn target(&self, database: &str) -> SessionTarget {
        SessionTarget::new(database).with_deadline(self.deadline)
    }

    /// `[db].[sys].[view]` where cross-database names work, `[sys].[view]`
    /// otherwise (the session target already selects the database).
    fn sys_view(&self, database: &str, view: &str) -> Result<String> {
        if self.caps.supports_cross_database_qualified_names() {
            Ok(format!("{}.[sys].[{}]", quote_ident(database)?, view))
        } else {
            Ok(format!("[sys].[{}]", view))
        }
    }

    /// Comma-separated `QUOTENAME` list of `column` over `from`, never NULL
    fn name_aggregate(&self, column: &str, from: &str) -> String {
        if self.caps.supports_string_agg() {
            format!(
                "COALESCE((SELECT STRING_AGG(CONVERT(nvarchar(max), QUOTENAME({})), ',') {}), N'')",
                column, from
            )
        } else {
            format!(
                "COALESCE(STUFF((SELECT ',' + QUOTENAME({}) {} FOR XML PATH(''), TYPE).value('.', 'nvarchar(max)'), 1, 1, ''), N'')",
                column, from
            )
        }
    }

    /// First row converted by `convert`, or `None` when the query is empty
    fn read_one<T>(
        &mut self,
        kind: ObjectKind,
        key: &ObjectKey,
        database: &str,
        sql: &str,
        params: &[Param],
        mut convert: impl FnMut(&Row) -> Result<T, SessionError>,
    ) -> Result<Option<T>> {
        let target = self.target(database);
        let mut found = None;
        let mut scan = |row: &Row| -> Result<(), SessionError> {
            found = Some(convert(row)?);
            Ok(())
        };
        match self.session.query_row(&target, sql, params, &mut scan) {
            Ok(()) => Ok(found),
            Err(e) if e.is_no_rows() => Ok(None),
            Err(e) => Err(ReconcileError::execution(Operation::Read, kind, key.qualified_name(), e)),
        }
    }

    /// Every row converted by `convert`
    fn read_all<T>(
        &mut self,
        kind: ObjectKind,
        key: &ObjectKey,
        database: &str,
        sql: &str,
        params: &[Param],
        mut convert: impl FnMut(&Row) -> Result<T, SessionError>,
    ) -> Result<Vec<T>> {
        let target = self.target(database);
        let mut rows = Vec::new();
        let mut scan = |row: &Row| -> Result<(), SessionError> {
            rows.push(convert(row)?);
            Ok(())
        };
        self.session
            .query(&target, sql, params, &mut scan)
            .map_err(|e| ReconcileError::execution(Operation::Read, kind, key.qualified_name(), e))?;
        Ok(rows)
    }

    /// Whether `database` exists, checked from `master` so a missing database
    /// is never connected to.
    pub fn database_exists(&mut self, database: &str) -> Result<bool> {
        let key = ObjectKey::server(database);
        let found = self.read_one(
            ObjectKind::Database,
            &key,
            MASTER_DATABASE,
            "SELECT 1 FROM [sys].[databases] WHERE [name] = @database",
            &[Param::new("database", database)],
            |_| Ok(()),
        )?;
        Ok(found.is_some())
    }

    /// Name of the session's own database principal, the recipient of
    /// ownership reassigned before a drop.
    pub fn current_user(&mut self, database: &str) -> Result<String> {
        let key = ObjectKey::new(database, "USER_NAME()");
        self.read_one(ObjectKind::User, &key, database, "SELECT USER_NAME()", &[], |row| {
            row.text(0)
        })?
        .ok_or_else(|| ReconcileError::AmbiguousState {
            kind: ObjectKind::User,
            name: key.qualified_name(),
            message: "USER_NAME() returned no row".to_string(),
        })
    }

    /// Runs a synthesized object-exists query; any row means the object exists.
    pub fn object_exists(&mut self, kind: ObjectKind, key: &ObjectKey, sql: &str) -> Result<bool> {
        let target = self.target(&key.database);
        match self.session.query_row(&target, sql, &[], &mut |_: &Row| Ok(())) {
            Ok(()) => Ok(true),
            Err(e) if e.is_no_rows() => Ok(false),
            Err(e) => Err(ReconcileError::execution(Operation::Verify, kind, key.qualified_name(), e)),
        }
    }
}
