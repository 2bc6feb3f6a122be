//! Reconciler
//!
//! Drives one object through existence check, current-state read, statement
//! synthesis, execution and read-back. Four terminal operations exist per
//! object kind: [`Reconciler::ensure_created`], [`Reconciler::refresh`],
//! [`Reconciler::ensure_updated`] and [`Reconciler::delete`]. Each call
//! re-reads ground truth; nothing is cached between calls.
//!
//! Every operation first checks the parent database. A missing database makes
//! the object absent: refresh, update and delete report [`Refreshed::Gone`],
//! [`Updated::Gone`] and [`Deleted::Gone`] instead of failing.

mod kinds;
mod script;

pub use kinds::{
    Credentials, ExternalDataSources, Logins, ManagedObject, MasterKeys, Permissions, Roles,
    Schemas, Users,
};
pub use script::ScriptOutcome;

use std::marker::PhantomData;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::catalog::Catalog;
use crate::dialect::Capabilities;
use crate::error::{ReconcileError, Result};
use crate::model::{ObjectKey, ObjectKind, Operation, MASTER_DATABASE};
use crate::session::{Session, SessionTarget};
use crate::synth::{Statement, Synthesizer};

/// Result of [`Reconciler::refresh`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refreshed<T> {
    Present(T),
    /// The object or its parent database no longer exists
    Gone,
}

impl<T> Refreshed<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Refreshed::Present(entity) => Some(entity),
            Refreshed::Gone => None,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Refreshed::Gone)
    }
}

/// Entity read back after statements were applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    pub entity: T,
    /// Statements executed, in order; empty when already converged
    pub statements: Vec<Statement>,
}

/// Result of [`Reconciler::ensure_updated`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Updated<T> {
    Applied(Applied<T>),
    Gone,
}

/// Result of [`Reconciler::delete`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deleted {
    Dropped { statements: Vec<Statement> },
    /// Nothing to drop; deletion is idempotent
    AlreadyAbsent,
    /// The caller asked to keep the object
    Preserved,
    /// The parent database does not exist
    Gone,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Leave the object in place for manual cleanup
    pub preserve: bool,
}

impl DeleteOptions {
    pub fn preserve() -> Self {
        Self { preserve: true }
    }
}

/// Reconciliation engine over one session
pub struct Reconciler<S> {
    session: S,
    caps: Capabilities,
    deadline: Option<Instant>,
}

impl<S: Session> Reconciler<S> {
    /// Resolve the server dialect from `@@VERSION` and bind to `session`.
    pub fn connect(mut session: S) -> Result<Self> {
        let banner = crate::catalog::version_banner(&mut session, None)?;
        let caps = Capabilities::resolve(&banner)?;
        info!(edition = ?caps.edition(), major_version = caps.major_version(), "Resolved server dialect");
        Ok(Self::with_capabilities(session, caps))
    }

    pub fn with_capabilities(session: S, caps: Capabilities) -> Self {
        Self {
            session,
            caps,
            deadline: None,
        }
    }

    /// Deadline applied to every catalog read and statement
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Some(Instant::now() + timeout))
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn synthesizer(&self) -> Synthesizer {
        Synthesizer::new(self.caps)
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    pub fn catalog(&mut self) -> Catalog<'_> {
        Catalog::new(&mut self.session, self.caps, self.deadline)
    }

    /// Per-kind view exposing exists/get/create/update/delete
    pub fn objects<K: ManagedObject>(&mut self) -> Objects<'_, S, K> {
        Objects {
            reconciler: self,
            kind: PhantomData,
        }
    }

    fn parent_exists(&mut self, key: &ObjectKey) -> Result<bool> {
        if key.database.eq_ignore_ascii_case(MASTER_DATABASE) {
            return Ok(true);
        }
        self.catalog().database_exists(&key.database)
    }

    fn execute(
        &mut self,
        kind: ObjectKind,
        operation: Operation,
        key: &ObjectKey,
        database: &str,
        statements: &[Statement],
    ) -> Result<()> {
        let target = SessionTarget::new(database).with_deadline(self.deadline);
        for statement in statements {
            debug!(%kind, object = %key, sql = %statement.display(), "Executing statement");
            self.session
                .execute(&target, &statement.sql, &[])
                .map_err(|e| ReconcileError::execution(operation, kind, key.qualified_name(), e))?;
        }
        Ok(())
    }

    fn read_back<K: ManagedObject>(&mut self, key: &ObjectKey, operation: Operation) -> Result<K::Current> {
        match K::read(&mut self.catalog(), key)? {
            Some(entity) => Ok(entity),
            None => {
                warn!(kind = %K::KIND, object = %key, %operation, "Object missing after apply");
                Err(ReconcileError::AmbiguousState {
                    kind: K::KIND,
                    name: key.qualified_name(),
                    message: format!("not found after {}", operation),
                })
            }
        }
    }

    fn check_name<K: ManagedObject>(key: &ObjectKey, desired: &K::Desired) -> Result<()> {
        let declared = K::desired_name(desired);
        if declared.eq_ignore_ascii_case(&key.name) {
            Ok(())
        } else {
            Err(ReconcileError::validation(
                format!("{} {}", K::KIND, key.qualified_name()),
                format!("declared name '{}' does not match the key", declared),
            ))
        }
    }

    /// Current state, or `Gone` when the object or its database is absent
    #[instrument(skip_all, fields(kind = %K::KIND, object = %key))]
    pub fn refresh<K: ManagedObject>(&mut self, key: &ObjectKey) -> Result<Refreshed<K::Current>> {
        if !self.parent_exists(key)? {
            info!("Parent database not found");
            return Ok(Refreshed::Gone);
        }
        match K::read(&mut self.catalog(), key)? {
            Some(entity) => Ok(Refreshed::Present(entity)),
            None => {
                info!("Object not found");
                Ok(Refreshed::Gone)
            }
        }
    }

    pub fn exists<K: ManagedObject>(&mut self, key: &ObjectKey) -> Result<bool> {
        Ok(!self.refresh::<K>(key)?.is_gone())
    }

    pub fn get<K: ManagedObject>(&mut self, key: &ObjectKey) -> Result<Option<K::Current>> {
        Ok(self.refresh::<K>(key)?.into_option())
    }

    /// Create the object; a present object is [`ReconcileError::AlreadyExists`].
    #[instrument(skip_all, fields(kind = %K::KIND, object = %key))]
    pub fn ensure_created<K: ManagedObject>(
        &mut self,
        key: &ObjectKey,
        desired: &K::Desired,
    ) -> Result<Applied<K::Current>> {
        Self::check_name::<K>(key, desired)?;
        if !self.parent_exists(key)? {
            return Err(ReconcileError::NotFound {
                kind: ObjectKind::Database,
                name: format!("[{}]", key.database),
            });
        }
        if K::read(&mut self.catalog(), key)?.is_some() {
            return Err(ReconcileError::AlreadyExists {
                kind: K::KIND,
                name: key.qualified_name(),
            });
        }

        let statements = K::plan_create(&self.synthesizer(), desired)?;
        self.execute(K::KIND, Operation::Create, key, K::execution_database(key), &statements)?;
        let entity = self.read_back::<K>(key, Operation::Create)?;
        info!(statements = statements.len(), "Created");
        Ok(Applied { entity, statements })
    }

    /// Converge an existing object to `desired`
    #[instrument(skip_all, fields(kind = %K::KIND, object = %key))]
    pub fn ensure_updated<K: ManagedObject>(
        &mut self,
        key: &ObjectKey,
        desired: &K::Desired,
    ) -> Result<Updated<K::Current>> {
        Self::check_name::<K>(key, desired)?;
        let current = match self.refresh::<K>(key)? {
            Refreshed::Present(current) => current,
            Refreshed::Gone => return Ok(Updated::Gone),
        };

        let statements = K::plan_update(&self.synthesizer(), &current, desired)?;
        if statements.is_empty() {
            debug!("Already converged");
            return Ok(Updated::Applied(Applied {
                entity: current,
                statements,
            }));
        }

        self.execute(K::KIND, Operation::Update, key, K::execution_database(key), &statements)?;
        let entity = self.read_back::<K>(key, Operation::Update)?;
        info!(statements = statements.len(), "Updated");
        Ok(Updated::Applied(Applied { entity, statements }))
    }

    /// Drop the object, reassigning anything it owns first
    #[instrument(skip_all, fields(kind = %K::KIND, object = %key))]
    pub fn delete<K: ManagedObject>(&mut self, key: &ObjectKey, options: DeleteOptions) -> Result<Deleted> {
        if !self.parent_exists(key)? {
            info!("Parent database not found");
            return Ok(Deleted::Gone);
        }
        if options.preserve {
            info!("Preserved on removal");
            return Ok(Deleted::Preserved);
        }

        let current = match K::read(&mut self.catalog(), key)? {
            Some(current) => current,
            None => {
                info!("Already absent");
                return Ok(Deleted::AlreadyAbsent);
            }
        };

        let synth = self.synthesizer();
        let statements = K::plan_delete(&mut self.catalog(), &synth, key, &current)?;
        self.execute(K::KIND, Operation::Delete, key, K::execution_database(key), &statements)?;
        info!(statements = statements.len(), "Dropped");
        Ok(Deleted::Dropped { statements })
    }
}

/// Typed per-kind handle over a [`Reconciler`]
pub struct Objects<'r, S, K> {
    reconciler: &'r mut Reconciler<S>,
    kind: PhantomData<K>,
}

impl<S: Session, K: ManagedObject> Objects<'_, S, K> {
    pub fn exists(&mut self, key: &ObjectKey) -> Result<bool> {
        self.reconciler.exists::<K>(key)
    }

    pub fn get(&mut self, key: &ObjectKey) -> Result<Option<K::Current>> {
        self.reconciler.get::<K>(key)
    }

    pub fn create(&mut self, key: &ObjectKey, desired: &K::Desired) -> Result<K::Current> {
        Ok(self.reconciler.ensure_created::<K>(key, desired)?.entity)
    }

    /// `Ok(None)` when the object is gone
    pub fn update(&mut self, key: &ObjectKey, desired: &K::Desired) -> Result<Option<K::Current>> {
        match self.reconciler.ensure_updated::<K>(key, desired)? {
            Updated::Applied(applied) => Ok(Some(applied.entity)),
            Updated::Gone => Ok(None),
        }
    }

    pub fn delete(&mut self, key: &ObjectKey, options: DeleteOptions) -> Result<Deleted> {
        self.reconciler.delete::<K>(key, options)
    }
}
