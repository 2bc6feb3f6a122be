//! Raw SQL scripts
//!
//! A script is split into `GO` batches and executed batch by batch. Its
//! identity is the SHA-256 digest of the text: an update re-runs the script
//! only when the digest changed. A script cannot be un-run, so delete always
//! preserves.

use tracing::{debug, info, instrument, warn};

use super::{Deleted, Reconciler, Refreshed};
use crate::error::{ReconcileError, Result};
use crate::model::{ObjectKey, ObjectKind, Operation, ScriptExecutionResult, ScriptSpec};
use crate::session::Session;
use crate::synth::{exists_query, script_declares, Statement, VerifyTarget};
use crate::util::{script_digest, split_batches};

const UNVERIFIED_SCRIPT: &str = "script";

/// Result of [`Reconciler::update_script`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Executed(ScriptExecutionResult),
    /// Digest unchanged; nothing ran
    Unchanged,
    /// The parent database does not exist
    Gone,
}

fn script_key(database: &str, target: Option<&VerifyTarget>) -> ObjectKey {
    match target {
        Some(target) => ObjectKey::new(database, target.to_string()),
        None => ObjectKey::new(database, UNVERIFIED_SCRIPT),
    }
}

impl<S: Session> Reconciler<S> {
    /// Run every batch of the script, then check its verification target.
    ///
    /// A script that never declares its verification target is rejected
    /// before anything runs.
    #[instrument(skip_all, fields(database = %database))]
    pub fn run_script(&mut self, database: &str, spec: &ScriptSpec) -> Result<ScriptExecutionResult> {
        let key = script_key(database, spec.verify.as_ref());
        if let Some(target) = &spec.verify {
            if !script_declares(&spec.script, target)? {
                return Err(ReconcileError::validation(
                    format!("script for {}", target),
                    "does not create or alter the verification target",
                ));
            }
        }
        if !self.parent_exists(&key)? {
            return Err(ReconcileError::NotFound {
                kind: ObjectKind::Database,
                name: format!("[{}]", database),
            });
        }

        let batches: Vec<Statement> = split_batches(&spec.script)
            .into_iter()
            .map(Statement::new)
            .collect();
        let digest = script_digest(&spec.script);
        debug!(batches = batches.len(), %digest, "Running script");
        self.execute(ObjectKind::Script, Operation::Create, &key, database, &batches)?;

        let verified = match &spec.verify {
            Some(target) => {
                let found = self.verify_target(database, target)?;
                if !found {
                    warn!(target = %target, "Script ran but its verification target is missing");
                }
                Some(found)
            }
            None => None,
        };
        info!(batches = batches.len(), "Script executed");
        Ok(ScriptExecutionResult {
            digest,
            batches: batches.len(),
            verified,
        })
    }

    /// Present when the parent database exists and the verification target
    /// (if any) is found.
    pub fn verify_script(&mut self, database: &str, target: Option<&VerifyTarget>) -> Result<Refreshed<()>> {
        let key = script_key(database, target);
        if !self.parent_exists(&key)? {
            return Ok(Refreshed::Gone);
        }
        match target {
            Some(target) if !self.verify_target(database, target)? => Ok(Refreshed::Gone),
            _ => Ok(Refreshed::Present(())),
        }
    }

    /// Re-run the script when its digest differs from `previous_digest`
    pub fn update_script(
        &mut self,
        database: &str,
        previous_digest: &str,
        spec: &ScriptSpec,
    ) -> Result<ScriptOutcome> {
        let key = script_key(database, spec.verify.as_ref());
        if !self.parent_exists(&key)? {
            return Ok(ScriptOutcome::Gone);
        }
        if script_digest(&spec.script).eq_ignore_ascii_case(previous_digest) {
            debug!(%database, "Script digest unchanged");
            return Ok(ScriptOutcome::Unchanged);
        }
        Ok(ScriptOutcome::Executed(self.run_script(database, spec)?))
    }

    /// Scripts are never reverted
    pub fn delete_script(&mut self, database: &str) -> Result<Deleted> {
        if !self.parent_exists(&script_key(database, None))? {
            return Ok(Deleted::Gone);
        }
        Ok(Deleted::Preserved)
    }

    fn verify_target(&mut self, database: &str, target: &VerifyTarget) -> Result<bool> {
        let sql = exists_query(Some(target))?;
        let key = script_key(database, Some(target));
        self.catalog().object_exists(ObjectKind::Script, &key, &sql)
    }
}
