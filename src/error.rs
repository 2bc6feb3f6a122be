//! Error types for rust-sqlsecurity

use std::path::PathBuf;
use thiserror::Error;

use crate::model::{ObjectKind, Operation};

/// Result alias used throughout the reconciliation engine
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

/// Errors reported by a [`Session`](crate::session::Session) implementation
#[derive(Error, Debug)]
pub enum SessionError {
    /// The query completed but produced no rows
    #[error("query returned no rows")]
    NoRows,

    #[error("database driver error: {message}")]
    Driver { message: String },

    #[error("deadline exceeded while talking to database [{database}]")]
    Timeout { database: String },

    #[error("column {index} is not a {expected}")]
    Column { index: usize, expected: &'static str },
}

impl SessionError {
    pub fn is_no_rows(&self) -> bool {
        matches!(self, SessionError::NoRows)
    }
}

#[cfg(feature = "tds")]
impl From<tiberius::error::Error> for SessionError {
    fn from(err: tiberius::error::Error) -> Self {
        SessionError::Driver {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "tds")]
impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Driver {
            message: err.to_string(),
        }
    }
}

/// Errors that can occur while reading, synthesizing or applying object state
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The object (or its parent database) does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error("cannot create {kind} {name}: it already exists")]
    AlreadyExists { kind: ObjectKind, name: String },

    /// Malformed synthesis input: bad identifier, ambiguous identity binding,
    /// malformed verification target
    #[error("invalid {subject}: {message}")]
    Validation { subject: String, message: String },

    /// The server rejected a statement or a catalog query failed
    #[error("unable to {operation} {kind} {name}")]
    Execution {
        operation: Operation,
        kind: ObjectKind,
        name: String,
        #[source]
        source: SessionError,
    },

    #[error("ambiguous state for {kind} {name}: {message}")]
    AmbiguousState {
        kind: ObjectKind,
        name: String,
        message: String,
    },
}

impl ReconcileError {
    pub fn validation(subject: impl Into<String>, message: impl Into<String>) -> Self {
        ReconcileError::Validation {
            subject: subject.into(),
            message: message.into(),
        }
    }

    pub fn execution(
        operation: Operation,
        kind: ObjectKind,
        name: impl Into<String>,
        source: SessionError,
    ) -> Self {
        ReconcileError::Execution {
            operation,
            kind,
            name: name.into(),
            source,
        }
    }

    /// True for the expected "object is absent" signal
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound { .. })
    }
}

/// Errors raised while loading a desired-state manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest file: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("Invalid manifest: {message}")]
    Invalid { message: String },
}
