//! Database session seam
//!
//! The engine never opens connections itself. Callers hand in something that
//! implements [`Session`]: it executes statement text with named parameters
//! and scans result rows into the driver-neutral [`Row`] representation.
//! Which database a call runs against is always explicit via [`SessionTarget`].

#[cfg(feature = "tds")]
pub mod tds;

use std::time::Instant;

use crate::error::SessionError;

/// Database-selection context of a single call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub database: String,
    /// Caller deadline for the call; `None` means no deadline
    pub deadline: Option<Instant>,
}

impl SessionTarget {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Scalar value exchanged with the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Named statement parameter, referenced as `@name` in the SQL text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub value: Value,
}

impl Param {
    pub fn new(name: &'static str, value: impl Into<Value>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// One result row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, index: usize, expected: &'static str) -> Result<&Value, SessionError> {
        self.values
            .get(index)
            .ok_or(SessionError::Column { index, expected })
    }

    pub fn int(&self, index: usize) -> Result<i32, SessionError> {
        match self.value(index, "int")? {
            Value::Int(v) => i32::try_from(*v).map_err(|_| SessionError::Column {
                index,
                expected: "int",
            }),
            _ => Err(SessionError::Column {
                index,
                expected: "int",
            }),
        }
    }

    pub fn text(&self, index: usize) -> Result<String, SessionError> {
        match self.value(index, "string")? {
            Value::Text(s) => Ok(s.clone()),
            _ => Err(SessionError::Column {
                index,
                expected: "string",
            }),
        }
    }

    /// String column where NULL reads as empty
    pub fn text_or_empty(&self, index: usize) -> Result<String, SessionError> {
        match self.value(index, "string")? {
            Value::Null => Ok(String::new()),
            _ => self.text(index),
        }
    }

    pub fn bytes(&self, index: usize) -> Result<Vec<u8>, SessionError> {
        match self.value(index, "binary")? {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Null => Ok(Vec::new()),
            _ => Err(SessionError::Column {
                index,
                expected: "binary",
            }),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, SessionError> {
        match self.value(index, "bit")? {
            Value::Bool(b) => Ok(*b),
            Value::Int(v) => Ok(*v != 0),
            _ => Err(SessionError::Column {
                index,
                expected: "bit",
            }),
        }
    }
}

/// Row callback handed to [`Session::query`]
pub type ScanFn<'a> = dyn FnMut(&Row) -> Result<(), SessionError> + 'a;

/// A live, authenticated connection capable of running parameterized
/// statements. One session serves one reconciliation call at a time.
pub trait Session {
    /// Execute statement text, discarding any result sets.
    fn execute(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        params: &[Param],
    ) -> Result<(), SessionError>;

    /// Run a query and feed every row of the first result set to `scan`.
    /// Returns the number of rows scanned.
    fn query(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        params: &[Param],
        scan: &mut ScanFn<'_>,
    ) -> Result<usize, SessionError>;

    /// Scan exactly the first row. Zero rows is [`SessionError::NoRows`].
    fn query_row(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        params: &[Param],
        scan: &mut ScanFn<'_>,
    ) -> Result<(), SessionError> {
        let mut seen = false;
        let mut first_only = |row: &Row| {
            if seen {
                return Ok(());
            }
            seen = true;
            scan(row)
        };
        self.query(target, sql, params, &mut first_only)?;
        if seen {
            Ok(())
        } else {
            Err(SessionError::NoRows)
        }
    }
}

impl<S: Session + ?Sized> Session for &mut S {
    fn execute(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        params: &[Param],
    ) -> Result<(), SessionError> {
        (**self).execute(target, sql, params)
    }

    fn query(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        params: &[Param],
        scan: &mut ScanFn<'_>,
    ) -> Result<usize, SessionError> {
        (**self).query(target, sql, params, scan)
    }
}
