//! Post-condition checks for raw scripts
//!
//! A verification target is written `KIND [schema.]name`, e.g.
//! `TABLE dbo.Users` or `PROC [app].[Load Orders]`. It is turned into an
//! object-exists query against the matching catalog view, and a script can be
//! checked up front for whether it declares the target at all.

use std::fmt;

use sqlparser::dialect::MsSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{ReconcileError, Result};
use crate::quote::{quote_nliteral, split_multipart};

/// Object kind a script can be verified against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyKind {
    Table,
    View,
    Procedure,
    Function,
    Schema,
    Trigger,
}

impl VerifyKind {
    pub fn parse(keyword: &str) -> Result<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "TABLE" => Ok(VerifyKind::Table),
            "VIEW" => Ok(VerifyKind::View),
            "PROCEDURE" | "PROC" => Ok(VerifyKind::Procedure),
            "FUNCTION" | "FUNC" => Ok(VerifyKind::Function),
            "SCHEMA" => Ok(VerifyKind::Schema),
            "TRIGGER" | "TRG" => Ok(VerifyKind::Trigger),
            _ => Err(ReconcileError::validation(
                "verification target",
                format!(
                    "'{}' is not one of TABLE, VIEW, PROCEDURE, FUNCTION, SCHEMA, TRIGGER",
                    keyword
                ),
            )),
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            VerifyKind::Table => "TABLE",
            VerifyKind::View => "VIEW",
            VerifyKind::Procedure => "PROCEDURE",
            VerifyKind::Function => "FUNCTION",
            VerifyKind::Schema => "SCHEMA",
            VerifyKind::Trigger => "TRIGGER",
        }
    }

    /// Whether `word` introduces this kind in DDL
    fn is_ddl_word(&self, word: &str) -> bool {
        word.eq_ignore_ascii_case(self.keyword())
            || (*self == VerifyKind::Procedure && word.eq_ignore_ascii_case("PROC"))
    }
}

/// `(kind, schema?, name)` of the object a script is expected to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyTarget {
    pub kind: VerifyKind,
    pub schema: Option<String>,
    pub name: String,
}

impl VerifyTarget {
    /// Parse `KIND name` or `KIND schema.name` (parts may be bracketed).
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        let malformed = || {
            ReconcileError::validation(
                "verification target",
                format!("expected 'KIND [schema.]name', got '{}'", target),
            )
        };

        let (keyword, rest) = target
            .split_once(char::is_whitespace)
            .ok_or_else(malformed)?;
        let rest = rest.trim();
        if rest.is_empty() || (!rest.contains('[') && rest.split_whitespace().count() != 1) {
            return Err(malformed());
        }

        let kind = VerifyKind::parse(keyword)?;
        let mut parts = split_multipart(rest)?;
        let name = parts.pop().ok_or_else(malformed)?;
        let schema = match (parts.pop(), parts.is_empty()) {
            (None, _) => None,
            (Some(schema), true) if kind != VerifyKind::Schema => Some(schema),
            _ => return Err(malformed()),
        };

        Ok(Self { kind, schema, name })
    }

    fn matches_name(&self, parts: &[String]) -> bool {
        let Some((name, qualifier)) = parts.split_last() else {
            return false;
        };
        if !name.eq_ignore_ascii_case(&self.name) {
            return false;
        }
        match (&self.schema, qualifier.last()) {
            (Some(expected), Some(found)) => expected.eq_ignore_ascii_case(found),
            // Unqualified DDL lands in the default schema, which is unknown here
            (Some(_), None) => true,
            (None, _) => true,
        }
    }
}

impl fmt::Display for VerifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{} {}.{}", self.kind.keyword(), schema, self.name),
            None => write!(f, "{} {}", self.kind.keyword(), self.name),
        }
    }
}

/// Query returning a row when the target exists. No target yields
/// `SELECT 1`, which always succeeds.
pub fn exists_query(target: Option<&VerifyTarget>) -> Result<String> {
    let Some(target) = target else {
        return Ok("SELECT 1".to_string());
    };

    let name = quote_nliteral(&target.name)?;
    let (source, filter) = match target.kind {
        VerifyKind::Table => ("sys.tables o", None),
        VerifyKind::View => ("sys.views o", None),
        VerifyKind::Procedure => ("sys.procedures o", None),
        VerifyKind::Function => ("sys.objects o", Some("o.type IN ('FN', 'IF', 'TF')")),
        VerifyKind::Schema => {
            return Ok(format!("SELECT 1 FROM sys.schemas o WHERE o.name = {}", name));
        }
        VerifyKind::Trigger => ("sys.triggers o", None),
    };

    let mut sql = format!("SELECT 1 FROM {}", source);
    if let Some(schema) = &target.schema {
        // Triggers take the schema of their parent object
        if target.kind == VerifyKind::Trigger {
            sql.push_str(" INNER JOIN sys.objects p ON o.parent_id = p.object_id");
            sql.push_str(" INNER JOIN sys.schemas s ON p.schema_id = s.schema_id");
        } else {
            sql.push_str(" INNER JOIN sys.schemas s ON o.schema_id = s.schema_id");
        }
        sql.push_str(&format!(" WHERE o.name = {} AND s.name = {}", name, quote_nliteral(schema)?));
    } else {
        sql.push_str(&format!(" WHERE o.name = {}", name));
    }
    if let Some(filter) = filter {
        sql.push_str(" AND ");
        sql.push_str(filter);
    }
    Ok(sql)
}

/// Whether `script` contains `CREATE`, `ALTER` or `CREATE OR ALTER` of the
/// target object.
pub fn script_declares(script: &str, target: &VerifyTarget) -> Result<bool> {
    let mut scanner = DeclarationScanner::new(script)?;
    while !scanner.is_at_end() {
        if let Some(parts) = scanner.declaration_of(target.kind) {
            if target.matches_name(&parts) {
                return Ok(true);
            }
        } else {
            scanner.advance();
        }
    }
    Ok(false)
}

/// Token walker over a script, skipping whitespace and comments
struct DeclarationScanner {
    tokens: Vec<Token>,
    pos: usize,
}

impl DeclarationScanner {
    fn new(script: &str) -> Result<Self> {
        let dialect = MsSqlDialect {};
        let tokens = Tokenizer::new(&dialect, script).tokenize().map_err(|e| {
            ReconcileError::validation("script", format!("cannot be tokenized: {}", e))
        })?;
        Ok(Self { tokens, pos: 0 })
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.tokens.get(self.pos), Some(Token::Whitespace(_))) {
            self.pos += 1;
        }
    }

    fn check_word_ci(&self, word: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Word(w)) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(word))
    }

    fn expect_word_ci(&mut self, word: &str) -> bool {
        if self.check_word_ci(word) {
            self.advance();
            self.skip_whitespace();
            true
        } else {
            false
        }
    }

    /// At `CREATE | ALTER | CREATE OR ALTER <kind> <name>`, consumes it and
    /// returns the name parts. Otherwise leaves the position unchanged.
    fn declaration_of(&mut self, kind: VerifyKind) -> Option<Vec<String>> {
        let start = self.pos;
        let parts = self.try_declaration(kind);
        if parts.is_none() {
            self.pos = start;
        }
        parts
    }

    fn try_declaration(&mut self, kind: VerifyKind) -> Option<Vec<String>> {
        if self.expect_word_ci("CREATE") {
            if self.expect_word_ci("OR") && !self.expect_word_ci("ALTER") {
                return None;
            }
        } else if !self.expect_word_ci("ALTER") {
            return None;
        }

        match self.tokens.get(self.pos) {
            Some(Token::Word(w)) if w.quote_style.is_none() && kind.is_ddl_word(&w.value) => {}
            _ => return None,
        }
        self.advance();
        self.skip_whitespace();
        self.parse_multipart_name()
    }

    fn parse_multipart_name(&mut self) -> Option<Vec<String>> {
        let mut parts = Vec::new();
        loop {
            match self.tokens.get(self.pos) {
                Some(Token::Word(w)) => parts.push(w.value.clone()),
                _ => return None,
            }
            self.advance();
            if matches!(self.tokens.get(self.pos), Some(Token::Period)) {
                self.advance();
            } else {
                return Some(parts);
            }
        }
    }
}
