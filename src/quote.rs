//! Identifier and literal quoting for dynamically built T-SQL.
//!
//! Every name or string value that ends up inside generated statement text
//! passes through this module. Identifiers are bracket-delimited with embedded
//! `]` doubled, literals are `N'...'` with embedded `'` doubled. Input that
//! cannot be represented safely (control characters, over-long names) is
//! rejected with a validation error instead of being passed through.
//!
//! ```ignore
//! assert_eq!(quote_ident("sales")?, "[sales]");
//! assert_eq!(quote_ident("odd]name")?, "[odd]]name]");
//! assert_eq!(quote_nliteral("it's")?, "N'it''s'");
//! ```

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ReconcileError, Result};

/// Maximum length of a `sysname` identifier
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Permission keywords are spliced in verbatim, so they are restricted to
/// upper-case words separated by single spaces.
static PERMISSION_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]+( [A-Z]+)*$").unwrap());

/// Validates that `ident` can be safely bracket-quoted.
pub fn validate_identifier(ident: &str) -> Result<()> {
    if ident.is_empty() {
        return Err(ReconcileError::validation("identifier", "must not be empty"));
    }
    if ident.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ReconcileError::validation(
            "identifier",
            format!(
                "'{}...' exceeds {} characters",
                ident.chars().take(16).collect::<String>(),
                MAX_IDENTIFIER_LEN
            ),
        ));
    }
    if let Some(c) = ident.chars().find(|c| c.is_control()) {
        return Err(ReconcileError::validation(
            "identifier",
            format!("contains control character U+{:04X}", c as u32),
        ));
    }
    Ok(())
}

/// Wraps an identifier in brackets, doubling any embedded closing bracket.
pub fn quote_ident(ident: &str) -> Result<String> {
    validate_identifier(ident)?;
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('[');
    for c in ident.chars() {
        if c == ']' {
            out.push_str("]]");
        } else {
            out.push(c);
        }
    }
    out.push(']');
    Ok(out)
}

/// Quotes each part of a multi-part name and joins them with `.`
pub fn quote_multipart(parts: &[&str]) -> Result<String> {
    let quoted = parts
        .iter()
        .map(|p| quote_ident(p))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join("."))
}

/// Reverses [`quote_ident`]. Fails on a lone `]` inside the brackets.
pub fn unquote_ident(quoted: &str) -> Result<String> {
    let inner = quoted
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| {
            ReconcileError::validation("quoted identifier", format!("{} is not bracketed", quoted))
        })?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == ']' && chars.next() != Some(']') {
            return Err(ReconcileError::validation(
                "quoted identifier",
                format!("{} contains an unescaped ']'", quoted),
            ));
        }
        out.push(c);
    }
    Ok(out)
}

fn validate_literal(value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(ReconcileError::validation(
            "string literal",
            "contains a NUL character",
        ));
    }
    Ok(())
}

/// Wraps a value in single quotes, doubling embedded quotes.
pub fn quote_literal(value: &str) -> Result<String> {
    validate_literal(value)?;
    Ok(format!("'{}'", value.replace('\'', "''")))
}

/// Unicode literal form (`N'...'`) used for names and secrets in generated DDL.
pub fn quote_nliteral(value: &str) -> Result<String> {
    Ok(format!("N{}", quote_literal(value)?))
}

/// Reverses [`quote_literal`] (with or without the `N` prefix).
pub fn unquote_literal(quoted: &str) -> Result<String> {
    let body = quoted.strip_prefix('N').unwrap_or(quoted);
    let inner = body
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .ok_or_else(|| {
            ReconcileError::validation("quoted literal", format!("{} is not quoted", quoted))
        })?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\'' && chars.next() != Some('\'') {
            return Err(ReconcileError::validation(
                "quoted literal",
                format!("{} contains an unescaped quote", quoted),
            ));
        }
        out.push(c);
    }
    Ok(out)
}

/// Passwords and secrets travel as literals; they must be non-empty and free
/// of control characters.
pub fn validate_secret(subject: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ReconcileError::validation(subject, "must not be empty"));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(ReconcileError::validation(
            subject,
            "must not contain control characters",
        ));
    }
    Ok(())
}

/// Permission names cannot be quoted, so anything outside `[A-Z ]` fails closed.
pub fn validate_permission_keyword(permission: &str) -> Result<()> {
    if PERMISSION_KEYWORD_RE.is_match(permission) {
        Ok(())
    } else {
        Err(ReconcileError::validation(
            "permission",
            format!("'{}' is not a permission keyword", permission),
        ))
    }
}

/// Splits a server-side aggregate of `QUOTENAME`d names (e.g. `[a],[b]]c]`)
/// into a set. An empty aggregate yields an empty set.
pub fn split_quoted_list(aggregate: &str) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut rest = aggregate.trim();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(ReconcileError::validation(
                "name list",
                format!("expected '[' at '{}'", rest),
            ));
        }
        let end = closing_bracket(rest).ok_or_else(|| {
            ReconcileError::validation("name list", format!("unterminated name in '{}'", rest))
        })?;
        names.insert(unquote_ident(&rest[..=end])?);
        rest = rest[end + 1..].trim_start();
        if let Some(stripped) = rest.strip_prefix(',') {
            rest = stripped.trim_start();
        } else if !rest.is_empty() {
            return Err(ReconcileError::validation(
                "name list",
                format!("expected ',' at '{}'", rest),
            ));
        }
    }
    Ok(names)
}

/// Byte offset of the `]` closing the bracketed name starting at `s[0]`.
fn closing_bracket(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b']' {
            if bytes.get(i + 1) == Some(&b']') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Splits a possibly bracketed, possibly schema-qualified name such as
/// `[dbo].[Users]`, `dbo.Users` or `Users` into its parts.
pub fn split_multipart(name: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut rest = name.trim();
    loop {
        if rest.starts_with('[') {
            let end = closing_bracket(rest).ok_or_else(|| {
                ReconcileError::validation("object name", format!("unterminated '[' in {}", name))
            })?;
            parts.push(unquote_ident(&rest[..=end])?);
            rest = &rest[end + 1..];
        } else {
            let end = rest.find('.').unwrap_or(rest.len());
            let part = rest[..end].trim_matches('"');
            parts.push(part.to_string());
            rest = &rest[end..];
        }
        match rest.strip_prefix('.') {
            Some(r) => rest = r,
            None if rest.is_empty() => break,
            None => {
                return Err(ReconcileError::validation(
                    "object name",
                    format!("unexpected '{}' in {}", rest, name),
                ))
            }
        }
    }
    for part in &parts {
        validate_identifier(part)?;
    }
    Ok(parts)
}
