//! Shared utility helpers.

use sha2::{Digest, Sha256};

/// Case-insensitive starts_with check without allocating.
#[inline]
pub fn starts_with_ci(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len()
        && haystack.as_bytes()[..needle.len()].eq_ignore_ascii_case(needle.as_bytes())
}

/// Splits a script into batches on `GO` separator lines.
///
/// `GO` must be alone on its line (optionally `GO;`). Batches holding only
/// whitespace are dropped.
pub fn split_batches(script: &str) -> Vec<&str> {
    let mut batches = Vec::new();
    let mut current_pos = 0;
    let mut batch_start = 0;

    for line in script.lines() {
        let line_end = current_pos + line.len();
        let next_pos = if script[line_end..].starts_with("\r\n") {
            line_end + 2
        } else if script[line_end..].starts_with('\n') {
            line_end + 1
        } else {
            line_end
        };

        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("go") || trimmed.eq_ignore_ascii_case("go;") {
            push_batch(&mut batches, &script[batch_start..current_pos]);
            batch_start = next_pos;
        }
        current_pos = next_pos;
    }
    if batch_start < script.len() {
        push_batch(&mut batches, &script[batch_start..]);
    }
    batches
}

fn push_batch<'a>(batches: &mut Vec<&'a str>, batch: &'a str) {
    if !batch.trim().is_empty() {
        batches.push(batch);
    }
}

/// Upper-case hex SHA-256 of a script, used to detect script changes.
pub fn script_digest(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    format!("{:X}", hasher.finalize())
}

/// `0x`-prefixed upper-case hex rendering of a binary SID, as
/// `CONVERT(varchar(85), sid, 1)` prints it.
pub fn sid_to_hex(sid: &[u8]) -> String {
    format!("0x{}", hex::encode_upper(sid))
}
