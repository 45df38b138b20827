//! Folding an [`Operation`] into plain text.

use super::delta::{Operation, Step};
use crate::error::{Result, SyncError};

/// Apply `op` to `text` and return the new text.
///
/// A read cursor walks `text` while a buffer collects the output. Retains copy
/// from the cursor, inserts append new content without moving the cursor,
/// deletes move the cursor without copying. Whatever remains after the last
/// step is copied unchanged.
///
/// Fails closed with [`SyncError::InvalidOperation`] when a retain or delete
/// runs past the end of `text`; `text` is never partially modified.
///
/// # Examples
///
/// ```
/// use docsync_axum::merge::{compose, Operation};
///
/// let op = Operation::new().retain(6).delete(5).insert("there");
/// assert_eq!(compose("Hello World", &op).unwrap(), "Hello there");
///
/// let too_long = Operation::new().retain(20);
/// assert!(compose("Hello", &too_long).is_err());
/// ```
pub fn compose(text: &str, op: &Operation) -> Result<String> {
    let mut rest = text;
    let mut cursor = 0;
    let mut out = String::with_capacity(text.len());

    for step in op.steps() {
        match step {
            Step::Retain(n) => {
                let (kept, tail) = split_chars(rest, *n)
                    .ok_or_else(|| past_end("retain", cursor, *n, rest))?;
                out.push_str(kept);
                rest = tail;
                cursor += n;
            }
            Step::Insert(insert) => insert.write_to(&mut out),
            Step::Delete(n) => {
                let (_, tail) = split_chars(rest, *n)
                    .ok_or_else(|| past_end("delete", cursor, *n, rest))?;
                rest = tail;
                cursor += n;
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Split off the first `n` chars, or `None` if there are fewer.
fn split_chars(s: &str, n: usize) -> Option<(&str, &str)> {
    if n == 0 {
        return Some(("", s));
    }
    match s.char_indices().nth(n) {
        Some((at, _)) => Some(s.split_at(at)),
        None if s.chars().count() == n => Some((s, "")),
        None => None,
    }
}

fn past_end(kind: &str, cursor: usize, n: usize, rest: &str) -> SyncError {
    SyncError::invalid_operation(format!(
        "{} of {} at {} exceeds remaining length {}",
        kind,
        n,
        cursor,
        rest.chars().count()
    ))
}
