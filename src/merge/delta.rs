//! The [`Operation`] type: an ordered list of retain / insert / delete steps.
//!
//! Steps are read left to right with a cursor that starts at 0. A retain
//! skips `n` positions, an insert adds new content at the cursor, a delete
//! drops `n` positions. Lengths are counted in `char`s.
//!
//! On the wire an operation uses the Quill Delta JSON shape:
//!
//! ```
//! use docsync_axum::merge::{Operation, Step};
//!
//! let op: Operation = serde_json::from_str(
//!     r#"{"ops":[{"retain":2},{"insert":"xy"},{"delete":1}]}"#,
//! ).unwrap();
//! assert_eq!(op, Operation::new().retain(2).insert("xy").delete(1));
//! assert_eq!(op.steps().len(), 3);
//! assert!(matches!(op.steps()[0], Step::Retain(2)));
//! ```
//!
//! Raw steps are validated into the tagged [`Step`] enum at the boundary, so
//! nothing past deserialization ever sees an untyped step.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Plain-text stand-in for an embedded object.
pub const EMBED_CHAR: char = '\u{FFFC}';

/// Content carried by an insert step.
#[derive(Debug, Clone, PartialEq)]
pub enum Insert {
    /// Literal text.
    Text(String),
    /// An atomic object (image, formula, ...) of length 1.
    Embed(Value),
}

impl Insert {
    /// Length in positions.
    pub fn len(&self) -> usize {
        match self {
            Insert::Text(text) => text.chars().count(),
            Insert::Embed(_) => 1,
        }
    }

    /// Whether the content is empty text.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the plain-text rendering of this content.
    pub fn write_to(&self, out: &mut String) {
        match self {
            Insert::Text(text) => out.push_str(text),
            Insert::Embed(_) => out.push(EMBED_CHAR),
        }
    }

    fn slice(&self, offset: usize, len: usize) -> Insert {
        match self {
            Insert::Text(text) => Insert::Text(text.chars().skip(offset).take(len).collect()),
            Insert::Embed(value) => Insert::Embed(value.clone()),
        }
    }
}

/// One step of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Keep `n` positions and move past them.
    Retain(usize),
    /// Add content at the cursor.
    Insert(Insert),
    /// Remove `n` positions at the cursor.
    Delete(usize),
}

impl Step {
    /// Number of positions the step covers.
    pub fn len(&self) -> usize {
        match self {
            Step::Retain(n) | Step::Delete(n) => *n,
            Step::Insert(insert) => insert.len(),
        }
    }

    /// Whether the step covers nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ordered sequence of steps describing one edit.
///
/// Built through [`Operation::retain`], [`Operation::insert`] and
/// [`Operation::delete`], or deserialized from a delta. Zero-length steps are
/// dropped and adjacent steps of the same kind are coalesced, so every stored
/// step has length >= 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDelta", into = "RawDelta")]
pub struct Operation {
    steps: Vec<Step>,
}

impl Operation {
    /// An operation with no steps. Composing it leaves text unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an operation from steps, normalizing as [`Operation::push`] does.
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        let mut op = Operation::new();
        for step in steps {
            op.push(step);
        }
        op
    }

    /// Append a retain of `n` positions.
    pub fn retain(mut self, n: usize) -> Self {
        self.push(Step::Retain(n));
        self
    }

    /// Append a text insert.
    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.push(Step::Insert(Insert::Text(text.into())));
        self
    }

    /// Append an embedded object, which counts as one position.
    pub fn insert_embed(mut self, value: Value) -> Self {
        self.push(Step::Insert(Insert::Embed(value)));
        self
    }

    /// Append a delete of `n` positions.
    pub fn delete(mut self, n: usize) -> Self {
        self.push(Step::Delete(n));
        self
    }

    /// Append a step, dropping it if empty and merging it into the previous
    /// step when both are of the same kind.
    pub fn push(&mut self, step: Step) {
        if step.is_empty() {
            return;
        }
        if let Some(last) = self.steps.last_mut() {
            match (last, &step) {
                (Step::Retain(a), Step::Retain(b)) | (Step::Delete(a), Step::Delete(b)) => {
                    *a += *b;
                    return;
                }
                (Step::Insert(Insert::Text(a)), Step::Insert(Insert::Text(b))) => {
                    a.push_str(b);
                    return;
                }
                _ => {}
            }
        }
        self.steps.push(step);
    }

    /// The normalized steps, in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Whether the operation has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Minimum length of text this operation can be applied to.
    pub fn base_len(&self) -> usize {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Retain(n) | Step::Delete(n) => *n,
                Step::Insert(_) => 0,
            })
            .sum()
    }

    /// Combine `self` followed by `next` into one operation.
    ///
    /// For any text `t` on which both apply in sequence,
    /// `compose(&compose(t, a)?, b)? == compose(t, &a.merge(b))?`.
    /// This is what lets the flusher fold a queue of accepted operations into
    /// a single write.
    pub fn merge(&self, next: &Operation) -> Operation {
        let mut first = StepCursor::new(&self.steps);
        let mut second = StepCursor::new(&next.steps);
        let mut merged = Operation::new();

        while first.has_next() || second.has_next() {
            if second.peek_kind() == StepKind::Insert {
                merged.push(second.next(usize::MAX));
            } else if first.peek_kind() == StepKind::Delete {
                merged.push(first.next(usize::MAX));
            } else {
                let len = first.peek_len().min(second.peek_len());
                match (first.next(len), second.next(len)) {
                    (Step::Retain(n), Step::Retain(_)) => merged.push(Step::Retain(n)),
                    (Step::Retain(n), Step::Delete(_)) => merged.push(Step::Delete(n)),
                    (insert @ Step::Insert(_), Step::Retain(_)) => merged.push(insert),
                    // an insert deleted by the next operation never existed
                    _ => {}
                }
            }
        }

        merged.chop()
    }

    fn chop(mut self) -> Self {
        if matches!(self.steps.last(), Some(Step::Retain(_))) {
            self.steps.pop();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    Retain,
    Insert,
    Delete,
}

/// Walks a step list handing out pieces of at most a requested length.
/// Past the end it yields an endless retain.
struct StepCursor<'a> {
    steps: &'a [Step],
    index: usize,
    offset: usize,
}

impl<'a> StepCursor<'a> {
    fn new(steps: &'a [Step]) -> Self {
        StepCursor {
            steps,
            index: 0,
            offset: 0,
        }
    }

    fn has_next(&self) -> bool {
        self.index < self.steps.len()
    }

    fn peek_len(&self) -> usize {
        self.steps
            .get(self.index)
            .map_or(usize::MAX, |step| step.len() - self.offset)
    }

    fn peek_kind(&self) -> StepKind {
        match self.steps.get(self.index) {
            Some(Step::Insert(_)) => StepKind::Insert,
            Some(Step::Delete(_)) => StepKind::Delete,
            _ => StepKind::Retain,
        }
    }

    fn next(&mut self, len: usize) -> Step {
        let Some(step) = self.steps.get(self.index) else {
            return Step::Retain(len);
        };
        let remaining = step.len() - self.offset;
        let take = len.min(remaining);
        let piece = match step {
            Step::Retain(_) => Step::Retain(take),
            Step::Delete(_) => Step::Delete(take),
            Step::Insert(insert) => Step::Insert(insert.slice(self.offset, take)),
        };
        if take == remaining {
            self.index += 1;
            self.offset = 0;
        } else {
            self.offset += take;
        }
        piece
    }
}

// ========== Wire form ==========

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RawDelta {
    Wrapped { ops: Vec<RawStep> },
    Bare(Vec<RawStep>),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retain: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    insert: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete: Option<u64>,
    #[serde(default, skip_serializing)]
    attributes: Option<Value>,
}

fn count(n: u64) -> Result<usize, SyncError> {
    usize::try_from(n).map_err(|_| SyncError::invalid_operation(format!("length {} is too large", n)))
}

impl TryFrom<RawDelta> for Operation {
    type Error = SyncError;

    fn try_from(raw: RawDelta) -> Result<Self, Self::Error> {
        let raw_steps = match raw {
            RawDelta::Wrapped { ops } => ops,
            RawDelta::Bare(ops) => ops,
        };

        let mut op = Operation::new();
        for (position, raw) in raw_steps.into_iter().enumerate() {
            let step = match (raw.retain, raw.insert, raw.delete) {
                (Some(n), None, None) => Step::Retain(count(n)?),
                (None, Some(Value::String(text)), None) => Step::Insert(Insert::Text(text)),
                (None, Some(value @ Value::Object(_)), None) => Step::Insert(Insert::Embed(value)),
                (None, Some(_), None) => {
                    return Err(SyncError::invalid_operation(format!(
                        "step {}: insert must be a string or an object",
                        position
                    )));
                }
                (None, None, Some(n)) => Step::Delete(count(n)?),
                _ => {
                    return Err(SyncError::invalid_operation(format!(
                        "step {}: expected exactly one of retain, insert or delete",
                        position
                    )));
                }
            };
            op.push(step);
        }
        Ok(op)
    }
}

impl From<Operation> for RawDelta {
    fn from(op: Operation) -> Self {
        let ops = op
            .steps
            .into_iter()
            .map(|step| match step {
                Step::Retain(n) => RawStep {
                    retain: Some(n as u64),
                    ..RawStep::default()
                },
                Step::Delete(n) => RawStep {
                    delete: Some(n as u64),
                    ..RawStep::default()
                },
                Step::Insert(Insert::Text(text)) => RawStep {
                    insert: Some(Value::String(text)),
                    ..RawStep::default()
                },
                Step::Insert(Insert::Embed(value)) => RawStep {
                    insert: Some(value),
                    ..RawStep::default()
                },
            })
            .collect();
        RawDelta::Wrapped { ops }
    }
}
