//! Per-document section locks.
//!
//! A [`LockTable`] holds the locked ranges of one document. It answers three
//! questions for the room that owns it:
//!
//! - may this user lock this span? ([`LockTable::try_lock`])
//! - does this operation touch somebody else's lock? ([`LockTable::check_conflict`])
//! - where do the locks sit after an accepted operation? ([`LockTable::transform`])
//!
//! # Invariants
//!
//! - No two stored ranges overlap, whatever their owners. Re-locking an
//!   overlapping span is rejected even for the same owner.
//! - Every stored range has length > 0.
//! - Locks are re-indexed but never shrunk or split by edits.

use crate::error::{Result, SyncError};
use crate::merge::{Operation, Step};
use crate::types::{LockRange, SectionRange, UserId};

/// Locked ranges of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockTable {
    ranges: Vec<LockRange>,
}

impl LockTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Active locks in the order they were taken.
    pub fn ranges(&self) -> &[LockRange] {
        &self.ranges
    }

    /// Number of active locks.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether no section is locked.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Store `range` for `owner` unless it overlaps any existing lock.
    pub fn try_lock(&mut self, range: SectionRange, owner: &UserId) -> Result<()> {
        if range.length == 0 {
            return Err(SyncError::InvalidLockRange);
        }
        if self.ranges.iter().any(|lock| lock.range().overlaps(&range)) {
            return Err(SyncError::LockOverlap);
        }
        self.ranges
            .push(LockRange::new(range.index, range.length, owner.clone()));
        Ok(())
    }

    /// Remove the lock matching `range` and `owner` exactly.
    ///
    /// Returns whether a lock was removed; unknown locks are a no-op.
    pub fn unlock(&mut self, range: SectionRange, owner: &UserId) -> bool {
        let before = self.ranges.len();
        self.ranges
            .retain(|lock| !(lock.range() == range && &lock.owner_id == owner));
        self.ranges.len() != before
    }

    /// Drop every lock held by `owner`, returning how many were dropped.
    pub fn release_owner(&mut self, owner: &UserId) -> usize {
        let before = self.ranges.len();
        self.ranges.retain(|lock| &lock.owner_id != owner);
        before - self.ranges.len()
    }

    /// Reject `op` if it edits inside a lock held by someone other than `user`.
    ///
    /// Positions are taken in the coordinates of the text before `op`, with
    /// the same cursor walk as [`crate::merge::compose`]. An insert exactly at
    /// the start of a foreign lock is allowed; one strictly inside it is not.
    /// A delete may not touch any position of a foreign lock.
    pub fn check_conflict(&self, op: &Operation, user: &UserId) -> Result<()> {
        let mut cursor = 0;
        for step in op.steps() {
            match step {
                Step::Retain(n) => cursor += n,
                Step::Insert(_) => {
                    if let Some(lock) = self.foreign(user).find(|lock| {
                        lock.index < cursor && cursor < lock.end()
                    }) {
                        return Err(conflict(lock));
                    }
                }
                Step::Delete(n) => {
                    let span = SectionRange::new(cursor, *n);
                    if let Some(lock) = self.foreign(user).find(|lock| lock.range().overlaps(&span)) {
                        return Err(conflict(lock));
                    }
                    cursor += n;
                }
            }
        }
        Ok(())
    }

    /// Re-index every lock so it stays on the same text after `op`.
    ///
    /// The walk happens in the coordinates of the text as it evolves: an
    /// insert of length `L` at `i` moves locks starting at or after `i` by
    /// `+L`; a delete of length `L` at `i` moves locks starting after `i` by
    /// `-L`. A lock whose start falls inside the deleted span (only possible
    /// for the submitter's own locks) lands on `i`.
    pub fn transform(&mut self, op: &Operation) {
        let mut cursor = 0;
        for step in op.steps() {
            match step {
                Step::Retain(n) => cursor += n,
                Step::Insert(insert) => {
                    let len = insert.len();
                    for lock in &mut self.ranges {
                        if lock.index >= cursor {
                            lock.index += len;
                        }
                    }
                    cursor += len;
                }
                Step::Delete(n) => {
                    for lock in &mut self.ranges {
                        if lock.index > cursor {
                            lock.index = lock.index.saturating_sub(*n).max(cursor);
                        }
                    }
                }
            }
        }
    }

    fn foreign<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a LockRange> + 'a {
        self.ranges.iter().filter(move |lock| &lock.owner_id != user)
    }
}

fn conflict(lock: &LockRange) -> SyncError {
    SyncError::ConflictingEdit {
        owner: lock.owner_id.clone(),
        index: lock.index,
    }
}
