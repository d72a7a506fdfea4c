//! Sequence producers over cursor positions.
//!
//! Every iterator here wraps an owned cursor handle and an explicit pair of
//! positioning operations: the operation applied for the first element and
//! the operation applied for every subsequent one. Keeping the pair explicit
//! (rather than detecting the first call) makes the protocol auditable and
//! composes with independently duplicated cursors for nested iteration.
//!
//! All sequences are fused: once exhausted, or after yielding an error, they
//! keep returning `None`. A fresh cursor-backed sequence must be constructed
//! to iterate again.

use crate::{
    cursor::{Cursor, CursorOp},
    error::Result,
};
use std::{iter::FusedIterator, mem};

/// The two-phase positioning protocol of one sequence.
#[derive(Clone, Copy, Debug)]
pub(crate) struct IterOps {
    /// Operation applied for the first element.
    pub(crate) first: CursorOp,
    /// Operation applied for every element after the first.
    pub(crate) subsequent: CursorOp,
}

#[derive(Clone, Copy, Debug)]
enum Phase {
    First,
    Subsequent,
    Exhausted,
}

/// Iterator over `(key, value)` pairs of a map.
///
/// Created by [`Cursor::iter`], [`Cursor::iter_from`],
/// [`Cursor::iter_from_next`], or per distinct key by [`IterDupRows`].
#[derive(Debug)]
pub struct Iter {
    cursor: Cursor,
    ops: IterOps,
    phase: Phase,
}

impl Iter {
    pub(crate) fn new(cursor: Cursor, ops: IterOps) -> Self {
        Self { cursor, ops, phase: Phase::First }
    }
}

impl Iterator for Iter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let op = match self.phase {
            Phase::Exhausted => return None,
            Phase::First => {
                self.phase = Phase::Subsequent;
                self.ops.first
            }
            Phase::Subsequent => self.ops.subsequent,
        };
        match self.cursor.get(None, op) {
            Ok((Some(key), Some(value))) => Some(Ok((key, value))),
            Ok(_) => {
                self.phase = Phase::Exhausted;
                None
            }
            Err(err) => {
                self.phase = Phase::Exhausted;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for Iter {}

/// Iterator over the distinct keys of a duplicate-sorted map, yielding one
/// value-run sequence per key.
///
/// The outer driver advances across keys with the first-phase operation once
/// and NEXT-NODUP thereafter. Each yielded row is an [`Iter`] over a fresh
/// duplicated cursor positioned at that key, driven by GET-CURRENT once and
/// NEXT-DUP thereafter, so consuming a row never moves the outer cursor.
#[derive(Debug)]
pub struct IterDupRows {
    cursor: Cursor,
    op: CursorOp,
    exhausted: bool,
}

impl IterDupRows {
    pub(crate) fn new(cursor: Cursor, first_op: CursorOp) -> Self {
        Self { cursor, op: first_op, exhausted: false }
    }
}

impl Iterator for IterDupRows {
    type Item = Result<Iter>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let op = mem::replace(&mut self.op, CursorOp::NextNoDup);
        match self.cursor.get(None, op) {
            Ok((Some(_), Some(_))) => match self.cursor.dup() {
                Ok(row_cursor) => Some(Ok(Iter::new(
                    row_cursor,
                    IterOps { first: CursorOp::GetCurrent, subsequent: CursorOp::NextDup },
                ))),
                Err(err) => {
                    self.exhausted = true;
                    Some(Err(err))
                }
            },
            Ok(_) => {
                self.exhausted = true;
                None
            }
            Err(err) => {
                self.exhausted = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for IterDupRows {}

/// Flattening of [`IterDupRows`]: one `(key, value)` pair per stored value.
#[derive(Debug)]
pub struct IterDup {
    rows: IterDupRows,
    current: Option<Iter>,
}

impl IterDup {
    pub(crate) fn new(rows: IterDupRows) -> Self {
        Self { rows, current: None }
    }
}

impl Iterator for IterDup {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = &mut self.current {
                match row.next() {
                    Some(item) => return Some(item),
                    None => self.current = None,
                }
            }
            match self.rows.next()? {
                Ok(row) => self.current = Some(row),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl FusedIterator for IterDup {}
