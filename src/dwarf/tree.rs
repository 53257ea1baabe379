//! Rebuilds the DIE hierarchy from the flat depth-first stream `.debug_info` stores.
//!
//! Every entry whose abbreviation says it has children opens a scope, and a
//! null entry closes the innermost open scope. Nulls at the top level are
//! padding and are ignored.

use std::slice;

use tracing::trace;

use super::die::{DebuggingInformationEntry, Die};
use crate::error::{Error, Result};

/// Incremental tree reconstruction, fed one decoded entry at a time.
///
/// Open parents are kept on an explicit stack, so deeply nested input cannot
/// exhaust the call stack.
#[derive(Debug, Default)]
pub struct TreeBuilder<'a> {
    roots: Vec<Die<'a>>,
    open: Vec<Die<'a>>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes opened and not yet closed.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn push(&mut self, entry: Option<Die<'a>>) {
        match entry {
            None => match self.open.pop() {
                Some(parent) => self.attach(parent),
                None => trace!("null entry at top level"),
            },
            Some(die) if die.has_children => self.open.push(die),
            Some(die) => self.attach(die),
        }
    }

    fn attach(&mut self, die: Die<'a>) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(die),
            None => self.roots.push(die),
        }
    }

    /// Returns the top-level entries.
    ///
    /// `end_offset` is where the input ran out, reported if a scope was never
    /// closed.
    pub fn finish(self, end_offset: u64) -> Result<Vec<Die<'a>>> {
        if let Some(unclosed) = self.open.last() {
            trace!(offset = unclosed.offset, "scope still open at end of unit");
            return Err(Error::TruncatedInput { offset: end_offset });
        }
        Ok(self.roots)
    }
}

/// Builds the tree for a complete flat stream, `None` standing for null entries.
pub fn build_tree<'a>(
    flat: impl IntoIterator<Item = Option<Die<'a>>>,
    end_offset: u64,
) -> Result<Vec<Die<'a>>> {
    let mut builder = TreeBuilder::new();
    for entry in flat {
        builder.push(entry);
    }
    builder.finish(end_offset)
}

/// One step of a depth-first traversal.
#[derive(Debug, Clone, Copy)]
pub struct WalkEntry<'d, 'a> {
    /// 0 for the entries the walk started from
    pub depth: usize,
    /// Offset of the enclosing entry, `None` at the starting level
    pub parent: Option<u64>,
    pub die: &'d Die<'a>,
}

/// Pre-order iterator over a forest of entries.
#[derive(Debug, Clone)]
pub struct Walk<'d, 'a> {
    stack: Vec<(usize, Option<u64>, slice::Iter<'d, Die<'a>>)>,
}

impl<'d, 'a> Walk<'d, 'a> {
    pub fn new(roots: &'d [Die<'a>]) -> Self {
        Self {
            stack: vec![(0, None, roots.iter())],
        }
    }
}

impl<'d, 'a> Iterator for Walk<'d, 'a> {
    type Item = WalkEntry<'d, 'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (depth, parent, level) = self.stack.last_mut()?;
            let (depth, parent) = (*depth, *parent);
            match level.next() {
                Some(die) => {
                    if !die.children.is_empty() {
                        self.stack
                            .push((depth + 1, Some(die.offset), die.children.iter()));
                    }
                    return Some(WalkEntry { depth, parent, die });
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

impl<'a> DebuggingInformationEntry<'a> {
    /// This entry followed by all of its descendants, depth first.
    pub fn walk(&self) -> Walk<'_, 'a> {
        Walk::new(slice::from_ref(self))
    }
}
