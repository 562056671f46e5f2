use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::core::{AttrPatch, Node, Selection};

pub type Path = Vec<usize>;

/// A primitive step. Paths address nodes by child index from the document
/// root; text offsets are UTF-8 byte offsets into the addressed text leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    InsertText {
        #[serde(default)]
        path: Path,
        offset: usize,
        text: String,
    },
    RemoveText {
        #[serde(default)]
        path: Path,
        range: Range<usize>,
    },
    InsertNode {
        #[serde(default)]
        path: Path,
        node: Node,
    },
    RemoveNode {
        #[serde(default)]
        path: Path,
    },
    ReplaceNode {
        #[serde(default)]
        path: Path,
        node: Node,
    },
    SetNodeAttrs {
        #[serde(default)]
        path: Path,
        patch: AttrPatch,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub ops: Vec<Op>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_after: Option<Selection>,
    #[serde(default)]
    pub meta: TransactionMeta,
}

impl Transaction {
    pub fn new(ops: Vec<Op>) -> Self {
        Self {
            ops,
            selection_after: None,
            meta: TransactionMeta::default(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.selection_after.is_none()
    }

    pub fn selection_after(mut self, selection_after: Selection) -> Self {
        self.selection_after = Some(selection_after);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.meta.source = Some(source.into());
        self
    }
}

/// Which side a position sticks to when content is inserted exactly at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Before,
    After,
}

/// The flat-position footprint of one step: `deleted` units starting at `pos`
/// were replaced by `inserted` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepMap {
    pub pos: usize,
    pub deleted: usize,
    pub inserted: usize,
}

impl StepMap {
    pub const IDENTITY: StepMap = StepMap {
        pos: 0,
        deleted: 0,
        inserted: 0,
    };

    pub fn map(&self, pos: usize, assoc: Assoc) -> usize {
        if self.deleted == 0 && self.inserted == 0 {
            return pos;
        }
        let end = self.pos + self.deleted;
        if pos < self.pos {
            return pos;
        }
        if pos > end {
            return pos - self.deleted + self.inserted;
        }
        let side = if self.deleted == 0 {
            assoc
        } else if pos == self.pos {
            Assoc::Before
        } else if pos == end {
            Assoc::After
        } else {
            assoc
        };
        match side {
            Assoc::Before => self.pos,
            Assoc::After => self.pos + self.inserted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_shifts_positions_after_it() {
        let map = StepMap {
            pos: 3,
            deleted: 0,
            inserted: 2,
        };
        assert_eq!(map.map(1, Assoc::After), 1);
        assert_eq!(map.map(3, Assoc::Before), 3);
        assert_eq!(map.map(3, Assoc::After), 5);
        assert_eq!(map.map(4, Assoc::After), 6);
    }

    #[test]
    fn deletion_collapses_positions_inside_it() {
        let map = StepMap {
            pos: 2,
            deleted: 4,
            inserted: 0,
        };
        assert_eq!(map.map(1, Assoc::After), 1);
        assert_eq!(map.map(4, Assoc::After), 2);
        assert_eq!(map.map(6, Assoc::After), 2);
        assert_eq!(map.map(9, Assoc::After), 5);
    }
}
