//! Basic blocks.

use std::fmt;

use crate::{Instr, Terminator};

/// Index of a block within its function.
///
/// Blocks are appended strictly in the order control constructs are visited;
/// ids are never reordered.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    /// The function entry block.
    pub const ENTRY: BlockId = BlockId(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        BlockId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// One basic block: straight-line instructions plus a single terminator.
#[derive(Clone, Debug)]
pub struct Block {
    /// Display label, e.g. `"if.then"`, `"cleanup.1"`.
    pub label: String,
    pub instrs: Vec<Instr>,
    pub term: Terminator,
}

impl Block {
    pub fn new(label: impl Into<String>) -> Self {
        Block {
            label: label.into(),
            instrs: Vec::new(),
            term: Terminator::None,
        }
    }

    /// Whether the block has a real terminator.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.term.is_set()
    }

    /// Structurally empty: no instructions (the terminator is not counted).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}
