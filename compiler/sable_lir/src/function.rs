//! Functions, parameters, and modules.

use bitflags::bitflags;
use sable_ir::Name;

use crate::{Block, BlockId, IrTypeId};

bitflags! {
    /// Function-level attributes.
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct FnAttrs: u8 {
        /// Calls to this function may propagate an exception.
        const MAY_UNWIND = 1 << 0;
        /// Takes a variable argument list.
        const VARIADIC = 1 << 1;
    }
}

bitflags! {
    /// Parameter-level attributes.
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct ParamAttrs: u8 {
        /// Hidden pointer to the caller's return slot.
        const SRET = 1 << 0;
        /// Pointer to a caller-owned copy of a by-reference aggregate.
        const BYREF = 1 << 1;
    }
}

/// One formal parameter.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Param {
    pub ty: IrTypeId,
    pub attrs: ParamAttrs,
}

impl Param {
    pub fn plain(ty: IrTypeId) -> Self {
        Param {
            ty,
            attrs: ParamAttrs::empty(),
        }
    }
}

/// A lowered function body.
///
/// Parameters occupy the first `params.len()` value ids, in order; every
/// other value id is an instruction result.
pub struct IrFunction {
    pub name: Name,
    pub params: Vec<Param>,
    pub ret: IrTypeId,
    pub attrs: FnAttrs,
    pub blocks: Vec<Block>,
    /// Total number of value ids the body uses (params included).
    pub value_count: u32,
}

impl IrFunction {
    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// The entry block.
    pub fn entry(&self) -> &Block {
        &self.blocks[0]
    }
}

/// A global declared by the unit (storage materialized by the external
/// storage collaborator; the module only records the symbol and its type).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct GlobalDecl {
    pub name: Name,
    pub ty: IrTypeId,
}

/// One compilation unit's lowered output.
#[derive(Default)]
pub struct Module {
    pub functions: Vec<IrFunction>,
    pub globals: Vec<GlobalDecl>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }
}
