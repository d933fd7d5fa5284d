//! Block-and-instruction emission for one function.
//!
//! `FuncBuilder` owns the function under construction: its blocks, the
//! current-block cursor, and the value-id counter. Blocks are appended
//! strictly in the order they are created and never reordered. Stack slots
//! are collected separately and spliced to the front of the entry block when
//! the function is finished, so every slot dominates its uses regardless of
//! where lowering asked for it.

use sable_ir::Name;
use sable_lir::{
    Block, BlockId, FnAttrs, Instr, InstrKind, IrFunction, IrTypeId, Operand, Param, Terminator,
    ValueId,
};

use crate::LowerError;

pub struct FuncBuilder {
    name: Name,
    params: Vec<Param>,
    ret: IrTypeId,
    attrs: FnAttrs,
    blocks: Vec<Block>,
    current: BlockId,
    next_value: u32,
    /// Stack-slot instructions destined for the entry block front.
    entry_slots: Vec<Instr>,
}

impl FuncBuilder {
    /// Create a builder with an empty entry block positioned for emission.
    pub fn new(name: Name, params: Vec<Param>, ret: IrTypeId, attrs: FnAttrs) -> Self {
        let next_value = u32::try_from(params.len()).expect("parameter count overflow");
        FuncBuilder {
            name,
            params,
            ret,
            attrs,
            blocks: vec![Block::new("entry")],
            current: BlockId::ENTRY,
            next_value,
            entry_slots: Vec::new(),
        }
    }

    /// The value id of parameter `index`.
    pub fn param(&self, index: usize) -> ValueId {
        debug_assert!(index < self.params.len());
        ValueId::from_raw(index as u32)
    }

    fn fresh_value(&mut self) -> ValueId {
        let id = ValueId::from_raw(self.next_value);
        self.next_value += 1;
        id
    }

    /// Append a new block; the cursor does not move.
    pub fn append_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId::from_raw(u32::try_from(self.blocks.len()).expect("block overflow"));
        self.blocks.push(Block::new(label));
        id
    }

    /// Move the cursor to the end of `block`.
    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = block;
    }

    /// The block the cursor is in.
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Whether the current block already has a terminator.
    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current.index()].is_terminated()
    }

    /// Emit a result-producing instruction at the cursor.
    pub fn push(&mut self, kind: InstrKind, ty: IrTypeId) -> ValueId {
        debug_assert!(!self.is_terminated(), "emitting into a terminated block");
        let result = self.fresh_value();
        self.blocks[self.current.index()].instrs.push(Instr {
            kind,
            result: Some(result),
            ty,
        });
        result
    }

    /// Emit a side-effect-only instruction at the cursor.
    pub fn push_void(&mut self, kind: InstrKind, void_ty: IrTypeId) {
        debug_assert!(!self.is_terminated(), "emitting into a terminated block");
        self.blocks[self.current.index()].instrs.push(Instr {
            kind,
            result: None,
            ty: void_ty,
        });
    }

    /// Allocate a function-entry stack slot and return its address value.
    pub fn entry_slot(&mut self, ty: IrTypeId, ptr_ty: IrTypeId) -> ValueId {
        let result = self.fresh_value();
        self.entry_slots.push(Instr {
            kind: InstrKind::StackSlot { ty },
            result: Some(result),
            ty: ptr_ty,
        });
        result
    }

    /// Set the current block's terminator. Overwriting a real terminator is
    /// a contract breach; resolving a pending-exit marker goes through
    /// [`resolve_terminator`](Self::resolve_terminator) instead.
    pub fn terminate(&mut self, term: Terminator) {
        let block = &mut self.blocks[self.current.index()];
        debug_assert!(!block.is_terminated(), "re-terminating a block");
        block.term = term;
    }

    /// Terminate only if the current block is still open.
    pub fn terminate_if_open(&mut self, term: Terminator) {
        if !self.is_terminated() {
            self.terminate(term);
        }
    }

    /// Terminate the current block with an invoke, allocating a result
    /// value when the call produces one.
    pub fn terminate_invoke(
        &mut self,
        callee: sable_lir::Callee,
        args: smallvec::SmallVec<[Operand; 6]>,
        ty: IrTypeId,
        produces_value: bool,
        normal: BlockId,
        unwind: BlockId,
    ) -> Option<ValueId> {
        let result = produces_value.then(|| self.fresh_value());
        self.terminate(Terminator::Invoke {
            callee,
            args,
            result,
            ty,
            normal,
            unwind,
        });
        result
    }

    /// Replace a pending-exit marker with its resolved terminator.
    pub fn resolve_terminator(&mut self, block: BlockId, term: Terminator) {
        let slot = &mut self.blocks[block.index()].term;
        debug_assert!(
            matches!(slot, Terminator::PendingExit { .. }),
            "resolving a non-pending terminator"
        );
        *slot = term;
    }

    /// Finish the function: splice entry slots, verify every block is
    /// terminated and no exit marker survived.
    pub fn finish(mut self) -> Result<IrFunction, LowerError> {
        let slots = std::mem::take(&mut self.entry_slots);
        let entry = &mut self.blocks[BlockId::ENTRY.index()];
        entry.instrs.splice(0..0, slots);

        for (index, block) in self.blocks.iter().enumerate() {
            match &block.term {
                Terminator::None => {
                    return Err(LowerError::contract(format!(
                        "block bb{index} (`{}`) left unterminated",
                        block.label
                    )));
                }
                Terminator::PendingExit { fixup } => {
                    return Err(LowerError::CorruptScopes(format!(
                        "fixup #{fixup} in bb{index} (`{}`) never resolved",
                        block.label
                    )));
                }
                _ => {}
            }
        }

        Ok(IrFunction {
            name: self.name,
            params: self.params,
            ret: self.ret,
            attrs: self.attrs,
            blocks: self.blocks,
            value_count: self.next_value,
        })
    }
}

/// Convenience: the operand of a value id.
pub fn val(v: ValueId) -> Operand {
    Operand::Value(v)
}
