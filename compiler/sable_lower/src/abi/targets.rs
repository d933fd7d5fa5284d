//! Calling-convention implementations shipped with the engine.
//!
//! Both share the generic traversal; they differ in aggregate-passing
//! policy. Their leaf actions maintain the descend/ascend depth (the
//! bracketing invariant is cheap to check here and painful to debug
//! downstream) and emit trace events.

use sable_lir::IrTypeId;

use super::{AggregatePassing, CallAbi};

/// Field-wise register convention: aggregates decompose into one scalar
/// argument per leaf field.
pub struct RegFieldAbi {
    depth: u32,
}

impl RegFieldAbi {
    pub fn new() -> Self {
        RegFieldAbi { depth: 0 }
    }
}

impl Default for RegFieldAbi {
    fn default() -> Self {
        Self::new()
    }
}

impl CallAbi for RegFieldAbi {
    fn name(&self) -> &'static str {
        "reg-fields"
    }

    fn aggregate_passing(&self) -> AggregatePassing {
        AggregatePassing::FieldWise
    }

    fn scalar_result(&mut self, ty: IrTypeId) {
        tracing::trace!(?ty, "reg-fields: scalar result");
    }

    fn aggregate_result_as_scalar(&mut self, ty: IrTypeId, bits: u32) {
        tracing::trace!(?ty, bits, "reg-fields: widened aggregate result");
    }

    fn hidden_pointer_return(&mut self, slot: IrTypeId, returns_pointer: bool) {
        tracing::trace!(?slot, returns_pointer, "reg-fields: hidden return");
    }

    fn scalar_argument(&mut self, ty: IrTypeId, offset: u64) {
        tracing::trace!(?ty, offset, depth = self.depth, "reg-fields: scalar argument");
    }

    fn enter_field(&mut self, index: u32, offset: u64) {
        self.depth += 1;
        tracing::trace!(index, offset, depth = self.depth, "reg-fields: descend");
    }

    fn exit_field(&mut self) {
        debug_assert!(self.depth > 0, "exit_field without matching enter_field");
        self.depth -= 1;
    }
}

/// Chunked integer-register convention: aggregates are carved into
/// register-sized chunks regardless of field boundaries.
pub struct RegChunkAbi {
    depth: u32,
    register_bytes: u64,
}

impl RegChunkAbi {
    pub fn new() -> Self {
        RegChunkAbi {
            depth: 0,
            register_bytes: 8,
        }
    }

    /// Override the register width (e.g. 4 for a 32-bit register file).
    #[must_use]
    pub fn with_register_bytes(mut self, bytes: u64) -> Self {
        self.register_bytes = bytes;
        self
    }
}

impl Default for RegChunkAbi {
    fn default() -> Self {
        Self::new()
    }
}

impl CallAbi for RegChunkAbi {
    fn name(&self) -> &'static str {
        "reg-chunks"
    }

    fn register_bytes(&self) -> u64 {
        self.register_bytes
    }

    fn aggregate_passing(&self) -> AggregatePassing {
        AggregatePassing::RegisterChunks
    }

    fn sret_returns_pointer(&self) -> bool {
        true
    }

    fn scalar_result(&mut self, ty: IrTypeId) {
        tracing::trace!(?ty, "reg-chunks: scalar result");
    }

    fn aggregate_result_as_scalar(&mut self, ty: IrTypeId, bits: u32) {
        tracing::trace!(?ty, bits, "reg-chunks: widened aggregate result");
    }

    fn hidden_pointer_return(&mut self, slot: IrTypeId, returns_pointer: bool) {
        tracing::trace!(?slot, returns_pointer, "reg-chunks: hidden return");
    }

    fn scalar_argument(&mut self, ty: IrTypeId, offset: u64) {
        tracing::trace!(?ty, offset, depth = self.depth, "reg-chunks: scalar argument");
    }

    fn enter_field(&mut self, index: u32, offset: u64) {
        self.depth += 1;
        tracing::trace!(index, offset, depth = self.depth, "reg-chunks: descend");
    }

    fn exit_field(&mut self) {
        debug_assert!(self.depth > 0, "exit_field without matching enter_field");
        self.depth -= 1;
    }
}
