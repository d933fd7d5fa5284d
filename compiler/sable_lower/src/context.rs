//! The lowering context.
//!
//! [`LowerCx`] is the explicit context object that owns every piece of
//! compilation-unit-scoped shared state: the target type arena, the constant
//! identity table, the layout cache, the classification cache, and the
//! diagnostic queue. It is created per unit and torn down with it — there is
//! no process-global state, so independent compilations can run side by side
//! in one process.
//!
//! Function-local mutable state (scope stack, binding table, current-block
//! cursor) lives in the per-function lowerer, not here; local values are
//! discarded when their function finishes while the tables here persist for
//! the unit.

use rustc_hash::{FxHashMap, FxHashSet};
use sable_diagnostic::DiagnosticQueue;
use sable_ir::ast::{Ast, DeclId, NodeId};
use sable_ir::{Name, StringInterner};
use sable_lir::{ConstTable, IrTypeId, Module, TypeTable};
use sable_types::{TypeIdx, TypePool, TypedUnit};

use crate::abi::FnAbi;
use crate::layout::FieldLoc;
use crate::LowerError;

/// One function to lower: the signature type, the parameter declarations
/// (aligned with the signature's parameter list), and the body.
#[derive(Clone, Debug)]
pub struct FunctionSource {
    pub name: Name,
    /// Index of a `SourceType::Function`.
    pub sig: TypeIdx,
    pub params: Vec<DeclId>,
    pub body: NodeId,
    /// Calls to this function may propagate an exception.
    pub may_unwind: bool,
}

/// Unit-scoped lowering state.
pub struct LowerCx<'a> {
    pub pool: &'a TypePool,
    pub ast: &'a Ast,
    pub typed: &'a TypedUnit,
    pub interner: &'a StringInterner,

    /// Target type arena (structural identity table for types).
    pub types: TypeTable,
    /// Unit-lifetime constant identity table.
    pub consts: ConstTable,
    /// Recoverable diagnostics, accumulated per source location.
    pub diags: DiagnosticQueue,
    /// Lowered output.
    pub module: Module,

    /// Memoized source-type → target-type conversions.
    pub(crate) layout_cache: FxHashMap<TypeIdx, IrTypeId>,
    /// Source field → layout element mapping for converted records.
    pub(crate) field_locs: FxHashMap<(TypeIdx, u32), FieldLoc>,
    /// Placeholder slots awaiting the post-conversion patch pass.
    pub(crate) pending_pointees: Vec<(IrTypeId, TypeIdx)>,
    /// Aggregates currently mid-conversion (cycle detection).
    pub(crate) converting: FxHashSet<TypeIdx>,
    /// Conversion nesting depth; the patch pass runs when it returns to 0.
    pub(crate) convert_depth: u32,
    /// Classification cache keyed by (signature type, convention name).
    pub(crate) abi_cache: FxHashMap<(TypeIdx, &'static str), FnAbi>,
    /// Symbols marked "may propagate an exception"; calls to them are
    /// routed through the landing-block machinery when a scope is active.
    pub(crate) unwinding: FxHashSet<Name>,
}

impl<'a> LowerCx<'a> {
    pub fn new(
        pool: &'a TypePool,
        ast: &'a Ast,
        typed: &'a TypedUnit,
        interner: &'a StringInterner,
    ) -> Self {
        LowerCx {
            pool,
            ast,
            typed,
            interner,
            types: TypeTable::new(),
            consts: ConstTable::new(),
            diags: DiagnosticQueue::new(),
            module: Module::new(),
            layout_cache: FxHashMap::default(),
            field_locs: FxHashMap::default(),
            pending_pointees: Vec::new(),
            converting: FxHashSet::default(),
            convert_depth: 0,
            abi_cache: FxHashMap::default(),
            unwinding: FxHashSet::default(),
        }
    }

    /// Mark a symbol as potentially propagating an exception.
    pub fn mark_may_unwind(&mut self, symbol: Name) {
        self.unwinding.insert(symbol);
    }

    /// Whether calls to `symbol` may propagate an exception.
    pub fn callee_may_unwind(&self, symbol: Name) -> bool {
        self.unwinding.contains(&symbol)
    }

    /// A node's static type; untyped nodes are a contract violation when a
    /// type is required.
    pub fn node_type(&self, node: NodeId) -> Result<TypeIdx, LowerError> {
        let ty = self.typed.node_type(node);
        if ty.is_none() {
            return Err(LowerError::contract(format!(
                "node {node:?} reached lowering without a type"
            )));
        }
        Ok(ty)
    }

    /// A declaration's type; untyped declarations are a contract violation.
    pub fn decl_type(&self, decl: DeclId) -> Result<TypeIdx, LowerError> {
        let ty = self.typed.decl_type(decl);
        if ty.is_none() {
            return Err(LowerError::contract(format!(
                "declaration {decl:?} reached lowering without a type"
            )));
        }
        Ok(ty)
    }

    /// Whether a node's static type is an aggregate (and therefore subject
    /// to the destination-pointer convention).
    pub fn is_aggregate_node(&self, node: NodeId) -> Result<bool, LowerError> {
        Ok(self.pool.is_aggregate(self.node_type(node)?))
    }

    /// Tear down the unit, yielding the lowered module. Diagnostics remain
    /// on the queue for the caller to drain.
    pub fn finish(self) -> (Module, DiagnosticQueue) {
        (self.module, self.diags)
    }
}
