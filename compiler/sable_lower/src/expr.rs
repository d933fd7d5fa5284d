//! Expression lowering coordinator.
//!
//! `FunctionLowerer` owns one function's mutable lowering state (builder,
//! binding environment, scope stack, label map) and dispatches each
//! [`ExprKind`] to a focused `lower_*` method implemented across the
//! sibling modules:
//!
//! ```text
//! FunctionLowerer
//!   ├── lvalue.rs       — addresses, loads/stores, bit-field windows
//!   ├── operators.rs    — unary/binary by type category, division identities
//!   ├── calls.rs        — calls, invokes, ABI application
//!   ├── control_flow.rs — blocks, labels, goto, if, switch, protected regions
//!   └── asm.rs          — inline assembly with constrained operands
//! ```
//!
//! The engine-wide convention: `lower(node, dest)` receives a destination
//! place exactly when the node's static type is an aggregate. An aggregate
//! result is written through `dest` and the call returns `None`; a scalar
//! result is returned directly. Breaking the convention is a fatal contract
//! error — the AST was validated upstream.

use rustc_hash::FxHashMap;
use sable_ir::ast::{Constant, DeclId, ExprKind, NodeId};
use sable_ir::Name;
use sable_lir::{BlockId, ConstValue, InstrKind, IrTypeId, Operand, Terminator, ValueId};
use sable_types::{SourceType, TypeIdx};

use crate::abi::{CallAbi, FnAbi};
use crate::builder::{val, FuncBuilder};
use crate::collab::{DebugSink, StorageDisposition, StorageResolver};
use crate::lvalue::Place;
use crate::scope::{Binding, BindingScope, EhScope, ScopePath};
use crate::{LowerCx, LowerError};

/// One branch target label and everything known about it so far.
pub(crate) struct LabelInfo {
    pub block: BlockId,
    pub defined: bool,
    /// Scope path at the definition site (valid once `defined`).
    pub path: ScopePath,
    /// Scope paths of forward gotos, validated at definition.
    pub goto_paths: Vec<ScopePath>,
}

/// Per-function lowering state.
///
/// Everything here dies with the function: values, bindings, scopes, labels.
/// Unit-lived state (type layouts, constants, diagnostics) stays on the
/// shared [`LowerCx`].
pub(crate) struct FunctionLowerer<'c, 'a> {
    pub cx: &'c mut LowerCx<'a>,
    pub builder: FuncBuilder,
    pub bindings: BindingScope,
    /// Lazily materialized storage for declarations first seen through a
    /// plain name reference (globals, un-bound locals).
    pub materialized: FxHashMap<DeclId, Binding>,
    pub scopes: Vec<EhScope>,
    pub labels: FxHashMap<Name, LabelInfo>,
    /// Scope path each block was created under (empty = function root).
    pub block_paths: FxHashMap<BlockId, ScopePath>,
    pub next_scope_id: u32,
    pub next_fixup_id: u32,
    /// Address of the return slot (hidden sret parameter or an entry slot).
    pub ret_slot: Option<Operand>,
    /// Shared return block for returns that must unwind scopes first.
    pub ret_block: Option<BlockId>,
    pub fn_abi: FnAbi,
    /// Source-level return type.
    pub src_ret: TypeIdx,
    pub storage: &'c mut dyn StorageResolver,
    pub debug: &'c mut dyn DebugSink,
    pub abi: &'c mut dyn CallAbi,
}

impl<'c, 'a> FunctionLowerer<'c, 'a> {
    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Lower one node. `dest` must be supplied exactly when the node's
    /// static type is an aggregate.
    pub fn lower(
        &mut self,
        node: NodeId,
        dest: Option<&Place>,
    ) -> Result<Option<Operand>, LowerError> {
        sable_stack::ensure_sufficient_stack(|| self.lower_inner(node, dest))
    }

    fn lower_inner(
        &mut self,
        node: NodeId,
        dest: Option<&Place>,
    ) -> Result<Option<Operand>, LowerError> {
        if !node.is_valid() {
            return Err(LowerError::contract("lowering the NONE node"));
        }
        let ty = self.cx.typed.node_type(node);
        let is_aggregate = !ty.is_none() && self.cx.pool.is_aggregate(ty);
        if is_aggregate && dest.is_none() {
            return Err(LowerError::contract(format!(
                "aggregate-typed node {node:?} lowered without a destination"
            )));
        }
        if !is_aggregate && dest.is_some() {
            return Err(LowerError::contract(format!(
                "non-aggregate node {node:?} lowered with a destination"
            )));
        }

        let kind = *self.cx.ast.kind(node);
        match kind {
            // -- Bindings and scope entry --
            ExprKind::Block { stmts } => self.lower_block(stmts),
            ExprKind::Bind { decl, init } => self.lower_bind(decl, init),

            // -- Control constructs --
            ExprKind::Label { name } => self.lower_label(node, name),
            ExprKind::Goto { name } => self.lower_goto(name),
            ExprKind::If {
                cond,
                then_blk,
                else_blk,
            } => self.lower_if(cond, then_blk, else_blk),
            ExprKind::Switch {
                scrutinee,
                cases,
                default,
            } => self.lower_switch(scrutinee, cases, default),
            ExprKind::Protected { body, handler } => self.lower_protected(node, body, handler),
            ExprKind::Return { value } => self.lower_return(value),
            ExprKind::Case { .. } => Err(LowerError::contract(
                "`Case` node outside a switch case list",
            )),
            ExprKind::CatchClause { .. } => Err(LowerError::contract(
                "`CatchClause` node outside a catch handler",
            )),

            // -- Addressable places used as values --
            ExprKind::NameRef { .. }
            | ExprKind::Deref { .. }
            | ExprKind::Index { .. }
            | ExprKind::Field { .. }
            | ExprKind::Reinterpret { .. } => {
                let place = self.lower_address(node)?;
                self.load_place(&place, ty, dest)
            }
            ExprKind::AddrOf { place } => {
                let place = self.lower_address(place)?;
                if place.bit.is_some() {
                    return Err(LowerError::contract("address of a bit-field"));
                }
                Ok(Some(place.addr))
            }
            ExprKind::Assign { target, value } => self.lower_assign(target, value),

            // -- Calls and operators --
            ExprKind::Call { callee, args } => self.lower_call(node, callee, args, dest),
            ExprKind::Unary { op, operand } => self.lower_unary(node, op, operand, dest),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(node, op, lhs, rhs, dest),

            // -- Constructors and constants --
            ExprKind::Construct { fields } => {
                let dest = dest.ok_or_else(|| {
                    LowerError::contract("aggregate constructor without a destination")
                })?;
                self.lower_construct(node, fields, dest)?;
                Ok(None)
            }
            ExprKind::Const(constant) => Ok(Some(self.lower_const(node, ty, constant)?)),

            // -- Extended --
            ExprKind::Asm { template, operands } => self.lower_asm(node, template, operands),
        }
    }

    // -----------------------------------------------------------------------
    // Constant leaves
    // -----------------------------------------------------------------------

    /// Constants are interned in the unit-lifetime table; the same literal
    /// in two functions shares one handle.
    fn lower_const(
        &mut self,
        node: NodeId,
        ty: TypeIdx,
        constant: Constant,
    ) -> Result<Operand, LowerError> {
        let ir = self.cx.convert_type(ty)?;
        let id = match constant {
            Constant::Int(v) => self.cx.consts.int(ir, v),
            Constant::Float(v) => self.cx.consts.float(ir, v),
            Constant::Null => {
                if !matches!(self.cx.pool.get(ty), SourceType::Pointer { .. }) {
                    return Err(LowerError::contract(format!(
                        "null constant at {node:?} with non-pointer type"
                    )));
                }
                self.cx.consts.intern(ConstValue::Null { ty: ir })
            }
        };
        Ok(Operand::Const(id))
    }

    // -----------------------------------------------------------------------
    // Aggregate constructors
    // -----------------------------------------------------------------------

    /// Positional constructor: one value per source field (records), element
    /// (arrays), or component (complex). Unmentioned trailing fields are
    /// zero-filled.
    fn lower_construct(
        &mut self,
        node: NodeId,
        fields: sable_ir::ast::NodeRange,
        dest: &Place,
    ) -> Result<(), LowerError> {
        let ty = self.cx.node_type(node)?;
        let values: Vec<NodeId> = self.cx.ast.list(fields).to_vec();
        match self.cx.pool.get(ty).clone() {
            SourceType::Record(record) => {
                for (index, field) in record.fields.iter().enumerate() {
                    if field.dynamic_offset.is_some() {
                        continue;
                    }
                    let place = self.field_place(dest, ty, index as u32, field)?;
                    match values.get(index) {
                        Some(&value) => self.store_through(&place, field.ty, value)?,
                        None => self.zero_place(&place, field.ty)?,
                    }
                    if record.is_union {
                        // Only the first alternative can be initialized.
                        break;
                    }
                }
            }
            SourceType::Array { element, len } => {
                let elem_ir = self.cx.convert_type(element)?;
                let len = len.unwrap_or(0);
                for i in 0..len {
                    let idx_ty = self.cx.types.int(64);
                    let idx = self.cx.consts.int(idx_ty, i as i64);
                    let elem_ptr = self.ptr_to(elem_ir);
                    let addr = self.builder.push(
                        InstrKind::ElemAddr {
                            base: dest.addr,
                            element: elem_ir,
                            index: Operand::Const(idx),
                        },
                        elem_ptr,
                    );
                    let place = Place::direct(val(addr));
                    match values.get(i as usize) {
                        Some(&value) => self.store_through(&place, element, value)?,
                        None => self.zero_place(&place, element)?,
                    }
                }
            }
            SourceType::Complex { part } => {
                let agg = self.cx.convert_type(ty)?;
                for component in 0..2u32 {
                    let addr = self.field_addr(dest.addr, agg, component);
                    let place = Place::direct(addr);
                    match values.get(component as usize) {
                        Some(&value) => self.store_through(&place, part, value)?,
                        None => self.zero_place(&place, part)?,
                    }
                }
            }
            other => {
                return Err(LowerError::contract(format!(
                    "constructor for non-aggregate {other:?}"
                )));
            }
        }
        Ok(())
    }

    /// Store the lowered `value` through `place` (aggregate or scalar).
    pub(crate) fn store_through(
        &mut self,
        place: &Place,
        ty: TypeIdx,
        value: NodeId,
    ) -> Result<(), LowerError> {
        if self.cx.pool.is_aggregate(ty) {
            self.lower(value, Some(place))?;
            return Ok(());
        }
        let v = self
            .lower(value, None)?
            .ok_or_else(|| LowerError::contract("scalar initializer produced no value"))?;
        self.store_scalar(place, ty, v)
    }

    /// Zero-fill a place of the given source type.
    fn zero_place(&mut self, place: &Place, ty: TypeIdx) -> Result<(), LowerError> {
        let ir = self.cx.convert_type(ty)?;
        let zero = self.cx.consts.intern(ConstValue::Zero { ty: ir });
        if place.bit.is_some() {
            return self.store_scalar(place, ty, Operand::Const(zero));
        }
        let void = self.cx.types.void();
        self.builder.push_void(
            InstrKind::Store {
                addr: place.addr,
                value: Operand::Const(zero),
            },
            void,
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Convert a source type, memoized on the context.
    pub(crate) fn ir_type(&mut self, ty: TypeIdx) -> Result<IrTypeId, LowerError> {
        self.cx.convert_type(ty)
    }

    /// Pointer-to helper.
    pub(crate) fn ptr_to(&mut self, pointee: IrTypeId) -> IrTypeId {
        self.cx.types.ptr(pointee)
    }

    /// Integer constant operand of an IR type.
    pub(crate) fn const_int(&mut self, ty: IrTypeId, value: i64) -> Operand {
        Operand::Const(self.cx.consts.int(ty, value))
    }

    /// The current scope-id path, outermost first.
    pub(crate) fn current_path(&self) -> ScopePath {
        self.scopes.iter().map(|s| s.id).collect()
    }

    /// Append a block, recording the scope path it was created under.
    pub(crate) fn new_block(&mut self, label: impl Into<String>) -> BlockId {
        let block = self.builder.append_block(label);
        self.block_paths.insert(block, self.current_path());
        block
    }

    /// The scope path a block belongs to (function root if unknown).
    pub(crate) fn block_path(&self, block: BlockId) -> ScopePath {
        self.block_paths.get(&block).cloned().unwrap_or_default()
    }

    /// Resolve a declaration to its storage, materializing lazily on first
    /// use through the external storage collaborator.
    pub(crate) fn decl_binding(&mut self, decl: DeclId) -> Result<Binding, LowerError> {
        if let Some(binding) = self.bindings.lookup(decl) {
            return Ok(binding);
        }
        if let Some(binding) = self.materialized.get(&decl) {
            return Ok(*binding);
        }
        let ty = self.cx.decl_type(decl)?;
        let name = self.cx.ast.decl(decl).name;
        let disposition = self.storage.resolve(decl, name, ty);
        let ir = self.ir_type(ty)?;
        let addr = match disposition {
            StorageDisposition::Stack => {
                let ptr_ty = self.ptr_to(ir);
                val(self.builder.entry_slot(ir, ptr_ty))
            }
            StorageDisposition::Global { symbol } => {
                if !self.cx.module.globals.iter().any(|g| g.name == symbol) {
                    self.cx
                        .module
                        .globals
                        .push(sable_lir::GlobalDecl { name: symbol, ty: ir });
                }
                let ptr_ty = self.ptr_to(ir);
                Operand::Const(
                    self.cx
                        .consts
                        .intern(ConstValue::GlobalAddr { ty: ptr_ty, symbol }),
                )
            }
        };
        let binding = Binding { addr, ty };
        self.materialized.insert(decl, binding);
        self.debug.storage_bound(decl, name);
        Ok(binding)
    }

    /// Emit a constant-offset element address into an aggregate.
    pub(crate) fn field_addr(
        &mut self,
        base: Operand,
        aggregate: IrTypeId,
        element: u32,
    ) -> Operand {
        let elem_ty = match self.cx.types.get(aggregate) {
            sable_lir::IrType::Aggregate(layout) => layout.elements[element as usize].ty,
            _ => aggregate,
        };
        let ptr = self.ptr_to(elem_ty);
        val(self.builder.push(
            InstrKind::FieldAddr {
                base,
                aggregate,
                element,
            },
            ptr,
        ))
    }

    /// Allocate a function-entry temporary of the given source type.
    pub(crate) fn temp_slot(&mut self, ty: TypeIdx) -> Result<Operand, LowerError> {
        let ir = self.ir_type(ty)?;
        let ptr_ty = self.ptr_to(ir);
        Ok(val(self.builder.entry_slot(ir, ptr_ty)))
    }

    /// Emit a pending-exit marker in the current block and return its fixup
    /// payload id.
    pub(crate) fn emit_pending_exit(&mut self) -> u32 {
        let id = self.next_fixup_id;
        self.next_fixup_id += 1;
        self.builder.terminate(Terminator::PendingExit { fixup: id });
        id
    }

    /// Normalize a scalar of source type `ty` to an `i1` condition.
    ///
    /// Comparisons already produce a flag and re-comparing against zero is
    /// harmless; keeping one rule for every condition site is simpler than
    /// special-casing.
    pub(crate) fn as_condition(
        &mut self,
        value: Operand,
        ty: TypeIdx,
    ) -> Result<ValueId, LowerError> {
        let i1 = self.cx.types.int(1);
        let ir = self.ir_type(ty)?;
        let zero = if matches!(self.cx.pool.get(ty), SourceType::Pointer { .. }) {
            Operand::Const(self.cx.consts.intern(ConstValue::Null { ty: ir }))
        } else {
            self.const_int(ir, 0)
        };
        Ok(self.builder.push(
            InstrKind::Cmp {
                pred: sable_lir::CmpPred::Ne,
                lhs: value,
                rhs: zero,
            },
            i1,
        ))
    }
}
