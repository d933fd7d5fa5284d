//! Call lowering.
//!
//! Argument and return shapes come from the ABI marshaler; this module only
//! applies them: loading expanded parts, spilling non-addressable aggregates
//! to temporaries, prepending the hidden return pointer, and widening or
//! storing results.
//!
//! A call whose target is marked "may propagate an exception", made while a
//! cleanup/catch scope is active, becomes an invoke routed through the
//! innermost scope's landing block. Everything else is a plain call.

use sable_ir::ast::{ExprKind, NodeId, NodeRange};
use sable_ir::Name;
use sable_lir::{Callee, InstrKind, IrTypeId, Operand};
use sable_types::{FnSig, SourceType, TypeIdx};
use smallvec::SmallVec;

use crate::abi::{
    classify_argument, classify_return, compute_fn_abi, ArgPassing, FnAbi, RetPassing,
};
use crate::builder::val;
use crate::expr::FunctionLowerer;
use crate::lvalue::Place;
use crate::LowerError;

/// The signature a call site is lowered against.
enum CallSig {
    /// The declared signature type.
    Declared(TypeIdx),
    /// A call-site signature synthesized for an unprototyped declaration:
    /// the declared return type with the actual argument types.
    Adhoc { params: Vec<TypeIdx>, ret: TypeIdx },
}

/// A resolved call target.
enum Target {
    Direct { symbol: Name, sig: CallSig },
    Indirect { ptr: Operand, sig: TypeIdx },
}

impl<'c, 'a> FunctionLowerer<'c, 'a> {
    pub(crate) fn lower_call(
        &mut self,
        _node: NodeId,
        callee: NodeId,
        args: NodeRange,
        dest: Option<&Place>,
    ) -> Result<Option<Operand>, LowerError> {
        let arg_nodes: Vec<NodeId> = self.cx.ast.list(args).to_vec();
        let target = self.resolve_callee(callee, &arg_nodes)?;

        let (fn_abi, sig_ir, symbol_or_ptr) = match target {
            Target::Direct {
                symbol,
                sig: CallSig::Declared(sig),
            } => {
                let fn_sig = self.declared_sig(sig)?;
                let fn_abi = self.call_site_abi(Some(sig), &fn_sig, &arg_nodes)?;
                let sig_ir = self.ir_type(sig)?;
                (fn_abi, sig_ir, Ok(symbol))
            }
            Target::Direct {
                symbol,
                sig: CallSig::Adhoc { params, ret },
            } => {
                let fn_sig = FnSig {
                    params,
                    ret,
                    variadic: false,
                };
                let fn_abi = self.call_site_abi(None, &fn_sig, &arg_nodes)?;
                let sig_ir = self.adhoc_sig_ir(&fn_sig)?;
                (fn_abi, sig_ir, Ok(symbol))
            }
            Target::Indirect { ptr, sig } => {
                let fn_sig = self.declared_sig(sig)?;
                let fn_abi = self.call_site_abi(Some(sig), &fn_sig, &arg_nodes)?;
                let sig_ir = self.ir_type(sig)?;
                (fn_abi, sig_ir, Err(ptr))
            }
        };

        // Lower arguments into their physical shapes.
        let mut lowered: SmallVec<[Operand; 6]> = SmallVec::new();
        if let RetPassing::Hidden { .. } = fn_abi.ret {
            let dest = dest.ok_or_else(|| {
                LowerError::contract("hidden-pointer return without a destination")
            })?;
            lowered.push(dest.addr);
        }
        for (index, &arg) in arg_nodes.iter().enumerate() {
            let passing = fn_abi
                .params
                .get(index)
                .cloned()
                .ok_or_else(|| LowerError::contract("argument count exceeds classification"))?;
            self.lower_one_argument(arg, &passing, &mut lowered)?;
        }

        let callee_ir = match symbol_or_ptr {
            Ok(symbol) => Callee::Direct {
                symbol,
                sig: sig_ir,
            },
            Err(ptr) => Callee::Indirect { ptr, sig: sig_ir },
        };
        let ret_ir = fn_abi.ir_ret(self.cx);
        let produces_value = !matches!(self.cx.types.get(ret_ir), sable_lir::IrType::Void);

        let may_unwind = match &callee_ir {
            Callee::Direct { symbol, .. } => self.cx.callee_may_unwind(*symbol),
            Callee::Indirect { .. } => false,
        };

        let result: Option<Operand> = if may_unwind && !self.scopes.is_empty() {
            let landing = self.ensure_landing()?;
            let normal = self.new_block("invoke.cont");
            let value = self
                .builder
                .terminate_invoke(callee_ir, lowered, ret_ir, produces_value, normal, landing);
            self.builder.position_at_end(normal);
            value.map(val)
        } else if produces_value {
            Some(val(self.builder.push(
                InstrKind::Call {
                    callee: callee_ir,
                    args: lowered,
                },
                ret_ir,
            )))
        } else {
            let void = self.cx.types.void();
            self.builder.push_void(
                InstrKind::Call {
                    callee: callee_ir,
                    args: lowered,
                },
                void,
            );
            None
        };

        // Shape the result per the return classification.
        match fn_abi.ret {
            RetPassing::Void => Ok(None),
            RetPassing::Scalar { .. } => Ok(result),
            RetPassing::Widened { .. } => {
                let dest = dest.ok_or_else(|| {
                    LowerError::contract("widened aggregate return without a destination")
                })?;
                let value = result
                    .ok_or_else(|| LowerError::contract("widened return produced no value"))?;
                let void = self.cx.types.void();
                self.builder.push_void(
                    InstrKind::Store {
                        addr: dest.addr,
                        value,
                    },
                    void,
                );
                Ok(None)
            }
            // The callee already wrote through the hidden pointer.
            RetPassing::Hidden { .. } => Ok(None),
        }
    }

    fn declared_sig(&self, sig: TypeIdx) -> Result<FnSig, LowerError> {
        match self.cx.pool.get(sig) {
            SourceType::Function(fn_sig) => Ok(fn_sig.clone()),
            other => Err(LowerError::contract(format!(
                "call through non-function type {other:?}"
            ))),
        }
    }

    /// The IR signature of an ad-hoc (call-site synthesized) signature.
    fn adhoc_sig_ir(&mut self, fn_sig: &FnSig) -> Result<IrTypeId, LowerError> {
        let mut params = Vec::with_capacity(fn_sig.params.len());
        for &p in &fn_sig.params {
            params.push(self.ir_type(p)?);
        }
        let ret = self.ir_type(fn_sig.ret)?;
        Ok(self.cx.types.func(params, ret, fn_sig.variadic))
    }

    /// Classify the call site: the cached signature classification when the
    /// signature has a type index, a direct classification otherwise, with
    /// variadic extras classified individually.
    fn call_site_abi(
        &mut self,
        sig_idx: Option<TypeIdx>,
        fn_sig: &FnSig,
        arg_nodes: &[NodeId],
    ) -> Result<FnAbi, LowerError> {
        let mut fn_abi = match sig_idx {
            Some(sig) => compute_fn_abi(self.cx, sig, self.abi)?,
            None => {
                let ret = classify_return(self.cx, fn_sig.ret, self.abi)?;
                let mut params = Vec::with_capacity(fn_sig.params.len());
                for &p in &fn_sig.params {
                    params.push(classify_argument(self.cx, p, self.abi)?);
                }
                FnAbi { params, ret }
            }
        };
        if arg_nodes.len() > fn_sig.params.len() {
            if !fn_sig.variadic {
                return Err(LowerError::contract(format!(
                    "{} arguments passed to a {}-parameter function",
                    arg_nodes.len(),
                    fn_sig.params.len()
                )));
            }
            for &extra in &arg_nodes[fn_sig.params.len()..] {
                let ty = self.cx.node_type(extra)?;
                fn_abi
                    .params
                    .push(classify_argument(self.cx, ty, self.abi)?);
            }
        } else if arg_nodes.len() < fn_sig.params.len() {
            return Err(LowerError::contract(format!(
                "{} arguments passed to a {}-parameter function",
                arg_nodes.len(),
                fn_sig.params.len()
            )));
        }
        Ok(fn_abi)
    }

    /// Lower one argument into its physical operands.
    fn lower_one_argument(
        &mut self,
        arg: NodeId,
        passing: &ArgPassing,
        out: &mut SmallVec<[Operand; 6]>,
    ) -> Result<(), LowerError> {
        match passing {
            ArgPassing::Scalar { .. } => {
                let v = self
                    .lower(arg, None)?
                    .ok_or_else(|| LowerError::contract("scalar argument produced no value"))?;
                out.push(v);
            }
            ArgPassing::ByRef { .. } => {
                let addr = self.argument_address(arg)?;
                out.push(addr);
            }
            ArgPassing::Expanded { parts } => {
                let addr = self.argument_address(arg)?;
                let parts = parts.clone();
                for part in parts {
                    let piece_addr = if part.offset == 0 {
                        addr
                    } else {
                        let i64_ty = self.cx.types.int(64);
                        let off = self.const_int(i64_ty, part.offset as i64);
                        let ptr = self.ptr_to(part.ty);
                        val(self.builder.push(
                            InstrKind::ByteAddr {
                                base: addr,
                                offset: off,
                            },
                            ptr,
                        ))
                    };
                    out.push(val(self.builder.push(
                        InstrKind::Load {
                            addr: piece_addr,
                            ty: part.ty,
                        },
                        part.ty,
                    )));
                }
            }
        }
        Ok(())
    }

    /// The memory holding an aggregate argument: the value's own storage
    /// when it is addressable, a spilled temporary otherwise.
    fn argument_address(&mut self, arg: NodeId) -> Result<Operand, LowerError> {
        let ty = self.cx.node_type(arg)?;
        if !self.cx.pool.is_aggregate(ty) {
            // A by-reference scalar still needs memory to point at.
            let tmp = self.temp_slot(ty)?;
            let v = self
                .lower(arg, None)?
                .ok_or_else(|| LowerError::contract("argument produced no value"))?;
            let void = self.cx.types.void();
            self.builder
                .push_void(InstrKind::Store { addr: tmp, value: v }, void);
            return Ok(tmp);
        }
        match *self.cx.ast.kind(arg) {
            ExprKind::NameRef { .. }
            | ExprKind::Deref { .. }
            | ExprKind::Index { .. }
            | ExprKind::Field { .. }
            | ExprKind::Reinterpret { .. } => {
                let place = self.lower_address(arg)?;
                if place.bit.is_some() {
                    return Err(LowerError::contract("aggregate argument from a bit window"));
                }
                Ok(place.addr)
            }
            _ => {
                let tmp = self.temp_slot(ty)?;
                let place = Place::direct(tmp);
                self.lower(arg, Some(&place))?;
                Ok(tmp)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Callee resolution
    // -----------------------------------------------------------------------

    /// Resolve the callee node to a direct or indirect target.
    ///
    /// A target whose declared signature differs from the call site only
    /// trivially — same return type, zero declared parameters — re-resolves
    /// to its more specific underlying declaration, avoiding a pointless
    /// signature mismatch.
    fn resolve_callee(
        &mut self,
        callee: NodeId,
        arg_nodes: &[NodeId],
    ) -> Result<Target, LowerError> {
        let callee_ty = self.cx.node_type(callee)?;
        match *self.cx.ast.kind(callee) {
            ExprKind::NameRef { decl } => {
                if let SourceType::Function(fn_sig) = self.cx.pool.get(callee_ty) {
                    let symbol = self.cx.ast.decl(decl).name;
                    let sig =
                        self.resolve_unprototyped(callee_ty, fn_sig.clone(), arg_nodes)?;
                    return Ok(Target::Direct { symbol, sig });
                }
                // A function-pointer variable: load and call indirectly.
                self.indirect_target(callee, callee_ty)
            }
            ExprKind::Deref { ptr } => {
                // `(*&f)(...)` re-resolves to the function itself.
                if let ExprKind::AddrOf { place } = *self.cx.ast.kind(ptr) {
                    if let ExprKind::NameRef { decl } = *self.cx.ast.kind(place) {
                        let decl_ty = self.cx.decl_type(decl)?;
                        if let SourceType::Function(fn_sig) = self.cx.pool.get(decl_ty) {
                            let symbol = self.cx.ast.decl(decl).name;
                            let sig = self.resolve_unprototyped(
                                decl_ty,
                                fn_sig.clone(),
                                arg_nodes,
                            )?;
                            return Ok(Target::Direct { symbol, sig });
                        }
                    }
                }
                self.indirect_target(callee, callee_ty)
            }
            _ => self.indirect_target(callee, callee_ty),
        }
    }

    /// A declared signature with zero parameters called with arguments (an
    /// unprototyped declaration) adopts the call site's argument types,
    /// keeping the declared return type.
    fn resolve_unprototyped(
        &mut self,
        sig: TypeIdx,
        fn_sig: FnSig,
        arg_nodes: &[NodeId],
    ) -> Result<CallSig, LowerError> {
        if fn_sig.params.is_empty() && !arg_nodes.is_empty() && !fn_sig.variadic {
            let mut params = Vec::with_capacity(arg_nodes.len());
            for &arg in arg_nodes {
                params.push(self.cx.node_type(arg)?);
            }
            return Ok(CallSig::Adhoc {
                params,
                ret: fn_sig.ret,
            });
        }
        Ok(CallSig::Declared(sig))
    }

    fn indirect_target(
        &mut self,
        callee: NodeId,
        callee_ty: TypeIdx,
    ) -> Result<Target, LowerError> {
        let sig = match self.cx.pool.get(callee_ty) {
            SourceType::Pointer { pointee } => *pointee,
            SourceType::Function(_) => callee_ty,
            other => {
                return Err(LowerError::contract(format!(
                    "call through non-function value {other:?}"
                )));
            }
        };
        if !matches!(self.cx.pool.get(sig), SourceType::Function(_)) {
            return Err(LowerError::contract(
                "indirect call through a pointer to a non-function",
            ));
        }
        let ptr = self
            .lower(callee, None)?
            .ok_or_else(|| LowerError::contract("indirect callee produced no value"))?;
        Ok(Target::Indirect { ptr, sig })
    }
}
