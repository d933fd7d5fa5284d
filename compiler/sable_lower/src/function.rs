//! Per-function lowering driver.
//!
//! Classifies the signature, builds the physical parameter list (hidden
//! return slot first), binds parameter declarations to storage, lowers the
//! body, and finishes: shared return block, implicit termination, and the
//! end-of-function consistency checks (balanced scopes, no unresolved
//! fixups, no dangling labels).
//!
//! A function's mutable lowering state — value ids, bindings, scope stack,
//! label map — lives and dies inside this call. Unit-scoped tables on the
//! context (type layouts, constants, classifications) persist across
//! functions, which is exactly the two-tier identity-table lifecycle.

use rustc_hash::FxHashMap;
use sable_lir::{FnAttrs, InstrKind, IrFunction, Operand, Terminator};
use sable_types::SourceType;

use crate::abi::{compute_fn_abi, ArgPassing, CallAbi, RetPassing};
use crate::builder::{val, FuncBuilder};
use crate::collab::{DebugSink, StorageResolver};
use crate::expr::FunctionLowerer;
use crate::scope::{Binding, BindingScope, ScopePath};
use crate::{FunctionSource, LowerCx, LowerError};

/// Lower one function to IR.
pub fn lower_function(
    cx: &mut LowerCx<'_>,
    source: &FunctionSource,
    abi: &mut dyn CallAbi,
    storage: &mut dyn StorageResolver,
    debug: &mut dyn DebugSink,
) -> Result<IrFunction, LowerError> {
    let fn_sig = match cx.pool.get(source.sig) {
        SourceType::Function(fn_sig) => fn_sig.clone(),
        other => {
            return Err(LowerError::contract(format!(
                "function source with non-function signature {other:?}"
            )));
        }
    };
    if fn_sig.params.len() != source.params.len() {
        return Err(LowerError::contract(format!(
            "function `{}` declares {} parameters but its signature has {}",
            cx.interner.resolve(source.name),
            source.params.len(),
            fn_sig.params.len()
        )));
    }

    tracing::debug!(
        function = cx.interner.resolve(source.name),
        "lowering function"
    );

    let fn_abi = compute_fn_abi(cx, source.sig, abi)?;
    let params = fn_abi.build_params();
    let ret_ir = fn_abi.ir_ret(cx);

    let mut attrs = FnAttrs::empty();
    if source.may_unwind {
        attrs |= FnAttrs::MAY_UNWIND;
    }
    if fn_sig.variadic {
        attrs |= FnAttrs::VARIADIC;
    }

    let builder = FuncBuilder::new(source.name, params, ret_ir, attrs);
    let hidden_ret = matches!(fn_abi.ret, RetPassing::Hidden { .. });
    let ret_slot = hidden_ret.then(|| val(builder.param(0)));

    let mut lowerer = FunctionLowerer {
        cx,
        builder,
        bindings: BindingScope::new(),
        materialized: FxHashMap::default(),
        scopes: Vec::new(),
        labels: FxHashMap::default(),
        block_paths: FxHashMap::default(),
        next_scope_id: 0,
        next_fixup_id: 0,
        ret_slot,
        ret_block: None,
        fn_abi: fn_abi.clone(),
        src_ret: fn_sig.ret,
        storage,
        debug,
        abi,
    };
    lowerer
        .block_paths
        .insert(sable_lir::BlockId::ENTRY, ScopePath::new());

    lowerer.bind_parameters(source, hidden_ret)?;
    lowerer.lower(source.body, None)?;
    lowerer.finish_function()
}

impl<'c, 'a> FunctionLowerer<'c, 'a> {
    /// Bind each parameter declaration to storage and spill incoming
    /// register values into it.
    fn bind_parameters(
        &mut self,
        source: &FunctionSource,
        hidden_ret: bool,
    ) -> Result<(), LowerError> {
        let mut phys = usize::from(hidden_ret);
        let passings: Vec<ArgPassing> = self.fn_abi.params.clone();
        for (&decl, passing) in source.params.iter().zip(passings.iter()) {
            let src_ty = self.cx.decl_type(decl)?;
            let name = self.cx.ast.decl(decl).name;
            let binding = match passing {
                ArgPassing::Scalar { ty } => {
                    let ptr_ty = self.ptr_to(*ty);
                    let slot = val(self.builder.entry_slot(*ty, ptr_ty));
                    let incoming = val(self.builder.param(phys));
                    phys += 1;
                    let void = self.cx.types.void();
                    self.builder.push_void(
                        InstrKind::Store {
                            addr: slot,
                            value: incoming,
                        },
                        void,
                    );
                    Binding {
                        addr: slot,
                        ty: src_ty,
                    }
                }
                ArgPassing::ByRef { .. } => {
                    // The parameter is already the address of caller-owned
                    // storage.
                    let incoming = val(self.builder.param(phys));
                    phys += 1;
                    Binding {
                        addr: incoming,
                        ty: src_ty,
                    }
                }
                ArgPassing::Expanded { parts } => {
                    // Reconstitute the aggregate from its scalar pieces.
                    let agg_ir = self.ir_type(src_ty)?;
                    let ptr_ty = self.ptr_to(agg_ir);
                    let slot = val(self.builder.entry_slot(agg_ir, ptr_ty));
                    let void = self.cx.types.void();
                    for part in parts {
                        let incoming = val(self.builder.param(phys));
                        phys += 1;
                        let addr = if part.offset == 0 {
                            slot
                        } else {
                            let i64_ty = self.cx.types.int(64);
                            let off = self.const_int(i64_ty, part.offset as i64);
                            let ptr = self.ptr_to(part.ty);
                            val(self.builder.push(
                                InstrKind::ByteAddr {
                                    base: slot,
                                    offset: off,
                                },
                                ptr,
                            ))
                        };
                        self.builder.push_void(
                            InstrKind::Store {
                                addr,
                                value: incoming,
                            },
                            void,
                        );
                    }
                    Binding {
                        addr: slot,
                        ty: src_ty,
                    }
                }
            };
            self.bindings.bind(decl, binding);
            self.debug.storage_bound(decl, name);
        }
        Ok(())
    }

    /// Terminate the fallthrough edge, materialize the shared return block,
    /// run the end-of-function checks, and yield the finished body.
    fn finish_function(mut self) -> Result<IrFunction, LowerError> {
        if !self.builder.is_terminated() {
            let term = match &self.fn_abi.ret {
                RetPassing::Void => Terminator::Ret(None),
                RetPassing::Hidden {
                    returns_pointer, ..
                } => {
                    if *returns_pointer {
                        Terminator::Ret(self.ret_slot)
                    } else {
                        Terminator::Ret(None)
                    }
                }
                // Falling off the end of a value-returning function was
                // rejected upstream; the edge is unreachable.
                RetPassing::Scalar { .. } | RetPassing::Widened { .. } => Terminator::Unreachable,
            };
            self.builder.terminate(term);
        }

        if let Some(ret_block) = self.ret_block {
            self.builder.position_at_end(ret_block);
            let term = match &self.fn_abi.ret {
                RetPassing::Void => Terminator::Ret(None),
                RetPassing::Scalar { ty } | RetPassing::Widened { ty, .. } => {
                    let slot = self
                        .ret_slot
                        .ok_or_else(|| LowerError::contract("return block without a slot"))?;
                    let v: Operand = val(self.builder.push(
                        InstrKind::Load {
                            addr: slot,
                            ty: *ty,
                        },
                        *ty,
                    ));
                    Terminator::Ret(Some(v))
                }
                RetPassing::Hidden {
                    returns_pointer, ..
                } => {
                    if *returns_pointer {
                        Terminator::Ret(self.ret_slot)
                    } else {
                        Terminator::Ret(None)
                    }
                }
            };
            self.builder.terminate(term);
        }

        if !self.scopes.is_empty() {
            return Err(LowerError::CorruptScopes(format!(
                "{} scope(s) never popped",
                self.scopes.len()
            )));
        }
        for (name, info) in &self.labels {
            if !info.defined {
                return Err(LowerError::contract(format!(
                    "goto to undefined label `{}`",
                    self.cx.interner.resolve(*name)
                )));
            }
        }

        self.builder.finish()
    }
}

/// Lower a whole unit: unwind markings first (so intra-unit calls see
/// them), then every function in order, accumulating into the context's
/// module.
pub fn lower_unit(
    cx: &mut LowerCx<'_>,
    sources: &[FunctionSource],
    abi: &mut dyn CallAbi,
    storage: &mut dyn StorageResolver,
    debug: &mut dyn DebugSink,
) -> Result<(), LowerError> {
    for source in sources {
        if source.may_unwind {
            cx.mark_may_unwind(source.name);
        }
    }
    for source in sources {
        let function = lower_function(cx, source, abi, storage, debug)?;
        cx.module.functions.push(function);
    }
    Ok(())
}
