//! Control-construct lowering and scope-exit resolution.
//!
//! Branches never mutate already-emitted instructions. A branch that leaves
//! one or more active scopes terminates its block with an explicit
//! pending-exit marker and registers a fixup on the innermost scope; when
//! that scope pops, the marker set is resolved:
//!
//! a. fixups whose destination never actually left the scope finalize into
//!    a plain branch — no cleanup needed;
//! b. catch scopes forward ordinary fixups unchanged to their parent — only
//!    exception edges are their concern;
//! c. a true cross-scope fixup gets one freshly lowered clone of the
//!    scope's cleanup on the edge, the marker branches into the clone, and
//!    the clone's own exit re-registers against the parent scope. Fixups
//!    sharing (destination, classification) share the clone.
//!
//! Unwind landing blocks are created lazily, at most once per scope, on the
//! first potentially-unwinding call inside it; their contents (landing pad,
//! cleanup or handler dispatch, propagation to the parent) are emitted when
//! the scope pops.

use sable_ir::ast::{ExprKind, Handler, NodeId, NodeRange};
use sable_ir::Name;
use sable_lir::{BlockId, InstrKind, Operand, Terminator};

use crate::builder::val;
use crate::expr::{FunctionLowerer, LabelInfo};
use crate::lvalue::Place;
use crate::scope::{EhScope, EhScopeKind, Fixup, ScopePath};
use crate::{LowerError};

fn is_prefix(prefix: &ScopePath, path: &ScopePath) -> bool {
    path.len() >= prefix.len() && path[..prefix.len()] == prefix[..]
}

impl<'c, 'a> FunctionLowerer<'c, 'a> {
    // -----------------------------------------------------------------------
    // Blocks and bindings
    // -----------------------------------------------------------------------

    /// Lower a statement sequence in a child binding scope.
    pub(crate) fn lower_block(&mut self, stmts: NodeRange) -> Result<Option<Operand>, LowerError> {
        let child = self.bindings.child();
        let parent = std::mem::replace(&mut self.bindings, child);

        for &stmt in self.cx.ast.list(stmts).to_vec().iter() {
            // After a goto/return the tail is unreachable until a label
            // re-opens a block.
            if self.builder.is_terminated()
                && !matches!(self.cx.ast.kind(stmt), ExprKind::Label { .. })
            {
                continue;
            }
            self.lower(stmt, None)?;
        }

        self.bindings = parent;
        Ok(None)
    }

    /// Local declaration: materialize storage through the collaborator and
    /// run the initializer.
    pub(crate) fn lower_bind(
        &mut self,
        decl: sable_ir::ast::DeclId,
        init: NodeId,
    ) -> Result<Option<Operand>, LowerError> {
        let binding = self.decl_binding(decl)?;
        self.bindings.bind(decl, binding);
        if init.is_valid() {
            let ty = binding.ty;
            let place = Place::direct(binding.addr);
            self.store_through(&place, ty, init)?;
        }
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Labels and gotos
    // -----------------------------------------------------------------------

    pub(crate) fn lower_label(
        &mut self,
        node: NodeId,
        name: Name,
    ) -> Result<Option<Operand>, LowerError> {
        let current_path = self.current_path();
        if !self.labels.contains_key(&name) {
            let label_text = self.cx.interner.resolve(name);
            let block = self.builder.append_block(format!("label.{label_text}"));
            self.labels.insert(
                name,
                LabelInfo {
                    block,
                    defined: false,
                    path: ScopePath::new(),
                    goto_paths: Vec::new(),
                },
            );
        }
        let block = {
            let info = self
                .labels
                .get_mut(&name)
                .ok_or_else(|| LowerError::contract("label map lookup failed"))?;
            if info.defined {
                return Err(LowerError::contract(format!(
                    "duplicate label `{}`",
                    self.cx.interner.resolve(name)
                )));
            }
            info.defined = true;
            info.path = current_path.clone();
            info.block
        };
        self.block_paths.insert(block, current_path.clone());

        // A goto recorded before this definition must have been exiting,
        // never entering: its path must extend the label's path.
        let info = &self.labels[&name];
        for goto_path in &info.goto_paths {
            if !is_prefix(&current_path, goto_path) {
                return Err(LowerError::BranchIntoScope {
                    label: self.cx.interner.resolve(name).to_owned(),
                });
            }
        }
        let _ = node;

        self.builder.terminate_if_open(Terminator::Goto(block));
        self.builder.position_at_end(block);
        Ok(None)
    }

    pub(crate) fn lower_goto(&mut self, name: Name) -> Result<Option<Operand>, LowerError> {
        if self.builder.is_terminated() {
            return Ok(None); // unreachable goto
        }
        let current_path = self.current_path();
        if !self.labels.contains_key(&name) {
            let label_text = self.cx.interner.resolve(name);
            let block = self.builder.append_block(format!("label.{label_text}"));
            self.labels.insert(
                name,
                LabelInfo {
                    block,
                    defined: false,
                    path: ScopePath::new(),
                    goto_paths: Vec::new(),
                },
            );
        }
        let (block, defined, label_path) = {
            let info = self
                .labels
                .get_mut(&name)
                .ok_or_else(|| LowerError::contract("label map lookup failed"))?;
            info.goto_paths.push(current_path.clone());
            (info.block, info.defined, info.path.clone())
        };

        if defined {
            if !is_prefix(&label_path, &current_path) {
                return Err(LowerError::BranchIntoScope {
                    label: self.cx.interner.resolve(name).to_owned(),
                });
            }
            self.branch_leaving_scopes(block, &label_path);
        } else if self.scopes.is_empty() {
            self.builder.terminate(Terminator::Goto(block));
        } else {
            // Forward goto under active scopes: register conservatively; the
            // pop pass drops the fixup if the label lands in this scope.
            self.register_exit_fixup(block, false);
        }
        Ok(None)
    }

    /// Branch to `dest` whose scope path is known, registering a fixup when
    /// the branch exits active scopes.
    fn branch_leaving_scopes(&mut self, dest: BlockId, dest_path: &ScopePath) {
        let current_path = self.current_path();
        if *dest_path == current_path {
            self.builder.terminate(Terminator::Goto(dest));
        } else {
            debug_assert!(is_prefix(dest_path, &current_path));
            self.register_exit_fixup(dest, false);
        }
    }

    /// Terminate the current block with a pending-exit marker and register
    /// the fixup on the innermost scope.
    fn register_exit_fixup(&mut self, dest: BlockId, is_exception: bool) {
        let block = self.builder.current_block();
        self.emit_pending_exit();
        let scope = self
            .scopes
            .last_mut()
            .expect("exit fixup with no active scope");
        scope.fixups.push(Fixup {
            block,
            dest,
            is_exception,
        });
    }

    // -----------------------------------------------------------------------
    // Conditional and switch
    // -----------------------------------------------------------------------

    pub(crate) fn lower_if(
        &mut self,
        cond: NodeId,
        then_blk: NodeId,
        else_blk: NodeId,
    ) -> Result<Option<Operand>, LowerError> {
        let cond_ty = self.cx.node_type(cond)?;
        let cond_v = self
            .lower(cond, None)?
            .ok_or_else(|| LowerError::contract("condition produced no value"))?;
        let flag = self.as_condition(cond_v, cond_ty)?;

        let then_bb = self.new_block("if.then");
        let else_bb = if else_blk.is_valid() {
            self.new_block("if.else")
        } else {
            BlockId::ENTRY // placeholder, replaced below
        };
        let merge_bb = self.new_block("if.merge");
        let else_target = if else_blk.is_valid() { else_bb } else { merge_bb };

        self.builder.terminate(Terminator::CondBr {
            cond: val(flag),
            then_bb,
            else_bb: else_target,
        });

        self.builder.position_at_end(then_bb);
        self.lower(then_blk, None)?;
        self.builder.terminate_if_open(Terminator::Goto(merge_bb));

        if else_blk.is_valid() {
            self.builder.position_at_end(else_bb);
            self.lower(else_blk, None)?;
            self.builder.terminate_if_open(Terminator::Goto(merge_bb));
        }

        self.builder.position_at_end(merge_bb);
        Ok(None)
    }

    pub(crate) fn lower_switch(
        &mut self,
        scrutinee: NodeId,
        cases: NodeRange,
        default: NodeId,
    ) -> Result<Option<Operand>, LowerError> {
        let scrut = self
            .lower(scrutinee, None)?
            .ok_or_else(|| LowerError::contract("switch scrutinee produced no value"))?;

        let case_nodes: Vec<NodeId> = self.cx.ast.list(cases).to_vec();
        let end_bb = self.new_block("switch.end");
        let default_bb = if default.is_valid() {
            self.new_block("switch.default")
        } else {
            end_bb
        };

        let mut table = Vec::with_capacity(case_nodes.len());
        let mut bodies = Vec::with_capacity(case_nodes.len());
        for &case in &case_nodes {
            let (value, body) = match *self.cx.ast.kind(case) {
                ExprKind::Case { value, body } => (value, body),
                ref other => {
                    return Err(LowerError::contract(format!(
                        "switch case list contains {other:?}"
                    )));
                }
            };
            let bb = self.new_block(format!("switch.case.{value}"));
            table.push((value, bb));
            bodies.push((bb, body));
        }

        self.builder.terminate(Terminator::Switch {
            scrutinee: scrut,
            cases: table,
            default: default_bb,
        });

        for (bb, body) in bodies {
            self.builder.position_at_end(bb);
            self.lower(body, None)?;
            self.builder.terminate_if_open(Terminator::Goto(end_bb));
        }

        if default.is_valid() {
            self.builder.position_at_end(default_bb);
            self.lower(default, None)?;
            self.builder.terminate_if_open(Terminator::Goto(end_bb));
        }

        self.builder.position_at_end(end_bb);
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Protected regions
    // -----------------------------------------------------------------------

    pub(crate) fn lower_protected(
        &mut self,
        node: NodeId,
        body: NodeId,
        handler: Handler,
    ) -> Result<Option<Operand>, LowerError> {
        let span = self.cx.ast.span(node);
        // The continuation lives outside the region; create it before the
        // push so its scope path is the outer one.
        let cont = self.new_block("protected.cont");

        let id = self.next_scope_id;
        self.next_scope_id += 1;
        let kind: EhScopeKind = handler.into();
        self.scopes.push(EhScope::new(id, kind, span, cont));
        self.debug.scope_entered(span);

        self.lower(body, None)?;

        let fallthrough_open = !self.builder.is_terminated();
        let fall_block = self.builder.current_block();

        self.pop_scope()?;

        // Normal completion runs the cleanup once, inline on the
        // fallthrough edge.
        if fallthrough_open {
            self.builder.position_at_end(fall_block);
            if let EhScopeKind::Cleanup { cleanup } = kind {
                if cleanup.is_valid() {
                    self.lower(cleanup, None)?;
                }
            }
            self.builder.terminate_if_open(Terminator::Goto(cont));
        }

        self.builder.position_at_end(cont);
        Ok(None)
    }

    /// Pop the innermost scope and fully resolve it: emit the landing block
    /// contents, then resolve every pending fixup.
    pub(crate) fn pop_scope(&mut self) -> Result<(), LowerError> {
        let mut scope = self
            .scopes
            .pop()
            .ok_or_else(|| LowerError::CorruptScopes("pop with empty scope stack".into()))?;
        self.debug.scope_exited(scope.span);

        let mut exiting_path = self.current_path();
        exiting_path.push(scope.id);

        let saved = self.builder.current_block();

        if let Some(landing) = scope.landing {
            self.emit_landing(&scope, landing)?;
        }

        let fixups = std::mem::take(&mut scope.fixups);
        tracing::trace!(
            scope = scope.id,
            fixups = fixups.len(),
            "resolving scope exits"
        );
        for fixup in fixups {
            let dest_path = self.block_path(fixup.dest);
            if is_prefix(&exiting_path, &dest_path) {
                // (a) The destination never left this scope after all.
                self.builder
                    .resolve_terminator(fixup.block, Terminator::Goto(fixup.dest));
                continue;
            }
            if scope.kind.is_catch() && !fixup.is_exception {
                // (b) Ordinary edges pass through catch scopes unchanged.
                match self.scopes.last_mut() {
                    Some(parent) => parent.fixups.push(fixup),
                    None => self
                        .builder
                        .resolve_terminator(fixup.block, Terminator::Goto(fixup.dest)),
                }
                continue;
            }
            // (c) A true cross-scope edge: share one cleanup clone per
            // (destination, classification).
            let key = (fixup.dest, fixup.is_exception);
            let entry = match scope.clones.get(&key).copied() {
                Some(entry) => entry,
                None => {
                    let entry = self.lower_cleanup_clone(&scope, fixup.dest, fixup.is_exception)?;
                    scope.clones.insert(key, entry);
                    entry
                }
            };
            self.builder
                .resolve_terminator(fixup.block, Terminator::Goto(entry));
        }

        self.builder.position_at_end(saved);
        Ok(())
    }

    /// Lower one clone of the scope's cleanup into a fresh block on an
    /// exiting edge, and chain its own exit toward `dest` through the
    /// parent scope.
    fn lower_cleanup_clone(
        &mut self,
        scope: &EhScope,
        dest: BlockId,
        is_exception: bool,
    ) -> Result<BlockId, LowerError> {
        let entry = self.new_block(format!("cleanup.{}", scope.id));
        self.builder.position_at_end(entry);
        if let EhScopeKind::Cleanup { cleanup } = scope.kind {
            if cleanup.is_valid() {
                // Re-enter expression lowering for the clone.
                self.lower(cleanup, None)?;
            }
        }
        self.exit_toward(dest, is_exception);
        Ok(entry)
    }

    /// Continue toward `dest` from the current block: register with the
    /// parent scope if one is active, else branch directly.
    fn exit_toward(&mut self, dest: BlockId, is_exception: bool) {
        if self.builder.is_terminated() {
            return; // cleanup code diverged (e.g. its own goto)
        }
        if self.scopes.is_empty() {
            self.builder.terminate(Terminator::Goto(dest));
        } else {
            self.register_exit_fixup(dest, is_exception);
        }
    }

    // -----------------------------------------------------------------------
    // Unwind landing blocks
    // -----------------------------------------------------------------------

    /// The innermost scope's landing block, created lazily at most once.
    pub(crate) fn ensure_landing(&mut self) -> Result<BlockId, LowerError> {
        let path = self.current_path();
        let scope_id = match self.scopes.last() {
            Some(scope) => {
                if let Some(landing) = scope.landing {
                    return Ok(landing);
                }
                scope.id
            }
            None => {
                return Err(LowerError::CorruptScopes(
                    "landing block with no scope".into(),
                ));
            }
        };
        let landing = self.builder.append_block(format!("lpad.{scope_id}"));
        // Registered manually: the landing belongs to the scope that owns
        // it, whatever block the cursor is in right now.
        self.block_paths.insert(landing, path);
        if let Some(scope) = self.scopes.last_mut() {
            scope.landing = Some(landing);
        }
        Ok(landing)
    }

    /// Emit the landing block body during the owning scope's pop: landing
    /// pad, cleanup or handler dispatch, then propagation outward.
    fn emit_landing(&mut self, scope: &EhScope, landing: BlockId) -> Result<(), LowerError> {
        self.builder.position_at_end(landing);
        let i8_ty = self.cx.types.int(8);
        let token_ty = self.ptr_to(i8_ty);
        let token = val(self.builder.push(InstrKind::LandingPad, token_ty));

        match scope.kind {
            EhScopeKind::Cleanup { cleanup } => {
                if cleanup.is_valid() {
                    self.lower(cleanup, None)?;
                }
                self.propagate_exception(token)?;
            }
            EhScopeKind::CatchTypes { clauses } => {
                let clause_nodes: Vec<NodeId> = self.cx.ast.list(clauses).to_vec();
                for clause in clause_nodes {
                    let (tag, body) = match *self.cx.ast.kind(clause) {
                        ExprKind::CatchClause { tag, body } => (tag, body),
                        ref other => {
                            return Err(LowerError::contract(format!(
                                "catch clause list contains {other:?}"
                            )));
                        }
                    };
                    let tag_v = self
                        .lower(tag, None)?
                        .ok_or_else(|| LowerError::contract("catch tag produced no value"))?;
                    let i1 = self.cx.types.int(1);
                    let matched = self.builder.push(
                        InstrKind::EhMatch {
                            token,
                            tag: tag_v,
                        },
                        i1,
                    );
                    let handler_bb = self.new_block("catch.body");
                    let next_bb = self.new_block("catch.next");
                    self.builder.terminate(Terminator::CondBr {
                        cond: val(matched),
                        then_bb: handler_bb,
                        else_bb: next_bb,
                    });

                    self.builder.position_at_end(handler_bb);
                    self.lower(body, None)?;
                    self.builder
                        .terminate_if_open(Terminator::Goto(scope.cont));

                    self.builder.position_at_end(next_bb);
                }
                self.propagate_exception(token)?;
            }
            EhScopeKind::CatchFilter { filter, handler } => {
                let filter_ty = self.cx.node_type(filter)?;
                let filter_v = self
                    .lower(filter, None)?
                    .ok_or_else(|| LowerError::contract("filter produced no value"))?;
                let flag = self.as_condition(filter_v, filter_ty)?;
                let handler_bb = self.new_block("filter.handler");
                let resume_bb = self.new_block("filter.resume");
                self.builder.terminate(Terminator::CondBr {
                    cond: val(flag),
                    then_bb: handler_bb,
                    else_bb: resume_bb,
                });

                self.builder.position_at_end(handler_bb);
                self.lower(handler, None)?;
                self.builder
                    .terminate_if_open(Terminator::Goto(scope.cont));

                self.builder.position_at_end(resume_bb);
                self.propagate_exception(token)?;
            }
        }
        Ok(())
    }

    /// Continue unwinding: into the parent scope's landing machinery if one
    /// is active, else resume to the caller's unwinder.
    fn propagate_exception(&mut self, token: Operand) -> Result<(), LowerError> {
        if self.builder.is_terminated() {
            return Ok(());
        }
        if self.scopes.is_empty() {
            self.builder.terminate(Terminator::Resume { token });
            return Ok(());
        }
        let landing = self.ensure_landing()?;
        self.register_exit_fixup(landing, true);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Returns
    // -----------------------------------------------------------------------

    pub(crate) fn lower_return(&mut self, value: NodeId) -> Result<Option<Operand>, LowerError> {
        use crate::abi::RetPassing;

        if self.builder.is_terminated() {
            return Ok(None);
        }

        let ret = self.fn_abi.ret.clone();
        let has_scopes = !self.scopes.is_empty();

        // Produce the return value (into the slot when one is needed).
        let direct: Option<Operand> = match &ret {
            RetPassing::Void => {
                if value.is_valid() {
                    self.lower(value, None)?;
                }
                None
            }
            RetPassing::Scalar { ty } => {
                let v = self
                    .lower(value, None)?
                    .ok_or_else(|| LowerError::contract("return value missing"))?;
                if has_scopes {
                    let slot = self.ensure_ret_slot(*ty)?;
                    let void = self.cx.types.void();
                    self.builder
                        .push_void(InstrKind::Store { addr: slot, value: v }, void);
                    None
                } else {
                    Some(v)
                }
            }
            RetPassing::Widened { ty, .. } => {
                // Aggregate return widened to an integer: build the value in
                // a temporary, then load it back as the integer.
                let src_ty = self.src_ret;
                let tmp = self.temp_slot(src_ty)?;
                let place = Place::direct(tmp);
                self.lower(value, Some(&place))?;
                let widened = val(self.builder.push(
                    InstrKind::Load {
                        addr: tmp,
                        ty: *ty,
                    },
                    *ty,
                ));
                if has_scopes {
                    let slot = self.ensure_ret_slot(*ty)?;
                    let void = self.cx.types.void();
                    self.builder.push_void(
                        InstrKind::Store {
                            addr: slot,
                            value: widened,
                        },
                        void,
                    );
                    None
                } else {
                    Some(widened)
                }
            }
            RetPassing::Hidden { .. } => {
                let slot = self
                    .ret_slot
                    .ok_or_else(|| LowerError::contract("hidden return without a slot"))?;
                let place = Place::direct(slot);
                self.lower(value, Some(&place))?;
                None
            }
        };

        if has_scopes {
            let ret_block = self.ensure_ret_block();
            self.register_exit_fixup(ret_block, false);
        } else {
            let term = self.direct_return_terminator(&ret, direct);
            self.builder.terminate(term);
        }
        Ok(None)
    }

    fn direct_return_terminator(
        &mut self,
        ret: &crate::abi::RetPassing,
        value: Option<Operand>,
    ) -> Terminator {
        use crate::abi::RetPassing;
        match ret {
            RetPassing::Void => Terminator::Ret(None),
            RetPassing::Scalar { .. } | RetPassing::Widened { .. } => Terminator::Ret(value),
            RetPassing::Hidden {
                returns_pointer, ..
            } => {
                if *returns_pointer {
                    Terminator::Ret(self.ret_slot)
                } else {
                    Terminator::Ret(None)
                }
            }
        }
    }

    /// The shared return slot for returns that must unwind scopes first.
    fn ensure_ret_slot(&mut self, ir_ty: sable_lir::IrTypeId) -> Result<Operand, LowerError> {
        if let Some(slot) = self.ret_slot {
            return Ok(slot);
        }
        let ptr_ty = self.ptr_to(ir_ty);
        let slot = val(self.builder.entry_slot(ir_ty, ptr_ty));
        self.ret_slot = Some(slot);
        Ok(slot)
    }

    /// The shared return block; it lives at function root so returning from
    /// inside scopes is an ordinary scope-exiting branch.
    pub(crate) fn ensure_ret_block(&mut self) -> BlockId {
        if let Some(block) = self.ret_block {
            return block;
        }
        let block = self.builder.append_block("return");
        self.block_paths.insert(block, ScopePath::new());
        self.ret_block = Some(block);
        block
    }
}
