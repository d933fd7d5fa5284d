//! Scope-tracking data structures.
//!
//! Two kinds of scope live here:
//!
//! - [`BindingScope`] — the lexical name environment. Backed by
//!   `im::HashMap` so entering a block clones the parent scope in O(1) via
//!   structural sharing and child bindings never leak back out.
//! - [`EhScope`] — one cleanup/exception region on the protected-region
//!   stack, owning its pending branch fixups, its lazily-created unwind
//!   landing block, and the cleanup clones already materialized on exiting
//!   edges.
//!
//! Branches that leave an active scope are emitted as explicit pending-exit
//! markers and recorded as [`Fixup`]s; the scope's pop resolves them —
//! cloning cleanup code onto the edge, forwarding ordinary fixups past catch
//! scopes, and dropping fixups whose destination never left the scope.

use im::HashMap as ImHashMap;
use rustc_hash::FxHashMap;
use sable_ir::ast::{DeclId, Handler, NodeId, NodeRange};
use sable_ir::Span;
use sable_lir::{BlockId, Operand};
use sable_types::TypeIdx;
use smallvec::SmallVec;

/// Scope identity path: the chain of active scope ids, outermost first.
pub(crate) type ScopePath = SmallVec<[u32; 4]>;

/// One name binding: the address of its storage and its source type.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Binding {
    pub addr: Operand,
    pub ty: TypeIdx,
}

/// Lexical binding environment with O(1) child-scope creation.
#[derive(Clone, Default)]
pub(crate) struct BindingScope {
    map: ImHashMap<DeclId, Binding>,
}

impl BindingScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) structural-sharing clone for block entry.
    #[must_use]
    pub fn child(&self) -> Self {
        self.clone()
    }

    pub fn bind(&mut self, decl: DeclId, binding: Binding) {
        self.map.insert(decl, binding);
    }

    pub fn lookup(&self, decl: DeclId) -> Option<Binding> {
        self.map.get(&decl).copied()
    }
}

/// What a protected region does with control leaving it.
#[derive(Copy, Clone, Debug)]
pub(crate) enum EhScopeKind {
    /// Run the cleanup expression on every exit, normal or exceptional.
    Cleanup { cleanup: NodeId },
    /// Dispatch escaping exceptions against typed catch clauses.
    CatchTypes { clauses: NodeRange },
    /// Evaluate a filter expression to decide whether to handle.
    CatchFilter { filter: NodeId, handler: NodeId },
}

impl EhScopeKind {
    /// Catch scopes only own exception edges; ordinary fixups pass through.
    pub fn is_catch(self) -> bool {
        matches!(
            self,
            EhScopeKind::CatchTypes { .. } | EhScopeKind::CatchFilter { .. }
        )
    }
}

/// A deferred obligation to patch one branch that exits the scope.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Fixup {
    /// The block whose terminator is the pending-exit marker.
    pub block: BlockId,
    /// Where the branch ultimately wants to go.
    pub dest: BlockId,
    /// Exception-unwind edge rather than ordinary control flow.
    pub is_exception: bool,
}

/// One active cleanup/exception region.
pub(crate) struct EhScope {
    /// Unique id within the function; element of every inner block's path.
    pub id: u32,
    pub kind: EhScopeKind,
    pub span: Span,
    /// Branches out of this scope awaiting resolution at pop.
    pub fixups: SmallVec<[Fixup; 4]>,
    /// Unwind landing block; created lazily, at most once, on the first
    /// potentially-unwinding call inside the scope.
    pub landing: Option<BlockId>,
    /// Block control continues at after the region completes normally (and
    /// where handler bodies rejoin).
    pub cont: BlockId,
    /// Cleanup clones already lowered on exiting edges, keyed by
    /// (destination, exception classification) so a second branch to the
    /// same destination shares the clone instead of duplicating cleanup.
    pub clones: FxHashMap<(BlockId, bool), BlockId>,
}

impl EhScope {
    pub fn new(id: u32, kind: EhScopeKind, span: Span, cont: BlockId) -> Self {
        EhScope {
            id,
            kind,
            span,
            fixups: SmallVec::new(),
            landing: None,
            cont,
            clones: FxHashMap::default(),
        }
    }
}

/// Build the handler variant of a `Protected` node into a scope kind.
impl From<Handler> for EhScopeKind {
    fn from(handler: Handler) -> Self {
        match handler {
            Handler::Cleanup { cleanup } => EhScopeKind::Cleanup { cleanup },
            Handler::CatchTypes { clauses } => EhScopeKind::CatchTypes { clauses },
            Handler::CatchFilter { filter, handler } => EhScopeKind::CatchFilter { filter, handler },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_lir::ValueId;

    fn decl(n: u32) -> DeclId {
        DeclId::from_raw(n)
    }

    fn binding(n: u32) -> Binding {
        Binding {
            addr: Operand::Value(ValueId::from_raw(n)),
            ty: TypeIdx::I32,
        }
    }

    #[test]
    fn child_scope_inherits_parent_bindings() {
        let mut parent = BindingScope::new();
        parent.bind(decl(1), binding(10));

        let child = parent.child();
        assert!(child.lookup(decl(1)).is_some());
    }

    #[test]
    fn child_scope_modifications_dont_affect_parent() {
        let mut parent = BindingScope::new();
        parent.bind(decl(1), binding(10));

        let mut child = parent.child();
        child.bind(decl(2), binding(20));

        assert!(child.lookup(decl(1)).is_some());
        assert!(child.lookup(decl(2)).is_some());
        assert!(parent.lookup(decl(2)).is_none());
    }

    #[test]
    fn shadowing_in_child_scope() {
        let mut parent = BindingScope::new();
        parent.bind(decl(1), binding(10));

        let mut child = parent.child();
        child.bind(decl(1), binding(20));

        let child_addr = child.lookup(decl(1)).unwrap().addr;
        let parent_addr = parent.lookup(decl(1)).unwrap().addr;
        assert_eq!(child_addr, Operand::Value(ValueId::from_raw(20)));
        assert_eq!(parent_addr, Operand::Value(ValueId::from_raw(10)));
    }

    #[test]
    fn catch_kinds_are_catch() {
        assert!(EhScopeKind::CatchTypes {
            clauses: NodeRange::EMPTY
        }
        .is_catch());
        assert!(!EhScopeKind::Cleanup {
            cleanup: NodeId::NONE
        }
        .is_catch());
    }
}
