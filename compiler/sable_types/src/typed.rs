//! Side table of type assignments for an AST.
//!
//! The front end types every node and declaration; the lowering engine only
//! reads. Keeping the table outside the AST keeps the tree immutable for
//! every consumer.

use rustc_hash::FxHashMap;
use sable_ir::ast::{DeclId, NodeId};

use crate::TypeIdx;

/// Node and declaration type assignments for one compilation unit.
#[derive(Default)]
pub struct TypedUnit {
    node_types: FxHashMap<NodeId, TypeIdx>,
    decl_types: FxHashMap<DeclId, TypeIdx>,
}

impl TypedUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node's static type.
    pub fn set_node_type(&mut self, node: NodeId, ty: TypeIdx) {
        self.node_types.insert(node, ty);
    }

    /// A node's static type; `TypeIdx::NONE` for untyped (statement) nodes.
    #[inline]
    pub fn node_type(&self, node: NodeId) -> TypeIdx {
        self.node_types.get(&node).copied().unwrap_or(TypeIdx::NONE)
    }

    /// Record a declaration's type.
    pub fn set_decl_type(&mut self, decl: DeclId, ty: TypeIdx) {
        self.decl_types.insert(decl, ty);
    }

    /// A declaration's type; `TypeIdx::NONE` if the front end never typed it.
    #[inline]
    pub fn decl_type(&self, decl: DeclId) -> TypeIdx {
        self.decl_types.get(&decl).copied().unwrap_or(TypeIdx::NONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_node_is_none() {
        let table = TypedUnit::new();
        assert!(table.node_type(NodeId::from_raw(3)).is_none());
    }

    #[test]
    fn set_and_get() {
        let mut table = TypedUnit::new();
        table.set_node_type(NodeId::from_raw(1), TypeIdx::I64);
        table.set_decl_type(DeclId::from_raw(0), TypeIdx::F32);
        assert_eq!(table.node_type(NodeId::from_raw(1)), TypeIdx::I64);
        assert_eq!(table.decl_type(DeclId::from_raw(0)), TypeIdx::F32);
    }
}
