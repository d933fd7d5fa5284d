//! Shared scaffolding for lowering tests: a small builder over the AST
//! arena, type pool, and type side tables.

use sable_ir::ast::{Ast, Constant, DeclId, ExprKind, NodeId, NodeRange};
use sable_ir::{Name, Span, StringInterner};
use sable_lower::{FunctionSource, LowerCx};
use sable_types::{TypeIdx, TypePool, TypedUnit};

pub struct TestUnit {
    pub pool: TypePool,
    pub ast: Ast,
    pub typed: TypedUnit,
    pub interner: StringInterner,
}

impl TestUnit {
    pub fn new() -> Self {
        // Opt-in trace output: RUST_LOG=sable_lower=trace cargo test ...
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        TestUnit {
            pool: TypePool::new(),
            ast: Ast::new(),
            typed: TypedUnit::new(),
            interner: StringInterner::new(),
        }
    }

    pub fn cx(&self) -> LowerCx<'_> {
        LowerCx::new(&self.pool, &self.ast, &self.typed, &self.interner)
    }

    pub fn name(&self, text: &str) -> Name {
        self.interner.intern(text)
    }

    /// A typed expression node.
    pub fn node(&mut self, kind: ExprKind, ty: TypeIdx) -> NodeId {
        let id = self.ast.push(kind, Span::DUMMY);
        if !ty.is_none() {
            self.typed.set_node_type(id, ty);
        }
        id
    }

    /// An untyped statement node.
    pub fn stmt(&mut self, kind: ExprKind) -> NodeId {
        self.ast.push(kind, Span::DUMMY)
    }

    pub fn decl(&mut self, name: &str, ty: TypeIdx) -> DeclId {
        let name = self.name(name);
        let decl = self.ast.push_decl(name, Span::DUMMY);
        self.typed.set_decl_type(decl, ty);
        decl
    }

    pub fn int(&mut self, ty: TypeIdx, value: i64) -> NodeId {
        self.node(ExprKind::Const(Constant::Int(value)), ty)
    }

    pub fn name_ref(&mut self, decl: DeclId, ty: TypeIdx) -> NodeId {
        self.node(ExprKind::NameRef { decl }, ty)
    }

    pub fn block(&mut self, stmts: &[NodeId]) -> NodeId {
        let range: NodeRange = self.ast.push_list(stmts);
        self.stmt(ExprKind::Block { stmts: range })
    }

    /// A void function wrapping `stmts` as its body.
    pub fn void_fn(&mut self, fn_name: &str, stmts: &[NodeId]) -> FunctionSource {
        let body = self.block(stmts);
        let sig = self.pool.function(vec![], TypeIdx::VOID, false);
        FunctionSource {
            name: self.name(fn_name),
            sig,
            params: vec![],
            body,
            may_unwind: false,
        }
    }
}
