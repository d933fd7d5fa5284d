//! External collaborator traits.
//!
//! Storage allocation for named declarations and debug-metadata emission are
//! outside the engine; it talks to them through these seams. Both are
//! specified at the boundary only — the engine never depends on what an
//! implementation actually does.

use sable_ir::ast::DeclId;
use sable_ir::{Name, Span};
use sable_types::TypeIdx;

/// Where a named declaration's storage lives.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StorageDisposition {
    /// A function-local stack slot; the engine materializes it.
    Stack,
    /// A global symbol; the engine references it by address.
    Global { symbol: Name },
}

/// Lazily materializes target storage for a named declaration.
///
/// Called at most once per declaration per function, on the declaration's
/// first use.
pub trait StorageResolver {
    fn resolve(&mut self, decl: DeclId, name: Name, ty: TypeIdx) -> StorageDisposition;
}

/// Fire-and-forget debug-metadata notifications.
///
/// The engine reports scope transitions and declaration-to-storage bindings;
/// it never reads anything back.
pub trait DebugSink {
    fn scope_entered(&mut self, span: Span) {
        let _ = span;
    }
    fn scope_exited(&mut self, span: Span) {
        let _ = span;
    }
    fn storage_bound(&mut self, decl: DeclId, name: Name) {
        let _ = (decl, name);
    }
}

/// Default storage policy: every declaration gets a stack slot.
pub struct StackStorage;

impl StorageResolver for StackStorage {
    fn resolve(&mut self, _decl: DeclId, _name: Name, _ty: TypeIdx) -> StorageDisposition {
        StorageDisposition::Stack
    }
}

/// Debug sink that drops every notification.
pub struct NullDebugSink;

impl DebugSink for NullDebugSink {}
