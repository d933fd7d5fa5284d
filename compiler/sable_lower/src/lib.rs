//! AST to low-level IR lowering engine for the Sable compiler.
//!
//! The engine converts a typed, already-validated source tree into
//! block-structured low-level IR (`sable_lir`), solving three problems on
//! the way:
//!
//! - **Layout synthesis** ([`layout`]): byte-exact aggregate layouts —
//!   bit-fields, unions, recursive types — matching the declared layout of
//!   the external type system.
//! - **Call classification** ([`abi`]): one generic argument/return
//!   traversal parameterized by pluggable, target-specific leaf actions.
//! - **Scoped cleanup** ([`scope`], `control_flow`): a stack of
//!   cleanup/exception regions with deferred, deduplicated patching of
//!   branches that cross region boundaries.
//!
//! Everything is unit-scoped: a [`LowerCx`] owns the shared tables and is
//! torn down with the unit. Per-function state lives inside
//! [`lower_function`] and is discarded when it returns. No optimization,
//! no register allocation, no emission — the output is a well-formed
//! low-level program for a separate pass.

pub mod abi;
pub mod collab;
pub mod layout;

mod asm;
mod builder;
mod calls;
mod context;
mod control_flow;
mod error;
mod expr;
mod function;
mod lvalue;
mod operators;
mod scope;

pub use context::{FunctionSource, LowerCx};
pub use error::LowerError;
pub use function::{lower_function, lower_unit};
