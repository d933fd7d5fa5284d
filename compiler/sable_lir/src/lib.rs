//! Low-level intermediate representation produced by the Sable lowering
//! engine.
//!
//! A lowered function is an ordered list of basic blocks of straight-line
//! instructions with explicit control-flow edges, ready for a separate
//! optimization/code-generation pass. Types live in a [`TypeTable`] arena
//! deduplicated by structural identity; constants live in a unit-lifetime
//! [`ConstTable`]; instruction results are function-local [`ValueId`]s.
//!
//! Nothing in this crate performs lowering — it is the vocabulary the engine
//! (`sable_lower`) speaks and downstream passes consume.

mod block;
mod display;
mod function;
mod instr;
mod ty;
mod value;

pub use block::{Block, BlockId};
pub use display::function_to_string;
pub use function::{FnAttrs, GlobalDecl, IrFunction, Module, Param, ParamAttrs};
pub use instr::{BinIr, Callee, CastKind, CmpPred, Instr, InstrKind, Terminator, UnIr};
pub use ty::{AggregateLayout, ElementLayout, IrType, IrTypeId, TypeTable};
pub use value::{ConstId, ConstTable, ConstValue, Operand, ValueId};
