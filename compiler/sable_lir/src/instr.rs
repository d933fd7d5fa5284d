//! Instruction and terminator definitions.

use sable_ir::Name;
use smallvec::SmallVec;

use crate::{BlockId, IrTypeId, Operand, ValueId};

/// Binary arithmetic and bitwise operations.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BinIr {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

/// Comparison predicates. `S`/`U` prefixes are signed/unsigned integer
/// orderings; `FO` prefixes are ordered float comparisons.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
    FOeq,
    FOne,
    FOlt,
    FOle,
    FOgt,
    FOge,
}

/// Unary operations.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum UnIr {
    /// Integer negation.
    Neg,
    /// Float negation.
    FNeg,
    /// Bitwise complement.
    Not,
}

/// Value conversions.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CastKind {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    SiToFp,
    UiToFp,
    FpToSi,
    FpToUi,
    PtrToInt,
    IntToPtr,
    /// Same-size reinterpretation; also used for address re-typing.
    Bitcast,
}

/// Call target.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Callee {
    /// Direct call to a named function with the given signature type.
    Direct { symbol: Name, sig: IrTypeId },
    /// Indirect call through a function pointer.
    Indirect { ptr: Operand, sig: IrTypeId },
}

/// Non-terminator instruction payload.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum InstrKind {
    Bin {
        op: BinIr,
        lhs: Operand,
        rhs: Operand,
    },
    Cmp {
        pred: CmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    Un {
        op: UnIr,
        operand: Operand,
    },
    Cast {
        kind: CastKind,
        operand: Operand,
        to: IrTypeId,
    },
    Select {
        cond: Operand,
        if_true: Operand,
        if_false: Operand,
    },
    /// Function-entry stack allocation; yields the slot address.
    StackSlot {
        ty: IrTypeId,
    },
    Load {
        addr: Operand,
        ty: IrTypeId,
    },
    Store {
        addr: Operand,
        value: Operand,
    },
    /// Element-stride addressing: `base + index * size_of(element)`.
    ElemAddr {
        base: Operand,
        element: IrTypeId,
        index: Operand,
    },
    /// Raw byte arithmetic: `base + offset` bytes.
    ByteAddr {
        base: Operand,
        offset: Operand,
    },
    /// Constant-offset element address within an aggregate.
    FieldAddr {
        base: Operand,
        aggregate: IrTypeId,
        element: u32,
    },
    /// Aggregate copy. When `skip_padding` is set the copy must not touch
    /// elements flagged as padding in the aggregate's layout.
    Copy {
        dst: Operand,
        src: Operand,
        ty: IrTypeId,
        skip_padding: bool,
    },
    Call {
        callee: Callee,
        args: SmallVec<[Operand; 6]>,
    },
    /// Inline assembly with pre-lowered operands.
    InlineAsm {
        template: Name,
        args: SmallVec<[Operand; 4]>,
        constraints: SmallVec<[Name; 4]>,
    },
    /// Entry of an unwind landing block; yields the exception token.
    LandingPad,
    /// Test an exception token against a runtime type-info tag.
    EhMatch {
        token: Operand,
        tag: Operand,
    },
}

/// One instruction: payload plus optional result.
///
/// `ty` is the result type and is only meaningful when `result` is set.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Instr {
    pub kind: InstrKind,
    pub result: Option<ValueId>,
    pub ty: IrTypeId,
}

/// Block terminator.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Terminator {
    /// Still under construction; must not survive function finishing.
    None,
    Goto(BlockId),
    CondBr {
        cond: Operand,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    Switch {
        scrutinee: Operand,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    Ret(Option<Operand>),
    Unreachable,
    /// A potentially-unwinding call: control continues at `normal` or
    /// unwinds to `unwind`.
    Invoke {
        callee: Callee,
        args: SmallVec<[Operand; 6]>,
        result: Option<ValueId>,
        ty: IrTypeId,
        normal: BlockId,
        unwind: BlockId,
    },
    /// Re-raise an exception token to the caller's unwinder.
    Resume {
        token: Operand,
    },
    /// Deferred scope-exit marker; resolved when the scope that registered
    /// the fixup is popped. Never survives function finishing.
    PendingExit {
        fixup: u32,
    },
}

impl Terminator {
    /// Whether this terminator actually ends the block (anything but the
    /// under-construction sentinel).
    #[inline]
    pub fn is_set(&self) -> bool {
        !matches!(self, Terminator::None)
    }
}
