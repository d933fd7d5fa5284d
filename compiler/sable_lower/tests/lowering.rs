//! Expression-lowering behavior: the destination convention, pointer
//! arithmetic strategies, synthesized division, bit-field access, call
//! shaping, and inline-asm diagnostics.

mod common;

use common::TestUnit;
use pretty_assertions::assert_eq;
use sable_diagnostic::ErrorCode;
use sable_ir::ast::{AsmOperand, BinOp, ExprKind, NodeId};
use sable_lir::{BinIr, InstrKind, IrFunction, IrType};
use sable_lower::abi::{RegChunkAbi, RegFieldAbi};
use sable_lower::collab::{NullDebugSink, StackStorage};
use sable_lower::{lower_function, FunctionSource, LowerCx, LowerError};
use sable_types::{Field, RecordType, TypeIdx};

fn lower_with<'u>(
    unit: &'u TestUnit,
    source: &FunctionSource,
) -> (LowerCx<'u>, IrFunction) {
    let mut cx = unit.cx();
    let mut abi = RegFieldAbi::new();
    let mut storage = StackStorage;
    let mut debug = NullDebugSink;
    let func = lower_function(&mut cx, source, &mut abi, &mut storage, &mut debug)
        .expect("lowering should succeed");
    (cx, func)
}

fn lower_err(unit: &TestUnit, source: &FunctionSource) -> LowerError {
    let mut cx = unit.cx();
    let mut abi = RegFieldAbi::new();
    let mut storage = StackStorage;
    let mut debug = NullDebugSink;
    match lower_function(&mut cx, source, &mut abi, &mut storage, &mut debug) {
        Ok(_) => panic!("expected lowering to fail"),
        Err(e) => e,
    }
}

fn all_instrs(func: &IrFunction) -> impl Iterator<Item = &InstrKind> {
    func.blocks.iter().flat_map(|b| b.instrs.iter()).map(|i| &i.kind)
}

fn count_kind(func: &IrFunction, pred: impl Fn(&InstrKind) -> bool) -> usize {
    all_instrs(func).filter(|k| pred(k)).count()
}

fn pair_record(unit: &mut TestUnit) -> TypeIdx {
    let name = unit.name("Pair");
    let a = unit.name("a");
    let b = unit.name("b");
    unit.pool.record(RecordType::new(
        name,
        vec![
            Field::at(a, TypeIdx::I32, 0),
            Field::at(b, TypeIdx::I32, 4),
        ],
        8,
        4,
    ))
}

// -- Destination convention --

#[test]
fn aggregate_node_without_destination_is_fatal() {
    let mut unit = TestUnit::new();
    let pair = pair_record(&mut unit);
    let a = unit.int(TypeIdx::I32, 1);
    let b = unit.int(TypeIdx::I32, 2);
    let fields = unit.ast.push_list(&[a, b]);
    // An aggregate constructor used as a bare statement has no destination.
    let construct = unit.node(ExprKind::Construct { fields }, pair);
    let source = unit.void_fn("f", &[construct]);

    let err = lower_err(&unit, &source);
    assert!(matches!(err, LowerError::ContractViolation(_)));
}

#[test]
fn aggregate_assignment_writes_through_destination() {
    let mut unit = TestUnit::new();
    let pair = pair_record(&mut unit);
    let dst = unit.decl("dst", pair);
    let bind = unit.stmt(ExprKind::Bind {
        decl: dst,
        init: NodeId::NONE,
    });
    let a = unit.int(TypeIdx::I32, 1);
    let b = unit.int(TypeIdx::I32, 2);
    let fields = unit.ast.push_list(&[a, b]);
    let construct = unit.node(ExprKind::Construct { fields }, pair);
    let target = unit.name_ref(dst, pair);
    let assign = unit.stmt(ExprKind::Assign {
        target,
        value: construct,
    });
    let source = unit.void_fn("f", &[bind, assign]);

    let (_cx, func) = lower_with(&unit, &source);
    // Two field stores through the destination, no scalar result anywhere.
    let stores = count_kind(&func, |k| matches!(k, InstrKind::Store { .. }));
    assert_eq!(stores, 2);
    let field_addrs = count_kind(&func, |k| matches!(k, InstrKind::FieldAddr { .. }));
    assert_eq!(field_addrs, 2);
}

// -- Pointer arithmetic --

fn ptr_arith_fn(unit: &mut TestUnit, delta: i64) -> FunctionSource {
    let i32_ptr = unit.pool.pointer(TypeIdx::I32);
    let p = unit.decl("p", i32_ptr);
    let bind = unit.stmt(ExprKind::Bind {
        decl: p,
        init: NodeId::NONE,
    });
    let lhs = unit.name_ref(p, i32_ptr);
    let rhs = unit.int(TypeIdx::I64, delta);
    let sum = unit.node(
        ExprKind::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
        },
        i32_ptr,
    );
    let target = unit.name_ref(p, i32_ptr);
    let assign = unit.stmt(ExprKind::Assign { target, value: sum });
    unit.void_fn("f", &[bind, assign])
}

#[test]
fn dividing_byte_delta_uses_element_stride() {
    let mut unit = TestUnit::new();
    // 12 bytes over 4-byte elements: exactly 3 strides.
    let source = ptr_arith_fn(&mut unit, 12);
    let (cx, func) = lower_with(&unit, &source);

    let elem_addrs: Vec<_> = all_instrs(&func)
        .filter_map(|k| match k {
            InstrKind::ElemAddr { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(elem_addrs.len(), 1);
    match elem_addrs[0] {
        sable_lir::Operand::Const(c) => assert_eq!(cx.consts.as_int(c), Some(3)),
        other => panic!("expected a constant stride count, got {other:?}"),
    }
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::ByteAddr { .. })), 0);
}

#[test]
fn non_dividing_byte_delta_falls_back_to_byte_arithmetic() {
    let mut unit = TestUnit::new();
    // 7 bytes over 4-byte elements does not divide evenly.
    let source = ptr_arith_fn(&mut unit, 7);
    let (_cx, func) = lower_with(&unit, &source);

    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::ElemAddr { .. })), 0);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::ByteAddr { .. })), 1);
}

// -- Synthesized division --

fn div_fn(unit: &mut TestUnit, op: BinOp) -> FunctionSource {
    let x = unit.decl("x", TypeIdx::I64);
    let y = unit.decl("y", TypeIdx::I64);
    let r = unit.decl("r", TypeIdx::I64);
    let binds: Vec<NodeId> = [x, y, r]
        .iter()
        .map(|&d| {
            unit.stmt(ExprKind::Bind {
                decl: d,
                init: NodeId::NONE,
            })
        })
        .collect();
    let lhs = unit.name_ref(x, TypeIdx::I64);
    let rhs = unit.name_ref(y, TypeIdx::I64);
    let div = unit.node(ExprKind::Binary { op, lhs, rhs }, TypeIdx::I64);
    let target = unit.name_ref(r, TypeIdx::I64);
    let assign = unit.stmt(ExprKind::Assign { target, value: div });
    let mut stmts = binds;
    stmts.push(assign);
    unit.void_fn("f", &stmts)
}

#[test]
fn floor_division_synthesizes_from_truncating_ops() {
    let mut unit = TestUnit::new();
    let source = div_fn(&mut unit, BinOp::FloorDiv);
    let (_cx, func) = lower_with(&unit, &source);

    // Truncating quotient and remainder plus the sign-comparison fixup.
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::SDiv, .. })), 1);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::SRem, .. })), 1);
    assert!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::Xor, .. })) >= 1);
    assert!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::Sub, .. })) >= 1);
}

#[test]
fn floor_remainder_adds_divisor_on_sign_mismatch() {
    let mut unit = TestUnit::new();
    let source = div_fn(&mut unit, BinOp::FloorRem);
    let (_cx, func) = lower_with(&unit, &source);

    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::SRem, .. })), 1);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Select { .. })), 1);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::SDiv, .. })), 0);
}

#[test]
fn round_division_compares_doubled_remainder() {
    let mut unit = TestUnit::new();
    let source = div_fn(&mut unit, BinOp::RoundDiv);
    let (_cx, func) = lower_with(&unit, &source);

    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::SDiv, .. })), 1);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::Shl, .. })), 1);
    // abs(r), abs(b), the sign adjustment, and the final bump.
    assert!(count_kind(&func, |k| matches!(k, InstrKind::Select { .. })) >= 3);
}

// -- Bit-field access --

#[test]
fn bitfield_store_is_read_modify_write() {
    let mut unit = TestUnit::new();
    let name = unit.name("Bits");
    let x = unit.name("x");
    let y = unit.name("y");
    let bits = unit.pool.record(RecordType::new(
        name,
        vec![
            Field::bits(x, TypeIdx::U32, 0, 0, 3),
            Field::bits(y, TypeIdx::U32, 0, 3, 5),
        ],
        1,
        1,
    ));
    let s = unit.decl("s", bits);
    let bind = unit.stmt(ExprKind::Bind {
        decl: s,
        init: NodeId::NONE,
    });
    let base = unit.name_ref(s, bits);
    let field = unit.node(ExprKind::Field { base, field: 1 }, TypeIdx::U32);
    let value = unit.int(TypeIdx::U32, 2);
    let assign = unit.stmt(ExprKind::Assign {
        target: field,
        value,
    });
    let source = unit.void_fn("f", &[bind, assign]);

    let (_cx, func) = lower_with(&unit, &source);
    // Load the unit, mask out the window, or in the shifted value, store.
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Load { .. })), 1);
    assert!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::And, .. })) >= 2);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::Or, .. })), 1);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Store { .. })), 1);
}

#[test]
fn signed_bitfield_load_sign_extends() {
    let mut unit = TestUnit::new();
    let name = unit.name("Bits");
    let v = unit.name("v");
    let bits = unit.pool.record(RecordType::new(
        name,
        vec![Field::bits(v, TypeIdx::I32, 0, 0, 5)],
        4,
        4,
    ));
    let s = unit.decl("s", bits);
    let r = unit.decl("r", TypeIdx::I32);
    let bind_s = unit.stmt(ExprKind::Bind {
        decl: s,
        init: NodeId::NONE,
    });
    let bind_r = unit.stmt(ExprKind::Bind {
        decl: r,
        init: NodeId::NONE,
    });
    let base = unit.name_ref(s, bits);
    let field = unit.node(ExprKind::Field { base, field: 0 }, TypeIdx::I32);
    let target = unit.name_ref(r, TypeIdx::I32);
    let assign = unit.stmt(ExprKind::Assign {
        target,
        value: field,
    });
    let source = unit.void_fn("f", &[bind_s, bind_r, assign]);

    let (_cx, func) = lower_with(&unit, &source);
    // Shift up then arithmetic shift down recovers the sign.
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::Shl, .. })), 1);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::AShr, .. })), 1);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::LShr, .. })), 0);
}

// -- Calls --

#[test]
fn widened_aggregate_return_stores_through_destination() {
    let mut unit = TestUnit::new();
    let pair = pair_record(&mut unit);
    let callee_sig = unit.pool.function(vec![], pair, false);
    let callee_decl = unit.decl("make_pair", callee_sig);

    let dst = unit.decl("dst", pair);
    let bind = unit.stmt(ExprKind::Bind {
        decl: dst,
        init: NodeId::NONE,
    });
    let callee = unit.name_ref(callee_decl, callee_sig);
    let args = unit.ast.push_list(&[]);
    let call = unit.node(ExprKind::Call { callee, args }, pair);
    let target = unit.name_ref(dst, pair);
    let assign = unit.stmt(ExprKind::Assign {
        target,
        value: call,
    });
    let source = unit.void_fn("f", &[bind, assign]);

    let (cx, func) = lower_with(&unit, &source);

    // The call produces an i64 and one store writes it through the
    // destination.
    let call_ty = func
        .blocks
        .iter()
        .flat_map(|b| b.instrs.iter())
        .find(|i| matches!(i.kind, InstrKind::Call { .. }))
        .map(|i| i.ty)
        .expect("call instruction present");
    assert_eq!(cx.types.get(call_ty), &IrType::Int { bits: 64 });
}

#[test]
fn expanded_aggregate_argument_loads_each_part() {
    let mut unit = TestUnit::new();
    let pair = pair_record(&mut unit);
    let callee_sig = unit.pool.function(vec![pair], TypeIdx::VOID, false);
    let callee_decl = unit.decl("consume", callee_sig);

    let arg = unit.decl("arg", pair);
    let bind = unit.stmt(ExprKind::Bind {
        decl: arg,
        init: NodeId::NONE,
    });
    let callee = unit.name_ref(callee_decl, callee_sig);
    let arg_ref = unit.name_ref(arg, pair);
    let args = unit.ast.push_list(&[arg_ref]);
    let call = unit.stmt(ExprKind::Call { callee, args });
    let source = unit.void_fn("f", &[bind, call]);

    let (_cx, func) = lower_with(&unit, &source);
    let call_args = all_instrs(&func)
        .find_map(|k| match k {
            InstrKind::Call { args, .. } => Some(args.len()),
            _ => None,
        })
        .expect("call present");
    // Two i32 fields, two physical arguments.
    assert_eq!(call_args, 2);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Load { .. })), 2);
}

#[test]
fn unprototyped_callee_adopts_call_site_signature() {
    let mut unit = TestUnit::new();
    // Declared `() -> i64` but called with two arguments.
    let callee_sig = unit.pool.function(vec![], TypeIdx::I64, false);
    let callee_decl = unit.decl("legacy", callee_sig);

    let r = unit.decl("r", TypeIdx::I64);
    let bind = unit.stmt(ExprKind::Bind {
        decl: r,
        init: NodeId::NONE,
    });
    let callee = unit.name_ref(callee_decl, callee_sig);
    let a = unit.int(TypeIdx::I64, 1);
    let b = unit.int(TypeIdx::I64, 2);
    let args = unit.ast.push_list(&[a, b]);
    let call = unit.node(ExprKind::Call { callee, args }, TypeIdx::I64);
    let target = unit.name_ref(r, TypeIdx::I64);
    let assign = unit.stmt(ExprKind::Assign {
        target,
        value: call,
    });
    let source = unit.void_fn("f", &[bind, assign]);

    let (_cx, func) = lower_with(&unit, &source);
    let call_args = all_instrs(&func)
        .find_map(|k| match k {
            InstrKind::Call { args, .. } => Some(args.len()),
            _ => None,
        })
        .expect("call present");
    assert_eq!(call_args, 2, "call-site signature should win");
}

// -- Complex pairs --

#[test]
fn complex_multiplication_uses_four_products() {
    let mut unit = TestUnit::new();
    let cplx = unit.pool.complex(TypeIdx::F64);
    let a = unit.decl("a", cplx);
    let b = unit.decl("b", cplx);
    let c = unit.decl("c", cplx);
    let binds: Vec<NodeId> = [a, b, c]
        .iter()
        .map(|&d| {
            unit.stmt(ExprKind::Bind {
                decl: d,
                init: NodeId::NONE,
            })
        })
        .collect();
    let lhs = unit.name_ref(a, cplx);
    let rhs = unit.name_ref(b, cplx);
    let mul = unit.node(
        ExprKind::Binary {
            op: BinOp::Mul,
            lhs,
            rhs,
        },
        cplx,
    );
    let target = unit.name_ref(c, cplx);
    let assign = unit.stmt(ExprKind::Assign {
        target,
        value: mul,
    });
    let mut stmts = binds;
    stmts.push(assign);
    let source = unit.void_fn("f", &stmts);

    let (_cx, func) = lower_with(&unit, &source);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::FMul, .. })), 4);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::FSub, .. })), 1);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::Bin { op: BinIr::FAdd, .. })), 1);
}

// -- Inline assembly --

#[test]
fn out_of_range_asm_operand_is_a_recoverable_diagnostic() {
    let mut unit = TestUnit::new();
    let template = unit.name("mov %0, %3");
    let x = unit.decl("x", TypeIdx::I64);
    let bind = unit.stmt(ExprKind::Bind {
        decl: x,
        init: NodeId::NONE,
    });
    let input = unit.name_ref(x, TypeIdx::I64);
    let constraint = unit.name("r");
    let operands = unit.ast.push_asm_operands(&[AsmOperand {
        constraint,
        expr: input,
        is_output: false,
    }]);
    let asm = unit.stmt(ExprKind::Asm { template, operands });
    let source = unit.void_fn("f", &[bind, asm]);

    let mut cx = unit.cx();
    let mut abi = RegFieldAbi::new();
    let mut storage = StackStorage;
    let mut debug = NullDebugSink;
    let func =
        lower_function(&mut cx, &source, &mut abi, &mut storage, &mut debug).unwrap();

    // Lowering continued, but the problem was reported and no asm emitted.
    assert_eq!(cx.diags.error_count(), 1);
    let diag = cx.diags.iter().next().unwrap();
    assert_eq!(diag.code, ErrorCode::AsmOperand);
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::InlineAsm { .. })), 0);
}

#[test]
fn non_constant_immediate_operand_is_reported_and_substituted() {
    let mut unit = TestUnit::new();
    let template = unit.name("out %0");
    let x = unit.decl("x", TypeIdx::I64);
    let bind = unit.stmt(ExprKind::Bind {
        decl: x,
        init: NodeId::NONE,
    });
    let input = unit.name_ref(x, TypeIdx::I64);
    let constraint = unit.name("i");
    let operands = unit.ast.push_asm_operands(&[AsmOperand {
        constraint,
        expr: input,
        is_output: false,
    }]);
    let asm = unit.stmt(ExprKind::Asm { template, operands });
    let source = unit.void_fn("f", &[bind, asm]);

    let mut cx = unit.cx();
    let mut abi = RegFieldAbi::new();
    let mut storage = StackStorage;
    let mut debug = NullDebugSink;
    let func =
        lower_function(&mut cx, &source, &mut abi, &mut storage, &mut debug).unwrap();

    assert_eq!(cx.diags.error_count(), 1);
    let diag = cx.diags.iter().next().unwrap();
    assert_eq!(diag.code, ErrorCode::ImmediateRequired);
    // The asm is still emitted, with a placeholder immediate.
    assert_eq!(count_kind(&func, |k| matches!(k, InstrKind::InlineAsm { .. })), 1);
}

#[test]
fn lowered_function_renders_readably() {
    let mut unit = TestUnit::new();
    let x = unit.decl("x", TypeIdx::I64);
    let init = unit.int(TypeIdx::I64, 5);
    let bind = unit.stmt(ExprKind::Bind { decl: x, init });
    let source = unit.void_fn("render_me", &[bind]);

    let (cx, func) = lower_with(&unit, &source);
    let text = sable_lir::function_to_string(&func, &cx.types, &cx.consts, &unit.interner);
    assert!(text.contains("fn @render_me"));
    assert!(text.contains("StackSlot"));
    assert!(text.contains("Store 5"));
    assert!(text.contains("Ret"));
}

// -- Whole-unit driving --

#[test]
fn lower_unit_accumulates_functions_and_reuses_constants() {
    let mut unit = TestUnit::new();
    let x1 = unit.decl("x", TypeIdx::I64);
    let c1 = unit.int(TypeIdx::I64, 42);
    let bind1 = unit.stmt(ExprKind::Bind { decl: x1, init: c1 });
    let f = unit.void_fn("f", &[bind1]);

    let x2 = unit.decl("y", TypeIdx::I64);
    let c2 = unit.int(TypeIdx::I64, 42);
    let bind2 = unit.stmt(ExprKind::Bind { decl: x2, init: c2 });
    let g = unit.void_fn("g", &[bind2]);

    let mut cx = unit.cx();
    let mut abi = RegChunkAbi::new();
    let mut storage = StackStorage;
    let mut debug = NullDebugSink;
    sable_lower::lower_unit(&mut cx, &[f, g], &mut abi, &mut storage, &mut debug).unwrap();

    assert_eq!(cx.module.functions.len(), 2);
    // The literal 42 interned once, shared across both functions.
    let i64_ty = cx.types.int(64);
    let before = cx.consts.len();
    let first = cx.consts.int(i64_ty, 42);
    let again = cx.consts.int(i64_ty, 42);
    assert_eq!(first, again);
    assert_eq!(cx.consts.len(), before, "the literal was already interned");
}
