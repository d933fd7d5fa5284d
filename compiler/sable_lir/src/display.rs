//! Textual rendering of lowered functions.
//!
//! The format is for humans and golden tests; it is not a stable
//! serialization.

use std::fmt::Write as _;

use sable_ir::StringInterner;

use crate::{
    Callee, ConstTable, ConstValue, Instr, InstrKind, IrFunction, IrType, Operand, Terminator,
    TypeTable,
};

fn write_type(out: &mut String, types: &TypeTable, id: crate::IrTypeId) {
    match types.get(id) {
        IrType::Void => out.push_str("void"),
        IrType::Int { bits } => {
            let _ = write!(out, "i{bits}");
        }
        IrType::Float { bits } => {
            let _ = write!(out, "f{bits}");
        }
        IrType::Ptr { .. } => out.push_str("ptr"),
        IrType::Array { element, len } => {
            let _ = write!(out, "[{len} x ");
            write_type(out, types, *element);
            out.push(']');
        }
        IrType::Aggregate(layout) => {
            let _ = write!(out, "{{agg size={} align={}", layout.size, layout.align);
            if layout.packed {
                out.push_str(" packed");
            }
            out.push('}');
        }
        IrType::Func { .. } => out.push_str("fn"),
        IrType::Incomplete { .. } => out.push_str("incomplete"),
    }
}

fn write_operand(out: &mut String, consts: &ConstTable, interner: &StringInterner, op: Operand) {
    match op {
        Operand::Value(v) => {
            let _ = write!(out, "%{}", v.raw());
        }
        Operand::Const(c) => match consts.get(c) {
            ConstValue::Int { value, .. } => {
                let _ = write!(out, "{value}");
            }
            ConstValue::Float { bits, .. } => {
                let _ = write!(out, "{}", f64::from_bits(*bits));
            }
            ConstValue::Null { .. } => out.push_str("null"),
            ConstValue::GlobalAddr { symbol, .. } => {
                let _ = write!(out, "@{}", interner.resolve(*symbol));
            }
            ConstValue::Zero { .. } => out.push_str("zeroinit"),
        },
    }
}

fn write_callee(out: &mut String, consts: &ConstTable, interner: &StringInterner, callee: &Callee) {
    match callee {
        Callee::Direct { symbol, .. } => {
            let _ = write!(out, "@{}", interner.resolve(*symbol));
        }
        Callee::Indirect { ptr, .. } => write_operand(out, consts, interner, *ptr),
    }
}

fn write_instr(
    out: &mut String,
    types: &TypeTable,
    consts: &ConstTable,
    interner: &StringInterner,
    instr: &Instr,
) {
    out.push_str("  ");
    if let Some(result) = instr.result {
        let _ = write!(out, "%{} = ", result.raw());
    }
    match &instr.kind {
        InstrKind::Bin { op, lhs, rhs } => {
            let _ = write!(out, "{op:?} ");
            write_operand(out, consts, interner, *lhs);
            out.push_str(", ");
            write_operand(out, consts, interner, *rhs);
        }
        InstrKind::Cmp { pred, lhs, rhs } => {
            let _ = write!(out, "Cmp {pred:?} ");
            write_operand(out, consts, interner, *lhs);
            out.push_str(", ");
            write_operand(out, consts, interner, *rhs);
        }
        InstrKind::Un { op, operand } => {
            let _ = write!(out, "{op:?} ");
            write_operand(out, consts, interner, *operand);
        }
        InstrKind::Cast { kind, operand, to } => {
            let _ = write!(out, "{kind:?} ");
            write_operand(out, consts, interner, *operand);
            out.push_str(" to ");
            write_type(out, types, *to);
        }
        InstrKind::Select {
            cond,
            if_true,
            if_false,
        } => {
            out.push_str("Select ");
            write_operand(out, consts, interner, *cond);
            out.push_str(", ");
            write_operand(out, consts, interner, *if_true);
            out.push_str(", ");
            write_operand(out, consts, interner, *if_false);
        }
        InstrKind::StackSlot { ty } => {
            out.push_str("StackSlot ");
            write_type(out, types, *ty);
        }
        InstrKind::Load { addr, ty } => {
            out.push_str("Load ");
            write_type(out, types, *ty);
            out.push_str(", ");
            write_operand(out, consts, interner, *addr);
        }
        InstrKind::Store { addr, value } => {
            out.push_str("Store ");
            write_operand(out, consts, interner, *value);
            out.push_str(" -> ");
            write_operand(out, consts, interner, *addr);
        }
        InstrKind::ElemAddr {
            base,
            element,
            index,
        } => {
            out.push_str("ElemAddr ");
            write_operand(out, consts, interner, *base);
            out.push_str(" + ");
            write_operand(out, consts, interner, *index);
            out.push_str(" * sizeof(");
            write_type(out, types, *element);
            out.push(')');
        }
        InstrKind::ByteAddr { base, offset } => {
            out.push_str("ByteAddr ");
            write_operand(out, consts, interner, *base);
            out.push_str(" + ");
            write_operand(out, consts, interner, *offset);
        }
        InstrKind::FieldAddr {
            base,
            element,
            ..
        } => {
            out.push_str("FieldAddr ");
            write_operand(out, consts, interner, *base);
            let _ = write!(out, " element {element}");
        }
        InstrKind::Copy {
            dst,
            src,
            skip_padding,
            ..
        } => {
            out.push_str("Copy ");
            write_operand(out, consts, interner, *src);
            out.push_str(" -> ");
            write_operand(out, consts, interner, *dst);
            if *skip_padding {
                out.push_str(" skip-padding");
            }
        }
        InstrKind::Call { callee, args } => {
            out.push_str("Call ");
            write_callee(out, consts, interner, callee);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_operand(out, consts, interner, *arg);
            }
            out.push(')');
        }
        InstrKind::InlineAsm { template, args, .. } => {
            let _ = write!(out, "Asm \"{}\"(", interner.resolve(*template));
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_operand(out, consts, interner, *arg);
            }
            out.push(')');
        }
        InstrKind::LandingPad => out.push_str("LandingPad"),
        InstrKind::EhMatch { token, tag } => {
            out.push_str("EhMatch ");
            write_operand(out, consts, interner, *token);
            out.push_str(", ");
            write_operand(out, consts, interner, *tag);
        }
    }
    out.push('\n');
}

fn write_terminator(
    out: &mut String,
    consts: &ConstTable,
    interner: &StringInterner,
    term: &Terminator,
) {
    out.push_str("  ");
    match term {
        Terminator::None => out.push_str("<unterminated>"),
        Terminator::Goto(bb) => {
            let _ = write!(out, "Goto bb{}", bb.raw());
        }
        Terminator::CondBr {
            cond,
            then_bb,
            else_bb,
        } => {
            out.push_str("CondBr ");
            write_operand(out, consts, interner, *cond);
            let _ = write!(out, ", bb{}, bb{}", then_bb.raw(), else_bb.raw());
        }
        Terminator::Switch {
            scrutinee,
            cases,
            default,
        } => {
            out.push_str("Switch ");
            write_operand(out, consts, interner, *scrutinee);
            for (value, bb) in cases {
                let _ = write!(out, ", {value} -> bb{}", bb.raw());
            }
            let _ = write!(out, ", default bb{}", default.raw());
        }
        Terminator::Ret(value) => {
            out.push_str("Ret");
            if let Some(v) = value {
                out.push(' ');
                write_operand(out, consts, interner, *v);
            }
        }
        Terminator::Unreachable => out.push_str("Unreachable"),
        Terminator::Invoke {
            callee,
            args,
            result,
            normal,
            unwind,
            ..
        } => {
            if let Some(r) = result {
                let _ = write!(out, "%{} = ", r.raw());
            }
            out.push_str("Invoke ");
            write_callee(out, consts, interner, callee);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_operand(out, consts, interner, *arg);
            }
            let _ = write!(out, ") normal bb{} unwind bb{}", normal.raw(), unwind.raw());
        }
        Terminator::Resume { token } => {
            out.push_str("Resume ");
            write_operand(out, consts, interner, *token);
        }
        Terminator::PendingExit { fixup } => {
            let _ = write!(out, "<pending-exit #{fixup}>");
        }
    }
    out.push('\n');
}

/// Render a function body for debugging and golden tests.
pub fn function_to_string(
    func: &IrFunction,
    types: &TypeTable,
    consts: &ConstTable,
    interner: &StringInterner,
) -> String {
    let mut out = String::new();
    let _ = write!(out, "fn @{}(", interner.resolve(func.name));
    for (i, param) in func.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "%{}: ", i);
        write_type(&mut out, types, param.ty);
    }
    out.push_str(") -> ");
    write_type(&mut out, types, func.ret);
    out.push_str(" {\n");
    for (i, block) in func.blocks.iter().enumerate() {
        let _ = write!(out, "bb{i} ; {}\n", block.label);
        for instr in &block.instrs {
            write_instr(&mut out, types, consts, interner, instr);
        }
        write_terminator(&mut out, consts, interner, &block.term);
    }
    out.push_str("}\n");
    out
}
