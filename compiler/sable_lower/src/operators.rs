//! Unary and binary operator lowering.
//!
//! Dispatch is on the result's type category: pointer, integer, float, or
//! paired-scalar complex. Pointer arithmetic takes a byte delta on the
//! integer side and uses element-stride addressing when the delta provably
//! divides the pointee's size, falling back to raw byte arithmetic
//! otherwise. The division/remainder variants with no primitive instruction
//! (ceiling, floor, round-to-nearest divide; floor modulo) are synthesized
//! from truncating divide/remainder via sign-comparison identities.

use sable_ir::ast::{BinOp, NodeId, UnaryOp};
use sable_lir::{BinIr, CmpPred, InstrKind, IrTypeId, Operand, UnIr};
use sable_types::{SourceType, TypeIdx};

use crate::builder::val;
use crate::expr::FunctionLowerer;
use crate::lvalue::Place;
use crate::{LowerError, LowerCx};

/// Operator dispatch category of a type.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum Category {
    Pointer,
    Int { signed: bool },
    Float,
    Complex,
}

fn category(cx: &LowerCx<'_>, ty: TypeIdx) -> Result<Category, LowerError> {
    match cx.pool.get(ty) {
        SourceType::Bool => Ok(Category::Int { signed: false }),
        SourceType::Int { signed, .. } => Ok(Category::Int { signed: *signed }),
        SourceType::Float { .. } => Ok(Category::Float),
        SourceType::Pointer { .. } => Ok(Category::Pointer),
        SourceType::Complex { .. } => Ok(Category::Complex),
        SourceType::Enum { repr: Some(r), .. } => category(cx, *r),
        other => Err(LowerError::contract(format!(
            "operator on non-arithmetic type {other:?}"
        ))),
    }
}

impl<'c, 'a> FunctionLowerer<'c, 'a> {
    // -----------------------------------------------------------------------
    // Unary
    // -----------------------------------------------------------------------

    pub(crate) fn lower_unary(
        &mut self,
        node: NodeId,
        op: UnaryOp,
        operand: NodeId,
        dest: Option<&Place>,
    ) -> Result<Option<Operand>, LowerError> {
        let ty = self.cx.node_type(node)?;
        if matches!(category(self.cx, ty)?, Category::Complex) {
            let dest = dest
                .ok_or_else(|| LowerError::contract("complex operator without a destination"))?;
            self.lower_complex_unary(node, op, operand, dest)?;
            return Ok(None);
        }

        let v = self
            .lower(operand, None)?
            .ok_or_else(|| LowerError::contract("unary operand produced no value"))?;
        let ir = self.ir_type(ty)?;
        let result = match (op, category(self.cx, ty)?) {
            (UnaryOp::Neg, Category::Float) => self.builder.push(
                InstrKind::Un {
                    op: UnIr::FNeg,
                    operand: v,
                },
                ir,
            ),
            (UnaryOp::Neg, Category::Int { .. }) => self.builder.push(
                InstrKind::Un {
                    op: UnIr::Neg,
                    operand: v,
                },
                ir,
            ),
            (UnaryOp::BitNot, Category::Int { .. }) => self.builder.push(
                InstrKind::Un {
                    op: UnIr::Not,
                    operand: v,
                },
                ir,
            ),
            (UnaryOp::Not, _) => {
                // Logical not: compare against zero, then widen to the
                // node's boolean representation.
                let operand_ty = self.cx.node_type(operand)?;
                let flag = self.as_condition(v, operand_ty)?;
                let i1 = self.cx.types.int(1);
                let one = self.const_int(i1, 1);
                let inverted = self.builder.push(
                    InstrKind::Bin {
                        op: BinIr::Xor,
                        lhs: val(flag),
                        rhs: one,
                    },
                    i1,
                );
                self.builder.push(
                    InstrKind::Cast {
                        kind: sable_lir::CastKind::ZExt,
                        operand: val(inverted),
                        to: ir,
                    },
                    ir,
                )
            }
            (op, cat) => {
                return Err(LowerError::contract(format!(
                    "unary {op:?} on {cat:?} operand"
                )));
            }
        };
        Ok(Some(val(result)))
    }

    // -----------------------------------------------------------------------
    // Binary
    // -----------------------------------------------------------------------

    pub(crate) fn lower_binary(
        &mut self,
        node: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
        dest: Option<&Place>,
    ) -> Result<Option<Operand>, LowerError> {
        if op.is_comparison() {
            return Ok(Some(self.lower_compare(node, op, lhs, rhs)?));
        }
        let ty = self.cx.node_type(node)?;
        match category(self.cx, ty)? {
            Category::Pointer => Ok(Some(self.lower_pointer_arith(node, op, lhs, rhs)?)),
            Category::Int { signed } => {
                // Pointer difference carries an integer result type but
                // pointer operands.
                let lhs_ty = self.cx.node_type(lhs)?;
                if matches!(self.cx.pool.get(lhs_ty), SourceType::Pointer { .. }) {
                    return Ok(Some(self.lower_pointer_diff(node, op, lhs, rhs)?));
                }
                let a = self.operand(lhs)?;
                let b = self.operand(rhs)?;
                let ir = self.ir_type(ty)?;
                Ok(Some(self.lower_int_binary(op, signed, ir, a, b)?))
            }
            Category::Float => {
                let a = self.operand(lhs)?;
                let b = self.operand(rhs)?;
                let ir = self.ir_type(ty)?;
                let bin = match op {
                    BinOp::Add => BinIr::FAdd,
                    BinOp::Sub => BinIr::FSub,
                    BinOp::Mul => BinIr::FMul,
                    BinOp::Div => BinIr::FDiv,
                    other => {
                        return Err(LowerError::contract(format!(
                            "binary {other:?} on float operands"
                        )));
                    }
                };
                Ok(Some(val(self.builder.push(
                    InstrKind::Bin {
                        op: bin,
                        lhs: a,
                        rhs: b,
                    },
                    ir,
                ))))
            }
            Category::Complex => {
                let dest = dest.ok_or_else(|| {
                    LowerError::contract("complex operator without a destination")
                })?;
                self.lower_complex_binary(node, op, lhs, rhs, dest)?;
                Ok(None)
            }
        }
    }

    fn operand(&mut self, node: NodeId) -> Result<Operand, LowerError> {
        self.lower(node, None)?
            .ok_or_else(|| LowerError::contract("operand produced no value"))
    }

    // -----------------------------------------------------------------------
    // Integer arithmetic and the synthesized division family
    // -----------------------------------------------------------------------

    fn lower_int_binary(
        &mut self,
        op: BinOp,
        signed: bool,
        ir: IrTypeId,
        a: Operand,
        b: Operand,
    ) -> Result<Operand, LowerError> {
        let simple = match op {
            BinOp::Add => Some(BinIr::Add),
            BinOp::Sub => Some(BinIr::Sub),
            BinOp::Mul => Some(BinIr::Mul),
            BinOp::Div => Some(if signed { BinIr::SDiv } else { BinIr::UDiv }),
            BinOp::Rem => Some(if signed { BinIr::SRem } else { BinIr::URem }),
            BinOp::BitAnd => Some(BinIr::And),
            BinOp::BitOr => Some(BinIr::Or),
            BinOp::BitXor => Some(BinIr::Xor),
            BinOp::Shl => Some(BinIr::Shl),
            BinOp::Shr => Some(if signed { BinIr::AShr } else { BinIr::LShr }),
            _ => None,
        };
        if let Some(bin) = simple {
            return Ok(val(self.builder.push(
                InstrKind::Bin {
                    op: bin,
                    lhs: a,
                    rhs: b,
                },
                ir,
            )));
        }
        match op {
            BinOp::CeilDiv => self.synth_ceil_div(signed, ir, a, b),
            BinOp::FloorDiv => self.synth_floor_div(signed, ir, a, b),
            BinOp::RoundDiv => self.synth_round_div(signed, ir, a, b),
            BinOp::FloorRem => self.synth_floor_rem(signed, ir, a, b),
            other => Err(LowerError::contract(format!(
                "binary {other:?} on integer operands"
            ))),
        }
    }

    fn bin(&mut self, op: BinIr, ir: IrTypeId, lhs: Operand, rhs: Operand) -> Operand {
        val(self.builder.push(InstrKind::Bin { op, lhs, rhs }, ir))
    }

    fn cmp(&mut self, pred: CmpPred, lhs: Operand, rhs: Operand) -> Operand {
        let i1 = self.cx.types.int(1);
        val(self.builder.push(InstrKind::Cmp { pred, lhs, rhs }, i1))
    }

    fn zext_to(&mut self, flag: Operand, ir: IrTypeId) -> Operand {
        val(self.builder.push(
            InstrKind::Cast {
                kind: sable_lir::CastKind::ZExt,
                operand: flag,
                to: ir,
            },
            ir,
        ))
    }

    /// `trunc_rem(a, b) != 0`.
    fn rem_nonzero(&mut self, ir: IrTypeId, r: Operand) -> Operand {
        let zero = self.const_int(ir, 0);
        self.cmp(CmpPred::Ne, r, zero)
    }

    /// Whether `a` and `b` have differing signs (`(a ^ b) < 0`).
    fn signs_differ(&mut self, ir: IrTypeId, a: Operand, b: Operand) -> Operand {
        let x = self.bin(BinIr::Xor, ir, a, b);
        let zero = self.const_int(ir, 0);
        self.cmp(CmpPred::Slt, x, zero)
    }

    /// Ceiling division: adjust the truncating quotient up by one when the
    /// remainder is nonzero and the operands agree in sign.
    fn synth_ceil_div(
        &mut self,
        signed: bool,
        ir: IrTypeId,
        a: Operand,
        b: Operand,
    ) -> Result<Operand, LowerError> {
        if !signed {
            let q = self.bin(BinIr::UDiv, ir, a, b);
            let r = self.bin(BinIr::URem, ir, a, b);
            let nz = self.rem_nonzero(ir, r);
            let bump = self.zext_to(nz, ir);
            return Ok(self.bin(BinIr::Add, ir, q, bump));
        }
        let q = self.bin(BinIr::SDiv, ir, a, b);
        let r = self.bin(BinIr::SRem, ir, a, b);
        let nz = self.rem_nonzero(ir, r);
        let differ = self.signs_differ(ir, a, b);
        let i1 = self.cx.types.int(1);
        let one = self.const_int(i1, 1);
        let same = self.bin(BinIr::Xor, i1, differ, one);
        let need = self.bin(BinIr::And, i1, nz, same);
        let bump = self.zext_to(need, ir);
        Ok(self.bin(BinIr::Add, ir, q, bump))
    }

    /// Floor division: adjust the truncating quotient down by one when the
    /// remainder is nonzero and the operands differ in sign.
    fn synth_floor_div(
        &mut self,
        signed: bool,
        ir: IrTypeId,
        a: Operand,
        b: Operand,
    ) -> Result<Operand, LowerError> {
        if !signed {
            return Ok(self.bin(BinIr::UDiv, ir, a, b));
        }
        let q = self.bin(BinIr::SDiv, ir, a, b);
        let r = self.bin(BinIr::SRem, ir, a, b);
        let nz = self.rem_nonzero(ir, r);
        let differ = self.signs_differ(ir, a, b);
        let i1 = self.cx.types.int(1);
        let need = self.bin(BinIr::And, i1, nz, differ);
        let bump = self.zext_to(need, ir);
        Ok(self.bin(BinIr::Sub, ir, q, bump))
    }

    /// Floor modulo: the truncating remainder, adjusted by adding the
    /// divisor when the operand signs differ and the remainder is nonzero.
    fn synth_floor_rem(
        &mut self,
        signed: bool,
        ir: IrTypeId,
        a: Operand,
        b: Operand,
    ) -> Result<Operand, LowerError> {
        if !signed {
            return Ok(self.bin(BinIr::URem, ir, a, b));
        }
        let r = self.bin(BinIr::SRem, ir, a, b);
        let nz = self.rem_nonzero(ir, r);
        let differ = self.signs_differ(ir, a, b);
        let i1 = self.cx.types.int(1);
        let need = self.bin(BinIr::And, i1, nz, differ);
        let zero = self.const_int(ir, 0);
        let addend = val(self.builder.push(
            InstrKind::Select {
                cond: need,
                if_true: b,
                if_false: zero,
            },
            ir,
        ));
        Ok(self.bin(BinIr::Add, ir, r, addend))
    }

    /// Round-to-nearest division, halves away from zero: adjust the
    /// truncating quotient by the joint sign when `2*|r| >= |b|`.
    fn synth_round_div(
        &mut self,
        signed: bool,
        ir: IrTypeId,
        a: Operand,
        b: Operand,
    ) -> Result<Operand, LowerError> {
        if !signed {
            let q = self.bin(BinIr::UDiv, ir, a, b);
            let r = self.bin(BinIr::URem, ir, a, b);
            let one = self.const_int(ir, 1);
            let two_r = self.bin(BinIr::Shl, ir, r, one);
            let round_up = self.cmp(CmpPred::Uge, two_r, b);
            let bump = self.zext_to(round_up, ir);
            return Ok(self.bin(BinIr::Add, ir, q, bump));
        }
        let q = self.bin(BinIr::SDiv, ir, a, b);
        let r = self.bin(BinIr::SRem, ir, a, b);
        let zero = self.const_int(ir, 0);

        let r_neg = self.cmp(CmpPred::Slt, r, zero);
        let neg_r = val(self.builder.push(
            InstrKind::Un {
                op: UnIr::Neg,
                operand: r,
            },
            ir,
        ));
        let abs_r = val(self.builder.push(
            InstrKind::Select {
                cond: r_neg,
                if_true: neg_r,
                if_false: r,
            },
            ir,
        ));
        let b_neg = self.cmp(CmpPred::Slt, b, zero);
        let neg_b = val(self.builder.push(
            InstrKind::Un {
                op: UnIr::Neg,
                operand: b,
            },
            ir,
        ));
        let abs_b = val(self.builder.push(
            InstrKind::Select {
                cond: b_neg,
                if_true: neg_b,
                if_false: b,
            },
            ir,
        ));

        let one = self.const_int(ir, 1);
        let two_r = self.bin(BinIr::Shl, ir, abs_r, one);
        let round = self.cmp(CmpPred::Uge, two_r, abs_b);

        let differ = self.signs_differ(ir, a, b);
        let minus_one = self.const_int(ir, -1);
        let adj = val(self.builder.push(
            InstrKind::Select {
                cond: differ,
                if_true: minus_one,
                if_false: one,
            },
            ir,
        ));
        let bump = val(self.builder.push(
            InstrKind::Select {
                cond: round,
                if_true: adj,
                if_false: zero,
            },
            ir,
        ));
        Ok(self.bin(BinIr::Add, ir, q, bump))
    }

    // -----------------------------------------------------------------------
    // Pointer arithmetic
    // -----------------------------------------------------------------------

    /// `ptr ± byte-delta`. Element-stride addressing when the constant byte
    /// delta evenly divides the pointee's size; raw byte arithmetic
    /// otherwise (including every non-constant delta).
    fn lower_pointer_arith(
        &mut self,
        node: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<Operand, LowerError> {
        let ty = self.cx.node_type(node)?;
        let pointee = match self.cx.pool.get(ty) {
            SourceType::Pointer { pointee } => *pointee,
            other => {
                return Err(LowerError::contract(format!(
                    "pointer arithmetic with non-pointer result {other:?}"
                )));
            }
        };
        // One side is the pointer, the other the integer byte delta.
        let lhs_ty = self.cx.node_type(lhs)?;
        let lhs_is_ptr = matches!(self.cx.pool.get(lhs_ty), SourceType::Pointer { .. });
        let (ptr_node, delta_node) = if lhs_is_ptr { (lhs, rhs) } else { (rhs, lhs) };

        let base = self.operand(ptr_node)?;
        let delta = self.operand(delta_node)?;
        let negate = match op {
            BinOp::Add => false,
            BinOp::Sub => true,
            other => {
                return Err(LowerError::contract(format!(
                    "binary {other:?} on pointer operands"
                )));
            }
        };

        let elem_ir = self.ir_type(pointee)?;
        let ptr_ir = self.ptr_to(elem_ir);
        let elem_size = self.cx.pool.size_of(pointee).unwrap_or(0);

        if let Operand::Const(c) = delta {
            if let Some(bytes) = self.cx.consts.as_int(c) {
                if elem_size > 0 && bytes % elem_size as i64 == 0 {
                    let count = bytes / elem_size as i64;
                    let count = if negate { -count } else { count };
                    let i64_ty = self.cx.types.int(64);
                    let index = self.const_int(i64_ty, count);
                    return Ok(val(self.builder.push(
                        InstrKind::ElemAddr {
                            base,
                            element: elem_ir,
                            index,
                        },
                        ptr_ir,
                    )));
                }
            }
        }

        // Fall back to raw byte arithmetic.
        let i64_ty = self.cx.types.int(64);
        let offset = if negate {
            val(self.builder.push(
                InstrKind::Un {
                    op: UnIr::Neg,
                    operand: delta,
                },
                i64_ty,
            ))
        } else {
            delta
        };
        Ok(val(self.builder.push(
            InstrKind::ByteAddr { base, offset },
            ptr_ir,
        )))
    }

    /// `ptr - ptr`, yielding the element distance.
    fn lower_pointer_diff(
        &mut self,
        node: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<Operand, LowerError> {
        if op != BinOp::Sub {
            return Err(LowerError::contract(format!(
                "binary {op:?} between pointers"
            )));
        }
        let ty = self.cx.node_type(node)?;
        let ir = self.ir_type(ty)?;
        let lhs_ty = self.cx.node_type(lhs)?;
        let pointee = match self.cx.pool.get(lhs_ty) {
            SourceType::Pointer { pointee } => *pointee,
            _ => return Err(LowerError::contract("pointer difference on non-pointer")),
        };
        let a = self.operand(lhs)?;
        let b = self.operand(rhs)?;
        let ai = val(self.builder.push(
            InstrKind::Cast {
                kind: sable_lir::CastKind::PtrToInt,
                operand: a,
                to: ir,
            },
            ir,
        ));
        let bi = val(self.builder.push(
            InstrKind::Cast {
                kind: sable_lir::CastKind::PtrToInt,
                operand: b,
                to: ir,
            },
            ir,
        ));
        let bytes = self.bin(BinIr::Sub, ir, ai, bi);
        let size = self.cx.pool.size_of(pointee).unwrap_or(1).max(1);
        if size == 1 {
            return Ok(bytes);
        }
        let divisor = self.const_int(ir, size as i64);
        Ok(self.bin(BinIr::SDiv, ir, bytes, divisor))
    }

    // -----------------------------------------------------------------------
    // Comparisons
    // -----------------------------------------------------------------------

    fn lower_compare(
        &mut self,
        node: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<Operand, LowerError> {
        let operand_ty = self.cx.node_type(lhs)?;
        let result_ty = self.cx.node_type(node)?;
        let result_ir = self.ir_type(result_ty)?;

        let flag = match category(self.cx, operand_ty)? {
            Category::Complex => self.lower_complex_compare(op, lhs, rhs)?,
            cat => {
                let a = self.operand(lhs)?;
                let b = self.operand(rhs)?;
                let pred = match cat {
                    Category::Float => match op {
                        BinOp::Eq => CmpPred::FOeq,
                        BinOp::Ne => CmpPred::FOne,
                        BinOp::Lt => CmpPred::FOlt,
                        BinOp::Le => CmpPred::FOle,
                        BinOp::Gt => CmpPred::FOgt,
                        BinOp::Ge => CmpPred::FOge,
                        _ => unreachable!("non-comparison op in lower_compare"),
                    },
                    Category::Int { signed: true } => match op {
                        BinOp::Eq => CmpPred::Eq,
                        BinOp::Ne => CmpPred::Ne,
                        BinOp::Lt => CmpPred::Slt,
                        BinOp::Le => CmpPred::Sle,
                        BinOp::Gt => CmpPred::Sgt,
                        BinOp::Ge => CmpPred::Sge,
                        _ => unreachable!("non-comparison op in lower_compare"),
                    },
                    // Pointers compare as unsigned addresses.
                    Category::Int { signed: false } | Category::Pointer => match op {
                        BinOp::Eq => CmpPred::Eq,
                        BinOp::Ne => CmpPred::Ne,
                        BinOp::Lt => CmpPred::Ult,
                        BinOp::Le => CmpPred::Ule,
                        BinOp::Gt => CmpPred::Ugt,
                        BinOp::Ge => CmpPred::Uge,
                        _ => unreachable!("non-comparison op in lower_compare"),
                    },
                    Category::Complex => unreachable!("handled above"),
                };
                self.cmp(pred, a, b)
            }
        };
        Ok(self.zext_to(flag, result_ir))
    }

    // -----------------------------------------------------------------------
    // Paired-scalar complex
    // -----------------------------------------------------------------------

    /// Load the (re, im) components of a complex-typed node, spilling
    /// non-addressable operands to a temporary.
    fn complex_parts(&mut self, node: NodeId) -> Result<(Operand, Operand, IrTypeId), LowerError> {
        let ty = self.cx.node_type(node)?;
        let part = match self.cx.pool.get(ty) {
            SourceType::Complex { part } => *part,
            other => {
                return Err(LowerError::contract(format!(
                    "complex operand of type {other:?}"
                )));
            }
        };
        let agg = self.ir_type(ty)?;
        let part_ir = self.ir_type(part)?;

        let addr = if self.is_addressable(node) {
            self.lower_address(node)?.addr
        } else {
            let tmp = self.temp_slot(ty)?;
            let place = Place::direct(tmp);
            self.lower(node, Some(&place))?;
            tmp
        };
        let re_addr = self.field_addr(addr, agg, 0);
        let im_addr = self.field_addr(addr, agg, 1);
        let re = val(self.builder.push(
            InstrKind::Load {
                addr: re_addr,
                ty: part_ir,
            },
            part_ir,
        ));
        let im = val(self.builder.push(
            InstrKind::Load {
                addr: im_addr,
                ty: part_ir,
            },
            part_ir,
        ));
        Ok((re, im, part_ir))
    }

    fn is_addressable(&self, node: NodeId) -> bool {
        matches!(
            self.cx.ast.kind(node),
            sable_ir::ast::ExprKind::NameRef { .. }
                | sable_ir::ast::ExprKind::Deref { .. }
                | sable_ir::ast::ExprKind::Index { .. }
                | sable_ir::ast::ExprKind::Field { .. }
                | sable_ir::ast::ExprKind::Reinterpret { .. }
        )
    }

    fn store_complex(
        &mut self,
        dest: &Place,
        node_ty: TypeIdx,
        re: Operand,
        im: Operand,
    ) -> Result<(), LowerError> {
        let agg = self.ir_type(node_ty)?;
        let void = self.cx.types.void();
        let re_addr = self.field_addr(dest.addr, agg, 0);
        self.builder.push_void(
            InstrKind::Store {
                addr: re_addr,
                value: re,
            },
            void,
        );
        let im_addr = self.field_addr(dest.addr, agg, 1);
        self.builder.push_void(
            InstrKind::Store {
                addr: im_addr,
                value: im,
            },
            void,
        );
        Ok(())
    }

    fn lower_complex_unary(
        &mut self,
        node: NodeId,
        op: UnaryOp,
        operand: NodeId,
        dest: &Place,
    ) -> Result<(), LowerError> {
        let ty = self.cx.node_type(node)?;
        let (re, im, part_ir) = self.complex_parts(operand)?;
        match op {
            UnaryOp::Neg => {
                let nre = val(self.builder.push(
                    InstrKind::Un {
                        op: UnIr::FNeg,
                        operand: re,
                    },
                    part_ir,
                ));
                let nim = val(self.builder.push(
                    InstrKind::Un {
                        op: UnIr::FNeg,
                        operand: im,
                    },
                    part_ir,
                ));
                self.store_complex(dest, ty, nre, nim)
            }
            other => Err(LowerError::contract(format!(
                "unary {other:?} on complex operand"
            ))),
        }
    }

    fn lower_complex_binary(
        &mut self,
        node: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
        dest: &Place,
    ) -> Result<(), LowerError> {
        let ty = self.cx.node_type(node)?;
        let (a, b, part) = self.complex_parts(lhs)?;
        let (c, d, _) = self.complex_parts(rhs)?;
        let (re, im) = match op {
            BinOp::Add => (
                self.bin(BinIr::FAdd, part, a, c),
                self.bin(BinIr::FAdd, part, b, d),
            ),
            BinOp::Sub => (
                self.bin(BinIr::FSub, part, a, c),
                self.bin(BinIr::FSub, part, b, d),
            ),
            BinOp::Mul => {
                // (a+bi)(c+di) = (ac - bd) + (ad + bc)i
                let ac = self.bin(BinIr::FMul, part, a, c);
                let bd = self.bin(BinIr::FMul, part, b, d);
                let ad = self.bin(BinIr::FMul, part, a, d);
                let bc = self.bin(BinIr::FMul, part, b, c);
                (
                    self.bin(BinIr::FSub, part, ac, bd),
                    self.bin(BinIr::FAdd, part, ad, bc),
                )
            }
            BinOp::Div => {
                // (a+bi)/(c+di) = ((ac+bd) + (bc-ad)i) / (c²+d²)
                let cc = self.bin(BinIr::FMul, part, c, c);
                let dd = self.bin(BinIr::FMul, part, d, d);
                let denom = self.bin(BinIr::FAdd, part, cc, dd);
                let ac = self.bin(BinIr::FMul, part, a, c);
                let bd = self.bin(BinIr::FMul, part, b, d);
                let bc = self.bin(BinIr::FMul, part, b, c);
                let ad = self.bin(BinIr::FMul, part, a, d);
                let re_num = self.bin(BinIr::FAdd, part, ac, bd);
                let im_num = self.bin(BinIr::FSub, part, bc, ad);
                (
                    self.bin(BinIr::FDiv, part, re_num, denom),
                    self.bin(BinIr::FDiv, part, im_num, denom),
                )
            }
            other => {
                return Err(LowerError::contract(format!(
                    "binary {other:?} on complex operands"
                )));
            }
        };
        self.store_complex(dest, ty, re, im)
    }

    /// Complex equality: both components must match (`Ne` when either
    /// differs).
    fn lower_complex_compare(
        &mut self,
        op: BinOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<Operand, LowerError> {
        let (a, b, _) = self.complex_parts(lhs)?;
        let (c, d, _) = self.complex_parts(rhs)?;
        let i1 = self.cx.types.int(1);
        match op {
            BinOp::Eq => {
                let re_eq = self.cmp(CmpPred::FOeq, a, c);
                let im_eq = self.cmp(CmpPred::FOeq, b, d);
                Ok(self.bin(BinIr::And, i1, re_eq, im_eq))
            }
            BinOp::Ne => {
                let re_ne = self.cmp(CmpPred::FOne, a, c);
                let im_ne = self.cmp(CmpPred::FOne, b, d);
                Ok(self.bin(BinIr::Or, i1, re_ne, im_ne))
            }
            other => Err(LowerError::contract(format!(
                "ordering {other:?} on complex operands"
            ))),
        }
    }
}
