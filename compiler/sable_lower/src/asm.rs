//! Inline-assembly lowering.
//!
//! Operand problems here are user mistakes, not engine bugs: a template
//! referencing a nonexistent operand or a non-constant value against an
//! immediate-only constraint is reported through the diagnostic queue, a
//! placeholder is substituted, and lowering continues so later errors in
//! the same function still surface.

use sable_diagnostic::{Diagnostic, ErrorCode};
use sable_ir::ast::{AsmRange, NodeId};
use sable_ir::Name;
use sable_lir::{InstrKind, Operand};
use smallvec::SmallVec;

use crate::builder::val;
use crate::expr::FunctionLowerer;
use crate::LowerError;

/// Scan a template for `%N` operand references, returning the highest
/// index referenced. `%%` is a literal percent.
fn max_operand_reference(template: &str) -> Option<usize> {
    let bytes = template.as_bytes();
    let mut best: Option<usize> = None;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'%' {
                i += 2;
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                if let Ok(index) = template[start..end].parse::<usize>() {
                    best = Some(best.map_or(index, |b| b.max(index)));
                }
                i = end;
                continue;
            }
        }
        i += 1;
    }
    best
}

impl<'c, 'a> FunctionLowerer<'c, 'a> {
    pub(crate) fn lower_asm(
        &mut self,
        node: NodeId,
        template: Name,
        operands: AsmRange,
    ) -> Result<Option<Operand>, LowerError> {
        let span = self.cx.ast.span(node);
        let ops = self.cx.ast.asm_operands(operands).to_vec();
        let text = self.cx.interner.resolve(template);

        // Validate template references before lowering anything.
        if let Some(max_ref) = max_operand_reference(text) {
            if max_ref >= ops.len() {
                self.cx.diags.push(Diagnostic::error(
                    ErrorCode::AsmOperand,
                    span,
                    format!(
                        "assembly template references operand %{max_ref} but only {} operand(s) were supplied",
                        ops.len()
                    ),
                ));
                return self.asm_placeholder(node);
            }
        }

        let mut args: SmallVec<[Operand; 4]> = SmallVec::new();
        let mut constraints: SmallVec<[Name; 4]> = SmallVec::new();
        for op in ops {
            constraints.push(op.constraint);
            if op.is_output {
                // Outputs are lvalues; the operand is their address.
                let place = self.lower_address(op.expr)?;
                args.push(place.addr);
                continue;
            }
            let value = self
                .lower(op.expr, None)?
                .ok_or_else(|| LowerError::contract("asm input produced no value"))?;
            if op.requires_immediate(self.cx.interner) && !matches!(value, Operand::Const(_)) {
                self.cx.diags.push(Diagnostic::error(
                    ErrorCode::ImmediateRequired,
                    self.cx.ast.span(op.expr),
                    "operand must be a compile-time constant for an immediate constraint",
                ));
                // Substitute a zero immediate and keep going.
                let ty = self.cx.node_type(op.expr)?;
                let ir = self.ir_type(ty)?;
                args.push(self.const_int(ir, 0));
                continue;
            }
            args.push(value);
        }

        let ty = self.cx.typed.node_type(node);
        if ty.is_none() || ty.is_void() {
            let void = self.cx.types.void();
            self.builder.push_void(
                InstrKind::InlineAsm {
                    template,
                    args,
                    constraints,
                },
                void,
            );
            return Ok(None);
        }
        let ir = self.ir_type(ty)?;
        Ok(Some(val(self.builder.push(
            InstrKind::InlineAsm {
                template,
                args,
                constraints,
            },
            ir,
        ))))
    }

    /// The placeholder result for an assembly node that failed validation.
    fn asm_placeholder(&mut self, node: NodeId) -> Result<Option<Operand>, LowerError> {
        let ty = self.cx.typed.node_type(node);
        if ty.is_none() || ty.is_void() {
            return Ok(None);
        }
        let ir = self.ir_type(ty)?;
        Ok(Some(self.const_int(ir, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::max_operand_reference;

    #[test]
    fn finds_highest_reference() {
        assert_eq!(max_operand_reference("mov %0, %1"), Some(1));
        assert_eq!(max_operand_reference("add %2, %0"), Some(2));
    }

    #[test]
    fn double_percent_is_literal() {
        assert_eq!(max_operand_reference("mov %%eax, 4"), None);
    }

    #[test]
    fn no_references() {
        assert_eq!(max_operand_reference("nop"), None);
    }
}
