//! Address-form lowering.
//!
//! `lower_address` maps an addressable node to a [`Place`]: a pointer value
//! plus, for bit-fields, the bit window inside the storage unit. Places are
//! ephemeral — created and consumed within one lowering call, never stored.
//!
//! Bit-field reads and writes never get dedicated instructions; they are
//! synthesized here from unit loads/stores plus shift/mask sequences, so a
//! downstream pass sees only ordinary memory traffic.

use sable_ir::ast::ExprKind;
use sable_lir::{BinIr, CastKind, InstrKind, IrType, IrTypeId, Operand};
use sable_types::{Field, SourceType, TypeIdx};

use crate::builder::val;
use crate::expr::FunctionLowerer;
use crate::layout::BitWindow;
use crate::{LowerError, LowerCx};

/// An addressable location: pointer value plus optional bit window.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Place {
    pub addr: Operand,
    pub bit: Option<BitWindow>,
}

impl Place {
    /// A plain (non-bit-field) place.
    pub fn direct(addr: Operand) -> Self {
        Place { addr, bit: None }
    }
}

fn bits_of(cx: &LowerCx<'_>, ir: IrTypeId) -> u32 {
    match cx.types.get(ir) {
        IrType::Int { bits } | IrType::Float { bits } => *bits,
        IrType::Ptr { .. } => 64,
        _ => 64,
    }
}

impl<'c, 'a> FunctionLowerer<'c, 'a> {
    // -----------------------------------------------------------------------
    // Address form
    // -----------------------------------------------------------------------

    /// Lower a node to its address.
    pub(crate) fn lower_address(&mut self, node: sable_ir::ast::NodeId) -> Result<Place, LowerError> {
        let kind = *self.cx.ast.kind(node);
        match kind {
            ExprKind::NameRef { decl } => {
                let binding = self.decl_binding(decl)?;
                Ok(Place::direct(binding.addr))
            }
            ExprKind::Deref { ptr } => {
                let v = self
                    .lower(ptr, None)?
                    .ok_or_else(|| LowerError::contract("dereferenced pointer had no value"))?;
                Ok(Place::direct(v))
            }
            ExprKind::Index { base, index } => self.lower_index_address(base, index),
            ExprKind::Field { base, field } => self.lower_field_address(base, field),
            ExprKind::Reinterpret { value } => {
                // Address re-typing: same address, no value change. The new
                // type is the node's own static type, consulted by callers.
                self.lower_address(value)
            }
            other => Err(LowerError::contract(format!(
                "node kind {other:?} is not addressable"
            ))),
        }
    }

    /// Indexed element access: constant-stride addressing when the element
    /// size is statically known, otherwise an explicit byte-stride multiply
    /// (using the element's dynamic size expression when the front end
    /// supplied one).
    fn lower_index_address(
        &mut self,
        base: sable_ir::ast::NodeId,
        index: sable_ir::ast::NodeId,
    ) -> Result<Place, LowerError> {
        let base_ty = self.cx.node_type(base)?;
        let (base_addr, elem_ty) = match self.cx.pool.get(base_ty).clone() {
            SourceType::Pointer { pointee } => {
                let v = self
                    .lower(base, None)?
                    .ok_or_else(|| LowerError::contract("pointer base had no value"))?;
                (v, pointee)
            }
            SourceType::Array { element, .. } => {
                let place = self.lower_address(base)?;
                (place.addr, element)
            }
            other => {
                return Err(LowerError::contract(format!(
                    "indexing into non-indexable {other:?}"
                )));
            }
        };
        let idx = self
            .lower(index, None)?
            .ok_or_else(|| LowerError::contract("index expression had no value"))?;

        let elem_ir = self.ir_type(elem_ty)?;
        let ptr = self.ptr_to(elem_ir);
        match self.cx.pool.size_of(elem_ty) {
            Some(size) if size > 0 => Ok(Place::direct(val(self.builder.push(
                InstrKind::ElemAddr {
                    base: base_addr,
                    element: elem_ir,
                    index: idx,
                },
                ptr,
            )))),
            _ => {
                // No static element size: byte-stride multiply-and-offset.
                let size_v = self.dynamic_size_of(elem_ty)?;
                let i64_ty = self.cx.types.int(64);
                let bytes = val(self.builder.push(
                    InstrKind::Bin {
                        op: BinIr::Mul,
                        lhs: idx,
                        rhs: size_v,
                    },
                    i64_ty,
                ));
                Ok(Place::direct(val(self.builder.push(
                    InstrKind::ByteAddr {
                        base: base_addr,
                        offset: bytes,
                    },
                    ptr,
                ))))
            }
        }
    }

    /// The run-time byte size of a statically unsized type, from the front
    /// end's dynamic size expression. Missing expressions are a recoverable
    /// diagnostic; lowering substitutes zero and continues.
    fn dynamic_size_of(&mut self, ty: TypeIdx) -> Result<Operand, LowerError> {
        if let SourceType::Record(record) = self.cx.pool.get(ty) {
            if let Some(size_expr) = record.dynamic_size {
                return self
                    .lower(size_expr, None)?
                    .ok_or_else(|| LowerError::contract("dynamic size expression had no value"));
            }
        }
        let span = sable_ir::Span::DUMMY;
        self.cx.diags.push(sable_diagnostic::Diagnostic::error(
            sable_diagnostic::ErrorCode::UnsupportedFeature,
            span,
            "element type has no static or dynamic size",
        ));
        let i64_ty = self.cx.types.int(64);
        Ok(self.const_int(i64_ty, 0))
    }

    /// Field access: precomputed constant offset, a bit-field window, or a
    /// runtime-computed offset for variable layouts.
    fn lower_field_address(
        &mut self,
        base: sable_ir::ast::NodeId,
        field_index: u32,
    ) -> Result<Place, LowerError> {
        let base_ty = self.cx.node_type(base)?;
        let record = match self.cx.pool.get(base_ty) {
            SourceType::Record(record) => record.clone(),
            other => {
                return Err(LowerError::contract(format!(
                    "field access into non-record {other:?}"
                )));
            }
        };
        let field: &Field = record.fields.get(field_index as usize).ok_or_else(|| {
            LowerError::contract(format!(
                "field index {field_index} out of range for `{}`",
                self.cx.interner.resolve(record.name)
            ))
        })?;
        let field = field.clone();
        let base_place = self.lower_address(base)?;

        // Converting the record also populates the field-location table.
        let base_ir = self.ir_type(base_ty)?;

        if let Some(offset_expr) = field.dynamic_offset {
            let off = self
                .lower(offset_expr, None)?
                .ok_or_else(|| LowerError::contract("dynamic offset expression had no value"))?;
            let field_ir = self.ir_type(field.ty)?;
            let ptr = self.ptr_to(field_ir);
            return Ok(Place::direct(val(self.builder.push(
                InstrKind::ByteAddr {
                    base: base_place.addr,
                    offset: off,
                },
                ptr,
            ))));
        }

        if record.is_union {
            // Every union alternative aliases offset zero.
            let bit = match field.bit {
                Some(b) => {
                    let unit_size = self.cx.pool.size_of(field.ty).unwrap_or(1);
                    let unit = self.cx.types.int((unit_size * 8) as u32);
                    Some(BitWindow {
                        start_bit: b.bit_offset,
                        bit_size: b.bit_width,
                        unit,
                    })
                }
                None => None,
            };
            return Ok(Place {
                addr: base_place.addr,
                bit,
            });
        }

        let loc = self.cx.field_loc(base_ty, field_index).ok_or_else(|| {
            LowerError::contract(format!(
                "field {field_index} of `{}` has no layout location",
                self.cx.interner.resolve(record.name)
            ))
        })?;
        let addr = self.field_addr(base_place.addr, base_ir, loc.element);
        Ok(Place {
            addr,
            bit: loc.bit,
        })
    }

    // -----------------------------------------------------------------------
    // Loads and stores
    // -----------------------------------------------------------------------

    /// Read a place as a value of source type `ty`. Aggregates copy into
    /// `dest`; scalars and bit-fields produce a value.
    pub(crate) fn load_place(
        &mut self,
        place: &Place,
        ty: TypeIdx,
        dest: Option<&Place>,
    ) -> Result<Option<Operand>, LowerError> {
        if let Some(window) = place.bit {
            debug_assert!(dest.is_none());
            return Ok(Some(self.load_bitfield(place.addr, window, ty)?));
        }
        if self.cx.pool.is_aggregate(ty) {
            let dest = dest
                .ok_or_else(|| LowerError::contract("aggregate load without a destination"))?;
            let ir = self.ir_type(ty)?;
            let void = self.cx.types.void();
            self.builder.push_void(
                InstrKind::Copy {
                    dst: dest.addr,
                    src: place.addr,
                    ty: ir,
                    skip_padding: true,
                },
                void,
            );
            return Ok(None);
        }
        let ir = self.ir_type(ty)?;
        Ok(Some(val(self.builder.push(
            InstrKind::Load {
                addr: place.addr,
                ty: ir,
            },
            ir,
        ))))
    }

    /// Extract a bit-field value: load the storage unit, shift the window to
    /// the top, then shift back down with the field's signedness.
    fn load_bitfield(
        &mut self,
        addr: Operand,
        window: BitWindow,
        field_ty: TypeIdx,
    ) -> Result<Operand, LowerError> {
        let unit_bits = bits_of(self.cx, window.unit);
        let unit = window.unit;
        let loaded = val(self.builder.push(InstrKind::Load { addr, ty: unit }, unit));

        let signed = self.cx.pool.is_signed_int(field_ty);
        let up = unit_bits - (window.start_bit + window.bit_size);
        let down = unit_bits - window.bit_size;

        let mut value = loaded;
        if up > 0 {
            let amount = self.const_int(unit, i64::from(up));
            value = val(self.builder.push(
                InstrKind::Bin {
                    op: BinIr::Shl,
                    lhs: value,
                    rhs: amount,
                },
                unit,
            ));
        }
        if down > 0 {
            let amount = self.const_int(unit, i64::from(down));
            let op = if signed { BinIr::AShr } else { BinIr::LShr };
            value = val(self.builder.push(
                InstrKind::Bin {
                    op,
                    lhs: value,
                    rhs: amount,
                },
                unit,
            ));
        }

        // Widen or narrow the unit-typed value to the field's own type.
        let field_ir = self.ir_type(field_ty)?;
        let field_bits = bits_of(self.cx, field_ir);
        if field_bits == unit_bits {
            return Ok(value);
        }
        let kind = if field_bits < unit_bits {
            CastKind::Trunc
        } else if signed {
            CastKind::SExt
        } else {
            CastKind::ZExt
        };
        Ok(val(self.builder.push(
            InstrKind::Cast {
                kind,
                operand: value,
                to: field_ir,
            },
            field_ir,
        )))
    }

    /// Store a scalar through a place, doing the read-modify-write dance for
    /// bit-field windows.
    pub(crate) fn store_scalar(
        &mut self,
        place: &Place,
        ty: TypeIdx,
        value: Operand,
    ) -> Result<(), LowerError> {
        let void = self.cx.types.void();
        let Some(window) = place.bit else {
            self.builder.push_void(
                InstrKind::Store {
                    addr: place.addr,
                    value,
                },
                void,
            );
            return Ok(());
        };

        let unit = window.unit;
        let unit_bits = bits_of(self.cx, unit);
        let field_ir = self.ir_type(ty)?;
        let field_bits = bits_of(self.cx, field_ir);

        // Bring the new value into the unit's width.
        let mut v = value;
        if field_bits != unit_bits {
            let kind = if field_bits > unit_bits {
                CastKind::Trunc
            } else {
                CastKind::ZExt
            };
            v = val(self.builder.push(
                InstrKind::Cast {
                    kind,
                    operand: v,
                    to: unit,
                },
                unit,
            ));
        }

        let field_mask: i64 = if window.bit_size >= 64 {
            -1
        } else {
            ((1u64 << window.bit_size) - 1) as i64
        };
        let keep_mask = !(field_mask
            .checked_shl(window.start_bit)
            .unwrap_or(0)) as i64;

        let mask_c = self.const_int(unit, field_mask);
        v = val(self.builder.push(
            InstrKind::Bin {
                op: BinIr::And,
                lhs: v,
                rhs: mask_c,
            },
            unit,
        ));
        if window.start_bit > 0 {
            let shift = self.const_int(unit, i64::from(window.start_bit));
            v = val(self.builder.push(
                InstrKind::Bin {
                    op: BinIr::Shl,
                    lhs: v,
                    rhs: shift,
                },
                unit,
            ));
        }

        let old = val(self.builder.push(
            InstrKind::Load {
                addr: place.addr,
                ty: unit,
            },
            unit,
        ));
        let keep_c = self.const_int(unit, keep_mask);
        let cleared = val(self.builder.push(
            InstrKind::Bin {
                op: BinIr::And,
                lhs: old,
                rhs: keep_c,
            },
            unit,
        ));
        let merged = val(self.builder.push(
            InstrKind::Bin {
                op: BinIr::Or,
                lhs: cleared,
                rhs: v,
            },
            unit,
        ));
        self.builder.push_void(
            InstrKind::Store {
                addr: place.addr,
                value: merged,
            },
            void,
        );
        Ok(())
    }

    /// Lower `target = value`.
    pub(crate) fn lower_assign(
        &mut self,
        target: sable_ir::ast::NodeId,
        value: sable_ir::ast::NodeId,
    ) -> Result<Option<Operand>, LowerError> {
        let ty = self.cx.node_type(target)?;
        let place = self.lower_address(target)?;
        if self.cx.pool.is_aggregate(ty) {
            if place.bit.is_some() {
                return Err(LowerError::contract("aggregate store through a bit window"));
            }
            self.lower(value, Some(&place))?;
            return Ok(None);
        }
        let v = self
            .lower(value, None)?
            .ok_or_else(|| LowerError::contract("assignment source produced no value"))?;
        self.store_scalar(&place, ty, v)?;
        Ok(None)
    }

    /// A place for one field of a record living at `base`.
    pub(crate) fn field_place(
        &mut self,
        base: &Place,
        record_ty: TypeIdx,
        field_index: u32,
        field: &Field,
    ) -> Result<Place, LowerError> {
        let is_union = matches!(
            self.cx.pool.get(record_ty),
            SourceType::Record(r) if r.is_union
        );
        let base_ir = self.ir_type(record_ty)?;
        if is_union {
            let bit = field.bit.map(|b| {
                let unit_size = self.cx.pool.size_of(field.ty).unwrap_or(1);
                BitWindow {
                    start_bit: b.bit_offset,
                    bit_size: b.bit_width,
                    unit: self.cx.types.int((unit_size * 8) as u32),
                }
            });
            return Ok(Place {
                addr: base.addr,
                bit,
            });
        }
        let loc = self
            .cx
            .field_loc(record_ty, field_index)
            .ok_or_else(|| LowerError::contract("field has no layout location"))?;
        let addr = self.field_addr(base.addr, base_ir, loc.element);
        Ok(Place {
            addr,
            bit: loc.bit,
        })
    }
}
