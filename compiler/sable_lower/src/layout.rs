//! Source-type to target-layout conversion.
//!
//! `convert_type` turns a [`SourceType`] descriptor into an [`IrType`]
//! layout, memoized by type index. Scalars, pointers, and function
//! signatures convert directly; aggregates go through a cursor walk that
//! synthesizes an element list matching the externally mandated layout
//! byte-for-byte:
//!
//! 1. fields are visited in declaration order with a byte cursor;
//! 2. a gap before a field's declared offset becomes explicit padding;
//! 3. a field whose declared offset lands inside the previous field's
//!    extent (tail-padding reuse) shrinks the previous element first;
//! 4. a field whose natural alignment cannot hit its declared offset
//!    escalates the whole record to byte-packed layout and reconverts;
//! 5. adjacent bit-fields accumulate into shared integer storage units,
//!    tracking spare bits so a later field sharing the unit does not force
//!    a premature new unit;
//! 6. trailing padding brings the synthesized size up to the declared size.
//!
//! Every element records whether it is synthetic padding so bulk copies can
//! avoid touching bytes that may not mirror real data in every union
//! alternative.
//!
//! A pointer member whose pointee is still mid-conversion (self-referential
//! record) resolves to a shared [`IrType::Incomplete`] placeholder and joins
//! a deferred worklist; once the outermost conversion finishes, a single
//! patch pass rewrites each placeholder slot in place, which resolves every
//! type structurally aliased to it.

use sable_lir::{AggregateLayout, ElementLayout, IrType, IrTypeId};
use sable_types::{RecordType, SourceType, TypeIdx};
use smallvec::SmallVec;

use crate::{LowerCx, LowerError};

/// A bit-field's window within its storage unit.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BitWindow {
    /// First bit within the storage unit.
    pub start_bit: u32,
    /// Width in bits.
    pub bit_size: u32,
    /// The storage unit's integer type.
    pub unit: IrTypeId,
}

/// Where a source field landed in the synthesized layout.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FieldLoc {
    /// Element index in the aggregate layout.
    pub element: u32,
    /// Byte offset of the element from the start of the record.
    pub offset: u64,
    /// Present iff the field is a bit-field.
    pub bit: Option<BitWindow>,
}

/// Transient per-conversion state for one aggregate.
struct RecordBuilder {
    elements: SmallVec<[ElementLayout; 8]>,
    /// Bytes filled so far.
    cursor: u64,
    packed: bool,
    /// No non-bit-field has been seen yet.
    all_bitfields: bool,
    /// Byte offset of the active bit-field storage unit.
    unit_start: u64,
    /// Size of the active storage unit; 0 when no unit is active.
    unit_bytes: u64,
    /// Unfilled bits remaining in the active storage unit.
    spare_bits: u32,
}

impl RecordBuilder {
    fn new(packed: bool) -> Self {
        RecordBuilder {
            elements: SmallVec::new(),
            cursor: 0,
            packed,
            all_bitfields: true,
            unit_start: 0,
            unit_bytes: 0,
            spare_bits: 0,
        }
    }

    fn close_unit(&mut self) {
        self.unit_bytes = 0;
        self.spare_bits = 0;
    }

    fn pad_to(&mut self, cx: &mut LowerCx<'_>, offset: u64) {
        debug_assert!(offset >= self.cursor);
        if offset > self.cursor {
            let gap = offset - self.cursor;
            let byte = cx.types.int(8);
            let pad_ty = cx.types.array(byte, gap);
            self.elements.push(ElementLayout {
                ty: pad_ty,
                offset: self.cursor,
                size: gap,
                is_padding: true,
            });
            self.cursor = offset;
        }
    }
}

fn round_down(value: u64, align: u64) -> u64 {
    value - value % align
}

/// Signals that the current walk must restart with byte-packed layout.
struct NeedsPacked;

impl<'a> LowerCx<'a> {
    /// Convert a source type to its target layout, memoized.
    pub fn convert_type(&mut self, idx: TypeIdx) -> Result<IrTypeId, LowerError> {
        self.convert_depth += 1;
        let result = self.convert_inner(idx);
        self.convert_depth -= 1;
        if self.convert_depth == 0 && result.is_ok() {
            self.drain_pending()?;
        }
        result
    }

    fn convert_inner(&mut self, idx: TypeIdx) -> Result<IrTypeId, LowerError> {
        if let Some(&id) = self.layout_cache.get(&idx) {
            return Ok(id);
        }
        let id = match self.pool.get(idx).clone() {
            SourceType::Void => self.types.void(),
            SourceType::Bool => self.types.int(8),
            SourceType::Int { bits, .. } => self.types.int(bits),
            SourceType::Float { bits } => self.types.float(bits),
            SourceType::Complex { part } => {
                let part_ir = self.convert_inner(part)?;
                let size = self.pool.size_of(part).unwrap_or(8);
                let layout = AggregateLayout {
                    elements: smallvec::smallvec![
                        ElementLayout {
                            ty: part_ir,
                            offset: 0,
                            size,
                            is_padding: false,
                        },
                        ElementLayout {
                            ty: part_ir,
                            offset: size,
                            size,
                            is_padding: false,
                        },
                    ],
                    size: size * 2,
                    align: self.pool.align_of(part),
                    packed: false,
                };
                self.types.intern(IrType::Aggregate(layout))
            }
            SourceType::Pointer { pointee } => {
                let inner = if self.converting.contains(&pointee) {
                    // Mid-conversion of the enclosing aggregate: defer.
                    let placeholder = self.types.incomplete(pointee);
                    self.pending_pointees.push((placeholder, pointee));
                    placeholder
                } else {
                    self.convert_inner(pointee)?
                };
                self.types.ptr(inner)
            }
            SourceType::Array { element, len } => {
                let elem = self.convert_inner(element)?;
                // A variable-length extent converts to zero declared extent.
                self.types.array(elem, len.unwrap_or(0))
            }
            SourceType::Record(record) => {
                if self.converting.contains(&idx) {
                    return Err(LowerError::contract(format!(
                        "record `{}` contains itself by value",
                        self.interner.resolve(record.name)
                    )));
                }
                self.converting.insert(idx);
                let result = self.convert_record(idx, &record);
                self.converting.remove(&idx);
                result?
            }
            SourceType::Enum { repr, .. } => match repr {
                Some(r) => self.convert_inner(r)?,
                None => {
                    // Representation not yet known: unresolved placeholder,
                    // revisited by the patch pass.
                    let placeholder = self.types.incomplete(idx);
                    self.pending_pointees.push((placeholder, idx));
                    placeholder
                }
            },
            SourceType::Function(sig) => {
                let mut params = Vec::with_capacity(sig.params.len());
                for &p in &sig.params {
                    params.push(self.convert_inner(p)?);
                }
                let ret = self.convert_inner(sig.ret)?;
                self.types.func(params, ret, sig.variadic)
            }
        };
        self.layout_cache.insert(idx, id);
        Ok(id)
    }

    /// Drain the deferred-pointee worklist, patching placeholder slots in
    /// place. Runs once per outermost conversion.
    fn drain_pending(&mut self) -> Result<(), LowerError> {
        // Conversions triggered from here must not re-enter the drain.
        self.convert_depth += 1;
        let result = self.drain_pending_inner();
        self.convert_depth -= 1;
        result
    }

    fn drain_pending_inner(&mut self) -> Result<(), LowerError> {
        while let Some((placeholder, source)) = self.pending_pointees.pop() {
            if !matches!(self.types.get(placeholder), IrType::Incomplete { .. }) {
                continue; // already patched through an alias
            }
            let resolved = match self.pool.get(source) {
                SourceType::Enum { repr: None, .. } => {
                    // Still unknown; the placeholder stays opaque.
                    // TODO: re-queue these once resolve_enum_repr can signal
                    // the context, so a repr fixed mid-unit still patches.
                    continue;
                }
                SourceType::Enum { repr: Some(r), .. } => {
                    let r = *r;
                    self.convert_inner(r)?
                }
                _ => self.convert_inner(source)?,
            };
            if resolved != placeholder {
                tracing::trace!(?placeholder, ?resolved, "patching deferred pointee");
                self.types.patch(placeholder, resolved);
            }
        }
        Ok(())
    }

    fn convert_record(&mut self, idx: TypeIdx, record: &RecordType) -> Result<IrTypeId, LowerError> {
        if record.is_union {
            return self.convert_union(idx, record);
        }
        match self.convert_struct(idx, record, false)? {
            Ok(id) => Ok(id),
            Err(NeedsPacked) => {
                // Layout infeasible under natural alignment: escalate the
                // whole record to byte-packed layout and reconvert.
                tracing::debug!(
                    record = self.interner.resolve(record.name),
                    "escalating record to packed layout"
                );
                self.clear_field_locs(idx, record);
                match self.convert_struct(idx, record, true)? {
                    Ok(id) => Ok(id),
                    Err(NeedsPacked) => Err(LowerError::ImpossibleLayout {
                        type_name: self.interner.resolve(record.name).to_owned(),
                        reason: "fields do not fit even byte-packed".to_owned(),
                    }),
                }
            }
        }
    }

    fn clear_field_locs(&mut self, idx: TypeIdx, record: &RecordType) {
        for field_index in 0..record.fields.len() as u32 {
            self.field_locs.remove(&(idx, field_index));
        }
    }

    /// One struct layout walk. The outer `Result` is a hard error; the
    /// inner one distinguishes success from a packed-escalation restart.
    fn convert_struct(
        &mut self,
        idx: TypeIdx,
        record: &RecordType,
        packed: bool,
    ) -> Result<Result<IrTypeId, NeedsPacked>, LowerError> {
        let mut builder = RecordBuilder::new(packed);

        for (field_index, field) in record.fields.iter().enumerate() {
            let field_index = field_index as u32;
            if field.dynamic_offset.is_some() {
                // Runtime-placed fields are accessed through computed
                // offsets, never through the element list.
                continue;
            }
            if let Some(bit) = field.bit {
                let placed = self.place_bitfield(
                    &mut builder,
                    field.offset,
                    bit.bit_offset,
                    bit.bit_width,
                    self.pool.size_of(field.ty).unwrap_or(1),
                );
                match placed {
                    Ok(loc) => {
                        self.field_locs.insert((idx, field_index), loc);
                    }
                    Err(NeedsPacked) => return Ok(Err(NeedsPacked)),
                }
            } else {
                builder.all_bitfields = false;
                builder.close_unit();
                let fty = self.convert_inner(field.ty)?;
                let fsize = self
                    .pool
                    .size_of(field.ty)
                    .unwrap_or_else(|| self.types.size_of(fty));
                let falign = if packed {
                    1
                } else {
                    u64::from(self.types.align_of(fty))
                };

                if field.offset % falign != 0 {
                    // Natural alignment can never hit the declared offset.
                    return Ok(Err(NeedsPacked));
                }
                // Tail-padding reuse: a later field may start inside the
                // previous field's extent; shrink the previous element.
                while let Some(last) = builder.elements.last_mut() {
                    let end = last.offset + last.size;
                    if end <= field.offset {
                        break;
                    }
                    if last.offset >= field.offset {
                        return Ok(Err(NeedsPacked));
                    }
                    let new_size = field.offset - last.offset;
                    let byte = self.types.int(8);
                    last.ty = self.types.array(byte, new_size);
                    last.size = new_size;
                    builder.cursor = field.offset;
                }
                if builder.cursor > field.offset {
                    return Ok(Err(NeedsPacked));
                }
                builder.pad_to(self, field.offset);
                let element = builder.elements.len() as u32;
                builder.elements.push(ElementLayout {
                    ty: fty,
                    offset: field.offset,
                    size: fsize,
                    is_padding: false,
                });
                builder.cursor = field.offset + fsize;
                self.field_locs.insert(
                    (idx, field_index),
                    FieldLoc {
                        element,
                        offset: field.offset,
                        bit: None,
                    },
                );
            }
        }

        if builder.cursor > record.size {
            return Ok(Err(NeedsPacked));
        }
        builder.pad_to(self, record.size);

        tracing::trace!(
            record = self.interner.resolve(record.name),
            elements = builder.elements.len(),
            packed = builder.packed,
            all_bitfields = builder.all_bitfields,
            "record layout synthesized"
        );

        let layout = AggregateLayout {
            elements: builder.elements,
            size: record.size,
            align: record.align,
            packed: builder.packed,
        };
        Ok(Ok(self.types.intern(IrType::Aggregate(layout))))
    }

    /// Place one bit-field, reusing the active storage unit when the
    /// declared bits fit, otherwise opening the smallest compatible unit.
    fn place_bitfield(
        &mut self,
        builder: &mut RecordBuilder,
        byte_offset: u64,
        bit_offset: u32,
        bit_width: u32,
        underlying_bytes: u64,
    ) -> Result<FieldLoc, NeedsPacked> {
        let start_bit = byte_offset * 8 + u64::from(bit_offset);
        let end_bit = start_bit + u64::from(bit_width);

        // Reuse the active unit if it still has spare bits and the declared
        // bits start inside it; grow the unit in place when the field runs
        // past its end, so a shared unit is never truncated between two
        // fields.
        if builder.unit_bytes > 0 && builder.spare_bits > 0 {
            let unit_start_bit = builder.unit_start * 8;
            let unit_end_bit = (builder.unit_start + builder.unit_bytes) * 8;
            if start_bit >= unit_start_bit && start_bit < unit_end_bit {
                if end_bit <= unit_end_bit {
                    builder.spare_bits = (unit_end_bit - end_bit) as u32;
                    let element = builder.elements.len() as u32 - 1;
                    let unit = builder.elements[element as usize].ty;
                    return Ok(FieldLoc {
                        element,
                        offset: builder.unit_start,
                        bit: Some(BitWindow {
                            start_bit: (start_bit - unit_start_bit) as u32,
                            bit_size: bit_width,
                            unit,
                        }),
                    });
                }
                // The field straddles the unit's end: widen the unit.
                for unit_bytes in [2u64, 4, 8] {
                    if unit_bytes <= builder.unit_bytes {
                        continue;
                    }
                    if unit_bytes > underlying_bytes.max(1) {
                        break;
                    }
                    if !builder.packed && builder.unit_start % unit_bytes != 0 {
                        continue;
                    }
                    let grown_end_bit = (builder.unit_start + unit_bytes) * 8;
                    if end_bit > grown_end_bit {
                        continue;
                    }
                    let unit = self.types.int((unit_bytes * 8) as u32);
                    let element = builder.elements.len() as u32 - 1;
                    let slot = &mut builder.elements[element as usize];
                    slot.ty = unit;
                    slot.size = unit_bytes;
                    builder.cursor = builder.unit_start + unit_bytes;
                    builder.unit_bytes = unit_bytes;
                    builder.spare_bits = (grown_end_bit - end_bit) as u32;
                    return Ok(FieldLoc {
                        element,
                        offset: builder.unit_start,
                        bit: Some(BitWindow {
                            start_bit: (start_bit - unit_start_bit) as u32,
                            bit_size: bit_width,
                            unit,
                        }),
                    });
                }
                return Err(NeedsPacked);
            }
        }

        // The active unit (if any) is exhausted or mis-placed: start a new
        // one — the smallest integer unit that covers the declared bits,
        // does not overlap already-emitted elements, and whose alignment is
        // compatible with the declared underlying type.
        let start_byte = start_bit / 8;
        for unit_bytes in [1u64, 2, 4, 8] {
            if unit_bytes * 8 < u64::from(bit_width) {
                continue;
            }
            if unit_bytes > underlying_bytes.max(1) {
                break;
            }
            let candidate = if builder.packed {
                start_byte
            } else {
                round_down(start_byte, unit_bytes)
            };
            if candidate < builder.cursor {
                continue;
            }
            if end_bit > (candidate + unit_bytes) * 8 {
                continue;
            }
            builder.pad_to(self, candidate);
            let unit = self.types.int((unit_bytes * 8) as u32);
            let element = builder.elements.len() as u32;
            builder.elements.push(ElementLayout {
                ty: unit,
                offset: candidate,
                size: unit_bytes,
                is_padding: false,
            });
            builder.cursor = candidate + unit_bytes;
            builder.unit_start = candidate;
            builder.unit_bytes = unit_bytes;
            builder.spare_bits = ((candidate + unit_bytes) * 8 - end_bit) as u32;
            return Ok(FieldLoc {
                element,
                offset: candidate,
                bit: Some(BitWindow {
                    start_bit: (start_bit - candidate * 8) as u32,
                    bit_size: bit_width,
                    unit,
                }),
            });
        }
        Err(NeedsPacked)
    }

    /// Union layout: the alternative with the largest alignment (ties broken
    /// by largest size) becomes the representative storage, padded out to
    /// the declared union size.
    fn convert_union(&mut self, idx: TypeIdx, record: &RecordType) -> Result<IrTypeId, LowerError> {
        let _ = idx;
        let mut best: Option<(u32, u64, TypeIdx)> = None;
        for field in &record.fields {
            let align = self.pool.align_of(field.ty);
            let size = self.pool.size_of(field.ty).unwrap_or(0);
            let better = match best {
                None => true,
                Some((best_align, best_size, _)) => {
                    align > best_align || (align == best_align && size > best_size)
                }
            };
            if better {
                best = Some((align, size, field.ty));
            }
        }

        let mut elements: SmallVec<[ElementLayout; 8]> = SmallVec::new();
        let mut cursor = 0;
        if let Some((_, size, rep_ty)) = best {
            let rep_ir = self.convert_inner(rep_ty)?;
            elements.push(ElementLayout {
                ty: rep_ir,
                offset: 0,
                size,
                is_padding: false,
            });
            cursor = size;
        }
        if cursor < record.size {
            let byte = self.types.int(8);
            let pad_ty = self.types.array(byte, record.size - cursor);
            elements.push(ElementLayout {
                ty: pad_ty,
                offset: cursor,
                size: record.size - cursor,
                is_padding: true,
            });
        }

        let layout = AggregateLayout {
            elements,
            size: record.size,
            align: record.align,
            packed: false,
        };
        Ok(self.types.intern(IrType::Aggregate(layout)))
    }

    /// Where a struct field landed in its record's synthesized layout.
    ///
    /// Only valid after the record converted; union fields all alias offset
    /// zero and are not registered here.
    pub fn field_loc(&self, record: TypeIdx, field: u32) -> Option<FieldLoc> {
        self.field_locs.get(&(record, field)).copied()
    }
}
