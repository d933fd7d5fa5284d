//! Generic argument/return-value classification.
//!
//! One fixed traversal, shared by every calling convention, walks a value's
//! type and fires *leaf actions* on a pluggable [`CallAbi`] implementation —
//! scalar argument, widened aggregate result, hidden-pointer return, and a
//! bracketed descend/ascend around each aggregate field. Targets differ only
//! in policy (register width, return thresholds, field-wise vs chunked
//! packing) and in what their leaf actions do with the events.
//!
//! The traversal also returns the classification as plain data
//! ([`ArgPassing`]/[`RetPassing`]), which is what the call and prologue
//! emitters consume; classifying the same (type, convention) pair twice
//! yields the identical shape via the context's cache.
//!
//! Classification rules:
//! - fits one machine register → scalar leaf;
//! - variable size or address-taken → single pointer-typed scalar argument;
//! - small aggregate return → widened to an integer of the aggregate's size
//!   (a single-field aggregate recursively adopts that field's own
//!   classification); otherwise the function switches to the hidden-first-
//!   argument convention;
//! - aggregate argument → field-by-field recursion or register-sized chunk
//!   carving, per target policy;
//! - union → its dominant member (largest size, ties broken by alignment);
//! - array → element by element through the same recursion.

mod targets;

pub use targets::{RegChunkAbi, RegFieldAbi};

use sable_lir::{IrType, IrTypeId, Param, ParamAttrs};
use sable_types::{RecordType, SourceType, TypeIdx};
use smallvec::SmallVec;

use crate::{LowerCx, LowerError};

// ---------------------------------------------------------------------------
// Leaf-action interface
// ---------------------------------------------------------------------------

/// How a target wants aggregate arguments decomposed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AggregatePassing {
    /// Recurse into each field and emit one scalar argument per leaf field.
    FieldWise,
    /// Carve the aggregate into register-sized chunks, ignoring field
    /// boundaries.
    RegisterChunks,
}

/// Target-specific leaf actions plus classification policy.
///
/// The traversal is a free function generic over this interface; a new
/// calling convention is one new implementation, not a new traversal.
pub trait CallAbi {
    /// Stable convention name; keys the classification cache.
    fn name(&self) -> &'static str;

    // -- policy --

    /// Width of one integer argument register, in bytes.
    fn register_bytes(&self) -> u64 {
        8
    }

    /// Largest aggregate (in bytes) returned widened in registers rather
    /// than through a hidden pointer.
    fn max_scalar_return_bytes(&self) -> u64 {
        8
    }

    /// How aggregate arguments are decomposed.
    fn aggregate_passing(&self) -> AggregatePassing;

    /// Whether a hidden-pointer return makes the function's apparent return
    /// value the pointer itself (instead of nothing).
    fn sret_returns_pointer(&self) -> bool {
        false
    }

    // -- leaf actions --

    /// The value is returned as this scalar.
    fn scalar_result(&mut self, ty: IrTypeId);

    /// An aggregate return widened to an integer of `bits`.
    fn aggregate_result_as_scalar(&mut self, ty: IrTypeId, bits: u32);

    /// The function returns through a hidden first pointer argument.
    fn hidden_pointer_return(&mut self, slot: IrTypeId, returns_pointer: bool);

    /// One scalar argument at `offset` bytes into the top-level value.
    fn scalar_argument(&mut self, ty: IrTypeId, offset: u64);

    /// Descend into field/element `index` at `offset`. Always bracketed by
    /// a matching [`exit_field`](CallAbi::exit_field).
    fn enter_field(&mut self, index: u32, offset: u64);

    /// Ascend from the field entered by the matching `enter_field`.
    fn exit_field(&mut self);
}

// ---------------------------------------------------------------------------
// Classified shapes
// ---------------------------------------------------------------------------

/// One scalar piece of an expanded aggregate argument.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ScalarPart {
    pub ty: IrTypeId,
    /// Byte offset into the top-level value.
    pub offset: u64,
}

/// How one argument is passed.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ArgPassing {
    /// A single scalar in a register.
    Scalar { ty: IrTypeId },
    /// A single pointer to caller-owned storage (variable size or
    /// address-taken value).
    ByRef { ptr: IrTypeId },
    /// Decomposed into scalar parts (field-wise or chunked).
    Expanded {
        parts: SmallVec<[ScalarPart; 4]>,
    },
}

/// How the return value is passed.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum RetPassing {
    Void,
    Scalar { ty: IrTypeId },
    /// Aggregate widened to an integer of `bits`.
    Widened { ty: IrTypeId, bits: u32 },
    /// Hidden first pointer argument; the apparent return is the pointer
    /// itself when `returns_pointer` is set, nothing otherwise.
    Hidden {
        slot: IrTypeId,
        returns_pointer: bool,
    },
}

/// Complete classification of a function signature under one convention.
#[derive(Clone, PartialEq, Debug)]
pub struct FnAbi {
    pub params: Vec<ArgPassing>,
    pub ret: RetPassing,
}

impl FnAbi {
    /// The physical parameter list, hidden return slot included.
    pub fn build_params(&self) -> Vec<Param> {
        let mut params = Vec::new();
        if let RetPassing::Hidden { slot, .. } = self.ret {
            params.push(Param {
                ty: slot,
                attrs: ParamAttrs::SRET,
            });
        }
        for arg in &self.params {
            match arg {
                ArgPassing::Scalar { ty } => params.push(Param::plain(*ty)),
                ArgPassing::ByRef { ptr } => params.push(Param {
                    ty: *ptr,
                    attrs: ParamAttrs::BYREF,
                }),
                ArgPassing::Expanded { parts } => {
                    params.extend(parts.iter().map(|p| Param::plain(p.ty)));
                }
            }
        }
        params
    }

    /// The physical return type.
    pub fn ir_ret(&self, cx: &mut LowerCx<'_>) -> IrTypeId {
        match &self.ret {
            RetPassing::Void => cx.types.void(),
            RetPassing::Scalar { ty } | RetPassing::Widened { ty, .. } => *ty,
            RetPassing::Hidden {
                slot,
                returns_pointer,
            } => {
                if *returns_pointer {
                    *slot
                } else {
                    cx.types.void()
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Whether a source type is a register-fitting scalar.
fn is_scalar(cx: &LowerCx<'_>, ty: TypeIdx) -> bool {
    match cx.pool.get(ty) {
        SourceType::Bool
        | SourceType::Int { .. }
        | SourceType::Float { .. }
        | SourceType::Pointer { .. } => true,
        SourceType::Enum { repr, .. } => repr.is_some(),
        _ => false,
    }
}

/// The dominant member of a union for ABI purposes: largest size, ties
/// broken by alignment. (Layout representative selection uses the opposite
/// ordering — see `layout.rs`.)
fn dominant_member(cx: &LowerCx<'_>, record: &RecordType) -> Option<TypeIdx> {
    let mut best: Option<(u64, u32, TypeIdx)> = None;
    for field in &record.fields {
        let size = cx.pool.size_of(field.ty).unwrap_or(0);
        let align = cx.pool.align_of(field.ty);
        let better = match best {
            None => true,
            Some((best_size, best_align, _)) => {
                size > best_size || (size == best_size && align > best_align)
            }
        };
        if better {
            best = Some((size, align, field.ty));
        }
    }
    best.map(|(_, _, ty)| ty)
}

/// Classify how a function's return value is passed.
pub fn classify_return(
    cx: &mut LowerCx<'_>,
    ret: TypeIdx,
    abi: &mut dyn CallAbi,
) -> Result<RetPassing, LowerError> {
    if ret.is_void() {
        return Ok(RetPassing::Void);
    }
    if is_scalar(cx, ret) {
        let ty = cx.convert_type(ret)?;
        abi.scalar_result(ty);
        return Ok(RetPassing::Scalar { ty });
    }
    match cx.pool.get(ret).clone() {
        SourceType::Record(record) => {
            if record.is_union {
                // Union returns adopt the dominant member's classification.
                if let Some(member) = dominant_member(cx, &record) {
                    return classify_return(cx, member, abi);
                }
                return Ok(RetPassing::Void);
            }
            if record.force_byref || record.variable_size {
                return hidden_return(cx, ret, abi);
            }
            // A single-field aggregate recursively adopts that field's own
            // classification.
            if record.fields.len() == 1 && record.fields[0].bit.is_none() {
                return classify_return(cx, record.fields[0].ty, abi);
            }
            widen_or_hide(cx, ret, record.size, abi)
        }
        SourceType::Array { element, len } => match len {
            Some(1) => classify_return(cx, element, abi),
            Some(n) => {
                let size = cx.pool.size_of(element).unwrap_or(0) * n;
                widen_or_hide(cx, ret, size, abi)
            }
            None => hidden_return(cx, ret, abi),
        },
        SourceType::Complex { part } => {
            let size = cx.pool.size_of(part).unwrap_or(8) * 2;
            widen_or_hide(cx, ret, size, abi)
        }
        other => Err(LowerError::AbiUnsupported {
            convention: abi.name(),
            what: format!("return of {other:?}"),
        }),
    }
}

fn widen_or_hide(
    cx: &mut LowerCx<'_>,
    ret: TypeIdx,
    size: u64,
    abi: &mut dyn CallAbi,
) -> Result<RetPassing, LowerError> {
    if size > 0 && size <= abi.max_scalar_return_bytes() {
        let bits = (size * 8) as u32;
        let ty = cx.types.int(bits);
        abi.aggregate_result_as_scalar(ty, bits);
        Ok(RetPassing::Widened { ty, bits })
    } else {
        hidden_return(cx, ret, abi)
    }
}

fn hidden_return(
    cx: &mut LowerCx<'_>,
    ret: TypeIdx,
    abi: &mut dyn CallAbi,
) -> Result<RetPassing, LowerError> {
    let pointee = cx.convert_type(ret)?;
    let slot = cx.types.ptr(pointee);
    let returns_pointer = abi.sret_returns_pointer();
    abi.hidden_pointer_return(slot, returns_pointer);
    Ok(RetPassing::Hidden {
        slot,
        returns_pointer,
    })
}

/// Classify how one argument of type `ty` is passed.
pub fn classify_argument(
    cx: &mut LowerCx<'_>,
    ty: TypeIdx,
    abi: &mut dyn CallAbi,
) -> Result<ArgPassing, LowerError> {
    if is_scalar(cx, ty) {
        let ir = cx.convert_type(ty)?;
        abi.scalar_argument(ir, 0);
        return Ok(ArgPassing::Scalar { ty: ir });
    }
    match cx.pool.get(ty).clone() {
        SourceType::Record(record) => {
            if record.force_byref || record.variable_size || cx.pool.size_of(ty).is_none() {
                return byref_argument(cx, ty, abi);
            }
            if record.is_union {
                // A union argument decomposes as its single dominant member.
                if let Some(member) = dominant_member(cx, &record) {
                    return classify_argument(cx, member, abi);
                }
                return Ok(ArgPassing::Expanded {
                    parts: SmallVec::new(),
                });
            }
            expand_aggregate(cx, ty, abi)
        }
        SourceType::Array { len: None, .. } => byref_argument(cx, ty, abi),
        SourceType::Array { .. } | SourceType::Complex { .. } => expand_aggregate(cx, ty, abi),
        other => Err(LowerError::AbiUnsupported {
            convention: abi.name(),
            what: format!("argument of {other:?}"),
        }),
    }
}

fn byref_argument(
    cx: &mut LowerCx<'_>,
    ty: TypeIdx,
    abi: &mut dyn CallAbi,
) -> Result<ArgPassing, LowerError> {
    let pointee = cx.convert_type(ty)?;
    let ptr = cx.types.ptr(pointee);
    abi.scalar_argument(ptr, 0);
    Ok(ArgPassing::ByRef { ptr })
}

fn expand_aggregate(
    cx: &mut LowerCx<'_>,
    ty: TypeIdx,
    abi: &mut dyn CallAbi,
) -> Result<ArgPassing, LowerError> {
    let ir = cx.convert_type(ty)?;
    let mut parts = SmallVec::new();
    match abi.aggregate_passing() {
        AggregatePassing::FieldWise => expand_fieldwise(cx, ir, 0, abi, &mut parts)?,
        AggregatePassing::RegisterChunks => {
            let size = cx.types.size_of(ir);
            expand_chunks(cx, size, abi, &mut parts);
        }
    }
    Ok(ArgPassing::Expanded { parts })
}

/// Field-by-field register packing: recurse into each non-padding element,
/// bracketing the descent with enter/exit leaf actions, and emit one scalar
/// argument per leaf field.
fn expand_fieldwise(
    cx: &mut LowerCx<'_>,
    ir: IrTypeId,
    base: u64,
    abi: &mut dyn CallAbi,
    parts: &mut SmallVec<[ScalarPart; 4]>,
) -> Result<(), LowerError> {
    match cx.types.get(ir).clone() {
        IrType::Aggregate(layout) => {
            for (index, element) in layout.elements.iter().enumerate() {
                if element.is_padding {
                    continue;
                }
                let offset = base + element.offset;
                if cx.types.is_aggregate(element.ty) {
                    abi.enter_field(index as u32, offset);
                    expand_fieldwise(cx, element.ty, offset, abi, parts)?;
                    abi.exit_field();
                } else {
                    abi.scalar_argument(element.ty, offset);
                    parts.push(ScalarPart {
                        ty: element.ty,
                        offset,
                    });
                }
            }
            Ok(())
        }
        IrType::Array { element, len } => {
            let stride = cx.types.size_of(element);
            for i in 0..len {
                let offset = base + i * stride;
                if cx.types.is_aggregate(element) {
                    abi.enter_field(i as u32, offset);
                    expand_fieldwise(cx, element, offset, abi, parts)?;
                    abi.exit_field();
                } else {
                    abi.scalar_argument(element, offset);
                    parts.push(ScalarPart {
                        ty: element,
                        offset,
                    });
                }
            }
            Ok(())
        }
        _ => {
            abi.scalar_argument(ir, base);
            parts.push(ScalarPart { ty: ir, offset: base });
            Ok(())
        }
    }
}

/// Raw integer-register packing: the minimal sequence of register-sized
/// chunks followed by 4-, 2-, and 1-byte remainder chunks.
fn expand_chunks(
    cx: &mut LowerCx<'_>,
    size: u64,
    abi: &mut dyn CallAbi,
    parts: &mut SmallVec<[ScalarPart; 4]>,
) {
    let reg = abi.register_bytes();
    let mut offset = 0;
    let mut remaining = size;
    let mut emit = |cx: &mut LowerCx<'_>, bytes: u64, offset: u64| {
        let ty = cx.types.int((bytes * 8) as u32);
        abi.scalar_argument(ty, offset);
        parts.push(ScalarPart { ty, offset });
    };
    while remaining >= reg {
        emit(cx, reg, offset);
        offset += reg;
        remaining -= reg;
    }
    for bytes in [4u64, 2, 1] {
        while remaining >= bytes {
            emit(cx, bytes, offset);
            offset += bytes;
            remaining -= bytes;
        }
    }
}

/// Classify a whole function signature under the given convention, cached
/// per (signature type, convention name) so repeated classification is
/// idempotent by construction.
pub fn compute_fn_abi(
    cx: &mut LowerCx<'_>,
    sig: TypeIdx,
    abi: &mut dyn CallAbi,
) -> Result<FnAbi, LowerError> {
    let key = (sig, abi.name());
    if let Some(cached) = cx.abi_cache.get(&key) {
        return Ok(cached.clone());
    }
    let fn_sig = match cx.pool.get(sig) {
        SourceType::Function(fn_sig) => fn_sig.clone(),
        other => {
            return Err(LowerError::contract(format!(
                "classifying non-function type {other:?}"
            )));
        }
    };
    let ret = classify_return(cx, fn_sig.ret, abi)?;
    let mut params = Vec::with_capacity(fn_sig.params.len());
    for &param in &fn_sig.params {
        params.push(classify_argument(cx, param, abi)?);
    }
    let computed = FnAbi { params, ret };
    cx.abi_cache.insert(key, computed.clone());
    Ok(computed)
}
