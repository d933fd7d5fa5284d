//! Arena of source type descriptors.

use rustc_hash::FxHashMap;
use sable_ir::Name;

use crate::{FnSig, RecordType, SourceType, TypeIdx};

/// Byte width of a target pointer. The engine is currently 64-bit only, as
/// is every calling-convention description it ships with.
pub const POINTER_BYTES: u64 = 8;

/// Arena of [`SourceType`] descriptors addressed by [`TypeIdx`].
///
/// Primitives occupy the pre-interned index range; pointers, arrays, and
/// complex types are deduplicated structurally; records, enums, and function
/// signatures keep nominal identity and always get a fresh index.
pub struct TypePool {
    types: Vec<SourceType>,
    pointer_dedup: FxHashMap<TypeIdx, TypeIdx>,
    array_dedup: FxHashMap<(TypeIdx, Option<u64>), TypeIdx>,
    complex_dedup: FxHashMap<TypeIdx, TypeIdx>,
}

impl TypePool {
    /// Create a pool with all primitives pre-interned.
    pub fn new() -> Self {
        let mut types = Vec::with_capacity(TypeIdx::FIRST_DYNAMIC as usize + 16);
        types.push(SourceType::Void); // 0
        types.push(SourceType::Bool); // 1
        for bits in [8u32, 16, 32, 64] {
            types.push(SourceType::Int { bits, signed: true });
            types.push(SourceType::Int { bits, signed: false });
        }
        types.push(SourceType::Float { bits: 32 }); // 10
        types.push(SourceType::Float { bits: 64 }); // 11
        debug_assert_eq!(types.len() as u32, TypeIdx::PRIMITIVE_COUNT);
        // Reserved primitive slots up to FIRST_DYNAMIC.
        while (types.len() as u32) < TypeIdx::FIRST_DYNAMIC {
            types.push(SourceType::Void);
        }
        TypePool {
            types,
            pointer_dedup: FxHashMap::default(),
            array_dedup: FxHashMap::default(),
            complex_dedup: FxHashMap::default(),
        }
    }

    fn push(&mut self, ty: SourceType) -> TypeIdx {
        let idx = TypeIdx::from_raw(u32::try_from(self.types.len()).expect("type pool overflow"));
        self.types.push(ty);
        idx
    }

    /// Look up a descriptor.
    #[inline]
    pub fn get(&self, idx: TypeIdx) -> &SourceType {
        &self.types[idx.raw() as usize]
    }

    /// The signed/unsigned integer primitive with the given width.
    pub fn int(&self, bits: u32, signed: bool) -> TypeIdx {
        match (bits, signed) {
            (8, true) => TypeIdx::I8,
            (8, false) => TypeIdx::U8,
            (16, true) => TypeIdx::I16,
            (16, false) => TypeIdx::U16,
            (32, true) => TypeIdx::I32,
            (32, false) => TypeIdx::U32,
            (64, true) => TypeIdx::I64,
            (64, false) => TypeIdx::U64,
            _ => panic!("unsupported integer width {bits}"),
        }
    }

    /// Intern a pointer type.
    pub fn pointer(&mut self, pointee: TypeIdx) -> TypeIdx {
        if let Some(&idx) = self.pointer_dedup.get(&pointee) {
            return idx;
        }
        let idx = self.push(SourceType::Pointer { pointee });
        self.pointer_dedup.insert(pointee, idx);
        idx
    }

    /// Intern an array type; `len: None` is a variable-length extent.
    pub fn array(&mut self, element: TypeIdx, len: Option<u64>) -> TypeIdx {
        if let Some(&idx) = self.array_dedup.get(&(element, len)) {
            return idx;
        }
        let idx = self.push(SourceType::Array { element, len });
        self.array_dedup.insert((element, len), idx);
        idx
    }

    /// Intern a complex type over the given float component.
    pub fn complex(&mut self, part: TypeIdx) -> TypeIdx {
        if let Some(&idx) = self.complex_dedup.get(&part) {
            return idx;
        }
        let idx = self.push(SourceType::Complex { part });
        self.complex_dedup.insert(part, idx);
        idx
    }

    /// Add a record descriptor. Records are nominal; no deduplication.
    pub fn record(&mut self, record: RecordType) -> TypeIdx {
        self.push(SourceType::Record(record))
    }

    /// Add an enum descriptor.
    pub fn enum_type(&mut self, name: Name, repr: Option<TypeIdx>) -> TypeIdx {
        self.push(SourceType::Enum { name, repr })
    }

    /// Fix an enum's integer representation after the fact.
    ///
    /// The front end calls this once the representation is known; layout
    /// placeholders created before that point resolve in the engine's patch
    /// pass.
    pub fn resolve_enum_repr(&mut self, idx: TypeIdx, repr: TypeIdx) {
        match &mut self.types[idx.raw() as usize] {
            SourceType::Enum { repr: slot, .. } => *slot = Some(repr),
            other => panic!("resolve_enum_repr on non-enum {other:?}"),
        }
    }

    /// Add a function signature type.
    pub fn function(&mut self, params: Vec<TypeIdx>, ret: TypeIdx, variadic: bool) -> TypeIdx {
        self.push(SourceType::Function(FnSig {
            params,
            ret,
            variadic,
        }))
    }

    /// Declared size in bytes, if the type has a known static size.
    pub fn size_of(&self, idx: TypeIdx) -> Option<u64> {
        match self.get(idx) {
            SourceType::Void => Some(0),
            SourceType::Bool => Some(1),
            SourceType::Int { bits, .. } | SourceType::Float { bits } => Some(u64::from(*bits) / 8),
            SourceType::Complex { part } => self.size_of(*part).map(|s| s * 2),
            SourceType::Pointer { .. } => Some(POINTER_BYTES),
            SourceType::Array { element, len } => {
                let len = (*len)?;
                self.size_of(*element).map(|s| s * len)
            }
            SourceType::Record(record) => {
                if record.variable_size {
                    None
                } else {
                    Some(record.size)
                }
            }
            SourceType::Enum { repr, .. } => repr.and_then(|r| self.size_of(r)),
            SourceType::Function(_) => None,
        }
    }

    /// Natural alignment in bytes.
    pub fn align_of(&self, idx: TypeIdx) -> u32 {
        match self.get(idx) {
            SourceType::Void => 1,
            SourceType::Bool => 1,
            SourceType::Int { bits, .. } | SourceType::Float { bits } => bits / 8,
            SourceType::Complex { part } => self.align_of(*part),
            SourceType::Pointer { .. } => POINTER_BYTES as u32,
            SourceType::Array { element, .. } => self.align_of(*element),
            SourceType::Record(record) => record.align,
            SourceType::Enum { repr, .. } => repr.map_or(1, |r| self.align_of(r)),
            SourceType::Function(_) => 1,
        }
    }

    /// Whether values of this type occupy more than one machine register or
    /// have identity beyond a scalar (records, arrays, complex pairs).
    pub fn is_aggregate(&self, idx: TypeIdx) -> bool {
        matches!(
            self.get(idx),
            SourceType::Record(_) | SourceType::Array { .. } | SourceType::Complex { .. }
        )
    }

    /// Whether this is a signed integer (enums inherit their representation).
    pub fn is_signed_int(&self, idx: TypeIdx) -> bool {
        match self.get(idx) {
            SourceType::Int { signed, .. } => *signed,
            SourceType::Enum {
                repr: Some(repr), ..
            } => self.is_signed_int(*repr),
            _ => false,
        }
    }

    /// Number of types in the pool, including reserved primitive slots.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_sizes() {
        let pool = TypePool::new();
        assert_eq!(pool.size_of(TypeIdx::I8), Some(1));
        assert_eq!(pool.size_of(TypeIdx::U32), Some(4));
        assert_eq!(pool.size_of(TypeIdx::F64), Some(8));
        assert_eq!(pool.size_of(TypeIdx::VOID), Some(0));
    }

    #[test]
    fn pointer_dedup() {
        let mut pool = TypePool::new();
        let a = pool.pointer(TypeIdx::I32);
        let b = pool.pointer(TypeIdx::I32);
        let c = pool.pointer(TypeIdx::I64);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.size_of(a), Some(POINTER_BYTES));
    }

    #[test]
    fn array_size_and_align() {
        let mut pool = TypePool::new();
        let arr = pool.array(TypeIdx::I32, Some(6));
        assert_eq!(pool.size_of(arr), Some(24));
        assert_eq!(pool.align_of(arr), 4);
    }

    #[test]
    fn variable_length_array_has_no_size() {
        let mut pool = TypePool::new();
        let arr = pool.array(TypeIdx::I8, None);
        assert_eq!(pool.size_of(arr), None);
    }

    #[test]
    fn enum_without_repr_has_no_size() {
        let mut pool = TypePool::new();
        let e = pool.enum_type(Name::EMPTY, None);
        assert_eq!(pool.size_of(e), None);
        pool.resolve_enum_repr(e, TypeIdx::I32);
        assert_eq!(pool.size_of(e), Some(4));
        assert!(pool.is_signed_int(e));
    }

    #[test]
    fn complex_is_paired_scalar() {
        let mut pool = TypePool::new();
        let c = pool.complex(TypeIdx::F64);
        assert_eq!(pool.size_of(c), Some(16));
        assert_eq!(pool.align_of(c), 8);
        assert!(pool.is_aggregate(c));
    }
}
