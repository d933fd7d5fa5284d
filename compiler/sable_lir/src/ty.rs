//! Target layout descriptors and their arena.
//!
//! [`IrType`] is the engine's answer to "how does this source type live in
//! memory": a scalar width, or an ordered element list with byte offsets and
//! per-element padding flags. Types are stored in a [`TypeTable`] arena and
//! addressed by [`IrTypeId`]; structural duplicates intern to the same id.
//!
//! Recursive source types convert through an explicit [`IrType::Incomplete`]
//! placeholder: the pointee slot is allocated immediately, users reference
//! its id, and a single patch pass rewrites the slot in place once the
//! enclosing aggregate has finished converting — every structural alias of
//! the placeholder resolves at once.

use std::fmt;

use rustc_hash::FxHashMap;
use sable_types::TypeIdx;
use smallvec::SmallVec;

/// Index of a type in the [`TypeTable`] arena.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct IrTypeId(u32);

impl IrTypeId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        IrTypeId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for IrTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IrTypeId({})", self.0)
    }
}

/// One element of an aggregate layout.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ElementLayout {
    pub ty: IrTypeId,
    /// Byte offset from the start of the aggregate.
    pub offset: u64,
    /// Byte size of the element.
    pub size: u64,
    /// Synthetic padding, not a source field. Bulk copies must be able to
    /// skip these: padding bytes need not mirror real data in every union
    /// alternative.
    pub is_padding: bool,
}

/// Layout of an aggregate: ordered elements plus totals.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AggregateLayout {
    pub elements: SmallVec<[ElementLayout; 8]>,
    /// Total size in bytes; always equals the source type's declared size.
    pub size: u64,
    pub align: u32,
    /// Laid out byte-packed because some field's natural alignment was
    /// incompatible with its declared offset.
    pub packed: bool,
}

/// A target layout descriptor.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum IrType {
    Void,
    Int { bits: u32 },
    Float { bits: u32 },
    Ptr { pointee: IrTypeId },
    Array { element: IrTypeId, len: u64 },
    Aggregate(AggregateLayout),
    Func {
        params: Vec<IrTypeId>,
        ret: IrTypeId,
        variadic: bool,
    },
    /// Placeholder for a pointee whose conversion has not finished
    /// (self-referential aggregate member, enum without a fixed
    /// representation). Resolved by [`TypeTable::patch`].
    Incomplete { source: TypeIdx },
}

/// Arena of [`IrType`]s with structural deduplication.
pub struct TypeTable {
    arena: Vec<IrType>,
    dedup: FxHashMap<IrType, IrTypeId>,
    incomplete: FxHashMap<TypeIdx, IrTypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable {
            arena: Vec::with_capacity(64),
            dedup: FxHashMap::default(),
            incomplete: FxHashMap::default(),
        }
    }

    /// Intern a type by structural identity.
    pub fn intern(&mut self, ty: IrType) -> IrTypeId {
        if let Some(&id) = self.dedup.get(&ty) {
            return id;
        }
        let id = IrTypeId::from_raw(u32::try_from(self.arena.len()).expect("type arena overflow"));
        self.dedup.insert(ty.clone(), id);
        self.arena.push(ty);
        id
    }

    /// The `void` type.
    pub fn void(&mut self) -> IrTypeId {
        self.intern(IrType::Void)
    }

    /// An integer type of the given bit width.
    pub fn int(&mut self, bits: u32) -> IrTypeId {
        self.intern(IrType::Int { bits })
    }

    /// A float type of the given bit width.
    pub fn float(&mut self, bits: u32) -> IrTypeId {
        self.intern(IrType::Float { bits })
    }

    /// A pointer to `pointee`.
    pub fn ptr(&mut self, pointee: IrTypeId) -> IrTypeId {
        self.intern(IrType::Ptr { pointee })
    }

    /// An array of `len` elements.
    pub fn array(&mut self, element: IrTypeId, len: u64) -> IrTypeId {
        self.intern(IrType::Array { element, len })
    }

    /// A function signature type.
    pub fn func(&mut self, params: Vec<IrTypeId>, ret: IrTypeId, variadic: bool) -> IrTypeId {
        self.intern(IrType::Func {
            params,
            ret,
            variadic,
        })
    }

    /// The placeholder for a not-yet-converted source type. Placeholders are
    /// shared: every request for the same source type returns the same slot,
    /// so one patch resolves all structural aliases.
    pub fn incomplete(&mut self, source: TypeIdx) -> IrTypeId {
        if let Some(&id) = self.incomplete.get(&source) {
            return id;
        }
        let id = IrTypeId::from_raw(u32::try_from(self.arena.len()).expect("type arena overflow"));
        self.arena.push(IrType::Incomplete { source });
        self.incomplete.insert(source, id);
        id
    }

    /// Whether a placeholder slot exists for `source`.
    pub fn incomplete_for(&self, source: TypeIdx) -> Option<IrTypeId> {
        self.incomplete.get(&source).copied()
    }

    /// Resolve a placeholder slot in place.
    ///
    /// The slot's contents are replaced with `resolved`'s contents; every
    /// type referencing the slot id sees the completed type with no further
    /// rewriting. The patched slot is not re-entered into the dedup map —
    /// the id that originally interned the contents remains canonical.
    pub fn patch(&mut self, id: IrTypeId, resolved: IrTypeId) {
        debug_assert!(
            matches!(self.get(id), IrType::Incomplete { .. }),
            "patch target must be a placeholder"
        );
        if let IrType::Incomplete { source } = self.arena[id.raw() as usize].clone() {
            self.incomplete.remove(&source);
        }
        self.arena[id.raw() as usize] = self.arena[resolved.raw() as usize].clone();
    }

    /// Look up a type.
    #[inline]
    pub fn get(&self, id: IrTypeId) -> &IrType {
        &self.arena[id.raw() as usize]
    }

    /// Byte size of a type. Placeholders and function types are unsized and
    /// report zero; they only ever appear behind pointers.
    pub fn size_of(&self, id: IrTypeId) -> u64 {
        match self.get(id) {
            IrType::Void | IrType::Func { .. } | IrType::Incomplete { .. } => 0,
            IrType::Int { bits } | IrType::Float { bits } => u64::from(*bits) / 8,
            IrType::Ptr { .. } => sable_types::POINTER_BYTES,
            IrType::Array { element, len } => self.size_of(*element) * len,
            IrType::Aggregate(layout) => layout.size,
        }
    }

    /// Natural alignment of a type in bytes.
    pub fn align_of(&self, id: IrTypeId) -> u32 {
        match self.get(id) {
            IrType::Void | IrType::Func { .. } | IrType::Incomplete { .. } => 1,
            IrType::Int { bits } | IrType::Float { bits } => (bits / 8).max(1),
            IrType::Ptr { .. } => sable_types::POINTER_BYTES as u32,
            IrType::Array { element, .. } => self.align_of(*element),
            IrType::Aggregate(layout) => {
                if layout.packed {
                    1
                } else {
                    layout.align
                }
            }
        }
    }

    /// Whether the type is an aggregate (struct-shaped or array).
    pub fn is_aggregate(&self, id: IrTypeId) -> bool {
        matches!(self.get(id), IrType::Aggregate(_) | IrType::Array { .. })
    }

    /// Number of types in the arena.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn structural_dedup() {
        let mut table = TypeTable::new();
        let a = table.int(32);
        let b = table.int(32);
        let c = table.int(64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn pointer_sizes() {
        let mut table = TypeTable::new();
        let i8_ty = table.int(8);
        let p = table.ptr(i8_ty);
        assert_eq!(table.size_of(p), 8);
        assert_eq!(table.align_of(p), 8);
    }

    #[test]
    fn incomplete_shares_slot_and_patches() {
        let mut table = TypeTable::new();
        let source = TypeIdx::from_raw(100);
        let a = table.incomplete(source);
        let b = table.incomplete(source);
        assert_eq!(a, b);

        let resolved = table.int(32);
        table.patch(a, resolved);
        assert_eq!(table.get(a), &IrType::Int { bits: 32 });
        // A later request for the same source allocates a fresh placeholder.
        assert!(table.incomplete_for(source).is_none());
    }

    #[test]
    fn aggregate_size_comes_from_layout() {
        let mut table = TypeTable::new();
        let i32_ty = table.int(32);
        let layout = AggregateLayout {
            elements: smallvec::smallvec![ElementLayout {
                ty: i32_ty,
                offset: 0,
                size: 4,
                is_padding: false,
            }],
            size: 8,
            align: 4,
            packed: false,
        };
        let agg = table.intern(IrType::Aggregate(layout));
        assert_eq!(table.size_of(agg), 8);
        assert!(table.is_aggregate(agg));
    }
}
