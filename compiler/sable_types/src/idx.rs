//! Unified source type handle.

use std::fmt;

/// A 32-bit index into the [`TypePool`](crate::TypePool).
///
/// Primitive types have fixed indices and are pre-interned at pool creation,
/// so the common scalar cases never touch the pool's tables. Equality is an
/// O(1) index comparison.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct TypeIdx(u32);

impl TypeIdx {
    // === Primitive types (pre-interned at pool creation) ===

    /// The `void` type.
    pub const VOID: Self = Self(0);
    /// The `bool` type (1 byte).
    pub const BOOL: Self = Self(1);
    /// Signed 8-bit integer.
    pub const I8: Self = Self(2);
    /// Unsigned 8-bit integer.
    pub const U8: Self = Self(3);
    /// Signed 16-bit integer.
    pub const I16: Self = Self(4);
    /// Unsigned 16-bit integer.
    pub const U16: Self = Self(5);
    /// Signed 32-bit integer.
    pub const I32: Self = Self(6);
    /// Unsigned 32-bit integer.
    pub const U32: Self = Self(7);
    /// Signed 64-bit integer.
    pub const I64: Self = Self(8);
    /// Unsigned 64-bit integer.
    pub const U64: Self = Self(9);
    /// 32-bit floating point.
    pub const F32: Self = Self(10);
    /// 64-bit floating point.
    pub const F64: Self = Self(11);

    // === Reserved range (12-31) for future primitives ===

    /// First index for dynamically allocated types.
    pub const FIRST_DYNAMIC: u32 = 32;

    /// Number of pre-interned primitive types.
    pub const PRIMITIVE_COUNT: u32 = 12;

    /// Sentinel value indicating no type / invalid index.
    pub const NONE: Self = Self(u32::MAX);

    /// Create an index from a raw u32 value.
    ///
    /// The caller must ensure the index is valid in the pool.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check if this is a pre-interned primitive type.
    #[inline]
    pub const fn is_primitive(self) -> bool {
        self.0 < Self::FIRST_DYNAMIC
    }

    /// Check if this is the NONE sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// Check if this is the VOID type.
    #[inline]
    pub const fn is_void(self) -> bool {
        self.0 == Self::VOID.0
    }

    /// Human-readable name for primitive types.
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("void"),
            1 => Some("bool"),
            2 => Some("i8"),
            3 => Some("u8"),
            4 => Some("i16"),
            5 => Some("u16"),
            6 => Some("i32"),
            7 => Some("u32"),
            8 => Some("i64"),
            9 => Some("u64"),
            10 => Some("f32"),
            11 => Some("f64"),
            _ => None,
        }
    }
}

impl fmt::Debug for TypeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "TypeIdx({name})"),
            None if self.is_none() => write!(f, "TypeIdx(NONE)"),
            None => write!(f, "TypeIdx({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_primitive() {
        assert!(TypeIdx::VOID.is_primitive());
        assert!(TypeIdx::F64.is_primitive());
        assert!(!TypeIdx::from_raw(TypeIdx::FIRST_DYNAMIC).is_primitive());
    }

    #[test]
    fn none_sentinel() {
        assert!(TypeIdx::NONE.is_none());
        assert!(!TypeIdx::I32.is_none());
    }

    #[test]
    fn primitive_names() {
        assert_eq!(TypeIdx::I32.name(), Some("i32"));
        assert_eq!(TypeIdx::from_raw(100).name(), None);
    }
}
