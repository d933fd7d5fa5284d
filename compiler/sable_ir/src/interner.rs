//! String interner backing [`Name`] handles.
//!
//! Interned strings are leaked into `'static` storage so lookups can hand
//! out `&'static str` without lifetime plumbing. A compiler process interns
//! a bounded set of identifiers, so the leak is the arena.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::Name;

struct InternTable {
    /// Map from string content to index.
    map: FxHashMap<&'static str, u32>,
    /// Storage for string contents, indexed by `Name::index()`.
    strings: Vec<&'static str>,
}

/// Thread-safe string interner.
///
/// Interning the same string twice returns the same [`Name`]. The empty
/// string is pre-interned as [`Name::EMPTY`].
pub struct StringInterner {
    table: RwLock<InternTable>,
}

impl StringInterner {
    /// Create a new interner with the empty string pre-interned.
    pub fn new() -> Self {
        let mut map = FxHashMap::default();
        map.insert("", 0);
        StringInterner {
            table: RwLock::new(InternTable {
                map,
                strings: vec![""],
            }),
        }
    }

    /// Intern a string, returning its stable [`Name`].
    pub fn intern(&self, s: &str) -> Name {
        if let Some(&idx) = self.table.read().map.get(s) {
            return Name::from_raw(idx);
        }
        let mut table = self.table.write();
        // Re-check under the write lock; another thread may have won.
        if let Some(&idx) = table.map.get(s) {
            return Name::from_raw(idx);
        }
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let idx = u32::try_from(table.strings.len()).unwrap_or_else(|_| {
            // 4 billion distinct identifiers in one unit is not a real input.
            panic!("interner capacity exceeded")
        });
        table.strings.push(leaked);
        table.map.insert(leaked, idx);
        Name::from_raw(idx)
    }

    /// Resolve a [`Name`] back to its text.
    pub fn resolve(&self, name: Name) -> &'static str {
        self.table.read().strings[name.index()]
    }

    /// Number of interned strings (including the pre-interned empty string).
    pub fn len(&self) -> usize {
        self.table.read().strings.len()
    }

    /// Whether only the empty string is interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_string_same_name() {
        let interner = StringInterner::new();
        let a = interner.intern("offset");
        let b = interner.intern("offset");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_strings_distinct_names() {
        let interner = StringInterner::new();
        let a = interner.intern("lhs");
        let b = interner.intern("rhs");
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_round_trips() {
        let interner = StringInterner::new();
        let n = interner.intern("cleanup.exit");
        assert_eq!(interner.resolve(n), "cleanup.exit");
    }

    #[test]
    fn empty_string_is_pre_interned() {
        let interner = StringInterner::new();
        assert_eq!(interner.intern(""), Name::EMPTY);
        assert_eq!(interner.resolve(Name::EMPTY), "");
    }
}
