//! Interned strings shared by event producers and views.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::segvec::SegVec;

/// Handle to an interned string.
///
/// Index 0 is reserved for [`StringRef::NIL`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringRef(u32);

impl StringRef {
    /// No string.
    pub const NIL: Self = Self(0);

    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StringRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Content-addressed string table.
///
/// `set_string` serializes on a single mutex; `get` never locks.
pub struct StringTable {
    entries: SegVec<Box<str>>,
    by_content: Mutex<HashMap<Box<str>, StringRef>>,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        let t = Self {
            entries: SegVec::new(),
            by_content: Mutex::new(HashMap::new()),
        };
        // Slot 0 backs StringRef::NIL.
        t.entries.push(Box::from(""));
        t
    }

    /// Intern `s`; equal content always yields the same reference.
    pub fn set_string(&self, s: &str) -> StringRef {
        let mut by_content = self.by_content.lock();
        if let Some(&r) = by_content.get(s) {
            return r;
        }
        let i = self.entries.push(Box::from(s));
        let r = StringRef(u32::try_from(i).unwrap_or(u32::MAX));
        by_content.insert(Box::from(s), r);
        r
    }

    /// Append `s` at the next index even when an equal string exists.
    pub(crate) fn push(&self, s: &str) -> StringRef {
        let mut by_content = self.by_content.lock();
        let r = StringRef(u32::try_from(self.entries.push(Box::from(s))).unwrap_or(u32::MAX));
        by_content.entry(Box::from(s)).or_insert(r);
        r
    }

    #[must_use]
    pub fn get(&self, r: StringRef) -> Option<&str> {
        self.entries.get(r.0 as usize).map(AsRef::as_ref)
    }

    /// Like [`get`](Self::get) but yields `""` for references this table never produced.
    #[must_use]
    pub fn get_string(&self, r: StringRef) -> &str {
        self.get(r).unwrap_or("")
    }

    /// Number of entries including the reserved nil slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Append every entry of `other` not already present, preserving indices
    /// when `self` is empty.
    pub fn copy_from(&self, other: &StringTable) {
        for s in other.entries.iter().skip(1) {
            self.set_string(s);
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(AsRef::as_ref)
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StringTable {
    fn clone(&self) -> Self {
        let t = Self::new();
        t.copy_from(self);
        t
    }
}

impl fmt::Debug for StringTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringTable")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_content_addressed() {
        let t = StringTable::new();
        let a = t.set_string("hw buf");
        let b = t.set_string(&String::from("hw buf"));
        let c = t.set_string("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_nil());
        assert_eq!(t.get_string(a), "hw buf");
        assert_eq!(t.get_string(c), "other");
    }

    #[test]
    fn nil_and_unknown_refs() {
        let t = StringTable::new();
        assert!(t.is_empty());
        assert_eq!(t.get(StringRef::NIL), Some(""));
        assert_eq!(t.get(StringRef::from_raw(42)), None);
        assert_eq!(t.get_string(StringRef::from_raw(42)), "");
    }

    #[test]
    fn clone_preserves_indices() {
        let t = StringTable::new();
        let refs: Vec<_> = (0..100).map(|i| t.set_string(&format!("s{i}"))).collect();
        let c = t.clone();
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(c.get_string(*r), format!("s{i}"));
        }
    }

    #[test]
    fn concurrent_interning_agrees() {
        let t = std::sync::Arc::new(StringTable::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = t.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .map(|i| t.set_string(&format!("k{}", i % 50)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        assert_eq!(t.len(), 51);
    }
}
