//! Logging call sites and the registry that resolves them to compact indices.

use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::segvec::SegVec;
use crate::strings::{StringRef, StringTable};

/// Index of a [`CallerInfo`] in a registry. Index 0 is the unknown caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerIndex(pub(crate) u32);

impl CallerIndex {
    pub const UNKNOWN: Self = Self(0);

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Resolved description of a logging call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerInfo {
    pub name: String,
    pub file: String,
    pub line: u32,
    /// Format string of a static site, interned in the owning buffer's table.
    pub(crate) format: StringRef,
}

impl CallerInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            line,
            format: StringRef::NIL,
        }
    }

    fn unknown() -> Self {
        Self::new("unknown", "", 0)
    }
}

/// A static logging call site.
///
/// Normally declared by the [`elog!`](crate::elog) macro. The first event from a
/// site registers it with the buffer's [`CallerRegistry`]; later events reuse the
/// cached index without locking.
pub struct CallSite {
    name: &'static str,
    file: &'static str,
    line: u32,
    format: &'static str,
    // (registry id << 32) | caller index; 0 when unresolved.
    cache: AtomicU64,
}

impl CallSite {
    #[must_use]
    pub const fn new(
        name: &'static str,
        file: &'static str,
        line: u32,
        format: &'static str,
    ) -> Self {
        Self {
            name,
            file,
            line,
            format,
            cache: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn format(&self) -> &'static str {
        self.format
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SiteKey {
    Static(usize),
    Location(usize, u32, u32),
}

static NEXT_REGISTRY_ID: AtomicU32 = AtomicU32::new(1);

/// Table of call sites seen by one event buffer.
pub struct CallerRegistry {
    id: u32,
    entries: SegVec<CallerInfo>,
    by_site: Mutex<HashMap<SiteKey, CallerIndex>>,
    unknown: CallerInfo,
}

impl CallerRegistry {
    #[must_use]
    pub fn new() -> Self {
        let r = Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            entries: SegVec::new(),
            by_site: Mutex::new(HashMap::new()),
            unknown: CallerInfo::unknown(),
        };
        r.entries.push(CallerInfo::unknown());
        r
    }

    /// Resolve a static site, interning its format into `strings` on first use.
    pub fn register_site(&self, site: &'static CallSite, strings: &StringTable) -> CallerIndex {
        let cached = site.cache.load(Ordering::Acquire);
        if (cached >> 32) as u32 == self.id {
            return CallerIndex(cached as u32);
        }
        let key = SiteKey::Static(std::ptr::from_ref(site) as usize);
        let index = self.lookup_or_insert(key, || CallerInfo {
            name: site.name.to_owned(),
            file: site.file.to_owned(),
            line: site.line,
            format: strings.set_string(site.format),
        });
        site.cache.store(
            (u64::from(self.id) << 32) | u64::from(index.0),
            Ordering::Release,
        );
        index
    }

    /// Resolve a `#[track_caller]` location; used by dynamically formatted calls.
    pub fn register_location(&self, loc: &'static Location<'static>) -> CallerIndex {
        let key = SiteKey::Location(loc.file().as_ptr() as usize, loc.line(), loc.column());
        self.lookup_or_insert(key, || {
            CallerInfo::new(format!("{}:{}", loc.file(), loc.line()), loc.file(), loc.line())
        })
    }

    /// Append a caller without a site key (view restore and copies).
    pub(crate) fn push(&self, info: CallerInfo) -> CallerIndex {
        let _guard = self.by_site.lock();
        CallerIndex(u32::try_from(self.entries.push(info)).unwrap_or(u32::MAX))
    }

    fn lookup_or_insert(&self, key: SiteKey, make: impl FnOnce() -> CallerInfo) -> CallerIndex {
        let mut by_site = self.by_site.lock();
        if let Some(&i) = by_site.get(&key) {
            return i;
        }
        let i = CallerIndex(u32::try_from(self.entries.push(make())).unwrap_or(u32::MAX));
        by_site.insert(key, i);
        i
    }

    /// Caller for `i`; unknown indices resolve to the reserved unknown caller.
    #[must_use]
    pub fn get(&self, i: CallerIndex) -> &CallerInfo {
        self.entries.get(i.0 as usize).unwrap_or(&self.unknown)
    }

    #[must_use]
    pub fn contains(&self, i: CallerIndex) -> bool {
        (i.0 as usize) < self.entries.len()
    }

    /// Number of callers including the reserved unknown caller.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CallerInfo> + '_ {
        self.entries.iter()
    }

    /// Index-preserving copy (no site keys, so the copy only serves lookups).
    pub(crate) fn snapshot(&self) -> Self {
        let r = Self::new();
        for info in self.entries.iter().skip(1) {
            r.push(info.clone());
        }
        r
    }
}

impl Default for CallerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerRegistry")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SITE_A: CallSite = CallSite::new("test::a", "a.rs", 10, "a %d");
    static SITE_B: CallSite = CallSite::new("test::b", "b.rs", 20, "b %s");

    #[test]
    fn site_resolves_once_per_registry() {
        let strings = StringTable::new();
        let r = CallerRegistry::new();
        let a1 = r.register_site(&SITE_A, &strings);
        let a2 = r.register_site(&SITE_A, &strings);
        let b = r.register_site(&SITE_B, &strings);
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(r.get(a1).name, "test::a");
        assert_eq!(r.get(b).line, 20);
        assert_eq!(strings.get_string(r.get(a1).format), "a %d");
    }

    #[test]
    fn site_cache_is_per_registry() {
        let strings = StringTable::new();
        let r1 = CallerRegistry::new();
        let r2 = CallerRegistry::new();
        // Push a filler entry so indices differ between registries.
        r2.push(CallerInfo::new("filler", "", 0));
        let i1 = r1.register_site(&SITE_B, &strings);
        let i2 = r2.register_site(&SITE_B, &strings);
        assert_eq!(r1.get(i1).name, "test::b");
        assert_eq!(r2.get(i2).name, "test::b");
        assert_ne!(i1, i2);
        assert_eq!(r1.register_site(&SITE_B, &strings), i1);
    }

    #[test]
    fn unknown_index_falls_back() {
        let r = CallerRegistry::new();
        assert_eq!(r.get(CallerIndex(99)).name, "unknown");
        assert!(!r.contains(CallerIndex(99)));
        assert!(r.is_empty());
    }

    #[test]
    fn location_sites_are_stable() {
        let r = CallerRegistry::new();
        let loc = Location::caller();
        let a = r.register_location(loc);
        let b = r.register_location(loc);
        assert_eq!(a, b);
        assert_eq!(r.get(a).line, loc.line());
    }
}
