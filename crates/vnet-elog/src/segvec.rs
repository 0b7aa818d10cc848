//! Append-only segmented vector with lock-free reads.
//!
//! Segment `k` holds `BASE << k` entries and is allocated on first use, so an
//! entry never moves once published. Readers only perform atomic loads;
//! writers must be serialized by the owning table's mutation lock.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

const BASE: usize = 64;
const SEGMENTS: usize = 26;

pub(crate) struct SegVec<T> {
    segments: [OnceLock<Box<[OnceLock<T>]>>; SEGMENTS],
    len: AtomicUsize,
}

#[inline]
fn locate(i: usize) -> (usize, usize) {
    let j = i / BASE + 1;
    let seg = (usize::BITS - 1 - j.leading_zeros()) as usize;
    (seg, i - BASE * ((1 << seg) - 1))
}

impl<T> SegVec<T> {
    pub(crate) fn new() -> Self {
        Self {
            segments: std::array::from_fn(|_| OnceLock::new()),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn get(&self, i: usize) -> Option<&T> {
        if i >= self.len() {
            return None;
        }
        let (seg, idx) = locate(i);
        self.segments[seg].get()?.get(idx)?.get()
    }

    /// Append `value`, returning its index.
    ///
    /// Callers hold the owning table's lock; concurrent pushes are a bug.
    pub(crate) fn push(&self, value: T) -> usize {
        let i = self.len.load(Ordering::Relaxed);
        let (seg, idx) = locate(i);
        assert!(seg < SEGMENTS, "segmented vector full at {i} entries");
        let segment = self.segments[seg].get_or_init(|| {
            (0..(BASE << seg))
                .map(|_| OnceLock::new())
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        let set = segment[idx].set(value);
        debug_assert!(set.is_ok(), "slot {i} written twice");
        self.len.store(i + 1, Ordering::Release);
        i
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

impl<T> Default for SegVec<T> {
    fn default() -> Self {
        Self::new()
    }
}
