//! Allocation-state tracing.
//!
//! With [`VALIDATE`] on, every buffer offset a pool hands out or takes back
//! has a trail in the registry: its current [`BufferState`] plus the entries
//! recorded since it was last allocated. Allocating a buffer that is not known
//! free, or freeing one that is not known allocated, panics with the trail.
//! With `VALIDATE` off every function here returns immediately.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::VALIDATE;
use crate::events::PoolEvent;
use crate::pool::BufferPool;
use crate::refs::{Ref, RefHeader};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Never seen by a pool.
    #[default]
    Unknown,
    KnownAllocated,
    KnownFree,
}

impl BufferState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::KnownAllocated => "known-allocated",
            Self::KnownFree => "known-free",
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of an offset's trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEntry {
    SetState(BufferState),
    /// Recorded by [`RefHeader::trace`].
    Note { label: &'static str, value: u64 },
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetState(s) => write!(f, "set-state: {s}"),
            Self::Note { label, value } => write!(f, "{label} {value}"),
        }
    }
}

#[derive(Debug, Clone)]
struct TraceEvent {
    pool: Arc<str>,
    entry: TraceEntry,
}

#[derive(Debug, Clone)]
struct BufferTrace {
    offset: u32,
    state: BufferState,
    events: Vec<TraceEvent>,
}

impl BufferTrace {
    fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.events.len() + 1);
        lines.push(format!("events for offset {:#x}:", self.offset));
        for e in &self.events {
            lines.push(format!("  pool {}: {}", e.pool, e.entry));
        }
        lines
    }
}

/// Trails keyed by buffer offset. Shared by every pool of a registry.
#[derive(Debug, Default)]
pub(crate) struct TraceTable {
    by_offset: HashMap<u32, BufferTrace>,
}

impl TraceTable {
    fn get(&mut self, offset: u32) -> &mut BufferTrace {
        self.by_offset.entry(offset).or_insert_with(|| BufferTrace {
            offset,
            state: BufferState::Unknown,
            events: Vec::new(),
        })
    }

    pub(crate) fn state(&self, offset: u32) -> BufferState {
        self.by_offset.get(&offset).map_or(BufferState::Unknown, |t| t.state)
    }

    /// Forget the trail entries for `offset`; its state is kept.
    pub(crate) fn put(&mut self, offset: u32) {
        if let Some(t) = self.by_offset.get_mut(&offset) {
            t.events.clear();
        }
    }

    pub(crate) fn trail(&self, offset: u32) -> Vec<String> {
        self.by_offset.get(&offset).map(BufferTrace::lines).unwrap_or_default()
    }
}

fn panic_state(lines: &[String], offset: u32, got: BufferState, want: BufferState) -> ! {
    for l in lines {
        tracing::error!("{l}");
    }
    panic!(
        "{}\nvalidate buffer offset {offset:#x}: want {want} != got {got}",
        lines.join("\n")
    );
}

impl BufferPool {
    /// Record a transition to `new` and return the previous state.
    fn set_state(&self, offset: u32, new: BufferState) -> (BufferState, Vec<String>) {
        let (old, lines) = {
            let mut traces = self.shared().traces.lock();
            let t = traces.get(offset);
            let old = t.state;
            t.state = new;
            if new == BufferState::KnownAllocated {
                t.events.clear();
            }
            t.events.push(TraceEvent {
                pool: Arc::clone(self.name_arc()),
                entry: TraceEntry::SetState(new),
            });
            (old, t.lines())
        };
        self.shared().elog.add(&PoolEvent::State {
            pool: self.elog_name(),
            offset,
            old,
            new,
        });
        (old, lines)
    }

    /// Move `r` to `set`, panicking unless it was in the expected prior state:
    /// known free (or unknown, for a buffer's first allocation) before
    /// allocation, known allocated before free.
    pub(crate) fn validate_set_state(&self, r: &RefHeader, set: BufferState) {
        if !VALIDATE {
            return;
        }
        let (got, lines) = self.set_state(r.offset(), set);
        let want = match set {
            BufferState::KnownAllocated if got == BufferState::Unknown => BufferState::Unknown,
            BufferState::KnownAllocated => BufferState::KnownFree,
            _ => BufferState::KnownAllocated,
        };
        if got != want {
            panic_state(&lines, r.offset(), got, want);
        }
    }

    pub(crate) fn validate_set_state_refs(&self, refs: &[Ref], set: BufferState, stride: usize) {
        if !VALIDATE {
            return;
        }
        for r in refs.iter().step_by(stride.max(1)) {
            self.validate_set_state(r, set);
        }
    }

    /// Panic unless every `stride`-th ref of `refs` is in state `want`.
    pub fn validate_refs(&self, refs: &[Ref], want: BufferState, stride: usize) {
        if !VALIDATE {
            return;
        }
        for r in refs.iter().step_by(stride.max(1)) {
            r.validate_state(self, want);
        }
    }

    pub(crate) fn unset_state(&self, offset: u32) {
        if VALIDATE {
            self.shared().traces.lock().put(offset);
        }
    }

    /// Traced state of the buffer `r` points at. Always `Unknown` without
    /// validation.
    #[must_use]
    pub fn buffer_state(&self, r: &RefHeader) -> BufferState {
        self.shared().traces.lock().state(r.offset())
    }

    /// Trail lines for the buffer `r` points at.
    #[must_use]
    pub fn trail(&self, r: &RefHeader) -> Vec<String> {
        self.shared().traces.lock().trail(r.offset())
    }
}

impl RefHeader {
    /// Add a custom entry to this buffer's trail.
    pub fn trace(&self, pool: &BufferPool, label: &'static str, value: u64) {
        if !VALIDATE {
            return;
        }
        pool.shared().traces.lock().get(self.offset()).events.push(TraceEvent {
            pool: Arc::clone(pool.name_arc()),
            entry: TraceEntry::Note { label, value },
        });
    }

    /// Panic unless this buffer is in state `want`.
    pub fn validate_state(&self, pool: &BufferPool, want: BufferState) {
        if !VALIDATE {
            return;
        }
        let (got, lines) = {
            let traces = pool.shared().traces.lock();
            (traces.state(self.offset()), traces.trail(self.offset()))
        };
        if got != want {
            panic_state(&lines, self.offset(), got, want);
        }
    }
}
