//! The event ring buffer.
//!
//! Writer protocol (single event):
//! 1. encode the event on the stack
//! 2. allocate a global `seqno`
//! 3. under the slot mutex, write `(seqno, event)` into slot `seqno & mask`
//!    unless the slot already holds a newer seqno
//! 4. publish `seqno` with `Release`
//!
//! Reader protocol (snapshot):
//! 1. read the published `seqno` with `Acquire`
//! 2. copy the slot under its mutex
//! 3. re-read the published `seqno` and accept iff it is unchanged and matches
//!    the copied record
//!
//! A slot is never observed half written. A slot being overwritten while the
//! snapshot copies it is skipped.

use std::io;
use std::panic::Location;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use parking_lot::{Mutex, RwLock};

use crate::caller::{CallSite, CallerIndex, CallerRegistry};
use crate::config::ElogConfig;
use crate::encode::{Arg, EVENT_DATA_BYTES, Encoder};
use crate::strings::{StringRef, StringTable};
use crate::view::View;

/// Event header flag: some arguments did not fit in the data area.
pub const FLAG_TRUNCATED: u8 = 1 << 0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Nanoseconds since the buffer was created.
    pub timestamp: u64,
    pub caller: CallerIndex,
    /// Bytes of encoded data.
    pub len: u8,
    pub flags: u8,
}

impl EventHeader {
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.flags & FLAG_TRUNCATED != 0
    }
}

/// Fixed-size ring slot contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferEvent {
    pub header: EventHeader,
    pub data: [u8; EVENT_DATA_BYTES],
}

pub const EVENT_BYTES: usize = 64;
const _: () = assert!(std::mem::size_of::<BufferEvent>() == EVENT_BYTES);

impl BufferEvent {
    pub const EMPTY: Self = Self {
        header: EventHeader {
            timestamp: 0,
            caller: CallerIndex::UNKNOWN,
            len: 0,
            flags: 0,
        },
        data: [0; EVENT_DATA_BYTES],
    };

    /// Encoded bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..usize::from(self.header.len).min(EVENT_DATA_BYTES)]
    }
}

/// An event type that knows its call site and how to encode its arguments.
///
/// [`Buffer::add`] opens a record with the site's format before calling
/// [`encode`](Event::encode); encoders may open further records.
pub trait Event {
    fn site(&self) -> &'static CallSite;
    fn encode(&self, enc: &mut Encoder<'_>);
}

#[derive(Clone, Copy)]
struct SlotData {
    seqno: u64,
    event: BufferEvent,
}

struct Slot {
    published_seqno: AtomicU64,
    data: Mutex<SlotData>,
}

impl Slot {
    fn new() -> Self {
        Self {
            published_seqno: AtomicU64::new(0),
            data: Mutex::new(SlotData {
                seqno: 0,
                event: BufferEvent::EMPTY,
            }),
        }
    }
}

struct Ring {
    slots: Box<[Slot]>,
    mask: u64,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        let n = capacity.max(1).next_power_of_two();
        Self {
            slots: (0..n).map(|_| Slot::new()).collect(),
            mask: n as u64 - 1,
        }
    }
}

static PANIC_SITE: CallSite = CallSite::new("vnet_elog::panic", file!(), line!(), "panic %s");

/// Fixed-capacity event ring with overwrite-oldest semantics.
pub struct Buffer {
    enabled: AtomicBool,
    next_seqno: AtomicU64,
    ring: RwLock<Ring>,
    strings: StringTable,
    callers: CallerRegistry,
    start: Instant,
    start_time: SystemTime,
    panic_save_file: Mutex<Option<PathBuf>>,
}

impl Buffer {
    /// A disabled buffer holding at least `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            next_seqno: AtomicU64::new(0),
            ring: RwLock::new(Ring::new(capacity)),
            strings: StringTable::new(),
            callers: CallerRegistry::new(),
            start: Instant::now(),
            start_time: SystemTime::now(),
            panic_save_file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_config(config: &ElogConfig) -> Self {
        let b = Self::new(config.capacity());
        b.enable(config.enabled);
        b.set_panic_save_file(config.save_file.clone());
        b
    }

    #[inline]
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    #[must_use]
    pub fn cap(&self) -> usize {
        self.ring.read().slots.len()
    }

    /// Replace the ring with one of at least `n` slots. Logged events are discarded.
    pub fn resize(&self, n: usize) {
        *self.ring.write() = Ring::new(n);
    }

    #[must_use]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    #[must_use]
    pub fn callers(&self) -> &CallerRegistry {
        &self.callers
    }

    pub fn set_string(&self, s: &str) -> StringRef {
        self.strings.set_string(s)
    }

    #[must_use]
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Nanoseconds since the buffer was created.
    #[inline]
    #[must_use]
    pub fn now(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    pub fn set_panic_save_file(&self, path: Option<PathBuf>) {
        *self.panic_save_file.lock() = path;
    }

    #[must_use]
    pub fn panic_save_file(&self) -> Option<PathBuf> {
        self.panic_save_file.lock().clone()
    }

    /// Log a typed event.
    pub fn add<E: Event + ?Sized>(&self, e: &E) {
        if !self.enabled() {
            return;
        }
        let site = e.site();
        let caller = self.callers.register_site(site, &self.strings);
        let format = self.callers.get(caller).format;
        self.publish(caller, self.now(), |enc| {
            enc.begin(format);
            e.encode(enc);
        });
    }

    /// Log `args` against a static site. This is what [`elog!`](crate::elog) expands to.
    pub fn log(&self, site: &'static CallSite, args: &[Arg<'_>]) {
        if self.enabled() {
            self.log_at(site, self.now(), args);
        }
    }

    /// Like [`log`](Self::log) with a caller-supplied timestamp.
    pub fn add_with_timestamp(&self, site: &'static CallSite, timestamp: u64, args: &[Arg<'_>]) {
        if self.enabled() {
            self.log_at(site, timestamp, args);
        }
    }

    fn log_at(&self, site: &'static CallSite, timestamp: u64, args: &[Arg<'_>]) {
        let caller = self.callers.register_site(site, &self.strings);
        let format = self.callers.get(caller).format;
        self.publish(caller, timestamp, |enc| {
            enc.begin(format);
            for a in args {
                enc.arg(a);
            }
        });
    }

    /// One unsigned argument, no argument slice.
    #[inline]
    pub fn f1u(&self, site: &'static CallSite, a: u64) {
        if !self.enabled() {
            return;
        }
        let caller = self.callers.register_site(site, &self.strings);
        let format = self.callers.get(caller).format;
        self.publish(caller, self.now(), |enc| {
            enc.begin(format);
            enc.u64(a);
        });
    }

    /// Two unsigned arguments, no argument slice.
    #[inline]
    pub fn f2u(&self, site: &'static CallSite, a: u64, b: u64) {
        if !self.enabled() {
            return;
        }
        let caller = self.callers.register_site(site, &self.strings);
        let format = self.callers.get(caller).format;
        self.publish(caller, self.now(), |enc| {
            enc.begin(format);
            enc.u64(a);
            enc.u64(b);
        });
    }

    /// Log a dynamically built format. Interns `format` on every call; prefer
    /// [`elog!`](crate::elog) for fixed formats.
    #[track_caller]
    pub fn f(&self, format: &str, args: &[Arg<'_>]) {
        if !self.enabled() {
            return;
        }
        let caller = self.callers.register_location(Location::caller());
        let format = self.strings.set_string(format);
        self.publish(caller, self.now(), |enc| {
            enc.begin(format);
            for a in args {
                enc.arg(a);
            }
        });
    }

    fn publish(&self, caller: CallerIndex, timestamp: u64, encode: impl FnOnce(&mut Encoder<'_>)) {
        let mut event = BufferEvent::EMPTY;
        let mut enc = Encoder::new(&mut event.data);
        encode(&mut enc);
        let (len, truncated) = enc.finish();
        event.header = EventHeader {
            timestamp,
            caller,
            len: u8::try_from(len).unwrap_or(u8::MAX),
            flags: if truncated { FLAG_TRUNCATED } else { 0 },
        };

        let ring = self.ring.read();
        let seqno = self.next_seqno.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let slot = &ring.slots[(seqno & ring.mask) as usize];
        let mut data = slot.data.lock();
        // A writer delayed by a full lap must not replace the newer event.
        if data.seqno < seqno {
            *data = SlotData { seqno, event };
            slot.published_seqno.store(seqno, Ordering::Release);
        }
    }

    /// Copy the live events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BufferEvent> {
        let ring = self.ring.read();
        let last = self.next_seqno.load(Ordering::Acquire);
        let first = last.saturating_sub(ring.slots.len() as u64);
        let mut out: Vec<(u64, BufferEvent)> = Vec::with_capacity(ring.slots.len());
        for slot in &ring.slots {
            let s1 = slot.published_seqno.load(Ordering::Acquire);
            if s1 <= first || s1 > last {
                continue;
            }
            let d = *slot.data.lock();
            let s2 = slot.published_seqno.load(Ordering::Acquire);
            if s1 == s2 && d.seqno == s1 {
                out.push((s1, d.event));
            }
        }
        drop(ring);
        // Producers may publish out of timestamp order; sort restores it.
        out.sort_unstable_by_key(|(seqno, e)| (e.header.timestamp, *seqno));
        out.into_iter().map(|(_, e)| e).collect()
    }

    /// Snapshot into a self-contained [`View`].
    #[must_use]
    pub fn new_view(&self) -> View {
        let events = self.snapshot();
        // Tables are copied after the events so every reference they hold resolves.
        View::from_buffer_events(
            events,
            self.strings.clone(),
            self.callers.snapshot(),
            self.start_time,
        )
    }

    /// Print a fresh view.
    pub fn print(&self, w: &mut dyn io::Write, verbose: bool) -> io::Result<()> {
        self.new_view().print(w, verbose)
    }

    /// Log a `panic` event and, when a save file is configured, save a view to it.
    pub fn panic(&self, msg: &str) {
        let was = self.enabled();
        self.enable(true);
        self.log(&PANIC_SITE, &[Arg::Str(msg)]);
        self.enable(was);
        if let Some(path) = self.panic_save_file() {
            match self.new_view().save_file(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "saved event log on panic"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "event log save on panic failed"),
            }
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("enabled", &self.enabled())
            .field("cap", &self.cap())
            .field("next_seqno", &self.next_seqno.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
