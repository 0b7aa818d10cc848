//! Self-contained snapshots of logged events.
//!
//! A view starts out holding copies of ring slots ("buffer events") and can be
//! converted to variable-length decoded events backed by one byte vector; a
//! restored view is always in the decoded form. Both forms render the same.
//! Windowing narrows `current`, a contiguous index range into the events;
//! nothing is copied.

use std::fmt;
use std::ops::Range;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;

use crate::buffer::{BufferEvent, EventHeader};
use crate::caller::{CallerInfo, CallerRegistry};
use crate::encode::{Arg, decode};
use crate::error::Result;
use crate::format::sprintf;
use crate::strings::StringTable;

const NS_PER_SEC: u64 = 1_000_000_000;

/// A decoded event: header plus `bytes[lo..hi]` of its view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ViewEvent {
    pub(crate) header: EventHeader,
    pub(crate) lo: u32,
    pub(crate) hi: u32,
}

#[derive(Debug, Clone)]
pub(crate) enum Events {
    Buffer(Vec<BufferEvent>),
    Decoded { all: Vec<ViewEvent>, bytes: Vec<u8> },
}

impl Events {
    fn len(&self) -> usize {
        match self {
            Self::Buffer(all) => all.len(),
            Self::Decoded { all, .. } => all.len(),
        }
    }

    pub(crate) fn header(&self, i: usize) -> &EventHeader {
        match self {
            Self::Buffer(all) => &all[i].header,
            Self::Decoded { all, .. } => &all[i].header,
        }
    }

    pub(crate) fn data(&self, i: usize) -> &[u8] {
        match self {
            Self::Buffer(all) => all[i].data(),
            Self::Decoded { all, bytes } => {
                let e = &all[i];
                bytes.get(e.lo as usize..e.hi as usize).unwrap_or(&[])
            }
        }
    }
}

/// Display window of a view.
#[derive(Debug, Clone, PartialEq)]
pub struct Times {
    /// Display origin, in nanoseconds since the Unix epoch.
    pub start_unix_ns: u64,
    /// Window bounds in seconds relative to the display origin, rounded to `unit`.
    pub min_elapsed: f64,
    pub max_elapsed: f64,
    pub dt: f64,
    /// Display unit in seconds.
    pub unit: f64,
    pub unit_name: &'static str,
}

impl Times {
    fn empty(origin_unix_ns: u64) -> Self {
        Self {
            start_unix_ns: origin_unix_ns,
            min_elapsed: 0.0,
            max_elapsed: 0.0,
            dt: 0.0,
            unit: 1.0,
            unit_name: "sec",
        }
    }

    /// Choose a unit for the window `[t0, t1]` (seconds since `origin_unix_ns`)
    /// and round the window and display origin to it.
    #[must_use]
    pub fn for_window(origin_unix_ns: u64, t0: f64, t1: f64) -> Self {
        let (t0, t1) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        let dt = t1 - t0;
        let log_dt = if dt > 0.0 { dt.log10().floor() } else { 0.0 };
        let (unit_name, unit, max_unit) = if log_dt < -6.0 {
            ("ns", 1e-9, 1e3)
        } else if log_dt < -3.0 {
            ("μs", 1e-6, 1e3)
        } else if log_dt < 0.0 {
            ("ms", 1e-3, 1e3)
        } else if dt < 60.0 {
            ("sec", 1.0, 60.0)
        } else if dt < 3600.0 {
            ("min", 60.0, 60.0)
        } else if dt < 86_400.0 {
            ("hr", 3600.0, 86_400.0)
        } else {
            ("day", 86_400.0, 1e3)
        };

        let t0 = unit * (t0 / unit).floor();
        let t1 = unit * (t1 / unit).ceil();

        let start_unit = if unit >= 1.0 { 1.0 } else { max_unit * unit };
        let start_unit_ns = ((start_unit * 1e9) as i128).max(1);
        let abs = i128::from(origin_unix_ns) + (t0 * 1e9) as i128;
        let start = (abs - abs.rem_euclid(start_unit_ns)).max(0);
        let shift = (start - i128::from(origin_unix_ns)) as f64 / 1e9;

        Self {
            start_unix_ns: u64::try_from(start).unwrap_or(u64::MAX),
            min_elapsed: t0 - shift,
            max_elapsed: t1 - shift,
            dt: t1 - t0,
            unit,
            unit_name,
        }
    }
}

/// Render the records in `data` as lines, resolving string references in `strings`.
pub(crate) fn render_lines(data: &[u8], strings: &StringTable) -> Vec<String> {
    let (records, ok) = decode(data);
    let mut lines = Vec::new();
    for r in &records {
        let args: Vec<Arg<'_>> = r
            .args
            .iter()
            .map(|a| match *a {
                Arg::Ref(s) => Arg::Str(strings.get_string(s)),
                other => other,
            })
            .collect();
        let text = sprintf(strings.get_string(r.format), &args);
        lines.extend(text.split('\n').map(str::to_owned));
    }
    if !ok {
        lines.push("%!(BADDATA)".to_owned());
    }
    lines
}

fn unix_ns(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// An immutable, sortable, filterable snapshot of events.
pub struct View {
    pub(crate) name: String,
    pub(crate) events: Events,
    pub(crate) current: Range<usize>,
    pub(crate) strings: StringTable,
    pub(crate) callers: CallerRegistry,
    /// Wall time of timestamp 0, in nanoseconds since the Unix epoch.
    pub(crate) start_unix_ns: u64,
    pub(crate) times: Times,
}

impl View {
    pub(crate) fn from_buffer_events(
        events: Vec<BufferEvent>,
        strings: StringTable,
        callers: CallerRegistry,
        start_time: SystemTime,
    ) -> Self {
        let n = events.len();
        Self::from_parts(
            String::new(),
            Events::Buffer(events),
            0..n,
            strings,
            callers,
            unix_ns(start_time),
        )
    }

    pub(crate) fn from_parts(
        name: String,
        events: Events,
        current: Range<usize>,
        strings: StringTable,
        callers: CallerRegistry,
        start_unix_ns: u64,
    ) -> Self {
        let mut v = Self {
            name,
            events,
            current,
            strings,
            callers,
            start_unix_ns,
            times: Times::empty(start_unix_ns - start_unix_ns % NS_PER_SEC),
        };
        v.update_times();
        v
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Events in the current window.
    #[must_use]
    pub fn num_events(&self) -> usize {
        self.current.len()
    }

    /// Events in the view regardless of windowing.
    #[must_use]
    pub fn num_all_events(&self) -> usize {
        self.events.len()
    }

    /// Header of the `i`th event in the current window.
    ///
    /// # Panics
    /// If `i >= self.num_events()`.
    #[must_use]
    pub fn event(&self, i: usize) -> &EventHeader {
        self.events.header(self.index(i))
    }

    #[must_use]
    pub fn event_lines(&self, i: usize) -> Vec<String> {
        render_lines(self.events.data(self.index(i)), &self.strings)
    }

    #[must_use]
    pub fn event_caller(&self, i: usize) -> &CallerInfo {
        self.callers.get(self.event(i).caller)
    }

    /// Seconds from the view origin (buffer start truncated to a whole second).
    #[must_use]
    pub fn elapsed_time(&self, i: usize) -> f64 {
        self.elapsed_at(self.index(i))
    }

    /// Wall-clock time of the `i`th event.
    #[must_use]
    pub fn event_time(&self, i: usize) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.event_unix_ns(i))
    }

    pub(crate) fn event_unix_ns(&self, i: usize) -> u64 {
        self.start_unix_ns.saturating_add(self.event(i).timestamp)
    }

    #[must_use]
    pub fn start_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.start_unix_ns)
    }

    #[must_use]
    pub fn times(&self) -> &Times {
        &self.times
    }

    #[must_use]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    #[must_use]
    pub fn callers(&self) -> &CallerRegistry {
        &self.callers
    }

    #[must_use]
    pub fn is_decoded(&self) -> bool {
        matches!(self.events, Events::Decoded { .. })
    }

    /// Narrow the current window to events with elapsed time in
    /// `[min(t0, t1), max(t0, t1)]`. Returns the number of events left.
    pub fn sub_view(&mut self, t0: f64, t1: f64) -> usize {
        let (t0, t1) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        let i0 = self.partition_point(self.current.clone(), |et| et < t0);
        let i1 = self.partition_point(i0..self.current.end, |et| et <= t1);
        self.current = i0..i1;
        self.times = Times::for_window(self.origin_unix_ns(), t0, t1);
        self.num_events()
    }

    /// Undo every [`sub_view`](Self::sub_view).
    pub fn reset(&mut self) {
        self.current = 0..self.events.len();
        self.update_times();
    }

    /// Indices (in the current window) of events whose caller name matches `pattern`.
    pub fn events_matching(&self, pattern: &str) -> Result<Vec<usize>> {
        let re = Regex::new(pattern)?;
        Ok((0..self.num_events())
            .filter(|&i| re.is_match(&self.event_caller(i).name))
            .collect())
    }

    /// Convert buffer events to the decoded form. No-op when already decoded.
    pub fn decode_events(&mut self) {
        let Events::Buffer(all) = &self.events else {
            return;
        };
        let mut bytes = Vec::with_capacity(all.iter().map(|e| e.data().len()).sum());
        let mut decoded = Vec::with_capacity(all.len());
        for e in all {
            let lo = bytes.len();
            bytes.extend_from_slice(e.data());
            decoded.push(ViewEvent {
                header: e.header,
                lo: u32::try_from(lo).unwrap_or(u32::MAX),
                hi: u32::try_from(bytes.len()).unwrap_or(u32::MAX),
            });
        }
        self.events = Events::Decoded {
            all: decoded,
            bytes,
        };
    }

    fn origin_unix_ns(&self) -> u64 {
        self.start_unix_ns - self.start_unix_ns % NS_PER_SEC
    }

    #[inline]
    fn index(&self, i: usize) -> usize {
        assert!(
            i < self.current.len(),
            "event index {i} out of range ({} events)",
            self.current.len()
        );
        self.current.start + i
    }

    fn elapsed_at(&self, idx: usize) -> f64 {
        let offset = self.start_unix_ns - self.origin_unix_ns();
        (self.events.header(idx).timestamp.saturating_add(offset)) as f64 / 1e9
    }

    // First index in `r` whose elapsed time fails `pred`; `pred` must be monotone.
    fn partition_point(&self, r: Range<usize>, pred: impl Fn(f64) -> bool) -> usize {
        let (mut lo, mut hi) = (r.start, r.end);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.elapsed_at(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn update_times(&mut self) {
        let origin = self.origin_unix_ns();
        self.times = match self.num_events() {
            0 => Times::empty(origin),
            n => Times::for_window(origin, self.elapsed_time(0), self.elapsed_time(n - 1)),
        };
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("name", &self.name)
            .field("events", &self.events.len())
            .field("current", &self.current)
            .field("decoded", &self.is_decoded())
            .finish_non_exhaustive()
    }
}
