//! Synthetic color events.

use std::thread;
use std::time::{Duration, Instant};

use vnet_elog::{Buffer, CallSite, Encoder, Event};

pub const COLOR_NAMES: [&str; 6] = ["dark blue", "light blue", "green", "yellow", "orange", "red"];

static COLOR_SITE: CallSite = CallSite::new("elogviewer::color", file!(), line!(), "%s %d");

/// One fixed-format site per color, for the `--fmt` path.
static FMT_SITES: [CallSite; 6] = [
    CallSite::new("elogviewer::fmt", file!(), line!(), "dark blue %d"),
    CallSite::new("elogviewer::fmt", file!(), line!(), "light blue %d"),
    CallSite::new("elogviewer::fmt", file!(), line!(), "green %d"),
    CallSite::new("elogviewer::fmt", file!(), line!(), "yellow %d"),
    CallSite::new("elogviewer::fmt", file!(), line!(), "orange %d"),
    CallSite::new("elogviewer::fmt", file!(), line!(), "red %d"),
];

struct ColorEvent {
    i: u64,
    color: usize,
}

impl Event for ColorEvent {
    fn site(&self) -> &'static CallSite {
        &COLOR_SITE
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.str(COLOR_NAMES[self.color]);
        enc.u64(self.i);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub events: usize,
    /// Seconds between events, or the maximum when `random` is set.
    pub delay: f64,
    pub random: bool,
    /// Log through the fixed-format one-argument path.
    pub fmt: bool,
}

/// Log `events` color events into `buffer`, cycling through the colors.
pub fn generate(buffer: &Buffer, opts: &GenerateOptions) {
    let mut rng = XorShift64::new(buffer.now());
    let start = Instant::now();
    for i in 0..opts.events as u64 {
        let color = (i % COLOR_NAMES.len() as u64) as usize;
        if opts.fmt {
            buffer.f1u(&FMT_SITES[color], i);
        } else {
            buffer.add(&ColorEvent { i, color });
        }
        if opts.delay > 0.0 {
            let d = if opts.random {
                rng.next_f64() * opts.delay
            } else {
                opts.delay
            };
            thread::sleep(Duration::from_secs_f64(d));
        }
    }
    tracing::info!(events = opts.events, elapsed = ?start.elapsed(), "events generated");
}
