//! # vnet-elog
//!
//! High-frequency structured event log.
//!
//! Producers write fixed-size events into a [`Buffer`] ring from any thread.
//! An event is a caller index, a nanosecond timestamp and a compact encoding
//! of a format string reference plus its arguments; nothing is formatted on
//! the write path. Readers take a [`View`] snapshot, which copies its own
//! string and caller tables and can then be windowed, filtered, printed,
//! exported as JSON lines, or saved and restored in another process.
//!
//! ```
//! use vnet_elog::{Buffer, elog};
//!
//! let log = Buffer::new(1024);
//! log.enable(true);
//! elog!(log, "rx %d packets on %s", 32u32, "eth0");
//! let view = log.new_view();
//! assert_eq!(view.event_lines(0), vec!["rx 32 packets on eth0"]);
//! ```

#![forbid(unsafe_code)]

pub mod buffer;
pub mod caller;
pub mod config;
pub mod dump;
pub mod encode;
pub mod error;
pub mod format;
pub mod persist;
pub mod print;
mod segvec;
pub mod strings;
pub mod view;

use std::sync::{Arc, OnceLock};

pub use buffer::{Buffer, BufferEvent, Event, EventHeader};
pub use caller::{CallSite, CallerIndex, CallerInfo, CallerRegistry};
pub use config::ElogConfig;
pub use dump::{DumpAction, dump, install_panic_hook, spawn_hangup_dumper};
pub use encode::{Arg, Encoder};
pub use error::{ElogError, Result};
pub use format::sprintf;
pub use print::EventRow;
pub use strings::{StringRef, StringTable};
pub use view::{Times, View};

/// Log a printf-style event to a [`Buffer`].
///
/// The call site is declared once as a static, so after the first event from
/// a site no lock is taken. Arguments are only evaluated when the buffer is
/// enabled.
#[macro_export]
macro_rules! elog {
    ($buf:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        static SITE: $crate::CallSite =
            $crate::CallSite::new(module_path!(), file!(), line!(), $fmt);
        let buf: &$crate::Buffer = &$buf;
        if buf.enabled() {
            buf.log(&SITE, &[$($crate::Arg::from($arg)),*]);
        }
    }};
}

static DEFAULT: OnceLock<Arc<Buffer>> = OnceLock::new();

/// The process-wide buffer, built from [`ElogConfig::from_env`] on first use.
pub fn default_buffer() -> &'static Arc<Buffer> {
    DEFAULT.get_or_init(|| Arc::new(Buffer::with_config(&ElogConfig::from_env())))
}

pub fn enable(on: bool) {
    default_buffer().enable(on);
}

#[must_use]
pub fn enabled() -> bool {
    default_buffer().enabled()
}

#[must_use]
pub fn new_view() -> View {
    default_buffer().new_view()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_logs_through_static_site() {
        let b = Buffer::new(16);
        b.enable(true);
        for i in 0..3u64 {
            elog!(b, "loop %d", i);
        }
        let v = b.new_view();
        assert_eq!(v.num_events(), 3);
        assert_eq!(v.event_caller(0).name, module_path!());
        assert_eq!(v.event_caller(0), v.event_caller(2));
        assert_eq!(v.event_lines(2), vec!["loop 2"]);
    }

    #[test]
    fn macro_skips_argument_evaluation_when_disabled() {
        let b = Arc::new(Buffer::new(4));
        let mut evaluated = false;
        elog!(b, "x %d", {
            evaluated = true;
            1u8
        });
        assert!(!evaluated);
        assert!(b.snapshot().is_empty());
    }

    #[test]
    fn typed_events_encode_through_trait() {
        struct Link {
            up: bool,
            port: u32,
        }
        static LINK: CallSite = CallSite::new("link", file!(), line!(), "port %d %s");
        impl Event for Link {
            fn site(&self) -> &'static CallSite {
                &LINK
            }
            fn encode(&self, enc: &mut Encoder<'_>) {
                enc.u64(u64::from(self.port));
                enc.str(if self.up { "up" } else { "down" });
            }
        }
        let b = Buffer::new(4);
        b.enable(true);
        b.add(&Link { up: true, port: 3 });
        assert_eq!(b.new_view().event_lines(0), vec!["port 3 up"]);
    }

    #[test]
    fn dynamic_formats_use_caller_location() {
        let b = Buffer::new(4);
        b.enable(true);
        let fmt = format!("dyn %s {}", 1);
        b.f(&fmt, &[Arg::Str("ok")]);
        let v = b.new_view();
        assert_eq!(v.event_lines(0), vec!["dyn ok 1"]);
        assert!(v.event_caller(0).file.ends_with("lib.rs"));
    }
}
