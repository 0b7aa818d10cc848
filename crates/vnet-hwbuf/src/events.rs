//! Event-log records emitted by buffer pools.

use vnet_elog::{CallSite, Encoder, Event, StringRef};

use crate::trace::BufferState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEventKind {
    Alloc,
    Grow,
    Free,
}

impl PoolEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alloc => "alloc",
            Self::Grow => "grow",
            Self::Free => "free",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// `hw buf rx alloc 32, 608k alloc, 570k free`
    Pool {
        pool: StringRef,
        kind: PoolEventKind,
        n: u32,
        k_alloc: u32,
        k_free: u32,
    },
    /// `hw buf rx 0x1240 known-free -> known-allocated`
    State {
        pool: StringRef,
        offset: u32,
        old: BufferState,
        new: BufferState,
    },
}

static POOL_SITE: CallSite = CallSite::new(
    "vnet_hwbuf::pool",
    file!(),
    line!(),
    "hw buf %s %s %d, %dk alloc, %dk free",
);
static STATE_SITE: CallSite = CallSite::new("vnet_hwbuf::state", file!(), line!(), "hw buf %s 0x%x %s -> %s");

impl Event for PoolEvent {
    fn site(&self) -> &'static CallSite {
        match self {
            Self::Pool { .. } => &POOL_SITE,
            Self::State { .. } => &STATE_SITE,
        }
    }

    fn encode(&self, enc: &mut Encoder<'_>) {
        match *self {
            Self::Pool {
                pool,
                kind,
                n,
                k_alloc,
                k_free,
            } => {
                enc.string_ref(pool);
                enc.str(kind.as_str());
                enc.u64(u64::from(n));
                enc.u64(u64::from(k_alloc));
                enc.u64(u64::from(k_free));
            }
            Self::State { pool, offset, old, new } => {
                enc.string_ref(pool);
                enc.u64(u64::from(offset));
                enc.str(old.as_str());
                enc.str(new.as_str());
            }
        }
    }
}
