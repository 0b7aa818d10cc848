//! Error type for view filtering and persistence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElogError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not an event log file (magic {found:02x?})")]
    BadMagic { found: [u8; 4] },
    #[error("unsupported event log version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated event log: {what}")]
    Truncated { what: &'static str },
    #[error("event log checksum mismatch")]
    ChecksumMismatch,
    #[error("string index {index} out of range ({len} strings)")]
    StringOutOfRange { index: u32, len: usize },
    #[error("caller index {index} out of range ({len} callers)")]
    CallerOutOfRange { index: u32, len: usize },
    #[error("event data {lo}..{hi} out of range ({len} bytes)")]
    EventOutOfRange { lo: u64, hi: u64, len: usize },
    #[error("invalid utf-8 in {what}")]
    Utf8 { what: &'static str },
}

pub type Result<T, E = ElogError> = std::result::Result<T, E>;
