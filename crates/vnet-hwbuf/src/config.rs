//! Heap DMA arena configuration.
//!
//! Resolved from the environment by [`HeapDmaConfig::from_env`]:
//! - `VNET_DMA_MAX_BYTES`: arena budget. Decimal or `0x` hex, with an optional
//!   `k`, `m` or `g` suffix (binary units).
//! - `VNET_DMA_PHYS_BASE`: physical address reported for offset 0.
//!
//! Unparseable values keep the defaults.

pub const DEFAULT_MAX_BYTES: usize = 256 << 20;
pub const DEFAULT_PHYS_BASE: u64 = 0x1_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDmaConfig {
    pub max_bytes: usize,
    pub phys_base: u64,
}

impl Default for HeapDmaConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            phys_base: DEFAULT_PHYS_BASE,
        }
    }
}

/// Parse `4096`, `0x1000`, `64k`, `256M` or `1g`. Case-insensitive.
#[must_use]
pub fn parse_size_loose(s: &str) -> Option<u64> {
    let s = s.trim().to_ascii_lowercase();
    let (digits, shift) = match s.as_bytes().last()? {
        b'k' => (&s[..s.len() - 1], 10),
        b'm' => (&s[..s.len() - 1], 20),
        b'g' => (&s[..s.len() - 1], 30),
        _ => (s.as_str(), 0),
    };
    let n = match digits.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    n.checked_mul(1u64 << shift)
}

impl HeapDmaConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut c = Self::default();
        if let Some(n) = lookup("VNET_DMA_MAX_BYTES")
            .as_deref()
            .and_then(parse_size_loose)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n > 0)
        {
            c.max_bytes = n;
        }
        if let Some(b) = lookup("VNET_DMA_PHYS_BASE").as_deref().and_then(parse_size_loose) {
            c.phys_base = b;
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_parse_loosely() {
        assert_eq!(parse_size_loose("4096"), Some(4096));
        assert_eq!(parse_size_loose("0x1000"), Some(4096));
        assert_eq!(parse_size_loose(" 64K "), Some(64 << 10));
        assert_eq!(parse_size_loose("256m"), Some(256 << 20));
        assert_eq!(parse_size_loose("1G"), Some(1 << 30));
        assert_eq!(parse_size_loose(""), None);
        assert_eq!(parse_size_loose("lots"), None);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let c = HeapDmaConfig::from_lookup(|k| match k {
            "VNET_DMA_MAX_BYTES" => Some("16m".to_owned()),
            "VNET_DMA_PHYS_BASE" => Some("0x8000_0000".to_owned()),
            _ => None,
        });
        assert_eq!(c.max_bytes, 16 << 20);
        // Underscores are not accepted; the default stays.
        assert_eq!(c.phys_base, DEFAULT_PHYS_BASE);

        let c = HeapDmaConfig::from_lookup(|k| (k == "VNET_DMA_PHYS_BASE").then(|| "0x80000000".to_owned()));
        assert_eq!(c.phys_base, 0x8000_0000);
        assert_eq!(c.max_bytes, DEFAULT_MAX_BYTES);
    }

    #[test]
    fn zero_budget_is_ignored() {
        let c = HeapDmaConfig::from_lookup(|_| Some("0".to_owned()));
        assert_eq!(c.max_bytes, DEFAULT_MAX_BYTES);
        assert_eq!(c.phys_base, 0);
    }
}
