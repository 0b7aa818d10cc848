//! Event log configuration.
//!
//! Resolved from the environment by [`ElogConfig::from_env`]:
//! - `VNET_ELOG`: `on|enabled|1|true` enables logging at startup. Anything else,
//!   including unset, leaves it off.
//! - `VNET_ELOG_EVENTS`: ring capacity, rounded up to a power of two.
//! - `VNET_ELOG_SAVE`: file the panic and hang-up hooks save views to.

use std::path::PathBuf;

pub const DEFAULT_EVENTS: usize = 16 << 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElogConfig {
    pub enabled: bool,
    pub events: usize,
    pub save_file: Option<PathBuf>,
}

impl Default for ElogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            events: DEFAULT_EVENTS,
            save_file: None,
        }
    }
}

/// Parse an on/off switch (case-insensitive). Unknown values read as off.
#[must_use]
pub fn parse_switch_loose(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "on" | "enabled" | "enable" | "1" | "true" | "yes"
    )
}

fn parse_events(s: &str) -> Option<usize> {
    s.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

impl ElogConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Resolve from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut c = Self::default();
        if let Some(v) = lookup("VNET_ELOG") {
            c.enabled = parse_switch_loose(&v);
        }
        if let Some(n) = lookup("VNET_ELOG_EVENTS").as_deref().and_then(parse_events) {
            c.events = n;
        }
        c.save_file = lookup("VNET_ELOG_SAVE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        c
    }

    /// Ring capacity actually used: `events` rounded up to a power of two.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.events.max(1).next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let c = ElogConfig::from_lookup(|_| None);
        assert_eq!(c, ElogConfig::default());
        assert_eq!(c.capacity(), 16384);
    }

    #[test]
    fn switch_is_case_insensitive() {
        assert!(parse_switch_loose("ON"));
        assert!(parse_switch_loose(" Enabled "));
        assert!(!parse_switch_loose("off"));
        assert!(!parse_switch_loose("bogus"));
    }

    #[test]
    fn events_round_up() {
        let c = ElogConfig::from_lookup(lookup(&[
            ("VNET_ELOG", "1"),
            ("VNET_ELOG_EVENTS", "1000"),
            ("VNET_ELOG_SAVE", "/tmp/elog.view"),
        ]));
        assert!(c.enabled);
        assert_eq!(c.events, 1000);
        assert_eq!(c.capacity(), 1024);
        assert_eq!(c.save_file.as_deref(), Some(std::path::Path::new("/tmp/elog.view")));
    }

    #[test]
    fn bad_event_count_keeps_default() {
        let c = ElogConfig::from_lookup(lookup(&[("VNET_ELOG_EVENTS", "lots")]));
        assert_eq!(c.events, DEFAULT_EVENTS);
        let c = ElogConfig::from_lookup(lookup(&[("VNET_ELOG_EVENTS", "0")]));
        assert_eq!(c.events, DEFAULT_EVENTS);
    }
}
