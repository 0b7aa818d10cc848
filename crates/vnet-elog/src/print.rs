//! Tabular and JSON rendering of views.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::view::View;

/// One event as exported to JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    /// Seconds since the view origin.
    pub time: f64,
    /// Seconds since the previous exported event.
    pub delta: f64,
    pub caller: String,
    pub lines: Vec<String>,
}

/// `HH:MM:SS.nnnnnnnnn` (UTC) for nanoseconds since the Unix epoch.
#[must_use]
pub fn time_of_day(unix_ns: u64) -> String {
    let secs = unix_ns / 1_000_000_000;
    let ns = unix_ns % 1_000_000_000;
    let day = secs % 86_400;
    format!(
        "{:02}:{:02}:{:02}.{ns:09}",
        day / 3600,
        (day / 60) % 60,
        day % 60
    )
}

fn write_row(w: &mut dyn Write, widths: &[usize], cells: &[&str]) -> io::Result<()> {
    let mut line = String::new();
    for (c, cell) in cells.iter().enumerate() {
        if c > 0 {
            line.push_str("  ");
        }
        line.push_str(cell);
        line.extend(std::iter::repeat_n(' ', widths[c].saturating_sub(cell.chars().count())));
    }
    writeln!(w, "{}", line.trim_end())
}

fn write_table(w: &mut dyn Write, header: &[&str], rows: &[Vec<String>]) -> io::Result<()> {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (c, cell) in row.iter().enumerate() {
            widths[c] = widths[c].max(cell.chars().count());
        }
    }
    write_row(w, &widths, header)?;
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        write_row(w, &widths, &cells)?;
    }
    Ok(())
}

impl View {
    fn selected(&self, events: Option<&[usize]>) -> Vec<usize> {
        match events {
            Some(es) => es.iter().copied().filter(|&i| i < self.num_events()).collect(),
            None => (0..self.num_events()).collect(),
        }
    }

    /// Rows for the given events (all of the current window when `None`).
    #[must_use]
    pub fn rows(&self, events: Option<&[usize]>) -> Vec<EventRow> {
        let mut last: Option<f64> = None;
        self.selected(events)
            .into_iter()
            .map(|i| {
                let time = self.elapsed_time(i);
                let delta = last.map_or(0.0, |t| time - t);
                last = Some(time);
                EventRow {
                    time,
                    delta,
                    caller: self.event_caller(i).name.clone(),
                    lines: self.event_lines(i),
                }
            })
            .collect()
    }

    fn print_selected(&self, w: &mut dyn Write, events: Option<&[usize]>, verbose: bool) -> io::Result<()> {
        let header: &[&str] = if verbose {
            &["Time", "Data", "Delta", "Path"]
        } else {
            &["Time", "Data"]
        };
        let mut table = Vec::new();
        for (row, i) in self.rows(events).into_iter().zip(self.selected(events)) {
            let mut first = true;
            for line in row.lines.iter().filter(|l| !l.is_empty()) {
                let mut cells = if first {
                    vec![time_of_day(self.event_unix_ns(i)), line.clone()]
                } else {
                    vec![String::new(), format!("  {line}")]
                };
                if verbose {
                    if first {
                        cells.push(format!("{:8.6}", row.delta));
                        cells.push(row.caller.clone());
                    } else {
                        cells.extend([String::new(), String::new()]);
                    }
                }
                first = false;
                table.push(cells);
            }
        }
        write_table(w, header, &table)
    }

    /// Print every event in the current window.
    pub fn print(&self, w: &mut dyn Write, verbose: bool) -> io::Result<()> {
        self.print_selected(w, None, verbose)
    }

    /// Print only `events` (indices into the current window, e.g. from
    /// [`events_matching`](View::events_matching)).
    pub fn print_events(&self, w: &mut dyn Write, events: &[usize], verbose: bool) -> io::Result<()> {
        self.print_selected(w, Some(events), verbose)
    }

    /// Write one JSON object per event, one per line.
    pub fn export_json(&self, w: &mut dyn Write) -> Result<()> {
        for row in self.rows(None) {
            serde_json::to_writer(&mut *w, &row)?;
            w.write_all(b"\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::caller::CallSite;
    use crate::encode::Arg;

    static SITE: CallSite = CallSite::new("print::tests", file!(), line!(), "hello %s");
    static MULTI: CallSite = CallSite::new("print::multi", file!(), line!(), "a\nb");

    fn sample() -> View {
        let b = Buffer::new(8);
        b.enable(true);
        b.add_with_timestamp(&SITE, 1_000, &[Arg::Str("world")]);
        b.add_with_timestamp(&MULTI, 3_000, &[]);
        b.new_view()
    }

    #[test]
    fn time_of_day_formats_utc() {
        assert_eq!(time_of_day(0), "00:00:00.000000000");
        assert_eq!(time_of_day((3600 + 61) * 1_000_000_000 + 5), "01:01:01.000000005");
    }

    #[test]
    fn print_indents_continuation_lines() {
        let mut out = Vec::new();
        sample().print(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Time"));
        assert!(lines[1].ends_with("hello world"));
        assert!(lines[2].ends_with("a"));
        assert!(lines[3].trim_start().starts_with('b'));
        assert!(lines[3].ends_with("  b"));
    }

    #[test]
    fn verbose_adds_delta_and_path() {
        let mut out = Vec::new();
        sample().print(&mut out, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().next().unwrap().contains("Delta"));
        assert!(text.contains("print::tests"));
        assert!(text.contains("0.000002"));
    }

    #[test]
    fn print_events_filters() {
        let v = sample();
        let mut out = Vec::new();
        v.print_events(&mut out, &[1, 99], false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("hello"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn json_lines_parse_back() {
        let mut out = Vec::new();
        sample().export_json(&mut out).unwrap();
        let rows: Vec<EventRow> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lines, vec!["hello world"]);
        assert_eq!(rows[0].delta, 0.0);
        assert!((rows[1].delta - 2e-6).abs() < 1e-12);
        assert_eq!(rows[1].caller, "print::multi");
    }
}
