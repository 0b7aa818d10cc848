//! Process hooks that dump the event log: on `SIGHUP` and on panic.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use signal_hook::consts::SIGHUP;
use signal_hook::iterator::Signals;

use crate::buffer::Buffer;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpAction {
    /// Print a view to stdout.
    Print { verbose: bool },
    /// Save a view to a file.
    Save(PathBuf),
}

/// Snapshot `buffer` and carry out `action` once.
pub fn dump(buffer: &Buffer, action: &DumpAction) -> Result<()> {
    let view = buffer.new_view();
    match action {
        DumpAction::Print { verbose } => {
            let stdout = io::stdout();
            view.print(&mut stdout.lock(), *verbose)?;
        }
        DumpAction::Save(path) => view.save_file(path)?,
    }
    Ok(())
}

/// Spawn a thread that dumps `buffer` every time the process receives `SIGHUP`.
///
/// A failed dump is logged and the thread keeps waiting. `DumpAction::Save`
/// also becomes the buffer's panic save file.
pub fn spawn_hangup_dumper(buffer: Arc<Buffer>, action: DumpAction) -> io::Result<JoinHandle<()>> {
    if let DumpAction::Save(path) = &action {
        buffer.set_panic_save_file(Some(path.clone()));
    }
    let mut signals = Signals::new([SIGHUP])?;
    thread::Builder::new()
        .name("elog-hangup".to_owned())
        .spawn(move || {
            for _ in signals.forever() {
                match dump(&buffer, &action) {
                    Ok(()) => tracing::debug!(?action, "event log dumped on hangup"),
                    Err(e) => tracing::warn!(?action, error = %e, "event log dump on hangup failed"),
                }
            }
        })
}

/// Chain a panic hook that records the panic in `buffer` (see [`Buffer::panic`])
/// before running the previous hook.
pub fn install_panic_hook(buffer: Arc<Buffer>) {
    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("unknown panic");
        match info.location() {
            Some(loc) => buffer.panic(&format!("{msg} at {}:{}", loc.file(), loc.line())),
            None => buffer.panic(msg),
        }
        prev(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::View;
    use crate::caller::CallSite;

    static SITE: CallSite = CallSite::new("dump::tests", file!(), line!(), "dump %d");

    #[test]
    fn save_action_writes_restorable_file() {
        let b = Buffer::new(8);
        b.enable(true);
        b.f1u(&SITE, 11);
        let path = std::env::temp_dir().join(format!("vnet-elog-dump-{}.view", std::process::id()));
        dump(&b, &DumpAction::Save(path.clone())).unwrap();
        let v = View::restore_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(v.event_lines(0), vec!["dump 11"]);
    }

    #[test]
    fn save_to_missing_directory_errors() {
        let b = Buffer::new(8);
        let path = PathBuf::from("/nonexistent-dir-for-elog/x.view");
        assert!(dump(&b, &DumpAction::Save(path)).is_err());
    }
}
