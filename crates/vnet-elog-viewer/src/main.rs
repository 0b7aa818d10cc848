//! `elogviewer`: generate or load an event log view, then window, filter,
//! save or print it.

mod generate;
mod pool_demo;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use vnet_elog::{Buffer, ElogConfig, View};
use vnet_hwbuf::BufferMain;

use crate::generate::{GenerateOptions, generate};
use crate::pool_demo::PoolDemoOptions;

/// Event log viewer.
#[derive(Debug, Parser)]
#[command(name = "elogviewer")]
#[command(about = "Generate, load, filter and dump vnet event logs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Saved view to load (same as --load).
    file: Option<PathBuf>,
    /// Saved view to load instead of generating events.
    #[arg(long)]
    load: Option<PathBuf>,

    /// Number of test events to add.
    #[arg(long, default_value_t = 10)]
    events: usize,
    /// Delay in seconds between events, or the maximum with --random.
    #[arg(long, default_value_t = 0.0)]
    delay: f64,
    /// Randomize delays.
    #[arg(long)]
    random: bool,
    /// Log through the fixed-format one-argument path.
    #[arg(long)]
    fmt: bool,

    /// Keep only events between T0 and T1 seconds.
    #[arg(long, num_args = 2, value_names = ["T0", "T1"], allow_negative_numbers = true)]
    window: Option<Vec<f64>>,
    /// Save the view to a file.
    #[arg(long)]
    save: Option<PathBuf>,
    /// Print the view as a table.
    #[arg(long)]
    dump: bool,
    /// Print only events whose caller matches this regex.
    #[arg(long)]
    matching: Option<String>,
    /// Print the view as JSON lines.
    #[arg(long)]
    json: bool,
    /// Add delta and caller columns; debug-level diagnostics.
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Exercise buffer pools and view the events they log.
    PoolDemo {
        #[arg(long, default_value_t = 2)]
        pools: usize,
        #[arg(long, default_value_t = 4)]
        rounds: usize,
        /// Refs allocated per pool per round.
        #[arg(long, default_value_t = 64)]
        burst: usize,
        /// Payload bytes per buffer.
        #[arg(long, default_value_t = 1000)]
        size: usize,
        /// Segments per chained packet.
        #[arg(long, default_value_t = 3)]
        segments: usize,
    },
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .init();
}

fn log_buffer(events: usize) -> Arc<Buffer> {
    let mut config = ElogConfig::from_env();
    config.events = config.events.max(events);
    let buffer = Arc::new(Buffer::with_config(&config));
    buffer.enable(true);
    vnet_elog::install_panic_hook(Arc::clone(&buffer));
    buffer
}

fn make_view(cli: &Cli) -> Result<View, Box<dyn std::error::Error>> {
    if let Some(Command::PoolDemo {
        pools,
        rounds,
        burst,
        size,
        segments,
    }) = cli.command
    {
        let buffer = log_buffer(0);
        let main = BufferMain::from_env(Arc::clone(&buffer));
        let opts = PoolDemoOptions {
            pools,
            rounds,
            burst,
            size,
            segments,
        };
        let report = pool_demo::run(&main, &opts)?;
        tracing::info!(
            allocated = report.allocated,
            packets = report.packets,
            bytes = report.bytes,
            "pool demo report"
        );
        return Ok(buffer.new_view());
    }
    if let Some(path) = cli.load.as_ref().or(cli.file.as_ref()) {
        let view = View::restore_file(path)?;
        tracing::info!(path = %path.display(), events = view.num_events(), "view loaded");
        return Ok(view);
    }
    let buffer = log_buffer(cli.events);
    generate(
        &buffer,
        &GenerateOptions {
            events: cli.events,
            delay: cli.delay,
            random: cli.random,
            fmt: cli.fmt,
        },
    );
    Ok(buffer.new_view())
}

fn summary(view: &View, out: &mut dyn Write) -> io::Result<()> {
    let name = if view.name().is_empty() { "-" } else { view.name() };
    writeln!(out, "view {name}: {} of {} events", view.num_events(), view.num_all_events())?;
    if view.num_events() > 0 {
        let t = view.times();
        writeln!(
            out,
            "window {:.3} to {:.3} {} ({:.9}s)",
            t.min_elapsed / t.unit,
            t.max_elapsed / t.unit,
            t.unit_name,
            view.elapsed_time(view.num_events() - 1) - view.elapsed_time(0)
        )?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut view = make_view(&cli)?;
    if let Some(w) = &cli.window {
        let n = view.sub_view(w[0], w[1]);
        tracing::debug!(t0 = w[0], t1 = w[1], events = n, "view windowed");
    }
    if let Some(path) = &cli.save {
        view.set_name(path.display().to_string());
        view.save_file(path)?;
        tracing::info!(path = %path.display(), events = view.num_events(), "view saved");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        view.export_json(&mut out)?;
    } else if let Some(pattern) = &cli.matching {
        let events = view.events_matching(pattern)?;
        view.print_events(&mut out, &events, cli.verbose)?;
    } else if cli.dump {
        view.print(&mut out, cli.verbose)?;
    } else {
        summary(&view, &mut out)?;
    }
    out.flush()?;
    Ok(())
}
