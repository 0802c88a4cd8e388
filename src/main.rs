use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dupe_clone::cli::{early_exit_message, resolve, Opts};
use dupe_clone::clone_os::DefaultClonePrimitive;
use dupe_clone::format::format_bytes;
use dupe_clone::listener::{IndicatifListener, ScanListener, SilentListener};
use dupe_clone::orchestrator::run;
use dupe_clone::walk::StdFileWalker;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() {
    let opts = Opts::parse();

    if let Some(message) = early_exit_message(&opts) {
        println!("{message}");
        std::process::exit(1);
    }

    match run_resolved(opts) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("dupe-clone: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Everything past argument parsing lives behind `anyhow` so every failure mode — bad flags,
/// a bad starting path, or a fatal pipeline error — gets uniform top-level formatting and the
/// same exit(1), matching §6's "exit codes: 0 on success, 1 on invalid usage or startup
/// failure" rule without duplicating the message/exit logic at each call site.
fn run_resolved(opts: Opts) -> anyhow::Result<()> {
    let resolved = resolve(opts).context("invalid usage")?;
    init_logging(resolved.verbose);

    let use_progress = !resolved.no_progress && atty_stdout();
    let mut listener: Box<dyn ScanListener> = if use_progress {
        Box::new(IndicatifListener::new(resolved.verbose > 0))
    } else {
        Box::new(SilentListener)
    };

    let walker = StdFileWalker::new();
    let clone_os = Arc::new(DefaultClonePrimitive::new());

    let report = run(&resolved.config, &walker, clone_os, listener.as_mut()).context("scan failed")?;

    #[cfg(feature = "json")]
    if resolved.json {
        let summary = report.metrics.summary();
        println!("{}", serde_json::to_string(&summary).context("could not serialize summary")?);
        return Ok(());
    }

    println!("duplicates found: {}", report.metrics.duplicates_found());
    println!("bytes saved: {}", format_bytes(report.metrics.bytes_saved(), resolved.human_readable));
    println!("already saved: {}", format_bytes(report.metrics.bytes_already_saved(), resolved.human_readable));
    Ok(())
}

fn atty_stdout() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::isatty(libc::STDOUT_FILENO) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
