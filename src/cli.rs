//! Command-line front-end (C11): parses argv into a [`RunConfig`], validating the
//! mutually-exclusive and out-of-range cases that the flag table of §6 calls out as
//! `UsageError`s rather than letting `clap` reject them silently differently.

use std::path::PathBuf;

use clap::{CommandFactory, Parser};

use crate::error::UsageError;
use crate::orchestrator::RunConfig;
use crate::replace::ReplaceMode;

// Both -h and -V are claimed by flags the original tool defines itself (human-readable
// output, and a quirky "print version, exit 1" rather than clap's usual exit 0), so the
// generated help/version flags are turned off and reimplemented by hand below.
#[derive(Debug, Parser)]
#[command(
    name = "dupe-clone",
    about = "Replace duplicate files with clones, hardlinks, or symlinks",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Opts {
    /// Do not mutate; print intended actions
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Replace via hardlink instead of a CoW clone
    #[arg(short = 'l', long)]
    pub link: bool,

    /// Replace via symlink instead of a CoW clone
    #[arg(short = 's', long)]
    pub symlink: bool,

    /// Worker count; 0 runs the pipeline synchronously on the calling thread
    #[arg(short = 't', long, allow_hyphen_values = true, default_value_t = default_thread_count())]
    pub threads: i64,

    /// Do not cross device boundaries while walking
    #[arg(short = 'x', long)]
    pub one_file_system: bool,

    /// Max recursion depth below each starting path
    #[arg(short = 'd', long, default_value_t = u16::MAX)]
    pub depth: u16,

    /// Suppress progress output
    #[arg(short = 'P', long)]
    pub no_progress: bool,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Render byte counts with SI-like unit suffixes
    #[arg(short = 'h')]
    pub human_readable: bool,

    /// Allow replacing a file with nlink > 1 (overrides the hardlink skip condition)
    #[arg(long)]
    pub force: bool,

    /// Print the final summary as JSON instead of plain text
    #[cfg(feature = "json")]
    #[arg(long)]
    pub json: bool,

    /// Print usage and exit
    #[arg(short = '?', long = "help")]
    pub help: bool,

    /// Print version and exit
    #[arg(short = 'V', long = "version")]
    pub version: bool,

    /// Starting paths; defaults to the current directory
    pub paths: Vec<PathBuf>,
}

fn default_thread_count() -> i64 {
    std::thread::available_parallelism().map(|n| n.get() as i64).unwrap_or(1)
}

/// `-?`/`--help` and `-V`/`--version` both print and stop, matching the original tool's
/// convention of treating either as an early exit with status 1 rather than clap's usual 0 —
/// neither produced a completed run, so neither counts as success.
pub fn early_exit_message(opts: &Opts) -> Option<String> {
    if opts.help {
        Some(Opts::command().render_long_help().to_string())
    } else if opts.version {
        Some(format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
    } else {
        None
    }
}

pub struct ResolvedRun {
    pub config: RunConfig,
    pub human_readable: bool,
    pub no_progress: bool,
    pub verbose: u8,
    #[cfg(feature = "json")]
    pub json: bool,
}

/// Validates flag combinations the derive macro can't express on its own and turns the parsed
/// [`Opts`] into a [`RunConfig`] ready for the orchestrator.
pub fn resolve(opts: Opts) -> Result<ResolvedRun, UsageError> {
    if opts.link && opts.symlink {
        return Err(UsageError::ConflictingReplaceModes);
    }
    if opts.threads < 0 {
        return Err(UsageError::NegativeThreads(opts.threads));
    }

    let mode = if opts.link {
        ReplaceMode::Hardlink
    } else if opts.symlink {
        ReplaceMode::Symlink
    } else {
        ReplaceMode::Clone
    };

    let roots = if opts.paths.is_empty() { vec![PathBuf::from(".")] } else { opts.paths };
    for path in &roots {
        std::fs::metadata(path).map_err(|source| UsageError::BadPath { path: path.clone(), source })?;
    }

    let config = RunConfig {
        roots,
        mode,
        dry_run: opts.dry_run,
        force: opts.force,
        threads: opts.threads as usize,
        one_file_system: opts.one_file_system,
        max_depth: opts.depth,
    };

    Ok(ResolvedRun {
        config,
        human_readable: opts.human_readable,
        no_progress: opts.no_progress,
        verbose: opts.verbose,
        #[cfg(feature = "json")]
        json: opts.json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        let mut full = vec!["dupe-clone"];
        full.extend_from_slice(args);
        Opts::parse_from(full)
    }

    #[test]
    fn link_and_symlink_together_is_a_usage_error() {
        let opts = parse(&["-l", "-s"]);
        assert!(matches!(resolve(opts), Err(UsageError::ConflictingReplaceModes)));
    }

    #[test]
    fn negative_thread_count_is_a_usage_error() {
        let opts = parse(&["-t", "-3"]);
        assert!(matches!(resolve(opts), Err(UsageError::NegativeThreads(-3))));
    }

    #[test]
    fn default_path_is_current_directory() {
        let opts = parse(&[]);
        let resolved = resolve(opts).unwrap();
        assert_eq!(resolved.config.roots, vec![PathBuf::from(".")]);
    }

    #[test]
    fn missing_path_is_a_usage_error() {
        let opts = parse(&["/does/not/exist/anywhere"]);
        assert!(matches!(resolve(opts), Err(UsageError::BadPath { .. })));
    }
}
