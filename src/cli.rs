//! Command-line surface: a thin `clap`-derived wrapper around the two entry points the
//! system exposes — running a full audit, and regenerating reports from an existing journal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "caa-audit", about = "Audits archived cover-art items against the MusicBrainz catalog")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the full audit pipeline against an input JSONL stream.
    Audit {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 50)]
        concurrency: usize,
        /// Mirror every log record to stderr, not just non-task-scoped ones.
        #[arg(long)]
        spam: bool,
    },
    /// Regenerates logs/CSV/tables from an existing `results_cache.gz` without re-auditing.
    GenerateOutput {
        output: PathBuf,
        #[arg(long, overrides_with = "no_logs", default_value_t = true)]
        logs: bool,
        #[arg(long = "no-logs", overrides_with = "logs")]
        no_logs: bool,
        #[arg(long, overrides_with = "no_bad_items", default_value_t = true)]
        bad_items: bool,
        #[arg(long = "no-bad-items", overrides_with = "bad_items")]
        no_bad_items: bool,
        #[arg(long, overrides_with = "no_tables", default_value_t = true)]
        tables: bool,
        #[arg(long = "no-tables", overrides_with = "tables")]
        no_tables: bool,
    },
}
