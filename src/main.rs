use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;

use caa_audit::aggregator::{read_journal, write_reports, Aggregator, ReportOptions, MAX_INTERNAL_ERRORS};
use caa_audit::cli::{Cli, Command};
use caa_audit::config::Credentials;
use caa_audit::progress::ProgressReporter;
use caa_audit::{client, logsink, pipeline};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "fatal error");
        eprintln!("caa-audit: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

/// The CLI boundary: every component error is a typed, opaque `caa_audit::Error`; here alone
/// we add `anyhow` context so the message printed to the user names what was being attempted.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Audit {
            input,
            output,
            concurrency,
            spam,
        } => {
            logsink::set_spam(spam);
            tokio::fs::create_dir_all(&output)
                .await
                .with_context(|| format!("creating output directory {}", output.display()))?;

            let credentials = Credentials::load_default().context("loading Internet Archive credentials from ~/.ia")?;
            let http_client = client::build_client(concurrency, &credentials).context("building HTTP client")?;

            let progress = ProgressReporter::new(count_tasks(&input).await.unwrap_or(0));
            let abort_signal = Arc::new(Notify::new());
            let aggregator = Arc::new(Aggregator::new(&output, Arc::clone(&abort_signal))?);

            let result = pipeline::run(
                &input,
                &output,
                concurrency,
                http_client,
                progress.clone(),
                Arc::clone(&aggregator),
                abort_signal,
            )
            .await;
            progress.finish();
            aggregator.finish().await.context("finalizing results journal")?;

            if aggregator.is_fatal() {
                return Err(caa_audit::Error::TooManyInternalErrors(MAX_INTERNAL_ERRORS).into());
            }
            result?;

            let (counters, rows) = read_journal(aggregator.journal_path())?;
            write_reports(&output, &counters, &rows, ReportOptions::default())?;
            Ok(())
        }
        Command::GenerateOutput {
            output,
            logs,
            no_logs,
            bad_items,
            no_bad_items,
            tables,
            no_tables,
        } => {
            let journal_path = output.join("results_cache.gz");
            let (counters, rows) = read_journal(&journal_path)?;
            let options = ReportOptions {
                logs: logs && !no_logs,
                bad_items: bad_items && !no_bad_items,
                tables: tables && !no_tables,
            };
            write_reports(&output, &counters, &rows, options)?;
            Ok(())
        }
    }
}

/// Best-effort line count of the input stream, used only to size the progress bar; an
/// inaccurate count degrades the bar's ETA, never correctness.
async fn count_tasks(input: &std::path::Path) -> Option<u64> {
    use tokio::io::AsyncBufReadExt;
    let file = tokio::fs::File::open(input).await.ok()?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut count: u64 = 0;
    while lines.next_line().await.ok()?.is_some() {
        count += 1;
    }
    Some(count.saturating_sub(1))
}
