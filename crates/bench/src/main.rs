/*
 * SPDX-FileCopyrightText: 2025 imap-bench Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use imap_bench::config::{self, Config};
use imap_bench::report::{ResultWriter, RunSummary};

/// Concurrent load generator for IMAP-style mail servers.
#[derive(Parser, Debug)]
#[command(name = "imap-bench", version, about)]
struct Args {
    /// Benchmark configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "bench.toml")]
    config: PathBuf,

    /// Credential file, one `user:{plain}password` per line.
    #[arg(short, long, value_name = "FILE", default_value = "userdb.passwd")]
    userdb: PathBuf,

    /// Directory receiving the per-run result stream.
    #[arg(long, value_name = "DIR", default_value = "results")]
    results: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()).await {
        Ok(summary) if summary.failed == 0 => ExitCode::SUCCESS,
        Ok(summary) => {
            error!(failed = summary.failed, "run finished with failed sessions");
            ExitCode::FAILURE
        }
        Err(error) => {
            error!(error = %format!("{error:#}"), "benchmark aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<RunSummary> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    let credentials = config::load_credentials(&args.userdb)
        .with_context(|| format!("loading credentials from {}", args.userdb.display()))?;

    let started = Utc::now();
    let (path, file) = config::create_results_file(&args.results, started)?;
    info!(
        server = %config.server.addr,
        threads = config.settings.threads,
        sessions = config.settings.sessions,
        results = %path.display(),
        "starting benchmark"
    );

    let mut writer = ResultWriter::new(file, &config)?;
    let summary = imap_bench::run(&config, &credentials, &mut writer).await?;

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        elapsed = %format!("{:.2}s", (Utc::now() - started).num_milliseconds() as f64 / 1000.0),
        "benchmark finished"
    );
    Ok(summary)
}
