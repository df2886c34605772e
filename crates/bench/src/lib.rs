/*
 * SPDX-FileCopyrightText: 2025 imap-bench Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

/*!
 * Load generator for IMAP-style mail servers.
 *
 * The harness synthesizes protocol-legal command sequences against a
 * virtual mailbox model (`session`), replays them over concurrent
 * connections with per-command latency measurement (`client`, `worker`)
 * and streams one timing record per session into a JSON result sink
 * (`report`).
 */

pub mod client;
pub mod config;
pub mod datagen;
pub mod report;
pub mod session;
pub mod worker;

use std::io::Write;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, Mutex};

use crate::config::{Config, Credential};
use crate::report::{ResultWriter, RunSummary, SessionResult};
use crate::worker::SessionJob;

/// Errors surfaced by the harness.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad generator parameters or an empty credential set. Detected
    /// before any I/O and surfaced to the caller synchronously.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection establishment, socket or sink I/O failure, including
    /// expired read/write deadlines. Fails the current job.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The server response violated the expected continuation or tag
    /// contract. Fails the current job.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected the login exchange.
    #[error("authentication failed: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runs the full benchmark: spawns `Settings.Threads` workers, dispatches
/// `Settings.Sessions` generated sessions and collects one result per
/// dispatched job into `writer`.
///
/// Session generation is driven by a random source seeded from
/// `Settings.Seed`, so two runs with the same configuration and credential
/// set produce identical command sequences.
pub async fn run<W: Write>(
    config: &Config,
    credentials: &[Credential],
    writer: &mut ResultWriter<W>,
) -> Result<RunSummary> {
    config.validate()?;

    let sessions = config.settings.sessions;
    let (job_tx, job_rx) = mpsc::channel::<SessionJob>(sessions.max(1));
    let (result_tx, mut result_rx) = mpsc::channel::<SessionResult>(sessions.max(1));
    let job_rx = Arc::new(Mutex::new(job_rx));

    let mut workers = Vec::with_capacity(config.settings.threads);
    for id in 1..=config.settings.threads {
        let jobs = Arc::clone(&job_rx);
        let results = result_tx.clone();
        let server = config.server.clone();
        workers.push(tokio::spawn(worker::run_worker(id, server, jobs, results)));
    }
    // Workers hold their own clones; the collector loop must observe the
    // channel closing once the last worker is done.
    drop(result_tx);

    let mut rng = StdRng::seed_from_u64(config.settings.seed);
    worker::run_dispatcher(
        sessions,
        credentials,
        config.session.min_length,
        config.session.max_length,
        config.settings.throttle,
        job_tx,
        &mut rng,
    )
    .await?;

    let summary = report::collect(&mut result_rx, sessions, writer).await?;

    for handle in workers {
        // Both queues are drained by now; join only to surface panics.
        let _ = handle.await;
    }

    Ok(summary)
}
