/*
 * SPDX-FileCopyrightText: 2025 imap-bench Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

/*!
 * Worker pool and dispatcher.
 *
 * The dispatcher pairs each generated session with a randomly chosen
 * credential and enqueues it on the bounded job queue. Workers pull jobs,
 * open one fresh connection per job, replay the commands in order and
 * report a result per job — failures included, so the collector always
 * receives as many results as jobs were dispatched.
 */

use std::io;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::client::ImapConnection;
use crate::config::{Credential, Server};
use crate::datagen;
use crate::report::{CommandTiming, SessionResult, TimingRecord};
use crate::session::{self, Command};
use crate::{Error, Result};

/// One generated session, consumed by exactly one worker. Read-only once
/// created.
#[derive(Debug, Clone)]
pub struct SessionJob {
    pub credential: Credential,
    pub session_id: usize,
    pub commands: Vec<Command>,
}

/// Generates `count` session jobs and enqueues them, assigning session
/// IDs from 1 and pausing `throttle_ms` between jobs when nonzero. The
/// queue closes when the sender is dropped on return.
pub async fn run_dispatcher<R: Rng + ?Sized>(
    count: usize,
    credentials: &[Credential],
    min_length: usize,
    max_length: usize,
    throttle_ms: u64,
    jobs: Sender<SessionJob>,
    rng: &mut R,
) -> Result<()> {
    if credentials.is_empty() {
        return Err(Error::InvalidArgument("credential set is empty".into()));
    }

    for session_id in 1..=count {
        let credential = credentials[rng.gen_range(0..credentials.len())].clone();
        let commands = session::generate(min_length, max_length, rng)?;
        let job = SessionJob { credential, session_id, commands };
        if jobs.send(job).await.is_err() {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "job queue closed before dispatch finished",
            )));
        }
        if throttle_ms > 0 {
            sleep(Duration::from_millis(throttle_ms)).await;
        }
    }

    info!(sessions = count, "generated sessions");
    Ok(())
}

/// Worker loop: pulls jobs until the queue closes. A failed job is
/// reported through the result channel and the worker moves on to the
/// next one.
pub async fn run_worker(
    id: usize,
    server: Server,
    jobs: Arc<Mutex<Receiver<SessionJob>>>,
    results: Sender<SessionResult>,
) {
    loop {
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else { break };

        debug!(
            worker = id,
            session = job.session_id,
            commands = job.commands.len(),
            "starting session"
        );

        let outcome = run_session(id, &server, &job).await;
        if let Err(ref reason) = outcome {
            // A broken protocol stream cannot be resynchronized; the
            // connection is dropped with the job.
            error!(worker = id, session = job.session_id, %reason, "session failed");
        }

        let result = SessionResult {
            session_id: job.session_id,
            user: job.credential.username.clone(),
            outcome: outcome.map_err(|e| e.to_string()),
        };
        if results.send(result).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "worker finished");
}

/// Replays one job over a fresh connection: authenticate, execute every
/// command in order, terminate. Connections are never reused across jobs.
async fn run_session(worker_id: usize, server: &Server, job: &SessionJob) -> Result<TimingRecord> {
    let mut conn = ImapConnection::connect(&server.addr, server.tls).await?;
    conn.authenticate(&job.credential.username, &job.credential.password, worker_id)
        .await?;

    let mut commands = Vec::with_capacity(job.commands.len());
    for (index, command) in job.commands.iter().enumerate() {
        let tag = format!("{worker_id}X{index}");
        let text = wire_form(command, worker_id, &tag);
        let issued = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let elapsed = match command {
            Command::Append { body, .. } => conn.execute_with_literal(&text, &tag, body).await?,
            _ => conn.execute(&text, &tag).await?,
        };

        commands.push(CommandTiming(issued, command.name().to_string(), elapsed));
    }

    conn.terminate(worker_id).await?;

    Ok(TimingRecord {
        session_id: job.session_id,
        user: job.credential.username.clone(),
        password: job.credential.password.clone(),
        commands,
    })
}

/// Wire form of a command. Generated folder names are prefixed with the
/// worker identifier so concurrent sessions cannot collide server-side;
/// the well-known INBOX is sent as-is.
fn wire_form(command: &Command, worker_id: usize, tag: &str) -> String {
    match command {
        Command::Create { folder } => format!("{tag} CREATE {worker_id}X{folder}"),
        Command::Delete { folder } => format!("{tag} DELETE {worker_id}X{folder}"),
        Command::Select { folder } if folder == datagen::INBOX => {
            format!("{tag} SELECT {folder}")
        }
        Command::Select { folder } => format!("{tag} SELECT {worker_id}X{folder}"),
        Command::Append { folder, flags, body } => format!(
            "{tag} APPEND {worker_id}X{folder} {} {{{}}}",
            datagen::flag_list(flags),
            body.len()
        ),
        Command::Store { sequence, flags } => {
            format!("{tag} STORE {sequence} FLAGS {}", datagen::flag_list(flags))
        }
        Command::Expunge => format!("{tag} EXPUNGE"),
    }
}
