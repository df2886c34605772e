/*
 * SPDX-FileCopyrightText: 2025 imap-bench Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

/*!
 * Timing records, the JSON result stream and the collector.
 *
 * The stream is `{"Configuration":…,"Sessions":[…]}`, written record by
 * record so a crashed run still leaves the completed prefix on disk.
 */

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Receiver;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::Result;

/// One timed command: issue timestamp (nanoseconds since the epoch),
/// protocol name and round-trip latency in nanoseconds. Serializes as the
/// `[timestamp, name, elapsed]` triple of the result stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTiming(pub i64, pub String, pub i64);

impl CommandTiming {
    pub fn issued_at_nanos(&self) -> i64 {
        self.0
    }

    pub fn name(&self) -> &str {
        &self.1
    }

    pub fn elapsed_nanos(&self) -> i64 {
        self.2
    }
}

/// Timing record for one fully replayed session. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingRecord {
    #[serde(rename = "SessionID")]
    pub session_id: usize,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Commands")]
    pub commands: Vec<CommandTiming>,
}

/// Per-job outcome reported by a worker. Failures travel the same channel
/// as successes, so the collector sees one result per dispatched job.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub session_id: usize,
    pub user: String,
    pub outcome: std::result::Result<TimingRecord, String>,
}

/// Counters for one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Incremental writer for the result stream.
pub struct ResultWriter<W: Write> {
    sink: W,
    records: usize,
}

impl<W: Write> ResultWriter<W> {
    /// Opens the stream by echoing the run configuration.
    pub fn new(mut sink: W, config: &Config) -> Result<Self> {
        let configuration = serde_json::to_string(config).map_err(io::Error::from)?;
        write!(sink, "{{\"Configuration\":{configuration},\"Sessions\":[")?;
        Ok(Self { sink, records: 0 })
    }

    /// Appends one session record and flushes, keeping the on-disk prefix
    /// valid up to the closing bracket.
    pub fn record(&mut self, record: &TimingRecord) -> Result<()> {
        if self.records > 0 {
            self.sink.write_all(b",")?;
        }
        let json = serde_json::to_string(record).map_err(io::Error::from)?;
        self.sink.write_all(json.as_bytes())?;
        self.sink.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Closes the JSON document.
    pub fn finish(&mut self) -> Result<()> {
        self.sink.write_all(b"]}")?;
        self.sink.flush()?;
        Ok(())
    }
}

/// Drains the result queue until every worker is done. Results arrive in
/// completion order, not session order; successful records go to the
/// writer, failures are tallied and logged. Fewer results than dispatched
/// jobs is tolerated and flagged rather than waited out.
pub async fn collect<W: Write>(
    results: &mut Receiver<SessionResult>,
    dispatched: usize,
    writer: &mut ResultWriter<W>,
) -> Result<RunSummary> {
    let mut summary = RunSummary { dispatched, ..RunSummary::default() };

    while let Some(result) = results.recv().await {
        match result.outcome {
            Ok(record) => {
                writer.record(&record)?;
                summary.succeeded += 1;
            }
            Err(reason) => {
                error!(session = result.session_id, user = %result.user, %reason, "session failed");
                summary.failed += 1;
            }
        }
    }

    writer.finish()?;

    let received = summary.succeeded + summary.failed;
    if received != dispatched {
        warn!(received, dispatched, "collector received fewer results than dispatched jobs");
    }
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "collected run results"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn sample_config() -> Config {
        toml::from_str(
            r#"
[Server]
Addr = "127.0.0.1:1143"
TLS = false

[Settings]
Threads = 1
Sessions = 2
Seed = 42
Throttle = 0

[Session]
MinLength = 3
MaxLength = 4
"#,
        )
        .unwrap()
    }

    fn sample_record(session_id: usize) -> TimingRecord {
        TimingRecord {
            session_id,
            user: "alice".into(),
            password: "wonderland".into(),
            commands: vec![
                CommandTiming(1_700_000_000_000_000_000, "CREATE".into(), 1_250_000),
                CommandTiming(1_700_000_000_100_000_000, "APPEND".into(), 2_500_000),
                CommandTiming(1_700_000_000_200_000_000, "SELECT".into(), 800_000),
            ],
        }
    }

    #[test]
    fn timing_record_round_trips_through_json() {
        let record = sample_record(7);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: TimingRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, record);
        let pairs: Vec<(&str, i64)> = parsed
            .commands
            .iter()
            .map(|timing| (timing.name(), timing.elapsed_nanos()))
            .collect();
        assert_eq!(pairs, vec![("CREATE", 1_250_000), ("APPEND", 2_500_000), ("SELECT", 800_000)]);
    }

    #[test]
    fn timing_record_uses_the_wire_key_names() {
        let json = serde_json::to_string(&sample_record(1)).unwrap();
        assert!(json.contains("\"SessionID\":1"));
        assert!(json.contains("\"User\":\"alice\""));
        assert!(json.contains("\"Commands\":[[1700000000000000000,\"CREATE\",1250000]"));
    }

    #[test]
    fn writer_produces_one_parsable_document() {
        let config = sample_config();
        let mut buffer = Vec::new();
        let mut writer = ResultWriter::new(&mut buffer, &config).unwrap();
        writer.record(&sample_record(1)).unwrap();
        writer.record(&sample_record(2)).unwrap();
        writer.finish().unwrap();

        let document: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(document["Configuration"]["Server"]["Addr"], "127.0.0.1:1143");
        assert_eq!(document["Configuration"]["Settings"]["Seed"], 42);

        let sessions: Vec<TimingRecord> =
            serde_json::from_value(document["Sessions"].clone()).unwrap();
        assert_eq!(sessions, vec![sample_record(1), sample_record(2)]);
    }

    #[tokio::test]
    async fn collector_tallies_successes_and_failures() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(SessionResult {
            session_id: 2,
            user: "bob".into(),
            outcome: Ok(sample_record(2)),
        })
        .await
        .unwrap();
        tx.send(SessionResult {
            session_id: 1,
            user: "alice".into(),
            outcome: Err("transport error: connection reset".into()),
        })
        .await
        .unwrap();
        drop(tx);

        let config = sample_config();
        let mut buffer = Vec::new();
        let mut writer = ResultWriter::new(&mut buffer, &config).unwrap();
        let summary = collect(&mut rx, 2, &mut writer).await.unwrap();

        assert_eq!(summary, RunSummary { dispatched: 2, succeeded: 1, failed: 1 });

        // Completion order is preserved; session 2 finished first.
        let document: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        let sessions = document["Sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["SessionID"], 2);
    }
}
