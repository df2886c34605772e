/*
 * SPDX-FileCopyrightText: 2025 imap-bench Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

/*!
 * Benchmark configuration: TOML run parameters, the line-oriented
 * credential store and the per-run results file.
 */

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Delimiter between username and password in the credential store.
const CREDENTIAL_DELIMITER: &str = ":{plain}";

/// Parsed benchmark configuration. Field names serialize in the
/// PascalCase form used by the TOML files and the result stream's
/// `Configuration` echo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    pub server: Server,
    pub settings: Settings,
    pub session: SessionSettings,
}

/// Server under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Server {
    /// host:port to connect to.
    pub addr: String,
    /// Wrap connections in TLS. Certificates are not validated; the
    /// harness measures latency, it does not audit deployments.
    #[serde(rename = "TLS")]
    pub tls: bool,
}

/// Global run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    /// Number of concurrent workers.
    pub threads: usize,
    /// Number of sessions to dispatch.
    pub sessions: usize,
    /// Seed for the session generator's random source.
    pub seed: u64,
    /// Milliseconds to pause between dispatched sessions. Zero disables
    /// throttling.
    pub throttle: u64,
}

/// Bounds on generated session length.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionSettings {
    pub min_length: usize,
    pub max_length: usize,
}

/// One username/password pair from the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::InvalidArgument(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects unusable parameters before any connection is opened.
    pub fn validate(&self) -> Result<()> {
        if self.server.addr.is_empty() {
            return Err(Error::InvalidArgument("Server.Addr is empty".into()));
        }
        if self.settings.threads == 0 {
            return Err(Error::InvalidArgument("Settings.Threads must be at least 1".into()));
        }
        if self.settings.sessions == 0 {
            return Err(Error::InvalidArgument("Settings.Sessions must be at least 1".into()));
        }
        if self.session.min_length == 0 || self.session.min_length >= self.session.max_length {
            return Err(Error::InvalidArgument(format!(
                "session length bounds must satisfy 0 < MinLength < MaxLength, got [{}, {})",
                self.session.min_length, self.session.max_length
            )));
        }
        Ok(())
    }
}

/// Loads credentials from a line-oriented file, one
/// `user:{plain}password` entry per non-empty line.
pub fn load_credentials(path: &Path) -> Result<Vec<Credential>> {
    parse_credentials(&fs::read_to_string(path)?)
}

fn parse_credentials(content: &str) -> Result<Vec<Credential>> {
    let mut credentials = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let Some((username, password)) = line.split_once(CREDENTIAL_DELIMITER) else {
            return Err(Error::InvalidArgument(format!(
                "credential line {} lacks the {CREDENTIAL_DELIMITER:?} delimiter",
                number + 1
            )));
        };
        credentials.push(Credential {
            username: username.to_string(),
            password: password.to_string(),
        });
    }
    Ok(credentials)
}

/// Creates the append-only result stream file for a run, named after its
/// start time. The directory is created when missing.
pub fn create_results_file(dir: &Path, start: DateTime<Utc>) -> Result<(PathBuf, File)> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    let path = dir.join(format!("{}.json", start.format("%Y-%m-%d-%H-%M-%S")));
    let file = File::create(&path)?;
    Ok((path, file))
}
