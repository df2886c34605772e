/*
 * SPDX-FileCopyrightText: 2025 imap-bench Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

/*!
 * Protocol driver: one connection, one session.
 *
 * The driver never pipelines. Each operation writes one command line,
 * then consumes response lines until the one correlated to the command's
 * tag appears; everything else on the wire is discarded. Every read and
 * write carries a deadline so a stalled server fails the session instead
 * of wedging its worker.
 */

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Deadline applied to every connect, read and write.
const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on non-matching lines discarded while waiting for a
/// tagged response.
const MAX_DISCARDED_LINES: usize = 512;

/// The two continuation acknowledgements accepted before a literal.
const CONTINUATION_FORMS: [&str; 2] = ["+ OK", "+ Ready for literal data"];

/// Transport streams the driver can own.
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClientStream for T {}

/// One protocol connection, owned for the lifetime of a single session.
pub struct ImapConnection {
    stream: BufReader<Box<dyn ClientStream>>,
}

impl ImapConnection {
    /// Connects to `addr`, optionally wrapping the socket in TLS. Server
    /// certificates are not verified; validation policy is outside the
    /// benchmark's scope.
    pub async fn connect(addr: &str, tls: bool) -> Result<Self> {
        let tcp = timed("connect", TcpStream::connect(addr)).await?;

        if !tls {
            return Ok(Self::from_stream(tcp));
        }

        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host).to_string();
        let server_name = ServerName::try_from(host)
            .map_err(|e| Error::InvalidArgument(format!("bad server name in {addr}: {e}")))?;
        let stream = timed("TLS handshake", connector.connect(server_name, tcp)).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wraps an already established stream; used by tests to drive the
    /// driver over in-memory pipes.
    pub fn from_stream<S: ClientStream + 'static>(stream: S) -> Self {
        Self { stream: BufReader::new(Box::new(stream)) }
    }

    /// Consumes the server greeting and performs the LOGIN exchange under
    /// the worker's `X` tag.
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
        worker_id: usize,
    ) -> Result<()> {
        // Mandatory untagged greeting precedes the first exchange.
        self.read_line().await?;

        let tag = format!("{worker_id}X");
        self.write_line(&format!("{tag} LOGIN {username} {password}")).await?;

        let marker = format!("{tag} ");
        let line = self.read_until(|line| line.contains(&marker), "LOGIN tag").await?;
        if !line.contains(&format!("{tag} OK")) {
            return Err(Error::Auth(format!(
                "server rejected LOGIN for {username}: {}",
                line.trim_end()
            )));
        }
        debug!(user = username, "login acknowledged");
        Ok(())
    }

    /// Sends one command line and reads until its tagged response,
    /// returning the round-trip time in nanoseconds. A tag-matched line
    /// without a success indicator is logged, not fatal: the benchmark
    /// measures, it does not judge.
    pub async fn execute(&mut self, command: &str, tag: &str) -> Result<i64> {
        trace!(%command, "sending");
        let started = Instant::now();
        self.write_line(command).await?;

        let line = self.tagged_response(tag).await?;
        let elapsed = started.elapsed().as_nanos() as i64;
        self.check_status(command, &line);
        Ok(elapsed)
    }

    /// Sends a literal-bearing command: the command line, one mandatory
    /// continuation acknowledgement, the literal payload, then the tagged
    /// response as in [`execute`](Self::execute).
    pub async fn execute_with_literal(
        &mut self,
        command: &str,
        tag: &str,
        literal: &str,
    ) -> Result<i64> {
        trace!(%command, "sending with literal");
        let started = Instant::now();
        self.write_line(command).await?;

        let line = self.read_line().await?;
        let answer = line.trim_end_matches(['\r', '\n']);
        if !CONTINUATION_FORMS.contains(&answer) {
            return Err(Error::Protocol(format!(
                "expected literal continuation, got {answer:?}"
            )));
        }

        self.write_line(literal).await?;

        let line = self.tagged_response(tag).await?;
        let elapsed = started.elapsed().as_nanos() as i64;
        self.check_status(command, &line);
        Ok(elapsed)
    }

    /// Sends the LOGOUT exchange under the worker's `Z` tag and waits for
    /// its acknowledgement.
    pub async fn terminate(&mut self, worker_id: usize) -> Result<()> {
        let tag = format!("{worker_id}Z");
        self.write_line(&format!("{tag} LOGOUT")).await?;
        self.read_until(|line| line.contains(&tag), "LOGOUT tag").await?;
        Ok(())
    }

    async fn tagged_response(&mut self, tag: &str) -> Result<String> {
        let prefix = format!("{tag} ");
        self.read_until(|line| line.starts_with(&prefix), "command tag").await
    }

    fn check_status(&self, command: &str, line: &str) {
        if !line.contains("OK") {
            warn!(%command, response = %line.trim_end(), "unexpected command status");
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let data = format!("{line}\r\n");
        timed("write", self.stream.write_all(data.as_bytes())).await
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = timed("read", self.stream.read_line(&mut line)).await?;
        if read == 0 {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
        trace!(line = %line.trim_end(), "received");
        Ok(line)
    }

    /// Discards lines until `matches` accepts one, bounding the scan so a
    /// chattering server cannot pin the worker forever.
    async fn read_until<F>(&mut self, matches: F, what: &str) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        for _ in 0..MAX_DISCARDED_LINES {
            let line = self.read_line().await?;
            if matches(&line) {
                return Ok(line);
            }
        }
        Err(Error::Protocol(format!(
            "no response matching {what} within {MAX_DISCARDED_LINES} lines"
        )))
    }
}

async fn timed<T, F>(operation: &str, future: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout(IO_TIMEOUT, future).await {
        Ok(result) => result.map_err(Error::Transport),
        Err(_) => Err(Error::Transport(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{operation} deadline expired"),
        ))),
    }
}

/// Verifier accepting any server certificate. The harness intentionally
/// mirrors an `InsecureSkipVerify` client: it talks to test rigs with
/// self-signed certificates.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
