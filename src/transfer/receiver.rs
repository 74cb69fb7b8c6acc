//! Streaming file receiver with bounded retry.
//!
//! Connects to a sender, streams the artifact into a file in strict arrival
//! order and reports the timing split the results record needs. A handshake
//! that closes before delivering a single byte counts as a failed attempt.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TestbedError};

/// Attempt budget shared by every connector in the testbed.
pub const MAX_ATTEMPTS: u32 = 100_000;
/// Fixed backoff between connection attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(3);
/// Per-attempt connect/read timeout.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

const CHUNK: usize = 64 * 1024;

/// Retry knobs, defaulting to the testbed-wide constants.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_interval: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: MAX_ATTEMPTS,
            retry_interval: RETRY_INTERVAL,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }
}

/// Timing split of one completed reception.
///
/// `connection_ms` covers everything from the first attempt up to stream
/// completion that was not spent moving bytes; `transfer_ms` runs from the
/// first byte to the sender's close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetrics {
    pub bytes: u64,
    #[serde(rename = "connectionMs")]
    pub connection_ms: u64,
    #[serde(rename = "transferMs")]
    pub transfer_ms: u64,
    #[serde(rename = "totalMs")]
    pub total_ms: u64,
}

/// One reception attempt. `Ok(None)` means the sender closed before the
/// first byte; the caller counts it as a failed attempt.
fn attempt(
    addr: SocketAddr,
    out_path: &Path,
    policy: &RetryPolicy,
) -> std::io::Result<Option<(u64, Duration)>> {
    let mut stream = TcpStream::connect_timeout(&addr, policy.attempt_timeout)?;
    stream.set_read_timeout(Some(policy.attempt_timeout))?;

    let mut writer = BufWriter::new(File::create(out_path)?);
    let mut buffer = vec![0u8; CHUNK];
    let mut total: u64 = 0;
    let mut stream_started: Option<Instant> = None;

    loop {
        let read = stream.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        if stream_started.is_none() {
            stream_started = Some(Instant::now());
        }
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }
    writer.flush()?;

    match stream_started {
        Some(started) if total > 0 => Ok(Some((total, started.elapsed()))),
        _ => Ok(None),
    }
}

/// Receives the artifact from `addr` into `out_path`, retrying with fixed
/// backoff until the attempt budget runs out.
pub fn receive_file(
    addr: SocketAddr,
    out_path: &Path,
    policy: &RetryPolicy,
) -> Result<TransferMetrics> {
    let attempt_start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match attempt(addr, out_path, policy) {
            Ok(Some((bytes, transfer))) => {
                let transfer_ms = transfer.as_millis() as u64;
                let connection_ms = attempt_start
                    .elapsed()
                    .as_millis()
                    .saturating_sub(transfer.as_millis()) as u64;
                let metrics = TransferMetrics {
                    bytes,
                    connection_ms,
                    transfer_ms,
                    total_ms: connection_ms + transfer_ms,
                };
                info!(
                    "received {} bytes from {} after {} attempts (connection {} ms, transfer {} ms)",
                    bytes, addr, attempts, metrics.connection_ms, metrics.transfer_ms
                );
                return Ok(metrics);
            }
            Ok(None) => {
                debug!("attempt {attempts}: {addr} closed before any payload");
            }
            Err(e) => {
                debug!("attempt {attempts}: connection to {addr} failed: {e}");
            }
        }

        if attempts >= policy.max_attempts {
            warn!("giving up on {addr} after {attempts} attempts");
            // Partial output must not look like a received artifact.
            let _ = std::fs::remove_file(out_path);
            return Err(TestbedError::ConnectRetry {
                addr: addr.to_string(),
                attempts,
            });
        }
        thread::sleep(policy.retry_interval);
    }
}
