//! Tracker barrier.
//!
//! A single endpoint accepts short connections each carrying the literal
//! `CONFIRMATION` token. The dissemination clock starts at the FIRST
//! confirmation (not at tracker start) and stops when the expected count is
//! reached. Confirmation state lives in one aggregator loop; acceptor
//! threads only send it messages.

use std::io::BufRead;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Wire token each endpoint sends exactly once per run.
pub const CONFIRMATION_TOKEN: &str = "CONFIRMATION";

/// Outcome of one barrier run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierReport {
    pub expected: usize,
    pub confirmations: usize,
    /// Wall-clock span between first and last confirmation.
    #[serde(rename = "totalDurationMs")]
    pub total_ms: u64,
    pub complete: bool,
}

/// Runs the barrier until `expected` confirmations arrive or the deadline
/// expires. Returns a report either way; an incomplete report carries the
/// partial count and span.
pub fn run_tracker(
    listener: TcpListener,
    expected: usize,
    deadline: Duration,
) -> Result<BarrierReport> {
    let (confirmations_tx, confirmations_rx) = unbounded::<Instant>();
    let shutdown = Arc::new(AtomicBool::new(false));

    listener.set_nonblocking(true)?;
    let acceptor_shutdown = Arc::clone(&shutdown);
    let acceptor = thread::spawn(move || {
        while !acceptor_shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, remote)) => {
                    stream
                        .set_read_timeout(Some(Duration::from_secs(5)))
                        .ok();
                    let mut line = String::new();
                    let mut reader = std::io::BufReader::new(stream);
                    match reader.read_line(&mut line) {
                        Ok(_) if line.trim_end() == CONFIRMATION_TOKEN => {
                            debug!("confirmation from {remote}");
                            if confirmations_tx.send(Instant::now()).is_err() {
                                break;
                            }
                        }
                        Ok(_) => warn!("ignoring unexpected token from {remote}: {line:?}"),
                        Err(e) => warn!("reading confirmation from {remote} failed: {e}"),
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!("tracker accept failed: {e}");
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
    });

    let started = Instant::now();
    let mut first: Option<Instant> = None;
    let mut last: Option<Instant> = None;
    let mut confirmations = 0usize;

    while confirmations < expected {
        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            break;
        }
        match confirmations_rx.recv_timeout(remaining.min(Duration::from_millis(200))) {
            Ok(instant) => {
                confirmations += 1;
                if first.is_none() {
                    first = Some(instant);
                }
                last = Some(instant);
                info!("received confirmation {confirmations} of {expected}");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    acceptor.join().ok();

    let total_ms = match (first, last) {
        (Some(first), Some(last)) => last.duration_since(first).as_millis() as u64,
        _ => 0,
    };
    let complete = confirmations >= expected;
    if complete {
        info!("all {expected} confirmations received, total duration {total_ms} ms");
    } else {
        warn!("barrier incomplete: {confirmations} of {expected} confirmations before deadline");
    }

    Ok(BarrierReport {
        expected,
        confirmations,
        total_ms,
        complete,
    })
}

/// Sends one confirmation to the tracker, retrying with fixed backoff.
pub fn send_confirmation(addr: &str, max_attempts: u32, retry_interval: Duration) -> Result<()> {
    use std::io::Write;
    use std::net::TcpStream;

    let mut attempts = 0;
    loop {
        attempts += 1;
        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                stream.write_all(format!("{CONFIRMATION_TOKEN}\n").as_bytes())?;
                stream.flush()?;
                info!("confirmation sent to tracker at {addr}");
                return Ok(());
            }
            Err(e) => {
                debug!("confirmation attempt {attempts} to {addr} failed: {e}");
                if attempts >= max_attempts {
                    return Err(crate::error::TestbedError::ConnectRetry {
                        addr: addr.to_string(),
                        attempts,
                    });
                }
                thread::sleep(retry_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;

    fn confirm(addr: std::net::SocketAddr) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"CONFIRMATION\n").unwrap();
    }

    #[test]
    fn barrier_completes_at_the_expected_count() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let tracker = thread::spawn(move || {
            run_tracker(listener, 3, Duration::from_secs(10)).unwrap()
        });

        for _ in 0..3 {
            confirm(addr);
            thread::sleep(Duration::from_millis(30));
        }

        let report = tracker.join().unwrap();
        assert!(report.complete);
        assert_eq!(report.confirmations, 3);
        // Span runs from the first to the last confirmation, so it is well
        // below the tracker's own lifetime.
        assert!(report.total_ms < 10_000);
    }

    #[test]
    fn duplicates_are_counted_not_deduplicated() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let tracker = thread::spawn(move || {
            run_tracker(listener, 2, Duration::from_secs(10)).unwrap()
        });

        // The same endpoint confirms twice; the barrier still completes.
        confirm(addr);
        confirm(addr);

        let report = tracker.join().unwrap();
        assert!(report.complete);
        assert_eq!(report.confirmations, 2);
    }

    #[test]
    fn unexpected_tokens_are_ignored() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let tracker = thread::spawn(move || {
            run_tracker(listener, 1, Duration::from_secs(10)).unwrap()
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"HELLO\n").unwrap();
        drop(stream);
        thread::sleep(Duration::from_millis(50));
        confirm(addr);

        let report = tracker.join().unwrap();
        assert!(report.complete);
        assert_eq!(report.confirmations, 1);
    }

    #[test]
    fn deadline_yields_a_partial_report() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let tracker = thread::spawn(move || {
            run_tracker(listener, 3, Duration::from_millis(500)).unwrap()
        });

        confirm(addr);

        let report = tracker.join().unwrap();
        assert!(!report.complete);
        assert_eq!(report.confirmations, 1);
        assert_eq!(report.expected, 3);
        assert_eq!(report.total_ms, 0);
    }

    #[test]
    fn send_confirmation_retries_until_the_tracker_is_up() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // Nothing listens; the budget is exhausted.
        let result = send_confirmation(&addr.to_string(), 2, Duration::from_millis(10));
        assert!(result.is_err());
    }
}
