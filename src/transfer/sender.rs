//! Streaming file sender.
//!
//! Serves the artifact to successive connections on a bound listener. The
//! stream carries nothing but the raw bytes; the receiver detects the end of
//! the artifact through the close of the connection.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Result, TestbedError};

/// Binds a listener with bounded retry and fixed backoff.
pub fn bind_with_retry<A: ToSocketAddrs + std::fmt::Display>(
    addr: A,
    max_attempts: u32,
    retry_interval: Duration,
) -> Result<TcpListener> {
    let mut attempts = 0;
    loop {
        match TcpListener::bind(&addr) {
            Ok(listener) => {
                if attempts > 0 {
                    info!("bound {addr} after {attempts} retries");
                }
                return Ok(listener);
            }
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(TestbedError::BindRetry {
                        addr: addr.to_string(),
                        attempts,
                    });
                }
                debug!("bind attempt {attempts} for {addr} failed: {e}");
                thread::sleep(retry_interval);
            }
        }
    }
}

/// Streams the file once into an accepted connection.
fn send_to(stream: &mut TcpStream, file_path: &Path) -> io::Result<u64> {
    let started = Instant::now();
    let mut reader = BufReader::new(File::open(file_path)?);
    let bytes = io::copy(&mut reader, stream)?;
    info!(
        "sent {} bytes from {} in {} ms",
        bytes,
        file_path.display(),
        started.elapsed().as_millis()
    );
    Ok(bytes)
}

/// Accepts `clients` successive connections and streams the file to each.
///
/// Per-connection failures are logged and do not abort the remaining
/// clients; the connection close releases the socket on every path.
pub fn serve_file(listener: &TcpListener, file_path: &Path, clients: usize) -> Result<()> {
    for _ in 0..clients {
        let (mut stream, remote) = listener.accept()?;
        if let Err(e) = send_to(&mut stream, file_path) {
            warn!("sending to {remote} failed: {e}");
        }
    }
    Ok(())
}
