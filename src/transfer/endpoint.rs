//! Per-endpoint workload.
//!
//! Every container in the fabric runs the same binary; the role read from
//! the environment decides whether it tracks the barrier, serves the origin
//! artifact, relays as a super-peer or receives as a leaf.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::info;

use super::receiver::{receive_file, RetryPolicy, TransferMetrics, MAX_ATTEMPTS};
use super::sender::{bind_with_retry, serve_file};
use super::tracker::{run_tracker, send_confirmation, BarrierReport};
use super::wiring::{
    LeafConfig, OriginConfig, RoleConfig, SuperPeerConfig, TrackerConfig, ORIGIN_PORT,
    SUPERPEER_PORT, TRACKER_PORT,
};
use crate::error::{Result, TestbedError};
use crate::fabric::TRACKER_MGMT_IP;
use crate::topology::ORIGIN;

/// In-container working directory of every endpoint.
pub const APP_DIR: &str = "/app";
/// Artifact as mounted into the origin.
pub const ARTIFACT_FILE: &str = "mydocument.pdf";
/// Artifact as stored by receivers fed directly by the origin.
pub const RECEIVED_FROM_ORIGIN_FILE: &str = "receivedFromOrigin.pdf";
/// Barrier outcome written by the tracker for the coordinator to poll.
pub const TRACKER_RESULT_FILE: &str = "tracker-result.json";
/// Timing metrics written by every receiver.
pub const METRICS_FILE: &str = "transfer-metrics.json";

/// Artifact file name used by receivers fed by a super-peer.
pub fn received_from_file(feeder: &str) -> String {
    format!("receivedFrom-{feeder}.pdf")
}

/// Listener-bind delay of the origin, staircased by fabric size so shaping
/// on every endpoint settles before the first transfer.
pub fn origin_bind_delay_secs(total_peers: usize) -> u64 {
    match total_peers {
        0..=6 => 50,
        7..=11 => 80,
        12..=21 => 150,
        22..=36 => 250,
        37..=51 => 350,
        52..=76 => 500,
        77..=101 => 800,
        _ => 1200,
    }
}

/// Barrier deadline: bind delay plus a per-peer transfer budget.
pub fn barrier_deadline(total_peers: usize) -> Duration {
    Duration::from_secs(origin_bind_delay_secs(total_peers) + total_peers as u64 * 30 + 600)
}

fn retry_every(interval_secs: u64) -> RetryPolicy {
    RetryPolicy {
        retry_interval: Duration::from_secs(interval_secs),
        ..RetryPolicy::default()
    }
}

fn write_metrics(app_dir: &Path, metrics: &TransferMetrics) -> Result<()> {
    let path = app_dir.join(METRICS_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(metrics)?)?;
    Ok(())
}

/// Tracker role: run the barrier, persist the report, surface incompleteness.
pub fn run_tracker_endpoint(
    config: &TrackerConfig,
    app_dir: &Path,
    bind_addr: &str,
) -> Result<BarrierReport> {
    let listener = bind_with_retry(bind_addr.to_string(), 100, Duration::from_secs(1))?;
    info!("tracker listening on {bind_addr}, expecting {} confirmations", config.expected);

    let report = run_tracker(listener, config.expected, barrier_deadline(config.expected))?;
    std::fs::write(
        app_dir.join(TRACKER_RESULT_FILE),
        serde_json::to_string_pretty(&report)?,
    )?;

    if !report.complete {
        return Err(TestbedError::BarrierIncomplete {
            observed: report.confirmations,
            expected: report.expected,
        });
    }
    Ok(report)
}

/// Origin role: pace, bind one listener per outbound link, confirm once at
/// bind to start the dissemination clock, then serve every successor.
pub fn run_origin(
    config: &OriginConfig,
    app_dir: &Path,
    tracker_addr: &str,
    bind_delay: Duration,
) -> Result<()> {
    info!(
        "origin pacing for {} s before binding listeners",
        bind_delay.as_secs()
    );
    thread::sleep(bind_delay);

    let artifact = app_dir.join(ARTIFACT_FILE);
    let mut listeners = Vec::with_capacity(config.connections.len());
    for connection in &config.connections {
        let addr = format!("{}:{}", connection.local_ip, ORIGIN_PORT);
        let listener = bind_with_retry(addr, MAX_ATTEMPTS, Duration::from_secs(1))?;
        listeners.push((listener, connection.target_peer.clone()));
    }

    send_confirmation(tracker_addr, MAX_ATTEMPTS, Duration::from_secs(1))?;
    info!("origin serving {} successors", listeners.len());

    let mut handles = Vec::with_capacity(listeners.len());
    for (listener, target) in listeners {
        let artifact = artifact.clone();
        handles.push(thread::spawn(move || -> Result<()> {
            serve_file(&listener, &artifact, 1)?;
            info!("origin finished serving {target}");
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().map_err(|_| {
            TestbedError::Config("origin sender thread panicked".to_string())
        })??;
    }
    Ok(())
}

/// Super-peer role: receive from the origin, confirm, then relay to leaves.
pub fn run_superpeer(
    config: &SuperPeerConfig,
    app_dir: &Path,
    tracker_addr: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    let received = app_dir.join(RECEIVED_FROM_ORIGIN_FILE);
    let feeder_addr = format!("{}:{}", config.feeder_ip, ORIGIN_PORT)
        .parse()
        .map_err(|e| TestbedError::Environment {
            name: "SUPER_PEER_IP".to_string(),
            reason: format!("not a socket address: {e}"),
        })?;

    let metrics = receive_file(feeder_addr, &received, policy)?;
    write_metrics(app_dir, &metrics)?;
    send_confirmation(tracker_addr, MAX_ATTEMPTS, Duration::from_secs(1))?;

    info!(
        "super-peer {} relaying to {} leaves",
        config.name,
        config.connections.len()
    );
    let mut handles = Vec::with_capacity(config.connections.len());
    for connection in &config.connections {
        let addr = format!("{}:{}", connection.local_ip, SUPERPEER_PORT);
        let listener = bind_with_retry(addr, MAX_ATTEMPTS, Duration::from_secs(1))?;
        let received = received.clone();
        let target = connection.target_peer.clone();
        handles.push(thread::spawn(move || -> Result<()> {
            serve_file(&listener, &received, 1)?;
            info!("super-peer finished serving {target}");
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().map_err(|_| {
            TestbedError::Config("super-peer sender thread panicked".to_string())
        })??;
    }
    Ok(())
}

/// Leaf role: receive from the feeder and confirm.
pub fn run_leaf(
    config: &LeafConfig,
    app_dir: &Path,
    tracker_addr: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    let (port, file_name) = if config.feeder == ORIGIN {
        (ORIGIN_PORT, RECEIVED_FROM_ORIGIN_FILE.to_string())
    } else {
        (SUPERPEER_PORT, received_from_file(&config.feeder))
    };
    let feeder_addr = format!("{}:{}", config.feeder_ip, port)
        .parse()
        .map_err(|e| TestbedError::Environment {
            name: "SUPER_PEER_IP".to_string(),
            reason: format!("not a socket address: {e}"),
        })?;

    let metrics = receive_file(feeder_addr, &app_dir.join(file_name), policy)?;
    write_metrics(app_dir, &metrics)?;
    send_confirmation(tracker_addr, MAX_ATTEMPTS, Duration::from_secs(1))?;
    info!(
        "leaf {} done: connection {} ms, transfer {} ms, total {} ms",
        config.name, metrics.connection_ms, metrics.transfer_ms, metrics.total_ms
    );
    Ok(())
}

/// Entry point of the in-container workload.
pub fn run_endpoint(config: &RoleConfig) -> Result<()> {
    let app_dir = PathBuf::from(APP_DIR);
    let tracker_addr = format!("{TRACKER_MGMT_IP}:{TRACKER_PORT}");

    match config {
        RoleConfig::Tracker(tracker) => {
            run_tracker_endpoint(tracker, &app_dir, &format!("0.0.0.0:{TRACKER_PORT}"))?;
            Ok(())
        }
        RoleConfig::Origin(origin) => run_origin(
            origin,
            &app_dir,
            &tracker_addr,
            Duration::from_secs(origin_bind_delay_secs(origin.total_peers)),
        ),
        RoleConfig::SuperPeer(superpeer) => {
            run_superpeer(superpeer, &app_dir, &tracker_addr, &retry_every(3))
        }
        RoleConfig::Leaf(leaf) => run_leaf(leaf, &app_dir, &tracker_addr, &retry_every(3)),
    }
}
