//! End-to-end scenarios against the public API, with the container runtime
//! replaced by a scripted fake.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use peerbed::config::RunConfig;
use peerbed::coordinator::{self, GeneratedPlan, RunOptions};
use peerbed::error::{Result, TestbedError};
use peerbed::runtime::EndpointRuntime;
use peerbed::topology::{allocate_bandwidth, build_catalog, Overlay, Peer, ORIGIN};
use peerbed::transfer::receiver::TransferMetrics;
use peerbed::transfer::tracker::BarrierReport;
use peerbed::validate::quality::{connection_probes, QualityOptions};
use peerbed::validate::hash_file_hex;

fn peer(name: &str, up: u32, down: u32, latency: f64, loss: f64) -> Peer {
    Peer {
        name: name.to_string(),
        max_upload: up,
        max_download: down,
        latency,
        loss,
    }
}

/// S1: degenerate star with one peer reproduces the reference numbers.
#[test]
fn degenerate_star_matches_reference_values() {
    let peers = vec![
        peer(ORIGIN, 25000, 78000, 40.20, 0.0024),
        peer("1", 800, 9500, 25.5, 0.0020),
    ];
    let catalog = build_catalog(&peers);
    let down = catalog
        .iter()
        .find(|e| e.source == ORIGIN && e.target == "1")
        .unwrap();
    assert_eq!(down.bandwidth, 9500);
    assert!((down.latency - 65.70).abs() < 1e-9);
    assert!((down.loss - 0.0024).abs() < 1e-12);

    let overlay = Overlay::star(&peers);
    let allocated = allocate_bandwidth(&peers, &overlay).unwrap();
    assert_eq!(allocated.len(), 1);
    assert_eq!(allocated[0].bandwidth, 9500);
}

/// S2: the clamp pass frees budget that the redistribution pass hands to
/// the remaining target, filling the budget exactly.
#[test]
fn allocation_clamp_scenario() {
    let peers = vec![
        peer(ORIGIN, 10000, 100_000, 40.20, 0.0024),
        peer("1", 500, 2000, 20.0, 0.001),
        peer("2", 500, 2000, 20.0, 0.001),
        peer("3", 500, 2000, 20.0, 0.001),
        peer("4", 500, 10000, 20.0, 0.001),
    ];
    let overlay = Overlay::star(&peers);
    let allocated = allocate_bandwidth(&peers, &overlay).unwrap();

    let by_target: HashMap<&str, u32> = allocated
        .iter()
        .map(|e| (e.target.as_str(), e.bandwidth))
        .collect();
    assert_eq!(by_target["1"], 2000);
    assert_eq!(by_target["2"], 2000);
    assert_eq!(by_target["3"], 2000);
    assert_eq!(by_target["4"], 4000);

    let total: u32 = allocated.iter().map(|e| e.bandwidth).sum();
    assert_eq!(total, 10000);
}

/// S3: a five-peer population yields the full 5*4 catalog and a four-edge
/// star overlay covering every peer.
#[test]
fn full_mesh_coverage() {
    let peers: Vec<Peer> = [ORIGIN, "1", "2", "3", "4"]
        .iter()
        .map(|n| peer(n, 5000, 50000, 20.0, 0.001))
        .collect();
    let catalog = build_catalog(&peers);
    assert_eq!(catalog.len(), 20);

    let overlay = Overlay::star(&peers);
    assert_eq!(overlay.edges.len(), 4);
    overlay.validate(&peers).unwrap();
}

// ---------------------------------------------------------------------------
// Scripted runtime for full-pipeline scenarios.
// ---------------------------------------------------------------------------

/// Scripted runtime that answers probes with the applied values, reports a
/// complete barrier and serves artifact hashes, with optional corruption
/// and barrier silence.
struct FakeRuntime {
    /// (source endpoint, target ip) -> (applied latency ms, applied Kbit/s)
    probes: HashMap<(String, String), (f64, u32)>,
    origin_hash: String,
    corrupted: HashSet<String>,
    barrier_json: Option<String>,
    metrics_json: String,
}

impl FakeRuntime {
    fn from_plan(plan: &GeneratedPlan, artifact: &Path) -> Self {
        let applied: HashMap<(String, String), (f64, u32)> = plan
            .allocated
            .iter()
            .map(|e| {
                (
                    (e.source.clone(), e.target.clone()),
                    (e.latency_ms(), e.bandwidth),
                )
            })
            .collect();
        let probes = connection_probes(&plan.doc)
            .unwrap()
            .into_iter()
            .map(|p| {
                let values = applied[&(p.source.clone(), p.target.clone())];
                ((p.source, p.target_ip), values)
            })
            .collect();

        let expected = plan.peers.len();
        let barrier = BarrierReport {
            expected,
            confirmations: expected,
            total_ms: 4321,
            complete: true,
        };
        let metrics = TransferMetrics {
            bytes: 2_239_815,
            connection_ms: 120,
            transfer_ms: 1900,
            total_ms: 2020,
        };
        FakeRuntime {
            probes,
            origin_hash: hash_file_hex(artifact).unwrap(),
            corrupted: HashSet::new(),
            barrier_json: Some(serde_json::to_string(&barrier).unwrap()),
            metrics_json: serde_json::to_string(&metrics).unwrap(),
        }
    }

    fn corrupt(mut self, endpoint: &str) -> Self {
        self.corrupted.insert(endpoint.to_string());
        self
    }

    fn silent_tracker(mut self) -> Self {
        self.barrier_json = None;
        self
    }
}

impl EndpointRuntime for FakeRuntime {
    fn deploy(&self, _topology: &Path) -> Result<()> {
        Ok(())
    }

    fn destroy(&self, _topology: &Path) -> Result<()> {
        Ok(())
    }

    fn exec(&self, endpoint: &str, command: &str) -> Result<String> {
        if let Some(ip) = command.strip_prefix("ping -c 4 ") {
            let (latency, _) = self.probes[&(endpoint.to_string(), ip.to_string())];
            return Ok(format!(
                "rtt min/avg/max/mdev = {latency:.3}/{latency:.3}/{latency:.3}/0.050 ms\n"
            ));
        }
        if let Some(ip) = command.strip_prefix("iperf3 -c ") {
            let (_, bandwidth) = self.probes[&(endpoint.to_string(), ip.to_string())];
            return Ok(format!(
                "[  5]   0.00-10.04  sec  1.1 MBytes  {bandwidth}.0 Kbits/sec   receiver\n"
            ));
        }
        if command.contains("tracker-result.json") {
            return match &self.barrier_json {
                Some(json) => Ok(json.clone()),
                None => Err(TestbedError::Config("no tracker result yet".to_string())),
            };
        }
        if command.contains("transfer-metrics.json") {
            return Ok(self.metrics_json.clone());
        }
        if command.starts_with("[ -f ") {
            return Ok("found\n".to_string());
        }
        if command.starts_with("sha256sum ") {
            let hash = if self.corrupted.contains(endpoint) {
                "0000000000000000000000000000000000000000000000000000000000000000".to_string()
            } else {
                self.origin_hash.clone()
            };
            return Ok(format!("{hash}\n"));
        }
        Err(TestbedError::Config(format!("unscripted command: {command}")))
    }

    fn exec_background(&self, _endpoint: &str, _command: &str) -> Result<()> {
        Ok(())
    }
}

fn test_config(dir: &Path, peers: usize, superpeers: bool) -> RunConfig {
    let artifact = dir.join("mydocument.pdf");
    std::fs::write(&artifact, b"reference artifact payload").unwrap();
    let script = dir.join("apply-shaping.sh");
    std::fs::write(&script, "#!/bin/sh\n").unwrap();
    RunConfig {
        peer_count: peers,
        use_superpeers: superpeers,
        superpeer_count: 2,
        file_bytes: 2_239_815,
        artifact_path: artifact,
        output_dir: dir.join("out"),
        seed: 42,
        image: "peerbed-testbed".to_string(),
        endpoint_binary: "/usr/local/bin/peerbed".to_string(),
        shaping_script_path: script,
    }
}

fn quick_options() -> RunOptions {
    RunOptions {
        quality: QualityOptions {
            max_attempts: 3,
            server_warmup: std::time::Duration::ZERO,
        },
        barrier_poll_interval: std::time::Duration::from_millis(10),
        run_deadline: std::time::Duration::from_millis(300),
    }
}

/// A clean run passes every check, records the run and exits zero.
#[test]
fn clean_run_records_success() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 5, false);

    let plan = coordinator::generate(&config).unwrap();
    let runtime = FakeRuntime::from_plan(&plan, &config.artifact_path);

    let outcome = coordinator::execute(&config, &runtime, &quick_options()).unwrap();
    assert!(outcome.failures.is_empty(), "failures: {:?}", outcome.failures);
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.record.hashes_match);
    assert_eq!(outcome.record.status, "ok");
    assert_eq!(outcome.record.peer_count, 5);

    let results = std::fs::read_to_string(config.output_dir.join("results.csv")).unwrap();
    assert!(results.lines().count() >= 2);
}

/// A two-tier run drives super-peer wiring through the same pipeline.
#[test]
fn two_tier_run_records_success() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 7, true);

    let plan = coordinator::generate(&config).unwrap();
    assert_eq!(plan.overlay.superpeers.len(), 2);
    let runtime = FakeRuntime::from_plan(&plan, &config.artifact_path);

    let outcome = coordinator::execute(&config, &runtime, &quick_options()).unwrap();
    assert!(outcome.failures.is_empty(), "failures: {:?}", outcome.failures);
    assert_eq!(outcome.record.overlay, "two-tier");
}

/// S6: one corrupted endpoint surfaces exactly one hash mismatch and makes
/// the run exit with code 1; the other endpoints still pass.
#[test]
fn corrupted_endpoint_fails_integrity_only_there() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 5, false);

    let plan = coordinator::generate(&config).unwrap();
    let runtime = FakeRuntime::from_plan(&plan, &config.artifact_path).corrupt("3");

    let outcome = coordinator::execute(&config, &runtime, &quick_options()).unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert!(!outcome.record.hashes_match);

    let mismatches: Vec<&TestbedError> = outcome
        .failures
        .iter()
        .filter(|f| matches!(f, TestbedError::HashMismatch { .. }))
        .collect();
    assert_eq!(mismatches.len(), 1);
    match mismatches[0] {
        TestbedError::HashMismatch { endpoint, .. } => assert_eq!(endpoint, "3"),
        _ => unreachable!(),
    }
}

/// A tracker that never reports makes the run hit its deadline: exit 2,
/// partial record still persisted.
#[test]
fn silent_tracker_hits_the_run_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 3, false);

    let plan = coordinator::generate(&config).unwrap();
    let runtime = FakeRuntime::from_plan(&plan, &config.artifact_path).silent_tracker();

    let outcome = coordinator::execute(&config, &runtime, &quick_options()).unwrap();
    assert_eq!(outcome.exit_code(), 2);
    assert!(outcome
        .failures
        .iter()
        .any(|f| matches!(f, TestbedError::RunDeadline(_))));
    assert!(config.output_dir.join("results.csv").exists());
}

/// The generate phase leaves every plan artifact in the output directory.
#[test]
fn generate_writes_all_plan_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 4, false);
    coordinator::generate(&config).unwrap();

    for file in [
        "network-statistics-4.txt",
        "input-data-4.json",
        "output-data-4.json",
        "connection-details-4.json",
        "testbed-topology.yml",
    ] {
        assert!(
            config.output_dir.join(file).exists(),
            "missing artifact {file}"
        );
    }
}
