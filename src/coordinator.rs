//! Run coordination.
//!
//! `generate` turns a configuration into plan artifacts and the topology
//! document; `execute` deploys the fabric, validates shaping, awaits the
//! tracker barrier, verifies integrity and persists one result record.
//! Teardown is best-effort on every path.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::RunConfig;
use crate::error::{Result, TestbedError, EXIT_OK, EXIT_RUN_DEADLINE, EXIT_VALIDATION_FAILED};
use crate::fabric::builder::{write_topology, TOPOLOGY_NAME, TOPOLOGY_PREFIX, TRACKER_NODE};
use crate::fabric::{build_topology, FabricSettings, TopologyDoc};
use crate::plan;
use crate::runtime::EndpointRuntime;
use crate::sampler::Sampler;
use crate::topology::{
    allocate_bandwidth, build_catalog, AllocatedEdge, CapacityPartitioner, Overlay,
    OverlayPartitioner, Peer,
};
use crate::transfer::endpoint::{barrier_deadline, APP_DIR, METRICS_FILE, TRACKER_RESULT_FILE};
use crate::transfer::receiver::TransferMetrics;
use crate::transfer::tracker::BarrierReport;
use crate::validate::quality::QualityOptions;
use crate::validate::{
    append_result, hash_file_hex, next_test_id, validate_edges, verify_artifacts,
    IntegrityStatus, ResultRecord, Stats,
};

/// Everything `generate` leaves behind for the later phases.
#[derive(Debug)]
pub struct GeneratedPlan {
    pub peers: Vec<Peer>,
    pub overlay: Overlay,
    pub allocated: Vec<AllocatedEdge>,
    pub doc: TopologyDoc,
    pub topology_path: PathBuf,
    pub connection_details_path: PathBuf,
}

/// Samples profiles, plans the overlay, allocates bandwidth and writes all
/// plan artifacts plus the topology document.
pub fn generate(config: &RunConfig) -> Result<GeneratedPlan> {
    config.validate()?;
    std::fs::create_dir_all(&config.output_dir)?;

    info!(
        "generating plan: {} peers, {} overlay, {} byte artifact, seed {}",
        config.peer_count,
        if config.use_superpeers { "two-tier" } else { "star" },
        config.file_bytes,
        config.seed
    );

    let mut sampler = Sampler::new(config.seed);
    let mut peers = vec![sampler.sample_origin()];
    peers.extend(sampler.sample_peers(config.peer_count)?);

    plan::write_network_statistics(&config.output_dir, &peers)?;

    let catalog = build_catalog(&peers);
    plan::write_input_data(
        &config.output_dir,
        &peers,
        &catalog,
        "mydocument.pdf",
        config.file_bytes,
    )?;

    let overlay = if config.use_superpeers {
        let partitioner = CapacityPartitioner {
            superpeer_count: config.superpeer_count,
        };
        Overlay::two_tier(&partitioner.partition(&peers)?)
    } else {
        Overlay::star(&peers)
    };
    overlay.validate(&peers)?;
    plan::write_output_data(&config.output_dir, &overlay, config.peer_count)?;

    let allocated = allocate_bandwidth(&peers, &overlay)?;
    let connection_details_path =
        plan::write_connection_details(&config.output_dir, &allocated, config.peer_count)?;
    plan::log_allocation_summary(&allocated, config.file_bytes);

    let settings = FabricSettings {
        image: config.image.clone(),
        endpoint_binary: config.endpoint_binary.clone(),
        artifact_path: config.artifact_path.clone(),
        connection_details_path: connection_details_path.clone(),
        shaping_script_path: config.shaping_script_path.clone(),
    };
    let doc = build_topology(&peers, &overlay, &settings)?;
    let topology_path = write_topology(&doc, &config.output_dir)?;

    Ok(GeneratedPlan {
        peers,
        overlay,
        allocated,
        doc,
        topology_path,
        connection_details_path,
    })
}

/// Knobs of the run phases; defaults derive from the fabric size.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub quality: QualityOptions,
    pub barrier_poll_interval: Duration,
    pub run_deadline: Duration,
}

impl RunOptions {
    pub fn for_total_peers(total_peers: usize) -> Self {
        RunOptions {
            quality: QualityOptions::default(),
            barrier_poll_interval: Duration::from_secs(10),
            // The endpoints' own barrier deadline plus coordinator slack.
            run_deadline: barrier_deadline(total_peers) + Duration::from_secs(120),
        }
    }
}

/// Outcome of a full run: the persisted record plus every surfaced failure.
#[derive(Debug)]
pub struct RunOutcome {
    pub record: ResultRecord,
    pub failures: Vec<TestbedError>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.failures.is_empty() {
            EXIT_OK
        } else if self
            .failures
            .iter()
            .any(|f| matches!(f, TestbedError::RunDeadline(_)))
        {
            EXIT_RUN_DEADLINE
        } else {
            EXIT_VALIDATION_FAILED
        }
    }
}

/// Polls the tracker's persisted barrier report until it appears or the
/// deadline expires.
fn await_barrier(
    runtime: &dyn EndpointRuntime,
    options: &RunOptions,
) -> std::result::Result<BarrierReport, TestbedError> {
    let started = Instant::now();
    let command = format!("cat {APP_DIR}/{TRACKER_RESULT_FILE}");
    loop {
        if let Ok(output) = runtime.exec(TRACKER_NODE, &command) {
            if let Ok(report) = serde_json::from_str::<BarrierReport>(&output) {
                return Ok(report);
            }
        }
        if started.elapsed() >= options.run_deadline {
            return Err(TestbedError::RunDeadline(options.run_deadline.as_secs()));
        }
        thread::sleep(options.barrier_poll_interval);
    }
}

/// Collects the per-endpoint transfer metrics written by receivers. Missing
/// metrics are tolerated; the record aggregates whatever arrived.
fn collect_transfer_metrics(
    runtime: &dyn EndpointRuntime,
    overlay: &Overlay,
) -> Vec<TransferMetrics> {
    let command = format!("cat {APP_DIR}/{METRICS_FILE}");
    let mut collected = Vec::new();
    for edge in &overlay.edges {
        match runtime.exec(&edge.target, &command) {
            Ok(output) => match serde_json::from_str::<TransferMetrics>(&output) {
                Ok(metrics) => collected.push(metrics),
                Err(e) => warn!("endpoint {}: unreadable metrics: {e}", edge.target),
            },
            Err(e) => warn!("endpoint {}: no transfer metrics: {e}", edge.target),
        }
    }
    collected
}

fn run_phases(
    config: &RunConfig,
    plan: &GeneratedPlan,
    runtime: &dyn EndpointRuntime,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let mut failures: Vec<TestbedError> = Vec::new();

    // Per-edge shaping quality, with retries inside.
    let measurements = validate_edges(runtime, &plan.doc, &plan.allocated, &options.quality)?;
    for m in measurements.iter().filter(|m| !m.passed) {
        failures.push(TestbedError::ShapingDrift {
            edge_source: m.source.clone(),
            target: m.target.clone(),
            bandwidth_error: m.bandwidth_error,
            latency_error: m.latency_error,
        });
    }

    // Dissemination barrier.
    match await_barrier(runtime, options) {
        Ok(report) if report.complete => {
            info!(
                "barrier complete: {} confirmations in {} ms",
                report.confirmations, report.total_ms
            );
        }
        Ok(report) => failures.push(TestbedError::BarrierIncomplete {
            observed: report.confirmations,
            expected: report.expected,
        }),
        Err(e) => failures.push(e),
    }

    // Artifact integrity.
    let origin_hash = hash_file_hex(&config.artifact_path)?;
    for outcome in verify_artifacts(runtime, &plan.overlay, &origin_hash)? {
        match outcome.status {
            IntegrityStatus::Match => {}
            IntegrityStatus::Missing => {
                failures.push(TestbedError::MissingArtifact(outcome.endpoint))
            }
            IntegrityStatus::Mismatch { actual } => failures.push(TestbedError::HashMismatch {
                endpoint: outcome.endpoint,
                expected: origin_hash.clone(),
                actual,
            }),
        }
    }
    let hashes_match = !failures.iter().any(|f| {
        matches!(
            f,
            TestbedError::MissingArtifact(_) | TestbedError::HashMismatch { .. }
        )
    });

    // Timing metrics from the receivers.
    let transfer_metrics = collect_transfer_metrics(runtime, &plan.overlay);

    let passed: Vec<&crate::validate::EdgeMeasurement> =
        measurements.iter().filter(|m| m.passed).collect();
    let record = ResultRecord {
        test_id: next_test_id(&config.output_dir.join("test-id.txt"))?,
        peer_count: config.peer_count,
        overlay: if config.use_superpeers {
            "two-tier".to_string()
        } else {
            "star".to_string()
        },
        file_bytes: config.file_bytes,
        bandwidth_kbit: Stats::over(
            &plan
                .allocated
                .iter()
                .map(|e| e.bandwidth as f64)
                .collect::<Vec<_>>(),
        ),
        latency_error_pct: Stats::over(
            &passed.iter().map(|m| m.latency_error).collect::<Vec<_>>(),
        ),
        bandwidth_error_pct: Stats::over(
            &passed.iter().map(|m| m.bandwidth_error).collect::<Vec<_>>(),
        ),
        connection_ms: Stats::over(
            &transfer_metrics
                .iter()
                .map(|m| m.connection_ms as f64)
                .collect::<Vec<_>>(),
        ),
        transfer_ms: Stats::over(
            &transfer_metrics
                .iter()
                .map(|m| m.transfer_ms as f64)
                .collect::<Vec<_>>(),
        ),
        total_ms: Stats::over(
            &transfer_metrics
                .iter()
                .map(|m| m.total_ms as f64)
                .collect::<Vec<_>>(),
        ),
        hashes_match,
        status: if failures.is_empty() {
            "ok".to_string()
        } else {
            let mut kinds: Vec<String> =
                failures.iter().map(|f| f.to_string()).collect();
            kinds.truncate(3);
            kinds.join("; ").replace(',', ";")
        },
    };
    append_result(&config.output_dir.join("results.csv"), &record)?;

    for failure in &failures {
        warn!("run failure: {failure}");
    }
    Ok(RunOutcome { record, failures })
}

/// Full pipeline: generate, deploy, validate, record, tear down.
pub fn execute(
    config: &RunConfig,
    runtime: &dyn EndpointRuntime,
    options: &RunOptions,
) -> Result<RunOutcome> {
    let plan = generate(config)?;
    runtime.deploy(&plan.topology_path)?;
    let outcome = run_phases(config, &plan, runtime, options);
    runtime.destroy(&plan.topology_path)?;
    outcome
}

/// Quality and integrity checks against an already deployed fabric, using
/// the artifacts a previous `generate` left in the output directory.
pub fn validate_deployed(
    config: &RunConfig,
    runtime: &dyn EndpointRuntime,
    quality: &QualityOptions,
) -> Result<Vec<TestbedError>> {
    let doc_path = config.output_dir.join("testbed-topology.yml");
    let doc: TopologyDoc = serde_yaml::from_str(&std::fs::read_to_string(&doc_path)?)?;
    let allocated = plan::read_connection_details(
        &config
            .output_dir
            .join(format!("connection-details-{}.json", config.peer_count)),
    )?;
    let overlay = plan::read_output_data(
        &config
            .output_dir
            .join(format!("output-data-{}.json", config.peer_count)),
    )?;

    let mut failures = Vec::new();
    for m in validate_edges(runtime, &doc, &allocated, quality)? {
        if !m.passed {
            failures.push(TestbedError::ShapingDrift {
                edge_source: m.source,
                target: m.target,
                bandwidth_error: m.bandwidth_error,
                latency_error: m.latency_error,
            });
        }
    }

    let origin_hash = hash_file_hex(&config.artifact_path)?;
    for outcome in verify_artifacts(runtime, &overlay, &origin_hash)? {
        match outcome.status {
            IntegrityStatus::Match => {}
            IntegrityStatus::Missing => {
                failures.push(TestbedError::MissingArtifact(outcome.endpoint))
            }
            IntegrityStatus::Mismatch { actual } => failures.push(TestbedError::HashMismatch {
                endpoint: outcome.endpoint,
                expected: origin_hash.clone(),
                actual,
            }),
        }
    }
    Ok(failures)
}

/// Container name prefix of the deployed fabric, for the CLI's runtime.
pub fn runtime_prefix() -> (&'static str, &'static str) {
    (TOPOLOGY_PREFIX, TOPOLOGY_NAME)
}
