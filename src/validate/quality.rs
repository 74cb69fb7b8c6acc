//! Per-edge shaping quality validation.
//!
//! For every shaped link the validator probes latency and throughput from
//! inside the source endpoint toward the target, compares against the
//! applied values and retries a drifting edge before flagging it.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use super::probes::{
    acceptable_latency_error_pct, error_percentage, parse_iperf_receiver_kbit, parse_ping_avg_ms,
    MAX_BANDWIDTH_ERROR_PCT,
};
use crate::error::{Result, TestbedError};
use crate::fabric::TopologyDoc;
use crate::runtime::EndpointRuntime;
use crate::topology::AllocatedEdge;
use crate::transfer::wiring::ConnectionRecord;

/// One probe pair taken from an endpoint's `CONNECTION_<i>` wiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub source: String,
    pub target: String,
    pub target_ip: String,
}

/// Measurement outcome of one shaped edge.
#[derive(Debug, Clone)]
pub struct EdgeMeasurement {
    pub source: String,
    pub target: String,
    pub applied_bandwidth: u32,
    pub applied_latency: f64,
    pub measured_bandwidth: f64,
    pub measured_latency: f64,
    pub bandwidth_error: f64,
    pub latency_error: f64,
    pub attempts: u32,
    pub passed: bool,
}

/// Validator knobs; the defaults match the probe tooling timings.
#[derive(Debug, Clone)]
pub struct QualityOptions {
    pub max_attempts: u32,
    /// Wait after starting the throughput server before the client runs.
    pub server_warmup: Duration,
}

impl Default for QualityOptions {
    fn default() -> Self {
        QualityOptions {
            max_attempts: 3,
            server_warmup: Duration::from_secs(5),
        }
    }
}

/// Extracts every probe pair from the topology document's endpoint wiring.
pub fn connection_probes(doc: &TopologyDoc) -> Result<Vec<ProbeTarget>> {
    let mut probes = Vec::new();
    for (endpoint, node) in &doc.topology.nodes {
        let mut indices: Vec<u32> = node
            .env
            .keys()
            .filter_map(|key| key.strip_prefix("CONNECTION_"))
            .filter_map(|i| i.parse().ok())
            .collect();
        indices.sort_unstable();
        for i in indices {
            let raw = &node.env[&format!("CONNECTION_{i}")];
            let record = ConnectionRecord::parse(raw)?;
            probes.push(ProbeTarget {
                source: endpoint.clone(),
                target: record.target_peer,
                target_ip: record.target_ip,
            });
        }
    }
    Ok(probes)
}

fn measure_once(
    runtime: &dyn EndpointRuntime,
    probe: &ProbeTarget,
    options: &QualityOptions,
) -> Result<(f64, f64)> {
    let ping_output = runtime.exec(&probe.source, &format!("ping -c 4 {}", probe.target_ip))?;
    runtime.exec_background(&probe.target, "iperf3 -s -1")?;
    thread::sleep(options.server_warmup);
    let iperf_output = runtime.exec(&probe.source, &format!("iperf3 -c {}", probe.target_ip))?;

    let latency = parse_ping_avg_ms(&ping_output).ok_or_else(|| {
        TestbedError::Config(format!(
            "unparseable ping output from {}: {ping_output:?}",
            probe.source
        ))
    })?;
    let bandwidth = parse_iperf_receiver_kbit(&iperf_output).ok_or_else(|| {
        TestbedError::Config(format!(
            "unparseable iperf output from {}: {iperf_output:?}",
            probe.source
        ))
    })?;
    Ok((latency, bandwidth))
}

/// Probes one edge with retries and returns its final measurement.
fn validate_edge(
    runtime: &dyn EndpointRuntime,
    probe: &ProbeTarget,
    applied: &AllocatedEdge,
    options: &QualityOptions,
) -> Result<EdgeMeasurement> {
    let applied_latency = applied.latency_ms();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let (measured_latency, measured_bandwidth) = measure_once(runtime, probe, options)?;

        let bandwidth_error = error_percentage(measured_bandwidth, applied.bandwidth as f64);
        let latency_error = error_percentage(measured_latency, applied_latency);
        let latency_budget = acceptable_latency_error_pct(measured_bandwidth);
        let passed =
            bandwidth_error <= MAX_BANDWIDTH_ERROR_PCT && latency_error <= latency_budget;

        info!(
            "edge {} -> {}: measured {:.0} Kbit/s / {:.2} ms against applied {} Kbit/s / {:.2} ms \
             (errors {:.2}% / {:.2}%, attempt {})",
            probe.source,
            probe.target,
            measured_bandwidth,
            measured_latency,
            applied.bandwidth,
            applied_latency,
            bandwidth_error,
            latency_error,
            attempts
        );

        if passed || attempts >= options.max_attempts {
            if !passed {
                warn!(
                    "edge {} -> {} kept drifting after {} attempts",
                    probe.source, probe.target, attempts
                );
            }
            return Ok(EdgeMeasurement {
                source: probe.source.clone(),
                target: probe.target.clone(),
                applied_bandwidth: applied.bandwidth,
                applied_latency,
                measured_bandwidth,
                measured_latency,
                bandwidth_error,
                latency_error,
                attempts,
                passed,
            });
        }
    }
}

/// Validates every shaped edge in the document against its applied values.
///
/// Edges the planner allocated but the document does not wire (or vice
/// versa) are a configuration error.
pub fn validate_edges(
    runtime: &dyn EndpointRuntime,
    doc: &TopologyDoc,
    allocated: &[AllocatedEdge],
    options: &QualityOptions,
) -> Result<Vec<EdgeMeasurement>> {
    let applied_by_pair: HashMap<(&str, &str), &AllocatedEdge> = allocated
        .iter()
        .map(|edge| ((edge.source.as_str(), edge.target.as_str()), edge))
        .collect();

    let probes = connection_probes(doc)?;
    let mut measurements = Vec::with_capacity(probes.len());
    for probe in &probes {
        let applied = applied_by_pair
            .get(&(probe.source.as_str(), probe.target.as_str()))
            .ok_or_else(|| {
                TestbedError::Config(format!(
                    "no allocation for wired edge {} -> {}",
                    probe.source, probe.target
                ))
            })?;
        measurements.push(validate_edge(runtime, probe, applied, options)?);
    }

    let drifting = measurements.iter().filter(|m| !m.passed).count();
    if drifting > 0 {
        warn!("{drifting} of {} edges show shaping drift", measurements.len());
    } else {
        info!("all {} edges within tolerance", measurements.len());
    }
    Ok(measurements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::Path;

    /// Scripted runtime: pre-programmed ping/iperf outputs per attempt.
    struct ScriptedRuntime {
        ping: String,
        iperf_by_attempt: RefCell<Vec<String>>,
        exec_count: RefCell<usize>,
    }

    impl ScriptedRuntime {
        fn new(ping: &str, iperf_runs: &[&str]) -> Self {
            ScriptedRuntime {
                ping: ping.to_string(),
                iperf_by_attempt: RefCell::new(
                    iperf_runs.iter().rev().map(|s| s.to_string()).collect(),
                ),
                exec_count: RefCell::new(0),
            }
        }
    }

    impl EndpointRuntime for ScriptedRuntime {
        fn deploy(&self, _topology: &Path) -> Result<()> {
            Ok(())
        }
        fn destroy(&self, _topology: &Path) -> Result<()> {
            Ok(())
        }
        fn exec(&self, _endpoint: &str, command: &str) -> Result<String> {
            *self.exec_count.borrow_mut() += 1;
            if command.starts_with("ping") {
                Ok(self.ping.clone())
            } else {
                let mut runs = self.iperf_by_attempt.borrow_mut();
                let last = runs.last().cloned().unwrap_or_default();
                if runs.len() > 1 {
                    runs.pop();
                }
                Ok(last)
            }
        }
        fn exec_background(&self, _endpoint: &str, _command: &str) -> Result<()> {
            Ok(())
        }
    }

    fn options() -> QualityOptions {
        QualityOptions {
            max_attempts: 3,
            server_warmup: Duration::ZERO,
        }
    }

    fn probe() -> ProbeTarget {
        ProbeTarget {
            source: "origin".to_string(),
            target: "1".to_string(),
            target_ip: "172.20.21.3".to_string(),
        }
    }

    fn applied(bandwidth: u32, latency: &str) -> AllocatedEdge {
        AllocatedEdge {
            source: "origin".to_string(),
            target: "1".to_string(),
            bandwidth,
            latency: latency.to_string(),
            loss: "0.0050".to_string(),
        }
    }

    fn ping(avg: f64) -> String {
        format!("rtt min/avg/max/mdev = 50.000/{avg:.3}/90.000/1.000 ms\n")
    }

    fn iperf(kbit: f64) -> String {
        format!("[  5]   0.00-10.04  sec  1.1 MBytes  {:.0} Kbits/sec   receiver\n", kbit)
    }

    #[test]
    fn edge_within_tier_passes_first_attempt() {
        // Applied 1500 Kbit/s at 60 ms, measured 1460 / 68: bandwidth error
        // 2.67%, tier(1460) = 15%, latency error 13.33% -> accepted.
        let runtime = ScriptedRuntime::new(&ping(68.0), &[&iperf(1460.0)]);
        let measurement =
            validate_edge(&runtime, &probe(), &applied(1500, "60.00"), &options()).unwrap();
        assert!(measurement.passed);
        assert_eq!(measurement.attempts, 1);
        assert!((measurement.bandwidth_error - 2.6667).abs() < 1e-3);
        assert!((measurement.latency_error - 13.3333).abs() < 1e-3);
    }

    #[test]
    fn tier_miss_retries_and_marks_drift() {
        // Applied 7950 at 56.71 ms, measured 7800 / 66.00 on every attempt:
        // bandwidth error 1.89% passes, tier(7800) = 10% but the latency
        // error is 16.38% -> three attempts, then drift.
        let runtime = ScriptedRuntime::new(&ping(66.0), &[&iperf(7800.0)]);
        let measurement =
            validate_edge(&runtime, &probe(), &applied(7950, "56.71"), &options()).unwrap();
        assert!(!measurement.passed);
        assert_eq!(measurement.attempts, 3);
        assert!((measurement.bandwidth_error - 1.8868).abs() < 1e-3);
        assert!((measurement.latency_error - 16.3816).abs() < 1e-3);
    }

    #[test]
    fn recovery_on_a_later_attempt_passes() {
        // First attempt drifts hard on bandwidth; second lands in bounds.
        let runtime = ScriptedRuntime::new(&ping(60.0), &[&iperf(900.0), &iperf(1480.0)]);
        let measurement =
            validate_edge(&runtime, &probe(), &applied(1500, "60.00"), &options()).unwrap();
        assert!(measurement.passed);
        assert_eq!(measurement.attempts, 2);
    }

    #[test]
    fn probes_come_from_the_document_wiring() {
        use crate::fabric::{build_topology, FabricSettings};
        use crate::topology::{Overlay, Peer, ORIGIN};

        let peers: Vec<Peer> = [ORIGIN, "1", "2"]
            .iter()
            .map(|n| Peer {
                name: n.to_string(),
                max_upload: 1000,
                max_download: 10000,
                latency: 20.0,
                loss: 0.001,
            })
            .collect();
        let overlay = Overlay::star(&peers);
        let doc = build_topology(
            &peers,
            &overlay,
            &FabricSettings {
                image: "peerbed-testbed".to_string(),
                endpoint_binary: "/usr/local/bin/peerbed".to_string(),
                artifact_path: "/data/a.pdf".into(),
                connection_details_path: "/data/details.json".into(),
                shaping_script_path: "/data/shape.sh".into(),
            },
        )
        .unwrap();

        let probes = connection_probes(&doc).unwrap();
        assert_eq!(probes.len(), 2);
        assert!(probes.iter().all(|p| p.source == ORIGIN));
        assert_eq!(probes[0].target, "1");
        assert_eq!(probes[0].target_ip, "172.20.21.3");
    }
}
