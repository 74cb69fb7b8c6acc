//! Probe output parsing and acceptance thresholds.
//!
//! Latency comes from four back-to-back ping round trips; throughput from a
//! one-shot iperf3 run, taking the receiver-side bitrate. Both parsers work
//! on the raw tool output captured inside the source endpoint.

use regex::Regex;

/// Mean RTT in milliseconds from `ping -c 4` output.
///
/// Accepts both the iputils (`rtt min/avg/max/mdev = ...`) and busybox
/// (`round-trip min/avg/max = ...`) summary lines; decimal commas are
/// normalized before parsing.
pub fn parse_ping_avg_ms(output: &str) -> Option<f64> {
    let re = Regex::new(r"min/avg/max[^=]*=\s*[\d.,]+/([\d.,]+)/").expect("static regex");
    let captures = re.captures(output)?;
    captures[1].replace(',', ".").parse().ok()
}

/// Receiver-side bitrate in Kbit/s from iperf3 output.
pub fn parse_iperf_receiver_kbit(output: &str) -> Option<f64> {
    let re = Regex::new(r"([\d.]+)\s+([GMK]?)bits/sec").expect("static regex");
    for line in output.lines() {
        if !line.contains("receiver") {
            continue;
        }
        if let Some(captures) = re.captures(line) {
            let value: f64 = captures[1].parse().ok()?;
            let kbit = match &captures[2] {
                "G" => value * 1_000_000.0,
                "M" => value * 1000.0,
                "K" => value,
                _ => value / 1000.0,
            };
            return Some(kbit);
        }
    }
    None
}

/// `|measured - applied| / applied * 100`.
pub fn error_percentage(measured: f64, applied: f64) -> f64 {
    (measured - applied).abs() / applied * 100.0
}

/// Acceptable latency error in percent, tiered by measured bandwidth: slow
/// links tolerate proportionally more jitter around the shaped delay.
pub fn acceptable_latency_error_pct(measured_bandwidth_kbit: f64) -> f64 {
    if measured_bandwidth_kbit < 100.0 {
        35.0
    } else if measured_bandwidth_kbit <= 200.0 {
        30.0
    } else if measured_bandwidth_kbit <= 500.0 {
        25.0
    } else if measured_bandwidth_kbit <= 1000.0 {
        20.0
    } else if measured_bandwidth_kbit <= 3000.0 {
        15.0
    } else {
        10.0
    }
}

/// Required bandwidth accuracy in percent, independent of the tier.
pub const MAX_BANDWIDTH_ERROR_PCT: f64 = 5.0;
