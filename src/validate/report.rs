//! Result aggregation and persistence.
//!
//! A run produces one row in an append-only CSV keyed by a monotonic test
//! id; the id counter and the CSV are the only state that survives a run.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use log::info;

use crate::error::Result;

/// Min/mean/max over a metric series; all zero for an empty series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

impl Stats {
    pub fn over(values: &[f64]) -> Stats {
        if values.is_empty() {
            return Stats {
                min: 0.0,
                mean: 0.0,
                max: 0.0,
            };
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &value in values {
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }
        Stats {
            min,
            mean: sum / values.len() as f64,
            max,
        }
    }
}

/// One persisted run outcome.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub test_id: u64,
    pub peer_count: usize,
    pub overlay: String,
    pub file_bytes: u64,
    pub bandwidth_kbit: Stats,
    pub latency_error_pct: Stats,
    pub bandwidth_error_pct: Stats,
    pub connection_ms: Stats,
    pub transfer_ms: Stats,
    pub total_ms: Stats,
    pub hashes_match: bool,
    pub status: String,
}

const CSV_HEADER: &str = "testId,timestamp,peerCount,overlay,fileBytes,\
bandwidthMin,bandwidthAvg,bandwidthMax,\
latencyErrorMin,latencyErrorAvg,latencyErrorMax,\
bandwidthErrorMin,bandwidthErrorAvg,bandwidthErrorMax,\
connectionTimeMin,connectionTimeAvg,connectionTimeMax,\
transferTimeMin,transferTimeAvg,transferTimeMax,\
totalTimeMin,totalTimeAvg,totalTimeMax,\
hashesMatch,status";

fn stats_fields(stats: &Stats) -> String {
    format!("{:.2},{:.2},{:.2}", stats.min, stats.mean, stats.max)
}

/// Reads, increments and persists the monotonic test id.
pub fn next_test_id(counter_path: &Path) -> Result<u64> {
    let current: u64 = match std::fs::read_to_string(counter_path) {
        Ok(contents) => contents.trim().parse().unwrap_or(0),
        Err(_) => 0,
    };
    let next = current + 1;
    if let Some(parent) = counter_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(counter_path, next.to_string())?;
    Ok(next)
}

/// Appends one record to the results CSV, writing the header first when the
/// file is new.
pub fn append_result(csv_path: &Path, record: &ResultRecord) -> Result<()> {
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let fresh = !csv_path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(csv_path)?;
    if fresh {
        writeln!(file, "{CSV_HEADER}")?;
    }
    writeln!(
        file,
        "{},{},{},{},{},{},{},{},{},{},{},{},{}",
        record.test_id,
        Utc::now().to_rfc3339(),
        record.peer_count,
        record.overlay,
        record.file_bytes,
        stats_fields(&record.bandwidth_kbit),
        stats_fields(&record.latency_error_pct),
        stats_fields(&record.bandwidth_error_pct),
        stats_fields(&record.connection_ms),
        stats_fields(&record.transfer_ms),
        stats_fields(&record.total_ms),
        record.hashes_match,
        record.status,
    )?;
    info!(
        "recorded test {} ({} peers, {} overlay) in {}",
        record.test_id,
        record.peer_count,
        record.overlay,
        csv_path.display()
    );
    Ok(())
}
