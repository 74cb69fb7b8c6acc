//! Validation: per-edge shaping quality, artifact integrity and result
//! aggregation.

pub mod integrity;
pub mod probes;
pub mod quality;
pub mod report;

pub use integrity::{hash_file_hex, verify_artifacts, IntegrityOutcome, IntegrityStatus};
pub use probes::{acceptable_latency_error_pct, error_percentage, parse_iperf_receiver_kbit, parse_ping_avg_ms};
pub use quality::{validate_edges, EdgeMeasurement, QualityOptions};
pub use report::{append_result, next_test_id, ResultRecord, Stats};
