//! Error taxonomy for the testbed harness.
//!
//! Design-time errors (sampling, overlay, allocation) abort the run before
//! any fabric exists. Run-level and validator errors are surfaced to the
//! coordinator, which records partial metrics, tears the fabric down
//! best-effort and exits with the matching code.

use thiserror::Error;

/// Process exit code when every check passes.
pub const EXIT_OK: i32 = 0;
/// Process exit code when any validator check fails.
pub const EXIT_VALIDATION_FAILED: i32 = 1;
/// Process exit code when the run-wide deadline expires.
pub const EXIT_RUN_DEADLINE: i32 = 2;
/// Process exit code for configuration or unsupported input.
pub const EXIT_CONFIG: i32 = 3;

#[derive(Debug, Error)]
pub enum TestbedError {
    /// The rejection sampler failed to draw a non-negative value within its
    /// attempt budget. Points at inconsistent distribution parameters.
    #[error("sampler could not satisfy '{quantity}' for {technology} after {attempts} attempts")]
    SamplerUnsatisfiable {
        technology: &'static str,
        quantity: &'static str,
        attempts: u32,
    },

    /// The overlay handed back by the partitioner violates an invariant.
    #[error("invalid overlay: {0}")]
    OverlayInvalid(String),

    /// A source peer has no upload budget to distribute.
    #[error("peer '{0}' has no uplink budget to allocate")]
    NoUplinkBudget(String),

    /// The allocator exceeded a source's upload ceiling. Internal invariant
    /// violation; never expected on any input the planner accepts.
    #[error("allocation for '{peer}' sums to {allocated} Kbit/s, above its ceiling of {ceiling}")]
    OverAllocation {
        peer: String,
        allocated: u64,
        ceiling: u64,
    },

    /// A connection could not be established within the attempt budget.
    #[error("no connection to {addr} after {attempts} attempts")]
    ConnectRetry { addr: String, attempts: u32 },

    /// A listener could not be bound within the attempt budget.
    #[error("could not bind {addr} after {attempts} attempts")]
    BindRetry { addr: String, attempts: u32 },

    /// A shaped edge failed its quality bounds on every validation attempt.
    #[error("shaping drift on edge {edge_source} -> {target}: bandwidth error {bandwidth_error:.2}%, latency error {latency_error:.2}%")]
    ShapingDrift {
        edge_source: String,
        target: String,
        bandwidth_error: f64,
        latency_error: f64,
    },

    /// No candidate artifact path exists inside an endpoint.
    #[error("no received artifact found in endpoint '{0}'")]
    MissingArtifact(String),

    /// An endpoint's artifact hash differs from the origin hash.
    #[error("hash mismatch in endpoint '{endpoint}': got {actual}, expected {expected}")]
    HashMismatch {
        endpoint: String,
        expected: String,
        actual: String,
    },

    /// The tracker barrier did not complete before its deadline.
    #[error("barrier incomplete: {observed} of {expected} confirmations before deadline")]
    BarrierIncomplete { observed: usize, expected: usize },

    /// The run-wide deadline expired with work still in flight.
    #[error("run deadline of {0} s reached")]
    RunDeadline(u64),

    /// Configuration or unsupported input.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("environment variable {name}: {reason}")]
    Environment { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl TestbedError {
    /// Maps an error kind to the process exit code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            TestbedError::SamplerUnsatisfiable { .. }
            | TestbedError::OverlayInvalid(_)
            | TestbedError::NoUplinkBudget(_)
            | TestbedError::Config(_)
            | TestbedError::Environment { .. } => EXIT_CONFIG,
            TestbedError::RunDeadline(_) => EXIT_RUN_DEADLINE,
            _ => EXIT_VALIDATION_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, TestbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn design_time_errors_map_to_config_exit() {
        assert_eq!(TestbedError::OverlayInvalid("x".into()).exit_code(), EXIT_CONFIG);
        assert_eq!(TestbedError::NoUplinkBudget("3".into()).exit_code(), EXIT_CONFIG);
        assert_eq!(
            TestbedError::Config("bad size".into()).exit_code(),
            EXIT_CONFIG
        );
    }

    #[test]
    fn run_failures_map_to_validation_exit() {
        let drift = TestbedError::ShapingDrift {
            edge_source: "origin".into(),
            target: "1".into(),
            bandwidth_error: 7.5,
            latency_error: 12.0,
        };
        assert_eq!(drift.exit_code(), EXIT_VALIDATION_FAILED);
        assert_eq!(
            TestbedError::MissingArtifact("2".into()).exit_code(),
            EXIT_VALIDATION_FAILED
        );
        assert_eq!(TestbedError::RunDeadline(900).exit_code(), EXIT_RUN_DEADLINE);
    }
}
