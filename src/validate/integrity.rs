//! Artifact integrity verification.
//!
//! The origin artifact is hashed once on the coordinator; every non-origin
//! endpoint is then searched for its received copy, which is hashed inside
//! the endpoint and compared against the origin digest.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{info, warn};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::runtime::EndpointRuntime;
use crate::topology::{Overlay, ORIGIN};

/// Streaming SHA-256 of a local file, as a lowercase hex string.
pub fn hash_file_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Per-endpoint verification status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Match,
    /// No candidate path exists in the endpoint.
    Missing,
    /// A copy exists but its digest differs from the origin's.
    Mismatch { actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityOutcome {
    pub endpoint: String,
    pub status: IntegrityStatus,
}

impl IntegrityOutcome {
    pub fn is_match(&self) -> bool {
        self.status == IntegrityStatus::Match
    }
}

/// Candidate in-container paths for one endpoint's received copy, most
/// likely location first.
fn candidate_paths(feeder: Option<&str>) -> Vec<String> {
    let mut candidates = vec![
        "/app/receivedFromOrigin.pdf".to_string(),
        "/app/mydocument.pdf".to_string(),
    ];
    if let Some(feeder) = feeder {
        candidates.insert(0, format!("/app/receivedFrom-{feeder}.pdf"));
    }
    candidates
}

fn file_exists(runtime: &dyn EndpointRuntime, endpoint: &str, path: &str) -> bool {
    runtime
        .exec(
            endpoint,
            &format!("[ -f {path} ] && echo found || echo missing"),
        )
        .map(|output| output.trim() == "found")
        .unwrap_or(false)
}

fn remote_hash(runtime: &dyn EndpointRuntime, endpoint: &str, path: &str) -> Result<String> {
    let output = runtime.exec(endpoint, &format!("sha256sum {path} | awk '{{print $1}}'"))?;
    Ok(output.trim().to_string())
}

/// Verifies every non-origin endpoint of the overlay against `origin_hash`.
pub fn verify_artifacts(
    runtime: &dyn EndpointRuntime,
    overlay: &Overlay,
    origin_hash: &str,
) -> Result<Vec<IntegrityOutcome>> {
    let mut outcomes = Vec::new();

    for edge in &overlay.edges {
        let endpoint = edge.target.as_str();
        let feeder = overlay.feeder_of(endpoint).filter(|f| *f != ORIGIN);

        let mut status = IntegrityStatus::Missing;
        for candidate in candidate_paths(feeder) {
            if !file_exists(runtime, endpoint, &candidate) {
                continue;
            }
            let actual = remote_hash(runtime, endpoint, &candidate)?;
            status = if actual == origin_hash {
                IntegrityStatus::Match
            } else {
                IntegrityStatus::Mismatch { actual }
            };
            break;
        }

        match &status {
            IntegrityStatus::Match => info!("endpoint {endpoint}: artifact hash matches"),
            IntegrityStatus::Missing => warn!("endpoint {endpoint}: no received artifact found"),
            IntegrityStatus::Mismatch { actual } => warn!(
                "endpoint {endpoint}: hash mismatch ({actual} instead of {origin_hash})"
            ),
        }
        outcomes.push(IntegrityOutcome {
            endpoint: endpoint.to_string(),
            status,
        });
    }

    Ok(outcomes)
}
