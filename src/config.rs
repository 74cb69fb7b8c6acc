//! Run configuration.
//!
//! Everything a run needs beyond the CLI defaults: fabric size, overlay
//! variant, artifact selection and the host paths of the mounted inputs.

use std::path::PathBuf;

use crate::error::{Result, TestbedError};

/// Exact artifact sizes per supported megabyte choice.
const ARTIFACT_SIZES: &[(u32, u64)] = &[
    (2, 2_239_815),
    (4, 4_293_938),
    (8, 8_869_498),
    (16, 15_890_720),
    (32, 32_095_088),
    (64, 67_108_864),
    (128, 134_217_728),
];

/// Resolves a `--file-size-mb` choice to its byte size.
pub fn artifact_size_bytes(choice_mb: u32) -> Result<u64> {
    ARTIFACT_SIZES
        .iter()
        .find(|(mb, _)| *mb == choice_mb)
        .map(|(_, bytes)| *bytes)
        .ok_or_else(|| {
            let choices: Vec<String> =
                ARTIFACT_SIZES.iter().map(|(mb, _)| mb.to_string()).collect();
            TestbedError::Config(format!(
                "unsupported artifact size {choice_mb} MB (choices: {})",
                choices.join(", ")
            ))
        })
}

/// Default super-peer count for a two-tier overlay: one relay per five
/// peers, always leaving at least one leaf.
pub fn default_superpeer_count(peer_count: usize) -> usize {
    (peer_count / 5).clamp(1, peer_count.saturating_sub(1).max(1))
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Number of non-origin peers.
    pub peer_count: usize,
    pub use_superpeers: bool,
    pub superpeer_count: usize,
    pub file_bytes: u64,
    /// Host path of the source artifact.
    pub artifact_path: PathBuf,
    pub output_dir: PathBuf,
    pub seed: u64,
    pub image: String,
    /// Path of this binary inside the endpoint image.
    pub endpoint_binary: String,
    /// Host path of the shaping script mounted into every endpoint.
    pub shaping_script_path: PathBuf,
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.peer_count == 0 {
            return Err(TestbedError::Config(
                "at least one peer is required".to_string(),
            ));
        }
        if self.use_superpeers && self.superpeer_count >= self.peer_count {
            return Err(TestbedError::Config(format!(
                "{} super-peers leave no leaves among {} peers",
                self.superpeer_count, self.peer_count
            )));
        }
        Ok(())
    }
}
