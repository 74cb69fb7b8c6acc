//! peerbed - container-based testbed harness for evaluating peer-to-peer
//! file distribution overlays.
//!
//! The coordinator samples realistic peer profiles, plans a dissemination
//! overlay with per-edge shaped bandwidth, materializes it as a containerlab
//! topology, drives the transfer workload and validates both the shaping
//! fidelity and the integrity of every received artifact.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fabric;
pub mod plan;
pub mod runtime;
pub mod sampler;
pub mod topology;
pub mod transfer;
pub mod validate;
