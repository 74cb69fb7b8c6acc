//! Transfer orchestration: per-endpoint workload roles, the stream sender
//! and receiver, and the tracker barrier.

pub mod endpoint;
pub mod receiver;
pub mod sender;
pub mod tracker;
pub mod wiring;

pub use endpoint::run_endpoint;
pub use receiver::{receive_file, TransferMetrics};
pub use sender::serve_file;
pub use tracker::{run_tracker, BarrierReport};
pub use wiring::{ConnectionRecord, Role, RoleConfig};
