#![forbid(unsafe_code)]

//! Disk-resident B-tree with crash-atomic operations.

/// Fixed-size node slot encoding.
pub mod node;
mod stats;
mod tree;
mod verify;

pub use stats::TreeStats;
pub use tree::BTree;
pub use verify::{VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity};
