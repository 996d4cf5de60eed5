//! Ordered key-value storage built on the primitives layer.
//!
//! Implements the B-tree engine and the options used to open it.

/// B-tree data structure implementation.
///
/// Node encoding, the insert/delete/search engine, statistics, and verification.
pub mod btree;

mod options;

pub use btree::{BTree, TreeStats, VerifyReport};
pub use options::{CachePolicy, StorePaths, Synchronous, TreeOptions, MAX_MIN_DEGREE};
