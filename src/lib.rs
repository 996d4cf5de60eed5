//! Embedded ordered key-value store backed by a disk-resident B-tree.
//!
//! Keys and values are fixed-width types implementing [`FixedCodec`]. Every
//! public operation is all-or-nothing with respect to process crashes: an undo
//! log captures each overwritten byte range, and reopening the store rolls back
//! whatever operation was interrupted.
//!
//! ```no_run
//! use sombra_kv::{BTree, StorePaths, TreeOptions};
//!
//! # fn main() -> sombra_kv::Result<()> {
//! let paths = StorePaths::in_dir("/tmp/sombra-kv");
//! let mut tree: BTree<u64, u64> = BTree::open(&paths, TreeOptions::default())?;
//! tree.insert(&7, &49)?;
//! assert_eq!(tree.find(&7)?, Some(49));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::bytes::FixedCodec;
pub use storage::{BTree, CachePolicy, StorePaths, Synchronous, TreeOptions, TreeStats};
pub use types::{Result, SlotOffset, SombraError};
