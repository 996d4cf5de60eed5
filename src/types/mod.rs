#![forbid(unsafe_code)]
//! Shared identifiers, the error type, and checksum helpers.

use std::fmt;
use std::path::PathBuf;

mod checksum;

pub use checksum::record_crc32;

/// Byte offset of a slot inside one of the backing files.
///
/// Node offsets double as child pointers inside internal nodes, and value
/// offsets are what a node stores in its value cells.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct SlotOffset(pub u64);

impl SlotOffset {
    /// Offset zero always addresses a file header, never a slot.
    pub const NULL: SlotOffset = SlotOffset(0);

    /// Returns true for the null offset.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SlotOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SlotOffset {
    fn from(value: u64) -> Self {
        SlotOffset(value)
    }
}

impl From<SlotOffset> for u64 {
    fn from(value: SlotOffset) -> Self {
        value.0
    }
}

/// Errors surfaced by the store. Every variant is fatal to the operation that
/// produced it.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// A backing file could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: std::io::Error,
    },
    /// A read, write, sync, or length query failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk bytes do not describe a well-formed structure.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Arguments or configuration were rejected.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// An options document could not be parsed.
    #[error("cannot parse options: {0}")]
    Config(#[from] toml::de::Error),
    /// A previous operation failed part-way; reopen the store to recover.
    #[error("store poisoned by an interrupted operation; reopen to recover")]
    Poisoned,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SombraError>;
