use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use crate::primitives::pager::CachePolicy;
use crate::primitives::wal::UndoLogOptions;
use crate::types::{Result, SombraError};

/// Largest branching factor whose node layout still fits the header field.
pub const MAX_MIN_DEGREE: usize = u16::MAX as usize;

/// Durability mode for the undo log and data files.
///
/// Every mode rolls back an operation interrupted by a process crash, since
/// the operating system keeps the written log records. Only `Full` also rolls
/// back an operation cut short by power loss: the other modes do not order
/// log records on disk ahead of the overwrites they protect.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Synchronous {
    /// Sync the log after every record, before the overwrite it protects, and
    /// the data files before each operation finishes.
    Full,
    /// Sync the data files and the log once as each operation finishes.
    ///
    /// A completed operation survives power loss, but one interrupted by it
    /// may be left half applied.
    #[default]
    Normal,
    /// No explicit syncs.
    Off,
}

impl Synchronous {
    /// Returns the string representation of the synchronous mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Normal => "normal",
            Synchronous::Off => "off",
        }
    }

    /// Parses a synchronous mode from a string (case-insensitive).
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Some(Synchronous::Full),
            "normal" => Some(Synchronous::Normal),
            "off" => Some(Synchronous::Off),
            _ => None,
        }
    }

    pub(crate) fn log_options(self) -> UndoLogOptions {
        UndoLogOptions {
            sync_each_record: self == Synchronous::Full,
            sync_on_finish: self != Synchronous::Off,
        }
    }

    pub(crate) fn syncs_data(self) -> bool {
        self != Synchronous::Off
    }
}

/// Configuration knobs for a [`super::BTree`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TreeOptions {
    /// Branching factor: nodes hold between `min_degree - 1` and
    /// `2 * min_degree - 1` keys, the root excepted.
    pub min_degree: usize,
    /// Upper bound on bytes spent caching node slots; zero disables caching.
    pub max_cache_bytes: usize,
    /// Replacement policy once the cache is full.
    pub cache_policy: CachePolicy,
    /// Durability mode.
    pub synchronous: Synchronous,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            min_degree: 32,
            max_cache_bytes: 1 << 25,
            cache_policy: CachePolicy::OffsetSuccessor,
            synchronous: Synchronous::Normal,
        }
    }
}

impl TreeOptions {
    /// Options with the given branching factor and defaults elsewhere.
    pub fn with_min_degree(min_degree: usize) -> Self {
        Self {
            min_degree,
            ..Self::default()
        }
    }

    /// Parses options from a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: TreeOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SombraError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects settings no tree can be built with.
    pub fn validate(&self) -> Result<()> {
        if self.min_degree < 2 {
            return Err(SombraError::Invalid("min_degree must be at least 2"));
        }
        if self.min_degree > MAX_MIN_DEGREE {
            return Err(SombraError::Invalid("min_degree does not fit the file header"));
        }
        Ok(())
    }
}

/// Locations of the three files backing one tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorePaths {
    /// Node file.
    pub nodes: PathBuf,
    /// Value file.
    pub values: PathBuf,
    /// Undo log.
    pub log: PathBuf,
}

impl StorePaths {
    /// The conventional `btree.main`, `btree.vals`, and `btree.log` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            nodes: dir.join("btree.main"),
            values: dir.join("btree.vals"),
            log: dir.join("btree.log"),
        }
    }
}
