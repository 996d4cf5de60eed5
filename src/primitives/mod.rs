//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, I/O operations, the undo log, and the slot
//! allocator with its cache.

/// Byte-level utilities and encoding/decoding.
///
/// Big-endian cells and the fixed-width codec used for keys and values.
pub mod bytes;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Slot files, their headers, and the node cache.
pub mod pager;

/// Undo logging for crash recovery.
///
/// Captures before-images so an interrupted operation can be rolled back.
pub mod wal;
