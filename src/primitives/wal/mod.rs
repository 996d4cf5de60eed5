#![forbid(unsafe_code)]

//! Undo log bracketing every mutating tree operation.
//!
//! Before any byte range of the node or value file is overwritten, its
//! previous contents are appended here. The header carries the number of
//! records belonging to the operation in flight; `finish` zeroes it. A
//! nonzero count found at open time means the previous operation never
//! finished, and [`UndoLog::recover`] writes every before-image back.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, trace};

use crate::primitives::bytes::cell;
use crate::primitives::io::FileIo;
use crate::types::{record_crc32, Result, SombraError};

const LOG_MAGIC: [u8; 4] = *b"SBKL";
const LOG_FORMAT_VERSION: u16 = 1;
/// Length of the log file header; records start right after it.
pub const LOG_HEADER_LEN: usize = 16;
const COUNT_OFFSET: usize = 8;
/// Length of the fixed part of a record preceding its payload.
pub const RECORD_HEADER_LEN: usize = 21;

const FLAG_VALUE_FILE: u8 = 0b01;
const FLAG_LENGTH: u8 = 0b10;

/// File a log record restores.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogTarget {
    /// The node file.
    Nodes,
    /// The value file.
    Values,
}

impl LogTarget {
    fn flag(self) -> u8 {
        match self {
            LogTarget::Nodes => 0,
            LogTarget::Values => FLAG_VALUE_FILE,
        }
    }

    fn index(self) -> usize {
        match self {
            LogTarget::Nodes => 0,
            LogTarget::Values => 1,
        }
    }

    fn from_flags(flags: u8) -> Self {
        if flags & FLAG_VALUE_FILE != 0 {
            LogTarget::Values
        } else {
            LogTarget::Nodes
        }
    }
}

/// Durability knobs for the undo log.
#[derive(Clone, Copy, Debug, Default)]
pub struct UndoLogOptions {
    /// Sync the log after every appended record, before the protected overwrite.
    pub sync_each_record: bool,
    /// Sync the log when an operation that appended records finishes.
    pub sync_on_finish: bool,
}

/// Statistics tracking undo log activity.
#[derive(Clone, Debug, Default)]
pub struct UndoLogStats {
    /// Number of records appended since open.
    pub records_appended: u64,
    /// Number of before-images dropped because the range was already captured.
    pub records_skipped: u64,
    /// Total payload bytes captured in before-images.
    pub bytes_appended: u64,
    /// Number of bracketed operations finished.
    pub operations: u64,
    /// Number of log syncs performed.
    pub syncs: u64,
}

/// Outcome of [`UndoLog::recover`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RecoveryReport {
    /// Number of before-image records written back.
    pub records_replayed: u64,
    /// Bytes restored across both files.
    pub bytes_restored: u64,
    /// Length the node file was cut back to, if it had grown.
    pub node_file_len: Option<u64>,
    /// Length the value file was cut back to, if it had grown.
    pub value_file_len: Option<u64>,
}

impl RecoveryReport {
    /// Returns true if recovery had nothing to undo.
    pub fn is_clean(&self) -> bool {
        self.records_replayed == 0 && self.node_file_len.is_none() && self.value_file_len.is_none()
    }
}

/// Append-only undo log stored in its own file.
pub struct UndoLog {
    io: Arc<dyn FileIo>,
    options: UndoLogOptions,
    pending: u64,
    append_offset: u64,
    active: bool,
    length_logged: [bool; 2],
    captured: HashSet<(u8, u64, usize)>,
    stats: UndoLogStats,
}

impl UndoLog {
    /// Opens the log, writing a fresh header if the file is new.
    ///
    /// Pending records are left untouched; call [`UndoLog::recover`] before
    /// starting any operation.
    pub fn open(io: Arc<dyn FileIo>, options: UndoLogOptions) -> Result<Self> {
        let len = io.len()?;
        if len < LOG_HEADER_LEN as u64 {
            // Either brand new or torn while writing the very first header, in
            // which case no operation can have run yet.
            io.write_at(0, &encode_header(0))?;
            io.truncate(LOG_HEADER_LEN as u64)?;
        } else {
            let mut header = [0u8; LOG_HEADER_LEN];
            io.read_at(0, &mut header)?;
            decode_header(&header)?;
        }
        Ok(Self {
            io,
            options,
            pending: 0,
            append_offset: LOG_HEADER_LEN as u64,
            active: false,
            length_logged: [false; 2],
            captured: HashSet::new(),
            stats: UndoLogStats::default(),
        })
    }

    /// Starts a bracketed operation, discarding any previous records.
    pub fn init(&mut self) -> Result<()> {
        self.pending = 0;
        self.append_offset = LOG_HEADER_LEN as u64;
        self.length_logged = [false; 2];
        self.captured.clear();
        self.persist_count()?;
        self.active = true;
        Ok(())
    }

    /// Appends the before-image of `before.len()` bytes at `offset` in `target`.
    ///
    /// Must be called before those bytes are overwritten. Only the first
    /// image of a range within one operation is kept, so replaying records in
    /// append order always ends on the pre-operation bytes.
    pub fn log(&mut self, target: LogTarget, offset: u64, before: &[u8]) -> Result<()> {
        if self.active && !self.captured.insert((target.flag(), offset, before.len())) {
            self.stats.records_skipped += 1;
            return Ok(());
        }
        self.append(target.flag(), offset, before)
    }

    /// Records the length `target` had before this operation first grew it.
    ///
    /// Only the first call per target within an operation appends a record.
    pub fn log_length(&mut self, target: LogTarget, len: u64) -> Result<()> {
        if self.length_logged[target.index()] {
            return Ok(());
        }
        self.append(target.flag() | FLAG_LENGTH, len, &[])?;
        self.length_logged[target.index()] = true;
        Ok(())
    }

    /// Marks the running operation complete by zeroing the persisted count.
    pub fn finish(&mut self) -> Result<()> {
        let had_records = self.pending > 0;
        self.write_count(0)?;
        self.pending = 0;
        self.append_offset = LOG_HEADER_LEN as u64;
        self.captured.clear();
        if had_records && self.options.sync_on_finish {
            self.sync()?;
        }
        self.active = false;
        self.stats.operations += 1;
        Ok(())
    }

    /// Undoes an interrupted operation, if the header shows one.
    ///
    /// Before-images are written back in append order. Files that grew during
    /// the interrupted operation are then cut back to their recorded length.
    pub fn recover(&mut self, nodes: &dyn FileIo, values: &dyn FileIo) -> Result<RecoveryReport> {
        let mut header = [0u8; LOG_HEADER_LEN];
        self.io.read_at(0, &mut header)?;
        let count = decode_header(&header)?;
        let mut report = RecoveryReport::default();
        if count == 0 {
            return Ok(report);
        }
        info!(records = count, "undo log recovery started");
        let log_len = self.io.len()?;
        let mut offset = LOG_HEADER_LEN as u64;
        let mut lengths: [Option<u64>; 2] = [None, None];
        for _ in 0..count {
            if offset + RECORD_HEADER_LEN as u64 > log_len {
                error!(offset, "undo log record header truncated");
                return Err(SombraError::Corruption("undo log record truncated"));
            }
            let mut rec = [0u8; RECORD_HEADER_LEN];
            self.io.read_at(offset, &mut rec)?;
            let flags = rec[0];
            let target_offset = cell::get_u64(&rec, 1);
            let len = cell::get_u64(&rec, 9);
            let stored_crc = cell::get_u32(&rec, 17);
            let payload_start = offset + RECORD_HEADER_LEN as u64;
            if payload_start.checked_add(len).map_or(true, |end| end > log_len) {
                error!(offset, len, "undo log record payload truncated");
                return Err(SombraError::Corruption("undo log record truncated"));
            }
            let mut payload = vec![0u8; len as usize];
            self.io.read_at(payload_start, &mut payload)?;
            if record_crc32(flags, target_offset, &payload) != stored_crc {
                error!(offset, "undo log record checksum mismatch");
                return Err(SombraError::Corruption("undo log record checksum mismatch"));
            }
            let target = LogTarget::from_flags(flags);
            if flags & FLAG_LENGTH != 0 {
                let slot = &mut lengths[target.index()];
                *slot = Some(slot.map_or(target_offset, |prev| prev.min(target_offset)));
            } else {
                let file = match target {
                    LogTarget::Nodes => nodes,
                    LogTarget::Values => values,
                };
                file.write_at(target_offset, &payload)?;
                report.records_replayed += 1;
                report.bytes_restored += len;
            }
            offset = payload_start + len;
        }
        if let Some(len) = lengths[LogTarget::Nodes.index()] {
            nodes.truncate(len)?;
            report.node_file_len = Some(len);
        }
        if let Some(len) = lengths[LogTarget::Values.index()] {
            values.truncate(len)?;
            report.value_file_len = Some(len);
        }
        nodes.sync_all()?;
        values.sync_all()?;
        self.pending = 0;
        self.append_offset = LOG_HEADER_LEN as u64;
        self.persist_count()?;
        self.sync()?;
        info!(
            replayed = report.records_replayed,
            bytes = report.bytes_restored,
            "undo log recovery finished"
        );
        Ok(report)
    }

    /// Number of records appended by the operation in flight.
    pub fn pending(&self) -> u64 {
        self.pending
    }

    /// Returns true between `init` and `finish`.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns current statistics for this log instance.
    pub fn stats(&self) -> UndoLogStats {
        self.stats.clone()
    }

    /// Syncs the log file to persistent storage.
    pub fn sync(&mut self) -> Result<()> {
        self.io.sync_all()?;
        self.stats.syncs += 1;
        Ok(())
    }

    fn append(&mut self, flags: u8, offset: u64, payload: &[u8]) -> Result<()> {
        if !self.active {
            return Err(SombraError::Invalid("undo log append outside an operation"));
        }
        let mut record = vec![0u8; RECORD_HEADER_LEN + payload.len()];
        record[0] = flags;
        cell::put_u64(&mut record, 1, offset);
        cell::put_u64(&mut record, 9, payload.len() as u64);
        cell::put_u32(&mut record, 17, record_crc32(flags, offset, payload));
        record[RECORD_HEADER_LEN..].copy_from_slice(payload);
        self.io.write_at(self.append_offset, &record)?;
        if self.options.sync_each_record {
            self.sync()?;
        }
        self.append_offset += record.len() as u64;
        self.pending += 1;
        self.persist_count()?;
        if self.options.sync_each_record {
            self.sync()?;
        }
        self.stats.records_appended += 1;
        self.stats.bytes_appended += payload.len() as u64;
        trace!(flags, offset, len = payload.len(), pending = self.pending, "undo record appended");
        Ok(())
    }

    fn persist_count(&self) -> Result<()> {
        self.write_count(self.pending)
    }

    fn write_count(&self, count: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        cell::put_u64(&mut buf, 0, count);
        self.io.write_at(COUNT_OFFSET as u64, &buf)
    }
}

fn encode_header(count: u64) -> [u8; LOG_HEADER_LEN] {
    let mut buf = [0u8; LOG_HEADER_LEN];
    buf[0..4].copy_from_slice(&LOG_MAGIC);
    cell::put_u16(&mut buf, 4, LOG_FORMAT_VERSION);
    cell::put_u64(&mut buf, COUNT_OFFSET, count);
    buf
}

fn decode_header(src: &[u8]) -> Result<u64> {
    if src[0..4] != LOG_MAGIC {
        return Err(SombraError::Corruption("undo log magic mismatch"));
    }
    if cell::get_u16(src, 4) != LOG_FORMAT_VERSION {
        return Err(SombraError::Corruption("undo log format version mismatch"));
    }
    if src[6..8] != [0, 0] {
        return Err(SombraError::Corruption("undo log reserved header bytes non-zero"));
    }
    Ok(cell::get_u64(src, COUNT_OFFSET))
}
