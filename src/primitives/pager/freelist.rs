use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::primitives::bytes::cell;
use crate::primitives::io::FileIo;
use crate::primitives::pager::meta::FREE_HEAD_CELL;
use crate::primitives::wal::{LogTarget, UndoLog};
use crate::types::{Result, SlotOffset, SombraError};

/// A slot handed out by [`SlotFile::allocate`].
#[derive(Debug)]
pub struct Allocation {
    /// Where the slot lives.
    pub offset: SlotOffset,
    /// Current bytes of a recycled slot; `None` when the slot lies past the
    /// end of the file and has no previous contents.
    pub before: Option<Vec<u8>>,
}

impl Allocation {
    /// Returns true if the slot came off the free list.
    pub fn reused(&self) -> bool {
        self.before.is_some()
    }
}

/// A file of fixed-size slots with a free list threaded through released slots.
///
/// The free-list head lives in the 8-byte header cell at offset 0. A released
/// slot is zeroed except for its first 8 bytes, which point at the next free
/// slot (zero terminates the list). Every overwrite performed here is logged
/// first.
pub struct SlotFile {
    io: Arc<dyn FileIo>,
    target: LogTarget,
    slot_size: usize,
    first_slot: u64,
    free_head: u64,
    len: u64,
}

impl SlotFile {
    /// Wraps an initialised file whose header holds `free_head`.
    pub fn open(
        io: Arc<dyn FileIo>,
        target: LogTarget,
        slot_size: usize,
        first_slot: u64,
        free_head: u64,
    ) -> Result<Self> {
        if slot_size < 8 {
            return Err(SombraError::Invalid("slot must hold a free-list pointer"));
        }
        let len = io.len()?.max(first_slot);
        let file = Self {
            io,
            target,
            slot_size,
            first_slot,
            free_head,
            len,
        };
        if free_head != 0 {
            file.check_offset(free_head)?;
        }
        Ok(file)
    }

    /// Size of one slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Offset of the first slot after the header.
    pub fn first_slot(&self) -> u64 {
        self.first_slot
    }

    /// Logical end of file, including slots allocated but not yet written.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if no slot has ever been allocated.
    pub fn is_empty(&self) -> bool {
        self.len <= self.first_slot
    }

    /// Current free-list head, or zero.
    pub fn free_head(&self) -> u64 {
        self.free_head
    }

    /// Underlying file handle.
    pub fn io(&self) -> &Arc<dyn FileIo> {
        &self.io
    }

    /// Pops the free-list head, or extends the file by one slot.
    pub fn allocate(&mut self, log: &mut UndoLog) -> Result<Allocation> {
        if self.free_head != 0 {
            let offset = self.free_head;
            let mut before = vec![0u8; self.slot_size];
            self.io.read_at(offset, &mut before)?;
            let next = cell::get_u64(&before, 0);
            if next != 0 {
                self.check_offset(next)?;
            }
            self.write_cell(log, FREE_HEAD_CELL, next)?;
            self.free_head = next;
            trace!(file = ?self.target, offset, next, "slot popped from free list");
            return Ok(Allocation {
                offset: SlotOffset(offset),
                before: Some(before),
            });
        }
        let offset = self.len;
        log.log_length(self.target, offset)?;
        self.len += self.slot_size as u64;
        trace!(file = ?self.target, offset, "slot appended at end of file");
        Ok(Allocation {
            offset: SlotOffset(offset),
            before: None,
        })
    }

    /// Pushes `offset` onto the free list, returning the bytes now stored in it.
    ///
    /// `before` is the slot's current content when the caller already holds
    /// it; otherwise it is read from disk.
    pub fn release(
        &mut self,
        log: &mut UndoLog,
        offset: SlotOffset,
        before: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.check_offset(offset.0)?;
        if offset.0 == self.free_head {
            return Err(SombraError::Corruption("slot released twice"));
        }
        let mut freed = vec![0u8; self.slot_size];
        cell::put_u64(&mut freed, 0, self.free_head);
        self.write_slot(log, offset, before, &freed)?;
        self.write_cell(log, FREE_HEAD_CELL, offset.0)?;
        trace!(file = ?self.target, offset = offset.0, next = self.free_head, "slot pushed on free list");
        self.free_head = offset.0;
        Ok(freed)
    }

    /// Logs the slot's current bytes, then overwrites it with `bytes`.
    ///
    /// Slots past the file length recorded at the start of the operation have
    /// no before-image; recovery truncates them away instead.
    pub fn write_slot(
        &mut self,
        log: &mut UndoLog,
        offset: SlotOffset,
        before: Option<&[u8]>,
        bytes: &[u8],
    ) -> Result<()> {
        self.check_offset(offset.0)?;
        if bytes.len() != self.slot_size {
            return Err(SombraError::Invalid("slot image has the wrong size"));
        }
        match before {
            Some(image) => log.log(self.target, offset.0, image)?,
            None => {
                if offset.0 + self.slot_size as u64 <= self.io.len()? {
                    let mut image = vec![0u8; self.slot_size];
                    self.io.read_at(offset.0, &mut image)?;
                    log.log(self.target, offset.0, &image)?;
                }
            }
        }
        self.io.write_at(offset.0, bytes)
    }

    /// Reads the slot at `offset` into `dst`.
    pub fn read_slot(&self, offset: SlotOffset, dst: &mut [u8]) -> Result<()> {
        self.check_offset(offset.0)?;
        self.io.read_at(offset.0, &mut dst[..self.slot_size])
    }

    /// Logs and overwrites an 8-byte header cell.
    pub fn write_cell(&mut self, log: &mut UndoLog, at: u64, value: u64) -> Result<()> {
        let mut before = [0u8; 8];
        self.io.read_at(at, &mut before)?;
        log.log(self.target, at, &before)?;
        let mut after = [0u8; 8];
        cell::put_u64(&mut after, 0, value);
        self.io.write_at(at, &after)
    }

    /// Walks the free list, failing on cycles or out-of-range links.
    pub fn free_slots(&self) -> Result<Vec<SlotOffset>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut current = self.free_head;
        while current != 0 {
            self.check_offset(current)?;
            if !seen.insert(current) {
                return Err(SombraError::Corruption("free list contains a cycle"));
            }
            out.push(SlotOffset(current));
            let mut next = [0u8; 8];
            self.io.read_at(current, &mut next)?;
            current = cell::get_u64(&next, 0);
        }
        Ok(out)
    }

    /// Returns true if `offset` addresses a slot inside the file.
    pub fn holds(&self, offset: u64) -> bool {
        self.check_offset(offset).is_ok()
    }

    /// Number of slots between the header and the logical end of file.
    pub fn slot_count(&self) -> u64 {
        (self.len - self.first_slot) / self.slot_size as u64
    }

    /// Syncs the file to persistent storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    fn check_offset(&self, offset: u64) -> Result<()> {
        let past_end = offset
            .checked_add(self.slot_size as u64)
            .map_or(true, |end| end > self.len);
        if offset < self.first_slot
            || past_end
            || (offset - self.first_slot) % self.slot_size as u64 != 0
        {
            return Err(SombraError::Corruption("slot offset outside the file"));
        }
        Ok(())
    }
}
