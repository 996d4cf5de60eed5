#![forbid(unsafe_code)]

use crc32fast::Hasher;

/// CRC over an undo record: its flag byte, target offset, length, and payload.
pub fn record_crc32(flags: u8, offset: u64, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[flags]);
    hasher.update(&offset.to_be_bytes());
    hasher.update(&(payload.len() as u64).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
