use crate::primitives::bytes::cell;
use crate::primitives::io::FileIo;
use crate::types::{Result, SombraError};

const NODE_MAGIC: [u8; 4] = *b"SBKN";
const VALUE_MAGIC: [u8; 4] = *b"SBKV";
/// On-disk format version shared by the node and value files.
pub const FORMAT_VERSION: u16 = 1;

/// Length of the node file header. The first node slot starts here.
pub const NODE_HEADER_LEN: u64 = 32;
/// Length of the value file header. The first value slot starts here.
pub const VALUE_HEADER_LEN: u64 = 16;

/// Header cell holding a file's free-list head; identical in both files.
pub const FREE_HEAD_CELL: u64 = 0;
/// Node file header cell holding the current root offset.
pub const ROOT_CELL: u64 = 8;

/// Decoded node file header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeFileHeader {
    /// Offset of the first free node slot, or zero.
    pub free_head: u64,
    /// Offset of the root node.
    pub root: u64,
    /// Branching factor the file was created with.
    pub min_degree: u16,
    /// Encoded key width in bytes.
    pub key_width: u32,
    /// Encoded value width in bytes.
    pub value_width: u32,
}

impl NodeFileHeader {
    /// Header for a brand new node file whose root sits in the first slot.
    pub fn fresh(min_degree: u16, key_width: u32, value_width: u32) -> Self {
        Self {
            free_head: 0,
            root: NODE_HEADER_LEN,
            min_degree,
            key_width,
            value_width,
        }
    }

    /// Serializes the header.
    pub fn encode(&self) -> [u8; NODE_HEADER_LEN as usize] {
        let mut buf = [0u8; NODE_HEADER_LEN as usize];
        cell::put_u64(&mut buf, FREE_HEAD_CELL as usize, self.free_head);
        cell::put_u64(&mut buf, ROOT_CELL as usize, self.root);
        buf[16..20].copy_from_slice(&NODE_MAGIC);
        cell::put_u16(&mut buf, 20, FORMAT_VERSION);
        cell::put_u16(&mut buf, 22, self.min_degree);
        cell::put_u32(&mut buf, 24, self.key_width);
        cell::put_u32(&mut buf, 28, self.value_width);
        buf
    }

    /// Parses and validates a header.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < NODE_HEADER_LEN as usize {
            return Err(SombraError::Corruption("node file header truncated"));
        }
        if src[16..20] != NODE_MAGIC {
            return Err(SombraError::Corruption("node file magic mismatch"));
        }
        if cell::get_u16(src, 20) != FORMAT_VERSION {
            return Err(SombraError::Corruption("unsupported node file format version"));
        }
        Ok(Self {
            free_head: cell::get_u64(src, FREE_HEAD_CELL as usize),
            root: cell::get_u64(src, ROOT_CELL as usize),
            min_degree: cell::get_u16(src, 22),
            key_width: cell::get_u32(src, 24),
            value_width: cell::get_u32(src, 28),
        })
    }
}

/// Serializes an empty value file header.
pub fn encode_value_header(free_head: u64) -> [u8; VALUE_HEADER_LEN as usize] {
    let mut buf = [0u8; VALUE_HEADER_LEN as usize];
    cell::put_u64(&mut buf, FREE_HEAD_CELL as usize, free_head);
    buf[8..12].copy_from_slice(&VALUE_MAGIC);
    cell::put_u16(&mut buf, 12, FORMAT_VERSION);
    buf
}

/// Parses a value file header, returning its free-list head.
pub fn decode_value_header(src: &[u8]) -> Result<u64> {
    if src.len() < VALUE_HEADER_LEN as usize {
        return Err(SombraError::Corruption("value file header truncated"));
    }
    if src[8..12] != VALUE_MAGIC {
        return Err(SombraError::Corruption("value file magic mismatch"));
    }
    if cell::get_u16(src, 12) != FORMAT_VERSION {
        return Err(SombraError::Corruption("unsupported value file format version"));
    }
    if src[14..16] != [0, 0] {
        return Err(SombraError::Corruption("value file reserved header bytes non-zero"));
    }
    Ok(cell::get_u64(src, FREE_HEAD_CELL as usize))
}

/// What an existing file holds at open time.
#[derive(Debug)]
pub enum Probe {
    /// Nothing usable: a new file, or one torn before its header was written.
    Empty,
    /// A header was found.
    Existing(Vec<u8>),
}

/// Reads the first `header_len` bytes of `io`, classifying the file.
///
/// Headers are written last when a file is created, so a header region that
/// is entirely zero means creation never completed.
pub fn probe(io: &dyn FileIo, header_len: u64) -> Result<Probe> {
    if io.len()? < header_len {
        return Ok(Probe::Empty);
    }
    let mut buf = vec![0u8; header_len as usize];
    io.read_at(0, &mut buf)?;
    if buf.iter().all(|&b| b == 0) {
        return Ok(Probe::Empty);
    }
    Ok(Probe::Existing(buf))
}
