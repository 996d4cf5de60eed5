//! Fixed-size node slots.
//!
//! A slot holds three blocks back to back: `2B - 1` reference cells, `2B - 2`
//! key cells, and `2B - 2` value cells. Reference and value cells are 8-byte
//! big-endian offsets; value cells point into the value file.
//!
//! There is no tag byte. A leaf writes the sentinel `1` into `keys + 1`
//! reference cells; an internal node writes its child offsets there. Unused
//! trailing cells of every block are zero. Child offsets are never below the
//! node file header length, so they can never be mistaken for the sentinel.

use crate::primitives::bytes::{cell, FixedCodec};
use crate::primitives::pager::meta::NODE_HEADER_LEN;
use crate::types::{Result, SlotOffset, SombraError};

const REF_WIDTH: usize = 8;
const VALUE_REF_WIDTH: usize = 8;
const LEAF_SENTINEL: u64 = 1;

/// Byte geometry of a node slot for one branching factor and key width.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeLayout {
    min_degree: usize,
    key_width: usize,
}

impl NodeLayout {
    /// Geometry for branching factor `min_degree` and keys of `key_width` bytes.
    pub fn new(min_degree: usize, key_width: usize) -> Self {
        Self {
            min_degree,
            key_width,
        }
    }

    /// Branching factor.
    pub fn min_degree(&self) -> usize {
        self.min_degree
    }

    /// Fewest keys a non-root node may hold.
    pub fn min_keys(&self) -> usize {
        self.min_degree - 1
    }

    /// Key count at which a node must split; never stored on disk.
    pub fn overflow_keys(&self) -> usize {
        2 * self.min_degree - 1
    }

    /// Most keys a stored node may hold.
    pub fn max_keys(&self) -> usize {
        2 * self.min_degree - 2
    }

    fn ref_cells(&self) -> usize {
        2 * self.min_degree - 1
    }

    fn keys_at(&self) -> usize {
        self.ref_cells() * REF_WIDTH
    }

    fn values_at(&self) -> usize {
        self.keys_at() + self.max_keys() * self.key_width
    }

    /// Size of one encoded node.
    pub fn slot_size(&self) -> usize {
        self.values_at() + self.max_keys() * VALUE_REF_WIDTH
    }

    /// Serializes `node` into `dst`, which must be exactly one slot long.
    pub fn encode<K: FixedCodec>(&self, node: &Node<K>, dst: &mut [u8]) -> Result<()> {
        debug_assert_eq!(K::WIDTH, self.key_width);
        if dst.len() != self.slot_size() {
            return Err(SombraError::Invalid("node buffer has the wrong size"));
        }
        let count = node.keys.len();
        if count > self.max_keys() {
            return Err(SombraError::Invalid("node holds too many keys to encode"));
        }
        if node.values.len() != count {
            return Err(SombraError::Invalid("node key and value counts differ"));
        }
        dst.fill(0);
        if node.is_leaf() {
            for i in 0..=count {
                cell::put_u64(dst, i * REF_WIDTH, LEAF_SENTINEL);
            }
        } else {
            if node.children.len() != count + 1 {
                return Err(SombraError::Invalid("internal node child count mismatch"));
            }
            for (i, child) in node.children.iter().enumerate() {
                if child.0 < NODE_HEADER_LEN {
                    return Err(SombraError::Invalid("child offset inside the file header"));
                }
                cell::put_u64(dst, i * REF_WIDTH, child.0);
            }
        }
        let keys_at = self.keys_at();
        for (i, key) in node.keys.iter().enumerate() {
            let at = keys_at + i * self.key_width;
            key.encode_fixed(&mut dst[at..at + self.key_width]);
        }
        let values_at = self.values_at();
        for (i, value) in node.values.iter().enumerate() {
            cell::put_u64(dst, values_at + i * VALUE_REF_WIDTH, *value);
        }
        Ok(())
    }

    /// Parses the slot at `offset`, rejecting anything the encoder cannot produce.
    ///
    /// An all-zero slot decodes as an empty leaf; that is how a freshly created
    /// root looks before its first write.
    pub fn decode<K: FixedCodec + Ord>(&self, offset: SlotOffset, src: &[u8]) -> Result<Node<K>> {
        if src.len() != self.slot_size() {
            return Err(SombraError::Corruption("node slot has the wrong size"));
        }
        let mut refs = Vec::new();
        for i in 0..self.ref_cells() {
            let r = cell::get_u64(src, i * REF_WIDTH);
            if r == 0 {
                break;
            }
            refs.push(r);
        }
        for i in refs.len()..self.ref_cells() {
            if cell::get_u64(src, i * REF_WIDTH) != 0 {
                return Err(SombraError::Corruption("node reference cells are not contiguous"));
            }
        }
        let leaf = refs.is_empty() || refs[0] == LEAF_SENTINEL;
        let count = refs.len().saturating_sub(1);
        let children = if leaf {
            if refs.iter().any(|&r| r != LEAF_SENTINEL) {
                return Err(SombraError::Corruption("leaf mixes sentinel and child offsets"));
            }
            Vec::new()
        } else {
            let mut children = Vec::with_capacity(refs.len());
            for &r in &refs {
                if r < NODE_HEADER_LEN || (r - NODE_HEADER_LEN) % self.slot_size() as u64 != 0 {
                    return Err(SombraError::Corruption("child offset is not a node slot"));
                }
                children.push(SlotOffset(r));
            }
            children
        };
        let keys_at = self.keys_at();
        let mut keys: Vec<K> = Vec::with_capacity(count + 1);
        for i in 0..count {
            let at = keys_at + i * self.key_width;
            let key = K::decode_fixed(&src[at..at + self.key_width]);
            if keys.last().is_some_and(|prev| *prev >= key) {
                return Err(SombraError::Corruption("node keys are not strictly increasing"));
            }
            keys.push(key);
        }
        let values_at = self.values_at();
        let values = (0..count)
            .map(|i| cell::get_u64(src, values_at + i * VALUE_REF_WIDTH))
            .collect();
        Ok(Node {
            offset,
            keys,
            values,
            children,
            dirty: false,
            before: Some(src.to_vec()),
        })
    }
}

/// In-memory copy of one node slot.
#[derive(Clone, Debug)]
pub struct Node<K> {
    /// Slot the node lives in.
    pub offset: SlotOffset,
    /// Strictly increasing keys.
    pub keys: Vec<K>,
    /// Value file offsets, parallel to `keys`.
    pub values: Vec<u64>,
    /// Child slots; empty for a leaf, `keys.len() + 1` long otherwise.
    pub children: Vec<SlotOffset>,
    /// Set when the in-memory copy differs from the slot on disk.
    pub dirty: bool,
    /// Bytes currently stored in the slot, if it holds anything yet.
    pub before: Option<Vec<u8>>,
}

impl<K> Node<K> {
    /// An empty leaf for a freshly allocated slot.
    pub fn new_leaf(offset: SlotOffset, before: Option<Vec<u8>>) -> Self {
        Self {
            offset,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            dirty: true,
            before,
        }
    }

    /// Returns true if the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
