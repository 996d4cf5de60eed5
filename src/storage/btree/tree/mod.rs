use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{info, trace};

use super::node::{Node, NodeLayout};
use super::stats::TreeStats;
use crate::primitives::bytes::FixedCodec;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::pager::meta::{
    self, NodeFileHeader, Probe, NODE_HEADER_LEN, ROOT_CELL, VALUE_HEADER_LEN,
};
use crate::primitives::pager::{SlotCache, SlotFile};
use crate::primitives::wal::{LogTarget, RecoveryReport, UndoLog};
use crate::storage::options::{StorePaths, TreeOptions};
use crate::types::{Result, SlotOffset, SombraError};

mod api;
mod insert;
mod maintenance;
mod search;

/// Disk-resident B-tree mapping fixed-width keys to fixed-width values.
///
/// Nodes live in one file and values in another; each node stores the value
/// file offset of every entry. Every public call is bracketed by the undo log,
/// so a crash at any point leaves the files as they were before that call once
/// the tree is reopened.
pub struct BTree<K, V> {
    pub(super) nodes: SlotFile,
    pub(super) values: SlotFile,
    pub(super) log: UndoLog,
    pub(super) cache: SlotCache,
    pub(super) layout: NodeLayout,
    pub(super) root: SlotOffset,
    pub(super) stats: TreeStats,
    options: TreeOptions,
    value_slot: usize,
    recovery: RecoveryReport,
    poisoned: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BTree<K, V>
where
    K: FixedCodec + Ord + Clone,
    V: FixedCodec,
{
    /// Opens the tree stored at `paths`, creating missing files.
    pub fn open(paths: &StorePaths, options: TreeOptions) -> Result<Self> {
        let nodes: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&paths.nodes)?);
        let values: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&paths.values)?);
        let log: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&paths.log)?);
        Self::open_with_io(nodes, values, log, options)
    }

    /// Opens a tree over arbitrary file handles.
    ///
    /// Any operation left unfinished in `log` is rolled back before the
    /// headers are read.
    pub fn open_with_io(
        nodes: Arc<dyn FileIo>,
        values: Arc<dyn FileIo>,
        log: Arc<dyn FileIo>,
        options: TreeOptions,
    ) -> Result<Self> {
        options.validate()?;
        let layout = NodeLayout::new(options.min_degree, K::WIDTH);
        let value_slot = V::WIDTH.max(8);
        let mut log = UndoLog::open(log, options.synchronous.log_options())?;
        let recovery = log.recover(nodes.as_ref(), values.as_ref())?;

        let header = Self::load_node_header(nodes.as_ref(), &options, layout)?;
        let value_free_head = Self::load_value_header(values.as_ref())?;

        let node_file = SlotFile::open(
            nodes,
            LogTarget::Nodes,
            layout.slot_size(),
            NODE_HEADER_LEN,
            header.free_head,
        )?;
        let value_file = SlotFile::open(
            values,
            LogTarget::Values,
            value_slot,
            VALUE_HEADER_LEN,
            value_free_head,
        )?;
        if !node_file.holds(header.root) {
            return Err(SombraError::Corruption("root offset is not a node slot"));
        }
        info!(
            min_degree = options.min_degree,
            slot_size = layout.slot_size(),
            root = header.root,
            node_file_len = node_file.len(),
            value_file_len = value_file.len(),
            "btree opened"
        );
        Ok(Self {
            nodes: node_file,
            values: value_file,
            log,
            cache: SlotCache::new(layout.slot_size(), options.max_cache_bytes, options.cache_policy),
            layout,
            root: SlotOffset(header.root),
            stats: TreeStats::default(),
            options,
            value_slot,
            recovery,
            poisoned: false,
            _marker: PhantomData,
        })
    }

    fn load_node_header(
        io: &dyn FileIo,
        options: &TreeOptions,
        layout: NodeLayout,
    ) -> Result<NodeFileHeader> {
        let min_degree = u16::try_from(options.min_degree)
            .map_err(|_| SombraError::Invalid("min_degree does not fit the file header"))?;
        let key_width = u32::try_from(K::WIDTH)
            .map_err(|_| SombraError::Invalid("key width does not fit the file header"))?;
        let value_width = u32::try_from(V::WIDTH)
            .map_err(|_| SombraError::Invalid("value width does not fit the file header"))?;
        match meta::probe(io, NODE_HEADER_LEN)? {
            Probe::Empty => {
                let header = NodeFileHeader::fresh(min_degree, key_width, value_width);
                // Root slot first, header last: a torn create still probes as empty.
                io.write_at(NODE_HEADER_LEN, &vec![0u8; layout.slot_size()])?;
                io.truncate(NODE_HEADER_LEN + layout.slot_size() as u64)?;
                io.write_at(0, &header.encode())?;
                io.sync_all()?;
                info!(min_degree, key_width, value_width, "node file created");
                Ok(header)
            }
            Probe::Existing(bytes) => {
                let header = NodeFileHeader::decode(&bytes)?;
                if header.min_degree != min_degree {
                    return Err(SombraError::Invalid(
                        "min_degree differs from the one the store was created with",
                    ));
                }
                if header.key_width != key_width {
                    return Err(SombraError::Invalid("stored key width differs from the key type"));
                }
                if header.value_width != value_width {
                    return Err(SombraError::Invalid(
                        "stored value width differs from the value type",
                    ));
                }
                Ok(header)
            }
        }
    }

    fn load_value_header(io: &dyn FileIo) -> Result<u64> {
        match meta::probe(io, VALUE_HEADER_LEN)? {
            Probe::Empty => {
                io.truncate(0)?;
                io.write_at(0, &meta::encode_value_header(0))?;
                io.sync_all()?;
                info!("value file created");
                Ok(0)
            }
            Probe::Existing(bytes) => meta::decode_value_header(&bytes),
        }
    }

    /// Current root slot.
    pub fn root_offset(&self) -> SlotOffset {
        self.root
    }

    /// Options the tree was opened with.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// What recovery undid when the tree was opened.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Returns true once a failed operation has disabled this handle.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns a snapshot of the tree's counters.
    pub fn stats(&self) -> TreeStats {
        let mut stats = self.stats;
        stats.log_records = self.log.stats().records_appended;
        stats
    }

    /// Fails once a descent reaches deeper than any tree held by the node
    /// file could be, which only happens when a child points back up.
    ///
    /// Every internal node has at least two children, so a tree of height `h`
    /// occupies at least `2^(h-1)` slots.
    pub(super) fn check_depth(&self, depth: usize) -> Result<()> {
        let slots = self.nodes.slot_count().max(1);
        let max_height = (u64::BITS - slots.leading_zeros()) as usize + 1;
        if depth >= max_height {
            return Err(SombraError::Corruption("node chain deeper than the file allows"));
        }
        Ok(())
    }

    pub(super) fn read_node(&mut self, offset: SlotOffset) -> Result<Node<K>> {
        let bytes = match self.cache.get(offset.0) {
            Some(hit) => {
                self.stats.cache_hits += 1;
                hit.to_vec()
            }
            None => {
                self.stats.cache_misses += 1;
                let mut buf = vec![0u8; self.layout.slot_size()];
                self.nodes.read_slot(offset, &mut buf)?;
                buf
            }
        };
        self.layout.decode(offset, &bytes)
    }

    /// Logs and writes `node` if it changed, then refreshes the cache.
    pub(super) fn write_node(&mut self, node: &mut Node<K>) -> Result<()> {
        if !node.dirty {
            return Ok(());
        }
        let mut buf = vec![0u8; self.layout.slot_size()];
        self.layout.encode(node, &mut buf)?;
        self.nodes
            .write_slot(&mut self.log, node.offset, node.before.as_deref(), &buf)?;
        self.cache.update(node.offset.0, &buf);
        node.before = Some(buf);
        node.dirty = false;
        Ok(())
    }

    pub(super) fn allocate_node(&mut self) -> Result<Node<K>> {
        let slot = self.nodes.allocate(&mut self.log)?;
        self.count_allocation(slot.reused());
        Ok(Node::new_leaf(slot.offset, slot.before))
    }

    pub(super) fn release_node(&mut self, node: Node<K>) -> Result<()> {
        let freed = self
            .nodes
            .release(&mut self.log, node.offset, node.before.as_deref())?;
        self.cache.update(node.offset.0, &freed);
        self.stats.slots_released += 1;
        Ok(())
    }

    pub(super) fn set_root(&mut self, offset: SlotOffset) -> Result<()> {
        self.nodes.write_cell(&mut self.log, ROOT_CELL, offset.0)?;
        self.root = offset;
        Ok(())
    }

    pub(super) fn store_value(&mut self, value: &V) -> Result<u64> {
        let slot = self.values.allocate(&mut self.log)?;
        self.count_allocation(slot.reused());
        let buf = self.encode_value(value);
        self.values
            .write_slot(&mut self.log, slot.offset, slot.before.as_deref(), &buf)?;
        Ok(slot.offset.0)
    }

    pub(super) fn overwrite_value(&mut self, at: u64, value: &V) -> Result<()> {
        let buf = self.encode_value(value);
        self.values
            .write_slot(&mut self.log, SlotOffset(at), None, &buf)
    }

    pub(super) fn load_value(&self, at: u64) -> Result<V> {
        let mut buf = vec![0u8; self.value_slot];
        self.values.read_slot(SlotOffset(at), &mut buf)?;
        Ok(V::decode_fixed(&buf[..V::WIDTH]))
    }

    pub(super) fn release_value(&mut self, at: u64) -> Result<()> {
        self.values.release(&mut self.log, SlotOffset(at), None)?;
        self.stats.slots_released += 1;
        Ok(())
    }

    fn encode_value(&self, value: &V) -> Vec<u8> {
        let mut buf = vec![0u8; self.value_slot];
        value.encode_fixed(&mut buf[..V::WIDTH]);
        buf
    }

    fn count_allocation(&mut self, reused: bool) {
        if reused {
            self.stats.slots_reused += 1;
        } else {
            self.stats.slots_appended += 1;
        }
        trace!(reused, "slot allocated");
    }
}
