use tracing::debug;

use super::BTree;
use crate::primitives::bytes::FixedCodec;
use crate::storage::btree::node::Node;
use crate::types::{Result, SlotOffset, SombraError};

/// What a recursive insert hands back to the caller holding the parent.
pub(super) enum InsertOutcome<K> {
    /// The subtree absorbed the entry.
    Done,
    /// The child split; the parent must adopt `key` and the new right sibling.
    Split {
        key: K,
        value: u64,
        right: SlotOffset,
    },
}

impl<K, V> BTree<K, V>
where
    K: FixedCodec + Ord + Clone,
    V: FixedCodec,
{
    pub(super) fn insert_entry(&mut self, key: &K, value: &V) -> Result<()> {
        let old_root = self.root;
        if let InsertOutcome::Split {
            key: median,
            value: median_value,
            right,
        } = self.insert_into(old_root, 0, key, value)?
        {
            let mut root = self.allocate_node()?;
            root.keys.push(median);
            root.values.push(median_value);
            root.children = vec![old_root, right];
            self.write_node(&mut root)?;
            self.set_root(root.offset)?;
            self.stats.root_splits += 1;
            debug!(old_root = %old_root, new_root = %root.offset, "root split");
        }
        Ok(())
    }

    fn insert_into(
        &mut self,
        offset: SlotOffset,
        depth: usize,
        key: &K,
        value: &V,
    ) -> Result<InsertOutcome<K>> {
        self.check_depth(depth)?;
        let mut node = self.read_node(offset)?;
        let pos = match node.keys.binary_search(key) {
            Ok(pos) => {
                self.overwrite_value(node.values[pos], value)?;
                return Ok(InsertOutcome::Done);
            }
            Err(pos) => pos,
        };
        if node.is_leaf() {
            let at = self.store_value(value)?;
            node.keys.insert(pos, key.clone());
            node.values.insert(pos, at);
        } else {
            match self.insert_into(node.children[pos], depth + 1, key, value)? {
                InsertOutcome::Done => return Ok(InsertOutcome::Done),
                InsertOutcome::Split {
                    key: promoted,
                    value: promoted_value,
                    right,
                } => {
                    node.keys.insert(pos, promoted);
                    node.values.insert(pos, promoted_value);
                    node.children.insert(pos + 1, right);
                }
            }
        }
        node.dirty = true;
        if node.keys.len() < self.layout.overflow_keys() {
            self.write_node(&mut node)?;
            return Ok(InsertOutcome::Done);
        }
        self.split(node)
    }

    /// Moves the upper half of an overflowing node into a fresh sibling.
    ///
    /// The left node keeps `B - 1` keys, the median goes up, and the right
    /// sibling takes the remaining `B - 1` keys and, if internal, `B` children.
    fn split(&mut self, mut node: Node<K>) -> Result<InsertOutcome<K>> {
        let degree = self.layout.min_degree();
        let mut right = self.allocate_node()?;
        right.keys = node.keys.split_off(degree);
        right.values = node.values.split_off(degree);
        if !node.is_leaf() {
            right.children = node.children.split_off(degree);
        }
        let (Some(median), Some(median_value)) = (node.keys.pop(), node.values.pop()) else {
            return Err(SombraError::Corruption("split of a node without keys"));
        };
        self.write_node(&mut node)?;
        self.write_node(&mut right)?;
        self.stats.splits += 1;
        debug!(left = %node.offset, right = %right.offset, leaf = node.is_leaf(), "node split");
        Ok(InsertOutcome::Split {
            key: median,
            value: median_value,
            right: right.offset,
        })
    }
}
