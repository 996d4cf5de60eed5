use std::mem;

use tracing::debug;

use super::BTree;
use crate::primitives::bytes::FixedCodec;
use crate::storage::btree::node::Node;
use crate::types::{Result, SombraError};

impl<K, V> BTree<K, V>
where
    K: FixedCodec + Ord + Clone,
    V: FixedCodec,
{
    pub(super) fn delete_entry(&mut self, key: &K) -> Result<bool> {
        let mut root = self.read_node(self.root)?;
        if !self.delete_from(&mut root, 0, key)? {
            return Ok(false);
        }
        if root.keys.is_empty() && !root.is_leaf() {
            let old_root = root.offset;
            let child = root.children[0];
            self.set_root(child)?;
            self.release_node(root)?;
            self.stats.root_collapses += 1;
            debug!(old_root = %old_root, new_root = %child, "root collapsed");
        } else {
            self.write_node(&mut root)?;
        }
        Ok(true)
    }

    /// Removes `key` from the subtree under `node`.
    ///
    /// Descendants are written back or rebalanced before returning; `node`
    /// itself is left for the caller, which may need to rebalance it.
    fn delete_from(&mut self, node: &mut Node<K>, depth: usize, key: &K) -> Result<bool> {
        self.check_depth(depth)?;
        match node.keys.binary_search(key) {
            Ok(pos) => {
                self.release_value(node.values[pos])?;
                if node.is_leaf() {
                    node.keys.remove(pos);
                    node.values.remove(pos);
                } else {
                    let mut successor = self.read_node(node.children[pos + 1])?;
                    let (key, value) = self.take_min(&mut successor, depth + 1)?;
                    node.keys[pos] = key;
                    node.values[pos] = value;
                    self.settle_child(node, pos + 1, successor)?;
                }
                node.dirty = true;
                Ok(true)
            }
            Err(_) if node.is_leaf() => Ok(false),
            Err(pos) => {
                let mut child = self.read_node(node.children[pos])?;
                if !self.delete_from(&mut child, depth + 1, key)? {
                    return Ok(false);
                }
                self.settle_child(node, pos, child)?;
                Ok(true)
            }
        }
    }

    /// Detaches the smallest entry under `node`, keeping its value slot.
    fn take_min(&mut self, node: &mut Node<K>, depth: usize) -> Result<(K, u64)> {
        self.check_depth(depth)?;
        if node.is_leaf() {
            if node.keys.is_empty() {
                return Err(SombraError::Corruption("empty leaf below an internal node"));
            }
            node.dirty = true;
            return Ok((node.keys.remove(0), node.values.remove(0)));
        }
        let mut child = self.read_node(node.children[0])?;
        let min = self.take_min(&mut child, depth + 1)?;
        self.settle_child(node, 0, child)?;
        Ok(min)
    }

    /// Writes `child` back, or restores its occupancy through `parent`.
    fn settle_child(&mut self, parent: &mut Node<K>, idx: usize, mut child: Node<K>) -> Result<()> {
        if child.keys.len() >= self.layout.min_keys() {
            return self.write_node(&mut child);
        }
        self.rebalance(parent, idx, child)
    }

    /// Borrows from the left sibling, then the right, and otherwise merges
    /// with the left sibling if there is one, else with the right.
    fn rebalance(&mut self, parent: &mut Node<K>, idx: usize, child: Node<K>) -> Result<()> {
        let min = self.layout.min_keys();
        let left = match idx {
            0 => None,
            _ => Some(self.read_node(parent.children[idx - 1])?),
        };
        let left = match left {
            Some(left) if left.keys.len() > min => {
                return self.borrow_from_left(parent, idx, left, child)
            }
            other => other,
        };
        let right = match parent.children.get(idx + 1) {
            Some(&offset) => Some(self.read_node(offset)?),
            None => None,
        };
        let right = match right {
            Some(right) if right.keys.len() > min => {
                return self.borrow_from_right(parent, idx, child, right)
            }
            other => other,
        };
        match (left, right) {
            (Some(left), _) => self.merge(parent, idx - 1, left, child),
            (None, Some(right)) => self.merge(parent, idx, child, right),
            (None, None) => Err(SombraError::Corruption("underfull node has no sibling")),
        }
    }

    fn borrow_from_left(
        &mut self,
        parent: &mut Node<K>,
        idx: usize,
        mut left: Node<K>,
        mut child: Node<K>,
    ) -> Result<()> {
        let sep = idx - 1;
        let (Some(key), Some(value)) = (left.keys.pop(), left.values.pop()) else {
            return Err(SombraError::Corruption("lending sibling has no keys"));
        };
        child.keys.insert(0, mem::replace(&mut parent.keys[sep], key));
        child.values.insert(0, mem::replace(&mut parent.values[sep], value));
        if !left.is_leaf() {
            let Some(moved) = left.children.pop() else {
                return Err(SombraError::Corruption("lending sibling has no children"));
            };
            child.children.insert(0, moved);
        }
        left.dirty = true;
        child.dirty = true;
        parent.dirty = true;
        self.write_node(&mut left)?;
        self.write_node(&mut child)?;
        self.stats.borrows += 1;
        debug!(from = %left.offset, to = %child.offset, "borrowed from left sibling");
        Ok(())
    }

    fn borrow_from_right(
        &mut self,
        parent: &mut Node<K>,
        idx: usize,
        mut child: Node<K>,
        mut right: Node<K>,
    ) -> Result<()> {
        if right.keys.is_empty() || (!right.is_leaf() && right.children.is_empty()) {
            return Err(SombraError::Corruption("lending sibling has no keys"));
        }
        let key = right.keys.remove(0);
        let value = right.values.remove(0);
        child.keys.push(mem::replace(&mut parent.keys[idx], key));
        child.values.push(mem::replace(&mut parent.values[idx], value));
        if !right.is_leaf() {
            child.children.push(right.children.remove(0));
        }
        right.dirty = true;
        child.dirty = true;
        parent.dirty = true;
        self.write_node(&mut right)?;
        self.write_node(&mut child)?;
        self.stats.borrows += 1;
        debug!(from = %right.offset, to = %child.offset, "borrowed from right sibling");
        Ok(())
    }

    /// Folds `right` and the separator at `sep` into `left`, freeing `right`.
    fn merge(
        &mut self,
        parent: &mut Node<K>,
        sep: usize,
        mut left: Node<K>,
        mut right: Node<K>,
    ) -> Result<()> {
        left.keys.push(parent.keys.remove(sep));
        left.values.push(parent.values.remove(sep));
        parent.children.remove(sep + 1);
        left.keys.append(&mut right.keys);
        left.values.append(&mut right.values);
        left.children.append(&mut right.children);
        left.dirty = true;
        parent.dirty = true;
        self.write_node(&mut left)?;
        debug!(into = %left.offset, freed = %right.offset, "merged siblings");
        self.release_node(right)?;
        self.stats.merges += 1;
        Ok(())
    }
}
