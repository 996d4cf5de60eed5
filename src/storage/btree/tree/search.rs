use super::BTree;
use crate::primitives::bytes::FixedCodec;
use crate::types::{Result, SlotOffset};

impl<K, V> BTree<K, V>
where
    K: FixedCodec + Ord + Clone,
    V: FixedCodec,
{
    pub(super) fn find_entry(&mut self, key: &K) -> Result<Option<V>> {
        let mut offset = self.root;
        let mut depth = 0;
        loop {
            self.check_depth(depth)?;
            let node = self.read_node(offset)?;
            match node.keys.binary_search(key) {
                Ok(pos) => return self.load_value(node.values[pos]).map(Some),
                Err(_) if node.is_leaf() => return Ok(None),
                Err(pos) => offset = node.children[pos],
            }
            depth += 1;
        }
    }

    pub(super) fn range_entries(&mut self, low: &K, high: &K) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        if low <= high {
            let root = self.root;
            self.collect_range(root, 0, low, high, &mut out)?;
        }
        Ok(out)
    }

    /// Children and keys are interleaved so results come out ascending:
    /// `child[lo], key[lo], child[lo + 1], ..., key[hi - 1], child[hi]`.
    fn collect_range(
        &mut self,
        offset: SlotOffset,
        depth: usize,
        low: &K,
        high: &K,
        out: &mut Vec<(K, V)>,
    ) -> Result<()> {
        self.check_depth(depth)?;
        let node = self.read_node(offset)?;
        let lo = node.keys.partition_point(|k| k < low);
        let hi = node.keys.partition_point(|k| k <= high);
        for pos in lo..hi {
            if !node.is_leaf() {
                self.collect_range(node.children[pos], depth + 1, low, high, out)?;
            }
            out.push((node.keys[pos].clone(), self.load_value(node.values[pos])?));
        }
        if !node.is_leaf() {
            self.collect_range(node.children[hi], depth + 1, low, high, out)?;
        }
        Ok(())
    }

    pub(super) fn visit_all<F>(&mut self, offset: SlotOffset, depth: usize, f: &mut F) -> Result<()>
    where
        F: FnMut(K, V) -> Result<()>,
    {
        self.check_depth(depth)?;
        let node = self.read_node(offset)?;
        for (pos, key) in node.keys.iter().enumerate() {
            if let Some(&child) = node.children.get(pos) {
                self.visit_all(child, depth + 1, f)?;
            }
            f(key.clone(), self.load_value(node.values[pos])?)?;
        }
        if let Some(&last) = node.children.last() {
            self.visit_all(last, depth + 1, f)?;
        }
        Ok(())
    }
}
