use tracing::{debug, warn};

use super::BTree;
use crate::primitives::bytes::FixedCodec;
use crate::storage::btree::verify::VerifyReport;
use crate::types::{Result, SombraError};

impl<K, V> BTree<K, V>
where
    K: FixedCodec + Ord + Clone,
    V: FixedCodec,
{
    /// Inserts `key`, or overwrites its value if it is already present.
    pub fn insert(&mut self, key: &K, value: &V) -> Result<()> {
        self.bracket(|tree| tree.insert_entry(key, value))
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete(&mut self, key: &K) -> Result<bool> {
        self.bracket(|tree| tree.delete_entry(key))
    }

    /// Looks up the value stored for `key`.
    pub fn find(&mut self, key: &K) -> Result<Option<V>> {
        self.bracket(|tree| tree.find_entry(key))
    }

    /// Returns every entry with `low <= key <= high` in ascending key order.
    ///
    /// An inverted range yields an empty result.
    pub fn range(&mut self, low: &K, high: &K) -> Result<Vec<(K, V)>> {
        self.bracket(|tree| tree.range_entries(low, high))
    }

    /// Visits every entry in ascending key order, stopping at the first error.
    pub fn for_each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(K, V) -> Result<()>,
    {
        self.bracket(|tree| {
            let root = tree.root;
            tree.visit_all(root, 0, &mut f)
        })
    }

    /// Walks the whole tree and both free lists, reporting structural problems.
    ///
    /// Nothing is modified. Problems in the data are returned as findings;
    /// only I/O failures surface as errors.
    pub fn verify(&mut self) -> Result<VerifyReport> {
        self.bracket(|tree| tree.verify_structure())
    }

    /// Syncs all three backing files.
    pub fn sync(&mut self) -> Result<()> {
        if self.poisoned {
            return Err(SombraError::Poisoned);
        }
        self.nodes.sync()?;
        self.values.sync()?;
        self.log.sync()
    }

    fn bracket<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.poisoned {
            return Err(SombraError::Poisoned);
        }
        match self.run_logged(op) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.abandon(&err);
                Err(err)
            }
        }
    }

    fn run_logged<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.log.init()?;
        let value = op(self)?;
        if self.log.pending() > 0 && self.options.synchronous.syncs_data() {
            self.nodes.sync()?;
            self.values.sync()?;
        }
        self.log.finish()?;
        Ok(value)
    }

    /// Decides whether a failed operation left anything to undo.
    ///
    /// Every file mutation is preceded by a log record, so with none appended
    /// the files are untouched and the handle stays usable.
    fn abandon(&mut self, err: &SombraError) {
        if self.log.pending() == 0 {
            debug!(error = %err, "operation failed before modifying any file");
            return;
        }
        self.poisoned = true;
        warn!(
            error = %err,
            pending = self.log.pending(),
            "operation failed part-way; reopen the tree to roll it back"
        );
    }
}
