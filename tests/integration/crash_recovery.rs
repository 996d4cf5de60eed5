#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use sombra_kv::primitives::io::{FileIo, StdFileIo};
use sombra_kv::{BTree, Result, SombraError, StorePaths, Synchronous, TreeOptions, TreeStats};
use tempfile::tempdir;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// File handle that starts failing every write once a shared budget runs out.
struct FaultyIo {
    inner: StdFileIo,
    budget: Arc<AtomicUsize>,
}

impl FaultyIo {
    fn spend(&self) -> Result<()> {
        let left = self.budget.load(Ordering::SeqCst);
        if left == 0 {
            return Err(SombraError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.budget.store(left - 1, Ordering::SeqCst);
        Ok(())
    }
}

impl FileIo for FaultyIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.spend()?;
        self.inner.write_at(off, src)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.spend()?;
        self.inner.truncate(len)
    }
}

fn options() -> TreeOptions {
    TreeOptions {
        min_degree: 2,
        max_cache_bytes: 4096,
        synchronous: Synchronous::Off,
        ..TreeOptions::default()
    }
}

fn open_faulty(paths: &StorePaths, writes: usize) -> Result<BTree<u64, u64>> {
    let budget = Arc::new(AtomicUsize::new(writes));
    let wrap = |path: &Path| -> Result<Arc<dyn FileIo>> {
        Ok(Arc::new(FaultyIo {
            inner: StdFileIo::open(path)?,
            budget: Arc::clone(&budget),
        }))
    };
    BTree::open_with_io(wrap(&paths.nodes)?, wrap(&paths.values)?, wrap(&paths.log)?, options())
}

struct Snapshot {
    nodes: Vec<u8>,
    values: Vec<u8>,
}

fn snapshot(paths: &StorePaths) -> Result<Snapshot> {
    Ok(Snapshot {
        nodes: fs::read(&paths.nodes)?,
        values: fs::read(&paths.values)?,
    })
}

fn copy_store(from: &StorePaths, to: &StorePaths) -> Result<()> {
    fs::copy(&from.nodes, &to.nodes)?;
    fs::copy(&from.values, &to.values)?;
    fs::copy(&from.log, &to.log)?;
    Ok(())
}

fn contents(tree: &mut BTree<u64, u64>) -> Result<BTreeMap<u64, u64>> {
    let mut out = BTreeMap::new();
    tree.for_each(|k, v| {
        out.insert(k, v);
        Ok(())
    })?;
    Ok(out)
}

fn check_atomicity<F>(seed_keys: impl Iterator<Item = u64>, op: F) -> Result<()>
where
    F: Fn(&mut BTree<u64, u64>) -> Result<()>,
{
    check_atomicity_after(
        |tree| {
            for key in seed_keys {
                tree.insert(&key, &(key * 3))?;
            }
            Ok(())
        },
        op,
    )
    .map(|_| ())
}

/// Builds a seed store with `populate`, then replays `op` against copies of it
/// with an ever larger write budget until the operation completes. Every
/// failed attempt must reopen to the exact seed bytes and entries. Returns the
/// counters of the run that completed.
fn check_atomicity_after<S, F>(populate: S, op: F) -> Result<TreeStats>
where
    S: FnOnce(&mut BTree<u64, u64>) -> Result<()>,
    F: Fn(&mut BTree<u64, u64>) -> Result<()>,
{
    init_tracing();
    let seed_dir = tempdir()?;
    let seed = StorePaths::in_dir(seed_dir.path());
    let expected = {
        let mut tree: BTree<u64, u64> = BTree::open(&seed, options())?;
        populate(&mut tree)?;
        contents(&mut tree)?
    };
    let before = snapshot(&seed)?;

    let mut failures = 0usize;
    for writes in 0.. {
        let dir = tempdir()?;
        let paths = StorePaths::in_dir(dir.path());
        copy_store(&seed, &paths)?;

        let mut tree = open_faulty(&paths, writes)?;
        match op(&mut tree) {
            Ok(()) => {
                assert!(failures > 0, "operation never touched the files");
                return Ok(tree.stats());
            }
            Err(SombraError::Io(_)) => failures += 1,
            Err(other) => panic!("unexpected error with budget {writes}: {other}"),
        }
        if tree.is_poisoned() {
            assert!(matches!(tree.find(&0), Err(SombraError::Poisoned)));
        }
        drop(tree);

        let mut reopened: BTree<u64, u64> = BTree::open(&paths, options())?;
        let after = snapshot(&paths)?;
        assert!(
            after.nodes == before.nodes,
            "node file differs after recovery (budget {writes})"
        );
        assert!(
            after.values == before.values,
            "value file differs after recovery (budget {writes})"
        );
        assert_eq!(contents(&mut reopened)?, expected, "budget {writes}");
        let report = reopened.verify()?;
        assert!(report.success, "budget {writes}: {:?}", report.findings);
    }
    unreachable!("the write budget is unbounded")
}

#[test]
fn insert_with_root_split_is_atomic() -> Result<()> {
    // Two keys fill the degree-2 root; the third forces a root split.
    check_atomicity([10u64, 20].into_iter(), |tree| tree.insert(&15, &45))
}

#[test]
fn cascading_split_is_atomic() -> Result<()> {
    // Ascending inserts into a degree-2 tree split every level at once when
    // the key count reaches 2^k - 2.
    check_atomicity(0u64..30, |tree| tree.insert(&30, &90))
}

#[test]
fn delete_with_merges_is_atomic() -> Result<()> {
    // Ascending inserts leave the leftmost nodes minimally filled, so removing
    // the smallest key merges its way up the left spine.
    check_atomicity(0u64..30, |tree| tree.delete(&0).map(|_| ()))
}

#[test]
fn delete_of_internal_key_is_atomic() -> Result<()> {
    check_atomicity(0u64..16, |tree| tree.delete(&7).map(|_| ()))
}

#[test]
fn split_into_recycled_slots_is_atomic() -> Result<()> {
    let stats = check_atomicity_after(
        |tree| {
            for key in 0u64..40 {
                tree.insert(&key, &(key * 3))?;
            }
            for key in 10u64..30 {
                assert!(tree.delete(&key)?);
            }
            let counts = tree.verify()?.counts;
            assert!(counts.free_node_slots > 0, "merges should free node slots");
            assert!(counts.free_value_slots > 0);
            Ok(())
        },
        // Ascending inserts leave the rightmost leaf holding 38 and 39, so a
        // third key splits it.
        |tree| tree.insert(&100, &300),
    )?;
    assert!(stats.splits >= 1, "{stats:?}");
    assert!(stats.slots_reused >= 2, "node and value slots come off the free lists: {stats:?}");
    Ok(())
}

#[test]
fn value_overwrite_is_atomic() -> Result<()> {
    check_atomicity(0u64..10, |tree| tree.insert(&4, &999))
}

#[test]
fn failed_lookup_setup_does_not_poison() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let paths = StorePaths::in_dir(dir.path());
    {
        let mut tree: BTree<u64, u64> = BTree::open(&paths, options())?;
        tree.insert(&1, &2)?;
    }
    // The only write a lookup performs is resetting the idle log count.
    let mut tree = open_faulty(&paths, 0)?;
    assert!(matches!(tree.find(&1), Err(SombraError::Io(_))));
    assert!(!tree.is_poisoned());
    Ok(())
}

#[test]
fn interrupted_creation_reopens_cleanly() -> Result<()> {
    init_tracing();
    for writes in 0..8 {
        let dir = tempdir()?;
        let paths = StorePaths::in_dir(dir.path());
        let _ = open_faulty(&paths, writes);
        let mut tree: BTree<u64, u64> = BTree::open(&paths, options())?;
        assert_eq!(tree.find(&1)?, None);
        tree.insert(&1, &1)?;
        assert_eq!(tree.find(&1)?, Some(1));
    }
    Ok(())
}
