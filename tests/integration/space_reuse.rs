#![allow(missing_docs)]

use std::fs;

use sombra_kv::{BTree, Result, StorePaths, Synchronous, TreeOptions};
use tempfile::tempdir;

fn options(min_degree: usize) -> TreeOptions {
    TreeOptions {
        min_degree,
        synchronous: Synchronous::Off,
        ..TreeOptions::default()
    }
}

fn file_lens(paths: &StorePaths) -> Result<(u64, u64)> {
    Ok((fs::metadata(&paths.nodes)?.len(), fs::metadata(&paths.values)?.len()))
}

#[test]
fn emptied_tree_rebuilds_without_growing() -> Result<()> {
    let dir = tempdir()?;
    let paths = StorePaths::in_dir(dir.path());
    let mut tree: BTree<u64, u64> = BTree::open(&paths, options(2))?;

    for key in 0u64..200 {
        tree.insert(&key, &key)?;
    }
    let (nodes_full, values_full) = file_lens(&paths)?;

    for key in 0u64..200 {
        assert!(tree.delete(&key)?);
    }
    let report = tree.verify()?;
    assert_eq!(report.counts.nodes, 1);
    assert_eq!(report.counts.free_value_slots, 200);
    assert_eq!(file_lens(&paths)?, (nodes_full, values_full));

    let appended_before = tree.stats().slots_appended;
    for key in 0u64..200 {
        tree.insert(&key, &(key + 1))?;
    }
    assert_eq!(tree.stats().slots_appended, appended_before);
    assert_eq!(file_lens(&paths)?, (nodes_full, values_full));
    let report = tree.verify()?;
    assert!(report.success, "{:?}", report.findings);
    assert_eq!(report.counts.free_value_slots, 0);
    Ok(())
}

#[test]
fn partial_delete_then_insert_reuses_slots() -> Result<()> {
    let dir = tempdir()?;
    let paths = StorePaths::in_dir(dir.path());
    let mut tree: BTree<u64, [u8; 32]> = BTree::open(&paths, options(3))?;

    for key in 0u64..300 {
        tree.insert(&key, &[key as u8; 32])?;
    }
    let (_, values_full) = file_lens(&paths)?;

    for key in (0u64..300).filter(|k| k % 2 == 0) {
        assert!(tree.delete(&key)?);
    }
    let freed = tree.verify()?.counts.free_node_slots;
    assert!(freed > 0, "merges should have released node slots");

    let reused_before = tree.stats().slots_reused;
    for key in (300u64..600).filter(|k| k % 2 == 0) {
        tree.insert(&key, &[0xAB; 32])?;
    }
    // Exactly as many values were released as are stored again.
    assert_eq!(file_lens(&paths)?.1, values_full);
    assert!(tree.stats().slots_reused >= reused_before + 150);

    let report = tree.verify()?;
    assert!(report.success, "{:?}", report.findings);
    assert_eq!(report.counts.entries, 300);
    assert_eq!(report.counts.free_value_slots, 0);
    Ok(())
}

#[test]
fn free_lists_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let paths = StorePaths::in_dir(dir.path());
    {
        let mut tree: BTree<u64, u64> = BTree::open(&paths, options(2))?;
        for key in 0u64..64 {
            tree.insert(&key, &key)?;
        }
        for key in 0u64..32 {
            tree.delete(&key)?;
        }
    }
    let lens = file_lens(&paths)?;
    let mut tree: BTree<u64, u64> = BTree::open(&paths, options(2))?;
    let free_values = tree.verify()?.counts.free_value_slots;
    assert_eq!(free_values, 32);
    for key in 100u64..132 {
        tree.insert(&key, &key)?;
    }
    assert_eq!(file_lens(&paths)?.1, lens.1);
    assert_eq!(tree.verify()?.counts.free_value_slots, 0);
    Ok(())
}
