#![allow(missing_docs)]

use sombra_kv::{BTree, Result, StorePaths, Synchronous, TreeOptions};
use tempfile::tempdir;

fn degree_two() -> TreeOptions {
    TreeOptions {
        min_degree: 2,
        synchronous: Synchronous::Normal,
        ..TreeOptions::default()
    }
}

fn keys_in_order(tree: &mut BTree<i64, i64>) -> Result<Vec<i64>> {
    let mut keys = Vec::new();
    tree.for_each(|k, _| {
        keys.push(k);
        Ok(())
    })?;
    Ok(keys)
}

#[test]
fn degree_two_walkthrough() -> Result<()> {
    let dir = tempdir()?;
    let mut tree: BTree<i64, i64> = BTree::open(&StorePaths::in_dir(dir.path()), degree_two())?;

    for key in [5, 3, 8, 1, 4, 7, 2, 6] {
        tree.insert(&key, &(key * 100))?;
    }
    assert_eq!(keys_in_order(&mut tree)?, (1..=8).collect::<Vec<_>>());

    assert!(tree.delete(&4)?);
    assert_eq!(tree.find(&4)?, None);
    assert_eq!(tree.find(&7)?, Some(700));

    let hits = tree.range(&3, &6)?;
    assert_eq!(hits, vec![(3, 300), (5, 500), (6, 600)]);

    let report = tree.verify()?;
    assert!(report.success, "{:?}", report.findings);
    assert_eq!(report.counts.entries, 7);
    Ok(())
}

#[test]
fn walkthrough_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let paths = StorePaths::in_dir(dir.path());
    {
        let mut tree: BTree<i64, i64> = BTree::open(&paths, degree_two())?;
        for key in [5, 3, 8, 1, 4, 7, 2, 6] {
            tree.insert(&key, &-key)?;
        }
        tree.delete(&4)?;
        tree.sync()?;
    }

    let mut tree: BTree<i64, i64> = BTree::open(&paths, degree_two())?;
    assert!(tree.recovery().is_clean());
    assert_eq!(keys_in_order(&mut tree)?, vec![1, 2, 3, 5, 6, 7, 8]);
    assert_eq!(tree.find(&8)?, Some(-8));
    assert_eq!(tree.range(&3, &6)?, vec![(3, -3), (5, -5), (6, -6)]);
    Ok(())
}

#[test]
fn options_load_from_toml_file() -> Result<()> {
    let dir = tempdir()?;
    let config = dir.path().join("tree.toml");
    std::fs::write(&config, "min_degree = 2\nsynchronous = \"full\"\n")?;
    let options = TreeOptions::load(&config)?;
    assert_eq!(options.synchronous, Synchronous::Full);

    let mut tree: BTree<i64, i64> = BTree::open(&StorePaths::in_dir(dir.path()), options)?;
    for key in 0..32 {
        tree.insert(&key, &key)?;
    }
    assert_eq!(tree.range(&10, &12)?, vec![(10, 10), (11, 11), (12, 12)]);
    assert!(tree.stats().log_records > 0);
    Ok(())
}
