#![allow(missing_docs)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_kv::{BTree, CachePolicy, Result, StorePaths, Synchronous, TreeOptions};
use tempfile::tempdir;

fn options(min_degree: usize, cache_policy: CachePolicy) -> TreeOptions {
    TreeOptions {
        min_degree,
        max_cache_bytes: 64 * 1024,
        cache_policy,
        synchronous: Synchronous::Off,
    }
}

fn check_against_model(
    tree: &mut BTree<u32, u64>,
    model: &BTreeMap<u32, u64>,
    rng: &mut ChaCha8Rng,
) -> Result<()> {
    for _ in 0..32 {
        let key = rng.gen_range(0u32..2_000);
        assert_eq!(tree.find(&key)?, model.get(&key).copied(), "key {key}");
    }
    let low = rng.gen_range(0u32..2_000);
    let high = low.saturating_add(rng.gen_range(0u32..300));
    let expected: Vec<(u32, u64)> = model.range(low..=high).map(|(k, v)| (*k, *v)).collect();
    assert_eq!(tree.range(&low, &high)?, expected, "range {low}..={high}");

    let report = tree.verify()?;
    assert!(report.success, "{:?}", report.findings);
    assert!(report.findings.is_empty(), "{:?}", report.findings);
    assert_eq!(report.counts.entries, model.len() as u64);
    Ok(())
}

fn run_seeded(seed: u64, min_degree: usize, cache_policy: CachePolicy) -> Result<()> {
    let dir = tempdir()?;
    let paths = StorePaths::in_dir(dir.path());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut model = BTreeMap::new();
    let mut tree: BTree<u32, u64> = BTree::open(&paths, options(min_degree, cache_policy))?;

    for round in 0..6 {
        // Alternate insert-heavy and delete-heavy phases so the tree both grows
        // and shrinks by several levels.
        let insert_bias = if round % 2 == 0 { 0.8 } else { 0.25 };
        for _ in 0..1_500 {
            let key = rng.gen_range(0u32..2_000);
            if rng.gen_bool(insert_bias) {
                let value = rng.gen::<u64>();
                tree.insert(&key, &value)?;
                model.insert(key, value);
            } else {
                let removed = tree.delete(&key)?;
                assert_eq!(removed, model.remove(&key).is_some(), "delete {key}");
            }
        }
        check_against_model(&mut tree, &model, &mut rng)?;

        drop(tree);
        tree = BTree::open(&paths, options(min_degree, cache_policy))?;
        assert!(tree.recovery().is_clean());
    }

    let mut seen = Vec::with_capacity(model.len());
    tree.for_each(|k, v| {
        seen.push((k, v));
        Ok(())
    })?;
    let expected: Vec<(u32, u64)> = model.into_iter().collect();
    assert_eq!(seen, expected);
    tree.stats().emit_tracing();
    Ok(())
}

#[test]
fn seeded_workloads_match_model() -> Result<()> {
    for (seed, degree) in [(1u64, 2usize), (2, 3), (3, 5), (4, 16)] {
        run_seeded(seed, degree, CachePolicy::OffsetSuccessor)?;
    }
    Ok(())
}

#[test]
fn lru_cache_workload_matches_model() -> Result<()> {
    run_seeded(0xC0FFEE, 4, CachePolicy::Lru)
}

#[derive(Clone, Debug)]
enum Op {
    Insert(u32, u64),
    Delete(u32),
    Reopen,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u32..128, any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        3 => (0u32..128).prop_map(Op::Delete),
        1 => Just(Op::Reopen),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn tree_matches_model_across_reopens(
        ops in prop::collection::vec(op_strategy(), 1..120),
        degree in 2usize..5,
        bounds in (0u32..128, 0u32..128),
    ) {
        let dir = tempdir().expect("tempdir");
        let paths = StorePaths::in_dir(dir.path());
        let opts = options(degree, CachePolicy::OffsetSuccessor);
        let mut tree: BTree<u32, u64> = BTree::open(&paths, opts.clone()).expect("open");
        let mut model = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    tree.insert(&k, &v).expect("insert");
                    model.insert(k, v);
                }
                Op::Delete(k) => {
                    let removed = tree.delete(&k).expect("delete");
                    prop_assert_eq!(removed, model.remove(&k).is_some());
                }
                Op::Reopen => {
                    drop(tree);
                    tree = BTree::open(&paths, opts.clone()).expect("reopen");
                }
            }
        }

        let (low, high) = bounds;
        let expected: Vec<(u32, u64)> = if low <= high {
            model.range(low..=high).map(|(k, v)| (*k, *v)).collect()
        } else {
            Vec::new()
        };
        prop_assert_eq!(tree.range(&low, &high).expect("range"), expected);
        for k in 0u32..128 {
            prop_assert_eq!(tree.find(&k).expect("find"), model.get(&k).copied());
        }
        let report = tree.verify().expect("verify");
        prop_assert!(report.success, "findings: {:?}", report.findings);
    }
}
