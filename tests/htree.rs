//! End-to-end scenarios for the hash-tree index.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

use penumbra::htree::{defrag, stats, BUCKET_CAPACITY};
use penumbra::{HSet, HTree, PenumbraError, RecordStore, Result, StoreOptions};

fn small_options() -> StoreOptions {
    StoreOptions {
        page_size: 512,
        cache_pages: 64,
    }
}

#[test]
fn two_trees_share_one_store() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let path = dir.path().join("shared.db");
    let mut store = RecordStore::open_with_options(&path, small_options())?;

    let mut numbers = HTree::<u64, u64>::create(&mut store)?;
    let mut words = HTree::<String, String>::create(&mut store)?;
    for i in 0..100u64 {
        numbers.put(&mut store, i, i * i)?;
    }
    words.put(&mut store, "left".into(), "right".into())?;

    assert_eq!(numbers.get(&mut store, &9)?, Some(81));
    assert_eq!(words.get(&mut store, &"left".into())?, Some("right".into()));
    assert_eq!(numbers.len(&mut store)?, 100);
    assert_eq!(words.len(&mut store)?, 1);
    Ok(())
}

#[test]
fn tree_survives_store_reopen() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let path = dir.path().join("reopen.db");
    let mut reference = HashMap::new();

    {
        let mut store = RecordStore::open_with_options(&path, small_options())?;
        let mut tree = HTree::<u64, String>::create(&mut store)?;
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..300 {
            let key = rng.gen_range(0..500u64);
            let value = format!("value-{}", rng.gen::<u32>());
            reference.insert(key, value.clone());
            tree.put(&mut store, key, value)?;
        }
        store.set_root(0, tree.recid())?;
        store.flush()?;
    }

    let mut store = RecordStore::open(&path)?;
    let recid = store.get_root(0)?;
    let tree = HTree::<u64, String>::load(&mut store, recid)?;
    for (key, value) in &reference {
        assert_eq!(tree.get(&mut store, key)?.as_ref(), Some(value));
    }
    assert_eq!(tree.len(&mut store)?, reference.len() as u64);

    let report = stats::verify(&mut store, recid)?;
    assert!(report.is_clean(), "problems: {:?}", report.problems);
    Ok(())
}

#[test]
fn traversal_matches_insert_minus_remove_multiset() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let path = dir.path().join("multiset.db");
    let mut store = RecordStore::open_with_options(&path, small_options())?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;
    let mut reference = HashMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(23);

    for _ in 0..1_000 {
        let key = rng.gen_range(0..256u64);
        if rng.gen_bool(0.7) {
            let value = rng.gen::<u64>();
            tree.put(&mut store, key, value)?;
            reference.insert(key, value);
        } else {
            tree.remove(&mut store, &key)?;
            reference.remove(&key);
        }
    }

    let mut traversed = Vec::new();
    let mut keys = tree.keys(&mut store)?;
    while let Some(key) = keys.next(&tree, &mut store)? {
        traversed.push(key);
    }
    traversed.sort_unstable();
    let mut expected: Vec<u64> = reference.keys().copied().collect();
    expected.sort_unstable();
    assert_eq!(traversed, expected);
    Ok(())
}

#[test]
fn defrag_into_fresh_store_preserves_tree() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let src_path = dir.path().join("fragmented.db");
    let dst_path = dir.path().join("compact.db");

    let mut src = RecordStore::open_with_options(&src_path, small_options())?;
    let mut tree = HTree::<String, Vec<u8>>::create(&mut src)?;
    let mut rng = ChaCha8Rng::seed_from_u64(31);
    let mut reference = HashMap::new();

    // Insert enough entries to split several slots, with churn to
    // fragment the record file.
    for i in 0..400u32 {
        let key = format!("entry-{i}");
        let value: Vec<u8> = (0..rng.gen_range(0..64)).map(|_| rng.gen()).collect();
        tree.put(&mut src, key.clone(), value.clone())?;
        reference.insert(key, value);
    }
    for i in (0..400u32).step_by(3) {
        let key = format!("entry-{i}");
        tree.remove(&mut src, &key)?;
        reference.remove(&key);
    }
    src.set_root(0, tree.recid())?;
    src.flush()?;

    let mut dst = RecordStore::open_with_options(&dst_path, small_options())?;
    defrag(&mut src, &mut dst, tree.recid())?;
    dst.set_root(0, tree.recid())?;
    dst.flush()?;

    let recid = dst.get_root(0)?;
    let reloaded = HTree::<String, Vec<u8>>::load(&mut dst, recid)?;
    for (key, value) in &reference {
        assert_eq!(reloaded.get(&mut dst, key)?.as_ref(), Some(value));
    }
    assert_eq!(reloaded.len(&mut dst)?, reference.len() as u64);
    assert_eq!(src.fetch_raw(recid)?, dst.fetch_raw(recid)?);

    let report = stats::verify(&mut dst, recid)?;
    assert!(report.is_clean(), "problems: {:?}", report.problems);
    Ok(())
}

#[test]
fn heavy_collision_tree_round_trips_through_defrag() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut src =
        RecordStore::open_with_options(&dir.path().join("src.db"), small_options())?;
    let mut tree = HTree::<u64, u64>::create(&mut src)?;

    // Full 32-bit hash collisions drive the tree to maximum depth.
    let colliding: Vec<u64> = (0..(BUCKET_CAPACITY as u32 * 2))
        .map(|h| (u64::from(h) << 32) | u64::from(0xCAFE_F00D ^ h))
        .collect();
    for &key in &colliding {
        tree.put(&mut src, key, !key)?;
    }

    let mut dst =
        RecordStore::open_with_options(&dir.path().join("dst.db"), small_options())?;
    defrag(&mut src, &mut dst, tree.recid())?;

    let reloaded = HTree::<u64, u64>::load(&mut dst, tree.recid())?;
    for &key in &colliding {
        assert_eq!(reloaded.get(&mut dst, &key)?, Some(!key));
    }
    let tree_stats = stats::collect(&mut dst, tree.recid())?;
    assert_eq!(tree_stats.directories, 4);
    assert_eq!(tree_stats.bucket_depths[4], 1);
    Ok(())
}

#[test]
fn set_persists_across_reopen() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let path = dir.path().join("set.db");

    {
        let mut store = RecordStore::open_with_options(&path, small_options())?;
        let mut set = HSet::<String>::create(&mut store)?;
        for name in ["ursa", "lyra", "vela"] {
            set.insert(&mut store, name.to_string())?;
        }
        store.set_root(1, set.recid())?;
        store.flush()?;
    }

    let mut store = RecordStore::open(&path)?;
    let root = store.get_root(1)?;
    let set = HSet::<String>::load(&mut store, root)?;
    assert!(set.contains(&mut store, &"lyra".to_string())?);
    assert!(!set.contains(&mut store, &"orion".to_string())?);
    assert_eq!(set.len(&mut store)?, 3);
    Ok(())
}

#[test]
fn cursor_detects_unrelated_tree_mutation_only_through_its_own_tree() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let path = dir.path().join("pair.db");
    let mut store = RecordStore::open_with_options(&path, small_options())?;
    let mut watched = HTree::<u64, u64>::create(&mut store)?;
    let mut other = HTree::<u64, u64>::create(&mut store)?;
    for i in 0..5u64 {
        watched.put(&mut store, i, i)?;
        other.put(&mut store, i, i)?;
    }

    let mut keys = watched.keys(&mut store)?;
    assert!(keys.next(&watched, &mut store)?.is_some());

    // A mutation through a different handle does not trip this cursor.
    other.put(&mut store, 99, 99)?;
    assert!(keys.next(&watched, &mut store)?.is_some());

    watched.put(&mut store, 99, 99)?;
    assert!(matches!(
        keys.next(&watched, &mut store),
        Err(PenumbraError::ConcurrentModification)
    ));
    Ok(())
}
