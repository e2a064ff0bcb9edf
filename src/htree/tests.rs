use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::{tempdir, TempDir};

use super::stats;
use super::{defrag, HSet, HTree, BUCKET_CAPACITY};
use crate::error::{PenumbraError, Result};
use crate::store::{RecordStore, StoreOptions};

fn open_store(dir: &TempDir, name: &str) -> Result<RecordStore> {
    RecordStore::open_with_options(
        &dir.path().join(name),
        StoreOptions {
            page_size: 512,
            cache_pages: 64,
        },
    )
}

/// Keys below 2^32 hash to themselves, so the slot a directory routes them
/// to is the corresponding byte of the key.
fn key_in_slot(top: u8, second: u16) -> u64 {
    (u64::from(top) << 24) | (u64::from(second) << 16)
}

/// Keys of the form `(h << 32) | (x ^ h)` all hash to `x`: full 32-bit
/// collisions that force the tree to its maximum depth.
fn colliding_key(x: u32, h: u32) -> u64 {
    (u64::from(h) << 32) | u64::from(x ^ h)
}

#[test]
fn single_entry_roundtrip() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;

    assert_eq!(tree.put(&mut store, 7, 70)?, None);
    assert_eq!(tree.get(&mut store, &7)?, Some(70));
    assert_eq!(tree.get(&mut store, &8)?, None);
    assert_eq!(tree.len(&mut store)?, 1);
    assert!(!tree.is_empty(&mut store)?);
    Ok(())
}

#[test]
fn overwrite_returns_prior_value() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;

    assert_eq!(tree.put(&mut store, 1, 10)?, None);
    assert_eq!(tree.put(&mut store, 1, 20)?, Some(10));
    assert_eq!(tree.get(&mut store, &1)?, Some(20));
    assert_eq!(tree.len(&mut store)?, 1);
    Ok(())
}

#[test]
fn remove_then_get_absent() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;

    tree.put(&mut store, 5, 50)?;
    assert_eq!(tree.remove(&mut store, &5)?, Some(50));
    assert_eq!(tree.remove(&mut store, &5)?, None);
    assert_eq!(tree.get(&mut store, &5)?, None);
    assert!(tree.is_empty(&mut store)?);
    Ok(())
}

#[test]
fn put_opt_absent_value_removes() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;

    tree.put_opt(&mut store, 3, Some(30))?;
    assert_eq!(tree.put_opt(&mut store, 3, None)?, Some(30));
    assert_eq!(tree.get(&mut store, &3)?, None);
    Ok(())
}

#[test]
fn bucket_overflow_splits_into_subdirectory() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;

    // All keys route to root slot 0xAB but differ in the next hash slice.
    let keys: Vec<u64> = (0..=BUCKET_CAPACITY as u16)
        .map(|i| key_in_slot(0xAB, i))
        .collect();
    for &key in &keys {
        tree.put(&mut store, key, key + 1)?;
    }

    let tree_stats = stats::collect(&mut store, tree.recid())?;
    assert_eq!(tree_stats.directories, 2, "split should add one directory");
    assert_eq!(tree_stats.entries, keys.len() as u64);
    assert!(tree_stats.bucket_depths[2] > 0);
    for &key in &keys {
        assert_eq!(tree.get(&mut store, &key)?, Some(key + 1));
    }
    Ok(())
}

#[test]
fn removals_collapse_emptied_subdirectory() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;

    // Overflow root slot 0xAB into a sub-directory, plus one keeper in an
    // unrelated slot.
    let keys: Vec<u64> = (0..=BUCKET_CAPACITY as u16)
        .map(|i| key_in_slot(0xAB, i))
        .collect();
    for &key in &keys {
        tree.put(&mut store, key, key)?;
    }
    let keeper = key_in_slot(0x01, 0);
    tree.put(&mut store, keeper, 1)?;
    assert_eq!(stats::collect(&mut store, tree.recid())?.directories, 2);

    // Draining slot 0xAB empties the sub-directory, which the root then
    // deletes eagerly.
    for &key in &keys {
        assert_eq!(tree.remove(&mut store, &key)?, Some(key));
    }

    let tree_stats = stats::collect(&mut store, tree.recid())?;
    assert_eq!(
        tree_stats.directories, 1,
        "emptied sub-directory should collapse"
    );
    assert_eq!(tree_stats.buckets, 1);
    assert_eq!(tree_stats.entries, 1);
    assert_eq!(tree.get(&mut store, &keeper)?, Some(1));
    Ok(())
}

#[test]
fn full_hash_collisions_grow_max_depth_bucket() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;

    let keys: Vec<u64> = (0..(BUCKET_CAPACITY as u32 * 3))
        .map(|h| colliding_key(0xDEAD_BEEF, h))
        .collect();
    for (i, &key) in keys.iter().enumerate() {
        tree.put(&mut store, key, i as u64)?;
    }

    let tree_stats = stats::collect(&mut store, tree.recid())?;
    assert_eq!(tree_stats.directories, 4, "one directory per level");
    assert_eq!(tree_stats.buckets, 1);
    assert_eq!(tree_stats.bucket_depths[4], 1);
    assert_eq!(tree_stats.entries, keys.len() as u64);
    for (i, &key) in keys.iter().enumerate() {
        assert_eq!(tree.get(&mut store, &key)?, Some(i as u64));
    }

    let report = stats::verify(&mut store, tree.recid())?;
    assert!(report.is_clean(), "problems: {:?}", report.problems);
    Ok(())
}

#[test]
fn cursor_sees_every_entry_once() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut reference = HashMap::new();
    for _ in 0..200 {
        let key = rng.gen_range(0..100_000u64);
        let value = rng.gen::<u64>();
        reference.insert(key, value);
        tree.put(&mut store, key, value)?;
    }

    let mut seen = HashMap::new();
    let mut keys = tree.keys(&mut store)?;
    while let Some(key) = keys.next(&tree, &mut store)? {
        let value = tree.get(&mut store, &key)?.expect("key just yielded");
        assert!(seen.insert(key, value).is_none(), "key yielded twice");
    }
    assert_eq!(seen, reference);

    let mut value_count = 0u64;
    let mut values = tree.values(&mut store)?;
    while values.next(&tree, &mut store)?.is_some() {
        value_count += 1;
    }
    assert_eq!(value_count, reference.len() as u64);
    assert_eq!(tree.len(&mut store)?, reference.len() as u64);
    Ok(())
}

#[test]
fn cursor_fails_fast_after_mutation() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;
    for i in 0..10u64 {
        tree.put(&mut store, i, i)?;
    }

    let mut keys = tree.keys(&mut store)?;
    assert!(keys.next(&tree, &mut store)?.is_some());

    tree.put(&mut store, 999, 999)?;
    assert!(matches!(
        keys.next(&tree, &mut store),
        Err(PenumbraError::ConcurrentModification)
    ));
    Ok(())
}

#[test]
fn cursor_remove_without_current_entry_fails() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;
    tree.put(&mut store, 1, 1)?;

    let mut keys = tree.keys(&mut store)?;
    assert!(matches!(
        keys.remove(&mut tree, &mut store),
        Err(PenumbraError::NoCurrentEntry)
    ));

    assert_eq!(keys.next(&tree, &mut store)?, Some(1));
    keys.remove(&mut tree, &mut store)?;
    assert!(matches!(
        keys.remove(&mut tree, &mut store),
        Err(PenumbraError::NoCurrentEntry)
    ));
    assert_eq!(tree.get(&mut store, &1)?, None);
    Ok(())
}

#[test]
fn cursor_survives_its_own_removal() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;
    for i in 0..20u64 {
        tree.put(&mut store, i, i * 10)?;
    }

    let mut removed = Vec::new();
    let mut keys = tree.keys(&mut store)?;
    while let Some(key) = keys.next(&tree, &mut store)? {
        if key % 2 == 0 {
            keys.remove(&mut tree, &mut store)?;
            removed.push(key);
        }
    }
    for key in removed {
        assert_eq!(tree.get(&mut store, &key)?, None);
    }
    assert_eq!(tree.len(&mut store)?, 10);
    Ok(())
}

#[test]
fn cursor_on_empty_tree_is_exhausted() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let tree = HTree::<u64, u64>::create(&mut store)?;
    let mut keys = tree.keys(&mut store)?;
    assert_eq!(keys.next(&tree, &mut store)?, None);
    assert_eq!(keys.next(&tree, &mut store)?, None);
    Ok(())
}

#[test]
fn clear_releases_every_page() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;
    for i in 0..100u64 {
        tree.put(&mut store, i, i)?;
    }
    tree.clear(&mut store)?;

    assert!(tree.is_empty(&mut store)?);
    assert_eq!(tree.len(&mut store)?, 0);
    let tree_stats = stats::collect(&mut store, tree.recid())?;
    assert_eq!(tree_stats.directories, 1);
    assert_eq!(tree_stats.buckets, 0);
    assert!(store.stats().free_pages > 0);

    tree.put(&mut store, 1, 2)?;
    assert_eq!(tree.get(&mut store, &1)?, Some(2));
    Ok(())
}

#[test]
fn clear_invalidates_cursors() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;
    for i in 0..10u64 {
        tree.put(&mut store, i, i)?;
    }
    let mut keys = tree.keys(&mut store)?;
    tree.clear(&mut store)?;
    assert!(matches!(
        keys.next(&tree, &mut store),
        Err(PenumbraError::ConcurrentModification)
    ));
    Ok(())
}

#[test]
fn tree_reloads_from_header_record() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let recid = {
        let mut store = open_store(&dir, "tree.db")?;
        let mut tree = HTree::<String, String>::create(&mut store)?;
        tree.put(&mut store, "key".into(), "value".into())?;
        store.set_root(0, tree.recid())?;
        store.flush()?;
        tree.recid()
    };

    let mut store = open_store(&dir, "tree.db")?;
    assert_eq!(store.get_root(0)?, recid);
    let tree = HTree::<String, String>::load(&mut store, recid)?;
    assert_eq!(tree.get(&mut store, &"key".into())?, Some("value".into()));
    Ok(())
}

#[test]
fn defrag_preserves_record_ids_and_entries() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut src = open_store(&dir, "src.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut src)?;

    // Force depth >= 2 plus spread across several top-level slots.
    for i in 0..=BUCKET_CAPACITY as u16 {
        tree.put(&mut src, key_in_slot(0x10, i), u64::from(i))?;
    }
    for top in 0x20..0x40u8 {
        tree.put(&mut src, key_in_slot(top, 0), u64::from(top))?;
    }
    // Churn so live record-ids are not contiguous.
    for i in 0..16u64 {
        let key = key_in_slot(0x77, i as u16);
        tree.put(&mut src, key, key)?;
        tree.remove(&mut src, &key)?;
    }

    let mut dst = open_store(&dir, "dst.db")?;
    defrag(&mut src, &mut dst, tree.recid())?;

    assert_eq!(src.fetch_raw(tree.root())?, dst.fetch_raw(tree.root())?);
    let reloaded = HTree::<u64, u64>::load(&mut dst, tree.recid())?;
    for i in 0..=BUCKET_CAPACITY as u16 {
        assert_eq!(
            reloaded.get(&mut dst, &key_in_slot(0x10, i))?,
            Some(u64::from(i))
        );
    }
    for top in 0x20..0x40u8 {
        assert_eq!(
            reloaded.get(&mut dst, &key_in_slot(top, 0))?,
            Some(u64::from(top))
        );
    }
    assert_eq!(
        stats::collect(&mut src, tree.recid())?.entries,
        stats::collect(&mut dst, tree.recid())?.entries
    );
    Ok(())
}

#[test]
fn randomized_soak_against_reference_model() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<u64, u64>::create(&mut store)?;
    let mut reference: HashMap<u64, u64> = HashMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    for _ in 0..2_000 {
        // Small key space plus colliding keys keeps splits and collapses hot.
        let key = match rng.gen_range(0..3) {
            0 => rng.gen_range(0..64u64),
            1 => key_in_slot(rng.gen::<u8>() & 0x3, rng.gen_range(0..4)),
            _ => colliding_key(0x1234_5678, rng.gen_range(0..24)),
        };
        if rng.gen_bool(0.6) {
            let value = rng.gen::<u64>();
            assert_eq!(
                tree.put(&mut store, key, value)?,
                reference.insert(key, value),
                "put prior mismatch for key {key}"
            );
        } else {
            assert_eq!(
                tree.remove(&mut store, &key)?,
                reference.remove(&key),
                "remove prior mismatch for key {key}"
            );
        }
    }

    for (key, value) in &reference {
        assert_eq!(tree.get(&mut store, key)?, Some(*value));
    }
    assert_eq!(tree.len(&mut store)?, reference.len() as u64);

    let report = stats::verify(&mut store, tree.recid())?;
    assert!(report.is_clean(), "problems: {:?}", report.problems);
    Ok(())
}

#[test]
fn string_keys_and_values() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "tree.db")?;
    let mut tree = HTree::<String, Vec<u8>>::create(&mut store)?;

    for i in 0..50u32 {
        tree.put(&mut store, format!("key-{i}"), vec![i as u8; 3])?;
    }
    for i in 0..50u32 {
        assert_eq!(
            tree.get(&mut store, &format!("key-{i}"))?,
            Some(vec![i as u8; 3])
        );
    }
    assert_eq!(tree.get(&mut store, &"missing".to_string())?, None);
    Ok(())
}

#[test]
fn set_wrapper_semantics() -> Result<()> {
    let dir = tempdir().map_err(PenumbraError::Io)?;
    let mut store = open_store(&dir, "set.db")?;
    let mut set = HSet::<String>::create(&mut store)?;

    assert!(set.insert(&mut store, "a".into())?);
    assert!(!set.insert(&mut store, "a".into())?);
    assert!(set.insert(&mut store, "b".into())?);
    assert!(set.contains(&mut store, &"a".into())?);
    assert!(!set.contains(&mut store, &"c".into())?);
    assert_eq!(set.len(&mut store)?, 2);

    let mut elements = Vec::new();
    let mut iter = set.iter(&mut store)?;
    while let Some(element) = iter.next(set.as_tree(), &mut store)? {
        elements.push(element);
    }
    elements.sort();
    assert_eq!(elements, vec!["a".to_string(), "b".to_string()]);

    assert!(set.remove(&mut store, &"a".into())?);
    assert!(!set.remove(&mut store, &"a".into())?);
    set.clear(&mut store)?;
    assert!(set.is_empty(&mut store)?);
    Ok(())
}
