//! Tree handle: the top-level object exposing the map contract.

use std::marker::PhantomData;

use tracing::{debug, trace};

use crate::bytes::{encode_u64, Reader};
use crate::error::{PenumbraError, Result};
use crate::htree::codecs::{KeyCodec, ValCodec};
use crate::htree::cursor::{Keys, RawCursor, Values};
use crate::htree::directory::Directory;
use crate::htree::node::{DirCodec, TAG_DIRECTORY, TAG_TREE};
use crate::htree::stats;
use crate::store::{Codec, RecordId, RecordStore};

/// Codec for the small tree-header record holding the root directory's
/// record-id.
pub(crate) struct TreeCodec;

impl Codec for TreeCodec {
    type Item = RecordId;

    fn encode(&self, root: &RecordId, out: &mut Vec<u8>) -> Result<()> {
        out.push(TAG_TREE);
        encode_u64(root.0, out);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<RecordId> {
        let mut reader = Reader::new(bytes);
        let tag = reader.read_u8("tree header truncated")?;
        if tag != TAG_TREE {
            return Err(PenumbraError::Corruption(format!(
                "expected tree header, found tag 0x{tag:02X}"
            )));
        }
        let root = RecordId(reader.read_var_u64("tree root truncated")?);
        reader.ensure_consumed()?;
        if root.is_none() {
            return Err(PenumbraError::Corruption(
                "tree header references no root".into(),
            ));
        }
        Ok(root)
    }
}

/// Persistent extendible hash-tree map.
///
/// The handle owns the record-id of the root directory and a modification
/// counter used by fail-fast cursors. All operations borrow the record
/// store explicitly; the handle caches nothing between calls, so several
/// handles may be loaded for the same record-id as long as only one is
/// used to write.
pub struct HTree<K, V> {
    recid: RecordId,
    root: RecordId,
    mod_count: u64,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> HTree<K, V> {
    /// Allocates a fresh tree: an empty root directory plus the header
    /// record that names it.
    pub fn create(store: &mut RecordStore) -> Result<Self> {
        let root_dir = Directory::new(0);
        let root = store.insert(&root_dir, &DirCodec)?;
        let recid = store.insert(&root, &TreeCodec)?;
        debug!(recid = recid.0, root = root.0, "htree.create");
        Ok(Self {
            recid,
            root,
            mod_count: 0,
            _marker: PhantomData,
        })
    }

    /// Loads a tree previously created in `store` by its header record-id.
    pub fn load(store: &mut RecordStore, recid: RecordId) -> Result<Self> {
        let root = store.fetch(recid, &TreeCodec)?;
        Ok(Self {
            recid,
            root,
            mod_count: 0,
            _marker: PhantomData,
        })
    }

    /// Record-id of the tree header; pass to [`HTree::load`] to reopen.
    pub fn recid(&self) -> RecordId {
        self.recid
    }

    /// Record-id of the root directory.
    pub fn root(&self) -> RecordId {
        self.root
    }

    pub(crate) fn mod_count(&self) -> u64 {
        self.mod_count
    }

    pub fn get(&self, store: &mut RecordStore, key: &K) -> Result<Option<V>> {
        let root = store.fetch(self.root, &DirCodec)?;
        root.get(store, key)
    }

    /// Associates `value` with `key`, returning the value it replaced.
    pub fn put(&mut self, store: &mut RecordStore, key: K, value: V) -> Result<Option<V>> {
        let mut root = store.fetch(self.root, &DirCodec)?;
        let prior = root.put(store, self.root, key, value)?;
        self.mod_count += 1;
        Ok(prior)
    }

    /// Map-surface put where an absent value requests removal.
    pub fn put_opt(&mut self, store: &mut RecordStore, key: K, value: Option<V>) -> Result<Option<V>> {
        match value {
            Some(value) => self.put(store, key, value),
            None => self.remove(store, &key),
        }
    }

    /// Removes `key`, returning the value that was associated with it.
    pub fn remove(&mut self, store: &mut RecordStore, key: &K) -> Result<Option<V>> {
        let mut root = store.fetch(self.root, &DirCodec)?;
        let prior = root.remove(store, self.root, key)?;
        self.mod_count += 1;
        Ok(prior)
    }

    /// Depth-first cursor over the keys.
    pub fn keys(&self, store: &mut RecordStore) -> Result<Keys<K, V>>
    where
        K: Clone,
    {
        Ok(Keys::new(RawCursor::new(self, store)?))
    }

    /// Depth-first cursor over the values.
    pub fn values(&self, store: &mut RecordStore) -> Result<Values<K, V>>
    where
        K: Clone,
    {
        Ok(Values::new(RawCursor::new(self, store)?))
    }

    /// Number of entries, counted by traversal.
    pub fn len(&self, store: &mut RecordStore) -> Result<u64> {
        let root = store.fetch(self.root, &DirCodec)?;
        stats::count_subtree_entries(store, &root)
    }

    pub fn is_empty(&self, store: &mut RecordStore) -> Result<bool> {
        let root = store.fetch(self.root, &DirCodec)?;
        Ok(root.is_empty())
    }

    /// Deletes every entry and all interior pages, leaving the empty root.
    pub fn clear(&mut self, store: &mut RecordStore) -> Result<()> {
        let mut root = store.fetch(self.root, &DirCodec)?;
        root.delete_children(store)?;
        store.update(self.root, &root, &DirCodec)?;
        self.mod_count += 1;
        trace!(recid = self.recid.0, "htree.clear");
        Ok(())
    }
}

/// Copies a tree from `src` into `dst` byte for byte, preserving the
/// record-ids of the header, every directory, and every bucket. `recid`
/// is the tree's header record-id; it remains valid against `dst`.
pub fn defrag(src: &mut RecordStore, dst: &mut RecordStore, recid: RecordId) -> Result<()> {
    let header = src.fetch_raw(recid)?;
    let root = TreeCodec.decode(&header)?;
    dst.force_insert(recid, &header)?;

    let root_raw = src.fetch_raw(root)?;
    if root_raw.first() != Some(&TAG_DIRECTORY) {
        return Err(PenumbraError::Corruption(
            "tree root is not a directory".into(),
        ));
    }
    dst.force_insert(root, &root_raw)?;
    let root_dir = DirCodec.decode(&root_raw)?;
    root_dir.defrag(src, dst)?;
    debug!(recid = recid.0, "htree.defrag");
    Ok(())
}
