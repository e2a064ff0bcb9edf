//! Directory page: routing, growth, and collapse of the hash tree.

use tracing::{debug, trace};

use crate::bytes::{encode_u64, Reader};
use crate::error::{PenumbraError, Result};
use crate::htree::bucket::Bucket;
use crate::htree::codecs::{KeyCodec, ValCodec};
use crate::htree::node::{BucketCodec, DirCodec, Node, NodeCodec, TAG_BUCKET, TAG_DIRECTORY};
use crate::store::{Codec, RecordId, RecordStore};

/// Fanout of a directory page. Fixed by the persistent format: the sparse
/// encoding stores slot bounds in single bytes.
pub const MAX_CHILDREN: usize = 256;

/// Significant hash bits consumed per directory level.
pub const BIT_SIZE: u32 = 8;

/// Deepest directory level, zero-based. Four levels of 8 bits consume the
/// whole 32-bit key hash.
pub const MAX_DEPTH: u8 = 3;

/// Internal routing node of the hash tree.
///
/// A directory at depth `d` routes by the `d`-th 8-bit slice of the key
/// hash, most significant slice first. Slots hold child record-ids; zero
/// means the slot is empty. Children are never cached: every traversal
/// re-fetches through the record store.
#[derive(Clone, Debug, PartialEq)]
pub struct Directory {
    depth: u8,
    children: Box<[RecordId; MAX_CHILDREN]>,
}

impl Directory {
    pub(crate) fn new(depth: u8) -> Self {
        debug_assert!(depth <= MAX_DEPTH);
        Self {
            depth,
            children: Box::new([RecordId::NONE; MAX_CHILDREN]),
        }
    }

    pub(crate) fn depth(&self) -> u8 {
        self.depth
    }

    /// A directory is empty when it references no buckets or
    /// sub-directories. Empty non-root directories are deleted eagerly.
    pub(crate) fn is_empty(&self) -> bool {
        self.children.iter().all(RecordId::is_none)
    }

    pub(crate) fn child_at(&self, slot: usize) -> RecordId {
        self.children[slot]
    }

    #[cfg(test)]
    pub(crate) fn set_child_for_test(&mut self, slot: usize, recid: RecordId) {
        self.children[slot] = recid;
    }

    /// Slot index for a key hash at this directory's depth. Depth 0
    /// consumes the most significant 8 bits, depth `MAX_DEPTH` the least.
    fn slot_of(&self, hash: u32) -> usize {
        let shift = u32::from(MAX_DEPTH - self.depth) * BIT_SIZE;
        ((hash >> shift) & (MAX_CHILDREN as u32 - 1)) as usize
    }

    pub(crate) fn get<K: KeyCodec, V: ValCodec>(
        &self,
        store: &mut RecordStore,
        key: &K,
    ) -> Result<Option<V>> {
        let slot = self.slot_of(K::hash_key(key));
        let child = self.children[slot];
        if child.is_none() {
            return Ok(None);
        }
        match store.fetch(child, &NodeCodec::<K, V>::new())? {
            Node::Directory(dir) => dir.get(store, key),
            Node::Bucket(bucket) => Ok(bucket.take(key)),
        }
    }

    /// Inserts `(key, value)` below this directory, splitting an
    /// overflowing bucket into a fresh sub-directory when necessary.
    /// `recid` is this directory's own record-id, used to persist slot
    /// updates.
    pub(crate) fn put<K: KeyCodec, V: ValCodec>(
        &mut self,
        store: &mut RecordStore,
        recid: RecordId,
        key: K,
        value: V,
    ) -> Result<Option<V>> {
        let slot = self.slot_of(K::hash_key(&key));
        let child = self.children[slot];
        if child.is_none() {
            // First key for this slot: start a bucket one level down.
            let mut bucket = Bucket::new(self.depth + 1);
            let prior = bucket.add(key, value);
            let bucket_recid = store.insert(&bucket, &BucketCodec::<K, V>::new())?;
            self.children[slot] = bucket_recid;
            store.update(recid, self, &DirCodec)?;
            trace!(depth = self.depth, slot, "htree.bucket_created");
            return Ok(prior);
        }
        match store.fetch(child, &NodeCodec::<K, V>::new())? {
            Node::Directory(mut dir) => dir.put(store, child, key, value),
            Node::Bucket(mut bucket) => {
                debug_assert_eq!(bucket.depth(), self.depth + 1);
                if bucket.has_room() {
                    let prior = bucket.add(key, value);
                    store.update(child, &bucket, &BucketCodec::<K, V>::new())?;
                    return Ok(prior);
                }
                if self.depth == MAX_DEPTH {
                    return Err(PenumbraError::DepthOverflow(self.depth));
                }
                // Overflow: replace the bucket with a sub-directory and
                // re-route its entries through the next hash slice.
                let mut dir = Directory::new(self.depth + 1);
                let dir_recid = store.insert(&dir, &DirCodec)?;
                self.children[slot] = dir_recid;
                store.update(recid, self, &DirCodec)?;
                store.delete(child)?;
                debug!(depth = self.depth, slot, entries = bucket.len(), "htree.split");

                let (keys, values) = bucket.into_entries();
                for (migrated_key, migrated_value) in keys.into_iter().zip(values) {
                    dir.put(store, dir_recid, migrated_key, migrated_value)?;
                }
                dir.put(store, dir_recid, key, value)
            }
        }
    }

    /// Removes `key` below this directory, deleting emptied buckets and
    /// collapsing emptied sub-directories on the way out.
    pub(crate) fn remove<K: KeyCodec, V: ValCodec>(
        &mut self,
        store: &mut RecordStore,
        recid: RecordId,
        key: &K,
    ) -> Result<Option<V>> {
        let slot = self.slot_of(K::hash_key(key));
        let child = self.children[slot];
        if child.is_none() {
            return Ok(None);
        }
        match store.fetch(child, &NodeCodec::<K, V>::new())? {
            Node::Directory(mut dir) => {
                let existing = dir.remove(store, child, key)?;
                if existing.is_some() && dir.is_empty() {
                    store.delete(child)?;
                    self.children[slot] = RecordId::NONE;
                    store.update(recid, self, &DirCodec)?;
                    debug!(depth = self.depth, slot, "htree.collapse");
                }
                Ok(existing)
            }
            Node::Bucket(mut bucket) => {
                let existing = bucket.remove(key);
                if existing.is_some() {
                    if bucket.is_empty() {
                        store.delete(child)?;
                        self.children[slot] = RecordId::NONE;
                        store.update(recid, self, &DirCodec)?;
                        trace!(depth = self.depth, slot, "htree.bucket_deleted");
                    } else {
                        store.update(child, &bucket, &BucketCodec::<K, V>::new())?;
                    }
                }
                Ok(existing)
            }
        }
    }

    /// Deletes every child subtree and clears the slot table. The caller
    /// persists this directory afterwards.
    pub(crate) fn delete_children(&mut self, store: &mut RecordStore) -> Result<()> {
        for slot in 0..MAX_CHILDREN {
            let child = self.children[slot];
            if child.is_none() {
                continue;
            }
            delete_subtree(store, child)?;
            self.children[slot] = RecordId::NONE;
        }
        Ok(())
    }

    /// Copies this directory's children into `dst` under their original
    /// record-ids, byte for byte, recursing into sub-directories.
    pub(crate) fn defrag(&self, src: &mut RecordStore, dst: &mut RecordStore) -> Result<()> {
        for child in self.children.iter().filter(|child| !child.is_none()) {
            let data = src.fetch_raw(*child)?;
            dst.force_insert(*child, &data)?;
            match data.first() {
                Some(&TAG_DIRECTORY) => {
                    let dir = DirCodec.decode(&data)?;
                    dir.defrag(src, dst)?;
                }
                Some(&TAG_BUCKET) => {}
                _ => {
                    return Err(PenumbraError::Corruption(format!(
                        "record {child} is not a tree node"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Serializes the slot table sparsely: depth, first and last non-zero
    /// slot indices, then the record-ids of that window as varints.
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.depth);
        let first = self.children.iter().position(|child| !child.is_none());
        let Some(start) = first else {
            // All slots empty: the bounds byte wraps to zero and the
            // reader keys off end-of-input.
            out.push((MAX_CHILDREN & 0xFF) as u8);
            return;
        };
        out.push(start as u8);
        let end = self
            .children
            .iter()
            .rposition(|child| !child.is_none())
            .unwrap_or(start);
        out.push(end as u8);
        for child in &self.children[start..=end] {
            encode_u64(child.0, out);
        }
    }

    pub(crate) fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        let depth = reader.read_u8("directory depth truncated")?;
        if depth > MAX_DEPTH {
            return Err(PenumbraError::Corruption(format!(
                "directory depth {depth} out of range"
            )));
        }
        let mut dir = Directory::new(depth);
        let start = reader.read_u8("directory bounds truncated")? as usize;
        if reader.at_end() {
            return Ok(dir);
        }
        let end = reader.read_u8("directory bounds truncated")? as usize;
        if end < start {
            return Err(PenumbraError::Corruption(
                "directory slot bounds inverted".into(),
            ));
        }
        for slot in start..=end {
            dir.children[slot] = RecordId(reader.read_var_u64("directory child truncated")?);
        }
        Ok(dir)
    }
}

/// Deletes a node record and, for directories, everything below it.
pub(crate) fn delete_subtree(store: &mut RecordStore, recid: RecordId) -> Result<()> {
    let data = store.fetch_raw(recid)?;
    match data.first() {
        Some(&TAG_DIRECTORY) => {
            let dir = DirCodec.decode(&data)?;
            for child in dir.children.iter().filter(|child| !child.is_none()) {
                delete_subtree(store, *child)?;
            }
        }
        Some(&TAG_BUCKET) => {}
        _ => {
            return Err(PenumbraError::Corruption(format!(
                "record {recid} is not a tree node"
            )))
        }
    }
    store.delete(recid)
}
