//! Fail-fast depth-first traversal cursors.
//!
//! A cursor re-materializes its ancestry in an explicit frame stack:
//! directories carry no parent pointers, so the serialized tree stays
//! self-contained. The modification counter snapshotted at construction is
//! compared against the tree on every `next` and `remove`; any mutation
//! through the handle invalidates every live cursor.
//!
//! Removing through a cursor may collapse the bucket being walked. The
//! cursor does not re-anchor afterwards: a subsequent `next` is safe but
//! may skip entries that were re-homed by the collapse.

use smallvec::SmallVec;

use crate::error::{PenumbraError, Result};
use crate::htree::codecs::{KeyCodec, ValCodec};
use crate::htree::directory::{Directory, MAX_CHILDREN};
use crate::htree::node::{DirCodec, Node, NodeCodec};
use crate::htree::tree::HTree;
use crate::store::RecordStore;

struct Frame {
    dir: Directory,
    child: usize,
}

/// Shared walker behind [`Keys`] and [`Values`]. Yields full entries and
/// remembers the key of the last one for removal.
pub(crate) struct RawCursor<K, V> {
    stack: SmallVec<[Frame; 4]>,
    dir: Directory,
    /// Next slot to examine in `dir`.
    child: usize,
    /// Snapshot of the bucket currently being drained.
    entries: std::vec::IntoIter<(K, V)>,
    /// One-entry lookahead; `None` signals exhaustion.
    next: Option<(K, V)>,
    last_key: Option<K>,
    /// Modification counter observed at construction.
    expected: u64,
}

impl<K: KeyCodec + Clone, V: ValCodec> RawCursor<K, V> {
    pub(crate) fn new(tree: &HTree<K, V>, store: &mut RecordStore) -> Result<Self> {
        let root = store.fetch(tree.root(), &DirCodec)?;
        let mut cursor = Self {
            stack: SmallVec::new(),
            dir: root,
            child: 0,
            entries: Vec::new().into_iter(),
            next: None,
            last_key: None,
            expected: tree.mod_count(),
        };
        cursor.next = cursor.advance(store)?;
        Ok(cursor)
    }

    fn next_entry(
        &mut self,
        tree: &HTree<K, V>,
        store: &mut RecordStore,
    ) -> Result<Option<(K, V)>> {
        if tree.mod_count() != self.expected {
            return Err(PenumbraError::ConcurrentModification);
        }
        match self.next.take() {
            None => Ok(None),
            Some((key, value)) => {
                self.last_key = Some(key.clone());
                self.next = self.advance(store)?;
                Ok(Some((key, value)))
            }
        }
    }

    fn remove_current(&mut self, tree: &mut HTree<K, V>, store: &mut RecordStore) -> Result<()> {
        if tree.mod_count() != self.expected {
            return Err(PenumbraError::ConcurrentModification);
        }
        let key = self.last_key.take().ok_or(PenumbraError::NoCurrentEntry)?;
        tree.remove(store, &key)?;
        // Resynchronize so this cursor survives its own removal.
        self.expected = tree.mod_count();
        Ok(())
    }

    /// Pulls the next entry from the current bucket, walking the directory
    /// tree to the next non-empty bucket when it runs dry.
    fn advance(&mut self, store: &mut RecordStore) -> Result<Option<(K, V)>> {
        loop {
            if let Some(entry) = self.entries.next() {
                return Ok(Some(entry));
            }
            loop {
                if self.child >= MAX_CHILDREN {
                    match self.stack.pop() {
                        Some(frame) => {
                            self.dir = frame.dir;
                            self.child = frame.child;
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                let slot = self.child;
                self.child += 1;
                let child = self.dir.child_at(slot);
                if child.is_none() {
                    continue;
                }
                match store.fetch(child, &NodeCodec::<K, V>::new())? {
                    Node::Directory(dir) => {
                        let parent = std::mem::replace(&mut self.dir, dir);
                        self.stack.push(Frame {
                            dir: parent,
                            child: self.child,
                        });
                        self.child = 0;
                    }
                    Node::Bucket(bucket) => {
                        let (keys, values) = bucket.into_entries();
                        let entries: Vec<(K, V)> = keys.into_iter().zip(values).collect();
                        self.entries = entries.into_iter();
                        break;
                    }
                }
            }
        }
    }
}

/// Cursor yielding the tree's keys in depth-first slot order.
pub struct Keys<K, V>(RawCursor<K, V>);

impl<K: KeyCodec + Clone, V: ValCodec> Keys<K, V> {
    pub(crate) fn new(raw: RawCursor<K, V>) -> Self {
        Self(raw)
    }

    /// Advances the cursor. `Ok(None)` signals exhaustion.
    pub fn next(&mut self, tree: &HTree<K, V>, store: &mut RecordStore) -> Result<Option<K>> {
        Ok(self.0.next_entry(tree, store)?.map(|(key, _)| key))
    }

    /// Removes the entry last returned by [`Keys::next`] from the tree.
    pub fn remove(&mut self, tree: &mut HTree<K, V>, store: &mut RecordStore) -> Result<()> {
        self.0.remove_current(tree, store)
    }
}

/// Cursor yielding the tree's values in depth-first slot order.
pub struct Values<K, V>(RawCursor<K, V>);

impl<K: KeyCodec + Clone, V: ValCodec> Values<K, V> {
    pub(crate) fn new(raw: RawCursor<K, V>) -> Self {
        Self(raw)
    }

    /// Advances the cursor. `Ok(None)` signals exhaustion.
    pub fn next(&mut self, tree: &HTree<K, V>, store: &mut RecordStore) -> Result<Option<V>> {
        Ok(self.0.next_entry(tree, store)?.map(|(_, value)| value))
    }

    /// Removes the entry whose value was last returned by
    /// [`Values::next`] from the tree.
    pub fn remove(&mut self, tree: &mut HTree<K, V>, store: &mut RecordStore) -> Result<()> {
        self.0.remove_current(tree, store)
    }
}
