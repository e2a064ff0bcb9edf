//! Set-over-map wrapper.

use crate::error::Result;
use crate::htree::codecs::KeyCodec;
use crate::htree::cursor::Keys;
use crate::htree::tree::HTree;
use crate::store::{RecordId, RecordStore};

/// Persistent hash set, implemented as an [`HTree`] from elements to the
/// unit value.
pub struct HSet<E> {
    tree: HTree<E, ()>,
}

impl<E: KeyCodec> HSet<E> {
    pub fn create(store: &mut RecordStore) -> Result<Self> {
        Ok(Self {
            tree: HTree::create(store)?,
        })
    }

    pub fn load(store: &mut RecordStore, recid: RecordId) -> Result<Self> {
        Ok(Self {
            tree: HTree::load(store, recid)?,
        })
    }

    /// Record-id of the underlying tree header; pass to [`HSet::load`].
    pub fn recid(&self) -> RecordId {
        self.tree.recid()
    }

    /// Adds `element`, returning true when it was not already present.
    pub fn insert(&mut self, store: &mut RecordStore, element: E) -> Result<bool> {
        Ok(self.tree.put(store, element, ())?.is_none())
    }

    pub fn contains(&self, store: &mut RecordStore, element: &E) -> Result<bool> {
        Ok(self.tree.get(store, element)?.is_some())
    }

    /// Removes `element`, returning true when it was present.
    pub fn remove(&mut self, store: &mut RecordStore, element: &E) -> Result<bool> {
        Ok(self.tree.remove(store, element)?.is_some())
    }

    /// Fail-fast cursor over the elements.
    pub fn iter(&self, store: &mut RecordStore) -> Result<Keys<E, ()>>
    where
        E: Clone,
    {
        self.tree.keys(store)
    }

    /// The tree handle backing this set, for cursor calls.
    pub fn as_tree(&self) -> &HTree<E, ()> {
        &self.tree
    }

    /// Mutable tree handle, for cursor removal.
    pub fn as_tree_mut(&mut self) -> &mut HTree<E, ()> {
        &mut self.tree
    }

    pub fn len(&self, store: &mut RecordStore) -> Result<u64> {
        self.tree.len(store)
    }

    pub fn is_empty(&self, store: &mut RecordStore) -> Result<bool> {
        self.tree.is_empty(store)
    }

    pub fn clear(&mut self, store: &mut RecordStore) -> Result<()> {
        self.tree.clear(store)
    }
}
