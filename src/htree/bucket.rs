//! Leaf bucket: an unordered cluster of entries sharing a hash prefix.

use crate::bytes::{encode_u64, Reader};
use crate::error::{PenumbraError, Result};
use crate::htree::codecs::{KeyCodec, ValCodec};
use crate::htree::directory::MAX_DEPTH;

/// Entries a bucket holds before its parent directory splits it.
pub const BUCKET_CAPACITY: usize = 8;

/// Leaf node of the hash tree.
///
/// Keys and values are kept in parallel vectors; lookups are linear scans
/// by key equality. Buckets at `MAX_DEPTH + 1` sit below the deepest
/// directory and grow without bound, since hash collisions there have
/// nowhere left to split.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket<K, V> {
    depth: u8,
    keys: Vec<K>,
    values: Vec<V>,
}

impl<K: KeyCodec, V: ValCodec> Bucket<K, V> {
    pub(crate) fn new(depth: u8) -> Self {
        debug_assert!(depth >= 1 && depth <= MAX_DEPTH + 1);
        Self {
            depth,
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    pub(crate) fn depth(&self) -> u8 {
        self.depth
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether an insertion is allowed without splitting first.
    pub(crate) fn has_room(&self) -> bool {
        if self.depth == MAX_DEPTH + 1 {
            true
        } else {
            self.keys.len() < BUCKET_CAPACITY
        }
    }

    /// Equality lookup that consumes the bucket, moving out the value for
    /// `key` if present. Buckets are fetched fresh per operation, so the
    /// in-memory copy is free to give its entry away.
    pub(crate) fn take(mut self, key: &K) -> Option<V> {
        self.remove(key)
    }

    /// Inserts or replaces an entry, returning the prior value on replace.
    ///
    /// Capacity is not checked here; callers consult [`Bucket::has_room`]
    /// before adding, except at maximum depth.
    pub(crate) fn add(&mut self, key: K, value: V) -> Option<V> {
        match self.keys.iter().position(|k| *k == key) {
            Some(idx) => Some(std::mem::replace(&mut self.values[idx], value)),
            None => {
                self.keys.push(key);
                self.values.push(value);
                None
            }
        }
    }

    /// Removes an entry by equality, returning its value. Order is not
    /// preserved.
    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.keys.iter().position(|k| k == key)?;
        self.keys.swap_remove(idx);
        Some(self.values.swap_remove(idx))
    }

    /// Consumes the bucket into its entry lists, for split migration and
    /// cursor snapshots.
    pub(crate) fn into_entries(self) -> (Vec<K>, Vec<V>) {
        (self.keys, self.values)
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.depth);
        encode_u64(self.keys.len() as u64, out);
        let mut scratch = Vec::new();
        for (key, value) in self.keys.iter().zip(&self.values) {
            scratch.clear();
            K::encode_key(key, &mut scratch);
            encode_u64(scratch.len() as u64, out);
            out.extend_from_slice(&scratch);

            scratch.clear();
            V::encode_val(value, &mut scratch);
            encode_u64(scratch.len() as u64, out);
            out.extend_from_slice(&scratch);
        }
    }

    pub(crate) fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        let depth = reader.read_u8("bucket depth truncated")?;
        if depth < 1 || depth > MAX_DEPTH + 1 {
            return Err(PenumbraError::Corruption(format!(
                "bucket depth {depth} out of range"
            )));
        }
        let count = reader.read_var_u64("bucket entry count truncated")? as usize;
        let mut keys = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let key_len = reader.read_var_u64("bucket key length truncated")? as usize;
            let key_bytes = reader.take(key_len, "bucket key truncated")?;
            keys.push(K::decode_key(key_bytes)?);

            let val_len = reader.read_var_u64("bucket value length truncated")? as usize;
            let val_bytes = reader.take(val_len, "bucket value truncated")?;
            values.push(V::decode_val(val_bytes)?);
        }
        Ok(Self {
            depth,
            keys,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replace_returns_prior() {
        let mut bucket = Bucket::<u64, u64>::new(1);
        assert_eq!(bucket.add(1, 10), None);
        assert_eq!(bucket.add(1, 20), Some(10));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.take(&1), Some(20));
    }

    #[test]
    fn remove_returns_prior() {
        let mut bucket = Bucket::<u64, u64>::new(1);
        bucket.add(1, 10);
        bucket.add(2, 20);
        assert_eq!(bucket.remove(&1), Some(10));
        assert_eq!(bucket.remove(&1), None);
        assert_eq!(bucket.remove(&2), Some(20));
        assert!(bucket.is_empty());
    }

    #[test]
    fn has_room_respects_capacity() {
        let mut bucket = Bucket::<u64, u64>::new(1);
        for i in 0..BUCKET_CAPACITY as u64 {
            assert!(bucket.has_room());
            bucket.add(i, i);
        }
        assert!(!bucket.has_room());
    }

    #[test]
    fn max_depth_bucket_always_has_room() {
        let mut bucket = Bucket::<u64, u64>::new(MAX_DEPTH + 1);
        for i in 0..(BUCKET_CAPACITY as u64 * 4) {
            assert!(bucket.has_room());
            bucket.add(i, i);
        }
        assert!(bucket.has_room());
    }

    #[test]
    fn serialization_roundtrip() -> Result<()> {
        let mut bucket = Bucket::<String, Vec<u8>>::new(2);
        bucket.add("alpha".into(), vec![1, 2, 3]);
        bucket.add("beta".into(), Vec::new());
        bucket.add(String::new(), vec![9]);

        let mut buf = Vec::new();
        bucket.write_to(&mut buf);
        let mut reader = Reader::new(&buf);
        let decoded = Bucket::<String, Vec<u8>>::read_from(&mut reader)?;
        reader.ensure_consumed()?;
        assert_eq!(decoded, bucket);
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_depth() {
        let buf = [0u8, 0u8];
        let mut reader = Reader::new(&buf);
        assert!(Bucket::<u64, u64>::read_from(&mut reader).is_err());
    }
}
