//! The polymorphic tree node and its tagged wire format.
//!
//! A directory slot references either a sub-directory or a bucket; the two
//! share one byte stream and are discriminated by a leading tag byte. The
//! codec family below writes that format from whichever side it holds
//! (`DirCodec` and `BucketCodec` for updates of a node the caller owns,
//! `NodeCodec` for fetches where the variant is only known after the tag).

use std::marker::PhantomData;

use crate::bytes::Reader;
use crate::error::{PenumbraError, Result};
use crate::htree::bucket::Bucket;
use crate::htree::codecs::{KeyCodec, ValCodec};
use crate::htree::directory::Directory;
use crate::store::Codec;

pub(crate) const TAG_DIRECTORY: u8 = 0x01;
pub(crate) const TAG_BUCKET: u8 = 0x02;
pub(crate) const TAG_TREE: u8 = 0x03;

/// A fetched child: directory page or leaf bucket.
#[derive(Clone, Debug)]
pub(crate) enum Node<K, V> {
    Directory(Directory),
    Bucket(Bucket<K, V>),
}

/// Decodes either node variant by its tag byte.
pub(crate) struct NodeCodec<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> NodeCodec<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K: KeyCodec, V: ValCodec> Codec for NodeCodec<K, V> {
    type Item = Node<K, V>;

    fn encode(&self, node: &Node<K, V>, out: &mut Vec<u8>) -> Result<()> {
        match node {
            Node::Directory(dir) => {
                out.push(TAG_DIRECTORY);
                dir.write_to(out);
            }
            Node::Bucket(bucket) => {
                out.push(TAG_BUCKET);
                bucket.write_to(out);
            }
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Node<K, V>> {
        let mut reader = Reader::new(bytes);
        let node = match reader.read_u8("node tag truncated")? {
            TAG_DIRECTORY => Node::Directory(Directory::read_from(&mut reader)?),
            TAG_BUCKET => Node::Bucket(Bucket::read_from(&mut reader)?),
            other => {
                return Err(PenumbraError::Corruption(format!(
                    "unknown node tag: 0x{other:02X}"
                )))
            }
        };
        reader.ensure_consumed()?;
        Ok(node)
    }
}

/// Writes and reads directories on the shared node wire format.
pub(crate) struct DirCodec;

impl Codec for DirCodec {
    type Item = Directory;

    fn encode(&self, dir: &Directory, out: &mut Vec<u8>) -> Result<()> {
        out.push(TAG_DIRECTORY);
        dir.write_to(out);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Directory> {
        let mut reader = Reader::new(bytes);
        let tag = reader.read_u8("node tag truncated")?;
        if tag != TAG_DIRECTORY {
            return Err(PenumbraError::Corruption(format!(
                "expected directory node, found tag 0x{tag:02X}"
            )));
        }
        let dir = Directory::read_from(&mut reader)?;
        reader.ensure_consumed()?;
        Ok(dir)
    }
}

/// Writes and reads buckets on the shared node wire format.
pub(crate) struct BucketCodec<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BucketCodec<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K: KeyCodec, V: ValCodec> Codec for BucketCodec<K, V> {
    type Item = Bucket<K, V>;

    fn encode(&self, bucket: &Bucket<K, V>, out: &mut Vec<u8>) -> Result<()> {
        out.push(TAG_BUCKET);
        bucket.write_to(out);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bucket<K, V>> {
        let mut reader = Reader::new(bytes);
        let tag = reader.read_u8("node tag truncated")?;
        if tag != TAG_BUCKET {
            return Err(PenumbraError::Corruption(format!(
                "expected bucket node, found tag 0x{tag:02X}"
            )));
        }
        let bucket = Bucket::read_from(&mut reader)?;
        reader.ensure_consumed()?;
        Ok(bucket)
    }
}

/// Depth and entry count read off a raw bucket record without decoding
/// its entries. Lets walkers that know no key/value types check the
/// structural invariants.
pub(crate) fn bucket_summary(bytes: &[u8]) -> Result<(u8, u64)> {
    let mut reader = Reader::new(bytes);
    let tag = reader.read_u8("node tag truncated")?;
    if tag != TAG_BUCKET {
        return Err(PenumbraError::Corruption(format!(
            "expected bucket node, found tag 0x{tag:02X}"
        )));
    }
    let depth = reader.read_u8("bucket depth truncated")?;
    let count = reader.read_var_u64("bucket entry count truncated")?;
    Ok((depth, count))
}
