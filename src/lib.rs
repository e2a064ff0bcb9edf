#![forbid(unsafe_code)]

//! penumbra - an embedded record manager with a persistent extendible
//! hash-tree index.
//!
//! The record store maps opaque 64-bit record-ids to byte payloads stored
//! in chains of fixed-size pages behind an LRU page cache. On top of it,
//! [`HTree`] provides a disk-backed associative map: a tree of 256-way
//! directory pages routed by 8-bit slices of a 32-bit key hash, with
//! leaf buckets holding the entries and fail-fast traversal cursors.

pub mod bytes;
pub mod error;
pub mod htree;
pub mod pager;
pub mod store;

pub use crate::error::{PenumbraError, Result};
pub use crate::htree::{HSet, HTree, KeyCodec, ValCodec};
pub use crate::store::{RecordId, RecordStore, StoreOptions};
