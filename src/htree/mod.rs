#![forbid(unsafe_code)]

//! Persistent extendible hash-tree index.
//!
//! A disk-backed map from keys to values, stored as a tree of 256-way
//! directory pages whose leaves are buckets of entries. Directories route
//! by 8-bit slices of a 32-bit key hash; buckets overflow into fresh
//! sub-directories one level down, and emptied subtrees collapse eagerly
//! on removal.

mod bucket;
/// Key and value codec traits plus the stock implementations.
pub mod codecs;
mod cursor;
mod directory;
mod node;
mod set;
/// Raw-level walkers for statistics and verification.
pub mod stats;
mod tree;

pub use bucket::BUCKET_CAPACITY;
pub use codecs::{KeyCodec, ValCodec};
pub use cursor::{Keys, Values};
pub use directory::{BIT_SIZE, MAX_CHILDREN, MAX_DEPTH};
pub use set::HSet;
pub use tree::{defrag, HTree};

#[cfg(test)]
mod tests;
