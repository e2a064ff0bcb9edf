//! Meta-page layout for the record store.
//!
//! Page 0 of every store file holds the meta page: magic, format version,
//! page size, allocation heads, and the named root slots.

use crate::error::{PenumbraError, Result};
use crate::pager::PageId;
use crate::store::RecordId;

pub const STORE_MAGIC: [u8; 4] = *b"PNBR";
pub const STORE_FORMAT_VERSION: u16 = 1;

/// Number of named root slots kept in the meta page.
pub const ROOT_SLOTS: usize = 16;

const MAGIC_END: usize = 4;
const VERSION_END: usize = 6;
const RESERVED_END: usize = 8;
const PAGE_SIZE_END: usize = 12;
const NEXT_RECID_END: usize = 20;
const TABLE_HEAD_END: usize = 28;
const FREE_HEAD_END: usize = 36;
const FREE_COUNT_END: usize = 44;

pub const META_LEN: usize = FREE_COUNT_END + ROOT_SLOTS * 8;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Meta {
    pub page_size: u32,
    pub next_recid: u64,
    pub table_head: PageId,
    pub free_head: PageId,
    pub free_count: u64,
    pub roots: [RecordId; ROOT_SLOTS],
}

impl Meta {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            next_recid: 1,
            table_head: PageId(0),
            free_head: PageId(0),
            free_count: 0,
            roots: [RecordId(0); ROOT_SLOTS],
        }
    }

    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < META_LEN {
            return Err(PenumbraError::InvalidArgument(
                "meta page buffer too small".into(),
            ));
        }
        dst[..MAGIC_END].copy_from_slice(&STORE_MAGIC);
        dst[MAGIC_END..VERSION_END].copy_from_slice(&STORE_FORMAT_VERSION.to_be_bytes());
        dst[VERSION_END..RESERVED_END].fill(0);
        dst[RESERVED_END..PAGE_SIZE_END].copy_from_slice(&self.page_size.to_be_bytes());
        dst[PAGE_SIZE_END..NEXT_RECID_END].copy_from_slice(&self.next_recid.to_be_bytes());
        dst[NEXT_RECID_END..TABLE_HEAD_END].copy_from_slice(&self.table_head.0.to_be_bytes());
        dst[TABLE_HEAD_END..FREE_HEAD_END].copy_from_slice(&self.free_head.0.to_be_bytes());
        dst[FREE_HEAD_END..FREE_COUNT_END].copy_from_slice(&self.free_count.to_be_bytes());
        for (idx, root) in self.roots.iter().enumerate() {
            let off = FREE_COUNT_END + idx * 8;
            dst[off..off + 8].copy_from_slice(&root.0.to_be_bytes());
        }
        Ok(())
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < META_LEN {
            return Err(PenumbraError::Corruption("meta page truncated".into()));
        }
        if src[..MAGIC_END] != STORE_MAGIC {
            return Err(PenumbraError::Corruption("invalid store magic".into()));
        }
        let version = u16::from_be_bytes(read_array(src, MAGIC_END)?);
        if version != STORE_FORMAT_VERSION {
            return Err(PenumbraError::Corruption(format!(
                "unsupported store format version {version}"
            )));
        }
        if src[VERSION_END..RESERVED_END] != [0, 0] {
            return Err(PenumbraError::Corruption(
                "meta page reserved bytes not zero".into(),
            ));
        }
        let page_size = u32::from_be_bytes(read_array(src, RESERVED_END)?);
        let next_recid = u64::from_be_bytes(read_array(src, PAGE_SIZE_END)?);
        let table_head = PageId(u64::from_be_bytes(read_array(src, NEXT_RECID_END)?));
        let free_head = PageId(u64::from_be_bytes(read_array(src, TABLE_HEAD_END)?));
        let free_count = u64::from_be_bytes(read_array(src, FREE_HEAD_END)?);
        if next_recid == 0 {
            return Err(PenumbraError::Corruption(
                "meta page next record id is zero".into(),
            ));
        }
        let mut roots = [RecordId(0); ROOT_SLOTS];
        for (idx, root) in roots.iter_mut().enumerate() {
            let off = FREE_COUNT_END + idx * 8;
            *root = RecordId(u64::from_be_bytes(read_array(src, off)?));
        }
        Ok(Self {
            page_size,
            next_recid,
            table_head,
            free_head,
            free_count,
            roots,
        })
    }
}

fn read_array<const N: usize>(src: &[u8], off: usize) -> Result<[u8; N]> {
    src.get(off..off + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| PenumbraError::Corruption("meta page field truncated".into()))
}
