//! Record store: logical 64-bit record-ids over chained data pages.
//!
//! Records are byte payloads addressed by an opaque [`RecordId`] (`0` is
//! reserved as "no record"). Each record lives in a chain of data pages;
//! a translation table maps record-id to the head of its chain, and freed
//! pages are recycled through a persistent free list. Payloads carry a
//! CRC32 checked on every fetch.
//!
//! The store is single-writer: all operations take `&mut self` and run on
//! the caller's thread. Durability is established by [`RecordStore::flush`].

mod meta;

use std::path::Path;

use tracing::trace;

use crate::error::{PenumbraError, Result};
use crate::pager::{PageId, Pager, DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE};

pub use meta::{Meta, META_LEN, ROOT_SLOTS, STORE_FORMAT_VERSION, STORE_MAGIC};

/// Opaque identifier of a persisted record. `0` means "no record".
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecordId(pub u64);

impl RecordId {
    pub const NONE: RecordId = RecordId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encoder/decoder pair used to persist typed records.
pub trait Codec {
    type Item;

    fn encode(&self, item: &Self::Item, out: &mut Vec<u8>) -> Result<()>;
    fn decode(&self, bytes: &[u8]) -> Result<Self::Item>;
}

#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    pub page_size: usize,
    pub cache_pages: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
        }
    }
}

/// Point-in-time counters reported by [`RecordStore::stats`].
#[derive(Clone, Copy, Debug)]
pub struct StoreStats {
    pub page_size: usize,
    pub page_count: u64,
    pub free_pages: u64,
    pub table_pages: usize,
    pub next_recid: u64,
}

const DATA_HEADER_LEN: usize = 16;
const TABLE_HEADER_LEN: usize = 16;
const TABLE_ENTRY_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct TableEntry {
    start: PageId,
    len: u32,
    checksum: u32,
}

pub struct RecordStore {
    pager: Pager,
    meta: Meta,
    /// Translation-table page chain, cached in order.
    table_pages: Vec<PageId>,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_options(path, StoreOptions::default())
    }

    pub fn open_with_options(path: &Path, options: StoreOptions) -> Result<Self> {
        let page_size = probe_page_size(path)?.unwrap_or(options.page_size);
        let mut pager = Pager::open(path, page_size, options.cache_pages)?;
        let meta = if pager.page_count() == 0 {
            let meta_page = pager.allocate_page()?;
            if meta_page.0 != 0 {
                return Err(PenumbraError::Corruption(
                    "fresh store did not allocate page 0 first".into(),
                ));
            }
            let meta = Meta::new(page_size as u32);
            pager.with_page_mut(meta_page, |data| meta.encode(data))?;
            meta
        } else {
            let meta = pager.with_page(PageId(0), |data| Meta::decode(data))?;
            if meta.page_size as usize != page_size {
                return Err(PenumbraError::Corruption(
                    "meta page size disagrees with file".into(),
                ));
            }
            meta
        };
        let mut store = Self {
            pager,
            meta,
            table_pages: Vec::new(),
        };
        store.load_table_chain()?;
        Ok(store)
    }

    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            page_size: self.pager.page_size(),
            page_count: self.pager.page_count(),
            free_pages: self.meta.free_count,
            table_pages: self.table_pages.len(),
            next_recid: self.meta.next_recid,
        }
    }

    /// Allocates a fresh record holding the encoded `item`.
    pub fn insert<C: Codec>(&mut self, item: &C::Item, codec: &C) -> Result<RecordId> {
        let mut buf = Vec::new();
        codec.encode(item, &mut buf)?;
        self.insert_raw(&buf)
    }

    /// Re-encodes `item` over an existing record.
    pub fn update<C: Codec>(&mut self, recid: RecordId, item: &C::Item, codec: &C) -> Result<()> {
        let mut buf = Vec::new();
        codec.encode(item, &mut buf)?;
        self.update_raw(recid, &buf)
    }

    /// Reads and decodes a record.
    pub fn fetch<C: Codec>(&mut self, recid: RecordId, codec: &C) -> Result<C::Item> {
        let bytes = self.fetch_raw(recid)?;
        codec.decode(&bytes)
    }

    /// Reads the raw payload bytes of a record.
    pub fn fetch_raw(&mut self, recid: RecordId) -> Result<Vec<u8>> {
        let entry = self
            .read_entry(recid)?
            .ok_or(PenumbraError::NotFound("record"))?;
        let bytes = self.read_chain(entry.start, entry.len)?;
        if payload_checksum(&bytes) != entry.checksum {
            return Err(PenumbraError::Corruption(format!(
                "record {recid} checksum mismatch"
            )));
        }
        Ok(bytes)
    }

    /// Writes raw bytes under a caller-chosen record-id.
    ///
    /// Used by defragmentation to rebuild a store while preserving
    /// record-ids; the id must not be live in this store.
    pub fn force_insert(&mut self, recid: RecordId, bytes: &[u8]) -> Result<()> {
        if recid.is_none() {
            return Err(PenumbraError::InvalidArgument(
                "record id 0 is reserved".into(),
            ));
        }
        self.ensure_table_for(recid)?;
        if self.read_entry(recid)?.is_some() {
            return Err(PenumbraError::InvalidArgument(format!(
                "record id {recid} already in use"
            )));
        }
        let start = self.write_chain(bytes)?;
        self.write_entry(
            recid,
            Some(TableEntry {
                start,
                len: bytes.len() as u32,
                checksum: payload_checksum(bytes),
            }),
        )?;
        if recid.0 >= self.meta.next_recid {
            self.meta.next_recid = recid.0 + 1;
        }
        self.store_meta()?;
        trace!(recid = recid.0, len = bytes.len(), "store.force_insert");
        Ok(())
    }

    /// Frees a record and recycles its pages.
    pub fn delete(&mut self, recid: RecordId) -> Result<()> {
        let entry = self
            .read_entry(recid)?
            .ok_or(PenumbraError::NotFound("record"))?;
        self.free_chain(entry.start, entry.len)?;
        self.write_entry(recid, None)?;
        self.store_meta()?;
        trace!(recid = recid.0, "store.delete");
        Ok(())
    }

    /// Reads a named root slot.
    pub fn get_root(&self, slot: usize) -> Result<RecordId> {
        if slot >= ROOT_SLOTS {
            return Err(PenumbraError::InvalidArgument(format!(
                "root slot {slot} out of range"
            )));
        }
        Ok(self.meta.roots[slot])
    }

    /// Updates a named root slot.
    pub fn set_root(&mut self, slot: usize, recid: RecordId) -> Result<()> {
        if slot >= ROOT_SLOTS {
            return Err(PenumbraError::InvalidArgument(format!(
                "root slot {slot} out of range"
            )));
        }
        self.meta.roots[slot] = recid;
        self.store_meta()
    }

    /// Writes all pending state back and syncs the file.
    pub fn flush(&mut self) -> Result<()> {
        self.store_meta()?;
        self.pager.flush()
    }

    fn insert_raw(&mut self, bytes: &[u8]) -> Result<RecordId> {
        if bytes.len() > u32::MAX as usize {
            return Err(PenumbraError::InvalidArgument(
                "record larger than 4GB not supported".into(),
            ));
        }
        let recid = RecordId(self.meta.next_recid);
        self.meta.next_recid += 1;
        self.ensure_table_for(recid)?;
        let start = self.write_chain(bytes)?;
        self.write_entry(
            recid,
            Some(TableEntry {
                start,
                len: bytes.len() as u32,
                checksum: payload_checksum(bytes),
            }),
        )?;
        self.store_meta()?;
        trace!(recid = recid.0, len = bytes.len(), "store.insert");
        Ok(recid)
    }

    fn update_raw(&mut self, recid: RecordId, bytes: &[u8]) -> Result<()> {
        if bytes.len() > u32::MAX as usize {
            return Err(PenumbraError::InvalidArgument(
                "record larger than 4GB not supported".into(),
            ));
        }
        let entry = self
            .read_entry(recid)?
            .ok_or(PenumbraError::NotFound("record"))?;
        let existing = self.collect_chain(entry.start, entry.len)?;
        let needed = self.chain_pages_for(bytes.len());
        let start = if needed <= existing.len() {
            // Rewrite in place, then return surplus pages.
            self.write_chain_into(&existing[..needed], bytes)?;
            for &page in &existing[needed..] {
                self.free_page(page)?;
            }
            existing[0]
        } else {
            let start = self.write_chain(bytes)?;
            for &page in &existing {
                self.free_page(page)?;
            }
            start
        };
        self.write_entry(
            recid,
            Some(TableEntry {
                start,
                len: bytes.len() as u32,
                checksum: payload_checksum(bytes),
            }),
        )?;
        self.store_meta()?;
        trace!(recid = recid.0, len = bytes.len(), "store.update");
        Ok(())
    }

    fn store_meta(&mut self) -> Result<()> {
        let meta = self.meta.clone();
        self.pager
            .with_page_mut(PageId(0), |data| meta.encode(data))
    }

    fn load_table_chain(&mut self) -> Result<()> {
        self.table_pages.clear();
        let mut current = self.meta.table_head;
        while !is_null(current) {
            self.table_pages.push(current);
            if self.table_pages.len() as u64 > self.pager.page_count() {
                return Err(PenumbraError::Corruption(
                    "translation table chain forms a cycle".into(),
                ));
            }
            current = self
                .pager
                .with_page(current, |data| Ok(PageId(read_u64(data, 0))))?;
        }
        Ok(())
    }

    fn data_capacity(&self) -> usize {
        self.pager.page_size() - DATA_HEADER_LEN
    }

    fn entries_per_table_page(&self) -> usize {
        (self.pager.page_size() - TABLE_HEADER_LEN) / TABLE_ENTRY_LEN
    }

    fn chain_pages_for(&self, len: usize) -> usize {
        let capacity = self.data_capacity();
        ((len + capacity - 1) / capacity).max(1)
    }

    fn entry_position(&self, recid: RecordId) -> Result<(usize, usize)> {
        if recid.is_none() {
            return Err(PenumbraError::InvalidArgument(
                "record id 0 is reserved".into(),
            ));
        }
        let index = (recid.0 - 1) as usize;
        let per_page = self.entries_per_table_page();
        let offset = TABLE_HEADER_LEN + (index % per_page) * TABLE_ENTRY_LEN;
        Ok((index / per_page, offset))
    }

    fn ensure_table_for(&mut self, recid: RecordId) -> Result<()> {
        let (page_idx, _) = self.entry_position(recid)?;
        while self.table_pages.len() <= page_idx {
            let page = self.alloc_page()?;
            match self.table_pages.last().copied() {
                Some(last) => {
                    self.pager.with_page_mut(last, |data| {
                        data[0..8].copy_from_slice(&page.0.to_be_bytes());
                        Ok(())
                    })?;
                }
                None => self.meta.table_head = page,
            }
            self.table_pages.push(page);
        }
        Ok(())
    }

    fn read_entry(&mut self, recid: RecordId) -> Result<Option<TableEntry>> {
        let (page_idx, offset) = self.entry_position(recid)?;
        let Some(&page) = self.table_pages.get(page_idx) else {
            return Ok(None);
        };
        self.pager.with_page(page, |data| {
            let start = PageId(read_u64(data, offset));
            if is_null(start) {
                return Ok(None);
            }
            let len = read_u32(data, offset + 8);
            let checksum = read_u32(data, offset + 12);
            Ok(Some(TableEntry {
                start,
                len,
                checksum,
            }))
        })
    }

    fn write_entry(&mut self, recid: RecordId, entry: Option<TableEntry>) -> Result<()> {
        let (page_idx, offset) = self.entry_position(recid)?;
        let &page = self
            .table_pages
            .get(page_idx)
            .ok_or(PenumbraError::NotFound("translation table page"))?;
        self.pager.with_page_mut(page, |data| {
            match entry {
                Some(entry) => {
                    data[offset..offset + 8].copy_from_slice(&entry.start.0.to_be_bytes());
                    data[offset + 8..offset + 12].copy_from_slice(&entry.len.to_be_bytes());
                    data[offset + 12..offset + 16].copy_from_slice(&entry.checksum.to_be_bytes());
                }
                None => data[offset..offset + TABLE_ENTRY_LEN].fill(0),
            }
            Ok(())
        })
    }

    fn alloc_page(&mut self) -> Result<PageId> {
        if is_null(self.meta.free_head) {
            return self.pager.allocate_page();
        }
        let page = self.meta.free_head;
        let next = self
            .pager
            .with_page(page, |data| Ok(PageId(read_u64(data, 0))))?;
        self.meta.free_head = next;
        self.meta.free_count -= 1;
        self.pager.with_page_mut(page, |data| {
            data.fill(0);
            Ok(())
        })?;
        trace!(page = page.0, "store.page_reuse");
        Ok(page)
    }

    fn free_page(&mut self, page: PageId) -> Result<()> {
        let head = self.meta.free_head;
        self.pager.with_page_mut(page, |data| {
            data.fill(0);
            data[0..8].copy_from_slice(&head.0.to_be_bytes());
            Ok(())
        })?;
        self.meta.free_head = page;
        self.meta.free_count += 1;
        Ok(())
    }

    fn write_chain(&mut self, bytes: &[u8]) -> Result<PageId> {
        let count = self.chain_pages_for(bytes.len());
        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            pages.push(self.alloc_page()?);
        }
        self.write_chain_into(&pages, bytes)?;
        Ok(pages[0])
    }

    fn write_chain_into(&mut self, pages: &[PageId], bytes: &[u8]) -> Result<()> {
        let capacity = self.data_capacity();
        for (idx, &page) in pages.iter().enumerate() {
            let next = pages.get(idx + 1).copied().unwrap_or(PageId(0));
            let offset = idx * capacity;
            let chunk = &bytes[offset.min(bytes.len())..bytes.len().min(offset + capacity)];
            self.pager.with_page_mut(page, |data| {
                data.fill(0);
                data[0..8].copy_from_slice(&next.0.to_be_bytes());
                data[8..12].copy_from_slice(&(chunk.len() as u32).to_be_bytes());
                data[DATA_HEADER_LEN..DATA_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
                Ok(())
            })?;
        }
        Ok(())
    }

    fn collect_chain(&mut self, start: PageId, len: u32) -> Result<Vec<PageId>> {
        let expected = self.chain_pages_for(len as usize);
        let mut pages = Vec::with_capacity(expected);
        let mut current = start;
        for _ in 0..expected {
            if is_null(current) {
                return Err(PenumbraError::Corruption(
                    "record chain terminated early".into(),
                ));
            }
            pages.push(current);
            current = self
                .pager
                .with_page(current, |data| Ok(PageId(read_u64(data, 0))))?;
        }
        if !is_null(current) {
            return Err(PenumbraError::Corruption(
                "record chain longer than expected".into(),
            ));
        }
        Ok(pages)
    }

    fn read_chain(&mut self, start: PageId, len: u32) -> Result<Vec<u8>> {
        let capacity = self.data_capacity();
        let expected = self.chain_pages_for(len as usize);
        let mut dst = Vec::with_capacity(len as usize);
        let mut current = start;
        let mut remaining = len as usize;
        for _ in 0..expected {
            if is_null(current) {
                return Err(PenumbraError::Corruption(
                    "record chain terminated early".into(),
                ));
            }
            current = self.pager.with_page(current, |data| {
                let next = PageId(read_u64(data, 0));
                let used = read_u32(data, 8) as usize;
                if used > capacity {
                    return Err(PenumbraError::Corruption(
                        "record page used bytes exceed capacity".into(),
                    ));
                }
                if used > remaining {
                    return Err(PenumbraError::Corruption(
                        "record chain exceeds reported length".into(),
                    ));
                }
                dst.extend_from_slice(&data[DATA_HEADER_LEN..DATA_HEADER_LEN + used]);
                Ok(next)
            })?;
            remaining = len as usize - dst.len();
        }
        if !is_null(current) {
            return Err(PenumbraError::Corruption(
                "record chain longer than expected".into(),
            ));
        }
        if remaining != 0 {
            return Err(PenumbraError::Corruption(
                "record chain shorter than reported length".into(),
            ));
        }
        Ok(dst)
    }

    fn free_chain(&mut self, start: PageId, len: u32) -> Result<()> {
        let pages = self.collect_chain(start, len)?;
        for page in pages {
            self.free_page(page)?;
        }
        Ok(())
    }
}

fn payload_checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn is_null(page: PageId) -> bool {
    page.0 == 0
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(arr)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(arr)
}

/// Reads the page size recorded in an existing store file, if any.
fn probe_page_size(path: &Path) -> Result<Option<usize>> {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    let mut head = [0u8; META_LEN];
    file.read_exact(&mut head)?;
    let meta = Meta::decode(&head)?;
    Ok(Some(meta.page_size as usize))
}
