//! Page-granular file access with an LRU page cache.
//!
//! The pager knows nothing about records: it hands out fixed-size pages by
//! id, caches them, and writes dirty pages back on eviction and flush.
//! Durability is best-effort between [`Pager::flush`] calls.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use tracing::trace;

use crate::error::{PenumbraError, Result};

pub const DEFAULT_PAGE_SIZE: usize = 8192;
pub const DEFAULT_CACHE_PAGES: usize = 1024;
pub const MIN_PAGE_SIZE: usize = 512;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct Page {
    pub data: Vec<u8>,
    pub dirty: bool,
}

impl Page {
    fn new(page_size: usize) -> Self {
        Self {
            data: vec![0; page_size],
            dirty: false,
        }
    }
}

pub struct Pager {
    file: File,
    page_size: usize,
    cache: LruCache<u64, Page>,
    file_len: u64,
}

impl Pager {
    pub fn open(path: &Path, page_size: usize, cache_pages: usize) -> Result<Self> {
        if page_size < MIN_PAGE_SIZE {
            return Err(PenumbraError::InvalidArgument(format!(
                "page size {page_size} below minimum {MIN_PAGE_SIZE}"
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_len = file.metadata()?.len();
        if file_len % page_size as u64 != 0 {
            return Err(PenumbraError::Corruption(
                "file length is not page aligned".into(),
            ));
        }
        let cache_pages = NonZeroUsize::new(cache_pages)
            .or_else(|| NonZeroUsize::new(DEFAULT_CACHE_PAGES))
            .ok_or_else(|| PenumbraError::InvalidArgument("zero cache size".into()))?;
        Ok(Self {
            file,
            page_size,
            cache: LruCache::new(cache_pages),
            file_len,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u64 {
        self.file_len / self.page_size as u64
    }

    /// Appends a zeroed page to the file and returns its id.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let next_id = self.file_len / self.page_size as u64;
        let mut page = Page::new(self.page_size);
        page.dirty = true;
        self.install(next_id, page)?;
        self.file_len = (next_id + 1) * self.page_size as u64;
        trace!(page = next_id, "pager.allocate");
        Ok(PageId(next_id))
    }

    pub fn fetch_page(&mut self, page_id: PageId) -> Result<&mut Page> {
        if page_id.0 >= self.page_count() {
            return Err(PenumbraError::InvalidArgument(format!(
                "page {page_id} beyond end of file"
            )));
        }
        if !self.cache.contains(&page_id.0) {
            let mut page = Page::new(self.page_size);
            self.read_page_from_disk(page_id.0, &mut page.data)?;
            self.install(page_id.0, page)?;
        }
        self.cache
            .get_mut(&page_id.0)
            .ok_or_else(|| PenumbraError::Corruption("page evicted while in use".into()))
    }

    pub fn with_page<F, T>(&mut self, page_id: PageId, mut f: F) -> Result<T>
    where
        F: FnMut(&[u8]) -> Result<T>,
    {
        let page = self.fetch_page(page_id)?;
        f(&page.data)
    }

    pub fn with_page_mut<F, T>(&mut self, page_id: PageId, mut f: F) -> Result<T>
    where
        F: FnMut(&mut [u8]) -> Result<T>,
    {
        let page = self.fetch_page(page_id)?;
        let result = f(&mut page.data)?;
        page.dirty = true;
        Ok(result)
    }

    /// Writes all dirty cached pages back and syncs the file.
    pub fn flush(&mut self) -> Result<()> {
        let dirty: Vec<u64> = self
            .cache
            .iter()
            .filter_map(|(&id, page)| page.dirty.then_some(id))
            .collect();
        let count = dirty.len();
        for id in dirty {
            let offset = id * self.page_size as u64;
            if let Some(page) = self.cache.peek_mut(&id) {
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.write_all(&page.data)?;
                page.dirty = false;
            }
        }
        self.file.sync_data()?;
        trace!(pages = count, "pager.flush");
        Ok(())
    }

    fn install(&mut self, id: u64, page: Page) -> Result<()> {
        if let Some((evicted_id, evicted)) = self.cache.push(id, page) {
            if evicted.dirty {
                let offset = evicted_id * self.page_size as u64;
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.write_all(&evicted.data)?;
                trace!(page = evicted_id, "pager.evict");
            }
        }
        Ok(())
    }

    fn read_page_from_disk(&mut self, id: u64, buf: &mut [u8]) -> Result<()> {
        let offset = id * self.page_size as u64;
        if offset >= self.file_len {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }
}
