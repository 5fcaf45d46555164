//! Low-level page I/O.
//!
//! The [`Pager`] views a database as a flat sequence of fixed-size
//! **pages** ([`PAGE_SIZE`] = 4 096 bytes each) and provides read / write /
//! allocate / free operations on them. Where the bytes actually live is
//! decided by a [`PageStore`], picked when the pager is constructed:
//!
//! | Store           | Backing                  | Used for                 |
//! |-----------------|--------------------------|--------------------------|
//! | [`FileStore`]   | a file on disk           | main and attached files  |
//! | [`MemoryStore`] | a `Vec` of boxed pages   | `:memory:` and `temp`    |
//!
//! The pager knows nothing about the *contents* of pages. Higher layers
//! (the buffer pool and the B-tree) build their own structure on top.
//!
//! # File header
//!
//! Page 0 holds a 100-byte header:
//!
//! | Offset | Size | Field                               |
//! |--------|------|-------------------------------------|
//! | 0      | 16   | magic ([`MAGIC`])                   |
//! | 16     | 4    | page size                           |
//! | 20     | 4    | page count                          |
//! | 24     | 4    | free-list head (`0` = empty)        |
//! | 28     | 4    | schema cookie                       |
//! | 32     | 4    | change counter                      |
//! | 36     | 4    | schema table root page              |
//! | 40..100|      | reserved, zero                      |
//!
//! # Free list
//!
//! Freed pages are chained together in a singly-linked LIFO list. Each free
//! page stores the [`PageId`] of the next free page in its first four bytes
//! (big-endian).

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{HorizonError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Every page is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;

/// The file header occupies the first 100 bytes of page 0.
pub const HEADER_SIZE: usize = 100;

/// Magic bytes written at offset 0 of every valid database.
pub const MAGIC: &[u8; 16] = b"HorizonStore v1\x00";

/// Root page of the schema table in every database.
pub const SCHEMA_ROOT: PageId = 1;

/// Default ceiling on the number of pages in a database.
pub const DEFAULT_MAX_PAGE_COUNT: u32 = u32::MAX - 1;

/// A zero-based page number. Page 0 is always the header page.
pub type PageId = u32;

// ---------------------------------------------------------------------------
// PageStore
// ---------------------------------------------------------------------------

/// Raw page storage underneath a [`Pager`].
///
/// Implementations only move bytes; range checks, the free list and the
/// header are handled by the pager.
pub trait PageStore: Send + fmt::Debug {
    /// Read page `page_id` into `buf`.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Overwrite page `page_id` with `buf`.
    fn write_page(&mut self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Number of pages physically present.
    fn page_count(&self) -> Result<u32>;

    /// Grow the store to `page_count` pages, zero-filling new pages.
    fn extend(&mut self, page_count: u32) -> Result<()>;

    /// Make previous writes durable.
    fn sync(&mut self) -> Result<()>;
}

/// A [`PageStore`] backed by a file.
#[derive(Debug)]
pub struct FileStore {
    file: File,
}

impl FileStore {
    /// Open `path`, creating it unless `read_only`.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = if read_only {
            OpenOptions::new().read(true).open(path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?
        };
        Ok(FileStore { file })
    }
}

impl PageStore for FileStore {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        // `&File` implements `Read + Seek`, so no `&mut self` is needed.
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn page_count(&self) -> Result<u32> {
        let len = self.file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(HorizonError::Corrupt(format!(
                "file size {len} is not a multiple of the page size"
            )));
        }
        u32::try_from(len / PAGE_SIZE as u64)
            .map_err(|_| HorizonError::Corrupt("file has too many pages".into()))
    }

    fn extend(&mut self, page_count: u32) -> Result<()> {
        let len = page_count as u64 * PAGE_SIZE as u64;
        if self.file.metadata()?.len() < len {
            self.file.set_len(len)?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// A [`PageStore`] that keeps every page in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pages: Vec<Box<[u8; PAGE_SIZE]>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryStore {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let page = self
            .pages
            .get(page_id as usize)
            .ok_or(HorizonError::PageNotFound(page_id))?;
        buf.copy_from_slice(&page[..]);
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let page = self
            .pages
            .get_mut(page_id as usize)
            .ok_or(HorizonError::PageNotFound(page_id))?;
        page.copy_from_slice(buf);
        Ok(())
    }

    fn page_count(&self) -> Result<u32> {
        Ok(self.pages.len() as u32)
    }

    fn extend(&mut self, page_count: u32) -> Result<()> {
        while self.pages.len() < page_count as usize {
            self.pages.push(Box::new([0u8; PAGE_SIZE]));
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pager
// ---------------------------------------------------------------------------

/// Manages a [`PageStore`] as a flat array of [`PAGE_SIZE`]-byte pages.
///
/// The pager is responsible for:
///
/// * Reading and writing individual pages by [`PageId`].
/// * Maintaining the header (magic, page count, free-list head, cookies).
/// * Allocating pages from the free list or by growing the store, up to
///   the configured page ceiling.
/// * Freeing pages onto the free list.
///
/// It does **not** cache pages; that is the job of the buffer pool.
#[derive(Debug)]
pub struct Pager {
    store: Box<dyn PageStore>,
    /// Total number of pages, including page 0.
    page_count: u32,
    /// Head of the free-page list (`0` means empty).
    free_list_head: PageId,
    /// Bumped by every schema change.
    schema_cookie: u32,
    /// Bumped whenever the header is rewritten after a content change.
    change_counter: u32,
    schema_root: PageId,
    max_page_count: u32,
    read_only: bool,
}

impl Pager {
    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    /// Open a database file, or create a new one if it does not exist.
    ///
    /// # Errors
    ///
    /// * [`HorizonError::Io`]: the file could not be opened or created.
    /// * [`HorizonError::Corrupt`]: the file has an invalid header.
    /// * [`HorizonError::ReadOnly`]: the file is empty and `read_only` is set.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        Self::with_store(Box::new(FileStore::open(path, read_only)?), read_only)
    }

    /// Create a fresh, writable in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::with_store(Box::new(MemoryStore::new()), false)
    }

    /// Wrap an arbitrary store. An empty store is initialised with a header.
    pub fn with_store(store: Box<dyn PageStore>, read_only: bool) -> Result<Self> {
        let physical = store.page_count()?;
        let mut pager = Pager {
            store,
            page_count: 1,
            free_list_head: 0,
            schema_cookie: 0,
            change_counter: 0,
            schema_root: 0,
            max_page_count: DEFAULT_MAX_PAGE_COUNT,
            read_only,
        };

        if physical == 0 {
            if read_only {
                return Err(HorizonError::ReadOnly(
                    "cannot create a new database in read-only mode".into(),
                ));
            }
            pager.store.extend(1)?;
            pager.flush_header()?;
        } else {
            pager.read_header(physical)?;
        }
        Ok(pager)
    }

    // ---------------------------------------------------------------------
    // Page I/O
    // ---------------------------------------------------------------------

    /// Read page `page_id`.
    ///
    /// # Errors
    ///
    /// * [`HorizonError::PageNotFound`]: `page_id` is out of range.
    /// * [`HorizonError::Io`]: the underlying read failed.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        if page_id >= self.page_count {
            return Err(HorizonError::PageNotFound(page_id));
        }
        let mut buf = [0u8; PAGE_SIZE];
        self.store.read_page(page_id, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` to page `page_id`.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.ensure_writable()?;
        if page_id >= self.page_count {
            return Err(HorizonError::PageNotFound(page_id));
        }
        self.store.write_page(page_id, data)
    }

    // ---------------------------------------------------------------------
    // Page allocation / deallocation
    // ---------------------------------------------------------------------

    /// Allocate a zeroed page and return its [`PageId`].
    ///
    /// The free list is consulted first; otherwise the store grows by one
    /// page.
    ///
    /// # Errors
    ///
    /// * [`HorizonError::Full`]: the page ceiling has been reached.
    /// * [`HorizonError::ReadOnly`]: the pager was opened read-only.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        self.ensure_writable()?;

        let page_id = if self.free_list_head != 0 {
            let page_id = self.free_list_head;
            let page = self.read_page(page_id)?;
            self.free_list_head = u32::from_be_bytes([page[0], page[1], page[2], page[3]]);
            self.store.write_page(page_id, &[0u8; PAGE_SIZE])?;
            page_id
        } else {
            if self.page_count >= self.max_page_count {
                return Err(HorizonError::Full);
            }
            let page_id = self.page_count;
            self.store.extend(page_id + 1)?;
            self.page_count += 1;
            page_id
        };

        self.flush_header()?;
        Ok(page_id)
    }

    /// Push `page_id` onto the free list.
    ///
    /// # Errors
    ///
    /// * [`HorizonError::Corrupt`]: attempt to free page 0.
    /// * [`HorizonError::PageNotFound`]: `page_id` is out of range.
    pub fn free_page(&mut self, page_id: PageId) -> Result<()> {
        self.ensure_writable()?;

        if page_id == 0 {
            return Err(HorizonError::Corrupt(
                "cannot free the header page (page 0)".into(),
            ));
        }
        if page_id >= self.page_count {
            return Err(HorizonError::PageNotFound(page_id));
        }

        let mut page = [0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&self.free_list_head.to_be_bytes());
        self.store.write_page(page_id, &page)?;

        self.free_list_head = page_id;
        self.flush_header()
    }

    /// Walk the free list and return its pages, head first.
    pub fn free_pages(&self) -> Result<Vec<PageId>> {
        let mut pages = Vec::new();
        let mut next = self.free_list_head;
        while next != 0 {
            if pages.len() as u32 >= self.page_count {
                return Err(HorizonError::Corrupt("free list contains a cycle".into()));
            }
            pages.push(next);
            let page = self.read_page(next)?;
            next = u32::from_be_bytes([page[0], page[1], page[2], page[3]]);
        }
        Ok(pages)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Total number of pages, including the header page.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[inline]
    pub fn schema_cookie(&self) -> u32 {
        self.schema_cookie
    }

    /// Increment the schema cookie and persist it.
    pub fn bump_schema_cookie(&mut self) -> Result<u32> {
        self.ensure_writable()?;
        self.schema_cookie = self.schema_cookie.wrapping_add(1);
        self.flush_header()?;
        Ok(self.schema_cookie)
    }

    #[inline]
    pub fn change_counter(&self) -> u32 {
        self.change_counter
    }

    /// Root page of the schema table, `0` until it has been created.
    #[inline]
    pub fn schema_root(&self) -> PageId {
        self.schema_root
    }

    pub fn set_schema_root(&mut self, page_id: PageId) -> Result<()> {
        self.ensure_writable()?;
        self.schema_root = page_id;
        self.flush_header()
    }

    #[inline]
    pub fn max_page_count(&self) -> u32 {
        self.max_page_count
    }

    /// Set the page ceiling. It never drops below the current page count;
    /// the effective value is returned.
    pub fn set_max_page_count(&mut self, max: u32) -> u32 {
        self.max_page_count = max.max(self.page_count);
        self.max_page_count
    }

    // ---------------------------------------------------------------------
    // Header persistence
    // ---------------------------------------------------------------------

    /// Stamp the in-memory header fields onto page 0.
    pub fn flush_header(&mut self) -> Result<()> {
        self.ensure_writable()?;

        let mut page = [0u8; PAGE_SIZE];
        self.store.read_page(0, &mut page)?;

        self.change_counter = self.change_counter.wrapping_add(1);
        page[0..16].copy_from_slice(MAGIC);
        page[16..20].copy_from_slice(&(PAGE_SIZE as u32).to_be_bytes());
        page[20..24].copy_from_slice(&self.page_count.to_be_bytes());
        page[24..28].copy_from_slice(&self.free_list_head.to_be_bytes());
        page[28..32].copy_from_slice(&self.schema_cookie.to_be_bytes());
        page[32..36].copy_from_slice(&self.change_counter.to_be_bytes());
        page[36..40].copy_from_slice(&self.schema_root.to_be_bytes());
        page[40..HEADER_SIZE].fill(0);

        self.store.write_page(0, &page)
    }

    /// Flush the store to durable storage.
    pub fn sync(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.store.sync()
    }

    // ---------------------------------------------------------------------
    // Private helpers
    // ---------------------------------------------------------------------

    fn read_header(&mut self, physical: u32) -> Result<()> {
        let mut page = [0u8; PAGE_SIZE];
        self.store.read_page(0, &mut page)?;

        if &page[0..16] != MAGIC {
            return Err(HorizonError::Corrupt(
                "invalid magic bytes: not a database file".into(),
            ));
        }

        let field = |off: usize| u32::from_be_bytes([page[off], page[off + 1], page[off + 2], page[off + 3]]);

        let stored_page_size = field(16) as usize;
        if stored_page_size != PAGE_SIZE {
            return Err(HorizonError::Corrupt(format!(
                "unexpected page size {stored_page_size} (expected {PAGE_SIZE})"
            )));
        }

        let page_count = field(20);
        if page_count == 0 || page_count > physical {
            return Err(HorizonError::Corrupt(format!(
                "header claims {page_count} pages but the store holds {physical}"
            )));
        }
        self.page_count = page_count;
        self.free_list_head = field(24);
        self.schema_cookie = field(28);
        self.change_counter = field(32);
        self.schema_root = field(36);
        Ok(())
    }

    #[inline]
    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(HorizonError::ReadOnly(
                "cannot mutate a read-only database".into(),
            ))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn new_pager() -> (Pager, NamedTempFile) {
        let tmp = NamedTempFile::new().expect("failed to create temp file");
        let pager = Pager::open(tmp.path(), false).expect("failed to open pager");
        (pager, tmp)
    }

    // ----- Creation & header -------------------------------------------

    #[test]
    fn new_database_has_correct_defaults() {
        let (pager, _tmp) = new_pager();
        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.schema_cookie(), 0);
        assert_eq!(pager.schema_root(), 0);
        assert_eq!(&pager.read_page(0).unwrap()[0..16], MAGIC);
    }

    #[test]
    fn header_survives_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut pager = Pager::open(tmp.path(), false).unwrap();
            pager.allocate_page().unwrap();
            pager.set_schema_root(1).unwrap();
            pager.bump_schema_cookie().unwrap();
            pager.bump_schema_cookie().unwrap();
            pager.sync().unwrap();
        }
        let pager = Pager::open(tmp.path(), true).unwrap();
        assert_eq!(pager.page_count(), 2);
        assert_eq!(pager.schema_root(), 1);
        assert_eq!(pager.schema_cookie(), 2);
    }

    #[test]
    fn change_counter_advances_on_header_writes() {
        let (mut pager, _tmp) = new_pager();
        let before = pager.change_counter();
        pager.allocate_page().unwrap();
        assert!(pager.change_counter() > before);
    }

    // ----- Read / write ------------------------------------------------

    #[test]
    fn write_then_read_page() {
        let (mut pager, _tmp) = new_pager();
        let page_id = pager.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xCA;
        data[PAGE_SIZE - 1] = 0xFF;
        pager.write_page(page_id, &data).unwrap();

        let read_back = pager.read_page(page_id).unwrap();
        assert_eq!(read_back[0], 0xCA);
        assert_eq!(read_back[PAGE_SIZE - 1], 0xFF);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let (mut pager, _tmp) = new_pager();
        assert!(matches!(
            pager.read_page(999).unwrap_err(),
            HorizonError::PageNotFound(999)
        ));
        assert!(matches!(
            pager.write_page(999, &[0u8; PAGE_SIZE]).unwrap_err(),
            HorizonError::PageNotFound(999)
        ));
        assert!(matches!(
            pager.free_page(999).unwrap_err(),
            HorizonError::PageNotFound(999)
        ));
    }

    // ----- Allocation & free list --------------------------------------

    #[test]
    fn free_list_is_lifo_and_recycles_zeroed_pages() {
        let (mut pager, _tmp) = new_pager();
        let p1 = pager.allocate_page().unwrap();
        let p2 = pager.allocate_page().unwrap();
        let p3 = pager.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[500] = 7;
        pager.write_page(p2, &data).unwrap();

        pager.free_page(p1).unwrap();
        pager.free_page(p2).unwrap();
        pager.free_page(p3).unwrap();
        assert_eq!(pager.free_pages().unwrap(), vec![p3, p2, p1]);

        assert_eq!(pager.allocate_page().unwrap(), p3);
        let recycled = pager.allocate_page().unwrap();
        assert_eq!(recycled, p2);
        assert!(pager.read_page(recycled).unwrap().iter().all(|&b| b == 0));
        assert_eq!(pager.allocate_page().unwrap(), p1);
        assert_eq!(pager.page_count(), 4);
    }

    #[test]
    fn cannot_free_page_zero() {
        let (mut pager, _tmp) = new_pager();
        assert!(matches!(
            pager.free_page(0).unwrap_err(),
            HorizonError::Corrupt(_)
        ));
    }

    #[test]
    fn free_list_survives_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut pager = Pager::open(tmp.path(), false).unwrap();
            let p1 = pager.allocate_page().unwrap();
            let _p2 = pager.allocate_page().unwrap();
            pager.free_page(p1).unwrap();
            pager.sync().unwrap();
        }
        let mut pager = Pager::open(tmp.path(), false).unwrap();
        assert_eq!(pager.allocate_page().unwrap(), 1);
    }

    #[test]
    fn max_page_count_yields_full() {
        let mut pager = Pager::in_memory().unwrap();
        assert_eq!(pager.set_max_page_count(3), 3);
        pager.allocate_page().unwrap();
        pager.allocate_page().unwrap();
        assert!(matches!(pager.allocate_page().unwrap_err(), HorizonError::Full));

        // Freed pages can still be recycled at the ceiling.
        pager.free_page(2).unwrap();
        assert_eq!(pager.allocate_page().unwrap(), 2);
    }

    #[test]
    fn max_page_count_never_drops_below_page_count() {
        let mut pager = Pager::in_memory().unwrap();
        pager.allocate_page().unwrap();
        assert_eq!(pager.set_max_page_count(0), 2);
    }

    // ----- Read-only mode ----------------------------------------------

    #[test]
    fn read_only_rejects_writes_but_allows_reads() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut pager = Pager::open(tmp.path(), false).unwrap();
            pager.allocate_page().unwrap();
        }

        let mut pager = Pager::open(tmp.path(), true).unwrap();
        assert!(pager.read_page(1).is_ok());
        assert!(matches!(
            pager.write_page(0, &[0u8; PAGE_SIZE]).unwrap_err(),
            HorizonError::ReadOnly(_)
        ));
        assert!(matches!(
            pager.allocate_page().unwrap_err(),
            HorizonError::ReadOnly(_)
        ));
        assert!(matches!(
            pager.bump_schema_cookie().unwrap_err(),
            HorizonError::ReadOnly(_)
        ));
    }

    #[test]
    fn read_only_cannot_create() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.db");
        assert!(Pager::open(&path, true).is_err());
    }

    // ----- Corrupt / invalid files -------------------------------------

    #[test]
    fn rejects_bad_magic() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut f = File::create(tmp.path()).unwrap();
            f.write_all(&[0xFFu8; PAGE_SIZE]).unwrap();
        }
        assert!(matches!(
            Pager::open(tmp.path(), false).unwrap_err(),
            HorizonError::Corrupt(_)
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut f = File::create(tmp.path()).unwrap();
            f.write_all(&[0u8; 50]).unwrap();
        }
        assert!(matches!(
            Pager::open(tmp.path(), false).unwrap_err(),
            HorizonError::Corrupt(_)
        ));
    }

    // ----- Memory store ------------------------------------------------

    #[test]
    fn memory_store_behaves_like_a_file() {
        let mut pager = Pager::in_memory().unwrap();
        for i in 1..=50 {
            assert_eq!(pager.allocate_page().unwrap(), i);
        }
        let mut data = [0u8; PAGE_SIZE];
        data[9] = 9;
        pager.write_page(50, &data).unwrap();
        assert_eq!(pager.read_page(50).unwrap()[9], 9);
        assert_eq!(pager.page_count(), 51);
    }
}
