//! # Buffer Pool
//!
//! The buffer pool is an in-memory page cache that sits between the B-tree
//! layer and the [`Pager`]. It caches recently used pages and evicts the
//! least recently used unpinned frame when full. Dirty frames are written
//! back on eviction and by [`BufferPool::flush_all`].
//!
//! All page access goes through the buffer pool.
//!
//! ## Cache-size hint
//!
//! The pool's size is driven by a hint in the usual embedded-database
//! convention. The hint is stored verbatim and reported back by
//! [`BufferPool::cache_size`]; only the derived frame capacity is adjusted:
//!
//! | Hint  | Frames                                   |
//! |-------|------------------------------------------|
//! | `n > 0` | `n`                                    |
//! | `n < 0` | as many pages as fit in `-n` KiB       |
//! | `0`     | the minimum                            |
//!
//! The capacity never drops below [`MIN_FRAMES`].

use std::collections::HashMap;

use tracing::debug;

use crate::error::{HorizonError, Result};
use crate::pager::{PageId, Pager, PAGE_SIZE};

/// Floor on the number of frames, whatever the hint says.
pub const MIN_FRAMES: usize = 16;

/// A page frame in the buffer pool.
#[derive(Debug)]
struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    page_id: PageId,
    dirty: bool,
    /// Number of active pins; pinned frames are never evicted.
    pin_count: u32,
    /// LRU timestamp (higher = more recently used).
    last_accessed: u64,
}

/// The buffer pool manages an in-memory cache of database pages.
#[derive(Debug)]
pub struct BufferPool {
    pager: Pager,
    frames: Vec<Frame>,
    capacity: usize,
    /// The last cache-size hint, exactly as received.
    cache_hint: i32,
    /// Mapping from page_id to frame index.
    page_table: HashMap<PageId, usize>,
    access_counter: u64,
}

/// Frame capacity implied by a cache-size hint.
pub fn capacity_for_hint(hint: i32) -> usize {
    let frames = if hint > 0 {
        hint as usize
    } else {
        (hint.unsigned_abs() as usize * 1024) / PAGE_SIZE
    };
    frames.max(MIN_FRAMES)
}

impl BufferPool {
    /// Create a buffer pool sized by a cache-size hint.
    pub fn new(pager: Pager, cache_hint: i32) -> Self {
        let capacity = capacity_for_hint(cache_hint);
        BufferPool {
            pager,
            frames: Vec::with_capacity(capacity.min(1024)),
            capacity,
            cache_hint,
            page_table: HashMap::new(),
            access_counter: 0,
        }
    }

    /// Fetch a page into the pool, returning its pinned frame index.
    fn fetch_page(&mut self, page_id: PageId) -> Result<usize> {
        if let Some(&frame_idx) = self.page_table.get(&page_id) {
            self.access_counter += 1;
            let frame = &mut self.frames[frame_idx];
            frame.last_accessed = self.access_counter;
            frame.pin_count += 1;
            return Ok(frame_idx);
        }

        let data = self.pager.read_page(page_id)?;
        self.install(page_id, data, false)
    }

    /// Place `data` for `page_id` into a free or evicted frame, pinned once.
    fn install(&mut self, page_id: PageId, data: [u8; PAGE_SIZE], dirty: bool) -> Result<usize> {
        let frame_idx = if self.frames.len() < self.capacity {
            self.frames.push(Frame {
                data: Box::new(data),
                page_id,
                dirty,
                pin_count: 1,
                last_accessed: 0,
            });
            self.frames.len() - 1
        } else {
            let idx = self.evict_one()?;
            let old_page_id = self.frames[idx].page_id;
            if self.page_table.get(&old_page_id) == Some(&idx) {
                self.page_table.remove(&old_page_id);
            }
            let frame = &mut self.frames[idx];
            *frame.data = data;
            frame.page_id = page_id;
            frame.dirty = dirty;
            frame.pin_count = 1;
            idx
        };

        self.access_counter += 1;
        self.frames[frame_idx].last_accessed = self.access_counter;
        self.page_table.insert(page_id, frame_idx);
        Ok(frame_idx)
    }

    /// Get a page for reading. The page stays pinned until [`unpin`](Self::unpin).
    pub fn get_page(&mut self, page_id: PageId) -> Result<&[u8; PAGE_SIZE]> {
        let frame_idx = self.fetch_page(page_id)?;
        Ok(&self.frames[frame_idx].data)
    }

    /// Get a page for writing; it is marked dirty. The page stays pinned
    /// until [`unpin`](Self::unpin).
    pub fn get_page_mut(&mut self, page_id: PageId) -> Result<&mut [u8; PAGE_SIZE]> {
        if self.pager.is_read_only() {
            return Err(HorizonError::ReadOnly(
                "cannot modify a page of a read-only database".into(),
            ));
        }
        let frame_idx = self.fetch_page(page_id)?;
        let frame = &mut self.frames[frame_idx];
        frame.dirty = true;
        Ok(&mut frame.data)
    }

    /// Copy a page out of the pool without leaving it pinned.
    pub fn read_page(&mut self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let page = *self.get_page(page_id)?;
        self.unpin(page_id);
        Ok(page)
    }

    /// Replace a page's contents without leaving it pinned.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        self.get_page_mut(page_id)?.copy_from_slice(data);
        self.unpin(page_id);
        Ok(())
    }

    /// Unpin a page, allowing it to be evicted.
    pub fn unpin(&mut self, page_id: PageId) {
        if let Some(&frame_idx) = self.page_table.get(&page_id) {
            let frame = &mut self.frames[frame_idx];
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
    }

    /// Allocate a new page through the pager and bring it into the pool,
    /// pinned and dirty.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = self.pager.allocate_page()?;
        // A recycled page id may still have a stale frame mapped.
        if let Some(idx) = self.page_table.remove(&page_id) {
            self.frames[idx].dirty = false;
            self.frames[idx].pin_count = 0;
        }
        self.install(page_id, [0u8; PAGE_SIZE], true)?;
        Ok(page_id)
    }

    /// Free a page (return it to the pager's free list).
    pub fn free_page(&mut self, page_id: PageId) -> Result<()> {
        if let Some(frame_idx) = self.page_table.remove(&page_id) {
            let frame = &mut self.frames[frame_idx];
            frame.dirty = false;
            frame.pin_count = 0;
            frame.last_accessed = 0;
        }
        self.pager.free_page(page_id)
    }

    /// Evict one unpinned frame using LRU policy and return its index.
    fn evict_one(&mut self) -> Result<usize> {
        let victim_idx = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.pin_count == 0)
            .min_by_key(|(_, f)| f.last_accessed)
            .map(|(idx, _)| idx)
            .ok_or(HorizonError::BufferPoolFull)?;

        self.flush_frame(victim_idx)?;
        Ok(victim_idx)
    }

    fn flush_frame(&mut self, frame_idx: usize) -> Result<()> {
        let frame = &self.frames[frame_idx];
        if !frame.dirty {
            return Ok(());
        }
        self.pager.write_page(frame.page_id, &frame.data)?;
        self.frames[frame_idx].dirty = false;
        Ok(())
    }

    /// Write every dirty page back and sync the store.
    pub fn flush_all(&mut self) -> Result<()> {
        for i in 0..self.frames.len() {
            self.flush_frame(i)?;
        }
        self.pager.sync()
    }

    // ---------------------------------------------------------------------
    // Cache-size hint
    // ---------------------------------------------------------------------

    /// Record a cache-size hint and resize the pool to match.
    ///
    /// The hint is kept exactly as given. When the pool shrinks, unpinned
    /// frames are written back and dropped; pinned frames are kept even if
    /// that leaves the pool above its new capacity.
    pub fn set_cache_size(&mut self, hint: i32) -> Result<()> {
        self.cache_hint = hint;
        self.capacity = capacity_for_hint(hint);
        debug!(hint, capacity = self.capacity, "page cache resized");

        while self.frames.len() > self.capacity {
            let victim = match self.evict_one() {
                Ok(victim) => victim,
                Err(HorizonError::BufferPoolFull) => break,
                Err(err) => return Err(err),
            };
            if self.page_table.get(&self.frames[victim].page_id) == Some(&victim) {
                self.page_table.remove(&self.frames[victim].page_id);
            }
            self.frames.swap_remove(victim);
            if victim < self.frames.len() {
                let moved = self.frames[victim].page_id;
                if self.page_table.get(&moved) == Some(&self.frames.len()) {
                    self.page_table.insert(moved, victim);
                }
            }
        }
        Ok(())
    }

    /// The cache-size hint most recently passed to this pool.
    pub fn cache_size(&self) -> i32 {
        self.cache_hint
    }

    /// Current frame capacity derived from the hint.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently allocated.
    pub fn size(&self) -> usize {
        self.frames.len()
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::pager::{MemoryStore, PageStore};
    use tempfile::TempDir;

    fn test_pool(cache_hint: i32) -> (TempDir, BufferPool) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.hdb");
        let pager = Pager::open(&db_path, false).unwrap();
        (dir, BufferPool::new(pager, cache_hint))
    }

    #[test]
    fn allocate_write_and_read_back() {
        let (_dir, mut pool) = test_pool(32);

        let page_id = pool.allocate_page().unwrap();
        assert!(page_id > 0);
        {
            let data = pool.get_page_mut(page_id).unwrap();
            data[0] = 42;
            data[100] = 99;
        }
        pool.unpin(page_id);
        pool.unpin(page_id);

        let data = pool.read_page(page_id).unwrap();
        assert_eq!(data[0], 42);
        assert_eq!(data[100], 99);
    }

    #[test]
    fn eviction_writes_dirty_pages_back() {
        let (_dir, mut pool) = test_pool(MIN_FRAMES as i32);

        let first = pool.allocate_page().unwrap();
        pool.unpin(first);
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 11;
        pool.write_page(first, &page).unwrap();

        for _ in 0..MIN_FRAMES * 2 {
            let p = pool.allocate_page().unwrap();
            pool.unpin(p);
        }
        assert_eq!(pool.size(), MIN_FRAMES);
        assert_eq!(pool.pager().read_page(first).unwrap()[0], 11);
        assert_eq!(pool.read_page(first).unwrap()[0], 11);
    }

    #[test]
    fn all_frames_pinned_is_an_error() {
        let (_dir, mut pool) = test_pool(1);
        for _ in 0..MIN_FRAMES {
            pool.allocate_page().unwrap();
        }
        assert!(matches!(
            pool.allocate_page().unwrap_err(),
            HorizonError::BufferPoolFull
        ));
    }

    #[test]
    fn freed_page_is_recycled_clean() {
        let (_dir, mut pool) = test_pool(32);
        let p = pool.allocate_page().unwrap();
        pool.unpin(p);
        let mut page = [0u8; PAGE_SIZE];
        page[7] = 7;
        pool.write_page(p, &page).unwrap();
        pool.free_page(p).unwrap();

        let again = pool.allocate_page().unwrap();
        pool.unpin(again);
        assert_eq!(again, p);
        assert_eq!(pool.read_page(again).unwrap()[7], 0);
    }

    #[test]
    fn cache_hint_is_reported_verbatim() {
        let (_dir, mut pool) = test_pool(-2000);
        assert_eq!(pool.cache_size(), -2000);
        assert_eq!(pool.capacity(), 500);

        pool.set_cache_size(0).unwrap();
        assert_eq!(pool.cache_size(), 0);
        assert_eq!(pool.capacity(), MIN_FRAMES);

        pool.set_cache_size(1234).unwrap();
        assert_eq!(pool.cache_size(), 1234);
        assert_eq!(pool.capacity(), 1234);
    }

    #[test]
    fn shrinking_keeps_contents_reachable() {
        let (_dir, mut pool) = test_pool(64);
        let mut ids = Vec::new();
        for i in 0..40u8 {
            let p = pool.allocate_page().unwrap();
            pool.unpin(p);
            let mut page = [0u8; PAGE_SIZE];
            page[0] = i;
            pool.write_page(p, &page).unwrap();
            ids.push(p);
        }
        pool.set_cache_size(1).unwrap();
        assert_eq!(pool.size(), MIN_FRAMES);
        for (i, p) in ids.into_iter().enumerate() {
            assert_eq!(pool.read_page(p).unwrap()[0], i as u8);
        }
    }

    /// Memory pages whose writes fail once `broken` is set.
    #[derive(Debug)]
    struct BrokenDisk {
        inner: MemoryStore,
        broken: Arc<AtomicBool>,
    }

    impl PageStore for BrokenDisk {
        fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
            self.inner.read_page(page_id, buf)
        }

        fn write_page(&mut self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into());
            }
            self.inner.write_page(page_id, buf)
        }

        fn page_count(&self) -> Result<u32> {
            self.inner.page_count()
        }

        fn extend(&mut self, page_count: u32) -> Result<()> {
            self.inner.extend(page_count)
        }

        fn sync(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn shrinking_reports_write_back_failures() {
        let broken = Arc::new(AtomicBool::new(false));
        let store = BrokenDisk {
            inner: MemoryStore::new(),
            broken: Arc::clone(&broken),
        };
        let pager = Pager::with_store(Box::new(store), false).unwrap();
        let mut pool = BufferPool::new(pager, 64);

        let page = [7u8; PAGE_SIZE];
        for _ in 0..24 {
            let id = pool.allocate_page().unwrap();
            pool.unpin(id);
            pool.write_page(id, &page).unwrap();
        }

        broken.store(true, Ordering::SeqCst);
        let err = pool.set_cache_size(MIN_FRAMES as i32).unwrap_err();
        assert!(matches!(err, HorizonError::Io(_)));
    }
}
