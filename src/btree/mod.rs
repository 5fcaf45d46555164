//! # B-tree
//!
//! Every table is stored as a B+tree keyed by `rowid` and every index as a
//! B+tree keyed by memcomparable key bytes (see [`crate::record`]). All
//! entries live in leaves; interior pages only route.
//!
//! A [`Btree`] owns one database's [`BufferPool`] together with every
//! cursor opened on it. Cursors live in an arena and are addressed by
//! [`CursorId`]; pages are addressed by page number. Nothing holds a
//! pointer into another structure, so a mutation through one cursor can
//! find and save every other cursor on the same tree.
//!
//! | Module      | Contents                                          |
//! |-------------|---------------------------------------------------|
//! | [`page`]    | node and cell layout                              |
//! | `cursor`    | cursor states, seek and stepping                  |
//! | `mutate`    | insert, delete, page splits and root collapse     |
//!
//! Overflow pages are laid out as `[next u32][data]`, with `next == 0`
//! ending the chain.

pub mod page;

mod cursor;
mod mutate;

use std::collections::HashSet;
use std::ops::{BitOr, BitOrAssign};

use tracing::{debug, warn};

use crate::buffer::BufferPool;
use crate::error::{HorizonError, Result};
use crate::pager::{PageId, Pager, PAGE_SIZE, SCHEMA_ROOT};

pub use cursor::CursorState;
pub use page::{PageType, TreeKind};

use cursor::Cursor;
use page::{local_size, parse_cell, CellInfo, Node, OVERFLOW_DATA_SIZE};

/// Deepest tree any valid database can have; anything deeper is a loop.
const MAX_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Handle to a cursor inside a [`Btree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(usize);

/// The key of a B-tree entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Table trees.
    Rowid(i64),
    /// Index trees.
    Bytes(Vec<u8>),
}

/// One entry to be written by [`Btree::insert`].
///
/// For table trees the stored payload is `data` followed by `n_zero` zero
/// bytes. For index trees the key bytes are the payload and `data` is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtreePayload {
    pub key: Key,
    pub data: Vec<u8>,
    pub n_zero: u32,
    /// Complete cell bytes from [`Btree::format_cell`], used verbatim with
    /// [`InsertFlags::PREFORMAT`].
    pub preformatted: Option<Vec<u8>>,
}

impl BtreePayload {
    pub fn row(rowid: i64, data: Vec<u8>) -> Self {
        BtreePayload {
            key: Key::Rowid(rowid),
            data,
            n_zero: 0,
            preformatted: None,
        }
    }

    pub fn index(key: Vec<u8>) -> Self {
        BtreePayload {
            key: Key::Bytes(key),
            data: Vec::new(),
            n_zero: 0,
            preformatted: None,
        }
    }

    pub fn with_zero_tail(mut self, n_zero: u32) -> Self {
        self.n_zero = n_zero;
        self
    }

    /// Logical payload length.
    pub fn payload_size(&self) -> u64 {
        match &self.key {
            Key::Rowid(_) => self.data.len() as u64 + u64::from(self.n_zero),
            Key::Bytes(k) => k.len() as u64,
        }
    }

    fn payload_bytes(&self) -> Vec<u8> {
        match &self.key {
            Key::Rowid(_) => {
                let mut bytes = Vec::with_capacity(self.payload_size() as usize);
                bytes.extend_from_slice(&self.data);
                bytes.resize(bytes.len() + self.n_zero as usize, 0);
                bytes
            }
            Key::Bytes(k) => k.clone(),
        }
    }
}

/// Flags accepted by [`Btree::insert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertFlags(u8);

impl InsertFlags {
    pub const NONE: InsertFlags = InsertFlags(0);
    /// Leave the cursor on the new entry even if pages were split.
    pub const SAVE_POSITION: InsertFlags = InsertFlags(0x02);
    /// The key is larger than every key in the tree.
    pub const APPEND: InsertFlags = InsertFlags(0x08);
    /// Use [`BtreePayload::preformatted`] verbatim.
    pub const PREFORMAT: InsertFlags = InsertFlags(0x80);

    pub const fn contains(self, other: InsertFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for InsertFlags {
    type Output = InsertFlags;

    fn bitor(self, rhs: Self) -> Self {
        InsertFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for InsertFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Flags accepted by [`Btree::delete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteFlags(u8);

impl DeleteFlags {
    pub const NONE: DeleteFlags = DeleteFlags(0);
    /// Leave the cursor saved on the deleted key so that `next()` lands on
    /// the successor and `prev()` on the predecessor.
    pub const SAVE_POSITION: DeleteFlags = DeleteFlags(0x02);

    pub const fn contains(self, other: DeleteFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

// ---------------------------------------------------------------------------
// Btree
// ---------------------------------------------------------------------------

/// All B-trees of one database file, plus the cursors open on them.
#[derive(Debug)]
pub struct Btree {
    pool: BufferPool,
    cursors: Vec<Option<Cursor>>,
}

impl Btree {
    /// Wrap a pager, creating the schema table if the database is new.
    pub fn open(pager: Pager, cache_hint: i32) -> Result<Self> {
        let mut btree = Btree {
            pool: BufferPool::new(pager, cache_hint),
            cursors: Vec::new(),
        };

        if btree.pool.pager().schema_root() == 0 {
            let root = btree.create_tree(TreeKind::Table)?;
            if root != SCHEMA_ROOT {
                return Err(HorizonError::Corrupt(format!(
                    "schema table created at page {root} instead of {SCHEMA_ROOT}"
                )));
            }
            btree.pool.pager_mut().set_schema_root(root)?;
        } else if btree.pool.pager().schema_root() != SCHEMA_ROOT {
            return Err(HorizonError::Corrupt(format!(
                "schema table root is page {}",
                btree.pool.pager().schema_root()
            )));
        }
        Ok(btree)
    }

    // ---------------------------------------------------------------------
    // Trees
    // ---------------------------------------------------------------------

    /// Allocate an empty tree and return its root page.
    pub fn create_tree(&mut self, kind: TreeKind) -> Result<PageId> {
        let root = self.pool.allocate_page()?;
        self.pool.unpin(root);
        self.store_node(root, &Node::empty(PageType::leaf(kind)))?;
        debug!(root, ?kind, "created tree");
        Ok(root)
    }

    /// Free every page of the tree at `root`, the root included.
    ///
    /// Fails with [`HorizonError::Locked`] while any cursor is open on it.
    pub fn drop_tree(&mut self, root: PageId) -> Result<()> {
        if self.cursors.iter().flatten().any(|c| c.root == root) {
            return Err(HorizonError::Locked(format!(
                "cannot drop tree {root} while cursors are open on it"
            )));
        }
        let pages = self.free_subtree(root, 0)?;
        debug!(root, pages, "dropped tree");
        Ok(())
    }

    /// Remove every entry from the tree at `root`, keeping the root page.
    /// Returns the number of entries removed.
    pub fn clear_tree(&mut self, root: PageId) -> Result<u64> {
        let node = self.load_node(root)?;
        let removed = self.count_entries(root)?;
        for i in 0..node.len() {
            self.free_cell_overflow(&node, i)?;
        }
        if !node.is_leaf() {
            for i in 0..=node.len() {
                self.free_subtree(node.child(i)?, 1)?;
            }
        }
        self.store_node(root, &Node::empty(PageType::leaf(node.page_type.kind())))?;
        for cursor in self.cursors.iter_mut().flatten() {
            if cursor.root == root {
                cursor.invalidate();
            }
        }
        debug!(root, removed, "cleared tree");
        Ok(removed)
    }

    fn free_subtree(&mut self, page: PageId, depth: usize) -> Result<u64> {
        if depth > MAX_DEPTH {
            return Err(HorizonError::Corrupt(format!(
                "tree deeper than {MAX_DEPTH} levels at page {page}"
            )));
        }
        let node = self.load_node(page)?;
        let mut freed = 1;
        for i in 0..node.len() {
            self.free_cell_overflow(&node, i)?;
        }
        if !node.is_leaf() {
            for i in 0..=node.len() {
                freed += self.free_subtree(node.child(i)?, depth + 1)?;
            }
        }
        self.pool.free_page(page)?;
        Ok(freed)
    }

    /// Kind of the tree rooted at `root`, read from its page type.
    pub fn tree_kind(&mut self, root: PageId) -> Result<TreeKind> {
        Ok(self.load_node(root)?.page_type.kind())
    }

    /// Number of entries in the tree at `root`.
    pub fn count_entries(&mut self, root: PageId) -> Result<u64> {
        let mut count = 0;
        let mut stack = vec![(root, 0usize)];
        while let Some((page, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(HorizonError::Corrupt("tree too deep while counting".into()));
            }
            let node = self.load_node(page)?;
            if node.is_leaf() {
                count += node.len() as u64;
            } else {
                for i in 0..=node.len() {
                    stack.push((node.child(i)?, depth + 1));
                }
            }
        }
        Ok(count)
    }

    // ---------------------------------------------------------------------
    // Integrity check
    // ---------------------------------------------------------------------

    /// Walk the trees rooted at `roots` together with the free list and
    /// report every problem found. An empty result means the database is
    /// consistent.
    ///
    /// Checks: page types per tree, key order within and across pages,
    /// separator bounds, overflow chain lengths, pages referenced twice and
    /// pages never referenced.
    pub fn integrity_check(&mut self, roots: &[PageId]) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        let mut seen: HashSet<PageId> = HashSet::new();
        seen.insert(0);

        for &root in roots {
            let kind = match self.tree_kind(root) {
                Ok(kind) => kind,
                Err(e) => {
                    problems.push(format!("tree {root}: {e}"));
                    continue;
                }
            };
            let mut last: Option<Key> = None;
            self.check_page(root, kind, None, 0, &mut last, &mut seen, &mut problems)?;
        }

        match self.pool.pager().free_pages() {
            Ok(free) => {
                for page in free {
                    if !seen.insert(page) {
                        problems.push(format!("free page {page} is also in use"));
                    }
                }
            }
            Err(e) => problems.push(format!("free list: {e}")),
        }

        for page in 1..self.pool.pager().page_count() {
            if !seen.contains(&page) {
                problems.push(format!("page {page} is never used"));
            }
        }

        if !problems.is_empty() {
            warn!(count = problems.len(), "integrity check found problems");
        }
        Ok(problems)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_page(
        &mut self,
        page: PageId,
        kind: TreeKind,
        upper: Option<&Key>,
        depth: usize,
        last: &mut Option<Key>,
        seen: &mut HashSet<PageId>,
        problems: &mut Vec<String>,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            problems.push(format!("page {page}: tree too deep"));
            return Ok(());
        }
        if !seen.insert(page) {
            problems.push(format!("page {page} is referenced more than once"));
            return Ok(());
        }
        let node = match self.load_node(page) {
            Ok(node) => node,
            Err(e) => {
                problems.push(format!("page {page}: {e}"));
                return Ok(());
            }
        };
        if node.page_type.kind() != kind {
            problems.push(format!("page {page}: wrong page type for a {kind:?} tree"));
            return Ok(());
        }

        for i in 0..=node.len() {
            if i < node.len() {
                let info = node.info(i)?;
                self.check_overflow(page, &info, seen, problems)?;
                let key = self.cell_key(&node, i)?;
                if node.is_leaf() {
                    if let Some(prev) = last.as_ref() {
                        if key_cmp(prev, &key) != std::cmp::Ordering::Less {
                            problems.push(format!("page {page} cell {i}: keys out of order"));
                        }
                    }
                    if let Some(bound) = upper {
                        if key_cmp(&key, bound) == std::cmp::Ordering::Greater {
                            problems.push(format!(
                                "page {page} cell {i}: key exceeds parent separator"
                            ));
                        }
                    }
                    *last = Some(key);
                } else {
                    self.check_page(info.child, kind, Some(&key), depth + 1, last, seen, problems)?;
                }
            } else if !node.is_leaf() {
                self.check_page(node.right, kind, upper, depth + 1, last, seen, problems)?;
            }
        }
        Ok(())
    }

    fn check_overflow(
        &mut self,
        page: PageId,
        info: &CellInfo,
        seen: &mut HashSet<PageId>,
        problems: &mut Vec<String>,
    ) -> Result<()> {
        if !info.has_overflow() {
            return Ok(());
        }
        let spilled = info.payload_size as usize - info.local.len();
        let expected = spilled.div_ceil(OVERFLOW_DATA_SIZE);
        let mut next = info.overflow;
        let mut found = 0;
        while next != 0 && found <= expected {
            if next >= self.pool.pager().page_count() || !seen.insert(next) {
                problems.push(format!("page {page}: bad overflow page {next}"));
                return Ok(());
            }
            found += 1;
            let data = self.pool.read_page(next)?;
            next = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        }
        if found != expected || next != 0 {
            problems.push(format!(
                "page {page}: overflow chain has {found} pages, expected {expected}"
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pager passthrough
    // ---------------------------------------------------------------------

    /// Forward a cache-size hint to the page cache, unchanged.
    pub fn set_cache_size(&mut self, hint: i32) -> Result<()> {
        self.pool.set_cache_size(hint)
    }

    pub fn cache_size(&self) -> i32 {
        self.pool.cache_size()
    }

    pub fn schema_cookie(&self) -> u32 {
        self.pool.pager().schema_cookie()
    }

    pub fn bump_schema_cookie(&mut self) -> Result<u32> {
        self.pool.pager_mut().bump_schema_cookie()
    }

    pub fn page_count(&self) -> u32 {
        self.pool.pager().page_count()
    }

    /// Set the page ceiling; returns the effective value.
    pub fn set_max_page_count(&mut self, max: u32) -> u32 {
        self.pool.pager_mut().set_max_page_count(max)
    }

    pub fn is_read_only(&self) -> bool {
        self.pool.pager().is_read_only()
    }

    /// Pages currently on the freelist.
    pub fn free_pages(&self) -> Result<Vec<PageId>> {
        self.pool.pager().free_pages()
    }

    /// Write back every dirty page.
    pub fn flush(&mut self) -> Result<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.pool.flush_all()
    }

    /// Raw copy of a page, for inspection.
    pub fn read_raw_page(&mut self, page: PageId) -> Result<[u8; PAGE_SIZE]> {
        self.pool.read_page(page)
    }

    // ---------------------------------------------------------------------
    // Node and payload helpers
    // ---------------------------------------------------------------------

    fn load_node(&mut self, page: PageId) -> Result<Node> {
        if page == 0 {
            return Err(HorizonError::Corrupt("reference to page 0 in a tree".into()));
        }
        let data = self.pool.read_page(page)?;
        Node::decode(&data).map_err(|e| {
            warn!(page, error = %e, "malformed b-tree page");
            e
        })
    }

    fn store_node(&mut self, page: PageId, node: &Node) -> Result<()> {
        let data = node.encode()?;
        self.pool.write_page(page, &data)
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let page = self.pool.allocate_page()?;
        self.pool.unpin(page);
        Ok(page)
    }

    /// Full payload of cell `i` in `node`, following its overflow chain.
    fn cell_payload(&mut self, node: &Node, i: usize) -> Result<Vec<u8>> {
        let info = node.info(i)?;
        let mut payload = Vec::with_capacity(info.payload_size as usize);
        payload.extend_from_slice(&node.cells[i][info.local.clone()]);

        let total = info.payload_size as usize;
        let mut next = info.overflow;
        let mut hops = 0usize;
        while payload.len() < total {
            if next == 0 || hops > total / OVERFLOW_DATA_SIZE + 1 {
                warn!(
                    expected_bytes = total,
                    got_bytes = payload.len(),
                    "overflow chain ended prematurely"
                );
                return Err(HorizonError::Corrupt(format!(
                    "overflow chain ended after {} of {total} bytes",
                    payload.len()
                )));
            }
            let data = self.pool.read_page(next)?;
            let take = (total - payload.len()).min(OVERFLOW_DATA_SIZE);
            payload.extend_from_slice(&data[4..4 + take]);
            next = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            hops += 1;
        }
        Ok(payload)
    }

    /// Key of cell `i` in `node`.
    fn cell_key(&mut self, node: &Node, i: usize) -> Result<Key> {
        match node.page_type.kind() {
            TreeKind::Table => Ok(Key::Rowid(node.info(i)?.rowid)),
            TreeKind::Index => Ok(Key::Bytes(self.cell_payload(node, i)?)),
        }
    }

    /// Build a payload-carrying cell, spilling to a fresh overflow chain
    /// when the payload does not fit locally.
    fn build_cell(
        &mut self,
        page_type: PageType,
        child: PageId,
        rowid: i64,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let local = local_size(page_type, payload.len() as u64);
        let mut cell = page::payload_cell_prefix(
            page_type,
            child,
            rowid,
            payload.len() as u64,
            &payload[..local],
        );
        if local < payload.len() {
            let first = self.write_overflow(&payload[local..])?;
            cell.extend_from_slice(&first.to_be_bytes());
        }
        Ok(cell)
    }

    /// Store `data` in a new overflow chain and return its first page.
    fn write_overflow(&mut self, data: &[u8]) -> Result<PageId> {
        let chunks: Vec<&[u8]> = data.chunks(OVERFLOW_DATA_SIZE).collect();
        let mut pages = Vec::with_capacity(chunks.len());
        for _ in &chunks {
            pages.push(self.allocate_page()?);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            let mut page = [0u8; PAGE_SIZE];
            let next = pages.get(i + 1).copied().unwrap_or(0);
            page[0..4].copy_from_slice(&next.to_be_bytes());
            page[4..4 + chunk.len()].copy_from_slice(chunk);
            self.pool.write_page(pages[i], &page)?;
        }
        Ok(pages[0])
    }

    /// Free an overflow chain. Pages are released last-first, so the next
    /// allocation of a chain of the same length gets the same pages back in
    /// the same order.
    fn free_overflow(&mut self, first: PageId) -> Result<()> {
        let mut chain = Vec::new();
        let mut next = first;
        while next != 0 {
            if chain.len() > (page::MAX_PAYLOAD as usize) / OVERFLOW_DATA_SIZE {
                return Err(HorizonError::Corrupt("overflow chain loops".into()));
            }
            chain.push(next);
            let data = self.pool.read_page(next)?;
            next = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        }
        for page in chain.into_iter().rev() {
            self.pool.free_page(page)?;
        }
        Ok(())
    }

    fn free_cell_overflow(&mut self, node: &Node, i: usize) -> Result<()> {
        if !node.page_type.has_payload() {
            return Ok(());
        }
        let info = parse_cell(node.page_type, &node.cells[i])?;
        if info.has_overflow() {
            self.free_overflow(info.overflow)?;
        }
        Ok(())
    }
}

/// Order of two keys of the same tree.
fn key_cmp(a: &Key, b: &Key) -> std::cmp::Ordering {
    match (a, b) {
        (Key::Rowid(x), Key::Rowid(y)) => x.cmp(y),
        (Key::Bytes(x), Key::Bytes(y)) => x.cmp(y),
        (Key::Rowid(_), Key::Bytes(_)) => std::cmp::Ordering::Less,
        (Key::Bytes(_), Key::Rowid(_)) => std::cmp::Ordering::Greater,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn test_btree() -> (TempDir, Btree) {
        let dir = TempDir::new().unwrap();
        let pager = Pager::open(&dir.path().join("test.hdb"), false).unwrap();
        let btree = Btree::open(pager, 64).unwrap();
        (dir, btree)
    }

    pub(crate) fn fill_table(btree: &mut Btree, root: PageId, rowids: impl IntoIterator<Item = i64>, size: usize) {
        let cur = btree.open_cursor(root, TreeKind::Table, true).unwrap();
        for rowid in rowids {
            let data = vec![(rowid % 251) as u8; size];
            btree
                .insert(cur, &BtreePayload::row(rowid, data), InsertFlags::NONE, 0)
                .unwrap();
        }
        btree.close_cursor(cur);
    }

    #[test]
    fn new_database_has_schema_table_at_page_one() {
        let (_dir, mut btree) = test_btree();
        assert_eq!(btree.tree_kind(SCHEMA_ROOT).unwrap(), TreeKind::Table);
        assert_eq!(btree.count_entries(SCHEMA_ROOT).unwrap(), 0);
    }

    #[test]
    fn reopen_keeps_trees() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.hdb");
        let root = {
            let mut btree = Btree::open(Pager::open(&path, false).unwrap(), 64).unwrap();
            let root = btree.create_tree(TreeKind::Table).unwrap();
            fill_table(&mut btree, root, 1..=300, 40);
            btree.flush().unwrap();
            root
        };
        let mut btree = Btree::open(Pager::open(&path, false).unwrap(), 64).unwrap();
        assert_eq!(btree.count_entries(root).unwrap(), 300);
        assert!(btree.integrity_check(&[SCHEMA_ROOT, root]).unwrap().is_empty());
    }

    #[test]
    fn drop_tree_returns_all_pages() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        fill_table(&mut btree, root, 1..=200, 300);
        fill_table(&mut btree, root, 1000..=1002, 9000);

        let before = btree.pool.pager().free_pages().unwrap().len();
        btree.drop_tree(root).unwrap();
        let after = btree.pool.pager().free_pages().unwrap().len();
        assert!(after > before);
        assert!(btree.integrity_check(&[SCHEMA_ROOT]).unwrap().is_empty());
    }

    #[test]
    fn drop_tree_refuses_with_open_cursor() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Index).unwrap();
        let cur = btree.open_cursor(root, TreeKind::Index, false).unwrap();
        assert!(matches!(btree.drop_tree(root), Err(HorizonError::Locked(_))));
        btree.close_cursor(cur);
        btree.drop_tree(root).unwrap();
    }

    #[test]
    fn clear_tree_keeps_the_root() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        fill_table(&mut btree, root, 1..=500, 100);
        assert_eq!(btree.clear_tree(root).unwrap(), 500);
        assert_eq!(btree.count_entries(root).unwrap(), 0);
        assert_eq!(btree.tree_kind(root).unwrap(), TreeKind::Table);
        assert!(btree.integrity_check(&[SCHEMA_ROOT, root]).unwrap().is_empty());
    }

    #[test]
    fn integrity_check_reports_unused_pages() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        let problems = btree.integrity_check(&[SCHEMA_ROOT]).unwrap();
        assert_eq!(problems, vec![format!("page {root} is never used")]);
    }

    #[test]
    fn cache_hint_passes_through() {
        let (_dir, mut btree) = test_btree();
        btree.set_cache_size(0).unwrap();
        assert_eq!(btree.cache_size(), 0);
        btree.set_cache_size(1234).unwrap();
        assert_eq!(btree.cache_size(), 1234);
    }

    #[test]
    fn max_page_count_surfaces_as_full() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        let limit = btree.page_count() + 2;
        btree.set_max_page_count(limit);
        let cur = btree.open_cursor(root, TreeKind::Table, true).unwrap();
        let mut result = Ok(());
        for rowid in 0..200 {
            result = btree.insert(cur, &BtreePayload::row(rowid, vec![1; 500]), InsertFlags::NONE, 0);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(HorizonError::Full)));
    }
}
