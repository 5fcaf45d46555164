//! Cursor states and navigation.
//!
//! A cursor is always in exactly one [`CursorState`]. Mutations through
//! one cursor move every other `Valid` cursor on the same tree to
//! `RequireSeek`, remembering only its key. The next use of such a cursor
//! re-seeks that key; if the entry is gone the cursor lands on a neighbour
//! and `skip_next` records which step (`next` or `prev`) is already done.

use std::cmp::Ordering;

use tracing::trace;

use super::page::Node;
use super::{key_cmp, Btree, CursorId, Key, TreeKind, MAX_DEPTH};
use crate::error::{HorizonError, Result};
use crate::pager::PageId;

/// Position state of a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    /// Not positioned on any entry.
    Invalid,
    /// Positioned on an existing entry.
    Valid,
    /// The tree changed underneath; the cursor will re-seek this key before
    /// its next use.
    RequireSeek(Key),
}

#[derive(Debug)]
pub(crate) struct Cursor {
    pub(crate) root: PageId,
    pub(crate) kind: TreeKind,
    pub(crate) writable: bool,
    pub(crate) state: CursorState,
    /// `(page, index)` from the root down. Interior entries hold the child
    /// index taken (`len()` meaning the rightmost child); the leaf entry
    /// holds the cell index.
    pub(crate) path: Vec<(PageId, usize)>,
    /// Whether the cached key and payload size describe the current cell.
    pub(crate) valid_n_key: bool,
    pub(crate) n_key: i64,
    pub(crate) key: Vec<u8>,
    pub(crate) n_payload: u64,
    /// `1`: the next `next()` is a no-op; `-1`: the next `prev()` is.
    pub(crate) skip_next: i8,
}

impl Cursor {
    fn new(root: PageId, kind: TreeKind, writable: bool) -> Self {
        Cursor {
            root,
            kind,
            writable,
            state: CursorState::Invalid,
            path: Vec::new(),
            valid_n_key: false,
            n_key: 0,
            key: Vec::new(),
            n_payload: 0,
            skip_next: 0,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.state = CursorState::Invalid;
        self.path.clear();
        self.valid_n_key = false;
        self.skip_next = 0;
    }

    /// Key of the current entry, from the cache.
    pub(crate) fn current_key(&self) -> Key {
        match self.kind {
            TreeKind::Table => Key::Rowid(self.n_key),
            TreeKind::Index => Key::Bytes(self.key.clone()),
        }
    }
}

impl Btree {
    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Open a cursor on the tree at `root`.
    pub fn open_cursor(&mut self, root: PageId, kind: TreeKind, writable: bool) -> Result<CursorId> {
        let actual = self.tree_kind(root)?;
        if actual != kind {
            return Err(HorizonError::Corrupt(format!(
                "page {root} is the root of a {actual:?} tree, not {kind:?}"
            )));
        }
        if writable && self.is_read_only() {
            return Err(HorizonError::ReadOnly(
                "cannot open a write cursor on a read-only database".into(),
            ));
        }
        let cursor = Cursor::new(root, kind, writable);
        let slot = match self.cursors.iter().position(Option::is_none) {
            Some(slot) => {
                self.cursors[slot] = Some(cursor);
                slot
            }
            None => {
                self.cursors.push(Some(cursor));
                self.cursors.len() - 1
            }
        };
        Ok(CursorId(slot))
    }

    /// Close a cursor. Closing an already closed cursor is a no-op.
    pub fn close_cursor(&mut self, id: CursorId) {
        if let Some(slot) = self.cursors.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Run `f` with a fresh cursor on `root`, closing it afterwards even
    /// when `f` fails.
    pub fn with_cursor<T>(
        &mut self,
        root: PageId,
        kind: TreeKind,
        writable: bool,
        f: impl FnOnce(&mut Btree, CursorId) -> Result<T>,
    ) -> Result<T> {
        let id = self.open_cursor(root, kind, writable)?;
        let out = f(self, id);
        self.close_cursor(id);
        out
    }

    pub(crate) fn cursor(&self, id: CursorId) -> Result<&Cursor> {
        self.cursors
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| HorizonError::Misuse(format!("cursor {} is not open", id.0)))
    }

    pub(crate) fn cursor_mut(&mut self, id: CursorId) -> Result<&mut Cursor> {
        self.cursors
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| HorizonError::Misuse(format!("cursor {} is not open", id.0)))
    }

    pub fn cursor_state(&self, id: CursorId) -> Result<CursorState> {
        Ok(self.cursor(id)?.state.clone())
    }

    /// Root page the cursor is bound to.
    pub fn cursor_root(&self, id: CursorId) -> Result<PageId> {
        Ok(self.cursor(id)?.root)
    }

    /// Whether the cursor is on an entry, restoring it first if needed.
    pub fn is_valid(&mut self, id: CursorId) -> Result<bool> {
        self.restore_cursor(id)?;
        Ok(self.cursor(id)?.state == CursorState::Valid)
    }

    // ---------------------------------------------------------------------
    // Save / restore
    // ---------------------------------------------------------------------

    /// Move every `Valid` cursor on `root`, other than `except`, to
    /// `RequireSeek` on its current key.
    pub(crate) fn save_cursors(&mut self, root: PageId, except: Option<CursorId>) {
        for (slot, cursor) in self.cursors.iter_mut().enumerate() {
            let Some(cursor) = cursor else { continue };
            if cursor.root != root || except == Some(CursorId(slot)) {
                continue;
            }
            match cursor.state {
                CursorState::Valid => {
                    let key = cursor.current_key();
                    trace!(cursor = slot, root, "saving cursor position");
                    cursor.state = CursorState::RequireSeek(key);
                    cursor.path.clear();
                    cursor.valid_n_key = false;
                    cursor.skip_next = 0;
                }
                CursorState::Invalid => cursor.path.clear(),
                CursorState::RequireSeek(_) => {}
            }
        }
    }

    /// Re-seek a `RequireSeek` cursor to its saved key.
    pub(crate) fn restore_cursor(&mut self, id: CursorId) -> Result<()> {
        let CursorState::RequireSeek(key) = self.cursor(id)?.state.clone() else {
            return Ok(());
        };
        let res = self.seek(id, &key)?;
        let cursor = self.cursor_mut(id)?;
        cursor.skip_next = match (cursor.state == CursorState::Valid, res.cmp(&0)) {
            (false, _) | (true, Ordering::Equal) => 0,
            (true, Ordering::Greater) => 1,
            (true, Ordering::Less) => -1,
        };
        trace!(cursor = id.0, res, "restored cursor position");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Seek
    // ---------------------------------------------------------------------

    /// Position a table cursor near `rowid`. See [`Btree::seek`].
    pub fn seek_rowid(&mut self, id: CursorId, rowid: i64) -> Result<i32> {
        self.seek(id, &Key::Rowid(rowid))
    }

    /// Position an index cursor near `key`. See [`Btree::seek`].
    pub fn seek_key(&mut self, id: CursorId, key: &[u8]) -> Result<i32> {
        self.seek(id, &Key::Bytes(key.to_vec()))
    }

    /// Position the cursor at `target` or a neighbour of it.
    ///
    /// | Result | Cursor                                          |
    /// |--------|-------------------------------------------------|
    /// | `0`    | on an entry equal to `target`                   |
    /// | `< 0`  | on the largest entry smaller than `target`      |
    /// | `> 0`  | on the smallest entry larger than `target`      |
    ///
    /// On an empty tree the cursor is left `Invalid` and `-1` is returned.
    pub fn seek(&mut self, id: CursorId, target: &Key) -> Result<i32> {
        let (root, kind) = {
            let c = self.cursor(id)?;
            (c.root, c.kind)
        };
        match (kind, target) {
            (TreeKind::Table, Key::Rowid(_)) | (TreeKind::Index, Key::Bytes(_)) => {}
            _ => {
                return Err(HorizonError::Misuse(format!(
                    "{target:?} cannot address a {kind:?} tree"
                )))
            }
        }

        let mut path = Vec::new();
        let mut page = root;
        loop {
            if path.len() > MAX_DEPTH {
                return Err(HorizonError::Corrupt(format!("tree {root} is too deep")));
            }
            let node = self.load_node(page)?;
            if node.page_type.kind() != kind {
                return Err(HorizonError::Corrupt(format!(
                    "page {page} does not belong to a {kind:?} tree"
                )));
            }
            let (idx, exact) = self.lower_bound(&node, target)?;

            if !node.is_leaf() {
                path.push((page, idx));
                page = node.child(idx)?;
                continue;
            }

            if node.is_empty() {
                if !path.is_empty() {
                    return Err(HorizonError::Corrupt(format!("empty non-root leaf {page}")));
                }
                path.push((page, 0));
                let cursor = self.cursor_mut(id)?;
                cursor.invalidate();
                cursor.path = path;
                return Ok(-1);
            }

            let (slot, res) = if idx == node.len() {
                (idx - 1, -1)
            } else if exact {
                (idx, 0)
            } else {
                (idx, 1)
            };
            path.push((page, slot));
            self.position_on(id, path, &node)?;
            return Ok(res);
        }
    }

    /// First cell index of `node` whose key is `>= target`, and whether it
    /// is equal.
    fn lower_bound(&mut self, node: &Node, target: &Key) -> Result<(usize, bool)> {
        let (mut lo, mut hi) = (0, node.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            let key = self.cell_key(node, mid)?;
            if key_cmp(&key, target) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let exact = lo < node.len() && key_cmp(&self.cell_key(node, lo)?, target) == Ordering::Equal;
        Ok((lo, exact))
    }

    // ---------------------------------------------------------------------
    // Stepping
    // ---------------------------------------------------------------------

    /// Move to the first entry. Returns `false` on an empty tree.
    pub fn first(&mut self, id: CursorId) -> Result<bool> {
        let root = self.cursor(id)?.root;
        let mut path = Vec::new();
        self.descend(&mut path, root, false, id)
    }

    /// Move to the last entry. Returns `false` on an empty tree.
    pub fn last(&mut self, id: CursorId) -> Result<bool> {
        let root = self.cursor(id)?.root;
        let mut path = Vec::new();
        self.descend(&mut path, root, true, id)
    }

    /// Advance to the next entry. Returns `false` once past the end, leaving
    /// the cursor `Invalid`.
    pub fn next(&mut self, id: CursorId) -> Result<bool> {
        self.restore_cursor(id)?;
        let cursor = self.cursor_mut(id)?;
        if cursor.state != CursorState::Valid {
            return Ok(false);
        }
        let skip = std::mem::take(&mut cursor.skip_next);
        if skip > 0 {
            return Ok(true);
        }
        let mut path = std::mem::take(&mut cursor.path);

        let (leaf, idx) = path
            .pop()
            .ok_or_else(|| HorizonError::Internal("valid cursor without a path".into()))?;
        let node = self.load_node(leaf)?;
        if idx + 1 < node.len() {
            path.push((leaf, idx + 1));
            self.position_on(id, path, &node)?;
            return Ok(true);
        }

        while let Some((page, ci)) = path.pop() {
            let node = self.load_node(page)?;
            if ci < node.len() {
                path.push((page, ci + 1));
                let child = node.child(ci + 1)?;
                return self.descend(&mut path, child, false, id);
            }
        }
        self.cursor_mut(id)?.invalidate();
        Ok(false)
    }

    /// Step back to the previous entry. Returns `false` once before the
    /// start, leaving the cursor `Invalid`.
    pub fn prev(&mut self, id: CursorId) -> Result<bool> {
        self.restore_cursor(id)?;
        let cursor = self.cursor_mut(id)?;
        if cursor.state != CursorState::Valid {
            return Ok(false);
        }
        let skip = std::mem::take(&mut cursor.skip_next);
        if skip < 0 {
            return Ok(true);
        }
        let mut path = std::mem::take(&mut cursor.path);

        let (leaf, idx) = path
            .pop()
            .ok_or_else(|| HorizonError::Internal("valid cursor without a path".into()))?;
        if idx > 0 {
            let node = self.load_node(leaf)?;
            path.push((leaf, idx - 1));
            self.position_on(id, path, &node)?;
            return Ok(true);
        }

        while let Some((page, ci)) = path.pop() {
            if ci > 0 {
                let node = self.load_node(page)?;
                path.push((page, ci - 1));
                let child = node.child(ci - 1)?;
                return self.descend(&mut path, child, true, id);
            }
        }
        self.cursor_mut(id)?.invalidate();
        Ok(false)
    }

    /// Walk from `page` down to its leftmost (or rightmost) leaf, extending
    /// `path`, and position the cursor there.
    fn descend(
        &mut self,
        path: &mut Vec<(PageId, usize)>,
        mut page: PageId,
        rightmost: bool,
        id: CursorId,
    ) -> Result<bool> {
        loop {
            if path.len() > MAX_DEPTH {
                return Err(HorizonError::Corrupt(format!("page {page} is too deep")));
            }
            let node = self.load_node(page)?;
            if node.is_leaf() {
                if node.is_empty() {
                    if !path.is_empty() {
                        return Err(HorizonError::Corrupt(format!("empty non-root leaf {page}")));
                    }
                    let cursor = self.cursor_mut(id)?;
                    cursor.invalidate();
                    cursor.path = vec![(page, 0)];
                    return Ok(false);
                }
                let idx = if rightmost { node.len() - 1 } else { 0 };
                path.push((page, idx));
                self.position_on(id, std::mem::take(path), &node)?;
                return Ok(true);
            }
            let idx = if rightmost { node.len() } else { 0 };
            path.push((page, idx));
            page = node.child(idx)?;
        }
    }

    /// Make the cursor `Valid` at the end of `path` and refresh its cache
    /// from `leaf`.
    pub(super) fn position_on(&mut self, id: CursorId, path: Vec<(PageId, usize)>, leaf: &Node) -> Result<()> {
        let (_, idx) = *path
            .last()
            .ok_or_else(|| HorizonError::Internal("empty cursor path".into()))?;
        let info = leaf.info(idx)?;
        let key = match leaf.page_type.kind() {
            TreeKind::Table => Vec::new(),
            TreeKind::Index => self.cell_payload(leaf, idx)?,
        };
        let cursor = self.cursor_mut(id)?;
        cursor.path = path;
        cursor.state = CursorState::Valid;
        cursor.valid_n_key = true;
        cursor.n_key = info.rowid;
        cursor.key = key;
        cursor.n_payload = info.payload_size;
        cursor.skip_next = 0;
        Ok(())
    }

    /// Whether a `Valid` cursor sits on the last entry of its tree.
    pub(crate) fn at_last_entry(&mut self, id: CursorId) -> Result<bool> {
        let path = self.cursor(id)?.path.clone();
        for (page, idx) in path {
            let node = self.load_node(page)?;
            let last = if node.is_leaf() { node.len().saturating_sub(1) } else { node.len() };
            if idx != last {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Reading the current entry
    // ---------------------------------------------------------------------

    fn require_valid(&mut self, id: CursorId) -> Result<()> {
        self.restore_cursor(id)?;
        if self.cursor(id)?.state != CursorState::Valid {
            return Err(HorizonError::Misuse("cursor is not on an entry".into()));
        }
        Ok(())
    }

    /// Rowid of the current table entry.
    pub fn rowid(&mut self, id: CursorId) -> Result<i64> {
        self.require_valid(id)?;
        let cursor = self.cursor(id)?;
        if cursor.kind != TreeKind::Table {
            return Err(HorizonError::Misuse("index cursors have no rowid".into()));
        }
        Ok(cursor.n_key)
    }

    /// Key of the current entry.
    pub fn key(&mut self, id: CursorId) -> Result<Key> {
        self.require_valid(id)?;
        Ok(self.cursor(id)?.current_key())
    }

    /// Payload size of the current entry.
    pub fn payload_size(&mut self, id: CursorId) -> Result<u64> {
        self.require_valid(id)?;
        Ok(self.cursor(id)?.n_payload)
    }

    /// Full payload of the current entry: the row data for tables, the key
    /// bytes for indexes.
    pub fn payload(&mut self, id: CursorId) -> Result<Vec<u8>> {
        self.require_valid(id)?;
        let (leaf, idx) = *self
            .cursor(id)?
            .path
            .last()
            .ok_or_else(|| HorizonError::Internal("valid cursor without a path".into()))?;
        let node = self.load_node(leaf)?;
        self.cell_payload(&node, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fill_table, test_btree};
    use super::*;
    use crate::btree::{BtreePayload, DeleteFlags, InsertFlags};

    #[test]
    fn seek_on_empty_tree_is_invalid() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        let cur = btree.open_cursor(root, TreeKind::Table, false).unwrap();
        assert_eq!(btree.seek_rowid(cur, 10).unwrap(), -1);
        assert_eq!(btree.cursor_state(cur).unwrap(), CursorState::Invalid);
        assert!(!btree.first(cur).unwrap());
        assert!(!btree.next(cur).unwrap());
    }

    #[test]
    fn seek_results_describe_the_landing_entry() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        fill_table(&mut btree, root, (0..2000).map(|i| i * 2), 20);
        let cur = btree.open_cursor(root, TreeKind::Table, false).unwrap();

        assert_eq!(btree.seek_rowid(cur, 100).unwrap(), 0);
        assert_eq!(btree.rowid(cur).unwrap(), 100);

        let res = btree.seek_rowid(cur, 101).unwrap();
        let landed = btree.rowid(cur).unwrap();
        assert!((res < 0 && landed == 100) || (res > 0 && landed == 102));

        assert_eq!(btree.seek_rowid(cur, -5).unwrap(), 1);
        assert_eq!(btree.rowid(cur).unwrap(), 0);

        assert_eq!(btree.seek_rowid(cur, 10_000).unwrap(), -1);
        assert_eq!(btree.rowid(cur).unwrap(), 3998);
    }

    #[test]
    fn forward_and_backward_scans_agree() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        fill_table(&mut btree, root, (0..1500).rev(), 64);
        let cur = btree.open_cursor(root, TreeKind::Table, false).unwrap();

        let mut forward = Vec::new();
        let mut ok = btree.first(cur).unwrap();
        while ok {
            forward.push(btree.rowid(cur).unwrap());
            ok = btree.next(cur).unwrap();
        }
        assert_eq!(forward, (0..1500).collect::<Vec<_>>());

        let mut backward = Vec::new();
        let mut ok = btree.last(cur).unwrap();
        while ok {
            backward.push(btree.rowid(cur).unwrap());
            ok = btree.prev(cur).unwrap();
        }
        backward.reverse();
        assert_eq!(backward, forward);
    }

    #[test]
    fn other_cursors_are_saved_and_restored() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        fill_table(&mut btree, root, 1..=100, 16);

        let reader = btree.open_cursor(root, TreeKind::Table, false).unwrap();
        let writer = btree.open_cursor(root, TreeKind::Table, true).unwrap();
        btree.seek_rowid(reader, 50).unwrap();

        for rowid in 101..=600 {
            btree
                .insert(writer, &BtreePayload::row(rowid, vec![0; 16]), InsertFlags::NONE, 0)
                .unwrap();
        }
        assert!(matches!(
            btree.cursor_state(reader).unwrap(),
            CursorState::RequireSeek(Key::Rowid(50))
        ));
        assert_eq!(btree.rowid(reader).unwrap(), 50);
        assert!(btree.next(reader).unwrap());
        assert_eq!(btree.rowid(reader).unwrap(), 51);
    }

    #[test]
    fn restored_cursor_steps_over_a_deleted_entry() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        fill_table(&mut btree, root, 1..=10, 16);

        let reader = btree.open_cursor(root, TreeKind::Table, false).unwrap();
        let writer = btree.open_cursor(root, TreeKind::Table, true).unwrap();
        btree.seek_rowid(reader, 5).unwrap();
        btree.seek_rowid(writer, 5).unwrap();
        btree.delete(writer, DeleteFlags::NONE).unwrap();

        assert!(btree.next(reader).unwrap());
        assert_eq!(btree.rowid(reader).unwrap(), 6);

        btree.seek_rowid(reader, 7).unwrap();
        btree.seek_rowid(writer, 7).unwrap();
        btree.delete(writer, DeleteFlags::NONE).unwrap();
        assert!(btree.prev(reader).unwrap());
        assert_eq!(btree.rowid(reader).unwrap(), 6);
    }

    #[test]
    fn reading_an_invalid_cursor_is_misuse() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Table).unwrap();
        let cur = btree.open_cursor(root, TreeKind::Table, false).unwrap();
        assert!(matches!(btree.rowid(cur), Err(HorizonError::Misuse(_))));
        btree.close_cursor(cur);
        assert!(matches!(btree.first(cur), Err(HorizonError::Misuse(_))));
    }

    #[test]
    fn cursor_kind_must_match_the_tree() {
        let (_dir, mut btree) = test_btree();
        let root = btree.create_tree(TreeKind::Index).unwrap();
        assert!(btree.open_cursor(root, TreeKind::Table, false).is_err());
    }
}
