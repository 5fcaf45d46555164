//! Insert, delete and the page splits and collapses they cause.
//!
//! Splits always produce pages that fit; there is no merging of
//! underfull pages. A leaf that becomes empty is unlinked from its parent,
//! and a root interior page left without cells absorbs its only child, so
//! the root page number of a tree never changes.

use std::ops::Range;

use tracing::{debug, trace};

use super::cursor::CursorState;
use super::page::{
    parse_cell, set_child, table_interior_cell, Node, PageType, CELL_PTR_SIZE, CELL_SPACE,
    MAX_PAYLOAD, OVERFLOW_DATA_SIZE,
};
use super::{Btree, BtreePayload, CursorId, DeleteFlags, InsertFlags, Key, TreeKind};
use crate::error::{HorizonError, Result};
use crate::pager::PageId;

impl Btree {
    // ---------------------------------------------------------------------
    // Insert
    // ---------------------------------------------------------------------

    /// Insert `payload` through cursor `id`.
    ///
    /// `seek_result` is the result of a seek the caller already made with
    /// this cursor for the same key (`< 0`: cursor on a smaller entry,
    /// `> 0`: on a larger one). `0` means no usable hint, and the key is
    /// looked up again unless the cursor already sits on it.
    ///
    /// An existing entry with the same key is replaced. When it also has
    /// the same payload size the bytes are rewritten in place, reusing its
    /// overflow pages, and no page is split or moved.
    pub fn insert(
        &mut self,
        id: CursorId,
        payload: &BtreePayload,
        flags: InsertFlags,
        seek_result: i32,
    ) -> Result<()> {
        let (root, kind, writable) = {
            let c = self.cursor(id)?;
            (c.root, c.kind, c.writable)
        };
        if !writable {
            return Err(HorizonError::ReadOnly("cursor was not opened for writing".into()));
        }
        match (&payload.key, kind) {
            (Key::Rowid(_), TreeKind::Table) | (Key::Bytes(_), TreeKind::Index) => {}
            _ => {
                return Err(HorizonError::Misuse(format!(
                    "{:?} cannot be stored in a {kind:?} tree",
                    payload.key
                )))
            }
        }
        let size = payload.payload_size();
        if size > MAX_PAYLOAD {
            return Err(HorizonError::TooBig);
        }

        let preformat = flags.contains(InsertFlags::PREFORMAT);
        let preformatted = if preformat {
            Some(self.check_preformatted(kind, payload)?)
        } else {
            None
        };

        let mut loc = seek_result;
        if matches!(self.cursor(id)?.state, CursorState::RequireSeek(_)) {
            self.restore_cursor(id)?;
            loc = 0;
        }
        self.save_cursors(root, Some(id));

        let (valid, cached_rowid, cached_key_matches) = {
            let c = self.cursor(id)?;
            let valid = c.state == CursorState::Valid && c.valid_n_key;
            let matches = valid
                && match &payload.key {
                    Key::Rowid(rowid) => c.n_key == *rowid,
                    Key::Bytes(key) => c.key == *key,
                };
            (valid, c.n_key, matches)
        };

        match &payload.key {
            Key::Rowid(rowid) => {
                if cached_key_matches {
                    loc = 0;
                } else if loc == 0 || !valid {
                    let append = flags.contains(InsertFlags::APPEND)
                        && valid
                        && *rowid > cached_rowid
                        && self.at_last_entry(id)?;
                    loc = if append { -1 } else { self.seek_rowid(id, *rowid)? };
                }
            }
            Key::Bytes(key) => {
                let trust_position = flags.contains(InsertFlags::SAVE_POSITION) && cached_key_matches;
                if !valid || (loc == 0 && !trust_position) {
                    loc = self.seek_key(id, key)?;
                } else if cached_key_matches {
                    loc = 0;
                }
            }
        }

        if loc == 0 && !preformat {
            let c = self.cursor(id)?;
            if c.state == CursorState::Valid && c.n_payload == size {
                return self.overwrite_current(id, payload);
            }
        }

        let mut path = self.cursor(id)?.path.clone();
        let (leaf, idx) = path
            .pop()
            .ok_or_else(|| HorizonError::Internal("cursor has no position to insert at".into()))?;
        let mut node = self.load_node(leaf)?;
        if !node.is_leaf() {
            return Err(HorizonError::Internal(format!("cursor path ends at interior page {leaf}")));
        }

        let cell = match preformatted {
            Some(cell) => cell,
            None => {
                let rowid = match payload.key {
                    Key::Rowid(rowid) => rowid,
                    Key::Bytes(_) => 0,
                };
                self.build_cell(PageType::leaf(kind), 0, rowid, &payload.payload_bytes())?
            }
        };

        let slot = if node.is_empty() {
            node.cells.push(cell);
            0
        } else if loc == 0 {
            self.free_cell_overflow(&node, idx)?;
            node.cells[idx] = cell;
            idx
        } else {
            let slot = if loc < 0 { idx + 1 } else { idx };
            node.cells.insert(slot, cell);
            slot
        };

        let split = self.balance(&path, leaf, node)?;
        if !split {
            path.push((leaf, slot));
            let node = self.load_node(leaf)?;
            self.position_on(id, path, &node)?;
        } else if flags.contains(InsertFlags::SAVE_POSITION) {
            self.seek(id, &payload.key)?;
        } else {
            self.cursor_mut(id)?.invalidate();
        }
        Ok(())
    }

    /// Validate a preformatted cell against the payload it claims to carry.
    fn check_preformatted(&self, kind: TreeKind, payload: &BtreePayload) -> Result<Vec<u8>> {
        let cell = payload
            .preformatted
            .as_ref()
            .ok_or_else(|| HorizonError::Misuse("PREFORMAT insert without a preformatted cell".into()))?;
        let info = parse_cell(PageType::leaf(kind), cell)?;
        if info.size != cell.len() {
            return Err(HorizonError::Corrupt(format!(
                "preformatted cell describes {} bytes but holds {}",
                info.size,
                cell.len()
            )));
        }
        if let Key::Rowid(rowid) = payload.key {
            if info.rowid != rowid {
                return Err(HorizonError::Corrupt(format!(
                    "preformatted cell carries rowid {} instead of {rowid}",
                    info.rowid
                )));
            }
        }
        Ok(cell.clone())
    }

    /// Rewrite the payload of the cursor's current cell, which has the same
    /// key and size as `payload`.
    fn overwrite_current(&mut self, id: CursorId, payload: &BtreePayload) -> Result<()> {
        let (leaf, idx) = *self
            .cursor(id)?
            .path
            .last()
            .ok_or_else(|| HorizonError::Internal("valid cursor without a path".into()))?;
        let mut node = self.load_node(leaf)?;
        let info = node.info(idx)?;
        let bytes = payload.payload_bytes();
        let local = info.local.len();
        node.cells[idx][info.local.clone()].copy_from_slice(&bytes[..local]);

        let mut rest = &bytes[local..];
        let mut next = info.overflow;
        while !rest.is_empty() {
            if next == 0 {
                return Err(HorizonError::Corrupt(format!(
                    "overflow chain of page {leaf} cell {idx} is too short"
                )));
            }
            let mut page = self.pool.read_page(next)?;
            let take = rest.len().min(OVERFLOW_DATA_SIZE);
            page[4..4 + take].copy_from_slice(&rest[..take]);
            self.pool.write_page(next, &page)?;
            rest = &rest[take..];
            next = u32::from_be_bytes([page[0], page[1], page[2], page[3]]);
        }

        self.store_node(leaf, &node)?;
        trace!(page = leaf, cell = idx, "overwrote cell in place");
        Ok(())
    }

    /// Write `node` back to `page`, splitting it when it does not fit and
    /// propagating the new dividers up through `ancestors`. Returns whether
    /// any split happened.
    fn balance(&mut self, ancestors: &[(PageId, usize)], page: PageId, mut node: Node) -> Result<bool> {
        if node.fits() {
            self.store_node(page, &node)?;
            return Ok(false);
        }

        let kind = node.page_type.kind();
        let leaf = node.is_leaf();
        let sizes: Vec<usize> = node.cells.iter().map(|c| c.len() + CELL_PTR_SIZE).collect();
        let groups = distribute(&sizes, !leaf);
        let is_root = ancestors.is_empty();

        let mut pages = Vec::with_capacity(groups.len());
        for g in 0..groups.len() {
            pages.push(if g == 0 && !is_root { page } else { self.allocate_page()? });
        }

        let cells = std::mem::take(&mut node.cells);
        let mut dividers = Vec::with_capacity(groups.len() - 1);
        for (g, range) in groups.iter().enumerate() {
            let mut piece = Node::empty(node.page_type);
            piece.cells = cells[range.clone()].to_vec();
            let last_group = g + 1 == groups.len();

            if leaf {
                if !last_group {
                    let last = piece.len() - 1;
                    let divider = match kind {
                        TreeKind::Table => table_interior_cell(pages[g], piece.info(last)?.rowid),
                        TreeKind::Index => {
                            let key = self.cell_payload(&piece, last)?;
                            self.build_cell(PageType::IndexInterior, pages[g], 0, &key)?
                        }
                    };
                    dividers.push(divider);
                }
            } else if last_group {
                piece.right = node.right;
            } else {
                let mut promoted = cells[range.end].clone();
                piece.right = parse_cell(node.page_type, &promoted)?.child;
                set_child(&mut promoted, pages[g]);
                dividers.push(promoted);
            }
            self.store_node(pages[g], &piece)?;
        }

        let last_page = pages[pages.len() - 1];
        let Some((&(parent_page, ci), rest)) = ancestors.split_last() else {
            let root = Node {
                page_type: PageType::interior(kind),
                cells: dividers,
                right: last_page,
            };
            self.store_node(page, &root)?;
            debug!(root = page, children = pages.len(), "split root page");
            return Ok(true);
        };

        let mut parent = self.load_node(parent_page)?;
        if ci < parent.len() {
            let mut old = parent.cells.remove(ci);
            set_child(&mut old, last_page);
            let n = dividers.len();
            parent.cells.splice(ci..ci, dividers);
            parent.cells.insert(ci + n, old);
        } else {
            parent.cells.extend(dividers);
            parent.right = last_page;
        }
        debug!(page, parent = parent_page, pieces = pages.len(), "split page");
        self.balance(rest, parent_page, parent)?;
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Delete
    // ---------------------------------------------------------------------

    /// Delete the entry under cursor `id`.
    ///
    /// Without [`DeleteFlags::SAVE_POSITION`] the cursor is left `Invalid`.
    pub fn delete(&mut self, id: CursorId, flags: DeleteFlags) -> Result<()> {
        if !self.cursor(id)?.writable {
            return Err(HorizonError::ReadOnly("cursor was not opened for writing".into()));
        }
        self.restore_cursor(id)?;
        let (root, mut path, key) = {
            let c = self.cursor(id)?;
            if c.state != CursorState::Valid {
                return Err(HorizonError::Misuse("cursor is not on an entry".into()));
            }
            (c.root, c.path.clone(), c.current_key())
        };
        self.save_cursors(root, Some(id));

        let (leaf, idx) = path
            .pop()
            .ok_or_else(|| HorizonError::Internal("valid cursor without a path".into()))?;
        let mut node = self.load_node(leaf)?;
        self.free_cell_overflow(&node, idx)?;
        node.cells.remove(idx);

        if node.is_empty() && !path.is_empty() {
            self.pool.free_page(leaf)?;
            self.unlink_child(&path)?;
        } else {
            self.store_node(leaf, &node)?;
        }
        self.balance_shallower(root)?;

        let cursor = self.cursor_mut(id)?;
        cursor.invalidate();
        if flags.contains(DeleteFlags::SAVE_POSITION) {
            cursor.state = CursorState::RequireSeek(key);
        }
        Ok(())
    }

    /// Remove the pointer to an emptied child from the last page of
    /// `ancestors`, freeing parents that end up with no child at all.
    fn unlink_child(&mut self, ancestors: &[(PageId, usize)]) -> Result<()> {
        let mut ancestors = ancestors;
        while let Some((&(page, ci), rest)) = ancestors.split_last() {
            let mut node = self.load_node(page)?;
            let n = node.len();
            if ci < n {
                self.free_cell_overflow(&node, ci)?;
                node.cells.remove(ci);
            } else if n > 0 {
                node.right = node.info(n - 1)?.child;
                self.free_cell_overflow(&node, n - 1)?;
                node.cells.pop();
            } else if rest.is_empty() {
                self.store_node(page, &Node::empty(PageType::leaf(node.page_type.kind())))?;
                return Ok(());
            } else {
                self.pool.free_page(page)?;
                ancestors = rest;
                continue;
            }
            return self.store_node(page, &node);
        }
        Ok(())
    }

    /// Collapse a root interior page without cells into its only child.
    fn balance_shallower(&mut self, root: PageId) -> Result<()> {
        loop {
            let node = self.load_node(root)?;
            if node.is_leaf() || !node.is_empty() {
                return Ok(());
            }
            let child = node.right;
            let child_node = self.load_node(child)?;
            self.store_node(root, &child_node)?;
            self.pool.free_page(child)?;
            debug!(root, child, "collapsed root into its only child");
        }
    }

    // ---------------------------------------------------------------------
    // Preformatted cells
    // ---------------------------------------------------------------------

    /// Encode `payload` as a leaf cell of a `kind` tree, ready to be passed
    /// to [`Btree::insert`] with [`InsertFlags::PREFORMAT`]. A spilling
    /// payload gets its overflow chain allocated here.
    pub fn format_cell(&mut self, kind: TreeKind, payload: &BtreePayload) -> Result<Vec<u8>> {
        let rowid = match (&payload.key, kind) {
            (Key::Rowid(rowid), TreeKind::Table) => *rowid,
            (Key::Bytes(_), TreeKind::Index) => 0,
            _ => {
                return Err(HorizonError::Misuse(format!(
                    "{:?} cannot be stored in a {kind:?} tree",
                    payload.key
                )))
            }
        };
        if payload.payload_size() > MAX_PAYLOAD {
            return Err(HorizonError::TooBig);
        }
        self.build_cell(PageType::leaf(kind), 0, rowid, &payload.payload_bytes())
    }

    /// Copy row `rowid` from the table under `src` into the table under
    /// `dest`. Returns `false` when the source has no such row.
    pub fn transfer_row(&mut self, src: CursorId, dest: CursorId, rowid: i64) -> Result<bool> {
        if self.seek_rowid(src, rowid)? != 0 {
            return Ok(false);
        }
        let data = self.payload(src)?;
        let mut payload = BtreePayload::row(rowid, data);
        payload.preformatted = Some(self.format_cell(TreeKind::Table, &payload)?);
        self.insert(dest, &payload, InsertFlags::PREFORMAT, 0)?;
        Ok(true)
    }
}

/// Split cells of the given on-page sizes into groups that each fit a page,
/// aiming for even fill. With `promote`, the cell following every group but
/// the last belongs to no group: it moves up into the parent.
fn distribute(sizes: &[usize], promote: bool) -> Vec<Range<usize>> {
    let total: usize = sizes.iter().sum();
    let pieces = total.div_ceil(CELL_SPACE).max(2);
    let target = total.div_ceil(pieces);

    let mut groups = Vec::with_capacity(pieces + 1);
    let (mut start, mut acc, mut i) = (0, 0, 0);
    while i < sizes.len() {
        let size = sizes[i];
        if acc > 0 && (acc + size > CELL_SPACE || acc >= target) {
            groups.push(start..i);
            acc = 0;
            if promote {
                i += 1;
            }
            start = i;
            continue;
        }
        acc += size;
        i += 1;
    }
    groups.push(start..sizes.len());
    groups
}
