//! On-page layout of B-tree nodes.
//!
//! Every node occupies exactly one page.
//!
//! **Header** (8 bytes):
//!
//! | Offset | Size | Field                                             |
//! |--------|------|---------------------------------------------------|
//! | 0      | 1    | page type (see [`PageType`])                      |
//! | 1      | 1    | flags (reserved, 0)                               |
//! | 2..4   | 2    | cell count (u16 BE)                               |
//! | 4..8   | 4    | rightmost child (interior pages), 0 on leaves     |
//!
//! The **cell pointer array** starts at offset 8, two bytes per cell, in key
//! order. **Cell bodies** are packed against the end of the page: cell 0
//! ends at the last byte, cell 1 ends where cell 0 starts, and so on. A page
//! is always rewritten in this canonical form, so two pages holding the
//! same cells are byte-identical.
//!
//! **Cells**:
//!
//! | Page type       | Layout                                                   |
//! |-----------------|----------------------------------------------------------|
//! | table leaf      | `[payload_size varint][rowid varint][local][ovfl u32]?`  |
//! | table interior  | `[child u32][rowid varint]`                              |
//! | index leaf      | `[payload_size varint][local][ovfl u32]?`                |
//! | index interior  | `[child u32][payload_size varint][local][ovfl u32]?`     |
//!
//! Interior cell `i` points at the subtree holding keys `<=` its key; the
//! rightmost child holds everything larger than the last cell's key.

use std::ops::Range;

use crate::error::{HorizonError, Result};
use crate::pager::{PageId, PAGE_SIZE};
use crate::record::{put_varint, read_varint};

/// Size of the node header.
pub const NODE_HEADER_SIZE: usize = 8;

pub const CELL_PTR_SIZE: usize = 2;

/// Bytes available for cells and their pointers on one page.
pub const CELL_SPACE: usize = PAGE_SIZE - NODE_HEADER_SIZE;

/// Payload bytes carried by one overflow page after its next-page pointer.
pub const OVERFLOW_DATA_SIZE: usize = PAGE_SIZE - 4;

/// Largest payload a single cell may carry.
pub const MAX_PAYLOAD: u64 = 1_000_000_000;

/// Whether a tree is keyed by rowid or by arbitrary key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    Table,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    TableLeaf,
    TableInterior,
    IndexLeaf,
    IndexInterior,
}

impl PageType {
    pub const fn to_byte(self) -> u8 {
        match self {
            PageType::TableLeaf => 0x0D,
            PageType::TableInterior => 0x05,
            PageType::IndexLeaf => 0x0A,
            PageType::IndexInterior => 0x02,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0D => Some(PageType::TableLeaf),
            0x05 => Some(PageType::TableInterior),
            0x0A => Some(PageType::IndexLeaf),
            0x02 => Some(PageType::IndexInterior),
            _ => None,
        }
    }

    pub const fn leaf(kind: TreeKind) -> Self {
        match kind {
            TreeKind::Table => PageType::TableLeaf,
            TreeKind::Index => PageType::IndexLeaf,
        }
    }

    pub const fn interior(kind: TreeKind) -> Self {
        match kind {
            TreeKind::Table => PageType::TableInterior,
            TreeKind::Index => PageType::IndexInterior,
        }
    }

    pub const fn is_leaf(self) -> bool {
        matches!(self, PageType::TableLeaf | PageType::IndexLeaf)
    }

    pub const fn kind(self) -> TreeKind {
        match self {
            PageType::TableLeaf | PageType::TableInterior => TreeKind::Table,
            PageType::IndexLeaf | PageType::IndexInterior => TreeKind::Index,
        }
    }

    /// Whether cells of this page type carry a payload.
    pub const fn has_payload(self) -> bool {
        !matches!(self, PageType::TableInterior)
    }
}

// ---------------------------------------------------------------------------
// Local payload sizing
// ---------------------------------------------------------------------------

/// Largest payload kept entirely on the page.
pub const fn max_local(page_type: PageType) -> usize {
    match page_type {
        PageType::TableLeaf => PAGE_SIZE - 35,
        _ => (PAGE_SIZE - 12) * 64 / 255 - 23,
    }
}

/// Smallest local portion of a payload that spills.
pub const fn min_local() -> usize {
    (PAGE_SIZE - 12) * 32 / 255 - 23
}

/// Number of payload bytes stored on the page for a payload of
/// `payload_size` bytes. The rest goes to the overflow chain.
pub fn local_size(page_type: PageType, payload_size: u64) -> usize {
    let max = max_local(page_type);
    if payload_size <= max as u64 {
        return payload_size as usize;
    }
    let min = min_local() as u64;
    let local = min + (payload_size - min) % OVERFLOW_DATA_SIZE as u64;
    if local > max as u64 {
        min as usize
    } else {
        local as usize
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Decoded view of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellInfo {
    /// Left child, interior cells only.
    pub child: PageId,
    /// Rowid, table cells only.
    pub rowid: i64,
    /// Total payload size, including the part in overflow pages.
    pub payload_size: u64,
    /// Position of the local payload within the cell bytes.
    pub local: Range<usize>,
    /// First overflow page, `0` if the payload is entirely local.
    pub overflow: PageId,
    /// Total size of the cell in bytes.
    pub size: usize,
}

impl CellInfo {
    pub fn has_overflow(&self) -> bool {
        self.overflow != 0
    }
}

fn corrupt(detail: impl Into<String>) -> HorizonError {
    HorizonError::Corrupt(detail.into())
}

fn take_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let (value, n) = buf
        .get(*pos..)
        .and_then(read_varint)
        .ok_or_else(|| corrupt("truncated varint in cell"))?;
    *pos += n;
    Ok(value)
}

fn take_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| corrupt("truncated page number in cell"))?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Parse the cell starting at the front of `buf`.
///
/// `buf` may extend past the end of the cell; [`CellInfo::size`] reports
/// where it ends.
pub fn parse_cell(page_type: PageType, buf: &[u8]) -> Result<CellInfo> {
    let mut pos = 0;
    let mut info = CellInfo {
        child: 0,
        rowid: 0,
        payload_size: 0,
        local: 0..0,
        overflow: 0,
        size: 0,
    };

    if !page_type.is_leaf() {
        info.child = take_u32(buf, &mut pos)?;
    }
    if page_type == PageType::TableInterior {
        info.rowid = take_varint(buf, &mut pos)? as i64;
        info.size = pos;
        return Ok(info);
    }

    info.payload_size = take_varint(buf, &mut pos)?;
    if info.payload_size > MAX_PAYLOAD {
        return Err(corrupt(format!(
            "cell claims a payload of {} bytes",
            info.payload_size
        )));
    }
    if page_type == PageType::TableLeaf {
        info.rowid = take_varint(buf, &mut pos)? as i64;
    }

    let local = local_size(page_type, info.payload_size);
    if pos + local > buf.len() {
        return Err(corrupt("cell payload extends past the end of the page"));
    }
    info.local = pos..pos + local;
    pos += local;

    if (local as u64) < info.payload_size {
        info.overflow = take_u32(buf, &mut pos)?;
        if info.overflow == 0 {
            return Err(corrupt("spilled payload has no overflow page"));
        }
    }
    info.size = pos;
    Ok(info)
}

/// Encode the fixed part of a payload-carrying cell, followed by its local
/// payload bytes. The caller appends the overflow pointer if needed.
pub fn payload_cell_prefix(
    page_type: PageType,
    child: PageId,
    rowid: i64,
    payload_size: u64,
    local: &[u8],
) -> Vec<u8> {
    let mut cell = Vec::with_capacity(local.len() + 22);
    if !page_type.is_leaf() {
        cell.extend_from_slice(&child.to_be_bytes());
    }
    put_varint(&mut cell, payload_size);
    if page_type == PageType::TableLeaf {
        put_varint(&mut cell, rowid as u64);
    }
    cell.extend_from_slice(local);
    cell
}

/// Build a table interior cell.
pub fn table_interior_cell(child: PageId, rowid: i64) -> Vec<u8> {
    let mut cell = Vec::with_capacity(13);
    cell.extend_from_slice(&child.to_be_bytes());
    put_varint(&mut cell, rowid as u64);
    cell
}

/// Rewrite the child pointer of an interior cell.
pub fn set_child(cell: &mut [u8], child: PageId) {
    cell[..4].copy_from_slice(&child.to_be_bytes());
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A decoded page: its type, its cells in key order, and the rightmost
/// child pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub page_type: PageType,
    pub cells: Vec<Vec<u8>>,
    pub right: PageId,
}

impl Node {
    pub fn empty(page_type: PageType) -> Self {
        Node {
            page_type,
            cells: Vec::new(),
            right: 0,
        }
    }

    pub fn decode(page: &[u8; PAGE_SIZE]) -> Result<Self> {
        let page_type = PageType::from_byte(page[0])
            .ok_or_else(|| corrupt(format!("unknown page type {:#04x}", page[0])))?;
        let count = u16::from_be_bytes([page[2], page[3]]) as usize;
        let right = u32::from_be_bytes([page[4], page[5], page[6], page[7]]);

        if NODE_HEADER_SIZE + count * CELL_PTR_SIZE > PAGE_SIZE {
            return Err(corrupt(format!("cell count {count} overflows the page")));
        }

        let ptr_end = NODE_HEADER_SIZE + count * CELL_PTR_SIZE;
        let mut cells = Vec::with_capacity(count);
        for i in 0..count {
            let at = NODE_HEADER_SIZE + i * CELL_PTR_SIZE;
            let offset = u16::from_be_bytes([page[at], page[at + 1]]) as usize;
            if offset < ptr_end || offset >= PAGE_SIZE {
                return Err(corrupt(format!("cell pointer {offset} out of bounds")));
            }
            let info = parse_cell(page_type, &page[offset..])?;
            cells.push(page[offset..offset + info.size].to_vec());
        }

        if !page_type.is_leaf() && right == 0 {
            return Err(corrupt("interior page has no rightmost child"));
        }

        Ok(Node {
            page_type,
            cells,
            right,
        })
    }

    /// Bytes this node needs on a page.
    pub fn used_bytes(&self) -> usize {
        NODE_HEADER_SIZE
            + self
                .cells
                .iter()
                .map(|c| c.len() + CELL_PTR_SIZE)
                .sum::<usize>()
    }

    pub fn fits(&self) -> bool {
        self.used_bytes() <= PAGE_SIZE
    }

    /// Serialize into canonical page form.
    pub fn encode(&self) -> Result<[u8; PAGE_SIZE]> {
        if !self.fits() {
            return Err(HorizonError::Internal(format!(
                "node of {} bytes does not fit a page",
                self.used_bytes()
            )));
        }
        let mut page = [0u8; PAGE_SIZE];
        page[0] = self.page_type.to_byte();
        page[2..4].copy_from_slice(&(self.cells.len() as u16).to_be_bytes());
        page[4..8].copy_from_slice(&self.right.to_be_bytes());

        let mut end = PAGE_SIZE;
        for (i, cell) in self.cells.iter().enumerate() {
            let start = end - cell.len();
            page[start..end].copy_from_slice(cell);
            let at = NODE_HEADER_SIZE + i * CELL_PTR_SIZE;
            page[at..at + 2].copy_from_slice(&(start as u16).to_be_bytes());
            end = start;
        }
        Ok(page)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type.is_leaf()
    }

    pub fn info(&self, i: usize) -> Result<CellInfo> {
        let cell = self
            .cells
            .get(i)
            .ok_or_else(|| corrupt(format!("cell index {i} out of range")))?;
        parse_cell(self.page_type, cell)
    }

    /// Child `i` of an interior node; `i == len()` is the rightmost child.
    pub fn child(&self, i: usize) -> Result<PageId> {
        if i == self.cells.len() {
            Ok(self.right)
        } else {
            Ok(self.info(i)?.child)
        }
    }
}
