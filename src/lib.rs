//! # Horizon Storage
//!
//! An embedded, page-oriented relational storage engine: rowid tables and
//! indexes kept in B+trees, a SQLite-style schema catalog replayed from
//! disk at open time, and the row-level operations (insert, update and a
//! trigger- and foreign-key-aware delete) that sit on top.
//!
//! | Layer        | Module           |
//! |--------------|------------------|
//! | page store   | [`pager`]        |
//! | page cache   | [`buffer`]       |
//! | trees        | [`btree`]        |
//! | encodings    | [`record`]       |
//! | schema       | [`catalog`], [`sql`] |
//! | rows         | [`dml`], [`trigger`], [`fkey`] |
//! | entry point  | [`connection`]   |
//!
//! Every operation runs on a [`ConnectionContext`] obtained from
//! [`Connection::lock`].

pub mod error;
pub mod types;
pub mod pager;
pub mod buffer;
pub mod btree;
pub mod record;
pub mod sql;
pub mod catalog;
pub mod dml;
pub mod trigger;
pub mod fkey;
pub mod connection;

pub use btree::{Btree, BtreePayload, CursorId, CursorState, DeleteFlags, InsertFlags, Key, TreeKind};
pub use catalog::auth::{AuthAction, AuthDecision, Authorizer};
pub use catalog::{Catalog, IndexDef, TableDef, TriggerDef, MAIN_DB, TEMP_DB};
pub use connection::{Config, Connection, ConnectionContext, ConnectionGuard};
pub use dml::{generate_row_delete, DeleteMode, OldRow, RowDeleteTarget, RowHooks, RowSource};
pub use error::{ErrorCode, HorizonError, Result};
pub use pager::PageId;
pub use types::Value;
