//! Unified error handling for the storage engine.
//!
//! [`HorizonError`] is the single error type propagated through every layer,
//! from the page store and buffer pool up through the B-tree, the schema
//! catalog and the row-level DML helpers.
//!
//! Schema replay does not propagate errors row by row; it accumulates a
//! primary [`ErrorCode`] instead. [`HorizonError::code`] provides the mapping
//! between the two.

use std::io;

use thiserror::Error;

/// The canonical error type for all storage engine operations.
#[derive(Error, Debug)]
pub enum HorizonError {
    /// An I/O error originating from the page store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An on-disk structure violates an invariant: bad root page, orphan
    /// index, malformed cell, bad magic bytes and the like.
    #[error("database disk image is malformed: {0}")]
    Corrupt(String),

    /// The target of a DROP (or other lookup) does not exist.
    #[error("{0}")]
    NoSuchObject(String),

    /// `DROP TABLE` used on a view or `DROP VIEW` used on a table.
    #[error("{0}")]
    WrongObjectKind(String),

    /// The object exists but may not be dropped directly.
    #[error("{0}")]
    ProtectedObject(String),

    /// The authorization hook refused the operation.
    #[error("not authorized: {0}")]
    AuthDenied(String),

    /// An allocation failed, or the connection is in the out-of-memory
    /// state.
    #[error("out of memory")]
    OutOfMemory,

    /// No space is left for the requested page or row.
    #[error("database or disk is full")]
    Full,

    /// A payload exceeds the maximum record size.
    #[error("string or blob too big")]
    TooBig,

    /// A constraint was violated (UNIQUE, NOT NULL, FOREIGN KEY).
    #[error("constraint failed: {0}")]
    ConstraintViolation(String),

    /// An object with the same name already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// DDL text could not be parsed.
    #[error("invalid SQL: {0}")]
    InvalidSql(String),

    /// The operation was interrupted.
    #[error("interrupted")]
    Interrupted,

    /// A lock conflict prevented the operation.
    #[error("database table is locked: {0}")]
    Locked(String),

    /// A write was attempted on a read-only database or cursor.
    #[error("attempt to write a readonly database: {0}")]
    ReadOnly(String),

    /// The requested page number is outside the database.
    #[error("page not found: {0}")]
    PageNotFound(u32),

    /// The buffer pool has no evictable frame left.
    #[error("buffer pool full: no available pages")]
    BufferPoolFull,

    /// The API was used out of order (e.g. reading an invalid cursor).
    #[error("library routine called out of sequence: {0}")]
    Misuse(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Primary result codes.
///
/// These are the compact, `Copy` form of an error outcome. Schema replay
/// accumulates one of them rather than a full [`HorizonError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    Error,
    Internal,
    Perm,
    Auth,
    Locked,
    NoMem,
    ReadOnly,
    Interrupt,
    IoErr,
    Corrupt,
    NotFound,
    Full,
    Constraint,
    TooBig,
    Misuse,
}

impl HorizonError {
    /// Map this error onto its primary result code.
    pub fn code(&self) -> ErrorCode {
        match self {
            HorizonError::Io(_) => ErrorCode::IoErr,
            HorizonError::Corrupt(_) => ErrorCode::Corrupt,
            HorizonError::NoSuchObject(_)
            | HorizonError::WrongObjectKind(_)
            | HorizonError::ProtectedObject(_)
            | HorizonError::AlreadyExists(_)
            | HorizonError::InvalidSql(_) => ErrorCode::Error,
            HorizonError::AuthDenied(_) => ErrorCode::Auth,
            HorizonError::OutOfMemory => ErrorCode::NoMem,
            HorizonError::Full => ErrorCode::Full,
            HorizonError::TooBig => ErrorCode::TooBig,
            HorizonError::ConstraintViolation(_) => ErrorCode::Constraint,
            HorizonError::Interrupted => ErrorCode::Interrupt,
            HorizonError::Locked(_) => ErrorCode::Locked,
            HorizonError::ReadOnly(_) => ErrorCode::ReadOnly,
            HorizonError::PageNotFound(_) => ErrorCode::Corrupt,
            HorizonError::BufferPoolFull => ErrorCode::Full,
            HorizonError::Misuse(_) => ErrorCode::Misuse,
            HorizonError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// A specialised [`Result`] type for storage engine operations.
pub type Result<T> = std::result::Result<T, HorizonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_via_question_mark() {
        fn might_fail() -> Result<()> {
            let _f = std::fs::File::open("/non/existent/path/horizon_test")?;
            Ok(())
        }

        let err = might_fail().unwrap_err();
        assert!(matches!(err, HorizonError::Io(_)));
        assert_eq!(err.code(), ErrorCode::IoErr);
    }

    #[test]
    fn display_messages_are_human_readable() {
        let cases: Vec<(HorizonError, &str)> = vec![
            (
                HorizonError::Corrupt("orphan index".into()),
                "database disk image is malformed: orphan index",
            ),
            (
                HorizonError::NoSuchObject("no such index: idx_a".into()),
                "no such index: idx_a",
            ),
            (
                HorizonError::AuthDenied("DROP INDEX idx_a".into()),
                "not authorized: DROP INDEX idx_a",
            ),
            (HorizonError::OutOfMemory, "out of memory"),
            (HorizonError::Full, "database or disk is full"),
            (HorizonError::PageNotFound(42), "page not found: 42"),
            (
                HorizonError::AlreadyExists("table t".into()),
                "table t already exists",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn codes_follow_the_taxonomy() {
        assert_eq!(HorizonError::OutOfMemory.code(), ErrorCode::NoMem);
        assert_eq!(HorizonError::Corrupt(String::new()).code(), ErrorCode::Corrupt);
        assert_eq!(HorizonError::Full.code(), ErrorCode::Full);
        assert_eq!(HorizonError::AuthDenied(String::new()).code(), ErrorCode::Auth);
        assert_eq!(
            HorizonError::ProtectedObject(String::new()).code(),
            ErrorCode::Error
        );
        assert_eq!(HorizonError::Interrupted.code(), ErrorCode::Interrupt);
    }

    #[test]
    fn error_source_chains_io_errors() {
        use std::error::Error;

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let horizon_err = HorizonError::Io(io_err);
        assert!(horizon_err.source().is_some());

        let non_io = HorizonError::Internal("bug".into());
        assert!(non_io.source().is_none());
    }
}
