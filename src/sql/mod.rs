//! SQL front-end for schema DDL.
//!
//! The lexer produces spanned tokens and [`ddl::parse_ddl`] turns one
//! `CREATE` or `DROP` statement into a [`DdlStatement`]. Nothing else of
//! SQL is understood here.

pub mod ddl;
pub mod lexer;

pub use ddl::{parse_ddl, DdlStatement};
pub use lexer::Token;
