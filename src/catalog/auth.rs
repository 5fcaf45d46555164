//! Authorization hook for schema changes.
//!
//! A connection may carry one [`Authorizer`]. DDL consults it before any
//! storage or catalog mutation; [`AuthDecision::Deny`] fails the statement
//! and [`AuthDecision::Ignore`] turns it into a silent no-op.

use std::fmt;

/// The operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthAction {
    /// Deleting rows; `arg1` is the table name.
    Delete,
    DropIndex,
    DropTempIndex,
    DropTable,
    DropTempTable,
    DropView,
    DropTempView,
    DropTrigger,
    DropTempTrigger,
    DropVTable,
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AuthAction::Delete => "DELETE",
            AuthAction::DropIndex => "DROP INDEX",
            AuthAction::DropTempIndex => "DROP TEMP INDEX",
            AuthAction::DropTable => "DROP TABLE",
            AuthAction::DropTempTable => "DROP TEMP TABLE",
            AuthAction::DropView => "DROP VIEW",
            AuthAction::DropTempView => "DROP TEMP VIEW",
            AuthAction::DropTrigger => "DROP TRIGGER",
            AuthAction::DropTempTrigger => "DROP TEMP TRIGGER",
            AuthAction::DropVTable => "DROP VIRTUAL TABLE",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthDecision {
    Allow,
    Deny,
    /// Skip the operation without an error.
    Ignore,
}

/// Decides whether a schema operation may proceed.
///
/// `arg1` names the object, `arg2` its parent (the table of an index or
/// trigger, the module of a virtual table) and `db` the database name.
pub trait Authorizer: Send {
    fn check(&self, action: AuthAction, arg1: &str, arg2: Option<&str>, db: &str) -> AuthDecision;
}

impl<F> Authorizer for F
where
    F: Fn(AuthAction, &str, Option<&str>, &str) -> AuthDecision + Send,
{
    fn check(&self, action: AuthAction, arg1: &str, arg2: Option<&str>, db: &str) -> AuthDecision {
        self(action, arg1, arg2, db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_authorizers() {
        let deny_temp = |action: AuthAction, _: &str, _: Option<&str>, db: &str| {
            if db == "temp" || action == AuthAction::DropTempIndex {
                AuthDecision::Deny
            } else {
                AuthDecision::Allow
            }
        };
        let auth: Box<dyn Authorizer> = Box::new(deny_temp);
        assert_eq!(auth.check(AuthAction::DropIndex, "i", Some("t"), "main"), AuthDecision::Allow);
        assert_eq!(auth.check(AuthAction::DropIndex, "i", Some("t"), "temp"), AuthDecision::Deny);
        assert_eq!(AuthAction::DropVTable.to_string(), "DROP VIRTUAL TABLE");
    }
}
