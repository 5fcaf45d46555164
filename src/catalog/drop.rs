//! `DROP INDEX`, `DROP TABLE`, `DROP VIEW` and `DROP TRIGGER`.
//!
//! Every drop runs the same sequence. Each check can fail, and a failed
//! check leaves both the database and the catalog untouched:
//!
//! 1. **Lookup** the name, optionally qualified by a database.
//! 2. **Kind check**: table against view.
//! 3. **Droppability**: constraint indexes and internal tables are
//!    protected.
//! 4. **Authorization** through the connection's [`Authorizer`].
//! 5. **Foreign keys**: rows of a dropped parent table are checked and
//!    cascaded.
//! 6. **Execution**: schema rows are deleted, storage is freed and the
//!    schema cookie is bumped.
//! 7. **Eviction** of the descriptors, the only step that cannot fail.
//!
//! [`Authorizer`]: super::auth::Authorizer

use tracing::debug;

use super::auth::AuthAction;
use super::schema_table::delete_rows;
use super::{schema_table_name, TableDef, TableKind, IndexOrigin, TEMP_DB};
use crate::connection::ConnectionContext;
use crate::error::{HorizonError, Result};
use crate::fkey::{CatalogForeignKeys, ForeignKeyHooks};

fn display_name(qualifier: Option<&str>, name: &str) -> String {
    match qualifier {
        Some(db) => format!("{db}.{name}"),
        None => name.to_string(),
    }
}

/// Tables whose names start with `sqlite_` belong to the engine, except
/// statistics tables and `sqlite_parameters`.
fn is_protected_table(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("sqlite_") && !lower.starts_with("sqlite_stat") && lower != "sqlite_parameters"
}

impl ConnectionContext {
    /// Resolve an optional database qualifier. An unknown database is an
    /// error even under `IF EXISTS`.
    fn drop_target(&self, db_qualifier: Option<&str>) -> Result<Option<usize>> {
        db_qualifier.map(|q| self.resolve_db(q)).transpose()
    }

    /// `DROP INDEX [IF EXISTS] [db.]name`.
    #[tracing::instrument(skip_all, fields(name = %name, if_exists = if_exists), level = "debug")]
    pub fn drop_index(&mut self, name: &str, db_qualifier: Option<&str>, if_exists: bool) -> Result<()> {
        if self.oom {
            return Err(HorizonError::OutOfMemory);
        }
        let db = self.drop_target(db_qualifier)?;
        let Some(index) = self.catalog.find_index(name, db).cloned() else {
            if if_exists {
                debug!("index does not exist; nothing to drop");
                return Ok(());
            }
            return Err(HorizonError::NoSuchObject(format!(
                "no such index: {}",
                display_name(db_qualifier, name)
            )));
        };

        if index.origin != IndexOrigin::AppDefined {
            return Err(HorizonError::ProtectedObject(
                "index associated with UNIQUE or PRIMARY KEY constraint cannot be dropped".into(),
            ));
        }

        let db = index.db;
        let db_name = self.catalog.db_name(db).to_string();
        if !self.authorize(AuthAction::Delete, schema_table_name(db), None, &db_name)? {
            return Ok(());
        }
        let action = if db == TEMP_DB {
            AuthAction::DropTempIndex
        } else {
            AuthAction::DropIndex
        };
        if !self.authorize(action, &index.name, Some(&index.table), &db_name)? {
            return Ok(());
        }

        let btree = self.btree(db)?;
        delete_rows(btree, |row| row.kind == "index" && row.name.eq_ignore_ascii_case(&index.name))?;
        if index.root >= 2 {
            btree.drop_tree(index.root)?;
        }
        btree.bump_schema_cookie()?;

        self.catalog.schema_mut(db)?.remove_index(&index.name);
        debug!(db, index = %index.name, "dropped index");
        Ok(())
    }

    /// `DROP TABLE` (`is_view == false`) or `DROP VIEW` (`is_view == true`).
    #[tracing::instrument(skip_all, fields(name = %name, is_view = is_view, if_exists = if_exists), level = "debug")]
    pub fn drop_table(
        &mut self,
        name: &str,
        db_qualifier: Option<&str>,
        is_view: bool,
        if_exists: bool,
    ) -> Result<()> {
        if self.oom {
            return Err(HorizonError::OutOfMemory);
        }
        let db = self.drop_target(db_qualifier)?;
        let Some(table) = self.catalog.find_table(name, db).cloned() else {
            if if_exists {
                debug!("table does not exist; nothing to drop");
                return Ok(());
            }
            let what = if is_view { "view" } else { "table" };
            return Err(HorizonError::NoSuchObject(format!(
                "no such {what}: {}",
                display_name(db_qualifier, name)
            )));
        };

        if table.kind != TableKind::Virtual {
            if is_view && !table.is_view() {
                return Err(HorizonError::WrongObjectKind(format!(
                    "use DROP TABLE to delete table {}",
                    table.name
                )));
            }
            if !is_view && table.is_view() {
                return Err(HorizonError::WrongObjectKind(format!(
                    "use DROP VIEW to delete view {}",
                    table.name
                )));
            }
        }
        if is_protected_table(&table.name) {
            return Err(HorizonError::ProtectedObject(format!(
                "table {} may not be dropped",
                table.name
            )));
        }

        let db = table.db;
        let db_name = self.catalog.db_name(db).to_string();
        if !self.authorize(AuthAction::Delete, schema_table_name(db), None, &db_name)? {
            return Ok(());
        }
        let (action, arg2) = match (table.kind, db == TEMP_DB) {
            (TableKind::Virtual, _) => (AuthAction::DropVTable, table.module.as_deref()),
            (TableKind::View, true) => (AuthAction::DropTempView, None),
            (TableKind::View, false) => (AuthAction::DropView, None),
            (TableKind::Ordinary, true) => (AuthAction::DropTempTable, None),
            (TableKind::Ordinary, false) => (AuthAction::DropTable, None),
        };
        if !self.authorize(action, &table.name, arg2, &db_name)? {
            return Ok(());
        }

        if table.kind == TableKind::Ordinary {
            CatalogForeignKeys.drop_table(self, &table)?;
        }
        self.destroy_table_storage(&table)?;

        let schema = self.catalog.schema_mut(db)?;
        schema.remove_table(&table.name);
        if db != TEMP_DB {
            self.catalog.schema_mut(TEMP_DB)?.remove_triggers_on(&table.name);
        }
        debug!(db, table = %table.name, "dropped table");
        Ok(())
    }

    /// Delete the schema rows of `table` and everything attached to it,
    /// then free its trees.
    fn destroy_table_storage(&mut self, table: &TableDef) -> Result<()> {
        let db = table.db;
        let mut roots: Vec<u32> = self
            .catalog
            .schema(db)?
            .indexes_of(&table.name)
            .iter()
            .map(|ix| ix.root)
            .collect();
        if table.kind == TableKind::Ordinary {
            roots.push(table.root);
        }
        roots.retain(|&r| r >= 2);
        // Highest root first.
        roots.sort_unstable_by(|a, b| b.cmp(a));

        let has_temp_triggers = db != TEMP_DB
            && self
                .catalog
                .schema(TEMP_DB)?
                .triggers()
                .any(|t| t.table.eq_ignore_ascii_case(&table.name));

        let btree = self.btree(db)?;
        delete_rows(btree, |row| row.tbl_name.eq_ignore_ascii_case(&table.name))?;
        for root in roots {
            btree.drop_tree(root)?;
        }
        btree.bump_schema_cookie()?;

        if has_temp_triggers {
            let temp = self.btree(TEMP_DB)?;
            delete_rows(temp, |row| row.kind == "trigger" && row.tbl_name.eq_ignore_ascii_case(&table.name))?;
            temp.bump_schema_cookie()?;
        }
        Ok(())
    }

    /// `DROP TRIGGER [IF EXISTS] [db.]name`.
    #[tracing::instrument(skip_all, fields(name = %name, if_exists = if_exists), level = "debug")]
    pub fn drop_trigger(&mut self, name: &str, db_qualifier: Option<&str>, if_exists: bool) -> Result<()> {
        if self.oom {
            return Err(HorizonError::OutOfMemory);
        }
        let db = self.drop_target(db_qualifier)?;
        let Some(trigger) = self.catalog.find_trigger(name, db).cloned() else {
            if if_exists {
                return Ok(());
            }
            return Err(HorizonError::NoSuchObject(format!(
                "no such trigger: {}",
                display_name(db_qualifier, name)
            )));
        };

        let db = trigger.db;
        let db_name = self.catalog.db_name(db).to_string();
        if !self.authorize(AuthAction::Delete, schema_table_name(db), None, &db_name)? {
            return Ok(());
        }
        let action = if db == TEMP_DB {
            AuthAction::DropTempTrigger
        } else {
            AuthAction::DropTrigger
        };
        if !self.authorize(action, &trigger.name, Some(&trigger.table), &db_name)? {
            return Ok(());
        }

        let btree = self.btree(db)?;
        delete_rows(btree, |row| row.kind == "trigger" && row.name.eq_ignore_ascii_case(&trigger.name))?;
        btree.bump_schema_cookie()?;

        self.catalog.schema_mut(db)?.remove_trigger(&trigger.name);
        debug!(db, trigger = %trigger.name, "dropped trigger");
        Ok(())
    }
}
