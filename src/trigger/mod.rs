//! Trigger hooks used by the row-delete generator.
//!
//! The engine does not compile trigger bodies. A trigger becomes runnable
//! when the application registers a [`TriggerProgram`] under its name with
//! [`ConnectionContext::register_trigger_program`]. The catalog still
//! decides which triggers apply and which `OLD` columns they read.

use std::sync::Arc;

use tracing::trace;

use crate::catalog::{name_key, TableDef, TriggerDef};
use crate::connection::ConnectionContext;
use crate::dml::{mask_bit, OldRow};
use crate::error::Result;
use crate::sql::ddl::{TriggerEvent, TriggerTiming};

/// Compiled form of a trigger body.
pub type TriggerProgram =
    Arc<dyn Fn(&mut ConnectionContext, &TriggerDef, &OldRow<'_>) -> Result<()> + Send + Sync>;

/// The trigger subsystem as seen by row operations.
pub trait TriggerHooks {
    /// Whether any trigger exists on `table` for `event`.
    fn has_triggers(&self, ctx: &ConnectionContext, table: &TableDef, event: TriggerEvent) -> bool;

    /// Columns of the old row read by the triggers for `event` at `timing`.
    fn column_mask(
        &self,
        ctx: &ConnectionContext,
        table: &TableDef,
        event: TriggerEvent,
        timing: TriggerTiming,
    ) -> u32;

    /// Run the triggers for `event` at `timing`. Returns whether any
    /// program ran.
    fn fire(
        &self,
        ctx: &mut ConnectionContext,
        table: &TableDef,
        event: TriggerEvent,
        timing: TriggerTiming,
        old: &OldRow<'_>,
    ) -> Result<bool>;
}

/// Triggers from the catalog, run through registered programs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogTriggers;

fn matching(ctx: &ConnectionContext, table: &TableDef, event: TriggerEvent, timing: Option<TriggerTiming>) -> Vec<TriggerDef> {
    ctx.catalog
        .triggers_for(table.db, &table.name)
        .into_iter()
        .filter(|t| t.event == event && timing.map_or(true, |tm| t.timing == tm))
        .cloned()
        .collect()
}

impl TriggerHooks for CatalogTriggers {
    fn has_triggers(&self, ctx: &ConnectionContext, table: &TableDef, event: TriggerEvent) -> bool {
        !matching(ctx, table, event, None).is_empty()
    }

    fn column_mask(
        &self,
        ctx: &ConnectionContext,
        table: &TableDef,
        event: TriggerEvent,
        timing: TriggerTiming,
    ) -> u32 {
        let mut mask = 0u32;
        for trigger in matching(ctx, table, event, Some(timing)) {
            if trigger.old_star {
                return u32::MAX;
            }
            // OLD.rowid is not a column; it always lives in the base register.
            for i in trigger.old_columns.iter().filter_map(|name| table.column_index(name)) {
                mask |= mask_bit(i);
            }
        }
        mask
    }

    fn fire(
        &self,
        ctx: &mut ConnectionContext,
        table: &TableDef,
        event: TriggerEvent,
        timing: TriggerTiming,
        old: &OldRow<'_>,
    ) -> Result<bool> {
        let mut ran = false;
        for trigger in matching(ctx, table, event, Some(timing)) {
            let key = name_key(&trigger.name);
            if ctx.firing.contains(&key) {
                trace!(trigger = %trigger.name, "recursive firing suppressed");
                continue;
            }
            let Some(program) = ctx.trigger_programs.get(&key).cloned() else {
                continue;
            };
            trace!(trigger = %trigger.name, rowid = old.rowid(), "firing trigger");
            ctx.firing.push(key);
            let out = program(ctx, &trigger, old);
            ctx.firing.pop();
            out?;
            ran = true;
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MAIN_DB;
    use crate::connection::{Config, Connection};
    use crate::types::Value;

    fn setup(ddl: &[&str]) -> Connection {
        let conn = Connection::open_in_memory(Config::default()).unwrap();
        {
            let mut ctx = conn.lock().unwrap();
            for sql in ddl {
                ctx.execute_ddl(sql).unwrap();
            }
        }
        conn
    }

    #[test]
    fn mask_follows_old_references() {
        let conn = setup(&[
            "CREATE TABLE t(a, b, c)",
            "CREATE TRIGGER t1 BEFORE DELETE ON t BEGIN SELECT OLD.c; END",
            "CREATE TRIGGER t2 AFTER DELETE ON t WHEN OLD.a > 0 BEGIN SELECT OLD.rowid; END",
        ]);
        let ctx = conn.lock().unwrap();
        let table = ctx.catalog().find_table("t", None).unwrap().clone();
        let hooks = CatalogTriggers;
        assert_eq!(hooks.column_mask(&ctx, &table, TriggerEvent::Delete, TriggerTiming::Before), 0b100);
        assert_eq!(hooks.column_mask(&ctx, &table, TriggerEvent::Delete, TriggerTiming::After), 0b001);
        assert_eq!(hooks.column_mask(&ctx, &table, TriggerEvent::Insert, TriggerTiming::After), 0);
        assert!(hooks.has_triggers(&ctx, &table, TriggerEvent::Delete));
        assert!(!hooks.has_triggers(&ctx, &table, TriggerEvent::Update));
    }

    #[test]
    fn old_star_and_high_columns_select_everything() {
        let columns: Vec<String> = (0..40).map(|i| format!("c{i}")).collect();
        let create = format!("CREATE TABLE wide({})", columns.join(", "));
        let conn = setup(&[
            &create,
            "CREATE TRIGGER w BEFORE DELETE ON wide BEGIN SELECT OLD.c35; END",
            "CREATE TABLE s(a, b)",
            "CREATE TRIGGER s1 AFTER DELETE ON s BEGIN SELECT OLD.*; END",
        ]);
        let ctx = conn.lock().unwrap();
        let hooks = CatalogTriggers;
        let wide = ctx.catalog().find_table("wide", None).unwrap().clone();
        let s = ctx.catalog().find_table("s", None).unwrap().clone();
        assert_eq!(hooks.column_mask(&ctx, &wide, TriggerEvent::Delete, TriggerTiming::Before), u32::MAX);
        assert_eq!(hooks.column_mask(&ctx, &s, TriggerEvent::Delete, TriggerTiming::After), u32::MAX);
    }

    #[test]
    fn unregistered_triggers_do_not_run_and_recursion_is_suppressed() {
        let conn = setup(&[
            "CREATE TABLE t(a)",
            "CREATE TRIGGER again AFTER DELETE ON t BEGIN DELETE FROM t; END",
        ]);
        let mut ctx = conn.lock().unwrap();
        for _ in 0..3 {
            ctx.insert_row(MAIN_DB, "t", None, vec![Value::Integer(1)]).unwrap();
        }
        // Without a program, deleting fires nothing.
        assert!(ctx.delete_row(MAIN_DB, "t", 1).unwrap());

        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        ctx.register_trigger_program(
            "AGAIN",
            Arc::new(move |ctx: &mut ConnectionContext, _: &TriggerDef, old: &OldRow<'_>| -> Result<()> {
                seen.lock().unwrap().push(old.rowid());
                // Deleting from inside the trigger must not fire it again.
                ctx.delete_row(MAIN_DB, "t", old.rowid() + 1)?;
                Ok(())
            }),
        );
        assert!(ctx.delete_row(MAIN_DB, "t", 2).unwrap());
        assert_eq!(*calls.lock().unwrap(), vec![2]);
        assert!(ctx.scan_rows(MAIN_DB, "t").unwrap().is_empty());
    }
}
