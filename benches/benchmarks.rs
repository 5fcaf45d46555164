use criterion::{criterion_group, criterion_main, Criterion};
use horizon_storage::{BtreePayload, Config, Connection, InsertFlags, TreeKind, Value, MAIN_DB};
use tempfile::TempDir;

fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert_1000_rows", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            let conn = Connection::open(dir.path().join("bench.hdb"), Config::default()).unwrap();
            let mut ctx = conn.lock().unwrap();
            ctx.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, value REAL)").unwrap();
            for i in 0..1000 {
                ctx.insert_row(
                    MAIN_DB,
                    "t",
                    None,
                    vec![Value::Null, Value::Text(format!("name_{i}")), Value::Real(i as f64 + 0.5)],
                )
                .unwrap();
            }
        });
    });
}

fn bench_append_cells(c: &mut Criterion) {
    c.bench_function("append_10000_cells", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory(Config::default()).unwrap();
            let mut ctx = conn.lock().unwrap();
            let btree = ctx.btree(MAIN_DB).unwrap();
            let root = btree.create_tree(TreeKind::Table).unwrap();
            let cur = btree.open_cursor(root, TreeKind::Table, true).unwrap();
            for rowid in 1..=10_000i64 {
                let payload = BtreePayload::row(rowid, vec![7u8; 64]);
                btree.insert(cur, &payload, InsertFlags::APPEND, -1).unwrap();
            }
            btree.close_cursor(cur);
        });
    });
}

fn bench_cursor_scan(c: &mut Criterion) {
    let conn = Connection::open_in_memory(Config::default()).unwrap();
    let mut ctx = conn.lock().unwrap();
    ctx.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, value REAL)").unwrap();
    for i in 0..1000 {
        ctx.insert_row(
            MAIN_DB,
            "t",
            None,
            vec![Value::Null, Value::Text(format!("name_{i}")), Value::Real(i as f64 + 0.5)],
        )
        .unwrap();
    }

    c.bench_function("scan_1000_rows", |b| {
        b.iter(|| {
            let rows = ctx.scan_rows(MAIN_DB, "t").unwrap();
            assert_eq!(rows.len(), 1000);
        });
    });
}

criterion_group!(benches, bench_insert, bench_append_cells, bench_cursor_scan);
criterion_main!(benches);
