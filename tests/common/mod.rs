#![allow(dead_code)]

use schemawalk::database::{ColumnInfo, ForeignKeyInfo, IndexInfo};
use schemawalk::{
    assert_column_exists, assert_column_not_exists, assert_foreign_key_count,
    assert_index_members, assert_table_not_exists, DatabaseSection, HookRegistry,
    MigrationRepository, SchemaConn, WalkConfig,
};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber; `RUST_LOG=schemawalk=debug` shows walk transitions
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("inventory")
}

pub fn inventory_repository() -> MigrationRepository {
    MigrationRepository::from_scripts("inventory", &fixtures_dir(), 0).unwrap()
}

/// Check and data hooks for every fixture migration
pub fn inventory_hooks() -> HookRegistry {
    let mut hooks = HookRegistry::new();
    hooks
        .on_check(1, |conn, _| assert_column_exists(conn, "hosts", "hostname"))
        .unwrap()
        .on_pre_upgrade(2, |conn| {
            conn.execute_batch(
                "INSERT INTO hosts (id, hostname) VALUES (1, 'compute-1'), (2, 'compute-2')",
            )?;
            Ok(json!({"hosts": 2}))
        })
        .unwrap()
        .on_check(2, |conn, data| {
            assert_column_exists(conn, "hosts", "metrics")?;
            assert_index_members(conn, "hosts", "hosts_hostname_idx", &["id", "hostname"])?;
            let hosts = conn.query_i64("SELECT COUNT(*) FROM hosts")?;
            anyhow::ensure!(
                hosts == data["hosts"].as_i64(),
                "expected {} hosts to survive, found {:?}",
                data["hosts"],
                hosts
            );
            Ok(())
        })
        .unwrap()
        .on_post_downgrade(2, |conn, _| assert_column_not_exists(conn, "hosts", "metrics"))
        .unwrap()
        .on_check(3, |conn, _| assert_foreign_key_count(conn, "host_faults", "host_id", 1))
        .unwrap()
        .on_post_downgrade(3, |conn, _| assert_table_not_exists(conn, "host_faults"))
        .unwrap()
        .on_check(4, |_, _| Ok(()))
        .unwrap();
    hooks
}

/// Write a configuration file walking a single file-based SQLite backend
pub fn sqlite_config(dir: &Path, snake_walk: bool, downgrade: bool) -> WalkConfig {
    let db = dir.join("inventory.db");
    let contents = format!(
        "lock_path = \"{locks}\"\n\
         [migration_dbs]\n\
         sqlite = \"sqlite:///{db}\"\n\
         [unit_tests]\n\
         sqlite = \"sqlite://\"\n\
         [walk_style]\n\
         snake_walk = {snake_walk}\n\
         downgrade = {downgrade}\n",
        locks = dir.join("locks").display(),
        db = db.display(),
        snake_walk = snake_walk,
        downgrade = downgrade,
    );
    let path = dir.join("test_migrations.toml");
    fs::write(&path, contents).unwrap();
    WalkConfig::load(&path, DatabaseSection::MigrationDbs).unwrap()
}

/// Everything introspection can observe about one table
#[derive(Debug, PartialEq, Eq)]
pub struct TableShape {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

/// Shape of every table, sorted by table name
pub fn schema_snapshot(conn: &mut dyn SchemaConn) -> Vec<TableShape> {
    conn.table_names()
        .unwrap()
        .into_iter()
        .map(|name| TableShape {
            columns: conn.columns(&name).unwrap(),
            indexes: conn.indexes(&name).unwrap(),
            foreign_keys: conn.foreign_keys(&name).unwrap(),
            name,
        })
        .collect()
}
