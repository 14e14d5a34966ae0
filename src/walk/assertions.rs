//! Schema assertions for hook authors
//!
//! Thin checks over [`SchemaConn`] introspection, returning `anyhow` errors so
//! they compose with `?` inside check and post-downgrade hooks:
//!
//! ```rust,ignore
//! hooks.on_check(245, |conn, _| {
//!     assert_column_exists(conn, "compute_nodes", "metrics")?;
//!     assert_index_members(conn, "compute_nodes", "compute_nodes_host_idx", &["host", "id"])
//! })?;
//! ```

use crate::database::{ColumnInfo, SchemaConn};
use anyhow::{anyhow, bail, ensure, Result};

fn find_column(conn: &mut dyn SchemaConn, table: &str, column: &str) -> Result<Option<ColumnInfo>> {
    Ok(conn
        .columns(table)?
        .into_iter()
        .find(|c| c.name.eq_ignore_ascii_case(column)))
}

pub fn assert_table_exists(conn: &mut dyn SchemaConn, table: &str) -> Result<()> {
    ensure!(conn.table_exists(table)?, "table {} does not exist", table);
    Ok(())
}

pub fn assert_table_not_exists(conn: &mut dyn SchemaConn, table: &str) -> Result<()> {
    ensure!(!conn.table_exists(table)?, "table {} still exists", table);
    Ok(())
}

pub fn assert_column_exists(conn: &mut dyn SchemaConn, table: &str, column: &str) -> Result<()> {
    assert_table_exists(conn, table)?;
    ensure!(
        find_column(conn, table, column)?.is_some(),
        "column {}.{} does not exist",
        table,
        column
    );
    Ok(())
}

pub fn assert_column_not_exists(conn: &mut dyn SchemaConn, table: &str, column: &str) -> Result<()> {
    ensure!(
        find_column(conn, table, column)?.is_none(),
        "column {}.{} still exists",
        table,
        column
    );
    Ok(())
}

pub fn assert_column_nullable(
    conn: &mut dyn SchemaConn,
    table: &str,
    column: &str,
    nullable: bool,
) -> Result<()> {
    let info = find_column(conn, table, column)?
        .ok_or_else(|| anyhow!("column {}.{} does not exist", table, column))?;
    if info.nullable != nullable {
        bail!(
            "column {}.{} is {}nullable",
            table,
            column,
            if info.nullable { "" } else { "not " }
        );
    }
    Ok(())
}

pub fn assert_index_exists(conn: &mut dyn SchemaConn, table: &str, index: &str) -> Result<()> {
    let indexes = conn.indexes(table)?;
    ensure!(
        indexes.iter().any(|i| i.name == index),
        "index {} does not exist on {}",
        index,
        table
    );
    Ok(())
}

/// The index exists and covers exactly `members`, in any order
pub fn assert_index_members(
    conn: &mut dyn SchemaConn,
    table: &str,
    index: &str,
    members: &[&str],
) -> Result<()> {
    let indexes = conn.indexes(table)?;
    let found = indexes
        .iter()
        .find(|i| i.name == index)
        .ok_or_else(|| anyhow!("index {} does not exist on {}", index, table))?;

    let mut actual: Vec<String> = found.columns.iter().map(|c| c.to_lowercase()).collect();
    let mut expected: Vec<String> = members.iter().map(|c| c.to_lowercase()).collect();
    actual.sort();
    expected.sort();
    ensure!(
        actual == expected,
        "index {} on {} covers {:?}, expected {:?}",
        index,
        table,
        found.columns,
        members
    );
    Ok(())
}

/// Number of foreign keys declared on `table.column`
pub fn assert_foreign_key_count(
    conn: &mut dyn SchemaConn,
    table: &str,
    column: &str,
    expected: usize,
) -> Result<()> {
    let count = conn
        .foreign_keys(table)?
        .iter()
        .filter(|fk| fk.column.eq_ignore_ascii_case(column))
        .count();
    ensure!(
        count == expected,
        "{}.{} has {} foreign keys, expected {}",
        table,
        column,
        count,
        expected
    );
    Ok(())
}
