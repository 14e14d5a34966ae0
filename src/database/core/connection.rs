//! Database connection management
//!
//! This module provides the connection abstraction shared by every backend
//! family, plus the SQLite implementation built on `rusqlite`.

use super::descriptor::BackendFamily;
#[cfg(feature = "mysql")]
use super::mysql_conn::MysqlConn;
use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::time::Duration;

/// Column metadata reported by schema introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Engine-specific declared type, e.g. `TEXT` or `varchar(64)`
    pub data_type: String,
    pub nullable: bool,
}

/// Secondary index metadata; columns are in index order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
}

/// Foreign key metadata, one entry per constrained column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyInfo {
    pub column: String,
    pub referred_table: String,
}

/// A live connection to a migrated database
///
/// Migrations, hooks and the repository only ever see this trait, so the same
/// migration set can be walked against every backend family.
pub trait SchemaConn {
    /// Family of the connected engine
    fn family(&self) -> BackendFamily;

    /// Execute one or more SQL statements
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Run a query returning a single integer in the first column of the first row
    fn query_i64(&mut self, sql: &str) -> Result<Option<i64>>;

    /// Check if a table exists
    fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// All user tables, sorted by name
    fn table_names(&mut self) -> Result<Vec<String>>;

    /// Columns of a table in declaration order
    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Secondary (non primary key) indexes of a table
    fn indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>>;

    /// Foreign keys declared on a table
    fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyInfo>>;

    /// The underlying SQLite connection, for hooks needing parameterized queries
    fn as_sqlite(&self) -> Option<&Connection> {
        None
    }

    /// The MySQL connection, for engine-level checks
    #[cfg(feature = "mysql")]
    fn as_mysql(&mut self) -> Option<&mut MysqlConn> {
        None
    }
}

/// SQLite connection wrapper
///
/// `SqliteConn` handles both file-based and in-memory databases with
/// consistent configuration and error handling.
pub struct SqliteConn {
    pub conn: Connection,
}

impl SqliteConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created. The file is
    /// created lazily by SQLite on first open.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| anyhow!("Failed to open database at '{}': {}", p, e))?,
            None => Connection::open_in_memory()
                .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?,
        };

        let db = SqliteConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None)
    }

    fn configure(&self) -> Result<()> {
        // Another test process may hold the file briefly while resetting
        self.conn
            .busy_timeout(Duration::from_secs(5))
            .map_err(|e| anyhow!("Failed to set busy timeout: {}", e))?;

        self.conn
            .execute("PRAGMA temp_store=MEMORY", [])
            .map_err(|e| anyhow!("Failed to set temp store: {}", e))?;

        Ok(())
    }
}

impl SchemaConn for SqliteConn {
    fn family(&self) -> BackendFamily {
        BackendFamily::Sqlite
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| anyhow!("Failed to execute SQL: {}", e))
    }

    fn query_i64(&mut self, sql: &str) -> Result<Option<i64>> {
        let value: Option<Option<i64>> = self
            .conn
            .query_row(sql, [], |row| row.get(0))
            .optional()
            .map_err(|e| anyhow!("Failed to run query: {}", e))?;
        Ok(value.flatten())
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: i32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to check table existence: {}", e))?;
        Ok(count > 0)
    }

    fn table_names(&mut self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type='table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| {
                let notnull: i64 = row.get(3)?;
                let pk: i64 = row.get(5)?;
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    nullable: notnull == 0 && pk == 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>> {
        let names: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut indexes = Vec::new();
        for name in names {
            // Implicit indexes backing UNIQUE/PRIMARY KEY constraints
            if name.starts_with("sqlite_autoindex_") {
                continue;
            }
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA index_info({})", quote_ident(&name)))?;
            let mut members = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            members.sort_by_key(|(seqno, _)| *seqno);
            indexes.push(IndexInfo {
                name,
                columns: members.into_iter().map(|(_, column)| column).collect(),
            });
        }
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(indexes)
    }

    fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
        let keys = stmt
            .query_map([], |row| {
                Ok(ForeignKeyInfo {
                    referred_table: row.get(2)?,
                    column: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn as_sqlite(&self) -> Option<&Connection> {
        Some(&self.conn)
    }
}

/// Fold `(index, column)` rows ordered by index name into index records
#[cfg_attr(not(any(feature = "mysql", feature = "postgres")), allow(dead_code))]
pub(crate) fn group_index_rows(rows: Vec<(String, String)>) -> Vec<IndexInfo> {
    let mut indexes: Vec<IndexInfo> = Vec::new();
    for (name, column) in rows {
        match indexes.last_mut() {
            Some(last) if last.name == name => last.columns.push(column),
            _ => indexes.push(IndexInfo {
                name,
                columns: vec![column],
            }),
        }
    }
    indexes
}

/// Quote an identifier for use in SQLite pragmas and queries
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
