//! MySQL connections (feature = "mysql")

use super::connection::{group_index_rows, ColumnInfo, ForeignKeyInfo, IndexInfo, SchemaConn};
use super::descriptor::{BackendFamily, ConnectionDescriptor};
use anyhow::{anyhow, Result};
use mysql::prelude::Queryable;
use mysql::{Conn, Opts};

pub struct MysqlConn {
    conn: Conn,
    database: String,
}

impl MysqlConn {
    pub fn connect(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let opts = Opts::from_url(&descriptor.connect_url())
            .map_err(|e| anyhow!("Invalid MySQL connection string {}: {}", descriptor, e))?;
        let conn = Conn::new(opts)
            .map_err(|e| anyhow!("Failed to connect to {}: {}", descriptor, e))?;
        Ok(MysqlConn {
            conn,
            database: descriptor.database.clone(),
        })
    }

    /// Storage engine of every table in the connected schema
    pub fn table_engines(&mut self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, Option<String>)> = self.conn.exec(
            "SELECT TABLE_NAME, ENGINE FROM information_schema.TABLES
             WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME",
            (self.database.clone(),),
        )?;
        Ok(rows
            .into_iter()
            .map(|(table, engine)| (table, engine.unwrap_or_default()))
            .collect())
    }
}

impl SchemaConn for MysqlConn {
    fn family(&self) -> BackendFamily {
        BackendFamily::Mysql
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn
            .query_drop(sql)
            .map_err(|e| anyhow!("Failed to execute SQL: {}", e))
    }

    fn query_i64(&mut self, sql: &str) -> Result<Option<i64>> {
        let value: Option<Option<i64>> = self
            .conn
            .query_first(sql)
            .map_err(|e| anyhow!("Failed to run query: {}", e))?;
        Ok(value.flatten())
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: Option<i64> = self.conn.exec_first(
            "SELECT COUNT(*) FROM information_schema.TABLES
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
            (self.database.clone(), table.to_string()),
        )?;
        Ok(count.unwrap_or(0) > 0)
    }

    fn table_names(&mut self) -> Result<Vec<String>> {
        Ok(self
            .table_engines()?
            .into_iter()
            .map(|(table, _)| table)
            .collect())
    }

    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows: Vec<(String, String, String)> = self.conn.exec(
            "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE FROM information_schema.COLUMNS
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
            (self.database.clone(), table.to_string()),
        )?;
        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable)| ColumnInfo {
                name,
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
            })
            .collect())
    }

    fn indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>> {
        let rows: Vec<(String, String)> = self.conn.exec(
            "SELECT INDEX_NAME, COLUMN_NAME FROM information_schema.STATISTICS
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND INDEX_NAME != 'PRIMARY'
             ORDER BY INDEX_NAME, SEQ_IN_INDEX",
            (self.database.clone(), table.to_string()),
        )?;
        Ok(group_index_rows(rows))
    }

    fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let rows: Vec<(String, String)> = self.conn.exec(
            "SELECT COLUMN_NAME, REFERENCED_TABLE_NAME FROM information_schema.KEY_COLUMN_USAGE
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL",
            (self.database.clone(), table.to_string()),
        )?;
        Ok(rows
            .into_iter()
            .map(|(column, referred_table)| ForeignKeyInfo {
                column,
                referred_table,
            })
            .collect())
    }

    fn as_mysql(&mut self) -> Option<&mut MysqlConn> {
        Some(self)
    }
}
