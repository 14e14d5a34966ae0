//! PostgreSQL connections (feature = "postgres")

use super::connection::{group_index_rows, ColumnInfo, ForeignKeyInfo, IndexInfo, SchemaConn};
use super::descriptor::{BackendFamily, ConnectionDescriptor};
use anyhow::{anyhow, Result};
use postgres::{Client, NoTls};

pub struct PostgresConn {
    client: Client,
}

impl PostgresConn {
    pub fn connect(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let client = Client::connect(&descriptor.connect_url(), NoTls)
            .map_err(|e| anyhow!("Failed to connect to {}: {}", descriptor, e))?;
        Ok(PostgresConn { client })
    }

    fn string_pairs(&mut self, sql: &str, table: &str) -> Result<Vec<(String, String)>> {
        let rows = self.client.query(sql, &[&table])?;
        rows.iter()
            .map(|row| Ok((row.try_get(0)?, row.try_get(1)?)))
            .collect()
    }
}

impl SchemaConn for PostgresConn {
    fn family(&self) -> BackendFamily {
        BackendFamily::Postgresql
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .map_err(|e| anyhow!("Failed to execute SQL: {}", e))
    }

    fn query_i64(&mut self, sql: &str) -> Result<Option<i64>> {
        let rows = self
            .client
            .query(sql, &[])
            .map_err(|e| anyhow!("Failed to run query: {}", e))?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<_, Option<i64>>(0)?),
            None => Ok(None),
        }
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let row = self.client.query_one(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name = $1",
            &[&table],
        )?;
        let count: i64 = row.try_get(0)?;
        Ok(count > 0)
    }

    fn table_names(&mut self) -> Result<Vec<String>> {
        let rows = self.client.query(
            "SELECT table_name::text FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
             ORDER BY table_name",
            &[],
        )?;
        rows.iter()
            .map(|row| Ok(row.try_get::<_, String>(0)?))
            .collect()
    }

    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self.client.query(
            "SELECT column_name::text, data_type::text, is_nullable::text
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
            &[&table],
        )?;
        rows.iter()
            .map(|row| {
                let nullable: String = row.try_get(2)?;
                Ok(ColumnInfo {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                })
            })
            .collect()
    }

    fn indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>> {
        let rows = self.string_pairs(
            "SELECT i.relname::text, a.attname::text
             FROM pg_class t
             JOIN pg_index ix ON t.oid = ix.indrelid
             JOIN pg_class i ON i.oid = ix.indexrelid
             JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) ON true
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
             WHERE t.relname = $1 AND NOT ix.indisprimary
               AND t.relnamespace = current_schema()::text::regnamespace
             ORDER BY i.relname, k.ord",
            table,
        )?;
        Ok(group_index_rows(rows))
    }

    fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let rows = self.string_pairs(
            "SELECT kcu.column_name::text, ccu.table_name::text
             FROM information_schema.table_constraints tc
             JOIN information_schema.key_column_usage kcu
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
             JOIN information_schema.constraint_column_usage ccu
               ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
             WHERE tc.constraint_type = 'FOREIGN KEY'
               AND tc.table_schema = current_schema() AND tc.table_name = $1",
            table,
        )?;
        Ok(rows
            .into_iter()
            .map(|(column, referred_table)| ForeignKeyInfo {
                column,
                referred_table,
            })
            .collect())
    }
}
