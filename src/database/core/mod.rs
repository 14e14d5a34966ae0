//! Core database infrastructure
//!
//! This module provides the foundational database components used throughout schemawalk:
//! - `ConnectionDescriptor`/`BackendFamily`: parsed connection strings
//! - `SchemaConn`: the connection trait migrations and hooks run against
//! - `SqliteConn`, `MysqlConn`, `PostgresConn`: per-family connections

mod connection;
mod descriptor;
#[cfg(feature = "mysql")]
mod mysql_conn;
#[cfg(feature = "postgres")]
mod postgres_conn;

pub use connection::{ColumnInfo, ForeignKeyInfo, IndexInfo, SchemaConn, SqliteConn};
pub use descriptor::{BackendFamily, ConnectionDescriptor};
#[cfg(feature = "mysql")]
pub use mysql_conn::MysqlConn;
#[cfg(feature = "postgres")]
pub use postgres_conn::PostgresConn;

use anyhow::Result;

/// Open a live connection for a descriptor
///
/// Client/server families require the matching cargo feature; without it the
/// call fails with a setup error naming the feature.
pub fn open_connection(descriptor: &ConnectionDescriptor) -> Result<Box<dyn SchemaConn>> {
    match descriptor.family {
        BackendFamily::Sqlite => {
            let path = descriptor.sqlite_path().and_then(|p| p.to_str());
            Ok(Box::new(SqliteConn::open(path)?))
        }
        BackendFamily::Mysql => open_mysql(descriptor),
        BackendFamily::Postgresql => open_postgres(descriptor),
    }
}

#[cfg(feature = "mysql")]
fn open_mysql(descriptor: &ConnectionDescriptor) -> Result<Box<dyn SchemaConn>> {
    Ok(Box::new(MysqlConn::connect(descriptor)?))
}

#[cfg(not(feature = "mysql"))]
fn open_mysql(descriptor: &ConnectionDescriptor) -> Result<Box<dyn SchemaConn>> {
    Err(anyhow::anyhow!(
        "Cannot connect to {}: schemawalk was built without the `mysql` feature",
        descriptor
    ))
}

#[cfg(feature = "postgres")]
fn open_postgres(descriptor: &ConnectionDescriptor) -> Result<Box<dyn SchemaConn>> {
    Ok(Box::new(PostgresConn::connect(descriptor)?))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(descriptor: &ConnectionDescriptor) -> Result<Box<dyn SchemaConn>> {
    Err(anyhow::anyhow!(
        "Cannot connect to {}: schemawalk was built without the `postgres` feature",
        descriptor
    ))
}
