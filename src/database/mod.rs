//! Database module
//!
//! This module provides all backend functionality for schemawalk, organized into:
//!
//! - **core**: Connection descriptors and live connections (SQLite, MySQL, PostgreSQL)
//! - **registry**: Named, lazily-connected handles for every configured backend
//! - **lifecycle**: Bootstrapping and resetting backend databases under family locks
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/            # Foundation
//! │   ├── descriptor   # Connection strings and backend families
//! │   ├── connection   # SchemaConn trait + SQLite implementation
//! │   ├── mysql_conn   # MySQL implementation (feature = "mysql")
//! │   └── postgres_conn# PostgreSQL implementation (feature = "postgres")
//! │
//! ├── registry         # name -> Handle
//! │
//! └── lifecycle/       # Clean-slate backends
//!     ├── lock         # Per-family file locks
//!     ├── command      # Admin command execution and validation
//!     └── presence     # Optional backend detection
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use schemawalk::database::{ConnectionRegistry, LifecycleManager};
//!
//! let mut registry = ConnectionRegistry::from_databases(&config.databases)?;
//! let lifecycle = LifecycleManager::new(&config.lock_dir());
//!
//! lifecycle.reset(&mut registry, "sqlite")?;
//! let conn = registry.get("sqlite")?.conn()?;
//! ```

pub mod core;
pub mod lifecycle;
pub mod registry;

// =============================================================================
// Connections
// =============================================================================

pub use core::{
    open_connection, BackendFamily, ColumnInfo, ConnectionDescriptor, ForeignKeyInfo, IndexInfo,
    SchemaConn, SqliteConn,
};

#[cfg(feature = "mysql")]
pub use core::MysqlConn;
#[cfg(feature = "postgres")]
pub use core::PostgresConn;

pub use registry::{ConnectionRegistry, Handle};

// =============================================================================
// Lifecycle
// =============================================================================

pub use lifecycle::{
    have_backend, have_mysql, have_postgresql, AdminCommand, CommandOutput, CommandRunner,
    FamilyLock, IdempotentSuccess, LifecycleManager, SystemCommandRunner, MYSQL_PRESENT_ENV,
    POSTGRESQL_PRESENT_ENV,
};
