#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! schemawalk - migration walk and verification engine
//!
//! schemawalk proves that an ordered set of database schema migrations can be
//! applied forward and, where supported, reversed against real database
//! backends, one version at a time, with optional data checks around every
//! step. It is a library meant to be driven from `cargo test` integration
//! tests.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (default) | SQLite backends | `rusqlite` |
//! | `mysql` | MySQL backends and the InnoDB sanity check | `mysql` |
//! | `postgres` | PostgreSQL backends | `postgres` |
//! | `full` | All of the above | |
//!
//! MySQL and PostgreSQL databases are dropped and created through the `mysql`
//! and `psql` command-line clients, which must be on `PATH` for those walks.
//!
//! # Architecture
//!
//! - **[`config`]**: TOML configuration with environment overrides
//! - **[`database`]**: connections, the backend registry and lifecycle management
//! - **[`migration`]**: migration trait, repository and version tracking
//! - **[`walk`]**: hooks, schema assertions, the walk orchestrator and reports
//! - **[`harness`]**: ready-made scenarios over configured and CI backends
//! - **[`error`]**: error taxonomy
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use schemawalk::{
//!     assert_column_exists, DatabaseSection, FnMigration, HookRegistry, MigrationHarness,
//!     MigrationRepository, SkipSet, WalkConfig,
//! };
//!
//! let repository = MigrationRepository::new(
//!     "inventory",
//!     0,
//!     vec![FnMigration::sql(
//!         1,
//!         "create hosts",
//!         "CREATE TABLE hosts (id INTEGER PRIMARY KEY, name TEXT)",
//!         Some("DROP TABLE hosts"),
//!     )
//!     .boxed()],
//! )?;
//!
//! let mut hooks = HookRegistry::new();
//! hooks.on_check(1, |conn, _| assert_column_exists(conn, "hosts", "name"))?;
//!
//! let config = WalkConfig::from_env(DatabaseSection::MigrationDbs)?;
//! let mut harness = MigrationHarness::new(config, repository, hooks, SkipSet::new())?;
//!
//! let run = harness.walk_configured_backends();
//! assert!(run.is_success(), "{}", run.summary());
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod harness;
pub mod migration;
pub mod walk;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{DatabaseSection, WalkConfig, WalkStyle};

// =============================================================================
// Errors
// =============================================================================

pub use error::{RepositoryError, WalkError};

// =============================================================================
// Database
// =============================================================================

pub use database::{
    BackendFamily, ConnectionDescriptor, ConnectionRegistry, LifecycleManager, SchemaConn,
    SqliteConn,
};

// =============================================================================
// Migrations
// =============================================================================

pub use migration::{FnMigration, Migration, MigrationRepository, ScriptMigration, Version};

// =============================================================================
// Walks
// =============================================================================

pub use walk::{
    assert_column_exists, assert_column_not_exists, assert_column_nullable,
    assert_foreign_key_count, assert_index_exists, assert_index_members, assert_table_exists,
    assert_table_not_exists, Hook, HookRegistry, RunReport, SkipSet, WalkPlan, WalkReport,
    WalkTarget, Walker,
};

pub use harness::{MigrationHarness, ScenarioOutcome};
