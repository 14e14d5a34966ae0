//! Migration repository
//!
//! A migration repository is an ordered, contiguous set of [`Migration`]s plus
//! a version tracking table stored inside the migrated database. The walk
//! orchestrator only talks to [`MigrationRepository`]; migrations can come
//! from Rust code ([`FnMigration`] or custom trait impls) or from a directory
//! of SQL scripts ([`load_scripts`]).

mod repository;
mod script;
mod version_table;

pub use repository::MigrationRepository;
pub use script::{load_scripts, missing_downgrades, ScriptMigration};
pub use version_table::{TrackingStatus, VersionTable, VERSION_TABLE};

use crate::database::SchemaConn;
use anyhow::{anyhow, Result};

/// Schema version number
pub type Version = u32;

/// One schema change
///
/// Implementations that can be reverted override both [`Migration::downgrade`]
/// and [`Migration::supports_downgrade`]; the repository checks the latter
/// before touching the database.
pub trait Migration: Send + Sync {
    fn version(&self) -> Version;

    /// Short human-readable description
    fn name(&self) -> &str;

    fn upgrade(&self, conn: &mut dyn SchemaConn) -> Result<()>;

    /// Revert this migration, leaving the schema at `version() - 1`
    fn downgrade(&self, _conn: &mut dyn SchemaConn) -> Result<()> {
        Err(anyhow!("migration {} does not support downgrade", self.version()))
    }

    fn supports_downgrade(&self) -> bool {
        false
    }
}

type MigrationFn = Box<dyn Fn(&mut dyn SchemaConn) -> Result<()> + Send + Sync>;

/// Migration built from closures
///
/// ```rust,ignore
/// let m = FnMigration::new(1, "create users", |conn| {
///     conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY)")
/// })
/// .with_downgrade(|conn| conn.execute_batch("DROP TABLE users"));
/// ```
pub struct FnMigration {
    version: Version,
    name: String,
    up: MigrationFn,
    down: Option<MigrationFn>,
}

impl FnMigration {
    pub fn new<F>(version: Version, name: &str, up: F) -> Self
    where
        F: Fn(&mut dyn SchemaConn) -> Result<()> + Send + Sync + 'static,
    {
        FnMigration {
            version,
            name: name.to_string(),
            up: Box::new(up),
            down: None,
        }
    }

    /// Migration running plain SQL in each direction
    pub fn sql(version: Version, name: &str, up: &str, down: Option<&str>) -> Self {
        let up = up.to_string();
        let migration = Self::new(version, name, move |conn| conn.execute_batch(&up));
        match down {
            Some(down) => {
                let down = down.to_string();
                migration.with_downgrade(move |conn| conn.execute_batch(&down))
            }
            None => migration,
        }
    }

    pub fn with_downgrade<F>(mut self, down: F) -> Self
    where
        F: Fn(&mut dyn SchemaConn) -> Result<()> + Send + Sync + 'static,
    {
        self.down = Some(Box::new(down));
        self
    }

    pub fn boxed(self) -> Box<dyn Migration> {
        Box::new(self)
    }
}

impl Migration for FnMigration {
    fn version(&self) -> Version {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn upgrade(&self, conn: &mut dyn SchemaConn) -> Result<()> {
        (self.up)(conn)
    }

    fn downgrade(&self, conn: &mut dyn SchemaConn) -> Result<()> {
        match &self.down {
            Some(down) => down(conn),
            None => Err(anyhow!(
                "migration {} does not support downgrade",
                self.version
            )),
        }
    }

    fn supports_downgrade(&self) -> bool {
        self.down.is_some()
    }
}

impl std::fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMigration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("reversible", &self.down.is_some())
            .finish()
    }
}
