//! Version tracking table
//!
//! The current schema version of each repository is stored in the migrated
//! database itself, one row per repository id. The table definition sticks to
//! types every supported family understands.

use super::Version;
use crate::database::SchemaConn;
use anyhow::{anyhow, Result};

/// Name of the tracking table
pub const VERSION_TABLE: &str = "migrate_version";

/// SQL for creating the tracking table
const CREATE_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS migrate_version (
        repository_id VARCHAR(250) NOT NULL PRIMARY KEY,
        repository_path TEXT,
        version BIGINT NOT NULL
    );
"#;

/// Tracking state of one repository in a database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// No tracking row (fresh database)
    Untracked,

    /// The repository is at this version
    At(Version),
}

/// Reads and writes one repository's row in the tracking table
pub struct VersionTable<'a> {
    repository_id: &'a str,
    repository_path: &'a str,
}

impl<'a> VersionTable<'a> {
    pub fn new(repository_id: &'a str, repository_path: &'a str) -> Self {
        VersionTable {
            repository_id,
            repository_path,
        }
    }

    /// Current tracking state
    pub fn status(&self, conn: &mut dyn SchemaConn) -> Result<TrackingStatus> {
        if !conn.table_exists(VERSION_TABLE)? {
            return Ok(TrackingStatus::Untracked);
        }

        let version = conn.query_i64(&format!(
            "SELECT version FROM {} WHERE repository_id = {}",
            VERSION_TABLE,
            quote_literal(self.repository_id)
        ))?;

        match version {
            None => Ok(TrackingStatus::Untracked),
            Some(v) => Version::try_from(v)
                .map(TrackingStatus::At)
                .map_err(|_| anyhow!("Invalid version {} in {}", v, VERSION_TABLE)),
        }
    }

    /// Record `version` as current, creating the table on first use
    pub fn set(&self, conn: &mut dyn SchemaConn, version: Version) -> Result<()> {
        let id = quote_literal(self.repository_id);
        let sql = format!(
            "{create}
            DELETE FROM {table} WHERE repository_id = {id};
            INSERT INTO {table} (repository_id, repository_path, version) VALUES ({id}, {path}, {version});",
            create = CREATE_VERSION_TABLE,
            table = VERSION_TABLE,
            id = id,
            path = quote_literal(self.repository_path),
            version = version,
        );
        conn.execute_batch(&sql)
            .map_err(|e| anyhow!("Failed to record version {}: {}", version, e))
    }
}

/// Quote a string literal for SQL shared by all families
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteConn;

    #[test]
    fn test_untracked_database() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        let table = VersionTable::new("nova", "migrate_repo");
        assert_eq!(table.status(&mut conn).unwrap(), TrackingStatus::Untracked);
    }

    #[test]
    fn test_set_and_read_version() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        let table = VersionTable::new("nova", "migrate_repo");

        table.set(&mut conn, 215).unwrap();
        assert_eq!(table.status(&mut conn).unwrap(), TrackingStatus::At(215));

        table.set(&mut conn, 216).unwrap();
        assert_eq!(table.status(&mut conn).unwrap(), TrackingStatus::At(216));
        assert_eq!(
            conn.query_i64("SELECT COUNT(*) FROM migrate_version").unwrap(),
            Some(1)
        );
    }

    #[test]
    fn test_repositories_are_independent() {
        let mut conn = SqliteConn::open_in_memory().unwrap();
        let main = VersionTable::new("main", "repo");
        let other = VersionTable::new("it's other", "repo");

        main.set(&mut conn, 3).unwrap();
        assert_eq!(other.status(&mut conn).unwrap(), TrackingStatus::Untracked);

        other.set(&mut conn, 9).unwrap();
        main.set(&mut conn, 4).unwrap();
        assert_eq!(main.status(&mut conn).unwrap(), TrackingStatus::At(4));
        assert_eq!(other.status(&mut conn).unwrap(), TrackingStatus::At(9));
    }
}
