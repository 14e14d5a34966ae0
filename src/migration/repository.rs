//! Migration repository adapter
//!
//! Wraps an ordered migration set and exposes the version-range operations the
//! walk orchestrator drives: `latest`, `current`, `version_control`,
//! `upgrade` and `downgrade`.

use super::version_table::{TrackingStatus, VersionTable};
use super::{load_scripts, Migration, Version};
use crate::database::SchemaConn;
use crate::error::RepositoryError;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// An ordered, contiguous set of migrations
pub struct MigrationRepository {
    id: String,
    path: String,
    initial: Version,
    migrations: BTreeMap<Version, Box<dyn Migration>>,
}

impl MigrationRepository {
    /// Build a repository whose versions run contiguously from `initial + 1`
    pub fn new(
        id: &str,
        initial: Version,
        migrations: Vec<Box<dyn Migration>>,
    ) -> Result<Self, RepositoryError> {
        let mut by_version: BTreeMap<Version, Box<dyn Migration>> = BTreeMap::new();
        for migration in migrations {
            let version = migration.version();
            if by_version.insert(version, migration).is_some() {
                return Err(RepositoryError::Invalid(format!(
                    "duplicate migration version {}",
                    version
                )));
            }
        }

        let mut expected = initial.checked_add(1);
        for &version in by_version.keys() {
            if Some(version) != expected {
                return Err(RepositoryError::Invalid(format!(
                    "expected migration {} but found {}; versions must be contiguous from {}",
                    expected.map(|v| v.to_string()).unwrap_or_default(),
                    version,
                    initial.saturating_add(1)
                )));
            }
            expected = version.checked_add(1);
        }

        Ok(MigrationRepository {
            id: id.to_string(),
            path: id.to_string(),
            initial,
            migrations: by_version,
        })
    }

    /// Load `NNN_description.sql` scripts from a directory
    pub fn from_scripts(id: &str, dir: &Path, initial: Version) -> Result<Self, RepositoryError> {
        let repository = Self::new(id, initial, load_scripts(dir)?)?;
        Ok(repository.with_path(&dir.display().to_string()))
    }

    /// Path recorded in the tracking table next to the repository id
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Version of an untouched database
    pub fn initial(&self) -> Version {
        self.initial
    }

    pub fn latest(&self) -> Version {
        self.migrations
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.initial)
    }

    pub fn get(&self, version: Version) -> Option<&dyn Migration> {
        self.migrations.get(&version).map(|m| m.as_ref())
    }

    fn table(&self) -> VersionTable<'_> {
        VersionTable::new(&self.id, &self.path)
    }

    fn check_range(&self, target: Version) -> Result<(), RepositoryError> {
        if target < self.initial || target > self.latest() {
            return Err(RepositoryError::OutOfRange {
                target,
                initial: self.initial,
                latest: self.latest(),
            });
        }
        Ok(())
    }

    /// Current version of the database; untracked databases are at `initial`
    pub fn current(&self, conn: &mut dyn SchemaConn) -> Result<Version, RepositoryError> {
        match self.table().status(conn).map_err(RepositoryError::Tracking)? {
            TrackingStatus::Untracked => Ok(self.initial),
            TrackingStatus::At(version) => Ok(version),
        }
    }

    /// Place the database under version control at `version` without running migrations
    pub fn version_control(
        &self,
        conn: &mut dyn SchemaConn,
        version: Version,
    ) -> Result<(), RepositoryError> {
        self.check_range(version)?;
        info!("placing {} under version control at {}", self.id, version);
        self.table()
            .set(conn, version)
            .map_err(RepositoryError::Tracking)
    }

    /// Apply every migration in `(current, target]`
    pub fn upgrade(&self, conn: &mut dyn SchemaConn, target: Version) -> Result<(), RepositoryError> {
        self.check_range(target)?;
        let current = self.current(conn)?;
        if target < current {
            return Err(RepositoryError::Invalid(format!(
                "cannot upgrade from {} to lower version {}",
                current, target
            )));
        }

        for version in current + 1..=target {
            let migration = self.migration(version)?;
            debug!("upgrading to {} ({})", version, migration.name());
            migration
                .upgrade(conn)
                .map_err(|cause| RepositoryError::Failed { version, cause })?;
            self.table()
                .set(conn, version)
                .map_err(RepositoryError::Tracking)?;
        }
        Ok(())
    }

    /// Revert every migration in `(target, current]`
    ///
    /// Every migration in the range is checked for downgrade support first; if
    /// any lacks it, [`RepositoryError::Irreversible`] is returned and the
    /// database is left untouched.
    pub fn downgrade(
        &self,
        conn: &mut dyn SchemaConn,
        target: Version,
    ) -> Result<(), RepositoryError> {
        self.check_range(target)?;
        let current = self.current(conn)?;
        if target > current {
            return Err(RepositoryError::Invalid(format!(
                "cannot downgrade from {} to higher version {}",
                current, target
            )));
        }

        for version in (target + 1..=current).rev() {
            if !self.migration(version)?.supports_downgrade() {
                return Err(RepositoryError::Irreversible { version });
            }
        }

        for version in (target + 1..=current).rev() {
            let migration = self.migration(version)?;
            debug!("downgrading {} ({})", version, migration.name());
            migration
                .downgrade(conn)
                .map_err(|cause| RepositoryError::Failed { version, cause })?;
            self.table()
                .set(conn, version - 1)
                .map_err(RepositoryError::Tracking)?;
        }
        Ok(())
    }

    fn migration(&self, version: Version) -> Result<&dyn Migration, RepositoryError> {
        self.get(version).ok_or_else(|| {
            RepositoryError::Invalid(format!("no migration for version {}", version))
        })
    }
}

impl std::fmt::Debug for MigrationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRepository")
            .field("id", &self.id)
            .field("initial", &self.initial)
            .field("latest", &self.latest())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteConn;
    use crate::migration::FnMigration;

    fn sample() -> MigrationRepository {
        MigrationRepository::new(
            "sample",
            0,
            vec![
                FnMigration::sql(
                    1,
                    "users",
                    "CREATE TABLE users (id INTEGER PRIMARY KEY)",
                    Some("DROP TABLE users"),
                )
                .boxed(),
                FnMigration::sql(
                    2,
                    "users.email",
                    "ALTER TABLE users ADD COLUMN email TEXT",
                    Some("ALTER TABLE users DROP COLUMN email"),
                )
                .boxed(),
                FnMigration::sql(3, "audit", "CREATE TABLE audit (id INTEGER)", None).boxed(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_range() {
        let repo = sample();
        assert_eq!(repo.initial(), 0);
        assert_eq!(repo.latest(), 3);
        assert_eq!(repo.get(2).map(|m| m.name()), Some("users.email"));
        assert!(repo.get(4).is_none());
    }

    #[test]
    fn test_rejects_gaps_and_duplicates() {
        let gap = MigrationRepository::new(
            "gap",
            215,
            vec![
                FnMigration::sql(216, "a", "SELECT 1", None).boxed(),
                FnMigration::sql(218, "b", "SELECT 1", None).boxed(),
            ],
        );
        assert!(matches!(gap, Err(RepositoryError::Invalid(_))));

        let dup = MigrationRepository::new(
            "dup",
            0,
            vec![
                FnMigration::sql(1, "a", "SELECT 1", None).boxed(),
                FnMigration::sql(1, "b", "SELECT 1", None).boxed(),
            ],
        );
        assert!(matches!(dup, Err(RepositoryError::Invalid(_))));

        let late_start = MigrationRepository::new(
            "late",
            0,
            vec![FnMigration::sql(2, "a", "SELECT 1", None).boxed()],
        );
        assert!(late_start.is_err());
    }

    #[test]
    fn test_empty_repository() {
        let repo = MigrationRepository::new("empty", 5, Vec::new()).unwrap();
        assert_eq!(repo.latest(), 5);
    }

    #[test]
    fn test_upgrade_and_downgrade() {
        let repo = sample();
        let mut conn = SqliteConn::open_in_memory().unwrap();
        assert_eq!(repo.current(&mut conn).unwrap(), 0);

        repo.version_control(&mut conn, 0).unwrap();
        repo.upgrade(&mut conn, 2).unwrap();
        assert_eq!(repo.current(&mut conn).unwrap(), 2);
        assert!(conn.table_exists("users").unwrap());

        repo.downgrade(&mut conn, 0).unwrap();
        assert_eq!(repo.current(&mut conn).unwrap(), 0);
        assert!(!conn.table_exists("users").unwrap());
    }

    #[test]
    fn test_irreversible_downgrade_has_no_side_effects() {
        let repo = sample();
        let mut conn = SqliteConn::open_in_memory().unwrap();
        repo.upgrade(&mut conn, 3).unwrap();

        let err = repo.downgrade(&mut conn, 1).unwrap_err();
        assert!(matches!(err, RepositoryError::Irreversible { version: 3 }));
        assert_eq!(repo.current(&mut conn).unwrap(), 3);
        assert!(conn.columns("users").unwrap().iter().any(|c| c.name == "email"));
    }

    #[test]
    fn test_out_of_range_targets() {
        let repo = sample();
        let mut conn = SqliteConn::open_in_memory().unwrap();
        assert!(matches!(
            repo.upgrade(&mut conn, 4),
            Err(RepositoryError::OutOfRange { target: 4, .. })
        ));
        assert!(repo.version_control(&mut conn, 9).is_err());

        repo.upgrade(&mut conn, 1).unwrap();
        assert!(matches!(
            repo.downgrade(&mut conn, 2),
            Err(RepositoryError::Invalid(_))
        ));
    }

    #[test]
    fn test_failed_upgrade_keeps_last_good_version() {
        let repo = MigrationRepository::new(
            "broken",
            0,
            vec![
                FnMigration::sql(1, "ok", "CREATE TABLE t (id INTEGER)", None).boxed(),
                FnMigration::sql(2, "broken", "ALTER TABLE missing ADD COLUMN x", None).boxed(),
            ],
        )
        .unwrap();
        let mut conn = SqliteConn::open_in_memory().unwrap();

        let err = repo.upgrade(&mut conn, 2).unwrap_err();
        assert!(matches!(err, RepositoryError::Failed { version: 2, .. }));
        assert_eq!(repo.current(&mut conn).unwrap(), 1);
    }
}
