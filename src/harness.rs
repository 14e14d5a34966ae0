//! Scenario drivers
//!
//! [`MigrationHarness`] bundles everything a migration test run needs (the
//! configuration, backend registry, lifecycle manager, repository, hooks and
//! skip set) and offers the standard scenarios:
//!
//! - walk every configured backend from a clean slate
//! - walk a MySQL or PostgreSQL "citest" backend when one is reachable
//!
//! ```rust,ignore
//! let config = WalkConfig::from_env(DatabaseSection::MigrationDbs)?;
//! let mut harness = MigrationHarness::new(config, repository, hooks, skip)?;
//!
//! let run = harness.walk_configured_backends();
//! assert!(run.is_success(), "{}", run.summary());
//! ```

use crate::config::WalkConfig;
use crate::database::{
    have_mysql, have_postgresql, BackendFamily, ConnectionDescriptor, ConnectionRegistry,
    LifecycleManager, SchemaConn,
};
use crate::error::WalkError;
use crate::migration::MigrationRepository;
use crate::walk::{HookRegistry, RunReport, SkipSet, WalkPlan, WalkReport, WalkTarget, Walker};
use tracing::{info, warn};

/// User, password and database of the opportunistic CI backends
pub const CITEST_USER: &str = "schemawalk_citest";
pub const CITEST_PASSWORD: &str = "schemawalk_citest";
pub const CITEST_DATABASE: &str = "schemawalk_citest";

/// Result of a scenario that may not apply to this environment
#[derive(Debug)]
pub enum ScenarioOutcome {
    Completed(WalkReport),
    /// The backend family is not available; carries the reason
    Skipped(String),
}

impl ScenarioOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ScenarioOutcome::Skipped(_))
    }

    pub fn report(&self) -> Option<&WalkReport> {
        match self {
            ScenarioOutcome::Completed(report) => Some(report),
            ScenarioOutcome::Skipped(_) => None,
        }
    }
}

/// A registry backend seen through the walker's eyes
///
/// Rebuilding resets the backend through the lifecycle manager, which also
/// disposes the registry handle.
pub struct HarnessBackend<'a> {
    name: String,
    registry: &'a mut ConnectionRegistry,
    lifecycle: &'a LifecycleManager,
}

impl<'a> HarnessBackend<'a> {
    pub fn new(
        name: &str,
        registry: &'a mut ConnectionRegistry,
        lifecycle: &'a LifecycleManager,
    ) -> Self {
        HarnessBackend {
            name: name.to_string(),
            registry,
            lifecycle,
        }
    }
}

impl WalkTarget for HarnessBackend<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn conn(&mut self) -> Result<&mut dyn SchemaConn, WalkError> {
        self.registry.get(&self.name)?.conn()
    }

    fn rebuild(&mut self) -> Result<(), WalkError> {
        self.lifecycle.reset(self.registry, &self.name)
    }
}

pub struct MigrationHarness {
    config: WalkConfig,
    registry: ConnectionRegistry,
    lifecycle: LifecycleManager,
    repository: MigrationRepository,
    hooks: HookRegistry,
    skip: SkipSet,
}

impl MigrationHarness {
    pub fn new(
        config: WalkConfig,
        repository: MigrationRepository,
        hooks: HookRegistry,
        skip: SkipSet,
    ) -> Result<Self, WalkError> {
        let registry = ConnectionRegistry::from_databases(&config.databases)?;
        let lifecycle = LifecycleManager::new(&config.lock_dir());
        Ok(MigrationHarness {
            config,
            registry,
            lifecycle,
            repository,
            hooks,
            skip,
        })
    }

    /// Replace the lifecycle manager, e.g. to run admin commands through a fake runner
    pub fn with_lifecycle(mut self, lifecycle: LifecycleManager) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn config(&self) -> &WalkConfig {
        &self.config
    }

    pub fn registry(&mut self) -> &mut ConnectionRegistry {
        &mut self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn repository(&self) -> &MigrationRepository {
        &self.repository
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Plan used for every walk of this harness
    pub fn plan(&self) -> WalkPlan {
        WalkPlan::for_repository(
            &self.repository,
            self.config.walk_style.snake_walk,
            self.config.walk_style.downgrade,
        )
    }

    /// Reset one registered backend and walk it
    pub fn walk_backend(&mut self, name: &str) -> Result<WalkReport, WalkError> {
        let plan = self.plan();
        self.lifecycle.bootstrap(&self.registry, name)?;
        self.lifecycle.reset(&mut self.registry, name)?;

        let mut target = HarnessBackend::new(name, &mut self.registry, &self.lifecycle);
        let mut walker = Walker::new(&self.repository, &self.hooks, &self.skip, plan);
        walker.walk(&mut target)
    }

    /// Walk every configured backend in turn
    ///
    /// Backends are walked sequentially; a fault on one backend is recorded
    /// and the remaining backends are still walked.
    pub fn walk_configured_backends(&mut self) -> RunReport {
        let mut run = RunReport::new();
        for name in self.registry.names() {
            info!("walking configured backend {}", name);
            match self.walk_backend(&name) {
                Ok(report) => run.add_walk(report),
                Err(e) if e.is_coverage_gap() => {
                    warn!("{}", e);
                    run.add_error(&name, e)
                }
                Err(e) => run.add_error(&name, e),
            }
            self.registry.dispose(&name);
        }
        run
    }

    /// Walk the MySQL citest backend if MySQL is available
    pub fn walk_mysql_opportunistically(&mut self) -> Result<ScenarioOutcome, WalkError> {
        self.walk_opportunistically(BackendFamily::Mysql)
    }

    /// Walk the PostgreSQL citest backend if PostgreSQL is available
    pub fn walk_postgresql_opportunistically(&mut self) -> Result<ScenarioOutcome, WalkError> {
        self.walk_opportunistically(BackendFamily::Postgresql)
    }

    fn walk_opportunistically(
        &mut self,
        family: BackendFamily,
    ) -> Result<ScenarioOutcome, WalkError> {
        let descriptor =
            ConnectionDescriptor::localhost(family, CITEST_USER, CITEST_PASSWORD, CITEST_DATABASE);
        let present = match family {
            BackendFamily::Mysql => have_mysql(&descriptor),
            BackendFamily::Postgresql => have_postgresql(&descriptor),
            BackendFamily::Sqlite => true,
        };
        if !present {
            let reason = format!("{} is not available, skipping citest walk", family);
            warn!("{}", reason);
            return Ok(ScenarioOutcome::Skipped(reason));
        }

        let name = format!("{}_citest", family.name());
        self.registry.register(&name, descriptor);

        let result = self.walk_backend(&name).and_then(|report| {
            self.sanity_check(&name, &report)?;
            Ok(report)
        });

        self.registry.remove(&name);
        result.map(ScenarioOutcome::Completed)
    }
}

impl MigrationHarness {
    /// Family-specific checks after a successful citest walk
    fn sanity_check(&mut self, name: &str, report: &WalkReport) -> Result<(), WalkError> {
        if self.registry.descriptor(name)?.family != BackendFamily::Mysql {
            return Ok(());
        }
        self.check_mysql_engines(name, report)
    }

    #[cfg(feature = "mysql")]
    fn check_mysql_engines(&mut self, name: &str, report: &WalkReport) -> Result<(), WalkError> {
        let latest = report.plan.latest;
        let integrity = |cause: anyhow::Error| WalkError::Integrity {
            backend: name.to_string(),
            version: latest,
            cause,
        };

        let conn = self.registry.get(name)?.conn()?;
        // a downgrading walk ends at the initial version; engines are checked at latest
        if report.final_version != Some(latest) {
            self.repository
                .upgrade(conn, latest)
                .map_err(|cause| WalkError::Migration {
                    backend: name.to_string(),
                    version: latest,
                    cause,
                })?;
        }

        let mysql = conn
            .as_mysql()
            .ok_or_else(|| integrity(anyhow::anyhow!("{} is not a MySQL connection", name)))?;
        check_innodb(mysql.table_engines().map_err(integrity)?).map_err(integrity)
    }

    #[cfg(not(feature = "mysql"))]
    fn check_mysql_engines(&mut self, _name: &str, _report: &WalkReport) -> Result<(), WalkError> {
        Ok(())
    }
}

/// Every table except the version tracking table must use InnoDB
#[cfg_attr(not(feature = "mysql"), allow(dead_code))]
fn check_innodb(engines: Vec<(String, String)>) -> anyhow::Result<()> {
    anyhow::ensure!(!engines.is_empty(), "no tables found in the migrated schema");

    let offending: Vec<String> = engines
        .into_iter()
        .filter(|(table, engine)| {
            table != crate::migration::VERSION_TABLE && !engine.eq_ignore_ascii_case("InnoDB")
        })
        .map(|(table, engine)| format!("{} ({})", table, engine))
        .collect();
    anyhow::ensure!(
        offending.is_empty(),
        "tables not using InnoDB: {}",
        offending.join(", ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseSection, WalkStyle};
    use crate::database::MYSQL_PRESENT_ENV;
    use crate::migration::FnMigration;
    use serial_test::serial;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn config(databases: &[(&str, String)], lock_dir: PathBuf) -> WalkConfig {
        WalkConfig {
            config_path: PathBuf::from("test_migrations.toml"),
            lock_path: Some(lock_dir),
            databases: databases
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            walk_style: WalkStyle {
                snake_walk: true,
                downgrade: true,
            },
            section: DatabaseSection::MigrationDbs,
        }
    }

    fn repository() -> MigrationRepository {
        MigrationRepository::new(
            "harness",
            0,
            vec![
                FnMigration::sql(
                    1,
                    "nodes",
                    "CREATE TABLE nodes (id INTEGER PRIMARY KEY)",
                    Some("DROP TABLE nodes"),
                )
                .boxed(),
                FnMigration::sql(2, "one way", "CREATE TABLE audit (id INTEGER)", None).boxed(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_check_innodb() {
        let ok = vec![
            ("instances".to_string(), "InnoDB".to_string()),
            ("migrate_version".to_string(), "MyISAM".to_string()),
        ];
        assert!(check_innodb(ok).is_ok());

        let bad = vec![("instances".to_string(), "MyISAM".to_string())];
        assert!(check_innodb(bad).is_err());
        assert!(check_innodb(Vec::new()).is_err());
    }

    #[test]
    fn test_walk_configured_sqlite_backends() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("walk.db");
        let databases = [
            ("file", format!("sqlite:///{}", db.display())),
            ("memory", "sqlite://".to_string()),
        ];
        let mut harness = MigrationHarness::new(
            config(&databases, dir.path().join("locks")),
            repository(),
            HookRegistry::new(),
            SkipSet::new().with_range(1..=2),
        )
        .unwrap();

        let run = harness.walk_configured_backends();
        assert!(run.is_success(), "{}", run.summary());
        assert_eq!(run.walks.len(), 2);
        for walk in &run.walks {
            assert_eq!(walk.irreversible, vec![2]);
            assert_eq!(walk.final_version, Some(0));
        }
    }

    #[test]
    fn test_coverage_gaps_reported_separately() {
        let dir = tempfile::tempdir().unwrap();
        let databases = [("memory", "sqlite://".to_string())];
        let mut harness = MigrationHarness::new(
            config(&databases, dir.path().join("locks")),
            repository(),
            HookRegistry::new(),
            SkipSet::new(),
        )
        .unwrap();

        let run = harness.walk_configured_backends();
        assert!(run.failures.is_empty());
        assert_eq!(run.coverage_gaps, vec![("memory".to_string(), 1)]);
    }

    #[test]
    #[serial]
    fn test_absent_mysql_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = MigrationHarness::new(
            config(&[], dir.path().join("locks")),
            repository(),
            HookRegistry::new(),
            SkipSet::new(),
        )
        .unwrap();

        std::env::set_var(MYSQL_PRESENT_ENV, "false");
        let outcome = harness.walk_mysql_opportunistically();
        std::env::remove_var(MYSQL_PRESENT_ENV);

        assert!(outcome.unwrap().is_skipped());
        assert!(harness.registry().is_empty());
    }
}
