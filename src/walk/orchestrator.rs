//! Walk orchestrator
//!
//! Drives one backend from the repository's initial version to its latest
//! version and, if requested, back down again, one version at a time:
//!
//! ```text
//! Idle -> PreparingBackend -> Ascending(v)... -> Descending(v)... -> Complete
//!                                    \                 \
//!                                     +-----------------+--> Failed
//! ```
//!
//! Each upgrade with data runs `pre_upgrade`, the migration, a version check
//! and `check`; each downgrade with data runs the migration, a version check
//! and `post_downgrade`. A snake walk additionally bounces one version down
//! and back up at every step. Irreversible migrations are recorded and
//! stepped around, never treated as failures.

use super::hooks::{HookRegistry, SkipSet};
use super::report::{Direction, StepOutcome, StepRecord, WalkReport};
use crate::database::SchemaConn;
use crate::error::{RepositoryError, WalkError};
use crate::migration::{MigrationRepository, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Immutable description of one walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkPlan {
    pub initial: Version,
    pub latest: Version,
    pub snake_walk: bool,
    pub downgrade: bool,
}

impl WalkPlan {
    pub fn for_repository(
        repository: &MigrationRepository,
        snake_walk: bool,
        downgrade: bool,
    ) -> Self {
        WalkPlan {
            initial: repository.initial(),
            latest: repository.latest(),
            snake_walk,
            downgrade,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Idle,
    PreparingBackend,
    Ascending(Version),
    Descending(Version),
    Complete,
    Failed,
}

impl fmt::Display for WalkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkState::Idle => write!(f, "idle"),
            WalkState::PreparingBackend => write!(f, "preparing backend"),
            WalkState::Ascending(v) => write!(f, "ascending to {}", v),
            WalkState::Descending(v) => write!(f, "descending from {}", v),
            WalkState::Complete => write!(f, "complete"),
            WalkState::Failed => write!(f, "failed"),
        }
    }
}

/// A backend the walker can migrate
pub trait WalkTarget {
    /// Backend name used in logs, errors and reports
    fn name(&self) -> &str;

    fn conn(&mut self) -> Result<&mut dyn SchemaConn, WalkError>;

    /// Return the backend to a clean, untracked state
    ///
    /// Used to get below a version whose migration cannot be reverted.
    fn rebuild(&mut self) -> Result<(), WalkError>;
}

/// Walks one backend through a repository's versions
pub struct Walker<'a> {
    repository: &'a MigrationRepository,
    hooks: &'a HookRegistry,
    skip: &'a SkipSet,
    plan: WalkPlan,
    state: WalkState,
    /// pre_upgrade output per version, reused by post_downgrade
    data: BTreeMap<Version, Value>,
}

impl<'a> Walker<'a> {
    pub fn new(
        repository: &'a MigrationRepository,
        hooks: &'a HookRegistry,
        skip: &'a SkipSet,
        plan: WalkPlan,
    ) -> Self {
        Walker {
            repository,
            hooks,
            skip,
            plan,
            state: WalkState::Idle,
            data: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    pub fn plan(&self) -> &WalkPlan {
        &self.plan
    }

    fn transition(&mut self, backend: &str, next: WalkState) {
        debug!("[{}] walk state: {} -> {}", backend, self.state, next);
        self.state = next;
    }

    /// Run the full walk against `target`
    ///
    /// The walk assumes a freshly reset backend. Any fault other than an
    /// irreversible migration stops the walk and is returned.
    pub fn walk(&mut self, target: &mut dyn WalkTarget) -> Result<WalkReport, WalkError> {
        let backend = target.name().to_string();
        let mut report = WalkReport::new(&backend, self.plan);
        self.data.clear();

        info!(
            "[{}] walking versions {}..={} (snake_walk={}, downgrade={})",
            backend, self.plan.initial, self.plan.latest, self.plan.snake_walk, self.plan.downgrade
        );

        match self.run(target, &mut report) {
            Ok(final_version) => {
                report.finish(final_version);
                self.transition(&backend, WalkState::Complete);
                info!("[{}] walk complete: {}", backend, report.summary());
                Ok(report)
            }
            Err(e) => {
                let at = self.state;
                self.transition(&backend, WalkState::Failed);
                error!("[{}] walk failed while {}: {}", backend, at, e);
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        target: &mut dyn WalkTarget,
        report: &mut WalkReport,
    ) -> Result<Version, WalkError> {
        let plan = self.plan;
        let backend = target.name().to_string();

        self.transition(&backend, WalkState::PreparingBackend);
        self.prepare(target, plan.initial)?;

        for version in plan.initial + 1..=plan.latest {
            self.transition(&backend, WalkState::Ascending(version));
            self.migrate_up(target, report, version, true)?;

            if plan.snake_walk && self.migrate_down(target, report, version - 1, true)? {
                self.migrate_up(target, report, version, false)?;
            }
        }

        if plan.downgrade {
            let mut version = plan.latest;
            while version > plan.initial {
                self.transition(&backend, WalkState::Descending(version));
                let downgraded = self.migrate_down(target, report, version - 1, true)?;

                if !downgraded {
                    self.rebuild_at(target, report, version - 1)?;
                } else if plan.snake_walk {
                    self.migrate_up(target, report, version, false)?;
                    self.migrate_down(target, report, version - 1, false)?;
                }
                version -= 1;
            }
        }

        let conn = target.conn()?;
        self.repository
            .current(conn)
            .map_err(|cause| self.migration_error(&backend, plan.initial, cause))
    }

    /// Put a fresh backend under version control at `initial`
    fn prepare(&self, target: &mut dyn WalkTarget, initial: Version) -> Result<(), WalkError> {
        let backend = target.name().to_string();
        let conn = target.conn()?;
        self.repository
            .version_control(conn, initial)
            .map_err(|cause| self.migration_error(&backend, initial, cause))?;
        self.verify_version(&backend, conn, initial)
    }

    /// Rebuild the backend and ascend to `version` without data checks
    fn rebuild_at(
        &self,
        target: &mut dyn WalkTarget,
        report: &mut WalkReport,
        version: Version,
    ) -> Result<(), WalkError> {
        warn!(
            "[{}] rebuilding backend at version {} to continue the descent",
            target.name(),
            version
        );
        target.rebuild()?;
        self.prepare(target, self.plan.initial)?;

        let backend = target.name().to_string();
        let conn = target.conn()?;
        self.repository
            .upgrade(conn, version)
            .map_err(|cause| self.migration_error(&backend, version, cause))?;
        self.verify_version(&backend, conn, version)?;
        report.rebuilds.push(version);
        Ok(())
    }

    fn migrate_up(
        &mut self,
        target: &mut dyn WalkTarget,
        report: &mut WalkReport,
        version: Version,
        with_data: bool,
    ) -> Result<(), WalkError> {
        let backend = target.name().to_string();
        let from = version.saturating_sub(1);

        if with_data && !self.skip.contains(version) && self.hooks.check(version).is_none() {
            return Err(WalkError::CoverageGap { backend, version });
        }

        let conn = target.conn()?;
        let mut data = Value::Null;
        if with_data {
            if let Some(hook) = self.hooks.pre_upgrade(version) {
                debug!("[{}] running pre_upgrade for {}", backend, version);
                data = hook
                    .invoke(conn, &Value::Null)
                    .map_err(|cause| WalkError::Integrity {
                        backend: backend.clone(),
                        version,
                        cause,
                    })?;
            }
        }

        if let Err(cause) = self.repository.upgrade(conn, version) {
            report.record(StepRecord {
                direction: Direction::Up,
                from,
                to: version,
                with_data,
                outcome: StepOutcome::Failed(cause.to_string()),
            });
            return Err(self.migration_error(&backend, version, cause));
        }
        self.verify_version(&backend, conn, version)?;

        if with_data {
            if let Some(hook) = self.hooks.check(version) {
                debug!("[{}] running check for {}", backend, version);
                hook.invoke(conn, &data)
                    .map_err(|cause| WalkError::Integrity {
                        backend: backend.clone(),
                        version,
                        cause,
                    })?;
            }
            self.data.insert(version, data);
        }

        report.record(StepRecord {
            direction: Direction::Up,
            from,
            to: version,
            with_data,
            outcome: StepOutcome::Applied,
        });
        Ok(())
    }

    /// Downgrade to `version`; `Ok(false)` when the migration above it is irreversible
    fn migrate_down(
        &mut self,
        target: &mut dyn WalkTarget,
        report: &mut WalkReport,
        version: Version,
        with_data: bool,
    ) -> Result<bool, WalkError> {
        let backend = target.name().to_string();
        let from = version + 1;
        let conn = target.conn()?;

        match self.repository.downgrade(conn, version) {
            Ok(()) => {}
            Err(RepositoryError::Irreversible { version: blocking }) => {
                info!(
                    "[{}] migration {} does not support downgrade, continuing",
                    backend, blocking
                );
                report.record(StepRecord {
                    direction: Direction::Down,
                    from,
                    to: version,
                    with_data,
                    outcome: StepOutcome::Irreversible,
                });
                return Ok(false);
            }
            Err(cause) => {
                report.record(StepRecord {
                    direction: Direction::Down,
                    from,
                    to: version,
                    with_data,
                    outcome: StepOutcome::Failed(cause.to_string()),
                });
                return Err(self.migration_error(&backend, from, cause));
            }
        }
        self.verify_version(&backend, conn, version)?;

        if with_data {
            if let Some(hook) = self.hooks.post_downgrade(from) {
                debug!("[{}] running post_downgrade for {}", backend, from);
                let data = self.data.get(&from).cloned().unwrap_or(Value::Null);
                hook.invoke(conn, &data)
                    .map_err(|cause| WalkError::Integrity {
                        backend: backend.clone(),
                        version: from,
                        cause,
                    })?;
            }
        }

        report.record(StepRecord {
            direction: Direction::Down,
            from,
            to: version,
            with_data,
            outcome: StepOutcome::Applied,
        });
        Ok(true)
    }

    fn verify_version(
        &self,
        backend: &str,
        conn: &mut dyn SchemaConn,
        expected: Version,
    ) -> Result<(), WalkError> {
        let actual = self
            .repository
            .current(conn)
            .map_err(|cause| self.migration_error(backend, expected, cause))?;
        if actual != expected {
            return Err(WalkError::VersionMismatch {
                backend: backend.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn migration_error(&self, backend: &str, version: Version, cause: RepositoryError) -> WalkError {
        WalkError::Migration {
            backend: backend.to_string(),
            version,
            cause,
        }
    }
}
