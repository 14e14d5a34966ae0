//! Error taxonomy for migration walks
//!
//! Two enums cover the seams of the engine:
//!
//! - [`RepositoryError`]: returned by the migration repository. Its
//!   [`RepositoryError::Irreversible`] variant is the marker for "this version
//!   has no downgrade path" and is consumed by the walk orchestrator, never
//!   surfaced as a walk failure.
//! - [`WalkError`]: every fault that ends a walk. Coverage gaps are kept apart
//!   from execution and integrity faults so reports never conflate them.

use crate::migration::Version;
use thiserror::Error;

/// Errors raised by the migration repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The migration at `version` declares no downgrade
    #[error("migration {version} does not support downgrade")]
    Irreversible { version: Version },

    /// A migration's upgrade or downgrade body failed
    #[error("migration {version} failed: {cause:#}")]
    Failed {
        version: Version,
        cause: anyhow::Error,
    },

    /// The requested target lies outside the known version range
    #[error("target version {target} is outside the repository range {initial}..={latest}")]
    OutOfRange {
        target: Version,
        initial: Version,
        latest: Version,
    },

    /// The migration set itself is malformed (gaps, duplicates, bad files)
    #[error("invalid migration repository: {0}")]
    Invalid(String),

    /// Reading or writing the version tracking table failed
    #[error("version tracking failed: {0:#}")]
    Tracking(anyhow::Error),
}

impl RepositoryError {
    /// Whether this is the irreversible marker rather than a real failure
    pub fn is_irreversible(&self) -> bool {
        matches!(self, RepositoryError::Irreversible { .. })
    }
}

/// Faults that abort a walk
#[derive(Debug, Error)]
pub enum WalkError {
    /// Configuration, connection or backend registration problem
    #[error("setup failed: {0}")]
    Setup(String),

    /// A backend administrative command exited badly or wrote to stderr
    #[error("failed to run: {command} (exit status {status:?})\n{output}")]
    AdminCommand {
        command: String,
        status: Option<i32>,
        output: String,
    },

    /// The cooperative family lock could not be acquired
    #[error("failed to acquire {family} lock at {path}: {cause}")]
    Lock {
        family: String,
        path: String,
        cause: std::io::Error,
    },

    /// A non-skip-listed version has no check hook
    #[error("DB migration {version} does not have a test (backend {backend}). Please add one!")]
    CoverageGap { backend: String, version: Version },

    /// The repository reported a different version than the one just migrated to
    #[error("backend {backend} reports version {actual} after migrating to {expected}")]
    VersionMismatch {
        backend: String,
        expected: Version,
        actual: Version,
    },

    /// A data check or post-downgrade check failed
    #[error("data check failed at version {version} on backend {backend}: {cause:#}")]
    Integrity {
        backend: String,
        version: Version,
        cause: anyhow::Error,
    },

    /// Applying an upgrade or downgrade failed
    #[error("failed to migrate to version {version} on backend {backend}: {cause}")]
    Migration {
        backend: String,
        version: Version,
        cause: RepositoryError,
    },
}

impl WalkError {
    /// Whether this fault is a test-authoring defect rather than a runtime failure
    pub fn is_coverage_gap(&self) -> bool {
        matches!(self, WalkError::CoverageGap { .. })
    }

    /// Whether this fault is a data integrity fault
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            WalkError::VersionMismatch { .. } | WalkError::Integrity { .. }
        )
    }
}

impl From<config::ConfigError> for WalkError {
    fn from(e: config::ConfigError) -> Self {
        WalkError::Setup(format!("Failed to read migration test config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irreversible_marker() {
        let err = RepositoryError::Irreversible { version: 216 };
        assert!(err.is_irreversible());
        assert_eq!(err.to_string(), "migration 216 does not support downgrade");

        let err = RepositoryError::Invalid("gap".to_string());
        assert!(!err.is_irreversible());
    }

    #[test]
    fn test_coverage_gap_message_names_version() {
        let err = WalkError::CoverageGap {
            backend: "sqlite".to_string(),
            version: 245,
        };
        assert!(err.is_coverage_gap());
        assert!(!err.is_integrity_fault());
        assert!(err.to_string().contains("245"));
    }

    #[test]
    fn test_integrity_classification() {
        let err = WalkError::VersionMismatch {
            backend: "mysql".to_string(),
            expected: 3,
            actual: 2,
        };
        assert!(err.is_integrity_fault());
        assert_eq!(
            err.to_string(),
            "backend mysql reports version 2 after migrating to 3"
        );
    }
}
