//! Walk reports
//!
//! A [`WalkReport`] records every step of one backend's walk. A [`RunReport`]
//! aggregates the walks of a whole run and keeps coverage gaps apart from
//! execution and integrity failures.

use super::orchestrator::WalkPlan;
use crate::error::WalkError;
use crate::migration::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum StepOutcome {
    Applied,
    /// The migration has no downgrade; the walk carried on
    Irreversible,
    Failed(String),
}

/// One upgrade or downgrade attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub direction: Direction,
    pub from: Version,
    pub to: Version,
    /// Whether data hooks ran around this step
    pub with_data: bool,
    pub outcome: StepOutcome,
}

/// Record of one backend's walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkReport {
    pub backend: String,
    pub plan: WalkPlan,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    /// Versions whose downgrade was reported irreversible
    pub irreversible: Vec<Version>,
    /// Versions the backend was rebuilt to after an irreversible descent step
    pub rebuilds: Vec<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_version: Option<Version>,
}

impl WalkReport {
    pub fn new(backend: &str, plan: WalkPlan) -> Self {
        WalkReport {
            backend: backend.to_string(),
            plan,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            irreversible: Vec::new(),
            rebuilds: Vec::new(),
            final_version: None,
        }
    }

    pub fn record(&mut self, step: StepRecord) {
        if step.outcome == StepOutcome::Irreversible && !self.irreversible.contains(&step.from) {
            self.irreversible.push(step.from);
        }
        self.steps.push(step);
    }

    pub fn finish(&mut self, final_version: Version) {
        self.final_version = Some(final_version);
        self.finished_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Steps that were applied in the given direction
    pub fn applied(&self, direction: Direction) -> usize {
        self.steps
            .iter()
            .filter(|s| s.direction == direction && s.outcome == StepOutcome::Applied)
            .count()
    }

    pub fn summary(&self) -> String {
        let final_version = self
            .final_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "{}: {} up, {} down, final version {}",
            self.backend,
            self.applied(Direction::Up),
            self.applied(Direction::Down),
            final_version
        );
        if !self.irreversible.is_empty() {
            line.push_str(&format!(", irreversible {:?}", self.irreversible));
        }
        if let Some(duration) = self.duration() {
            line.push_str(&format!(" ({} ms)", duration.num_milliseconds()));
        }
        line
    }
}

/// A backend whose walk ended in a fault
#[derive(Debug)]
pub struct BackendFailure {
    pub backend: String,
    pub error: WalkError,
}

/// Outcome of walking several backends
#[derive(Debug, Default)]
pub struct RunReport {
    pub walks: Vec<WalkReport>,
    pub failures: Vec<BackendFailure>,
    /// `(backend, version)` pairs missing a check hook
    pub coverage_gaps: Vec<(String, Version)>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_walk(&mut self, report: WalkReport) {
        self.walks.push(report);
    }

    /// File a walk fault under failures or coverage gaps
    pub fn add_error(&mut self, backend: &str, error: WalkError) {
        match error {
            WalkError::CoverageGap { backend, version } => {
                self.coverage_gaps.push((backend, version));
            }
            error => self.failures.push(BackendFailure {
                backend: backend.to_string(),
                error,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.coverage_gaps.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self.walks.iter().map(|w| w.summary()).collect();
        for failure in &self.failures {
            lines.push(format!("{}: FAILED: {}", failure.backend, failure.error));
        }
        for (backend, version) in &self.coverage_gaps {
            lines.push(format!(
                "{}: DB migration {} does not have a test",
                backend, version
            ));
        }
        lines.join("\n")
    }
}
