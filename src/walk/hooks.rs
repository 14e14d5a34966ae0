//! Per-version hooks and the skip set
//!
//! Hooks are registered once, before any walk, into an explicit
//! `version -> HookSet` map. Three kinds exist:
//!
//! | Kind | Name | Runs |
//! |------|------|------|
//! | pre-upgrade | `pre_upgrade_NNN` | before upgrading to `NNN`; returns test data |
//! | check | `check_NNN` | after upgrading to `NNN`; receives that data |
//! | post-downgrade | `post_downgrade_NNN` | after reverting `NNN`; receives that data |
//!
//! Version numbers in names are zero-padded to three digits.

use crate::database::SchemaConn;
use crate::error::WalkError;
use crate::migration::Version;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;

/// Width version numbers are padded to in hook names
pub const HOOK_VERSION_WIDTH: usize = 3;

pub type PreUpgradeFn = Box<dyn Fn(&mut dyn SchemaConn) -> anyhow::Result<Value> + Send + Sync>;
pub type CheckFn = Box<dyn Fn(&mut dyn SchemaConn, &Value) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookKind {
    PreUpgrade,
    Check,
    PostDowngrade,
}

impl HookKind {
    pub fn all() -> [HookKind; 3] {
        [HookKind::PreUpgrade, HookKind::Check, HookKind::PostDowngrade]
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            HookKind::PreUpgrade => "pre_upgrade",
            HookKind::Check => "check",
            HookKind::PostDowngrade => "post_downgrade",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Conventional name of a hook, e.g. `check_007`
pub fn hook_name(kind: HookKind, version: Version) -> String {
    format!(
        "{}_{:0width$}",
        kind.prefix(),
        version,
        width = HOOK_VERSION_WIDTH
    )
}

/// Split a conventional hook name into its kind and version
///
/// Only canonical names are accepted: `check_7` and `check_0007` are rejected
/// so that a hook can never be silently registered under a name the walk will
/// not look up.
pub fn parse_hook_name(name: &str) -> Result<(HookKind, Version), WalkError> {
    for kind in HookKind::all() {
        let Some(rest) = name
            .strip_prefix(kind.prefix())
            .and_then(|rest| rest.strip_prefix('_'))
        else {
            continue;
        };
        if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let version: Version = rest
            .parse()
            .map_err(|_| WalkError::Setup(format!("Hook {} has an invalid version", name)))?;
        if hook_name(kind, version) != name {
            return Err(WalkError::Setup(format!(
                "Hook {} is not canonical; expected {}",
                name,
                hook_name(kind, version)
            )));
        }
        return Ok((kind, version));
    }
    Err(WalkError::Setup(format!(
        "Hook name {} does not follow <pre_upgrade|check|post_downgrade>_NNN",
        name
    )))
}

/// A hook body
pub enum Hook {
    PreUpgrade(PreUpgradeFn),
    Check(CheckFn),
    PostDowngrade(CheckFn),
}

impl Hook {
    pub fn pre_upgrade<F>(f: F) -> Self
    where
        F: Fn(&mut dyn SchemaConn) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Hook::PreUpgrade(Box::new(f))
    }

    pub fn check<F>(f: F) -> Self
    where
        F: Fn(&mut dyn SchemaConn, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Hook::Check(Box::new(f))
    }

    pub fn post_downgrade<F>(f: F) -> Self
    where
        F: Fn(&mut dyn SchemaConn, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Hook::PostDowngrade(Box::new(f))
    }

    pub fn kind(&self) -> HookKind {
        match self {
            Hook::PreUpgrade(_) => HookKind::PreUpgrade,
            Hook::Check(_) => HookKind::Check,
            Hook::PostDowngrade(_) => HookKind::PostDowngrade,
        }
    }

    /// Run the hook; pre-upgrade hooks return their test data, others `Null`
    pub fn invoke(&self, conn: &mut dyn SchemaConn, data: &Value) -> anyhow::Result<Value> {
        match self {
            Hook::PreUpgrade(f) => f(conn),
            Hook::Check(f) | Hook::PostDowngrade(f) => {
                f(conn, data)?;
                Ok(Value::Null)
            }
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook::{:?}", self.kind())
    }
}

/// Hooks of one version
#[derive(Debug, Default)]
pub struct HookSet {
    pub pre_upgrade: Option<Hook>,
    pub check: Option<Hook>,
    pub post_downgrade: Option<Hook>,
}

impl HookSet {
    fn slot(&mut self, kind: HookKind) -> &mut Option<Hook> {
        match kind {
            HookKind::PreUpgrade => &mut self.pre_upgrade,
            HookKind::Check => &mut self.check,
            HookKind::PostDowngrade => &mut self.post_downgrade,
        }
    }
}

/// All hooks, keyed by version
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<Version, HookSet>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook under its conventional name
    pub fn register(&mut self, name: &str, hook: Hook) -> Result<&mut Self, WalkError> {
        let (kind, version) = parse_hook_name(name)?;
        if kind != hook.kind() {
            return Err(WalkError::Setup(format!(
                "Hook {} is named as {} but is a {} hook",
                name,
                kind,
                hook.kind()
            )));
        }
        self.insert(version, hook)
    }

    /// Register a hook for a version
    pub fn insert(&mut self, version: Version, hook: Hook) -> Result<&mut Self, WalkError> {
        let kind = hook.kind();
        let slot = self.hooks.entry(version).or_default().slot(kind);
        if slot.is_some() {
            return Err(WalkError::Setup(format!(
                "Hook {} is registered twice",
                hook_name(kind, version)
            )));
        }
        *slot = Some(hook);
        Ok(self)
    }

    pub fn on_pre_upgrade<F>(&mut self, version: Version, f: F) -> Result<&mut Self, WalkError>
    where
        F: Fn(&mut dyn SchemaConn) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(version, Hook::pre_upgrade(f))
    }

    pub fn on_check<F>(&mut self, version: Version, f: F) -> Result<&mut Self, WalkError>
    where
        F: Fn(&mut dyn SchemaConn, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(version, Hook::check(f))
    }

    pub fn on_post_downgrade<F>(&mut self, version: Version, f: F) -> Result<&mut Self, WalkError>
    where
        F: Fn(&mut dyn SchemaConn, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(version, Hook::post_downgrade(f))
    }

    pub fn pre_upgrade(&self, version: Version) -> Option<&Hook> {
        self.hooks.get(&version).and_then(|s| s.pre_upgrade.as_ref())
    }

    pub fn check(&self, version: Version) -> Option<&Hook> {
        self.hooks.get(&version).and_then(|s| s.check.as_ref())
    }

    pub fn post_downgrade(&self, version: Version) -> Option<&Hook> {
        self.hooks.get(&version).and_then(|s| s.post_downgrade.as_ref())
    }

    /// Names of every registered hook, sorted by version then kind
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (version, set) in &self.hooks {
            for (kind, hook) in [
                (HookKind::PreUpgrade, &set.pre_upgrade),
                (HookKind::Check, &set.check),
                (HookKind::PostDowngrade, &set.post_downgrade),
            ] {
                if hook.is_some() {
                    names.push(hook_name(kind, *version));
                }
            }
        }
        names
    }

    /// Versions in `range` that have no check hook and are not skip-listed
    pub fn coverage_gaps(&self, range: RangeInclusive<Version>, skip: &SkipSet) -> Vec<Version> {
        range
            .filter(|v| !skip.contains(*v) && self.check(*v).is_none())
            .collect()
    }
}

/// Versions exempt from the check-hook requirement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipSet {
    versions: BTreeSet<Version>,
}

impl SkipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.versions.insert(version);
        self
    }

    pub fn with_range(mut self, range: RangeInclusive<Version>) -> Self {
        self.versions.extend(range);
        self
    }

    pub fn contains(&self, version: Version) -> bool {
        self.versions.contains(&version)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl FromIterator<Version> for SkipSet {
    fn from_iter<I: IntoIterator<Item = Version>>(iter: I) -> Self {
        SkipSet {
            versions: iter.into_iter().collect(),
        }
    }
}
