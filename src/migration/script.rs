//! SQL script migrations
//!
//! A script directory holds one file per version, named
//! `NNN_description.sql`:
//!
//! ```sql
//! -- migrate:upgrade
//! CREATE TABLE pci_devices (id INTEGER PRIMARY KEY);
//!
//! -- migrate:downgrade
//! DROP TABLE pci_devices;
//! ```
//!
//! A file without a `-- migrate:downgrade` section is irreversible.

use super::{Migration, Version};
use crate::database::SchemaConn;
use crate::error::RepositoryError;
use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const UPGRADE_MARKER: &str = "-- migrate:upgrade";
const DOWNGRADE_MARKER: &str = "-- migrate:downgrade";

/// A migration loaded from a `.sql` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMigration {
    version: Version,
    name: String,
    path: PathBuf,
    upgrade_sql: String,
    downgrade_sql: Option<String>,
}

#[derive(PartialEq)]
enum Section {
    Preamble,
    Upgrade,
    Downgrade,
}

impl ScriptMigration {
    /// Parse a script given its file name and contents
    pub fn parse(path: &Path, contents: &str) -> Result<Self, RepositoryError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| invalid(path, "file name is not valid UTF-8"))?;
        let (version, name) = parse_file_name(file_name).ok_or_else(|| {
            invalid(path, "file name must look like NNN_description.sql")
        })?;

        let mut section = Section::Preamble;
        let mut upgrade: Option<String> = None;
        let mut downgrade: Option<String> = None;

        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.eq_ignore_ascii_case(UPGRADE_MARKER) {
                if upgrade.is_some() {
                    return Err(invalid(path, "duplicate upgrade section"));
                }
                upgrade = Some(String::new());
                section = Section::Upgrade;
                continue;
            }
            if trimmed.eq_ignore_ascii_case(DOWNGRADE_MARKER) {
                if downgrade.is_some() {
                    return Err(invalid(path, "duplicate downgrade section"));
                }
                downgrade = Some(String::new());
                section = Section::Downgrade;
                continue;
            }

            let target = match section {
                Section::Preamble => {
                    if trimmed.is_empty() || trimmed.starts_with("--") {
                        continue;
                    }
                    return Err(invalid(path, "SQL found before the upgrade section"));
                }
                Section::Upgrade => upgrade.as_mut(),
                Section::Downgrade => downgrade.as_mut(),
            };
            if let Some(buffer) = target {
                buffer.push_str(line);
                buffer.push('\n');
            }
        }

        let upgrade_sql = upgrade.ok_or_else(|| invalid(path, "missing upgrade section"))?;

        Ok(ScriptMigration {
            version,
            name: name.to_string(),
            path: path.to_path_buf(),
            upgrade_sql,
            downgrade_sql: downgrade,
        })
    }

    /// Read and parse a script file
    pub fn from_file(path: &Path) -> Result<Self, RepositoryError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| invalid(path, &format!("failed to read: {}", e)))?;
        Self::parse(path, &contents)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Migration for ScriptMigration {
    fn version(&self) -> Version {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn upgrade(&self, conn: &mut dyn SchemaConn) -> Result<()> {
        run_sql(conn, &self.upgrade_sql)
    }

    fn downgrade(&self, conn: &mut dyn SchemaConn) -> Result<()> {
        match &self.downgrade_sql {
            Some(sql) => run_sql(conn, sql),
            None => Err(anyhow!(
                "{} has no downgrade section",
                self.path.display()
            )),
        }
    }

    fn supports_downgrade(&self) -> bool {
        self.downgrade_sql.is_some()
    }
}

fn run_sql(conn: &mut dyn SchemaConn, sql: &str) -> Result<()> {
    // an empty section is a deliberate no-op
    if sql.trim().is_empty() {
        return Ok(());
    }
    conn.execute_batch(sql)
}

fn invalid(path: &Path, reason: &str) -> RepositoryError {
    RepositoryError::Invalid(format!("{}: {}", path.display(), reason))
}

/// Split `216_add_pci_devices.sql` into `(216, "add_pci_devices")`
fn parse_file_name(file_name: &str) -> Option<(Version, &str)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (digits, name) = stem.split_once('_')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    Some((digits.parse().ok()?, name))
}

fn script_files(dir: &Path) -> Result<Vec<PathBuf>, RepositoryError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        RepositoryError::Invalid(format!(
            "failed to read migration directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| RepositoryError::Invalid(format!("{}: {}", dir.display(), e)))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every script in a directory
pub fn load_scripts(dir: &Path) -> Result<Vec<Box<dyn Migration>>, RepositoryError> {
    let mut migrations: Vec<Box<dyn Migration>> = Vec::new();
    for path in script_files(dir)? {
        let script = ScriptMigration::from_file(&path)?;
        debug!("loaded migration {} from {}", script.version, path.display());
        migrations.push(Box::new(script));
    }
    Ok(migrations)
}

/// File names of scripts that declare an upgrade but no downgrade, sorted
pub fn missing_downgrades(dir: &Path) -> Result<Vec<String>, RepositoryError> {
    let mut missing = Vec::new();
    for path in script_files(dir)? {
        let contents = fs::read_to_string(&path)
            .map_err(|e| invalid(&path, &format!("failed to read: {}", e)))?;
        let has_marker = |marker: &str| {
            contents
                .lines()
                .any(|line| line.trim().eq_ignore_ascii_case(marker))
        };
        if has_marker(UPGRADE_MARKER) && !has_marker(DOWNGRADE_MARKER) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                missing.push(name.to_string());
            }
        }
    }
    missing.sort();
    Ok(missing)
}
