//! Backend lifecycle management
//!
//! Brings a backend's logical database into a known-empty state before a
//! walk. Embedded SQLite databases are reset by deleting files; MySQL and
//! PostgreSQL databases are dropped and recreated through their command-line
//! clients. Every operation on a family holds that family's [`FamilyLock`] for
//! its full duration.

mod command;
mod lock;
mod presence;

pub use command::{
    AdminCommand, CommandOutput, CommandRunner, IdempotentSuccess, SystemCommandRunner,
};
pub use lock::FamilyLock;
pub use presence::{
    have_backend, have_mysql, have_postgresql, parse_presence, MYSQL_PRESENT_ENV,
    POSTGRESQL_PRESENT_ENV,
};

use crate::database::core::{BackendFamily, ConnectionDescriptor};
use crate::database::registry::ConnectionRegistry;
use crate::error::WalkError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Files SQLite may leave next to a database file
const SQLITE_COMPANION_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

/// Database PostgreSQL admin sessions bind to; a session cannot drop its own database
const POSTGRES_ADMIN_DATABASE: &str = "postgres";

/// Creates and resets backend databases
#[derive(Clone)]
pub struct LifecycleManager {
    lock_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl LifecycleManager {
    /// Manager running admin commands as child processes
    pub fn new(lock_dir: &Path) -> Self {
        Self::with_runner(lock_dir, Arc::new(SystemCommandRunner))
    }

    pub fn with_runner(lock_dir: &Path, runner: Arc<dyn CommandRunner>) -> Self {
        LifecycleManager {
            lock_dir: lock_dir.to_path_buf(),
            runner,
        }
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Create the backend's logical database if it does not exist yet
    pub fn bootstrap(&self, registry: &ConnectionRegistry, name: &str) -> Result<(), WalkError> {
        let descriptor = registry.descriptor(name)?.clone();
        let _lock = FamilyLock::acquire(&self.lock_dir, descriptor.family)?;

        info!("bootstrapping backend {} ({})", name, descriptor);
        match descriptor.family {
            // SQLite creates the file on first connect
            BackendFamily::Sqlite => Ok(()),
            BackendFamily::Mysql => {
                let database = checked_database_name(&descriptor)?;
                self.run(&mysql_command(
                    &descriptor,
                    &format!("create database if not exists {};", database),
                ))
            }
            BackendFamily::Postgresql => {
                let database = checked_database_name(&descriptor)?;
                self.run(
                    &postgres_command(&descriptor, &format!("create database {};", database))
                        .allow(IdempotentSuccess::new(1, "already exists")),
                )
            }
        }
    }

    /// Drop and recreate the backend's logical database
    ///
    /// The registry handle is disposed first, so no live connection pins the
    /// database being dropped. The next use of the handle reconnects.
    pub fn reset(&self, registry: &mut ConnectionRegistry, name: &str) -> Result<(), WalkError> {
        let descriptor = registry.descriptor(name)?.clone();
        registry.dispose(name);

        let _lock = FamilyLock::acquire(&self.lock_dir, descriptor.family)?;

        info!("resetting backend {} ({})", name, descriptor);
        match descriptor.family {
            BackendFamily::Sqlite => reset_sqlite(&descriptor),
            BackendFamily::Mysql => {
                let database = checked_database_name(&descriptor)?;
                self.run(&mysql_command(
                    &descriptor,
                    &format!(
                        "drop database if exists {}; create database {};",
                        database, database
                    ),
                ))
            }
            BackendFamily::Postgresql => {
                let database = checked_database_name(&descriptor)?;
                self.run(&postgres_command(
                    &descriptor,
                    &format!("drop database if exists {};", database),
                ))?;
                self.run(&postgres_command(
                    &descriptor,
                    &format!("create database {};", database),
                ))
            }
        }
    }

    fn run(&self, command: &AdminCommand) -> Result<(), WalkError> {
        let output = self.runner.run(command)?;
        command.check(&output)
    }
}

/// `mysql` client invocation executing `sql`
pub fn mysql_command(descriptor: &ConnectionDescriptor, sql: &str) -> AdminCommand {
    let mut command = AdminCommand::new("mysql")
        .arg("-u")
        .arg(descriptor.user.as_str())
        .arg("-h")
        .arg(descriptor.host.as_str());
    if let Some(port) = descriptor.port {
        command = command.arg("-P").arg(port.to_string());
    }
    command = command.arg("-e").arg(sql);
    if let Some(password) = &descriptor.password {
        command = command.env("MYSQL_PWD", password.as_str());
    }
    command
}

/// `psql` invocation executing `sql` against the admin database
pub fn postgres_command(descriptor: &ConnectionDescriptor, sql: &str) -> AdminCommand {
    let mut command = AdminCommand::new("psql")
        .arg("-w")
        .arg("-U")
        .arg(descriptor.user.as_str())
        .arg("-h")
        .arg(descriptor.host.as_str());
    if let Some(port) = descriptor.port {
        command = command.arg("-p").arg(port.to_string());
    }
    command = command
        .arg("-d")
        .arg(POSTGRES_ADMIN_DATABASE)
        .arg("-c")
        .arg(sql)
        .env("PGUSER", descriptor.user.as_str());
    if let Some(password) = &descriptor.password {
        command = command.env("PGPASSWORD", password.as_str());
    }
    command
}

/// Database names are spliced into admin SQL, so only plain identifiers pass
fn checked_database_name(descriptor: &ConnectionDescriptor) -> Result<&str, WalkError> {
    let name = descriptor.database.as_str();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if valid {
        Ok(name)
    } else {
        Err(WalkError::Setup(format!(
            "Refusing to manage database with unsupported name '{}'",
            name
        )))
    }
}

fn reset_sqlite(descriptor: &ConnectionDescriptor) -> Result<(), WalkError> {
    let Some(path) = descriptor.sqlite_path() else {
        debug!("in-memory SQLite database needs no reset");
        return Ok(());
    };

    remove_if_present(path)?;
    for suffix in SQLITE_COMPANION_SUFFIXES {
        let mut companion = path.as_os_str().to_owned();
        companion.push(suffix);
        remove_if_present(Path::new(&companion))?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), WalkError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WalkError::Setup(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}
