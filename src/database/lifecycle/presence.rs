//! Detection of optional client/server backends
//!
//! MySQL and PostgreSQL walks only run when the engine is reachable. An
//! environment override wins over probing so CI can force either outcome.

use crate::database::core::{open_connection, BackendFamily, ConnectionDescriptor};
use std::env;
use tracing::{debug, info};

pub const MYSQL_PRESENT_ENV: &str = "SCHEMAWALK_TEST_MYSQL_PRESENT";
pub const POSTGRESQL_PRESENT_ENV: &str = "SCHEMAWALK_TEST_POSTGRESQL_PRESENT";

/// Interpret an override value; empty or `true` (any case) means present
pub fn parse_presence(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("true")
}

fn presence_override(var: &str) -> Option<bool> {
    env::var(var).ok().map(|value| parse_presence(&value))
}

fn probe(descriptor: &ConnectionDescriptor) -> bool {
    match open_connection(descriptor) {
        Ok(_) => true,
        Err(e) => {
            debug!("{} not reachable: {:#}", descriptor, e);
            false
        }
    }
}

fn have_family(var: &str, descriptor: &ConnectionDescriptor) -> bool {
    match presence_override(var) {
        Some(present) => {
            info!("{}={} overrides probing for {}", var, present, descriptor.family);
            present
        }
        None => probe(descriptor),
    }
}

/// Whether the MySQL test backend can be used
pub fn have_mysql(descriptor: &ConnectionDescriptor) -> bool {
    have_family(MYSQL_PRESENT_ENV, descriptor)
}

/// Whether the PostgreSQL test backend can be used
pub fn have_postgresql(descriptor: &ConnectionDescriptor) -> bool {
    have_family(POSTGRESQL_PRESENT_ENV, descriptor)
}

/// Presence check dispatched on the descriptor's family; SQLite is always present
pub fn have_backend(descriptor: &ConnectionDescriptor) -> bool {
    match descriptor.family {
        BackendFamily::Sqlite => true,
        BackendFamily::Mysql => have_mysql(descriptor),
        BackendFamily::Postgresql => have_postgresql(descriptor),
    }
}
