//! Connection registry
//!
//! Owns one lazily-connected [`Handle`] per configured backend. Handles are
//! disposed before a backend is reset and transparently reconnect on next use.

use crate::database::core::{open_connection, ConnectionDescriptor, SchemaConn};
use crate::error::WalkError;
use std::collections::BTreeMap;
use tracing::debug;

/// Live handle to one named backend
pub struct Handle {
    name: String,
    descriptor: ConnectionDescriptor,
    conn: Option<Box<dyn SchemaConn>>,
}

impl Handle {
    fn new(name: &str, descriptor: ConnectionDescriptor) -> Self {
        Handle {
            name: name.to_string(),
            descriptor,
            conn: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Whether a live connection is currently held
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// The live connection, connecting on first use
    pub fn conn(&mut self) -> Result<&mut dyn SchemaConn, WalkError> {
        if self.conn.is_none() {
            debug!("connecting backend {} ({})", self.name, self.descriptor);
            let conn = open_connection(&self.descriptor).map_err(|e| {
                WalkError::Setup(format!("Failed to connect backend {}: {:#}", self.name, e))
            })?;
            self.conn = Some(conn);
        }

        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(WalkError::Setup(format!(
                "Backend {} has no connection",
                self.name
            ))),
        }
    }

    /// Drop the live connection; the next `conn()` reconnects
    pub fn dispose(&mut self) {
        if self.conn.take().is_some() {
            debug!("disposed connection for backend {}", self.name);
        }
    }
}

/// Registry of named backends
#[derive(Default)]
pub struct ConnectionRegistry {
    handles: BTreeMap<String, Handle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `name -> connection string` pairs
    pub fn from_databases(databases: &BTreeMap<String, String>) -> Result<Self, WalkError> {
        let mut registry = Self::new();
        for (name, conn_string) in databases {
            let descriptor = ConnectionDescriptor::parse(conn_string).map_err(|e| {
                WalkError::Setup(format!("Backend {} is misconfigured: {:#}", name, e))
            })?;
            registry.register(name, descriptor);
        }
        Ok(registry)
    }

    /// Register a backend, replacing (and disposing) any previous one of the same name
    pub fn register(&mut self, name: &str, descriptor: ConnectionDescriptor) -> &mut Handle {
        if let Some(mut previous) = self.handles.remove(name) {
            previous.dispose();
        }
        self.handles
            .entry(name.to_string())
            .or_insert_with(|| Handle::new(name, descriptor))
    }

    pub fn get(&mut self, name: &str) -> Result<&mut Handle, WalkError> {
        self.handles
            .get_mut(name)
            .ok_or_else(|| WalkError::Setup(format!("Unknown backend: {}", name)))
    }

    pub fn descriptor(&self, name: &str) -> Result<&ConnectionDescriptor, WalkError> {
        self.handles
            .get(name)
            .map(|h| h.descriptor())
            .ok_or_else(|| WalkError::Setup(format!("Unknown backend: {}", name)))
    }

    /// Drop the live connection of a backend, keeping its registration
    pub fn dispose(&mut self, name: &str) {
        if let Some(handle) = self.handles.get_mut(name) {
            handle.dispose();
        }
    }

    /// Remove a backend entirely
    pub fn remove(&mut self, name: &str) -> Option<ConnectionDescriptor> {
        self.handles.remove(name).map(|mut handle| {
            handle.dispose();
            handle.descriptor
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Registered backend names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_registry() -> ConnectionRegistry {
        let mut databases = BTreeMap::new();
        databases.insert("sqlite".to_string(), "sqlite://".to_string());
        ConnectionRegistry::from_databases(&databases).unwrap()
    }

    #[test]
    fn test_lazy_connect() {
        let mut registry = memory_registry();
        let handle = registry.get("sqlite").unwrap();
        assert!(!handle.is_connected());

        handle.conn().unwrap();
        assert!(handle.is_connected());
    }

    #[test]
    fn test_dispose_and_reconnect() {
        let mut registry = memory_registry();
        {
            let conn = registry.get("sqlite").unwrap().conn().unwrap();
            conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
            assert!(conn.table_exists("t").unwrap());
        }

        registry.dispose("sqlite");
        assert!(!registry.get("sqlite").unwrap().is_connected());

        // a fresh in-memory database comes back after reconnecting
        let conn = registry.get("sqlite").unwrap().conn().unwrap();
        assert!(!conn.table_exists("t").unwrap());
    }

    #[test]
    fn test_unknown_backend() {
        let mut registry = memory_registry();
        assert!(matches!(
            registry.get("oracle"),
            Err(WalkError::Setup(_))
        ));
    }

    #[test]
    fn test_register_and_remove() {
        let mut registry = memory_registry();
        let descriptor = ConnectionDescriptor::parse("mysql://u:p@localhost/citest").unwrap();
        registry.register("citest", descriptor.clone());
        assert_eq!(registry.names(), vec!["citest", "sqlite"]);

        assert_eq!(registry.remove("citest"), Some(descriptor));
        assert!(!registry.contains("citest"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_misconfigured_backend() {
        let mut databases = BTreeMap::new();
        databases.insert("bad".to_string(), "oracle://x".to_string());
        assert!(ConnectionRegistry::from_databases(&databases).is_err());
    }
}
