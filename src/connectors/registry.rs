//! Connector registry
//!
//! Builds connectors for stored connections and keeps an LRU cache of the
//! most recent schema snapshot per connection. Detection invalidates the
//! cached entry before collecting so diffs always run against a fresh
//! snapshot.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use uuid::Uuid;

use super::{ConnectionType, ConnectorError, SqlTargetConnector, TargetConnector,
    build_connection_url};
use crate::metadata::schema_diff::SchemaSnapshot;
use crate::models::connection::Model as ConnectionModel;

const SNAPSHOT_CACHE_CAPACITY: usize = 64;

pub struct ConnectorRegistry {
    snapshot_cache: Mutex<LruCache<Uuid, SchemaSnapshot>>,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            snapshot_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SNAPSHOT_CACHE_CAPACITY).expect("non-zero capacity"),
            )),
        }
    }

    /// Create a connector for a stored connection and its decrypted
    /// credentials.
    pub fn create(
        &self,
        connection: &ConnectionModel,
        credentials: &serde_json::Value,
    ) -> Result<Arc<dyn TargetConnector>, ConnectorError> {
        let connection_type: ConnectionType = connection.connection_type.parse()?;
        let url = build_connection_url(connection_type, credentials)?;
        Ok(Arc::new(SqlTargetConnector::new(connection_type, url)))
    }

    /// Drop any cached snapshot for the connection.
    pub fn invalidate(&self, connection_id: Uuid) {
        if let Ok(mut cache) = self.snapshot_cache.lock() {
            cache.pop(&connection_id);
        }
    }

    pub fn cached_snapshot(&self, connection_id: Uuid) -> Option<SchemaSnapshot> {
        self.snapshot_cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&connection_id).cloned())
    }

    pub fn cache_snapshot(&self, connection_id: Uuid, snapshot: SchemaSnapshot) {
        if let Ok(mut cache) = self.snapshot_cache.lock() {
            cache.put(connection_id, snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::schema_diff::TableSchema;

    #[test]
    fn snapshot_cache_round_trip_and_invalidation() {
        let registry = ConnectorRegistry::new();
        let connection_id = Uuid::new_v4();

        assert!(registry.cached_snapshot(connection_id).is_none());

        let snapshot = SchemaSnapshot {
            tables: vec![TableSchema {
                name: "orders".to_string(),
                columns: Vec::new(),
                primary_key: Vec::new(),
                foreign_keys: Vec::new(),
                indices: Vec::new(),
            }],
        };
        registry.cache_snapshot(connection_id, snapshot.clone());
        assert_eq!(registry.cached_snapshot(connection_id), Some(snapshot));

        registry.invalidate(connection_id);
        assert!(registry.cached_snapshot(connection_id).is_none());
    }
}
