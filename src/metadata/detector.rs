//! Schema change detection
//!
//! Collects a fresh schema snapshot, diffs it against the stored view,
//! records deduplicated change rows, and atomically replaces the stored
//! snapshot when anything changed.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use tracing::{debug, info};
use uuid::Uuid;

use super::analytics::ChangeAnalytics;
use super::schema_diff::{DetectedChange, diff_schemas};
use super::storage::MetadataStorageService;
use crate::connectors::ConnectorRegistry;
use crate::crypto::CryptoKey;
use crate::error::TaskError;
use crate::repositories::connection::ConnectionRepository;
use crate::repositories::schema_change::SchemaChangeRepository;

/// Snapshot collection cap for detection runs.
const DETECTION_TABLE_LIMIT: usize = 100;

/// Result of one detection run.
#[derive(Debug, Default)]
pub struct DetectionOutcome {
    pub changes: Vec<DetectedChange>,
    pub stored: usize,
    pub skipped_duplicates: usize,
    /// Opaque importance flag carried through to consumers; any recorded
    /// change raises it.
    pub requires_refresh: bool,
    /// True when no previous snapshot existed and the current one was
    /// stored as the baseline.
    pub baseline_stored: bool,
}

pub struct SchemaChangeDetector {
    connections: ConnectionRepository,
    storage: MetadataStorageService,
    changes: SchemaChangeRepository,
    analytics: ChangeAnalytics,
    registry: Arc<ConnectorRegistry>,
}

impl SchemaChangeDetector {
    pub fn new(
        db: DatabaseConnection,
        crypto_key: Option<CryptoKey>,
        registry: Arc<ConnectorRegistry>,
    ) -> Self {
        Self {
            connections: ConnectionRepository::new(db.clone(), crypto_key),
            storage: MetadataStorageService::new(db.clone()),
            changes: SchemaChangeRepository::new(db.clone()),
            analytics: ChangeAnalytics::new(db),
            registry,
        }
    }

    /// Run detection for one connection.
    pub async fn detect_for_connection(
        &self,
        connection_id: Uuid,
    ) -> Result<DetectionOutcome, TaskError> {
        let connection = self
            .connections
            .get_by_id(connection_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?
            .ok_or(TaskError::ConnectionNotFound(connection_id))?;

        // Cached snapshots would mask drift; always collect fresh.
        self.registry.invalidate(connection_id);

        let credentials = self
            .connections
            .decrypt_credentials(&connection)
            .await
            .map_err(|e| TaskError::Upstream(e.to_string()))?;
        let connector = self
            .registry
            .create(&connection, &credentials)
            .map_err(|e| TaskError::Upstream(e.to_string()))?;

        let current = connector
            .fetch_schema_snapshot(DETECTION_TABLE_LIMIT)
            .await
            .map_err(|e| TaskError::Upstream(e.to_string()))?;
        info!(
            connection_id = %connection_id,
            tables = current.tables.len(),
            "Collected schema snapshot for change detection"
        );

        let Some(previous) = self.storage.load_schema_snapshot(connection_id).await? else {
            info!(
                connection_id = %connection_id,
                "No previous schema snapshot; storing baseline"
            );
            self.storage
                .store_schema_snapshot(connection_id, &current)
                .await?;
            self.registry.cache_snapshot(connection_id, current);
            return Ok(DetectionOutcome {
                baseline_stored: true,
                ..DetectionOutcome::default()
            });
        };

        let changes = diff_schemas(&current, &previous);
        debug!(
            connection_id = %connection_id,
            changes = changes.len(),
            "Schema comparison complete"
        );

        let now = Utc::now();
        let mut stored = 0usize;
        let mut skipped = 0usize;

        for change in &changes {
            let duplicate = self
                .changes
                .exists_recent(
                    connection_id,
                    &change.table,
                    change.change_type.as_str(),
                    change.column.as_deref(),
                    now,
                )
                .await?;
            if duplicate {
                skipped += 1;
                continue;
            }

            self.changes
                .insert(
                    connection_id,
                    connection.organization_id,
                    &change.table,
                    change.column.as_deref(),
                    change.change_type.as_str(),
                    Some(change.details.clone()),
                    now,
                )
                .await?;
            self.analytics
                .record_change(
                    connection_id,
                    connection.organization_id,
                    &change.table,
                    change.column.as_deref(),
                    change.change_type.as_str(),
                    now,
                )
                .await?;
            stored += 1;
        }

        if !changes.is_empty() {
            self.storage
                .store_schema_snapshot(connection_id, &current)
                .await?;
            self.registry.cache_snapshot(connection_id, current);
        }

        info!(
            connection_id = %connection_id,
            detected = changes.len(),
            stored,
            skipped,
            "Schema change detection finished"
        );

        let requires_refresh = !changes.is_empty();
        Ok(DetectionOutcome {
            changes,
            stored,
            skipped_duplicates: skipped,
            requires_refresh,
            baseline_stored: false,
        })
    }
}
