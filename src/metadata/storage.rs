//! Verified metadata storage
//!
//! Snapshot writes are "critical": after each insert the service re-reads
//! the most recent row of the written type and checks its count property
//! meets expectation, retrying up to 3 times with a 2 s back-off when the
//! verification read disagrees.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::{Value as JsonValue, json};
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use super::schema_diff::{MetadataType, SchemaSnapshot};
use crate::repositories::metadata::MetadataRepository;

const MAX_STORE_ATTEMPTS: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Freshness buckets for the age of the newest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Recent,
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Recent => "recent",
            Freshness::Stale => "stale",
        }
    }

    /// Bucket an age: fresh under one hour, recent under a day, stale
    /// beyond that.
    pub fn from_age(collected_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
        let age = now - collected_at;
        if age < chrono::Duration::hours(1) {
            Freshness::Fresh
        } else if age < chrono::Duration::hours(24) {
            Freshness::Recent
        } else {
            Freshness::Stale
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataStorageService {
    repo: MetadataRepository,
}

impl MetadataStorageService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            repo: MetadataRepository::new(db),
        }
    }

    pub fn repository(&self) -> &MetadataRepository {
        &self.repo
    }

    /// Store a snapshot row and verify it landed, retrying on mismatch.
    ///
    /// The payload must carry a numeric `count` property; verification
    /// re-reads the latest row of the type and compares against it.
    pub async fn store_verified(
        &self,
        connection_id: Uuid,
        metadata_type: MetadataType,
        payload: JsonValue,
    ) -> Result<bool, DbErr> {
        let expected = payload
            .get("count")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0);

        for attempt in 1..=MAX_STORE_ATTEMPTS {
            self.repo
                .insert_snapshot(connection_id, metadata_type.as_str(), payload.clone())
                .await?;

            if self.verify_stored(connection_id, metadata_type, expected).await? {
                info!(
                    connection_id = %connection_id,
                    metadata_type = %metadata_type,
                    attempt,
                    "Stored and verified metadata snapshot"
                );
                return Ok(true);
            }

            warn!(
                connection_id = %connection_id,
                metadata_type = %metadata_type,
                attempt,
                "Metadata storage verification failed"
            );
            if attempt < MAX_STORE_ATTEMPTS {
                sleep(RETRY_BACKOFF).await;
            }
        }

        Ok(false)
    }

    /// Replace the current schema view: tables and columns rows written in
    /// one transaction, then verified.
    pub async fn store_schema_snapshot(
        &self,
        connection_id: Uuid,
        snapshot: &SchemaSnapshot,
    ) -> Result<bool, DbErr> {
        let tables = snapshot.tables_metadata();
        let columns = snapshot.columns_metadata();
        let expected = snapshot.tables.len() as u64;

        for attempt in 1..=MAX_STORE_ATTEMPTS {
            self.repo
                .insert_schema_snapshots(connection_id, tables.clone(), columns.clone())
                .await?;

            let tables_ok = self
                .verify_stored(connection_id, MetadataType::Tables, expected)
                .await?;
            let columns_ok = self
                .verify_stored(connection_id, MetadataType::Columns, expected)
                .await?;
            if tables_ok && columns_ok {
                return Ok(true);
            }

            warn!(
                connection_id = %connection_id,
                attempt,
                "Schema snapshot verification failed"
            );
            if attempt < MAX_STORE_ATTEMPTS {
                sleep(RETRY_BACKOFF).await;
            }
        }

        Ok(false)
    }

    /// Load the stored schema view (tables + columns rows) as a snapshot.
    pub async fn load_schema_snapshot(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<SchemaSnapshot>, DbErr> {
        let Some(tables_row) = self
            .repo
            .latest(connection_id, MetadataType::Tables.as_str())
            .await?
        else {
            return Ok(None);
        };

        let columns_row = self
            .repo
            .latest(connection_id, MetadataType::Columns.as_str())
            .await?;

        let snapshot = SchemaSnapshot::from_metadata(
            &tables_row.metadata,
            columns_row.as_ref().map(|row| &row.metadata),
        );

        if snapshot.tables.is_empty() {
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Current view of one metadata type with its freshness bucket.
    pub async fn current_with_freshness(
        &self,
        connection_id: Uuid,
        metadata_type: MetadataType,
    ) -> Result<Option<(JsonValue, Freshness)>, DbErr> {
        let Some(row) = self
            .repo
            .latest(connection_id, metadata_type.as_str())
            .await?
        else {
            return Ok(None);
        };

        let collected_at: DateTime<Utc> = row.collected_at.with_timezone(&Utc);
        let freshness = Freshness::from_age(collected_at, Utc::now());
        let payload = json!({
            "metadata": row.metadata,
            "collected_at": collected_at.to_rfc3339(),
            "freshness": freshness.as_str(),
        });
        Ok(Some((payload, freshness)))
    }

    async fn verify_stored(
        &self,
        connection_id: Uuid,
        metadata_type: MetadataType,
        expected: u64,
    ) -> Result<bool, DbErr> {
        let Some(row) = self
            .repo
            .latest(connection_id, metadata_type.as_str())
            .await?
        else {
            return Ok(false);
        };

        let stored = row
            .metadata
            .get("count")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0);
        Ok(stored >= expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::schema_diff::{ColumnSchema, TableSchema};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, Set};

    async fn setup() -> (MetadataStorageService, Uuid) {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");

        let organization_id = Uuid::new_v4();
        let org = crate::models::organization::ActiveModel {
            id: Set(organization_id),
            name: Set("Test Org".to_string()),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        org.insert(&db).await.expect("insert organization");

        let connection_id = Uuid::new_v4();
        let connection = crate::models::connection::ActiveModel {
            id: Set(connection_id),
            organization_id: Set(organization_id),
            name: Set("warehouse".to_string()),
            connection_type: Set("postgresql".to_string()),
            credentials_ciphertext: Set(None),
            is_default: Set(false),
            created_at: Set(Utc::now().into()),
            updated_at: Set(Utc::now().into()),
        };
        connection.insert(&db).await.expect("insert connection");

        (MetadataStorageService::new(db), connection_id)
    }

    fn sample_snapshot() -> SchemaSnapshot {
        SchemaSnapshot {
            tables: vec![TableSchema {
                name: "orders".to_string(),
                columns: vec![ColumnSchema {
                    name: "id".to_string(),
                    data_type: "INT".to_string(),
                    nullable: Some(false),
                }],
                primary_key: vec!["id".to_string()],
                foreign_keys: Vec::new(),
                indices: Vec::new(),
            }],
        }
    }

    #[tokio::test]
    async fn schema_snapshot_store_and_reload() {
        let (service, connection_id) = setup().await;
        let snapshot = sample_snapshot();

        let verified = service
            .store_schema_snapshot(connection_id, &snapshot)
            .await
            .expect("store snapshot");
        assert!(verified);

        let reloaded = service
            .load_schema_snapshot(connection_id)
            .await
            .expect("load snapshot")
            .expect("snapshot present");
        assert_eq!(reloaded, snapshot);
    }

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let (service, connection_id) = setup().await;
        assert!(
            service
                .load_schema_snapshot(connection_id)
                .await
                .expect("load snapshot")
                .is_none()
        );
    }

    #[test]
    fn freshness_buckets() {
        let now = Utc::now();
        assert_eq!(
            Freshness::from_age(now - chrono::Duration::minutes(10), now),
            Freshness::Fresh
        );
        assert_eq!(
            Freshness::from_age(now - chrono::Duration::hours(5), now),
            Freshness::Recent
        );
        assert_eq!(
            Freshness::from_age(now - chrono::Duration::days(3), now),
            Freshness::Stale
        );
    }
}
