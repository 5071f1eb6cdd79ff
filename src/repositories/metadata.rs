//! ConnectionMetadata repository
//!
//! Raw snapshot reads/writes. Verified writes with retry live one level up
//! in `metadata::storage`; this repository is the thin store access.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::connection_metadata::{self, Entity as ConnectionMetadata};

#[derive(Debug, Clone)]
pub struct MetadataRepository {
    db: DatabaseConnection,
}

impl MetadataRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Append a snapshot row; returns the new row id.
    pub async fn insert_snapshot(
        &self,
        connection_id: Uuid,
        metadata_type: &str,
        metadata: JsonValue,
    ) -> Result<Uuid, DbErr> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let model = connection_metadata::ActiveModel {
            id: Set(id),
            connection_id: Set(connection_id),
            metadata_type: Set(metadata_type.to_string()),
            metadata: Set(metadata),
            collected_at: Set(now.into()),
            refresh_frequency: Set(Some("1 day".to_string())),
            created_at: Set(now.into()),
        };
        model.insert(&self.db).await?;
        Ok(id)
    }

    /// Append tables and columns snapshots in one transaction, replacing
    /// the current view atomically (latest-by-collected_at semantics).
    pub async fn insert_schema_snapshots(
        &self,
        connection_id: Uuid,
        tables: JsonValue,
        columns: JsonValue,
    ) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        for (metadata_type, metadata) in [("tables", tables), ("columns", columns)] {
            let model = connection_metadata::ActiveModel {
                id: Set(Uuid::new_v4()),
                connection_id: Set(connection_id),
                metadata_type: Set(metadata_type.to_string()),
                metadata: Set(metadata),
                collected_at: Set(now.into()),
                refresh_frequency: Set(Some("1 day".to_string())),
                created_at: Set(now.into()),
            };
            model.insert(&txn).await?;
        }

        txn.commit().await
    }

    /// Most recent snapshot of the given type for a connection.
    pub async fn latest(
        &self,
        connection_id: Uuid,
        metadata_type: &str,
    ) -> Result<Option<connection_metadata::Model>, DbErr> {
        ConnectionMetadata::find()
            .filter(connection_metadata::Column::ConnectionId.eq(connection_id))
            .filter(connection_metadata::Column::MetadataType.eq(metadata_type))
            .order_by_desc(connection_metadata::Column::CollectedAt)
            .limit(1)
            .one(&self.db)
            .await
    }
}
