//! SchemaChange repository
//!
//! Stores typed schema diffs with the 24-hour dedup window on
//! (connection, table, change type, column).

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::schema_change::{self, Entity as SchemaChange};

/// Dedup window for identical changes.
const DEDUP_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct SchemaChangeRepository {
    db: DatabaseConnection,
}

impl SchemaChangeRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Whether an identical change was already recorded inside the dedup
    /// window.
    pub async fn exists_recent(
        &self,
        connection_id: Uuid,
        table_name: &str,
        change_type: &str,
        column_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let cutoff = now - Duration::hours(DEDUP_WINDOW_HOURS);
        let mut query = SchemaChange::find()
            .filter(schema_change::Column::ConnectionId.eq(connection_id))
            .filter(schema_change::Column::TableName.eq(table_name))
            .filter(schema_change::Column::ChangeType.eq(change_type))
            .filter(schema_change::Column::DetectedAt.gte(cutoff));

        query = match column_name {
            Some(column) => query.filter(schema_change::Column::ColumnName.eq(column)),
            None => query.filter(schema_change::Column::ColumnName.is_null()),
        };

        Ok(query.count(&self.db).await? > 0)
    }

    /// Record a change; the caller is expected to have checked
    /// `exists_recent` first.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        connection_id: Uuid,
        organization_id: Uuid,
        table_name: &str,
        column_name: Option<&str>,
        change_type: &str,
        details: Option<JsonValue>,
        detected_at: DateTime<Utc>,
    ) -> Result<Uuid, DbErr> {
        let id = Uuid::new_v4();
        let model = schema_change::ActiveModel {
            id: Set(id),
            connection_id: Set(connection_id),
            organization_id: Set(organization_id),
            table_name: Set(table_name.to_string()),
            column_name: Set(column_name.map(str::to_string)),
            change_type: Set(change_type.to_string()),
            details: Set(details),
            acknowledged: Set(false),
            detected_at: Set(detected_at.into()),
            created_at: Set(detected_at.into()),
        };
        model.insert(&self.db).await?;
        Ok(id)
    }

    pub async fn list_by_connection(
        &self,
        connection_id: Uuid,
        limit: u64,
    ) -> Result<Vec<schema_change::Model>, DbErr> {
        SchemaChange::find()
            .filter(schema_change::Column::ConnectionId.eq(connection_id))
            .order_by_desc(schema_change::Column::DetectedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }

    /// Mark a change acknowledged by a user.
    pub async fn acknowledge(&self, change_id: Uuid) -> Result<bool, DbErr> {
        let active = schema_change::ActiveModel {
            acknowledged: Set(true),
            ..Default::default()
        };
        let result = SchemaChange::update_many()
            .set(active)
            .filter(schema_change::Column::Id.eq(change_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
