//! ProfilingHistory repository

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::profiling_history::{self, Entity as ProfilingHistory};

#[derive(Debug, Clone)]
pub struct ProfileHistoryRepository {
    db: DatabaseConnection,
}

impl ProfileHistoryRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn save(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
        profile: JsonValue,
    ) -> Result<Uuid, DbErr> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let model = profiling_history::ActiveModel {
            id: Set(id),
            organization_id: Set(organization_id),
            connection_id: Set(connection_id),
            table_name: Set(table_name.to_string()),
            profile: Set(profile),
            collected_at: Set(now.into()),
            created_at: Set(now.into()),
        };
        model.insert(&self.db).await?;
        Ok(id)
    }

    pub async fn list(
        &self,
        organization_id: Uuid,
        connection_id: Option<Uuid>,
        table_name: Option<&str>,
        limit: u64,
    ) -> Result<Vec<profiling_history::Model>, DbErr> {
        let mut query = ProfilingHistory::find()
            .filter(profiling_history::Column::OrganizationId.eq(organization_id))
            .order_by_desc(profiling_history::Column::CollectedAt);
        if let Some(connection_id) = connection_id {
            query = query.filter(profiling_history::Column::ConnectionId.eq(connection_id));
        }
        if let Some(table_name) = table_name {
            query = query.filter(profiling_history::Column::TableName.eq(table_name));
        }
        query.limit(limit).all(&self.db).await
    }

    pub async fn latest(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        table_name: &str,
    ) -> Result<Option<profiling_history::Model>, DbErr> {
        ProfilingHistory::find()
            .filter(profiling_history::Column::OrganizationId.eq(organization_id))
            .filter(profiling_history::Column::ConnectionId.eq(connection_id))
            .filter(profiling_history::Column::TableName.eq(table_name))
            .order_by_desc(profiling_history::Column::CollectedAt)
            .limit(1)
            .one(&self.db)
            .await
    }
}
